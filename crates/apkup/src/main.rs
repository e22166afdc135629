//! Command line front end: checks the catalog packages for updates and
//! installs them on a device connected over adb.

mod app;
mod cli;
mod error;
mod logging;
mod settings;

use apkup_platform::AppPaths;
use clap::Parser;
use log::{error, info, warn};

use crate::app::App;
use crate::cli::{Cli, Command, GlobalArgs};
use crate::error::AppError;
use crate::settings::AppSettings;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(error) = run(cli).await {
        error!("{error}");
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), AppError> {
    let paths = AppPaths::new()?;
    let settings = load_settings(&paths, &cli.global);
    logging::init_logging(
        &paths.log_file(),
        settings.debug_logging,
        settings.max_log_size_bytes,
    );
    info!("Starting apkup v{}", env!("CARGO_PKG_VERSION"));

    let app = App::new(settings, &paths)?;
    match cli.command {
        Command::List => {
            app::run_list();
            Ok(())
        }
        Command::Check {
            packages,
            no_cache,
            prefetch,
        } => app::run_check(&app, &packages, !no_cache, prefetch).await,
        Command::Install { package, yes } => app::run_install(&app, &package, yes).await,
        Command::Clean { package } => app::run_clean(&app, package.as_deref()),
    }
}

/// Settings from disk, with command line flags taking precedence.
fn load_settings(paths: &AppPaths, args: &GlobalArgs) -> AppSettings {
    let settings_file = paths.settings_file();
    let mut settings = AppSettings::load_from(&settings_file);
    if !settings_file.exists()
        && let Err(error) = settings.save_to(&settings_file)
    {
        warn!("Failed to write default settings: {error}");
    }
    apply_overrides(&mut settings, args);
    settings
}

fn apply_overrides(settings: &mut AppSettings, args: &GlobalArgs) {
    if args.verbose {
        settings.debug_logging = true;
    }
    if args.metered {
        settings.network_metered = true;
    }
    if let Some(adb) = &args.adb {
        settings.adb_path = Some(adb.clone());
    }
    if let Some(serial) = &args.serial {
        settings.device_serial = Some(serial.clone());
    }
}
