use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Keep Android apps from outside the app store up to date
#[derive(Parser, Debug)]
#[command(name = "apkup")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[command(flatten)]
    pub global: GlobalArgs,
}

#[derive(Parser, Debug)]
pub struct GlobalArgs {
    /// Write debug output to the log file
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to the adb binary (defaults to the one on PATH)
    #[arg(long, global = true, value_name = "PATH")]
    pub adb: Option<PathBuf>,

    /// Serial of the device to talk to
    #[arg(short, long, global = true)]
    pub serial: Option<String>,

    /// Treat the connection as metered and skip prefetching
    #[arg(long, global = true)]
    pub metered: bool,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Command {
    /// Show the supported packages
    #[command(alias = "ls")]
    List,

    /// Look for updates of the given packages (all when empty)
    Check {
        packages: Vec<String>,

        /// Ignore cached results and ask upstream again
        #[arg(long)]
        no_cache: bool,

        /// Download available updates right away
        #[arg(long)]
        prefetch: bool,
    },

    /// Download, verify and install the latest release of a package
    #[command(alias = "i")]
    Install {
        package: String,

        /// Install without asking for confirmation
        #[arg(short, long)]
        yes: bool,
    },

    /// Remove staged downloads and cached update checks
    Clean { package: Option<String> },
}
