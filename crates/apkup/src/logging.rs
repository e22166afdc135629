#[cfg(debug_assertions)]
use simplelog::{ColorChoice, TermLogger, TerminalMode};
use simplelog::{CombinedLogger, ConfigBuilder, LevelFilter, SharedLogger, WriteLogger};
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Appends to the log file, reopening it when it was deleted underneath us.
struct ReopeningLogFile {
    path: PathBuf,
    file: Mutex<Option<File>>,
}

impl ReopeningLogFile {
    fn open(path: PathBuf) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            file: Mutex::new(Some(file)),
        })
    }

    fn file(&self) -> MutexGuard<'_, Option<File>> {
        self.file.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn reopen_if_missing(&self) -> io::Result<()> {
        let mut guard = self.file();
        if self.path.exists() {
            return Ok(());
        }
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        *guard = Some(
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)?,
        );
        Ok(())
    }
}

impl Write for ReopeningLogFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.reopen_if_missing()?;
        match self.file().as_mut() {
            Some(file) => file.write(buf),
            None => Err(io::Error::other("log file not available")),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.file().as_mut() {
            Some(file) => file.flush(),
            None => Ok(()),
        }
    }
}

/// Drop the older half of the log once it grows past `max_size`, cutting at a
/// line boundary.
fn truncate_oversized_log(log_path: &Path, max_size: u64) {
    let Ok(metadata) = std::fs::metadata(log_path) else {
        return;
    };
    if metadata.len() <= max_size {
        return;
    }
    let Ok(contents) = std::fs::read(log_path) else {
        return;
    };
    let half = contents.len() / 2;
    let keep_from = contents[half..]
        .iter()
        .position(|&b| b == b'\n')
        .map_or(half, |pos| half + pos + 1);
    let _ = std::fs::write(log_path, &contents[keep_from..]);
}

pub fn init_logging(log_path: &Path, enabled: bool, max_log_size: u64) {
    truncate_oversized_log(log_path, max_log_size);

    let config = ConfigBuilder::new()
        .set_time_format_rfc3339()
        .add_filter_allow_str("apkup")
        .build();

    let mut loggers: Vec<Box<dyn SharedLogger>> = Vec::new();

    #[cfg(debug_assertions)]
    loggers.push(TermLogger::new(
        LevelFilter::Debug,
        config.clone(),
        TerminalMode::Stderr,
        ColorChoice::Auto,
    ));

    match ReopeningLogFile::open(log_path.to_path_buf()) {
        Ok(writer) => loggers.push(WriteLogger::new(LevelFilter::Debug, config, writer)),
        Err(error) => eprintln!("Cannot write log file {}: {error}", log_path.display()),
    }

    if !loggers.is_empty() {
        let _ = CombinedLogger::init(loggers);
    }
    set_logging_enabled(enabled);

    if enabled {
        log::info!("Logging to {}", log_path.display());
    }
}

pub fn set_logging_enabled(enabled: bool) {
    if enabled {
        log::set_max_level(LevelFilter::Debug);
    } else {
        log::set_max_level(LevelFilter::Off);
    }
}
