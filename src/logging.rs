// Logging setup
//
// env_logger to stderr, optionally mirrored into a timestamped file under
// the configured log directory.

use crate::config::DebugConfig;
use env_logger::{Builder, Env, Target};
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// Writes every record to stderr and, if open, to the log file.
struct LogTee {
    file: Option<File>,
}

impl Write for LogTee {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        io::stderr().write_all(buf)?;
        if let Some(file) = self.file.as_mut() {
            // A broken log file must not take stderr logging down with it
            if file.write_all(buf).is_err() {
                self.file = None;
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stderr().flush()?;
        if let Some(file) = self.file.as_mut() {
            file.flush()?;
        }
        Ok(())
    }
}

/// `<dir>/gridspace_<unix seconds>.log`
pub fn log_file_path(dir: &Path, now: SystemTime) -> PathBuf {
    let secs = now.duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0);
    dir.join(format!("gridspace_{secs}.log"))
}

fn open_log_file(dir: &Path) -> io::Result<(File, PathBuf)> {
    std::fs::create_dir_all(dir)?;
    let path = log_file_path(dir, SystemTime::now());
    let file = OpenOptions::new().create(true).append(true).open(&path)?;
    Ok((file, path))
}

/// Initialize logging. `RUST_LOG` overrides the configured level.
pub fn init_logging(config: &DebugConfig) {
    let mut builder = Builder::new();
    builder.filter_level(config.level_filter());
    builder.parse_env(Env::default());
    builder.format_timestamp_millis();

    let mut file_error = None;
    let mut file_path = None;
    let file = if config.log_to_file {
        match open_log_file(&config.log_dir) {
            Ok((file, path)) => {
                file_path = Some(path);
                Some(file)
            }
            Err(e) => {
                file_error = Some(e);
                None
            }
        }
    } else {
        None
    };

    builder.target(Target::Pipe(Box::new(LogTee { file })));

    if builder.try_init().is_err() {
        // Already initialized (tests, embedding); keep the existing logger
        return;
    }

    log::info!("Logger initialized.");
    if let Some(path) = file_path {
        log::info!("Writing log file to {:?}", path);
    }
    if let Some(e) = file_error {
        log::warn!("Failed to open log file in {:?}: {}. Logging to stderr only.", config.log_dir, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn log_file_name_uses_unix_seconds() {
        let now = UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        let path = log_file_path(Path::new("logs"), now);
        assert_eq!(path, Path::new("logs").join("gridspace_1700000000.log"));
    }

    #[test]
    fn tee_without_file_accepts_writes() {
        let mut tee = LogTee { file: None };
        assert_eq!(tee.write(b"hello\n").unwrap(), 6);
        tee.flush().unwrap();
    }
}
