//! Structured logging setup
//!
//! Initializes the tracing ecosystem from [`LoggingConfig`]: json or text
//! output, stdout or size-rotated files, level via `RUST_LOG` or config.

use crate::core::config::LoggingConfig;
use anyhow::{Context, Result};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

/// Holds the non-blocking writer guard for the lifetime of the process
pub struct Logger {
    _guard: Option<WorkerGuard>,
}

impl Logger {
    /// Initialize the global tracing subscriber from configuration
    pub fn init(config: &LoggingConfig) -> Result<Self> {
        let level = parse_log_level(&config.level)?;

        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(level.as_str()));

        let (writer, guard) = match config.output.as_str() {
            "stdout" => {
                let (non_blocking, guard) = tracing_appender::non_blocking(std::io::stdout());
                (non_blocking, Some(guard))
            }
            "file" => {
                let log_file = config
                    .log_file
                    .as_ref()
                    .context("log_file must be specified when output is 'file'")?;

                if let Some(parent) = log_file.parent() {
                    std::fs::create_dir_all(parent).context("Failed to create log directory")?;
                }

                let appender =
                    SizeRotatingWriter::open(log_file, config.max_file_size, config.max_backups)?;
                let (non_blocking, guard) = tracing_appender::non_blocking(appender);
                (non_blocking, Some(guard))
            }
            other => anyhow::bail!("Invalid logging output: {}", other),
        };

        let fmt_layer = match config.format.as_str() {
            "json" => fmt::layer()
                .json()
                .with_writer(writer)
                .with_span_events(FmtSpan::CLOSE)
                .with_current_span(true)
                .with_target(true)
                .with_file(true)
                .with_line_number(true)
                .boxed(),
            "text" => fmt::layer()
                .with_writer(writer)
                .with_span_events(FmtSpan::CLOSE)
                .with_target(true)
                .boxed(),
            other => anyhow::bail!("Invalid logging format: {}", other),
        };

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()
            .context("Failed to initialize tracing subscriber")?;

        tracing::info!(
            level = %config.level,
            format = %config.format,
            output = %config.output,
            "Logging system initialized"
        );

        Ok(Logger { _guard: guard })
    }
}

fn parse_log_level(level: &str) -> Result<Level> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        _ => anyhow::bail!("Invalid log level: {}", level),
    }
}

/// File writer that rotates `file -> file.1 -> ... -> file.N` by size
pub struct SizeRotatingWriter {
    path: PathBuf,
    max_size: u64,
    max_backups: u32,
    file: Mutex<Option<std::fs::File>>,
    written: AtomicU64,
}

impl SizeRotatingWriter {
    /// Open the writer for the given log file path
    pub fn open(path: &Path, max_size: u64, max_backups: u32) -> Result<Self> {
        Ok(Self {
            path: path.to_path_buf(),
            max_size,
            max_backups,
            file: Mutex::new(None),
            written: AtomicU64::new(0),
        })
    }

    fn backup_path(&self, index: u32) -> PathBuf {
        let mut name = self.path.as_os_str().to_os_string();
        name.push(format!(".{}", index));
        PathBuf::from(name)
    }

    fn rotate(&self) -> std::io::Result<()> {
        *self.file.lock().unwrap() = None;

        for i in (1..self.max_backups).rev() {
            let from = self.backup_path(i);
            if from.exists() {
                let to = self.backup_path(i + 1);
                let _ = std::fs::remove_file(&to);
                std::fs::rename(&from, &to)?;
            }
        }

        if self.path.exists() {
            let first = self.backup_path(1);
            let _ = std::fs::remove_file(&first);
            std::fs::rename(&self.path, &first)?;
        }

        self.written.store(0, Ordering::SeqCst);
        Ok(())
    }

    fn ensure_open(&self) -> std::io::Result<std::sync::MutexGuard<'_, Option<std::fs::File>>> {
        let mut guard = self.file.lock().unwrap();
        if guard.is_none() {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)?;
            self.written.store(file.metadata()?.len(), Ordering::SeqCst);
            *guard = Some(file);
        }
        Ok(guard)
    }
}

impl Write for SizeRotatingWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        if self.written.load(Ordering::SeqCst) + buf.len() as u64 > self.max_size {
            self.rotate()?;
        }

        let mut guard = self.ensure_open()?;
        let written = guard.as_mut().unwrap().write(buf)?;
        self.written.fetch_add(written as u64, Ordering::SeqCst);
        Ok(written)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        let mut guard = self.ensure_open()?;
        if let Some(file) = guard.as_mut() {
            file.flush()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_log_level() {
        assert!(matches!(parse_log_level("debug"), Ok(Level::DEBUG)));
        assert!(matches!(parse_log_level("INFO"), Ok(Level::INFO)));
        assert!(matches!(parse_log_level("warn"), Ok(Level::WARN)));
        assert!(parse_log_level("loud").is_err());
    }

    #[test]
    fn test_backup_paths() {
        let writer = SizeRotatingWriter::open(Path::new("/tmp/logs/harbor.log"), 1024, 3).unwrap();
        assert_eq!(writer.backup_path(1), PathBuf::from("/tmp/logs/harbor.log.1"));
        assert_eq!(writer.backup_path(2), PathBuf::from("/tmp/logs/harbor.log.2"));
    }

    #[test]
    fn test_rotation_by_size() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("harbor.log");
        let mut writer = SizeRotatingWriter::open(&log, 16, 2).unwrap();

        writer.write_all(b"0123456789").unwrap();
        writer.flush().unwrap();
        // exceeds the 16-byte cap, forces a rotation
        writer.write_all(b"abcdefghij").unwrap();
        writer.flush().unwrap();

        assert!(log.exists());
        assert!(dir.path().join("harbor.log.1").exists());
    }
}
