//! Structured logging
//!
//! Installs the global `tracing` subscriber from [`LoggingConfig`]: JSON or text
//! output, stdout or a size-rotated log file. Plugin console output is emitted
//! under the [`PLUGIN_LOG_TARGET`] target so it can be filtered separately,
//! e.g. `RUST_LOG=info,kagura::plugin=warn`.

use crate::core::config::LoggingConfig;
use anyhow::{Context, Result};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Target used for messages written by plugin code through `console.*`
pub const PLUGIN_LOG_TARGET: &str = "kagura::plugin";

/// Keeps the non-blocking writer alive; drop it last
pub struct Logger {
    _guard: WorkerGuard,
}

impl Logger {
    /// Initialize the logging system based on configuration
    pub fn init(config: &LoggingConfig) -> Result<Self> {
        let level = parse_log_level(&config.level)?;

        // RUST_LOG wins over the configured level when present
        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(level.as_str()));

        let (writer, guard) = match config.output.as_str() {
            "stdout" => tracing_appender::non_blocking(io::stdout()),
            "file" => {
                let log_file = config
                    .log_file
                    .as_ref()
                    .context("log_file must be specified when output is 'file'")?;
                let appender =
                    SizeRotatingFile::open(log_file, config.max_file_size, config.max_backups)?;
                tracing_appender::non_blocking(appender)
            }
            other => anyhow::bail!("Invalid output configuration: {}", other),
        };

        let fmt_layer = match config.format.as_str() {
            "json" => fmt::layer()
                .json()
                .with_writer(writer)
                .with_current_span(true)
                .with_thread_names(true)
                .with_target(true)
                .boxed(),
            "text" => fmt::layer()
                .with_writer(writer)
                .with_thread_names(true)
                .with_target(true)
                .boxed(),
            other => anyhow::bail!("Invalid format configuration: {}", other),
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

/// Parse log level string to tracing Level
fn parse_log_level(level: &str) -> Result<Level> {
    match level.to_lowercase().as_str() {
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        _ => anyhow::bail!("Invalid log level: {}", level),
    }
}

/// Log file that rolls over to `name.1 .. name.N` once it reaches `max_size` bytes.
///
/// Only ever written from the single `tracing-appender` worker thread, so no
/// interior locking is needed.
pub struct SizeRotatingFile {
    path: PathBuf,
    max_size: usize,
    max_backups: usize,
    file: File,
    written: usize,
}

impl SizeRotatingFile {
    pub fn open(path: &Path, max_size: usize, max_backups: usize) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).context("Failed to create log directory")?;
        }

        let file = open_append(path)
            .with_context(|| format!("Failed to open log file {}", path.display()))?;
        let written = file.metadata().map(|m| m.len() as usize).unwrap_or(0);

        Ok(Self {
            path: path.to_path_buf(),
            max_size,
            max_backups,
            file,
            written,
        })
    }

    fn backup_path(&self, index: usize) -> PathBuf {
        let mut name = self.path.as_os_str().to_os_string();
        name.push(format!(".{}", index));
        PathBuf::from(name)
    }

    fn rotate(&mut self) -> io::Result<()> {
        self.file.flush()?;

        // oldest backup falls off the end
        let oldest = self.backup_path(self.max_backups);
        if oldest.exists() {
            fs::remove_file(&oldest)?;
        }
        for index in (1..self.max_backups).rev() {
            let from = self.backup_path(index);
            if from.exists() {
                fs::rename(&from, self.backup_path(index + 1))?;
            }
        }
        fs::rename(&self.path, self.backup_path(1))?;

        self.file = open_append(&self.path)?;
        self.written = 0;
        Ok(())
    }
}

fn open_append(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

impl Write for SizeRotatingFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.written > 0 && self.written + buf.len() > self.max_size {
            self.rotate()?;
        }
        let n = self.file.write(buf)?;
        self.written += n;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
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
        assert!(matches!(parse_log_level("error"), Ok(Level::ERROR)));
        assert!(parse_log_level("verbose").is_err());
    }

    #[test]
    fn test_rotation_keeps_bounded_backups() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("kagura.log");
        let mut file = SizeRotatingFile::open(&path, 16, 2).unwrap();

        for _ in 0..5 {
            file.write_all(b"0123456789abcdef").unwrap();
        }
        file.flush().unwrap();

        assert!(path.exists());
        assert!(dir.path().join("kagura.log.1").exists());
        assert!(dir.path().join("kagura.log.2").exists());
        assert!(!dir.path().join("kagura.log.3").exists());
        assert_eq!(fs::read(&path).unwrap().len(), 16);
    }

    #[test]
    fn test_reopen_counts_existing_bytes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("kagura.log");
        fs::write(&path, b"already here").unwrap();

        let file = SizeRotatingFile::open(&path, 1024, 1).unwrap();
        assert_eq!(file.written, "already here".len());
    }
}
