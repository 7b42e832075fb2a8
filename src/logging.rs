//! Tracing setup plus the supervisor's own event log sink.

use std::{
    fs::{self, File, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{Context, Result};
use chrono::Local;
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use tracing::Level;
use tracing_subscriber::EnvFilter;

static TRACING_INIT: OnceCell<()> = OnceCell::new();

pub fn init_tracing() {
    TRACING_INIT.get_or_init(|| {
        let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::builder()
                .with_default_directive(Level::WARN.into())
                .from_env_lossy()
        });

        let subscriber = tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .finish();

        let _ = tracing::subscriber::set_global_default(subscriber);
    });
}

/// Two-stream event sink: info lines reach stdout, error lines reach stderr,
/// and both are appended to the log file when file logging is enabled.
#[derive(Debug, Clone)]
pub struct Logger {
    inner: Arc<Mutex<LoggerInner>>,
}

#[derive(Debug)]
struct LoggerInner {
    file: Option<File>,
    path: PathBuf,
}

#[derive(Debug, Clone, Copy)]
enum Severity {
    Info,
    Error,
}

impl Severity {
    fn label(self) -> &'static str {
        match self {
            Severity::Info => "INFO ",
            Severity::Error => "ERROR",
        }
    }
}

impl Logger {
    pub fn new(enabled: bool, log_file: &Path) -> Result<Self> {
        let file = if enabled {
            Some(open_append(log_file)?)
        } else {
            None
        };
        Ok(Self {
            inner: Arc::new(Mutex::new(LoggerInner {
                file,
                path: log_file.to_path_buf(),
            })),
        })
    }

    /// A sink that only writes to the standard streams.
    #[cfg(test)]
    pub fn disabled() -> Self {
        Self {
            inner: Arc::new(Mutex::new(LoggerInner {
                file: None,
                path: PathBuf::new(),
            })),
        }
    }

    pub fn info(&self, message: &str) {
        self.write(Severity::Info, message);
    }

    pub fn error(&self, message: &str) {
        self.write(Severity::Error, message);
    }

    fn write(&self, severity: Severity, message: &str) {
        let line = format!(
            "{} [{}] {message}",
            Local::now().format("%Y-%m-%d %H:%M:%S"),
            severity.label()
        );
        match severity {
            Severity::Info => println!("{line}"),
            Severity::Error => eprintln!("{line}"),
        }

        let mut guard = self.inner.lock();
        if let Some(file) = guard.file.as_mut() {
            if let Err(error) = writeln!(file, "{line}") {
                tracing::warn!(%error, path = ?guard.path, "failed to append to event log");
            }
        }
    }
}

fn open_append(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating log directory {:?}", parent.display()))?;
        }
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("opening log file {:?}", path.display()))
}
