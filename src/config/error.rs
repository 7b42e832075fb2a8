use std::{io, path::PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    ReadFailure {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("program '{program}' has an empty command")]
    EmptyCommand { program: String },
    #[error("invalid value {value} for '{field}' of program '{program}'")]
    OutOfRange {
        program: String,
        field: &'static str,
        value: i64,
    },
    #[error("unknown auto_restart value '{value}' for program '{program}'")]
    UnknownAutoRestart { program: String, value: String },
    #[error("unknown stop_signal '{value}' for program '{program}'")]
    UnknownStopSignal { program: String, value: String },
    #[error("environment entry '{entry}' for program '{program}' is not KEY=VALUE")]
    MalformedEnvEntry { program: String, entry: String },
    #[error("duplicate environment variable '{key}' for program '{program}'")]
    DuplicateEnvKey { program: String, key: String },
}

pub type ConfigResult<T> = Result<T, ConfigError>;
