use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};

use super::{
    error::{ConfigError, ConfigResult},
    model::{AutoRestart, Config, ProgramConfig, ProgramName, StopSignal},
    raw::{RawConfig, RawProgram},
};

const DEFAULT_LOG_FILE: &str = "warden.log";
const UMASK_MAX: i64 = 0o7777;

pub fn load_from_path<P: AsRef<Path>>(path: P) -> ConfigResult<Config> {
    let path_ref = path.as_ref();
    let contents = fs::read_to_string(path_ref).map_err(|source| ConfigError::ReadFailure {
        path: path_ref.to_path_buf(),
        source,
    })?;
    load_from_str(path_ref, &contents)
}

pub fn load_from_str(config_path: &Path, contents: &str) -> ConfigResult<Config> {
    let raw: RawConfig = toml::from_str(contents)?;
    convert_raw_config(config_path, raw)
}

fn convert_raw_config(config_path: &Path, raw: RawConfig) -> ConfigResult<Config> {
    let logging_enabled = raw.logging_enabled.unwrap_or(false);
    let log_file = resolve_relative_path(
        config_path,
        raw.log_file.unwrap_or_else(|| DEFAULT_LOG_FILE.to_string()),
    );

    let mut programs = BTreeMap::new();
    for (name, raw_program) in raw.programs {
        let program = convert_program(config_path, &name, raw_program)?;
        programs.insert(name, program);
    }

    Ok(Config {
        logging_enabled,
        log_file,
        programs,
    })
}

fn convert_program(
    config_path: &Path,
    name: &ProgramName,
    raw: RawProgram,
) -> ConfigResult<ProgramConfig> {
    if raw.command.trim().is_empty() {
        return Err(ConfigError::EmptyCommand {
            program: name.clone(),
        });
    }

    let instances = require_u32(name, "instances", raw.instances)?;
    let start_time = require_u64(name, "start_time", raw.start_time)?;
    let stop_time = require_u64(name, "stop_time", raw.stop_time)?;
    let restart_attempts = require_u32(name, "restart_attempts", raw.restart_attempts)?;

    let auto_restart =
        AutoRestart::parse(&raw.auto_restart).ok_or_else(|| ConfigError::UnknownAutoRestart {
            program: name.clone(),
            value: raw.auto_restart.clone(),
        })?;

    let stop_signal =
        StopSignal::parse(&raw.stop_signal).ok_or_else(|| ConfigError::UnknownStopSignal {
            program: name.clone(),
            value: raw.stop_signal.clone(),
        })?;

    let mut expected_exit_codes = Vec::with_capacity(raw.expected_exit_codes.len());
    for code in raw.expected_exit_codes {
        let code = i32::try_from(code).map_err(|_| ConfigError::OutOfRange {
            program: name.clone(),
            field: "expected_exit_codes",
            value: code,
        })?;
        expected_exit_codes.push(code);
    }

    let umask = convert_umask(name, raw.umask)?;
    let environment_variables = convert_env_entries(name, raw.environment_variables)?;

    Ok(ProgramConfig {
        command: raw.command,
        instances,
        auto_start: raw.auto_start,
        auto_restart,
        start_time,
        stop_time,
        restart_attempts,
        stop_signal,
        expected_exit_codes,
        working_directory: resolve_relative_path(config_path, raw.working_directory),
        umask,
        stdout_log: resolve_relative_path(config_path, raw.stdout_log),
        stderr_log: resolve_relative_path(config_path, raw.stderr_log),
        environment_variables,
    })
}

fn convert_umask(name: &ProgramName, value: i64) -> ConfigResult<Option<u32>> {
    match value {
        -1 => Ok(None),
        0..=UMASK_MAX => Ok(Some(value as u32)),
        _ => Err(ConfigError::OutOfRange {
            program: name.clone(),
            field: "umask",
            value,
        }),
    }
}

fn convert_env_entries(
    name: &ProgramName,
    entries: Vec<String>,
) -> ConfigResult<BTreeMap<String, String>> {
    let mut variables = BTreeMap::new();
    for entry in entries {
        let Some((key, value)) = entry.split_once('=') else {
            return Err(ConfigError::MalformedEnvEntry {
                program: name.clone(),
                entry,
            });
        };
        if key.is_empty() {
            return Err(ConfigError::MalformedEnvEntry {
                program: name.clone(),
                entry,
            });
        }
        if variables
            .insert(key.to_string(), value.to_string())
            .is_some()
        {
            return Err(ConfigError::DuplicateEnvKey {
                program: name.clone(),
                key: key.to_string(),
            });
        }
    }
    Ok(variables)
}

fn require_u32(name: &ProgramName, field: &'static str, value: i64) -> ConfigResult<u32> {
    u32::try_from(value).map_err(|_| ConfigError::OutOfRange {
        program: name.clone(),
        field,
        value,
    })
}

fn require_u64(name: &ProgramName, field: &'static str, value: i64) -> ConfigResult<u64> {
    u64::try_from(value).map_err(|_| ConfigError::OutOfRange {
        program: name.clone(),
        field,
        value,
    })
}

fn resolve_relative_path(base: &Path, value: String) -> PathBuf {
    let path = PathBuf::from(value);
    if path.is_absolute() {
        return path;
    }

    let base_dir = if base.is_dir() {
        base.to_path_buf()
    } else {
        base.parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."))
    };
    base_dir.join(path)
}
