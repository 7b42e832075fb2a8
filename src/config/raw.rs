use std::collections::BTreeMap;

use serde::Deserialize;

#[derive(Debug, Default, Deserialize)]
pub struct RawConfig {
    #[serde(default)]
    pub logging_enabled: Option<bool>,
    #[serde(default)]
    pub log_file: Option<String>,
    #[serde(default)]
    pub programs: BTreeMap<String, RawProgram>,
}

/// One `[programs.<name>]` table exactly as it appears in the file. Every
/// field is required; absence surfaces as a decode error naming the field.
#[derive(Debug, Deserialize)]
pub struct RawProgram {
    pub command: String,
    pub instances: i64,
    pub auto_start: bool,
    pub auto_restart: String,
    pub start_time: i64,
    pub stop_time: i64,
    pub restart_attempts: i64,
    pub stop_signal: String,
    pub expected_exit_codes: Vec<i64>,
    pub working_directory: String,
    pub umask: i64,
    pub stdout_log: String,
    pub stderr_log: String,
    pub environment_variables: Vec<String>,
}
