#![allow(dead_code)]

//! Field-level comparison of two program configurations.

use std::collections::BTreeMap;
use std::fmt;

use super::model::ProgramConfig;

/// Fields that can take effect without restarting live replicas. Everything
/// else is consumed at exec time and requires a stop-then-start cycle.
const HOT_FIELDS: &[&str] = &["umask"];

/// Changed fields mapped to the serialized form of the incoming value.
#[derive(Debug, Default, Clone)]
pub struct ConfigDiff {
    changes: BTreeMap<&'static str, String>,
}

impl ConfigDiff {
    pub fn between(current: &ProgramConfig, next: &ProgramConfig) -> Self {
        let mut changes = BTreeMap::new();

        if current.command != next.command {
            changes.insert("command", next.command.clone());
        }
        if current.instances != next.instances {
            changes.insert("instances", next.instances.to_string());
        }
        if current.auto_start != next.auto_start {
            changes.insert("auto_start", next.auto_start.to_string());
        }
        if current.auto_restart != next.auto_restart {
            changes.insert("auto_restart", next.auto_restart.as_str().to_string());
        }
        if current.start_time != next.start_time {
            changes.insert("start_time", next.start_time.to_string());
        }
        if current.stop_time != next.stop_time {
            changes.insert("stop_time", next.stop_time.to_string());
        }
        if current.restart_attempts != next.restart_attempts {
            changes.insert("restart_attempts", next.restart_attempts.to_string());
        }
        if current.stop_signal != next.stop_signal {
            changes.insert("stop_signal", next.stop_signal.as_str().to_string());
        }
        if current.expected_exit_codes != next.expected_exit_codes {
            changes.insert(
                "expected_exit_codes",
                serde_json::to_string(&next.expected_exit_codes).unwrap_or_default(),
            );
        }
        if current.working_directory != next.working_directory {
            changes.insert(
                "working_directory",
                next.working_directory.display().to_string(),
            );
        }
        if current.umask != next.umask {
            let rendered = match next.umask {
                Some(mask) => format!("0o{mask:o}"),
                None => "-1".to_string(),
            };
            changes.insert("umask", rendered);
        }
        if current.stdout_log != next.stdout_log {
            changes.insert("stdout_log", next.stdout_log.display().to_string());
        }
        if current.stderr_log != next.stderr_log {
            changes.insert("stderr_log", next.stderr_log.display().to_string());
        }
        if current.environment_variables != next.environment_variables {
            changes.insert(
                "environment_variables",
                serde_json::to_string(&next.environment_variables).unwrap_or_default(),
            );
        }

        Self { changes }
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.changes.get(field).map(String::as_str)
    }

    /// True when at least one changed field cannot be applied to live
    /// replicas.
    pub fn requires_restart(&self) -> bool {
        self.changes
            .keys()
            .any(|field| !HOT_FIELDS.contains(field))
    }

    /// True when the replica count is the only change, in which case the
    /// registry scales instead of restarting.
    pub fn only_instances(&self) -> bool {
        self.changes.len() == 1 && self.changes.contains_key("instances")
    }
}

impl fmt::Display for ConfigDiff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (field, value) in &self.changes {
            if !first {
                write!(f, ", ")?;
            }
            write!(f, "{field}={value}")?;
            first = false;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::model::{AutoRestart, StopSignal};
    use std::{collections::BTreeMap, path::PathBuf};

    fn base() -> ProgramConfig {
        ProgramConfig {
            command: "sleep 60".to_string(),
            instances: 2,
            auto_start: true,
            auto_restart: AutoRestart::Unexpected,
            start_time: 1,
            stop_time: 5,
            restart_attempts: 3,
            stop_signal: StopSignal::Term,
            expected_exit_codes: vec![0],
            working_directory: PathBuf::from("/srv"),
            umask: None,
            stdout_log: PathBuf::from("/var/log/app.out"),
            stderr_log: PathBuf::from("/var/log/app.err"),
            environment_variables: BTreeMap::new(),
        }
    }

    #[test]
    fn identical_configs_diff_to_nothing() {
        let config = base();
        let diff = ConfigDiff::between(&config, &config.clone());
        assert!(diff.is_empty());
        assert!(!diff.requires_restart());
    }

    #[test]
    fn command_change_requires_restart() {
        let mut next = base();
        next.command = "sleep 90".to_string();
        let diff = ConfigDiff::between(&base(), &next);
        assert_eq!(diff.len(), 1);
        assert_eq!(diff.get("command"), Some("sleep 90"));
        assert!(diff.requires_restart());
        assert!(!diff.only_instances());
    }

    #[test]
    fn umask_change_is_hot_applicable() {
        let mut next = base();
        next.umask = Some(0o027);
        let diff = ConfigDiff::between(&base(), &next);
        assert_eq!(diff.get("umask"), Some("0o27"));
        assert!(!diff.requires_restart());
    }

    #[test]
    fn instances_only_change_is_detected() {
        let mut next = base();
        next.instances = 5;
        let diff = ConfigDiff::between(&base(), &next);
        assert!(diff.only_instances());
        assert!(diff.requires_restart());
        assert_eq!(diff.get("instances"), Some("5"));
    }

    #[test]
    fn instances_plus_command_is_not_instances_only() {
        let mut next = base();
        next.instances = 5;
        next.command = "sleep 90".to_string();
        let diff = ConfigDiff::between(&base(), &next);
        assert!(!diff.only_instances());
        assert_eq!(diff.len(), 2);
    }

    #[test]
    fn sequences_serialize_as_json() {
        let mut next = base();
        next.expected_exit_codes = vec![0, 2];
        next.environment_variables
            .insert("MODE".to_string(), "debug".to_string());
        let diff = ConfigDiff::between(&base(), &next);
        assert_eq!(diff.get("expected_exit_codes"), Some("[0,2]"));
        assert_eq!(
            diff.get("environment_variables"),
            Some(r#"{"MODE":"debug"}"#)
        );
    }

    #[test]
    fn display_lists_changed_fields() {
        let mut next = base();
        next.stop_signal = StopSignal::Int;
        next.stop_time = 10;
        let diff = ConfigDiff::between(&base(), &next);
        assert_eq!(diff.to_string(), "stop_signal=SIGINT, stop_time=10");
    }
}
