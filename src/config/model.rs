use std::{collections::BTreeMap, path::PathBuf};

use nix::sys::signal::Signal;

pub type ProgramName = String;

#[derive(Debug, Clone)]
pub struct Config {
    pub logging_enabled: bool,
    pub log_file: PathBuf,
    pub programs: BTreeMap<ProgramName, ProgramConfig>,
}

/// Validated description of one supervised program. Immutable once built;
/// a reload constructs a fresh value and diffs it against the live one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramConfig {
    pub command: String,
    pub instances: u32,
    pub auto_start: bool,
    pub auto_restart: AutoRestart,
    /// Seconds a replica must stay alive after spawn to count as started.
    pub start_time: u64,
    /// Graceful-stop budget in ticks of 100 ms before escalating to SIGKILL.
    pub stop_time: u64,
    pub restart_attempts: u32,
    pub stop_signal: StopSignal,
    pub expected_exit_codes: Vec<i32>,
    pub working_directory: PathBuf,
    /// `None` leaves the inherited umask untouched.
    pub umask: Option<u32>,
    pub stdout_log: PathBuf,
    pub stderr_log: PathBuf,
    pub environment_variables: BTreeMap<String, String>,
}

impl ProgramConfig {
    /// Tokenize the command line on single spaces. Quoting and escapes are
    /// not supported; that is a contract for the config author.
    pub fn argv(&self) -> Vec<&str> {
        self.command
            .split(' ')
            .filter(|token| !token.is_empty())
            .collect()
    }

    pub fn expects_exit_code(&self, code: i32) -> bool {
        self.expected_exit_codes.contains(&code)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutoRestart {
    Always,
    Never,
    Unexpected,
}

impl AutoRestart {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "always" => Some(AutoRestart::Always),
            "never" => Some(AutoRestart::Never),
            "unexpected" => Some(AutoRestart::Unexpected),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AutoRestart::Always => "always",
            AutoRestart::Never => "never",
            AutoRestart::Unexpected => "unexpected",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopSignal {
    Term,
    Int,
    Kill,
    Stop,
    Cont,
}

impl StopSignal {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "SIGTERM" => Some(StopSignal::Term),
            "SIGINT" => Some(StopSignal::Int),
            "SIGKILL" => Some(StopSignal::Kill),
            "SIGSTOP" => Some(StopSignal::Stop),
            "SIGCONT" => Some(StopSignal::Cont),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StopSignal::Term => "SIGTERM",
            StopSignal::Int => "SIGINT",
            StopSignal::Kill => "SIGKILL",
            StopSignal::Stop => "SIGSTOP",
            StopSignal::Cont => "SIGCONT",
        }
    }

    pub fn signal(self) -> Signal {
        match self {
            StopSignal::Term => Signal::SIGTERM,
            StopSignal::Int => Signal::SIGINT,
            StopSignal::Kill => Signal::SIGKILL,
            StopSignal::Stop => Signal::SIGSTOP,
            StopSignal::Cont => Signal::SIGCONT,
        }
    }
}
