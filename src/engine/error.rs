use std::{io, path::PathBuf};

use nix::errno::Errno;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StartError {
    #[error("program is configured with zero instances")]
    ZeroInstances,
    #[error("command line has no tokens")]
    EmptyCommand,
    #[error("failed to open log file '{path}': {source}")]
    LogFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to spawn '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },
    #[error("no stable replica set after {attempts} start attempt(s)")]
    GraceExhausted { attempts: u32 },
}

/// `ESRCH` is not an error: the replica is already gone. Anything else from
/// `kill` is logged and the termination protocol escalates regardless.
#[derive(Debug, Error)]
pub enum StopError {
    #[error("failed to signal pid {pid}: {errno}")]
    Kill { pid: i32, errno: Errno },
}
