//! Child-side spawn protocol: working directory, umask, log redirection,
//! environment export, exec.

use std::{
    fs::{File, OpenOptions},
    os::unix::process::CommandExt,
    path::Path,
    process::{Command, Stdio},
};

use nix::{
    sys::stat::{self, Mode},
    unistd::Pid,
};

use crate::config::ProgramConfig;

use super::error::StartError;

/// Fork and exec one replica. The returned pid is owned by the caller's
/// replica set from here on; the child is reaped only through `waitpid`.
///
/// Failures between fork and exec (missing working directory, unknown
/// program, exec refusal) never escape into supervisor code: they surface
/// as an `Err` here while the child slot is torn down by the runtime.
pub(crate) fn spawn_replica(config: &ProgramConfig) -> Result<Pid, StartError> {
    let argv = config.argv();
    let Some((program, args)) = argv.split_first() else {
        return Err(StartError::EmptyCommand);
    };

    let stdout = open_log(&config.stdout_log)?;
    let stderr = open_log(&config.stderr_log)?;

    let mut command = Command::new(program);
    command
        .args(args)
        .current_dir(&config.working_directory)
        .envs(&config.environment_variables)
        .stdin(Stdio::inherit())
        .stdout(Stdio::from(stdout))
        .stderr(Stdio::from(stderr));

    if let Some(mask) = config.umask {
        // Applied between fork and exec; umask(2) is async-signal-safe.
        unsafe {
            command.pre_exec(move || {
                stat::umask(Mode::from_bits_truncate(mask));
                Ok(())
            });
        }
    }

    let child = command.spawn().map_err(|source| StartError::Spawn {
        command: config.command.clone(),
        source,
    })?;

    // Drop the handle without waiting; dropping a Child neither kills nor
    // reaps, so the pid stays valid for waitpid.
    Ok(Pid::from_raw(child.id() as i32))
}

fn open_log(path: &Path) -> Result<File, StartError> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|source| StartError::LogFile {
            path: path.to_path_buf(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AutoRestart, StopSignal};
    use nix::sys::{
        signal::{Signal, kill},
        wait::{WaitStatus, waitpid},
    };
    use std::{collections::BTreeMap, fs, path::PathBuf};

    fn config_for(dir: &Path, command: &str) -> ProgramConfig {
        ProgramConfig {
            command: command.to_string(),
            instances: 1,
            auto_start: true,
            auto_restart: AutoRestart::Never,
            start_time: 0,
            stop_time: 1,
            restart_attempts: 0,
            stop_signal: StopSignal::Term,
            expected_exit_codes: vec![0],
            working_directory: dir.to_path_buf(),
            umask: None,
            stdout_log: dir.join("replica.out"),
            stderr_log: dir.join("replica.err"),
            environment_variables: BTreeMap::new(),
        }
    }

    #[test]
    fn spawns_a_live_child_and_creates_log_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = config_for(dir.path(), "sleep 30");

        let pid = spawn_replica(&config).expect("spawn succeeds");
        assert!(pid.as_raw() > 0);
        assert!(config.stdout_log.exists());
        assert!(config.stderr_log.exists());

        kill(pid, Signal::SIGKILL).expect("kill");
        let status = waitpid(pid, None).expect("reap");
        assert!(matches!(
            status,
            WaitStatus::Signaled(_, Signal::SIGKILL, _)
        ));
    }

    #[test]
    fn exports_environment_and_redirects_stdout() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut config = config_for(dir.path(), "printenv WARDEN_MARKER");
        config
            .environment_variables
            .insert("WARDEN_MARKER".to_string(), "alive".to_string());

        let pid = spawn_replica(&config).expect("spawn succeeds");
        let status = waitpid(pid, None).expect("reap");
        assert!(matches!(status, WaitStatus::Exited(_, 0)));

        let captured = fs::read_to_string(&config.stdout_log).expect("stdout log");
        assert_eq!(captured.trim(), "alive");
    }

    #[test]
    fn missing_working_directory_fails_the_spawn() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut config = config_for(dir.path(), "sleep 30");
        config.working_directory = PathBuf::from("/nonexistent/warden/cwd");

        let error = spawn_replica(&config).unwrap_err();
        assert!(matches!(error, StartError::Spawn { .. }));
    }

    #[test]
    fn unknown_program_fails_the_spawn() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = config_for(dir.path(), "warden-no-such-binary");

        let error = spawn_replica(&config).unwrap_err();
        assert!(matches!(error, StartError::Spawn { .. }));
    }

    #[test]
    fn umask_applies_to_files_the_child_creates() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().expect("tempdir");
        let target = dir.path().join("created-by-child");
        let mut config = config_for(dir.path(), "touch");
        config.command = format!("touch {}", target.display());
        config.umask = Some(0o077);

        let pid = spawn_replica(&config).expect("spawn succeeds");
        let status = waitpid(pid, None).expect("reap");
        assert!(matches!(status, WaitStatus::Exited(_, 0)));

        let mode = fs::metadata(&target).expect("metadata").permissions().mode();
        assert_eq!(mode & 0o077, 0);
    }
}
