//! Background reaper: scans the replica set, decodes exits, and drives the
//! auto-restart policy.

use std::sync::{Arc, atomic::Ordering};
use std::time::Duration;

use nix::{
    errno::Errno,
    sys::{
        signal::Signal,
        wait::{WaitPidFlag, WaitStatus, waitpid},
    },
    unistd::Pid,
};
use tokio::time::sleep;

use crate::config::AutoRestart;

use super::Engine;

const SCAN_INTERVAL: Duration = Duration::from_millis(100);

/// Decoded terminal state of a reaped replica.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ExitKind {
    Code(i32),
    Signal(Signal),
    Unknown,
}

impl ExitKind {
    /// `None` means the pid is still alive (or merely stopped/continued)
    /// and must stay in the replica set.
    pub(crate) fn from_status(status: &WaitStatus) -> Option<Self> {
        match status {
            WaitStatus::StillAlive | WaitStatus::Stopped(..) | WaitStatus::Continued(..) => None,
            WaitStatus::Exited(_, code) => Some(ExitKind::Code(*code)),
            WaitStatus::Signaled(_, signal, _) => Some(ExitKind::Signal(*signal)),
            _ => Some(ExitKind::Unknown),
        }
    }

    pub(crate) fn describe(&self) -> String {
        match self {
            ExitKind::Code(code) => format!("exited with code {code}"),
            ExitKind::Signal(signal) => format!("terminated by signal {}", signal.as_str()),
            ExitKind::Unknown => "exited with an unknown status".to_string(),
        }
    }
}

impl Engine {
    /// Spawn the monitor task unless one is already running. The flag is
    /// claimed before the task starts so at most one scanner exists.
    pub(crate) fn ensure_monitor(&self) {
        if self
            .monitor_running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }
        let Some(engine) = self.weak.upgrade() else {
            self.monitor_running.store(false, Ordering::SeqCst);
            return;
        };
        tokio::spawn(async move {
            engine.monitor_loop().await;
        });
    }

    async fn monitor_loop(self: Arc<Self>) {
        tracing::debug!(program = %self.name, "monitor started");
        loop {
            while self.should_scan() {
                for pid in self.replicas.snapshot() {
                    self.scan_replica(pid);
                }
                sleep(SCAN_INTERVAL).await;
            }
            self.monitor_running.store(false, Ordering::SeqCst);
            // A concurrent spawn may have repopulated the set between the
            // last scan and the flag going down; reclaim the slot instead of
            // leaving fresh replicas unwatched.
            if self.stop_requested.load(Ordering::SeqCst)
                || self.replicas.is_empty()
                || self
                    .monitor_running
                    .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                    .is_err()
            {
                break;
            }
        }
        tracing::debug!(program = %self.name, "monitor stopped");
    }

    fn should_scan(&self) -> bool {
        !self.stop_requested.load(Ordering::SeqCst) && !self.replicas.is_empty()
    }

    fn scan_replica(&self, pid: Pid) {
        match waitpid(pid, Some(WaitPidFlag::WNOHANG)) {
            Ok(status) => {
                if let Some(kind) = ExitKind::from_status(&status) {
                    self.handle_exit(pid, kind);
                }
            }
            Err(Errno::ECHILD) => {
                self.logger.error(&format!(
                    "{}: pid {pid} is not a child of the supervisor, dropping it",
                    self.name
                ));
                self.replicas.remove(pid);
            }
            Err(errno) => {
                tracing::warn!(program = %self.name, %pid, %errno, "waitpid failed");
            }
        }
    }

    pub(crate) fn handle_exit(&self, pid: Pid, kind: ExitKind) {
        if !self.replicas.remove(pid) {
            // Another lifecycle path already claimed this pid.
            return;
        }

        self.logger
            .info(&format!("{}: pid {pid} {}", self.name, kind.describe()));

        if self.suppress_autorestart.load(Ordering::SeqCst) {
            return;
        }

        let restart = {
            let config = self.config.read();
            match config.auto_restart {
                AutoRestart::Always => true,
                AutoRestart::Never => false,
                AutoRestart::Unexpected => match kind {
                    ExitKind::Code(code) => !config.expects_exit_code(code),
                    _ => true,
                },
            }
        };
        if restart {
            tracing::info!(
                program = %self.name,
                %pid,
                "restarting after exit"
            );
            self.spawn_restart();
        }
    }

    fn spawn_restart(&self) {
        let Some(engine) = self.weak.upgrade() else {
            return;
        };
        tokio::spawn(async move {
            if let Err(error) = engine.start_for_restart().await {
                tracing::error!(program = %engine.name, %error, "auto-restart failed");
                engine
                    .logger
                    .error(&format!("{}: auto-restart failed: {error}", engine.name));
            }
        });
    }
}
