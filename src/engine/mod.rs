#![allow(dead_code)]

//! Per-program lifecycle engine: spawn, monitor, restart, stop, reconfigure.

mod error;
mod monitor;
mod replicas;
mod spawn;

pub use error::{StartError, StopError};

use std::sync::{
    Arc, Weak,
    atomic::{AtomicBool, Ordering},
};
use std::time::Duration;

use nix::{
    errno::Errno,
    sys::{
        signal::{Signal, kill},
        wait::{WaitPidFlag, waitpid},
    },
    unistd::Pid,
};
use parking_lot::RwLock;
use tokio::{sync::Mutex, time::sleep};

use crate::{
    config::{ConfigDiff, ProgramConfig},
    logging::Logger,
};

use monitor::ExitKind;
use replicas::ReplicaSet;

const GRACE_SAMPLE: Duration = Duration::from_secs(1);
const STOP_TICK: Duration = Duration::from_millis(100);

/// Lifecycle controller for one program.
///
/// The replica set is the only shared container; the three flags are atomic
/// cells read without it. Public operations serialize on the `lifecycle`
/// mutex so `start` / `stop` / `scale` / `reload` never interleave, which is
/// also what makes them idempotent under monitor-initiated restarts.
#[derive(Debug)]
pub struct Engine {
    name: String,
    config: RwLock<ProgramConfig>,
    replicas: ReplicaSet,
    monitor_running: AtomicBool,
    stop_requested: AtomicBool,
    suppress_autorestart: AtomicBool,
    lifecycle: Mutex<()>,
    logger: Logger,
    /// Self-handle for the tasks the engine spawns (monitor, restarts).
    weak: Weak<Engine>,
}

/// Clears `suppress_autorestart` when the orchestrating call returns.
struct SuppressGuard<'a>(&'a AtomicBool);

impl Drop for SuppressGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl Engine {
    pub fn new(name: impl Into<String>, config: ProgramConfig, logger: Logger) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            name: name.into(),
            config: RwLock::new(config),
            replicas: ReplicaSet::default(),
            monitor_running: AtomicBool::new(false),
            stop_requested: AtomicBool::new(false),
            suppress_autorestart: AtomicBool::new(false),
            lifecycle: Mutex::new(()),
            logger,
            weak: weak.clone(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn auto_start(&self) -> bool {
        self.config.read().auto_start
    }

    pub fn status(&self) -> String {
        format!(
            "{} out of {} instances running",
            self.replicas.count(),
            self.config.read().instances
        )
    }

    pub fn is_running(&self) -> bool {
        self.replicas.count() == self.config.read().instances as usize
    }

    pub fn diff_against(&self, next: &ProgramConfig) -> ConfigDiff {
        ConfigDiff::between(&self.config.read(), next)
    }

    /// Bring the running replica count up to the configured target.
    /// Idempotent: only the shortfall is spawned.
    pub async fn start(&self) -> Result<(), StartError> {
        let _lifecycle = self.lifecycle.lock().await;
        self.start_locked().await
    }

    /// Monitor-initiated restart. Skips silently when a stop won the race
    /// between the exit event and this task running.
    pub(crate) async fn start_for_restart(&self) -> Result<(), StartError> {
        let _lifecycle = self.lifecycle.lock().await;
        if self.stop_requested.load(Ordering::SeqCst)
            || self.suppress_autorestart.load(Ordering::SeqCst)
        {
            return Ok(());
        }
        self.start_locked().await
    }

    async fn start_locked(&self) -> Result<(), StartError> {
        let (target, start_time, restart_attempts) = {
            let config = self.config.read();
            (config.instances, config.start_time, config.restart_attempts)
        };
        if target == 0 {
            return Err(StartError::ZeroInstances);
        }
        let target = target as usize;

        self.stop_requested.store(false, Ordering::SeqCst);
        let _suppress = self.suppress();

        let mut attempt = 0u32;
        loop {
            while self.replicas.count() < target {
                let config = self.config.read().clone();
                let pid = match spawn::spawn_replica(&config) {
                    Ok(pid) => pid,
                    Err(error) => {
                        self.logger
                            .error(&format!("{}: spawn failed: {error}", self.name));
                        self.stop_locked().await;
                        return Err(error);
                    }
                };
                self.replicas.insert(pid);
                self.logger
                    .info(&format!("{}: started pid {pid}", self.name));
            }
            self.ensure_monitor();

            if self.grace_elapsed(target, start_time).await {
                return Ok(());
            }

            attempt += 1;
            if attempt > restart_attempts {
                self.logger.error(&format!(
                    "{}: giving up after {attempt} start attempt(s)",
                    self.name
                ));
                self.stop_locked().await;
                return Err(StartError::GraceExhausted { attempts: attempt });
            }
            tracing::warn!(program = %self.name, attempt, "start grace window failed, retrying");
        }
    }

    /// One sample per second for `start_time` seconds; the attempt succeeds
    /// as soon as a sample observes the full replica count. A zero-second
    /// window degenerates to a single immediate sample.
    async fn grace_elapsed(&self, target: usize, start_time: u64) -> bool {
        for _ in 0..start_time {
            sleep(GRACE_SAMPLE).await;
            self.ensure_monitor();
            if self.replicas.count() == target {
                return true;
            }
        }
        self.replicas.count() == target
    }

    /// Terminate every replica: stop the monitor first, then run the
    /// graceful protocol with SIGKILL escalation. Idempotent.
    pub async fn stop(&self) {
        let _lifecycle = self.lifecycle.lock().await;
        self.stop_locked().await;
    }

    async fn stop_locked(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
        let _suppress = self.suppress();

        // The monitor must acknowledge before this task reaps, so no two
        // tasks ever call waitpid on the same pid.
        while self.monitor_running.load(Ordering::SeqCst) {
            sleep(STOP_TICK).await;
        }

        if self.replicas.is_empty() {
            return;
        }

        let (signal, ticks) = {
            let config = self.config.read();
            (config.stop_signal.signal(), config.stop_time)
        };

        // Re-scan after each round: a round may leave stragglers behind.
        while !self.replicas.is_empty() {
            self.graceful_round(signal, ticks).await;
            self.escalate_leftovers().await;
        }

        self.logger
            .info(&format!("{}: all replicas stopped", self.name));
    }

    async fn graceful_round(&self, signal: Signal, ticks: u64) {
        for _ in 0..ticks {
            for pid in self.replicas.snapshot() {
                self.signal_replica(pid, signal);
                self.try_reap(pid);
            }
            if self.replicas.is_empty() {
                return;
            }
            sleep(STOP_TICK).await;
        }
    }

    async fn escalate_leftovers(&self) {
        for pid in self.replicas.snapshot() {
            tracing::warn!(
                program = %self.name,
                %pid,
                "graceful stop budget exhausted, sending SIGKILL"
            );
            self.signal_replica(pid, Signal::SIGKILL);
            while self.replicas.contains(pid) {
                self.try_reap(pid);
                if self.replicas.contains(pid) {
                    sleep(STOP_TICK).await;
                }
            }
        }
    }

    fn signal_replica(&self, pid: Pid, signal: Signal) {
        match kill(pid, signal) {
            Ok(()) => {}
            Err(Errno::ESRCH) => {
                // Already gone; nothing left to reap under this pid.
                self.replicas.remove(pid);
            }
            Err(errno) => {
                let error = StopError::Kill {
                    pid: pid.as_raw(),
                    errno,
                };
                tracing::warn!(program = %self.name, %error, "kill failed");
            }
        }
    }

    fn try_reap(&self, pid: Pid) {
        match waitpid(pid, Some(WaitPidFlag::WNOHANG)) {
            Ok(status) => {
                if let Some(kind) = ExitKind::from_status(&status) {
                    self.replicas.remove(pid);
                    self.logger
                        .info(&format!("{}: pid {pid} {}", self.name, kind.describe()));
                }
            }
            Err(Errno::ECHILD) => {
                self.replicas.remove(pid);
            }
            Err(errno) => {
                tracing::warn!(program = %self.name, %pid, %errno, "waitpid failed");
            }
        }
    }

    /// Terminate only the most recently spawned replica. Used for
    /// scale-down so older replicas keep running untouched.
    pub async fn stop_instance(&self) {
        let _lifecycle = self.lifecycle.lock().await;
        self.stop_instance_locked().await;
    }

    async fn stop_instance_locked(&self) {
        let _suppress = self.suppress();
        // Removed from the set before signalling so the monitor leaves the
        // pid to this path.
        let Some(pid) = self.replicas.remove_last() else {
            return;
        };
        let (signal, ticks) = {
            let config = self.config.read();
            (config.stop_signal.signal(), config.stop_time)
        };
        self.terminate_detached(pid, signal, ticks).await;
    }

    /// Graceful-then-forced termination of a pid that is no longer in the
    /// replica set.
    async fn terminate_detached(&self, pid: Pid, signal: Signal, ticks: u64) {
        for _ in 0..ticks {
            match kill(pid, signal) {
                Ok(()) | Err(Errno::ESRCH) => {}
                Err(errno) => {
                    let error = StopError::Kill {
                        pid: pid.as_raw(),
                        errno,
                    };
                    tracing::warn!(program = %self.name, %error, "kill failed");
                }
            }
            if self.reap_detached(pid) {
                return;
            }
            sleep(STOP_TICK).await;
        }

        tracing::warn!(
            program = %self.name,
            %pid,
            "graceful stop budget exhausted, sending SIGKILL"
        );
        let _ = kill(pid, Signal::SIGKILL);
        while !self.reap_detached(pid) {
            sleep(STOP_TICK).await;
        }
    }

    /// True once the pid is gone (reaped here, reaped elsewhere, or never
    /// ours to begin with).
    fn reap_detached(&self, pid: Pid) -> bool {
        match waitpid(pid, Some(WaitPidFlag::WNOHANG)) {
            Ok(status) => match ExitKind::from_status(&status) {
                Some(kind) => {
                    self.logger
                        .info(&format!("{}: pid {pid} {}", self.name, kind.describe()));
                    true
                }
                None => false,
            },
            Err(Errno::ECHILD) => true,
            Err(errno) => {
                tracing::warn!(program = %self.name, %pid, %errno, "waitpid failed");
                false
            }
        }
    }

    /// Adjust the replica count in place: grow by spawning the shortfall,
    /// shrink by retiring the newest replicas. Pre-existing replicas are
    /// never restarted.
    pub async fn scale(&self, instances: u32) -> Result<(), StartError> {
        let _lifecycle = self.lifecycle.lock().await;
        let running = self.replicas.count();
        self.config.write().instances = instances;
        let target = instances as usize;

        self.logger.info(&format!(
            "{}: scaling from {running} to {target} instance(s)",
            self.name
        ));

        if running < target {
            self.start_locked().await
        } else {
            for _ in 0..running - target {
                self.stop_instance_locked().await;
            }
            Ok(())
        }
    }

    /// Apply a fresh configuration. An empty diff is a no-op; a diff with
    /// any restart-requiring field stops the program and, when the new
    /// config wants it running, starts it again. A hot-only diff (umask)
    /// touches no replica because the value is read at spawn time.
    pub async fn reload(&self, next: ProgramConfig) -> Result<(), StartError> {
        let _lifecycle = self.lifecycle.lock().await;

        let diff = ConfigDiff::between(&self.config.read(), &next);
        if diff.is_empty() {
            tracing::debug!(program = %self.name, "configuration unchanged");
            return Ok(());
        }

        self.logger
            .info(&format!("{}: configuration changed: {diff}", self.name));

        let restart = diff.requires_restart();
        let auto_start = next.auto_start;
        *self.config.write() = next;

        if restart {
            self.stop_locked().await;
            if auto_start {
                self.start_locked().await?;
            }
        }
        Ok(())
    }

    fn suppress(&self) -> SuppressGuard<'_> {
        self.suppress_autorestart.store(true, Ordering::SeqCst);
        SuppressGuard(&self.suppress_autorestart)
    }
}
