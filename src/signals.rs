//! OS signal routing. Listener tasks only flip atomic flags and ping the
//! shell; all reaction logic runs on the shell task between commands.

use std::io;
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::Notify;

#[derive(Debug, Clone, Copy)]
enum Intent {
    Reload,
    Shutdown,
}

#[derive(Debug, Clone)]
pub struct SignalRouter {
    inner: Arc<RouterInner>,
}

#[derive(Debug)]
struct RouterInner {
    reload: AtomicBool,
    shutdown: AtomicBool,
    notify: Notify,
}

impl SignalRouter {
    /// SIGHUP asks for a config reload; SIGINT, SIGTERM and SIGQUIT ask for
    /// an orderly shutdown.
    pub fn install() -> io::Result<Self> {
        let router = Self {
            inner: Arc::new(RouterInner {
                reload: AtomicBool::new(false),
                shutdown: AtomicBool::new(false),
                notify: Notify::new(),
            }),
        };
        router.listen(SignalKind::hangup(), Intent::Reload)?;
        router.listen(SignalKind::interrupt(), Intent::Shutdown)?;
        router.listen(SignalKind::terminate(), Intent::Shutdown)?;
        router.listen(SignalKind::quit(), Intent::Shutdown)?;
        Ok(router)
    }

    fn listen(&self, kind: SignalKind, intent: Intent) -> io::Result<()> {
        let mut stream = signal(kind)?;
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            while stream.recv().await.is_some() {
                match intent {
                    Intent::Reload => inner.reload.store(true, Ordering::SeqCst),
                    Intent::Shutdown => inner.shutdown.store(true, Ordering::SeqCst),
                }
                inner.notify.notify_one();
            }
        });
        Ok(())
    }

    /// Consume a pending reload request.
    pub fn take_reload(&self) -> bool {
        self.inner.reload.swap(false, Ordering::SeqCst)
    }

    pub fn shutdown_requested(&self) -> bool {
        self.inner.shutdown.load(Ordering::SeqCst)
    }

    /// Resolves when a signal arrived since the last check. `notify_one`
    /// stores a permit, so a signal delivered while the shell is busy is
    /// not lost.
    pub async fn changed(&self) {
        self.inner.notify.notified().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::sys::signal::{Signal, raise};
    use std::time::Duration;
    use tokio::time::sleep;

    async fn flag_set(check: impl Fn() -> bool) -> bool {
        for _ in 0..50 {
            if check() {
                return true;
            }
            sleep(Duration::from_millis(20)).await;
        }
        false
    }

    // One test covers both intents: handlers are process-global, so two
    // parallel tests raising signals would observe each other.
    #[tokio::test]
    async fn signals_route_to_the_matching_flags() {
        let router = SignalRouter::install().expect("install");
        assert!(!router.take_reload());
        assert!(!router.shutdown_requested());

        raise(Signal::SIGHUP).expect("raise SIGHUP");
        assert!(flag_set(|| router.take_reload()).await);
        // Consumed: the flag reads false until the next signal.
        assert!(!router.take_reload());
        assert!(!router.shutdown_requested());

        raise(Signal::SIGTERM).expect("raise SIGTERM");
        assert!(flag_set(|| router.shutdown_requested()).await);
    }
}
