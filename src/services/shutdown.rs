use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

/// Cooperative stop signal shared by the worker loops, the reclaimer, the
/// sweeper, and the purge tick. Cloning hands out another handle to the
/// same signal; once a handle requests shutdown, every loop sees it at its
/// next iteration boundary and drains.
#[derive(Clone, Debug, Default)]
pub struct ShutdownToken {
    shared: Arc<Shared>,
}

#[derive(Debug, Default)]
struct Shared {
    stopping: AtomicBool,
    wake: Notify,
}

impl ShutdownToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask every holder of this token to stop.
    pub fn shutdown(&self) {
        self.shared.stopping.store(true, Ordering::SeqCst);
        self.shared.wake.notify_waiters();
    }

    /// Whether shutdown has been requested.
    pub fn is_shutdown(&self) -> bool {
        self.shared.stopping.load(Ordering::SeqCst)
    }

    /// Resolve once shutdown has been requested. Safe to race with
    /// [`shutdown`](Self::shutdown): the flag is re-checked after the
    /// notify registration, since `notify_waiters` stores no permit.
    pub async fn requested(&self) {
        if self.is_shutdown() {
            return;
        }
        let woken = self.shared.wake.notified();
        if self.is_shutdown() {
            return;
        }
        woken.await;
    }

    /// Request shutdown, then await the given task handles up to `grace`.
    /// Returns `false` when the drain timed out and tasks may still be
    /// running; the caller decides whether to force-exit.
    pub async fn drain(&self, handles: Vec<JoinHandle<()>>, grace: Duration) -> bool {
        self.shutdown();
        let join_all = async {
            for handle in handles {
                let _ = handle.await;
            }
        };
        tokio::time::timeout(grace, join_all).await.is_ok()
    }
}
