/// Deferred completions for real-time mode.
///
/// Each armed instance gets a tokio task that sleeps for the instance's span
/// and then posts [`DaemonEvent::TimerExpired`] to the main event loop. The
/// task never touches timer state; the loop applies the expiry under the
/// session lock, and a timer that was reset in the meantime ignores it.
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::event::DaemonEvent;
use crate::policy::EventKind;

/// Identifies the instance a completion was armed for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Expiry {
    pub kind: EventKind,
    pub anchor: Duration,
    /// Reset generation of the owning timer when the instance was armed.
    pub generation: u64,
}

/// Handle to one pending completion. Cancelling aborts the sleeping task.
#[derive(Debug)]
pub struct ScheduledHandle(JoinHandle<()>);

impl ScheduledHandle {
    pub fn cancel(&self) {
        self.0.abort();
    }
}

#[derive(Clone)]
pub struct Scheduler {
    tx: mpsc::Sender<DaemonEvent>,
}

impl Scheduler {
    pub fn new(tx: mpsc::Sender<DaemonEvent>) -> Self {
        Self { tx }
    }

    /// Posts `expiry` after `delay`. Must be called from within the tokio runtime.
    pub fn arm(&self, expiry: Expiry, delay: Duration) -> ScheduledHandle {
        let tx = self.tx.clone();
        ScheduledHandle(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if tx.send(DaemonEvent::TimerExpired(expiry)).await.is_err() {
                tracing::debug!(kind = ?expiry.kind, "event loop gone; expiry dropped");
            }
        }))
    }
}
