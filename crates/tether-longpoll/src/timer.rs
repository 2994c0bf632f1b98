//! Single-shot idle countdown.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::AbortHandle;

static NEXT_TIMER_ID: AtomicU64 = AtomicU64::new(1);

/// An armed idle timer.
///
/// The countdown runs as a task on the current tokio runtime. Dropping the
/// value cancels it, so a timer stored inside a session state cannot outlive
/// that state. A firing that loses a race against cancellation is detected by
/// comparing [`IdleTimer::id`] with the id handed to the callback.
#[derive(Debug)]
pub struct IdleTimer {
    id: u64,
    task: Option<AbortHandle>,
}

impl IdleTimer {
    /// Arms a timer that calls `on_fire` with its id after `timeout`.
    ///
    /// Returns `None` when called outside a tokio runtime.
    pub fn arm<F>(timeout: Duration, on_fire: F) -> Option<Self>
    where
        F: FnOnce(u64) + Send + 'static,
    {
        let handle = Handle::try_current().ok()?;
        let id = NEXT_TIMER_ID.fetch_add(1, Ordering::Relaxed);
        let task = handle.spawn(async move {
            tokio::time::sleep(timeout).await;
            on_fire(id);
        });
        tracing::trace!(timer_id = id, ?timeout, "idle timer armed");
        Some(Self {
            id,
            task: Some(task.abort_handle()),
        })
    }

    /// Identifier passed to the firing callback.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Consumes a timer whose callback is currently running, without aborting it.
    pub(crate) fn into_fired(mut self) {
        self.task = None;
    }
}

impl Drop for IdleTimer {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            tracing::trace!(timer_id = self.id, "idle timer cancelled");
        }
    }
}
