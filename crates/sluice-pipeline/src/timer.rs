use std::future::Future;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::sleep;

/// A cancellable one-shot deferred job.
///
/// The job runs on its own task after `delay`. Cancellation (explicit
/// [`cancel`](Timer::cancel) or dropping the handle) only takes effect while
/// the timer is still sleeping: once the delay has elapsed and the job has
/// begun executing, a concurrent cancel is a no-op — there is nothing left
/// to cancel. Callers relying on that guarantee (the coalescer does) must
/// guard against the already-fired case themselves.
pub struct Timer {
    cancel: oneshot::Sender<()>,
}

impl Timer {
    /// Schedule `job` to run once after `delay`.
    pub fn once<F>(delay: Duration, job: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let (cancel, cancelled) = oneshot::channel::<()>();
        tokio::spawn(async move {
            tokio::select! {
                _ = sleep(delay) => job.await,
                // Fires on explicit cancel and on handle drop alike.
                _ = cancelled => {}
            }
        });
        Self { cancel }
    }

    /// Cancel the pending job. No-op if the job already started.
    pub fn cancel(self) {
        let _ = self.cancel.send(());
    }
}
