//! Cancellable one-shot timer.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;

/// Runs an action after a delay unless cancelled first.
///
/// Scheduling again replaces the pending action. Dropping the value
/// cancels it.
#[derive(Debug, Default)]
pub struct DeferredAction {
    task: Option<JoinHandle<()>>,
}

impl DeferredAction {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `action` after `delay`.
    pub fn schedule<F>(&mut self, delay: Duration, action: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.cancel();
        self.task = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            action.await;
        }));
    }

    /// Cancel the pending action. Returns true if one was pending.
    pub fn cancel(&mut self) -> bool {
        match self.task.take() {
            Some(task) if !task.is_finished() => {
                task.abort();
                true
            }
            _ => false,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }
}

impl Drop for DeferredAction {
    fn drop(&mut self) {
        self.cancel();
    }
}
