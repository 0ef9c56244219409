//! Bounded fixed-interval readiness polling.

use std::time::Duration;

use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::handle::Probe;

/// What happens when a resource never reports ready.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeoutAction {
    /// Tear the session down and report a readiness timeout.
    Fail,
    /// Keep the session and report success with a warning.
    Warn,
}

/// How often and how long to probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadinessPolicy {
    pub interval: Duration,
    pub attempts: u32,
    pub on_timeout: TimeoutAction,
}

impl Default for ReadinessPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(500),
            attempts: 30,
            on_timeout: TimeoutAction::Warn,
        }
    }
}

impl ReadinessPolicy {
    /// Upper bound on the time spent polling.
    pub fn window(&self) -> Duration {
        self.interval * self.attempts.saturating_sub(1)
    }
}

/// Outcome of [`poll_until_ready`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    Ready { attempts: u32 },
    TimedOut { attempts: u32 },
    Failed(String),
}

/// Probe `state` until it is ready, fails, or the attempts run out.
///
/// The first probe runs immediately; later ones are spaced by the policy
/// interval. At least one probe always runs.
pub async fn poll_until_ready<S, F>(policy: &ReadinessPolicy, state: &mut S, mut probe: F) -> Readiness
where
    S: ?Sized,
    F: for<'a> FnMut(&'a mut S) -> BoxFuture<'a, Probe>,
{
    let attempts = policy.attempts.max(1);
    for attempt in 1..=attempts {
        match probe(state).await {
            Probe::Ready => return Readiness::Ready { attempts: attempt },
            Probe::Failed(reason) => return Readiness::Failed(reason),
            Probe::Pending => {
                trace!(attempt, attempts, "not ready yet");
                if attempt < attempts {
                    tokio::time::sleep(policy.interval).await;
                }
            }
        }
    }
    Readiness::TimedOut { attempts }
}
