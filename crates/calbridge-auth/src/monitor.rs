//! Per-attempt completion monitor.
//!
//! The consumer cannot accept inbound connections, so it learns about a
//! finished authorization by polling. One monitor is created per attempt,
//! right after the authorization URL; it checks the credential store and the
//! result outbox at a fixed interval and resolves to exactly one terminal
//! outcome. The poll interval boundary is the only point where it suspends.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use calbridge_core::UserId;

use crate::coordinator::CoordinatorInner;
use crate::credential::ProfileSnapshot;

/// Terminal state of one authorization attempt, as seen by the monitor.
#[derive(Debug)]
pub enum MonitorOutcome {
    /// The user is authorized. Carries the profile snapshot when one was
    /// captured.
    Success { profile: Option<ProfileSnapshot> },
    /// The attempt completed with a failure.
    Failed { message: String },
    /// No completion was observed within the deadline.
    TimedOut,
    /// A newer attempt for the same user superseded this one. The monitor
    /// stops silently.
    Cancelled,
}

/// Watches one authorization attempt until it reaches a terminal state.
pub struct CompletionMonitor {
    inner: Arc<CoordinatorInner>,
    user: UserId,
    generation: u64,
    poll_interval: Duration,
    deadline: Duration,
}

impl CompletionMonitor {
    pub(crate) fn new(
        inner: Arc<CoordinatorInner>,
        user: UserId,
        generation: u64,
        poll_interval: Duration,
        deadline: Duration,
    ) -> Self {
        Self {
            inner,
            user,
            generation,
            poll_interval,
            deadline,
        }
    }

    /// The user this monitor belongs to.
    pub fn user(&self) -> UserId {
        self.user
    }

    /// Polls until the attempt succeeds, fails, times out or is cancelled.
    ///
    /// Checks on every tick, in order: cancellation, the credential store,
    /// the result outbox (consuming the entry), then the overall deadline.
    /// Never errors.
    pub async fn run(self) -> MonitorOutcome {
        debug!(user = %self.user, "authorization monitor started");
        let started = tokio::time::Instant::now();

        loop {
            tokio::time::sleep(self.poll_interval).await;

            if !self.inner.monitor_active(self.user, self.generation) {
                debug!(user = %self.user, "authorization monitor cancelled");
                return MonitorOutcome::Cancelled;
            }

            if self.inner.authorized_now(self.user).await {
                self.inner.clear_monitor(self.user, self.generation);
                info!(user = %self.user, "authorization observed");
                return MonitorOutcome::Success {
                    profile: self.inner.store.load_profile(self.user),
                };
            }

            if let Some(outcome) = self.inner.outbox.take(self.user) {
                self.inner.clear_monitor(self.user, self.generation);
                return if outcome.success {
                    MonitorOutcome::Success {
                        profile: outcome.profile,
                    }
                } else {
                    MonitorOutcome::Failed {
                        message: outcome
                            .message
                            .unwrap_or_else(|| "authorization failed".to_string()),
                    }
                };
            }

            if started.elapsed() >= self.deadline {
                self.inner.clear_monitor(self.user, self.generation);
                info!(user = %self.user, "authorization attempt timed out");
                return MonitorOutcome::TimedOut;
            }
        }
    }
}
