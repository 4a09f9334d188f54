//! Completed-attempt outcomes awaiting pickup by the consumer.
//!
//! The callback listener finishes an authorization on its own task; the
//! chat-facing consumer polls. The outbox is the thread-safe mailbox between
//! the two: at most one pending outcome per user, consumed exactly once.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use tracing::debug;

use calbridge_core::UserId;

use crate::credential::ProfileSnapshot;

/// Outcome of the most recent completed authorization attempt for a user.
#[derive(Debug, Clone)]
pub struct AuthorizationOutcome {
    /// The user the attempt belonged to.
    pub user: UserId,
    /// Whether the exchange succeeded.
    pub success: bool,
    /// When the attempt completed.
    pub timestamp: DateTime<Utc>,
    /// Profile snapshot captured on success, when the fetch worked.
    pub profile: Option<ProfileSnapshot>,
    /// Human-readable failure message on failure.
    pub message: Option<String>,
}

impl AuthorizationOutcome {
    /// Builds a success outcome.
    pub fn success(user: UserId, profile: Option<ProfileSnapshot>) -> Self {
        Self {
            user,
            success: true,
            timestamp: Utc::now(),
            profile,
            message: None,
        }
    }

    /// Builds a failure outcome with a user-facing message.
    pub fn failure(user: UserId, message: impl Into<String>) -> Self {
        Self {
            user,
            success: false,
            timestamp: Utc::now(),
            profile: None,
            message: Some(message.into()),
        }
    }
}

/// Mailbox of pending outcomes, one slot per user.
#[derive(Debug, Default)]
pub struct ResultOutbox {
    pending: Mutex<HashMap<UserId, AuthorizationOutcome>>,
}

impl ResultOutbox {
    /// Creates an empty outbox.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores an outcome, superseding any stale one for the same user.
    pub fn push(&self, outcome: AuthorizationOutcome) {
        let mut pending = self.pending.lock().expect("result outbox poisoned");
        if pending.insert(outcome.user, outcome).is_some() {
            debug!("superseded stale authorization outcome");
        }
    }

    /// Removes and returns the pending outcome for a user, if any.
    ///
    /// Single-consume: a second call for the same completed attempt returns
    /// `None`.
    pub fn take(&self, user: UserId) -> Option<AuthorizationOutcome> {
        self.pending
            .lock()
            .expect("result outbox poisoned")
            .remove(&user)
    }

    /// Drops any pending outcome for a user without consuming it.
    pub fn clear(&self, user: UserId) {
        self.pending
            .lock()
            .expect("result outbox poisoned")
            .remove(&user);
    }
}
