//! In-flight authorization sessions.
//!
//! A session correlates an outbound authorization URL with the provider's
//! inbound callback through its state token. Sessions live only in memory:
//! a coordinator restart invalidates every in-flight attempt, which is an
//! accepted limitation of the single-process design.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use rand::Rng as _;
use tracing::debug;

use calbridge_core::UserId;

/// Length of the random state token, in bytes before base64 encoding.
const STATE_TOKEN_LENGTH: usize = 16;

/// One pending authorization attempt.
#[derive(Debug, Clone)]
pub struct Session {
    /// The one-time state token correlating the callback to this attempt.
    pub state: String,
    /// The user who initiated the attempt.
    pub user: UserId,
    /// When the attempt was created.
    pub created_at: DateTime<Utc>,
    /// The redirect URI the authorization URL was built with. The token
    /// exchange must present the same value.
    pub redirect_uri: String,
}

/// Registry of pending sessions keyed by state token.
///
/// Tokens are single-use: [`take`](SessionRegistry::take) consumes the entry,
/// so a replayed callback never matches twice. Entries older than the TTL are
/// treated as absent.
#[derive(Debug)]
pub struct SessionRegistry {
    ttl: chrono::Duration,
    sessions: Mutex<HashMap<String, Session>>,
}

impl SessionRegistry {
    /// Creates a registry whose sessions expire after `ttl`.
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl: chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::seconds(300)),
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Registers a new session for a user and returns its state token.
    pub fn create(&self, user: UserId, redirect_uri: impl Into<String>) -> String {
        let mut sessions = self.sessions.lock().expect("session registry poisoned");

        let mut state = generate_state_token();
        // A collision over 128 random bits will not happen; the loop exists
        // so the uniqueness invariant holds by construction.
        while sessions.contains_key(&state) {
            state = generate_state_token();
        }

        let session = Session {
            state: state.clone(),
            user,
            created_at: Utc::now(),
            redirect_uri: redirect_uri.into(),
        };
        sessions.insert(state.clone(), session);
        debug!(user = %user, "authorization session registered");
        state
    }

    /// Consumes the session for a state token.
    ///
    /// Unknown, already-consumed and expired tokens all come back as `None`;
    /// an expired entry is dropped on the way out.
    pub fn take(&self, state: &str) -> Option<Session> {
        let mut sessions = self.sessions.lock().expect("session registry poisoned");
        let session = sessions.remove(state)?;
        if self.is_expired(&session) {
            debug!(user = %session.user, "dropping expired authorization session");
            return None;
        }
        Some(session)
    }

    /// Drops every expired session.
    pub fn purge_expired(&self) {
        let mut sessions = self.sessions.lock().expect("session registry poisoned");
        sessions.retain(|_, session| !self.is_expired(session));
    }

    /// Number of live entries, expired ones included until purged.
    pub fn len(&self) -> usize {
        self.sessions.lock().expect("session registry poisoned").len()
    }

    /// Returns true if no sessions are pending.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn is_expired(&self, session: &Session) -> bool {
        Utc::now() - session.created_at > self.ttl
    }

    #[cfg(test)]
    fn insert_raw(&self, session: Session) {
        self.sessions
            .lock()
            .expect("session registry poisoned")
            .insert(session.state.clone(), session);
    }
}

/// Generates an unguessable state token.
fn generate_state_token() -> String {
    let mut rng = rand::rng();
    let bytes: Vec<u8> = (0..STATE_TOKEN_LENGTH).map(|_| rng.random()).collect();
    URL_SAFE_NO_PAD.encode(&bytes)
}
