//! Per-user credential and profile snapshot records.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Safety margin subtracted from the provider's expiry so tokens are
/// refreshed shortly before they actually lapse.
const EXPIRY_BUFFER_SECS: i64 = 60;

/// A user's delegated credential for the calendar provider.
///
/// Owned exclusively by the credential store: created on the first successful
/// exchange, mutated in place on refresh, deleted on revocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credential {
    /// The access token for API requests.
    pub access_token: String,

    /// The refresh token for unattended renewal. Absent when the provider
    /// did not grant offline access.
    pub refresh_token: Option<String>,

    /// When the access token expires.
    pub expires_at: Option<DateTime<Utc>>,

    /// The scopes that were granted.
    pub scopes: Vec<String>,

    /// When the credential was obtained or last refreshed.
    pub obtained_at: DateTime<Utc>,
}

impl Credential {
    /// Creates a credential from a token grant.
    pub fn new(
        access_token: impl Into<String>,
        refresh_token: Option<String>,
        expires_in_secs: Option<i64>,
        scopes: Vec<String>,
    ) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token,
            expires_at: expires_in_secs.map(expiry_from_now),
            scopes,
            obtained_at: Utc::now(),
        }
    }

    /// Returns true if the access token is expired or about to expire.
    ///
    /// Tokens without a recorded expiry are assumed valid.
    pub fn is_expired(&self) -> bool {
        match self.expires_at {
            Some(expires_at) => Utc::now() >= expires_at,
            None => false,
        }
    }

    /// Returns true if this credential can still produce a valid access
    /// token: either it is unexpired, or a refresh token exists.
    ///
    /// An expired credential with no refresh token is unusable and is treated
    /// as absent everywhere.
    pub fn is_usable(&self) -> bool {
        !self.is_expired() || self.refresh_token.is_some()
    }

    /// Applies a refresh: new access token and expiry, refresh token
    /// preserved unless the provider rotated it.
    pub fn apply_refresh(
        &mut self,
        access_token: impl Into<String>,
        expires_in_secs: Option<i64>,
        rotated_refresh_token: Option<String>,
    ) {
        self.access_token = access_token.into();
        self.expires_at = expires_in_secs.map(expiry_from_now);
        if let Some(rotated) = rotated_refresh_token {
            self.refresh_token = Some(rotated);
        }
        self.obtained_at = Utc::now();
    }
}

fn expiry_from_now(expires_in_secs: i64) -> DateTime<Utc> {
    Utc::now() + Duration::seconds(expires_in_secs) - Duration::seconds(EXPIRY_BUFFER_SECS)
}

/// One calendar as listed by the provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalendarSummary {
    /// Provider-side calendar id.
    pub id: String,
    /// Display name.
    pub summary: String,
    /// IANA timezone of the calendar, when the provider reports one.
    pub timezone: Option<String>,
    /// The caller's access role on this calendar.
    pub access_role: Option<String>,
    /// Whether the provider flags this calendar as the account's primary.
    pub primary: bool,
}

/// Derived, non-authoritative profile data persisted alongside a credential
/// for user-facing display.
///
/// Regenerated on every successful exchange; it may go stale between
/// refreshes, so consumers treat it as advisory only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileSnapshot {
    /// The account's primary calendar, if one was found in the listing.
    pub primary_calendar: Option<CalendarSummary>,
    /// Number of calendars in the listing.
    pub calendar_count: usize,
    /// Sample of the listing, capped at the first few entries.
    pub calendars: Vec<CalendarSummary>,
    /// When this snapshot was fetched.
    pub fetched_at: DateTime<Utc>,
}
