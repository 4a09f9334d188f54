//! Profile snapshot fetch from the calendar API.
//!
//! After a successful exchange the coordinator grabs a minimal snapshot of
//! the account for user-facing confirmation: the primary calendar plus a
//! small sample of the listing. The snapshot is advisory; a failed fetch
//! never fails the authorization itself.

use std::time::Duration;

use chrono::Utc;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::credential::{CalendarSummary, Credential, ProfileSnapshot};

/// Base URL for the calendar API.
pub const CALENDAR_API_BASE: &str = "https://www.googleapis.com/calendar/v3";

/// How many calendars the listing call asks for.
const LIST_PAGE_SIZE: usize = 10;

/// How many calendars the snapshot keeps as a sample.
const SAMPLE_SIZE: usize = 5;

/// Client for the calendar-list endpoint.
#[derive(Debug)]
pub struct ProfileClient {
    http_client: reqwest::Client,
    base_url: String,
}

impl ProfileClient {
    /// Creates a new profile client.
    pub fn new(timeout: Duration) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("failed to create HTTP client");

        Self {
            http_client,
            base_url: CALENDAR_API_BASE.to_string(),
        }
    }

    /// Overrides the calendar API base URL.
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Fetches a profile snapshot using the given credential.
    ///
    /// Returns `None` when the listing call itself fails. An account with no
    /// primary calendar is not a failure: that snapshot carries
    /// `primary_calendar: None` and an accurate count.
    pub async fn fetch_profile(&self, credential: &Credential) -> Option<ProfileSnapshot> {
        let url = format!(
            "{}/users/me/calendarList?maxResults={}",
            self.base_url, LIST_PAGE_SIZE
        );

        let response = match self
            .http_client
            .get(&url)
            .bearer_auth(&credential.access_token)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                warn!("calendar list request failed: {e}");
                return None;
            }
        };

        let status = response.status();
        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => {
                warn!("failed to read calendar list response: {e}");
                return None;
            }
        };

        if !status.is_success() {
            warn!(%status, "calendar list request rejected");
            return None;
        }

        let listing: CalendarListResponse = match serde_json::from_str(&body) {
            Ok(listing) => listing,
            Err(e) => {
                warn!("invalid calendar list response: {e}");
                return None;
            }
        };

        let snapshot = build_snapshot(listing.items);
        debug!(
            calendars = snapshot.calendar_count,
            has_primary = snapshot.primary_calendar.is_some(),
            "profile snapshot fetched"
        );
        Some(snapshot)
    }
}

fn build_snapshot(items: Vec<CalendarListEntry>) -> ProfileSnapshot {
    let primary_calendar = items
        .iter()
        .find(|entry| entry.primary)
        .map(|entry| CalendarSummary {
            id: entry.id.clone(),
            summary: entry
                .summary
                .clone()
                .unwrap_or_else(|| "Primary Calendar".to_string()),
            timezone: entry.time_zone.clone(),
            access_role: entry.access_role.clone(),
            primary: true,
        });

    let calendar_count = items.len();
    let calendars = items
        .into_iter()
        .take(SAMPLE_SIZE)
        .map(|entry| CalendarSummary {
            id: entry.id,
            summary: entry.summary.unwrap_or_default(),
            timezone: entry.time_zone,
            access_role: entry.access_role,
            primary: entry.primary,
        })
        .collect();

    ProfileSnapshot {
        primary_calendar,
        calendar_count,
        calendars,
        fetched_at: Utc::now(),
    }
}

/// Calendar list response from the provider.
#[derive(Debug, Deserialize)]
struct CalendarListResponse {
    #[serde(default)]
    items: Vec<CalendarListEntry>,
}

#[derive(Debug, Deserialize)]
struct CalendarListEntry {
    id: String,
    #[serde(default)]
    summary: Option<String>,
    #[serde(rename = "timeZone", default)]
    time_zone: Option<String>,
    #[serde(rename = "accessRole", default)]
    access_role: Option<String>,
    #[serde(default)]
    primary: bool,
}
