//! Interface to the natural-language event extraction engine.
//!
//! Extraction itself is an external collaborator: calbridge only consumes it
//! as a black box that turns free text plus a timezone into a list of event
//! candidates. This module pins down that contract so the chat front-end and
//! the coordinator agree on the seam without depending on any particular
//! engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What kind of calendar entry an extracted candidate represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// A meeting or appointment with a fixed start time.
    Meeting,
    /// A reminder with no meaningful duration.
    Reminder,
    /// An all-day or multi-day entry.
    AllDay,
}

/// One event candidate extracted from user text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedEvent {
    /// Start of the event, already resolved to an absolute instant using the
    /// user's timezone.
    pub start: DateTime<Utc>,
    /// Short human-readable summary.
    pub summary: String,
    /// The kind of entry the engine believes this is.
    pub kind: EventKind,
    /// End of the event, when the engine could determine one.
    pub end: Option<DateTime<Utc>>,
}

/// The extraction engine as seen by the rest of the system.
///
/// `timezone` is an IANA timezone name (e.g. `Europe/Paris`) used to resolve
/// relative expressions in `text`. Implementations return an empty list when
/// no events could be extracted; they do not error.
pub trait EventExtractor {
    /// Extracts event candidates from free-form user text.
    fn extract(&self, text: &str, timezone: &str) -> Vec<ExtractedEvent>;
}
