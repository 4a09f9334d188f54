//! Interface to the downstream calendar write path.
//!
//! Writing events is an external collaborator: given a valid credential and
//! an event payload it returns a created-event handle or an error. The wire
//! format behind it is deliberately unspecified here; this module only pins
//! the seam the chat front-end programs against.

use std::future::Future;
use std::pin::Pin;

use chrono::{DateTime, Utc};

use calbridge_core::ExtractedEvent;

use crate::credential::Credential;
use crate::error::AuthResult;

/// Boxed future type used for the async trait method.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// An event ready to be written to the user's calendar.
#[derive(Debug, Clone, PartialEq)]
pub struct EventDraft {
    /// Short human-readable summary.
    pub summary: String,
    /// Start of the event.
    pub start: DateTime<Utc>,
    /// End of the event, when one is known.
    pub end: Option<DateTime<Utc>>,
    /// IANA timezone the event should be displayed in.
    pub timezone: Option<String>,
}

impl From<ExtractedEvent> for EventDraft {
    fn from(event: ExtractedEvent) -> Self {
        Self {
            summary: event.summary,
            start: event.start,
            end: event.end,
            timezone: None,
        }
    }
}

/// Handle to an event the provider created.
#[derive(Debug, Clone, PartialEq)]
pub struct CreatedEvent {
    /// Provider-side event id.
    pub id: String,
    /// Link to the event in the provider's UI, when available.
    pub html_link: Option<String>,
}

/// The calendar write path as seen by the rest of the system.
pub trait CalendarSink: Send + Sync {
    /// Creates one event on the user's calendar.
    fn create_event<'a>(
        &'a self,
        credential: &'a Credential,
        draft: &'a EventDraft,
    ) -> BoxFuture<'a, AuthResult<CreatedEvent>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use calbridge_core::EventKind;
    use chrono::TimeZone;

    struct RecordingSink;

    impl CalendarSink for RecordingSink {
        fn create_event<'a>(
            &'a self,
            _credential: &'a Credential,
            draft: &'a EventDraft,
        ) -> BoxFuture<'a, AuthResult<CreatedEvent>> {
            let id = format!("evt-{}", draft.start.timestamp());
            Box::pin(async move {
                Ok(CreatedEvent {
                    id,
                    html_link: None,
                })
            })
        }
    }

    #[tokio::test]
    async fn sink_trait_is_usable_as_an_object() {
        let sink: Box<dyn CalendarSink> = Box::new(RecordingSink);
        let credential = Credential::new("at", None, None, vec![]);
        let draft = EventDraft {
            summary: "standup".to_string(),
            start: Utc.with_ymd_and_hms(2025, 6, 1, 9, 0, 0).unwrap(),
            end: None,
            timezone: Some("Europe/Paris".to_string()),
        };

        let created = sink.create_event(&credential, &draft).await.unwrap();
        assert!(created.id.starts_with("evt-"));
    }

    #[test]
    fn draft_from_extracted_event() {
        let event = ExtractedEvent {
            start: Utc.with_ymd_and_hms(2025, 6, 1, 14, 0, 0).unwrap(),
            summary: "dentist".to_string(),
            kind: EventKind::Meeting,
            end: Some(Utc.with_ymd_and_hms(2025, 6, 1, 15, 0, 0).unwrap()),
        };

        let draft = EventDraft::from(event);
        assert_eq!(draft.summary, "dentist");
        assert!(draft.end.is_some());
        assert!(draft.timezone.is_none());
    }
}
