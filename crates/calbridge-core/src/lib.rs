//! Core types: user identity, collaborator interfaces, tracing

pub mod extract;
pub mod tracing;
pub mod user;

pub use extract::{EventExtractor, EventKind, ExtractedEvent};
pub use tracing::{TracingConfig, TracingError, TracingOutputFormat, init_tracing};
pub use user::UserId;
