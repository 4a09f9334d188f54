//! Authorization coordinator for per-user calendar access.
//!
//! This crate grants a single-process backend delegated access to a calendar
//! provider via the OAuth2 authorization-code grant, on behalf of many users
//! at once, and keeps that access usable over time.
//!
//! # Architecture
//!
//! ```text
//!  chat consumer (poll only)          provider
//!        │                               │ redirect
//!        ▼                               ▼
//!  ┌───────────────┐   shared    ┌──────────────────┐
//!  │ Completion    │◄──────────► │ Callback         │
//!  │ Monitor       │   state     │ Listener (HTTP)  │
//!  └───────────────┘             └──────────────────┘
//!        ▲                               │
//!        │      ┌─────────────────┐      │
//!        └──────┤ AuthCoordinator ├──────┘
//!               │  sessions       │
//!               │  outbox         │
//!               │  credential     │
//!               │  store (disk)   │
//!               └─────────────────┘
//! ```
//!
//! The listener task and the consumer's monitors never call each other;
//! the thread-safe credential store and result outbox inside
//! [`AuthCoordinator`] are the only channel between the two.
//!
//! # Example
//!
//! ```ignore
//! use calbridge_auth::{AuthCoordinator, CoordinatorConfig, MonitorOutcome};
//! use calbridge_core::UserId;
//!
//! let coordinator = AuthCoordinator::new(CoordinatorConfig::new("credentials.json"))?;
//! let user = UserId::new(42);
//!
//! let url = coordinator.create_authorization_url(user).await?;
//! // hand `url` to the user, then watch for completion:
//! match coordinator.watch_authorization(user).run().await {
//!     MonitorOutcome::Success { .. } => { /* confirm to the user */ }
//!     MonitorOutcome::Failed { message } => { /* suggest retrying /auth */ }
//!     MonitorOutcome::TimedOut | MonitorOutcome::Cancelled => {}
//! }
//! ```

pub mod calendar;
pub mod config;
mod coordinator;
pub mod credential;
pub mod error;
mod listener;
pub mod monitor;
mod oauth;
mod outbox;
pub mod profile;
mod session;
mod store;
mod timezone;

pub use calendar::{BoxFuture, CalendarSink, CreatedEvent, EventDraft};
pub use config::{ClientConfig, CoordinatorConfig};
pub use coordinator::AuthCoordinator;
pub use credential::{CalendarSummary, Credential, ProfileSnapshot};
pub use error::{AuthError, AuthResult};
pub use listener::CALLBACK_PATH;
pub use monitor::{CompletionMonitor, MonitorOutcome};
pub use oauth::{OAuthClient, TokenGrant};
pub use outbox::AuthorizationOutcome;
pub use session::{Session, SessionRegistry};
pub use store::CredentialStore;
pub use timezone::TimezoneCache;
