//! The authorization coordinator.
//!
//! One `AuthCoordinator` instance owns every piece of per-process
//! authorization state: the credential store, the pending-session registry,
//! the result outbox, the timezone cache and the callback listener handle.
//! The listener task and the completion monitors hold an `Arc` to the same
//! inner state, which is the only channel between the blocking HTTP side and
//! the cooperatively scheduled consumer side.
//!
//! The chat front-end talks to the coordinator exclusively through the
//! consumer-facing operations: [`is_authorized`](AuthCoordinator::is_authorized),
//! [`create_authorization_url`](AuthCoordinator::create_authorization_url),
//! [`check_authorization_result`](AuthCoordinator::check_authorization_result),
//! [`revoke`](AuthCoordinator::revoke) and
//! [`user_info`](AuthCoordinator::user_info).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{debug, info, warn};

use calbridge_core::UserId;

use crate::config::{ClientConfig, CoordinatorConfig};
use crate::credential::{Credential, ProfileSnapshot};
use crate::error::{AuthError, AuthResult};
use crate::listener::{CallbackListener, CallbackPage, CallbackParams};
use crate::monitor::CompletionMonitor;
use crate::oauth::OAuthClient;
use crate::outbox::{AuthorizationOutcome, ResultOutbox};
use crate::profile::ProfileClient;
use crate::session::{Session, SessionRegistry};
use crate::store::CredentialStore;
use crate::timezone::TimezoneCache;

/// How long shutdown waits for in-flight callback requests to drain.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Shared coordinator state, injected into the listener task and monitors.
pub(crate) struct CoordinatorInner {
    pub(crate) config: CoordinatorConfig,
    pub(crate) store: CredentialStore,
    pub(crate) sessions: SessionRegistry,
    pub(crate) outbox: ResultOutbox,
    pub(crate) timezones: TimezoneCache,
    profile_client: ProfileClient,
    /// Provider client, created lazily from the secrets file on first use.
    oauth: Mutex<Option<Arc<OAuthClient>>>,
    /// The callback listener, started by the first authorization attempt and
    /// owned for the coordinator's lifetime.
    listener: tokio::sync::Mutex<Option<CallbackListener>>,
    /// Monitor registration per user: only the monitor holding the current
    /// generation is still live, so a new attempt cancels the previous one.
    monitors: Mutex<HashMap<UserId, u64>>,
    next_generation: AtomicU64,
}

impl CoordinatorInner {
    /// Returns the provider OAuth client, loading the client secrets on
    /// first use.
    pub(crate) fn oauth(&self) -> AuthResult<Arc<OAuthClient>> {
        let mut guard = self.oauth.lock().expect("oauth client slot poisoned");
        if let Some(client) = guard.as_ref() {
            return Ok(Arc::clone(client));
        }

        let client_config = ClientConfig::from_file(&self.config.client_secrets_path)?;
        client_config.validate()?;

        let client = Arc::new(
            OAuthClient::new(client_config, self.config.http_timeout).with_endpoints(
                self.config.auth_endpoint.clone(),
                self.config.token_endpoint.clone(),
            ),
        );
        *guard = Some(Arc::clone(&client));
        Ok(client)
    }

    /// Whether the user currently holds a usable credential, refreshing
    /// lazily when possible.
    pub(crate) async fn authorized_now(&self, user: UserId) -> bool {
        let oauth = self.oauth().ok();
        self.store.is_authorized(user, oauth.as_deref()).await
    }

    /// Dispatches one parsed callback to the right page, mutating sessions,
    /// store and outbox on the way. Every failure is translated here; nothing
    /// propagates out to the listener task.
    pub(crate) async fn process_callback(&self, params: CallbackParams) -> CallbackPage {
        if let Some(error) = &params.error {
            let denial = AuthError::provider_denied(error.clone(), params.error_description);
            if let Some(state) = &params.state
                && let Some(session) = self.sessions.take(state)
            {
                warn!(user = %session.user, error = %error, "provider returned an error");
                self.outbox
                    .push(AuthorizationOutcome::failure(session.user, denial.user_message()));
            }
            return CallbackPage::Error(denial.user_message());
        }

        let (Some(state), Some(code)) = (&params.state, &params.code) else {
            return CallbackPage::Error("Missing required parameters (state or code)".to_string());
        };

        match self.complete_authorization(state, code).await {
            Ok(user) => CallbackPage::Success(user),
            Err(e) => CallbackPage::Error(e.user_message()),
        }
    }

    /// Consumes the session for `state` and runs the code-for-token
    /// exchange. The session is gone before this returns, so a replayed
    /// callback resolves to [`AuthError::UnknownOrExpiredSession`].
    pub(crate) async fn complete_authorization(
        &self,
        state: &str,
        code: &str,
    ) -> AuthResult<UserId> {
        let Some(session) = self.sessions.take(state) else {
            warn!("callback carried an unknown or expired state token");
            return Err(AuthError::UnknownOrExpiredSession);
        };

        let user = session.user;
        info!(user = %user, "processing authorization callback");

        match self.run_exchange(&session, code).await {
            Ok(profile) => {
                self.outbox
                    .push(AuthorizationOutcome::success(user, profile));
                info!(user = %user, "authorization completed");
                Ok(user)
            }
            Err(e) => {
                self.outbox
                    .push(AuthorizationOutcome::failure(user, e.user_message()));
                warn!(user = %user, "authorization failed: {e}");
                Err(e)
            }
        }
    }

    async fn run_exchange(
        &self,
        session: &Session,
        code: &str,
    ) -> AuthResult<Option<ProfileSnapshot>> {
        let oauth = self.oauth()?;
        let grant = oauth.exchange_code(code, &session.redirect_uri).await?;

        let scopes = if grant.scopes.is_empty() {
            self.config.scopes.clone()
        } else {
            grant.scopes
        };
        let credential = Credential::new(
            grant.access_token,
            grant.refresh_token,
            grant.expires_in,
            scopes,
        );
        self.store.save(session.user, &credential)?;

        let profile = self.profile_client.fetch_profile(&credential).await;
        match &profile {
            Some(snapshot) => {
                if let Err(e) = self.store.save_profile(session.user, snapshot) {
                    warn!(user = %session.user, "failed to persist profile snapshot: {e}");
                }
            }
            None => warn!(user = %session.user, "authorization succeeded without a profile snapshot"),
        }

        Ok(profile)
    }

    /// Registers a new monitor generation for a user, superseding any
    /// previous one.
    pub(crate) fn register_monitor(&self, user: UserId) -> u64 {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed) + 1;
        self.monitors
            .lock()
            .expect("monitor registry poisoned")
            .insert(user, generation);
        generation
    }

    /// True while `generation` is still the user's current registration.
    pub(crate) fn monitor_active(&self, user: UserId, generation: u64) -> bool {
        self.monitors
            .lock()
            .expect("monitor registry poisoned")
            .get(&user)
            == Some(&generation)
    }

    /// Drops the user's registration regardless of generation.
    pub(crate) fn cancel_monitor(&self, user: UserId) {
        if self
            .monitors
            .lock()
            .expect("monitor registry poisoned")
            .remove(&user)
            .is_some()
        {
            debug!(user = %user, "cancelled previous authorization monitor");
        }
    }

    /// Drops the registration only if `generation` still owns it, so a
    /// terminating monitor never clobbers a newer attempt.
    pub(crate) fn clear_monitor(&self, user: UserId, generation: u64) {
        let mut monitors = self.monitors.lock().expect("monitor registry poisoned");
        if monitors.get(&user) == Some(&generation) {
            monitors.remove(&user);
        }
    }
}

/// The authorization coordinator.
///
/// Cheap to clone; clones share the same state.
#[derive(Clone)]
pub struct AuthCoordinator {
    inner: Arc<CoordinatorInner>,
}

impl AuthCoordinator {
    /// Creates a coordinator, opening the credential store.
    pub fn new(config: CoordinatorConfig) -> AuthResult<Self> {
        config.validate()?;

        let store = CredentialStore::open(&config.storage_dir)?;
        let profile_client =
            ProfileClient::new(config.http_timeout).with_base_url(config.calendar_api_base.clone());
        let sessions = SessionRegistry::new(config.auth_timeout);
        let timezones = TimezoneCache::new(config.default_timezone.clone());

        Ok(Self {
            inner: Arc::new(CoordinatorInner {
                config,
                store,
                sessions,
                outbox: ResultOutbox::new(),
                timezones,
                profile_client,
                oauth: Mutex::new(None),
                listener: tokio::sync::Mutex::new(None),
                monitors: Mutex::new(HashMap::new()),
                next_generation: AtomicU64::new(0),
            }),
        })
    }

    /// Starts a new authorization attempt for a user and returns the
    /// provider authorization URL to hand them.
    ///
    /// Side effects, in order: the callback listener is started on first
    /// use, any previous monitor for the user is cancelled, a stale pending
    /// outcome is cleared, expired sessions are purged, and a fresh session
    /// is registered. The session is visible to the listener before this
    /// returns.
    ///
    /// # Errors
    ///
    /// [`AuthError::ListenerUnavailable`] when no port can be bound and
    /// [`AuthError::MissingClientConfig`] when the secrets file is unusable.
    pub async fn create_authorization_url(&self, user: UserId) -> AuthResult<String> {
        let redirect_uri = self.ensure_listener().await?;
        let oauth = self.inner.oauth()?;

        self.inner.cancel_monitor(user);
        self.inner.outbox.clear(user);
        self.inner.sessions.purge_expired();

        let state = self.inner.sessions.create(user, redirect_uri.clone());
        let url = oauth.authorization_url(&redirect_uri, &self.inner.config.scopes, &state);

        info!(user = %user, "authorization url created");
        Ok(url)
    }

    /// Creates the completion monitor for the attempt just started with
    /// [`create_authorization_url`](Self::create_authorization_url).
    ///
    /// The caller drives it: `monitor.run().await` resolves to a terminal
    /// [`MonitorOutcome`](crate::monitor::MonitorOutcome).
    pub fn watch_authorization(&self, user: UserId) -> CompletionMonitor {
        let generation = self.inner.register_monitor(user);
        CompletionMonitor::new(
            Arc::clone(&self.inner),
            user,
            generation,
            self.inner.config.poll_interval,
            self.inner.config.auth_timeout,
        )
    }

    /// Whether the user currently holds a usable credential. Never errors;
    /// refresh failures and corrupt records read as "not authorized".
    pub async fn is_authorized(&self, user: UserId) -> bool {
        self.inner.authorized_now(user).await
    }

    /// Returns a usable credential for downstream calendar calls, refreshing
    /// lazily when needed.
    pub async fn credential(&self, user: UserId) -> Option<Credential> {
        let oauth = self.inner.oauth().ok();
        self.inner.store.credential(user, oauth.as_deref()).await
    }

    /// Removes and returns the outcome of the most recent completed attempt.
    /// Single-consume: the second call after one completion returns `None`.
    pub fn check_authorization_result(&self, user: UserId) -> Option<AuthorizationOutcome> {
        self.inner.outbox.take(user)
    }

    /// Revokes a user's authorization: deletes the credential and profile
    /// records and drops all in-flight state for the user.
    ///
    /// Returns the number of record files removed; revoking a user who was
    /// never authorized returns zero without error.
    pub fn revoke(&self, user: UserId) -> usize {
        self.inner.cancel_monitor(user);
        self.inner.outbox.clear(user);
        self.inner.timezones.clear(user);
        self.inner.store.revoke(user)
    }

    /// Returns the persisted profile snapshot for a user. Advisory data:
    /// it may be stale.
    pub fn user_info(&self, user: UserId) -> Option<ProfileSnapshot> {
        self.inner.store.load_profile(user)
    }

    /// Returns the user's timezone: cached value, else the primary
    /// calendar's from the profile snapshot, else the configured default.
    pub fn user_timezone(&self, user: UserId) -> String {
        if let Some(timezone) = self.inner.timezones.get(user) {
            return timezone;
        }

        if let Some(timezone) = self
            .inner
            .store
            .load_profile(user)
            .and_then(|profile| profile.primary_calendar)
            .and_then(|calendar| calendar.timezone)
        {
            self.inner.timezones.set(user, timezone.clone());
            return timezone;
        }

        self.inner.timezones.default_timezone().to_string()
    }

    /// The port the callback listener is bound to, once started.
    pub async fn callback_port(&self) -> Option<u16> {
        self.inner
            .listener
            .lock()
            .await
            .as_ref()
            .map(CallbackListener::port)
    }

    /// Stops the callback listener gracefully: no new connections, in-flight
    /// requests drained, bounded wait.
    pub async fn shutdown(&self) {
        let listener = self.inner.listener.lock().await.take();
        if let Some(listener) = listener {
            listener.stop(SHUTDOWN_GRACE).await;
        }
    }

    async fn ensure_listener(&self) -> AuthResult<String> {
        let mut guard = self.inner.listener.lock().await;
        if let Some(listener) = guard.as_ref() {
            return Ok(listener.redirect_uri());
        }

        let listener =
            CallbackListener::start(Arc::clone(&self.inner), self.inner.config.port_range).await?;
        let redirect_uri = listener.redirect_uri();
        *guard = Some(listener);
        Ok(redirect_uri)
    }
}
