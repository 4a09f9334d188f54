//! End-to-end tests of the authorization coordinator: real loopback
//! listener, stubbed provider endpoints.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use calbridge_auth::{AuthCoordinator, AuthError, CoordinatorConfig, MonitorOutcome};
use calbridge_core::UserId;

fn write_secrets(dir: &Path) -> PathBuf {
    let secrets = dir.join("credentials.json");
    std::fs::write(
        &secrets,
        r#"{"web": {"client_id": "it.apps.googleusercontent.com", "client_secret": "it-secret"}}"#,
    )
    .unwrap();
    secrets
}

fn config_for(dir: &Path, provider: &MockServer) -> CoordinatorConfig {
    CoordinatorConfig::new(write_secrets(dir))
        .with_storage_dir(dir.join("users"))
        .with_port_range(0, 0)
        .with_provider_endpoints(
            format!("{}/auth", provider.uri()),
            format!("{}/token", provider.uri()),
        )
        .with_calendar_api_base(provider.uri())
}

async fn mount_token_success(provider: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("grant_type=authorization_code"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"{
                "access_token": "issued-access-token",
                "refresh_token": "issued-refresh-token",
                "expires_in": 3600,
                "scope": "https://www.googleapis.com/auth/calendar"
            }"#,
        ))
        .mount(provider)
        .await;
}

async fn mount_calendar_list(provider: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/users/me/calendarList"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"{
                "items": [
                    {"id": "primary-id", "summary": "Work", "timeZone": "Asia/Almaty",
                     "accessRole": "owner", "primary": true},
                    {"id": "team", "summary": "Team", "timeZone": "UTC"}
                ]
            }"#,
        ))
        .mount(provider)
        .await;
}

fn state_from(auth_url: &str) -> String {
    url::Url::parse(auth_url)
        .unwrap()
        .query_pairs()
        .find(|(key, _)| key == "state")
        .map(|(_, value)| value.into_owned())
        .expect("authorization url carries a state token")
}

async fn http_get(port: u16, target: &str) -> String {
    let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    stream
        .write_all(
            format!("GET {target} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
                .as_bytes(),
        )
        .await
        .unwrap();

    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();
    response
}

#[tokio::test]
async fn end_to_end_success_flow() {
    let dir = tempfile::tempdir().unwrap();
    let provider = MockServer::start().await;
    mount_token_success(&provider).await;
    mount_calendar_list(&provider).await;

    let coordinator = AuthCoordinator::new(config_for(dir.path(), &provider)).unwrap();
    let user = UserId::new(100);

    assert!(!coordinator.is_authorized(user).await);

    let auth_url = coordinator.create_authorization_url(user).await.unwrap();
    assert!(auth_url.contains("access_type=offline"));
    assert!(auth_url.contains("include_granted_scopes=true"));
    assert!(auth_url.contains("prompt=consent"));

    let state = state_from(&auth_url);
    let port = coordinator.callback_port().await.unwrap();

    let response = http_get(port, &format!("/oauth2callback?state={state}&code=split-code")).await;
    assert!(response.starts_with("HTTP/1.1 200 OK"));
    assert!(response.contains("Cache-Control: no-cache, no-store, must-revalidate"));
    assert!(response.contains("Authorization successful"));

    assert!(coordinator.is_authorized(user).await);

    let outcome = coordinator.check_authorization_result(user).unwrap();
    assert!(outcome.success);
    let profile = outcome.profile.expect("profile snapshot captured");
    assert_eq!(profile.primary_calendar.unwrap().summary, "Work");
    assert_eq!(profile.calendar_count, 2);

    // Single-consume: the second check comes back empty.
    assert!(coordinator.check_authorization_result(user).is_none());

    // Timezone resolves from the persisted profile snapshot.
    assert_eq!(coordinator.user_timezone(user), "Asia/Almaty");
    assert_eq!(coordinator.user_timezone(UserId::new(999)), "UTC");

    coordinator.shutdown().await;
}

#[tokio::test]
async fn replayed_callback_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let provider = MockServer::start().await;
    mount_calendar_list(&provider).await;

    // Exactly one exchange may reach the provider.
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"{"access_token": "at", "refresh_token": "rt", "expires_in": 3600}"#,
        ))
        .expect(1)
        .mount(&provider)
        .await;

    let coordinator = AuthCoordinator::new(config_for(dir.path(), &provider)).unwrap();
    let user = UserId::new(101);

    let auth_url = coordinator.create_authorization_url(user).await.unwrap();
    let state = state_from(&auth_url);
    let port = coordinator.callback_port().await.unwrap();

    let first = http_get(port, &format!("/oauth2callback?state={state}&code=abc")).await;
    assert!(first.starts_with("HTTP/1.1 200 OK"));

    let replay = http_get(port, &format!("/oauth2callback?state={state}&code=abc")).await;
    assert!(replay.starts_with("HTTP/1.1 400 Bad Request"));
    assert!(replay.contains("unknown or expired"));

    coordinator.shutdown().await;
}

#[tokio::test]
async fn provider_error_discards_session() {
    let dir = tempfile::tempdir().unwrap();
    let provider = MockServer::start().await;

    let coordinator = AuthCoordinator::new(config_for(dir.path(), &provider)).unwrap();
    let user = UserId::new(102);

    let auth_url = coordinator.create_authorization_url(user).await.unwrap();
    let state = state_from(&auth_url);
    let port = coordinator.callback_port().await.unwrap();

    let response = http_get(
        port,
        &format!("/oauth2callback?state={state}&error=access_denied&error_description=user%20denied"),
    )
    .await;
    assert!(response.starts_with("HTTP/1.1 400 Bad Request"));
    assert!(response.contains("access_denied"));

    assert!(!coordinator.is_authorized(user).await);

    let outcome = coordinator.check_authorization_result(user).unwrap();
    assert!(!outcome.success);
    assert!(outcome.message.unwrap().contains("access_denied"));

    // The session is gone: a late callback with a code is rejected.
    let late = http_get(port, &format!("/oauth2callback?state={state}&code=abc")).await;
    assert!(late.starts_with("HTTP/1.1 400 Bad Request"));
    assert!(late.contains("unknown or expired"));

    coordinator.shutdown().await;
}

#[tokio::test]
async fn missing_parameters_do_not_touch_sessions() {
    let dir = tempfile::tempdir().unwrap();
    let provider = MockServer::start().await;
    mount_token_success(&provider).await;
    mount_calendar_list(&provider).await;

    let coordinator = AuthCoordinator::new(config_for(dir.path(), &provider)).unwrap();
    let user = UserId::new(103);

    let auth_url = coordinator.create_authorization_url(user).await.unwrap();
    let state = state_from(&auth_url);
    let port = coordinator.callback_port().await.unwrap();

    let bare = http_get(port, "/oauth2callback").await;
    assert!(bare.starts_with("HTTP/1.1 400 Bad Request"));
    assert!(bare.contains("Missing required parameters"));

    let unknown = http_get(port, "/favicon.ico").await;
    assert!(unknown.starts_with("HTTP/1.1 404 Not Found"));

    // The pending session survived both: the real callback still completes.
    let callback = http_get(port, &format!("/oauth2callback?state={state}&code=abc")).await;
    assert!(callback.starts_with("HTTP/1.1 200 OK"));
    assert!(coordinator.is_authorized(user).await);

    coordinator.shutdown().await;
}

#[tokio::test]
async fn exchange_failure_records_failed_outcome() {
    let dir = tempfile::tempdir().unwrap();
    let provider = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(400).set_body_string(r#"{"error": "invalid_grant"}"#))
        .mount(&provider)
        .await;

    let coordinator = AuthCoordinator::new(config_for(dir.path(), &provider)).unwrap();
    let user = UserId::new(104);

    let auth_url = coordinator.create_authorization_url(user).await.unwrap();
    let state = state_from(&auth_url);
    let port = coordinator.callback_port().await.unwrap();

    let response = http_get(port, &format!("/oauth2callback?state={state}&code=bad")).await;
    assert!(response.starts_with("HTTP/1.1 400 Bad Request"));

    assert!(!coordinator.is_authorized(user).await);
    assert!(coordinator.credential(user).await.is_none());

    let outcome = coordinator.check_authorization_result(user).unwrap();
    assert!(!outcome.success);
    assert!(outcome.message.unwrap().contains("invalid_grant"));

    coordinator.shutdown().await;
}

#[tokio::test]
async fn new_attempt_supersedes_stale_outcome() {
    let dir = tempfile::tempdir().unwrap();
    let provider = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(400).set_body_string("rejected"))
        .mount(&provider)
        .await;

    let coordinator = AuthCoordinator::new(config_for(dir.path(), &provider)).unwrap();
    let user = UserId::new(105);

    let auth_url = coordinator.create_authorization_url(user).await.unwrap();
    let state = state_from(&auth_url);
    let port = coordinator.callback_port().await.unwrap();
    http_get(port, &format!("/oauth2callback?state={state}&code=x")).await;

    // A failure outcome is pending now; a fresh attempt clears it.
    coordinator.create_authorization_url(user).await.unwrap();
    assert!(coordinator.check_authorization_result(user).is_none());

    coordinator.shutdown().await;
}

#[tokio::test]
async fn listener_unavailable_when_range_is_occupied() {
    let dir = tempfile::tempdir().unwrap();
    let provider = MockServer::start().await;

    let blocker = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
    let busy_port = blocker.local_addr().unwrap().port();

    let config = config_for(dir.path(), &provider).with_port_range(busy_port, busy_port);
    let coordinator = AuthCoordinator::new(config).unwrap();

    let err = coordinator
        .create_authorization_url(UserId::new(106))
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::ListenerUnavailable { .. }));
}

#[tokio::test]
async fn missing_client_config_fails_url_creation() {
    let dir = tempfile::tempdir().unwrap();

    let config = CoordinatorConfig::new(dir.path().join("nonexistent.json"))
        .with_storage_dir(dir.path().join("users"))
        .with_port_range(0, 0);
    let coordinator = AuthCoordinator::new(config).unwrap();

    let err = coordinator
        .create_authorization_url(UserId::new(107))
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::MissingClientConfig { .. }));

    coordinator.shutdown().await;
}

#[tokio::test]
async fn revocation_makes_user_unauthorized() {
    let dir = tempfile::tempdir().unwrap();
    let provider = MockServer::start().await;
    mount_token_success(&provider).await;
    mount_calendar_list(&provider).await;

    let coordinator = AuthCoordinator::new(config_for(dir.path(), &provider)).unwrap();
    let user = UserId::new(108);

    // Revoking a user who never authorized removes nothing.
    assert_eq!(coordinator.revoke(user), 0);

    let auth_url = coordinator.create_authorization_url(user).await.unwrap();
    let state = state_from(&auth_url);
    let port = coordinator.callback_port().await.unwrap();
    http_get(port, &format!("/oauth2callback?state={state}&code=abc")).await;

    assert!(coordinator.is_authorized(user).await);
    assert!(coordinator.user_info(user).is_some());

    assert_eq!(coordinator.revoke(user), 2);
    assert!(!coordinator.is_authorized(user).await);
    assert!(coordinator.user_info(user).is_none());
    assert_eq!(coordinator.revoke(user), 0);

    coordinator.shutdown().await;
}

#[tokio::test]
async fn shutdown_releases_the_port() {
    let dir = tempfile::tempdir().unwrap();
    let provider = MockServer::start().await;
    let coordinator = AuthCoordinator::new(config_for(dir.path(), &provider)).unwrap();

    coordinator
        .create_authorization_url(UserId::new(109))
        .await
        .unwrap();
    let port = coordinator.callback_port().await.unwrap();

    coordinator.shutdown().await;

    // The listener is gone; the port can be bound again.
    let rebound = TcpListener::bind(("127.0.0.1", port)).await;
    assert!(rebound.is_ok());
}

#[tokio::test]
async fn timed_out_attempt_rejects_late_callback() {
    let dir = tempfile::tempdir().unwrap();
    let provider = MockServer::start().await;
    mount_token_success(&provider).await;

    // The session TTL tracks the authorization timeout, so once the monitor
    // gives up the state token is already dead.
    let config = config_for(dir.path(), &provider)
        .with_poll_interval(Duration::from_millis(50))
        .with_auth_timeout(Duration::from_millis(300));
    let coordinator = AuthCoordinator::new(config).unwrap();
    let user = UserId::new(112);

    let auth_url = coordinator.create_authorization_url(user).await.unwrap();
    let monitor = coordinator.watch_authorization(user);

    let outcome = monitor.run().await;
    assert!(matches!(outcome, MonitorOutcome::TimedOut));

    let state = state_from(&auth_url);
    let port = coordinator.callback_port().await.unwrap();
    let late = http_get(port, &format!("/oauth2callback?state={state}&code=too-late")).await;
    assert!(late.starts_with("HTTP/1.1 400 Bad Request"));
    assert!(late.contains("unknown or expired"));

    assert!(!coordinator.is_authorized(user).await);

    coordinator.shutdown().await;
}

#[tokio::test]
async fn monitor_picks_up_failed_outcome() {
    let dir = tempfile::tempdir().unwrap();
    let provider = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(400).set_body_string(r#"{"error": "invalid_grant"}"#))
        .mount(&provider)
        .await;

    let config = config_for(dir.path(), &provider)
        .with_poll_interval(Duration::from_millis(20))
        .with_auth_timeout(Duration::from_secs(5));
    let coordinator = AuthCoordinator::new(config).unwrap();
    let user = UserId::new(110);

    let auth_url = coordinator.create_authorization_url(user).await.unwrap();
    let monitor = coordinator.watch_authorization(user);

    let state = state_from(&auth_url);
    let port = coordinator.callback_port().await.unwrap();
    http_get(port, &format!("/oauth2callback?state={state}&code=bad")).await;

    match monitor.run().await {
        MonitorOutcome::Failed { message } => assert!(message.contains("invalid_grant")),
        other => panic!("expected failure, got {other:?}"),
    }

    coordinator.shutdown().await;
}

#[tokio::test]
async fn monitor_picks_up_success() {
    let dir = tempfile::tempdir().unwrap();
    let provider = MockServer::start().await;
    mount_token_success(&provider).await;
    mount_calendar_list(&provider).await;

    let config = config_for(dir.path(), &provider)
        .with_poll_interval(Duration::from_millis(20))
        .with_auth_timeout(Duration::from_secs(5));
    let coordinator = AuthCoordinator::new(config).unwrap();
    let user = UserId::new(111);

    let auth_url = coordinator.create_authorization_url(user).await.unwrap();
    let monitor = coordinator.watch_authorization(user);

    let state = state_from(&auth_url);
    let port = coordinator.callback_port().await.unwrap();
    http_get(port, &format!("/oauth2callback?state={state}&code=abc")).await;

    match monitor.run().await {
        MonitorOutcome::Success { profile } => {
            let profile = profile.expect("profile snapshot present");
            assert_eq!(profile.primary_calendar.unwrap().timezone.as_deref(), Some("Asia/Almaty"));
        }
        other => panic!("expected success, got {other:?}"),
    }

    coordinator.shutdown().await;
}
