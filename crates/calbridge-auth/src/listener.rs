//! Loopback HTTP listener for the provider's OAuth redirect.
//!
//! The listener owns one route, `GET /oauth2callback`, bound to the first
//! free port of the configured range on 127.0.0.1. It parses the redirect
//! query, hands the values to the coordinator, and answers with a small HTML
//! page. All state changes (session consumption, credential writes, outcome
//! recording) happen in the coordinator before the response is written, so a
//! replayed callback can never be double-processed.
//!
//! The port is owned for the coordinator's process lifetime once bound; it
//! is never rebound per authorization attempt.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use calbridge_core::UserId;

use crate::coordinator::CoordinatorInner;
use crate::error::{AuthError, AuthResult};

/// The single route the listener serves.
pub const CALLBACK_PATH: &str = "/oauth2callback";

/// Query values carried by the provider's redirect.
#[derive(Debug, Default, Clone)]
pub(crate) struct CallbackParams {
    pub state: Option<String>,
    pub code: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

/// What the coordinator decided the response page should be.
#[derive(Debug)]
pub(crate) enum CallbackPage {
    /// Exchange completed; show the success page.
    Success(UserId),
    /// Validation or exchange failure; show the error page.
    Error(String),
}

/// Handle to the running callback listener.
#[derive(Debug)]
pub struct CallbackListener {
    port: u16,
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl CallbackListener {
    /// Binds the first free port in `port_range` and starts serving.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::ListenerUnavailable`] when every port in the
    /// range is taken.
    pub(crate) async fn start(
        inner: Arc<CoordinatorInner>,
        port_range: (u16, u16),
    ) -> AuthResult<Self> {
        let (listener, port) = Self::bind_loopback(port_range).await?;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(accept_loop(listener, inner, shutdown_rx));
        info!(port, "callback listener started");

        Ok(Self {
            port,
            shutdown_tx,
            task,
        })
    }

    async fn bind_loopback(port_range: (u16, u16)) -> AuthResult<(TcpListener, u16)> {
        for port in port_range.0..=port_range.1 {
            match TcpListener::bind(("127.0.0.1", port)).await {
                Ok(listener) => {
                    // Asking for port 0 hands out an ephemeral port; report
                    // the one actually bound.
                    let port = listener
                        .local_addr()
                        .map(|addr| addr.port())
                        .unwrap_or(port);
                    debug!(port, "bound loopback listener");
                    return Ok((listener, port));
                }
                Err(_) => continue,
            }
        }
        Err(AuthError::listener_unavailable(format!(
            "no free port in range {}-{}",
            port_range.0, port_range.1
        )))
    }

    /// The bound port.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// The redirect URI registered with the provider for this listener.
    ///
    /// Authorization URLs must carry exactly this value or the provider
    /// rejects the request.
    pub fn redirect_uri(&self) -> String {
        format!("http://localhost:{}{}", self.port, CALLBACK_PATH)
    }

    /// Stops accepting connections, lets in-flight requests finish, and
    /// waits up to `grace` for the drain.
    pub async fn stop(self, grace: Duration) {
        let _ = self.shutdown_tx.send(true);
        if tokio::time::timeout(grace, self.task).await.is_err() {
            warn!("callback listener did not drain within the grace period");
        }
    }
}

async fn accept_loop(
    listener: TcpListener,
    inner: Arc<CoordinatorInner>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut in_flight = JoinSet::new();

    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, _addr)) => {
                    let inner = Arc::clone(&inner);
                    in_flight.spawn(async move {
                        if let Err(e) = serve_connection(stream, inner).await {
                            debug!("callback connection error: {e}");
                        }
                    });
                }
                Err(e) => error!("failed to accept callback connection: {e}"),
            }
        }

        // Reap finished connection tasks as we go.
        while in_flight.try_join_next().is_some() {}
    }

    drop(listener);
    while in_flight.join_next().await.is_some() {}
    info!("callback listener stopped");
}

async fn serve_connection(
    stream: TcpStream,
    inner: Arc<CoordinatorInner>,
) -> std::io::Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    let mut request_line = String::new();
    reader.read_line(&mut request_line).await?;

    // Drain the remaining header lines; closing with unread request data can
    // reset the connection before the response is delivered.
    let mut header = String::new();
    loop {
        header.clear();
        let n = reader.read_line(&mut header).await?;
        if n == 0 || header == "\r\n" || header == "\n" {
            break;
        }
    }

    let response = route_request(&request_line, &inner).await;
    write_half.write_all(response.as_bytes()).await?;
    write_half.shutdown().await
}

async fn route_request(request_line: &str, inner: &CoordinatorInner) -> String {
    let Some((method, target)) = parse_request_line(request_line) else {
        return http_response(400, "Bad Request", &error_page("Malformed request"), true);
    };

    if method != "GET" {
        return http_response(
            400,
            "Bad Request",
            &error_page("Only GET requests are supported"),
            true,
        );
    }

    let (path, query) = match target.split_once('?') {
        Some((path, query)) => (path, query),
        None => (target, ""),
    };

    if path != CALLBACK_PATH {
        warn!(path, "request for unknown path");
        return http_response(404, "Not Found", &not_found_page(), false);
    }

    let params = parse_query(query);
    debug!(
        state = params.state.as_deref().unwrap_or("-"),
        has_code = params.code.is_some(),
        error = params.error.as_deref().unwrap_or("-"),
        "received oauth callback"
    );

    match inner.process_callback(params).await {
        CallbackPage::Success(user) => http_response(200, "OK", &success_page(user), true),
        CallbackPage::Error(message) => {
            http_response(400, "Bad Request", &error_page(&message), true)
        }
    }
}

/// Parses `GET /oauth2callback?... HTTP/1.1` into method and target.
fn parse_request_line(line: &str) -> Option<(&str, &str)> {
    let mut parts = line.split_whitespace();
    let method = parts.next()?;
    let target = parts.next()?;
    Some((method, target))
}

fn parse_query(query: &str) -> CallbackParams {
    let mut params = CallbackParams::default();
    for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
        match key.as_ref() {
            "state" => params.state = Some(value.into_owned()),
            "code" => params.code = Some(value.into_owned()),
            "error" => params.error = Some(value.into_owned()),
            "error_description" => params.error_description = Some(value.into_owned()),
            _ => {}
        }
    }
    params
}

fn http_response(status: u16, reason: &str, body: &str, no_cache: bool) -> String {
    let cache_header = if no_cache {
        "Cache-Control: no-cache, no-store, must-revalidate\r\n"
    } else {
        ""
    };

    format!(
        "HTTP/1.1 {status} {reason}\r\n\
        Content-Type: text/html; charset=utf-8\r\n\
        {cache_header}\
        Content-Length: {}\r\n\
        Connection: close\r\n\
        \r\n\
        {body}",
        body.len(),
    )
}

fn success_page(user: UserId) -> String {
    format!(
        "<!DOCTYPE html>\n<html>\n<head>\n<title>Authorization Complete</title>\n\
        <meta charset=\"utf-8\">\n{STYLE}</head>\n<body>\n<div class=\"container\">\n\
        <h1 class=\"ok\">Authorization successful</h1>\n\
        <p>Your calendar is now connected for account {user}.</p>\n\
        <p>You can close this window and return to the chat.</p>\n\
        </div>\n</body>\n</html>\n"
    )
}

fn error_page(message: &str) -> String {
    format!(
        "<!DOCTYPE html>\n<html>\n<head>\n<title>Authorization Error</title>\n\
        <meta charset=\"utf-8\">\n{STYLE}</head>\n<body>\n<div class=\"container\">\n\
        <h1 class=\"err\">Authorization error</h1>\n\
        <p>{}</p>\n\
        <p>Go back to the chat and try <code>/auth</code> again.</p>\n\
        </div>\n</body>\n</html>\n",
        html_escape(message),
    )
}

fn not_found_page() -> String {
    "<!DOCTYPE html>\n<html>\n<head>\n<title>404 Not Found</title>\n\
    <meta charset=\"utf-8\">\n</head>\n<body>\n\
    <h1>404 Not Found</h1>\n<p>This is the calbridge OAuth callback endpoint.</p>\n\
    </body>\n</html>\n"
        .to_string()
}

const STYLE: &str = "<style>\n\
    body { font-family: sans-serif; text-align: center; margin-top: 80px; }\n\
    .container { max-width: 480px; margin: 0 auto; }\n\
    .ok { color: #28a745; }\n\
    .err { color: #dc3545; }\n\
    </style>\n";

/// Minimal HTML escaping for messages echoed into the error page.
fn html_escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_line_parsing() {
        let (method, target) =
            parse_request_line("GET /oauth2callback?state=abc&code=def HTTP/1.1\r\n").unwrap();
        assert_eq!(method, "GET");
        assert_eq!(target, "/oauth2callback?state=abc&code=def");

        assert!(parse_request_line("").is_none());
        assert!(parse_request_line("GET").is_none());
    }

    #[test]
    fn query_parsing_decodes_values() {
        let params = parse_query("state=abc%2Fdef&code=4%2F0AX&error_description=user%20denied");
        assert_eq!(params.state, Some("abc/def".to_string()));
        assert_eq!(params.code, Some("4/0AX".to_string()));
        assert_eq!(params.error, None);
        assert_eq!(params.error_description, Some("user denied".to_string()));
    }

    #[test]
    fn query_parsing_ignores_unknown_keys() {
        let params = parse_query("scope=calendar&state=s");
        assert_eq!(params.state, Some("s".to_string()));
        assert!(params.code.is_none());
    }

    #[test]
    fn outcome_pages_disable_caching() {
        let response = http_response(200, "OK", &success_page(UserId::new(1)), true);
        assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(response.contains("Cache-Control: no-cache, no-store, must-revalidate"));

        let response = http_response(404, "Not Found", &not_found_page(), false);
        assert!(!response.contains("Cache-Control"));
    }

    #[test]
    fn error_page_escapes_message() {
        let page = error_page("<script>alert(1)</script>");
        assert!(!page.contains("<script>"));
        assert!(page.contains("&lt;script&gt;"));
    }

    #[tokio::test]
    async fn bind_prefers_first_free_port() {
        // Hold the first port of the range so the probe has to move on.
        let blocker = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let first = blocker.local_addr().unwrap().port();
        // The next port may be taken by another process; give the probe room.
        let (listener, port) = CallbackListener::bind_loopback((first, first.saturating_add(9)))
            .await
            .unwrap();
        assert!(port > first);
        drop(listener);
    }

    #[tokio::test]
    async fn bind_fails_when_range_is_exhausted() {
        let a = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let port_a = a.local_addr().unwrap().port();

        let err = CallbackListener::bind_loopback((port_a, port_a))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::ListenerUnavailable { .. }));
        assert!(err.to_string().contains("no free port"));
    }
}
