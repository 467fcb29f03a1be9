//! Authenticated session lifecycle for the download portal.
//!
//! The portal gates archive downloads behind a form login protected by a
//! CSRF-style token embedded in the login page. This module owns the one
//! live session: a cookie-jar HTTP client plus the login protocol, the
//! session-expiry heuristic, and the bounded relogin policy.
//!
//! Session expiry is not signalled by status code: the server answers
//! authenticated requests with HTTP 200 and an HTML login page once the
//! session has lapsed. Expiry is therefore detected by content type: HTML
//! where a binary archive payload was expected.

use std::sync::{Arc, LazyLock};
use std::time::Duration;

use reqwest::cookie::Jar;
use reqwest::header::{CONTENT_TYPE, REFERER};
use reqwest::{Client, Response};
use scraper::{Html, Selector};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use crate::config::{Config, Credentials};
use crate::shutdown::{Interrupted, interruptible_sleep};

/// Marker the portal embeds in the response body when login is refused.
const FAILED_LOGIN_MARKER: &str = "Please try again or email for support";

/// Form field carrying the CSRF-style token.
const TOKEN_FIELD: &str = "csrfmiddlewaretoken";

// Static selector for the login form token input. The selector string is a
// compile-time constant, so parse failure is unreachable.
#[allow(clippy::expect_used)]
static TOKEN_SELECTOR: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse(r#"input[name="csrfmiddlewaretoken"]"#).expect("static selector is valid")
});

/// Errors raised by the session lifecycle.
///
/// All variants except the internally-recovered expiry path are fatal:
/// the operator must fix credentials rather than the client retrying.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The HTTP client could not be constructed.
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    /// Network-level failure talking to the login portal.
    #[error("network error reaching {url}: {source}")]
    Network {
        /// The URL that failed.
        url: String,
        /// The underlying network error.
        #[source]
        source: reqwest::Error,
    },

    /// The login page carried zero or ambiguous authentication tokens.
    #[error("no unambiguous authentication token on login page {url} ({candidates} candidates)")]
    TokenMissing {
        /// The login page URL.
        url: String,
        /// Number of distinct token values found.
        candidates: usize,
    },

    /// The portal refused the submitted credentials.
    #[error("login rejected by server (HTTP {status}); check username and password")]
    LoginRejected {
        /// Status of the login response.
        status: u16,
    },

    /// The server kept returning login HTML after the relogin budget.
    #[error("session still invalid after {attempts} relogin attempts")]
    ReloginExhausted {
        /// Number of relogin attempts performed.
        attempts: u32,
    },

    /// The run was interrupted during a relogin pause.
    #[error(transparent)]
    Interrupted(#[from] Interrupted),
}

impl SessionError {
    /// Creates a network error with URL context.
    pub fn network(url: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Network {
            url: url.into(),
            source,
        }
    }

    /// Creates a token-missing error.
    pub fn token_missing(url: impl Into<String>, candidates: usize) -> Self {
        Self::TokenMissing {
            url: url.into(),
            candidates,
        }
    }
}

/// The one live authenticated session.
///
/// Holds a cookie-jar [`Client`] shared across the login protocol and all
/// archive requests. Re-running [`SessionClient::login`] on the same client
/// rotates the session cookie in place, so there is never more than one
/// session alive.
#[derive(Debug)]
pub struct SessionClient {
    client: Client,
    credentials: Credentials,
    login_url: String,
    relogin_delay: Duration,
    max_relogin_attempts: u32,
    shutdown: CancellationToken,
}

impl SessionClient {
    /// Builds an unauthenticated session client from the run configuration.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Client`] when the HTTP client cannot be
    /// constructed.
    pub fn new(config: &Config, shutdown: CancellationToken) -> Result<Self, SessionError> {
        let jar = Arc::new(Jar::default());
        let client = Client::builder()
            .cookie_provider(jar)
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .read_timeout(Duration::from_secs(config.read_timeout_secs))
            .gzip(true)
            .user_agent(concat!("datashare-dl/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(SessionError::Client)?;

        Ok(Self {
            client,
            credentials: config.credentials.clone(),
            login_url: config.login_url.clone(),
            relogin_delay: config.relogin_delay,
            max_relogin_attempts: config.max_relogin_attempts,
            shutdown,
        })
    }

    /// Runs the login protocol: fetch the login page, extract the form
    /// token, and post the credentials.
    ///
    /// The token choice is deterministic: the page must carry exactly one
    /// distinct `csrfmiddlewaretoken` value; zero values or several distinct
    /// values are rejected as [`SessionError::TokenMissing`].
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::LoginRejected`] on a non-success response or
    /// when the known failure marker appears in the response body;
    /// [`SessionError::TokenMissing`] when no unambiguous token is found;
    /// [`SessionError::Network`] on transport failure.
    #[instrument(skip(self), fields(url = %self.login_url))]
    pub async fn login(&mut self) -> Result<(), SessionError> {
        debug!("fetching login page");
        let response = self
            .client
            .get(&self.login_url)
            .send()
            .await
            .map_err(|e| SessionError::network(&self.login_url, e))?;
        let status = response.status();
        if !status.is_success() {
            return Err(SessionError::LoginRejected {
                status: status.as_u16(),
            });
        }
        let page = response
            .text()
            .await
            .map_err(|e| SessionError::network(&self.login_url, e))?;

        let token = unique_login_token(&page)
            .map_err(|candidates| SessionError::token_missing(&self.login_url, candidates))?;
        debug!("extracted login form token");

        let form = [
            ("username", self.credentials.username.as_str()),
            ("password", self.credentials.password()),
            (TOKEN_FIELD, token.as_str()),
        ];
        let response = self
            .client
            .post(&self.login_url)
            .header(REFERER, &self.login_url)
            .form(&form)
            .send()
            .await
            .map_err(|e| SessionError::network(&self.login_url, e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| SessionError::network(&self.login_url, e))?;
        if !status.is_success() || body.contains(FAILED_LOGIN_MARKER) {
            return Err(SessionError::LoginRejected {
                status: status.as_u16(),
            });
        }

        info!(username = %self.credentials.username, "logged in");
        Ok(())
    }

    /// Pauses for the configured relogin delay, then re-runs the login
    /// protocol on the same client.
    ///
    /// # Errors
    ///
    /// Returns the same errors as [`SessionClient::login`], or
    /// [`SessionError::Interrupted`] when shutdown fires during the pause.
    pub async fn relogin(&mut self) -> Result<(), SessionError> {
        debug!(
            delay_secs = self.relogin_delay.as_secs(),
            "pausing before relogin"
        );
        interruptible_sleep(self.relogin_delay, &self.shutdown).await?;
        self.login().await
    }

    /// Returns true when the response indicates a lapsed session: an HTML
    /// content type where a binary archive payload was expected.
    ///
    /// This is a heuristic, not a status check — the server returns HTTP
    /// success with a login page when the session has expired.
    #[must_use]
    pub fn is_session_expired(response: &Response) -> bool {
        response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|content_type| content_type.to_ascii_lowercase().contains("text/html"))
    }

    /// Upper bound on consecutive relogin attempts for one request.
    #[must_use]
    pub fn max_relogin_attempts(&self) -> u32 {
        self.max_relogin_attempts
    }

    /// Returns the underlying HTTP client carrying the session cookies.
    #[must_use]
    pub fn inner(&self) -> &Client {
        &self.client
    }
}

/// Extracts the single distinct login token value from the login page.
///
/// Returns the number of distinct candidates on failure (0, or 2+ when the
/// page is ambiguous).
fn unique_login_token(page: &str) -> Result<String, usize> {
    let document = Html::parse_document(page);
    let mut values: Vec<&str> = document
        .select(&TOKEN_SELECTOR)
        .filter_map(|input| input.value().attr("value"))
        .collect();
    values.sort_unstable();
    values.dedup();
    match values.as_slice() {
        [token] => Ok((*token).to_string()),
        other => Err(other.len()),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::config::{Credentials, DEFAULT_DOWNLOAD_BASE_URL};
    use std::path::PathBuf;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config(login_url: &str) -> Config {
        Config {
            credentials: Credentials::new("alice", "secret").unwrap(),
            catalog_file: PathBuf::from("datasets.csv"),
            downloads_dir: PathBuf::from("/tmp"),
            login_url: login_url.to_string(),
            base_url: DEFAULT_DOWNLOAD_BASE_URL.to_string(),
            period_duration: Duration::from_secs(600),
            chunks_per_period: 1000,
            chunk_length: 1024,
            relogin_delay: Duration::from_millis(10),
            max_relogin_attempts: 3,
            max_attempts: 3,
            retry_backoff: Duration::from_secs(1),
            variant_filter: None,
            resources_file: None,
            overwrite: false,
            dry_run: false,
            connect_timeout_secs: 30,
            read_timeout_secs: 30,
        }
    }

    fn login_page(token: &str) -> String {
        format!(
            r#"<html><body><form method="post">
            <input type="hidden" name="csrfmiddlewaretoken" value="{token}">
            <input name="username"><input name="password" type="password">
            </form></body></html>"#
        )
    }

    // ==================== Token Extraction Tests ====================

    #[test]
    fn test_unique_login_token_single() {
        let token = unique_login_token(&login_page("tok-123")).unwrap();
        assert_eq!(token, "tok-123");
    }

    #[test]
    fn test_unique_login_token_missing() {
        let page = "<html><body><form></form></body></html>";
        assert_eq!(unique_login_token(page), Err(0));
    }

    #[test]
    fn test_unique_login_token_duplicate_same_value_ok() {
        // Two inputs carrying the same value still identify one token.
        let page = r#"<html><body>
            <input name="csrfmiddlewaretoken" value="same">
            <input name="csrfmiddlewaretoken" value="same">
            </body></html>"#;
        assert_eq!(unique_login_token(page).unwrap(), "same");
    }

    #[test]
    fn test_unique_login_token_ambiguous_rejected() {
        let page = r#"<html><body>
            <input name="csrfmiddlewaretoken" value="first">
            <input name="csrfmiddlewaretoken" value="second">
            </body></html>"#;
        assert_eq!(unique_login_token(page), Err(2));
    }

    #[test]
    fn test_unique_login_token_ignores_other_inputs() {
        let page = r#"<html><body>
            <input name="other" value="noise">
            <input name="csrfmiddlewaretoken" value="real">
            </body></html>"#;
        assert_eq!(unique_login_token(page).unwrap(), "real");
    }

    // ==================== Login Protocol Tests ====================

    #[tokio::test]
    async fn test_login_posts_token_and_credentials() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("Content-Type", "text/html")
                    .set_body_string(login_page("tok-abc")),
            )
            .mount(&mock_server)
            .await;

        Mock::given(method("POST"))
            .and(path("/"))
            .and(body_string_contains("username=alice"))
            .and(body_string_contains("password=secret"))
            .and(body_string_contains("csrfmiddlewaretoken=tok-abc"))
            .respond_with(
                ResponseTemplate::new(200).set_body_string("<html>Welcome back</html>"),
            )
            .expect(1)
            .mount(&mock_server)
            .await;

        let config = test_config(&format!("{}/", mock_server.uri()));
        let mut session = SessionClient::new(&config, CancellationToken::new()).unwrap();
        let result = session.login().await;
        assert!(result.is_ok(), "Expected Ok, got: {result:?}");
    }

    #[tokio::test]
    async fn test_login_fails_without_token() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(
                ResponseTemplate::new(200).set_body_string("<html><form></form></html>"),
            )
            .mount(&mock_server)
            .await;

        let config = test_config(&format!("{}/", mock_server.uri()));
        let mut session = SessionClient::new(&config, CancellationToken::new()).unwrap();
        match session.login().await {
            Err(SessionError::TokenMissing { candidates: 0, .. }) => {}
            other => panic!("Expected TokenMissing, got: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_login_rejected_on_failure_marker() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(200).set_body_string(login_page("tok")))
            .mount(&mock_server)
            .await;

        // Server answers 200 but embeds the failure marker.
        Mock::given(method("POST"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                "<html>Please try again or email for support</html>",
            ))
            .mount(&mock_server)
            .await;

        let config = test_config(&format!("{}/", mock_server.uri()));
        let mut session = SessionClient::new(&config, CancellationToken::new()).unwrap();
        match session.login().await {
            Err(SessionError::LoginRejected { status: 200 }) => {}
            other => panic!("Expected LoginRejected, got: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_login_rejected_on_error_status() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(200).set_body_string(login_page("tok")))
            .mount(&mock_server)
            .await;

        Mock::given(method("POST"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&mock_server)
            .await;

        let config = test_config(&format!("{}/", mock_server.uri()));
        let mut session = SessionClient::new(&config, CancellationToken::new()).unwrap();
        match session.login().await {
            Err(SessionError::LoginRejected { status: 403 }) => {}
            other => panic!("Expected LoginRejected, got: {other:?}"),
        }
    }

    // ==================== Expiry Heuristic Tests ====================

    #[tokio::test]
    async fn test_html_response_is_expired() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/file.tar"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw("<html>login please</html>".as_bytes().to_vec(), "text/html; charset=utf-8"),
            )
            .mount(&mock_server)
            .await;

        let response = reqwest::get(format!("{}/file.tar", mock_server.uri()))
            .await
            .unwrap();
        assert!(SessionClient::is_session_expired(&response));
    }

    #[tokio::test]
    async fn test_binary_response_is_not_expired() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/file.tar"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("Content-Type", "application/x-tar")
                    .set_body_bytes(b"tar bytes".to_vec()),
            )
            .mount(&mock_server)
            .await;

        let response = reqwest::get(format!("{}/file.tar", mock_server.uri()))
            .await
            .unwrap();
        assert!(!SessionClient::is_session_expired(&response));
    }

    #[tokio::test]
    async fn test_mixed_case_html_content_type_is_expired() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/file.tar"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw("<html></html>".as_bytes().to_vec(), "Text/HTML; charset=utf-8"),
            )
            .mount(&mock_server)
            .await;

        let response = reqwest::get(format!("{}/file.tar", mock_server.uri()))
            .await
            .unwrap();
        assert!(SessionClient::is_session_expired(&response));
    }

    #[tokio::test]
    async fn test_octet_stream_content_type_is_not_expired() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/file.tar"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"raw".to_vec()))
            .mount(&mock_server)
            .await;

        let response = reqwest::get(format!("{}/file.tar", mock_server.uri()))
            .await
            .unwrap();
        assert!(!SessionClient::is_session_expired(&response));
    }
}
