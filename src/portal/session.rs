//! Cookie-bearing HTTP session and the portal login handshake.
//!
//! The portal gives no positive confirmation of a successful login. A login is
//! treated as failed only when the post-redirect URL still mentions `login` and
//! the page mentions `error`; every other response counts as success. A wrong
//! password that lands somewhere else is only noticed later, when discovery
//! finds nothing.

use std::sync::Arc;

use reqwest::cookie::Jar;
use reqwest::header::{ACCEPT_LANGUAGE, CONTENT_TYPE, HeaderMap, HeaderValue};
use reqwest::{Client, Response};
use tracing::{debug, instrument};
use url::Url;

use super::{DEFAULT_BASE_URL, LOGIN_PATH};
use crate::activity_log::LogSink;
use crate::transfer::constants::{CONNECT_TIMEOUT, PAGE_TIMEOUT};

/// Browser User-Agent; the portal serves degraded pages to unknown agents.
pub const BROWSER_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 Chrome/120.0.0.0";

const ACCEPT_LANGUAGE_VALUE: &str = "th-TH,th;q=0.9,en;q=0.8";

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("invalid portal URL: {url}")]
    InvalidUrl { url: String },

    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("network error requesting {url}: {source}")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("timeout requesting {url}")]
    Timeout { url: String },

    #[error("HTTP {status} from {url}")]
    HttpStatus { url: String, status: u16 },
}

impl SessionError {
    pub fn request(url: impl Into<String>, source: reqwest::Error) -> Self {
        if source.is_timeout() {
            Self::Timeout { url: url.into() }
        } else {
            Self::Network {
                url: url.into(),
                source,
            }
        }
    }

    pub fn invalid_url(url: impl Into<String>) -> Self {
        Self::InvalidUrl { url: url.into() }
    }
}

/// Where the portal lives. Tests point this at a mock server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortalEndpoint {
    base: Url,
}

impl Default for PortalEndpoint {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_URL).unwrap_or_else(|e| panic!("default portal URL: {e}"))
    }
}

impl PortalEndpoint {
    /// # Errors
    ///
    /// Returns [`SessionError::InvalidUrl`] unless `base` is an absolute URL.
    pub fn new(base: &str) -> Result<Self, SessionError> {
        let base = Url::parse(base).map_err(|_| SessionError::invalid_url(base))?;
        if base.cannot_be_a_base() {
            return Err(SessionError::invalid_url(base.as_str()));
        }
        Ok(Self { base })
    }

    #[must_use]
    pub fn base(&self) -> &Url {
        &self.base
    }

    /// Resolves `path` (or a relative href) against the portal origin.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::InvalidUrl`] if the join fails.
    pub fn join(&self, path: &str) -> Result<Url, SessionError> {
        self.base
            .join(path)
            .map_err(|_| SessionError::invalid_url(path))
    }
}

/// True when a login response looks like the portal bounced back to its login
/// page with an error.
#[must_use]
pub fn is_login_rejected(final_url: &str, body: &str) -> bool {
    final_url.to_lowercase().contains("login") && body.to_lowercase().contains("error")
}

/// One authenticated conversation with the portal. Never shared across runs.
#[derive(Debug, Clone)]
pub struct PortalSession {
    client: Client,
    endpoint: PortalEndpoint,
}

impl PortalSession {
    /// Builds a fresh client with its own cookie jar.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Client`] if the TLS backend cannot initialize.
    pub fn new(endpoint: PortalEndpoint) -> Result<Self, SessionError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT_LANGUAGE,
            HeaderValue::from_static(ACCEPT_LANGUAGE_VALUE),
        );

        let client = Client::builder()
            .cookie_provider(Arc::new(Jar::default()))
            .connect_timeout(CONNECT_TIMEOUT)
            .gzip(true)
            .user_agent(BROWSER_USER_AGENT)
            .default_headers(headers)
            .build()
            .map_err(SessionError::Client)?;

        Ok(Self { client, endpoint })
    }

    #[must_use]
    pub fn client(&self) -> &Client {
        &self.client
    }

    #[must_use]
    pub fn endpoint(&self) -> &PortalEndpoint {
        &self.endpoint
    }

    /// Logs in, reporting the outcome through `log`. Errors are logged and
    /// reported as `false`.
    pub async fn login(
        &self,
        username: &str,
        password: &str,
        log: &dyn LogSink,
        source: &str,
    ) -> bool {
        log.info("Logging in to NHSO E-Claim...", source);
        match self.try_login(username, password).await {
            Ok(true) => {
                log.success("Login successful", source);
                true
            }
            Ok(false) => {
                log.error("Login failed - invalid credentials", source);
                false
            }
            Err(e) => {
                log.error(&format!("Login error: {e}"), source);
                false
            }
        }
    }

    /// Runs the handshake: GET the login page for cookies, then POST the form.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] on network failure or timeout. A rejected
    /// login is `Ok(false)`, not an error.
    #[instrument(skip(self, password))]
    pub async fn try_login(&self, username: &str, password: &str) -> Result<bool, SessionError> {
        let login_url = self.endpoint.join(LOGIN_PATH)?;

        self.client
            .get(login_url.clone())
            .timeout(PAGE_TIMEOUT)
            .send()
            .await
            .map_err(|e| SessionError::request(login_url.as_str(), e))?;

        let body = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("user", username)
            .append_pair("pass", password)
            .finish();
        let response = self
            .client
            .post(login_url.clone())
            .timeout(PAGE_TIMEOUT)
            .header(
                CONTENT_TYPE,
                HeaderValue::from_static("application/x-www-form-urlencoded"),
            )
            .body(body)
            .send()
            .await
            .map_err(|e| SessionError::request(login_url.as_str(), e))?;

        let final_url = response.url().to_string();
        let page = response
            .text()
            .await
            .map_err(|e| SessionError::request(final_url.as_str(), e))?;
        debug!(%final_url, "login response received");

        Ok(!is_login_rejected(&final_url, &page))
    }

    /// GETs a portal page and returns its body, failing on non-2xx.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] on network failure, timeout, or HTTP error status.
    pub async fn get_page(&self, url: Url, headers: HeaderMap) -> Result<String, SessionError> {
        let response = self.send_get(url.clone(), headers).await?;
        let status = response.status();
        if !status.is_success() {
            return Err(SessionError::HttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        response
            .text()
            .await
            .map_err(|e| SessionError::request(url.as_str(), e))
    }

    /// GETs a page only for its side effects (cookies, server-side state).
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] on network failure or timeout.
    pub async fn prime(&self, url: Url) -> Result<(), SessionError> {
        self.send_get(url, HeaderMap::new()).await.map(drop)
    }

    async fn send_get(&self, url: Url, headers: HeaderMap) -> Result<Response, SessionError> {
        self.client
            .get(url.clone())
            .timeout(PAGE_TIMEOUT)
            .headers(headers)
            .send()
            .await
            .map_err(|e| SessionError::request(url.as_str(), e))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_login_rejected_needs_both_markers() {
        assert!(is_login_rejected(
            "https://eclaim.nhso.go.th/webComponent/login/LoginAction.do",
            "<div class=\"ERROR\">bad password</div>"
        ));
        assert!(!is_login_rejected(
            "https://eclaim.nhso.go.th/webComponent/main/MainWebAction.do",
            "error"
        ));
        assert!(!is_login_rejected(
            "https://eclaim.nhso.go.th/webComponent/login/LoginAction.do",
            "welcome"
        ));
    }

    #[test]
    fn test_endpoint_join() {
        let endpoint = PortalEndpoint::new("http://127.0.0.1:8080").unwrap();
        let url = endpoint.join(LOGIN_PATH).unwrap();
        assert_eq!(
            url.as_str(),
            "http://127.0.0.1:8080/webComponent/login/LoginAction.do"
        );
        assert_eq!(
            PortalEndpoint::default().base().as_str(),
            "https://eclaim.nhso.go.th/"
        );
    }

    #[test]
    fn test_endpoint_rejects_relative_url() {
        assert!(matches!(
            PortalEndpoint::new("not a url"),
            Err(SessionError::InvalidUrl { .. })
        ));
    }

    #[test]
    fn test_session_builds() {
        let session = PortalSession::new(PortalEndpoint::default()).unwrap();
        assert_eq!(session.endpoint(), &PortalEndpoint::default());
    }
}
