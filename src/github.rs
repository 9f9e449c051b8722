//! GitHub REST API client
//!
//! Thin wrapper over `reqwest` that knows the API base URL, the optional
//! OAuth token and the per-request timeout. It does not interpret status
//! codes; callers decide what a 200, 304 or 404 means for them.

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, IF_MODIFIED_SINCE, USER_AGENT};
use reqwest::{Client, StatusCode, Url};
use serde::de::DeserializeOwned;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Default request timeout for GitHub API calls
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Media type for JSON API responses
pub const JSON_MEDIA_TYPE: &str = "application/vnd.github.v3+json";

/// Media type that makes the contents endpoint return the raw file
pub const RAW_MEDIA_TYPE: &str = "application/vnd.github.v3.raw";

const CLIENT_USER_AGENT: &str = concat!("snappoll/", env!("CARGO_PKG_VERSION"));

/// Transport-level failures; an HTTP error status is not one of these
#[derive(Debug, Error)]
pub enum GitHubError {
    #[error("request to {path} timed out after {seconds} seconds")]
    Timeout { path: String, seconds: u64 },

    #[error("request to {path} failed: {message}")]
    Network { path: String, message: String },

    #[error("failed to build HTTP client: {0}")]
    ClientBuild(String),

    #[error("API endpoint {endpoint} cannot be used as a base URL: {message}")]
    InvalidEndpoint { endpoint: String, message: String },
}

/// A GET request against the API, relative to the endpoint
///
/// The path is held as raw segments; each one is percent-encoded when the URL
/// is built, so a branch such as `feature#1` stays a single segment.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    segments: Vec<String>,
    query: Vec<(String, String)>,
    if_modified_since: Option<String>,
    accept: &'static str,
}

impl ApiRequest {
    pub fn get<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            segments: segments.into_iter().map(Into::into).collect(),
            query: Vec::new(),
            if_modified_since: None,
            accept: JSON_MEDIA_TYPE,
        }
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn if_modified_since(mut self, http_date: impl Into<String>) -> Self {
        self.if_modified_since = Some(http_date.into());
        self
    }

    pub fn accept(mut self, media_type: &'static str) -> Self {
        self.accept = media_type;
        self
    }

    /// The unencoded path, for messages
    pub fn path(&self) -> String {
        format!("/{}", self.segments.join("/"))
    }
}

/// Status and body of a completed request
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub body: String,
}

impl ApiResponse {
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_str(&self.body)
    }

    /// The `message` field GitHub puts in error bodies, or the status reason.
    pub fn error_message(&self) -> String {
        serde_json::from_str::<serde_json::Value>(&self.body)
            .ok()
            .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(str::to_string))
            .unwrap_or_else(|| {
                self.status
                    .canonical_reason()
                    .unwrap_or("unknown error")
                    .to_string()
            })
    }

    /// Rejected credentials, either by status or by GitHub's error message
    pub fn is_auth_failure(&self) -> bool {
        self.status == StatusCode::UNAUTHORIZED || self.error_message() == "Bad credentials"
    }
}

/// GitHub API client with connection pooling
///
/// Cheap to share behind an `Arc`; the token is read-only.
#[derive(Debug, Clone)]
pub struct GitHubClient {
    endpoint: String,
    token: Option<String>,
    http_client: Client,
    timeout: Duration,
}

impl GitHubClient {
    pub fn new(endpoint: impl Into<String>, token: Option<String>) -> Result<Self, GitHubError> {
        Self::with_timeout(endpoint, token, Duration::from_secs(DEFAULT_TIMEOUT_SECS))
    }

    pub fn with_timeout(
        endpoint: impl Into<String>,
        token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, GitHubError> {
        let http_client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GitHubError::ClientBuild(e.to_string()))?;

        Ok(Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            token: token.filter(|t| !t.is_empty()),
            http_client,
            timeout,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Endpoint joined with the request's segments, each percent-encoded
    pub fn url_for(&self, request: &ApiRequest) -> Result<Url, GitHubError> {
        let invalid = |message: String| GitHubError::InvalidEndpoint {
            endpoint: self.endpoint.clone(),
            message,
        };

        let mut url = Url::parse(&self.endpoint).map_err(|e| invalid(e.to_string()))?;
        url.path_segments_mut()
            .map_err(|_| invalid("no path".to_string()))?
            .pop_if_empty()
            .extend(&request.segments);
        Ok(url)
    }

    pub async fn send(&self, request: ApiRequest) -> Result<ApiResponse, GitHubError> {
        let url = self.url_for(&request)?;
        debug!(url = %url, query = ?request.query, "GitHub request");

        let response = self
            .http_client
            .get(url.clone())
            .headers(self.headers(&request))
            .query(&request.query)
            .send()
            .await
            .map_err(|e| self.transport_error(&request.path(), e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| self.transport_error(&request.path(), e))?;

        debug!(url = %url, status = status.as_u16(), "GitHub response");
        Ok(ApiResponse { status, body })
    }

    fn headers(&self, request: &ApiRequest) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static(CLIENT_USER_AGENT));
        headers.insert(ACCEPT, HeaderValue::from_static(request.accept));

        if let Some(token) = &self.token {
            if let Ok(value) = HeaderValue::from_str(&format!("token {}", token)) {
                headers.insert(AUTHORIZATION, value);
            }
        }
        if let Some(since) = &request.if_modified_since {
            if let Ok(value) = HeaderValue::from_str(since) {
                headers.insert(IF_MODIFIED_SINCE, value);
            }
        }
        headers
    }

    fn transport_error(&self, path: &str, e: reqwest::Error) -> GitHubError {
        if e.is_timeout() {
            GitHubError::Timeout {
                path: path.to_string(),
                seconds: self.timeout.as_secs(),
            }
        } else {
            GitHubError::Network {
                path: path.to_string(),
                message: e.to_string(),
            }
        }
    }
}
