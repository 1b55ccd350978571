//! Resilient transport for the remote knowledge-base API
//!
//! One request/response cycle with JSON decoding and a single retry policy
//! shared by every caller:
//! - connection failure or HTTP 5xx: exponential backoff, `base * 2^attempt`, no cap
//! - throttle error envelope: fixed wait, attempt counter reset
//! - permission denial or any other error envelope: returned to the caller
//! - HTTP 4xx: not retried, body returned as-is
//!
//! There is no retry limit. The bot is a long-running batch job; operators
//! bound run time externally.

use async_trait::async_trait;
use gazlink_common::{Error, Result};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

const DEFAULT_BASE_BACKOFF_SECS: u64 = 1;
const DEFAULT_THROTTLE_WAIT_SECS: u64 = 60;

/// Error message names signalling a rate limit
const THROTTLE_MARKERS: &[&str] = &["actionthrottledtext", "ratelimited"];

/// Error message names signalling the agent may not perform the action
const PERMISSION_MARKERS: &[&str] = &[
    "permissiondenied",
    "protectedpagetext",
    "cascadeprotected",
    "blockedtext",
];

/// HTTP method
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

/// Request sent through the transport
///
/// GET parameters go into the query string, POST parameters are form-encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiRequest {
    pub method: Method,
    pub url: String,
    pub params: Vec<(String, String)>,
}

impl ApiRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            url: url.into(),
            params: Vec::new(),
        }
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self {
            method: Method::Post,
            url: url.into(),
            params: Vec::new(),
        }
    }

    /// MediaWiki action request with JSON output (format version 2)
    pub fn action(method: Method, url: impl Into<String>, action: &str) -> Self {
        let base = match method {
            Method::Get => Self::get(url),
            Method::Post => Self::post(url),
        };
        base.param("action", action)
            .param("format", "json")
            .param("formatversion", "2")
    }

    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((key.into(), value.into()));
        self
    }

    /// First value of a parameter, if present
    pub fn param_value(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Undecoded HTTP response
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    pub body: String,
}

impl RawResponse {
    pub fn json(status: u16, body: &Value) -> Self {
        Self {
            status,
            body: body.to_string(),
        }
    }
}

/// Connection-level failure: nothing usable came back
#[derive(Debug, Error)]
#[error("connection failed: {0}")]
pub struct ConnectionError(pub String);

/// The network seam; production uses [`ReqwestBackend`]
#[async_trait]
pub trait HttpBackend: Send + Sync {
    async fn send(&self, request: &ApiRequest) -> std::result::Result<RawResponse, ConnectionError>;
}

/// reqwest-based backend
///
/// The client keeps a cookie store, so the session cookie obtained at login
/// is replayed on every later request made through the same backend.
pub struct ReqwestBackend {
    http_client: reqwest::Client,
}

impl ReqwestBackend {
    pub fn new(user_agent: &str, timeout: Option<Duration>) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .user_agent(user_agent)
            .cookie_store(true);
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let http_client = builder.build().map_err(|e| Error::Http(e.to_string()))?;

        Ok(Self { http_client })
    }
}

#[async_trait]
impl HttpBackend for ReqwestBackend {
    async fn send(&self, request: &ApiRequest) -> std::result::Result<RawResponse, ConnectionError> {
        let builder = match request.method {
            Method::Get => self.http_client.get(&request.url).query(&request.params),
            Method::Post => self.http_client.post(&request.url).form(&request.params),
        };

        let response = builder
            .send()
            .await
            .map_err(|e| ConnectionError(e.to_string()))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| ConnectionError(e.to_string()))?;

        Ok(RawResponse { status, body })
    }
}

/// Classification of an error envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Throttle,
    PermissionDenied,
    Other,
}

/// Decoded `{"error": {...}}` envelope
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorEnvelope {
    pub code: Option<String>,
    pub info: Option<String>,
    /// `error.messages[].name`
    pub messages: Vec<String>,
}

impl ErrorEnvelope {
    fn from_value(error: &Value) -> Self {
        let text = |key: &str| error.get(key).and_then(Value::as_str).map(str::to_string);
        let messages = error
            .get("messages")
            .and_then(Value::as_array)
            .map(|list| {
                list.iter()
                    .filter_map(|m| m.get("name").and_then(Value::as_str))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        Self {
            code: text("code"),
            info: text("info"),
            messages,
        }
    }

    /// Envelope synthesized for a 4xx response without a JSON body
    fn http_status(status: u16, body: &str) -> Self {
        Self {
            code: Some(format!("http-{}", status)),
            info: Some(body.chars().take(200).collect()),
            messages: Vec::new(),
        }
    }

    fn names(&self) -> impl Iterator<Item = &str> {
        self.code.iter().chain(self.messages.iter()).map(String::as_str)
    }

    pub fn kind(&self) -> ErrorKind {
        if self.names().any(|n| THROTTLE_MARKERS.contains(&n)) {
            ErrorKind::Throttle
        } else if self.names().any(|n| PERMISSION_MARKERS.contains(&n)) {
            ErrorKind::PermissionDenied
        } else {
            ErrorKind::Other
        }
    }

    pub fn is_permission_denied(&self) -> bool {
        self.kind() == ErrorKind::PermissionDenied
    }
}

impl fmt::Display for ErrorEnvelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code.as_deref().unwrap_or("unknown"))?;
        if !self.messages.is_empty() {
            write!(f, " [{}]", self.messages.join(", "))?;
        }
        if let Some(info) = &self.info {
            write!(f, ": {}", info)?;
        }
        Ok(())
    }
}

/// Decoded response, validated at the transport boundary
#[derive(Debug, Clone, PartialEq)]
pub enum ApiResponse {
    Ok(Value),
    Error(ErrorEnvelope),
}

impl ApiResponse {
    fn from_value(value: Value) -> Self {
        match value.get("error") {
            Some(error) if error.is_object() => ApiResponse::Error(ErrorEnvelope::from_value(error)),
            _ => ApiResponse::Ok(value),
        }
    }

    /// Payload, or `Error::Remote` for an error envelope
    pub fn into_payload(self) -> Result<Value> {
        match self {
            ApiResponse::Ok(value) => Ok(value),
            ApiResponse::Error(envelope) => Err(Error::Remote(envelope.to_string())),
        }
    }

    /// Deserialize the payload into a typed response
    pub fn decode<T: DeserializeOwned>(self) -> Result<T> {
        let value = self.into_payload()?;
        serde_json::from_value(value).map_err(|e| Error::Decode(e.to_string()))
    }
}

/// Wait schedule for recoverable failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base_backoff: Duration,
    pub throttle_wait: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_backoff: Duration::from_secs(DEFAULT_BASE_BACKOFF_SECS),
            throttle_wait: Duration::from_secs(DEFAULT_THROTTLE_WAIT_SECS),
        }
    }
}

impl RetryPolicy {
    /// Backoff before retry number `attempt + 1` (attempt is 0-indexed)
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        self.base_backoff
            .saturating_mul(2u32.saturating_pow(attempt))
    }
}

/// The one way every component talks to the remote system
#[derive(Clone)]
pub struct Transport {
    backend: Arc<dyn HttpBackend>,
    policy: RetryPolicy,
}

impl Transport {
    pub fn new(backend: Arc<dyn HttpBackend>, policy: RetryPolicy) -> Self {
        Self { backend, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Perform a request, retrying recoverable failures indefinitely
    ///
    /// Returns `Err` only when a non-5xx body cannot be decoded as JSON.
    pub async fn request(&self, request: &ApiRequest) -> Result<ApiResponse> {
        let mut attempt: u32 = 0;
        let action = request.param_value("action").unwrap_or("-");

        loop {
            let raw = match self.backend.send(request).await {
                Ok(raw) => raw,
                Err(e) => {
                    self.backoff(action, attempt, &e.to_string()).await;
                    attempt = attempt.saturating_add(1);
                    continue;
                }
            };

            if raw.status >= 500 {
                self.backoff(action, attempt, &format!("HTTP {}", raw.status))
                    .await;
                attempt = attempt.saturating_add(1);
                continue;
            }

            let value: Value = match serde_json::from_str(&raw.body) {
                Ok(value) => value,
                Err(_) if raw.status >= 400 => {
                    let envelope = ErrorEnvelope::http_status(raw.status, &raw.body);
                    warn!(action, error = %envelope, "Request rejected");
                    return Ok(ApiResponse::Error(envelope));
                }
                Err(e) => {
                    return Err(Error::Decode(format!(
                        "{} response is not JSON: {}",
                        action, e
                    )))
                }
            };

            // 4xx is never retried, even when the body names a throttle
            if raw.status >= 400 {
                let response = ApiResponse::from_value(value);
                if let ApiResponse::Error(envelope) = &response {
                    warn!(action, status = raw.status, error = %envelope, "Request rejected");
                }
                return Ok(response);
            }

            match ApiResponse::from_value(value) {
                ApiResponse::Error(envelope) => match envelope.kind() {
                    ErrorKind::Throttle => {
                        let wait = self.policy.throttle_wait;
                        warn!(
                            action,
                            wait_secs = wait.as_secs(),
                            error = %envelope,
                            "Throttled by remote, waiting before retry"
                        );
                        tokio::time::sleep(wait).await;
                        attempt = 0;
                    }
                    ErrorKind::PermissionDenied => {
                        warn!(action, error = %envelope, "Permission denied");
                        return Ok(ApiResponse::Error(envelope));
                    }
                    ErrorKind::Other => {
                        warn!(action, error = %envelope, "Remote returned an error");
                        return Ok(ApiResponse::Error(envelope));
                    }
                },
                ok => {
                    if attempt > 0 {
                        debug!(action, attempt, "Request succeeded after retry");
                    }
                    return Ok(ok);
                }
            }
        }
    }

    async fn backoff(&self, action: &str, attempt: u32, reason: &str) {
        let wait = self.policy.backoff_delay(attempt);
        warn!(
            action,
            attempt,
            wait_secs = wait.as_secs(),
            reason,
            "Transient failure, backing off"
        );
        tokio::time::sleep(wait).await;
    }
}
