use crate::config::ConfigurationError;
use crate::credentials::CredentialBundle;
use crate::metrics_defs::{TRANSPORT_ATTEMPTS, TRANSPORT_GIVE_UPS, TRANSPORT_RETRIES};
use crate::retry::{
    Clock, FailureClass, Jitter, RandomJitter, RetryDecision, RetryPolicy, Sleeper, SystemClock,
    TokioSleeper,
};
use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, Method, StatusCode};
use serde::de::DeserializeOwned;
use shared::counter;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

// Error bodies are kept for diagnostics only.
const MAX_ERROR_BODY: usize = 512;

/// A single attempt as handed to the [`HttpBackend`].
pub struct OutboundRequest {
    pub method: Method,
    pub url: Url,
    pub query: Vec<(String, String)>,
    pub body: Option<serde_json::Value>,
    pub username: String,
    pub password: String,
    pub timeout: Duration,
}

impl fmt::Debug for OutboundRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutboundRequest")
            .field("method", &self.method)
            .field("url", &self.url.as_str())
            .field("query", &self.query)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

#[derive(Clone, Debug)]
pub struct RawResponse {
    pub status: StatusCode,
    pub retry_after: Option<Duration>,
    pub body: Bytes,
}

/// A successful (2xx) vendor response.
#[derive(Clone, Debug)]
pub struct VendorResponse {
    pub status: StatusCode,
    pub body: Bytes,
    /// Attempts it took to get this response, including the successful one.
    pub attempts: u32,
}

impl VendorResponse {
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("request timed out")]
    Timeout,
    #[error("network error: {0}")]
    Network(String),
}

impl From<reqwest::Error> for BackendError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            BackendError::Timeout
        } else {
            BackendError::Network(err.to_string())
        }
    }
}

/// Sends one attempt over the wire. Retrying is the transport's job.
#[async_trait]
pub trait HttpBackend: Send + Sync {
    async fn send(&self, request: OutboundRequest) -> Result<RawResponse, BackendError>;
}

#[derive(Clone, Default)]
pub struct ReqwestBackend {
    client: reqwest::Client,
}

impl ReqwestBackend {
    pub fn new() -> Self {
        ReqwestBackend {
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl HttpBackend for ReqwestBackend {
    async fn send(&self, request: OutboundRequest) -> Result<RawResponse, BackendError> {
        let mut builder = self
            .client
            .request(request.method, request.url)
            .basic_auth(request.username, Some(request.password))
            .timeout(request.timeout);

        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await?;
        let status = response.status();
        let retry_after = parse_retry_after(response.headers());
        let body = response.bytes().await?;

        Ok(RawResponse {
            status,
            retry_after,
            body,
        })
    }
}

/// Reads a `Retry-After` header given in seconds. HTTP dates are ignored.
pub fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(http::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("request timed out after {attempts} attempt(s)")]
    Timeout { attempts: u32 },
    #[error("rate limited after {attempts} attempt(s)")]
    RateLimited { attempts: u32 },
    #[error("server error {status} after {attempts} attempt(s)")]
    ServerError { status: StatusCode, attempts: u32 },
    #[error("client error {status}: {body}")]
    ClientError {
        status: StatusCode,
        attempts: u32,
        body: String,
    },
    #[error("network error after {attempts} attempt(s): {message}")]
    NetworkError { message: String, attempts: u32 },
    #[error("invalid URL: {0}")]
    InvalidUrl(String),
}

impl TransportError {
    /// Last HTTP status seen, if the vendor answered at all.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            TransportError::RateLimited { .. } => Some(StatusCode::TOO_MANY_REQUESTS),
            TransportError::ServerError { status, .. }
            | TransportError::ClientError { status, .. } => Some(*status),
            TransportError::Timeout { .. }
            | TransportError::NetworkError { .. }
            | TransportError::InvalidUrl(_) => None,
        }
    }

    pub fn attempts(&self) -> u32 {
        match self {
            TransportError::Timeout { attempts }
            | TransportError::RateLimited { attempts }
            | TransportError::ServerError { attempts, .. }
            | TransportError::ClientError { attempts, .. }
            | TransportError::NetworkError { attempts, .. } => *attempts,
            TransportError::InvalidUrl(_) => 0,
        }
    }

    /// Short, non-technical explanation for reports.
    pub fn explanation(&self) -> &'static str {
        match self {
            TransportError::Timeout { .. } => "request timed out",
            TransportError::RateLimited { .. } => "rate limited",
            TransportError::ServerError { .. } => "vendor service error",
            TransportError::ClientError { status, .. } => match *status {
                StatusCode::UNAUTHORIZED => "authentication failed",
                StatusCode::FORBIDDEN => "insufficient permissions",
                StatusCode::NOT_FOUND => "chart no longer exists",
                _ => "request rejected by vendor",
            },
            TransportError::NetworkError { .. } => "network error",
            TransportError::InvalidUrl(_) => "invalid request URL",
        }
    }
}

enum AttemptFailure {
    Status {
        status: StatusCode,
        retry_after: Option<Duration>,
        body: Bytes,
    },
    Timeout,
    Network(String),
}

impl AttemptFailure {
    fn class(&self) -> FailureClass {
        match self {
            AttemptFailure::Status {
                status,
                retry_after,
                ..
            } => FailureClass::from_status(*status, *retry_after),
            AttemptFailure::Timeout => FailureClass::Timeout,
            AttemptFailure::Network(_) => FailureClass::Network,
        }
    }

    fn into_error(self, attempts: u32) -> TransportError {
        match self {
            AttemptFailure::Status { status, body, .. } => {
                if status == StatusCode::TOO_MANY_REQUESTS {
                    TransportError::RateLimited { attempts }
                } else if status.is_server_error() {
                    TransportError::ServerError { status, attempts }
                } else {
                    let mut body = String::from_utf8_lossy(&body).into_owned();
                    if body.len() > MAX_ERROR_BODY {
                        let mut cut = MAX_ERROR_BODY;
                        while !body.is_char_boundary(cut) {
                            cut -= 1;
                        }
                        body.truncate(cut);
                    }
                    TransportError::ClientError {
                        status,
                        attempts,
                        body,
                    }
                }
            }
            AttemptFailure::Timeout => TransportError::Timeout { attempts },
            AttemptFailure::Network(message) => TransportError::NetworkError { message, attempts },
        }
    }
}

/// Authenticated vendor client with bounded retries.
///
/// Every call is sent with Basic auth built from the credential bundle to the
/// region host (or the configured override). Network errors, timeouts, 429 and
/// 5xx responses are retried according to the [`RetryPolicy`]; every other
/// non-2xx status is returned immediately.
pub struct Transport {
    backend: Arc<dyn HttpBackend>,
    credentials: Arc<CredentialBundle>,
    base_url: Url,
    policy: RetryPolicy,
    clock: Arc<dyn Clock>,
    sleeper: Arc<dyn Sleeper>,
    jitter: Arc<dyn Jitter>,
}

impl Transport {
    pub fn new(
        credentials: Arc<CredentialBundle>,
        policy: RetryPolicy,
        base_url: Option<Url>,
    ) -> Result<Self, ConfigurationError> {
        let base_url = match base_url {
            Some(url) => url,
            None => Url::parse(credentials.region().base_url())
                .map_err(|e| ConfigurationError::InvalidBaseUrl(e.to_string()))?,
        };

        Ok(Transport {
            backend: Arc::new(ReqwestBackend::new()),
            credentials,
            base_url: normalize_base_url(base_url)?,
            policy,
            clock: Arc::new(SystemClock),
            sleeper: Arc::new(TokioSleeper),
            jitter: Arc::new(RandomJitter),
        })
    }

    pub fn with_backend(mut self, backend: Arc<dyn HttpBackend>) -> Self {
        self.backend = backend;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn with_jitter(mut self, jitter: Arc<dyn Jitter>) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn credentials(&self) -> &CredentialBundle {
        &self.credentials
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Performs one logical call, retrying as the policy allows.
    ///
    /// `path` is relative to the base URL.
    pub async fn execute(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        payload: Option<&serde_json::Value>,
    ) -> Result<VendorResponse, TransportError> {
        let url = self
            .base_url
            .join(path.trim_start_matches('/'))
            .map_err(|e| TransportError::InvalidUrl(e.to_string()))?;
        let query: Vec<(String, String)> = query
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect();

        let started = self.clock.now();
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            counter!(TRANSPORT_ATTEMPTS).increment(1);
            tracing::debug!(%method, path, attempt, "sending vendor request");

            let request = OutboundRequest {
                method: method.clone(),
                url: url.clone(),
                query: query.clone(),
                body: payload.cloned(),
                username: self.credentials.api_key().to_string(),
                password: self.credentials.secret_key().to_string(),
                timeout: self.policy.attempt_timeout,
            };

            let failure = match self.backend.send(request).await {
                Ok(raw) if raw.status.is_success() => {
                    return Ok(VendorResponse {
                        status: raw.status,
                        body: raw.body,
                        attempts: attempt,
                    });
                }
                Ok(raw) => AttemptFailure::Status {
                    status: raw.status,
                    retry_after: raw.retry_after,
                    body: raw.body,
                },
                Err(BackendError::Timeout) => AttemptFailure::Timeout,
                Err(BackendError::Network(message)) => AttemptFailure::Network(message),
            };

            let class = failure.class();
            let elapsed = self.clock.now().saturating_duration_since(started);
            let jitter = self.jitter.sample(self.policy.jitter);

            match self.policy.decide(attempt, elapsed, &class, jitter) {
                RetryDecision::RetryAfter(delay) => {
                    counter!(TRANSPORT_RETRIES).increment(1);
                    tracing::warn!(
                        path,
                        attempt,
                        failure = ?class,
                        delay_ms = delay.as_millis() as u64,
                        "vendor call failed, retrying"
                    );
                    self.sleeper.sleep(delay).await;
                }
                RetryDecision::GiveUp => {
                    let err = failure.into_error(attempt);
                    if class.is_retryable() {
                        counter!(TRANSPORT_GIVE_UPS).increment(1);
                    }
                    tracing::debug!(path, attempt, error = %err, "vendor call failed");
                    return Err(err);
                }
            }
        }
    }
}

fn normalize_base_url(mut url: Url) -> Result<Url, ConfigurationError> {
    if url.cannot_be_a_base() || !matches!(url.scheme(), "http" | "https") {
        return Err(ConfigurationError::InvalidBaseUrl(url.to_string()));
    }
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}
