use crate::credentials::CredentialBundle;
use crate::retry::{Clock, NoJitter, RetryPolicy, Sleeper};
use crate::transport::{BackendError, HttpBackend, OutboundRequest, RawResponse, Transport};
use crate::types::Region;
use async_trait::async_trait;
use bytes::Bytes;
use http::{Method, Request, Response, StatusCode};
use http_body_util::Full;
use hyper::service::service_fn;
use hyper_util::rt::TokioExecutor;
use std::convert::Infallible;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use url::Url;

type Handler = Box<dyn Fn(&OutboundRequest) -> Result<RawResponse, BackendError> + Send + Sync>;

#[derive(Clone, Debug)]
pub struct RecordedRequest {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub username: String,
    pub password: String,
}

impl RecordedRequest {
    pub fn query_value(&self, key: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Backend that answers from a closure and records every request.
pub struct ScriptedBackend {
    handler: Handler,
    calls: Mutex<Vec<RecordedRequest>>,
    advance: Mutex<Option<(Arc<ManualClock>, Duration)>>,
}

impl ScriptedBackend {
    pub fn new<F>(handler: F) -> Arc<Self>
    where
        F: Fn(&OutboundRequest) -> Result<RawResponse, BackendError> + Send + Sync + 'static,
    {
        Arc::new(ScriptedBackend {
            handler: Box::new(handler),
            calls: Mutex::new(Vec::new()),
            advance: Mutex::new(None),
        })
    }

    /// Makes every call move `clock` forward, simulating slow responses.
    pub fn advance_clock_per_call(&self, clock: Arc<ManualClock>, per_call: Duration) {
        *self.advance.lock().unwrap() = Some((clock, per_call));
    }

    pub fn calls(&self) -> Vec<RecordedRequest> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_matching(&self, method: Method, path_fragment: &str) -> Vec<RecordedRequest> {
        self.calls()
            .into_iter()
            .filter(|c| c.method == method && c.path.contains(path_fragment))
            .collect()
    }
}

#[async_trait]
impl HttpBackend for ScriptedBackend {
    async fn send(&self, request: OutboundRequest) -> Result<RawResponse, BackendError> {
        self.calls.lock().unwrap().push(RecordedRequest {
            method: request.method.clone(),
            path: request.url.path().to_string(),
            query: request.query.clone(),
            username: request.username.clone(),
            password: request.password.clone(),
        });
        if let Some((clock, per_call)) = self.advance.lock().unwrap().as_ref() {
            clock.advance(*per_call);
        }
        (self.handler)(&request)
    }
}

/// Clock that only moves when something sleeps on it or it is advanced.
pub struct ManualClock {
    start: Instant,
    offset: Mutex<Duration>,
    sleeps: Mutex<Vec<Duration>>,
}

impl ManualClock {
    pub fn new() -> Arc<Self> {
        Arc::new(ManualClock {
            start: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
            sleeps: Mutex::new(Vec::new()),
        })
    }

    pub fn advance(&self, by: Duration) {
        *self.offset.lock().unwrap() += by;
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().unwrap().clone()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.start + *self.offset.lock().unwrap()
    }
}

#[async_trait]
impl Sleeper for ManualClock {
    async fn sleep(&self, duration: Duration) {
        self.sleeps.lock().unwrap().push(duration);
        self.advance(duration);
    }
}

pub fn raw(status: u16, body: &str) -> RawResponse {
    RawResponse {
        status: StatusCode::from_u16(status).unwrap(),
        retry_after: None,
        body: Bytes::from(body.to_string()),
    }
}

pub fn test_credentials() -> Arc<CredentialBundle> {
    Arc::new(CredentialBundle::new("api-key", "secret-key", 187520, Region::Us).unwrap())
}

pub fn test_policy() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 4,
        base_delay: Duration::from_millis(100),
        max_delay: Duration::from_secs(5),
        multiplier: 2.0,
        jitter: Duration::from_millis(50),
        max_elapsed: Duration::from_secs(60),
        attempt_timeout: Duration::from_secs(30),
    }
}

/// Transport wired to `backend` with a manual clock and no jitter.
pub fn test_transport(backend: Arc<ScriptedBackend>) -> (Transport, Arc<ManualClock>) {
    let clock = ManualClock::new();
    let transport = Transport::new(
        test_credentials(),
        test_policy(),
        Some(Url::parse("http://vendor.test").unwrap()),
    )
    .unwrap()
    .with_backend(backend)
    .with_clock(clock.clone())
    .with_sleeper(clock.clone())
    .with_jitter(Arc::new(NoJitter));

    (transport, clock)
}

/// A request as seen by the mock vendor server.
#[derive(Clone, Debug)]
pub struct MockRequest {
    pub method: Method,
    pub path: String,
    pub query: String,
    pub authorization: Option<String>,
}

pub type MockLog = Arc<Mutex<Vec<MockRequest>>>;

/// Starts an HTTP server on a random local port answering with `respond`.
/// Returns its base URL and the log of requests it received.
pub async fn start_mock_vendor<F>(respond: F) -> (Url, MockLog)
where
    F: Fn(&MockRequest) -> Response<Full<Bytes>> + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let respond = Arc::new(respond);
    let log: MockLog = Arc::new(Mutex::new(Vec::new()));
    let server_log = log.clone();

    tokio::spawn(async move {
        loop {
            let (stream, _) = listener.accept().await.unwrap();
            let io = hyper_util::rt::TokioIo::new(stream);
            let respond = respond.clone();
            let log = server_log.clone();

            tokio::spawn(async move {
                let service = service_fn(move |req: Request<hyper::body::Incoming>| {
                    let seen = MockRequest {
                        method: req.method().clone(),
                        path: req.uri().path().to_string(),
                        query: req.uri().query().unwrap_or_default().to_string(),
                        authorization: req
                            .headers()
                            .get(http::header::AUTHORIZATION)
                            .and_then(|v| v.to_str().ok())
                            .map(String::from),
                    };
                    let response = (*respond)(&seen);
                    log.lock().unwrap().push(seen);
                    async move { Ok::<_, Infallible>(response) }
                });

                let _ = hyper_util::server::conn::auto::Builder::new(TokioExecutor::new())
                    .serve_connection(io, service)
                    .await;
            });
        }
    });

    let url = Url::parse(&format!("http://127.0.0.1:{port}")).unwrap();
    (url, log)
}

pub fn mock_response(status: u16, body: &str) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .header(http::header::CONTENT_TYPE, "application/json")
        .body(Full::new(Bytes::from(body.to_string())))
        .unwrap()
}

/// Transport that talks to `base_url` over real HTTP with short backoff.
pub fn http_transport(base_url: Url) -> Transport {
    let policy = RetryPolicy {
        base_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(50),
        jitter: Duration::ZERO,
        attempt_timeout: Duration::from_secs(5),
        ..test_policy()
    };
    Transport::new(test_credentials(), policy, Some(base_url))
        .unwrap()
        .with_jitter(Arc::new(NoJitter))
}
