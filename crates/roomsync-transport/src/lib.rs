use std::{
    collections::VecDeque,
    fmt,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
        })
    }
}

/// One request handed to a transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: Vec<(String, String)>,
    /// JSON body, sent as `application/json` when present.
    pub body: Option<Value>,
}

impl HttpRequest {
    pub fn new(method: HttpMethod, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(HttpMethod::Get, url)
    }

    pub fn post(url: impl Into<String>, body: Value) -> Self {
        Self::new(HttpMethod::Post, url).with_body(body)
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// First header value named `name` (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("request failed: {0}")]
    Request(String),
    #[error("server returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("response body is not valid JSON: {0}")]
    InvalidBody(String),
}

/// The HTTP capability the engine consumes. Timeouts and TLS are the
/// implementation's business.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn fetch(&self, request: HttpRequest) -> Result<Value, TransportError>;
}

#[async_trait]
impl<T: HttpTransport + ?Sized> HttpTransport for Arc<T> {
    async fn fetch(&self, request: HttpRequest) -> Result<Value, TransportError> {
        (**self).fetch(request).await
    }
}

/// Adds a fixed set of headers (API token, user agent) to every request.
#[derive(Clone)]
pub struct ScopedTransport<T: HttpTransport> {
    inner: T,
    headers: Vec<(String, String)>,
}

impl<T: HttpTransport> ScopedTransport<T> {
    pub fn new(inner: T) -> Self {
        Self {
            inner,
            headers: Vec::new(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

#[async_trait]
impl<T: HttpTransport> HttpTransport for ScopedTransport<T> {
    async fn fetch(&self, mut request: HttpRequest) -> Result<Value, TransportError> {
        for (name, value) in &self.headers {
            if request.header(name).is_none() {
                request.headers.push((name.clone(), value.clone()));
            }
        }
        self.inner.fetch(request).await
    }
}

#[derive(Debug, Clone)]
struct ScriptedResponse {
    result: Result<Value, TransportError>,
    latency: Duration,
}

#[derive(Debug)]
struct ScriptState {
    queue: VecDeque<ScriptedResponse>,
    fallback: ScriptedResponse,
    requests: Vec<HttpRequest>,
}

/// In-memory transport that records requests and replays queued responses.
///
/// Once the queue is empty every request receives the fallback response.
#[derive(Debug, Clone)]
pub struct ScriptedTransport {
    state: Arc<Mutex<ScriptState>>,
}

impl Default for ScriptedTransport {
    fn default() -> Self {
        Self {
            state: Arc::new(Mutex::new(ScriptState {
                queue: VecDeque::new(),
                fallback: ScriptedResponse {
                    result: Err(TransportError::Request(
                        "no scripted response left".to_owned(),
                    )),
                    latency: Duration::ZERO,
                },
                requests: Vec::new(),
            })),
        }
    }
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut ScriptState) -> R) -> R {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut state)
    }

    pub fn push_ok(&self, body: Value) -> &Self {
        self.push(Ok(body), Duration::ZERO)
    }

    pub fn push_err(&self, err: TransportError) -> &Self {
        self.push(Err(err), Duration::ZERO)
    }

    /// Queue a response that resolves only after `latency`.
    pub fn push_delayed(&self, result: Result<Value, TransportError>, latency: Duration) -> &Self {
        self.push(result, latency)
    }

    /// Response used once the queue is drained.
    pub fn set_fallback(&self, result: Result<Value, TransportError>, latency: Duration) -> &Self {
        self.with_state(|state| state.fallback = ScriptedResponse { result, latency });
        self
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.with_state(|state| state.requests.clone())
    }

    pub fn request_count(&self) -> usize {
        self.with_state(|state| state.requests.len())
    }

    fn push(&self, result: Result<Value, TransportError>, latency: Duration) -> &Self {
        self.with_state(|state| {
            state
                .queue
                .push_back(ScriptedResponse { result, latency })
        });
        self
    }
}

#[async_trait]
impl HttpTransport for ScriptedTransport {
    async fn fetch(&self, request: HttpRequest) -> Result<Value, TransportError> {
        trace!(method = %request.method, url = %request.url, "scripted fetch");
        let response = self.with_state(|state| {
            state.requests.push(request);
            state
                .queue
                .pop_front()
                .unwrap_or_else(|| state.fallback.clone())
        });

        if !response.latency.is_zero() {
            tokio::time::sleep(response.latency).await;
        }
        response.result
    }
}

#[cfg(feature = "reqwest-transport")]
#[derive(Debug, Clone, Default)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

#[cfg(feature = "reqwest-transport")]
impl ReqwestTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a preconfigured client (timeouts, proxies, TLS roots).
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[cfg(feature = "reqwest-transport")]
#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn fetch(&self, request: HttpRequest) -> Result<Value, TransportError> {
        let method = match request.method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Delete => reqwest::Method::DELETE,
        };

        let mut builder = self.client.request(method, &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|err| TransportError::Request(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Status {
                status: status.as_u16(),
                body,
            });
        }

        response
            .json::<Value>()
            .await
            .map_err(|err| TransportError::InvalidBody(err.to_string()))
    }
}
