//! HTTP transport capability.
//!
//! The session only needs "send this request, give me status and body". The
//! [`HttpTransport`] trait captures that contract so the session logic can
//! be exercised without a network; [`ReqwestTransport`] is the production
//! implementation.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::error::{AuthError, Result};

pub use reqwest::Method;

/// A request handed to the transport.
#[derive(Clone)]
pub struct HttpRequest {
    /// HTTP method.
    pub method: Method,
    /// Absolute URL without query string.
    pub url: String,
    /// Request headers.
    pub headers: Vec<(String, String)>,
    /// Query parameters.
    pub params: Vec<(String, String)>,
    /// JSON body.
    pub body: Option<Value>,
}

impl HttpRequest {
    /// Create a request with no headers, parameters or body.
    #[must_use]
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            params: Vec::new(),
            body: None,
        }
    }

    /// Add a header.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Add query parameters.
    #[must_use]
    pub fn query<K: AsRef<str>, V: AsRef<str>>(mut self, params: &[(K, V)]) -> Self {
        self.params.extend(
            params
                .iter()
                .map(|(k, v)| (k.as_ref().to_string(), v.as_ref().to_string())),
        );
        self
    }

    /// Attach a JSON body.
    #[must_use]
    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Look a header up by case-insensitive name.
    #[must_use]
    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

impl fmt::Debug for HttpRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let headers: Vec<(&str, &str)> = self
            .headers
            .iter()
            .map(|(k, v)| {
                if k.eq_ignore_ascii_case("authorization") {
                    (k.as_str(), "<redacted>")
                } else {
                    (k.as_str(), v.as_str())
                }
            })
            .collect();

        f.debug_struct("HttpRequest")
            .field("method", &self.method)
            .field("url", &self.url)
            .field("headers", &headers)
            .field("params", &self.params)
            .field("has_body", &self.body.is_some())
            .finish()
    }
}

/// A response returned by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// HTTP status code.
    pub status: u16,
    /// Raw response body.
    pub body: String,
}

impl HttpResponse {
    /// Create a response.
    #[must_use]
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// Returns true for 2xx statuses.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }

    /// Parse the body as JSON; an empty body is an empty document.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::InvalidResponse` if the body is not valid JSON.
    pub fn json(&self) -> Result<Value> {
        if self.body.trim().is_empty() {
            return Ok(Value::Object(Map::new()));
        }
        serde_json::from_str(&self.body).map_err(|e| AuthError::InvalidResponse(e.to_string()))
    }

    /// Best-effort error message: the `error` or `message` field of a JSON
    /// body, else the raw body, else the status.
    #[must_use]
    pub fn error_message(&self) -> String {
        if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(&self.body) {
            for field in ["error", "message", "detail"] {
                match map.get(field) {
                    Some(Value::String(s)) => return s.clone(),
                    Some(Value::Null) | None => {}
                    Some(other) => return other.to_string(),
                }
            }
        }

        let body = self.body.trim();
        if body.is_empty() {
            format!("HTTP {}", self.status)
        } else {
            body.to_string()
        }
    }

    /// Convert into a parsed document, or an error carrying status and message.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::RemoteApi` for non-2xx statuses and
    /// `AuthError::InvalidResponse` for unparsable bodies.
    pub fn into_document(self) -> Result<Value> {
        if self.is_success() {
            self.json()
        } else {
            Err(AuthError::RemoteApi {
                status: self.status,
                message: self.error_message(),
            })
        }
    }
}

/// Trait for sending HTTP requests.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Send a request and return the response, whatever its status.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Transport` if no response was received.
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse>;
}

/// Production transport backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Create a transport with the given request timeout.
    ///
    /// # Panics
    ///
    /// Panics if the HTTP client cannot be created (should never happen with default TLS).
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(5))
            .build()
            .expect("failed to create HTTP client");

        Self { client }
    }

    /// Create a transport around an existing `reqwest` client.
    #[must_use]
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        let mut builder = self.client.request(request.method.clone(), &request.url);

        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if !request.params.is_empty() {
            builder = builder.query(&request.params);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| AuthError::Transport(format!("request failed: {e}")))?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| AuthError::Transport(format!("failed to read body: {e}")))?;

        tracing::trace!(method = %request.method, url = %request.url, status, "HTTP exchange");

        Ok(HttpResponse { status, body })
    }
}

/// A scripted transport for testing.
///
/// Responses are registered per method and URL and served in order; the last
/// response for a route repeats once the queue is drained. Unregistered
/// routes answer 404. Every request is recorded.
#[cfg(any(test, feature = "test-utils"))]
#[derive(Default)]
pub struct MockTransport {
    routes: parking_lot::Mutex<Vec<MockRoute>>,
    requests: parking_lot::Mutex<Vec<HttpRequest>>,
}

#[cfg(any(test, feature = "test-utils"))]
struct MockRoute {
    method: Method,
    url: String,
    responses: std::collections::VecDeque<HttpResponse>,
}

#[cfg(any(test, feature = "test-utils"))]
impl MockTransport {
    /// Create a transport with no routes.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a response for `method` + `url`.
    pub fn respond(&self, method: Method, url: &str, status: u16, body: impl Into<String>) {
        let response = HttpResponse::new(status, body);
        let mut routes = self.routes.lock();
        if let Some(route) = routes.iter_mut().find(|r| r.method == method && r.url == url) {
            route.responses.push_back(response);
        } else {
            routes.push(MockRoute {
                method,
                url: url.to_string(),
                responses: std::iter::once(response).collect(),
            });
        }
    }

    /// Queue a JSON response for `method` + `url`.
    pub fn respond_json(&self, method: Method, url: &str, status: u16, body: &Value) {
        self.respond(method, url, status, body.to_string());
    }

    /// All requests sent so far.
    #[must_use]
    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().clone()
    }

    /// Number of requests sent to `method` + `url`.
    #[must_use]
    pub fn count(&self, method: &Method, url: &str) -> usize {
        self.requests
            .lock()
            .iter()
            .filter(|r| r.method == *method && r.url == url)
            .count()
    }

    /// Number of requests that are not `GET`.
    #[must_use]
    pub fn mutating_count(&self) -> usize {
        self.requests
            .lock()
            .iter()
            .filter(|r| r.method != Method::GET)
            .count()
    }
}

#[cfg(any(test, feature = "test-utils"))]
#[async_trait]
impl HttpTransport for MockTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        let response = {
            let mut routes = self.routes.lock();
            routes
                .iter_mut()
                .find(|r| r.method == request.method && r.url == request.url)
                .and_then(|route| {
                    if route.responses.len() > 1 {
                        route.responses.pop_front()
                    } else {
                        route.responses.front().cloned()
                    }
                })
                .unwrap_or_else(|| HttpResponse::new(404, r#"{"error":"no route"}"#))
        };

        self.requests.lock().push(request);
        Ok(response)
    }
}
