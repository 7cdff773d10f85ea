//! Per-request context and correlation identifiers

use axum::extract::{ConnectInfo, MatchedPath};
use axum::http::{header::USER_AGENT, HeaderMap, HeaderName, Request};
use chrono::{DateTime, Utc};
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Default correlation header (header names are case-insensitive)
pub const DEFAULT_REQUEST_ID_HEADER: &str = "x-request-id";

/// Correlation id of the current request
///
/// Inserted into request extensions so handlers can read it:
/// ```rust,ignore
/// async fn handler(Extension(id): Extension<RequestId>) { ... }
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestId(pub String);

impl RequestId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Everything captured when a request is accepted
///
/// Owned by a single middleware invocation and consumed when the completion
/// event is emitted.
#[derive(Debug)]
pub struct RequestContext {
    pub correlation_id: String,
    /// Whether `correlation_id` was generated here rather than received
    pub generated: bool,
    pub method: String,
    pub path: String,
    /// Matched route template, when routing happened before the middleware ran
    pub route: Option<String>,
    pub client_address: Option<String>,
    pub user_agent: Option<String>,
    start: Instant,
    started_at: DateTime<Utc>,
}

impl RequestContext {
    /// Capture the context of an inbound request
    ///
    /// Never fails: a missing, empty or non-UTF-8 correlation header falls back
    /// to a freshly generated identifier.
    pub fn from_request<B>(request: &Request<B>, header: &HeaderName) -> Self {
        let (correlation_id, generated) = match correlation_id_from_headers(request.headers(), header) {
            Some(id) => (id, false),
            None => (generate_correlation_id(), true),
        };

        Self {
            correlation_id,
            generated,
            method: request.method().to_string(),
            path: request.uri().path().to_string(),
            route: request
                .extensions()
                .get::<MatchedPath>()
                .map(|matched| matched.as_str().to_string()),
            client_address: client_address(request),
            user_agent: request
                .headers()
                .get(USER_AGENT)
                .and_then(|v| v.to_str().ok())
                .map(String::from),
            start: Instant::now(),
            started_at: Utc::now(),
        }
    }

    /// Monotonic time since the request was accepted
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Wall-clock instant `elapsed` after the start
    ///
    /// Derived from the monotonic clock so it never precedes `started_at`.
    pub fn timestamp_after(&self, elapsed: Duration) -> DateTime<Utc> {
        self.started_at + chrono::Duration::from_std(elapsed).unwrap_or_else(|_| chrono::Duration::zero())
    }

    /// Histogram route label: the template if known, else the raw path
    pub fn route_label(&self) -> &str {
        self.route.as_deref().unwrap_or(&self.path)
    }
}

/// Read a caller-supplied correlation id, verbatim
pub fn correlation_id_from_headers(headers: &HeaderMap, header: &HeaderName) -> Option<String> {
    headers
        .get(header)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(String::from)
}

/// Fresh random identifier (UUID v4); unique, not a secret
pub fn generate_correlation_id() -> String {
    Uuid::new_v4().to_string()
}

fn client_address<B>(request: &Request<B>) -> Option<String> {
    if let Some(ConnectInfo(addr)) = request.extensions().get::<ConnectInfo<SocketAddr>>() {
        return Some(addr.ip().to_string());
    }

    let headers = request.headers();
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .or_else(|| {
            headers
                .get("x-real-ip")
                .and_then(|v| v.to_str().ok())
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        })
}
