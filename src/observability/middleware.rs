//! Request observability middleware
//!
//! Wraps every request/response cycle with:
//! - a start event when the request is accepted
//! - a completion event once the response status is final
//! - one latency observation per request
//!
//! The completion half is driven by [`CompletionGuard`], which fires exactly
//! once: explicitly with the final status, or from `Drop` when the handler
//! panicked (500) or the request future was cancelled (499). Through
//! [`observe_requests`] the guard rides along with the response body, so a
//! request completes when its body has been sent, not when the head is ready.

use axum::{
    body::{Body, Bytes},
    extract::{Request, State},
    http::{HeaderName, HeaderValue, Method, StatusCode},
    middleware::Next,
    response::Response,
};
use http_body::{Body as HttpBody, Frame, SizeHint};
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tracing::Instrument;

use super::context::{RequestContext, RequestId, DEFAULT_REQUEST_ID_HEADER};
use super::event::{LogEvent, LogLevel, REQUEST_COMPLETED, REQUEST_STARTED};
use super::sink::LogSink;
use super::INTERNAL_TARGET;
use crate::error::{ObservabilityError, Result, SinkError};
use crate::metrics::{LatencyObservation, LatencyRecorder};

/// Non-standard status recorded when the client went away before a response
pub const CLIENT_CLOSED_REQUEST: u16 = 499;

/// Construction-time settings of a [`RequestObserver`]
#[derive(Debug, Clone)]
pub struct ObserverConfig {
    /// Identifier of the emitting service, stamped on every event
    pub service: String,
    pub request_id_header: HeaderName,
    /// Echo the correlation id on responses that do not carry one
    pub echo_request_id: bool,
}

impl ObserverConfig {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            request_id_header: HeaderName::from_static(DEFAULT_REQUEST_ID_HEADER),
            echo_request_id: true,
        }
    }

    pub fn with_request_id_header(mut self, name: &str) -> Result<Self> {
        self.request_id_header = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| ObservabilityError::InvalidHeaderName(name.to_string()))?;
        Ok(self)
    }

    pub fn with_echo_request_id(mut self, echo: bool) -> Self {
        self.echo_request_id = echo;
        self
    }
}

/// Emits request events and latency observations
///
/// One instance is built at startup and shared by every request; it holds no
/// per-request state.
pub struct RequestObserver {
    config: ObserverConfig,
    log_sink: Arc<dyn LogSink>,
    latency: Arc<dyn LatencyRecorder>,
}

impl RequestObserver {
    pub fn new(
        config: ObserverConfig,
        log_sink: Arc<dyn LogSink>,
        latency: Arc<dyn LatencyRecorder>,
    ) -> Self {
        Self {
            config,
            log_sink,
            latency,
        }
    }

    pub fn service(&self) -> &str {
        &self.config.service
    }

    pub fn request_id_header(&self) -> &HeaderName {
        &self.config.request_id_header
    }

    /// Capture the request context and emit the start event
    pub fn on_request_start<B>(&self, request: &Request<B>) -> RequestContext {
        let context = RequestContext::from_request(request, &self.config.request_id_header);

        let mut event = LogEvent::new(
            LogLevel::Info,
            REQUEST_STARTED,
            self.config.service.as_str(),
            context.started_at(),
            context.correlation_id.as_str(),
        );
        event.method = Some(context.method.clone());
        event.path = Some(context.path.clone());
        event.client_address = context.client_address.clone();
        event.user_agent = context.user_agent.clone();

        self.emit(event, &context.correlation_id);
        context
    }

    /// Emit the completion event and record the latency observation
    ///
    /// Consumes the context, so it cannot run twice for one request.
    pub fn on_request_complete(&self, context: RequestContext, status: StatusCode) {
        self.finish(context, status.as_u16());
    }

    /// Arm a guard that completes `context` exactly once
    pub fn track(self: &Arc<Self>, context: RequestContext) -> CompletionGuard {
        CompletionGuard {
            observer: Arc::clone(self),
            context: Some(context),
        }
    }

    fn finish(&self, context: RequestContext, status_code: u16) {
        let elapsed = context.elapsed();

        let mut event = LogEvent::new(
            LogLevel::Info,
            REQUEST_COMPLETED,
            self.config.service.as_str(),
            context.timestamp_after(elapsed),
            context.correlation_id.as_str(),
        );
        event.method = Some(context.method.clone());
        event.path = Some(context.path.clone());
        event.status_code = Some(status_code);
        event.duration_millis = Some(u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX));

        self.emit(event, &context.correlation_id);

        let observation =
            LatencyObservation::new(&context.method, context.route_label(), status_code, elapsed);
        self.record(&observation, &context.correlation_id);
    }

    // Sink failures stop here. The internal log goes straight to `tracing`
    // and never back through this observer.
    fn emit(&self, event: LogEvent, correlation_id: &str) {
        match panic::catch_unwind(AssertUnwindSafe(|| self.log_sink.write(event))) {
            Ok(Ok(())) => {}
            Ok(Err(SinkError::Saturated)) => {
                tracing::warn!(
                    target: INTERNAL_TARGET,
                    correlation_id = %correlation_id,
                    "Request log sink saturated, event dropped"
                );
            }
            Ok(Err(e)) => {
                tracing::error!(
                    target: INTERNAL_TARGET,
                    correlation_id = %correlation_id,
                    kind = e.kind(),
                    error = %e,
                    "Failed to write request log event"
                );
            }
            Err(_) => {
                tracing::error!(
                    target: INTERNAL_TARGET,
                    correlation_id = %correlation_id,
                    "Request log sink panicked"
                );
            }
        }
    }

    fn record(&self, observation: &LatencyObservation, correlation_id: &str) {
        if panic::catch_unwind(AssertUnwindSafe(|| self.latency.observe(observation))).is_err() {
            tracing::error!(
                target: INTERNAL_TARGET,
                correlation_id = %correlation_id,
                "Latency recorder panicked"
            );
        }
    }
}

/// Completes a request exactly once
///
/// Call [`complete`](Self::complete) with the final status. If the guard is
/// dropped instead, completion still happens: with 500 while unwinding from a
/// panic, with 499 when the request future was cancelled.
pub struct CompletionGuard {
    observer: Arc<RequestObserver>,
    context: Option<RequestContext>,
}

impl CompletionGuard {
    pub fn complete(mut self, status: StatusCode) {
        if let Some(context) = self.context.take() {
            self.observer.finish(context, status.as_u16());
        }
    }
}

impl Drop for CompletionGuard {
    fn drop(&mut self) {
        if let Some(context) = self.context.take() {
            let status_code = if std::thread::panicking() {
                StatusCode::INTERNAL_SERVER_ERROR.as_u16()
            } else {
                CLIENT_CLOSED_REQUEST
            };
            self.observer.finish(context, status_code);
        }
    }
}

/// Axum middleware wiring a [`RequestObserver`] around the downstream service
///
/// ```rust,ignore
/// let app = Router::new()
///     .route("/", get(handler))
///     .layer(CatchPanicLayer::new())
///     .layer(middleware::from_fn_with_state(observer, observe_requests));
/// ```
///
/// Install it outside `CatchPanicLayer` so handler panics reach it as 500
/// responses. For matched routes axum has already recorded `MatchedPath`, so
/// the histogram route label is the template; fallback requests use the raw
/// path.
///
/// Completion waits for the response body: it fires when the body reaches its
/// end, or with 499 when the body is dropped part way (client went away).
/// Responses that carry no body complete as soon as the head is ready.
pub async fn observe_requests(
    State(observer): State<Arc<RequestObserver>>,
    mut request: Request,
    next: Next,
) -> Response {
    let context = observer.on_request_start(&request);
    let correlation_id = context.correlation_id.clone();
    let method = request.method().clone();

    request
        .extensions_mut()
        .insert(RequestId(correlation_id.clone()));

    let span = tracing::info_span!("request", request_id = %correlation_id);
    let guard = observer.track(context);

    let mut response = next.run(request).instrument(span).await;

    if observer.config.echo_request_id {
        let header = observer.request_id_header();
        if !response.headers().contains_key(header) {
            if let Ok(value) = HeaderValue::from_str(&correlation_id) {
                response.headers_mut().insert(header.clone(), value);
            }
        }
    }

    let status = response.status();
    if !has_body(&method, status) || response.body().is_end_stream() {
        guard.complete(status);
        return response;
    }

    response.map(|body| Body::new(ObservedBody::new(body, guard, status)))
}

// HEAD responses and 1xx/204/304 are sent without a body, so the server
// never polls one.
fn has_body(method: &Method, status: StatusCode) -> bool {
    !(method == Method::HEAD
        || status.is_informational()
        || status == StatusCode::NO_CONTENT
        || status == StatusCode::NOT_MODIFIED)
}

/// Response body that completes its request once fully produced
struct ObservedBody {
    inner: Body,
    guard: Option<CompletionGuard>,
    status: StatusCode,
}

impl ObservedBody {
    fn new(inner: Body, guard: CompletionGuard, status: StatusCode) -> Self {
        Self {
            inner,
            guard: Some(guard),
            status,
        }
    }

    fn finish(&mut self) {
        if let Some(guard) = self.guard.take() {
            guard.complete(self.status);
        }
    }
}

impl HttpBody for ObservedBody {
    type Data = Bytes;
    type Error = axum::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<std::result::Result<Frame<Bytes>, axum::Error>>> {
        let this = self.get_mut();
        let polled = Pin::new(&mut this.inner).poll_frame(cx);

        match &polled {
            // A body error after the head went out keeps the status the
            // client already received.
            Poll::Ready(None) | Poll::Ready(Some(Err(_))) => this.finish(),
            Poll::Ready(Some(Ok(_))) if this.inner.is_end_stream() => this.finish(),
            _ => {}
        }

        polled
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

impl Drop for ObservedBody {
    fn drop(&mut self) {
        // Servers stop polling once `is_end_stream` is true
        if self.inner.is_end_stream() {
            self.finish();
        }
        // Otherwise the guard drops unfinished and records 499
    }
}
