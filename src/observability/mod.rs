//! Request observability for HTTP services
//!
//! ## Data Flow
//!
//! ```text
//! inbound request
//!     → middleware (start event, correlation id, RequestId extension)
//!     → downstream handler
//!     → middleware (completion event, latency observation)
//!     → LogSink + LatencyRecorder
//! ```
//!
//! Start and completion events share one correlation id: the caller's
//! `X-Request-ID` when present, otherwise a generated UUID v4.

pub mod context;
pub mod event;
pub mod middleware;
pub mod sink;

pub use context::{RequestContext, RequestId, DEFAULT_REQUEST_ID_HEADER};
pub use event::{LogEvent, LogLevel};
pub use middleware::{observe_requests, CompletionGuard, ObserverConfig, RequestObserver};
pub use sink::{LogSink, MemorySink, StreamSink, TracingSink};

/// `tracing` target of request events emitted by [`TracingSink`]
pub const ACCESS_TARGET: &str = "request_observability::access";

/// `tracing` target of the middleware's own failure reports
pub const INTERNAL_TARGET: &str = "request_observability::internal";
