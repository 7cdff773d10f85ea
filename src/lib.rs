pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod observability;
pub mod server;
pub mod signals;

pub use crate::error::{ObservabilityError, SinkError};
pub use crate::metrics::{LatencyObservation, LatencyRecorder, PrometheusLatencyRecorder};
pub use crate::observability::{
    observe_requests, LogEvent, LogSink, ObserverConfig, RequestContext, RequestId,
    RequestObserver,
};

use crate::config::LogFormat;
use tracing::Subscriber;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, fmt::MakeWriter, prelude::*, EnvFilter};

/// Initialize tracing/logging
///
/// Lines are handed to a background thread that owns stdout, so a slow
/// terminal or pipe never holds up request handling. `RUST_LOG` takes
/// precedence over `level`.
///
/// Returns a [`WorkerGuard`] that must be held for the lifetime of the
/// process; dropping it flushes buffered lines.
///
/// Note: This function can only be called once.
pub fn init_tracing(level: &str, format: LogFormat) -> WorkerGuard {
    let (writer, guard) = tracing_appender::non_blocking(std::io::stdout());
    build_subscriber(level, format, writer).init();
    guard
}

/// Subscriber used by [`init_tracing`], writing to `writer`
///
/// With [`LogFormat::Json`] every line is a flat JSON object, which keeps
/// access events from [`TracingSink`](observability::TracingSink)
/// machine-readable.
pub fn build_subscriber<W>(level: &str, format: LogFormat, writer: W) -> impl Subscriber + Send + Sync + 'static
where
    W: for<'writer> MakeWriter<'writer> + Clone + Send + Sync + 'static,
{
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let json_layer = (format == LogFormat::Json).then(|| {
        fmt::layer()
            .json()
            .flatten_event(true)
            .with_current_span(true)
            .with_span_list(false)
            .with_target(true)
            .with_writer(writer.clone())
    });
    let text_layer = (format == LogFormat::Text).then(|| {
        fmt::layer().with_target(true).with_writer(writer)
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(json_layer)
        .with(text_layer)
}
