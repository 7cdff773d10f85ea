/// Tests for the tracing subscriber used by the demo service
use axum::{body::Body, http::Request, middleware, routing::get, Router};
use request_observability::{
    build_subscriber,
    config::LogFormat,
    observability::{observe_requests, ObserverConfig, RequestObserver, TracingSink},
    PrometheusLatencyRecorder,
};
use std::io;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tower::ServiceExt;

/// Writer that takes 250ms per write, like a stalled terminal or pipe
#[derive(Clone, Default)]
struct SlowWriter {
    written: Arc<Mutex<Vec<u8>>>,
}

impl io::Write for SlowWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        std::thread::sleep(Duration::from_millis(250));
        self.written.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[derive(Clone, Default)]
struct CaptureWriter {
    written: Arc<Mutex<Vec<u8>>>,
}

impl io::Write for CaptureWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.written.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn tracing_app() -> Router {
    let recorder = Arc::new(PrometheusLatencyRecorder::with_default_buckets().unwrap());
    let observer = Arc::new(RequestObserver::new(
        ObserverConfig::new("logging-test"),
        Arc::new(TracingSink),
        recorder,
    ));

    Router::new()
        .route("/ok", get(|| async { "ok" }))
        .layer(middleware::from_fn_with_state(observer, observe_requests))
}

fn get_ok() -> Request<Body> {
    Request::builder()
        .uri("/ok")
        .header("x-request-id", "log-1")
        .body(Body::empty())
        .unwrap()
}

#[tokio::test]
async fn test_slow_log_writer_does_not_delay_requests() {
    let (writer, guard) = tracing_appender::non_blocking(SlowWriter::default());
    let subscriber = build_subscriber("info", LogFormat::Json, writer);
    let _default = tracing::subscriber::set_default(subscriber);

    let started = Instant::now();
    let response = tracing_app().oneshot(get_ok()).await.unwrap();
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let elapsed = started.elapsed();

    assert!(
        elapsed < Duration::from_millis(200),
        "request took {:?} with a slow log writer",
        elapsed
    );

    drop(guard);
}

#[tokio::test]
async fn test_json_access_line_has_single_timestamp() {
    let capture = CaptureWriter::default();
    let make_writer = {
        let capture = capture.clone();
        move || capture.clone()
    };
    let subscriber = build_subscriber("info", LogFormat::Json, make_writer);
    let _default = tracing::subscriber::set_default(subscriber);

    let response = tracing_app().oneshot(get_ok()).await.unwrap();
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();

    let output = String::from_utf8(capture.written.lock().unwrap().clone()).unwrap();
    let access_lines: Vec<&str> = output
        .lines()
        .filter(|line| line.contains("request_observability::access"))
        .collect();
    assert_eq!(access_lines.len(), 2);

    for line in access_lines {
        assert_eq!(line.matches("\"timestamp\"").count(), 1, "{}", line);
        assert!(line.contains("\"event_timestamp\""));
        assert!(line.contains("\"correlation_id\":\"log-1\""));
    }
}
