use metrics::{describe_histogram, histogram, Unit};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle, PrometheusRecorder};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::error::{ObservabilityError, Result};

/// Name of the request latency histogram
pub const REQUEST_DURATION_METRIC: &str = "http_request_duration_seconds";

/// Default bucket boundaries in seconds (`+Inf` is implicit)
pub const DEFAULT_BUCKETS: [f64; 5] = [0.1, 0.2, 0.5, 1.0, 3.0];

/// Upkeep period, same as `PrometheusBuilder` uses for installed recorders
pub const DEFAULT_UPKEEP_INTERVAL: Duration = Duration::from_secs(5);

/// One completed request, as fed to the latency histogram
#[derive(Debug, Clone, PartialEq)]
pub struct LatencyObservation {
    pub method: String,
    /// Route template when known, raw path otherwise
    pub route: String,
    pub status_code: String,
    pub duration_seconds: f64,
}

impl LatencyObservation {
    pub fn new(method: &str, route: &str, status_code: u16, duration: Duration) -> Self {
        Self {
            method: method.to_string(),
            route: route.to_string(),
            status_code: status_code.to_string(),
            duration_seconds: duration.as_secs_f64(),
        }
    }
}

/// Histogram-shaped metrics sink
///
/// Implementations are shared by every in-flight request and must tolerate
/// concurrent calls without blocking.
pub trait LatencyRecorder: Send + Sync {
    fn observe(&self, observation: &LatencyObservation);
}

/// Latency recorder backed by a dedicated Prometheus recorder
///
/// The recorder is built explicitly and owned here rather than installed as
/// the process-global `metrics` recorder, so several instances (one per test,
/// for example) can coexist.
pub struct PrometheusLatencyRecorder {
    recorder: PrometheusRecorder,
    handle: PrometheusHandle,
}

impl PrometheusLatencyRecorder {
    /// Build a recorder whose request histogram uses `buckets` (seconds)
    pub fn new(buckets: &[f64]) -> Result<Self> {
        validate_buckets(buckets)?;

        let recorder = PrometheusBuilder::new()
            .set_buckets_for_metric(Matcher::Full(REQUEST_DURATION_METRIC.to_string()), buckets)?
            .build_recorder();
        let handle = recorder.handle();

        metrics::with_local_recorder(&recorder, || {
            describe_histogram!(
                REQUEST_DURATION_METRIC,
                Unit::Seconds,
                "HTTP request latency in seconds"
            );
        });

        Ok(Self { recorder, handle })
    }

    /// Build a recorder with [`DEFAULT_BUCKETS`]
    pub fn with_default_buckets() -> Result<Self> {
        Self::new(&DEFAULT_BUCKETS)
    }

    /// Handle used by the `/metrics` endpoint
    pub fn handle(&self) -> PrometheusHandle {
        self.handle.clone()
    }

    /// Render the Prometheus text exposition
    pub fn render(&self) -> String {
        self.handle.render()
    }

    /// Spawn the periodic upkeep task on the current Tokio runtime
    ///
    /// Upkeep folds raw histogram samples into their buckets. An owned
    /// recorder gets no upkeep thread of its own, and without this task
    /// samples pile up until the next `/metrics` scrape.
    pub fn spawn_upkeep(&self, period: Duration) -> JoinHandle<()> {
        let handle = self.handle.clone();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                handle.run_upkeep();
            }
        })
    }
}

impl LatencyRecorder for PrometheusLatencyRecorder {
    fn observe(&self, observation: &LatencyObservation) {
        metrics::with_local_recorder(&self.recorder, || {
            histogram!(
                REQUEST_DURATION_METRIC,
                "method" => observation.method.clone(),
                "route" => observation.route.clone(),
                "status_code" => observation.status_code.clone(),
            )
            .record(observation.duration_seconds);
        });
    }
}

/// Check bucket boundaries: non-empty, finite, positive, strictly increasing
pub fn validate_buckets(buckets: &[f64]) -> Result<()> {
    if buckets.is_empty() {
        return Err(ObservabilityError::InvalidBuckets(
            "at least one bucket boundary is required".to_string(),
        ));
    }

    for bound in buckets {
        if !bound.is_finite() || *bound <= 0.0 {
            return Err(ObservabilityError::InvalidBuckets(format!(
                "boundary {} must be a positive finite number",
                bound
            )));
        }
    }

    if let Some(pair) = buckets.windows(2).find(|pair| pair[0] >= pair[1]) {
        return Err(ObservabilityError::InvalidBuckets(format!(
            "boundaries must be strictly increasing ({} >= {})",
            pair[0], pair[1]
        )));
    }

    Ok(())
}
