//! Log sinks for request events
//!
//! A sink receives every start and completion event. Writes are
//! fire-and-forget: the middleware ignores the result apart from a minimal
//! internal error log, so a slow or broken sink never touches the response.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc::{self, error::TrySendError};

use super::event::{LogEvent, LogLevel};
use super::{ACCESS_TARGET, INTERNAL_TARGET};
use crate::error::SinkError;

/// Destination for structured request events
pub trait LogSink: Send + Sync {
    /// Hand one event to the sink without waiting on I/O
    fn write(&self, event: LogEvent) -> Result<(), SinkError>;
}

/// Sink that re-emits events through `tracing`
///
/// Events land on the `request_observability::access` target, so the installed
/// subscriber decides format (json or text) and filtering.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn write(&self, event: LogEvent) -> Result<(), SinkError> {
        match event.level {
            LogLevel::Info => tracing::info!(
                target: ACCESS_TARGET,
                service = %event.service,
                event_timestamp = %event.timestamp,
                correlation_id = %event.correlation_id,
                method = event.method.as_deref(),
                path = event.path.as_deref(),
                client_address = event.client_address.as_deref(),
                user_agent = event.user_agent.as_deref(),
                status_code = event.status_code,
                duration_ms = event.duration_millis,
                "{}",
                event.message
            ),
            LogLevel::Error => tracing::error!(
                target: ACCESS_TARGET,
                service = %event.service,
                event_timestamp = %event.timestamp,
                correlation_id = %event.correlation_id,
                method = event.method.as_deref(),
                path = event.path.as_deref(),
                client_address = event.client_address.as_deref(),
                user_agent = event.user_agent.as_deref(),
                status_code = event.status_code,
                duration_ms = event.duration_millis,
                "{}",
                event.message
            ),
        }

        Ok(())
    }
}

/// Sink that writes JSON lines to an async writer from a background task
///
/// Events are serialized on the caller's thread and queued on a bounded
/// channel. When the queue is full the event is dropped and counted; the
/// caller is never made to wait.
#[derive(Clone)]
pub struct StreamSink {
    sender: mpsc::Sender<Vec<u8>>,
    dropped: Arc<AtomicU64>,
}

impl StreamSink {
    /// Spawn the writer task on the current Tokio runtime
    ///
    /// # Arguments
    ///
    /// * `writer` - Destination of the JSON lines
    /// * `capacity` - Max queued events before new ones are dropped
    /// * `batch_size` - Lines buffered before a write is forced
    /// * `flush_interval` - Max time a buffered line waits
    pub fn spawn<W>(writer: W, capacity: usize, batch_size: usize, flush_interval: Duration) -> Self
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(capacity.max(1));

        tokio::spawn(async move {
            writer_task(writer, rx, batch_size.max(1), flush_interval).await;
        });

        Self {
            sender: tx,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// JSON lines on stdout
    pub fn stdout(capacity: usize, batch_size: usize, flush_interval: Duration) -> Self {
        Self::spawn(tokio::io::stdout(), capacity, batch_size, flush_interval)
    }

    /// Number of events dropped because the queue was full
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl LogSink for StreamSink {
    fn write(&self, event: LogEvent) -> Result<(), SinkError> {
        let mut line = serde_json::to_vec(&event)?;
        line.push(b'\n');

        match self.sender.try_send(line) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                Err(SinkError::Saturated)
            }
            Err(TrySendError::Closed(_)) => Err(SinkError::Closed),
        }
    }
}

async fn writer_task<W>(
    mut writer: W,
    mut rx: mpsc::Receiver<Vec<u8>>,
    batch_size: usize,
    flush_interval: Duration,
) where
    W: AsyncWrite + Unpin,
{
    let mut buffer: Vec<u8> = Vec::new();
    let mut pending = 0usize;

    let mut flush_timer = tokio::time::interval(flush_interval);
    flush_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            msg = rx.recv() => match msg {
                Some(line) => {
                    buffer.extend_from_slice(&line);
                    pending += 1;

                    if pending >= batch_size {
                        flush_lines(&mut writer, &mut buffer, &mut pending).await;
                    }
                }
                // All senders gone: write what is left and stop
                None => {
                    flush_lines(&mut writer, &mut buffer, &mut pending).await;
                    break;
                }
            },

            _ = flush_timer.tick() => {
                if pending > 0 {
                    flush_lines(&mut writer, &mut buffer, &mut pending).await;
                }
            }
        }
    }

    tracing::debug!(target: INTERNAL_TARGET, "Request log writer task shutting down");
}

async fn flush_lines<W>(writer: &mut W, buffer: &mut Vec<u8>, pending: &mut usize)
where
    W: AsyncWrite + Unpin,
{
    if buffer.is_empty() {
        return;
    }

    let result = async {
        writer.write_all(buffer.as_slice()).await?;
        writer.flush().await
    }
    .await;

    if let Err(e) = result {
        tracing::error!(
            target: INTERNAL_TARGET,
            error = %e,
            count = *pending,
            "Failed to write request log batch"
        );
    }

    buffer.clear();
    *pending = 0;
}

/// In-memory sink, mostly useful to assert on emitted events
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    events: Arc<Mutex<Vec<LogEvent>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every event written so far, in write order
    pub fn events(&self) -> Vec<LogEvent> {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Events sharing one correlation id, in write order
    pub fn events_for(&self, correlation_id: &str) -> Vec<LogEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.correlation_id == correlation_id)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl LogSink for MemorySink {
    fn write(&self, event: LogEvent) -> Result<(), SinkError> {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(event);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observability::event::{REQUEST_COMPLETED, REQUEST_STARTED};
    use chrono::Utc;
    use tokio::io::{AsyncBufReadExt, BufReader};

    fn event(message: &str, id: &str) -> LogEvent {
        LogEvent::new(LogLevel::Info, message, "test-service", Utc::now(), id)
    }

    #[test]
    fn test_memory_sink_records_in_order() {
        let sink = MemorySink::new();
        assert!(sink.is_empty());

        sink.write(event(REQUEST_STARTED, "a")).unwrap();
        sink.write(event(REQUEST_STARTED, "b")).unwrap();
        sink.write(event(REQUEST_COMPLETED, "a")).unwrap();

        assert_eq!(sink.len(), 3);
        let for_a = sink.events_for("a");
        assert_eq!(for_a.len(), 2);
        assert_eq!(for_a[0].message, REQUEST_STARTED);
        assert_eq!(for_a[1].message, REQUEST_COMPLETED);
    }

    #[test]
    fn test_tracing_sink_never_fails() {
        let mut completion = event(REQUEST_COMPLETED, "abc");
        completion.status_code = Some(200);
        completion.duration_millis = Some(3);
        assert!(TracingSink.write(completion).is_ok());

        let mut failure = event("request log failure", "abc");
        failure.level = LogLevel::Error;
        assert!(TracingSink.write(failure).is_ok());
    }

    #[tokio::test]
    async fn test_stream_sink_writes_json_lines() {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let sink = StreamSink::spawn(client, 16, 2, Duration::from_millis(20));

        for i in 0..3 {
            sink.write(event(REQUEST_STARTED, &format!("req-{}", i))).unwrap();
        }

        let mut lines = BufReader::new(server).lines();
        for i in 0..3 {
            let line = tokio::time::timeout(Duration::from_secs(2), lines.next_line())
                .await
                .expect("line not flushed in time")
                .unwrap()
                .unwrap();
            let parsed: LogEvent = serde_json::from_str(&line).unwrap();
            assert_eq!(parsed.correlation_id, format!("req-{}", i));
            assert_eq!(parsed.service, "test-service");
        }
        assert_eq!(sink.dropped(), 0);
    }

    #[tokio::test]
    async fn test_stream_sink_drops_when_saturated() {
        // Current-thread runtime: the writer task cannot drain the queue
        // until this test yields.
        let (client, _server) = tokio::io::duplex(64 * 1024);
        let sink = StreamSink::spawn(client, 2, 10, Duration::from_secs(60));

        assert!(sink.write(event(REQUEST_STARTED, "1")).is_ok());
        assert!(sink.write(event(REQUEST_STARTED, "2")).is_ok());
        assert!(matches!(
            sink.write(event(REQUEST_STARTED, "3")),
            Err(SinkError::Saturated)
        ));
        assert_eq!(sink.dropped(), 1);
    }
}
