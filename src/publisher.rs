use crate::buffer::LogBuffer;
use crate::format::format_record;
use crate::lifecycle::{LifecycleError, StreamLifecycle, TokenState};
use crate::record::LogRecord;
use crate::service::{with_timeout, InputLogEvent, ServiceError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, warn};

/// What happens to a batch whose append still fails after the in-cycle
/// retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum FailurePolicy {
    /// Drop the batch; loss is bounded to one flush interval.
    #[default]
    Drop,
    /// Put the records back into the buffer for the next cycle, keeping at
    /// most `max_records` of the newest.
    Requeue { max_records: usize },
}

/// Result of a cycle that did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    /// Nothing was buffered; no remote call was made.
    Idle,
    /// Every drained record was noise; no remote call was made.
    Suppressed(usize),
    Published {
        events: usize,
        /// The first append was rejected and the batch went through after
        /// rotating the stream.
        recovered: bool,
    },
}

/// How the records of a failed cycle were disposed of.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposal {
    Dropped(usize),
    Requeued { requeued: usize, dropped: usize },
}

#[derive(thiserror::Error, Debug)]
pub enum PublishError {
    #[error("append failed ({disposal:?}): {source}")]
    Append {
        #[source]
        source: ServiceError,
        disposal: Disposal,
    },

    #[error("append failed after stream rotation ({disposal:?}): {source}")]
    RetryFailed {
        #[source]
        source: ServiceError,
        disposal: Disposal,
    },

    #[error("stream rotation failed ({disposal:?}): {source}")]
    Rotation {
        #[source]
        source: LifecycleError,
        disposal: Disposal,
    },
}

impl PublishError {
    pub fn disposal(&self) -> Disposal {
        match self {
            PublishError::Append { disposal, .. }
            | PublishError::RetryFailed { disposal, .. }
            | PublishError::Rotation { disposal, .. } => *disposal,
        }
    }
}

enum CycleFailure {
    Append(ServiceError),
    RetryFailed(ServiceError),
    Rotation(LifecycleError),
}

/// Drains the buffer and appends one ordered batch per cycle.
///
/// `run_cycle` takes `&mut self`: the publisher lives in a single task and
/// cycles can never overlap, which keeps the token state unshared.
pub struct Publisher {
    buffer: Arc<LogBuffer>,
    lifecycle: StreamLifecycle,
    policy: FailurePolicy,
}

impl Publisher {
    pub fn new(buffer: Arc<LogBuffer>, lifecycle: StreamLifecycle, policy: FailurePolicy) -> Self {
        Self {
            buffer,
            lifecycle,
            policy,
        }
    }

    pub fn lifecycle(&self) -> &StreamLifecycle {
        &self.lifecycle
    }

    pub fn lifecycle_mut(&mut self) -> &mut StreamLifecycle {
        &mut self.lifecycle
    }

    pub async fn run_cycle(&mut self) -> Result<PublishOutcome, PublishError> {
        let drained = self.buffer.drain_and_reset();
        if drained.is_empty() {
            return Ok(PublishOutcome::Idle);
        }

        let total = drained.len();
        let records: Vec<LogRecord> = drained.into_iter().filter(|r| !r.is_noise()).collect();
        if records.is_empty() {
            debug!(suppressed = total, "dropped blank records");
            return Ok(PublishOutcome::Suppressed(total));
        }

        let events: Vec<InputLogEvent> = records
            .iter()
            .map(|record| InputLogEvent {
                timestamp: record.timestamp_ms,
                message: format_record(record),
            })
            .collect();

        match self.publish(&events).await {
            Ok(recovered) => {
                debug!(events = events.len(), recovered, "published batch");
                Ok(PublishOutcome::Published {
                    events: events.len(),
                    recovered,
                })
            }
            Err(failure) => {
                let disposal = self.dispose(records);
                let err = match failure {
                    CycleFailure::Append(source) => PublishError::Append { source, disposal },
                    CycleFailure::RetryFailed(source) => PublishError::RetryFailed { source, disposal },
                    CycleFailure::Rotation(source) => PublishError::Rotation { source, disposal },
                };
                error!(error = %err, "failed to publish log batch");
                Err(err)
            }
        }
    }

    /// Returns whether the batch needed the rotate-and-retry path.
    async fn publish(&mut self, events: &[InputLogEvent]) -> Result<bool, CycleFailure> {
        let stream = self.lifecycle.current_stream_name();
        if !self.lifecycle.is_group_ready() {
            self.lifecycle
                .ensure_log_group()
                .await
                .map_err(CycleFailure::Rotation)?;
        }
        if self.lifecycle.needs_rotation(&stream) {
            debug!(stream = %stream, "rotating before append");
            self.lifecycle
                .rotate_to(&stream)
                .await
                .map_err(CycleFailure::Rotation)?;
        }

        match self.append(&stream, events).await {
            Ok(()) => Ok(false),
            Err(e) if e.requires_rotation() => {
                warn!(error = %e, stream = %stream, "append rejected, re-reading stream token");
                self.lifecycle.invalidate();
                let stream = self.lifecycle.current_stream_name();
                self.lifecycle
                    .rotate_to(&stream)
                    .await
                    .map_err(CycleFailure::Rotation)?;

                self.append(&stream, events)
                    .await
                    .map_err(CycleFailure::RetryFailed)?;
                Ok(true)
            }
            Err(e) => Err(CycleFailure::Append(e)),
        }
    }

    async fn append(&mut self, stream: &str, events: &[InputLogEvent]) -> Result<(), ServiceError> {
        let token = match self.lifecycle.token() {
            TokenState::Known(token) => token.clone(),
            TokenState::Unknown => None,
        };

        let result = with_timeout(
            self.lifecycle.request_timeout(),
            self.lifecycle.service().put_log_events(
                self.lifecycle.group(),
                stream,
                token.as_deref(),
                events,
            ),
        )
        .await;

        match result {
            Ok(next) => {
                self.lifecycle.accept_token(next);
                Ok(())
            }
            Err(ServiceError::DataAlreadyAccepted { expected }) => {
                debug!(stream = %stream, "batch already accepted by the service");
                self.lifecycle.accept_token(expected);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn dispose(&self, mut records: Vec<LogRecord>) -> Disposal {
        match self.policy {
            FailurePolicy::Drop => Disposal::Dropped(records.len()),
            FailurePolicy::Requeue { max_records } => {
                let dropped = records.len().saturating_sub(max_records);
                // Records are time-ordered; keep the newest.
                records.drain(..dropped);
                let requeued = records.len();
                self.buffer.requeue(records);
                Disposal::Requeued { requeued, dropped }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryLogStreamService;
    use crate::naming::{Clock, StreamNaming};
    use crate::record::Level;
    use crate::service::LogStreamService;
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use std::sync::Mutex;
    use std::time::Duration;

    const GROUP: &str = "app-logs";

    struct TestClock(Mutex<NaiveDate>);

    impl Clock for TestClock {
        fn today(&self) -> NaiveDate {
            *self.0.lock().unwrap()
        }
    }

    struct Harness {
        service: Arc<InMemoryLogStreamService>,
        buffer: Arc<LogBuffer>,
        clock: Arc<TestClock>,
        publisher: Publisher,
    }

    impl Harness {
        async fn started(policy: FailurePolicy) -> Self {
            let service = Arc::new(InMemoryLogStreamService::new());
            let buffer = Arc::new(LogBuffer::new());
            let clock = Arc::new(TestClock(Mutex::new(day(1))));
            let naming = StreamNaming::new("api", "host").with_clock(clock.clone());
            let mut lifecycle =
                StreamLifecycle::new(service.clone(), GROUP, naming, Duration::from_secs(1));
            lifecycle.start().await.unwrap();

            Self {
                service,
                buffer: buffer.clone(),
                clock,
                publisher: Publisher::new(buffer, lifecycle, policy),
            }
        }

        fn stream(&self) -> String {
            self.publisher.lifecycle().current_stream_name()
        }
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, d).unwrap()
    }

    fn record(ts: i64, message: &str) -> LogRecord {
        LogRecord::new(ts, Level::Info, "svc", "main", message)
    }

    #[tokio::test]
    async fn empty_buffer_makes_no_remote_call() {
        let mut h = Harness::started(FailurePolicy::Drop).await;
        let before = h.service.calls();

        assert_eq!(h.publisher.run_cycle().await.unwrap(), PublishOutcome::Idle);
        assert_eq!(h.service.calls(), before);
    }

    #[tokio::test]
    async fn publishes_one_ordered_batch() {
        let mut h = Harness::started(FailurePolicy::Drop).await;
        h.buffer.ingest(record(3_000, "third"));
        h.buffer.ingest(record(1_000, "first"));
        h.buffer.ingest(record(2_000, "second"));

        let outcome = h.publisher.run_cycle().await.unwrap();
        assert_eq!(outcome, PublishOutcome::Published { events: 3, recovered: false });

        let events = h.service.events(GROUP, &h.stream());
        let stamps: Vec<i64> = events.iter().map(|e| e.timestamp).collect();
        assert_eq!(stamps, vec![1_000, 2_000, 3_000]);
        assert_eq!(events[0].message, "000 | INFO svc (main): first");
        assert_eq!(h.service.calls().put_log_events, 1);
        assert!(matches!(h.publisher.lifecycle().token(), TokenState::Known(Some(_))));
    }

    #[tokio::test]
    async fn blank_records_are_suppressed() {
        let mut h = Harness::started(FailurePolicy::Drop).await;
        h.buffer.ingest(record(1, ""));
        h.buffer.ingest(record(2, "").with_trace(vec!["panic at the disco".into()]));
        h.buffer.ingest(record(3, "kept"));

        h.publisher.run_cycle().await.unwrap();
        let events = h.service.events(GROUP, &h.stream());
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].timestamp, 2);

        h.buffer.ingest(record(4, ""));
        let calls = h.service.calls().put_log_events;
        assert_eq!(h.publisher.run_cycle().await.unwrap(), PublishOutcome::Suppressed(1));
        assert_eq!(h.service.calls().put_log_events, calls);
    }

    #[tokio::test]
    async fn stale_token_recovers_with_one_rotation_and_two_appends() {
        let mut h = Harness::started(FailurePolicy::Drop).await;
        h.service.fail_next_append(ServiceError::StaleToken { expected: None });
        let rotations = h.publisher.lifecycle().rotations();
        h.buffer.ingest(record(1, "hello"));

        let outcome = h.publisher.run_cycle().await.unwrap();
        assert_eq!(outcome, PublishOutcome::Published { events: 1, recovered: true });
        assert_eq!(h.publisher.lifecycle().rotations(), rotations + 1);
        assert_eq!(h.service.calls().put_log_events, 2);
        assert!(matches!(h.publisher.lifecycle().token(), TokenState::Known(Some(_))));
    }

    #[tokio::test]
    async fn concurrent_writer_is_recovered_from() {
        let mut h = Harness::started(FailurePolicy::Drop).await;
        h.service.advance_token(GROUP, &h.stream());
        h.buffer.ingest(record(1, "after interleave"));

        let outcome = h.publisher.run_cycle().await.unwrap();
        assert_eq!(outcome, PublishOutcome::Published { events: 1, recovered: true });
        assert_eq!(h.service.events(GROUP, &h.stream()).len(), 1);
    }

    #[tokio::test]
    async fn deleted_stream_is_recreated() {
        let mut h = Harness::started(FailurePolicy::Drop).await;
        h.service.remove_stream(GROUP, &h.stream());
        h.buffer.ingest(record(1, "into the void"));

        let outcome = h.publisher.run_cycle().await.unwrap();
        assert_eq!(outcome, PublishOutcome::Published { events: 1, recovered: true });
        assert_eq!(h.service.events(GROUP, &h.stream()).len(), 1);
    }

    #[tokio::test]
    async fn day_change_rotates_to_new_stream() {
        let mut h = Harness::started(FailurePolicy::Drop).await;
        h.buffer.ingest(record(1, "day one"));
        h.publisher.run_cycle().await.unwrap();
        let first = h.stream();

        *h.clock.0.lock().unwrap() = day(2);
        h.buffer.ingest(record(2, "day two"));
        let outcome = h.publisher.run_cycle().await.unwrap();
        let second = h.stream();

        assert_eq!(outcome, PublishOutcome::Published { events: 1, recovered: false });
        assert_ne!(first, second);
        assert_eq!(h.service.events(GROUP, &first).len(), 1);
        assert_eq!(h.service.events(GROUP, &second).len(), 1);
        assert_eq!(h.publisher.lifecycle().stream(), Some(second.as_str()));
    }

    #[tokio::test]
    async fn second_failure_drops_batch() {
        let mut h = Harness::started(FailurePolicy::Drop).await;
        h.service.fail_next_append(ServiceError::StaleToken { expected: None });
        h.service.fail_next_append(ServiceError::StaleToken { expected: None });
        h.buffer.ingest(record(1, "lost"));

        let err = h.publisher.run_cycle().await.unwrap_err();
        assert!(matches!(err, PublishError::RetryFailed { .. }));
        assert_eq!(err.disposal(), Disposal::Dropped(1));
        assert_eq!(h.service.calls().put_log_events, 2);
        assert!(h.buffer.is_empty());

        h.buffer.ingest(record(2, "next cycle"));
        assert!(h.publisher.run_cycle().await.is_ok());
    }

    #[tokio::test]
    async fn unavailable_service_is_not_retried_in_cycle() {
        let mut h = Harness::started(FailurePolicy::Drop).await;
        h.service.fail_next_append(ServiceError::Unavailable("503".into()));
        h.buffer.ingest(record(1, "lost"));

        let err = h.publisher.run_cycle().await.unwrap_err();
        assert!(matches!(err, PublishError::Append { .. }));
        assert_eq!(h.service.calls().put_log_events, 1);
    }

    #[tokio::test]
    async fn requeue_policy_keeps_newest_records() {
        let mut h = Harness::started(FailurePolicy::Requeue { max_records: 2 }).await;
        h.service.fail_next_append(ServiceError::Unavailable("503".into()));
        for ts in 1..=3 {
            h.buffer.ingest(record(ts, "retry me"));
        }

        let err = h.publisher.run_cycle().await.unwrap_err();
        assert_eq!(err.disposal(), Disposal::Requeued { requeued: 2, dropped: 1 });

        let outcome = h.publisher.run_cycle().await.unwrap();
        assert_eq!(outcome, PublishOutcome::Published { events: 2, recovered: false });
        let stamps: Vec<i64> = h
            .service
            .events(GROUP, &h.stream())
            .iter()
            .map(|e| e.timestamp)
            .collect();
        assert_eq!(stamps, vec![2, 3]);
    }

    #[tokio::test]
    async fn already_accepted_batch_adopts_expected_token() {
        let mut h = Harness::started(FailurePolicy::Drop).await;
        h.service.fail_next_append(ServiceError::DataAlreadyAccepted {
            expected: Some("from-service".into()),
        });
        h.buffer.ingest(record(1, "dup"));

        let outcome = h.publisher.run_cycle().await.unwrap();
        assert_eq!(outcome, PublishOutcome::Published { events: 1, recovered: false });
        assert_eq!(
            h.publisher.lifecycle().token(),
            &TokenState::Known(Some("from-service".into()))
        );
    }

    struct HangingService;

    #[async_trait]
    impl LogStreamService for HangingService {
        async fn describe_log_groups(
            &self,
            _prefix: &str,
            _next_token: Option<&str>,
        ) -> Result<crate::service::LogGroupPage, ServiceError> {
            Ok(Default::default())
        }

        async fn create_log_group(&self, _name: &str) -> Result<(), ServiceError> {
            Ok(())
        }

        async fn describe_log_streams(
            &self,
            _group: &str,
            prefix: &str,
        ) -> Result<Vec<crate::service::LogStream>, ServiceError> {
            Ok(vec![crate::service::LogStream {
                log_stream_name: prefix.to_string(),
                upload_sequence_token: None,
            }])
        }

        async fn create_log_stream(&self, _group: &str, _name: &str) -> Result<(), ServiceError> {
            Ok(())
        }

        async fn put_log_events(
            &self,
            _group: &str,
            _stream: &str,
            _token: Option<&str>,
            _events: &[InputLogEvent],
        ) -> Result<Option<String>, ServiceError> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(None)
        }
    }

    #[tokio::test]
    async fn hung_append_times_out() {
        let buffer = Arc::new(LogBuffer::new());
        let naming = StreamNaming::new("api", "host");
        let timeout = Duration::from_millis(50);
        let mut lifecycle = StreamLifecycle::new(Arc::new(HangingService), GROUP, naming, timeout);
        lifecycle.start().await.unwrap();
        let mut publisher = Publisher::new(buffer.clone(), lifecycle, FailurePolicy::Drop);

        buffer.ingest(record(1, "stuck"));
        let err = publisher.run_cycle().await.unwrap_err();
        match err {
            PublishError::Append { source, .. } => assert_eq!(source, ServiceError::Timeout(timeout)),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    /// Moves one day forward on every reading.
    struct RacingMidnight(std::sync::atomic::AtomicU32);

    impl Clock for RacingMidnight {
        fn today(&self) -> NaiveDate {
            day(1 + self.0.fetch_add(1, std::sync::atomic::Ordering::SeqCst))
        }
    }

    #[tokio::test]
    async fn one_clock_reading_drives_rotation_and_append() {
        let service = Arc::new(InMemoryLogStreamService::new());
        let buffer = Arc::new(LogBuffer::new());
        let clock = Arc::new(RacingMidnight(std::sync::atomic::AtomicU32::new(0)));
        let naming = StreamNaming::new("api", "host").with_clock(clock);
        let mut lifecycle = StreamLifecycle::new(service.clone(), GROUP, naming, Duration::from_secs(1));
        lifecycle.start().await.unwrap();
        let mut publisher = Publisher::new(buffer.clone(), lifecycle, FailurePolicy::Drop);

        buffer.ingest(record(1, "straddles midnight"));
        let outcome = publisher.run_cycle().await.unwrap();

        assert_eq!(outcome, PublishOutcome::Published { events: 1, recovered: false });
        assert_eq!(service.events(GROUP, "api_2024-06-02_host").len(), 1);
        assert_eq!(service.calls().put_log_events, 1);
        assert_eq!(publisher.lifecycle().rotations(), 2);
    }

    #[tokio::test]
    async fn cycle_completes_setup_that_failed_at_startup() {
        let service = Arc::new(InMemoryLogStreamService::new());
        let buffer = Arc::new(LogBuffer::new());
        let naming = StreamNaming::new("api", "host");
        let lifecycle = StreamLifecycle::new(service.clone(), GROUP, naming, Duration::from_secs(1));
        let mut publisher = Publisher::new(buffer.clone(), lifecycle, FailurePolicy::Drop);

        buffer.ingest(record(1, "first words"));
        let outcome = publisher.run_cycle().await.unwrap();

        assert_eq!(outcome, PublishOutcome::Published { events: 1, recovered: false });
        assert!(service.has_group(GROUP));
        assert!(publisher.lifecycle().is_group_ready());
        assert_eq!(service.calls().create_log_group, 1);

        let stream = publisher.lifecycle().stream().unwrap().to_string();
        assert_eq!(service.events(GROUP, &stream).len(), 1);
    }
}
