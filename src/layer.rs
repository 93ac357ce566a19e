use crate::buffer::LogBuffer;
use crate::record::{Level, LogRecord};
use chrono::Utc;
use std::error::Error;
use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::{Context, Layer};
use tracing_subscriber::registry::LookupSpan;

/// Events from this crate are never shipped, so a failing publish cannot
/// feed itself.
const OWN_TARGET: &str = env!("CARGO_CRATE_NAME");
const OWN_MODULES: &str = concat!(env!("CARGO_CRATE_NAME"), "::");

fn is_own_target(target: &str) -> bool {
    target == OWN_TARGET || target.starts_with(OWN_MODULES)
}

/// `tracing_subscriber` layer that turns events into [`LogRecord`]s and
/// ingests them into a shared [`LogBuffer`].
///
/// Ingestion only takes the buffer lock for a single push; all network
/// I/O happens later on the publisher task.
#[derive(Clone)]
pub struct StreamLayer {
    buffer: Arc<LogBuffer>,
    min_level: Level,
    suppressed: Arc<[String]>,
    /// Total events seen by the layer (before filtering).
    pub total_events: Arc<AtomicU64>,
    /// Events turned into records and buffered.
    pub captured_events: Arc<AtomicU64>,
    /// Events skipped because they matched a suppression pattern.
    pub suppressed_events: Arc<AtomicU64>,
}

impl StreamLayer {
    pub fn new(buffer: Arc<LogBuffer>, min_level: Level, suppressed: Vec<String>) -> Self {
        Self {
            buffer,
            min_level,
            suppressed: suppressed.into(),
            total_events: Arc::new(AtomicU64::new(0)),
            captured_events: Arc::new(AtomicU64::new(0)),
            suppressed_events: Arc::new(AtomicU64::new(0)),
        }
    }

    fn is_suppressed(&self, message: Option<&str>) -> bool {
        match message {
            Some(message) => self.suppressed.iter().any(|pattern| message.contains(pattern.as_str())),
            None => false,
        }
    }
}

impl<S> Layer<S> for StreamLayer
where
    S: Subscriber + for<'span> LookupSpan<'span>,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        self.total_events.fetch_add(1, Ordering::Relaxed);

        let meta = event.metadata();
        let level = Level::from(meta.level());
        if level < self.min_level || is_own_target(meta.target()) {
            return;
        }

        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);
        let (message, trace) = visitor.finish();

        if self.is_suppressed(message.as_deref()) {
            self.suppressed_events.fetch_add(1, Ordering::Relaxed);
            return;
        }

        let current = std::thread::current();
        let thread = match current.name() {
            Some(name) => name.to_string(),
            None => format!("{:?}", current.id()),
        };

        self.buffer.ingest(LogRecord {
            timestamp_ms: Utc::now().timestamp_millis(),
            level,
            logger: meta.target().to_string(),
            thread,
            message,
            trace,
        });
        self.captured_events.fetch_add(1, Ordering::Relaxed);
    }
}

/// Collects the `message` field, appends other fields as `key=value`,
/// and renders recorded errors with their source chain as a trace.
#[derive(Default)]
pub struct FieldVisitor {
    message: Option<String>,
    fields: String,
    trace: Vec<String>,
}

impl FieldVisitor {
    pub fn finish(self) -> (Option<String>, Option<Vec<String>>) {
        let message = match (self.message, self.fields.is_empty()) {
            (message, true) => message,
            (Some(message), false) => Some(format!("{message}{}", self.fields)),
            (None, false) => Some(self.fields.trim_start().to_string()),
        };
        let trace = (!self.trace.is_empty()).then_some(self.trace);
        (message, trace)
    }

    fn push_field(&mut self, field: &Field, value: &dyn std::fmt::Display) {
        let _ = write!(self.fields, " {}={}", field.name(), value);
    }
}

impl Visit for FieldVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = Some(value.to_string());
        } else {
            self.push_field(field, &value);
        }
    }

    fn record_error(&mut self, field: &Field, value: &(dyn Error + 'static)) {
        self.trace.push(format!("{}: {}", field.name(), value));
        let mut source = value.source();
        while let Some(cause) = source {
            self.trace.push(format!("Caused by: {cause}"));
            source = cause.source();
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = Some(format!("{value:?}"));
        } else {
            self.push_field(field, &format_args!("{value:?}"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fmt;
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::Registry;

    #[derive(Debug)]
    struct Refused;

    impl fmt::Display for Refused {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("connection refused")
        }
    }

    impl Error for Refused {}

    #[derive(Debug)]
    struct QueryFailed(Refused);

    impl fmt::Display for QueryFailed {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("query failed")
        }
    }

    impl Error for QueryFailed {
        fn source(&self) -> Option<&(dyn Error + 'static)> {
            Some(&self.0)
        }
    }

    fn capture(layer: StreamLayer, emit: impl FnOnce()) {
        let subscriber = Registry::default().with(layer);
        tracing::subscriber::with_default(subscriber, emit);
    }

    #[test]
    fn events_become_records() {
        let buffer = Arc::new(LogBuffer::new());
        let layer = StreamLayer::new(buffer.clone(), Level::Info, Vec::new());
        let captured = layer.captured_events.clone();

        capture(layer, || {
            tracing::info!(target: "billing::invoices", user_id = 42, "invoice sent");
            tracing::debug!(target: "billing::invoices", "too chatty");
        });

        let records = buffer.drain_and_reset();
        assert_eq!(records.len(), 1);
        assert_eq!(captured.load(Ordering::Relaxed), 1);
        let record = &records[0];
        assert_eq!(record.level, Level::Info);
        assert_eq!(record.logger, "billing::invoices");
        assert_eq!(record.message.as_deref(), Some("invoice sent user_id=42"));
        assert!(record.trace.is_none());
        assert!(!record.thread.is_empty());
    }

    #[test]
    fn errors_are_rendered_as_trace() {
        let buffer = Arc::new(LogBuffer::new());
        capture(StreamLayer::new(buffer.clone(), Level::Info, Vec::new()), || {
            let err = QueryFailed(Refused);
            tracing::error!(target: "db", error = &err as &(dyn Error + 'static));
        });

        let records = buffer.drain_and_reset();
        assert_eq!(records[0].message, None);
        assert_eq!(
            records[0].trace.as_deref(),
            Some(&["error: query failed".to_string(), "Caused by: connection refused".to_string()][..])
        );
        assert!(!records[0].is_noise());
    }

    #[test]
    fn suppressed_messages_are_skipped() {
        let buffer = Arc::new(LogBuffer::new());
        let layer = StreamLayer::new(
            buffer.clone(),
            Level::Trace,
            vec!["segment cannot be found".to_string()],
        );
        let suppressed = layer.suppressed_events.clone();

        capture(layer, || {
            tracing::warn!(target: "xray", "Failed to begin subsegment: segment cannot be found");
            tracing::warn!(target: "xray", "something else");
        });

        assert_eq!(buffer.drain_and_reset().len(), 1);
        assert_eq!(suppressed.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn own_events_are_ignored() {
        let buffer = Arc::new(LogBuffer::new());
        let layer = StreamLayer::new(buffer.clone(), Level::Trace, Vec::new());
        let total = layer.total_events.clone();

        capture(layer, || {
            tracing::error!(target: "logstream_shipper::publisher", "failed to publish log batch");
            tracing::warn!(target: "logstream_shipper", "crate root event");
        });

        assert!(buffer.is_empty());
        assert_eq!(total.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn crates_sharing_the_name_prefix_are_shipped() {
        let buffer = Arc::new(LogBuffer::new());
        capture(StreamLayer::new(buffer.clone(), Level::Trace, Vec::new()), || {
            tracing::info!(target: "logstream_shipper_demo", "demo started");
            tracing::info!(target: "logstream_shipper_demo::worker", "job done");
        });

        let records = buffer.drain_and_reset();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].logger, "logstream_shipper_demo");
    }

    #[test]
    fn field_only_events_keep_fields_as_message() {
        let mut visitor = FieldVisitor::default();
        visitor.fields.push_str(" a=1 b=2");
        assert_eq!(visitor.finish(), (Some("a=1 b=2".to_string()), None));
    }
}
