use chrono::{Local, NaiveDate};
use std::fmt;
use std::sync::Arc;

/// Source of the current calendar date.
pub trait Clock: Send + Sync {
    fn today(&self) -> NaiveDate;
}

/// Local wall-clock date.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn today(&self) -> NaiveDate {
        Local::now().date_naive()
    }
}

/// Derives the remote stream name from prefix, date and host label.
///
/// Names are `{prefix}_{yyyy-mm-dd}_{host}` with `_{instance_tag}` appended
/// when a tag is configured. The date is read on every call, so a cycle
/// that straddles midnight targets the new day's stream.
#[derive(Clone)]
pub struct StreamNaming {
    prefix: String,
    host: String,
    instance_tag: Option<String>,
    clock: Arc<dyn Clock>,
}

impl StreamNaming {
    pub fn new(prefix: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            host: host.into(),
            instance_tag: None,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_instance_tag(mut self, tag: Option<String>) -> Self {
        self.instance_tag = tag.filter(|t| !t.is_empty());
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn current_stream_name(&self) -> String {
        self.stream_name_on(self.clock.today())
    }

    pub fn stream_name_on(&self, date: NaiveDate) -> String {
        let mut name = format!("{}_{}_{}", self.prefix, date.format("%Y-%m-%d"), self.host);
        if let Some(tag) = &self.instance_tag {
            name.push('_');
            name.push_str(tag);
        }
        name
    }
}

impl fmt::Debug for StreamNaming {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamNaming")
            .field("prefix", &self.prefix)
            .field("host", &self.host)
            .field("instance_tag", &self.instance_tag)
            .finish()
    }
}
