use crate::service::{
    InputLogEvent, LogGroup, LogGroupPage, LogStream, LogStreamService, ServiceError,
};
use async_trait::async_trait;
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// In-process [`LogStreamService`] with the remote service's token rules.
///
/// A fresh stream has no token; every accepted append issues a new one and
/// an append carrying any other token is rejected as stale. Useful for
/// tests, load measurements and `memory://` endpoints.
#[derive(Debug)]
pub struct InMemoryLogStreamService {
    state: Mutex<State>,
    page_size: usize,
}

#[derive(Debug, Default)]
struct State {
    // Listing order is registration order.
    groups: Vec<String>,
    streams: BTreeMap<(String, String), StreamState>,
    injected: VecDeque<ServiceError>,
    calls: CallCounts,
}

impl State {
    fn add_group(&mut self, name: &str) -> bool {
        if self.groups.iter().any(|g| g == name) {
            return false;
        }
        self.groups.push(name.to_string());
        true
    }
}

#[derive(Debug, Default)]
struct StreamState {
    appends: u64,
    events: Vec<InputLogEvent>,
}

impl StreamState {
    fn token(&self) -> Option<String> {
        (self.appends > 0).then(|| format!("{:020}", self.appends))
    }
}

/// Number of calls received per operation.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CallCounts {
    pub describe_log_groups: usize,
    pub create_log_group: usize,
    pub describe_log_streams: usize,
    pub create_log_stream: usize,
    pub put_log_events: usize,
}

impl Default for InMemoryLogStreamService {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryLogStreamService {
    pub fn new() -> Self {
        Self::with_page_size(50)
    }

    /// Limit group listings to `page_size` entries per page.
    pub fn with_page_size(page_size: usize) -> Self {
        Self {
            state: Mutex::new(State::default()),
            page_size: page_size.max(1),
        }
    }

    /// Register a group without counting it as a create call.
    pub fn seed_group(&self, name: &str) {
        self.lock().add_group(name);
    }

    /// Register a stream without counting it as a create call.
    pub fn seed_stream(&self, group: &str, name: &str) {
        let mut state = self.lock();
        state.add_group(group);
        state
            .streams
            .entry((group.to_string(), name.to_string()))
            .or_default();
    }

    /// Fail the next `put_log_events` call with `error`. Queued errors are
    /// consumed in order, one per append.
    pub fn fail_next_append(&self, error: ServiceError) {
        self.lock().injected.push_back(error);
    }

    /// Simulate another writer appending to the stream, which invalidates
    /// any token held locally.
    pub fn advance_token(&self, group: &str, name: &str) {
        if let Some(stream) = self.lock().streams.get_mut(&(group.to_string(), name.to_string())) {
            stream.appends += 1;
        }
    }

    pub fn remove_stream(&self, group: &str, name: &str) {
        self.lock().streams.remove(&(group.to_string(), name.to_string()));
    }

    pub fn has_group(&self, name: &str) -> bool {
        self.lock().groups.iter().any(|g| g == name)
    }

    pub fn stream_names(&self, group: &str) -> Vec<String> {
        self.lock()
            .streams
            .keys()
            .filter(|(g, _)| g == group)
            .map(|(_, name)| name.clone())
            .collect()
    }

    /// Every event accepted into the stream so far, in append order.
    pub fn events(&self, group: &str, name: &str) -> Vec<InputLogEvent> {
        self.lock()
            .streams
            .get(&(group.to_string(), name.to_string()))
            .map(|stream| stream.events.clone())
            .unwrap_or_default()
    }

    pub fn calls(&self) -> CallCounts {
        self.lock().calls
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl LogStreamService for InMemoryLogStreamService {
    async fn describe_log_groups(
        &self,
        prefix: &str,
        next_token: Option<&str>,
    ) -> Result<LogGroupPage, ServiceError> {
        let mut state = self.lock();
        state.calls.describe_log_groups += 1;

        let offset = match next_token {
            Some(token) => token
                .parse::<usize>()
                .map_err(|_| ServiceError::Rejected {
                    code: "InvalidParameterException".into(),
                    message: format!("bad next token {token}"),
                })?,
            None => 0,
        };
        let matching: Vec<&String> = state.groups.iter().filter(|g| g.starts_with(prefix)).collect();
        let end = (offset + self.page_size).min(matching.len());

        Ok(LogGroupPage {
            log_groups: matching
                .get(offset..end)
                .unwrap_or_default()
                .iter()
                .map(|name| LogGroup {
                    log_group_name: (*name).clone(),
                })
                .collect(),
            next_token: (end < matching.len()).then(|| end.to_string()),
        })
    }

    async fn create_log_group(&self, name: &str) -> Result<(), ServiceError> {
        let mut state = self.lock();
        state.calls.create_log_group += 1;
        if !state.add_group(name) {
            return Err(ServiceError::AlreadyExists(name.to_string()));
        }
        Ok(())
    }

    async fn describe_log_streams(
        &self,
        group: &str,
        prefix: &str,
    ) -> Result<Vec<LogStream>, ServiceError> {
        let mut state = self.lock();
        state.calls.describe_log_streams += 1;
        if !state.groups.iter().any(|g| g == group) {
            return Err(ServiceError::ResourceNotFound(format!("log group {group}")));
        }
        Ok(state
            .streams
            .iter()
            .filter(|((g, name), _)| g == group && name.starts_with(prefix))
            .map(|((_, name), stream)| LogStream {
                log_stream_name: name.clone(),
                upload_sequence_token: stream.token(),
            })
            .collect())
    }

    async fn create_log_stream(&self, group: &str, name: &str) -> Result<(), ServiceError> {
        let mut state = self.lock();
        state.calls.create_log_stream += 1;
        if !state.groups.iter().any(|g| g == group) {
            return Err(ServiceError::ResourceNotFound(format!("log group {group}")));
        }
        let key = (group.to_string(), name.to_string());
        if state.streams.contains_key(&key) {
            return Err(ServiceError::AlreadyExists(name.to_string()));
        }
        state.streams.insert(key, StreamState::default());
        Ok(())
    }

    async fn put_log_events(
        &self,
        group: &str,
        stream: &str,
        sequence_token: Option<&str>,
        events: &[InputLogEvent],
    ) -> Result<Option<String>, ServiceError> {
        let mut state = self.lock();
        state.calls.put_log_events += 1;
        if let Some(error) = state.injected.pop_front() {
            return Err(error);
        }

        let target = state
            .streams
            .get_mut(&(group.to_string(), stream.to_string()))
            .ok_or_else(|| ServiceError::ResourceNotFound(format!("log stream {stream}")))?;

        let expected = target.token();
        if sequence_token.map(str::to_string) != expected {
            return Err(ServiceError::StaleToken { expected });
        }
        if events.windows(2).any(|pair| pair[0].timestamp > pair[1].timestamp) {
            return Err(ServiceError::Rejected {
                code: "InvalidParameterException".into(),
                message: "log events in a single batch must be in chronological order".into(),
            });
        }

        target.appends += 1;
        target.events.extend_from_slice(events);
        Ok(target.token())
    }
}
