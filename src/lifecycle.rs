use crate::naming::StreamNaming;
use crate::service::{with_timeout, LogStream, LogStreamService, ServiceError};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// What the publisher knows about the sequence token of its stream.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum TokenState {
    /// Must rotate before the next append.
    #[default]
    Unknown,
    /// Token for the next append. `None` is valid for a stream that has
    /// never been written to.
    Known(Option<String>),
}

#[derive(thiserror::Error, Debug)]
pub enum LifecycleError {
    #[error(transparent)]
    Service(#[from] ServiceError),

    #[error("log stream {0} is still missing after creation")]
    StreamMissing(String),
}

/// Owns the remote group/stream resources and the append sequence token.
///
/// Only the publisher task touches a lifecycle, so none of its state is
/// shared.
pub struct StreamLifecycle {
    service: Arc<dyn LogStreamService>,
    group: String,
    naming: StreamNaming,
    request_timeout: Duration,
    stream: Option<String>,
    token: TokenState,
    rotations: u64,
    group_ready: bool,
}

impl StreamLifecycle {
    pub fn new(
        service: Arc<dyn LogStreamService>,
        group: impl Into<String>,
        naming: StreamNaming,
        request_timeout: Duration,
    ) -> Self {
        Self {
            service,
            group: group.into(),
            naming,
            request_timeout,
            stream: None,
            token: TokenState::Unknown,
            rotations: 0,
            group_ready: false,
        }
    }

    /// Create the group if needed and adopt today's stream.
    pub async fn start(&mut self) -> Result<(), LifecycleError> {
        self.ensure_log_group().await?;
        self.rotate_stream().await?;
        Ok(())
    }

    /// Create the log group unless a group with exactly this name exists.
    ///
    /// Returns `true` when a create call was issued.
    pub async fn ensure_log_group(&mut self) -> Result<bool, LifecycleError> {
        let mut next_token: Option<String> = None;
        loop {
            let page = with_timeout(
                self.request_timeout,
                self.service.describe_log_groups(&self.group, next_token.as_deref()),
            )
            .await?;

            if page.log_groups.iter().any(|g| g.log_group_name == self.group) {
                debug!(group = %self.group, "log group already exists");
                self.group_ready = true;
                return Ok(false);
            }
            match page.next_token {
                Some(token) => next_token = Some(token),
                None => break,
            }
        }

        match with_timeout(self.request_timeout, self.service.create_log_group(&self.group)).await {
            Ok(()) => info!(group = %self.group, "created log group"),
            Err(ServiceError::AlreadyExists(_)) => {
                debug!(group = %self.group, "log group created concurrently");
            }
            Err(e) => return Err(e.into()),
        }
        self.group_ready = true;
        Ok(true)
    }

    /// Point at the current day's stream, creating it if needed, and adopt
    /// its sequence token.
    pub async fn rotate_stream(&mut self) -> Result<(), LifecycleError> {
        let name = self.naming.current_stream_name();
        self.rotate_to(&name).await
    }

    /// Like [`StreamLifecycle::rotate_stream`], for a name the caller has
    /// already computed, so one clock reading drives both rotation and append.
    pub async fn rotate_to(&mut self, name: &str) -> Result<(), LifecycleError> {
        let name = name.to_string();
        self.token = TokenState::Unknown;

        let stream = match self.find_stream(&name).await? {
            Some(stream) => stream,
            None => {
                match with_timeout(
                    self.request_timeout,
                    self.service.create_log_stream(&self.group, &name),
                )
                .await
                {
                    Ok(()) => info!(group = %self.group, stream = %name, "created log stream"),
                    Err(ServiceError::AlreadyExists(_)) => {
                        debug!(stream = %name, "log stream created concurrently");
                    }
                    Err(e) => return Err(e.into()),
                }
                self.find_stream(&name)
                    .await?
                    .ok_or_else(|| LifecycleError::StreamMissing(name.clone()))?
            }
        };

        debug!(
            stream = %name,
            has_token = stream.upload_sequence_token.is_some(),
            "adopted log stream"
        );
        self.token = TokenState::Known(stream.upload_sequence_token);
        self.stream = Some(name);
        self.rotations += 1;
        Ok(())
    }

    async fn find_stream(&self, name: &str) -> Result<Option<LogStream>, ServiceError> {
        let streams = with_timeout(
            self.request_timeout,
            self.service.describe_log_streams(&self.group, name),
        )
        .await?;

        // Prefix listings can include longer names, e.g. a tagged instance.
        Ok(streams.into_iter().find(|s| s.log_stream_name == name))
    }

    /// Forget the token so the next cycle re-reads it.
    pub fn invalidate(&mut self) {
        self.token = TokenState::Unknown;
    }

    /// Record the token returned by a successful append.
    pub fn accept_token(&mut self, token: Option<String>) {
        self.token = TokenState::Known(token);
    }

    /// True when the date moved past the adopted stream or the token is
    /// unknown.
    pub fn needs_rotation(&self, current_name: &str) -> bool {
        self.token == TokenState::Unknown || self.stream.as_deref() != Some(current_name)
    }

    pub fn current_stream_name(&self) -> String {
        self.naming.current_stream_name()
    }

    pub fn token(&self) -> &TokenState {
        &self.token
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    /// Stream adopted by the last rotation.
    pub fn stream(&self) -> Option<&str> {
        self.stream.as_deref()
    }

    pub fn service(&self) -> &Arc<dyn LogStreamService> {
        &self.service
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    pub fn rotations(&self) -> u64 {
        self.rotations
    }

    /// Whether the log group has been confirmed to exist.
    pub fn is_group_ready(&self) -> bool {
        self.group_ready
    }
}
