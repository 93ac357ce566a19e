use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

/// A log group as reported by the remote service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogGroup {
    pub log_group_name: String,
}

/// One page of a log group listing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogGroupPage {
    #[serde(default)]
    pub log_groups: Vec<LogGroup>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_token: Option<String>,
}

/// A log stream and the sequence token its next append must carry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogStream {
    pub log_stream_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upload_sequence_token: Option<String>,
}

/// A formatted entry ready for a batch append.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputLogEvent {
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    pub message: String,
}

/// Failures reported by a [`LogStreamService`].
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ServiceError {
    #[error("sequence token rejected (expected {expected:?})")]
    StaleToken { expected: Option<String> },

    #[error("batch was already accepted (next token {expected:?})")]
    DataAlreadyAccepted { expected: Option<String> },

    #[error("resource not found: {0}")]
    ResourceNotFound(String),

    #[error("resource already exists: {0}")]
    AlreadyExists(String),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("service unavailable: {0}")]
    Unavailable(String),

    #[error("request rejected ({code}): {message}")]
    Rejected { code: String, message: String },

    #[error("malformed response: {0}")]
    Decode(String),
}

impl ServiceError {
    /// Map a protocol error code, without namespace, onto the taxonomy.
    ///
    /// Returns `None` for codes with no dedicated variant.
    pub fn from_code(code: &str, message: String, expected: Option<String>) -> Option<Self> {
        Some(match code {
            "InvalidSequenceTokenException" => ServiceError::StaleToken { expected },
            "DataAlreadyAcceptedException" => ServiceError::DataAlreadyAccepted { expected },
            "ResourceNotFoundException" => ServiceError::ResourceNotFound(message),
            "ResourceAlreadyExistsException" => ServiceError::AlreadyExists(message),
            "ServiceUnavailableException" | "ThrottlingException" => ServiceError::Unavailable(message),
            _ => return None,
        })
    }

    /// Whether the failure is cured by re-reading the stream and its token.
    pub fn requires_rotation(&self) -> bool {
        matches!(
            self,
            ServiceError::StaleToken { .. } | ServiceError::ResourceNotFound(_)
        )
    }
}

/// Remote append-only log-stream service.
///
/// Implementations are called from the single publisher task; none of the
/// methods are expected to be invoked concurrently for the same stream.
#[async_trait]
pub trait LogStreamService: Send + Sync {
    /// List groups whose name starts with `prefix`, one page at a time.
    async fn describe_log_groups(
        &self,
        prefix: &str,
        next_token: Option<&str>,
    ) -> Result<LogGroupPage, ServiceError>;

    async fn create_log_group(&self, name: &str) -> Result<(), ServiceError>;

    /// List streams in `group` whose name starts with `prefix`.
    async fn describe_log_streams(
        &self,
        group: &str,
        prefix: &str,
    ) -> Result<Vec<LogStream>, ServiceError>;

    async fn create_log_stream(&self, group: &str, name: &str) -> Result<(), ServiceError>;

    /// Append one ordered batch and return the token for the next append.
    async fn put_log_events(
        &self,
        group: &str,
        stream: &str,
        sequence_token: Option<&str>,
        events: &[InputLogEvent],
    ) -> Result<Option<String>, ServiceError>;
}

/// Bound a remote call; expiry is reported as [`ServiceError::Timeout`].
pub async fn with_timeout<T, F>(limit: Duration, call: F) -> Result<T, ServiceError>
where
    F: Future<Output = Result<T, ServiceError>>,
{
    tokio::time::timeout(limit, call)
        .await
        .unwrap_or(Err(ServiceError::Timeout(limit)))
}
