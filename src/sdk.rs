use crate::config::ShipperConfig;
use crate::service::{
    InputLogEvent, LogGroup, LogGroupPage, LogStream, LogStreamService, ServiceError,
};
use async_trait::async_trait;
use aws_config::timeout::TimeoutConfig;
use aws_config::BehaviorVersion;
use aws_sdk_cloudwatchlogs::config::{Credentials, Region};
use aws_sdk_cloudwatchlogs::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_cloudwatchlogs::operation::put_log_events::PutLogEventsError;
use aws_sdk_cloudwatchlogs::types::InputLogEvent as SdkLogEvent;
use aws_sdk_cloudwatchlogs::Client;
use std::fmt::Display;
use std::time::Duration;
use tracing::{debug, warn};

/// Tag used when the instance id cannot be read from instance metadata.
pub const INSTANCE_ID_NOT_FOUND: &str = "EC2-instance-id-not-found";

/// Static credentials handed to the SDK instead of the default chain.
#[derive(Clone)]
pub struct StaticCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

/// Configuration for [`SdkLogStreamService`].
#[derive(Clone)]
pub struct SdkServiceConfig {
    pub region: String,
    /// Custom endpoint such as a local emulator; `None` for the regional one.
    pub endpoint_url: Option<String>,
    /// `None` resolves credentials through the default provider chain.
    pub credentials: Option<StaticCredentials>,
    pub request_timeout: Duration,
}

impl SdkServiceConfig {
    pub fn from_shipper_config(config: &ShipperConfig, endpoint_url: Option<String>) -> Self {
        let credentials = match (&config.access_key_id, &config.secret_access_key) {
            (Some(access_key_id), Some(secret_access_key)) => Some(StaticCredentials {
                access_key_id: access_key_id.clone(),
                secret_access_key: secret_access_key.clone(),
                session_token: config.session_token.clone(),
            }),
            _ => None,
        };

        Self {
            region: config.region.clone(),
            endpoint_url,
            credentials,
            request_timeout: config.request_timeout,
        }
    }
}

/// [`LogStreamService`] on the official SDK client, with SigV4 signing and
/// the standard credential chain.
#[derive(Clone, Debug)]
pub struct SdkLogStreamService {
    client: Client,
    request_timeout: Duration,
}

impl SdkLogStreamService {
    pub async fn new(config: SdkServiceConfig) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .timeout_config(
                TimeoutConfig::builder()
                    .operation_timeout(config.request_timeout)
                    .build(),
            );

        if let Some(credentials) = config.credentials {
            loader = loader.credentials_provider(Credentials::new(
                credentials.access_key_id,
                credentials.secret_access_key,
                credentials.session_token,
                None,
                "logstream-shipper",
            ));
        }
        if let Some(endpoint_url) = config.endpoint_url {
            loader = loader.endpoint_url(endpoint_url);
        }

        let sdk_config = loader.load().await;
        debug!(region = %config.region, "built signed log-stream client");
        Self::from_client(Client::new(&sdk_config), config.request_timeout)
    }

    /// Wrap an already configured client.
    pub fn from_client(client: Client, request_timeout: Duration) -> Self {
        Self {
            client,
            request_timeout,
        }
    }

    fn error<E, R>(&self, err: SdkError<E, R>) -> ServiceError
    where
        E: ProvideErrorMetadata + std::error::Error + 'static,
        R: std::fmt::Debug + 'static,
    {
        match &err {
            SdkError::TimeoutError(_) => return ServiceError::Timeout(self.request_timeout),
            SdkError::DispatchFailure(_) | SdkError::ResponseError(_) => {
                return ServiceError::Unavailable(DisplayErrorContext(&err).to_string());
            }
            _ => {}
        }

        let code = err.code().unwrap_or_default().to_string();
        let message = err.message().unwrap_or_default().to_string();
        ServiceError::from_code(&code, message.clone(), None).unwrap_or(ServiceError::Rejected {
            code,
            message: if message.is_empty() {
                DisplayErrorContext(&err).to_string()
            } else {
                message
            },
        })
    }
}

#[async_trait]
impl LogStreamService for SdkLogStreamService {
    async fn describe_log_groups(
        &self,
        prefix: &str,
        next_token: Option<&str>,
    ) -> Result<LogGroupPage, ServiceError> {
        let output = self
            .client
            .describe_log_groups()
            .log_group_name_prefix(prefix)
            .set_next_token(next_token.map(str::to_string))
            .send()
            .await
            .map_err(|e| self.error(e))?;

        Ok(LogGroupPage {
            log_groups: output
                .log_groups()
                .iter()
                .filter_map(|g| g.log_group_name())
                .map(|name| LogGroup {
                    log_group_name: name.to_string(),
                })
                .collect(),
            next_token: output.next_token().map(str::to_string),
        })
    }

    async fn create_log_group(&self, name: &str) -> Result<(), ServiceError> {
        self.client
            .create_log_group()
            .log_group_name(name)
            .send()
            .await
            .map_err(|e| self.error(e))?;
        Ok(())
    }

    async fn describe_log_streams(
        &self,
        group: &str,
        prefix: &str,
    ) -> Result<Vec<LogStream>, ServiceError> {
        let output = self
            .client
            .describe_log_streams()
            .log_group_name(group)
            .log_stream_name_prefix(prefix)
            .send()
            .await
            .map_err(|e| self.error(e))?;

        Ok(output
            .log_streams()
            .iter()
            .filter_map(|s| {
                s.log_stream_name().map(|name| LogStream {
                    log_stream_name: name.to_string(),
                    upload_sequence_token: s.upload_sequence_token().map(str::to_string),
                })
            })
            .collect())
    }

    async fn create_log_stream(&self, group: &str, name: &str) -> Result<(), ServiceError> {
        self.client
            .create_log_stream()
            .log_group_name(group)
            .log_stream_name(name)
            .send()
            .await
            .map_err(|e| self.error(e))?;
        Ok(())
    }

    async fn put_log_events(
        &self,
        group: &str,
        stream: &str,
        sequence_token: Option<&str>,
        events: &[InputLogEvent],
    ) -> Result<Option<String>, ServiceError> {
        let log_events = events
            .iter()
            .map(|event| {
                SdkLogEvent::builder()
                    .timestamp(event.timestamp)
                    .message(event.message.clone())
                    .build()
                    .map_err(|e| ServiceError::Rejected {
                        code: "InvalidParameterException".to_string(),
                        message: e.to_string(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let output = self
            .client
            .put_log_events()
            .log_group_name(group)
            .log_stream_name(stream)
            .set_sequence_token(sequence_token.map(str::to_string))
            .set_log_events(Some(log_events))
            .send()
            .await
            .map_err(|err| {
                // Token errors carry the expected token only on the typed variant.
                let typed = match err.as_service_error() {
                    Some(PutLogEventsError::InvalidSequenceTokenException(e)) => {
                        Some(ServiceError::StaleToken {
                            expected: e.expected_sequence_token().map(str::to_string),
                        })
                    }
                    Some(PutLogEventsError::DataAlreadyAcceptedException(e)) => {
                        Some(ServiceError::DataAlreadyAccepted {
                            expected: e.expected_sequence_token().map(str::to_string),
                        })
                    }
                    _ => None,
                };
                typed.unwrap_or_else(|| self.error(err))
            })?;

        Ok(output.next_sequence_token().map(str::to_string))
    }
}

/// Read this machine's EC2 instance id from instance metadata.
///
/// Off EC2 (or when metadata is disabled) this returns
/// [`INSTANCE_ID_NOT_FOUND`] after at most one attempt bounded by `timeout`.
pub async fn ec2_instance_id(timeout: Duration) -> String {
    let client = aws_config::imds::Client::builder()
        .max_attempts(1)
        .connect_timeout(timeout)
        .read_timeout(timeout)
        .build();

    let result = client
        .get("/latest/meta-data/instance-id")
        .await
        .map(|id| AsRef::<str>::as_ref(&id).to_string());
    instance_id_or_fallback(result)
}

fn instance_id_or_fallback<E: Display>(result: Result<String, E>) -> String {
    match result {
        Ok(id) if !id.trim().is_empty() => id.trim().to_string(),
        Ok(_) => INSTANCE_ID_NOT_FOUND.to_string(),
        Err(e) => {
            warn!(error = %e, "failed to read EC2 instance id");
            INSTANCE_ID_NOT_FOUND.to_string()
        }
    }
}
