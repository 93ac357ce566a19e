use crate::service::{
    InputLogEvent, LogGroupPage, LogStream, LogStreamService, ServiceError,
};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

const TARGET_PREFIX: &str = "Logs_20140328";
const CONTENT_TYPE: &str = "application/x-amz-json-1.1";

/// Configuration for [`HttpLogStreamService`].
#[derive(Clone, Debug)]
pub struct HttpServiceConfig {
    /// Base URL, e.g. "https://logs.eu-west-1.amazonaws.com".
    pub endpoint: String,
    pub request_timeout: Duration,
}

impl HttpServiceConfig {
    /// Default public endpoint for a region.
    pub fn for_region(region: &str, request_timeout: Duration) -> Self {
        Self {
            endpoint: crate::backend::default_endpoint(region),
            request_timeout,
        }
    }
}

/// [`LogStreamService`] speaking the JSON log-stream protocol over HTTP.
///
/// Every operation is a `POST /` with an `X-Amz-Target` header naming the
/// action. Requests are sent unsigned: deployments put a signing proxy or a
/// compatible endpoint in front.
#[derive(Clone, Debug)]
pub struct HttpLogStreamService {
    client: Client,
    endpoint: String,
    request_timeout: Duration,
}

impl HttpLogStreamService {
    pub fn new(config: HttpServiceConfig) -> Result<Self, ServiceError> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .user_agent(format!("logstream-shipper/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ServiceError::Unavailable(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            request_timeout: config.request_timeout,
        })
    }

    async fn call<Req, Resp>(&self, action: &str, request: &Req) -> Result<Resp, ServiceError>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        let body = serde_json::to_vec(request).map_err(|e| ServiceError::Decode(e.to_string()))?;
        debug!(action, bytes = body.len(), "calling log-stream service");

        let resp = self
            .client
            .post(format!("{}/", self.endpoint))
            .header("X-Amz-Target", format!("{TARGET_PREFIX}.{action}"))
            .header(reqwest::header::CONTENT_TYPE, CONTENT_TYPE)
            .body(body)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = resp.status();
        let bytes = resp.bytes().await.map_err(|e| self.transport_error(e))?;

        if status.is_success() {
            let payload: &[u8] = if bytes.is_empty() { b"{}" } else { &bytes };
            return serde_json::from_slice(payload).map_err(|e| ServiceError::Decode(e.to_string()));
        }
        Err(classify(status, &bytes))
    }

    fn transport_error(&self, err: reqwest::Error) -> ServiceError {
        if err.is_timeout() {
            ServiceError::Timeout(self.request_timeout)
        } else {
            ServiceError::Unavailable(err.to_string())
        }
    }
}

#[derive(Deserialize, Default)]
struct ErrorBody {
    #[serde(rename = "__type", default)]
    kind: String,
    #[serde(alias = "Message", default)]
    message: String,
    #[serde(rename = "expectedSequenceToken", default)]
    expected_sequence_token: Option<String>,
}

/// Map a non-success response onto the service error taxonomy.
fn classify(status: StatusCode, body: &[u8]) -> ServiceError {
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        return ServiceError::Unavailable(format!("{status}: {}", String::from_utf8_lossy(body)));
    }

    let error: ErrorBody = serde_json::from_slice(body).unwrap_or_default();
    // `__type` may carry a namespace, e.g. "com.amazonaws.logs#ResourceNotFoundException".
    let code = error.kind.rsplit('#').next().unwrap_or_default();
    if code.is_empty() {
        return ServiceError::Rejected {
            code: status.to_string(),
            message: String::from_utf8_lossy(body).into_owned(),
        };
    }
    let code = code.to_string();
    ServiceError::from_code(&code, error.message.clone(), error.expected_sequence_token)
        .unwrap_or(ServiceError::Rejected {
            code,
            message: error.message,
        })
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DescribeLogGroupsRequest<'a> {
    log_group_name_prefix: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    next_token: Option<&'a str>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LogGroupRequest<'a> {
    log_group_name: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DescribeLogStreamsRequest<'a> {
    log_group_name: &'a str,
    log_stream_name_prefix: &'a str,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct DescribeLogStreamsResponse {
    #[serde(default)]
    log_streams: Vec<LogStream>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateLogStreamRequest<'a> {
    log_group_name: &'a str,
    log_stream_name: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PutLogEventsRequest<'a> {
    log_group_name: &'a str,
    log_stream_name: &'a str,
    log_events: &'a [InputLogEvent],
    #[serde(skip_serializing_if = "Option::is_none")]
    sequence_token: Option<&'a str>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct PutLogEventsResponse {
    #[serde(default)]
    next_sequence_token: Option<String>,
}

#[derive(Deserialize)]
struct Empty {}

#[async_trait]
impl LogStreamService for HttpLogStreamService {
    async fn describe_log_groups(
        &self,
        prefix: &str,
        next_token: Option<&str>,
    ) -> Result<LogGroupPage, ServiceError> {
        let request = DescribeLogGroupsRequest {
            log_group_name_prefix: prefix,
            next_token,
        };
        self.call("DescribeLogGroups", &request).await
    }

    async fn create_log_group(&self, name: &str) -> Result<(), ServiceError> {
        let _: Empty = self
            .call("CreateLogGroup", &LogGroupRequest { log_group_name: name })
            .await?;
        Ok(())
    }

    async fn describe_log_streams(
        &self,
        group: &str,
        prefix: &str,
    ) -> Result<Vec<LogStream>, ServiceError> {
        let request = DescribeLogStreamsRequest {
            log_group_name: group,
            log_stream_name_prefix: prefix,
        };
        let response: DescribeLogStreamsResponse = self.call("DescribeLogStreams", &request).await?;
        Ok(response.log_streams)
    }

    async fn create_log_stream(&self, group: &str, name: &str) -> Result<(), ServiceError> {
        let request = CreateLogStreamRequest {
            log_group_name: group,
            log_stream_name: name,
        };
        let _: Empty = self.call("CreateLogStream", &request).await?;
        Ok(())
    }

    async fn put_log_events(
        &self,
        group: &str,
        stream: &str,
        sequence_token: Option<&str>,
        events: &[InputLogEvent],
    ) -> Result<Option<String>, ServiceError> {
        let request = PutLogEventsRequest {
            log_group_name: group,
            log_stream_name: stream,
            log_events: events,
            sequence_token,
        };
        let response: PutLogEventsResponse = self.call("PutLogEvents", &request).await?;
        Ok(response.next_sequence_token)
    }
}
