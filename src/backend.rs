use std::sync::Arc;

use crate::config::ShipperConfig;
use crate::memory::InMemoryLogStreamService;
use crate::service::LogStreamService;

/// Supported remote service implementations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// Official SDK client: signed requests, region and credential chain.
    Aws,
    /// Unsigned JSON protocol over HTTP(S), for proxies and compatible servers.
    Http,
    /// In-process service, for tests and local runs.
    Memory,
}

/// Where and how to reach the remote log-stream service.
#[derive(Debug, Clone)]
pub struct BackendConfig {
    pub kind: BackendKind,
    /// Endpoint URL. Empty for [`BackendKind::Memory`] and for the
    /// regional [`BackendKind::Aws`] endpoint.
    pub endpoint: String,
}

impl BackendConfig {
    pub fn new(kind: BackendKind, endpoint: impl Into<String>) -> Self {
        BackendConfig {
            kind,
            endpoint: endpoint.into(),
        }
    }
}

/// Parse an endpoint string and infer the backend kind from its scheme.
///
/// Examples:
/// - "aws+https://logs.eu-west-1.amazonaws.com" (signed)
/// - "aws+http://127.0.0.1:4566" (signed, local emulator)
/// - "https://logs-proxy.internal" (unsigned)
/// - "memory://"
pub fn parse_endpoint(endpoint: &str) -> Result<BackendConfig, EndpointError> {
    let lower = endpoint.to_ascii_lowercase();

    if lower.starts_with("memory://") {
        Ok(BackendConfig::new(BackendKind::Memory, ""))
    } else if lower.starts_with("aws+http://") || lower.starts_with("aws+https://") {
        Ok(BackendConfig::new(BackendKind::Aws, &endpoint["aws+".len()..]))
    } else if lower.starts_with("http://") || lower.starts_with("https://") {
        Ok(BackendConfig::new(BackendKind::Http, endpoint))
    } else {
        Err(EndpointError::UnknownScheme(endpoint.to_string()))
    }
}

/// Public endpoint of the service in `region`.
pub fn default_endpoint(region: &str) -> String {
    format!("https://logs.{region}.amazonaws.com")
}

/// Error type returned when parsing an endpoint.
#[derive(thiserror::Error, Debug)]
pub enum EndpointError {
    #[error("unknown or unsupported endpoint scheme: {0}")]
    UnknownScheme(String),
}

/// Error type returned when building a service from configuration.
#[derive(thiserror::Error, Debug)]
pub enum BackendBuildError {
    #[error(transparent)]
    Endpoint(#[from] EndpointError),

    #[error("aws feature is not enabled")]
    AwsFeatureDisabled,

    #[error("http feature is not enabled")]
    HttpFeatureDisabled,

    #[cfg(feature = "http")]
    #[error("failed to build HTTP service: {0}")]
    Http(#[from] crate::service::ServiceError),
}

/// Build the remote service named by the shipper configuration.
///
/// Without an explicit endpoint the signed SDK client is used against the
/// regional endpoint, with credentials from the configuration or the
/// default provider chain.
pub async fn make_service_from_config(
    config: &ShipperConfig,
) -> Result<Arc<dyn LogStreamService>, BackendBuildError> {
    let backend = match &config.endpoint {
        Some(endpoint) => parse_endpoint(endpoint)?,
        None => BackendConfig::new(BackendKind::Aws, ""),
    };

    match backend.kind {
        BackendKind::Memory => Ok(Arc::new(InMemoryLogStreamService::new()) as Arc<dyn LogStreamService>),
        BackendKind::Aws => {
            #[cfg(feature = "aws")]
            {
                use crate::sdk::{SdkLogStreamService, SdkServiceConfig};

                let endpoint_url = Some(backend.endpoint).filter(|e| !e.is_empty());
                let service =
                    SdkLogStreamService::new(SdkServiceConfig::from_shipper_config(config, endpoint_url))
                        .await;
                Ok(Arc::new(service) as Arc<dyn LogStreamService>)
            }

            #[cfg(not(feature = "aws"))]
            {
                let _ = backend;
                Err(BackendBuildError::AwsFeatureDisabled)
            }
        }
        BackendKind::Http => {
            #[cfg(feature = "http")]
            {
                use crate::cloudwatch::{HttpLogStreamService, HttpServiceConfig};

                let service = HttpLogStreamService::new(HttpServiceConfig {
                    endpoint: backend.endpoint,
                    request_timeout: config.request_timeout,
                })?;
                Ok(Arc::new(service) as Arc<dyn LogStreamService>)
            }

            #[cfg(not(feature = "http"))]
            {
                let _ = backend;
                Err(BackendBuildError::HttpFeatureDisabled)
            }
        }
    }
}
