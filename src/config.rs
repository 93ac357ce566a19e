//! Configuration for the shipper.

use crate::env::*;
use crate::publisher::FailurePolicy;
use crate::record::Level;
use std::env;
use std::fmt;
use std::time::Duration;

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} cannot be empty")]
    Empty(&'static str),

    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("invalid value for {key}: {value}")]
    Invalid { key: &'static str, value: String },

    #[error("access_key_id and secret_access_key must be set together")]
    PartialCredentials,
}

#[derive(Clone)]
pub struct ShipperConfig {
    /// Remote log group, fixed for the process lifetime.
    pub log_group: String,

    /// Prefix of the daily stream names.
    pub stream_prefix: String,

    /// Region used to derive the endpoint when none is given.
    pub region: String,

    /// Explicit endpoint. `None` uses the signed client against the
    /// regional endpoint; see [`crate::backend::parse_endpoint`].
    pub endpoint: Option<String>,

    /// Static credentials. When both are `None` the default provider chain
    /// (environment, profile, web identity, instance role) is used.
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub session_token: Option<String>,

    /// Time between publish cycles.
    pub flush_interval: Duration,

    /// Upper bound for every remote call.
    pub request_timeout: Duration,

    /// Disposal of a batch whose retry failed.
    pub failure_policy: FailurePolicy,

    /// Appended to stream names when several instances share a host.
    pub instance_tag: Option<String>,

    /// Use the EC2 instance id as the tag when `instance_tag` is unset.
    pub ec2_instance_tag: bool,

    /// Events below this level are not shipped.
    pub min_level: Level,

    /// Messages containing any of these fragments are not shipped.
    pub suppressed_messages: Vec<String>,

    /// Also print events through a `fmt` layer.
    pub enable_stdout: bool,
}

impl Default for ShipperConfig {
    fn default() -> Self {
        Self {
            log_group: "application".to_string(),
            stream_prefix: "app".to_string(),
            region: "us-east-1".to_string(),
            endpoint: None,
            access_key_id: None,
            secret_access_key: None,
            session_token: None,
            flush_interval: Duration::from_secs(7),
            request_timeout: Duration::from_secs(10),
            failure_policy: FailurePolicy::Drop,
            instance_tag: None,
            ec2_instance_tag: false,
            min_level: Level::Info,
            suppressed_messages: Vec::new(),
            enable_stdout: false,
        }
    }
}

impl ShipperConfig {
    pub fn new(log_group: impl Into<String>, stream_prefix: impl Into<String>) -> Self {
        Self {
            log_group: log_group.into(),
            stream_prefix: stream_prefix.into(),
            ..Self::default()
        }
    }

    /// Load configuration from `LOGSTREAM_*` environment variables on top
    /// of the defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = ShipperConfig::default();

        if let Ok(group) = env::var(LOGSTREAM_GROUP_ENV) {
            config.log_group = group;
        }

        if let Ok(prefix) = env::var(LOGSTREAM_STREAM_PREFIX_ENV) {
            config.stream_prefix = prefix;
        }

        config.region = env_or(LOGSTREAM_REGION_ENV, &config.region);

        if let Ok(endpoint) = env::var(LOGSTREAM_ENDPOINT_ENV) {
            config.endpoint = Some(endpoint).filter(|e| !e.is_empty());
        }

        config.access_key_id = non_empty_var(LOGSTREAM_ACCESS_KEY_ID_ENV);
        config.secret_access_key = non_empty_var(LOGSTREAM_SECRET_ACCESS_KEY_ENV);
        config.session_token = non_empty_var(LOGSTREAM_SESSION_TOKEN_ENV);

        if let Ok(secs) = env::var(LOGSTREAM_FLUSH_INTERVAL_SECS_ENV) {
            config.flush_interval = Duration::from_secs(parse(LOGSTREAM_FLUSH_INTERVAL_SECS_ENV, &secs)?);
        }

        if let Ok(ms) = env::var(LOGSTREAM_REQUEST_TIMEOUT_MS_ENV) {
            config.request_timeout = Duration::from_millis(parse(LOGSTREAM_REQUEST_TIMEOUT_MS_ENV, &ms)?);
        }

        if let Ok(policy) = env::var(LOGSTREAM_FAILURE_POLICY_ENV) {
            config.failure_policy = parse_policy(&policy)?;
        }

        if let Ok(tag) = env::var(LOGSTREAM_INSTANCE_TAG_ENV) {
            config.instance_tag = Some(tag).filter(|t| !t.is_empty());
        }

        if let Ok(flag) = env::var(LOGSTREAM_EC2_INSTANCE_TAG_ENV) {
            config.ec2_instance_tag = flag.eq_ignore_ascii_case("true");
        }

        if let Ok(level) = env::var(LOGSTREAM_MIN_LEVEL_ENV) {
            config.min_level = parse_level(&level)?;
        }

        if let Ok(patterns) = env::var(LOGSTREAM_SUPPRESS_ENV) {
            config.suppressed_messages = patterns
                .split('|')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(str::to_string)
                .collect();
        }

        if let Ok(stdout) = env::var(LOGSTREAM_STDOUT_ENV) {
            config.enable_stdout = stdout.eq_ignore_ascii_case("true");
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.log_group.trim().is_empty() {
            return Err(ConfigError::Empty("log_group"));
        }

        if self.stream_prefix.trim().is_empty() {
            return Err(ConfigError::Empty("stream_prefix"));
        }

        let signed = match &self.endpoint {
            None => true,
            Some(endpoint) => endpoint.to_ascii_lowercase().starts_with("aws+"),
        };
        if signed && self.region.trim().is_empty() {
            return Err(ConfigError::Empty("region"));
        }

        if self.access_key_id.is_some() != self.secret_access_key.is_some() {
            return Err(ConfigError::PartialCredentials);
        }

        if self.flush_interval.is_zero() {
            return Err(ConfigError::Zero("flush_interval"));
        }

        if self.request_timeout.is_zero() {
            return Err(ConfigError::Zero("request_timeout"));
        }

        Ok(())
    }
}

impl fmt::Debug for ShipperConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redacted = |secret: &Option<String>| secret.as_ref().map(|_| "<redacted>");
        f.debug_struct("ShipperConfig")
            .field("log_group", &self.log_group)
            .field("stream_prefix", &self.stream_prefix)
            .field("region", &self.region)
            .field("endpoint", &self.endpoint)
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &redacted(&self.secret_access_key))
            .field("session_token", &redacted(&self.session_token))
            .field("flush_interval", &self.flush_interval)
            .field("request_timeout", &self.request_timeout)
            .field("failure_policy", &self.failure_policy)
            .field("instance_tag", &self.instance_tag)
            .field("ec2_instance_tag", &self.ec2_instance_tag)
            .field("min_level", &self.min_level)
            .field("suppressed_messages", &self.suppressed_messages)
            .field("enable_stdout", &self.enable_stdout)
            .finish()
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse(key: &'static str, value: &str) -> Result<u64, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::Invalid {
        key,
        value: value.to_string(),
    })
}

fn parse_policy(value: &str) -> Result<FailurePolicy, ConfigError> {
    let value = value.trim().to_ascii_lowercase();
    match value.split_once(':') {
        None if value == "drop" => Ok(FailurePolicy::Drop),
        Some(("requeue", max)) => Ok(FailurePolicy::Requeue {
            max_records: parse(LOGSTREAM_FAILURE_POLICY_ENV, max)? as usize,
        }),
        _ => Err(ConfigError::Invalid {
            key: LOGSTREAM_FAILURE_POLICY_ENV,
            value: value.clone(),
        }),
    }
}

fn parse_level(value: &str) -> Result<Level, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "trace" => Ok(Level::Trace),
        "debug" => Ok(Level::Debug),
        "info" => Ok(Level::Info),
        "warn" | "warning" => Ok(Level::Warn),
        "error" => Ok(Level::Error),
        _ => Err(ConfigError::Invalid {
            key: LOGSTREAM_MIN_LEVEL_ENV,
            value: value.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_schedule() {
        let config = ShipperConfig::default();
        assert_eq!(config.flush_interval, Duration::from_secs(7));
        assert_eq!(config.failure_policy, FailurePolicy::Drop);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validation_rejects_blank_names_and_zero_durations() {
        let mut config = ShipperConfig::new(" ", "app");
        assert_eq!(config.validate(), Err(ConfigError::Empty("log_group")));

        config = ShipperConfig::new("group", "");
        assert_eq!(config.validate(), Err(ConfigError::Empty("stream_prefix")));

        config = ShipperConfig::new("group", "app");
        config.flush_interval = Duration::ZERO;
        assert_eq!(config.validate(), Err(ConfigError::Zero("flush_interval")));
    }

    #[test]
    fn credentials_come_in_pairs() {
        let mut config = ShipperConfig::new("group", "app");
        config.access_key_id = Some("AKIDEXAMPLE".into());
        assert_eq!(config.validate(), Err(ConfigError::PartialCredentials));

        config.secret_access_key = Some("wJalrXUtnFEMI".into());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn signed_endpoints_need_a_region() {
        let mut config = ShipperConfig::new("group", "app");
        config.region = String::new();
        assert_eq!(config.validate(), Err(ConfigError::Empty("region")));

        config.endpoint = Some("aws+http://localhost:4566".into());
        assert_eq!(config.validate(), Err(ConfigError::Empty("region")));

        config.endpoint = Some("http://signing-proxy:8080".into());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn debug_output_hides_secrets() {
        let mut config = ShipperConfig::new("group", "app");
        config.access_key_id = Some("AKIDEXAMPLE".into());
        config.secret_access_key = Some("wJalrXUtnFEMI".into());
        config.session_token = Some("FwoGZXIvYXdz".into());

        let rendered = format!("{config:?}");
        assert!(rendered.contains("AKIDEXAMPLE"));
        assert!(!rendered.contains("wJalrXUtnFEMI"));
        assert!(!rendered.contains("FwoGZXIvYXdz"));
    }

    #[test]
    fn failure_policy_parsing() {
        assert_eq!(parse_policy("drop"), Ok(FailurePolicy::Drop));
        assert_eq!(
            parse_policy("Requeue:500"),
            Ok(FailurePolicy::Requeue { max_records: 500 })
        );
        assert!(parse_policy("requeue").is_err());
        assert!(parse_policy("requeue:lots").is_err());
    }

    #[test]
    fn level_parsing() {
        assert_eq!(parse_level("WARN"), Ok(Level::Warn));
        assert_eq!(parse_level(" debug "), Ok(Level::Debug));
        assert!(parse_level("loud").is_err());
    }
}
