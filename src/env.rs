//! Environment variable names read by
//! [`ShipperConfig::from_env`](crate::config::ShipperConfig::from_env).
//!
//! These are purely helpers; the core types never touch the environment
//! themselves.

/// Target log group name.
pub const LOGSTREAM_GROUP_ENV: &str = "LOGSTREAM_GROUP";

/// Prefix of the daily stream names.
pub const LOGSTREAM_STREAM_PREFIX_ENV: &str = "LOGSTREAM_STREAM_PREFIX";

/// Service region, used to derive the default endpoint.
pub const LOGSTREAM_REGION_ENV: &str = "LOGSTREAM_REGION";

/// Explicit endpoint: `aws+https://...` for a signed custom endpoint,
/// `https://...` for an unsigned proxy, or `memory://`.
pub const LOGSTREAM_ENDPOINT_ENV: &str = "LOGSTREAM_ENDPOINT";

/// Static access key id. Without it the default credential chain is used.
pub const LOGSTREAM_ACCESS_KEY_ID_ENV: &str = "LOGSTREAM_ACCESS_KEY_ID";

/// Secret paired with [`LOGSTREAM_ACCESS_KEY_ID_ENV`].
pub const LOGSTREAM_SECRET_ACCESS_KEY_ENV: &str = "LOGSTREAM_SECRET_ACCESS_KEY";

/// Optional session token for temporary static credentials.
pub const LOGSTREAM_SESSION_TOKEN_ENV: &str = "LOGSTREAM_SESSION_TOKEN";

/// `true` to tag stream names with the EC2 instance id when no explicit
/// tag is set.
pub const LOGSTREAM_EC2_INSTANCE_TAG_ENV: &str = "LOGSTREAM_EC2_INSTANCE_TAG";

/// Seconds between publish cycles.
pub const LOGSTREAM_FLUSH_INTERVAL_SECS_ENV: &str = "LOGSTREAM_FLUSH_INTERVAL_SECS";

/// Per-request timeout in milliseconds.
pub const LOGSTREAM_REQUEST_TIMEOUT_MS_ENV: &str = "LOGSTREAM_REQUEST_TIMEOUT_MS";

/// `drop` or `requeue:<max records>`.
pub const LOGSTREAM_FAILURE_POLICY_ENV: &str = "LOGSTREAM_FAILURE_POLICY";

/// Optional tag appended to stream names to separate instances on one host.
pub const LOGSTREAM_INSTANCE_TAG_ENV: &str = "LOGSTREAM_INSTANCE_TAG";

/// Minimum level shipped: `trace`, `debug`, `info`, `warn` or `error`.
pub const LOGSTREAM_MIN_LEVEL_ENV: &str = "LOGSTREAM_MIN_LEVEL";

/// `|`-separated message fragments that are never shipped.
pub const LOGSTREAM_SUPPRESS_ENV: &str = "LOGSTREAM_SUPPRESS";

/// `true` to also print events to stdout.
pub const LOGSTREAM_STDOUT_ENV: &str = "LOGSTREAM_STDOUT";

/// Read an environment variable or fall back to a provided default.
pub fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}
