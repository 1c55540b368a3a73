//! Environment variable names used by this crate for convenient
//! configuration of the shipper from microservices.
//!
//! These are purely helpers; the transports themselves never read the
//! environment. See [`ShipperConfig::from_env`](crate::config::ShipperConfig::from_env).

/// Project credential sent with every batch or frame.
pub const STACK_SINK_PROJECT_KEY_ENV: &str = "STACK_SINK_PROJECT_KEY";

/// Transport kind, `http` or `tcp`.
pub const STACK_SINK_TRANSPORT_ENV: &str = "STACK_SINK_TRANSPORT";

/// Records per batch, clamped to `1..=500`.
pub const STACK_SINK_BATCH_SIZE_ENV: &str = "STACK_SINK_BATCH_SIZE";

/// Collector host override. Base URL for HTTP, bare domain for TCP.
pub const STACK_SINK_HOST_ENV: &str = "STACK_SINK_HOST";

/// Collector TCP port override.
pub const STACK_SINK_PORT_ENV: &str = "STACK_SINK_PORT";

/// Set to `false` to talk plain TCP instead of TLS.
pub const STACK_SINK_TLS_ENV: &str = "STACK_SINK_TLS";

/// Read an environment variable or fall back to a provided default.
pub fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Read and parse an environment variable, `None` when unset or malformed.
pub fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}
