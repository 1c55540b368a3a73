use crate::env::{
    env_or, env_parse, STACK_SINK_BATCH_SIZE_ENV, STACK_SINK_HOST_ENV, STACK_SINK_PORT_ENV,
    STACK_SINK_PROJECT_KEY_ENV, STACK_SINK_TLS_ENV, STACK_SINK_TRANSPORT_ENV,
};
use crate::transport::TransportKind;
use serde::Serialize;
use tokio::time::Duration;

pub const MAX_BATCH_SIZE: usize = 500;
pub const DEFAULT_BATCH_SIZE: usize = 200;
pub const DEFAULT_HTTP_HOST: &str = "https://api.stklog.io";
pub const DEFAULT_TCP_DOMAIN: &str = "api.stklog.io";
pub const DEFAULT_TCP_PORT: u16 = 4242;
pub const DEFAULT_CREDENTIAL_HEADER: &str = "Stklog-Project-Key";

/// Configuration of the shipper: transport selection, batching and
/// delivery policy.
///
/// **Fields**
/// - `transport`: which backend ships the records.
/// - `project_key`: credential attached to every batch or frame.
/// - `batch_size`: requested records per transport unit. Read it through
///   [`ShipperConfig::effective_batch_size`], out-of-range values fall
///   back to [`DEFAULT_BATCH_SIZE`].
/// - `host`: collector override. HTTP expects a base URL, TCP a bare
///   domain. `None` selects the default for the transport.
/// - `port`: TCP port override.
/// - `tls`: wrap the TCP connection in TLS.
/// - `flush_interval`: period of the drain-and-send cycle.
/// - `request_timeout`: per HTTP request.
/// - `max_retries`: total attempts for a batch answered with 500/502/504.
/// - `flush_timeout`: upper bound on the final flush at shutdown.
/// - `channel_capacity`: slots of the producer handoff channel. The
///   default of one makes every producer wait for the loop.
/// - `level_offset`: added to the normalized severity of each log event.
/// - `enable_stdout`: also print events through a `fmt` layer when
///   installed via [`init_tracing`](crate::init::init_tracing).
#[derive(Clone, Debug, Serialize)]
pub struct ShipperConfig {
    pub transport: TransportKind,
    pub project_key: String,
    pub batch_size: usize,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub tls: bool,
    pub credential_header: String,
    pub flush_interval: Duration,
    pub request_timeout: Duration,
    pub max_retries: u32,
    pub retry_backoff: Duration,
    pub flush_timeout: Duration,
    pub channel_capacity: usize,
    pub level_offset: i32,
    pub enable_stdout: bool,
}

impl Default for ShipperConfig {
    fn default() -> Self {
        Self {
            transport: TransportKind::Http,
            project_key: String::new(),
            batch_size: DEFAULT_BATCH_SIZE,
            host: None,
            port: None,
            tls: true,
            credential_header: DEFAULT_CREDENTIAL_HEADER.to_string(),
            flush_interval: Duration::from_secs(1),
            request_timeout: Duration::from_secs(10),
            max_retries: 3,
            retry_backoff: Duration::from_millis(100),
            flush_timeout: Duration::from_secs(30),
            channel_capacity: 1,
            level_offset: 1,
            enable_stdout: false,
        }
    }
}

impl ShipperConfig {
    /// Config with the given project key and defaults everywhere else.
    pub fn new(project_key: impl Into<String>) -> Self {
        Self {
            project_key: project_key.into(),
            ..Self::default()
        }
    }

    /// Overlay `STACK_SINK_*` environment variables on top of the defaults.
    ///
    /// Unset or malformed values keep their default; nothing here fails.
    pub fn from_env() -> Self {
        let mut config = Self::new(env_or(STACK_SINK_PROJECT_KEY_ENV, ""));
        if let Ok(kind) = std::env::var(STACK_SINK_TRANSPORT_ENV) {
            config.transport = TransportKind::parse_or_default(&kind);
        }
        if let Some(batch_size) = env_parse(STACK_SINK_BATCH_SIZE_ENV) {
            config.batch_size = batch_size;
        }
        config.host = std::env::var(STACK_SINK_HOST_ENV).ok().filter(|h| !h.is_empty());
        config.port = env_parse(STACK_SINK_PORT_ENV);
        if let Some(tls) = env_parse(STACK_SINK_TLS_ENV) {
            config.tls = tls;
        }
        config
    }

    /// Batch size actually used when slicing drained records.
    pub fn effective_batch_size(&self) -> usize {
        if self.batch_size > 0 && self.batch_size <= MAX_BATCH_SIZE {
            self.batch_size
        } else {
            DEFAULT_BATCH_SIZE
        }
    }

    /// Tick period, never shorter than 10ms.
    pub fn effective_flush_interval(&self) -> Duration {
        self.flush_interval.max(Duration::from_millis(10))
    }

    pub fn effective_channel_capacity(&self) -> usize {
        self.channel_capacity.max(1)
    }

    pub fn http_host(&self) -> String {
        self.host
            .clone()
            .unwrap_or_else(|| DEFAULT_HTTP_HOST.to_string())
            .trim_end_matches('/')
            .to_string()
    }

    pub fn tcp_domain(&self) -> String {
        self.host.clone().unwrap_or_else(|| DEFAULT_TCP_DOMAIN.to_string())
    }

    pub fn tcp_port(&self) -> u16 {
        self.port.unwrap_or(DEFAULT_TCP_PORT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_size_out_of_range_falls_back_to_default() {
        let mut config = ShipperConfig::new("abc123");
        config.batch_size = 0;
        assert_eq!(config.effective_batch_size(), DEFAULT_BATCH_SIZE);
        config.batch_size = MAX_BATCH_SIZE + 1;
        assert_eq!(config.effective_batch_size(), DEFAULT_BATCH_SIZE);
        config.batch_size = MAX_BATCH_SIZE;
        assert_eq!(config.effective_batch_size(), MAX_BATCH_SIZE);
        config.batch_size = 2;
        assert_eq!(config.effective_batch_size(), 2);
    }

    #[test]
    fn degenerate_interval_and_capacity_are_floored() {
        let mut config = ShipperConfig::default();
        config.flush_interval = Duration::from_millis(1);
        config.channel_capacity = 0;
        assert_eq!(config.effective_flush_interval(), Duration::from_millis(10));
        assert_eq!(config.effective_channel_capacity(), 1);
    }

    #[test]
    fn hosts_default_per_transport() {
        let mut config = ShipperConfig::default();
        assert_eq!(config.http_host(), DEFAULT_HTTP_HOST);
        assert_eq!(config.tcp_domain(), DEFAULT_TCP_DOMAIN);
        assert_eq!(config.tcp_port(), DEFAULT_TCP_PORT);

        config.host = Some("http://127.0.0.1:8080/".to_string());
        assert_eq!(config.http_host(), "http://127.0.0.1:8080");
    }
}
