use crate::buffer::EventBuffer;
use crate::config::ShipperConfig;
use crate::error::TransportError;
use async_trait::async_trait;
use serde::Serialize;
use std::ops::AddAssign;
use std::str::FromStr;
use tracing::{info, warn};

#[cfg(feature = "http")]
pub mod http;

#[cfg(feature = "tcp")]
pub mod tcp;

/// Delivery backend draining an [`EventBuffer`] towards the collector.
///
/// Only the dispatch loop calls these methods, one call at a time, so
/// implementations own their client or connection without extra locking.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Prepare the backend (build the client, open the connection).
    ///
    /// **Returns**
    /// - `Err(..)` only for failures that make the backend unusable. A
    ///   collector that is unreachable at startup is not one of them.
    async fn init(&mut self) -> Result<(), TransportError>;

    /// Drain and ship exactly what is currently buffered.
    ///
    /// Failures are reported through [`SendReport::failed_batches`] and
    /// the affected records are dropped, never re-queued.
    async fn send(&mut self, buffer: &EventBuffer) -> SendReport;

    /// Ship until the buffer is empty.
    ///
    /// Default implementation repeats [`Transport::send`].
    async fn flush(&mut self, buffer: &EventBuffer) -> SendReport {
        let (stacks, logs) = buffer.len();
        info!(stacks, logs, "flushing stacks/logs from buffer");
        let mut report = SendReport::default();
        while !buffer.is_empty() {
            report += self.send(buffer).await;
        }
        report
    }

    /// Configuration value named `key`, if the transport knows it.
    fn get_option(&self, key: &str) -> Option<serde_json::Value>;
}

/// Outcome of a send or flush.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SendReport {
    /// Stack records accepted by the collector.
    pub stacks: usize,
    /// Log records accepted by the collector.
    pub logs: usize,
    /// Transport units (HTTP batches, TCP frames) that were dropped.
    pub failed_batches: usize,
}

impl AddAssign for SendReport {
    fn add_assign(&mut self, other: Self) {
        self.stacks += other.stacks;
        self.logs += other.logs;
        self.failed_batches += other.failed_batches;
    }
}

/// Configuration shared by every backend.
#[derive(Clone, Debug)]
pub struct TransportBase {
    config: ShipperConfig,
    options: serde_json::Map<String, serde_json::Value>,
}

impl TransportBase {
    pub fn new(config: ShipperConfig) -> Self {
        let options = match serde_json::to_value(&config) {
            Ok(serde_json::Value::Object(map)) => map,
            _ => serde_json::Map::new(),
        };
        Self { config, options }
    }

    pub fn config(&self) -> &ShipperConfig {
        &self.config
    }

    pub fn project_key(&self) -> &str {
        &self.config.project_key
    }

    pub fn get_option(&self, key: &str) -> Option<serde_json::Value> {
        self.options.get(key).cloned()
    }
}

/// Supported transport kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    #[default]
    Http,
    Tcp,
}

/// Error type returned when parsing a [`TransportKind`].
#[derive(thiserror::Error, Debug)]
#[error("unknown transport kind: {0}")]
pub struct UnknownTransport(String);

impl FromStr for TransportKind {
    type Err = UnknownTransport;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "http" => Ok(TransportKind::Http),
            "tcp" => Ok(TransportKind::Tcp),
            other => Err(UnknownTransport(other.to_string())),
        }
    }
}

impl TransportKind {
    /// Parse `s`, falling back to HTTP when it names no known transport.
    pub fn parse_or_default(s: &str) -> Self {
        s.parse().unwrap_or_else(|e| {
            warn!("{}, falling back to http transport", e);
            TransportKind::Http
        })
    }
}

/// Create the backend selected by `config.transport`.
///
/// The returned transport is not initialized yet.
pub fn make_transport(config: &ShipperConfig) -> Result<Box<dyn Transport>, TransportError> {
    match config.transport {
        TransportKind::Http => {
            #[cfg(feature = "http")]
            {
                Ok(Box::new(http::HttpTransport::new(config.clone())))
            }

            #[cfg(not(feature = "http"))]
            {
                Err(TransportError::FeatureDisabled("http"))
            }
        }
        TransportKind::Tcp => {
            #[cfg(feature = "tcp")]
            {
                Ok(Box::new(tcp::TcpTransport::new(config.clone())?))
            }

            #[cfg(not(feature = "tcp"))]
            {
                Err(TransportError::FeatureDisabled("tcp"))
            }
        }
    }
}
