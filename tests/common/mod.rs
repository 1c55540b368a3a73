#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::time::Duration;
use tracing_stack_sink::buffer::{EventBuffer, Pending};
use tracing_stack_sink::{LogEvent, SendReport, ShipperConfig, StackRecord, Transport, TransportError};

/// What a [`MemoryTransport`] saw, shared with the test.
#[derive(Clone, Default)]
pub struct Recorded {
    pub sends: Arc<Mutex<Vec<Pending>>>,
    pub active: Arc<AtomicUsize>,
    pub max_active: Arc<AtomicUsize>,
}

impl Recorded {
    pub fn stacks(&self) -> Vec<StackRecord> {
        self.sends.lock().unwrap().iter().flat_map(|p| p.stacks.clone()).collect()
    }

    pub fn logs(&self) -> Vec<LogEvent> {
        self.sends.lock().unwrap().iter().flat_map(|p| p.logs.clone()).collect()
    }
}

/// Transport keeping every drained batch in memory.
pub struct MemoryTransport {
    recorded: Recorded,
    delay: Duration,
}

impl MemoryTransport {
    pub fn new(recorded: Recorded) -> Self {
        Self { recorded, delay: Duration::ZERO }
    }

    pub fn with_delay(recorded: Recorded, delay: Duration) -> Self {
        Self { recorded, delay }
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn init(&mut self) -> Result<(), TransportError> {
        Ok(())
    }

    async fn send(&mut self, buffer: &EventBuffer) -> SendReport {
        let active = self.recorded.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.recorded.max_active.fetch_max(active, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let pending = buffer.drain();
        let report = SendReport {
            stacks: pending.stacks.len(),
            logs: pending.logs.len(),
            failed_batches: 0,
        };
        if !pending.is_empty() {
            self.recorded.sends.lock().unwrap().push(pending);
        }
        self.recorded.active.fetch_sub(1, Ordering::SeqCst);
        report
    }

    fn get_option(&self, _key: &str) -> Option<serde_json::Value> {
        None
    }
}

/// Config that only ships on flush unless the test shortens the interval.
pub fn quiet_config() -> ShipperConfig {
    let mut config = ShipperConfig::new("abc123");
    config.flush_interval = Duration::from_secs(3600);
    config.flush_timeout = Duration::from_secs(5);
    config
}
