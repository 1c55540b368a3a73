use crate::context::ContextId;
use crate::error::ShipperError;
use crate::record::{Attributes, LogEntry};
use crate::shipper::Shipper;
use chrono::Utc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer};
use tracing_subscriber::registry::LookupSpan;

/// Targets never shipped: this crate and the libraries its transports
/// drive. Their events describe shipping itself.
const IGNORED_TARGETS: &[&str] = &[
    "tracing_stack_sink",
    "hyper",
    "reqwest",
    "h2",
    "rustls",
    "tokio_rustls",
];

fn is_ignored(target: &str) -> bool {
    IGNORED_TARGETS.iter().any(|root| {
        target
            .strip_prefix(root)
            .map_or(false, |rest| rest.is_empty() || rest.starts_with("::"))
    })
}

/// Map a `tracing` level onto the upstream severity scale
/// (`ERROR=2` .. `TRACE=6`), before the configured offset.
pub fn severity(level: &Level) -> i32 {
    match *level {
        Level::ERROR => 2,
        Level::WARN => 3,
        Level::INFO => 4,
        Level::DEBUG => 5,
        _ => 6,
    }
}

/// `tracing_subscriber` layer that attributes events to the stack bound
/// to the current context and hands them to a [`Shipper`].
///
/// Events from contexts without a stack are counted and dropped. Network
/// I/O never happens on the calling thread; the handoff is an append to
/// the shipper's buffer.
pub struct StackLayer {
    shipper: Shipper,
    max_level: Level,
    /// Total events seen by the layer (before filtering by level).
    pub total_events: Arc<AtomicU64>,
    /// Successfully handed to the dispatch loop.
    pub enqueued_events: Arc<AtomicU64>,
    /// No stack bound to the emitting context, or no context at all.
    pub uncorrelated_events: Arc<AtomicU64>,
    /// Fired after the shipper shut down.
    pub dropped_events: Arc<AtomicU64>,
}

impl StackLayer {
    /// Layer shipping every level through `shipper`.
    pub fn new(shipper: Shipper) -> Self {
        Self {
            shipper,
            max_level: Level::TRACE,
            total_events: Arc::new(AtomicU64::new(0)),
            enqueued_events: Arc::new(AtomicU64::new(0)),
            uncorrelated_events: Arc::new(AtomicU64::new(0)),
            dropped_events: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Only ship events at `level` or more severe.
    pub fn with_max_level(mut self, level: Level) -> Self {
        self.max_level = level;
        self
    }

    pub fn shipper(&self) -> &Shipper {
        &self.shipper
    }

    fn normalize(event: &Event<'_>) -> LogEntry {
        let mut fields = Attributes::new();
        let mut message = None;
        event.record(&mut FieldVisitor {
            fields: &mut fields,
            message: &mut message,
        });

        let meta = event.metadata();
        LogEntry {
            level: severity(meta.level()),
            fields,
            message: message.unwrap_or_default(),
            timestamp: Utc::now(),
            file: meta.file().unwrap_or("???").to_string(),
            line: meta.line().unwrap_or(0),
        }
    }
}

impl<S> Layer<S> for StackLayer
where
    S: Subscriber + for<'span> LookupSpan<'span>,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let meta = event.metadata();
        if is_ignored(meta.target()) {
            return;
        }
        self.total_events.fetch_add(1, Ordering::Relaxed);
        if *meta.level() > self.max_level {
            return;
        }

        let Some(context) = ContextId::current() else {
            self.uncorrelated_events.fetch_add(1, Ordering::Relaxed);
            return;
        };
        let entry = Self::normalize(event);
        match self.shipper.fire_blocking_in(&context, entry) {
            Ok(()) => {
                self.enqueued_events.fetch_add(1, Ordering::Relaxed);
            }
            Err(ShipperError::StackNotFound) => {
                self.uncorrelated_events.fetch_add(1, Ordering::Relaxed);
            }
            Err(_) => {
                self.dropped_events.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

pub struct FieldVisitor<'a> {
    pub fields: &'a mut Attributes,
    pub message: &'a mut Option<String>,
}

impl<'a> Visit for FieldVisitor<'a> {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            *self.message = Some(value.to_string());
        } else {
            self.fields.insert(field.name().to_string(), serde_json::Value::String(value.to_string()));
        }
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.fields.insert(field.name().to_string(), serde_json::Value::from(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.fields.insert(field.name().to_string(), serde_json::Value::from(value));
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.fields.insert(field.name().to_string(), serde_json::Value::from(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.fields.insert(field.name().to_string(), serde_json::Value::from(value));
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            *self.message = Some(format!("{:?}", value));
        } else {
            self.fields.insert(field.name().to_string(), serde_json::Value::String(format!("{:?}", value)));
        }
    }
}
