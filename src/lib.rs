pub mod buffer;
pub mod config;
pub mod context;
mod dispatch;
pub mod env;
pub mod error;
pub mod hostname;
pub mod init;
pub mod layer;
pub mod record;
pub mod shipper;
pub mod stack;
pub mod transport;

pub use config::ShipperConfig;
pub use context::{ContextId, CorrelationMap};
pub use error::{ShipperError, TransportError};
pub use record::{LogEntry, LogEvent, StackRecord};
pub use shipper::Shipper;
pub use stack::Stack;
pub use transport::{SendReport, Transport, TransportKind};
