/// Errors surfaced to code that produces stacks and log events.
#[derive(thiserror::Error, Debug)]
pub enum ShipperError {
    /// No stack is bound to the calling execution context, the event was dropped.
    #[error("can't find relevant stack for sending logs")]
    StackNotFound,

    /// `attach` was called on a stack that has not been ended yet.
    #[error("can't attach current stack, did you forget to call end() on it? called from {file}#{line}")]
    StackNotEnded { file: String, line: u32 },

    /// `end` was called a second time on the same stack.
    #[error("stack {0} was already ended")]
    AlreadyEnded(String),

    /// The dispatch loop is gone, the process is shutting down.
    #[error("shipper is shut down, event discarded")]
    ShutDown,

    /// Called on a runtime thread outside any [`ContextId`](crate::ContextId) scope.
    #[error("no execution context, run this inside Shipper::scope or ContextId::scope")]
    NoContext,

    #[error("final flush did not complete within {0:?}")]
    FlushTimedOut(std::time::Duration),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("failed to install global subscriber: {0}")]
    Subscriber(#[from] tracing::subscriber::SetGlobalDefaultError),
}

/// Errors produced by a [`Transport`](crate::transport::Transport) backend.
#[derive(thiserror::Error, Debug)]
pub enum TransportError {
    /// Collector rejected the project credential.
    #[error("project key is invalid")]
    Unauthorized,

    #[error("collector answered with status {0}")]
    Status(u16),

    #[cfg(feature = "http")]
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[cfg(feature = "tcp")]
    #[error("msgpack encoding failed: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    #[error("json encoding failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0} feature is not enabled")]
    FeatureDisabled(&'static str),
}

impl TransportError {
    /// Whether a retry of the same request may succeed.
    pub fn is_retriable(&self) -> bool {
        matches!(self, TransportError::Status(500 | 502 | 504))
    }
}
