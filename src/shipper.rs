use crate::buffer::EventBuffer;
use crate::config::ShipperConfig;
use crate::context::{ContextId, CorrelationMap};
use crate::dispatch::{dispatch_context, DispatchLoop, FlushReply};
use crate::error::ShipperError;
use crate::record::{Event, LogEntry};
use crate::stack::Stack;
use crate::transport::{make_transport, SendReport, Transport};
use std::future::Future;
use std::panic::Location;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::time::Duration;
use tracing::debug;

/// Handle to a running shipper: the correlation map plus the producer
/// side of the dispatch loop.
///
/// Cloning is cheap and every clone feeds the same loop. The loop runs
/// until [`Shipper::flush`] is called or every handle is dropped; after
/// that, producing fails with [`ShipperError::ShutDown`].
#[derive(Clone, Debug)]
pub struct Shipper {
    inner: Arc<ShipperInner>,
}

#[derive(Debug)]
struct ShipperInner {
    events: mpsc::Sender<Event>,
    control: mpsc::Sender<FlushReply>,
    buffer: Arc<EventBuffer>,
    correlation: CorrelationMap,
    level_offset: i32,
    flush_timeout: Duration,
}

/// Removes a scope's binding when the scope ends, even if it is cancelled.
struct ScopeBinding<'a> {
    correlation: &'a CorrelationMap,
    context: ContextId,
}

impl Drop for ScopeBinding<'_> {
    fn drop(&mut self) {
        self.correlation.unbind(&self.context);
    }
}

impl Shipper {
    /// Build the transport selected by `config`, initialize it and spawn
    /// the dispatch loop on the current Tokio runtime.
    pub async fn start(config: ShipperConfig) -> Result<Self, ShipperError> {
        let transport = make_transport(&config)?;
        Self::start_with_transport(config, transport).await
    }

    /// Like [`Shipper::start`] with a caller-provided transport.
    pub async fn start_with_transport(
        config: ShipperConfig,
        mut transport: Box<dyn Transport>,
    ) -> Result<Self, ShipperError> {
        transport.init().await?;

        let (events_tx, events_rx) = mpsc::channel(config.effective_channel_capacity());
        let (control_tx, control_rx) = mpsc::channel(1);
        let buffer = Arc::new(EventBuffer::new());
        let flush_timeout = config.flush_timeout;

        let dispatch = DispatchLoop::new(
            events_rx,
            control_rx,
            Arc::clone(&buffer),
            Arc::new(Mutex::new(transport)),
            config.effective_flush_interval(),
            flush_timeout,
        );
        tokio::spawn(dispatch_context().scope(dispatch.run()));
        debug!(transport = ?config.transport, "shipper started");

        Ok(Self {
            inner: Arc::new(ShipperInner {
                events: events_tx,
                control: control_tx,
                buffer,
                correlation: CorrelationMap::new(),
                level_offset: config.level_offset,
                flush_timeout,
            }),
        })
    }

    pub fn correlation(&self) -> &CorrelationMap {
        &self.inner.correlation
    }

    pub fn is_running(&self) -> bool {
        !self.inner.events.is_closed()
    }

    /// Run `fut` in a fresh context.
    ///
    /// Stacks created inside are attributed to that context, and its
    /// binding is removed from the correlation map when `fut` completes
    /// or is dropped.
    pub async fn scope<F: Future>(&self, fut: F) -> F::Output {
        let context = ContextId::generate();
        let _binding = ScopeBinding {
            correlation: &self.inner.correlation,
            context: context.clone(),
        };
        context.scope(fut).await
    }

    /// Synchronous counterpart of [`Shipper::scope`].
    pub fn sync_scope<R>(&self, f: impl FnOnce() -> R) -> R {
        let context = ContextId::generate();
        let _binding = ScopeBinding {
            correlation: &self.inner.correlation,
            context: context.clone(),
        };
        context.sync_scope(f)
    }

    /// Open a stack bound to the calling context.
    ///
    /// Opening another stack in the same context rebinds the context:
    /// later events are attributed to the newest stack. Fails with
    /// [`ShipperError::NoContext`] on a runtime thread outside a scope.
    #[track_caller]
    pub fn create_stack(&self) -> Result<Stack, ShipperError> {
        let context = ContextId::current().ok_or(ShipperError::NoContext)?;
        Ok(Stack::open(self.clone(), context, Location::caller()))
    }

    /// [`Shipper::create_stack`] with an explicit context.
    #[track_caller]
    pub fn create_stack_in(&self, context: ContextId) -> Stack {
        Stack::open(self.clone(), context, Location::caller())
    }

    /// Id of the stack bound to the calling context.
    pub fn current_request_id(&self) -> Option<String> {
        ContextId::current().and_then(|context| self.inner.correlation.resolve(&context))
    }

    /// Attribute `entry` to the stack of the calling context and hand it
    /// to the dispatch loop.
    pub async fn fire(&self, entry: LogEntry) -> Result<(), ShipperError> {
        let context = ContextId::current().ok_or(ShipperError::NoContext)?;
        self.fire_in(&context, entry).await
    }

    pub async fn fire_in(&self, context: &ContextId, entry: LogEntry) -> Result<(), ShipperError> {
        let event = self.attribute(context, entry)?;
        self.submit(event).await
    }

    /// [`Shipper::fire_in`] for synchronous callers such as a
    /// `tracing` layer. Never blocks beyond the buffer lock.
    pub fn fire_blocking_in(&self, context: &ContextId, entry: LogEntry) -> Result<(), ShipperError> {
        let event = self.attribute(context, entry)?;
        self.submit_blocking(event)
    }

    /// Ship everything buffered and stop the dispatch loop.
    ///
    /// Waits for an in-flight send, then flushes until the buffer is
    /// empty, bounded by `flush_timeout`.
    pub async fn flush(&self) -> Result<SendReport, ShipperError> {
        let (tx, rx) = oneshot::channel();
        self.inner
            .control
            .send(tx)
            .await
            .map_err(|_| ShipperError::ShutDown)?;
        // The loop enforces the deadline, the margin only covers a loop that died mid-flush.
        match tokio::time::timeout(self.inner.flush_timeout + Duration::from_secs(1), rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ShipperError::ShutDown),
            Err(_) => Err(ShipperError::FlushTimedOut(self.inner.flush_timeout)),
        }
    }

    fn attribute(&self, context: &ContextId, entry: LogEntry) -> Result<Event, ShipperError> {
        let request_id = self
            .inner
            .correlation
            .resolve(context)
            .ok_or(ShipperError::StackNotFound)?;
        Ok(Event::Log(entry.into_event(request_id, self.inner.level_offset)))
    }

    pub(crate) async fn submit(&self, event: Event) -> Result<(), ShipperError> {
        self.inner
            .events
            .send(event)
            .await
            .map_err(|_| ShipperError::ShutDown)
    }

    /// Hand `event` over from synchronous code.
    ///
    /// Synchronous callers cannot wait for the loop without risking a
    /// stalled runtime thread, so they append to the shared buffer
    /// directly. Records from one synchronous producer keep their order.
    pub(crate) fn submit_blocking(&self, event: Event) -> Result<(), ShipperError> {
        self.inner
            .buffer
            .try_push(event)
            .map_err(|_| ShipperError::ShutDown)
    }
}
