use crate::buffer::EventBuffer;
use crate::context::ContextId;
use crate::error::ShipperError;
use crate::record::Event;
use crate::transport::{SendReport, Transport};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, Duration, MissedTickBehavior};
use tracing::{debug, error, info};

/// Context the loop and its send tasks run in. Nothing binds it, so
/// events emitted by transport internals never get attributed and fed
/// back into the loop.
pub(crate) fn dispatch_context() -> ContextId {
    ContextId::new("tracing-stack-sink:dispatch")
}

pub(crate) type FlushReply = oneshot::Sender<Result<SendReport, ShipperError>>;

/// The single task allowed to drive the transport.
///
/// Producers hand events over a bounded channel; the loop appends them
/// to the buffer, and on every tick spawns one send unless the previous
/// one is still running, in which case the tick is skipped. A flush
/// request drains the buffer completely and ends the loop.
pub(crate) struct DispatchLoop {
    events: mpsc::Receiver<Event>,
    control: mpsc::Receiver<FlushReply>,
    buffer: Arc<EventBuffer>,
    transport: Arc<Mutex<Box<dyn Transport>>>,
    flush_interval: Duration,
    flush_timeout: Duration,
    in_flight: Option<JoinHandle<()>>,
}

impl DispatchLoop {
    pub(crate) fn new(
        events: mpsc::Receiver<Event>,
        control: mpsc::Receiver<FlushReply>,
        buffer: Arc<EventBuffer>,
        transport: Arc<Mutex<Box<dyn Transport>>>,
        flush_interval: Duration,
        flush_timeout: Duration,
    ) -> Self {
        Self {
            events,
            control,
            buffer,
            transport,
            flush_interval,
            flush_timeout,
            in_flight: None,
        }
    }

    pub(crate) async fn run(mut self) {
        let mut ticker = interval(self.flush_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // first tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                event = self.events.recv() => match event {
                    Some(event) => self.buffer.push(event),
                    None => {
                        debug!("all producers gone, flushing before exit");
                        if let Err(e) = self.shutdown().await {
                            error!("final flush failed: {}", e);
                        }
                        return;
                    }
                },
                _ = ticker.tick() => self.on_tick().await,
                reply = self.control.recv() => {
                    let result = self.shutdown().await;
                    if let Some(reply) = reply {
                        let _ = reply.send(result);
                    }
                    return;
                }
            }
        }
    }

    async fn on_tick(&mut self) {
        if let Some(handle) = self.in_flight.take() {
            if !handle.is_finished() {
                debug!("previous send still in flight, skipping tick");
                self.in_flight = Some(handle);
                return;
            }
            if let Err(e) = handle.await {
                error!("send task failed: {}", e);
            }
        }

        if self.buffer.is_empty() {
            return;
        }

        let buffer = Arc::clone(&self.buffer);
        let transport = Arc::clone(&self.transport);
        self.in_flight = Some(tokio::spawn(dispatch_context().scope(async move {
            let report = transport.lock().await.send(&buffer).await;
            debug!(
                stacks = report.stacks,
                logs = report.logs,
                failed_batches = report.failed_batches,
                "send complete"
            );
        })));
    }

    async fn shutdown(&mut self) -> Result<SendReport, ShipperError> {
        // Producers from here on get ShutDown; what is already queued still ships.
        self.events.close();
        self.control.close();
        self.buffer.close();
        while let Ok(event) = self.events.try_recv() {
            self.buffer.push(event);
        }

        let in_flight = self.in_flight.take();
        let buffer = Arc::clone(&self.buffer);
        let transport = Arc::clone(&self.transport);
        let final_flush = async move {
            if let Some(handle) = in_flight {
                if let Err(e) = handle.await {
                    error!("send task failed: {}", e);
                }
            }
            transport.lock().await.flush(&buffer).await
        };

        match timeout(self.flush_timeout, final_flush).await {
            Ok(report) => {
                info!(
                    stacks = report.stacks,
                    logs = report.logs,
                    failed_batches = report.failed_batches,
                    "final flush complete"
                );
                Ok(report)
            }
            Err(_) => {
                error!("final flush did not complete within {:?}", self.flush_timeout);
                Err(ShipperError::FlushTimedOut(self.flush_timeout))
            }
        }
    }
}
