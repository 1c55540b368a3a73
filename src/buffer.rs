use crate::record::{Event, LogEvent, StackRecord};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Records drained from an [`EventBuffer`], in insertion order.
#[derive(Debug, Default, Clone)]
pub struct Pending {
    pub stacks: Vec<StackRecord>,
    pub logs: Vec<LogEvent>,
}

impl Pending {
    pub fn is_empty(&self) -> bool {
        self.stacks.is_empty() && self.logs.is_empty()
    }

    pub fn len(&self) -> usize {
        self.stacks.len() + self.logs.len()
    }
}

/// Stack and log records awaiting shipment.
///
/// One lock guards both sequences so a drain observes a consistent
/// snapshot and producers wait at most for one append or drain.
///
/// Once [closed](EventBuffer::close), [`try_push`](EventBuffer::try_push)
/// refuses new records; the dispatch loop's own [`push`](EventBuffer::push)
/// still lands so events queued before shutdown are shipped.
#[derive(Debug, Default)]
pub struct EventBuffer {
    slots: Mutex<Slots>,
}

#[derive(Debug, Default)]
struct Slots {
    pending: Pending,
    closed: bool,
}

impl Slots {
    fn append(&mut self, event: Event) {
        match event {
            Event::Stack(stack) => self.pending.stacks.push(stack),
            Event::Log(log) => self.pending.logs.push(log),
        }
    }
}

impl EventBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    fn slots(&self) -> MutexGuard<'_, Slots> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn push(&self, event: Event) {
        self.slots().append(event);
    }

    /// Append unless the buffer is closed, handing the event back if it is.
    pub fn try_push(&self, event: Event) -> Result<(), Event> {
        let mut slots = self.slots();
        if slots.closed {
            return Err(event);
        }
        slots.append(event);
        Ok(())
    }

    /// Refuse further [`try_push`](EventBuffer::try_push) calls.
    pub fn close(&self) {
        self.slots().closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.slots().closed
    }

    /// Take everything currently buffered, leaving the buffer empty.
    pub fn drain(&self) -> Pending {
        std::mem::take(&mut self.slots().pending)
    }

    /// Take at most `max` stacks and at most `max` logs from the front.
    pub fn drain_up_to(&self, max: usize) -> Pending {
        let mut slots = self.slots();
        let pending = &mut slots.pending;
        let stacks = pending.stacks.len().min(max);
        let logs = pending.logs.len().min(max);
        Pending {
            stacks: pending.stacks.drain(..stacks).collect(),
            logs: pending.logs.drain(..logs).collect(),
        }
    }

    /// Number of buffered `(stacks, logs)`.
    pub fn len(&self) -> (usize, usize) {
        let slots = self.slots();
        (slots.pending.stacks.len(), slots.pending.logs.len())
    }

    pub fn is_empty(&self) -> bool {
        self.slots().pending.is_empty()
    }
}
