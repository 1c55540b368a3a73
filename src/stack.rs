use crate::context::ContextId;
use crate::error::ShipperError;
use crate::hostname::get_hostname;
use crate::record::{Attributes, Event, StackRecord};
use crate::shipper::Shipper;
use chrono::Utc;
use std::panic::Location;
use tracing::warn;
use uuid::Uuid;

/// A logical unit of work that log events are attributed to.
///
/// A stack is open from creation until [`Stack::end`], which buffers a
/// snapshot of it for shipment. Only an ended stack can be
/// [attached](Stack::attach) to, which opens a child stack in the calling
/// context.
#[derive(Debug)]
pub struct Stack {
    record: StackRecord,
    context: ContextId,
    ended: bool,
    shipper: Shipper,
}

impl Stack {
    /// Open a stack in `context` and bind the context to it.
    pub(crate) fn open(shipper: Shipper, context: ContextId, origin: &'static Location<'static>) -> Self {
        let id = Uuid::new_v4().to_string();
        shipper.correlation().bind(&context, id.clone());
        Self {
            record: StackRecord {
                id,
                parent_id: None,
                name: None,
                attributes: Attributes::new(),
                created_at: Utc::now(),
                file: origin.file().to_string(),
                line: origin.line(),
                hostname: get_hostname(),
            },
            context,
            ended: false,
            shipper,
        }
    }

    pub fn id(&self) -> &str {
        &self.record.id
    }

    pub fn parent_id(&self) -> Option<&str> {
        self.record.parent_id.as_deref()
    }

    pub fn name(&self) -> Option<&str> {
        self.record.name.as_deref()
    }

    pub fn attributes(&self) -> &Attributes {
        &self.record.attributes
    }

    pub fn context(&self) -> &ContextId {
        &self.context
    }

    pub fn is_ended(&self) -> bool {
        self.ended
    }

    pub fn record(&self) -> &StackRecord {
        &self.record
    }

    /// Replace the generated id and rebind this stack's context to it.
    ///
    /// Calling it more than once changes the identity again; events
    /// already fired keep the id they were attributed to.
    pub fn set_request_id(&mut self, id: impl Into<String>) -> &mut Self {
        self.warn_if_ended("request id");
        self.record.id = id.into();
        self.shipper.correlation().bind(&self.context, self.record.id.clone());
        self
    }

    /// Replace the attributes, e.g. the headers of the request being served.
    pub fn set_attributes(&mut self, attributes: Attributes) -> &mut Self {
        self.warn_if_ended("attributes");
        self.record.attributes = attributes;
        self
    }

    pub fn set_attribute(&mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> &mut Self {
        self.warn_if_ended("attributes");
        self.record.attributes.insert(key.into(), value.into());
        self
    }

    pub fn set_name(&mut self, name: impl Into<String>) -> &mut Self {
        self.warn_if_ended("name");
        self.record.name = Some(name.into());
        self
    }

    /// Close the stack and hand a snapshot of it to the dispatch loop.
    ///
    /// Waits until the loop takes the record. A second call fails with
    /// [`ShipperError::AlreadyEnded`] and buffers nothing. The stack only
    /// counts as ended once the record was handed over, so a failed
    /// handoff can be retried.
    pub async fn end(&mut self) -> Result<(), ShipperError> {
        let event = self.snapshot()?;
        self.shipper.submit(event).await?;
        self.ended = true;
        Ok(())
    }

    /// [`Stack::end`] for synchronous callers.
    pub fn end_blocking(&mut self) -> Result<(), ShipperError> {
        let event = self.snapshot()?;
        self.shipper.submit_blocking(event)?;
        self.ended = true;
        Ok(())
    }

    /// Open a child of this ended stack in the calling context.
    ///
    /// On an open stack this fails with [`ShipperError::StackNotEnded`]
    /// and removes the calling context's binding, so a reused context
    /// cannot keep attributing events to a stale stack.
    #[track_caller]
    pub fn attach(&self) -> Result<Stack, ShipperError> {
        let context = ContextId::current().ok_or(ShipperError::NoContext)?;
        self.attach_in(context)
    }

    /// [`Stack::attach`] with an explicit context.
    #[track_caller]
    pub fn attach_in(&self, context: ContextId) -> Result<Stack, ShipperError> {
        let origin = Location::caller();
        if !self.ended {
            self.shipper.correlation().unbind(&context);
            return Err(ShipperError::StackNotEnded {
                file: origin.file().to_string(),
                line: origin.line(),
            });
        }
        let mut child = Stack::open(self.shipper.clone(), context, origin);
        child.record.parent_id = Some(self.record.id.clone());
        Ok(child)
    }

    fn snapshot(&self) -> Result<Event, ShipperError> {
        if self.ended {
            return Err(ShipperError::AlreadyEnded(self.record.id.clone()));
        }
        Ok(Event::Stack(self.record.clone()))
    }

    fn warn_if_ended(&self, what: &str) {
        if self.ended {
            warn!(request_id = %self.record.id, "{} changed after end(), the change will not be shipped", what);
        }
    }
}
