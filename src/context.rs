use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::runtime::Handle;
use uuid::Uuid;

/// Opaque identifier of the concurrent unit of work currently executing.
///
/// Rust exposes no portable task identity, so the id comes from an
/// explicit scope when one is installed (see [`ContextId::scope`]).
/// Plain threads outside any Tokio runtime fall back to their OS thread
/// id. Runtime workers do not: they interleave unrelated tasks, including
/// the HTTP client's own connection tasks.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ContextId(Arc<str>);

tokio::task_local! {
    static ACTIVE_CONTEXT: ContextId;
}

impl ContextId {
    pub fn new(id: impl AsRef<str>) -> Self {
        ContextId(Arc::from(id.as_ref()))
    }

    /// Fresh id for a new logical context, to be installed with [`scope`](Self::scope).
    pub fn generate() -> Self {
        ContextId::new(Uuid::new_v4().to_string())
    }

    /// Id of the calling context.
    ///
    /// `None` on a Tokio runtime thread without an installed scope.
    pub fn current() -> Option<Self> {
        if let Ok(context) = ACTIVE_CONTEXT.try_with(|c| c.clone()) {
            return Some(context);
        }
        if Handle::try_current().is_ok() {
            return None;
        }
        Some(ContextId::new(format!("{:?}", std::thread::current().id())))
    }

    /// Run `fut` with `self` as the current context.
    ///
    /// Required for async code: [`current`](Self::current) has no
    /// fallback on runtime threads.
    pub async fn scope<F: Future>(self, fut: F) -> F::Output {
        ACTIVE_CONTEXT.scope(self, fut).await
    }

    /// Synchronous counterpart of [`scope`](Self::scope).
    pub fn sync_scope<R>(self, f: impl FnOnce() -> R) -> R {
        ACTIVE_CONTEXT.sync_scope(self, f)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Mapping from execution context to the id of the stack active in it.
///
/// Bindings are never expired: a context that is reused after its stack
/// ended keeps attributing to that stack until a new one is bound or
/// [`unbind`](Self::unbind) runs.
#[derive(Debug, Default)]
pub struct CorrelationMap {
    inner: Mutex<HashMap<ContextId, String>>,
}

impl CorrelationMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stack id bound to `context`, `None` when no stack is active there.
    pub fn resolve(&self, context: &ContextId) -> Option<String> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(context)
            .cloned()
    }

    /// Bind `stack_id` to `context`, superseding any previous binding.
    /// The last stack created in a context wins.
    pub fn bind(&self, context: &ContextId, stack_id: impl Into<String>) {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(context.clone(), stack_id.into());
    }

    pub fn unbind(&self, context: &ContextId) -> Option<String> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(context)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
