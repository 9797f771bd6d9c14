use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use pantry_core::EventEnvelope;
use parking_lot::RwLock;
use tracing::{trace, warn};

use crate::errors::HandlerError;

pub type HandlerResult = Result<(), HandlerError>;

type HandlerFn = dyn Fn(&EventEnvelope) -> HandlerResult + Send + Sync;

/// A subscriber callback. Identity is the allocation: clones of one
/// `Handler` are the same subscription, two `Handler::new` calls never are.
#[derive(Clone)]
pub struct Handler {
    name: Arc<str>,
    func: Arc<HandlerFn>,
}

impl Handler {
    pub fn new<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&EventEnvelope) -> HandlerResult + Send + Sync + 'static,
    {
        Self {
            name: Arc::from(name.into()),
            func: Arc::new(func),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn call(&self, envelope: &EventEnvelope) -> HandlerResult {
        (self.func)(envelope)
    }
}

impl PartialEq for Handler {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::addr_eq(Arc::as_ptr(&self.func), Arc::as_ptr(&other.func))
    }
}

impl Eq for Handler {}

impl std::fmt::Debug for Handler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handler").field("name", &self.name).finish()
    }
}

/// Outcome of one dispatch.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub delivered: usize,
    pub failed: usize,
}

/// Event-type → handler set.
///
/// Buckets are removed as soon as their last handler is, so types nobody
/// listens to hold no memory.
#[derive(Default)]
pub struct SubscriptionRegistry {
    handlers: RwLock<HashMap<String, Vec<Handler>>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `event_type`. Returns `false` if it was already registered.
    pub fn on(&self, event_type: &str, handler: &Handler) -> bool {
        let mut handlers = self.handlers.write();
        let bucket = handlers.entry(event_type.to_string()).or_default();
        if bucket.contains(handler) {
            return false;
        }
        bucket.push(handler.clone());
        trace!(event_type, handler = handler.name(), "handler registered");
        true
    }

    /// Remove `handler` from `event_type`. Returns `false` if it was not registered.
    pub fn off(&self, event_type: &str, handler: &Handler) -> bool {
        let mut handlers = self.handlers.write();
        let Some(bucket) = handlers.get_mut(event_type) else {
            return false;
        };
        let before = bucket.len();
        bucket.retain(|h| h != handler);
        let removed = bucket.len() != before;
        if bucket.is_empty() {
            let _ = handlers.remove(event_type);
        }
        if removed {
            trace!(event_type, handler = handler.name(), "handler removed");
        }
        removed
    }

    /// Invoke every handler registered for the envelope's type.
    ///
    /// The handler set is snapshotted first, so handlers may call `on`/`off`.
    /// A failing or panicking handler is logged and the rest still run.
    pub fn dispatch(&self, envelope: &EventEnvelope) -> DispatchReport {
        let snapshot = match self.handlers.read().get(&envelope.event_type) {
            Some(bucket) => bucket.clone(),
            None => {
                trace!(event_type = %envelope.event_type, "no subscribers");
                return DispatchReport::default();
            }
        };

        let mut report = DispatchReport::default();
        for handler in &snapshot {
            match std::panic::catch_unwind(AssertUnwindSafe(|| handler.call(envelope))) {
                Ok(Ok(())) => report.delivered += 1,
                Ok(Err(error)) => {
                    report.failed += 1;
                    warn!(
                        handler = handler.name(),
                        event_type = %envelope.event_type,
                        scope_id = %envelope.scope_id,
                        error = %error,
                        "event handler failed"
                    );
                }
                Err(panic) => {
                    report.failed += 1;
                    warn!(
                        handler = handler.name(),
                        event_type = %envelope.event_type,
                        scope_id = %envelope.scope_id,
                        panic = panic_message(panic.as_ref()),
                        "event handler panicked"
                    );
                }
            }
        }
        report
    }

    pub fn handler_count(&self, event_type: &str) -> usize {
        self.handlers.read().get(event_type).map_or(0, Vec::len)
    }

    /// Event types with at least one handler.
    pub fn event_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.handlers.read().keys().cloned().collect();
        types.sort();
        types
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}
