//! Handler registry: the closed set of task types this process can execute.
//!
//! Built once at startup and passed by reference into the processor and
//! distributor; there is no ambient global registry.

use std::{
    collections::{HashMap, HashSet},
    future::Future,
    pin::Pin,
    sync::Arc,
};

use crate::error::Error;

pub type HandlerFuture<'a> = Pin<Box<dyn Future<Output = Result<(), Error>> + Send + 'a>>;

/// A unit of business logic invoked for one delivery attempt.
///
/// Handlers receive only the payload bytes; anything they need from the
/// originating request must travel inside the payload.
pub trait TaskHandler: Send + Sync + 'static {
    fn handle(&self, payload: &[u8]) -> HandlerFuture<'_>;
}

/// Any `Fn(Vec<u8>) -> impl Future` closure is a handler, which keeps call
/// sites and tests terse.
impl<F, Fut> TaskHandler for F
where
    F: Fn(Vec<u8>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), Error>> + Send + 'static,
{
    fn handle(&self, payload: &[u8]) -> HandlerFuture<'_> {
        Box::pin((self)(payload.to_vec()))
    }
}

#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn TaskHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for `task_type`, replacing any previous one.
    pub fn register(&mut self, task_type: impl Into<String>, handler: impl TaskHandler) {
        self.handlers.insert(task_type.into(), Arc::new(handler));
    }

    pub fn get(&self, task_type: &str) -> Option<Arc<dyn TaskHandler>> {
        self.handlers.get(task_type).cloned()
    }

    pub fn contains(&self, task_type: &str) -> bool {
        self.handlers.contains_key(task_type)
    }

    /// The registered type identifiers; the distributor validates enqueue
    /// requests against this set.
    pub fn task_types(&self) -> HashSet<String> {
        self.handlers.keys().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
