//! Action registry - maps action names to handlers.
//!
//! Handlers are registered under exactly one action from the catalog. The
//! registry keeps the action's contract next to its handler so the worker
//! knows how many parameters to pull and how many reply values to expect.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{Result, WireError};
use crate::wire::{ActionSpec, Control, Reply, Request};

/// Handler trait for business actions
#[async_trait]
pub trait ActionHandler: Send + Sync {
    /// Handle a request and return exactly the reply values its action promises.
    ///
    /// Returning [`WireError::Protocol`] means the parameters were unusable;
    /// the connection answers `MALFORMED_REQUEST` and continues. Any other
    /// error terminates the connection.
    async fn handle(&self, request: Request) -> Result<Reply>;
}

/// Handler that routes to a callback
pub struct FnHandler<F>
where
    F: Fn(Request) -> Result<Reply> + Send + Sync,
{
    callback: F,
}

impl<F> FnHandler<F>
where
    F: Fn(Request) -> Result<Reply> + Send + Sync,
{
    pub fn new(callback: F) -> Self {
        Self { callback }
    }
}

#[async_trait]
impl<F> ActionHandler for FnHandler<F>
where
    F: Fn(Request) -> Result<Reply> + Send + Sync,
{
    async fn handle(&self, request: Request) -> Result<Reply> {
        (self.callback)(request)
    }
}

/// Handler that answers every request with the same values.
#[derive(Debug, Clone)]
pub struct StubHandler {
    reply: Vec<Value>,
}

impl StubHandler {
    pub fn new(reply: Vec<Value>) -> Self {
        Self { reply }
    }
}

#[async_trait]
impl ActionHandler for StubHandler {
    async fn handle(&self, _request: Request) -> Result<Reply> {
        Ok(Reply::values(self.reply.clone()))
    }
}

/// A handler together with the contract it was registered under.
pub(crate) struct Registered {
    pub(crate) spec: ActionSpec,
    handler: Arc<dyn ActionHandler>,
}

/// Name -> handler map consulted by every connection worker.
#[derive(Default)]
pub struct ActionRegistry {
    handlers: HashMap<&'static str, Registered>,
    dispatched: AtomicU64,
}

impl ActionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` under `spec`.
    pub fn register<H: ActionHandler + 'static>(&mut self, spec: ActionSpec, handler: H) -> Result<&mut Self> {
        if Control::is_reserved(spec.name) {
            return Err(WireError::Registry(format!("{} is a reserved control action", spec.name)));
        }
        if self.handlers.contains_key(spec.name) {
            return Err(WireError::Registry(format!("{} is already registered", spec.name)));
        }
        self.handlers.insert(
            spec.name,
            Registered {
                spec,
                handler: Arc::new(handler),
            },
        );
        Ok(self)
    }

    /// Register a plain closure.
    pub fn register_fn<F>(&mut self, spec: ActionSpec, callback: F) -> Result<&mut Self>
    where
        F: Fn(Request) -> Result<Reply> + Send + Sync + 'static,
    {
        self.register(spec, FnHandler::new(callback))
    }

    /// Check if an action has a handler.
    pub fn contains(&self, action: &str) -> bool {
        self.handlers.contains_key(action)
    }

    /// Contract of a registered action.
    pub fn spec(&self, action: &str) -> Option<ActionSpec> {
        self.handlers.get(action).map(|r| r.spec)
    }

    /// Registered action names, sorted.
    pub fn actions(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.handlers.keys().copied().collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Number of requests routed to a handler so far.
    pub fn dispatch_count(&self) -> u64 {
        self.dispatched.load(Ordering::SeqCst)
    }

    pub(crate) fn get(&self, action: &str) -> Option<&Registered> {
        self.handlers.get(action)
    }

    /// Run the handler and hold it to its declared reply arity.
    pub(crate) async fn dispatch(&self, entry: &Registered, request: Request) -> Result<Reply> {
        self.dispatched.fetch_add(1, Ordering::SeqCst);
        let reply = entry.handler.handle(request).await?;
        if reply.len() != entry.spec.replies {
            return Err(WireError::Handler(format!(
                "{} replied with {} values, contract is {}",
                entry.spec.name,
                reply.len(),
                entry.spec.replies
            )));
        }
        Ok(reply)
    }
}

impl std::fmt::Debug for ActionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionRegistry")
            .field("actions", &self.actions())
            .field("dispatched", &self.dispatch_count())
            .finish()
    }
}
