//! The user-facing component contract and its explicit event table.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::driver::Driver;
use crate::error::ComponentError;

/// Future returned by an event handler.
pub type HandlerFuture = BoxFuture<'static, Result<(), ComponentError>>;

/// A registered event handler.
///
/// Receives the driver that owns the component (so it can mutate state,
/// commit, emit patches or issue `get` requests) and the event's JSON payload.
pub type Handler<C> = Arc<dyn Fn(Arc<Driver<C>>, Value) -> HandlerFuture + Send + Sync>;

/// Server-side state that owns one fragment of the page.
///
/// A component only knows how to render itself. Everything live (the anchor,
/// children, the outbound channel) belongs to the [`Driver`] wrapping it,
/// which `Driver::new` builds together with the component.
pub trait Component: Send + 'static {
    /// Render the current state to an HTML fragment.
    fn render(&self) -> Result<String, ComponentError>;

    /// One-time initialisation, run when the driver starts.
    fn init(&mut self) -> Result<(), ComponentError> {
        Ok(())
    }

    /// Register the events this component reacts to.
    fn handlers(_table: &mut HandlerTable<Self>)
    where
        Self: Sized,
    {
    }
}

/// Event name to handler mapping for one component type.
pub struct HandlerTable<C: Component> {
    handlers: HashMap<String, Handler<C>>,
}

impl<C: Component> Default for HandlerTable<C> {
    fn default() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }
}

impl<C: Component> HandlerTable<C> {
    /// Empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `f` for `name`, replacing any earlier registration.
    pub fn on<F, Fut>(&mut self, name: impl Into<String>, f: F) -> &mut Self
    where
        F: Fn(Arc<Driver<C>>, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), ComponentError>> + Send + 'static,
    {
        let _ = self.handlers.insert(name.into(), boxed_handler(f));
        self
    }

    /// Handler registered for `name`.
    pub fn get(&self, name: &str) -> Option<&Handler<C>> {
        self.handlers.get(name)
    }

    /// Whether `name` has a handler.
    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Registered event names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Number of registered events.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Whether no events are registered.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub(crate) fn into_map(self) -> HashMap<String, Handler<C>> {
        self.handlers
    }
}

pub(crate) fn boxed_handler<C, F, Fut>(f: F) -> Handler<C>
where
    C: Component,
    F: Fn(Arc<Driver<C>>, Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), ComponentError>> + Send + 'static,
{
    Arc::new(move |driver, data| f(driver, data).boxed())
}

/// Decode an event payload into a typed value.
pub fn decode_payload<T: DeserializeOwned>(data: Value) -> Result<T, ComponentError> {
    Ok(serde_json::from_value(data)?)
}
