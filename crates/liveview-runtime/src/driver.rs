//! Component drivers and the mount tree.
//!
//! A [`Driver`] wraps one [`Component`] and gives it a place in the page: an
//! anchor element its fragment replaces, a set of mounted children, an event
//! table, and (once started) the [`SessionScope`] it talks through.
//!
//! Drivers of different component types live in the same tree and registry
//! behind the object-safe [`DriverNode`] trait.

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, OnceLock};

use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
use liveview_core::constants::{EVENTS_TOTAL, EVENT_FAILURES_TOTAL, RENDER_FAILURES_TOTAL};
use liveview_core::protocol::payload_text;
use liveview_core::{ComponentId, Envelope, GetKind};
use metrics::counter;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tracing::{debug, error, warn};

use crate::component::{boxed_handler, Component, Handler, HandlerTable};
use crate::error::{ComponentError, GetError};
use crate::scope::SessionScope;

/// Type-erased view of a driver, as stored in the mount tree and registry.
pub trait DriverNode: Send + Sync + 'static {
    /// Session-unique logical id.
    fn component_id(&self) -> &ComponentId;

    /// DOM id the rendered fragment replaces.
    fn anchor_id(&self) -> &str;

    /// Dispatch a named event to the component's handler table.
    ///
    /// Fire-and-forget: the handler runs in its own session-tracked task.
    /// Returns `false` when no handler is registered for `name` (a no-op) or
    /// the driver is not attached to a live session.
    fn execute_event(self: Arc<Self>, name: &str, data: Value) -> bool;

    /// Render and enqueue a `fill` patch for the anchor.
    fn commit(&self) -> bool;

    /// Commit this driver and then every descendant, depth first.
    ///
    /// Returns the number of `fill` patches enqueued.
    fn commit_tree(&self) -> usize;

    /// Attach to `scope`, register, initialise, and start every mounted child.
    fn start(self: Arc<Self>, scope: SessionScope) -> BoxFuture<'static, ()>;

    /// Currently mounted children.
    fn children(&self) -> Vec<Arc<dyn DriverNode>>;

    /// Whether the driver has been attached to a session.
    fn is_started(&self) -> bool;
}

/// Live wrapper around one component instance.
pub struct Driver<C: Component> {
    component_id: ComponentId,
    anchor_id: String,
    state: Mutex<C>,
    handlers: RwLock<HashMap<String, Handler<C>>>,
    children: Mutex<HashMap<String, Arc<dyn DriverNode>>>,
    scope: OnceLock<SessionScope>,
    data: Mutex<Option<Value>>,
}

impl<C: Component> Driver<C> {
    /// Build a driver for a mountable component.
    ///
    /// The anchor is `mount_span_<id>`. The component's handler table is
    /// collected here, once.
    pub fn new(id: impl Into<ComponentId>, component: C) -> Arc<Self> {
        let component_id = id.into();
        let anchor_id = component_id.anchor();
        Self::build(anchor_id, component_id, component)
    }

    /// Build the root driver of a page, rendering into a caller-chosen anchor.
    pub fn root(anchor_id: impl Into<String>, id: impl Into<ComponentId>, component: C) -> Arc<Self> {
        Self::build(anchor_id.into(), id.into(), component)
    }

    fn build(anchor_id: String, component_id: ComponentId, component: C) -> Arc<Self> {
        let mut table = HandlerTable::new();
        C::handlers(&mut table);
        Arc::new(Self {
            component_id,
            anchor_id,
            state: Mutex::new(component),
            handlers: RwLock::new(table.into_map()),
            children: Mutex::new(HashMap::new()),
            scope: OnceLock::new(),
            data: Mutex::new(None),
        })
    }

    /// Session-unique logical id.
    pub fn component_id(&self) -> &ComponentId {
        &self.component_id
    }

    /// DOM id this driver's `fill` patches target.
    pub fn anchor_id(&self) -> &str {
        &self.anchor_id
    }

    /// The session this driver is attached to, once started.
    pub fn scope(&self) -> Option<&SessionScope> {
        self.scope.get()
    }

    /// Whether [`DriverNode::start`] has attached this driver.
    pub fn is_started(&self) -> bool {
        self.scope.get().is_some()
    }

    // ── state ────────────────────────────────────────────────────────────

    /// Mutate the component. The lock is held only for `f`.
    pub fn update<R>(&self, f: impl FnOnce(&mut C) -> R) -> R {
        f(&mut self.state.lock())
    }

    /// Read the component. The lock is held only for `f`.
    pub fn with_state<R>(&self, f: impl FnOnce(&C) -> R) -> R {
        f(&self.state.lock())
    }

    /// Render the component's current state without sending anything.
    pub fn render(&self) -> Result<String, ComponentError> {
        self.state.lock().render()
    }

    /// Opaque payload kept alongside the component.
    pub fn data(&self) -> Option<Value> {
        self.data.lock().clone()
    }

    /// Replace the opaque payload.
    pub fn set_data(&self, value: Value) {
        *self.data.lock() = Some(value);
    }

    /// Register or replace an event handler at runtime.
    pub fn on<F, Fut>(&self, name: impl Into<String>, f: F) -> &Self
    where
        F: Fn(Arc<Self>, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), ComponentError>> + Send + 'static,
    {
        let _ = self.handlers.write().insert(name.into(), boxed_handler(f));
        self
    }

    /// Whether an event name has a handler.
    pub fn handles(&self, name: &str) -> bool {
        self.handlers.read().contains_key(name)
    }

    // ── mount tree ───────────────────────────────────────────────────────

    /// Mount `child` under `mount_span_<child id>` without starting it.
    ///
    /// Children mounted before the parent starts are started with it.
    pub fn mount(&self, child: Arc<dyn DriverNode>) -> &Self {
        let anchor = child.component_id().anchor();
        self.attach(anchor, child);
        self
    }

    /// Mount `child` under `anchor_id` and, if this driver is already
    /// running, start it against the same session before returning.
    pub async fn mount_with_start(
        &self,
        anchor_id: impl Into<String>,
        child: Arc<dyn DriverNode>,
    ) -> &Self {
        self.attach(anchor_id.into(), Arc::clone(&child));
        if let Some(scope) = self.scope.get() {
            child.start(scope.clone()).await;
        }
        self
    }

    /// Remove the child mounted under `anchor_id`.
    ///
    /// The child and its whole subtree are deregistered from the session
    /// immediately. No DOM patch is sent.
    pub fn unmount(&self, anchor_id: &str) -> Option<Arc<dyn DriverNode>> {
        let child = self.children.lock().remove(anchor_id)?;
        if let Some(scope) = self.scope.get() {
            let removed = scope.registry().remove_tree(&child);
            debug!(
                component_id = %self.component_id,
                child_id = %child.component_id(),
                removed,
                "unmounted child"
            );
        }
        Some(child)
    }

    /// Child mounted under `anchor_id`, if any.
    pub fn child(&self, anchor_id: &str) -> Option<Arc<dyn DriverNode>> {
        self.children.lock().get(anchor_id).cloned()
    }

    fn attach(&self, anchor: String, child: Arc<dyn DriverNode>) {
        let previous = self.children.lock().insert(anchor, child);
        if let (Some(previous), Some(scope)) = (previous, self.scope.get()) {
            let _ = scope.registry().remove_tree(&previous);
        }
    }

    // ── patches ──────────────────────────────────────────────────────────

    /// Render and enqueue a `fill` for this driver's anchor.
    ///
    /// Render errors and panics are logged and nothing is sent, leaving the
    /// client's current fragment in place.
    pub fn commit(&self) -> bool {
        let rendered = std::panic::catch_unwind(AssertUnwindSafe(|| self.render()));
        match rendered {
            Ok(Ok(html)) => self.emit(Envelope::Fill {
                id: self.anchor_id.clone(),
                value: html,
            }),
            Ok(Err(err)) => {
                counter!(RENDER_FAILURES_TOTAL).increment(1);
                warn!(component_id = %self.component_id, error = %err, "render failed, no patch sent");
                false
            }
            Err(panic) => {
                counter!(RENDER_FAILURES_TOTAL).increment(1);
                error!(
                    component_id = %self.component_id,
                    panic = %panic_message(&panic),
                    "render panicked, no patch sent"
                );
                false
            }
        }
    }

    /// Replace the inner HTML of `id`.
    pub fn set_html(&self, id: &str, html: impl Into<String>) -> bool {
        self.emit(Envelope::Fill {
            id: id.to_owned(),
            value: html.into(),
        })
    }

    /// Replace the text of `id`.
    pub fn set_text(&self, id: &str, text: impl Into<String>) -> bool {
        self.emit(Envelope::Text {
            id: id.to_owned(),
            value: text.into(),
        })
    }

    /// Replace the inline CSS text of `id`.
    pub fn set_style(&self, id: &str, css: impl Into<String>) -> bool {
        self.emit(Envelope::Style {
            id: id.to_owned(),
            value: css.into(),
        })
    }

    /// Set the value of the form element `id`.
    pub fn set_value(&self, id: &str, value: impl Into<String>) -> bool {
        self.emit(Envelope::Set {
            id: id.to_owned(),
            value: value.into(),
        })
    }

    /// Set an arbitrary property on `id`.
    pub fn set_property(&self, id: &str, property: &str, value: impl Into<Value>) -> bool {
        self.emit(Envelope::Property {
            id: id.to_owned(),
            propertie: property.to_owned(),
            value: value.into(),
        })
    }

    /// Remove the element `id` from the page.
    pub fn remove(&self, id: &str) -> bool {
        self.emit(Envelope::Remove { id: id.to_owned() })
    }

    /// Append an HTML fragment inside `id`.
    pub fn add_node(&self, id: &str, html: impl Into<String>) -> bool {
        self.emit(Envelope::AddNode {
            id: id.to_owned(),
            value: html.into(),
        })
    }

    /// Run `code` in the page.
    pub fn run_script(&self, code: impl Into<String>) -> bool {
        self.emit(Envelope::Script { value: code.into() })
    }

    fn emit(&self, envelope: Envelope) -> bool {
        match self.scope.get() {
            Some(scope) => scope.outbound().send(envelope),
            None => {
                debug!(
                    component_id = %self.component_id,
                    kind = envelope.kind(),
                    "driver not started, patch discarded"
                );
                false
            }
        }
    }

    // ── reads ────────────────────────────────────────────────────────────

    /// Ask the client for a value and wait for the correlated reply.
    pub async fn request(&self, kind: GetKind, id: &str, sub_target: &str) -> Result<Value, GetError> {
        let scope = self.scope.get().ok_or(GetError::NotStarted)?;
        scope
            .pending()
            .request(
                scope.outbound(),
                id,
                kind,
                sub_target,
                scope.config().get_timeout(),
                scope.cancel_token(),
            )
            .await
    }

    async fn read(&self, kind: GetKind, id: &str, sub_target: &str) -> String {
        match self.request(kind, id, sub_target).await {
            Ok(value) => payload_text(value),
            Err(err) => {
                debug!(component_id = %self.component_id, target = id, error = %err, "get returned no value");
                String::new()
            }
        }
    }

    /// `value` of the form element `id`; empty on timeout.
    pub async fn get_value(&self, id: &str) -> String {
        self.read(GetKind::Value, id, "").await
    }

    /// Inner HTML of `id`; empty on timeout.
    pub async fn get_html(&self, id: &str) -> String {
        self.read(GetKind::Html, id, "").await
    }

    /// Inner text of `id`; empty on timeout.
    pub async fn get_text(&self, id: &str) -> String {
        self.read(GetKind::Text, id, "").await
    }

    /// Computed style `property` of `id`; empty on timeout.
    pub async fn get_style(&self, id: &str, property: &str) -> String {
        self.read(GetKind::Style, id, property).await
    }

    /// Element property `property` of `id`; empty on timeout.
    pub async fn get_property(&self, id: &str, property: &str) -> String {
        self.read(GetKind::Property, id, property).await
    }

    // ── lifecycle ────────────────────────────────────────────────────────

    fn run_init(&self) {
        let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| self.state.lock().init()));
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                warn!(component_id = %self.component_id, error = %err, "component init failed");
            }
            Err(panic) => {
                error!(
                    component_id = %self.component_id,
                    panic = %panic_message(&panic),
                    "component init panicked"
                );
            }
        }
    }

    async fn run_start(self: Arc<Self>, scope: SessionScope) {
        if self.scope.set(scope.clone()).is_err() {
            warn!(component_id = %self.component_id, "driver already started, ignoring");
            return;
        }
        let _ = scope.registry().register(self.clone());
        self.run_init();

        let children = DriverNode::children(self.as_ref());
        if children.is_empty() {
            return;
        }

        let handles: Vec<_> = children
            .into_iter()
            .filter_map(|child| scope.spawn(child.start(scope.clone())))
            .collect();
        let count = handles.len();

        tokio::select! {
            results = join_all(handles) => {
                for res in results {
                    if let Err(err) = res {
                        warn!(component_id = %self.component_id, error = %err, "child start task failed");
                    }
                }
                debug!(component_id = %self.component_id, children = count, "children started");
            }
            () = scope.cancelled() => {
                debug!(component_id = %self.component_id, "start cancelled");
            }
            () = tokio::time::sleep(scope.config().start_timeout()) => {
                warn!(
                    component_id = %self.component_id,
                    children = count,
                    timeout_ms = scope.config().start_timeout_ms,
                    "children did not finish starting in time, continuing without them"
                );
            }
        }
    }
}

impl<C: Component> DriverNode for Driver<C> {
    fn component_id(&self) -> &ComponentId {
        &self.component_id
    }

    fn anchor_id(&self) -> &str {
        &self.anchor_id
    }

    fn execute_event(self: Arc<Self>, name: &str, data: Value) -> bool {
        let Some(handler) = self.handlers.read().get(name).cloned() else {
            debug!(component_id = %self.component_id, event = name, "no handler for event, ignoring");
            return false;
        };
        let Some(scope) = self.scope.get().cloned() else {
            debug!(component_id = %self.component_id, event = name, "driver not started, event ignored");
            return false;
        };

        counter!(EVENTS_TOTAL, "event" => name.to_owned()).increment(1);
        let event = name.to_owned();
        let component_id = self.component_id.clone();
        let task = async move {
            let outcome = AssertUnwindSafe(async move { handler(self, data).await })
                .catch_unwind()
                .await;
            match outcome {
                Ok(Ok(())) => {
                    debug!(component_id = %component_id, event = %event, "event handled");
                }
                Ok(Err(err)) => {
                    counter!(EVENT_FAILURES_TOTAL, "event" => event.clone(), "kind" => err.error_kind())
                        .increment(1);
                    warn!(component_id = %component_id, event = %event, error = %err, "event handler failed");
                }
                Err(panic) => {
                    counter!(EVENT_FAILURES_TOTAL, "event" => event.clone(), "kind" => "panic")
                        .increment(1);
                    error!(
                        component_id = %component_id,
                        event = %event,
                        panic = %panic_message(&panic),
                        "event handler panicked"
                    );
                }
            }
        };
        scope.spawn(task).is_some()
    }

    fn commit(&self) -> bool {
        Driver::commit(self)
    }

    fn commit_tree(&self) -> usize {
        let mut sent = usize::from(Driver::commit(self));
        for child in DriverNode::children(self) {
            sent += child.commit_tree();
        }
        sent
    }

    fn start(self: Arc<Self>, scope: SessionScope) -> BoxFuture<'static, ()> {
        Box::pin(self.run_start(scope))
    }

    fn children(&self) -> Vec<Arc<dyn DriverNode>> {
        self.children.lock().values().cloned().collect()
    }

    fn is_started(&self) -> bool {
        Driver::is_started(self)
    }
}

impl<C: Component> std::fmt::Debug for Driver<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Driver")
            .field("component_id", &self.component_id)
            .field("anchor_id", &self.anchor_id)
            .field("children", &self.children.lock().len())
            .field("started", &self.is_started())
            .finish_non_exhaustive()
    }
}

/// Extract a readable message from a caught panic payload.
pub(crate) fn panic_message(panic: &Box<dyn std::any::Any + Send>) -> String {
    panic
        .downcast_ref::<String>()
        .map(|s| s.as_str())
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use liveview_core::SessionId;
    use serde_json::json;
    use tokio::sync::mpsc::error::TryRecvError;
    use tokio::sync::mpsc::UnboundedReceiver;
    use tokio_util::sync::CancellationToken;

    use crate::config::RuntimeConfig;
    use crate::outbound::Outbound;

    fn session_with(config: RuntimeConfig) -> (SessionScope, UnboundedReceiver<Envelope>) {
        let (outbound, rx) = Outbound::channel();
        let scope = SessionScope::new(SessionId::new(), outbound, config, CancellationToken::new());
        (scope, rx)
    }

    fn session() -> (SessionScope, UnboundedReceiver<Envelope>) {
        session_with(RuntimeConfig::default())
    }

    fn fill(id: &str, value: &str) -> Envelope {
        Envelope::Fill {
            id: id.into(),
            value: value.into(),
        }
    }

    struct Counter {
        count: i64,
    }

    impl Component for Counter {
        fn render(&self) -> Result<String, ComponentError> {
            Ok(format!("<div>{}</div>", self.count))
        }

        fn handlers(table: &mut HandlerTable<Self>) {
            let _ = table
                .on("Increment", |driver: Arc<Driver<Self>>, _| async move {
                    driver.update(|c| c.count += 1);
                    let _ = driver.commit();
                    Ok(())
                })
                .on("Boom", |_, _| async move { panic!("handler exploded") })
                .on("Fail", |_, _| async move {
                    Err(ComponentError::handler("refused"))
                })
                .on("Echo", |driver: Arc<Driver<Self>>, _| async move {
                    let value = driver.get_value("input").await;
                    let _ = driver.set_text("out", value);
                    Ok(())
                });
        }
    }

    struct Label(&'static str);

    impl Component for Label {
        fn render(&self) -> Result<String, ComponentError> {
            Ok(self.0.to_string())
        }
    }

    struct Fragile {
        mode: &'static str,
    }

    impl Component for Fragile {
        fn render(&self) -> Result<String, ComponentError> {
            match self.mode {
                "error" => Err(ComponentError::Render("missing field".into())),
                "panic" => panic!("template blew up"),
                _ => Ok("fine".into()),
            }
        }
    }

    /// A node whose start never completes.
    struct Stalled {
        id: ComponentId,
        anchor: String,
    }

    impl Stalled {
        fn new(id: &str) -> Arc<Self> {
            let id = ComponentId::from(id);
            let anchor = id.anchor();
            Arc::new(Self { id, anchor })
        }
    }

    impl DriverNode for Stalled {
        fn component_id(&self) -> &ComponentId {
            &self.id
        }
        fn anchor_id(&self) -> &str {
            &self.anchor
        }
        fn execute_event(self: Arc<Self>, _name: &str, _data: Value) -> bool {
            false
        }
        fn commit(&self) -> bool {
            false
        }
        fn commit_tree(&self) -> usize {
            0
        }
        fn start(self: Arc<Self>, _scope: SessionScope) -> BoxFuture<'static, ()> {
            Box::pin(futures::future::pending())
        }
        fn children(&self) -> Vec<Arc<dyn DriverNode>> {
            Vec::new()
        }
        fn is_started(&self) -> bool {
            false
        }
    }

    #[test]
    fn anchors_follow_mount_convention() {
        let child = Driver::new("clock", Label("x"));
        assert_eq!(child.anchor_id(), "mount_span_clock");
        assert_eq!(child.component_id().as_str(), "clock");

        let root = Driver::root("app", "c1", Label("x"));
        assert_eq!(root.anchor_id(), "app");
    }

    #[tokio::test]
    async fn increment_event_sends_fill() {
        let (scope, mut rx) = session();
        let driver = Driver::root("c1", "c1", Counter { count: 0 });
        driver.clone().start(scope.clone()).await;

        assert!(driver.clone().execute_event("Increment", Value::Null));
        assert_eq!(rx.recv().await.unwrap(), fill("c1", "<div>1</div>"));
    }

    #[tokio::test]
    async fn committed_html_matches_direct_render() {
        let (scope, mut rx) = session();
        let driver = Driver::root("c1", "c1", Counter { count: 0 });
        driver.clone().start(scope.clone()).await;

        for _ in 0..3 {
            assert!(driver.clone().execute_event("Increment", Value::Null));
        }
        assert!(scope.shutdown().await);

        let mut last = None;
        while let Ok(envelope) = rx.try_recv() {
            last = Some(envelope);
        }
        let direct = driver.with_state(Counter::render).unwrap();
        assert_eq!(direct, "<div>3</div>");
        assert_eq!(last, Some(fill("c1", &direct)));
    }

    #[tokio::test]
    async fn unknown_event_is_a_noop() {
        let (scope, mut rx) = session();
        let driver = Driver::root("c1", "c1", Counter { count: 0 });
        driver.clone().start(scope.clone()).await;

        assert!(!driver.clone().execute_event("Nope", json!({"x": 1})));
        assert!(scope.shutdown().await);
        assert_eq!(rx.try_recv(), Err(TryRecvError::Empty));
        assert_eq!(driver.with_state(|c| c.count), 0);
    }

    #[tokio::test]
    async fn panicking_handler_does_not_stop_later_events() {
        let (scope, mut rx) = session();
        let driver = Driver::root("c1", "c1", Counter { count: 0 });
        driver.clone().start(scope.clone()).await;

        assert!(driver.clone().execute_event("Boom", Value::Null));
        assert!(driver.clone().execute_event("Fail", Value::Null));
        assert!(driver.clone().execute_event("Increment", Value::Null));

        assert_eq!(rx.recv().await.unwrap(), fill("c1", "<div>1</div>"));
        assert!(!scope.is_cancelled());
    }

    #[tokio::test]
    async fn runtime_handler_registration() {
        let (scope, mut rx) = session();
        let driver = Driver::root("c1", "c1", Label("hi"));
        let _ = driver.on("Ping", |d: Arc<Driver<Label>>, data| async move {
            let _ = d.set_text("pong", payload_text(data));
            Ok(())
        });
        assert!(driver.handles("Ping"));
        driver.clone().start(scope.clone()).await;

        assert!(driver.clone().execute_event("Ping", json!("x")));
        assert_eq!(
            rx.recv().await.unwrap(),
            Envelope::Text {
                id: "pong".into(),
                value: "x".into()
            }
        );
    }

    #[tokio::test]
    async fn patches_from_one_driver_keep_order() {
        let (scope, mut rx) = session();
        let driver = Driver::new("d", Label("x"));
        driver.clone().start(scope).await;

        for i in 0..100 {
            assert!(driver.set_text("t", i.to_string()));
        }
        for i in 0..100 {
            assert_eq!(
                rx.recv().await.unwrap(),
                Envelope::Text {
                    id: "t".into(),
                    value: i.to_string()
                }
            );
        }
    }

    #[tokio::test]
    async fn emitters_build_matching_envelopes() {
        let (scope, mut rx) = session();
        let driver = Driver::new("d", Label("x"));
        driver.clone().start(scope).await;

        assert!(driver.set_html("a", "<b>x</b>"));
        assert!(driver.set_style("a", "color: red"));
        assert!(driver.set_value("in", "42"));
        assert!(driver.set_property("in", "checked", true));
        assert!(driver.remove("gone"));
        assert!(driver.add_node("list", "<li>1</li>"));
        assert!(driver.run_script("console.log(1)"));

        let kinds: Vec<&str> = std::iter::from_fn(|| rx.try_recv().ok())
            .map(|e| e.kind())
            .collect();
        assert_eq!(
            kinds,
            vec!["fill", "style", "set", "propertie", "remove", "addNode", "script"]
        );
    }

    #[test]
    fn unstarted_driver_sends_nothing() {
        let driver = Driver::new("d", Label("x"));
        assert!(!driver.commit());
        assert!(!driver.set_text("a", "b"));
        assert!(!driver.clone().execute_event("Anything", Value::Null));
    }

    #[tokio::test]
    async fn get_on_unstarted_driver_is_empty() {
        let driver = Driver::new("d", Label("x"));
        assert_eq!(
            driver.request(GetKind::Value, "x", "").await,
            Err(GetError::NotStarted)
        );
        assert_eq!(driver.get_value("x").await, "");
    }

    #[tokio::test]
    async fn render_failure_sends_no_patch() {
        let (scope, mut rx) = session();
        let broken = Driver::new("e", Fragile { mode: "error" });
        let panicky = Driver::new("p", Fragile { mode: "panic" });
        broken.clone().start(scope.clone()).await;
        panicky.clone().start(scope.clone()).await;

        assert!(!broken.commit());
        assert!(!panicky.commit());
        assert_eq!(rx.try_recv(), Err(TryRecvError::Empty));

        panicky.update(|f| f.mode = "ok");
        assert!(panicky.commit());
        assert_eq!(rx.try_recv().unwrap(), fill("mount_span_p", "fine"));
    }

    #[tokio::test]
    async fn handler_get_round_trip() {
        let (scope, mut rx) = session();
        let driver = Driver::root("c1", "c1", Counter { count: 0 });
        driver.clone().start(scope.clone()).await;

        assert!(driver.clone().execute_event("Echo", Value::Null));
        let Some(Envelope::Get {
            id, id_ret, sub_type, ..
        }) = rx.recv().await
        else {
            panic!("expected get envelope");
        };
        assert_eq!(id, "input");
        assert_eq!(sub_type, GetKind::Value);
        assert!(scope.pending().deliver(&id_ret, json!("hello")));

        assert_eq!(
            rx.recv().await.unwrap(),
            Envelope::Text {
                id: "out".into(),
                value: "hello".into()
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn handler_get_timeout_yields_empty() {
        let (scope, mut rx) = session();
        let driver = Driver::root("c1", "c1", Counter { count: 0 });
        driver.clone().start(scope.clone()).await;

        assert!(driver.clone().execute_event("Echo", Value::Null));
        let Some(Envelope::Get { .. }) = rx.recv().await else {
            panic!("expected get envelope");
        };
        assert_eq!(
            rx.recv().await.unwrap(),
            Envelope::Text {
                id: "out".into(),
                value: String::new()
            }
        );
        assert!(scope.pending().is_empty());
    }

    #[tokio::test]
    async fn start_registers_fifty_children() {
        let (scope, _rx) = session();
        let root = Driver::root("app", "root", Label("root"));
        for i in 0..50 {
            let _ = root.mount(Driver::new(format!("child{i}"), Label("c")));
        }

        let started = tokio::time::Instant::now();
        root.clone().start(scope.clone()).await;
        assert!(started.elapsed() < scope.config().start_timeout());

        assert_eq!(scope.registry().len(), 51);
        for i in 0..50 {
            let id = ComponentId::from(format!("child{i}"));
            assert!(scope.registry().contains(&id), "{id} missing");
        }
        assert!(root.children().iter().all(|c| c.is_started()));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_nested_start_registers_every_id_once() {
        let (scope, _rx) = session();
        let root = Driver::root("app", "root", Label("root"));
        let mut expected = std::collections::BTreeSet::from([ComponentId::from("root")]);
        for g in 0..10 {
            let group = Driver::new(format!("group{g}"), Label("group"));
            let _ = expected.insert(ComponentId::from(format!("group{g}")));
            for l in 0..10 {
                let _ = group.mount(Driver::new(format!("leaf{g}_{l}"), Label("leaf")));
                let _ = expected.insert(ComponentId::from(format!("leaf{g}_{l}")));
            }
            let _ = root.mount(group);
        }

        root.clone().start(scope.clone()).await;

        let registered: std::collections::BTreeSet<ComponentId> =
            scope.registry().ids().into_iter().collect();
        assert_eq!(scope.registry().len(), 111);
        assert_eq!(registered, expected);
    }

    #[tokio::test]
    async fn nested_children_start_recursively() {
        let (scope, mut rx) = session();
        let leaf = Driver::new("leaf", Label("leaf"));
        let mid = Driver::new("mid", Label("mid"));
        let _ = mid.mount(leaf.clone());
        let root = Driver::root("app", "root", Label("root"));
        let _ = root.mount(mid);
        root.clone().start(scope.clone()).await;

        assert!(leaf.is_started());
        assert_eq!(scope.registry().len(), 3);
        assert_eq!(root.commit_tree(), 3);
        let targets: Vec<String> = std::iter::from_fn(|| rx.try_recv().ok())
            .filter_map(|e| e.target().map(str::to_owned))
            .collect();
        assert_eq!(targets, vec!["app", "mount_span_mid", "mount_span_leaf"]);
    }

    #[tokio::test(start_paused = true)]
    async fn start_timeout_keeps_children_that_did_start() {
        let (scope, _rx) = session_with(RuntimeConfig {
            start_timeout_ms: 100,
            ..RuntimeConfig::default()
        });
        let root = Driver::root("app", "root", Label("root"));
        let _ = root.mount(Stalled::new("stuck"));
        let _ = root.mount(Driver::new("quick", Label("q")));

        let started = tokio::time::Instant::now();
        root.clone().start(scope.clone()).await;
        let elapsed = started.elapsed();

        assert!(elapsed >= Duration::from_millis(100));
        assert!(elapsed < Duration::from_secs(1));
        assert!(scope.registry().contains(&ComponentId::from("quick")));
        assert!(!scope.registry().contains(&ComponentId::from("stuck")));
    }

    #[tokio::test]
    async fn start_returns_on_cancellation() {
        let (scope, _rx) = session();
        let root = Driver::root("app", "root", Label("root"));
        let _ = root.mount(Stalled::new("stuck"));

        let canceller = scope.cancel_token().clone();
        let _ = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });
        root.clone().start(scope.clone()).await;
        assert!(scope.is_cancelled());
        assert!(scope.registry().contains(&ComponentId::from("root")));
    }

    #[tokio::test]
    async fn second_start_is_ignored() {
        let (scope, _rx) = session();
        let (other, _other_rx) = session();
        let driver = Driver::new("d", Label("x"));
        driver.clone().start(scope.clone()).await;
        driver.clone().start(other.clone()).await;

        assert_eq!(driver.scope().unwrap().session_id(), scope.session_id());
        assert!(other.registry().is_empty());
    }

    #[tokio::test]
    async fn init_runs_once_on_start() {
        static INITS: AtomicUsize = AtomicUsize::new(0);

        struct Counted;
        impl Component for Counted {
            fn render(&self) -> Result<String, ComponentError> {
                Ok(String::new())
            }
            fn init(&mut self) -> Result<(), ComponentError> {
                let _ = INITS.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }

        let (scope, _rx) = session();
        let driver = Driver::new("d", Counted);
        driver.clone().start(scope.clone()).await;
        driver.clone().start(scope).await;
        assert_eq!(INITS.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failing_init_still_registers() {
        struct Broken;
        impl Component for Broken {
            fn render(&self) -> Result<String, ComponentError> {
                Ok(String::new())
            }
            fn init(&mut self) -> Result<(), ComponentError> {
                Err(ComponentError::Init("no config".into()))
            }
        }

        let (scope, _rx) = session();
        let driver = Driver::new("b", Broken);
        driver.clone().start(scope.clone()).await;
        assert!(scope.registry().contains(&ComponentId::from("b")));
    }

    #[tokio::test]
    async fn mount_with_start_on_running_parent() {
        let (scope, mut rx) = session();
        let root = Driver::root("app", "root", Label("root"));
        root.clone().start(scope.clone()).await;

        let clock = Driver::new("clock", Label("12:00"));
        assert!(root.mount_with_start("slot", clock.clone()).await.child("slot").is_some());
        assert!(clock.is_started());
        assert!(scope.registry().contains(&ComponentId::from("clock")));

        assert!(clock.commit());
        assert_eq!(rx.recv().await.unwrap(), fill("mount_span_clock", "12:00"));
    }

    #[tokio::test]
    async fn mount_with_start_before_parent_starts_defers() {
        let (scope, _rx) = session();
        let root = Driver::root("app", "root", Label("root"));
        let child = Driver::new("late", Label("x"));
        let _ = root.mount_with_start("slot", child.clone()).await;
        assert!(!child.is_started());

        root.clone().start(scope.clone()).await;
        assert!(child.is_started());
    }

    #[tokio::test]
    async fn remount_replaces_and_deregisters_previous() {
        let (scope, _rx) = session();
        let root = Driver::root("app", "root", Label("root"));
        root.clone().start(scope.clone()).await;

        let _ = root.mount_with_start("slot", Driver::new("a", Label("a"))).await;
        let _ = root.mount_with_start("slot", Driver::new("b", Label("b"))).await;

        assert_eq!(root.children().len(), 1);
        assert!(!scope.registry().contains(&ComponentId::from("a")));
        assert!(scope.registry().contains(&ComponentId::from("b")));
    }

    #[tokio::test]
    async fn unmount_deregisters_subtree() {
        let (scope, mut rx) = session();
        let inner = Driver::new("inner", Label("i"));
        let panel = Driver::new("panel", Label("p"));
        let _ = panel.mount(inner.clone());
        let root = Driver::root("app", "root", Label("root"));
        let _ = root.mount(panel);
        root.clone().start(scope.clone()).await;
        assert_eq!(scope.registry().len(), 3);

        let removed = root.unmount("mount_span_panel").unwrap();
        assert_eq!(removed.component_id().as_str(), "panel");
        assert_eq!(scope.registry().ids(), vec![ComponentId::from("root")]);
        assert!(root.unmount("mount_span_panel").is_none());
        assert_eq!(rx.try_recv(), Err(TryRecvError::Empty));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_events_on_different_drivers() {
        let (scope, mut rx) = session();
        let root = Driver::root("app", "root", Label("root"));
        let a = Driver::new("a", Counter { count: 0 });
        let b = Driver::new("b", Counter { count: 0 });
        let _ = root.mount(a.clone()).mount(b.clone());
        root.clone().start(scope.clone()).await;

        for _ in 0..100 {
            assert!(a.clone().execute_event("Increment", Value::Null));
            assert!(b.clone().execute_event("Increment", Value::Null));
        }
        assert!(scope.shutdown().await);

        assert_eq!(a.with_state(|c| c.count), 100);
        assert_eq!(b.with_state(|c| c.count), 100);

        let mut fills = (0, 0);
        while let Ok(envelope) = rx.try_recv() {
            match envelope.target() {
                Some("mount_span_a") => fills.0 += 1,
                Some("mount_span_b") => fills.1 += 1,
                other => panic!("unexpected target {other:?}"),
            }
        }
        assert_eq!(fills, (100, 100));
    }

    #[tokio::test]
    async fn data_payload_round_trips() {
        let driver = Driver::new("d", Label("x"));
        assert_eq!(driver.data(), None);
        driver.set_data(json!({"theme": "dark"}));
        assert_eq!(driver.data(), Some(json!({"theme": "dark"})));
    }

    #[tokio::test]
    async fn shutdown_cancels_handlers_waiting_on_get() {
        let (scope, _rx) = session_with(RuntimeConfig {
            get_timeout_ms: 60_000,
            drain_timeout_ms: 10,
            ..RuntimeConfig::default()
        });
        let driver = Driver::new("d", Label("x"));
        let _ = driver.on("Wait", |d: Arc<Driver<Label>>, _| async move {
            let _ = d.get_value("never").await;
            Ok(())
        });
        driver.clone().start(scope.clone()).await;

        assert!(driver.clone().execute_event("Wait", Value::Null));
        tokio::task::yield_now().await;
        assert_eq!(scope.pending().len(), 1);

        let started = tokio::time::Instant::now();
        assert!(!scope.shutdown().await);
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(scope.in_flight(), 0);
        assert!(scope.pending().is_empty());
    }

    #[test]
    fn panic_message_extracts_payloads() {
        let owned: Box<dyn std::any::Any + Send> = Box::new(String::from("owned"));
        let borrowed: Box<dyn std::any::Any + Send> = Box::new("borrowed");
        let other: Box<dyn std::any::Any + Send> = Box::new(7_u8);
        assert_eq!(panic_message(&owned), "owned");
        assert_eq!(panic_message(&borrowed), "borrowed");
        assert_eq!(panic_message(&other), "unknown panic");
    }
}
