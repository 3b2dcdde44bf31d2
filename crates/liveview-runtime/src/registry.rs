//! Per-session lookup of started drivers.

use std::sync::Arc;

use dashmap::DashMap;
use liveview_core::ComponentId;
use tracing::warn;

use crate::driver::DriverNode;

/// Registry of the started drivers of one session, keyed by component id.
///
/// The reader loop resolves `data` frames here; starts and unmounts mutate it
/// concurrently.
#[derive(Default)]
pub struct DriverRegistry {
    drivers: DashMap<ComponentId, Arc<dyn DriverNode>>,
}

impl DriverRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a driver under its component id.
    ///
    /// A driver already registered under the same id is replaced and returned.
    pub fn register(&self, node: Arc<dyn DriverNode>) -> Option<Arc<dyn DriverNode>> {
        let id = node.component_id().clone();
        let previous = self.drivers.insert(id.clone(), node);
        if previous.is_some() {
            warn!(component_id = %id, "component id registered twice, replacing previous driver");
        }
        previous
    }

    /// Look up a driver by component id.
    pub fn get(&self, id: &ComponentId) -> Option<Arc<dyn DriverNode>> {
        self.drivers.get(id).map(|entry| Arc::clone(entry.value()))
    }

    /// Check if a component id is registered.
    pub fn contains(&self, id: &ComponentId) -> bool {
        self.drivers.contains_key(id)
    }

    /// Remove `node` if it is still the driver registered under its id.
    pub fn remove_node(&self, node: &Arc<dyn DriverNode>) -> bool {
        self.drivers
            .remove_if(node.component_id(), |_, current| Arc::ptr_eq(current, node))
            .is_some()
    }

    /// Remove `node` and every driver mounted beneath it.
    ///
    /// Returns how many registrations were removed.
    pub fn remove_tree(&self, node: &Arc<dyn DriverNode>) -> usize {
        let mut removed = 0;
        let mut stack = vec![Arc::clone(node)];
        while let Some(current) = stack.pop() {
            if self.remove_node(&current) {
                removed += 1;
            }
            stack.extend(current.children());
        }
        removed
    }

    /// Drop every registration.
    pub fn clear(&self) {
        self.drivers.clear();
    }

    /// All registered component ids, sorted.
    pub fn ids(&self) -> Vec<ComponentId> {
        let mut ids: Vec<ComponentId> = self.drivers.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Number of registered drivers.
    /// Number of registered drivers.
    pub fn len(&self) -> usize {
        self.drivers.len()
    }

    /// Whether no driver is registered.
    pub fn is_empty(&self) -> bool {
        self.drivers.is_empty()
    }
}
