//! Table ordering for whole-database flushes.

use graphflush_core::EntityModel;
use std::collections::HashMap;

/// Orders entities by how many other entities they hold foreign keys to.
///
/// - writes: parent-first (fewer dependencies first)
/// - deletes: child-first (more dependencies first)
///
/// Ties keep registration order. Cycles are not detected here; the
/// per-record resolver settles whatever a table pass leaves dirty.
#[derive(Debug, Default)]
pub struct FlushOrderer {
    /// Entity -> entities it depends on (has FK to).
    dependencies: HashMap<String, Vec<String>>,
    registered: Vec<String>,
}

impl FlushOrderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a model's dependencies from its reference fields.
    pub fn register_model(&mut self, model: &EntityModel) {
        let deps = model
            .dependencies()
            .into_iter()
            .map(str::to_string)
            .collect();
        self.register(&model.name, deps);
    }

    /// Register an entity's dependencies directly.
    pub fn register(&mut self, entity: &str, depends_on: Vec<String>) {
        if self
            .dependencies
            .insert(entity.to_string(), depends_on)
            .is_none()
        {
            self.registered.push(entity.to_string());
        }
    }

    fn dependency_count(&self, entity: &str) -> usize {
        self.dependencies.get(entity).map_or(0, Vec::len)
    }

    /// Entities in write order.
    pub fn write_order(&self) -> Vec<String> {
        let mut order = self.registered.clone();
        order.sort_by_key(|entity| self.dependency_count(entity));
        order
    }

    /// Entities in delete order.
    pub fn delete_order(&self) -> Vec<String> {
        let mut order = self.registered.clone();
        order.sort_by(|a, b| self.dependency_count(b).cmp(&self.dependency_count(a)));
        order
    }
}
