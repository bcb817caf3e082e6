//! Ordered registry of action factories.

use std::sync::Arc;

use crate::actions::ActionFactory;

/// Append-only list of action factories.
///
/// Populated before the listener binds, then frozen behind an `Arc` and
/// shared read-only by every dispatch. Registration order is execution
/// order and report order.
#[derive(Default)]
pub struct ActionRegistry {
    factories: Vec<Arc<dyn ActionFactory>>,
}

impl ActionRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a factory.
    pub fn register(&mut self, factory: Arc<dyn ActionFactory>) {
        let name = factory.name().to_string();
        if self.factories.iter().any(|f| f.name() == name) {
            tracing::warn!(action = %name, "Action registered more than once");
        }
        self.factories.push(factory);
        tracing::debug!(action = %name, position = self.factories.len(), "Registered action");
    }

    /// Builder-style [`register`](Self::register).
    pub fn with(mut self, factory: Arc<dyn ActionFactory>) -> Self {
        self.register(factory);
        self
    }

    /// All factories, in registration order.
    pub fn all(&self) -> &[Arc<dyn ActionFactory>] {
        &self.factories
    }

    /// Names in registration order.
    pub fn names(&self) -> Vec<&str> {
        self.factories.iter().map(|f| f.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}
