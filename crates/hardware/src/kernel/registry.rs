//! Component registry.
//!
//! Each simulation instance owns one registry. Components register themselves
//! at construction and receive a `ComponentId`, which is what register writes
//! carry as writer identity and what deadlock reports print.

use std::fmt;

/// Identity of a registered component.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ComponentId(pub u32);

impl fmt::Display for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Owns the names of every component of one simulation instance.
#[derive(Debug, Default, Clone)]
pub struct ComponentRegistry {
    names: Vec<String>,
}

impl ComponentRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a component under a hierarchical name such as `core0.memory`.
    pub fn register(&mut self, name: impl Into<String>) -> ComponentId {
        let id = ComponentId(self.names.len() as u32);
        self.names.push(name.into());
        id
    }

    /// Returns the name a component registered with, if any.
    pub fn name(&self, id: ComponentId) -> Option<&str> {
        self.names.get(id.0 as usize).map(String::as_str)
    }

    /// Number of registered components.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Returns true if nothing has registered yet.
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}
