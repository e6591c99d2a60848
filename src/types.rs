//! `TypeSystem` collaborator contract (§6).
//!
//! SKIC consumes type information for lookup and subtyping checks only; it
//! never owns or validates the type hierarchy itself (explicit non-goal,
//! §1). A minimal in-memory implementation is provided for tests and for
//! callers that have no richer type system to plug in.

use parking_lot::RwLock;
use std::collections::HashMap;

/// A type known to the external type system.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Type {
    pub name: String,
    pub parent: Option<String>,
}

/// Capability consumed by the optimiser and rule compiler for type lookup
/// and subtyping checks.
pub trait TypeSystem: Send + Sync {
    fn get_type(&self, name: &str) -> Option<Type>;
    fn subtype_of(&self, a: &str, b: &str) -> bool;
    fn register_type(&self, name: &str, parent: Option<&str>);
}

/// Simple in-memory type system: a forest of named types, subtyping decided
/// by walking `parent` links. Good enough to drive tests and small
/// deployments; production callers are expected to bring their own.
#[derive(Default)]
pub struct InMemoryTypeSystem {
    types: RwLock<HashMap<String, Type>>,
}

impl InMemoryTypeSystem {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TypeSystem for InMemoryTypeSystem {
    fn get_type(&self, name: &str) -> Option<Type> {
        self.types.read().get(name).cloned()
    }

    fn subtype_of(&self, a: &str, b: &str) -> bool {
        if a == b {
            return true;
        }
        let types = self.types.read();
        let mut cursor = a.to_string();
        while let Some(t) = types.get(&cursor) {
            match &t.parent {
                Some(parent) if parent == b => return true,
                Some(parent) => cursor = parent.clone(),
                None => return false,
            }
        }
        false
    }

    fn register_type(&self, name: &str, parent: Option<&str>) {
        self.types.write().insert(
            name.to_string(),
            Type {
                name: name.to_string(),
                parent: parent.map(str::to_string),
            },
        );
    }
}
