//! KB Router (§4.2): multiplexes a logical KB API over one or more backends.

use crate::ast::{AstNode, Metadata};
use crate::backend::Backend;
use crate::error::SkicResult;
use crate::unify::Bindings;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;

/// Multiplexes backend operations by context. `context_to_backend` is a
/// `DashMap` so lookups never contend with the registration-order vector used
/// for transaction broadcast (§5).
pub struct Router {
    default_backend: Arc<dyn Backend>,
    backends: HashMap<String, Arc<dyn Backend>>,
    registration_order: Vec<String>,
    context_to_backend: DashMap<String, String>,
}

impl Router {
    pub fn new(default_backend: Arc<dyn Backend>) -> Self {
        Router {
            default_backend,
            backends: HashMap::new(),
            registration_order: Vec::new(),
            context_to_backend: DashMap::new(),
        }
    }

    /// Registers a named backend. Registration order is recorded for the
    /// deterministic transaction-broadcast lock order (§5).
    pub fn register_backend(&mut self, name: impl Into<String>, backend: Arc<dyn Backend>) {
        let name = name.into();
        self.backends.insert(name.clone(), backend);
        self.registration_order.push(name);
    }

    fn backend_for(&self, context_id: &str) -> Arc<dyn Backend> {
        match self.context_to_backend.get(context_id) {
            Some(name) => self
                .backends
                .get(name.as_str())
                .cloned()
                .unwrap_or_else(|| self.default_backend.clone()),
            None => self.default_backend.clone(),
        }
    }

    /// Every distinct backend known to the router, in registration order with
    /// the default backend last — used for transaction broadcast.
    fn all_backends(&self) -> Vec<Arc<dyn Backend>> {
        let mut out: Vec<Arc<dyn Backend>> = self
            .registration_order
            .iter()
            .filter_map(|name| self.backends.get(name).cloned())
            .collect();
        out.push(self.default_backend.clone());
        out
    }

    pub fn create_context(
        &self,
        id: &str,
        parent: Option<&str>,
        kind: &str,
        backend_name: Option<&str>,
    ) -> SkicResult<()> {
        if let Some(name) = backend_name {
            self.context_to_backend.insert(id.to_string(), name.to_string());
        } else if let Some(p) = parent {
            if let Some(parent_backend) = self.context_to_backend.get(p) {
                self.context_to_backend.insert(id.to_string(), parent_backend.clone());
            }
        }
        self.backend_for(id).create_context(id, parent, kind)
    }

    pub fn delete_context(&self, id: &str) -> SkicResult<()> {
        self.backend_for(id).delete_context(id)?;
        self.context_to_backend.remove(id);
        Ok(())
    }

    pub fn list_contexts(&self) -> Vec<String> {
        let mut seen = std::collections::HashSet::new();
        let mut ids = Vec::new();
        for backend in self.all_backends() {
            for id in backend.list_contexts() {
                if seen.insert(id.clone()) {
                    ids.push(id);
                }
            }
        }
        ids.sort();
        ids
    }

    pub fn add_statement(
        &self,
        stmt: AstNode,
        context_id: &str,
        metadata: Option<Metadata>,
    ) -> SkicResult<bool> {
        self.backend_for(context_id).add_statement(stmt, context_id, metadata)
    }

    pub fn retract_statement(&self, pattern: &AstNode, context_id: &str) -> SkicResult<bool> {
        self.backend_for(context_id).retract_statement(pattern, context_id)
    }

    /// Groups `context_ids` by backend and queries each backend once over its
    /// subset, concatenating results in context-list order (P-ROUTER).
    pub fn query_match(
        &self,
        pattern: &AstNode,
        context_ids: &[String],
        bind_vars: Option<&[u64]>,
    ) -> SkicResult<Vec<Bindings>> {
        let mut results = Vec::new();
        for (backend, subset) in self.group_by_backend(context_ids) {
            results.extend(backend.query_match(pattern, &subset, bind_vars)?);
        }
        Ok(results)
    }

    pub fn statement_exists(&self, stmt: &AstNode, context_ids: &[String]) -> SkicResult<bool> {
        for (backend, subset) in self.group_by_backend(context_ids) {
            if backend.statement_exists(stmt, &subset)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    pub fn enumerate_statements(&self, context_id: &str) -> SkicResult<Vec<Arc<AstNode>>> {
        self.backend_for(context_id).enumerate_statements(context_id)
    }

    /// Partitions `context_ids` by backend while preserving each subset's
    /// relative order from the original list.
    fn group_by_backend(&self, context_ids: &[String]) -> Vec<(Arc<dyn Backend>, Vec<String>)> {
        let mut order: Vec<String> = Vec::new();
        let mut groups: HashMap<String, Vec<String>> = HashMap::new();
        let mut backend_by_key: HashMap<String, Arc<dyn Backend>> = HashMap::new();
        for context_id in context_ids {
            let backend = self.backend_for(context_id);
            let key = self
                .context_to_backend
                .get(context_id)
                .map(|b| b.clone())
                .unwrap_or_else(|| "__default__".to_string());
            if !groups.contains_key(&key) {
                order.push(key.clone());
                backend_by_key.insert(key.clone(), backend);
            }
            groups.entry(key).or_default().push(context_id.clone());
        }
        order
            .into_iter()
            .map(|key| {
                let backend = backend_by_key.remove(&key).expect("inserted above");
                let subset = groups.remove(&key).expect("inserted above");
                (backend, subset)
            })
            .collect()
    }

    /// Broadcasts `begin_transaction` to the unique set of backends in
    /// registration order. A failure on one backend is recorded but does not
    /// abort the broadcast to the rest (§4.2).
    pub fn begin_transaction(&self) -> Vec<SkicResult<()>> {
        self.all_backends().iter().map(|b| b.begin_transaction()).collect()
    }

    pub fn commit_transaction(&self) -> Vec<SkicResult<()>> {
        self.all_backends().iter().map(|b| b.commit_transaction()).collect()
    }

    pub fn rollback_transaction(&self) -> Vec<SkicResult<()>> {
        self.all_backends().iter().map(|b| b.rollback_transaction()).collect()
    }

    pub fn persist_all(&self) -> Vec<SkicResult<bool>> {
        self.all_backends().iter().map(|b| b.persist()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::builders::{binary_application, ConstantBuilder, VariableBuilder};
    use crate::backend::MemoryBackend;
    use crate::unify::SimpleUnifier;

    fn router_with_two_backends() -> Router {
        let unifier = Arc::new(SimpleUnifier::new());
        let b1: Arc<dyn Backend> = Arc::new(MemoryBackend::new(unifier.clone()));
        let b2: Arc<dyn Backend> = Arc::new(MemoryBackend::new(unifier));
        let mut router = Router::new(b1.clone());
        router.register_backend("b1", b1);
        router.register_backend("b2", b2);
        router
    }

    #[test]
    fn s2_context_routing_through_router() {
        let router = router_with_two_backends();
        router.create_context("T", None, "default", Some("b1")).unwrap();
        router.create_context("U", Some("T"), "default", Some("b2")).unwrap();
        router
            .add_statement(
                binary_application(
                    "is_a",
                    "Relation",
                    ConstantBuilder::new("Toyota", "Entity").build(),
                    ConstantBuilder::new("Car", "Entity").build(),
                ),
                "U",
                None,
            )
            .unwrap();
        let pattern = binary_application(
            "is_a",
            "Relation",
            VariableBuilder::new("X", 1, "Entity").build(),
            ConstantBuilder::new("Car", "Entity").build(),
        );
        let results = router
            .query_match(&pattern, &["T".to_string(), "U".to_string()], Some(&[1]))
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(router.list_contexts(), vec!["T".to_string(), "U".to_string()]);
    }
}
