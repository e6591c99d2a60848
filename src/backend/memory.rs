//! In-memory backend: `persist`/`load` are no-ops, per §4.1.

use super::state::KnowledgeState;
use super::Backend;
use crate::ast::{AstNode, Metadata};
use crate::error::SkicResult;
use crate::unify::{Bindings, UnificationEngine};
use std::sync::Arc;

pub struct MemoryBackend {
    state: KnowledgeState,
}

impl MemoryBackend {
    pub fn new(unifier: Arc<dyn UnificationEngine>) -> Self {
        MemoryBackend { state: KnowledgeState::new(unifier) }
    }
}

impl Backend for MemoryBackend {
    fn add_statement(
        &self,
        stmt: AstNode,
        context_id: &str,
        metadata: Option<Metadata>,
    ) -> SkicResult<bool> {
        self.state.add_statement(stmt, context_id, metadata)
    }

    fn retract_statement(&self, pattern: &AstNode, context_id: &str) -> SkicResult<bool> {
        self.state.retract_statement(pattern, context_id)
    }

    fn query_match(
        &self,
        pattern: &AstNode,
        context_ids: &[String],
        bind_vars: Option<&[u64]>,
    ) -> SkicResult<Vec<Bindings>> {
        self.state.query_match(pattern, context_ids, bind_vars)
    }

    fn statement_exists(&self, stmt: &AstNode, context_ids: &[String]) -> SkicResult<bool> {
        self.state.statement_exists(stmt, context_ids)
    }

    fn create_context(&self, id: &str, parent: Option<&str>, kind: &str) -> SkicResult<()> {
        self.state.create_context(id, parent, kind)
    }

    fn delete_context(&self, id: &str) -> SkicResult<()> {
        self.state.delete_context(id)
    }

    fn list_contexts(&self) -> Vec<String> {
        self.state.list_contexts()
    }

    fn enumerate_statements(&self, context_id: &str) -> SkicResult<Vec<Arc<AstNode>>> {
        self.state.enumerate_statements(context_id)
    }

    fn persist(&self) -> SkicResult<bool> {
        tracing::trace!("in-memory backend persist is a no-op");
        Ok(true)
    }

    fn load(&self) -> SkicResult<bool> {
        tracing::trace!("in-memory backend load is a no-op");
        Ok(true)
    }

    fn begin_transaction(&self) -> SkicResult<()> {
        self.state.begin_transaction()
    }

    fn commit_transaction(&self) -> SkicResult<()> {
        self.state.commit_transaction()
    }

    fn rollback_transaction(&self) -> SkicResult<()> {
        self.state.rollback_transaction()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::builders::{binary_application, ConstantBuilder, VariableBuilder};
    use crate::unify::SimpleUnifier;

    #[test]
    fn s1_add_query_single_context() {
        let backend = MemoryBackend::new(Arc::new(SimpleUnifier::new()));
        backend.create_context("T", None, "default").unwrap();
        backend
            .add_statement(
                binary_application(
                    "is_a",
                    "Relation",
                    ConstantBuilder::new("John", "Entity").build(),
                    ConstantBuilder::new("Person", "Entity").build(),
                ),
                "T",
                None,
            )
            .unwrap();
        backend
            .add_statement(
                binary_application(
                    "is_a",
                    "Relation",
                    ConstantBuilder::new("Mary", "Entity").build(),
                    ConstantBuilder::new("Person", "Entity").build(),
                ),
                "T",
                None,
            )
            .unwrap();
        let pattern = binary_application(
            "is_a",
            "Relation",
            VariableBuilder::new("X", 1, "Entity").build(),
            ConstantBuilder::new("Person", "Entity").build(),
        );
        let results = backend.query_match(&pattern, &["T".to_string()], Some(&[1])).unwrap();
        assert_eq!(results.len(), 2);
        let names: std::collections::HashSet<String> = results
            .iter()
            .map(|b| b[&1].structural_string())
            .collect();
        assert!(names.contains("John:Entity"));
        assert!(names.contains("Mary:Entity"));
    }
}
