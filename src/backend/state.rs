//! Shared in-memory state machine backing every [`super::Backend`] variant:
//! primary statement sets, the three secondary indices, the context forest,
//! and transaction snapshots. A single `parking_lot::Mutex` serialises all
//! access — §5 requires no more than a single serialised owner per backend,
//! not lock-free reads.

use super::Context;
use crate::ast::AstNode;
use crate::error::{SkicError, SkicResult};
use crate::unify::{Bindings, UnificationEngine};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

type StatementSet = HashSet<Arc<AstNode>>;

/// The three secondary indices maintained for a single context (§3, I-IDX).
#[derive(Default, Clone)]
struct ContextIndices {
    predicate: HashMap<String, StatementSet>,
    constant: HashMap<String, StatementSet>,
    type_idx: HashMap<String, StatementSet>,
}

impl ContextIndices {
    fn index(&mut self, stmt: &Arc<AstNode>) {
        if let Some((pred, _)) = stmt.as_predicate_application() {
            self.predicate.entry(pred.to_string()).or_default().insert(stmt.clone());
            for constant in stmt.constant_arguments() {
                self.constant.entry(constant.to_string()).or_default().insert(stmt.clone());
            }
        }
        self.type_idx
            .entry(stmt.type_ref().name.clone())
            .or_default()
            .insert(stmt.clone());
    }

    fn unindex(&mut self, stmt: &Arc<AstNode>) {
        if let Some((pred, _)) = stmt.as_predicate_application() {
            if let Some(set) = self.predicate.get_mut(pred) {
                set.remove(stmt);
                if set.is_empty() {
                    self.predicate.remove(pred);
                }
            }
            for constant in stmt.constant_arguments() {
                if let Some(set) = self.constant.get_mut(constant) {
                    set.remove(stmt);
                    if set.is_empty() {
                        self.constant.remove(constant);
                    }
                }
            }
        }
        let type_name = stmt.type_ref().name.clone();
        if let Some(set) = self.type_idx.get_mut(&type_name) {
            set.remove(stmt);
            if set.is_empty() {
                self.type_idx.remove(&type_name);
            }
        }
    }
}

#[derive(Clone)]
struct Snapshot {
    contexts: HashMap<String, Context>,
    statements: HashMap<String, StatementSet>,
    indices: HashMap<String, ContextIndices>,
}

struct Inner {
    contexts: HashMap<String, Context>,
    statements: HashMap<String, StatementSet>,
    indices: HashMap<String, ContextIndices>,
    transaction_snapshot: Option<Snapshot>,
}

/// Owns the primary sets, indices, context forest, and transaction state for
/// one backend instance.
pub struct KnowledgeState {
    inner: Mutex<Inner>,
    unifier: Arc<dyn UnificationEngine>,
}

impl KnowledgeState {
    pub fn new(unifier: Arc<dyn UnificationEngine>) -> Self {
        KnowledgeState {
            inner: Mutex::new(Inner {
                contexts: HashMap::new(),
                statements: HashMap::new(),
                indices: HashMap::new(),
                transaction_snapshot: None,
            }),
            unifier,
        }
    }

    pub fn in_transaction(&self) -> bool {
        self.inner.lock().transaction_snapshot.is_some()
    }

    pub fn create_context(&self, id: &str, parent: Option<&str>, kind: &str) -> SkicResult<()> {
        let mut inner = self.inner.lock();
        if inner.contexts.contains_key(id) {
            return Err(SkicError::ContextExists(id.to_string()));
        }
        if let Some(p) = parent {
            if !inner.contexts.contains_key(p) {
                return Err(SkicError::UnknownContext(p.to_string()));
            }
        }
        inner.contexts.insert(
            id.to_string(),
            Context {
                id: id.to_string(),
                parent: parent.map(str::to_string),
                kind: kind.to_string(),
                created_at: chrono::Utc::now(),
            },
        );
        inner.statements.insert(id.to_string(), HashSet::new());
        inner.indices.insert(id.to_string(), ContextIndices::default());
        Ok(())
    }

    pub fn delete_context(&self, id: &str) -> SkicResult<()> {
        let mut inner = self.inner.lock();
        if !inner.contexts.contains_key(id) {
            return Err(SkicError::UnknownContext(id.to_string()));
        }
        let has_children = inner.contexts.values().any(|c| c.parent.as_deref() == Some(id));
        if has_children {
            return Err(SkicError::ContextHasChildren(id.to_string()));
        }
        inner.contexts.remove(id);
        inner.statements.remove(id);
        inner.indices.remove(id);
        Ok(())
    }

    pub fn list_contexts(&self) -> Vec<String> {
        let inner = self.inner.lock();
        let mut ids: Vec<String> = inner.contexts.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn contexts_snapshot(&self) -> Vec<Context> {
        self.inner.lock().contexts.values().cloned().collect()
    }

    pub fn add_statement(
        &self,
        stmt: AstNode,
        context_id: &str,
        metadata: Option<crate::ast::Metadata>,
    ) -> SkicResult<bool> {
        let mut inner = self.inner.lock();
        if !inner.contexts.contains_key(context_id) {
            return Err(SkicError::UnknownContext(context_id.to_string()));
        }
        let merged = match metadata {
            Some(m) => stmt.with_metadata(m),
            None => stmt,
        };
        let arc_stmt = Arc::new(merged);
        let set = inner.statements.entry(context_id.to_string()).or_default();
        if set.contains(&arc_stmt) {
            return Ok(false);
        }
        set.insert(arc_stmt.clone());
        inner
            .indices
            .entry(context_id.to_string())
            .or_default()
            .index(&arc_stmt);
        Ok(true)
    }

    /// Inserts a pre-built `Arc<AstNode>` directly, bypassing duplicate
    /// detection. Used when restoring from a persisted snapshot where
    /// duplicates cannot occur by construction.
    pub fn restore_statement(&self, context_id: &str, stmt: Arc<AstNode>) {
        let mut inner = self.inner.lock();
        inner
            .statements
            .entry(context_id.to_string())
            .or_default()
            .insert(stmt.clone());
        inner
            .indices
            .entry(context_id.to_string())
            .or_default()
            .index(&stmt);
    }

    pub fn retract_statement(&self, pattern: &AstNode, context_id: &str) -> SkicResult<bool> {
        let mut inner = self.inner.lock();
        if !inner.contexts.contains_key(context_id) {
            return Err(SkicError::UnknownContext(context_id.to_string()));
        }
        let candidates = Self::candidate_set(&inner, context_id, pattern);
        let mut to_remove = Vec::new();
        for candidate in &candidates {
            if self.unifier.unify(pattern, candidate).bindings.is_some() {
                to_remove.push(candidate.clone());
            }
        }
        if to_remove.is_empty() {
            return Ok(false);
        }
        let set = inner.statements.get_mut(context_id).expect("context present");
        let idx = inner.indices.get_mut(context_id).expect("context present");
        for stmt in &to_remove {
            set.remove(stmt);
            idx.unindex(stmt);
        }
        Ok(true)
    }

    /// Candidate-set selection (§4.1 precedence rule): predicate index if the
    /// pattern is a predicate application; else the type index by root type;
    /// else the full context set.
    fn candidate_set(inner: &Inner, context_id: &str, pattern: &AstNode) -> Vec<Arc<AstNode>> {
        let Some(idx) = inner.indices.get(context_id) else {
            return Vec::new();
        };
        if let Some((pred, _)) = pattern.as_predicate_application() {
            if let Some(set) = idx.predicate.get(pred) {
                return set.iter().cloned().collect();
            }
            return Vec::new();
        }
        let type_name = &pattern.type_ref().name;
        if let Some(set) = idx.type_idx.get(type_name) {
            return set.iter().cloned().collect();
        }
        inner
            .statements
            .get(context_id)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn restrict(bindings: Bindings, bind_vars: Option<&[u64]>) -> Bindings {
        match bind_vars {
            Some(ids) => bindings
                .into_iter()
                .filter(|(id, _)| ids.contains(id))
                .collect(),
            None => bindings,
        }
    }

    pub fn query_match(
        &self,
        pattern: &AstNode,
        context_ids: &[String],
        bind_vars: Option<&[u64]>,
    ) -> SkicResult<Vec<Bindings>> {
        let inner = self.inner.lock();
        let mut results = Vec::new();
        for context_id in context_ids {
            if !inner.contexts.contains_key(context_id) {
                return Err(SkicError::UnknownContext(context_id.clone()));
            }
            for candidate in Self::candidate_set(&inner, context_id, pattern) {
                let outcome = self.unifier.unify(pattern, &candidate);
                if let Some(bindings) = outcome.bindings {
                    results.push(Self::restrict(bindings, bind_vars));
                }
            }
        }
        Ok(results)
    }

    pub fn statement_exists(&self, stmt: &AstNode, context_ids: &[String]) -> SkicResult<bool> {
        let inner = self.inner.lock();
        for context_id in context_ids {
            if !inner.contexts.contains_key(context_id) {
                return Err(SkicError::UnknownContext(context_id.clone()));
            }
            for candidate in Self::candidate_set(&inner, context_id, stmt) {
                if self.unifier.unify(stmt, &candidate).bindings.is_some() {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    pub fn enumerate_statements(&self, context_id: &str) -> SkicResult<Vec<Arc<AstNode>>> {
        let inner = self.inner.lock();
        inner
            .statements
            .get(context_id)
            .map(|set| set.iter().cloned().collect())
            .ok_or_else(|| SkicError::UnknownContext(context_id.to_string()))
    }

    pub fn begin_transaction(&self) -> SkicResult<()> {
        let mut inner = self.inner.lock();
        if inner.transaction_snapshot.is_some() {
            return Err(SkicError::TransactionInProgress);
        }
        inner.transaction_snapshot = Some(Snapshot {
            contexts: inner.contexts.clone(),
            statements: inner.statements.clone(),
            indices: inner.indices.clone(),
        });
        Ok(())
    }

    pub fn commit_transaction(&self) -> SkicResult<()> {
        let mut inner = self.inner.lock();
        if inner.transaction_snapshot.take().is_none() {
            return Err(SkicError::NoTransaction);
        }
        Ok(())
    }

    pub fn rollback_transaction(&self) -> SkicResult<()> {
        let mut inner = self.inner.lock();
        let Some(snapshot) = inner.transaction_snapshot.take() else {
            return Err(SkicError::NoTransaction);
        };
        inner.contexts = snapshot.contexts;
        inner.statements = snapshot.statements;
        inner.indices = snapshot.indices;
        Ok(())
    }

    /// Clears all contexts, statements, indices and any open transaction.
    /// Used by backends that need to force a full reload from durable
    /// storage (e.g. the relational backend's explicit `load`).
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.contexts.clear();
        inner.statements.clear();
        inner.indices.clear();
        inner.transaction_snapshot = None;
    }

    /// All statements across all contexts, for full persistence dumps.
    pub fn all_statements(&self) -> HashMap<String, Vec<Arc<AstNode>>> {
        let inner = self.inner.lock();
        inner
            .statements
            .iter()
            .map(|(ctx, set)| (ctx.clone(), set.iter().cloned().collect()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::builders::{binary_application, ConstantBuilder, VariableBuilder};
    use crate::unify::SimpleUnifier;

    fn state() -> KnowledgeState {
        KnowledgeState::new(Arc::new(SimpleUnifier::new()))
    }

    fn is_a(who: &str, what: &str) -> AstNode {
        binary_application(
            "is_a",
            "Relation",
            ConstantBuilder::new(who, "Entity").build(),
            ConstantBuilder::new(what, "Entity").build(),
        )
    }

    #[test]
    fn duplicate_add_returns_false_and_skips_indices() {
        let s = state();
        s.create_context("T", None, "default").unwrap();
        assert!(s.add_statement(is_a("John", "Person"), "T", None).unwrap());
        assert!(!s.add_statement(is_a("John", "Person"), "T", None).unwrap());
    }

    #[test]
    fn delete_context_with_children_fails() {
        let s = state();
        s.create_context("T", None, "default").unwrap();
        s.create_context("U", Some("T"), "default").unwrap();
        assert!(matches!(s.delete_context("T"), Err(SkicError::ContextHasChildren(_))));
    }

    #[test]
    fn transaction_rollback_restores_state() {
        let s = state();
        s.create_context("T", None, "default").unwrap();
        s.add_statement(is_a("John", "Person"), "T", None).unwrap();
        s.begin_transaction().unwrap();
        let pattern = binary_application(
            "is_a",
            "Relation",
            VariableBuilder::new("X", 1, "Entity").build(),
            ConstantBuilder::new("Person", "Entity").build(),
        );
        s.retract_statement(&pattern, "T").unwrap();
        assert_eq!(
            s.query_match(&pattern, &["T".to_string()], None).unwrap().len(),
            0
        );
        s.rollback_transaction().unwrap();
        assert_eq!(
            s.query_match(&pattern, &["T".to_string()], None).unwrap().len(),
            1
        );
    }
}
