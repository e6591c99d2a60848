//! `UnificationEngine` collaborator contract (§6) and a reference
//! implementation used by the crate's own test suite and by deployments that
//! have no richer engine to plug in.

use crate::ast::AstNode;
use std::collections::HashMap;

/// Bindings produced by a successful unification: variable id → bound node.
pub type Bindings = HashMap<u64, AstNode>;

/// Outcome of a unification attempt. `bindings = Some(empty map)` denotes a
/// vacuous success (pattern and statement unify with no variables bound).
pub struct UnifyOutcome {
    pub bindings: Option<Bindings>,
    pub errors: Vec<String>,
}

impl UnifyOutcome {
    fn success(bindings: Bindings) -> Self {
        UnifyOutcome { bindings: Some(bindings), errors: Vec::new() }
    }

    fn failure() -> Self {
        UnifyOutcome { bindings: None, errors: Vec::new() }
    }
}

/// Capability consumed by the backend's `query_match`/`statement_exists` to
/// match a pattern against a candidate statement.
pub trait UnificationEngine: Send + Sync {
    fn unify(&self, pattern: &AstNode, stmt: &AstNode) -> UnifyOutcome;
}

/// Structural unifier: variables bind to whatever they first meet and must
/// agree with that binding on every later occurrence; constants must match
/// by name and type; compound nodes must match shape (operator/kind/arity)
/// and unify pairwise.
///
/// This is a reference implementation, not a theorem prover — SKIC treats
/// proof search itself as the opaque `Prover` capability (§1 non-goals).
#[derive(Default)]
pub struct SimpleUnifier;

impl SimpleUnifier {
    pub fn new() -> Self {
        SimpleUnifier
    }

    fn unify_into(&self, pattern: &AstNode, stmt: &AstNode, bindings: &mut Bindings) -> bool {
        match (pattern, stmt) {
            (AstNode::Variable { id, .. }, _) => {
                if let Some(existing) = bindings.get(id) {
                    return existing == stmt;
                }
                bindings.insert(*id, stmt.clone());
                true
            }
            (AstNode::Constant { name: pn, type_ref: pt, .. }, AstNode::Constant { name: sn, type_ref: st, .. }) => {
                pn == sn && pt == st
            }
            (
                AstNode::Application { operator: po, arguments: pa, .. },
                AstNode::Application { operator: so, arguments: sa, .. },
            ) => {
                pa.len() == sa.len()
                    && self.unify_into(po, so, bindings)
                    && pa.iter().zip(sa.iter()).all(|(p, s)| self.unify_into(p, s, bindings))
            }
            (
                AstNode::Connective { kind: pk, operands: po, .. },
                AstNode::Connective { kind: sk, operands: so, .. },
            ) => {
                pk == sk
                    && po.len() == so.len()
                    && po.iter().zip(so.iter()).all(|(p, s)| self.unify_into(p, s, bindings))
            }
            (
                AstNode::Quantifier { kind: pk, bound_vars: pb, body: pbody, .. },
                AstNode::Quantifier { kind: sk, bound_vars: sb, body: sbody, .. },
            ) => {
                pk == sk
                    && pb.len() == sb.len()
                    && pb.iter().zip(sb.iter()).all(|(p, s)| self.unify_into(p, s, bindings))
                    && self.unify_into(pbody, sbody, bindings)
            }
            _ => false,
        }
    }
}

impl UnificationEngine for SimpleUnifier {
    fn unify(&self, pattern: &AstNode, stmt: &AstNode) -> UnifyOutcome {
        let mut bindings = Bindings::new();
        if self.unify_into(pattern, stmt, &mut bindings) {
            UnifyOutcome::success(bindings)
        } else {
            UnifyOutcome::failure()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::builders::{binary_application, ConstantBuilder, VariableBuilder};

    #[test]
    fn unifies_variable_with_constant() {
        let unifier = SimpleUnifier::new();
        let x = VariableBuilder::new("X", 1, "Entity").build();
        let pattern = binary_application(
            "is_a",
            "Relation",
            x,
            ConstantBuilder::new("Person", "Entity").build(),
        );
        let stmt = binary_application(
            "is_a",
            "Relation",
            ConstantBuilder::new("John", "Entity").build(),
            ConstantBuilder::new("Person", "Entity").build(),
        );
        let outcome = unifier.unify(&pattern, &stmt);
        let bindings = outcome.bindings.expect("should unify");
        assert_eq!(bindings.len(), 1);
        assert_eq!(bindings[&1].structural_string(), "John:Entity");
    }

    #[test]
    fn fails_on_constant_mismatch() {
        let unifier = SimpleUnifier::new();
        let pattern = binary_application(
            "is_a",
            "Relation",
            ConstantBuilder::new("Mary", "Entity").build(),
            ConstantBuilder::new("Person", "Entity").build(),
        );
        let stmt = binary_application(
            "is_a",
            "Relation",
            ConstantBuilder::new("John", "Entity").build(),
            ConstantBuilder::new("Person", "Entity").build(),
        );
        let outcome = unifier.unify(&pattern, &stmt);
        assert!(outcome.bindings.is_none());
    }

    #[test]
    fn repeated_variable_must_agree() {
        let unifier = SimpleUnifier::new();
        let x1 = VariableBuilder::new("X", 1, "Entity").build();
        let x2 = VariableBuilder::new("X", 1, "Entity").build();
        let pattern = binary_application("related", "Relation", x1, x2);
        let stmt = binary_application(
            "related",
            "Relation",
            ConstantBuilder::new("John", "Entity").build(),
            ConstantBuilder::new("Mary", "Entity").build(),
        );
        let outcome = unifier.unify(&pattern, &stmt);
        assert!(outcome.bindings.is_none());
    }
}
