//! Property tests for index consistency (P-IDX) and transaction round-trips
//! (P-TX), using randomly generated statement sets.

use proptest::prelude::*;
use skic::ast::builders::{binary_application, ConstantBuilder, VariableBuilder};
use skic::ast::AstNode;
use skic::backend::{Backend, MemoryBackend};
use skic::unify::SimpleUnifier;
use std::sync::Arc;

fn is_a(who: &str, what: &str) -> AstNode {
    binary_application(
        "is_a",
        "Relation",
        ConstantBuilder::new(who, "Entity").build(),
        ConstantBuilder::new(what, "Entity").build(),
    )
}

fn name_strategy() -> impl Strategy<Value = String> {
    "[A-Z][a-z]{2,8}"
}

proptest! {
    /// P-IDX: every added statement is retrievable by a pattern querying its
    /// own predicate/arguments, regardless of what else has been added.
    #[test]
    fn p_idx_every_added_statement_is_queryable(names in prop::collection::vec(name_strategy(), 1..12)) {
        let backend = MemoryBackend::new(Arc::new(SimpleUnifier::new()));
        backend.create_context("T", None, "default").unwrap();
        let mut unique = names.clone();
        unique.sort();
        unique.dedup();

        for name in &unique {
            backend.add_statement(is_a(name, "Person"), "T", None).unwrap();
        }

        for name in &unique {
            let pattern = binary_application(
                "is_a",
                "Relation",
                ConstantBuilder::new(name.as_str(), "Entity").build(),
                VariableBuilder::new("Y", 1, "Entity").build(),
            );
            let results = backend.query_match(&pattern, &["T".to_string()], Some(&[1])).unwrap();
            prop_assert_eq!(results.len(), 1);
            prop_assert_eq!(results[0][&1].structural_string(), "Person:Entity");
        }
    }

    /// P-TX: rollback after any sequence of retractions restores the exact
    /// pre-transaction query result set.
    #[test]
    fn p_tx_rollback_restores_pre_transaction_results(names in prop::collection::vec(name_strategy(), 1..8)) {
        let backend = MemoryBackend::new(Arc::new(SimpleUnifier::new()));
        backend.create_context("T", None, "default").unwrap();
        let mut unique = names.clone();
        unique.sort();
        unique.dedup();
        for name in &unique {
            backend.add_statement(is_a(name, "Person"), "T", None).unwrap();
        }

        let pattern = binary_application(
            "is_a",
            "Relation",
            VariableBuilder::new("X", 1, "Entity").build(),
            ConstantBuilder::new("Person", "Entity").build(),
        );
        let before = backend.query_match(&pattern, &["T".to_string()], Some(&[1])).unwrap().len();

        backend.begin_transaction().unwrap();
        for name in &unique {
            backend.retract_statement(&is_a(name, "Person"), "T").unwrap();
        }
        prop_assert_eq!(backend.query_match(&pattern, &["T".to_string()], Some(&[1])).unwrap().len(), 0);

        backend.rollback_transaction().unwrap();
        let after = backend.query_match(&pattern, &["T".to_string()], Some(&[1])).unwrap().len();
        prop_assert_eq!(before, after);
    }
}
