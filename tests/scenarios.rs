//! End-to-end scenarios S1-S6 (spec §8), exercised against the public API.

use skic::ast::builders::{binary_application, ConstantBuilder, VariableBuilder};
use skic::ast::AstNode;
use skic::backend::{Backend, FileBackend, MemoryBackend, SqliteBackend};
use skic::cache::{Cache, EvictionPolicy};
use skic::config::{ScalabilityConfig, StorageBackendType};
use skic::inference::{DispatchStrategy, InferenceManager, Priority};
use skic::manager::ScalabilityManager;
use skic::prover::LookupProver;
use skic::router::Router;
use skic::unify::SimpleUnifier;
use std::sync::Arc;

fn is_a(who: AstNode, what: AstNode) -> AstNode {
    binary_application("is_a", "Relation", who, what)
}

#[test]
fn s1_add_and_query_single_context() {
    let backend = MemoryBackend::new(Arc::new(SimpleUnifier::new()));
    backend.create_context("T", None, "default").unwrap();
    backend
        .add_statement(
            is_a(ConstantBuilder::new("John", "Entity").build(), ConstantBuilder::new("Person", "Entity").build()),
            "T",
            None,
        )
        .unwrap();
    backend
        .add_statement(
            is_a(ConstantBuilder::new("Mary", "Entity").build(), ConstantBuilder::new("Person", "Entity").build()),
            "T",
            None,
        )
        .unwrap();

    let pattern = is_a(VariableBuilder::new("X", 1, "Entity").build(), ConstantBuilder::new("Person", "Entity").build());
    let results = backend.query_match(&pattern, &["T".to_string()], Some(&[1])).unwrap();
    assert_eq!(results.len(), 2);
    let names: std::collections::HashSet<String> =
        results.iter().map(|b| b[&1].structural_string()).collect();
    assert!(names.contains("John:Entity"));
    assert!(names.contains("Mary:Entity"));
}

#[test]
fn s2_context_routing_through_router() {
    let unifier = Arc::new(SimpleUnifier::new());
    let b1: Arc<dyn Backend> = Arc::new(MemoryBackend::new(unifier.clone()));
    let b2: Arc<dyn Backend> = Arc::new(MemoryBackend::new(unifier));
    let mut router = Router::new(b1.clone());
    router.register_backend("b1", b1);
    router.register_backend("b2", b2);

    router.create_context("T", None, "default", Some("b1")).unwrap();
    router.create_context("U", Some("T"), "default", Some("b2")).unwrap();
    router
        .add_statement(
            is_a(ConstantBuilder::new("Toyota", "Entity").build(), ConstantBuilder::new("Car", "Entity").build()),
            "U",
            None,
        )
        .unwrap();

    let pattern = is_a(VariableBuilder::new("X", 1, "Entity").build(), ConstantBuilder::new("Car", "Entity").build());
    let results = router.query_match(&pattern, &["T".to_string(), "U".to_string()], Some(&[1])).unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(router.list_contexts(), vec!["T".to_string(), "U".to_string()]);
}

#[test]
fn s3_transaction_rollback_restores_state() {
    let backend = MemoryBackend::new(Arc::new(SimpleUnifier::new()));
    backend.create_context("T", None, "default").unwrap();
    backend
        .add_statement(
            is_a(ConstantBuilder::new("John", "Entity").build(), ConstantBuilder::new("Person", "Entity").build()),
            "T",
            None,
        )
        .unwrap();

    backend.begin_transaction().unwrap();
    let pattern = is_a(VariableBuilder::new("X", 1, "Entity").build(), ConstantBuilder::new("Person", "Entity").build());
    backend.retract_statement(&pattern, "T").unwrap();
    assert_eq!(backend.query_match(&pattern, &["T".to_string()], Some(&[1])).unwrap().len(), 0);

    backend.rollback_transaction().unwrap();
    let results = backend.query_match(&pattern, &["T".to_string()], Some(&[1])).unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0][&1].structural_string(), "John:Entity");
}

#[test]
fn s4_cache_invalidation_on_mutation() {
    let prover = Arc::new(LookupProver::new(|_: &AstNode, _: &[String]| true));
    let manager = ScalabilityManager::new(ScalabilityConfig::default(), prover).unwrap();
    manager.create_context("T", None, "default", None).unwrap();
    manager
        .add_statement(
            is_a(ConstantBuilder::new("John", "Entity").build(), ConstantBuilder::new("Person", "Entity").build()),
            "T",
            None,
        )
        .unwrap();

    let pattern = is_a(VariableBuilder::new("X", 1, "Entity").build(), ConstantBuilder::new("Person", "Entity").build());
    let q1 = manager.query_statements_match_pattern(&pattern, &["T".to_string()], Some(&[1])).unwrap();
    assert_eq!(q1.len(), 1);

    manager
        .add_statement(
            is_a(ConstantBuilder::new("Mary", "Entity").build(), ConstantBuilder::new("Person", "Entity").build()),
            "T",
            None,
        )
        .unwrap();
    let q2 = manager.query_statements_match_pattern(&pattern, &["T".to_string()], Some(&[1])).unwrap();
    assert_eq!(q2.len(), 2);
}

#[test]
fn s5_priority_dispatch_invocation_order() {
    let invocation_order: Arc<parking_lot::Mutex<Vec<String>>> = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let order = invocation_order.clone();
    let prover = Arc::new(LookupProver::new(move |query: &AstNode, _ctx: &[String]| {
        if let AstNode::Constant { name, .. } = query {
            order.lock().push(name.clone());
        }
        true
    }));
    let manager = InferenceManager::new(1, prover);
    let ctx = vec!["T".to_string()];
    let a = manager.submit(ConstantBuilder::new("a", "Bool").build(), ctx.clone(), Priority::Low, None).unwrap();
    let b = manager.submit(ConstantBuilder::new("b", "Bool").build(), ctx.clone(), Priority::High, None).unwrap();
    let c = manager.submit(ConstantBuilder::new("c", "Bool").build(), ctx, Priority::Medium, None).unwrap();
    manager.process(3, DispatchStrategy::PriorityBased);
    manager.get_result(a, true);
    manager.get_result(b, true);
    manager.get_result(c, true);
    assert_eq!(*invocation_order.lock(), vec!["b", "c", "a"]);
}

#[test]
fn s6_lru_eviction() {
    let cache: Cache<String, u32> = Cache::new(2, EvictionPolicy::Lru, None);
    cache.put("k1".to_string(), 1);
    cache.put("k2".to_string(), 2);
    cache.get(&"k1".to_string());
    cache.put("k3".to_string(), 3);
    assert_eq!(cache.get(&"k2".to_string()), None);
    assert_eq!(cache.get(&"k1".to_string()), Some(1));
    assert_eq!(cache.get(&"k3".to_string()), Some(3));
}

#[test]
fn file_backend_persists_and_reloads_across_instances() {
    let dir = tempfile::tempdir().unwrap();
    let unifier = Arc::new(SimpleUnifier::new());
    {
        let backend = FileBackend::new(unifier.clone(), dir.path(), true).unwrap();
        backend.create_context("T", None, "default").unwrap();
        backend
            .add_statement(
                is_a(ConstantBuilder::new("John", "Entity").build(), ConstantBuilder::new("Person", "Entity").build()),
                "T",
                None,
            )
            .unwrap();
    }

    let reloaded = FileBackend::new(unifier, dir.path(), true).unwrap();
    let pattern = is_a(VariableBuilder::new("X", 1, "Entity").build(), ConstantBuilder::new("Person", "Entity").build());
    let results = reloaded.query_match(&pattern, &["T".to_string()], Some(&[1])).unwrap();
    assert_eq!(results.len(), 1);
}

#[test]
fn sqlite_backend_persists_and_reloads_across_instances() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("skic.db");
    let unifier = Arc::new(SimpleUnifier::new());
    {
        let backend = SqliteBackend::new(unifier.clone(), db_path.clone()).unwrap();
        backend.create_context("T", None, "default").unwrap();
        backend
            .add_statement(
                is_a(ConstantBuilder::new("John", "Entity").build(), ConstantBuilder::new("Person", "Entity").build()),
                "T",
                None,
            )
            .unwrap();
        backend.persist().unwrap();
    }

    let reloaded = SqliteBackend::new(unifier, db_path).unwrap();
    let pattern = is_a(VariableBuilder::new("X", 1, "Entity").build(), ConstantBuilder::new("Person", "Entity").build());
    let results = reloaded.query_match(&pattern, &["T".to_string()], Some(&[1])).unwrap();
    assert_eq!(results.len(), 1);
}

#[test]
fn manager_with_file_backed_storage_creates_directory() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = ScalabilityConfig::default();
    config.storage.backend_type = StorageBackendType::FileBased;
    config.storage.storage_dir = dir.path().join("kb");
    config.storage.auto_persist = true;
    let prover = Arc::new(LookupProver::new(|_: &AstNode, _: &[String]| true));
    let manager = ScalabilityManager::new(config, prover).unwrap();
    manager.create_context("T", None, "default", None).unwrap();
    assert_eq!(manager.list_contexts(), vec!["T".to_string()]);
}
