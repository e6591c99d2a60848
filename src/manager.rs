//! `ScalabilityManager` façade (§4.7): wires up a backend, router, cache,
//! optimiser, rule compiler, and inference manager behind a single public
//! API, owning their lifecycle end to end.

use crate::ast::{AstNode, Metadata};
use crate::backend::{Backend, FileBackend, MemoryBackend, SqliteBackend};
use crate::cache::{Cache, EvictionPolicy};
use crate::config::{CacheEvictionPolicy, InferenceDispatchStrategy, ScalabilityConfig, StorageBackendType};
use crate::error::{SkicError, SkicResult};
use crate::inference::{DispatchStrategy, InferenceManager, Priority, TaskResult, TaskStatus};
use crate::optimizer::{QueryOptimiser, QueryPlan};
use crate::prover::Prover;
use crate::router::Router;
use crate::rules::RuleCompiler;
use crate::statistics::QueryStatistics;
use crate::unify::{Bindings, SimpleUnifier, UnificationEngine};
use std::sync::Arc;
use std::time::Duration;

fn eviction_policy_from_config(policy: CacheEvictionPolicy) -> EvictionPolicy {
    match policy {
        CacheEvictionPolicy::Lru => EvictionPolicy::Lru,
        CacheEvictionPolicy::Lfu => EvictionPolicy::Lfu,
        CacheEvictionPolicy::Fifo => EvictionPolicy::Fifo,
        CacheEvictionPolicy::Ttl => EvictionPolicy::Ttl,
    }
}

fn dispatch_strategy_from_config(strategy: InferenceDispatchStrategy) -> DispatchStrategy {
    match strategy {
        InferenceDispatchStrategy::RoundRobin => DispatchStrategy::RoundRobin,
        InferenceDispatchStrategy::Priority => DispatchStrategy::PriorityBased,
        InferenceDispatchStrategy::WorkStealing => DispatchStrategy::WorkStealing,
    }
}

fn build_default_backend(config: &ScalabilityConfig, unifier: Arc<dyn UnificationEngine>) -> SkicResult<Arc<dyn Backend>> {
    let backend: Arc<dyn Backend> = match config.storage.backend_type {
        StorageBackendType::InMemory => Arc::new(MemoryBackend::new(unifier)),
        StorageBackendType::FileBased => Arc::new(FileBackend::new(
            unifier,
            config.storage.storage_dir.clone(),
            config.storage.auto_persist,
        )?),
        StorageBackendType::Sqlite => {
            Arc::new(SqliteBackend::new(unifier, config.storage.db_path.clone())?)
        }
    };
    Ok(backend)
}

/// Constructs the full component graph (cache → backend → router →
/// optimiser → rule compiler → inference manager) and exposes a single
/// façade over it, matching the lifecycle ordering in §4.7.
pub struct ScalabilityManager {
    config: ScalabilityConfig,
    router: Router,
    stats: QueryStatistics,
    query_cache: Cache<String, Vec<Bindings>>,
    rule_compiler: RuleCompiler,
    inference: InferenceManager,
}

impl ScalabilityManager {
    pub fn new(config: ScalabilityConfig, prover: Arc<dyn Prover>) -> SkicResult<Self> {
        let unifier: Arc<dyn UnificationEngine> = Arc::new(SimpleUnifier::new());
        let query_cache = Cache::new(
            config.cache.max_cache_size,
            eviction_policy_from_config(config.cache.cache_eviction_policy),
            if config.cache.cache_ttl_secs > 0 {
                Some(Duration::from_secs(config.cache.cache_ttl_secs))
            } else {
                None
            },
        );
        let default_backend = build_default_backend(&config, unifier)?;
        let router = Router::new(default_backend);
        let stats = QueryStatistics::new(Duration::from_secs(60));
        let rule_compiler = RuleCompiler::new();
        let inference = InferenceManager::new(config.inference.max_inference_workers, prover);

        Ok(ScalabilityManager { config, router, stats, query_cache, rule_compiler, inference })
    }

    #[tracing::instrument(skip(self, stmt))]
    pub fn add_statement(
        &self,
        stmt: AstNode,
        context_id: &str,
        metadata: Option<Metadata>,
    ) -> SkicResult<bool> {
        let inserted = self.router.add_statement(stmt, context_id, metadata)?;
        if inserted {
            self.clear_caches();
        }
        Ok(inserted)
    }

    #[tracing::instrument(skip(self, pattern))]
    pub fn retract_statement(&self, pattern: &AstNode, context_id: &str) -> SkicResult<bool> {
        let retracted = self.router.retract_statement(pattern, context_id)?;
        if retracted {
            self.clear_caches();
        }
        Ok(retracted)
    }

    pub fn statement_exists(&self, stmt: &AstNode, context_ids: &[String]) -> SkicResult<bool> {
        self.router.statement_exists(stmt, context_ids)
    }

    /// Queries `pattern` across `context_ids`, routing through the optimiser
    /// when `enable_query_optimisation` is set, falling straight through the
    /// router otherwise (§4.7).
    #[tracing::instrument(skip(self, pattern))]
    pub fn query_statements_match_pattern(
        &self,
        pattern: &AstNode,
        context_ids: &[String],
        bind_vars: Option<&[u64]>,
    ) -> SkicResult<Vec<Bindings>> {
        if !self.config.optimisation.enable_query_optimisation {
            return self.router.query_match(pattern, context_ids, bind_vars);
        }

        let plan = self.plan_query(pattern, context_ids, bind_vars)?;
        if let Some(cached) = self.query_cache.get(&plan.hash) {
            return Ok(cached);
        }
        let results = QueryOptimiser::execute(&self.router, &self.stats, &plan)?;
        self.query_cache.put(plan.hash.clone(), results.clone());
        Ok(results)
    }

    fn plan_query(
        &self,
        pattern: &AstNode,
        context_ids: &[String],
        bind_vars: Option<&[u64]>,
    ) -> SkicResult<QueryPlan> {
        QueryOptimiser::optimise(&self.router, &self.stats, pattern, context_ids, bind_vars, false)
    }

    pub fn create_context(
        &self,
        id: &str,
        parent: Option<&str>,
        kind: &str,
        backend_name: Option<&str>,
    ) -> SkicResult<()> {
        self.router.create_context(id, parent, kind, backend_name)
    }

    pub fn delete_context(&self, id: &str) -> SkicResult<()> {
        self.router.delete_context(id)
    }

    pub fn list_contexts(&self) -> Vec<String> {
        self.router.list_contexts()
    }

    #[tracing::instrument(skip(self, ast))]
    pub fn compile_rule(&self, ast: AstNode, id: Option<String>) -> SkicResult<String> {
        if !self.config.optimisation.enable_rule_compilation {
            return Err(SkicError::Disabled("rule compilation is disabled".to_string()));
        }
        Ok(self.rule_compiler.compile_rule(ast, id))
    }

    pub fn execute_rule(&self, rule_id: &str, context_ids: &[String]) -> SkicResult<Vec<Bindings>> {
        if !self.config.optimisation.enable_rule_compilation {
            return Err(SkicError::Disabled("rule compilation is disabled".to_string()));
        }
        self.rule_compiler.execute_rule(rule_id, &self.router, &self.stats, context_ids)
    }

    #[tracing::instrument(skip(self, query))]
    pub fn submit_inference_task(
        &self,
        query: AstNode,
        context_ids: Vec<String>,
        priority: Priority,
        timeout: Option<Duration>,
    ) -> SkicResult<u64> {
        self.inference.submit(query, context_ids, priority, timeout)
    }

    pub fn process_inference_tasks(&self, batch_size: usize) {
        let strategy = dispatch_strategy_from_config(self.config.inference.inference_strategy);
        self.inference.process(batch_size, strategy);
    }

    pub fn get_inference_task_result(&self, id: u64, wait: bool) -> Option<TaskResult> {
        self.inference.get_result(id, wait)
    }

    pub fn inference_task_status(&self, id: u64) -> TaskStatus {
        self.inference.status(id)
    }

    pub fn batch_prove(&self, queries: Vec<AstNode>, context_ids: Vec<String>) -> Vec<crate::prover::ProofObject> {
        let strategy = dispatch_strategy_from_config(self.config.inference.inference_strategy);
        self.inference.batch_prove(queries, context_ids, strategy)
    }

    /// Full cache clear, invoked on every successful mutation (§4.7/S4).
    pub fn clear_caches(&self) {
        self.query_cache.clear();
    }

    pub fn get_cache_statistics(&self) -> usize {
        self.query_cache.size()
    }

    /// Shuts down in reverse dependency order: drains/cancels in-flight
    /// inference tasks first, then persists every backend reachable through
    /// the router, so a task that mutates the KB mid-shutdown is either
    /// finished or cancelled before its backend's snapshot is taken.
    pub fn shutdown(&self, wait_for_inference: bool) -> Vec<SkicResult<bool>> {
        self.inference.shutdown(wait_for_inference);
        self.router.persist_all()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::builders::{binary_application, ConstantBuilder, VariableBuilder};
    use crate::prover::LookupProver;

    fn test_manager() -> ScalabilityManager {
        let prover = Arc::new(LookupProver::new(|_: &AstNode, _: &[String]| true));
        ScalabilityManager::new(ScalabilityConfig::default(), prover).unwrap()
    }

    #[test]
    fn s4_add_statement_invalidates_query_cache() {
        let manager = test_manager();
        manager.create_context("T", None, "default", None).unwrap();
        manager
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
        let pattern = binary_application(
            "is_a",
            "Relation",
            VariableBuilder::new("X", 1, "Entity").build(),
            ConstantBuilder::new("Person", "Entity").build(),
        );
        let first = manager
            .query_statements_match_pattern(&pattern, &["T".to_string()], Some(&[1]))
            .unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(manager.get_cache_statistics(), 1);

        manager
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
        assert_eq!(manager.get_cache_statistics(), 0);

        let second = manager
            .query_statements_match_pattern(&pattern, &["T".to_string()], Some(&[1]))
            .unwrap();
        assert_eq!(second.len(), 2);
    }

    #[test]
    fn disabled_rule_compilation_fails() {
        let mut config = ScalabilityConfig::default();
        config.optimisation.enable_rule_compilation = false;
        let prover = Arc::new(LookupProver::new(|_: &AstNode, _: &[String]| true));
        let manager = ScalabilityManager::new(config, prover).unwrap();
        let body = binary_application(
            "is_a",
            "Relation",
            VariableBuilder::new("X", 1, "Entity").build(),
            ConstantBuilder::new("Person", "Entity").build(),
        );
        assert!(matches!(manager.compile_rule(body, None), Err(SkicError::Disabled(_))));
    }
}
