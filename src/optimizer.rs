//! Query Optimiser (§4.3): builds a `QueryPlan` from a pattern and executes
//! it through the router, recording feedback into `QueryStatistics`.

use crate::ast::AstNode;
use crate::router::Router;
use crate::statistics::QueryStatistics;
use crate::unify::Bindings;
use crate::error::SkicResult;
use sha2::{Digest, Sha256};
use std::time::{Duration, Instant};

/// An optimised, cost-annotated query plan. Immutable after construction.
#[derive(Debug, Clone)]
pub struct QueryPlan {
    pub original_pattern: AstNode,
    pub optimised_pattern: AstNode,
    pub context_ids: Vec<String>,
    pub vars_to_bind: Option<Vec<u64>>,
    pub estimated_cost: f64,
    pub hash: String,
}

fn plan_hash(pattern: &AstNode, context_ids: &[String], bind_vars: Option<&[u64]>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(pattern.structural_string().as_bytes());
    for ctx in context_ids {
        hasher.update(ctx.as_bytes());
    }
    if let Some(vars) = bind_vars {
        for v in vars {
            hasher.update(v.to_le_bytes());
        }
    }
    format!("{:x}", hasher.finalize())
}

/// Flattens a top-level conjunction into its conjuncts, or returns a single
/// conjunct for any other node shape.
fn conjuncts(pattern: &AstNode) -> Vec<AstNode> {
    match pattern {
        AstNode::Connective { kind: crate::ast::ConnectiveKind::And, operands, .. } => {
            operands.clone()
        }
        _ => vec![pattern.clone()],
    }
}

fn rebuild_conjunction(original: &AstNode, conjuncts: Vec<AstNode>) -> AstNode {
    match original {
        AstNode::Connective { kind, type_ref, metadata, .. } if conjuncts.len() > 1 => {
            AstNode::Connective {
                kind: *kind,
                operands: conjuncts,
                type_ref: type_ref.clone(),
                metadata: metadata.clone(),
            }
        }
        _ => conjuncts.into_iter().next().unwrap_or_else(|| original.clone()),
    }
}

/// Reorders conjuncts of a top-level AND by ascending selectivity (most
/// selective first). A total function: any panic-free failure just returns
/// the pattern unchanged (§4.3).
fn reorder_conjunctions(pattern: &AstNode, stats: &QueryStatistics) -> AstNode {
    let mut parts = conjuncts(pattern);
    if parts.len() < 2 {
        return pattern.clone();
    }
    parts.sort_by(|a, b| {
        stats
            .selectivity_of(a)
            .partial_cmp(&stats.selectivity_of(b))
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    rebuild_conjunction(pattern, parts)
}

/// Within an Application whose operator carries `metadata["commutative"] ==
/// true`, moves Constant arguments ahead of Variable arguments. No-op
/// otherwise (§4.3).
fn push_constants_forward(pattern: &AstNode) -> AstNode {
    match pattern {
        AstNode::Application { operator, arguments, type_ref, metadata } => {
            let commutative = operator
                .metadata()
                .get("commutative")
                .and_then(|v| v.as_bool())
                .unwrap_or(false);
            if !commutative {
                return pattern.clone();
            }
            let mut args = arguments.clone();
            args.sort_by_key(|a| !matches!(a, AstNode::Constant { .. }));
            AstNode::Application {
                operator: operator.clone(),
                arguments: args,
                type_ref: type_ref.clone(),
                metadata: metadata.clone(),
            }
        }
        _ => pattern.clone(),
    }
}

/// Reorders conjuncts so the variable appearing in the most conjuncts is
/// bound by the earliest conjunct (§4.3).
fn variable_binding_optimisation(pattern: &AstNode) -> AstNode {
    let mut parts = conjuncts(pattern);
    if parts.len() < 2 {
        return pattern.clone();
    }
    let mut frequency: std::collections::HashMap<u64, usize> = std::collections::HashMap::new();
    for part in &parts {
        let unique_ids: std::collections::HashSet<u64> = part.variable_ids().into_iter().collect();
        for id in unique_ids {
            *frequency.entry(id).or_insert(0) += 1;
        }
    }
    let score = |node: &AstNode| -> usize {
        node.variable_ids()
            .into_iter()
            .map(|id| frequency.get(&id).copied().unwrap_or(0))
            .max()
            .unwrap_or(0)
    };
    parts.sort_by_key(|p| std::cmp::Reverse(score(p)));
    rebuild_conjunction(pattern, parts)
}

/// Produces and executes query plans against a router, recording timing
/// feedback into the shared statistics.
pub struct QueryOptimiser;

impl QueryOptimiser {
    /// Builds a `QueryPlan`, refreshing statistics first if stale or `force`.
    pub fn optimise(
        router: &Router,
        stats: &QueryStatistics,
        pattern: &AstNode,
        context_ids: &[String],
        bind_vars: Option<&[u64]>,
        force: bool,
    ) -> SkicResult<QueryPlan> {
        if stats.needs_refresh(force) {
            let refreshed = stats.refresh(context_ids, |ctx| router.enumerate_statements(ctx));
            if let Err(err) = refreshed {
                tracing::warn!(error = %err, "statistics refresh failed, proceeding with stale stats");
            }
        }

        let hash = plan_hash(pattern, context_ids, bind_vars);
        let mut optimised = pattern.clone();
        optimised = reorder_conjunctions(&optimised, stats);
        optimised = push_constants_forward(&optimised);
        optimised = variable_binding_optimisation(&optimised);

        let estimated_cost = match stats.average_query_time(&hash) {
            Some(d) => d.as_secs_f64(),
            None => context_ids.len() as f64 * optimised.complexity(),
        };

        Ok(QueryPlan {
            original_pattern: pattern.clone(),
            optimised_pattern: optimised,
            context_ids: context_ids.to_vec(),
            vars_to_bind: bind_vars.map(|v| v.to_vec()),
            estimated_cost,
            hash,
        })
    }

    /// Executes `plan` via the router, timing the call and recording it into
    /// `stats` (§4.3).
    pub fn execute(
        router: &Router,
        stats: &QueryStatistics,
        plan: &QueryPlan,
    ) -> SkicResult<Vec<Bindings>> {
        let started = Instant::now();
        let result = router.query_match(
            &plan.optimised_pattern,
            &plan.context_ids,
            plan.vars_to_bind.as_deref(),
        );
        stats.record_query_time(&plan.hash, started.elapsed());
        result
    }
}
