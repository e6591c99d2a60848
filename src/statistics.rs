//! Query statistics (§3, §4.3): predicate/constant/type counts and a
//! per-query-hash ring buffer of execution times, refreshed advisorily and
//! independent of backend locks (§5).

use crate::ast::AstNode;
use crate::error::SkicResult;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

const QUERY_TIMES_CAP: usize = 100;

struct Inner {
    predicate_counts: HashMap<String, u64>,
    constant_counts: HashMap<String, u64>,
    type_counts: HashMap<String, u64>,
    query_times: HashMap<String, VecDeque<Duration>>,
    last_updated: DateTime<Utc>,
}

/// Runtime statistics feeding the optimiser's cost model. Refresh holds its
/// own lock, separate from any backend lock, so a concurrent query proceeds
/// against stale statistics rather than blocking (§5).
pub struct QueryStatistics {
    inner: Mutex<Inner>,
    refresh_interval: Duration,
}

impl QueryStatistics {
    pub fn new(refresh_interval: Duration) -> Self {
        QueryStatistics {
            inner: Mutex::new(Inner {
                predicate_counts: HashMap::new(),
                constant_counts: HashMap::new(),
                type_counts: HashMap::new(),
                query_times: HashMap::new(),
                last_updated: DateTime::<Utc>::MIN_UTC,
            }),
            refresh_interval,
        }
    }

    pub fn needs_refresh(&self, force: bool) -> bool {
        force || Utc::now() - self.inner.lock().last_updated >= chrono::Duration::from_std(self.refresh_interval).unwrap_or(chrono::Duration::zero())
    }

    /// Scans every context once via `enumerate_statements` (§4.3, Open
    /// Question 2) and rebuilds the three count tables. `enumerate_statements`
    /// is passed as a closure rather than a `Backend` reference so callers
    /// routing across multiple backends (the router) can supply a
    /// fanned-out view without this module depending on routing at all.
    #[tracing::instrument(skip(self, enumerate_statements))]
    pub fn refresh(
        &self,
        context_ids: &[String],
        enumerate_statements: impl Fn(&str) -> SkicResult<Vec<Arc<AstNode>>>,
    ) -> SkicResult<()> {
        let mut predicate_counts = HashMap::new();
        let mut constant_counts = HashMap::new();
        let mut type_counts = HashMap::new();

        for context_id in context_ids {
            for stmt in enumerate_statements(context_id)? {
                if let Some((pred, _)) = stmt.as_predicate_application() {
                    *predicate_counts.entry(pred.to_string()).or_insert(0u64) += 1;
                    for constant in stmt.constant_arguments() {
                        *constant_counts.entry(constant.to_string()).or_insert(0u64) += 1;
                    }
                }
                *type_counts.entry(stmt.type_ref().name.clone()).or_insert(0u64) += 1;
            }
        }

        let mut inner = self.inner.lock();
        inner.predicate_counts = predicate_counts;
        inner.constant_counts = constant_counts;
        inner.type_counts = type_counts;
        inner.last_updated = Utc::now();
        Ok(())
    }

    /// Selectivity of a named predicate/constant/type: `count / total`, or
    /// `1.0` (least selective — matches everything) when unseen.
    pub fn selectivity_of_name(&self, name: &str) -> f64 {
        let inner = self.inner.lock();
        let total: u64 = inner.type_counts.values().sum();
        if total == 0 {
            return 1.0;
        }
        let count = inner
            .predicate_counts
            .get(name)
            .or_else(|| inner.constant_counts.get(name))
            .or_else(|| inner.type_counts.get(name))
            .copied()
            .unwrap_or(0);
        count as f64 / total as f64
    }

    /// Selectivity of a conjunct: product of its named predicates/constants/
    /// types' selectivities, with `1.0` contributed by each variable (§4.3).
    pub fn selectivity_of(&self, node: &AstNode) -> f64 {
        match node {
            AstNode::Variable { .. } => 1.0,
            AstNode::Constant { name, .. } => self.selectivity_of_name(name),
            AstNode::Application { operator, arguments, .. } => {
                let mut sel = self.selectivity_of(operator);
                for arg in arguments {
                    sel *= self.selectivity_of(arg);
                }
                sel
            }
            AstNode::Connective { operands, .. } => {
                operands.iter().map(|o| self.selectivity_of(o)).product()
            }
            AstNode::Quantifier { body, .. } => self.selectivity_of(body),
        }
    }

    pub fn record_query_time(&self, hash: &str, duration: Duration) {
        let mut inner = self.inner.lock();
        let buf = inner.query_times.entry(hash.to_string()).or_default();
        buf.push_back(duration);
        if buf.len() > QUERY_TIMES_CAP {
            buf.pop_front();
        }
    }

    pub fn average_query_time(&self, hash: &str) -> Option<Duration> {
        let inner = self.inner.lock();
        let buf = inner.query_times.get(hash)?;
        if buf.is_empty() {
            return None;
        }
        let total: Duration = buf.iter().sum();
        Some(total / buf.len() as u32)
    }
}
