//! Rule Compiler & Index (§4.4, Open Question 1).

use crate::ast::{AstNode, ConnectiveKind};
use crate::error::{SkicError, SkicResult};
use crate::optimizer::QueryOptimiser;
use crate::router::Router;
use crate::statistics::QueryStatistics;
use crate::unify::Bindings;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

/// Rule shape classification (§4.4), determined structurally from the AST.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleShape {
    Simple,
    Conjunctive,
    Complex,
}

/// A literal extracted from a rule body: a maximal `Application`, or a
/// negated `Application`, appearing as a top-level conjunct after flattening
/// nested `AND`s (§4.4, Open Question 1 — SKIC's own definition).
#[derive(Debug, Clone)]
pub struct Literal {
    pub node: AstNode,
    pub negated: bool,
}

/// Classifies `body` per §4.4: `SIMPLE` is a single positive literal,
/// `CONJUNCTIVE` is a flat conjunction of literals, `COMPLEX` is anything
/// containing disjunction, a standalone negation at the top, or a
/// quantifier.
pub fn classify_shape(body: &AstNode) -> RuleShape {
    match body {
        AstNode::Application { .. } => RuleShape::Simple,
        AstNode::Connective { kind: ConnectiveKind::And, operands, .. } => {
            if operands.iter().all(is_literal_shaped) {
                RuleShape::Conjunctive
            } else {
                RuleShape::Complex
            }
        }
        _ => RuleShape::Complex,
    }
}

fn is_literal_shaped(node: &AstNode) -> bool {
    match node {
        AstNode::Application { .. } => true,
        AstNode::Connective { kind: ConnectiveKind::Not, operands, .. } => {
            operands.len() == 1 && matches!(operands[0], AstNode::Application { .. })
        }
        _ => false,
    }
}

/// Extracts the literals of a rule body: flattens nested top-level `AND`
/// nodes and treats each maximal `Application` or negated `Application` as
/// one literal. A body that is itself a single `Application` yields one
/// literal; anything else not decomposable this way yields no literals
/// (`COMPLEX` rules fall back to evaluating the whole body, see
/// [`CompiledForm::Complex`]).
pub fn extract_literals(body: &AstNode) -> Vec<Literal> {
    fn flatten(node: &AstNode, out: &mut Vec<AstNode>) {
        match node {
            AstNode::Connective { kind: ConnectiveKind::And, operands, .. } => {
                for o in operands {
                    flatten(o, out);
                }
            }
            other => out.push(other.clone()),
        }
    }
    let mut flat = Vec::new();
    flatten(body, &mut flat);
    flat.into_iter()
        .filter_map(|node| match node {
            AstNode::Application { .. } => Some(Literal { node, negated: false }),
            AstNode::Connective { kind: ConnectiveKind::Not, operands, .. } if operands.len() == 1 => {
                match operands.into_iter().next().unwrap() {
                    app @ AstNode::Application { .. } => Some(Literal { node: app, negated: true }),
                    _ => None,
                }
            }
            _ => None,
        })
        .collect()
}

/// The compiled, executable form chosen for a rule's shape (§4.4).
enum CompiledForm {
    Simple { literal: Literal },
    Conjunctive { literals: Vec<Literal> },
    /// Decomposed into SIMPLE/CONJUNCTIVE sub-rules at compile time; executed
    /// by evaluating each sub-body and concatenating, since negation/
    /// disjunction/quantification at the top is otherwise opaque to literal
    /// extraction.
    Complex { sub_bodies: Vec<AstNode> },
}

pub struct CompiledRule {
    pub id: String,
    pub original_ast: AstNode,
    pub shape: RuleShape,
    compiled_form: CompiledForm,
    pub last_matched_at: Option<DateTime<Utc>>,
    pub match_count: u64,
    pub total_execution_time: Duration,
}

impl CompiledRule {
    pub fn average_execution_time(&self) -> Duration {
        if self.match_count == 0 {
            Duration::ZERO
        } else {
            self.total_execution_time / self.match_count as u32
        }
    }
}

fn stable_rule_id(ast: &AstNode) -> String {
    let mut hasher = Sha256::new();
    hasher.update(ast.structural_string().as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Three name → set<rule_id> maps mirroring the statement indices, keyed
/// across rule conditions (§3).
#[derive(Default)]
struct RuleIndex {
    predicate: HashMap<String, HashSet<String>>,
    constant: HashMap<String, HashSet<String>>,
    type_idx: HashMap<String, HashSet<String>>,
}

impl RuleIndex {
    fn insert(&mut self, rule_id: &str, literals: &[Literal]) {
        for literal in literals {
            if let Some((pred, _)) = literal.node.as_predicate_application() {
                self.predicate.entry(pred.to_string()).or_default().insert(rule_id.to_string());
                for constant in literal.node.constant_arguments() {
                    self.constant.entry(constant.to_string()).or_default().insert(rule_id.to_string());
                }
            }
            self.type_idx
                .entry(literal.node.type_ref().name.clone())
                .or_default()
                .insert(rule_id.to_string());
        }
    }

    fn remove(&mut self, rule_id: &str) {
        for map in [&mut self.predicate, &mut self.constant, &mut self.type_idx] {
            map.retain(|_, set| {
                set.remove(rule_id);
                !set.is_empty()
            });
        }
    }
}

/// Owns the compiled-rule table and its index behind a single reader/writer
/// lock (§5: "RuleIndex and CompiledRule table protected by a single
/// reader/writer lock").
pub struct RuleCompiler {
    inner: RwLock<RuleCompilerInner>,
}

struct RuleCompilerInner {
    compiled_rules: HashMap<String, CompiledRule>,
    index: RuleIndex,
}

impl RuleCompiler {
    pub fn new() -> Self {
        RuleCompiler {
            inner: RwLock::new(RuleCompilerInner {
                compiled_rules: HashMap::new(),
                index: RuleIndex::default(),
            }),
        }
    }

    /// Compiles `ast` (an implication's body, already separated from its
    /// head by the caller) into a `CompiledRule`, indexing it by its
    /// literals. Returns the existing id without recompiling if an
    /// identical AST was already compiled.
    pub fn compile_rule(&self, ast: AstNode, id: Option<String>) -> String {
        let rule_id = id.unwrap_or_else(|| stable_rule_id(&ast));
        {
            let inner = self.inner.read();
            if inner.compiled_rules.contains_key(&rule_id) {
                return rule_id;
            }
        }

        let shape = classify_shape(&ast);
        let literals = extract_literals(&ast);
        let compiled_form = match shape {
            RuleShape::Simple => CompiledForm::Simple {
                literal: literals.first().cloned_or(&ast),
            },
            RuleShape::Conjunctive => CompiledForm::Conjunctive { literals: literals.clone() },
            RuleShape::Complex => CompiledForm::Complex { sub_bodies: vec![ast.clone()] },
        };

        let rule = CompiledRule {
            id: rule_id.clone(),
            original_ast: ast,
            shape,
            compiled_form,
            last_matched_at: None,
            match_count: 0,
            total_execution_time: Duration::ZERO,
        };

        let mut inner = self.inner.write();
        inner.index.insert(&rule_id, &literals);
        inner.compiled_rules.insert(rule_id.clone(), rule);
        rule_id
    }

    /// Dispatches to the strategy matching the rule's compiled shape,
    /// recording execution statistics (§4.4).
    pub fn execute_rule(
        &self,
        rule_id: &str,
        router: &Router,
        stats: &QueryStatistics,
        context_ids: &[String],
    ) -> SkicResult<Vec<Bindings>> {
        let started = Instant::now();
        let results = {
            let inner = self.inner.read();
            let rule = inner
                .compiled_rules
                .get(rule_id)
                .ok_or_else(|| SkicError::UnknownRule(rule_id.to_string()))?;
            match &rule.compiled_form {
                CompiledForm::Simple { literal } => {
                    router.query_match(&literal.node, context_ids, None)?
                }
                CompiledForm::Conjunctive { literals } => {
                    execute_conjunctive(router, stats, literals, context_ids)?
                }
                CompiledForm::Complex { sub_bodies } => {
                    let mut all = Vec::new();
                    for body in sub_bodies {
                        all.extend(router.query_match(body, context_ids, None)?);
                    }
                    all
                }
            }
        };

        let mut inner = self.inner.write();
        if let Some(rule) = inner.compiled_rules.get_mut(rule_id) {
            rule.match_count += 1;
            rule.last_matched_at = Some(Utc::now());
            rule.total_execution_time += started.elapsed();
        }
        Ok(results)
    }

    /// Probes the index by the fact's predicate, constant arguments, and
    /// root type; unions the results, ordered by descending `match_count`
    /// then ascending rule id (§4.4).
    pub fn find_matching_rules(&self, fact: &AstNode) -> Vec<String> {
        let inner = self.inner.read();
        let mut ids: HashSet<String> = HashSet::new();
        if let Some((pred, _)) = fact.as_predicate_application() {
            if let Some(set) = inner.index.predicate.get(pred) {
                ids.extend(set.iter().cloned());
            }
            for constant in fact.constant_arguments() {
                if let Some(set) = inner.index.constant.get(constant) {
                    ids.extend(set.iter().cloned());
                }
            }
        }
        if let Some(set) = inner.index.type_idx.get(&fact.type_ref().name) {
            ids.extend(set.iter().cloned());
        }
        let mut ordered: Vec<String> = ids.into_iter().collect();
        ordered.sort_by(|a, b| {
            let count_a = inner.compiled_rules.get(a).map(|r| r.match_count).unwrap_or(0);
            let count_b = inner.compiled_rules.get(b).map(|r| r.match_count).unwrap_or(0);
            count_b.cmp(&count_a).then_with(|| a.cmp(b))
        });
        ordered
    }

    pub fn remove_rule(&self, rule_id: &str) -> SkicResult<()> {
        let mut inner = self.inner.write();
        if inner.compiled_rules.remove(rule_id).is_none() {
            return Err(SkicError::UnknownRule(rule_id.to_string()));
        }
        inner.index.remove(rule_id);
        Ok(())
    }
}

impl Default for RuleCompiler {
    fn default() -> Self {
        Self::new()
    }
}

/// Evaluates conjuncts left-to-right, after the optimiser's selectivity
/// reordering, joining on shared variable ids with a minimal intermediate
/// result set at every step (§4.4). Positive literals always sort ahead of
/// negated ones (selectivity order preserved within each group) so a
/// negated literal is never evaluated before some positive literal has
/// established the binding domain it anti-joins against.
fn execute_conjunctive(
    router: &Router,
    stats: &QueryStatistics,
    literals: &[Literal],
    context_ids: &[String],
) -> SkicResult<Vec<Bindings>> {
    let mut ordered: Vec<&Literal> = literals.iter().collect();
    ordered.sort_by(|a, b| {
        a.negated.cmp(&b.negated).then_with(|| {
            stats
                .selectivity_of(&a.node)
                .partial_cmp(&stats.selectivity_of(&b.node))
                .unwrap_or(std::cmp::Ordering::Equal)
        })
    });

    let mut current: Option<Vec<Bindings>> = None;
    for literal in ordered {
        let matches = router.query_match(&literal.node, context_ids, None)?;
        current = Some(match current {
            None if literal.negated => Vec::new(),
            None => matches,
            Some(prev) if literal.negated => anti_join(prev, matches),
            Some(prev) => join(prev, matches),
        });
        if current.as_ref().map(Vec::is_empty).unwrap_or(false) {
            break;
        }
    }
    Ok(current.unwrap_or_default())
}

/// Joins two binding sets on shared variable ids, keeping only combinations
/// that agree on every shared variable.
fn join(left: Vec<Bindings>, right: Vec<Bindings>) -> Vec<Bindings> {
    let mut joined = Vec::new();
    for l in &left {
        for r in &right {
            let compatible = l.iter().all(|(id, node)| r.get(id).map(|n| n == node).unwrap_or(true));
            if compatible {
                let mut merged = l.clone();
                merged.extend(r.clone());
                joined.push(merged);
            }
        }
    }
    joined
}

/// Keeps only the `left` bindings that agree with no row of `right` on
/// their shared variables — the anti-join a negated literal needs instead
/// of `join`'s inner join.
fn anti_join(left: Vec<Bindings>, right: Vec<Bindings>) -> Vec<Bindings> {
    left.into_iter()
        .filter(|l| {
            !right.iter().any(|r| l.iter().all(|(id, node)| r.get(id).map(|n| n == node).unwrap_or(true)))
        })
        .collect()
}

trait FirstLiteralOr {
    fn cloned_or(self, fallback: &AstNode) -> Literal;
}

impl FirstLiteralOr for Option<&Literal> {
    fn cloned_or(self, fallback: &AstNode) -> Literal {
        match self {
            Some(l) => l.clone(),
            None => Literal { node: fallback.clone(), negated: false },
        }
    }
}
