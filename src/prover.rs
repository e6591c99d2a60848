//! `Prover` collaborator contract (§6). The theorem prover itself is out of
//! scope (§1 non-goals) — SKIC treats it as an opaque capability mapping a
//! query plus contexts to a `ProofObject`.

use crate::ast::AstNode;

/// Outcome of a proof attempt.
#[derive(Debug, Clone)]
pub struct ProofObject {
    pub is_proven: bool,
    pub detail: Option<String>,
}

impl ProofObject {
    pub fn proven() -> Self {
        ProofObject { is_proven: true, detail: None }
    }

    pub fn not_proven(detail: impl Into<String>) -> Self {
        ProofObject { is_proven: false, detail: Some(detail.into()) }
    }
}

/// Capability invoked by the parallel inference manager for each task.
pub trait Prover: Send + Sync {
    fn prove(&self, query: &AstNode, context_ids: &[String]) -> ProofObject;
}

/// Reference prover used by tests: proves a query iff it unifies with at
/// least one statement across the given contexts, using a caller-supplied
/// backend lookup closure. Production deployments plug in the real
/// reasoning engine instead.
pub struct LookupProver<F>
where
    F: Fn(&AstNode, &[String]) -> bool + Send + Sync,
{
    lookup: F,
}

impl<F> LookupProver<F>
where
    F: Fn(&AstNode, &[String]) -> bool + Send + Sync,
{
    pub fn new(lookup: F) -> Self {
        LookupProver { lookup }
    }
}

impl<F> Prover for LookupProver<F>
where
    F: Fn(&AstNode, &[String]) -> bool + Send + Sync,
{
    fn prove(&self, query: &AstNode, context_ids: &[String]) -> ProofObject {
        if (self.lookup)(query, context_ids) {
            ProofObject::proven()
        } else {
            ProofObject::not_proven("no matching statement found")
        }
    }
}
