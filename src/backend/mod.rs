//! KB Backend (§4.1).
//!
//! The three backend variants (in-memory, file-based, embedded relational)
//! are behaviour-identical at the contract level — only durability differs.
//! [`KnowledgeState`] implements the shared primary-set/index/transaction
//! logic once; each variant wraps it and adds its own `persist`/`load`.

mod file;
mod memory;
mod sqlite;
mod state;

pub use file::FileBackend;
pub use memory::MemoryBackend;
pub use sqlite::SqliteBackend;
pub use state::KnowledgeState;

use crate::ast::{AstNode, Metadata};
use crate::error::SkicResult;
use crate::unify::Bindings;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A named collection of statements, optionally parented by another
/// context. Contexts form a forest (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Context {
    pub id: String,
    pub parent: Option<String>,
    pub kind: String,
    pub created_at: DateTime<Utc>,
}

/// Public contract shared by every backend variant. All operations are
/// thread-safe; mutating operations hold an exclusive lock over the
/// backend's state for their entire duration (§5).
pub trait Backend: Send + Sync {
    /// Inserts `stmt` into `context_id`. Returns `false` without touching
    /// indices if an identical statement (post metadata-merge) is already
    /// present.
    fn add_statement(
        &self,
        stmt: AstNode,
        context_id: &str,
        metadata: Option<Metadata>,
    ) -> SkicResult<bool>;

    /// Removes every statement in `context_id` that unifies with `pattern`.
    /// Returns `true` iff at least one removal occurred.
    fn retract_statement(&self, pattern: &AstNode, context_id: &str) -> SkicResult<bool>;

    /// Pattern-matches across `context_ids`, returning one `Bindings` map per
    /// successful unification. `bind_vars`, if given, restricts each result
    /// to those variable ids.
    fn query_match(
        &self,
        pattern: &AstNode,
        context_ids: &[String],
        bind_vars: Option<&[u64]>,
    ) -> SkicResult<Vec<Bindings>>;

    /// Short-circuiting existence check.
    fn statement_exists(&self, stmt: &AstNode, context_ids: &[String]) -> SkicResult<bool>;

    fn create_context(&self, id: &str, parent: Option<&str>, kind: &str) -> SkicResult<()>;

    fn delete_context(&self, id: &str) -> SkicResult<()>;

    fn list_contexts(&self) -> Vec<String>;

    /// Enumerates every statement stored in a context. Added to resolve the
    /// original source's reliance on a wildcard query pattern for statistics
    /// refresh (§4.3 / Open Question 2): several backends cannot answer that
    /// wildcard query efficiently or correctly, so a dedicated enumeration
    /// method is part of the contract instead.
    fn enumerate_statements(&self, context_id: &str) -> SkicResult<Vec<Arc<AstNode>>>;

    fn persist(&self) -> SkicResult<bool>;

    fn load(&self) -> SkicResult<bool>;

    fn begin_transaction(&self) -> SkicResult<()>;

    fn commit_transaction(&self) -> SkicResult<()>;

    fn rollback_transaction(&self) -> SkicResult<()>;
}
