//! Embedded relational backend (§4.1, §6).
//!
//! Two tables exactly as specified: `contexts(context_id PK, parent, kind,
//! created_at)` and `statements(auto_id PK, context_id FK, blob)`, with
//! `blob` a deterministic `bincode` serialisation of the AST node. Each
//! mutation is its own transactional unit unless a `begin_transaction` is
//! active, in which case mutations share the underlying SQLite transaction.
//! Statements for a context are loaded lazily, on first reference to that
//! context.

use super::state::KnowledgeState;
use super::Backend;
use crate::ast::{AstNode, Metadata};
use crate::error::{SkicError, SkicResult};
use crate::unify::{Bindings, UnificationEngine};
use parking_lot::Mutex;
use rusqlite::{params, Connection};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

pub struct SqliteBackend {
    state: KnowledgeState,
    conn: Mutex<Connection>,
    loaded_contexts: Mutex<HashSet<String>>,
    in_sqlite_transaction: Mutex<bool>,
}

impl SqliteBackend {
    pub fn new(unifier: Arc<dyn UnificationEngine>, db_path: impl Into<PathBuf>) -> SkicResult<Self> {
        let db_path = db_path.into();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(db_path)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS contexts (
                context_id TEXT PRIMARY KEY,
                parent TEXT,
                kind TEXT NOT NULL,
                created_at TEXT NOT NULL
             );
             CREATE TABLE IF NOT EXISTS statements (
                auto_id INTEGER PRIMARY KEY AUTOINCREMENT,
                context_id TEXT NOT NULL,
                blob BLOB NOT NULL
             );",
        )?;
        let backend = SqliteBackend {
            state: KnowledgeState::new(unifier),
            conn: Mutex::new(conn),
            loaded_contexts: Mutex::new(HashSet::new()),
            in_sqlite_transaction: Mutex::new(false),
        };
        backend.load()?;
        Ok(backend)
    }

    /// Runs `body` as its own transactional unit unless a `begin_transaction`
    /// is already active, per §4.1.
    fn run_unit<F>(&self, body: F) -> SkicResult<()>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<()>,
    {
        let conn = self.conn.lock();
        let already_in_tx = *self.in_sqlite_transaction.lock();
        if already_in_tx {
            body(&conn).map_err(SkicError::from)
        } else {
            conn.execute_batch("BEGIN")?;
            match body(&conn) {
                Ok(()) => {
                    conn.execute_batch("COMMIT")?;
                    Ok(())
                }
                Err(err) => {
                    let _ = conn.execute_batch("ROLLBACK");
                    Err(SkicError::from(err))
                }
            }
        }
    }

    fn ensure_loaded(&self, context_id: &str) -> SkicResult<()> {
        if self.loaded_contexts.lock().contains(context_id) {
            return Ok(());
        }
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT blob FROM statements WHERE context_id = ?1")?;
        let rows = stmt.query_map(params![context_id], |row| row.get::<_, Vec<u8>>(0))?;
        for row in rows {
            let blob = row?;
            match bincode::deserialize::<AstNode>(&blob) {
                Ok(node) => self.state.restore_statement(context_id, Arc::new(node)),
                Err(err) => {
                    tracing::warn!(context = context_id, error = %err, "corrupt statement blob, skipping row");
                }
            }
        }
        self.loaded_contexts.lock().insert(context_id.to_string());
        Ok(())
    }

    fn rewrite_context_rows(&self, conn: &Connection, context_id: &str) -> rusqlite::Result<()> {
        conn.execute("DELETE FROM statements WHERE context_id = ?1", params![context_id])?;
        for stmt in self.state.enumerate_statements(context_id).unwrap_or_default() {
            let blob = bincode::serialize(&*stmt).expect("AstNode is always serialisable");
            conn.execute(
                "INSERT INTO statements (context_id, blob) VALUES (?1, ?2)",
                params![context_id, blob],
            )?;
        }
        Ok(())
    }
}

impl Backend for SqliteBackend {
    fn add_statement(
        &self,
        stmt: AstNode,
        context_id: &str,
        metadata: Option<Metadata>,
    ) -> SkicResult<bool> {
        self.ensure_loaded(context_id)?;
        let inserted = self.state.add_statement(stmt, context_id, metadata)?;
        if inserted {
            self.run_unit(|conn| self.rewrite_context_rows(conn, context_id))?;
        }
        Ok(inserted)
    }

    fn retract_statement(&self, pattern: &AstNode, context_id: &str) -> SkicResult<bool> {
        self.ensure_loaded(context_id)?;
        let removed = self.state.retract_statement(pattern, context_id)?;
        if removed {
            self.run_unit(|conn| self.rewrite_context_rows(conn, context_id))?;
        }
        Ok(removed)
    }

    fn query_match(
        &self,
        pattern: &AstNode,
        context_ids: &[String],
        bind_vars: Option<&[u64]>,
    ) -> SkicResult<Vec<Bindings>> {
        for id in context_ids {
            self.ensure_loaded(id)?;
        }
        self.state.query_match(pattern, context_ids, bind_vars)
    }

    fn statement_exists(&self, stmt: &AstNode, context_ids: &[String]) -> SkicResult<bool> {
        for id in context_ids {
            self.ensure_loaded(id)?;
        }
        self.state.statement_exists(stmt, context_ids)
    }

    fn create_context(&self, id: &str, parent: Option<&str>, kind: &str) -> SkicResult<()> {
        self.state.create_context(id, parent, kind)?;
        self.loaded_contexts.lock().insert(id.to_string());
        let created_at = chrono::Utc::now().to_rfc3339();
        self.run_unit(|conn| {
            conn.execute(
                "INSERT INTO contexts (context_id, parent, kind, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![id, parent, kind, created_at],
            )
            .map(|_| ())
        })
    }

    fn delete_context(&self, id: &str) -> SkicResult<()> {
        self.state.delete_context(id)?;
        self.loaded_contexts.lock().remove(id);
        self.run_unit(|conn| {
            conn.execute("DELETE FROM statements WHERE context_id = ?1", params![id])?;
            conn.execute("DELETE FROM contexts WHERE context_id = ?1", params![id])?;
            Ok(())
        })
    }

    fn list_contexts(&self) -> Vec<String> {
        self.state.list_contexts()
    }

    fn enumerate_statements(&self, context_id: &str) -> SkicResult<Vec<Arc<AstNode>>> {
        self.ensure_loaded(context_id)?;
        self.state.enumerate_statements(context_id)
    }

    fn persist(&self) -> SkicResult<bool> {
        let loaded: Vec<String> = self.loaded_contexts.lock().iter().cloned().collect();
        self.run_unit(|conn| {
            for context_id in &loaded {
                self.rewrite_context_rows(conn, context_id)?;
            }
            Ok(())
        })?;
        Ok(true)
    }

    fn load(&self) -> SkicResult<bool> {
        self.state.reset();
        self.loaded_contexts.lock().clear();
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT context_id, parent, kind FROM contexts")?;
        let rows: Vec<(String, Option<String>, String)> = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        drop(stmt);
        drop(conn);

        let mut remaining = rows;
        while !remaining.is_empty() {
            let before = remaining.len();
            remaining.retain(|(id, parent, kind)| {
                let ready = match parent {
                    None => true,
                    Some(p) => self.state.list_contexts().contains(p),
                };
                if ready {
                    let _ = self.state.create_context(id, parent.as_deref(), kind);
                    false
                } else {
                    true
                }
            });
            if remaining.len() == before {
                tracing::warn!("contexts table has an unsatisfiable parent chain, dropping remainder");
                break;
            }
        }
        Ok(true)
    }

    fn begin_transaction(&self) -> SkicResult<()> {
        self.state.begin_transaction()?;
        let mut flag = self.in_sqlite_transaction.lock();
        self.conn.lock().execute_batch("BEGIN")?;
        *flag = true;
        Ok(())
    }

    fn commit_transaction(&self) -> SkicResult<()> {
        self.state.commit_transaction()?;
        let mut flag = self.in_sqlite_transaction.lock();
        self.conn.lock().execute_batch("COMMIT")?;
        *flag = false;
        Ok(())
    }

    fn rollback_transaction(&self) -> SkicResult<()> {
        self.state.rollback_transaction()?;
        let mut flag = self.in_sqlite_transaction.lock();
        self.conn.lock().execute_batch("ROLLBACK")?;
        *flag = false;
        Ok(())
    }
}
