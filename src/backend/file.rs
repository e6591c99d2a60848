//! File-based backend (§4.1, §6 persisted state layout).
//!
//! A root directory holds a structured text file (`contexts.json`)
//! serialising the context table, and a subdirectory `contexts/<id>/statements.bin`
//! per context holding a binary serialisation of that context's statement
//! set with a trailing CRC32 checksum. Missing files imply an empty
//! context; corrupt files are logged and treated as empty — indices are
//! never persisted, they are rebuilt from the primary set on `load`.

use super::state::KnowledgeState;
use super::{Backend, Context};
use crate::ast::{AstNode, Metadata};
use crate::error::{SkicError, SkicResult};
use crate::unify::{Bindings, UnificationEngine};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Serialize, Deserialize)]
struct StoredContext {
    parent: Option<String>,
    kind: String,
    created_at: chrono::DateTime<chrono::Utc>,
}

pub struct FileBackend {
    state: KnowledgeState,
    storage_dir: PathBuf,
    auto_persist: bool,
}

impl FileBackend {
    pub fn new(
        unifier: Arc<dyn UnificationEngine>,
        storage_dir: impl Into<PathBuf>,
        auto_persist: bool,
    ) -> SkicResult<Self> {
        let storage_dir = storage_dir.into();
        fs::create_dir_all(&storage_dir)?;
        let backend = FileBackend {
            state: KnowledgeState::new(unifier),
            storage_dir,
            auto_persist,
        };
        backend.load()?;
        Ok(backend)
    }

    fn contexts_file(&self) -> PathBuf {
        self.storage_dir.join("contexts.json")
    }

    fn context_dir(&self, id: &str) -> PathBuf {
        self.storage_dir.join("contexts").join(id)
    }

    fn statements_file(&self, id: &str) -> PathBuf {
        self.context_dir(id).join("statements.bin")
    }

    fn maybe_auto_persist(&self) -> SkicResult<()> {
        if self.auto_persist && !self.state.in_transaction() {
            self.persist()?;
        }
        Ok(())
    }

    fn write_statements(&self, id: &str, statements: &[Arc<AstNode>]) -> SkicResult<()> {
        let dir = self.context_dir(id);
        fs::create_dir_all(&dir)?;
        let owned: Vec<AstNode> = statements.iter().map(|s| (**s).clone()).collect();
        let payload = bincode::serialize(&owned)?;
        let checksum = crc32fast::hash(&payload);
        let mut bytes = payload;
        bytes.extend_from_slice(&checksum.to_le_bytes());
        fs::write(self.statements_file(id), bytes)?;
        Ok(())
    }

    fn read_statements(&self, id: &str) -> Vec<AstNode> {
        let path = self.statements_file(id);
        let Ok(bytes) = fs::read(&path) else {
            return Vec::new();
        };
        if bytes.len() < 4 {
            tracing::warn!(context = id, "statements file too short, treating as empty");
            return Vec::new();
        }
        let (payload, checksum_bytes) = bytes.split_at(bytes.len() - 4);
        let expected = u32::from_le_bytes(checksum_bytes.try_into().unwrap());
        if crc32fast::hash(payload) != expected {
            tracing::warn!(context = id, "statements file checksum mismatch, treating as empty");
            return Vec::new();
        }
        match bincode::deserialize::<Vec<AstNode>>(payload) {
            Ok(stmts) => stmts,
            Err(err) => {
                tracing::warn!(context = id, error = %err, "corrupt statements file, treating as empty");
                Vec::new()
            }
        }
    }
}

impl Backend for FileBackend {
    fn add_statement(
        &self,
        stmt: AstNode,
        context_id: &str,
        metadata: Option<Metadata>,
    ) -> SkicResult<bool> {
        let inserted = self.state.add_statement(stmt, context_id, metadata)?;
        if inserted {
            self.maybe_auto_persist()?;
        }
        Ok(inserted)
    }

    fn retract_statement(&self, pattern: &AstNode, context_id: &str) -> SkicResult<bool> {
        let removed = self.state.retract_statement(pattern, context_id)?;
        if removed {
            self.maybe_auto_persist()?;
        }
        Ok(removed)
    }

    fn query_match(
        &self,
        pattern: &AstNode,
        context_ids: &[String],
        bind_vars: Option<&[u64]>,
    ) -> SkicResult<Vec<Bindings>> {
        self.state.query_match(pattern, context_ids, bind_vars)
    }

    fn statement_exists(&self, stmt: &AstNode, context_ids: &[String]) -> SkicResult<bool> {
        self.state.statement_exists(stmt, context_ids)
    }

    fn create_context(&self, id: &str, parent: Option<&str>, kind: &str) -> SkicResult<()> {
        self.state.create_context(id, parent, kind)?;
        self.maybe_auto_persist()
    }

    fn delete_context(&self, id: &str) -> SkicResult<()> {
        self.state.delete_context(id)?;
        let dir = self.context_dir(id);
        if dir.exists() {
            fs::remove_dir_all(&dir)?;
        }
        self.maybe_auto_persist()
    }

    fn list_contexts(&self) -> Vec<String> {
        self.state.list_contexts()
    }

    fn enumerate_statements(&self, context_id: &str) -> SkicResult<Vec<Arc<AstNode>>> {
        self.state.enumerate_statements(context_id)
    }

    fn persist(&self) -> SkicResult<bool> {
        let contexts = self.state.contexts_snapshot();
        let mut map: HashMap<String, StoredContext> = HashMap::new();
        for ctx in &contexts {
            map.insert(
                ctx.id.clone(),
                StoredContext {
                    parent: ctx.parent.clone(),
                    kind: ctx.kind.clone(),
                    created_at: ctx.created_at,
                },
            );
        }
        let json = serde_json::to_string_pretty(&map)
            .map_err(|e| SkicError::BackendIoError(e.to_string()))?;
        fs::write(self.contexts_file(), json)?;

        for (context_id, statements) in self.state.all_statements() {
            self.write_statements(&context_id, &statements)?;
        }
        Ok(true)
    }

    fn load(&self) -> SkicResult<bool> {
        let path = self.contexts_file();
        if !path.exists() {
            return Ok(true);
        }
        let text = match fs::read_to_string(&path) {
            Ok(t) => t,
            Err(err) => {
                tracing::warn!(error = %err, "failed to read contexts.json, starting empty");
                return Ok(true);
            }
        };
        let stored: HashMap<String, StoredContext> = match serde_json::from_str(&text) {
            Ok(m) => m,
            Err(err) => {
                tracing::warn!(error = %err, "corrupt contexts.json, starting empty");
                return Ok(true);
            }
        };

        let mut remaining = stored;
        while !remaining.is_empty() {
            let ready: Vec<String> = remaining
                .iter()
                .filter(|(_, c)| match &c.parent {
                    None => true,
                    Some(p) => self.state.list_contexts().contains(p),
                })
                .map(|(id, _)| id.clone())
                .collect();
            if ready.is_empty() {
                tracing::warn!("contexts.json has an unsatisfiable parent chain, dropping remainder");
                break;
            }
            for id in ready {
                let stored_ctx = remaining.remove(&id).expect("just filtered");
                self.state
                    .create_context(&id, stored_ctx.parent.as_deref(), &stored_ctx.kind)?;
            }
        }

        for id in self.state.list_contexts() {
            for stmt in self.read_statements(&id) {
                self.state.restore_statement(&id, Arc::new(stmt));
            }
        }
        Ok(true)
    }

    fn begin_transaction(&self) -> SkicResult<()> {
        self.state.begin_transaction()
    }

    fn commit_transaction(&self) -> SkicResult<()> {
        self.state.commit_transaction()?;
        if self.auto_persist {
            self.persist()?;
        }
        Ok(())
    }

    fn rollback_transaction(&self) -> SkicResult<()> {
        self.state.rollback_transaction()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::builders::{binary_application, ConstantBuilder, VariableBuilder};
    use crate::unify::SimpleUnifier;
    use tempfile::tempdir;

    #[test]
    fn persist_then_load_restores_state() {
        let dir = tempdir().unwrap();
        {
            let backend =
                FileBackend::new(Arc::new(SimpleUnifier::new()), dir.path(), false).unwrap();
            backend.create_context("T", None, "default").unwrap();
            backend
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
            backend.persist().unwrap();
        }
        let reloaded = FileBackend::new(Arc::new(SimpleUnifier::new()), dir.path(), false).unwrap();
        assert_eq!(reloaded.list_contexts(), vec!["T".to_string()]);
        let pattern = binary_application(
            "is_a",
            "Relation",
            VariableBuilder::new("X", 1, "Entity").build(),
            ConstantBuilder::new("Person", "Entity").build(),
        );
        let results = reloaded
            .query_match(&pattern, &["T".to_string()], Some(&[1]))
            .unwrap();
        assert_eq!(results.len(), 1);
    }

    #[test]
    fn corrupt_statements_file_yields_empty_context() {
        let dir = tempdir().unwrap();
        let backend = FileBackend::new(Arc::new(SimpleUnifier::new()), dir.path(), false).unwrap();
        backend.create_context("T", None, "default").unwrap();
        backend.persist().unwrap();
        fs::write(backend.statements_file("T"), b"not a valid blob").unwrap();
        let stmts = backend.read_statements("T");
        assert!(stmts.is_empty());
    }
}
