//! # SKIC — Scalable Knowledge & Inference Core
//!
//! A persistent, transactional, indexed store of logical statements with
//! query planning, rule compilation, parallel inference and caching.
//!
//! ## Module Organization
//!
//! | Module | Purpose |
//! |--------|---------|
//! | `ast` | Statement AST: constants, variables, applications, connectives, quantifiers |
//! | `unify` | `UnificationEngine` contract and a reference structural unifier |
//! | `prover` | `Prover` contract consumed by the inference manager |
//! | `types` | `TypeSystem` contract consumed for lookup/subtyping |
//! | `backend` | In-memory, file-based and embedded-relational KB backends |
//! | `router` | Multiplexes the KB API over one or more backends by context |
//! | `statistics` | Predicate/constant/type counts feeding the optimiser's cost model |
//! | `optimizer` | Query plan construction and execution with feedback |
//! | `rules` | Rule shape classification, compilation and indexed lookup |
//! | `inference` | Priority-queued, worker-pooled parallel inference |
//! | `cache` | Generic eviction-policy cache and memoisation wrapper |
//! | `manager` | `ScalabilityManager` façade wiring every component together |
//! | `config` | `ScalabilityConfig` loaded via `figment` |
//! | `logging` | `tracing_subscriber` initialisation |
//! | `error` | Shared `SkicError`/`SkicResult` |

pub mod ast;
pub mod backend;
pub mod cache;
pub mod config;
pub mod error;
pub mod inference;
pub mod logging;
pub mod manager;
pub mod optimizer;
pub mod prover;
pub mod router;
pub mod rules;
pub mod statistics;
pub mod types;
pub mod unify;

pub use ast::AstNode;
pub use config::ScalabilityConfig;
pub use error::{SkicError, SkicResult};
pub use manager::ScalabilityManager;
