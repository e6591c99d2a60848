//! Configuration system (§4.7).
//!
//! Loaded hierarchically from:
//! - `skic.toml` (base configuration)
//! - Environment variables (`SKIC_` prefix, `__`-separated nesting)
//!
//! ## Example
//!
//! ```toml
//! # skic.toml
//! [storage]
//! backend_type = "file_based"
//! storage_dir = "/var/lib/skic/data"
//! auto_persist = true
//! ```
//!
//! ```bash
//! SKIC_STORAGE__AUTO_PERSIST=false
//! ```

use figment::providers::{Env, Format, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level configuration for a `ScalabilityManager` (§4.7).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScalabilityConfig {
    pub storage: StorageConfig,
    pub optimisation: OptimisationConfig,
    pub inference: InferenceConfig,
    pub cache: CacheConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackendType {
    InMemory,
    FileBased,
    Sqlite,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub backend_type: StorageBackendType,

    /// File-based backend root. Created if missing.
    #[serde(default = "default_storage_dir")]
    pub storage_dir: PathBuf,

    /// Relational backend file. Parent directory created if missing.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// File-based backend flushes on every mutation when true.
    #[serde(default)]
    pub auto_persist: bool,
}

fn default_storage_dir() -> PathBuf {
    PathBuf::from("./data")
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./data/skic.db")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimisationConfig {
    #[serde(default = "default_true")]
    pub enable_query_optimisation: bool,

    #[serde(default = "default_true")]
    pub enable_rule_compilation: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InferenceDispatchStrategy {
    RoundRobin,
    Priority,
    WorkStealing,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceConfig {
    #[serde(default = "default_max_inference_workers")]
    pub max_inference_workers: usize,

    #[serde(default = "default_inference_strategy")]
    pub inference_strategy: InferenceDispatchStrategy,
}

fn default_max_inference_workers() -> usize {
    4
}

fn default_inference_strategy() -> InferenceDispatchStrategy {
    InferenceDispatchStrategy::RoundRobin
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheEvictionPolicy {
    Lru,
    Lfu,
    Fifo,
    Ttl,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_max_cache_size")]
    pub max_cache_size: usize,

    #[serde(default = "default_cache_eviction_policy")]
    pub cache_eviction_policy: CacheEvictionPolicy,

    /// Default TTL attached to new cache entries, in seconds. `0` means no
    /// TTL, left to the eviction policy to decide (§4.7).
    #[serde(default)]
    pub cache_ttl_secs: u64,
}

fn default_max_cache_size() -> usize {
    10_000
}

fn default_cache_eviction_policy() -> CacheEvictionPolicy {
    CacheEvictionPolicy::Lru
}

/// Logging configuration, mirroring the base crate's own style.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (text, json).
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

impl ScalabilityConfig {
    /// Loads configuration from `skic.toml` merged with `SKIC_`-prefixed
    /// environment variables.
    pub fn load() -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Toml::file("skic.toml"))
            .merge(Env::prefixed("SKIC_").split("__"))
            .extract()
    }

    /// Loads configuration from a specific file path, still allowing
    /// environment overrides.
    pub fn from_file(path: &str) -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("SKIC_").split("__"))
            .extract()
    }
}

impl Default for ScalabilityConfig {
    fn default() -> Self {
        ScalabilityConfig {
            storage: StorageConfig {
                backend_type: StorageBackendType::InMemory,
                storage_dir: default_storage_dir(),
                db_path: default_db_path(),
                auto_persist: false,
            },
            optimisation: OptimisationConfig {
                enable_query_optimisation: true,
                enable_rule_compilation: true,
            },
            inference: InferenceConfig {
                max_inference_workers: default_max_inference_workers(),
                inference_strategy: default_inference_strategy(),
            },
            cache: CacheConfig {
                max_cache_size: default_max_cache_size(),
                cache_eviction_policy: default_cache_eviction_policy(),
                cache_ttl_secs: 0,
            },
            logging: LoggingConfig { level: default_log_level(), format: default_log_format() },
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig { level: default_log_level(), format: default_log_format() }
    }
}
