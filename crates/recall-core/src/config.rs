//! Lightweight configuration loader and path helpers.
//!
//! Uses Figment to merge `config.toml` + `config.<env>.toml` + `APP_*` env vars.
//! Nested keys use `__` in env var names, e.g.
//! `APP_RETRIEVAL__RESULT_CACHE__LOCAL_TTL_SECS=30`.

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::types::Weights;

pub struct Config {
    figment: Figment,
}

impl Config {
    pub fn load() -> Result<Self> {
        let env_name = env::var("RUST_ENV").unwrap_or_else(|_| "dev".to_string());

        let mut figment = Figment::new().merge(Toml::file("config.toml"));
        match env_name.as_str() {
            "dev" | "development" => figment = figment.merge(Toml::file("config.dev.toml")),
            "prod" | "production" => figment = figment.merge(Toml::file("config.prod.toml")),
            "test" | "testing" => figment = figment.merge(Toml::file("config.test.toml")),
            _ => {}
        }
        figment = figment.merge(Env::prefixed("APP_").split("__"));

        Ok(Self { figment })
    }

    pub fn from_figment(figment: Figment) -> Self {
        Self { figment }
    }

    pub fn get<T>(&self, key: &str) -> Result<T>
    where
        T: serde::de::DeserializeOwned,
    {
        self.figment
            .extract_inner(key)
            .map_err(|e| Error::InvalidConfig(format!("Failed to get '{key}': {e}")))
    }

    /// Like [`Config::get`], but an absent key yields `T::default()`.
    pub fn get_or_default<T>(&self, key: &str) -> Result<T>
    where
        T: serde::de::DeserializeOwned + Default,
    {
        match self.figment.extract_inner(key) {
            Ok(value) => Ok(value),
            Err(e) if e.missing() => Ok(T::default()),
            Err(e) => Err(Error::InvalidConfig(format!("Failed to get '{key}': {e}"))),
        }
    }

    /// Engine settings from the `retrieval` table, validated.
    pub fn settings(&self) -> Result<Settings> {
        let settings: Settings = self.get_or_default("retrieval")?;
        settings.validate()?;
        Ok(settings)
    }
}

/// Tunables for retrieval, caching and the indices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Minimum number of candidates requested from each backend.
    pub candidate_pool: usize,
    /// Number of fused candidates handed to the reranker.
    pub rerank_shortlist: usize,
    pub backend_timeout_ms: u64,
    pub request_timeout_ms: u64,
    pub rerank_timeout_ms: u64,
    pub default_weights: Weights,
    pub vector: VectorSettings,
    pub embedding_cache: EmbeddingCacheSettings,
    pub result_cache: ResultCacheSettings,
    pub lexical: LexicalSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            candidate_pool: 50,
            rerank_shortlist: 20,
            backend_timeout_ms: 800,
            request_timeout_ms: 2_000,
            rerank_timeout_ms: 500,
            default_weights: Weights::default(),
            vector: VectorSettings::default(),
            embedding_cache: EmbeddingCacheSettings::default(),
            result_cache: ResultCacheSettings::default(),
            lexical: LexicalSettings::default(),
        }
    }
}

impl Settings {
    pub fn backend_timeout(&self) -> Duration {
        Duration::from_millis(self.backend_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn rerank_timeout(&self) -> Duration {
        Duration::from_millis(self.rerank_timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("candidate_pool", self.candidate_pool),
            ("rerank_shortlist", self.rerank_shortlist),
            ("vector.overfetch_factor", self.vector.overfetch_factor),
            ("embedding_cache.capacity", self.embedding_cache.capacity),
            ("result_cache.local_capacity", self.result_cache.local_capacity),
            ("lexical.writer_heap_bytes", self.lexical.writer_heap_bytes),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(Error::InvalidConfig(format!("{name} must be greater than zero")));
            }
        }
        let timeouts = [
            ("backend_timeout_ms", self.backend_timeout_ms),
            ("request_timeout_ms", self.request_timeout_ms),
            ("rerank_timeout_ms", self.rerank_timeout_ms),
            ("result_cache.shared_timeout_ms", self.result_cache.shared_timeout_ms),
        ];
        for (name, value) in timeouts {
            if value == 0 {
                return Err(Error::InvalidConfig(format!("{name} must be greater than zero")));
            }
        }
        if !(0.0..1.0).contains(&self.vector.compaction_ratio) {
            return Err(Error::InvalidConfig(format!(
                "vector.compaction_ratio {} must be within [0, 1)",
                self.vector.compaction_ratio
            )));
        }
        self.default_weights
            .validate()
            .map_err(|e| Error::InvalidConfig(format!("default_weights: {e}")))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VectorSettings {
    /// Approximate searches fetch `k * overfetch_factor` neighbours before filtering.
    pub overfetch_factor: usize,
    /// At or below this many eligible chunks an exact scan replaces the graph search.
    pub exact_scan_threshold: usize,
    pub ef_search_min: usize,
    /// Rebuild the graph once tombstones exceed this share of all slots.
    pub compaction_ratio: f32,
}

impl Default for VectorSettings {
    fn default() -> Self {
        Self {
            overfetch_factor: 4,
            exact_scan_threshold: 1_024,
            ef_search_min: 50,
            compaction_ratio: 0.5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingCacheSettings {
    pub capacity: usize,
}

impl Default for EmbeddingCacheSettings {
    fn default() -> Self {
        Self { capacity: 10_000 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResultCacheSettings {
    pub local_capacity: usize,
    pub local_ttl_secs: u64,
    pub shared_ttl_secs: u64,
    pub shared_timeout_ms: u64,
    /// SQLite file backing the shared tier. Unset keeps the shared tier in process.
    pub shared_path: Option<String>,
}

impl Default for ResultCacheSettings {
    fn default() -> Self {
        Self {
            local_capacity: 1_024,
            local_ttl_secs: 60,
            shared_ttl_secs: 3_600,
            shared_timeout_ms: 200,
            shared_path: None,
        }
    }
}

impl ResultCacheSettings {
    pub fn local_ttl(&self) -> Duration {
        Duration::from_secs(self.local_ttl_secs)
    }

    pub fn shared_ttl(&self) -> Duration {
        Duration::from_secs(self.shared_ttl_secs)
    }

    pub fn shared_timeout(&self) -> Duration {
        Duration::from_millis(self.shared_timeout_ms)
    }

    pub fn shared_path(&self) -> Option<PathBuf> {
        self.shared_path.as_deref().map(expand_path)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LexicalSettings {
    pub writer_heap_bytes: usize,
    /// On-disk index directory. Unset keeps the index in RAM.
    pub index_dir: Option<String>,
}

impl Default for LexicalSettings {
    fn default() -> Self {
        Self {
            writer_heap_bytes: 50_000_000,
            index_dir: None,
        }
    }
}

impl LexicalSettings {
    pub fn index_dir(&self) -> Option<PathBuf> {
        self.index_dir.as_deref().map(expand_path)
    }
}

/// Expand a user-provided path string:
/// - Expands leading '~' to the user's home directory
/// - Expands ${VAR} and $VAR environment variables
/// - Returns a PathBuf without attempting to canonicalize
pub fn expand_path<S: AsRef<str>>(input: S) -> PathBuf {
    let s = input.as_ref();
    let expanded_env = shellexpand::env(s).unwrap_or(std::borrow::Cow::Borrowed(s));
    let expanded = shellexpand::tilde(&expanded_env);
    PathBuf::from(expanded.as_ref())
}
