use anyhow::{Context, Result};
use notestore_core::fusion::{FusionConfig, RRF_K};
use notestore_core::scope::DEFAULT_MAX_SCOPE_ROWS;
use notestore_core::search::SearchParams;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::backend::selector::{BackendPreference, OpenOptions, PortableEngine};
use crate::vector::VectorOptions;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub storage: StorageConfig,
    #[serde(default)]
    pub vector: VectorConfig,
    #[serde(default)]
    pub search: SearchConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    /// Directory holding `search.sqlite` and `meta.sqlite`.
    pub folder: PathBuf,
    #[serde(default)]
    pub backend: BackendPreference,
    #[serde(default)]
    pub portable_engine: PortableEngine,
    /// Per-call timeout of the paged engine. A call that times out keeps
    /// running on the connection; later calls, including the `ROLLBACK` of
    /// an enclosing transaction, queue behind it and may time out as well
    /// until it finishes.
    #[serde(default = "default_bridge_timeout_ms")]
    pub bridge_timeout_ms: u64,
}

fn default_bridge_timeout_ms() -> u64 {
    30_000
}

#[derive(Debug, Deserialize, Clone)]
pub struct VectorConfig {
    #[serde(default = "default_max_scope_rows")]
    pub max_scope_rows: usize,
    #[serde(default = "default_scope_oversample")]
    pub scope_oversample: usize,
}

impl Default for VectorConfig {
    fn default() -> Self {
        Self {
            max_scope_rows: default_max_scope_rows(),
            scope_oversample: default_scope_oversample(),
        }
    }
}

fn default_max_scope_rows() -> usize {
    DEFAULT_MAX_SCOPE_ROWS
}
fn default_scope_oversample() -> usize {
    4
}

#[derive(Debug, Deserialize, Clone)]
pub struct SearchConfig {
    #[serde(default = "default_rrf_k")]
    pub rrf_k: f64,
    #[serde(default = "default_content_weight")]
    pub content_weight: f64,
    #[serde(default = "default_metadata_weight")]
    pub metadata_weight: f64,
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
    #[serde(default = "default_final_limit")]
    pub final_limit: usize,
    #[serde(default = "default_graph_boost")]
    pub graph_boost: f64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            rrf_k: default_rrf_k(),
            content_weight: default_content_weight(),
            metadata_weight: default_metadata_weight(),
            pool_size: default_pool_size(),
            final_limit: default_final_limit(),
            graph_boost: default_graph_boost(),
        }
    }
}

fn default_rrf_k() -> f64 {
    RRF_K
}
fn default_content_weight() -> f64 {
    0.5
}
fn default_metadata_weight() -> f64 {
    0.3
}
fn default_pool_size() -> usize {
    100
}
fn default_final_limit() -> usize {
    12
}
fn default_graph_boost() -> f64 {
    0.1
}

impl StorageConfig {
    pub fn search_db_path(&self) -> PathBuf {
        self.folder.join("search.sqlite")
    }

    pub fn meta_db_path(&self) -> PathBuf {
        self.folder.join("meta.sqlite")
    }

    pub fn open_options(&self) -> OpenOptions {
        OpenOptions {
            preference: self.backend,
            portable_engine: self.portable_engine,
            timeout: Duration::from_millis(self.bridge_timeout_ms),
        }
    }
}

impl VectorConfig {
    pub fn options(&self) -> VectorOptions {
        VectorOptions {
            max_scope_rows: self.max_scope_rows,
            scope_oversample: self.scope_oversample,
        }
    }
}

impl SearchConfig {
    pub fn params(&self) -> SearchParams {
        SearchParams {
            fusion: FusionConfig {
                k: self.rrf_k,
                content_weight: self.content_weight,
                metadata_weight: self.metadata_weight,
                pool_size: self.pool_size,
            },
            graph_boost: self.graph_boost,
        }
    }
}

impl Config {
    /// Defaults for a storage folder, as written by `nstore init`.
    pub fn for_folder(folder: impl Into<PathBuf>) -> Self {
        Self {
            storage: StorageConfig {
                folder: folder.into(),
                backend: BackendPreference::default(),
                portable_engine: PortableEngine::default(),
                bridge_timeout_ms: default_bridge_timeout_ms(),
            },
            vector: VectorConfig::default(),
            search: SearchConfig::default(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    if config.storage.folder.as_os_str().is_empty() {
        anyhow::bail!("storage.folder must not be empty");
    }
    if config.storage.bridge_timeout_ms == 0 {
        anyhow::bail!("storage.bridge_timeout_ms must be > 0");
    }

    if config.vector.max_scope_rows == 0 {
        anyhow::bail!("vector.max_scope_rows must be > 0");
    }
    if config.vector.scope_oversample == 0 {
        anyhow::bail!("vector.scope_oversample must be >= 1");
    }

    let search = &config.search;
    if search.rrf_k <= 0.0 {
        anyhow::bail!("search.rrf_k must be > 0");
    }
    for (name, weight) in [
        ("content_weight", search.content_weight),
        ("metadata_weight", search.metadata_weight),
    ] {
        if !(0.0..=1.0).contains(&weight) {
            anyhow::bail!("search.{name} must be in [0.0, 1.0]");
        }
    }
    if search.pool_size == 0 {
        anyhow::bail!("search.pool_size must be > 0");
    }
    if search.final_limit == 0 {
        anyhow::bail!("search.final_limit must be >= 1");
    }
    if !(0.0..=1.0).contains(&search.graph_boost) {
        anyhow::bail!("search.graph_boost must be in [0.0, 1.0]");
    }

    Ok(config)
}
