use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::namespace::Namespace;

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
#[serde(default)]
pub struct MemoryConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub embedding: EmbeddingConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub log_level: String,
}

/// Which backend to open and where it lives.
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    /// `memory`, `sqlite`, or `qdrant`.
    pub backend: String,
    /// SQLite database file.
    pub db_path: String,
    /// Qdrant endpoint.
    pub url: String,
    /// Note count per namespace above which the SQLite backend logs an advisory. 0 disables it.
    pub large_namespace_threshold: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub provider: String,
    pub model: String,
    /// 0 until the first embedding call discovers it.
    pub dim: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            log_level: "info".into(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        let db_path = default_memstore_dir()
            .join("memory.db")
            .to_string_lossy()
            .into_owned();
        Self {
            backend: "sqlite".into(),
            db_path,
            url: "http://localhost:6333".into(),
            large_namespace_threshold: 5000,
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "openai".into(),
            model: "text-embedding-3-small".into(),
            dim: 0,
        }
    }
}

/// Returns `~/.memstore/`, or `./.memstore/` when no home directory is available.
pub fn default_memstore_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".memstore")
}

/// Returns the default config file path: `~/.memstore/config.toml`
pub fn default_config_path() -> PathBuf {
    default_memstore_dir().join("config.toml")
}

impl MemoryConfig {
    /// Load config from TOML file (if it exists) then apply env var overrides.
    pub fn load() -> Result<Self> {
        Self::load_from(default_config_path())
    }

    /// Load from a specific path, then apply env var overrides.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let contents =
                std::fs::read_to_string(path).context("failed to read config file")?;
            toml::from_str(&contents).context("failed to parse config TOML")?
        } else {
            info!("no config file at {}, using defaults", path.display());
            MemoryConfig::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Write the config as TOML. Goes through a temp file + rename so a crash
    /// never leaves a half-written config behind.
    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create directory {}", parent.display()))?;
        }

        let contents = toml::to_string_pretty(self).context("failed to serialize config")?;
        let tmp = path.with_extension("toml.tmp");
        std::fs::write(&tmp, contents)
            .with_context(|| format!("failed to write {}", tmp.display()))?;
        if let Err(e) = std::fs::rename(&tmp, path) {
            let _ = std::fs::remove_file(&tmp);
            return Err(e).with_context(|| format!("failed to replace {}", path.display()));
        }
        Ok(())
    }

    /// Persist a newly discovered embedding dimension into the config file at `path`.
    ///
    /// Re-reads the file so concurrent edits to other sections are kept.
    pub fn record_dimension(path: impl AsRef<Path>, dim: usize) -> Result<()> {
        let path = path.as_ref();
        let mut config = Self::load_from(path)?;
        config.embedding.dim = dim;
        config.save_to(path)?;
        info!(dim, path = %path.display(), "embedding dimension saved");
        Ok(())
    }

    /// Apply environment variable overrides
    /// (MEMSTORE_DB, MEMSTORE_BACKEND, MEMSTORE_QDRANT_URL, MEMSTORE_LOG_LEVEL).
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("MEMSTORE_DB") {
            self.storage.db_path = val;
        }
        if let Ok(val) = std::env::var("MEMSTORE_BACKEND") {
            self.storage.backend = val;
        }
        if let Ok(val) = std::env::var("MEMSTORE_QDRANT_URL") {
            self.storage.url = val;
        }
        if let Ok(val) = std::env::var("MEMSTORE_LOG_LEVEL") {
            self.server.log_level = val;
        }
    }

    /// The namespace all store operations run in.
    pub fn namespace(&self) -> Namespace {
        Namespace::new(
            &self.embedding.provider,
            &self.embedding.model,
            self.embedding.dim,
        )
    }
}

impl StorageConfig {
    /// Resolve the database path, expanding `~` if needed.
    pub fn resolved_db_path(&self) -> PathBuf {
        expand_tilde(&self.db_path)
    }
}

pub fn expand_tilde(path: &str) -> PathBuf {
    let home = || dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
    if path == "~" {
        home()
    } else if let Some(rest) = path.strip_prefix("~/") {
        home().join(rest)
    } else {
        PathBuf::from(path)
    }
}

/// Canonical project id: `~` expanded, made absolute, symlinks resolved.
///
/// Falls back to the absolute path when the target does not exist (symlinks
/// cannot be resolved for a path that isn't there).
pub fn canonicalize_project_id(raw: &str) -> Result<String> {
    let expanded = expand_tilde(raw);
    let absolute = if expanded.is_absolute() {
        expanded
    } else {
        std::env::current_dir()
            .context("failed to read current directory")?
            .join(expanded)
    };
    let canonical = std::fs::canonicalize(&absolute).unwrap_or(absolute);
    Ok(canonical.to_string_lossy().into_owned())
}
