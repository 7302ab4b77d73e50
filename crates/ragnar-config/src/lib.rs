//! Layered configuration for Ragnar.
//!
//! Sources, lowest precedence first:
//! 1. built-in defaults
//! 2. `~/.config/ragnar/config.toml`
//! 3. `./ragnar.toml`
//! 4. a file passed explicitly (`--config`)
//! 5. `RAGNAR__SECTION__KEY` environment variables
//!
//! Paths and secrets may use `~` and `${VAR}`; they are expanded after
//! the layers are merged.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// File name looked up in the working directory.
pub const LOCAL_CONFIG_FILE: &str = "ragnar.toml";

/// Prefix of environment overrides.
pub const ENV_PREFIX: &str = "RAGNAR";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Failed to expand '{value}': {reason}")]
    Expand { value: String, reason: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config file already exists: {0}")]
    AlreadyExists(PathBuf),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepoConfig {
    /// Repository root; the working directory when unset
    pub path: Option<String>,
    /// Id prefix; the root's directory name when unset
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexSettings {
    /// Snapshot directory, relative to the repo root unless absolute
    pub state_dir: String,
    pub persist: bool,
    pub max_parallel: usize,
    /// Bytes; larger files are skipped
    pub max_file_size: u64,
    pub respect_gitignore: bool,
}

impl Default for IndexSettings {
    fn default() -> Self {
        Self {
            state_dir: ".ragnar".to_string(),
            persist: true,
            max_parallel: 8,
            max_file_size: 1024 * 1024,
            respect_gitignore: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatcherSettings {
    pub debounce_ms: u64,
}

impl Default for WatcherSettings {
    fn default() -> Self {
        Self { debounce_ms: 500 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingsConfig {
    pub enabled: bool,
    pub url: String,
    pub model: String,
    pub dimensions: usize,
    /// Literal key or `${VAR}`; falls back to `OPENROUTER_API_KEY`
    pub api_key: Option<String>,
}

impl Default for EmbeddingsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: "https://openrouter.ai/api/v1/embeddings".to_string(),
            model: "qwen/qwen3-embedding-8b".to_string(),
            dimensions: 4096,
            api_key: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VectorBackend {
    #[default]
    Memory,
    Qdrant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VectorStoreConfig {
    pub backend: VectorBackend,
    pub url: String,
    pub collection: String,
    pub api_key: Option<String>,
}

impl Default for VectorStoreConfig {
    fn default() -> Self {
        Self {
            backend: VectorBackend::Memory,
            url: "http://localhost:6334".to_string(),
            collection: "ragnar-code".to_string(),
            api_key: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub repo: RepoConfig,
    pub index: IndexSettings,
    pub watcher: WatcherSettings,
    pub embeddings: EmbeddingsConfig,
    pub vector_store: VectorStoreConfig,
    /// `tracing` filter used when `RUST_LOG` is unset
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            repo: RepoConfig::default(),
            index: IndexSettings::default(),
            watcher: WatcherSettings::default(),
            embeddings: EmbeddingsConfig::default(),
            vector_store: VectorStoreConfig::default(),
            log_level: "info".to_string(),
        }
    }
}

/// `~/.config/ragnar/config.toml`
pub fn global_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".config").join("ragnar").join("config.toml"))
}

impl Config {
    /// Load every layer; `explicit` must exist when given.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let local = PathBuf::from(LOCAL_CONFIG_FILE);
        Self::load_from(global_config_path().as_deref(), Some(&local), explicit)
    }

    /// Load with chosen file layers, then the environment.
    pub fn load_from(
        global: Option<&Path>,
        local: Option<&Path>,
        explicit: Option<&Path>,
    ) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder().add_source(config::Config::try_from(&Config::default())?);
        for path in [global, local].into_iter().flatten() {
            debug!(path = %path.display(), exists = path.exists(), "Config layer");
            builder = builder.add_source(config::File::from(path).format(config::FileFormat::Toml).required(false));
        }
        if let Some(path) = explicit {
            builder = builder.add_source(config::File::from(path).format(config::FileFormat::Toml).required(true));
        }
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        );

        let mut config: Config = builder.build()?.try_deserialize()?;
        config.expand()?;
        config.validate()?;
        Ok(config)
    }

    fn expand(&mut self) -> Result<(), ConfigError> {
        self.repo.path = self.repo.path.as_deref().map(expand).transpose()?;
        self.index.state_dir = expand(&self.index.state_dir)?;
        self.embeddings.api_key = self.embeddings.api_key.as_deref().map(expand).transpose()?;
        self.vector_store.api_key = self.vector_store.api_key.as_deref().map(expand).transpose()?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.index.max_parallel == 0 {
            return Err(ConfigError::Invalid("index.max_parallel must be at least 1".to_string()));
        }
        if self.embeddings.enabled && self.embeddings.dimensions == 0 {
            return Err(ConfigError::Invalid("embeddings.dimensions must be positive".to_string()));
        }
        if self.vector_store.backend == VectorBackend::Qdrant && self.vector_store.url.is_empty() {
            return Err(ConfigError::Invalid("vector_store.url is required for qdrant".to_string()));
        }
        Ok(())
    }

    /// Repository root, relative paths taken from `cwd`.
    pub fn repo_root(&self, cwd: &Path) -> PathBuf {
        match &self.repo.path {
            Some(path) if Path::new(path).is_absolute() => PathBuf::from(path),
            Some(path) => cwd.join(path),
            None => cwd.to_path_buf(),
        }
    }

    /// Snapshot directory for `root`, or `None` when persistence is off.
    pub fn state_dir(&self, root: &Path) -> Option<PathBuf> {
        if !self.index.persist {
            return None;
        }
        let dir = Path::new(&self.index.state_dir);
        Some(if dir.is_absolute() { dir.to_path_buf() } else { root.join(dir) })
    }

    /// Embedding key from config, else `OPENROUTER_API_KEY`.
    pub fn embeddings_api_key(&self) -> Option<String> {
        self.embeddings
            .api_key
            .clone()
            .filter(|k| !k.is_empty())
            .or_else(|| std::env::var("OPENROUTER_API_KEY").ok().filter(|k| !k.is_empty()))
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Write the defaults to `path`, creating parent directories.
    pub fn write_default(path: &Path, overwrite: bool) -> Result<(), ConfigError> {
        if path.exists() && !overwrite {
            return Err(ConfigError::AlreadyExists(path.to_path_buf()));
        }
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, Config::default().to_toml()?)?;
        Ok(())
    }
}

fn expand(value: &str) -> Result<String, ConfigError> {
    shellexpand::full(value)
        .map(|v| v.into_owned())
        .map_err(|e| ConfigError::Expand {
            value: value.to_string(),
            reason: e.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.index.max_parallel, 8);
        assert_eq!(config.watcher.debounce_ms, 500);
        assert_eq!(config.vector_store.backend, VectorBackend::Memory);
        assert!(!config.embeddings.enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_backend_names_are_lowercase() {
        let value = serde_json::to_value(Config::default()).unwrap();
        assert_eq!(value["vector_store"]["backend"], "memory");
        let backend: VectorBackend = serde_json::from_str("\"qdrant\"").unwrap();
        assert_eq!(backend, VectorBackend::Qdrant);
    }

    #[test]
    fn test_file_layers_override_in_order() {
        let dir = TempDir::new().unwrap();
        let global = dir.path().join("global.toml");
        let local = dir.path().join("ragnar.toml");
        std::fs::write(&global, "log_level = \"debug\"\n[index]\nmax_parallel = 2\n").unwrap();
        std::fs::write(&local, "[index]\nmax_parallel = 4\n[vector_store]\nbackend = \"qdrant\"\n").unwrap();

        let config = Config::load_from(Some(&global), Some(&local), None).unwrap();
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.index.max_parallel, 4);
        assert_eq!(config.vector_store.backend, VectorBackend::Qdrant);
        assert_eq!(config.index.state_dir, ".ragnar");
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nope.toml");
        assert!(Config::load_from(None, None, Some(&missing)).is_err());
    }

    #[test]
    fn test_env_var_expansion() {
        std::env::set_var("RAGNAR_TEST_EMBED_KEY", "sk-test");
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("c.toml");
        std::fs::write(&file, "[embeddings]\napi_key = \"${RAGNAR_TEST_EMBED_KEY}\"\n").unwrap();
        let config = Config::load_from(None, None, Some(&file)).unwrap();
        assert_eq!(config.embeddings.api_key.as_deref(), Some("sk-test"));
        assert_eq!(config.embeddings_api_key().as_deref(), Some("sk-test"));
    }

    #[test]
    fn test_invalid_parallelism_is_rejected() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("c.toml");
        std::fs::write(&file, "[index]\nmax_parallel = 0\n").unwrap();
        assert!(matches!(
            Config::load_from(None, None, Some(&file)),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_paths() {
        let mut config = Config::default();
        let root = Path::new("/work/repo");
        assert_eq!(config.repo_root(root), root);
        assert_eq!(config.state_dir(root), Some(root.join(".ragnar")));
        config.index.persist = false;
        assert_eq!(config.state_dir(root), None);
        config.repo.path = Some("sub".to_string());
        assert_eq!(config.repo_root(root), root.join("sub"));
    }

    #[test]
    fn test_write_default_round_trips() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/config.toml");
        Config::write_default(&path, false).unwrap();
        assert!(matches!(
            Config::write_default(&path, false),
            Err(ConfigError::AlreadyExists(_))
        ));
        let loaded = Config::load_from(None, None, Some(&path)).unwrap();
        assert_eq!(loaded.index, IndexSettings::default());
    }
}
