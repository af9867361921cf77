//! Configuration for an Arbor workspace.
//!
//! Every field has a serde default, so an empty file (or no file at all) gives
//! the stock cache budgets.

mod logging;

use std::path::{Path, PathBuf};
use std::time::Duration;

use arbor_archive::ValidityCache;
use arbor_model::{InfoCacheConfig, ModelConfig};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use logging::{init_tracing, LoggingConfig};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSection {
    /// Projects, roots and packages.
    #[serde(default = "ModelSection::default_container_slots")]
    pub container_slots: usize,

    /// Compilation units and class files.
    #[serde(default = "ModelSection::default_source_slots")]
    pub source_slots: usize,

    /// Types, methods, fields and other members.
    #[serde(default = "ModelSection::default_member_slots")]
    pub member_slots: usize,

    #[serde(default = "ModelSection::default_buffer_slots")]
    pub buffer_slots: usize,
}

impl ModelSection {
    fn default_container_slots() -> usize {
        InfoCacheConfig::DEFAULT_CONTAINER_SLOTS
    }

    fn default_source_slots() -> usize {
        InfoCacheConfig::DEFAULT_SOURCE_SLOTS
    }

    fn default_member_slots() -> usize {
        InfoCacheConfig::DEFAULT_MEMBER_SLOTS
    }

    fn default_buffer_slots() -> usize {
        arbor_model::BufferCache::DEFAULT_CAPACITY
    }
}

impl Default for ModelSection {
    fn default() -> Self {
        Self {
            container_slots: Self::default_container_slots(),
            source_slots: Self::default_source_slots(),
            member_slots: Self::default_member_slots(),
            buffer_slots: Self::default_buffer_slots(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchivesSection {
    /// How long an archive's open/failed outcome is trusted before checking again.
    #[serde(default = "ArchivesSection::default_validity_ttl_ms")]
    pub validity_ttl_ms: u64,
}

impl ArchivesSection {
    fn default_validity_ttl_ms() -> u64 {
        ValidityCache::DEFAULT_TTL.as_millis() as u64
    }
}

impl Default for ArchivesSection {
    fn default() -> Self {
        Self {
            validity_ttl_ms: Self::default_validity_ttl_ms(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSection {
    /// Upper bound on how long a reader waiting for a scan takes to notice
    /// cancellation.
    #[serde(default = "IndexSection::default_wait_poll_ms")]
    pub wait_poll_ms: u64,
}

impl IndexSection {
    fn default_wait_poll_ms() -> u64 {
        50
    }
}

impl Default for IndexSection {
    fn default() -> Self {
        Self {
            wait_poll_ms: Self::default_wait_poll_ms(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClasspathSection {
    /// Directory holding state carried across sessions. Without it nothing
    /// is persisted.
    #[serde(default)]
    pub state_dir: Option<PathBuf>,

    #[serde(default = "ClasspathSection::default_snapshot_file")]
    pub snapshot_file: String,
}

impl ClasspathSection {
    fn default_snapshot_file() -> String {
        arbor_classpath::SNAPSHOT_FILE_NAME.to_owned()
    }

    pub fn snapshot_path(&self) -> Option<PathBuf> {
        self.state_dir
            .as_ref()
            .map(|dir| dir.join(&self.snapshot_file))
    }
}

impl Default for ClasspathSection {
    fn default() -> Self {
        Self {
            state_dir: None,
            snapshot_file: Self::default_snapshot_file(),
        }
    }
}

/// Top-level `arbor.toml`.
///
/// ```toml
/// [model]
/// container_slots = 500
/// source_slots = 60
/// member_slots = 1200
/// buffer_slots = 60
///
/// [archives]
/// validity_ttl_ms = 120000
///
/// [index]
/// wait_poll_ms = 50
///
/// [classpath]
/// state_dir = ".arbor"
///
/// [logging]
/// level = "info"
/// ```
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ArborConfig {
    #[serde(default)]
    pub model: ModelSection,

    #[serde(default)]
    pub archives: ArchivesSection,

    #[serde(default)]
    pub index: IndexSection,

    #[serde(default)]
    pub classpath: ClasspathSection,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse toml config: {0}")]
    Toml(String),
}

impl From<toml::de::Error> for ConfigError {
    fn from(err: toml::de::Error) -> Self {
        // `Display` embeds a snippet of the input; the message alone is enough.
        ConfigError::Toml(err.message().to_owned())
    }
}

impl ArborConfig {
    /// Load a config file from TOML.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config = Self::load_from_str(&text)?;
        tracing::debug!(target = "arbor.config", path = %path.display(), "loaded config");
        Ok(config)
    }

    pub fn load_from_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Cache budgets for the model manager. Every budget is at least one slot.
    pub fn model_config(&self) -> ModelConfig {
        ModelConfig {
            info: InfoCacheConfig {
                container_slots: self.model.container_slots.max(1),
                source_slots: self.model.source_slots.max(1),
                member_slots: self.model.member_slots.max(1),
            },
            buffer_slots: self.model.buffer_slots.max(1),
        }
    }

    pub fn archive_ttl(&self) -> Duration {
        Duration::from_millis(self.archives.validity_ttl_ms)
    }

    pub fn index_poll_interval(&self) -> Duration {
        Duration::from_millis(self.index.wait_poll_ms.max(1))
    }

    pub fn snapshot_path(&self) -> Option<PathBuf> {
        self.classpath.snapshot_path()
    }
}
