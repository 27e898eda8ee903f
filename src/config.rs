//! Engine configuration (spec §9 "Global configuration replaced by an
//! explicit `EngineConfig` value").
//!
//! Layers compiled defaults, an optional on-disk RON file located via
//! [`directories::ProjectDirs`] (mirroring the original crate's cache-dir
//! lookup in `main.rs`), and CLI overrides applied last.

use crate::basis::inventory::Policy;
use crate::errors::ConfigError;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

fn default_tax_currency() -> String {
    "USD".to_string()
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("./output")
}

/// Explicit, threadable configuration value (spec §9); no process-wide
/// mutable state is used in the core.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct EngineConfig {
    pub method: Policy,
    pub tax_currency: String,
    pub strict_mode: bool,
    pub oracle_base_url: Option<String>,
    pub classifier_threshold: f64,
    pub output_dir: PathBuf,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            method: Policy::Fifo,
            tax_currency: default_tax_currency(),
            strict_mode: false,
            oracle_base_url: None,
            classifier_threshold: 0.8,
            output_dir: default_output_dir(),
        }
    }
}

impl Serialize for Policy {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(match self {
            Policy::Fifo => "fifo",
            Policy::Lifo => "lifo",
            Policy::Hifo => "hifo",
        })
    }
}

impl<'de> Deserialize<'de> for Policy {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        match raw.to_lowercase().as_str() {
            "fifo" => Ok(Policy::Fifo),
            "lifo" => Ok(Policy::Lifo),
            "hifo" => Ok(Policy::Hifo),
            other => Err(serde::de::Error::custom(format!("unknown disposal policy '{other}'"))),
        }
    }
}

impl EngineConfig {
    /// Locates the on-disk config path under the platform's config
    /// directory (`~/.config/cryptotax/config.ron` on Linux), if any.
    pub fn default_config_path() -> Option<PathBuf> {
        ProjectDirs::from("design.contract", "DCD", "cryptotax")
            .map(|dirs| dirs.config_dir().join("config.ron"))
    }

    /// Loads the on-disk config if `path` exists; otherwise returns
    /// compiled defaults. A missing file is not an error; a malformed one
    /// is.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(text) => ron::from_str(&text).map_err(|source| ConfigError::Parse {
                path: path.display().to_string(),
                source,
            }),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(err) => Err(ConfigError::Io(err)),
        }
    }

    /// Loads from [`Self::default_config_path`] when present, else defaults.
    pub fn load_default() -> Result<Self, ConfigError> {
        match Self::default_config_path() {
            Some(path) => Self::load(&path),
            None => Ok(Self::default()),
        }
    }
}
