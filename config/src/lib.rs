//! Resource-bound and container configuration for the execution engine.
//!
//! Loaded once at startup from a TOML file (or defaults, if none is found)
//! and handed to the executor façade as plain data; the engine itself never
//! reads environment or disk beyond what this crate resolves.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crucible_types::TraceMode;
use serde::{Deserialize, Serialize};

/// Resource bounds and container defaults for one engine instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub max_operations: u64,
    pub trace_mode: TraceMode,
    pub max_output_length: usize,
    pub container: ContainerConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_operations: 10_000,
            trace_mode: TraceMode::Call,
            max_output_length: 64 * 1024,
            container: ContainerConfig::default(),
        }
    }
}

/// Container strategy defaults, overridable per language by image name.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerConfig {
    pub memory_mb: u32,
    pub cpu_quota_micros: u32,
    pub pids_limit: u32,
    pub timeout_secs: u64,
    pub images: BTreeMap<String, String>,
}

impl ContainerConfig {
    /// Resolve the image for `language`, falling back to `default` if unset.
    #[must_use]
    pub fn image_for<'a>(&'a self, language: &str, default: &'a str) -> &'a str {
        self.images.get(language).map_or(default, String::as_str)
    }
}

impl Default for ContainerConfig {
    fn default() -> Self {
        let mut images = BTreeMap::new();
        images.insert("python".to_string(), "python:3.12-slim".to_string());
        images.insert("javascript".to_string(), "node:22-slim".to_string());
        images.insert("typescript".to_string(), "node:22-slim".to_string());
        Self {
            memory_mb: 256,
            cpu_quota_micros: 100_000,
            pids_limit: 32,
            timeout_secs: 10,
            images,
        }
    }
}

/// Error loading or parsing an [`EngineConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

impl EngineConfig {
    /// Load config from `path`, falling back to defaults if the file does not exist.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no engine config file found, using defaults");
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Default config file location: `$XDG_CONFIG_HOME/crucible/config.toml` or platform equivalent.
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("crucible").join("config.toml"))
    }

    /// Resolve the image for `language`, falling back to `default` if unset.
    #[must_use]
    pub fn image_for<'a>(&'a self, language: &str, default: &'a str) -> &'a str {
        self.container
            .images
            .get(language)
            .map_or(default, String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_sane_bounds() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.max_operations, 10_000);
        assert_eq!(cfg.trace_mode, TraceMode::Call);
        assert!(cfg.max_output_length > 0);
    }

    #[test]
    fn load_missing_file_returns_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = EngineConfig::load(&dir.path().join("missing.toml")).unwrap();
        assert_eq!(cfg.max_operations, EngineConfig::default().max_operations);
    }

    #[test]
    fn load_parses_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "max_operations = 500\ntrace_mode = \"line\"\n").unwrap();
        let cfg = EngineConfig::load(&path).unwrap();
        assert_eq!(cfg.max_operations, 500);
        assert_eq!(cfg.trace_mode, TraceMode::Line);
    }

    #[test]
    fn image_for_falls_back_to_default() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.image_for("python", "fallback"), "python:3.12-slim");
        assert_eq!(cfg.image_for("ruby", "fallback"), "fallback");
    }
}
