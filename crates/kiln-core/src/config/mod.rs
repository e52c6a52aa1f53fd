//! # Kiln Core Launch Configuration
//!
//! [`LaunchConfig`] controls how [`Registry::launch_with`](crate::scheduler::Registry::launch_with)
//! drains the component graph and how large a
//! [`ResourcePool`](crate::resource_pool::ResourcePool) built from it may grow.
//! It can be written by hand or loaded from a JSON, YAML or TOML file; the
//! format is picked from the file extension.
pub mod error;

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::kernel::constants::{DEFAULT_IDLE_POLL_MS, MAX_WORKER_THREADS};
use crate::kernel::thread::{default_worker_capacity, hardware_concurrency};

pub use error::ConfigError;

/// Supported configuration file formats
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConfigFormat {
    /// JSON format (.json)
    Json,
    /// YAML format (.yaml, .yml) - requires "yaml-config" feature
    #[cfg(feature = "yaml-config")]
    Yaml,
    /// TOML format (.toml) - requires "toml-config" feature
    #[cfg(feature = "toml-config")]
    Toml,
}

impl ConfigFormat {
    /// Get the file extension for this format
    pub fn extension(&self) -> &'static str {
        match self {
            ConfigFormat::Json => "json",
            #[cfg(feature = "yaml-config")]
            ConfigFormat::Yaml => "yaml",
            #[cfg(feature = "toml-config")]
            ConfigFormat::Toml => "toml",
        }
    }

    /// Determine format from file extension
    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(|ext| match ext.to_lowercase().as_str() {
                "json" => Some(ConfigFormat::Json),
                #[cfg(feature = "yaml-config")]
                "yaml" | "yml" => Some(ConfigFormat::Yaml),
                #[cfg(feature = "toml-config")]
                "toml" => Some(ConfigFormat::Toml),
                _ => None,
            })
    }
}

/// How a launch drains the component graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LaunchConfig {
    /// Use worker threads; false runs everything on the designated thread
    pub parallel: bool,
    /// Worker thread count; defaults to hardware concurrency, capped at 8
    pub worker_threads: Option<usize>,
    /// Pool capacity; defaults to min(hardware concurrency, 8), capped at 8
    pub pool_capacity: Option<usize>,
    /// Longest an idle scheduler thread sleeps before re-scanning
    pub idle_poll_ms: u64,
}

impl Default for LaunchConfig {
    fn default() -> Self {
        Self {
            parallel: true,
            worker_threads: None,
            pool_capacity: None,
            idle_poll_ms: DEFAULT_IDLE_POLL_MS,
        }
    }
}

impl LaunchConfig {
    pub fn serial() -> Self {
        Self {
            parallel: false,
            ..Self::default()
        }
    }

    pub fn parallel() -> Self {
        Self::default()
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.worker_threads = Some(workers);
        self
    }

    pub fn with_pool_capacity(mut self, capacity: usize) -> Self {
        self.pool_capacity = Some(capacity);
        self
    }

    pub fn effective_worker_threads(&self) -> usize {
        self.worker_threads
            .unwrap_or_else(hardware_concurrency)
            .min(MAX_WORKER_THREADS)
    }

    pub fn effective_pool_capacity(&self) -> usize {
        self.pool_capacity
            .unwrap_or_else(default_worker_capacity)
            .min(MAX_WORKER_THREADS)
    }

    pub fn idle_poll(&self) -> Duration {
        Duration::from_millis(self.idle_poll_ms.max(1))
    }

    /// Reject values that would make a launch misbehave
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.idle_poll_ms == 0 {
            return Err(ConfigError::InvalidValue {
                key: "idle_poll_ms".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        if let Some(workers) = self.worker_threads {
            if workers > MAX_WORKER_THREADS {
                log::warn!(
                    "worker_threads = {} exceeds the cap of {}; clamping",
                    workers,
                    MAX_WORKER_THREADS
                );
            }
        }
        Ok(())
    }

    /// Serialize to string based on format
    pub fn serialize(&self, format: ConfigFormat) -> Result<String, ConfigError> {
        match format {
            ConfigFormat::Json => serde_json::to_string_pretty(self).map_err(|e| {
                ConfigError::SerializationError {
                    format: "JSON".to_string(),
                    source: Box::new(e),
                }
            }),
            #[cfg(feature = "yaml-config")]
            ConfigFormat::Yaml => {
                serde_yaml::to_string(self).map_err(|e| ConfigError::SerializationError {
                    format: "YAML".to_string(),
                    source: Box::new(e),
                })
            }
            #[cfg(feature = "toml-config")]
            ConfigFormat::Toml => {
                toml::to_string_pretty(self).map_err(|e| ConfigError::SerializationError {
                    format: "TOML".to_string(),
                    source: Box::new(e),
                })
            }
        }
    }

    /// Deserialize and validate from string based on format
    pub fn deserialize(data: &str, format: ConfigFormat) -> Result<Self, ConfigError> {
        let config: Self = match format {
            ConfigFormat::Json => {
                serde_json::from_str(data).map_err(|e| ConfigError::DeserializationError {
                    format: "JSON".to_string(),
                    source: Box::new(e),
                })?
            }
            #[cfg(feature = "yaml-config")]
            ConfigFormat::Yaml => {
                serde_yaml::from_str(data).map_err(|e| ConfigError::DeserializationError {
                    format: "YAML".to_string(),
                    source: Box::new(e),
                })?
            }
            #[cfg(feature = "toml-config")]
            ConfigFormat::Toml => {
                toml::from_str(data).map_err(|e| ConfigError::DeserializationError {
                    format: "TOML".to_string(),
                    source: Box::new(e),
                })?
            }
        };
        config.validate()?;
        Ok(config)
    }

    /// Load from a file, picking the format from its extension
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let format = ConfigFormat::from_path(path)
            .ok_or_else(|| ConfigError::UnsupportedConfigFormat(path.to_path_buf()))?;
        let data = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::io(e, "read_launch_config", path.to_path_buf()))?;
        let config = Self::deserialize(&data, format)?;
        log::info!("Loaded launch config from {}", path.display());
        Ok(config)
    }

    /// Write to a file, picking the format from its extension
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let format = ConfigFormat::from_path(path)
            .ok_or_else(|| ConfigError::UnsupportedConfigFormat(path.to_path_buf()))?;
        let data = self.serialize(format)?;
        std::fs::write(path, data)
            .map_err(|e| ConfigError::io(e, "write_launch_config", path.to_path_buf()))
    }
}
