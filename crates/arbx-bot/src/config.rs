//! Application configuration.

use std::collections::HashSet;
use std::path::Path;

use arbx_core::VenueId;
use arbx_executor::EngineConfig;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};

/// One in-memory paper venue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaperVenueConfig {
    pub name: String,
    /// Deliver order updates over push. `false` makes the venue pull only.
    #[serde(default = "default_push")]
    pub push: bool,
}

fn default_push() -> bool {
    true
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Log filter used when `RUST_LOG` is unset.
    #[serde(default)]
    pub log_filter: Option<String>,
    /// Capacity of the engine event channel. Default: 256.
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub venues: Vec<PaperVenueConfig>,
}

fn default_event_buffer() -> usize {
    256
}

impl AppConfig {
    /// Load from a specific file.
    pub fn from_file(path: impl AsRef<Path>) -> AppResult<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| AppError::Config(format!("Failed to read config: {e}")))?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate TOML text.
    pub fn from_toml_str(content: &str) -> AppResult<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| AppError::Config(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> AppResult<()> {
        self.engine.validate()?;
        if self.venues.len() < 2 {
            return Err(AppError::Config(
                "At least two venues are required".to_string(),
            ));
        }
        if self.event_buffer == 0 {
            return Err(AppError::Config("event_buffer must be positive".to_string()));
        }
        let mut seen = HashSet::new();
        for venue in &self.venues {
            let id = VenueId::new(&venue.name);
            if id.as_str().is_empty() {
                return Err(AppError::Config("Venue name must not be empty".to_string()));
            }
            if !seen.insert(id) {
                return Err(AppError::Config(format!(
                    "Duplicate venue: {}",
                    venue.name
                )));
            }
        }
        Ok(())
    }
}
