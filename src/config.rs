use anyhow::{Context, Result};
use arena_advisor::RatingConfig;
use arena_state::{CaptureTiming, DetectionConfig};
use arena_vision::LocatorConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

/// Environment variable naming the config file
pub const CONFIG_ENV: &str = "ARENA_DRAFT_CONFIG";

/// Config file looked up in the working directory when the variable is unset
pub const DEFAULT_CONFIG_FILE: &str = "arena-draft.toml";

/// Top-level configuration. Every field has a default, so a missing file or a
/// partial one is fine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Directory holding cards.json and the tier tables
    pub data_dir: PathBuf,
    /// Card and hero art cache, one `CODE.png` / `CODE_premium.png` per identity
    pub art_dir: PathBuf,
    /// Piece of draft screen chrome the locator searches for
    pub anchor_template: PathBuf,
    pub detection: DetectionConfig,
    pub timing: CaptureTiming,
    pub locator: LocatorConfig,
    pub rating: RatingConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            art_dir: PathBuf::from("data/art"),
            anchor_template: PathBuf::from("data/draft_anchor.png"),
            detection: DetectionConfig::default(),
            timing: CaptureTiming::default(),
            locator: LocatorConfig::default(),
            rating: RatingConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load from `$ARENA_DRAFT_CONFIG`, else `./arena-draft.toml`, else defaults
    pub fn load() -> Result<Self> {
        let path = std::env::var_os(CONFIG_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        info!("Loaded config from {}", path.display());
        Ok(config)
    }
}
