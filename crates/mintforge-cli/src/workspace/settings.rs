use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use mintforge_generate::GenerateOptions;

use super::atomic::write_toml_atomic;
use super::{WorkspaceError, WorkspaceResult};

pub const SETTINGS_FILE: &str = "mintforge.toml";

/// Contents of `mintforge.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Items per engine batch.
    pub batch_size: u64,
    /// Local directory backing the blob store.
    pub blob_root: PathBuf,
    /// Public URL prefix of uploaded composites.
    pub public_base_url: String,
    pub generate: GenerateOptions,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            batch_size: 100,
            blob_root: PathBuf::from("assets"),
            public_base_url: "http://localhost:8080/assets".to_string(),
            generate: GenerateOptions::default(),
        }
    }
}

impl Settings {
    pub fn validate(&self) -> WorkspaceResult<()> {
        if self.batch_size == 0 {
            return Err(WorkspaceError::Invalid(
                "batch_size must be at least 1".to_string(),
            ));
        }
        if self.generate.max_draw_attempts == 0 {
            return Err(WorkspaceError::Invalid(
                "generate.max_draw_attempts must be at least 1".to_string(),
            ));
        }
        if self.generate.rarity_precision > 9 {
            return Err(WorkspaceError::Invalid(
                "generate.rarity_precision must be at most 9".to_string(),
            ));
        }
        Ok(())
    }
}

pub fn load_or_create_settings(path: &Path) -> WorkspaceResult<Settings> {
    if path.exists() {
        let content = std::fs::read_to_string(path)?;
        let settings: Settings = toml::from_str(&content)?;
        settings.validate()?;
        return Ok(settings);
    }

    let settings = Settings::default();
    save_settings(path, &settings)?;
    Ok(settings)
}

pub fn save_settings(path: &Path, settings: &Settings) -> WorkspaceResult<()> {
    write_toml_atomic(path, settings)
}
