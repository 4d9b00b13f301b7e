use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{Result, TallyError};
use crate::models::PartyType;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub data_dir: String,
    /// Recorded as `created_by` on imported transactions.
    #[serde(default)]
    pub user_name: String,
    /// Extra first-cell words that mark a pasted header line.
    #[serde(default)]
    pub header_keywords: Vec<String>,
    #[serde(default = "default_party_type")]
    pub default_party_type: String,
}

fn default_party_type() -> String {
    PartyType::Vendor.as_str().to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir().to_string_lossy().to_string(),
            user_name: String::new(),
            header_keywords: Vec::new(),
            default_party_type: default_party_type(),
        }
    }
}

impl Settings {
    /// Party type for names created by an import. Unknown values fall
    /// back to vendor.
    pub fn party_type(&self) -> PartyType {
        PartyType::parse(&self.default_party_type).unwrap_or_else(|| {
            warn!(value = %self.default_party_type, "unknown default_party_type, using vendor");
            PartyType::Vendor
        })
    }

    /// Name recorded on imported rows when none is given.
    pub fn actor(&self) -> String {
        if self.user_name.trim().is_empty() {
            std::env::var("USER").unwrap_or_else(|_| "unknown".to_string())
        } else {
            self.user_name.trim().to_string()
        }
    }

    pub fn db_path(&self) -> PathBuf {
        PathBuf::from(&self.data_dir).join("tally.db")
    }
}

fn config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("tally")
}

fn settings_path() -> PathBuf {
    config_dir().join("settings.json")
}

fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("Documents")
        .join("tally")
}

fn load_from(path: &Path) -> Settings {
    match std::fs::read_to_string(path) {
        Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
            warn!(path = %path.display(), error = %e, "unreadable settings, using defaults");
            Settings::default()
        }),
        Err(_) => Settings::default(),
    }
}

fn save_to(path: &Path, settings: &Settings) -> Result<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    let json = serde_json::to_string_pretty(settings)
        .map_err(|e| TallyError::Settings(e.to_string()))?;
    std::fs::write(path, format!("{json}\n"))?;
    Ok(())
}

pub fn load_settings() -> Settings {
    load_from(&settings_path())
}

pub fn save_settings(settings: &Settings) -> Result<()> {
    save_to(&settings_path(), settings)
}

pub fn settings_file_exists() -> bool {
    settings_path().exists()
}

pub fn shellexpand_path(path: &str) -> String {
    if path.starts_with('~') {
        if let Some(home) = dirs::home_dir() {
            return path.replacen('~', &home.to_string_lossy(), 1);
        }
    }
    std::fs::canonicalize(path)
        .unwrap_or_else(|_| PathBuf::from(path))
        .to_string_lossy()
        .to_string()
}
