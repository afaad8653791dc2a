//! Persisted user preferences, stored as a JSON file.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    pub last_save_path: String,
    pub last_output_folder: String,
    pub download_assets_by_default: bool,
    pub collapse_shared_assets_by_default: bool,
    pub reposition_objects_by_default: bool,
    pub keep_environment_by_default: bool,
    pub max_concurrency: usize,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            last_save_path: String::new(),
            last_output_folder: String::new(),
            download_assets_by_default: true,
            collapse_shared_assets_by_default: true,
            reposition_objects_by_default: false,
            keep_environment_by_default: true,
            max_concurrency: 8,
        }
    }
}

/// Loads and saves [`AppSettings`] at a fixed path. A missing or
/// unreadable settings file falls back to defaults rather than failing
/// startup.
pub struct SettingsStore {
    path: PathBuf,
    current: AppSettings,
}

impl SettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            current: AppSettings::default(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn current(&self) -> &AppSettings {
        &self.current
    }

    pub fn current_mut(&mut self) -> &mut AppSettings {
        &mut self.current
    }

    pub async fn load(&mut self) -> std::io::Result<&AppSettings> {
        match fs::read_to_string(&self.path).await {
            Ok(text) => match serde_json::from_str(&text) {
                Ok(settings) => {
                    debug!(path = %self.path.display(), "loaded settings");
                    self.current = settings;
                }
                Err(e) => {
                    warn!(path = %self.path.display(), error = %e, "settings file unreadable, using defaults");
                    self.current = AppSettings::default();
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                self.current = AppSettings::default();
            }
            Err(e) => return Err(e),
        }
        Ok(&self.current)
    }

    pub async fn save(&self) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }
        let json =
            serde_json::to_string_pretty(&self.current).map_err(std::io::Error::other)?;
        fs::write(&self.path, json).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = SettingsStore::new(dir.path().join("settings.json"));
        let settings = store.load().await.unwrap();
        assert_eq!(*settings, AppSettings::default());
    }

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");

        let mut store = SettingsStore::new(&path);
        store.current_mut().last_save_path = "/saves/TS_Save_1.json".to_string();
        store.current_mut().max_concurrency = 3;
        store.save().await.unwrap();

        let mut reloaded = SettingsStore::new(&path);
        let settings = reloaded.load().await.unwrap();
        assert_eq!(settings.last_save_path, "/saves/TS_Save_1.json");
        assert_eq!(settings.max_concurrency, 3);
        assert!(settings.collapse_shared_assets_by_default);
    }

    #[tokio::test]
    async fn corrupt_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        tokio::fs::write(&path, "{not json").await.unwrap();

        let mut store = SettingsStore::new(&path);
        let settings = store.load().await.unwrap();
        assert_eq!(*settings, AppSettings::default());
    }
}
