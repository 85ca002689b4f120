use std::{
    fs,
    path::{Path, PathBuf},
    sync::Mutex,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::filter::DEFAULT_RADIUS_OPTIONS;
use crate::models::ZipCode;
use crate::normalize::DEFAULT_INSTRUMENTS;
use crate::repository::AppwriteSettings;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("config parse error: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("config lock poisoned")]
    Poisoned,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub appwrite_endpoint: Option<String>,
    pub appwrite_project_id: Option<String>,
    pub appwrite_api_key: Option<String>,
    pub appwrite_database_id: Option<String>,
    pub appwrite_collection_id: Option<String>,
    pub home_zip: Option<ZipCode>,
    pub default_radius_miles: Option<u32>,
    pub radius_options: Vec<u32>,
    pub instrument_vocabulary: Vec<String>,
    pub open_gigs_only: bool,
    pub centroids_path: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            appwrite_endpoint: None,
            appwrite_project_id: None,
            appwrite_api_key: None,
            appwrite_database_id: None,
            appwrite_collection_id: None,
            home_zip: None,
            default_radius_miles: Some(10),
            radius_options: DEFAULT_RADIUS_OPTIONS.to_vec(),
            instrument_vocabulary: DEFAULT_INSTRUMENTS.iter().map(|s| s.to_string()).collect(),
            open_gigs_only: true,
            centroids_path: None,
        }
    }
}

impl AppConfig {
    /// Applies `GIG_FINDER_*` environment overrides on top of file values.
    pub fn with_env_overrides(mut self) -> Self {
        let var = |name: &str| {
            std::env::var(name)
                .ok()
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        if let Some(endpoint) = var("GIG_FINDER_ENDPOINT") {
            self.appwrite_endpoint = Some(endpoint);
        }
        if let Some(project) = var("GIG_FINDER_PROJECT") {
            self.appwrite_project_id = Some(project);
        }
        if let Some(key) = var("GIG_FINDER_API_KEY") {
            self.appwrite_api_key = Some(key);
        }
        if let Some(database) = var("GIG_FINDER_DATABASE") {
            self.appwrite_database_id = Some(database);
        }
        if let Some(collection) = var("GIG_FINDER_COLLECTION") {
            self.appwrite_collection_id = Some(collection);
        }
        if let Some(zip) = var("GIG_FINDER_HOME_ZIP") {
            match ZipCode::parse(&zip) {
                Some(zip) => self.home_zip = Some(zip),
                None => warn!(value = %zip, "ignoring invalid GIG_FINDER_HOME_ZIP"),
            }
        }
        if let Some(path) = var("GIG_FINDER_CENTROIDS") {
            self.centroids_path = Some(PathBuf::from(path));
        }
        self
    }

    /// Default radius if it is one of the offered options.
    pub fn initial_radius(&self) -> Option<u32> {
        self.default_radius_miles
            .filter(|radius| self.radius_options.contains(radius))
    }

    pub fn appwrite_settings(&self) -> Option<AppwriteSettings> {
        Some(AppwriteSettings {
            endpoint: self.appwrite_endpoint.clone()?,
            project_id: self.appwrite_project_id.clone()?,
            api_key: self.appwrite_api_key.clone(),
            database_id: self.appwrite_database_id.clone()?,
            collection_id: self.appwrite_collection_id.clone()?,
        })
    }
}

/// Directory holding the config file and the gig cache.
/// `GIG_FINDER_DATA_DIR` wins over the platform data directory.
pub fn data_root() -> PathBuf {
    resolve_data_root(
        std::env::var_os("GIG_FINDER_DATA_DIR").map(PathBuf::from),
        dirs::data_dir(),
    )
}

fn resolve_data_root(explicit: Option<PathBuf>, platform: Option<PathBuf>) -> PathBuf {
    match explicit.filter(|dir| !dir.as_os_str().is_empty()) {
        Some(dir) => dir,
        None => platform
            .unwrap_or_else(|| PathBuf::from("."))
            .join("gig-finder"),
    }
}

/// `name` under [`data_root`], creating the directory if needed.
pub(crate) fn data_path(name: &str) -> PathBuf {
    let root = data_root();
    if let Err(err) = fs::create_dir_all(&root) {
        warn!("failed to create data dir {:?}: {err}", root);
    }
    root.join(name)
}

pub struct ConfigStore {
    path: PathBuf,
    data: Mutex<AppConfig>,
}

impl ConfigStore {
    pub fn load() -> Self {
        Self::load_from(data_path("config.json"))
    }

    pub fn load_from(path: PathBuf) -> Self {
        let data = read_config(&path).unwrap_or_else(|err| {
            warn!("unreadable config at {:?}, using defaults: {err}", path);
            AppConfig::default()
        });
        Self {
            path,
            data: Mutex::new(data),
        }
    }

    pub fn read(&self) -> AppConfig {
        match self.data.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn update<F>(&self, transform: F) -> Result<AppConfig, ConfigError>
    where
        F: FnOnce(&mut AppConfig),
    {
        let mut guard = self.data.lock().map_err(|_| ConfigError::Poisoned)?;
        transform(&mut guard);
        write_config(&self.path, &guard)?;
        Ok(guard.clone())
    }
}

fn read_config(path: &Path) -> Result<AppConfig, ConfigError> {
    if !path.exists() {
        return Ok(AppConfig::default());
    }
    let contents = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&contents)?)
}

fn write_config(path: &Path, config: &AppConfig) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let contents = serde_json::to_string_pretty(config)?;
    fs::write(path, contents)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_path(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("gig-finder-test-{}", std::process::id()))
            .join(name)
    }

    #[test]
    fn missing_file_yields_defaults() {
        let store = ConfigStore::load_from(scratch_path("absent/config.json"));
        let config = store.read();
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.initial_radius(), Some(10));
        assert!(config.appwrite_settings().is_none());
    }

    #[test]
    fn partial_file_fills_defaults_and_updates_persist() {
        let path = scratch_path("partial/config.json");
        fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        fs::write(&path, r#"{ "home_zip": "12180", "radius_options": [5, 25] }"#).expect("write");

        let store = ConfigStore::load_from(path.clone());
        let config = store.read();
        assert_eq!(config.home_zip, ZipCode::parse("12180"));
        assert!(config.open_gigs_only);
        assert_eq!(config.initial_radius(), None, "10 mi is no longer offered");

        store
            .update(|config| config.default_radius_miles = Some(25))
            .expect("update");
        let reloaded = ConfigStore::load_from(path);
        assert_eq!(reloaded.read().initial_radius(), Some(25));
    }

    #[test]
    fn data_dir_override_beats_platform_dir() {
        let platform = Some(PathBuf::from("/home/me/.local/share"));
        assert_eq!(
            resolve_data_root(Some(PathBuf::from("/srv/gigs")), platform.clone()),
            PathBuf::from("/srv/gigs")
        );
        assert_eq!(
            resolve_data_root(Some(PathBuf::new()), platform.clone()),
            PathBuf::from("/home/me/.local/share/gig-finder")
        );
        assert_eq!(resolve_data_root(None, None), PathBuf::from("./gig-finder"));
    }

    #[test]
    fn update_creates_missing_directories() {
        let path = scratch_path("nested/deeper/config.json");
        let store = ConfigStore::load_from(path.clone());
        store.update(|config| config.open_gigs_only = false).expect("update");
        assert!(path.exists());
        assert!(!ConfigStore::load_from(path).read().open_gigs_only);
    }
}
