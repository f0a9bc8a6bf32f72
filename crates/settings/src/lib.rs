use anyhow::{Context, Result};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};

pub fn app_data_dir() -> PathBuf {
    let base = dirs::data_local_dir().unwrap_or_else(|| std::env::temp_dir());
    base.join("velqis")
}

/// Default location of the settings document.
pub fn default_settings_path() -> PathBuf {
    app_data_dir().join("settings.json")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    Dark,
    Light,
}

impl std::fmt::Display for Theme {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Dark => write!(f, "dark"),
            Self::Light => write!(f, "light"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DefaultModels {
    pub video: String,
    pub image: String,
    pub music: String,
}

impl Default for DefaultModels {
    fn default() -> Self {
        Self {
            video: "velqis".to_string(),
            image: "flux".to_string(),
            music: "velqis".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DefaultResolutions {
    pub video: String,
    pub image: String,
}

impl Default for DefaultResolutions {
    fn default() -> Self {
        Self {
            video: "1080p".to_string(),
            image: "Square".to_string(),
        }
    }
}

/// Typed view over the settings document. Missing keys fall back to the
/// defaults below, so documents written by older versions keep loading.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub api_endpoint: String,
    pub api_key: String,
    pub output_dir: PathBuf,
    pub max_concurrent: usize,
    pub auto_open: bool,
    pub save_history: bool,
    pub theme: Theme,
    pub default_models: DefaultModels,
    pub default_resolutions: DefaultResolutions,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_endpoint: "https://api.velqis.ai/v1".to_string(),
            api_key: String::new(),
            output_dir: PathBuf::from("./downloads"),
            max_concurrent: 3,
            auto_open: false,
            save_history: true,
            theme: Theme::Dark,
            default_models: DefaultModels::default(),
            default_resolutions: DefaultResolutions::default(),
        }
    }
}

/// Key-value settings store persisted as a single JSON document.
///
/// Reads are served from memory; every `set` rewrites the document before
/// returning. Single-process access, last write wins.
pub struct SettingsStore {
    path: PathBuf,
    values: Mutex<Map<String, Value>>,
}

impl SettingsStore {
    pub fn open(path: &Path) -> Result<Self> {
        let values = match fs::read_to_string(path) {
            Ok(raw) => serde_json::from_str::<Value>(&raw)
                .ok()
                .and_then(|v| v.as_object().cloned())
                .unwrap_or_default(),
            Err(_) => Map::new(),
        };
        Ok(Self {
            path: path.to_path_buf(),
            values: Mutex::new(values),
        })
    }

    pub fn open_default() -> Result<Self> {
        Self::open(&default_settings_path())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Fetch a single key, falling back to `default` when the key is absent
    /// or does not deserialize as `T`.
    pub fn get<T: DeserializeOwned>(&self, key: &str, default: T) -> T {
        let values = self.values.lock();
        values
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or(default)
    }

    /// Write a single key and persist the document before returning.
    pub fn set<T: Serialize>(&self, key: &str, value: T) -> Result<()> {
        let mut values = self.values.lock();
        values.insert(key.to_string(), serde_json::to_value(value)?);
        persist(&self.path, &values)
    }

    /// Typed snapshot of the whole document.
    pub fn settings(&self) -> Settings {
        let values = self.values.lock();
        serde_json::from_value(Value::Object(values.clone())).unwrap_or_default()
    }

    /// Replace the whole document with a typed value and persist.
    pub fn replace(&self, settings: &Settings) -> Result<()> {
        let mut values = self.values.lock();
        match serde_json::to_value(settings)? {
            Value::Object(map) => *values = map,
            _ => unreachable!("Settings serializes to an object"),
        }
        persist(&self.path, &values)
    }
}

fn persist(path: &Path, values: &Map<String, Value>) -> Result<()> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
    }
    let json = serde_json::to_string_pretty(&Value::Object(values.clone()))?;
    fs::write(path, json).with_context(|| format!("write settings to {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let s = Settings::default();
        assert_eq!(s.api_endpoint, "https://api.velqis.ai/v1");
        assert_eq!(s.max_concurrent, 3);
        assert_eq!(s.theme, Theme::Dark);
        assert_eq!(s.default_models.image, "flux");
        assert!(s.save_history);
    }

    #[test]
    fn test_get_set_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = SettingsStore::open(&dir.path().join("settings.json")).unwrap();

        assert_eq!(store.get("max_concurrent", 3usize), 3);
        store.set("max_concurrent", 5usize).unwrap();
        assert_eq!(store.get("max_concurrent", 3usize), 5);
        assert_eq!(store.settings().max_concurrent, 5);
    }

    #[test]
    fn test_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");

        {
            let store = SettingsStore::open(&path).unwrap();
            store.set("api_key", "sk-test").unwrap();
            store.set("theme", Theme::Light).unwrap();
        }

        let store = SettingsStore::open(&path).unwrap();
        assert_eq!(store.get("api_key", String::new()), "sk-test");
        assert_eq!(store.settings().theme, Theme::Light);
    }

    #[test]
    fn test_partial_document_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, r#"{"api_key": "sk-partial"}"#).unwrap();

        let store = SettingsStore::open(&path).unwrap();
        let s = store.settings();
        assert_eq!(s.api_key, "sk-partial");
        assert_eq!(s.max_concurrent, 3);
        assert_eq!(s.default_resolutions.video, "1080p");
    }

    #[test]
    fn test_corrupt_document_resets() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, "not json").unwrap();

        let store = SettingsStore::open(&path).unwrap();
        assert_eq!(store.settings().max_concurrent, 3);
    }

    #[test]
    fn test_replace_whole_document() {
        let dir = tempfile::tempdir().unwrap();
        let store = SettingsStore::open(&dir.path().join("settings.json")).unwrap();

        let mut s = Settings::default();
        s.api_key = "sk-replaced".to_string();
        s.max_concurrent = 1;
        store.replace(&s).unwrap();

        assert_eq!(store.get("api_key", String::new()), "sk-replaced");
        assert_eq!(store.settings().max_concurrent, 1);
    }
}
