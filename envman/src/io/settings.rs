//! Application settings merged over built-in defaults.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::error::StoreError;
use crate::io::kv::KeyValueStore;
use crate::io::persist::Persisted;

/// Key shared with the existing desktop plugin, so its saved settings load as-is.
pub const SETTINGS_KEY: &str = "utools-plugin-template-settings";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    Light,
    Dark,
    #[default]
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LayoutMode {
    #[default]
    Card,
    Table,
}

impl FromStr for Theme {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "light" => Ok(Theme::Light),
            "dark" => Ok(Theme::Dark),
            "system" => Ok(Theme::System),
            other => Err(format!("unknown theme {other:?} (expected light, dark or system)")),
        }
    }
}

impl FromStr for LayoutMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "card" => Ok(LayoutMode::Card),
            "table" => Ok(LayoutMode::Table),
            other => Err(format!("unknown layout mode {other:?} (expected card or table)")),
        }
    }
}

impl fmt::Display for Theme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Theme::Light => "light",
            Theme::Dark => "dark",
            Theme::System => "system",
        })
    }
}

impl fmt::Display for LayoutMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LayoutMode::Card => "card",
            LayoutMode::Table => "table",
        })
    }
}

/// Flat settings record. Keys this version does not know are kept in `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    pub theme: Theme,
    /// Mask values of variables whose names match `sensitive_keywords`.
    pub sensitive_fields_enabled: bool,
    pub sensitive_keywords: Vec<String>,
    pub layout_mode: LayoutMode,
    /// Target directory for snapshot exports; empty means "ask".
    pub export_path: String,
    pub auto_open_folder: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            theme: Theme::System,
            sensitive_fields_enabled: true,
            sensitive_keywords: [
                "password",
                "passwd",
                "pwd",
                "secret",
                "token",
                "credential",
                "private",
                "api_key",
                "apikey",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            layout_mode: LayoutMode::Card,
            export_path: String::new(),
            auto_open_folder: true,
            extra: Map::new(),
        }
    }
}

impl Settings {
    /// Whether `name` should be masked: case-insensitive substring match.
    pub fn is_sensitive(&self, name: &str) -> bool {
        if !self.sensitive_fields_enabled {
            return false;
        }
        let name = name.to_lowercase();
        self.sensitive_keywords
            .iter()
            .map(|keyword| keyword.trim().to_lowercase())
            .any(|keyword| !keyword.is_empty() && name.contains(&keyword))
    }
}

/// Overlay `saved` onto the defaults key by key.
///
/// A saved value of the wrong type for a known key is ignored and the
/// default kept; unknown keys are preserved.
pub fn merge_over_defaults(saved: &Map<String, Value>) -> Settings {
    let mut merged = match serde_json::to_value(Settings::default()) {
        Ok(Value::Object(map)) => map,
        _ => return Settings::default(),
    };
    for (key, value) in saved {
        let mut candidate = merged.clone();
        candidate.insert(key.clone(), value.clone());
        if serde_json::from_value::<Settings>(Value::Object(candidate.clone())).is_ok() {
            merged = candidate;
        } else {
            warn!(key = %key, "ignoring saved setting with unexpected type");
        }
    }
    serde_json::from_value(Value::Object(merged)).unwrap_or_default()
}

pub struct SettingsStore<S> {
    store: Persisted<S, Settings>,
}

impl<S: KeyValueStore> SettingsStore<S> {
    pub fn load(kv: S) -> Result<Self, StoreError> {
        let settings = read_settings(&kv)?;
        Ok(Self {
            store: Persisted::new(kv, SETTINGS_KEY, settings),
        })
    }

    pub fn settings(&self) -> &Settings {
        self.store.state()
    }

    pub fn theme(&self) -> Theme {
        self.settings().theme
    }

    pub fn set_theme(&mut self, theme: Theme) -> Result<(), StoreError> {
        self.store.update(|s| replace(&mut s.theme, theme))?;
        Ok(())
    }

    pub fn sensitive_fields_enabled(&self) -> bool {
        self.settings().sensitive_fields_enabled
    }

    pub fn set_sensitive_fields_enabled(&mut self, enabled: bool) -> Result<(), StoreError> {
        self.store
            .update(|s| replace(&mut s.sensitive_fields_enabled, enabled))?;
        Ok(())
    }

    pub fn sensitive_keywords(&self) -> &[String] {
        &self.settings().sensitive_keywords
    }

    pub fn set_sensitive_keywords(&mut self, keywords: Vec<String>) -> Result<(), StoreError> {
        self.store
            .update(|s| replace(&mut s.sensitive_keywords, keywords))?;
        Ok(())
    }

    pub fn layout_mode(&self) -> LayoutMode {
        self.settings().layout_mode
    }

    pub fn set_layout_mode(&mut self, mode: LayoutMode) -> Result<(), StoreError> {
        self.store.update(|s| replace(&mut s.layout_mode, mode))?;
        Ok(())
    }

    pub fn export_path(&self) -> &str {
        &self.settings().export_path
    }

    pub fn set_export_path(&mut self, path: impl Into<String>) -> Result<(), StoreError> {
        let path = path.into();
        self.store.update(|s| replace(&mut s.export_path, path))?;
        Ok(())
    }

    pub fn auto_open_folder(&self) -> bool {
        self.settings().auto_open_folder
    }

    pub fn set_auto_open_folder(&mut self, enabled: bool) -> Result<(), StoreError> {
        self.store
            .update(|s| replace(&mut s.auto_open_folder, enabled))?;
        Ok(())
    }

    pub fn is_sensitive(&self, name: &str) -> bool {
        self.settings().is_sensitive(name)
    }

    /// Replace everything, unknown keys included, with the defaults.
    pub fn reset_to_default(&mut self) -> Result<(), StoreError> {
        self.store.update(|s| replace(s, Settings::default()))?;
        Ok(())
    }

    pub fn reload(&mut self) -> Result<(), StoreError> {
        let settings = read_settings(self.store.kv())?;
        self.store.replace(settings);
        Ok(())
    }

    pub fn last_flush_error(&self) -> Option<&str> {
        self.store.last_flush_error()
    }
}

fn replace<T: PartialEq>(slot: &mut T, value: T) -> bool {
    if *slot == value {
        return false;
    }
    *slot = value;
    true
}

fn read_settings<S: KeyValueStore>(kv: &S) -> Result<Settings, StoreError> {
    match kv.get(SETTINGS_KEY)? {
        Some(Value::Object(saved)) => {
            debug!(keys = saved.len(), "merging saved settings over defaults");
            Ok(merge_over_defaults(&saved))
        }
        Some(Value::Null) | None => Ok(Settings::default()),
        Some(_) => {
            warn!(key = SETTINGS_KEY, "saved settings are not an object, using defaults");
            Ok(Settings::default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::kv::MemoryStore;
    use serde_json::json;

    #[test]
    fn missing_settings_are_defaults() {
        let store = SettingsStore::load(MemoryStore::new()).expect("load");
        assert_eq!(store.settings(), &Settings::default());
        assert_eq!(store.theme(), Theme::System);
        assert_eq!(store.layout_mode(), LayoutMode::Card);
    }

    #[test]
    fn saved_keys_win_and_missing_fall_back() {
        let kv = MemoryStore::new().with(
            SETTINGS_KEY,
            json!({"theme": "dark", "layoutMode": "table", "futureOption": [1, 2]}),
        );
        let store = SettingsStore::load(kv).expect("load");
        let settings = store.settings();
        assert_eq!(settings.theme, Theme::Dark);
        assert_eq!(settings.layout_mode, LayoutMode::Table);
        assert!(settings.sensitive_fields_enabled);
        assert!(settings.auto_open_folder);
        assert_eq!(settings.extra.get("futureOption"), Some(&json!([1, 2])));
    }

    #[test]
    fn plugin_saved_settings_are_read() {
        let kv = MemoryStore::new().with(
            "utools-plugin-template-settings",
            json!({"theme": "light", "exportPath": "D:/backup"}),
        );
        let store = SettingsStore::load(kv).expect("load");
        assert_eq!(store.theme(), Theme::Light);
        assert_eq!(store.export_path(), "D:/backup");
    }

    #[test]
    fn mistyped_saved_value_keeps_default() {
        let kv = MemoryStore::new().with(
            SETTINGS_KEY,
            json!({"theme": "neon", "sensitiveFieldsEnabled": false}),
        );
        let store = SettingsStore::load(kv).expect("load");
        assert_eq!(store.theme(), Theme::System);
        assert!(!store.sensitive_fields_enabled());
    }

    #[test]
    fn unknown_keys_survive_a_write() {
        let kv = MemoryStore::new().with(SETTINGS_KEY, json!({"futureOption": "x"}));
        let mut store = SettingsStore::load(kv.clone()).expect("load");
        store.set_theme(Theme::Light).expect("set");
        let saved = kv.get(SETTINGS_KEY).expect("get").expect("saved");
        assert_eq!(saved["futureOption"], json!("x"));
        assert_eq!(saved["theme"], json!("light"));
        assert_eq!(saved["sensitiveKeywords"], json!(Settings::default().sensitive_keywords));
    }

    #[test]
    fn setters_flush_only_on_change() {
        let kv = MemoryStore::new();
        let mut store = SettingsStore::load(kv.clone()).expect("load");
        store.set_theme(Theme::System).expect("same value");
        assert!(!kv.contains(SETTINGS_KEY));
        store.set_layout_mode(LayoutMode::Table).expect("set");
        assert!(kv.contains(SETTINGS_KEY));
    }

    #[test]
    fn reset_restores_defaults_and_drops_extras() {
        let kv = MemoryStore::new().with(SETTINGS_KEY, json!({"theme": "dark", "legacy": 1}));
        let mut store = SettingsStore::load(kv.clone()).expect("load");
        store.reset_to_default().expect("reset");
        assert_eq!(store.settings(), &Settings::default());
        let saved = kv.get(SETTINGS_KEY).expect("get").expect("saved");
        assert!(saved.get("legacy").is_none());
    }

    #[test]
    fn sensitive_match_is_case_insensitive_substring() {
        let mut settings = Settings::default();
        assert!(settings.is_sensitive("GITHUB_TOKEN"));
        assert!(settings.is_sensitive("Db_Password"));
        assert!(!settings.is_sensitive("PATH"));

        settings.sensitive_fields_enabled = false;
        assert!(!settings.is_sensitive("GITHUB_TOKEN"));
    }

    #[test]
    fn keyword_setter_applies_to_matching() {
        let mut store = SettingsStore::load(MemoryStore::new()).expect("load");
        store
            .set_sensitive_keywords(vec!["Proxy".to_string()])
            .expect("set");
        assert!(store.is_sensitive("HTTPS_PROXY"));
        assert!(!store.is_sensitive("GITHUB_TOKEN"));
    }

    #[test]
    fn parse_options() {
        assert_eq!("dark".parse::<Theme>(), Ok(Theme::Dark));
        assert!("blue".parse::<Theme>().is_err());
        assert_eq!("table".parse::<LayoutMode>(), Ok(LayoutMode::Table));
    }
}
