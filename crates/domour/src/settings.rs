use std::path::Path;

use log::warn;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppSettings {
    #[serde(default = "default_display_name")]
    pub display_name: String,

    #[serde(default = "default_true")]
    pub auto_update: bool,

    #[serde(default)]
    pub vlink_auto_start: bool,

    #[serde(default)]
    pub notes: String,

    #[serde(default = "default_true")]
    pub pomodoro_notify_desktop: bool,

    #[serde(default)]
    pub pomodoro_notify_sound: bool,

    #[serde(default)]
    pub debug_logging: bool,

    #[serde(default = "default_max_log_size_bytes")]
    pub max_log_size_bytes: u64,
}

fn default_display_name() -> String {
    "Domour Copilot".to_string()
}

fn default_true() -> bool {
    true
}

fn default_max_log_size_bytes() -> u64 {
    5 * 1024 * 1024
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            display_name: default_display_name(),
            auto_update: true,
            vlink_auto_start: false,
            notes: String::new(),
            pomodoro_notify_desktop: true,
            pomodoro_notify_sound: false,
            debug_logging: false,
            max_log_size_bytes: default_max_log_size_bytes(),
        }
    }
}

impl AppSettings {
    /// Read settings from `path`. Missing or unreadable files fall back to
    /// the defaults, which are then written back.
    pub fn load_from(path: &Path) -> Self {
        let loaded = std::fs::read_to_string(path)
            .map_err(|error| error.to_string())
            .and_then(|content| {
                serde_json::from_str::<Self>(&content).map_err(|error| error.to_string())
            });

        match loaded {
            Ok(settings) => settings,
            Err(reason) => {
                warn!(
                    "Using default settings, could not load {}: {reason}",
                    path.display()
                );
                let settings = Self::default();
                if let Err(error) = settings.save_to(path) {
                    warn!("Failed to save default settings: {error}");
                }
                settings
            }
        }
    }

    pub fn save_to(&self, path: &Path) -> Result<(), std::io::Error> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::AppSettings;

    #[test]
    fn defaults_match_first_run_values() {
        let settings = AppSettings::default();

        assert_eq!(settings.display_name, "Domour Copilot");
        assert!(settings.auto_update);
        assert!(!settings.vlink_auto_start);
        assert!(settings.notes.is_empty());
        assert!(settings.pomodoro_notify_desktop);
        assert!(!settings.pomodoro_notify_sound);
        assert!(!settings.debug_logging);
        assert_eq!(settings.max_log_size_bytes, 5 * 1024 * 1024);
    }

    #[test]
    fn keys_are_camel_case_and_missing_fields_default() {
        let value = json!({
            "displayName": "Desk",
            "vlinkAutoStart": true,
        });

        let settings: AppSettings =
            serde_json::from_value(value).expect("settings JSON should deserialize");

        assert_eq!(settings.display_name, "Desk");
        assert!(settings.vlink_auto_start);
        assert!(settings.auto_update);

        let serialized = serde_json::to_value(&settings).expect("settings should serialize");
        assert_eq!(serialized["pomodoroNotifyDesktop"], json!(true));
        assert!(serialized.get("vlink_auto_start").is_none());
    }

    #[test]
    fn load_from_missing_file_writes_defaults() {
        let temp_dir = tempfile::tempdir().expect("temporary directory should be created");
        let path = temp_dir.path().join(".domour").join("cosmos-assistant.json");

        let settings = AppSettings::load_from(&path);

        assert_eq!(settings, AppSettings::default());
        let written = std::fs::read_to_string(&path).expect("defaults should be persisted");
        assert!(written.contains("\"displayName\": \"Domour Copilot\""));
    }

    #[test]
    fn load_from_corrupt_file_falls_back_to_defaults() {
        let temp_dir = tempfile::tempdir().expect("temporary directory should be created");
        let path = temp_dir.path().join("cosmos-assistant.json");
        std::fs::write(&path, "{ not json").expect("corrupt file should be written");

        assert_eq!(AppSettings::load_from(&path), AppSettings::default());
    }

    #[test]
    fn save_then_load_round_trips_changes() {
        let temp_dir = tempfile::tempdir().expect("temporary directory should be created");
        let path = temp_dir.path().join("cosmos-assistant.json");
        let settings = AppSettings {
            notes: "remember the milk".to_string(),
            debug_logging: true,
            ..AppSettings::default()
        };

        settings.save_to(&path).expect("settings should save");

        assert_eq!(AppSettings::load_from(&path), settings);
    }
}
