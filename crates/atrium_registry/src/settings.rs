//! Serde/toml settings for the registry process and the instance-side
//! watcher.

use crate::error::RegistryError;
use serde::{Deserialize, Serialize};

fn default_room_id() -> String {
    "registry".to_string()
}

fn default_sync_interval_ms() -> u64 {
    5_000
}

/// Registry process settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrySettings {
    /// Id of the singleton registry room.
    #[serde(default = "default_room_id")]
    pub room_id: String,
    /// Shared token instances authenticate with; generated when absent.
    #[serde(default)]
    pub token: Option<String>,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            room_id: default_room_id(),
            token: None,
        }
    }
}

impl RegistrySettings {
    pub fn from_toml(source: &str) -> Result<Self, RegistryError> {
        Ok(toml::from_str(source)?)
    }
}

/// Instance-side watcher settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatcherSettings {
    /// Instance name reported to the registry.
    pub name: String,
    /// Fleet namespace, empty when unset.
    #[serde(default)]
    pub namespace: String,
    /// Public endpoint clients should connect to.
    #[serde(rename = "endpointUrl", default)]
    pub endpoint_url: String,
    /// Push interval; pushes are skipped while the snapshot is unchanged.
    #[serde(default = "default_sync_interval_ms")]
    pub sync_interval_ms: u64,
}

impl WatcherSettings {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: String::new(),
            endpoint_url: String::new(),
            sync_interval_ms: default_sync_interval_ms(),
        }
    }

    pub fn from_toml(source: &str) -> Result<Self, RegistryError> {
        Ok(toml::from_str(source)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_settings_defaults() {
        let settings = RegistrySettings::from_toml("").unwrap();
        assert_eq!(settings.room_id, "registry");
        assert!(settings.token.is_none());

        let settings =
            RegistrySettings::from_toml("room_id = \"fleet\"\ntoken = \"shh\"").unwrap();
        assert_eq!(settings.room_id, "fleet");
        assert_eq!(settings.token.as_deref(), Some("shh"));
    }

    #[test]
    fn watcher_settings_defaults() {
        let settings = WatcherSettings::from_toml(
            "name = \"eu-1\"\nendpointUrl = \"ws://eu-1.example:7070\"",
        )
        .unwrap();
        assert_eq!(settings.name, "eu-1");
        assert_eq!(settings.namespace, "");
        assert_eq!(settings.endpoint_url, "ws://eu-1.example:7070");
        assert_eq!(settings.sync_interval_ms, 5_000);
    }

    #[test]
    fn watcher_settings_reject_missing_name() {
        assert!(WatcherSettings::from_toml("namespace = \"eu\"").is_err());
    }
}
