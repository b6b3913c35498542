use crate::infrastructure::bluetooth::transport::ScanMode;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSettings {
    #[serde(default = "default_level")]
    pub level: String, // "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_false")]
    pub file_logging_enabled: bool,
    #[serde(default = "default_true")]
    pub console_logging_enabled: bool,
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
    #[serde(default = "default_prefix")]
    pub file_name_prefix: String,
    #[serde(default = "default_false")]
    pub show_file_line: bool,
    #[serde(default = "default_true")]
    pub show_target: bool,
    #[serde(default = "default_true")]
    pub ansi_colors: bool,
    #[serde(default = "default_rotation")]
    pub rotation: String, // "daily", "hourly", "minutely", "never"
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: default_level(),
            file_logging_enabled: default_false(),
            console_logging_enabled: default_true(),
            log_dir: default_log_dir(),
            file_name_prefix: default_prefix(),
            show_file_line: default_false(),
            show_target: default_true(),
            ansi_colors: default_true(),
            rotation: default_rotation(),
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}
fn default_true() -> bool {
    true
}
fn default_false() -> bool {
    false
}
fn default_log_dir() -> String {
    "logs".to_string()
}
fn default_prefix() -> String {
    "coldchain_ble".to_string()
}
fn default_rotation() -> String {
    "daily".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub log_settings: LogSettings,

    // Command Settings
    #[serde(default = "default_command_max_attempts")]
    pub command_max_attempts: u32,

    // Scan Settings
    #[serde(default)]
    pub scan_mode: ScanMode,
    #[serde(default = "default_scan_duration_secs")]
    pub scan_duration_secs: u64,

    #[serde(default)]
    pub known_sensor_addresses: Vec<String>,
    #[serde(default)]
    pub last_connected_address: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_settings: LogSettings::default(),
            command_max_attempts: default_command_max_attempts(),
            scan_mode: ScanMode::default(),
            scan_duration_secs: default_scan_duration_secs(),
            known_sensor_addresses: Vec::new(),
            last_connected_address: None,
        }
    }
}

fn default_command_max_attempts() -> u32 {
    3
}
fn default_scan_duration_secs() -> u64 {
    10
}

pub struct SettingsService {
    settings: Settings,
    settings_path: PathBuf,
}

impl SettingsService {
    pub fn new() -> anyhow::Result<Self> {
        let settings_path = Self::get_settings_path()?;
        Ok(Self::from_path(settings_path))
    }

    /// Load from an explicit file, falling back to defaults if it is
    /// missing or unreadable.
    pub fn from_path(settings_path: PathBuf) -> Self {
        let settings = Self::load_from_file(&settings_path).unwrap_or_default();
        Self {
            settings,
            settings_path,
        }
    }

    fn get_settings_path() -> anyhow::Result<PathBuf> {
        let mut path = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        path.push("ColdChainBle");
        fs::create_dir_all(&path)?;
        path.push("settings.json");
        Ok(path)
    }

    fn load_from_file(path: &Path) -> anyhow::Result<Settings> {
        let contents = fs::read_to_string(path)?;
        let settings = serde_json::from_str(&contents)?;
        Ok(settings)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(&self.settings)?;
        fs::write(&self.settings_path, json)?;
        Ok(())
    }

    pub fn get(&self) -> &Settings {
        &self.settings
    }

    pub fn record_connection(&mut self, address: &str) -> anyhow::Result<()> {
        if !self
            .settings
            .known_sensor_addresses
            .iter()
            .any(|a| a == address)
        {
            self.settings.known_sensor_addresses.push(address.to_string());
        }
        self.settings.last_connected_address = Some(address.to_string());
        self.save()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_settings_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "coldchain_ble_{}_{}",
            name,
            std::process::id()
        ));
        fs::create_dir_all(&dir).unwrap();
        dir.join("settings.json")
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let settings: Settings =
            serde_json::from_str(r#"{"command_max_attempts": 5}"#).unwrap();
        assert_eq!(settings.command_max_attempts, 5);
        assert_eq!(settings.scan_mode, ScanMode::LowLatency);
        assert_eq!(settings.scan_duration_secs, 10);
        assert_eq!(settings.log_settings.level, "info");
    }

    #[test]
    fn test_scan_mode_names() {
        let settings: Settings = serde_json::from_str(r#"{"scan_mode": "balanced"}"#).unwrap();
        assert_eq!(settings.scan_mode, ScanMode::Balanced);
    }

    #[test]
    fn test_record_connection_persists() {
        let path = temp_settings_path("record");
        let _ = fs::remove_file(&path);

        let mut service = SettingsService::from_path(path.clone());
        assert_eq!(service.get().command_max_attempts, 3);
        service.record_connection("C4:7C:8D:6A:01:02").unwrap();
        service.record_connection("C4:7C:8D:6A:01:02").unwrap();

        let reloaded = SettingsService::from_path(path.clone());
        assert_eq!(
            reloaded.get().known_sensor_addresses,
            vec!["C4:7C:8D:6A:01:02".to_string()]
        );
        assert_eq!(
            reloaded.get().last_connected_address.as_deref(),
            Some("C4:7C:8D:6A:01:02")
        );
        let _ = fs::remove_file(&path);
    }
}
