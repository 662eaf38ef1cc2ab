//! Persistent application settings (JSON file in app data directory).

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use scriber_core::{DeviceId, EngineConfig};
use serde::{Deserialize, Serialize};

const MIN_SENSITIVITY: f32 = 0.0001;
const MAX_SENSITIVITY: f32 = 0.1;
const MAX_PRE_ROLL_MS: u64 = 2_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct AppSettings {
    /// Last id the selected microphone was seen at. Only valid until the OS
    /// re-enumerates devices.
    pub device_index: Option<DeviceId>,
    /// Durable identity of the selected microphone.
    pub device_name: Option<String>,
    /// RMS threshold below which a recording counts as silent.
    pub audio_sensitivity: f32,
    pub pre_roll_ms: u64,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            device_index: None,
            device_name: None,
            audio_sensitivity: 0.005,
            pre_roll_ms: 500,
        }
    }
}

impl AppSettings {
    pub fn normalize(&mut self) {
        if !self.audio_sensitivity.is_finite() {
            self.audio_sensitivity = Self::default().audio_sensitivity;
        }
        self.audio_sensitivity = self.audio_sensitivity.clamp(MIN_SENSITIVITY, MAX_SENSITIVITY);
        self.pre_roll_ms = self.pre_roll_ms.min(MAX_PRE_ROLL_MS);
        self.device_name = self
            .device_name
            .as_ref()
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty());
    }

    /// Engine configuration for these settings, writing artifacts to `work_dir`.
    pub fn engine_config(&self, work_dir: &Path) -> EngineConfig {
        EngineConfig {
            pre_roll: Duration::from_millis(self.pre_roll_ms),
            sensitivity: self.audio_sensitivity,
            work_dir: work_dir.to_path_buf(),
            ..EngineConfig::default()
        }
    }
}

pub fn default_data_dir() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("Scriber")
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var_os("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                std::env::var_os("HOME")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("/tmp"))
                    .join(".local")
                    .join("share")
            })
            .join("scriber")
    }
}

pub fn default_settings_path() -> PathBuf {
    default_data_dir().join("settings.json")
}

pub fn load_settings(path: &Path) -> AppSettings {
    let mut settings = fs::read_to_string(path)
        .ok()
        .and_then(|raw| serde_json::from_str::<AppSettings>(&raw).ok())
        .unwrap_or_default();
    settings.normalize();
    settings
}

pub fn save_settings(path: &Path, settings: &AppSettings) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(settings).map_err(std::io::Error::other)?;
    fs::write(path, json)
}
