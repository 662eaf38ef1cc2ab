//! Shared host state.
//!
//! One `AppState` is built at startup and cloned into the command loop and
//! the health timer task.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use scriber_core::{CaptureEngine, DeviceId, HealthWarningLatch, WarningGate};
use tracing::{info, warn};

use crate::settings::{save_settings, AppSettings};

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<CaptureEngine>,
    /// Persisted app settings cache.
    pub settings: Arc<Mutex<AppSettings>>,
    /// Absolute path to `settings.json`.
    pub settings_path: PathBuf,
    /// Rate limit for "no audio detected" warnings.
    pub no_audio_gate: Arc<Mutex<WarningGate>>,
    /// One device warning per unhealthy streak.
    pub health_latch: Arc<Mutex<HealthWarningLatch>>,
}

impl AppState {
    pub fn new(engine: Arc<CaptureEngine>, settings: AppSettings, settings_path: PathBuf) -> Self {
        Self {
            engine,
            settings: Arc::new(Mutex::new(settings)),
            settings_path,
            no_audio_gate: Arc::new(Mutex::new(WarningGate::default())),
            health_latch: Arc::new(Mutex::new(HealthWarningLatch::new())),
        }
    }

    /// Stored device selection as `(id, name)`.
    pub fn device_selection(&self) -> (Option<DeviceId>, Option<String>) {
        let settings = self.settings.lock();
        (settings.device_index, settings.device_name.clone())
    }

    /// Persist `device` if it differs from the stored id.
    ///
    /// A fallback to the system default (`None`) is never stored: the saved
    /// id and name stay on the chosen microphone so it is picked up again
    /// once it reappears. Returns `true` when the settings file was rewritten.
    pub fn remember_device(&self, device: Option<DeviceId>) -> bool {
        let Some(id) = device else {
            return false;
        };
        let snapshot = {
            let mut settings = self.settings.lock();
            if settings.device_index == Some(id) {
                return false;
            }
            info!(old = ?settings.device_index, new = id, "device id changed, saving settings");
            settings.device_index = Some(id);
            settings.clone()
        };
        if let Err(e) = save_settings(&self.settings_path, &snapshot) {
            warn!(path = %self.settings_path.display(), "failed to save settings: {e}");
        }
        true
    }

    /// Whether a "no audio detected" warning may be shown now.
    pub fn allow_no_audio_warning(&self) -> bool {
        self.no_audio_gate.lock().allow(Instant::now())
    }
}
