//! Device health monitor.
//!
//! Sleep/resume and docking changes often kill the input device without the
//! stream reporting an error. The host polls [`CaptureEngine::check_device_health`]
//! on a timer (10 s by default); each call inspects the stream and rebuilds
//! it through the same resolve/start path used at startup.

use serde::Serialize;
use tracing::{error, info, warn};

use super::{BoundStream, CaptureEngine};
use crate::audio::DeviceId;

/// Snapshot returned by one health check. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceHealth {
    pub healthy: bool,
    /// The stream was rebuilt during this check.
    pub recovered: bool,
    pub message: String,
    /// Device the stream is bound to after the check; `None` is the system
    /// default (or no stream at all when `healthy` is false).
    pub device_id: Option<DeviceId>,
}

impl DeviceHealth {
    fn ok(message: impl Into<String>, device_id: Option<DeviceId>) -> Self {
        Self {
            healthy: true,
            recovered: false,
            message: message.into(),
            device_id,
        }
    }

    fn failed(message: impl Into<String>) -> Self {
        Self {
            healthy: false,
            recovered: false,
            message: message.into(),
            device_id: None,
        }
    }
}

impl CaptureEngine {
    /// Check the unified stream and recover it if needed.
    ///
    /// Order of checks:
    /// 1. a session is running: skip, never touch hardware mid-recording;
    /// 2. no stream: unhealthy, the host must re-initialise explicitly;
    /// 3. stream inactive: rebuild;
    /// 4. bound device no longer resolves through the catalog, or the stream
    ///    sits on the system default while the named device is back: rebuild.
    ///
    /// The stream slot stays locked for the whole check, so a recording
    /// cannot begin between the first check and a rebuild.
    pub fn check_device_health(&self) -> DeviceHealth {
        let mut slot = self.stream.lock();
        let bound = slot.as_ref().map(|s| (s.device, s.handle.is_active()));

        if self.is_recording() {
            let device = bound.and_then(|(device, _)| device);
            return DeviceHealth::ok("recording in progress, check skipped", device);
        }

        let Some((device, active)) = bound else {
            warn!("health check: no audio stream");
            return DeviceHealth::failed("no audio stream");
        };

        let name = self.device_name();
        let resolution = self.catalog().resolve(device, name.as_deref());

        if !active {
            warn!(id = ?device, "health check: stream inactive, rebuilding");
            return self.rebuild(&mut slot, resolution.device, "stream was inactive");
        }
        if resolution.needs_restart {
            warn!(
                id = ?device,
                target = ?resolution.device,
                "health check: bound device no longer matches the selection, rebuilding"
            );
            return self.rebuild(&mut slot, resolution.device, "device changed");
        }

        DeviceHealth::ok("audio device ok", device)
    }

    fn rebuild(
        &self,
        slot: &mut Option<BoundStream>,
        target: Option<DeviceId>,
        reason: &str,
    ) -> DeviceHealth {
        let name = self.device_name();
        match self.open_in(slot, target, name.as_deref()) {
            Ok(device_id) => {
                info!(id = ?device_id, reason, "audio device recovered");
                DeviceHealth {
                    healthy: true,
                    recovered: true,
                    message: format!("audio device recovered ({reason})"),
                    device_id,
                }
            }
            Err(e) => {
                error!("audio device recovery failed: {e}");
                DeviceHealth::failed(format!("audio device recovery failed: {e}"))
            }
        }
    }
}
