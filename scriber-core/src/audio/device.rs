//! Input device catalog: enumeration, filtering, verification and
//! identity resolution across id churn.
//!
//! Apart from [`DeviceCatalog::try_open`], nothing here returns an error.
//! Platform query failures are logged and treated as "no devices" or "not
//! available", so the engine always has a defined fallback (the system
//! default input).

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::meter::{rms, LevelMeter};
use super::{AudioHost, DeviceId, InputStream, RawDevice};
use crate::error::HostError;

/// A usable input device.
///
/// `name` is the durable identity; `id` is only valid until the OS
/// re-enumerates its devices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceDescriptor {
    pub id: DeviceId,
    pub name: String,
    pub input_channels: u16,
}

/// Outcome of [`DeviceCatalog::resolve`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    /// Device to open; `None` means the system default input.
    pub device: Option<DeviceId>,
    /// The preferred id no longer resolved and a running stream must be rebuilt.
    pub needs_restart: bool,
}

/// Per-device result of [`DeviceCatalog::survey_levels`].
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceLevel {
    pub device: DeviceDescriptor,
    /// RMS of the last buffer seen during the window.
    pub last_rms: f32,
    /// Highest buffer RMS seen during the window.
    pub peak_rms: f32,
    /// `false` when the device refused to open.
    pub available: bool,
}

/// Names containing any of these (lowercased) are outputs, loopbacks or
/// virtual devices rather than microphones.
const EXCLUDED_KEYWORDS: &[&str] = &[
    "stereomix",
    "stereo mix",
    "wave out",
    "what u hear",
    "output",
    "lautsprecher",
    "speaker",
    "playback",
    "loopback",
    "virtual",
    "cable",
];

/// Placeholder fragments the OS uses for unnamed endpoints, e.g. `"Mic 1 ()"`.
const PLACEHOLDER_PATTERNS: &[&str] = &["()"];

const MIN_NAME_CHARS: usize = 3;

/// Platform device names are sometimes truncated differently per host API,
/// so duplicates are detected on this many leading characters.
const DEDUP_PREFIX_CHARS: usize = 25;

/// Whether a device name should be hidden from the microphone list.
pub fn is_excluded_name(name: &str) -> bool {
    let lowered = name.to_lowercase();
    if EXCLUDED_KEYWORDS.iter().any(|k| lowered.contains(k)) {
        return true;
    }
    if PLACEHOLDER_PATTERNS.iter().any(|p| name.contains(p)) {
        return true;
    }
    name.trim().chars().count() < MIN_NAME_CHARS
}

fn dedup_key(name: &str) -> String {
    name.chars().take(DEDUP_PREFIX_CHARS).collect()
}

/// Filter and de-duplicate a raw device table, preserving table order.
pub fn filter_devices(raw: &[RawDevice]) -> Vec<DeviceDescriptor> {
    let mut seen: Vec<String> = Vec::new();
    let mut out = Vec::new();
    for dev in raw {
        if dev.input_channels == 0 || is_excluded_name(&dev.name) {
            continue;
        }
        let key = dedup_key(&dev.name);
        if seen.contains(&key) {
            continue;
        }
        seen.push(key);
        out.push(DeviceDescriptor {
            id: dev.id,
            name: dev.name.clone(),
            input_channels: dev.input_channels,
        });
    }
    out
}

/// A surveyed device, its last and peak meters, and its stream if it opened.
type SurveyEntry = (DeviceDescriptor, LevelMeter, LevelMeter, Option<Box<dyn InputStream>>);

pub struct DeviceCatalog {
    host: Arc<dyn AudioHost>,
    cache: Mutex<Option<Vec<DeviceDescriptor>>>,
}

impl DeviceCatalog {
    pub fn new(host: Arc<dyn AudioHost>) -> Self {
        Self {
            host,
            cache: Mutex::new(None),
        }
    }

    fn raw_devices(&self) -> Vec<RawDevice> {
        match self.host.list_input_devices() {
            Ok(devices) => devices,
            Err(e) => {
                warn!("failed to enumerate input devices: {e}");
                Vec::new()
            }
        }
    }

    /// Query, filter and cache the usable input devices.
    ///
    /// With `verify`, every candidate is also opened and closed once and
    /// dropped if that fails. This is slow; use it for diagnostics only.
    pub fn list_devices(&self, verify: bool) -> Vec<DeviceDescriptor> {
        let mut devices = filter_devices(&self.raw_devices());
        *self.cache.lock() = Some(devices.clone());

        if verify {
            devices.retain(|dev| match self.try_open(dev.id) {
                Ok(()) => true,
                Err(e) => {
                    info!(
                        device = %dev.name,
                        id = dev.id,
                        "dropping device that failed to open: {e}"
                    );
                    false
                }
            });
        }
        devices
    }

    /// Last listed devices, querying the platform only on first use.
    pub fn cached_devices(&self) -> Vec<DeviceDescriptor> {
        if let Some(cached) = self.cache.lock().as_ref() {
            return cached.clone();
        }
        self.list_devices(false)
    }

    /// Drop the cache and query the platform again.
    pub fn refresh(&self) -> Vec<DeviceDescriptor> {
        self.list_devices(false)
    }

    /// Current id of the device called exactly `name`.
    ///
    /// Matches against every usable entry in the device table, not only the
    /// de-duplicated list, so a device whose name shares its prefix with an
    /// earlier one can still be found. Refreshes the cache as a side effect.
    pub fn find_by_name(&self, name: &str) -> Option<DeviceId> {
        if name.is_empty() {
            return None;
        }
        let raw = self.raw_devices();
        *self.cache.lock() = Some(filter_devices(&raw));
        let found = raw
            .iter()
            .filter(|dev| dev.input_channels > 0 && !is_excluded_name(&dev.name))
            .find(|dev| dev.name == name)
            .map(|dev| dev.id);
        if let Some(id) = found {
            debug!(device = name, id, "device found by name");
        }
        found
    }

    /// `None` (system default) is always available; otherwise the id must be
    /// in the device table with at least one input channel.
    pub fn is_available(&self, id: Option<DeviceId>) -> bool {
        let Some(id) = id else {
            return true;
        };
        match self.host.list_input_devices() {
            Ok(devices) => devices
                .iter()
                .any(|dev| dev.id == id && dev.input_channels > 0),
            Err(_) => false,
        }
    }

    /// Name currently reported for `id` in the raw device table.
    pub fn name_of(&self, id: DeviceId) -> Option<String> {
        self.raw_devices()
            .into_iter()
            .find(|dev| dev.id == id)
            .map(|dev| dev.name)
    }

    fn still_named(&self, id: Option<DeviceId>, name: Option<&str>) -> bool {
        match (id, name) {
            (Some(id), Some(name)) if !name.is_empty() => match self.name_of(id) {
                Some(current) if current != name => {
                    debug!(id, expected = name, found = %current, "device id was reassigned");
                    false
                }
                _ => true,
            },
            _ => true,
        }
    }

    /// Map a remembered device onto the current enumeration epoch.
    ///
    /// Preference order: the id as-is, then the device with the same name,
    /// then the system default. An id that is now held by a device with a
    /// different name counts as unavailable. A selection already on the
    /// system default moves back to the named device once it reappears.
    pub fn resolve(
        &self,
        preferred_id: Option<DeviceId>,
        preferred_name: Option<&str>,
    ) -> Resolution {
        let preferred_name = preferred_name.filter(|name| !name.is_empty());

        if preferred_id.is_none() {
            if let Some(name) = preferred_name {
                if let Some(id) = self.find_by_name(name) {
                    info!(device = name, id, "named device is back, leaving the system default");
                    return Resolution {
                        device: Some(id),
                        needs_restart: true,
                    };
                }
            }
            return Resolution {
                device: None,
                needs_restart: false,
            };
        }

        if self.is_available(preferred_id) && self.still_named(preferred_id, preferred_name) {
            return Resolution {
                device: preferred_id,
                needs_restart: false,
            };
        }

        warn!(id = ?preferred_id, "input device not available, attempting recovery");

        if let Some(name) = preferred_name {
            if let Some(id) = self.find_by_name(name) {
                info!(device = name, id, "recovered device at new id");
                return Resolution {
                    device: Some(id),
                    needs_restart: true,
                };
            }
        }

        warn!("device recovery failed, falling back to the system default input");
        Resolution {
            device: None,
            needs_restart: true,
        }
    }

    /// Open `id` briefly and close it again.
    pub fn try_open(&self, id: DeviceId) -> Result<(), HostError> {
        let mut stream = self.host.open_input(Some(id), Box::new(|_| {}))?;
        stream.stop();
        Ok(())
    }

    /// Open every listed device at once for `window`, tracking input levels.
    ///
    /// Returns the devices ordered by peak level, loudest first, with the
    /// ones that failed to open at the end.
    pub fn survey_levels(&self, window: Duration) -> Vec<DeviceLevel> {
        let devices = self.list_devices(false);
        let mut opened: Vec<SurveyEntry> = Vec::with_capacity(devices.len());

        for dev in devices {
            let last = LevelMeter::new();
            let peak = LevelMeter::new();
            let (last_cb, peak_cb) = (last.clone(), peak.clone());
            let sink = Box::new(move |samples: &[f32]| {
                let level = rms(samples);
                last_cb.set(level);
                peak_cb.raise(level);
            });
            let stream = match self.host.open_input(Some(dev.id), sink) {
                Ok(stream) => {
                    debug!(device = %dev.name, id = dev.id, "survey stream started");
                    Some(stream)
                }
                Err(e) => {
                    warn!(device = %dev.name, id = dev.id, "survey could not open device: {e}");
                    None
                }
            };
            opened.push((dev, last, peak, stream));
        }

        if !window.is_zero() {
            std::thread::sleep(window);
        }

        let mut levels: Vec<DeviceLevel> = opened
            .into_iter()
            .map(|(device, last, peak, stream)| {
                let available = stream.is_some();
                if let Some(mut stream) = stream {
                    stream.stop();
                }
                DeviceLevel {
                    device,
                    last_rms: last.get(),
                    peak_rms: peak.get(),
                    available,
                }
            })
            .collect();

        levels.sort_by(|a, b| {
            b.available
                .cmp(&a.available)
                .then(b.peak_rms.total_cmp(&a.peak_rms))
        });
        levels
    }
}
