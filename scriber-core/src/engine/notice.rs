//! Caller-side policies for user-facing warnings.
//!
//! The engine reports every condition through return values and logs. How
//! often the user is told about them is the host's decision; these two
//! helpers implement the usual policy so every host does not re-invent it.

use std::time::{Duration, Instant};

use super::health::DeviceHealth;

/// Minimum spacing between two "no audio detected" warnings.
pub const NO_AUDIO_WARNING_COOLDOWN: Duration = Duration::from_secs(30);

/// Rate limiter: lets one warning through per cooldown window.
#[derive(Debug, Clone)]
pub struct WarningGate {
    cooldown: Duration,
    last_shown: Option<Instant>,
}

impl Default for WarningGate {
    fn default() -> Self {
        Self::new(NO_AUDIO_WARNING_COOLDOWN)
    }
}

impl WarningGate {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            last_shown: None,
        }
    }

    /// Returns `true` if a warning may be shown at `now`, and records it.
    pub fn allow(&mut self, now: Instant) -> bool {
        let open = self
            .last_shown
            .map_or(true, |at| now.saturating_duration_since(at) >= self.cooldown);
        if open {
            self.last_shown = Some(now);
        }
        open
    }
}

/// What the host should do with a health snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthNotice {
    /// Nothing to tell the user.
    Quiet,
    /// The device was rebuilt; a transient status message is enough.
    Recovered,
    /// First unhealthy result of a streak: show one persistent warning.
    Warn,
}

/// Suppresses repeated device warnings while the device stays unhealthy.
#[derive(Debug, Clone, Default)]
pub struct HealthWarningLatch {
    warned: bool,
}

impl HealthWarningLatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, health: &DeviceHealth) -> HealthNotice {
        if health.healthy {
            self.warned = false;
            return if health.recovered {
                HealthNotice::Recovered
            } else {
                HealthNotice::Quiet
            };
        }
        if self.warned {
            HealthNotice::Quiet
        } else {
            self.warned = true;
            HealthNotice::Warn
        }
    }

    pub fn is_latched(&self) -> bool {
        self.warned
    }
}
