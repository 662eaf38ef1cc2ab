//! Live input level shared between the audio thread and readers.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Latest chunk RMS, stored as raw `f32` bits so the callback can publish
/// it with a single relaxed store.
#[derive(Clone, Debug, Default)]
pub struct LevelMeter {
    bits: Arc<AtomicU32>,
}

impl LevelMeter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, rms: f32) {
        self.bits.store(rms.to_bits(), Ordering::Relaxed);
    }

    pub fn get(&self) -> f32 {
        f32::from_bits(self.bits.load(Ordering::Relaxed))
    }

    /// Raise the stored value to `rms` if it is higher.
    pub fn raise(&self, rms: f32) {
        let _ = self
            .bits
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |current| {
                (rms > f32::from_bits(current)).then_some(rms.to_bits())
            });
    }

    pub fn reset(&self) {
        self.set(0.0);
    }
}

/// Root-mean-square of a sample slice; 0 for an empty slice.
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f64 = samples.iter().map(|&s| f64::from(s) * f64::from(s)).sum();
    (sum_sq / samples.len() as f64).sqrt() as f32
}
