//! Conversion of device audio to 16 kHz mono f32 using a rubato
//! `FastFixedIn` resampler.
//!
//! ## Design
//!
//! Devices open at whatever rate and channel layout they support (44.1 and
//! 48 kHz stereo are common). `RateConverter` downmixes each callback to mono,
//! then feeds fixed 20 ms blocks to rubato. A device already running at
//! 16 kHz is a passthrough and no rubato session is created.
//!
//! Every buffer is sized when the stream opens. [`RateConverter::process`]
//! runs on the audio thread and does not allocate for callbacks up to the
//! size the converter was built for.

use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use tracing::{info, warn};

use crate::buffering::chunk::SAMPLE_RATE;
use crate::error::HostError;

/// Frames per rubato call: 20 ms at the device rate.
fn block_frames(device_rate: u32) -> usize {
    (device_rate as usize / 50).max(1)
}

/// Downmixes interleaved device frames and resamples them to
/// [`SAMPLE_RATE`].
pub struct RateConverter {
    /// `None` when the device already runs at the target rate.
    resampler: Option<FastFixedIn<f32>>,
    channels: usize,
    /// Input frames rubato expects per call.
    block: usize,
    /// Downmixed input not yet handed to rubato (the whole callback in
    /// passthrough mode).
    pending: Vec<f32>,
    /// rubato output for one block: `[1][output_frames_max]`.
    scratch: Vec<Vec<f32>>,
    /// Resampled output of the current call.
    out: Vec<f32>,
    failed_blocks: u64,
}

impl RateConverter {
    /// Converter for a device opened at `device_rate` with `channels`
    /// interleaved channels.
    ///
    /// `max_callback_frames` sizes the buffers for the largest expected
    /// callback. Larger callbacks still work but grow a buffer once.
    ///
    /// # Errors
    /// Returns [`HostError::UnsupportedConfig`] if rubato rejects the ratio.
    pub fn new(
        device_rate: u32,
        channels: u16,
        max_callback_frames: usize,
    ) -> Result<Self, HostError> {
        let channels = usize::from(channels.max(1));
        if device_rate == SAMPLE_RATE {
            return Ok(Self {
                resampler: None,
                channels,
                block: 0,
                pending: Vec::with_capacity(max_callback_frames),
                scratch: Vec::new(),
                out: Vec::new(),
                failed_blocks: 0,
            });
        }

        let block = block_frames(device_rate);
        let ratio = f64::from(SAMPLE_RATE) / f64::from(device_rate);
        let resampler = FastFixedIn::<f32>::new(ratio, 1.0, PolynomialDegree::Cubic, block, 1)
            .map_err(|e| HostError::UnsupportedConfig(format!("resampler init: {e}")))?;

        let max_out = resampler.output_frames_max();
        let blocks_per_call = max_callback_frames / block + 2;
        info!(
            device_rate,
            target_rate = SAMPLE_RATE,
            block,
            max_out,
            "resampling enabled"
        );

        Ok(Self {
            resampler: Some(resampler),
            channels,
            block,
            pending: Vec::with_capacity(max_callback_frames + block),
            scratch: vec![vec![0.0; max_out]; 1],
            out: Vec::with_capacity(blocks_per_call * max_out),
            failed_blocks: 0,
        })
    }

    /// Convert one callback's worth of interleaved frames.
    ///
    /// The result may be empty while rubato waits for a full block; the
    /// remainder is carried into the next call.
    pub fn process<T: Copy>(&mut self, data: &[T], to_f32: impl Fn(T) -> f32) -> &[f32] {
        let Some(resampler) = self.resampler.as_mut() else {
            self.pending.clear();
            downmix(data, self.channels, &to_f32, &mut self.pending);
            return &self.pending;
        };

        downmix(data, self.channels, &to_f32, &mut self.pending);
        self.out.clear();

        let mut consumed = 0;
        while self.pending.len() - consumed >= self.block {
            let input = &self.pending[consumed..consumed + self.block];
            match resampler.process_into_buffer(&[input], &mut self.scratch, None) {
                Ok((_, produced)) => self.out.extend_from_slice(&self.scratch[0][..produced]),
                Err(_) => self.failed_blocks += 1,
            }
            consumed += self.block;
        }
        self.pending.drain(..consumed);
        &self.out
    }

    /// Returns `true` when the device rate equals [`SAMPLE_RATE`].
    pub fn is_passthrough(&self) -> bool {
        self.resampler.is_none()
    }
}

impl Drop for RateConverter {
    fn drop(&mut self) {
        if self.failed_blocks > 0 {
            warn!(blocks = self.failed_blocks, "resampler dropped audio blocks");
        }
    }
}

/// Append the mono average of each interleaved frame to `out`.
fn downmix<T: Copy>(
    data: &[T],
    channels: usize,
    to_f32: &impl Fn(T) -> f32,
    out: &mut Vec<f32>,
) {
    if channels == 1 {
        out.extend(data.iter().map(|&s| to_f32(s)));
        return;
    }
    out.extend(
        data.chunks_exact(channels)
            .map(|frame| frame.iter().map(|&s| to_f32(s)).sum::<f32>() / channels as f32),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn identity(s: f32) -> f32 {
        s
    }

    /// Feed `frames` of a sine in callbacks of `callback` frames.
    fn run_sine(rc: &mut RateConverter, rate: u32, frames: usize, callback: usize) -> Vec<f32> {
        let input: Vec<f32> = (0..frames)
            .map(|i| (2.0 * std::f32::consts::PI * 440.0 * i as f32 / rate as f32).sin() * 0.5)
            .collect();
        let mut out = Vec::new();
        for block in input.chunks(callback) {
            out.extend_from_slice(rc.process(block, identity));
        }
        out
    }

    #[test]
    fn passthrough_identity() {
        let mut rc = RateConverter::new(16_000, 1, 1_024).expect("converter");
        assert!(rc.is_passthrough());
        let samples: Vec<f32> = (0..480).map(|i| i as f32 * 0.001).collect();
        assert_eq!(rc.process(&samples, identity), samples.as_slice());
    }

    #[test]
    fn stereo_frames_are_averaged() {
        let mut rc = RateConverter::new(16_000, 2, 1_024).expect("converter");
        let out = rc.process(&[0.2f32, 0.4, -1.0, 1.0, 0.5, 0.5], identity);
        assert_eq!(out.len(), 3);
        assert_relative_eq!(out[0], 0.3, epsilon = 1e-6);
        assert_relative_eq!(out[1], 0.0, epsilon = 1e-6);
        assert_relative_eq!(out[2], 0.5, epsilon = 1e-6);
    }

    #[test]
    fn integer_samples_are_converted() {
        let mut rc = RateConverter::new(16_000, 1, 1_024).expect("converter");
        let out = rc.process(&[i16::MIN, 0, 16_384], |s: i16| f32::from(s) / 32_768.0);
        assert_eq!(out, &[-1.0, 0.0, 0.5]);
    }

    #[test]
    fn rates_without_an_integer_ratio_are_resampled() {
        let mut rc = RateConverter::new(44_100, 1, 4_096).expect("converter");
        assert!(!rc.is_passthrough());
        let out = run_sine(&mut rc, 44_100, 44_100, 441);
        assert!(
            out.len().abs_diff(16_000) <= 32,
            "one second at 44.1 kHz gave {} samples",
            out.len()
        );
    }

    #[test]
    fn stereo_48k_is_downmixed_and_resampled() {
        let mut rc = RateConverter::new(48_000, 2, 4_096).expect("converter");
        let frames: Vec<f32> = (0..48_000).flat_map(|_| [0.25f32, 0.75]).collect();
        let mut out = Vec::new();
        for block in frames.chunks(2 * 480) {
            out.extend_from_slice(rc.process(block, identity));
        }
        assert!(out.len().abs_diff(16_000) <= 32, "got {}", out.len());
        // Past the filter's start-up the DC level survives conversion.
        for &s in &out[1_000..] {
            assert_relative_eq!(s, 0.5, epsilon = 1e-3);
        }
    }

    #[test]
    fn partial_blocks_wait_for_the_next_callback() {
        let mut rc = RateConverter::new(48_000, 1, 4_096).expect("converter");
        assert!(rc.process(&[0.0f32; 500], identity).is_empty());
        assert!(!rc.process(&[0.0f32; 500], identity).is_empty());
    }

    #[test]
    fn sine_level_is_preserved() {
        let mut rc = RateConverter::new(44_100, 1, 4_096).expect("converter");
        let out = run_sine(&mut rc, 44_100, 44_100, 512);
        let settled = &out[2_000..];
        let rms = (settled.iter().map(|s| s * s).sum::<f32>() / settled.len() as f32).sqrt();
        assert_relative_eq!(rms, 0.5 / std::f32::consts::SQRT_2, max_relative = 0.05);
    }

    #[test]
    fn buffers_do_not_grow_for_sized_callbacks() {
        let mut rc = RateConverter::new(44_100, 2, 2_048).expect("converter");
        let pending = rc.pending.capacity();
        let out = rc.out.capacity();
        let frames = vec![0.1f32; 2 * 2_048];
        for _ in 0..200 {
            rc.process(&frames, identity);
        }
        assert_eq!(rc.pending.capacity(), pending);
        assert_eq!(rc.out.capacity(), out);
    }
}
