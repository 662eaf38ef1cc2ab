//! Fixed-size chunking of the capture stream.
//!
//! Runtimes deliver buffers of whatever size the driver picked. The engine
//! accounts pre-roll and the recording ceiling in whole chunks, so the
//! callback re-blocks incoming audio through a [`ChunkAssembler`] first.

use std::time::Duration;

/// Capture sample rate in Hz. Every chunk is mono at this rate.
pub const SAMPLE_RATE: u32 = 16_000;

/// Frames per chunk: 512 frames = 32 ms at 16 kHz.
pub const CHUNK_FRAMES: usize = 512;

/// Duration of one chunk in milliseconds.
pub const CHUNK_MS: u64 = CHUNK_FRAMES as u64 * 1_000 / SAMPLE_RATE as u64;

/// Number of mono samples covering `duration` at [`SAMPLE_RATE`].
pub fn samples_for(duration: Duration) -> usize {
    (duration.as_secs_f64() * SAMPLE_RATE as f64).round() as usize
}

/// Playback duration of `samples` mono samples at [`SAMPLE_RATE`].
pub fn duration_of(samples: usize) -> Duration {
    Duration::from_secs_f64(samples as f64 / SAMPLE_RATE as f64)
}

/// Whole chunks needed to cover `duration`, rounded up.
pub fn chunks_for(duration: Duration) -> usize {
    let ms = duration.as_millis() as u64;
    ms.div_ceil(CHUNK_MS) as usize
}

/// Re-blocks arbitrary buffer sizes into fixed chunks.
///
/// The staging buffer is allocated once in [`ChunkAssembler::new`]; `push`
/// never allocates, which keeps it usable from the real-time callback.
pub struct ChunkAssembler {
    staging: Box<[f32]>,
    filled: usize,
}

impl ChunkAssembler {
    pub fn new(chunk_frames: usize) -> Self {
        assert!(chunk_frames > 0, "chunk size must be > 0");
        Self {
            staging: vec![0.0; chunk_frames].into_boxed_slice(),
            filled: 0,
        }
    }

    /// Append `data`, calling `emit` once for every completed chunk in order.
    pub fn push(&mut self, mut data: &[f32], mut emit: impl FnMut(&[f32])) {
        let chunk = self.staging.len();
        while !data.is_empty() {
            // Aligned and long enough: hand out the caller's slice directly.
            if self.filled == 0 && data.len() >= chunk {
                let (head, tail) = data.split_at(chunk);
                emit(head);
                data = tail;
                continue;
            }

            let take = (chunk - self.filled).min(data.len());
            self.staging[self.filled..self.filled + take].copy_from_slice(&data[..take]);
            self.filled += take;
            data = &data[take..];

            if self.filled == chunk {
                emit(&self.staging);
                self.filled = 0;
            }
        }
    }

    /// Samples waiting for the next chunk boundary.
    pub fn pending(&self) -> usize {
        self.filled
    }

    pub fn chunk_frames(&self) -> usize {
        self.staging.len()
    }
}
