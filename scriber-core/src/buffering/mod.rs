//! Rolling pre-roll window over the capture stream.
//!
//! Backed by `ringbuf::HeapRb<f32>` used as a plain local ring (not split
//! into producer/consumer halves): it lives inside the recording mutex and
//! `push_slice_overwrite` evicts the oldest samples without allocating.

pub mod chunk;

use std::time::Duration;

use ringbuf::{
    traits::{Consumer, Observer, RingBuffer as _},
    HeapRb,
};

use chunk::{chunks_for, CHUNK_FRAMES};

/// Extra chunks kept beyond the pre-roll window.
pub const PRE_ROLL_SLACK_CHUNKS: usize = 1;

/// The most recent chunks received while the stream is active.
///
/// Filled by the capture callback regardless of recording state. Cleared only
/// when the stream is torn down; a finished recording leaves it intact so the
/// next one starts with fresh pre-roll straight away.
pub struct PreRollRing {
    rb: HeapRb<f32>,
    chunk_frames: usize,
    seed_chunks: usize,
}

impl PreRollRing {
    /// Ring sized for `pre_roll` of audio in [`CHUNK_FRAMES`] chunks.
    pub fn new(pre_roll: Duration) -> Self {
        Self::with_layout(chunks_for(pre_roll), CHUNK_FRAMES)
    }

    /// Ring that seeds recordings with `seed_chunks` chunks of `chunk_frames`.
    pub fn with_layout(seed_chunks: usize, chunk_frames: usize) -> Self {
        assert!(chunk_frames > 0, "chunk size must be > 0");
        let capacity = (seed_chunks + PRE_ROLL_SLACK_CHUNKS) * chunk_frames;
        Self {
            rb: HeapRb::new(capacity),
            chunk_frames,
            seed_chunks,
        }
    }

    /// Append one chunk, evicting the oldest one when full.
    pub fn push_chunk(&mut self, chunk: &[f32]) {
        self.rb.push_slice_overwrite(chunk);
    }

    /// Copy the most recent pre-roll window onto the end of `out`.
    ///
    /// `out` receives a private copy; later pushes cannot touch it.
    pub fn snapshot_into(&self, out: &mut Vec<f32>) {
        let occupied = self.rb.occupied_len();
        let wanted = occupied.min(self.seed_chunks * self.chunk_frames);
        out.reserve(wanted);
        out.extend(self.rb.iter().skip(occupied - wanted).copied());
    }

    pub fn clear(&mut self) {
        self.rb.clear();
    }

    pub fn len_samples(&self) -> usize {
        self.rb.occupied_len()
    }

    pub fn len_chunks(&self) -> usize {
        self.rb.occupied_len() / self.chunk_frames
    }

    pub fn capacity_chunks(&self) -> usize {
        self.rb.capacity().get() / self.chunk_frames
    }

    /// Chunks copied into a new recording.
    pub fn seed_chunks(&self) -> usize {
        self.seed_chunks
    }
}
