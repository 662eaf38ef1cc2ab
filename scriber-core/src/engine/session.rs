//! Recording session state shared with the capture callback, and the
//! validation/persistence step run when a session ends.
//!
//! ## States
//!
//! ```text
//! Idle ──begin()──► Active ──(600 s reached)──► Capped
//!   ▲                  │                           │
//!   └────── take() ◄───┴───────────────────────────┘
//!                 └─► finalize(): validate, encode, write
//! ```
//!
//! Everything in [`RecordingState`] runs under the engine's recording mutex
//! and is O(1) per chunk. [`finalize`] runs after the lock is released, on a
//! buffer the callback can no longer reach.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{info, warn};

use crate::audio::{meter::rms, wav::write_pcm16};
use crate::buffering::{chunk::duration_of, PreRollRing};
use crate::error::Result;

/// Why a stop produced no recording.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum DiscardReason {
    /// `stop` was called with no session running.
    NotRecording,
    /// Released before the minimum hold time; treated as an accidental tap.
    TooShort,
    /// The session ended without a single captured sample.
    Empty,
}

/// Result of stopping a recording.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum StopOutcome {
    /// A WAV file was written to this path.
    Saved { path: PathBuf },
    /// The recording was long enough but its RMS stayed below the
    /// sensitivity threshold. Usually a muted or wrong microphone.
    NoAudioDetected { rms: f32 },
    /// Nothing was recorded, and nothing on disk was touched.
    Discarded { reason: DiscardReason },
}

impl StopOutcome {
    pub fn path(&self) -> Option<&Path> {
        match self {
            StopOutcome::Saved { path } => Some(path),
            _ => None,
        }
    }

    pub fn is_no_audio(&self) -> bool {
        matches!(self, StopOutcome::NoAudioDetected { .. })
    }
}

/// Buffers for a new session, allocated before the recording lock is taken.
#[derive(Debug, Default)]
pub struct SessionStorage {
    seed: Vec<f32>,
    chunks: Vec<Box<[f32]>>,
}

impl SessionStorage {
    /// Room for `seed_samples` of pre-roll and `max_chunks` appended chunks.
    ///
    /// Sizing `max_chunks` for the whole ceiling keeps the chunk list from
    /// ever growing on the callback path.
    pub fn with_capacity(seed_samples: usize, max_chunks: usize) -> Self {
        Self {
            seed: Vec::with_capacity(seed_samples),
            chunks: Vec::with_capacity(max_chunks),
        }
    }
}

/// An in-flight recording: the pre-roll followed by every chunk received
/// since, in arrival order.
#[derive(Debug)]
pub struct ActiveSession {
    chunks: Vec<Box<[f32]>>,
    len: usize,
    /// When the start command arrived.
    signalled_at: Instant,
    /// Logical start, backdated by the pre-roll window.
    started_at: Instant,
    /// The ceiling was reached; further chunks are ignored.
    capped: bool,
}

impl ActiveSession {
    /// Captured samples so far.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn chunks(&self) -> &[Box<[f32]>] {
        &self.chunks
    }

    /// Slots reserved in the chunk list.
    pub fn chunk_capacity(&self) -> usize {
        self.chunks.capacity()
    }

    /// Join the chunks into one buffer of at most `max_samples`.
    pub fn to_samples(&self, max_samples: usize) -> Vec<f32> {
        let mut samples = Vec::with_capacity(self.len.min(max_samples));
        for chunk in &self.chunks {
            let room = max_samples - samples.len();
            if room == 0 {
                break;
            }
            samples.extend_from_slice(&chunk[..chunk.len().min(room)]);
        }
        samples
    }

    fn append(&mut self, chunk: &[f32]) {
        self.chunks.push(chunk.into());
        self.len += chunk.len();
    }

    pub fn signalled_at(&self) -> Instant {
        self.signalled_at
    }

    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    pub fn is_capped(&self) -> bool {
        self.capped
    }
}

/// Pre-roll ring plus the optional active session.
///
/// Both live behind one mutex so the snapshot taken at start and the
/// chunk appended by the callback can never interleave.
pub struct RecordingState {
    ring: PreRollRing,
    session: Option<ActiveSession>,
    max_samples: usize,
}

impl RecordingState {
    pub fn new(ring: PreRollRing, max_samples: usize) -> Self {
        Self {
            ring,
            session: None,
            max_samples,
        }
    }

    /// Callback path: feed the ring, then the session if one is running.
    pub fn on_chunk(&mut self, chunk: &[f32]) {
        self.ring.push_chunk(chunk);

        let Some(session) = self.session.as_mut() else {
            return;
        };
        if session.capped {
            return;
        }
        let room = self.max_samples.saturating_sub(session.len);
        let take = room.min(chunk.len());
        if take > 0 {
            session.append(&chunk[..take]);
        }
        if session.len >= self.max_samples {
            session.capped = true;
        }
    }

    /// Start a session seeded with the current pre-roll.
    ///
    /// `storage` is allocated by the caller outside the lock. Returns `false`
    /// (and leaves the running session untouched) when already recording.
    pub fn begin(
        &mut self,
        storage: SessionStorage,
        signalled_at: Instant,
        started_at: Instant,
    ) -> bool {
        if self.session.is_some() {
            return false;
        }
        let SessionStorage {
            mut seed,
            mut chunks,
        } = storage;
        seed.clear();
        chunks.clear();
        self.ring.snapshot_into(&mut seed);
        seed.truncate(self.max_samples);

        let len = seed.len();
        if len > 0 {
            chunks.push(seed.into_boxed_slice());
        }
        self.session = Some(ActiveSession {
            chunks,
            len,
            signalled_at,
            started_at,
            capped: len >= self.max_samples,
        });
        true
    }

    /// End the session and hand its buffer to the caller.
    pub fn take(&mut self) -> Option<ActiveSession> {
        self.session.take()
    }

    pub fn is_recording(&self) -> bool {
        self.session.is_some()
    }

    pub fn is_capped(&self) -> bool {
        self.session.as_ref().is_some_and(|s| s.capped)
    }

    /// Samples captured so far by the running session.
    pub fn recorded_samples(&self) -> usize {
        self.session.as_ref().map_or(0, |s| s.len)
    }

    pub fn ring(&self) -> &PreRollRing {
        &self.ring
    }

    /// Drop buffered pre-roll. Only called on stream teardown.
    pub fn clear_ring(&mut self) {
        self.ring.clear();
    }
}

/// Thresholds and output paths applied by [`finalize`].
#[derive(Debug, Clone)]
pub struct FinalizePolicy<'a> {
    pub min_duration: Duration,
    pub max_samples: usize,
    pub sensitivity: f32,
    pub recording_path: &'a Path,
    pub last_recording_path: &'a Path,
}

/// Validate a finished session and write it out.
///
/// The minimum-duration gate is measured from when the start command
/// arrived, so pre-roll never turns an accidental tap into a recording.
/// The written audio still includes the pre-roll. Chunks are joined here,
/// off the callback path.
pub fn finalize(
    session: ActiveSession,
    stopped_at: Instant,
    policy: &FinalizePolicy<'_>,
) -> Result<StopOutcome> {
    let held = stopped_at.saturating_duration_since(session.signalled_at);
    let logical = stopped_at.saturating_duration_since(session.started_at);
    info!(
        held_s = held.as_secs_f32(),
        logical_s = logical.as_secs_f32(),
        samples = session.len(),
        capped = session.capped,
        "recording stopped"
    );

    if held < policy.min_duration {
        info!(
            held_s = held.as_secs_f32(),
            min_s = policy.min_duration.as_secs_f32(),
            "recording too short, discarded"
        );
        return Ok(StopOutcome::Discarded {
            reason: DiscardReason::TooShort,
        });
    }

    if session.is_empty() {
        warn!("no audio captured during recording");
        return Ok(StopOutcome::Discarded {
            reason: DiscardReason::Empty,
        });
    }
    let samples = session.to_samples(policy.max_samples);

    let level = rms(&samples);
    info!(
        rms = level,
        threshold = policy.sensitivity,
        duration_s = duration_of(samples.len()).as_secs_f32(),
        "recording level"
    );
    if level < policy.sensitivity {
        warn!(rms = level, threshold = policy.sensitivity, "no audio level detected");
        return Ok(StopOutcome::NoAudioDetected { rms: level });
    }

    write_pcm16(policy.recording_path, &samples)?;
    info!(path = %policy.recording_path.display(), "recording saved");

    if let Err(e) = std::fs::copy(policy.recording_path, policy.last_recording_path) {
        warn!(
            path = %policy.last_recording_path.display(),
            "failed to keep a copy of the last recording: {e}"
        );
    }

    Ok(StopOutcome::Saved {
        path: policy.recording_path.to_path_buf(),
    })
}
