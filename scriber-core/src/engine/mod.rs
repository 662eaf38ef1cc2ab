//! `CaptureEngine`: the always-on capture stream and the recording
//! lifecycle built on top of it.
//!
//! ## Lifecycle
//!
//! ```text
//! CaptureEngine::new(host, config)
//!     └─► start_stream(id, name)   → unified stream live, pre-roll filling
//!         ├─► start_recording()    → session seeded from pre-roll
//!         │   └─► stop_recording() → Saved / NoAudioDetected / Discarded
//!         ├─► check_device_health() every ~10 s while idle
//!         └─► close()              → session dropped, stream torn down
//! ```
//!
//! The stream is never paused between recordings. Keeping it open is what
//! makes recording start instant and keeps the pre-roll continuous.
//!
//! ## Locking
//!
//! Two mutexes, always taken in this order: the stream slot (control thread
//! only), then the recording state (shared with the audio callback). The
//! callback holds the recording lock for one ring push and one append.
//!
//! Every control operation that may open or close the device holds the
//! stream slot for its whole duration, including the recording check. A
//! health check and `start_recording` therefore never interleave: either
//! the check finishes before the session begins, or it sees the session and
//! leaves the hardware alone.

pub mod fallback;
pub mod health;
pub mod notice;
pub mod session;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::{
    audio::{
        device::{DeviceCatalog, DeviceDescriptor, DeviceLevel},
        meter::{rms, LevelMeter},
        AudioHost, ChunkSink, DeviceId, InputStream,
    },
    buffering::{
        chunk::{samples_for, ChunkAssembler, CHUNK_FRAMES},
        PreRollRing,
    },
    error::{Result, ScriberError},
};

use fallback::{candidates, try_in_order};
use session::{
    finalize, DiscardReason, FinalizePolicy, RecordingState, SessionStorage, StopOutcome,
};

/// Time source for duration accounting.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// [`Clock`] backed by [`Instant::now`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Configuration for `CaptureEngine`.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Audio kept from before the start signal. Default: 500 ms.
    pub pre_roll: Duration,
    /// Shorter holds are treated as accidental taps. Default: 2 s.
    pub min_duration: Duration,
    /// Hard ceiling on recording length. Default: 600 s.
    pub max_duration: Duration,
    /// RMS below which a recording counts as silent. Default: 0.005.
    pub sensitivity: f32,
    /// Directory for the recording artifacts.
    pub work_dir: PathBuf,
    pub recording_file: String,
    /// Copy of the last saved recording, kept for replay.
    pub last_recording_file: String,
    /// Interval hosts should use for health checks. Default: 10 s.
    pub health_interval: Duration,
    /// How long the microphone survey listens. Default: 3 s.
    pub survey_window: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            pre_roll: Duration::from_millis(500),
            min_duration: Duration::from_secs(2),
            max_duration: Duration::from_secs(600),
            sensitivity: 0.005,
            work_dir: std::env::temp_dir().join("scriber"),
            recording_file: "temp_recording.wav".to_string(),
            last_recording_file: "last_recording.wav".to_string(),
            health_interval: Duration::from_secs(10),
            survey_window: Duration::from_secs(3),
        }
    }
}

impl EngineConfig {
    pub fn recording_path(&self) -> PathBuf {
        self.work_dir.join(&self.recording_file)
    }

    pub fn last_recording_path(&self) -> PathBuf {
        self.work_dir.join(&self.last_recording_file)
    }

    pub fn max_samples(&self) -> usize {
        samples_for(self.max_duration)
    }

    /// Chunk slots a session needs to reach the ceiling, plus the pre-roll.
    pub fn max_session_chunks(&self) -> usize {
        self.max_samples().div_ceil(CHUNK_FRAMES) + 1
    }
}

/// State reachable from the audio callback.
struct CaptureShared {
    recording: Mutex<RecordingState>,
    level: LevelMeter,
}

impl CaptureShared {
    fn on_chunk(&self, chunk: &[f32]) {
        self.level.set(rms(chunk));
        self.recording.lock().on_chunk(chunk);
    }
}

struct BoundStream {
    handle: Box<dyn InputStream>,
    /// `None` when bound to the system default.
    device: Option<DeviceId>,
}

/// The top-level engine handle.
///
/// `CaptureEngine` is `Send + Sync`; all fields use interior mutability.
/// Wrap it in an `Arc` to share it between the command loop and the health
/// timer.
pub struct CaptureEngine {
    config: EngineConfig,
    host: Arc<dyn AudioHost>,
    catalog: DeviceCatalog,
    clock: Arc<dyn Clock>,
    shared: Arc<CaptureShared>,
    stream: Mutex<Option<BoundStream>>,
    /// Durable identity of the selected device, kept across rebuilds.
    device_name: Mutex<Option<String>>,
    sensitivity: Mutex<f32>,
}

impl CaptureEngine {
    /// Create an engine. Does not open any device; call `start_stream()`.
    pub fn new(host: Arc<dyn AudioHost>, config: EngineConfig) -> Self {
        Self::with_clock(host, Arc::new(SystemClock), config)
    }

    pub fn with_clock(
        host: Arc<dyn AudioHost>,
        clock: Arc<dyn Clock>,
        config: EngineConfig,
    ) -> Self {
        let ring = PreRollRing::new(config.pre_roll);
        debug!(
            seed_chunks = ring.seed_chunks(),
            capacity_chunks = ring.capacity_chunks(),
            "pre-roll ring allocated"
        );
        let shared = Arc::new(CaptureShared {
            recording: Mutex::new(RecordingState::new(ring, config.max_samples())),
            level: LevelMeter::new(),
        });
        Self {
            catalog: DeviceCatalog::new(Arc::clone(&host)),
            sensitivity: Mutex::new(config.sensitivity),
            config,
            host,
            clock,
            shared,
            stream: Mutex::new(None),
            device_name: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn catalog(&self) -> &DeviceCatalog {
        &self.catalog
    }

    /// Usable input devices. See [`DeviceCatalog::list_devices`].
    pub fn list_devices(&self, verify: bool) -> Vec<DeviceDescriptor> {
        self.catalog.list_devices(verify)
    }

    // ── Unified stream ────────────────────────────────────────────────────

    fn make_sink(&self) -> ChunkSink {
        let shared = Arc::clone(&self.shared);
        let mut assembler = ChunkAssembler::new(CHUNK_FRAMES);
        Box::new(move |data: &[f32]| {
            assembler.push(data, |chunk| shared.on_chunk(chunk));
        })
    }

    /// Open the unified stream, replacing any running one.
    ///
    /// Tries the requested device, then the device `device_name` resolves
    /// to (if different), then the system default. `device_name` is
    /// remembered for later recovery whichever attempt wins. Returns the
    /// device actually opened (`None` = system default).
    ///
    /// # Errors
    /// [`ScriberError::NoInputDevice`] when every attempt fails; the engine
    /// is then left without a stream.
    pub fn start_stream(
        &self,
        device: Option<DeviceId>,
        device_name: Option<&str>,
    ) -> Result<Option<DeviceId>> {
        let mut slot = self.stream.lock();
        self.open_in(&mut slot, device, device_name)
    }

    /// Tear the unified stream down. Used on device switch and shutdown.
    ///
    /// Clears the pre-roll: audio from a closed stream must not leak into
    /// the next one.
    pub fn stop_stream(&self) {
        let mut slot = self.stream.lock();
        self.close_in(&mut slot);
    }

    /// [`start_stream`](Self::start_stream) on a slot the caller has locked.
    fn open_in(
        &self,
        slot: &mut Option<BoundStream>,
        device: Option<DeviceId>,
        device_name: Option<&str>,
    ) -> Result<Option<DeviceId>> {
        if let Some(name) = device_name.map(str::trim).filter(|n| !n.is_empty()) {
            *self.device_name.lock() = Some(name.to_string());
        }
        let remembered = self.device_name();

        self.close_in(slot);

        let by_name = remembered
            .as_deref()
            .and_then(|name| self.catalog.find_by_name(name));
        let list = candidates(device, by_name);

        let opened = try_in_order(
            &list,
            |candidate| {
                info!(%candidate, "opening unified stream");
                self.host.open_input(candidate.target(), self.make_sink())
            },
            |candidate, e| {
                if e.is_transient() {
                    warn!(%candidate, "failed to open input: {e}");
                } else {
                    error!(%candidate, "failed to open input: {e}");
                }
            },
        );

        match opened {
            Some((candidate, handle)) => {
                let device = candidate.target();
                info!(%candidate, "unified stream started");
                *slot = Some(BoundStream { handle, device });
                Ok(device)
            }
            None => {
                error!(requested = ?device, "no input device could be opened");
                Err(ScriberError::NoInputDevice)
            }
        }
    }

    /// [`stop_stream`](Self::stop_stream) on a slot the caller has locked.
    fn close_in(&self, slot: &mut Option<BoundStream>) {
        let Some(mut bound) = slot.take() else {
            return;
        };
        bound.handle.stop();
        self.reset_capture();
        info!(id = ?bound.device, "unified stream stopped");
    }

    fn reset_capture(&self) {
        self.shared.recording.lock().clear_ring();
        self.shared.level.reset();
    }

    pub fn is_streaming(&self) -> bool {
        self.stream.lock().is_some()
    }

    /// Device the stream is bound to; `None` for the default or no stream.
    pub fn stream_device(&self) -> Option<DeviceId> {
        self.stream.lock().as_ref().and_then(|s| s.device)
    }

    /// Name remembered for recovery.
    pub fn device_name(&self) -> Option<String> {
        self.device_name.lock().clone()
    }

    /// Map a stored device selection onto the current device table and
    /// restart the stream if it moved.
    ///
    /// Also (re)opens the stream when none is running or it is bound to a
    /// different device. A selection sitting on the system default moves
    /// back to the named device once it is present again. Returns the id the
    /// caller should persist. Never restarts while a recording is running.
    pub fn prepare_device(
        &self,
        device: Option<DeviceId>,
        device_name: Option<&str>,
    ) -> Result<Option<DeviceId>> {
        let mut slot = self.stream.lock();
        let remembered = self.device_name();
        let name = device_name.or(remembered.as_deref());
        let resolution = self.catalog.resolve(device, name);
        if self.is_recording() {
            if resolution.needs_restart {
                warn!("device changed during a recording; keeping the current stream");
            }
            return Ok(slot.as_ref().map_or(resolution.device, |s| s.device));
        }
        let bound = slot.as_ref().map(|s| s.device);
        if resolution.needs_restart || bound != Some(resolution.device) {
            return self.open_in(&mut slot, resolution.device, device_name);
        }
        Ok(resolution.device)
    }

    // ── Recording ─────────────────────────────────────────────────────────

    /// Begin a recording seeded with the pre-roll.
    ///
    /// No-op if a recording is already running. Opens the stream first if
    /// none is running, which costs the one-time device open latency.
    pub fn start_recording(&self, device: Option<DeviceId>) -> Result<()> {
        let mut slot = self.stream.lock();
        if self.is_recording() {
            debug!("start_recording ignored, already recording");
            return Ok(());
        }

        let instant = slot.is_some();
        if !instant {
            let name = self.device_name();
            info!(id = ?device, "no stream running, opening one for recording");
            self.open_in(&mut slot, device, name.as_deref())?;
        }

        let signalled_at = self.clock.now();
        let started_at = signalled_at
            .checked_sub(self.config.pre_roll)
            .unwrap_or(signalled_at);
        let seed_samples = self.shared.recording.lock().ring().len_samples();
        let storage = SessionStorage::with_capacity(seed_samples, self.config.max_session_chunks());

        let mut state = self.shared.recording.lock();
        if state.begin(storage, signalled_at, started_at) {
            let pre_roll_samples = state.recorded_samples();
            drop(state);
            info!(instant, pre_roll_samples, "recording started");
        }
        Ok(())
    }

    /// End the recording and persist it.
    ///
    /// Validation, encoding and disk I/O run after the recording lock is
    /// released. Only a failed WAV write is an error; every other way of
    /// not producing a file is a [`StopOutcome`].
    pub fn stop_recording(&self) -> Result<StopOutcome> {
        let stopped_at = self.clock.now();
        let taken = self.shared.recording.lock().take();
        let Some(session) = taken else {
            debug!("stop_recording ignored, not recording");
            return Ok(StopOutcome::Discarded {
                reason: DiscardReason::NotRecording,
            });
        };

        let recording_path = self.config.recording_path();
        let last_recording_path = self.config.last_recording_path();
        let policy = FinalizePolicy {
            min_duration: self.config.min_duration,
            max_samples: self.config.max_samples(),
            sensitivity: self.sensitivity(),
            recording_path: &recording_path,
            last_recording_path: &last_recording_path,
        };
        finalize(session, stopped_at, &policy).map_err(|e| {
            error!("failed to save recording: {e}");
            e
        })
    }

    /// `true` from `start_recording` until `stop_recording`, including
    /// after the ceiling froze the session.
    pub fn is_recording(&self) -> bool {
        self.shared.recording.lock().is_recording()
    }

    /// The running session hit the duration ceiling and is waiting for stop.
    pub fn is_capped(&self) -> bool {
        self.shared.recording.lock().is_capped()
    }

    /// RMS of the most recent chunk; 0 with no stream.
    pub fn current_level(&self) -> f32 {
        self.shared.level.get()
    }

    pub fn sensitivity(&self) -> f32 {
        *self.sensitivity.lock()
    }

    /// Change the silence threshold. Applies from the next stop.
    pub fn set_sensitivity(&self, sensitivity: f32) {
        if !sensitivity.is_finite() || sensitivity < 0.0 {
            warn!(sensitivity, "ignoring invalid sensitivity");
            return;
        }
        *self.sensitivity.lock() = sensitivity;
        info!(sensitivity, "sensitivity updated");
    }

    /// The replay copy of the last saved recording, if present.
    pub fn last_recording(&self) -> Option<PathBuf> {
        let path = self.config.last_recording_path();
        path.is_file().then_some(path)
    }

    // ── Diagnostics ───────────────────────────────────────────────────────

    /// Listen on every device at once and rank them by level.
    ///
    /// The unified stream is closed for the duration (some drivers refuse a
    /// second open) and restored afterwards. Refused while recording.
    pub fn survey_devices(&self, window: Duration) -> Vec<DeviceLevel> {
        let mut slot = self.stream.lock();
        if self.is_recording() {
            warn!("microphone survey refused during a recording");
            return Vec::new();
        }

        let previous = slot.as_ref().map(|s| s.device);
        self.close_in(&mut slot);

        info!(window_ms = window.as_millis() as u64, "surveying microphones");
        let levels = self.catalog.survey_levels(window);

        if let Some(device) = previous {
            let name = self.device_name();
            if let Err(e) = self.open_in(&mut slot, device, name.as_deref()) {
                error!("failed to restore unified stream after survey: {e}");
            }
        }
        levels
    }

    /// Discard any running session and release the device.
    pub fn close(&self) {
        if self.shared.recording.lock().take().is_some() {
            info!("recording discarded on close");
        }
        self.stop_stream();
    }
}
