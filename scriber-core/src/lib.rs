//! # scriber-core
//!
//! Continuous audio capture engine for push-to-talk dictation.
//!
//! ## Architecture
//!
//! ```text
//! AudioHost (cpal) ─► ChunkAssembler ─► level meter
//!                                     └► recording mutex ─┬─► PreRollRing (always)
//!                                                         └─► ActiveSession (while recording)
//!
//! control thread: start_recording / stop_recording ─► finalize ─► WAV
//! health timer:   check_device_health ─► DeviceCatalog::resolve ─► start_stream
//! ```
//!
//! The audio callback never logs, never touches disk and holds the recording
//! lock for one push and one append. Everything else runs on the caller's
//! thread.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod audio;
pub mod buffering;
pub mod engine;
pub mod error;

// Convenience re-exports for downstream crates
pub use audio::{
    device::{DeviceCatalog, DeviceDescriptor, DeviceLevel, Resolution},
    AudioHost, ChunkSink, DeviceId, InputStream, RawDevice,
};
pub use engine::{
    health::DeviceHealth,
    notice::{HealthNotice, HealthWarningLatch, WarningGate},
    session::{DiscardReason, StopOutcome},
    CaptureEngine, Clock, EngineConfig, SystemClock,
};
pub use error::{HostError, Result, ScriberError};

#[cfg(feature = "audio-cpal")]
pub use audio::CpalHost;
