//! Platform audio abstraction.
//!
//! # Design constraints
//!
//! The engine never looks the audio runtime up through a global. It is handed
//! an `Arc<dyn AudioHost>` at construction, which makes the cpal backend one
//! implementation among others (tests drive the engine with an in-memory
//! host).
//!
//! The sink passed to [`AudioHost::open_input`] runs on the runtime's audio
//! thread. Whatever it does must be O(1) per chunk: no logging, no I/O, no
//! blocking calls, no allocation on the steady-state path.

pub mod device;
pub mod meter;
pub mod resample;
pub mod wav;

#[cfg(feature = "audio-cpal")]
pub mod cpal_host;

#[cfg(feature = "audio-cpal")]
pub use cpal_host::CpalHost;

use serde::{Deserialize, Serialize};

use crate::error::HostError;

/// Position of a device in the platform's device table.
///
/// Only valid for the current enumeration epoch: the OS may hand the same
/// physical microphone a different id after sleep/resume or re-docking.
pub type DeviceId = usize;

/// One row of the platform's input device table, unfiltered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawDevice {
    pub id: DeviceId,
    pub name: String,
    pub input_channels: u16,
}

/// Receives mono f32 samples at 16 kHz from the audio thread.
///
/// Buffer sizes are whatever the runtime delivers; the engine re-blocks them.
pub type ChunkSink = Box<dyn FnMut(&[f32]) + Send + 'static>;

/// Contract for the platform audio runtime.
pub trait AudioHost: Send + Sync {
    /// Query the platform device table.
    fn list_input_devices(&self) -> Result<Vec<RawDevice>, HostError>;

    /// Open and start a mono 16 kHz input stream.
    ///
    /// `device == None` selects the system default input.
    fn open_input(
        &self,
        device: Option<DeviceId>,
        sink: ChunkSink,
    ) -> Result<Box<dyn InputStream>, HostError>;
}

/// Handle to a running input stream.
pub trait InputStream: Send {
    /// The runtime's own liveness flag.
    ///
    /// Goes false when the device disappears under the stream (sleep,
    /// unplugging) even though no error was returned to the caller.
    fn is_active(&self) -> bool;

    /// Stop and release the stream.
    ///
    /// Must not return before the sink has been invoked for the last time.
    fn stop(&mut self);
}
