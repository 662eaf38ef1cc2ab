use thiserror::Error;

/// Failures reported by an [`AudioHost`](crate::audio::AudioHost) backend.
///
/// The engine never lets these escape a public operation unchanged: the
/// catalog degrades them to "no devices" / "not available", and the stream
/// fallback chain logs them and moves on to the next candidate.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HostError {
    #[error("input device {0} not found")]
    DeviceNotFound(String),

    #[error("input device {0} is busy")]
    DeviceBusy(String),

    #[error("input device disconnected: {0}")]
    Disconnected(String),

    #[error("unsupported stream configuration: {0}")]
    UnsupportedConfig(String),

    #[error("audio backend error: {0}")]
    Backend(String),
}

impl HostError {
    /// Errors that are expected around sleep/resume and docking changes.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            HostError::DeviceNotFound(_) | HostError::DeviceBusy(_) | HostError::Disconnected(_)
        )
    }
}

/// All errors produced by scriber-core.
#[derive(Debug, Error)]
pub enum ScriberError {
    #[error("no usable input device: every candidate failed to open")]
    NoInputDevice,

    #[error(transparent)]
    Host(#[from] HostError),

    #[error("WAV encoding error: {0}")]
    Wav(#[from] hound::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, ScriberError>;
