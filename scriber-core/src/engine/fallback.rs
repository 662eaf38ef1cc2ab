//! Ordered device candidates for opening the unified stream.
//!
//! Opening is modelled as a list of strategies tried front to back; the
//! first one that opens wins. The list is built once per attempt so the
//! preference order is visible in a single place:
//!
//! ```text
//! Requested(id) ─► ByName(id') ─► SystemDefault
//! ```

use std::fmt;

use crate::audio::DeviceId;

/// One way of choosing the device to open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Candidate {
    /// The id the caller asked for.
    Requested(DeviceId),
    /// The id the remembered device name currently resolves to.
    ByName(DeviceId),
    /// Whatever the platform reports as the default input.
    SystemDefault,
}

impl Candidate {
    /// Device argument for [`AudioHost::open_input`](crate::audio::AudioHost::open_input).
    pub fn target(self) -> Option<DeviceId> {
        match self {
            Candidate::Requested(id) | Candidate::ByName(id) => Some(id),
            Candidate::SystemDefault => None,
        }
    }
}

impl fmt::Display for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Candidate::Requested(id) => write!(f, "requested device {id}"),
            Candidate::ByName(id) => write!(f, "device {id} (matched by name)"),
            Candidate::SystemDefault => f.write_str("system default input"),
        }
    }
}

/// Build the candidate list.
///
/// `by_name` is only included when it differs from `requested`, and
/// duplicates never appear twice.
pub fn candidates(requested: Option<DeviceId>, by_name: Option<DeviceId>) -> Vec<Candidate> {
    let mut out = Vec::with_capacity(3);
    if let Some(id) = requested {
        out.push(Candidate::Requested(id));
    }
    if let Some(id) = by_name {
        if requested != Some(id) {
            out.push(Candidate::ByName(id));
        }
    }
    out.push(Candidate::SystemDefault);
    out
}

/// Run `attempt` on each candidate until one succeeds.
///
/// `on_failure` sees every failed candidate with its error. Returns the
/// winning candidate and its value, or `None` when the list is exhausted.
pub fn try_in_order<T, E>(
    candidates: &[Candidate],
    mut attempt: impl FnMut(Candidate) -> Result<T, E>,
    mut on_failure: impl FnMut(Candidate, E),
) -> Option<(Candidate, T)> {
    for &candidate in candidates {
        match attempt(candidate) {
            Ok(value) => return Some((candidate, value)),
            Err(e) => on_failure(candidate, e),
        }
    }
    None
}
