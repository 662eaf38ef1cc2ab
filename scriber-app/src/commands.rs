//! Line command handlers.
//!
//! Each handler stands in for a hotkey or menu action of a desktop host and
//! returns the text to show the user. Handlers block on device I/O; the
//! caller runs them off the async runtime.

use std::str::FromStr;

use anyhow::Result;
use scriber_core::{DeviceHealth, DiscardReason, HealthNotice, StopOutcome};
use tracing::{info, warn};

use crate::state::AppState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Devices,
    Verify,
    Survey,
    Start,
    Stop,
    Health,
    Level,
    Last,
    Help,
    Quit,
}

impl FromStr for Command {
    type Err = String;

    fn from_str(raw: &str) -> std::result::Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "devices" | "ls" => Ok(Command::Devices),
            "verify" => Ok(Command::Verify),
            "survey" | "test-mics" => Ok(Command::Survey),
            "start" | "rec" => Ok(Command::Start),
            "stop" => Ok(Command::Stop),
            "health" => Ok(Command::Health),
            "level" => Ok(Command::Level),
            "last" => Ok(Command::Last),
            "help" | "?" => Ok(Command::Help),
            "quit" | "exit" | "q" => Ok(Command::Quit),
            other => Err(format!("unknown command '{other}' (try 'help')")),
        }
    }
}

pub const HELP: &str = "\
commands:
  devices   list input devices
  verify    list input devices that actually open (slow)
  survey    listen on every microphone and rank by level
  start     start recording
  stop      stop recording and save
  health    check the audio device now
  level     show the live input level
  last      show the last saved recording
  quit      exit";

/// Run one command. `Quit` is handled by the caller.
pub fn execute(state: &AppState, command: Command) -> Result<String> {
    match command {
        Command::Devices => list_devices(state, false),
        Command::Verify => list_devices(state, true),
        Command::Survey => survey_devices(state),
        Command::Start => start_recording(state),
        Command::Stop => stop_recording(state),
        Command::Health => {
            let health = run_health_check(state);
            Ok(serde_json::to_string_pretty(&health)?)
        }
        Command::Level => Ok(format!("level: {:.5}", state.engine.current_level())),
        Command::Last => Ok(match state.engine.last_recording() {
            Some(path) => path.display().to_string(),
            None => "no recording saved yet".to_string(),
        }),
        Command::Help | Command::Quit => Ok(HELP.to_string()),
    }
}

/// Return the usable input devices as JSON.
pub fn list_devices(state: &AppState, verify: bool) -> Result<String> {
    let devices = state.engine.list_devices(verify);
    Ok(serde_json::to_string_pretty(&devices)?)
}

pub fn survey_devices(state: &AppState) -> Result<String> {
    let window = state.engine.config().survey_window;
    let levels = state.engine.survey_devices(window);
    Ok(serde_json::to_string_pretty(&levels)?)
}

/// Re-resolve the stored device, then start recording on it.
pub fn start_recording(state: &AppState) -> Result<String> {
    let (index, name) = state.device_selection();
    let device = state.engine.prepare_device(index, name.as_deref())?;
    state.remember_device(device);
    state.engine.start_recording(device)?;
    Ok("recording…".to_string())
}

pub fn stop_recording(state: &AppState) -> Result<String> {
    let outcome = state.engine.stop_recording()?;
    Ok(describe_outcome(state, &outcome))
}

fn describe_outcome(state: &AppState, outcome: &StopOutcome) -> String {
    match outcome {
        StopOutcome::Saved { path } => format!("saved {}", path.display()),
        StopOutcome::NoAudioDetected { rms } => {
            if state.allow_no_audio_warning() {
                format!(
                    "no audio detected (level {rms:.5}); check that the right microphone \
                     is selected and not muted"
                )
            } else {
                "no audio detected".to_string()
            }
        }
        StopOutcome::Discarded { reason } => match reason {
            DiscardReason::NotRecording => "not recording".to_string(),
            DiscardReason::TooShort => "too short, discarded".to_string(),
            DiscardReason::Empty => "nothing captured".to_string(),
        },
    }
}

/// Run a health check, persist a recovered device id and apply the
/// warning latch.
pub fn run_health_check(state: &AppState) -> DeviceHealth {
    let health = state.engine.check_device_health();
    if health.recovered {
        state.remember_device(health.device_id);
    }
    match state.health_latch.lock().observe(&health) {
        HealthNotice::Warn => {
            warn!(
                message = %health.message,
                "audio device unavailable; recording will not work until it returns"
            );
        }
        HealthNotice::Recovered => {
            info!(id = ?health.device_id, "audio device reconnected");
        }
        HealthNotice::Quiet => {}
    }
    health
}
