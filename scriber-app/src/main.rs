//! Scriber headless host.
//!
//! ## Runtime note
//!
//! Engine calls block on device I/O (opening streams, writing WAV files), so
//! every call goes through `spawn_blocking`. The async side only reads stdin
//! and drives the health timer.

mod commands;
mod settings;
mod state;

use std::sync::Arc;

use anyhow::Result;
use commands::{execute, run_health_check, Command, HELP};
use scriber_core::{CaptureEngine, CpalHost};
use settings::{default_data_dir, default_settings_path, load_settings};
use state::AppState;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Resolve the stored device and open the unified stream on it.
fn open_stream(state: &AppState) -> scriber_core::Result<()> {
    let (index, name) = state.device_selection();
    let device = state.engine.prepare_device(index, name.as_deref())?;
    state.remember_device(device);
    info!(id = ?device, name = ?name, "audio ready");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // ── Tracing ───────────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("scriber=info")),
        )
        .init();

    info!("Scriber starting");

    let settings_path = default_settings_path();
    let app_settings = load_settings(&settings_path);
    info!(
        settings_path = ?settings_path,
        device_index = ?app_settings.device_index,
        device_name = ?app_settings.device_name,
        audio_sensitivity = app_settings.audio_sensitivity,
        pre_roll_ms = app_settings.pre_roll_ms,
        "settings loaded"
    );

    // ── Engine setup ──────────────────────────────────────────────────────
    let config = app_settings.engine_config(&default_data_dir());
    let health_interval = config.health_interval;
    let engine = Arc::new(CaptureEngine::new(Arc::new(CpalHost::new()), config));
    let state = AppState::new(engine, app_settings, settings_path);

    let startup = state.clone();
    if let Err(e) = tokio::task::spawn_blocking(move || open_stream(&startup)).await? {
        error!("no microphone available: {e}");
        println!("status: no microphone available, recording is disabled until one is connected");
    }

    // ── Health timer ──────────────────────────────────────────────────────
    let health_state = state.clone();
    let health_task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(health_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if health_state.engine.is_recording() {
                continue;
            }
            let s = health_state.clone();
            let checked = tokio::task::spawn_blocking(move || {
                let health = run_health_check(&s);
                // The engine never reopens a stream it does not have; the
                // host retries quietly until a device shows up.
                if !health.healthy && !s.engine.is_streaming() {
                    if let Err(e) = open_stream(&s) {
                        debug!("device still unavailable: {e}");
                    }
                }
                health
            })
            .await;
            match checked {
                Ok(health) if health.recovered => println!("status: {}", health.message),
                Ok(_) => {}
                Err(e) => warn!("health check task failed: {e}"),
            }
        }
    });

    // ── Command loop ──────────────────────────────────────────────────────
    println!("{HELP}");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let command = match line.parse::<Command>() {
            Ok(command) => command,
            Err(e) => {
                println!("{e}");
                continue;
            }
        };
        if command == Command::Quit {
            break;
        }
        let s = state.clone();
        match tokio::task::spawn_blocking(move || execute(&s, command)).await? {
            Ok(output) => println!("{output}"),
            Err(e) => {
                error!(?command, "command failed: {e:#}");
                println!("error: {e:#}");
            }
        }
    }

    health_task.abort();
    let engine = Arc::clone(&state.engine);
    tokio::task::spawn_blocking(move || engine.close()).await?;
    info!("Scriber stopped");
    Ok(())
}
