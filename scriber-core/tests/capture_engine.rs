mod common;

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use common::{Rig, CHUNK};
use scriber_core::audio::wav::{read_pcm16, to_pcm16};
use scriber_core::{DiscardReason, Resolution, ScriberError, StopOutcome};

const USB_MIC: &str = "USB Microphone (Yeti)";
const WEBCAM: &str = "Webcam Mic (C920)";

fn started_rig() -> Rig {
    let rig = Rig::new(&[(0, WEBCAM), (3, USB_MIC)]);
    let bound = rig
        .engine
        .start_stream(Some(3), Some(USB_MIC))
        .expect("stream opens");
    assert_eq!(bound, Some(3));
    rig
}

fn saved_path(outcome: &StopOutcome) -> &std::path::Path {
    outcome
        .path()
        .unwrap_or_else(|| panic!("expected a saved recording, got {outcome:?}"))
}

#[test]
fn recording_includes_pre_roll() {
    let rig = started_rig();
    rig.feed_for(Duration::from_secs(1), 0.2);

    rig.engine.start_recording(Some(3)).expect("start");
    let held_chunks = rig.feed_for(Duration::from_millis(3_200), 0.2);
    let outcome = rig.engine.stop_recording().expect("stop");

    let (spec, pcm) = read_pcm16(saved_path(&outcome)).expect("decode");
    assert_eq!(spec.sample_rate, 16_000);
    assert_eq!(spec.channels, 1);
    // 500 ms of pre-roll is 16 whole chunks.
    assert_eq!(pcm.len(), (16 + held_chunks) * CHUNK);
    let min_len = (3.2 + 0.5) * 16_000.0 - CHUNK as f64;
    assert!(pcm.len() as f64 >= min_len);
}

#[test]
fn holds_under_two_seconds_are_discarded() {
    let rig = started_rig();
    rig.feed_for(Duration::from_secs(1), 0.2);

    rig.engine.start_recording(None).expect("start");
    rig.feed_for(Duration::from_millis(1_900), 0.2);
    let outcome = rig.engine.stop_recording().expect("stop");

    assert_eq!(
        outcome,
        StopOutcome::Discarded {
            reason: DiscardReason::TooShort
        }
    );
    assert!(!rig.engine.config().recording_path().exists());
    assert!(!rig.engine.is_recording());
}

#[test]
fn quick_tap_leaves_previous_recording_untouched() {
    let rig = started_rig();
    rig.feed_for(Duration::from_secs(1), 0.2);
    rig.engine.start_recording(None).expect("start");
    rig.feed_for(Duration::from_millis(2_500), 0.3);
    let first = rig.engine.stop_recording().expect("stop");
    let before = std::fs::read(saved_path(&first)).expect("read first");

    rig.engine.start_recording(None).expect("start");
    rig.feed_for(Duration::from_millis(400), 0.6);
    let outcome = rig.engine.stop_recording().expect("stop");

    assert_eq!(
        outcome,
        StopOutcome::Discarded {
            reason: DiscardReason::TooShort
        }
    );
    let after = std::fs::read(rig.engine.config().recording_path()).expect("read again");
    assert_eq!(before, after);
}

#[test]
fn silent_recording_yields_no_audio_outcome() {
    let rig = started_rig();
    rig.feed_for(Duration::from_secs(1), 0.001);
    rig.engine.start_recording(None).expect("start");
    rig.feed_for(Duration::from_secs(3), 0.001);

    let outcome = rig.engine.stop_recording().expect("stop");
    match outcome {
        StopOutcome::NoAudioDetected { rms } => assert!(rms < 0.005),
        other => panic!("expected no-audio outcome, got {other:?}"),
    }
    assert!(!rig.engine.config().recording_path().exists());
}

#[test]
fn sensitivity_change_applies_to_next_stop() {
    let rig = started_rig();
    rig.engine.set_sensitivity(0.0005);
    rig.engine.start_recording(None).expect("start");
    rig.feed_for(Duration::from_secs(3), 0.001);
    let outcome = rig.engine.stop_recording().expect("stop");
    assert!(outcome.path().is_some());

    rig.engine.set_sensitivity(f32::NAN);
    assert_eq!(rig.engine.sensitivity(), 0.0005);
}

#[test]
fn double_start_keeps_one_session() {
    let rig = started_rig();
    rig.feed_chunks(20, 0.2);

    rig.engine.start_recording(None).expect("start");
    rig.feed_chunks(40, 0.2);
    rig.engine.start_recording(None).expect("second start is a no-op");
    assert!(rig.engine.is_recording());
    rig.feed_chunks(40, 0.2);

    let outcome = rig.engine.stop_recording().expect("stop");
    let (_, pcm) = read_pcm16(saved_path(&outcome)).expect("decode");
    assert_eq!(pcm.len(), (16 + 80) * CHUNK);

    assert_eq!(
        rig.engine.stop_recording().expect("stop again"),
        StopOutcome::Discarded {
            reason: DiscardReason::NotRecording
        }
    );
}

#[test]
fn recorded_pcm_matches_input_samples() {
    let rig = started_rig();
    rig.engine.set_sensitivity(0.0);
    rig.engine.start_recording(None).expect("start");

    let input: Vec<f32> = (0..70 * CHUNK)
        .map(|i| ((i % 200) as f32 / 100.0 - 1.0) * 0.9)
        .collect();
    for chunk in input.chunks(CHUNK) {
        assert!(rig.host.feed(chunk));
        rig.clock.advance(common::CHUNK_DURATION);
    }

    let outcome = rig.engine.stop_recording().expect("stop");
    let (_, pcm) = read_pcm16(saved_path(&outcome)).expect("decode");
    assert_eq!(pcm.len(), input.len());
    for (got, &want) in pcm.iter().zip(&input) {
        let expected = i32::from(to_pcm16(want));
        assert!((i32::from(*got) - expected).abs() <= 1);
    }
}

#[test]
fn saved_recording_is_copied_for_replay() {
    let rig = started_rig();
    assert_eq!(rig.engine.last_recording(), None);
    rig.feed_for(Duration::from_secs(1), 0.2);

    rig.engine.start_recording(Some(3)).expect("start");
    rig.feed_for(Duration::from_millis(3_200), 0.25);
    let outcome = rig.engine.stop_recording().expect("stop");

    let path = saved_path(&outcome);
    assert_eq!(path, rig.engine.config().recording_path().as_path());
    let (_, pcm) = read_pcm16(path).expect("decode");
    let seconds = pcm.len() as f64 / 16_000.0;
    assert!((seconds - 3.7).abs() <= 0.033, "duration was {seconds}");

    let last = rig.engine.last_recording().expect("replay copy");
    let (_, replay) = read_pcm16(&last).expect("decode copy");
    assert_eq!(replay, pcm);
    assert!(rig.engine.is_streaming());
}

#[test]
fn pre_roll_does_not_survive_stream_restart() {
    let rig = started_rig();
    rig.feed_for(Duration::from_secs(1), 0.5);
    rig.engine.stop_stream();
    assert_eq!(rig.engine.current_level(), 0.0);

    rig.engine.start_stream(Some(3), None).expect("reopen");
    rig.engine.start_recording(None).expect("start");
    let chunks = rig.feed_for(Duration::from_millis(2_100), 0.2);
    let outcome = rig.engine.stop_recording().expect("stop");
    let (_, pcm) = read_pcm16(saved_path(&outcome)).expect("decode");
    assert_eq!(pcm.len(), chunks * CHUNK);
}

#[test]
fn recording_opens_a_stream_when_none_is_running() {
    let rig = Rig::new(&[(3, USB_MIC)]);
    assert!(!rig.engine.is_streaming());

    rig.engine.start_recording(Some(3)).expect("start");
    assert!(rig.engine.is_streaming());
    assert_eq!(rig.engine.stream_device(), Some(3));
    rig.feed_for(Duration::from_millis(2_200), 0.2);

    let outcome = rig.engine.stop_recording().expect("stop");
    assert!(outcome.path().is_some());
}

#[test]
fn ceiling_freezes_the_session_until_stop() {
    let rig = Rig::with_config(&[(3, USB_MIC)], |c| {
        c.max_duration = Duration::from_secs(3);
    });
    rig.engine.start_stream(Some(3), None).expect("open");
    rig.engine.start_recording(None).expect("start");
    rig.feed_for(Duration::from_secs(5), 0.2);

    assert!(rig.engine.is_recording());
    assert!(rig.engine.is_capped());

    let outcome = rig.engine.stop_recording().expect("stop");
    let (_, pcm) = read_pcm16(saved_path(&outcome)).expect("decode");
    assert_eq!(pcm.len(), 48_000);
}

#[test]
fn live_level_tracks_the_last_chunk() {
    let rig = started_rig();
    rig.feed_chunks(3, 0.4);
    approx::assert_relative_eq!(rig.engine.current_level(), 0.4, epsilon = 1e-6);
    rig.feed_chunks(1, 0.1);
    approx::assert_relative_eq!(rig.engine.current_level(), 0.1, epsilon = 1e-6);
}

#[test]
fn fallback_chain_prefers_name_then_default() {
    let rig = Rig::new(&[(1, USB_MIC), (3, "Headset (Jabra)")]);
    rig.host.refuse(Some(3));
    assert_eq!(
        rig.engine.start_stream(Some(3), Some(USB_MIC)).expect("open"),
        Some(1)
    );

    rig.host.refuse(Some(1));
    assert_eq!(rig.engine.start_stream(Some(3), None).expect("open"), None);
    assert_eq!(rig.engine.device_name().as_deref(), Some(USB_MIC));
    assert_eq!(rig.host.open_streams(), 1);

    rig.host.refuse(None);
    let err = rig
        .engine
        .start_stream(Some(3), Some(USB_MIC))
        .expect_err("every candidate refused");
    assert!(matches!(err, ScriberError::NoInputDevice));
    assert!(!rig.engine.is_streaming());
    assert!(rig.engine.start_recording(None).is_err());
    assert!(!rig.engine.is_recording());
}

#[test]
fn id_churn_is_resolved_by_name() {
    let rig = started_rig();
    rig.host.set_devices(&[(0, WEBCAM), (5, USB_MIC)]);

    assert_eq!(
        rig.engine.catalog().resolve(Some(3), Some(USB_MIC)),
        Resolution {
            device: Some(5),
            needs_restart: true
        }
    );

    let health = rig.engine.check_device_health();
    assert!(health.healthy);
    assert!(health.recovered);
    assert_eq!(health.device_id, Some(5));
    assert_eq!(rig.engine.stream_device(), Some(5));
    assert_eq!(rig.host.opened().last(), Some(&Some(5)));
}

#[test]
fn unplugged_device_recovers_and_records() {
    let rig = started_rig();
    rig.feed_for(Duration::from_secs(1), 0.2);

    rig.host.kill_streams();
    rig.host.set_devices(&[(0, WEBCAM), (4, USB_MIC)]);

    let health = rig.engine.check_device_health();
    assert!(health.healthy && health.recovered, "{health:?}");
    assert_eq!(health.device_id, Some(4));

    rig.feed_for(Duration::from_secs(1), 0.2);
    rig.engine.start_recording(None).expect("start");
    rig.feed_for(Duration::from_millis(2_500), 0.2);
    let outcome = rig.engine.stop_recording().expect("stop");
    assert!(outcome.path().is_some());

    let health = rig.engine.check_device_health();
    assert!(health.healthy);
    assert!(!health.recovered);
}

#[test]
fn inactive_stream_is_reopened_on_the_same_device() {
    let rig = started_rig();
    rig.host.kill_streams();

    let health = rig.engine.check_device_health();
    assert!(health.recovered);
    assert_eq!(health.device_id, Some(3));
    assert_eq!(rig.host.open_streams(), 1);
}

#[test]
fn health_check_without_stream_is_unhealthy() {
    let rig = Rig::new(&[(3, USB_MIC)]);
    let health = rig.engine.check_device_health();
    assert!(!health.healthy);
    assert!(!health.recovered);
    assert_eq!(health.device_id, None);
    assert!(rig.host.opened().is_empty());
}

#[test]
fn health_check_is_skipped_while_recording() {
    let rig = started_rig();
    rig.engine.start_recording(None).expect("start");
    rig.host.kill_streams();
    rig.host.set_devices(&[(4, USB_MIC)]);

    let health = rig.engine.check_device_health();
    assert!(health.healthy);
    assert!(!health.recovered);
    assert_eq!(rig.host.opened(), vec![Some(3)]);
}

#[test]
fn failed_recovery_reports_unhealthy() {
    let rig = started_rig();
    rig.host.kill_streams();
    rig.host.set_devices(&[]);
    rig.host.refuse(None);

    let health = rig.engine.check_device_health();
    assert!(!health.healthy);
    assert!(!health.recovered);
    assert!(!rig.engine.is_streaming());

    let json = serde_json::to_value(&health).expect("serialize");
    assert_eq!(json["healthy"], false);
    assert!(json.get("deviceId").is_some());
}

#[test]
fn prepare_device_restarts_only_when_the_device_moved() {
    let rig = started_rig();
    assert_eq!(
        rig.engine.prepare_device(Some(3), Some(USB_MIC)).expect("prepare"),
        Some(3)
    );
    assert_eq!(rig.host.opened().len(), 1);

    rig.host.set_devices(&[(0, WEBCAM), (6, USB_MIC)]);
    assert_eq!(
        rig.engine.prepare_device(Some(3), Some(USB_MIC)).expect("prepare"),
        Some(6)
    );
    assert_eq!(rig.engine.stream_device(), Some(6));
}

#[test]
fn survey_restores_the_unified_stream() {
    let rig = started_rig();
    let levels = rig.engine.survey_devices(Duration::ZERO);
    assert_eq!(levels.len(), 2);
    assert!(levels.iter().all(|l| l.available));
    assert_eq!(rig.engine.stream_device(), Some(3));
    assert_eq!(rig.host.open_streams(), 1);
}

#[test]
fn close_discards_session_and_releases_device() {
    let rig = started_rig();
    rig.engine.start_recording(None).expect("start");
    rig.feed_for(Duration::from_secs(3), 0.2);

    rig.engine.close();
    assert!(!rig.engine.is_recording());
    assert!(!rig.engine.is_streaming());
    assert_eq!(rig.host.open_streams(), 0);
    assert!(!rig.engine.config().recording_path().exists());
}

#[test]
fn replugged_device_is_reselected_after_default_fallback() {
    let rig = Rig::new(&[(0, WEBCAM)]);
    let bound = rig
        .engine
        .prepare_device(Some(3), Some(USB_MIC))
        .expect("falls back");
    assert_eq!(bound, None);

    rig.host.set_devices(&[(0, WEBCAM), (3, USB_MIC)]);
    assert_eq!(
        rig.engine.prepare_device(None, Some(USB_MIC)).expect("prepare"),
        Some(3)
    );
    assert_eq!(rig.engine.stream_device(), Some(3));
    assert_eq!(rig.host.open_streams(), 1);
}

#[test]
fn health_check_returns_to_named_device_once_replugged() {
    let rig = started_rig();
    rig.host.kill_streams();
    rig.host.set_devices(&[(0, WEBCAM)]);
    let health = rig.engine.check_device_health();
    assert!(health.recovered);
    assert_eq!(health.device_id, None);

    let health = rig.engine.check_device_health();
    assert!(health.healthy && !health.recovered, "{health:?}");

    rig.host.set_devices(&[(0, WEBCAM), (2, USB_MIC)]);
    let health = rig.engine.check_device_health();
    assert!(health.healthy && health.recovered, "{health:?}");
    assert_eq!(health.device_id, Some(2));
    assert_eq!(rig.engine.stream_device(), Some(2));
    assert_eq!(rig.host.opened(), vec![Some(3), None, Some(2)]);
}

#[test]
fn health_checks_never_reopen_the_device_under_a_new_recording() {
    let rig = started_rig();
    rig.feed_chunks(20, 0.2);

    for _ in 0..25 {
        let done = AtomicBool::new(false);
        let (started, before, after, recording) = std::thread::scope(|scope| {
            scope.spawn(|| {
                while !done.load(Ordering::SeqCst) {
                    rig.host.kill_streams();
                    rig.engine.check_device_health();
                }
            });

            std::thread::sleep(Duration::from_millis(1));
            let started = rig.engine.start_recording(None);
            let before = rig.host.opened().len();
            std::thread::sleep(Duration::from_millis(5));
            let after = rig.host.opened().len();
            let recording = rig.engine.is_recording();
            done.store(true, Ordering::SeqCst);
            (started, before, after, recording)
        });

        started.expect("start");
        assert!(recording);
        assert_eq!(after, before, "device reopened while recording");
        rig.engine.stop_recording().expect("stop");
    }
}

/// Ramp value for the `k`th chunk; distinct after PCM conversion.
fn ramp(k: usize) -> f32 {
    ((k - 1) % 30_000 + 1) as f32 / 30_000.0
}

#[test]
fn chunks_fed_from_another_thread_are_saved_in_order() {
    let rig = started_rig();
    rig.engine.set_sensitivity(0.0);

    let fed = AtomicUsize::new(0);
    let done = AtomicBool::new(false);
    let outcome = std::thread::scope(|scope| {
        let feeder = scope.spawn(|| {
            for k in 1..=200_000 {
                if done.load(Ordering::SeqCst) {
                    break;
                }
                if !rig.host.feed(&[ramp(k); CHUNK]) {
                    break;
                }
                rig.clock.advance(common::CHUNK_DURATION);
                fed.store(k, Ordering::SeqCst);
                std::thread::yield_now();
            }
        });

        let wait_for = |n: usize| {
            while fed.load(Ordering::SeqCst) < n && !feeder.is_finished() {
                std::thread::yield_now();
            }
        };
        wait_for(40);
        let started = rig.engine.start_recording(None);
        wait_for(fed.load(Ordering::SeqCst) + 120);
        let outcome = rig.engine.stop_recording();
        done.store(true, Ordering::SeqCst);
        started.and(outcome)
    });

    let outcome = outcome.expect("start and stop");
    let (_, pcm) = read_pcm16(saved_path(&outcome)).expect("decode");
    assert_eq!(pcm.len() % CHUNK, 0);
    let values: Vec<i16> = pcm
        .chunks(CHUNK)
        .map(|chunk| {
            assert!(chunk.iter().all(|&s| s == chunk[0]), "chunk was split");
            chunk[0]
        })
        .collect();
    assert!(values.len() >= 16 + 120, "only {} chunks saved", values.len());

    let first = (1..=30_000)
        .find(|&k| to_pcm16(ramp(k)) == values[0])
        .expect("first chunk comes from the ramp");
    for (i, &value) in values.iter().enumerate() {
        assert_eq!(value, to_pcm16(ramp(first + i)), "gap or repeat at chunk {i}");
    }
}
