//! cpal backend for [`AudioHost`].
//!
//! # Threading note
//!
//! `cpal::Stream` is `!Send` on most platforms (COM on Windows, CoreAudio on
//! macOS). Each opened stream therefore lives on its own owner thread, which
//! builds it, reports success or failure over a bounded channel, then parks
//! until told to stop. Dropping the stream on that same thread stops the
//! device before [`InputStream::stop`] returns.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::thread::{self, JoinHandle};

use cpal::{
    traits::{DeviceTrait, HostTrait, StreamTrait},
    BuildStreamError, FromSample, Sample, SampleFormat, SampleRate, SizedSample, Stream,
    StreamConfig, StreamError, SupportedStreamConfig,
};
use crossbeam_channel::{bounded, Sender};
use tracing::{debug, error, info, warn};

use super::resample::RateConverter;
use super::{AudioHost, ChunkSink, DeviceId, InputStream, RawDevice};
use crate::buffering::chunk::SAMPLE_RATE;
use crate::error::HostError;

/// Largest callback (in frames) the converter pre-allocates for.
const MAX_CALLBACK_FRAMES: usize = 16_384;

/// Audio runtime backed by the platform's default cpal host.
#[derive(Debug, Default, Clone, Copy)]
pub struct CpalHost;

impl CpalHost {
    pub fn new() -> Self {
        Self
    }
}

fn max_input_channels(device: &cpal::Device) -> u16 {
    device
        .supported_input_configs()
        .map(|configs| configs.map(|c| c.channels()).max().unwrap_or(0))
        .unwrap_or(0)
}

fn device_label(device: &cpal::Device, id: Option<DeviceId>) -> String {
    device.name().unwrap_or_else(|_| match id {
        Some(id) => format!("Input Device {}", id + 1),
        None => "Default Input Device".to_string(),
    })
}

fn lookup_device(device: Option<DeviceId>) -> Result<cpal::Device, HostError> {
    let host = cpal::default_host();
    match device {
        Some(id) => host
            .input_devices()
            .map_err(|e| HostError::Backend(e.to_string()))?
            .nth(id)
            .ok_or_else(|| HostError::DeviceNotFound(id.to_string())),
        None => host
            .default_input_device()
            .ok_or_else(|| HostError::DeviceNotFound("default".to_string())),
    }
}

fn is_convertible(format: SampleFormat) -> bool {
    matches!(format, SampleFormat::F32 | SampleFormat::I16 | SampleFormat::U16)
}

/// Pick the input configuration closest to 16 kHz mono f32.
///
/// Each range is tried at the supported rate nearest to 16 kHz. A range
/// that can run at 16 kHz wins outright (no resampling), then fewer
/// channels, then f32 samples, then the smaller rate.
fn select_config(device: &cpal::Device) -> Result<SupportedStreamConfig, HostError> {
    let best = device
        .supported_input_configs()
        .map_err(|e| HostError::UnsupportedConfig(e.to_string()))?
        .filter(|range| is_convertible(range.sample_format()))
        .map(|range| {
            let rate = SAMPLE_RATE
                .max(range.min_sample_rate().0)
                .min(range.max_sample_rate().0);
            (rate, range)
        })
        .min_by_key(|(rate, range)| {
            (
                *rate != SAMPLE_RATE,
                range.channels(),
                range.sample_format() != SampleFormat::F32,
                rate.abs_diff(SAMPLE_RATE),
            )
        });

    match best {
        Some((rate, range)) => Ok(range.with_sample_rate(SampleRate(rate))),
        None => Err(HostError::UnsupportedConfig("no f32/i16/u16 input configuration".into())),
    }
}

fn map_build_error(label: &str, err: BuildStreamError) -> HostError {
    match err {
        BuildStreamError::DeviceNotAvailable => HostError::Disconnected(label.to_string()),
        BuildStreamError::StreamConfigNotSupported => {
            HostError::UnsupportedConfig(format!("{label}: stream config not supported"))
        }
        other => {
            let message = other.to_string();
            if message.to_lowercase().contains("busy") {
                HostError::DeviceBusy(label.to_string())
            } else {
                HostError::Backend(message)
            }
        }
    }
}

fn build_stream_for<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    mut converter: RateConverter,
    mut sink: ChunkSink,
    active: Arc<AtomicBool>,
) -> Result<Stream, BuildStreamError>
where
    T: SizedSample + Send + 'static,
    f32: FromSample<T>,
{
    device.build_input_stream(
        config,
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            let mono = converter.process(data, |s| f32::from_sample(s));
            if !mono.is_empty() {
                sink(mono);
            }
        },
        move |err| match err {
            StreamError::DeviceNotAvailable => {
                active.store(false, Ordering::Release);
                warn!("input device no longer available");
            }
            other => warn!("audio stream error: {other}"),
        },
        None,
    )
}

fn build_stream(
    device: Option<DeviceId>,
    sink: ChunkSink,
    active: Arc<AtomicBool>,
) -> Result<Stream, HostError> {
    let dev = lookup_device(device)?;
    let label = device_label(&dev, device);
    let supported = select_config(&dev)?;
    let format = supported.sample_format();
    let config: StreamConfig = supported.config();
    let converter = RateConverter::new(config.sample_rate.0, config.channels, MAX_CALLBACK_FRAMES)?;

    info!(
        device = %label,
        sample_rate = config.sample_rate.0,
        channels = config.channels,
        ?format,
        resampled = !converter.is_passthrough(),
        "opening input stream"
    );

    let stream = match format {
        SampleFormat::F32 => build_stream_for::<f32>(&dev, &config, converter, sink, active),
        SampleFormat::I16 => build_stream_for::<i16>(&dev, &config, converter, sink, active),
        SampleFormat::U16 => build_stream_for::<u16>(&dev, &config, converter, sink, active),
        other => {
            return Err(HostError::UnsupportedConfig(format!(
                "unsupported sample format: {other:?}"
            )))
        }
    }
    .map_err(|e| map_build_error(&label, e))?;

    stream.play().map_err(|e| match e {
        cpal::PlayStreamError::DeviceNotAvailable => HostError::Disconnected(label.clone()),
        other => HostError::Backend(other.to_string()),
    })?;
    Ok(stream)
}

impl AudioHost for CpalHost {
    fn list_input_devices(&self) -> Result<Vec<RawDevice>, HostError> {
        let host = cpal::default_host();
        let devices = host
            .input_devices()
            .map_err(|e| HostError::Backend(e.to_string()))?;
        Ok(devices
            .enumerate()
            .map(|(id, device)| RawDevice {
                id,
                name: device_label(&device, Some(id)),
                input_channels: max_input_channels(&device),
            })
            .collect())
    }

    fn open_input(
        &self,
        device: Option<DeviceId>,
        sink: ChunkSink,
    ) -> Result<Box<dyn InputStream>, HostError> {
        let (open_tx, open_rx) = bounded::<Result<(), HostError>>(1);
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let active = Arc::new(AtomicBool::new(false));
        let active_owner = Arc::clone(&active);

        let worker = thread::Builder::new()
            .name("scriber-capture".into())
            .spawn(move || {
                let stream = match build_stream(device, sink, Arc::clone(&active_owner)) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = open_tx.send(Err(e));
                        return;
                    }
                };
                active_owner.store(true, Ordering::Release);
                let _ = open_tx.send(Ok(()));

                // Returns on an explicit stop or when the handle is dropped.
                let _ = stop_rx.recv();
                active_owner.store(false, Ordering::Release);
                drop(stream);
                debug!("input stream released");
            })
            .map_err(|e| HostError::Backend(format!("failed to spawn capture thread: {e}")))?;

        match open_rx.recv() {
            Ok(Ok(())) => Ok(Box::new(CpalInputStream {
                stop_tx: Some(stop_tx),
                worker: Some(worker),
                active,
            })),
            Ok(Err(e)) => {
                let _ = worker.join();
                Err(e)
            }
            Err(_) => {
                let _ = worker.join();
                error!("capture thread exited before reporting open status");
                Err(HostError::Backend("capture thread died unexpectedly".into()))
            }
        }
    }
}

struct CpalInputStream {
    stop_tx: Option<Sender<()>>,
    worker: Option<JoinHandle<()>>,
    active: Arc<AtomicBool>,
}

impl InputStream for CpalInputStream {
    fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
            && self.worker.as_ref().is_some_and(|w| !w.is_finished())
    }

    fn stop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!("capture thread panicked during shutdown");
            }
        }
    }
}

impl Drop for CpalInputStream {
    fn drop(&mut self) {
        self.stop();
    }
}
