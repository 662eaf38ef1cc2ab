//! 16-bit mono PCM WAV output using hound.

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use hound::{SampleFormat, WavReader, WavSpec, WavWriter};

use crate::buffering::chunk::SAMPLE_RATE;
use crate::error::Result;

/// Scale factor from `[-1, 1]` floats to 16-bit PCM.
const PCM_SCALE: f32 = 32_767.0;

pub fn wav_spec() -> WavSpec {
    WavSpec {
        channels: 1,
        sample_rate: SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    }
}

/// Convert a float sample to 16-bit PCM.
///
/// Multiplies by 32767 and truncates toward zero. Capture hardware delivers
/// samples within `[-1, 1]`, so no explicit clamp is applied; `as` saturates
/// anything outside that range.
pub fn to_pcm16(sample: f32) -> i16 {
    (sample * PCM_SCALE) as i16
}

/// Write `samples` as a mono 16 kHz 16-bit WAV file, replacing `path`.
pub fn write_pcm16(path: &Path, samples: &[f32]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = BufWriter::new(File::create(path)?);
    let mut writer = WavWriter::new(file, wav_spec())?;
    for &sample in samples {
        writer.write_sample(to_pcm16(sample))?;
    }
    writer.finalize()?;
    Ok(())
}

/// Read a 16-bit WAV file back as raw PCM values.
pub fn read_pcm16(path: &Path) -> Result<(WavSpec, Vec<i16>)> {
    let mut reader = WavReader::open(path)?;
    let spec = reader.spec();
    let samples = reader
        .samples::<i16>()
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok((spec, samples))
}
