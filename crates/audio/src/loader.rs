//! WAV file loading.

use asr_core::{AsrError, AsrResult, AudioBuffer};
use hound::WavReader;
use std::path::Path;

use crate::resample::Resampler;

/// Load a WAV file and return an AudioBuffer.
pub fn load_wav(path: impl AsRef<Path>) -> AsrResult<AudioBuffer> {
    let path = path.as_ref();
    let reader = WavReader::open(path).map_err(|e| {
        AsrError::Audio(format!("Failed to open WAV {}: {}", path.display(), e))
    })?;

    let spec = reader.spec();
    let sample_rate = spec.sample_rate as usize;
    let channels = spec.channels as usize;

    let samples: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .into_samples::<f32>()
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| AsrError::Audio(format!("Failed to read samples: {}", e)))?,
        hound::SampleFormat::Int => {
            let bits = spec.bits_per_sample;
            let max_val = (1u32 << (bits - 1)) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| v as f32 / max_val))
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| AsrError::Audio(format!("Failed to read samples: {}", e)))?
        }
    };

    Ok(AudioBuffer::new(samples, sample_rate, channels))
}

/// Read only the WAV header and return the duration in seconds.
pub fn wav_duration(path: impl AsRef<Path>) -> AsrResult<f64> {
    let path = path.as_ref();
    let reader = WavReader::open(path).map_err(|e| {
        AsrError::Audio(format!("Failed to open WAV {}: {}", path.display(), e))
    })?;
    let sample_rate = reader.spec().sample_rate;
    if sample_rate == 0 {
        return Err(AsrError::Audio(format!(
            "WAV {} declares a zero sample rate",
            path.display()
        )));
    }
    // hound reports duration in frames (samples per channel).
    Ok(reader.duration() as f64 / sample_rate as f64)
}

/// Load a WAV file as mono samples at `target_sample_rate`.
pub fn load_mono(path: impl AsRef<Path>, target_sample_rate: usize) -> AsrResult<AudioBuffer> {
    let buffer = to_mono(&load_wav(path)?);
    Resampler::new(target_sample_rate).resample(&buffer)
}

/// Convert stereo audio to mono by averaging channels.
pub fn to_mono(buffer: &AudioBuffer) -> AudioBuffer {
    if buffer.channels <= 1 {
        return buffer.clone();
    }

    let mono_samples: Vec<f32> = buffer
        .samples
        .chunks(buffer.channels)
        .map(|chunk| chunk.iter().sum::<f32>() / chunk.len() as f32)
        .collect();

    AudioBuffer::new(mono_samples, buffer.sample_rate, 1)
}
