//! Audio resampling.

use asr_core::{AsrError, AsrResult, AudioBuffer};
use rubato::{FftFixedIn, Resampler as _};
use tracing::debug;

/// Input chunk size fed to the FFT resampler.
const CHUNK_SIZE: usize = 1024;

/// Audio resampler for converting sample rates.
pub struct Resampler {
    target_sample_rate: usize,
}

impl Resampler {
    /// Create a new resampler with target sample rate.
    pub fn new(target_sample_rate: usize) -> Self {
        Self { target_sample_rate }
    }

    /// Target sample rate in Hz.
    pub fn target_sample_rate(&self) -> usize {
        self.target_sample_rate
    }

    /// Resample a mono buffer to the target sample rate.
    ///
    /// The resampler delay is trimmed and the output is cut to
    /// `round(len * ratio)` samples, so durations survive the conversion.
    pub fn resample(&self, buffer: &AudioBuffer) -> AsrResult<AudioBuffer> {
        if buffer.sample_rate == self.target_sample_rate {
            return Ok(buffer.clone());
        }
        if buffer.channels != 1 {
            return Err(AsrError::Audio(
                "Resampling requires mono audio. Use to_mono() first.".to_string(),
            ));
        }
        if buffer.sample_rate == 0 || self.target_sample_rate == 0 {
            return Err(AsrError::Audio(format!(
                "Cannot resample {} Hz -> {} Hz",
                buffer.sample_rate, self.target_sample_rate
            )));
        }

        let ratio = self.target_sample_rate as f64 / buffer.sample_rate as f64;
        let expected = (buffer.samples.len() as f64 * ratio).round() as usize;

        let mut resampler = FftFixedIn::<f32>::new(
            buffer.sample_rate,
            self.target_sample_rate,
            CHUNK_SIZE,
            2,
            1, // mono
        )
        .map_err(|e| AsrError::Audio(format!("Failed to create resampler: {}", e)))?;
        let delay = resampler.output_delay();

        let mut output = Vec::with_capacity(expected + delay);
        let samples = &buffer.samples;
        let mut pos = 0;
        while pos < samples.len() {
            let need = resampler.input_frames_next();
            let end = (pos + need).min(samples.len());
            let chunk = [&samples[pos..end]];
            let out = if end - pos == need {
                resampler.process(&chunk, None)
            } else {
                resampler.process_partial(Some(&chunk[..]), None)
            }
            .map_err(|e| AsrError::Audio(format!("Resampling failed: {}", e)))?;
            output.extend_from_slice(&out[0]);
            pos = end;
        }

        // Flush the internal delay line.
        while output.len() < expected + delay {
            let out = resampler
                .process_partial(None::<&[&[f32]]>, None)
                .map_err(|e| AsrError::Audio(format!("Resampling failed: {}", e)))?;
            if out[0].is_empty() {
                break;
            }
            output.extend_from_slice(&out[0]);
        }

        output.drain(..delay.min(output.len()));
        output.truncate(expected);

        debug!(
            "resampled {} -> {} samples ({} Hz -> {} Hz)",
            samples.len(),
            output.len(),
            buffer.sample_rate,
            self.target_sample_rate
        );

        Ok(AudioBuffer::new(output, self.target_sample_rate, 1))
    }
}

impl Default for Resampler {
    fn default() -> Self {
        Self::new(16000)
    }
}
