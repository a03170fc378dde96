//! Log-mel filterbank в стиле Kaldi.
//!
//! Повторяет `torchaudio.compliance.kaldi.fbank`: нарезка фреймов с
//! `snip_edges`, вычитание DC, предыскажение, окно Povey, спектр мощности,
//! треугольные фильтры в mel-пространстве и логарифм с полом `f32::EPSILON`.

use asr_core::{AsrResult, FbankConfig, FeatureMatrix, WindowType};
use candle_core::{Device, Tensor};
use rustfft::{FftPlanner, num_complex::Complex};
use std::f32::consts::PI;

/// Kaldi-совместимый экстрактор filterbank-признаков.
#[derive(Debug)]
pub struct FbankExtractor {
    config: FbankConfig,
    window: Vec<f32>,
    mel_banks: Vec<Vec<f32>>,
}

impl FbankExtractor {
    /// Создать экстрактор. Ошибка, если конфигурация некорректна.
    pub fn new(config: FbankConfig) -> AsrResult<Self> {
        config.validate()?;
        let window = frame_window(config.window, config.window_size());
        let mel_banks = kaldi_mel_banks(
            config.num_mel_bins,
            config.padded_window_size(),
            config.sample_rate as f32,
            config.low_freq,
            config.effective_high_freq(),
        );
        Ok(Self {
            config,
            window,
            mel_banks,
        })
    }

    /// Конфигурация экстрактора.
    pub fn config(&self) -> &FbankConfig {
        &self.config
    }

    /// Количество бинов на выходе.
    pub fn num_bins(&self) -> usize {
        self.config.num_mel_bins
    }

    /// Посчитать признаки для моно-сигнала.
    ///
    /// Возвращает [`FeatureMatrix`] с тензором формы [time, num_mel_bins].
    /// Слишком короткий сигнал даёт ноль фреймов.
    pub fn extract(&self, samples: &[f32], device: &Device) -> AsrResult<FeatureMatrix> {
        let frames = self.compute(samples);
        let num_frames = frames.len();
        let num_bins = self.num_bins();
        let flat: Vec<f32> = frames.into_iter().flatten().collect();
        let tensor = Tensor::from_vec(flat, (num_frames, num_bins), device)?;
        Ok(FeatureMatrix::new(tensor, num_frames, num_bins))
    }

    /// Признаки в виде `Vec` фреймов (без тензора).
    pub fn compute(&self, samples: &[f32]) -> Vec<Vec<f32>> {
        let win = self.config.window_size();
        let shift = self.config.window_shift();
        let n_fft = self.config.padded_window_size();
        let num_frames = self.config.num_frames(samples.len());

        let mut planner = FftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(n_fft);

        let mut out = Vec::with_capacity(num_frames);
        let mut frame = vec![0.0f32; win];
        let mut buffer = vec![Complex::new(0.0f32, 0.0); n_fft];

        for m in 0..num_frames {
            self.extract_frame(samples, m, win, shift, &mut frame);
            self.process_frame(&mut frame);

            for (i, slot) in buffer.iter_mut().enumerate() {
                let v = if i < win { frame[i] } else { 0.0 };
                *slot = Complex::new(v, 0.0);
            }
            fft.process(&mut buffer);

            // Kaldi использует n_fft/2 бинов, бин Найквиста отбрасывается.
            let spectrum: Vec<f32> = buffer
                .iter()
                .take(n_fft / 2)
                .map(|c| {
                    let power = c.re * c.re + c.im * c.im;
                    if self.config.use_power {
                        power
                    } else {
                        power.sqrt()
                    }
                })
                .collect();

            let energies: Vec<f32> = self
                .mel_banks
                .iter()
                .map(|bank| {
                    let e: f32 = bank.iter().zip(spectrum.iter()).map(|(w, s)| w * s).sum();
                    if self.config.use_log_fbank {
                        e.max(f32::EPSILON).ln()
                    } else {
                        e
                    }
                })
                .collect();
            out.push(energies);
        }

        out
    }

    /// Скопировать фрейм `m` из сигнала (с отражением на краях при `snip_edges = false`).
    fn extract_frame(&self, samples: &[f32], m: usize, win: usize, shift: usize, frame: &mut [f32]) {
        if self.config.snip_edges {
            let start = m * shift;
            frame.copy_from_slice(&samples[start..start + win]);
            return;
        }

        let n = samples.len() as isize;
        let start = (m * shift) as isize + (shift / 2) as isize - (win / 2) as isize;
        for (i, slot) in frame.iter_mut().enumerate() {
            let mut idx = start + i as isize;
            // Отражение как в Kaldi: [-1] -> [0], [n] -> [n - 1].
            while idx < 0 || idx >= n {
                if idx < 0 {
                    idx = -idx - 1;
                } else {
                    idx = 2 * n - 1 - idx;
                }
            }
            *slot = samples[idx as usize];
        }
    }

    /// DC offset, предыскажение и окно — на месте.
    fn process_frame(&self, frame: &mut [f32]) {
        if self.config.remove_dc_offset && !frame.is_empty() {
            let mean = frame.iter().sum::<f32>() / frame.len() as f32;
            frame.iter_mut().for_each(|v| *v -= mean);
        }

        let coeff = self.config.preemphasis;
        if coeff != 0.0 && !frame.is_empty() {
            for i in (1..frame.len()).rev() {
                frame[i] -= coeff * frame[i - 1];
            }
            frame[0] -= coeff * frame[0];
        }

        for (v, w) in frame.iter_mut().zip(self.window.iter()) {
            *v *= w;
        }
    }
}

/// Оконная функция Kaldi (симметричная, знаменатель N - 1).
fn frame_window(kind: WindowType, length: usize) -> Vec<f32> {
    if length <= 1 {
        return vec![1.0; length];
    }
    let a = 2.0 * PI / (length - 1) as f32;
    (0..length)
        .map(|i| {
            let x = i as f32;
            match kind {
                WindowType::Hanning => 0.5 - 0.5 * (a * x).cos(),
                WindowType::Hamming => 0.54 - 0.46 * (a * x).cos(),
                WindowType::Povey => (0.5 - 0.5 * (a * x).cos()).powf(0.85),
                WindowType::Rectangular => 1.0,
            }
        })
        .collect()
}

/// Kaldi mel-шкала: 1127 * ln(1 + f / 700).
fn mel_scale(hz: f32) -> f32 {
    1127.0 * (1.0 + hz / 700.0).ln()
}

/// Треугольные фильтры, равномерно расставленные в mel-пространстве.
///
/// Форма: [num_bins][n_fft / 2], без нормировки площади (как в Kaldi).
fn kaldi_mel_banks(
    num_bins: usize,
    n_fft: usize,
    sample_rate: f32,
    low_freq: f32,
    high_freq: f32,
) -> Vec<Vec<f32>> {
    let num_fft_bins = n_fft / 2;
    let fft_bin_width = sample_rate / n_fft as f32;

    let mel_low = mel_scale(low_freq);
    let mel_high = mel_scale(high_freq);
    let mel_delta = (mel_high - mel_low) / (num_bins + 1) as f32;

    (0..num_bins)
        .map(|b| {
            let left = mel_low + b as f32 * mel_delta;
            let center = left + mel_delta;
            let right = center + mel_delta;

            (0..num_fft_bins)
                .map(|k| {
                    let mel = mel_scale(fft_bin_width * k as f32);
                    if mel > left && mel < right {
                        if mel <= center {
                            (mel - left) / (center - left)
                        } else {
                            (right - mel) / (right - center)
                        }
                    } else {
                        0.0
                    }
                })
                .collect()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq: f32, seconds: f32, sample_rate: usize) -> Vec<f32> {
        let n = (seconds * sample_rate as f32) as usize;
        (0..n)
            .map(|i| 0.5 * (2.0 * PI * freq * i as f32 / sample_rate as f32).sin())
            .collect()
    }

    #[test]
    fn test_povey_window_endpoints() {
        let window = frame_window(WindowType::Povey, 400);
        assert_eq!(window.len(), 400);
        assert!(window[0].abs() < 1e-6);
        assert!(window[399].abs() < 1e-6);
        assert!(window.iter().all(|&w| (0.0..=1.0).contains(&w)));
    }

    #[test]
    fn test_mel_banks_shape() {
        let banks = kaldi_mel_banks(80, 512, 16000.0, 20.0, 8000.0);
        assert_eq!(banks.len(), 80);
        assert!(banks.iter().all(|b| b.len() == 256));
        // каждый фильтр должен покрывать хотя бы один FFT-бин
        for (i, bank) in banks.iter().enumerate() {
            assert!(bank.iter().any(|&w| w > 0.0), "bank {i} is empty");
            assert!(bank.iter().all(|&w| (0.0..=1.0).contains(&w)));
        }
    }

    #[test]
    fn test_output_shape_matches_frame_formula() {
        let extractor = FbankExtractor::new(FbankConfig::with_mel_bins(80)).unwrap();
        let samples = sine(440.0, 1.0, 16000);
        let features = extractor.extract(&samples, &Device::Cpu).unwrap();

        assert_eq!(features.num_frames, 98);
        assert_eq!(features.num_bins, 80);
        assert_eq!(features.tensor.dims(), &[98, 80]);
    }

    #[test]
    fn test_short_signal_gives_zero_frames() {
        let extractor = FbankExtractor::new(FbankConfig::default()).unwrap();
        let features = extractor.compute(&[0.1; 399]);
        assert!(features.is_empty());
    }

    #[test]
    fn test_silence_hits_log_floor() {
        let extractor = FbankExtractor::new(FbankConfig::default()).unwrap();
        let features = extractor.compute(&[0.0; 800]);
        let floor = f32::EPSILON.ln();
        assert_eq!(features.len(), 3);
        assert!(features.iter().flatten().all(|&v| (v - floor).abs() < 1e-6));
    }

    #[test]
    fn test_tone_energy_peaks_near_its_frequency() {
        let config = FbankConfig::with_mel_bins(40);
        let extractor = FbankExtractor::new(config.clone()).unwrap();
        let frames = extractor.compute(&sine(1000.0, 0.5, 16000));
        let frame = &frames[frames.len() / 2];

        let peak = frame
            .iter()
            .enumerate()
            .fold((0usize, f32::NEG_INFINITY), |acc, (i, &v)| if v > acc.1 { (i, v) } else { acc })
            .0;

        // центр пикового фильтра должен лежать рядом с 1 кГц
        let mel_low = mel_scale(config.low_freq);
        let delta = (mel_scale(config.effective_high_freq()) - mel_low) / 41.0;
        let center_mel = mel_low + (peak as f32 + 1.0) * delta;
        let center_hz = 700.0 * ((center_mel / 1127.0).exp() - 1.0);
        assert!((center_hz - 1000.0).abs() < 150.0, "peak at {center_hz} Hz");
    }

    #[test]
    fn test_no_snip_edges_frame_count() {
        let config = FbankConfig {
            snip_edges: false,
            ..FbankConfig::default()
        };
        let extractor = FbankExtractor::new(config).unwrap();
        let frames = extractor.compute(&sine(300.0, 0.1, 16000));
        // (1600 + 80) / 160
        assert_eq!(frames.len(), 10);
    }
}
