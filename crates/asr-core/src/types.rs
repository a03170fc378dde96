//! Общие типы для аудио и признаков.

use candle_core::Tensor;

// ---------------------------------------------------------------------------
// Аудио-буфер
// ---------------------------------------------------------------------------

/// Буфер необработанного аудио.
#[derive(Debug, Clone)]
pub struct AudioBuffer {
    /// Аудио-сэмплы (нормализованы к [-1.0, 1.0], каналы чередуются).
    pub samples: Vec<f32>,

    /// Частота дискретизации в Гц.
    pub sample_rate: usize,

    /// Количество каналов.
    pub channels: usize,
}

impl AudioBuffer {
    /// Создать новый буфер аудио.
    pub fn new(samples: Vec<f32>, sample_rate: usize, channels: usize) -> Self {
        Self {
            samples,
            sample_rate,
            channels,
        }
    }

    /// Длительность в секундах.
    pub fn duration(&self) -> f32 {
        if self.sample_rate == 0 || self.channels == 0 {
            return 0.0;
        }
        self.samples.len() as f32 / (self.sample_rate * self.channels) as f32
    }

    /// Количество сэмплов на канал.
    pub fn num_samples(&self) -> usize {
        if self.channels == 0 {
            return 0;
        }
        self.samples.len() / self.channels
    }
}

// ---------------------------------------------------------------------------
// Матрица признаков
// ---------------------------------------------------------------------------

/// Признаки одной записи: тензор формы [time, num_bins].
#[derive(Debug, Clone)]
pub struct FeatureMatrix {
    /// Тензор формы [time, num_bins], f32.
    pub tensor: Tensor,

    /// Количество временных фреймов.
    pub num_frames: usize,

    /// Количество частотных бинов.
    pub num_bins: usize,
}

impl FeatureMatrix {
    /// Создать матрицу признаков.
    pub fn new(tensor: Tensor, num_frames: usize, num_bins: usize) -> Self {
        Self {
            tensor,
            num_frames,
            num_bins,
        }
    }
}
