//! Конфигурация фронтенда признаков и загрузка конфигов из файлов.

use std::path::Path;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{AsrError, AsrResult};

/// Конфигурация filterbank-признаков в стиле Kaldi.
///
/// Значения по умолчанию совпадают с `torchaudio.compliance.kaldi.fbank`,
/// которым признаки считались при обучении исходных моделей.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FbankConfig {
    /// Частота дискретизации в Гц.
    pub sample_rate: usize,

    /// Длина окна в миллисекундах.
    pub frame_length_ms: f32,

    /// Шаг между фреймами в миллисекундах.
    pub frame_shift_ms: f32,

    /// Количество mel-бинов.
    pub num_mel_bins: usize,

    /// Нижняя граница mel-фильтров в Гц.
    pub low_freq: f32,

    /// Верхняя граница mel-фильтров в Гц. Значение <= 0 отсчитывается от частоты Найквиста.
    pub high_freq: f32,

    /// Коэффициент предыскажения.
    pub preemphasis: f32,

    /// Вычитать среднее (DC offset) из каждого фрейма.
    pub remove_dc_offset: bool,

    /// Тип оконной функции.
    pub window: WindowType,

    /// Округлять размер FFT до степени двойки.
    pub round_to_power_of_two: bool,

    /// Отбрасывать неполные фреймы на краях (Kaldi `snip_edges`).
    pub snip_edges: bool,

    /// Спектр мощности (|X|^2) вместо амплитудного.
    pub use_power: bool,

    /// Логарифмировать энергии mel-фильтров.
    pub use_log_fbank: bool,
}

impl Default for FbankConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            frame_length_ms: 25.0,
            frame_shift_ms: 10.0,
            num_mel_bins: 23,
            low_freq: 20.0,
            high_freq: 0.0,
            preemphasis: 0.97,
            remove_dc_offset: true,
            window: WindowType::Povey,
            round_to_power_of_two: true,
            snip_edges: true,
            use_power: true,
            use_log_fbank: true,
        }
    }
}

impl FbankConfig {
    /// Конфигурация с заданным количеством mel-бинов (80 — типичный выбор для Conformer).
    pub fn with_mel_bins(num_mel_bins: usize) -> Self {
        Self {
            num_mel_bins,
            ..Self::default()
        }
    }

    /// Длина окна в сэмплах.
    pub fn window_size(&self) -> usize {
        (self.sample_rate as f32 * self.frame_length_ms / 1000.0) as usize
    }

    /// Шаг между фреймами в сэмплах.
    pub fn window_shift(&self) -> usize {
        (self.sample_rate as f32 * self.frame_shift_ms / 1000.0) as usize
    }

    /// Размер FFT (окно, при необходимости округлённое до степени двойки).
    pub fn padded_window_size(&self) -> usize {
        let size = self.window_size();
        if self.round_to_power_of_two {
            size.next_power_of_two()
        } else {
            size
        }
    }

    /// Количество фреймов для сигнала из `num_samples` сэмплов.
    ///
    /// Та же формула, что и в самом экстракторе: длины, посчитанные по
    /// манифесту, совпадают с реальными размерами признаков.
    pub fn num_frames(&self, num_samples: usize) -> usize {
        let win = self.window_size();
        let shift = self.window_shift().max(1);
        if self.snip_edges {
            if num_samples < win {
                0
            } else {
                1 + (num_samples - win) / shift
            }
        } else {
            (num_samples + shift / 2) / shift
        }
    }

    /// Проверить конфигурацию.
    pub fn validate(&self) -> AsrResult<()> {
        if self.sample_rate == 0 {
            return Err(AsrError::Config("sample_rate must be > 0".to_string()));
        }
        if self.window_size() == 0 || self.window_shift() == 0 {
            return Err(AsrError::Config(format!(
                "frame_length_ms={} / frame_shift_ms={} give an empty window at {} Hz",
                self.frame_length_ms, self.frame_shift_ms, self.sample_rate
            )));
        }
        if self.num_mel_bins < 3 {
            return Err(AsrError::Config(format!(
                "num_mel_bins must be >= 3, got {}",
                self.num_mel_bins
            )));
        }
        let nyquist = self.sample_rate as f32 / 2.0;
        let high = self.effective_high_freq();
        if !(self.low_freq >= 0.0 && self.low_freq < high && high <= nyquist) {
            return Err(AsrError::Config(format!(
                "bad mel frequency range: low_freq={}, high_freq={} (nyquist {})",
                self.low_freq, high, nyquist
            )));
        }
        Ok(())
    }

    /// Верхняя граница mel-фильтров с учётом отрицательных значений (как в Kaldi).
    pub fn effective_high_freq(&self) -> f32 {
        let nyquist = self.sample_rate as f32 / 2.0;
        if self.high_freq <= 0.0 {
            nyquist + self.high_freq
        } else {
            self.high_freq
        }
    }
}

/// Оконная функция для STFT.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowType {
    /// Окно Povey (Ханн в степени 0.85) — значение по умолчанию в Kaldi.
    Povey,
    /// Симметричное окно Ханна.
    Hanning,
    /// Окно Хэмминга.
    Hamming,
    /// Прямоугольное окно.
    Rectangular,
}

/// Загрузить YAML-конфиг в произвольную serde-структуру.
pub fn load_yaml<T: DeserializeOwned>(path: impl AsRef<Path>) -> AsrResult<T> {
    let path = path.as_ref();
    let data = std::fs::read_to_string(path).map_err(|e| {
        AsrError::Config(format!("Не удалось прочитать {}: {e}", path.display()))
    })?;
    debug!("YAML-конфиг: {}", path.display());
    Ok(serde_yaml::from_str(&data)?)
}

/// Загрузить JSON-конфиг (например, `config.json` из директории модели).
pub fn load_json<T: DeserializeOwned>(path: impl AsRef<Path>) -> AsrResult<T> {
    let path = path.as_ref();
    let data = std::fs::read_to_string(path).map_err(|e| {
        AsrError::Config(format!("Не удалось прочитать {}: {e}", path.display()))
    })?;
    debug!("JSON-конфиг: {}", path.display());
    Ok(serde_json::from_str(&data)?)
}
