//! Конфигурация Conformer-CTC.

use asr_core::{AsrError, AsrResult};
use serde::{Deserialize, Serialize};

use crate::length::{AxisPair, ConvGeometry};

/// Геометрия Conv2d-субдискретизации.
///
/// Каждый параметр — число (обе оси) или пара `[time, freq]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubsamplingConfig {
    pub kernel_size: AxisPair,
    pub stride: AxisPair,
    pub padding: AxisPair,
    pub dilation: AxisPair,
}

impl Default for SubsamplingConfig {
    fn default() -> Self {
        Self {
            kernel_size: 3.into(),
            stride: 2.into(),
            padding: 0.into(),
            dilation: 1.into(),
        }
    }
}

impl SubsamplingConfig {
    /// Нормализованная геометрия (ошибка при нулевых kernel/stride/dilation).
    pub fn geometry(&self) -> AsrResult<ConvGeometry> {
        ConvGeometry::new(self.kernel_size, self.stride, self.padding, self.dilation)
    }
}

/// Конфигурация модели Conformer-CTC.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConformerCtcConfig {
    /// Количество входных mel-бинов.
    pub input_dim: usize,

    /// Размер выходного словаря, включая blank (последний класс).
    pub vocab_size: usize,

    /// Размерность модели.
    pub encoder_dim: usize,

    /// Размерность feed-forward слоя.
    pub ffn_dim: usize,

    /// Количество слоёв Conformer.
    pub num_layers: usize,

    /// Количество голов внимания.
    pub num_heads: usize,

    /// Dropout во всех подмодулях.
    #[serde(default)]
    pub dropout_rate: f32,

    /// Ядро depthwise-свёртки (нечётное).
    #[serde(default = "default_depthwise_kernel")]
    pub depthwise_conv_kernel_size: usize,

    /// GroupNorm вместо BatchNorm в свёрточном модуле.
    #[serde(default)]
    pub use_group_norm: bool,

    #[serde(default)]
    pub subsampling: SubsamplingConfig,
}

fn default_depthwise_kernel() -> usize {
    31
}

impl Default for ConformerCtcConfig {
    fn default() -> Self {
        Self {
            input_dim: 80,
            vocab_size: 0,
            encoder_dim: 144,
            ffn_dim: 576,
            num_layers: 16,
            num_heads: 4,
            dropout_rate: 0.1,
            depthwise_conv_kernel_size: default_depthwise_kernel(),
            use_group_norm: false,
            subsampling: SubsamplingConfig::default(),
        }
    }
}

impl ConformerCtcConfig {
    /// Blank — последний класс словаря.
    pub fn blank_id(&self) -> u32 {
        self.vocab_size.saturating_sub(1) as u32
    }

    /// Проверить конфигурацию до построения модели.
    pub fn validate(&self) -> AsrResult<()> {
        let positive = [
            ("input_dim", self.input_dim),
            ("vocab_size", self.vocab_size),
            ("encoder_dim", self.encoder_dim),
            ("ffn_dim", self.ffn_dim),
            ("num_layers", self.num_layers),
            ("num_heads", self.num_heads),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(AsrError::Config(format!("{name} must be > 0")));
            }
        }
        if self.vocab_size < 2 {
            return Err(AsrError::Config(format!(
                "vocab_size={} leaves no room for tokens besides blank",
                self.vocab_size
            )));
        }
        if self.encoder_dim % self.num_heads != 0 {
            return Err(AsrError::Config(format!(
                "encoder_dim={} is not divisible by num_heads={}",
                self.encoder_dim, self.num_heads
            )));
        }
        if self.depthwise_conv_kernel_size % 2 == 0 {
            return Err(AsrError::Config(format!(
                "depthwise_conv_kernel_size must be odd, got {}",
                self.depthwise_conv_kernel_size
            )));
        }
        if !(0.0..1.0).contains(&self.dropout_rate) {
            return Err(AsrError::Config(format!(
                "dropout_rate must be in [0, 1), got {}",
                self.dropout_rate
            )));
        }
        self.subsampling.geometry()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> ConformerCtcConfig {
        ConformerCtcConfig {
            vocab_size: 30,
            ..Default::default()
        }
    }

    #[test]
    fn test_default_is_valid_once_vocab_is_set() {
        assert!(ConformerCtcConfig::default().validate().is_err());
        assert!(valid().validate().is_ok());
        assert_eq!(valid().blank_id(), 29);
    }

    #[test]
    fn test_even_depthwise_kernel_rejected() {
        let config = ConformerCtcConfig {
            depthwise_conv_kernel_size: 4,
            ..valid()
        };
        assert!(matches!(config.validate(), Err(AsrError::Config(_))));
    }

    #[test]
    fn test_heads_must_divide_dim() {
        let config = ConformerCtcConfig {
            num_heads: 5,
            ..valid()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_json_with_pair_geometry() {
        let json = r#"{
            "input_dim": 80, "vocab_size": 40, "encoder_dim": 64, "ffn_dim": 128,
            "num_layers": 2, "num_heads": 4,
            "subsampling": {"kernel_size": [3, 5], "stride": 2}
        }"#;
        let config: ConformerCtcConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.depthwise_conv_kernel_size, 31);
        assert_eq!(config.subsampling.kernel_size, AxisPair::new(3, 5));
        assert_eq!(config.subsampling.stride, AxisPair::new(2, 2));
        assert_eq!(config.subsampling.dilation, AxisPair::new(1, 1));

        let geometry = config.subsampling.geometry().unwrap();
        assert_eq!(geometry.freq.kernel, 5);
        assert!(!geometry.is_symmetric());
    }
}
