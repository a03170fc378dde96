//! Арифметика длин для свёрток и геометрия по осям (time, freq).
//!
//! Длина на выходе скользящего окна:
//! `floor((L + 2P - D*(K - 1) - 1) / S) + 1`.
//!
//! Скалярная форма используется при построении архитектуры и может вернуть
//! значение <= 0, вызывающий код обязан такой результат отвергнуть.
//! Векторная форма работает с длинами батча и обрезает результат снизу нулём.

use asr_core::{AsrError, AsrResult};
use candle_core::{DType, Result, Tensor};
use serde::{Deserialize, Serialize};

/// Выходная длина свёртки для одной входной длины (floor-деление).
pub fn conv_output_length(length: i64, kernel: i64, stride: i64, padding: i64, dilation: i64) -> i64 {
    (length + 2 * padding - dilation * (kernel - 1) - 1).div_euclid(stride) + 1
}

/// То же, что [`conv_output_length`], для среза длин, с обрезкой до 0.
pub fn conv_output_lengths_vec(
    lengths: &[i64],
    kernel: i64,
    stride: i64,
    padding: i64,
    dilation: i64,
) -> Vec<i64> {
    lengths
        .iter()
        .map(|&l| conv_output_length(l, kernel, stride, padding, dilation).max(0))
        .collect()
}

/// Векторная форма для тензора длин (batch,).
///
/// Результат — I64 на том же устройстве, что и вход.
pub fn conv_output_lengths(
    lengths: &Tensor,
    kernel: i64,
    stride: i64,
    padding: i64,
    dilation: i64,
) -> Result<Tensor> {
    let values = lengths.to_dtype(DType::I64)?.to_vec1::<i64>()?;
    let out = conv_output_lengths_vec(&values, kernel, stride, padding, dilation);
    Tensor::from_vec(out, values.len(), lengths.device())
}

// -----------------------------------------------------------------------
// Пара значений (time, freq)
// -----------------------------------------------------------------------

/// Параметр, заданный отдельно для оси времени и оси частот.
///
/// В конфигах принимает либо одно число (`3`), либо пару (`[3, 2]`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "IntOrPair", into = "IntOrPair")]
pub struct AxisPair {
    pub time: usize,
    pub freq: usize,
}

impl AxisPair {
    pub fn new(time: usize, freq: usize) -> Self {
        Self { time, freq }
    }

    pub fn is_symmetric(&self) -> bool {
        self.time == self.freq
    }
}

impl From<usize> for AxisPair {
    fn from(value: usize) -> Self {
        Self::new(value, value)
    }
}

impl From<(usize, usize)> for AxisPair {
    fn from((time, freq): (usize, usize)) -> Self {
        Self::new(time, freq)
    }
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum IntOrPair {
    Int(usize),
    Pair(usize, usize),
}

impl From<IntOrPair> for AxisPair {
    fn from(value: IntOrPair) -> Self {
        match value {
            IntOrPair::Int(v) => v.into(),
            IntOrPair::Pair(t, f) => (t, f).into(),
        }
    }
}

impl From<AxisPair> for IntOrPair {
    fn from(pair: AxisPair) -> Self {
        if pair.is_symmetric() {
            IntOrPair::Int(pair.time)
        } else {
            IntOrPair::Pair(pair.time, pair.freq)
        }
    }
}

// -----------------------------------------------------------------------
// Геометрия свёртки
// -----------------------------------------------------------------------

/// Геометрия скользящего окна вдоль одной оси.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AxisGeometry {
    pub kernel: usize,
    pub stride: usize,
    pub padding: usize,
    pub dilation: usize,
}

impl AxisGeometry {
    /// Выходная длина (может быть <= 0).
    pub fn output_length(&self, length: i64) -> i64 {
        conv_output_length(
            length,
            self.kernel as i64,
            self.stride as i64,
            self.padding as i64,
            self.dilation as i64,
        )
    }

    /// Выходные длины батча, обрезанные до 0.
    pub fn output_lengths(&self, lengths: &Tensor) -> Result<Tensor> {
        conv_output_lengths(
            lengths,
            self.kernel as i64,
            self.stride as i64,
            self.padding as i64,
            self.dilation as i64,
        )
    }

    /// Протяжённость окна с учётом dilation.
    pub fn receptive_field(&self) -> usize {
        self.dilation * (self.kernel - 1) + 1
    }
}

/// Геометрия 2-D свёртки: пара [`AxisGeometry`] для осей (time, freq).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConvGeometry {
    pub time: AxisGeometry,
    pub freq: AxisGeometry,
}

impl ConvGeometry {
    /// Собрать геометрию из параметров в формате «число или пара».
    ///
    /// Kernel, stride и dilation должны быть >= 1.
    pub fn new(
        kernel: impl Into<AxisPair>,
        stride: impl Into<AxisPair>,
        padding: impl Into<AxisPair>,
        dilation: impl Into<AxisPair>,
    ) -> AsrResult<Self> {
        let (kernel, stride, padding, dilation) =
            (kernel.into(), stride.into(), padding.into(), dilation.into());

        for (name, pair) in [("kernel_size", kernel), ("stride", stride), ("dilation", dilation)] {
            if pair.time == 0 || pair.freq == 0 {
                return Err(AsrError::Config(format!(
                    "{name} must be >= 1 on both axes, got (time={}, freq={})",
                    pair.time, pair.freq
                )));
            }
        }

        Ok(Self {
            time: AxisGeometry {
                kernel: kernel.time,
                stride: stride.time,
                padding: padding.time,
                dilation: dilation.time,
            },
            freq: AxisGeometry {
                kernel: kernel.freq,
                stride: stride.freq,
                padding: padding.freq,
                dilation: dilation.freq,
            },
        })
    }

    /// Одинаковые ли параметры на обеих осях (можно использовать нативный conv2d).
    pub fn is_symmetric(&self) -> bool {
        self.time == self.freq
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;
    use proptest::prelude::*;

    #[test]
    fn test_default_subsampling_geometry() {
        // kernel 3, stride 2: 100 -> 49 -> 24
        let l1 = conv_output_length(100, 3, 2, 0, 1);
        assert_eq!(l1, 49);
        assert_eq!(conv_output_length(l1, 3, 2, 0, 1), 24);
    }

    #[test]
    fn test_scalar_may_go_non_positive() {
        assert_eq!(conv_output_length(2, 3, 2, 0, 1), 0);
        assert_eq!(conv_output_length(0, 3, 2, 0, 1), -1);
        assert_eq!(conv_output_length(0, 5, 1, 0, 1), -4);
    }

    #[test]
    fn test_vectorized_clamps_to_zero() {
        let out = conv_output_lengths_vec(&[0, 1, 2, 3, 7], 3, 2, 0, 1);
        assert_eq!(out, vec![0, 0, 0, 1, 3]);
    }

    #[test]
    fn test_tensor_form_keeps_device_and_dtype() {
        let lengths = Tensor::new(&[100u32, 3, 1], &Device::Cpu).unwrap();
        let out = conv_output_lengths(&lengths, 3, 2, 0, 1).unwrap();
        assert_eq!(out.dtype(), DType::I64);
        assert!(out.device().is_cpu());
        assert_eq!(out.to_vec1::<i64>().unwrap(), vec![49, 1, 0]);
    }

    #[test]
    fn test_axis_pair_from_int_or_pair() {
        let sym: AxisPair = 3.into();
        assert_eq!(sym, AxisPair::new(3, 3));
        let pair: AxisPair = (3, 2).into();
        assert_eq!(pair.time, 3);
        assert_eq!(pair.freq, 2);
    }

    #[test]
    fn test_axis_pair_serde() {
        let a: AxisPair = serde_json::from_str("3").unwrap();
        assert_eq!(a, AxisPair::new(3, 3));
        let b: AxisPair = serde_json::from_str("[5, 1]").unwrap();
        assert_eq!(b, AxisPair::new(5, 1));

        assert_eq!(serde_json::to_string(&a).unwrap(), "3");
        assert_eq!(serde_json::to_string(&b).unwrap(), "[5,1]");
    }

    #[test]
    fn test_geometry_rejects_zero_stride() {
        let err = ConvGeometry::new(3, (2, 0), 0, 1).unwrap_err();
        assert!(matches!(err, AsrError::Config(_)));
        assert!(ConvGeometry::new(0, 2, 0, 1).is_err());
        assert!(ConvGeometry::new(3, 2, 0, 0).is_err());
    }

    #[test]
    fn test_geometry_per_axis() {
        let g = ConvGeometry::new((3, 5), (2, 1), (1, 0), 1).unwrap();
        assert!(!g.is_symmetric());
        assert_eq!(g.time.output_length(10), 5);
        assert_eq!(g.freq.output_length(10), 6);
        assert_eq!(g.freq.receptive_field(), 5);
    }

    proptest! {
        #[test]
        fn prop_vectorized_matches_scalar(
            lengths in prop::collection::vec(0i64..2000, 1..16),
            kernel in 1i64..8,
            stride in 1i64..5,
            padding in 0i64..4,
            dilation in 1i64..4,
        ) {
            let out = conv_output_lengths_vec(&lengths, kernel, stride, padding, dilation);
            prop_assert_eq!(out.len(), lengths.len());
            for (&l, &o) in lengths.iter().zip(out.iter()) {
                let scalar = conv_output_length(l, kernel, stride, padding, dilation);
                if scalar >= 0 {
                    prop_assert_eq!(o, scalar);
                } else {
                    prop_assert_eq!(o, 0);
                }
            }
        }

        #[test]
        fn prop_scalar_is_floor_division(
            length in 0i64..5000,
            kernel in 1i64..10,
            stride in 1i64..6,
            padding in 0i64..5,
            dilation in 1i64..4,
        ) {
            let numer = length + 2 * padding - dilation * (kernel - 1) - 1;
            let expected = (numer as f64 / stride as f64).floor() as i64 + 1;
            prop_assert_eq!(conv_output_length(length, kernel, stride, padding, dilation), expected);
        }
    }
}
