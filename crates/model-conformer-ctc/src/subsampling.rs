//! Conv2d-субдискретизация с покадровым пересчётом длин.
//!
//! Две одинаковые по геометрии 2-D свёртки (1 -> out_dim, out_dim -> out_dim),
//! каждая с ReLU и dropout, затем Linear(out_dim * freq_width -> out_dim).
//! Длины батча пересчитываются той же геометрией оси времени, что и сами
//! свёртки, поэтому валидная длина никогда не превышает сжатую ось тензора.
//!
//! Ключи весов совпадают с PyTorch-реализацией: `conv.0`, `conv.3`, `out`.

use asr_core::{AsrError, AsrResult};
use candle_core::{DType, Device, Tensor};
use candle_nn::{Dropout, Linear, Module, VarBuilder, init};
use tracing::debug;

use crate::length::ConvGeometry;

/// Веса одной 2-D свёртки с произвольной геометрией по осям.
struct Conv2dStage {
    /// (out_channels, in_channels, k_time, k_freq)
    weight: Tensor,
    /// (out_channels,)
    bias: Tensor,
}

impl Conv2dStage {
    fn new(in_channels: usize, out_channels: usize, geometry: &ConvGeometry, vb: VarBuilder) -> candle_core::Result<Self> {
        let (kt, kf) = (geometry.time.kernel, geometry.freq.kernel);
        // Та же инициализация, что у candle_nn::conv2d.
        let weight = vb.get_with_hints(
            (out_channels, in_channels, kt, kf),
            "weight",
            init::DEFAULT_KAIMING_NORMAL,
        )?;
        let bound = 1.0 / ((in_channels * kt * kf) as f64).sqrt();
        let bias = vb.get_with_hints(
            out_channels,
            "bias",
            init::Init::Uniform { lo: -bound, up: bound },
        )?;
        Ok(Self { weight, bias })
    }

    /// x: (batch, in_channels, time, freq) -> (batch, out_channels, time', freq').
    fn forward(&self, x: &Tensor, geometry: &ConvGeometry) -> candle_core::Result<Tensor> {
        let y = if geometry.is_symmetric() {
            let g = geometry.time;
            x.conv2d(&self.weight, g.padding, g.stride, g.dilation, 1)?
        } else {
            conv2d_im2col(x, &self.weight, geometry)?
        };
        let bias = self.bias.reshape((1, self.bias.dim(0)?, 1, 1))?;
        y.broadcast_add(&bias)
    }
}

/// 2-D свёртка без bias с отдельной геометрией по осям (через im2col).
///
/// * `x` — (batch, in_channels, time, freq)
/// * `weight` — (out_channels, in_channels, k_time, k_freq)
///
/// Для симметричной геометрии совпадает с `Tensor::conv2d`.
pub fn conv2d_im2col(x: &Tensor, weight: &Tensor, geometry: &ConvGeometry) -> candle_core::Result<Tensor> {
    let (t, f) = (geometry.time, geometry.freq);
    let (b, c, t_len, f_len) = x.dims4()?;
    let t_out = t.output_length(t_len as i64);
    let f_out = f.output_length(f_len as i64);
    if t_out <= 0 || f_out <= 0 {
        candle_core::bail!(
            "conv window ({}, {}) does not fit input ({t_len}, {f_len})",
            t.receptive_field(),
            f.receptive_field()
        );
    }
    let (t_out, f_out) = (t_out as usize, f_out as usize);

    let x = x.pad_with_zeros(2, t.padding, t.padding)?;
    let x = x.pad_with_zeros(3, f.padding, f.padding)?;

    let device = x.device();
    let mut patches = Vec::with_capacity(t.kernel * f.kernel);
    for ki in 0..t.kernel {
        let t_idx = strided_index(ki * t.dilation, t.stride, t_out, device)?;
        let rows = x.index_select(&t_idx, 2)?;
        for kj in 0..f.kernel {
            let f_idx = strided_index(kj * f.dilation, f.stride, f_out, device)?;
            patches.push(rows.index_select(&f_idx, 3)?);
        }
    }

    // (b, c, kt*kf, t', f') -> (b, c*kt*kf, t'*f')
    let k = c * t.kernel * f.kernel;
    let cols = Tensor::stack(&patches, 2)?.reshape((b, k, t_out * f_out))?;
    let (o, _, _, _) = weight.dims4()?;
    let w = weight.reshape((o, k))?;
    w.broadcast_matmul(&cols)?.reshape((b, o, t_out, f_out))
}

/// Индексы `start, start + step, ...` (count штук).
fn strided_index(start: usize, step: usize, count: usize, device: &Device) -> candle_core::Result<Tensor> {
    let idx: Vec<u32> = (0..count).map(|i| (start + i * step) as u32).collect();
    Tensor::from_vec(idx, count, device)
}

/// Conv2d-субдискретизация признаков (batch, time, feat) -> (batch, time'', out_dim).
pub struct Conv2dSubsampling {
    convs: [Conv2dStage; 2],
    out: Linear,
    dropout: Dropout,
    geometry: ConvGeometry,
    in_dim: usize,
    out_dim: usize,
    freq_width: usize,
}

impl Conv2dSubsampling {
    /// Построить модуль.
    ///
    /// Ошибка [`AsrError::Config`], если после двух свёрток ширина по частоте <= 0.
    pub fn new(
        in_dim: usize,
        out_dim: usize,
        geometry: ConvGeometry,
        dropout_rate: f32,
        vb: VarBuilder,
    ) -> AsrResult<Self> {
        let freq_once = geometry.freq.output_length(in_dim as i64);
        let freq_width = geometry.freq.output_length(freq_once);
        if freq_width <= 0 {
            return Err(AsrError::Config(format!(
                "Conv2dSubsampling сводит частотную ось к {freq_width} (in_dim={in_dim}, geometry={:?})",
                geometry.freq
            )));
        }
        let freq_width = freq_width as usize;

        let conv0 = Conv2dStage::new(1, out_dim, &geometry, vb.pp("conv.0"))?;
        let conv3 = Conv2dStage::new(out_dim, out_dim, &geometry, vb.pp("conv.3"))?;
        let out = candle_nn::linear(out_dim * freq_width, out_dim, vb.pp("out"))?;

        debug!(
            "Conv2dSubsampling: in_dim={in_dim}, out_dim={out_dim}, freq_width={freq_width}, symmetric={}",
            geometry.is_symmetric()
        );

        Ok(Self {
            convs: [conv0, conv3],
            out,
            dropout: Dropout::new(dropout_rate),
            geometry,
            in_dim,
            out_dim,
            freq_width,
        })
    }

    /// Ширина по частоте после двух свёрток.
    pub fn freq_width(&self) -> usize {
        self.freq_width
    }

    pub fn out_dim(&self) -> usize {
        self.out_dim
    }

    pub fn geometry(&self) -> &ConvGeometry {
        &self.geometry
    }

    /// Размер оси времени на выходе для входа из `time` фреймов (может быть <= 0).
    pub fn output_time_length(&self, time: i64) -> i64 {
        let g = self.geometry.time;
        g.output_length(g.output_length(time))
    }

    /// Пересчитать валидные длины: формула дважды по оси времени, не меньше 0.
    pub fn output_lengths(&self, x_len: &Tensor) -> candle_core::Result<Tensor> {
        let g = self.geometry.time;
        g.output_lengths(&g.output_lengths(x_len)?)
    }

    /// Прямой проход.
    ///
    /// * `x` — (batch, time, in_dim)
    /// * `x_len` — (batch,) валидные длины
    /// * `train` — включает dropout
    ///
    /// Возвращает (batch, time'', out_dim) и длины (batch,) в I64.
    pub fn forward(&self, x: &Tensor, x_len: &Tensor, train: bool) -> AsrResult<(Tensor, Tensor)> {
        let (batch, time, feat) = x.dims3()?;
        if feat != self.in_dim {
            return Err(AsrError::Data(format!(
                "ожидалось {} частотных бинов, получено {feat}",
                self.in_dim
            )));
        }
        if x_len.dims1()? != batch {
            return Err(AsrError::Data(format!(
                "длин {} на батч из {batch} примеров",
                x_len.dims1()?
            )));
        }
        let out_time = self.output_time_length(time as i64);
        if out_time <= 0 {
            return Err(AsrError::Data(format!(
                "батч из {time} фреймов слишком короткий для субдискретизации"
            )));
        }

        let mut h = x.to_dtype(DType::F32)?.unsqueeze(1)?;
        for conv in &self.convs {
            h = conv.forward(&h, &self.geometry)?.relu()?;
            h = self.dropout.forward(&h, train)?;
        }

        // (b, c, t'', f'') -> (b, t'', c, f'') -> (b, t'', c * f'')
        let (_, channels, t_out, f_out) = h.dims4()?;
        debug_assert_eq!(t_out as i64, out_time);
        debug_assert_eq!(f_out, self.freq_width);
        let h = h
            .permute((0, 2, 1, 3))?
            .contiguous()?
            .reshape((batch, t_out, channels * f_out))?;
        let h = self.out.forward(&h)?;

        let out_len = self.output_lengths(x_len)?;
        Ok((h, out_len))
    }
}
