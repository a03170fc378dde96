//! Conformer-энкодер (Gulati et al., 2020) в раскладке torchaudio.
//!
//! Каждый слой: ½·FFN → MHSA с маской паддинга → свёрточный модуль →
//! ½·FFN → LayerNorm. Ключи весов совпадают с `torchaudio.models.Conformer`
//! (`conformer_layers.{i}.ffn1.sequential.1` и т.д.), так что
//! сконвертированные safetensors грузятся через VarBuilder напрямую.
//!
//! Паддинг-фреймы исключаются из ключей внимания и зануляются перед
//! depthwise-свёрткой: валидные фреймы не зависят от того, сколько
//! паддинга несёт батч (в режиме eval).

use candle_core::{DType, Device, Module, ModuleT, Result, Tensor};
use candle_nn::{
    BatchNorm, BatchNormConfig, Conv1d, Conv1dConfig, Dropout, GroupNorm, LayerNorm, Linear, VarBuilder,
};

use crate::config::ConformerCtcConfig;

/// Значение, которым заполняются замаскированные логиты внимания.
const MASK_FILL: f64 = -1e4;

const LN_EPS: f64 = 1e-5;

// -----------------------------------------------------------------------
// Маски по длинам
// -----------------------------------------------------------------------

/// Маска паддинга (batch, time): 1 там, где `t >= len`.
pub fn padding_mask(lengths: &[i64], time: usize, device: &Device) -> Result<Tensor> {
    let data: Vec<u8> = lengths
        .iter()
        .flat_map(|&len| (0..time).map(move |t| u8::from(t as i64 >= len)))
        .collect();
    Tensor::from_vec(data, (lengths.len(), time), device)
}

/// Маска валидных фреймов (batch, time, 1) в dtype `dtype`: 1.0 для `t < len`.
fn valid_frames(lengths: &[i64], time: usize, dtype: DType, device: &Device) -> Result<Tensor> {
    let data: Vec<f32> = lengths
        .iter()
        .flat_map(|&len| (0..time).map(move |t| if (t as i64) < len { 1.0 } else { 0.0 }))
        .collect();
    Tensor::from_vec(data, (lengths.len(), time, 1), device)?.to_dtype(dtype)
}

// -----------------------------------------------------------------------
// Feed-Forward
// -----------------------------------------------------------------------

/// LayerNorm → Linear → SiLU → Dropout → Linear → Dropout.
pub struct FeedForward {
    layer_norm: LayerNorm,
    linear1: Linear,
    linear2: Linear,
    dropout: Dropout,
}

impl FeedForward {
    pub fn load(d_model: usize, d_ff: usize, dropout: f32, vb: VarBuilder) -> Result<Self> {
        let vb = vb.pp("sequential");
        Ok(Self {
            layer_norm: candle_nn::layer_norm(d_model, LN_EPS, vb.pp("0"))?,
            linear1: candle_nn::linear(d_model, d_ff, vb.pp("1"))?,
            linear2: candle_nn::linear(d_ff, d_model, vb.pp("4"))?,
            dropout: Dropout::new(dropout),
        })
    }

    pub fn forward(&self, x: &Tensor, train: bool) -> Result<Tensor> {
        let h = self.layer_norm.forward(x)?;
        let h = self.linear1.forward(&h)?.silu()?;
        let h = self.dropout.forward(&h, train)?;
        let h = self.linear2.forward(&h)?;
        self.dropout.forward(&h, train)
    }
}

// -----------------------------------------------------------------------
// Multi-Head Self-Attention
// -----------------------------------------------------------------------

/// MHSA с общей входной проекцией (`in_proj_weight`), как `nn.MultiheadAttention`.
pub struct MultiHeadSelfAttention {
    q_proj: Linear,
    k_proj: Linear,
    v_proj: Linear,
    out_proj: Linear,
    dropout: Dropout,
    n_heads: usize,
    d_k: usize,
}

impl MultiHeadSelfAttention {
    pub fn load(d_model: usize, n_heads: usize, dropout: f32, vb: VarBuilder) -> Result<Self> {
        let bound = 1.0 / (d_model as f64).sqrt();
        let in_w = vb.get_with_hints(
            (3 * d_model, d_model),
            "in_proj_weight",
            candle_nn::init::Init::Uniform { lo: -bound, up: bound },
        )?;
        let in_b = vb.get_with_hints(3 * d_model, "in_proj_bias", candle_nn::init::ZERO)?;

        let proj = |i: usize| -> Result<Linear> {
            Ok(Linear::new(
                in_w.narrow(0, i * d_model, d_model)?,
                Some(in_b.narrow(0, i * d_model, d_model)?),
            ))
        };

        Ok(Self {
            q_proj: proj(0)?,
            k_proj: proj(1)?,
            v_proj: proj(2)?,
            out_proj: candle_nn::linear(d_model, d_model, vb.pp("out_proj"))?,
            dropout: Dropout::new(dropout),
            n_heads,
            d_k: d_model / n_heads,
        })
    }

    /// x: (batch, seq, d_model); `key_padding_mask`: (batch, seq), 1 = паддинг.
    pub fn forward(&self, x: &Tensor, key_padding_mask: Option<&Tensor>, train: bool) -> Result<Tensor> {
        let (b, t, _) = x.dims3()?;

        let heads = |h: Tensor| -> Result<Tensor> {
            h.reshape((b, t, self.n_heads, self.d_k))?
                .transpose(1, 2)? // (batch, heads, seq, d_k)
                .contiguous()
        };
        let q = heads(self.q_proj.forward(x)?)?;
        let k = heads(self.k_proj.forward(x)?)?;
        let v = heads(self.v_proj.forward(x)?)?;

        let scale = (self.d_k as f64).sqrt();
        let mut scores = (q.matmul(&k.transpose(2, 3)?.contiguous()?)? / scale)?;

        if let Some(mask) = key_padding_mask {
            // (batch, seq) -> (batch, 1, 1, seq): маскируем только ключи.
            let mask = mask.reshape((b, 1, 1, t))?.broadcast_as(scores.shape())?;
            let fill = Tensor::new(MASK_FILL as f32, scores.device())?
                .to_dtype(scores.dtype())?
                .broadcast_as(scores.shape())?;
            scores = mask.where_cond(&fill, &scores)?;
        }

        let attn = candle_nn::ops::softmax_last_dim(&scores)?;
        let attn = self.dropout.forward(&attn, train)?;

        let context = attn
            .matmul(&v)? // (batch, heads, seq, d_k)
            .transpose(1, 2)?
            .reshape((b, t, self.n_heads * self.d_k))?;
        self.out_proj.forward(&context)
    }
}

// -----------------------------------------------------------------------
// Convolution Module
// -----------------------------------------------------------------------

/// Нормализация внутри свёрточного модуля.
enum ConvNorm {
    Batch(BatchNorm),
    Group(GroupNorm),
}

impl ConvNorm {
    fn forward(&self, x: &Tensor, train: bool) -> Result<Tensor> {
        match self {
            Self::Batch(bn) => bn.forward_t(x, train),
            Self::Group(gn) => gn.forward(x),
        }
    }
}

/// LayerNorm → Pointwise Conv1d → GLU → Depthwise Conv1d → Norm → SiLU →
/// Pointwise Conv1d → Dropout.
pub struct ConvolutionModule {
    layer_norm: LayerNorm,
    pointwise_conv1: Conv1d,
    depthwise_conv: Conv1d,
    norm: ConvNorm,
    pointwise_conv2: Conv1d,
    dropout: Dropout,
    d_model: usize,
}

impl ConvolutionModule {
    pub fn load(
        d_model: usize,
        kernel_size: usize,
        use_group_norm: bool,
        dropout: f32,
        vb: VarBuilder,
    ) -> Result<Self> {
        let layer_norm = candle_nn::layer_norm(d_model, LN_EPS, vb.pp("layer_norm"))?;
        let seq = vb.pp("sequential");

        let pw_cfg = Conv1dConfig::default();
        // torchaudio строит свёртки модуля с bias: sequential.{0,2,5}.bias.
        let pointwise_conv1 = candle_nn::conv1d(d_model, 2 * d_model, 1, pw_cfg, seq.pp("0"))?;

        let dw_cfg = Conv1dConfig {
            padding: (kernel_size - 1) / 2,
            groups: d_model,
            ..Default::default()
        };
        let depthwise_conv = candle_nn::conv1d(d_model, d_model, kernel_size, dw_cfg, seq.pp("2"))?;

        let norm = if use_group_norm {
            ConvNorm::Group(candle_nn::group_norm(1, d_model, LN_EPS, seq.pp("3"))?)
        } else {
            let bn_cfg = BatchNormConfig {
                eps: LN_EPS,
                ..Default::default()
            };
            ConvNorm::Batch(candle_nn::batch_norm(d_model, bn_cfg, seq.pp("3"))?)
        };

        let pointwise_conv2 = candle_nn::conv1d(d_model, d_model, 1, pw_cfg, seq.pp("5"))?;

        Ok(Self {
            layer_norm,
            pointwise_conv1,
            depthwise_conv,
            norm,
            pointwise_conv2,
            dropout: Dropout::new(dropout),
            d_model,
        })
    }

    /// x: (batch, seq, d_model) -> (batch, seq, d_model).
    ///
    /// `valid` — (batch, seq, 1): паддинг зануляется перед depthwise-свёрткой.
    pub fn forward(&self, x: &Tensor, valid: Option<&Tensor>, train: bool) -> Result<Tensor> {
        let h = self.layer_norm.forward(x)?;
        let h = h.transpose(1, 2)?.contiguous()?; // (batch, d_model, seq)

        let h = self.pointwise_conv1.forward(&h)?;
        // GLU по каналам
        let a = h.narrow(1, 0, self.d_model)?;
        let g = h.narrow(1, self.d_model, self.d_model)?;
        let mut h = (a * candle_nn::ops::sigmoid(&g)?)?;
        if let Some(valid) = valid {
            h = h.broadcast_mul(&valid.transpose(1, 2)?)?;
        }

        let h = self.depthwise_conv.forward(&h)?;
        let h = self.norm.forward(&h, train)?;
        let h = h.silu()?;
        let h = self.pointwise_conv2.forward(&h)?;
        let h = self.dropout.forward(&h, train)?;

        h.transpose(1, 2)
    }
}

// -----------------------------------------------------------------------
// Conformer Layer
// -----------------------------------------------------------------------

/// Один слой Conformer (Macaron-style).
pub struct ConformerLayer {
    ffn1: FeedForward,
    self_attn_layer_norm: LayerNorm,
    self_attn: MultiHeadSelfAttention,
    self_attn_dropout: Dropout,
    conv_module: ConvolutionModule,
    ffn2: FeedForward,
    final_layer_norm: LayerNorm,
}

impl ConformerLayer {
    pub fn load(config: &ConformerCtcConfig, vb: VarBuilder) -> Result<Self> {
        let d = config.encoder_dim;
        let p = config.dropout_rate;
        Ok(Self {
            ffn1: FeedForward::load(d, config.ffn_dim, p, vb.pp("ffn1"))?,
            self_attn_layer_norm: candle_nn::layer_norm(d, LN_EPS, vb.pp("self_attn_layer_norm"))?,
            self_attn: MultiHeadSelfAttention::load(d, config.num_heads, p, vb.pp("self_attn"))?,
            self_attn_dropout: Dropout::new(p),
            conv_module: ConvolutionModule::load(
                d,
                config.depthwise_conv_kernel_size,
                config.use_group_norm,
                p,
                vb.pp("conv_module"),
            )?,
            ffn2: FeedForward::load(d, config.ffn_dim, p, vb.pp("ffn2"))?,
            final_layer_norm: candle_nn::layer_norm(d, LN_EPS, vb.pp("final_layer_norm"))?,
        })
    }

    /// * `x` — (batch, seq, d_model)
    /// * `key_padding_mask` — (batch, seq), 1 = паддинг
    /// * `valid` — (batch, seq, 1), 1.0 для валидных фреймов
    pub fn forward(&self, x: &Tensor, key_padding_mask: &Tensor, valid: &Tensor, train: bool) -> Result<Tensor> {
        const FFN_FACTOR: f64 = 0.5;

        // 1. FFN1
        let residual = (x + (self.ffn1.forward(x, train)? * FFN_FACTOR)?)?;

        // 2. Self-Attention
        let h = self.self_attn_layer_norm.forward(&residual)?;
        let h = self.self_attn.forward(&h, Some(key_padding_mask), train)?;
        let h = self.self_attn_dropout.forward(&h, train)?;
        let residual = (residual + h)?;

        // 3. Convolution
        let h = self.conv_module.forward(&residual, Some(valid), train)?;
        let residual = (residual + h)?;

        // 4. FFN2
        let residual = (&residual + (self.ffn2.forward(&residual, train)? * FFN_FACTOR)?)?;

        // 5. Финальная нормализация
        self.final_layer_norm.forward(&residual)
    }
}

// -----------------------------------------------------------------------
// Conformer Encoder
// -----------------------------------------------------------------------

/// Стек слоёв Conformer: (batch, seq, d_model) + длины -> то же + те же длины.
pub struct ConformerEncoder {
    layers: Vec<ConformerLayer>,
}

impl ConformerEncoder {
    pub fn load(config: &ConformerCtcConfig, vb: VarBuilder) -> Result<Self> {
        let layers = (0..config.num_layers)
            .map(|i| ConformerLayer::load(config, vb.pp(format!("conformer_layers.{i}"))))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { layers })
    }

    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    /// Прямой проход.
    ///
    /// `lengths` — (batch,) валидные длины; длина 0 допустима (строка
    /// полностью замаскирована, NaN не возникает). Возвращает выход и те же длины.
    pub fn forward(&self, x: &Tensor, lengths: &Tensor, train: bool) -> Result<(Tensor, Tensor)> {
        let (_, t, _) = x.dims3()?;
        let lens = lengths.to_dtype(DType::I64)?.to_vec1::<i64>()?;
        let key_padding_mask = padding_mask(&lens, t, x.device())?;
        let valid = valid_frames(&lens, t, x.dtype(), x.device())?;

        let mut h = x.clone();
        for layer in &self.layers {
            h = layer.forward(&h, &key_padding_mask, &valid, train)?;
        }
        Ok((h, lengths.clone()))
    }
}
