//! ConformerCtc — субдискретизация + Conformer-энкодер + CTC-голова.

use std::path::Path;
use std::time::Instant;

use candle_core::{DType, Device, Tensor};
use candle_nn::{VarBuilder, VarMap};
use tracing::{debug, info};

use asr_core::{AsrError, AsrResult, load_json};

use crate::config::ConformerCtcConfig;
use crate::conformer::ConformerEncoder;
use crate::ctc::{CtcGreedyDecoder, CtcHead};
use crate::subsampling::Conv2dSubsampling;

/// Имя файла конфигурации в директории модели.
pub const CONFIG_FILE: &str = "config.json";
/// Имя файла весов в директории модели.
pub const WEIGHTS_FILE: &str = "model.safetensors";

/// CTC Conformer: (batch, time, feat) → логиты (batch, time'', vocab).
pub struct ConformerCtc {
    subsampling: Conv2dSubsampling,
    encoder: ConformerEncoder,
    head: CtcHead,
    config: ConformerCtcConfig,
}

impl ConformerCtc {
    /// Построить модель поверх произвольного VarBuilder.
    ///
    /// Ключи: `subsampling.*`, `conformer.conformer_layers.{i}.*`, `ctc_linear.*`.
    pub fn new(config: &ConformerCtcConfig, vb: VarBuilder) -> AsrResult<Self> {
        config.validate()?;

        let subsampling = Conv2dSubsampling::new(
            config.input_dim,
            config.encoder_dim,
            config.subsampling.geometry()?,
            config.dropout_rate,
            vb.pp("subsampling"),
        )?;
        let encoder = ConformerEncoder::load(config, vb.pp("conformer"))?;
        let head = CtcHead::load(config.encoder_dim, config.vocab_size, vb.pp("ctc_linear"))?;

        debug!(
            "ConformerCtc: {} слоёв, encoder_dim={}, vocab_size={}",
            config.num_layers, config.encoder_dim, config.vocab_size
        );

        Ok(Self {
            subsampling,
            encoder,
            head,
            config: config.clone(),
        })
    }

    /// Модель со свежими случайными весами; веса живут в возвращаемом `VarMap`.
    pub fn init(config: &ConformerCtcConfig, device: &Device) -> AsrResult<(Self, VarMap)> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);
        let model = Self::new(config, vb)?;
        info!(
            "ConformerCtc: инициализировано {} параметров",
            num_parameters(&varmap)
        );
        Ok((model, varmap))
    }

    /// Загрузить модель из директории.
    ///
    /// Ожидаемые файлы:
    /// - `config.json` — [`ConformerCtcConfig`]
    /// - `model.safetensors` — веса
    pub fn load(model_dir: impl AsRef<Path>, device: &Device) -> AsrResult<Self> {
        let model_dir = model_dir.as_ref();
        info!("ConformerCtc: загрузка модели из {:?}", model_dir);

        let config: ConformerCtcConfig = load_json(model_dir.join(CONFIG_FILE))?;

        let weights = model_dir.join(WEIGHTS_FILE);
        if !weights.exists() {
            return Err(AsrError::Model(format!(
                "Файл {WEIGHTS_FILE} не найден в {:?}",
                model_dir
            )));
        }

        let start = Instant::now();
        // Свёртки и маски считаются в F32 на всех устройствах.
        let vb = unsafe { VarBuilder::from_mmaped_safetensors(&[weights], DType::F32, device)? };
        let model = Self::new(&config, vb)?;
        info!(
            "ConformerCtc: модель загружена за {:.2}с",
            start.elapsed().as_secs_f64()
        );
        Ok(model)
    }

    /// Сохранить конфигурацию и веса в директорию (формат, который читает [`Self::load`]).
    pub fn save(&self, varmap: &VarMap, model_dir: impl AsRef<Path>) -> AsrResult<()> {
        let model_dir = model_dir.as_ref();
        std::fs::create_dir_all(model_dir)?;
        std::fs::write(
            model_dir.join(CONFIG_FILE),
            serde_json::to_string_pretty(&self.config)?,
        )?;
        varmap.save(model_dir.join(WEIGHTS_FILE))?;
        info!("ConformerCtc: сохранено в {:?}", model_dir);
        Ok(())
    }

    pub fn config(&self) -> &ConformerCtcConfig {
        &self.config
    }

    pub fn subsampling(&self) -> &Conv2dSubsampling {
        &self.subsampling
    }

    /// Greedy-декодер с blank = последний класс.
    pub fn greedy_decoder(&self) -> CtcGreedyDecoder {
        CtcGreedyDecoder::new(self.head.blank_id())
    }

    /// Длины на выходе модели для входных длин `x_len`.
    pub fn output_lengths(&self, x_len: &Tensor) -> AsrResult<Tensor> {
        Ok(self.subsampling.output_lengths(x_len)?)
    }

    /// Прямой проход.
    ///
    /// * `x` — (batch, time, input_dim)
    /// * `x_len` — (batch,) валидные длины
    /// * `train` — режим обучения (dropout, статистики BatchNorm)
    ///
    /// Возвращает логиты (batch, time'', vocab_size) и длины (batch,) в I64.
    pub fn forward(&self, x: &Tensor, x_len: &Tensor, train: bool) -> AsrResult<(Tensor, Tensor)> {
        let (h, h_len) = self.subsampling.forward(x, x_len, train)?;
        let (h, h_len) = self.encoder.forward(&h, &h_len, train)?;
        let logits = self.head.forward(&h)?;
        Ok((logits, h_len))
    }

    /// Прямой проход + log_softmax (вход для CTC loss).
    pub fn log_probs(&self, x: &Tensor, x_len: &Tensor, train: bool) -> AsrResult<(Tensor, Tensor)> {
        let (logits, out_len) = self.forward(x, x_len, train)?;
        let log_probs = candle_nn::ops::log_softmax(&logits, candle_core::D::Minus1)?;
        Ok((log_probs, out_len))
    }

    /// Greedy-транскрипция батча в последовательности ID токенов.
    pub fn transcribe_ids(&self, x: &Tensor, x_len: &Tensor) -> AsrResult<Vec<Vec<u32>>> {
        let (logits, out_len) = self.forward(x, x_len, false)?;
        Ok(self.greedy_decoder().decode(&logits, &out_len)?)
    }
}

/// Количество обучаемых параметров в `VarMap`.
pub fn num_parameters(varmap: &VarMap) -> usize {
    varmap.all_vars().iter().map(|v| v.elem_count()).sum()
}
