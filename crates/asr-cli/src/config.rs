//! Конфигурация эксперимента: один YAML на признаки, сэмплер и модель.

use std::path::{Path, PathBuf};

use anyhow::{Result, bail};
use asr_core::FbankConfig;
use asr_data::{CharTokenizer, SamplerConfig};
use model_conformer_ctc::ConformerCtcConfig;
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataConfig {
    /// JSONL-манифест обучающей выборки.
    pub train_manifest: PathBuf,

    /// Словарь (`tokens.json`). Если файла нет, строится по манифесту.
    #[serde(default)]
    pub tokens: Option<PathBuf>,

    /// Символы, добавляемые в словарь при построении.
    #[serde(default)]
    pub extra_chars: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentConfig {
    pub data: DataConfig,

    #[serde(default)]
    pub features: FbankConfig,

    #[serde(default)]
    pub sampler: SamplerConfig,

    #[serde(default)]
    pub model: ConformerCtcConfig,
}

impl ExperimentConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let cfg: Self = asr_core::load_yaml(path)?;
        info!(
            "Конфиг {}: манифест {}, {:?}",
            path.display(),
            cfg.data.train_manifest.display(),
            cfg.sampler.limit()
        );
        Ok(cfg)
    }

    /// Словарь эксперимента: из `data.tokens`, иначе по обучающему манифесту.
    pub fn tokenizer(&self) -> Result<CharTokenizer> {
        match &self.data.tokens {
            Some(path) if path.exists() => Ok(CharTokenizer::load(path)?),
            _ => Ok(CharTokenizer::build(
                &self.data.extra_chars,
                &[&self.data.train_manifest],
            )?),
        }
    }

    /// Конфиг модели, согласованный с признаками и словарём.
    ///
    /// `vocab_size: 0` в YAML означает «по словарю»: символы + blank.
    pub fn resolve_model(&self, tokenizer: &CharTokenizer) -> Result<ConformerCtcConfig> {
        let mut model = self.model.clone();
        let expected_vocab = tokenizer.vocab_size() + 1;
        if model.vocab_size == 0 {
            model.vocab_size = expected_vocab;
        } else if model.vocab_size != expected_vocab {
            bail!(
                "model.vocab_size = {}, а словарь даёт {} символов + blank",
                model.vocab_size,
                tokenizer.vocab_size()
            );
        }
        if model.input_dim != self.features.num_mel_bins {
            bail!(
                "model.input_dim = {} не совпадает с features.num_mel_bins = {}",
                model.input_dim,
                self.features.num_mel_bins
            );
        }
        model.validate()?;
        Ok(model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use asr_data::BatchLimit;
    use model_conformer_ctc::AxisPair;

    const YAML: &str = r#"
data:
  train_manifest: data/train.jsonl
  tokens: data/tokens.json
features:
  num_mel_bins: 80
sampler:
  max_frame_per_batch: 12000
  bucket_size: 50
  seed: 42
model:
  input_dim: 80
  vocab_size: 0
  encoder_dim: 144
  ffn_dim: 576
  num_layers: 4
  num_heads: 4
  subsampling:
    kernel_size: [3, 5]
    stride: 2
"#;

    #[test]
    fn test_parse_experiment_yaml() {
        let cfg: ExperimentConfig = serde_yaml::from_str(YAML).unwrap();
        assert_eq!(cfg.data.train_manifest, PathBuf::from("data/train.jsonl"));
        assert_eq!(cfg.features.num_mel_bins, 80);
        assert_eq!(cfg.features.sample_rate, FbankConfig::default().sample_rate);
        assert_eq!(cfg.sampler.limit().unwrap(), BatchLimit::MaxFrames(12000));
        assert!(cfg.sampler.shuffle);
        assert_eq!(cfg.model.num_layers, 4);
        assert_eq!(cfg.model.subsampling.kernel_size, AxisPair::new(3, 5));
        assert_eq!(cfg.model.subsampling.stride, AxisPair::from(2));
    }

    #[test]
    fn test_resolve_model_fills_vocab() {
        let cfg: ExperimentConfig = serde_yaml::from_str(YAML).unwrap();
        let tokenizer = CharTokenizer::from_chars("abc".chars());
        let model = cfg.resolve_model(&tokenizer).unwrap();
        assert_eq!(model.vocab_size, 4);
        assert_eq!(model.blank_id(), 3);
    }

    #[test]
    fn test_resolve_model_rejects_mismatch() {
        let mut cfg: ExperimentConfig = serde_yaml::from_str(YAML).unwrap();
        let tokenizer = CharTokenizer::from_chars("abc".chars());

        cfg.model.vocab_size = 10;
        assert!(cfg.resolve_model(&tokenizer).is_err());

        cfg.model.vocab_size = 0;
        cfg.features.num_mel_bins = 40;
        assert!(cfg.resolve_model(&tokenizer).is_err());
    }
}
