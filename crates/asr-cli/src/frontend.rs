//! Фронтенд модели: параметры fbank и словарь рядом с весами.
//!
//! `decode` должен считать признаки ровно так же, как при прогоне модели,
//! поэтому `FbankConfig` сохраняется в директорию модели целиком.

use std::path::Path;

use anyhow::{Context, Result, bail};
use asr_core::FbankConfig;
use asr_data::CharTokenizer;
use model_conformer_ctc::ConformerCtcConfig;

/// Параметры признаков в директории модели.
pub const FEATURES_FILE: &str = "features.json";
/// Словарь в директории модели.
pub const TOKENS_FILE: &str = "tokens.json";

#[derive(Debug, Clone, PartialEq)]
pub struct Frontend {
    pub fbank: FbankConfig,
    pub tokenizer: CharTokenizer,
}

impl Frontend {
    pub fn save(&self, model_dir: impl AsRef<Path>) -> Result<()> {
        let model_dir = model_dir.as_ref();
        std::fs::create_dir_all(model_dir)?;
        std::fs::write(
            model_dir.join(FEATURES_FILE),
            serde_json::to_string_pretty(&self.fbank)?,
        )?;
        self.tokenizer.save(model_dir.join(TOKENS_FILE))?;
        Ok(())
    }

    /// Загрузить фронтенд и сверить его с конфигом модели.
    pub fn load(model_dir: impl AsRef<Path>, model: &ConformerCtcConfig) -> Result<Self> {
        let model_dir = model_dir.as_ref();
        let features = model_dir.join(FEATURES_FILE);
        let fbank: FbankConfig = asr_core::load_json(&features)
            .with_context(|| format!("нет параметров признаков {}", features.display()))?;
        fbank.validate()?;
        let tokenizer = CharTokenizer::load(model_dir.join(TOKENS_FILE))?;

        if fbank.num_mel_bins != model.input_dim {
            bail!(
                "{}: num_mel_bins = {}, а модель ждёт input_dim = {}",
                features.display(),
                fbank.num_mel_bins,
                model.input_dim
            );
        }
        if tokenizer.vocab_size() + 1 != model.vocab_size {
            bail!(
                "словарь {} символов не подходит к модели с {} классами",
                tokenizer.vocab_size(),
                model.vocab_size
            );
        }
        Ok(Self { fbank, tokenizer })
    }
}
