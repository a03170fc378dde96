//! Датасет по JSONL-манифесту: WAV → моно → ресемплинг → Kaldi fbank.

use std::path::Path;

use asr_core::{AsrResult, FbankConfig};
use audio::FbankExtractor;
use candle_core::Device;
use tracing::{debug, info};

use crate::collate::AsrExample;
use crate::manifest::{ManifestEntry, read_manifest};
use crate::tokenizer::CharTokenizer;

pub struct JsonlAsrDataset {
    entries: Vec<ManifestEntry>,
    tokenizer: CharTokenizer,
    extractor: FbankExtractor,
}

impl JsonlAsrDataset {
    /// Датасет по файлу манифеста.
    pub fn new(
        manifest: impl AsRef<Path>,
        tokenizer: CharTokenizer,
        fbank: FbankConfig,
    ) -> AsrResult<Self> {
        let manifest = manifest.as_ref();
        let entries = read_manifest(manifest)?;
        info!("Датасет {}: {} записей", manifest.display(), entries.len());
        Self::from_entries(entries, tokenizer, fbank)
    }

    /// Датасет по уже прочитанным записям.
    pub fn from_entries(
        entries: Vec<ManifestEntry>,
        tokenizer: CharTokenizer,
        fbank: FbankConfig,
    ) -> AsrResult<Self> {
        Ok(Self {
            entries,
            tokenizer,
            extractor: FbankExtractor::new(fbank)?,
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[ManifestEntry] {
        &self.entries
    }

    pub fn tokenizer(&self) -> &CharTokenizer {
        &self.tokenizer
    }

    pub fn fbank_config(&self) -> &FbankConfig {
        self.extractor.config()
    }

    /// Длины в кадрах по длительностям манифеста, без чтения аудио.
    ///
    /// Считаются той же формулой кадрирования, что и в экстракторе, поэтому
    /// совпадают с `features.dim(0)` из [`Self::get`].
    pub fn frame_lengths(&self) -> Vec<usize> {
        let config = self.extractor.config();
        self.entries
            .iter()
            .map(|e| {
                let samples = (e.duration * config.sample_rate as f64).round().max(0.0) as usize;
                config.num_frames(samples)
            })
            .collect()
    }

    /// Загрузить пример `idx`: признаки (time, num_bins) на CPU и метки.
    pub fn get(&self, idx: usize) -> AsrResult<AsrExample> {
        let entry = self.entries.get(idx).ok_or_else(|| {
            asr_core::AsrError::Data(format!("индекс {idx} вне датасета из {} записей", self.len()))
        })?;

        let audio = audio::load_mono(&entry.path, self.extractor.config().sample_rate)?;
        let features = self.extractor.extract(&audio.samples, &Device::Cpu)?;
        let labels = self.tokenizer.encode(&entry.txt);

        debug!(
            "{}: {} кадров, {} меток",
            entry.key,
            features.num_frames,
            labels.len()
        );

        Ok(AsrExample {
            features: features.tensor,
            labels,
        })
    }
}
