//! # asr-data
//!
//! Данные для обучения CTC-моделей:
//!
//! - JSONL-манифесты и построение манифеста по директории с аудио
//! - Посимвольный токенизатор
//! - Динамический батч-сэмплер (бакеты по длине, сид эпохи, бюджет кадров)
//! - Датасет, collate и загрузчик батчей

pub mod collate;
pub mod dataset;
pub mod loader;
pub mod manifest;
pub mod sampler;
pub mod tokenizer;

pub use collate::{AsrBatch, AsrExample, collate};
pub use dataset::JsonlAsrDataset;
pub use loader::AsrDataLoader;
pub use manifest::{
    DurationStats, ManifestEntry, build_manifest, find_wav_files, load_transcripts, read_manifest,
    write_manifest,
};
pub use sampler::{BatchLimit, Batches, DynamicBatchSampler, PlanStats, SamplerConfig};
pub use tokenizer::CharTokenizer;
