//! Загрузчик: сэмплер + датасет + collate.

use asr_core::{AsrError, AsrResult};
use candle_core::Device;

use crate::collate::{AsrBatch, collate};
use crate::dataset::JsonlAsrDataset;
use crate::sampler::{DynamicBatchSampler, SamplerConfig};

pub struct AsrDataLoader {
    dataset: JsonlAsrDataset,
    sampler: DynamicBatchSampler,
}

impl AsrDataLoader {
    /// Сэмплер строится по [`JsonlAsrDataset::frame_lengths`].
    pub fn new(dataset: JsonlAsrDataset, sampler: &SamplerConfig) -> AsrResult<Self> {
        let sampler = DynamicBatchSampler::new(dataset.frame_lengths(), sampler)?;
        Ok(Self { dataset, sampler })
    }

    /// Собрать из готовых частей; число длин сэмплера должно совпадать с датасетом.
    pub fn from_parts(dataset: JsonlAsrDataset, sampler: DynamicBatchSampler) -> AsrResult<Self> {
        if sampler.len_examples() != dataset.len() {
            return Err(AsrError::Config(format!(
                "сэмплер на {} примеров, датасет на {}",
                sampler.len_examples(),
                dataset.len()
            )));
        }
        Ok(Self { dataset, sampler })
    }

    pub fn dataset(&self) -> &JsonlAsrDataset {
        &self.dataset
    }

    pub fn sampler(&self) -> &DynamicBatchSampler {
        &self.sampler
    }

    pub fn set_epoch(&mut self, epoch: u64) {
        self.sampler.set_epoch(epoch);
    }

    pub fn num_batches(&self) -> AsrResult<usize> {
        self.sampler.num_batches()
    }

    /// Батчи текущей эпохи. Аудио читается лениво, по мере итерации.
    pub fn iter<'a>(
        &'a self,
        device: &'a Device,
    ) -> AsrResult<impl Iterator<Item = AsrResult<AsrBatch>> + 'a> {
        let batches = self.sampler.iter()?;
        Ok(batches.map(move |indices| {
            let examples = indices
                .iter()
                .map(|&i| self.dataset.get(i))
                .collect::<AsrResult<Vec<_>>>()?;
            collate(&examples, device)
        }))
    }
}
