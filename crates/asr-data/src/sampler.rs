//! Динамический батч-сэмплер.
//!
//! Порядок эпохи: перестановка (StdRng с сидом `base_seed + epoch` или
//! тождественная) → бакеты по `bucket_size` → стабильная сортировка по длине
//! внутри бакета → конкатенация. Порядок кэшируется до `set_epoch`.
//!
//! Группировка — один проход по порядку эпохи, который выдаёт непрерывные
//! диапазоны индексов. Итерация нарезает по ним срезы, `num_batches` их
//! считает, поэтому количество батчей всегда совпадает с итерацией.
//!
//! Пример длиннее бюджета кадров обрабатывается по `allow_oversize_single`:
//! отдельный батч из одного примера или ошибка [`AsrError::Data`]. Это
//! политика конфигурации, а не ошибка данных сама по себе.

use std::cell::OnceCell;
use std::ops::Range;
use std::sync::OnceLock;

use asr_core::{AsrError, AsrResult};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{RngCore, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Параметры сэмплера (как они лежат в YAML).
///
/// Должно быть задано ровно одно из `batch_size` / `max_frame_per_batch`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplerConfig {
    /// Фиксированное число примеров в батче.
    pub batch_size: Option<usize>,

    /// Бюджет суммарной длины (в кадрах) на батч.
    pub max_frame_per_batch: Option<usize>,

    /// Перемешивать порядок каждую эпоху.
    pub shuffle: bool,

    /// Размер окна локальной сортировки по длине.
    pub bucket_size: usize,

    /// Явный базовый сид.
    pub seed: Option<u64>,

    /// Отбрасывать неполный последний батч.
    pub drop_last: bool,

    /// Пример длиннее бюджета идёт отдельным батчем (иначе — ошибка).
    pub allow_oversize_single: bool,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            batch_size: None,
            max_frame_per_batch: None,
            shuffle: true,
            bucket_size: 100,
            seed: None,
            drop_last: false,
            allow_oversize_single: true,
        }
    }
}

impl SamplerConfig {
    /// Батчи фиксированного размера.
    pub fn fixed(batch_size: usize) -> Self {
        Self {
            batch_size: Some(batch_size),
            ..Self::default()
        }
    }

    /// Батчи по бюджету кадров.
    pub fn max_frames(max_frame_per_batch: usize) -> Self {
        Self {
            max_frame_per_batch: Some(max_frame_per_batch),
            ..Self::default()
        }
    }

    pub fn with_shuffle(mut self, shuffle: bool) -> Self {
        self.shuffle = shuffle;
        self
    }

    pub fn with_bucket_size(mut self, bucket_size: usize) -> Self {
        self.bucket_size = bucket_size;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_drop_last(mut self, drop_last: bool) -> Self {
        self.drop_last = drop_last;
        self
    }

    pub fn with_allow_oversize_single(mut self, allow: bool) -> Self {
        self.allow_oversize_single = allow;
        self
    }

    /// Проверить параметры и получить режим группировки.
    pub fn limit(&self) -> AsrResult<BatchLimit> {
        if self.bucket_size == 0 {
            return Err(AsrError::Config("bucket_size must be > 0".to_string()));
        }
        match (self.batch_size, self.max_frame_per_batch) {
            (Some(0), None) => Err(AsrError::Config("batch_size must be > 0".to_string())),
            (Some(n), None) => Ok(BatchLimit::Fixed(n)),
            (None, Some(budget)) => Ok(BatchLimit::MaxFrames(budget)),
            (Some(_), Some(_)) => Err(AsrError::Config(
                "batch_size and max_frame_per_batch are mutually exclusive".to_string(),
            )),
            (None, None) => Err(AsrError::Config(
                "either batch_size or max_frame_per_batch must be set".to_string(),
            )),
        }
    }
}

/// Режим группировки.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchLimit {
    /// Ровно N примеров в батче (последний может быть короче).
    Fixed(usize),
    /// Сумма длин в батче не больше бюджета.
    MaxFrames(usize),
}

/// Порядок индексов, посчитанный для конкретной эпохи.
#[derive(Debug)]
struct EpochOrder {
    epoch: u64,
    indices: Vec<usize>,
}

/// Сид процесса по умолчанию: выбирается один раз и общий для всех сэмплеров.
fn process_default_seed() -> u64 {
    static SEED: OnceLock<u64> = OnceLock::new();
    *SEED.get_or_init(rand::random)
}

/// Сэмплер батчей по длинам примеров.
///
/// Кэш порядка эпохи живёт в `OnceCell`, поэтому тип не `Sync`: при общем
/// доступе из нескольких потоков нужна внешняя синхронизация.
#[derive(Debug)]
pub struct DynamicBatchSampler {
    lengths: Vec<usize>,
    limit: BatchLimit,
    shuffle: bool,
    bucket_size: usize,
    drop_last: bool,
    allow_oversize_single: bool,
    base_seed: u64,
    epoch: u64,
    cache: OnceCell<EpochOrder>,
}

impl DynamicBatchSampler {
    /// Создать сэмплер. Сид: `config.seed`, иначе сид процесса по умолчанию.
    pub fn new(lengths: Vec<usize>, config: &SamplerConfig) -> AsrResult<Self> {
        let seed = config.seed.unwrap_or_else(process_default_seed);
        Self::build(lengths, config, seed)
    }

    /// Создать сэмплер, взяв базовый сид из переданного генератора,
    /// если в конфиге нет явного сида.
    ///
    /// Сид берётся одним вызовом `next_u64`, так что генератор вызывающего
    /// продвигается на один шаг: два сэмплера подряд из одного генератора
    /// получат разные сиды. Для повторяемого сида без побочных эффектов
    /// задайте `SamplerConfig::seed`.
    pub fn with_rng<R: RngCore + ?Sized>(
        lengths: Vec<usize>,
        config: &SamplerConfig,
        rng: &mut R,
    ) -> AsrResult<Self> {
        let seed = match config.seed {
            Some(seed) => seed,
            None => rng.next_u64(),
        };
        Self::build(lengths, config, seed)
    }

    fn build(lengths: Vec<usize>, config: &SamplerConfig, base_seed: u64) -> AsrResult<Self> {
        let limit = config.limit()?;
        debug!(
            "DynamicBatchSampler: {} примеров, {:?}, bucket_size={}, shuffle={}",
            lengths.len(),
            limit,
            config.bucket_size,
            config.shuffle
        );
        Ok(Self {
            lengths,
            limit,
            shuffle: config.shuffle,
            bucket_size: config.bucket_size,
            drop_last: config.drop_last,
            allow_oversize_single: config.allow_oversize_single,
            base_seed,
            epoch: 0,
            cache: OnceCell::new(),
        })
    }

    pub fn len_examples(&self) -> usize {
        self.lengths.len()
    }

    pub fn lengths(&self) -> &[usize] {
        &self.lengths
    }

    pub fn limit(&self) -> BatchLimit {
        self.limit
    }

    pub fn base_seed(&self) -> u64 {
        self.base_seed
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Перейти к эпохе `epoch` и сбросить кэш порядка.
    pub fn set_epoch(&mut self, epoch: u64) {
        self.epoch = epoch;
        self.cache = OnceCell::new();
    }

    /// Порядок индексов текущей эпохи (считается один раз на эпоху).
    pub fn ordered_indices(&self) -> &[usize] {
        let order = self.cache.get_or_init(|| EpochOrder {
            epoch: self.epoch,
            indices: self.compute_order(),
        });
        debug_assert_eq!(order.epoch, self.epoch);
        &order.indices
    }

    fn permutation(&self) -> Vec<usize> {
        let mut indices: Vec<usize> = (0..self.lengths.len()).collect();
        if self.shuffle {
            let mut rng = StdRng::seed_from_u64(self.base_seed.wrapping_add(self.epoch));
            indices.shuffle(&mut rng);
        }
        indices
    }

    fn compute_order(&self) -> Vec<usize> {
        let mut indices = self.permutation();
        for bucket in indices.chunks_mut(self.bucket_size) {
            bucket.sort_by_key(|&i| self.lengths[i]);
        }
        debug!(
            "DynamicBatchSampler: порядок эпохи {} ({} бакетов)",
            self.epoch,
            self.lengths.len().div_ceil(self.bucket_size)
        );
        indices
    }

    /// Единый проход группировки: отдаёт диапазоны в [`Self::ordered_indices`].
    fn walk(&self, mut emit: impl FnMut(Range<usize>)) -> AsrResult<()> {
        let order = self.ordered_indices();
        let n = order.len();

        match self.limit {
            BatchLimit::Fixed(size) => {
                let full = n / size * size;
                for start in (0..full).step_by(size) {
                    emit(start..start + size);
                }
                if full < n && !self.drop_last {
                    emit(full..n);
                }
            }
            BatchLimit::MaxFrames(budget) => {
                let mut start = 0;
                let mut total = 0usize;
                for (pos, &idx) in order.iter().enumerate() {
                    let length = self.lengths[idx];
                    if length > budget {
                        if pos > start {
                            emit(start..pos);
                        }
                        if !self.allow_oversize_single {
                            return Err(AsrError::Data(format!(
                                "example {idx} has length {length}, exceeding max_frame_per_batch {budget} \
                                 (allow_oversize_single = false)"
                            )));
                        }
                        emit(pos..pos + 1);
                        start = pos + 1;
                        total = 0;
                        continue;
                    }
                    if total + length <= budget {
                        total += length;
                    } else {
                        if pos > start {
                            emit(start..pos);
                        }
                        start = pos;
                        total = length;
                    }
                }
                if start < n && !self.drop_last {
                    emit(start..n);
                }
            }
        }
        Ok(())
    }

    /// Количество батчей в текущей эпохе.
    pub fn num_batches(&self) -> AsrResult<usize> {
        let mut count = 0;
        self.walk(|_| count += 1)?;
        Ok(count)
    }

    /// Батчи текущей эпохи.
    ///
    /// Группировка считается целиком до первого батча: при ошибке
    /// (пример длиннее бюджета) не отдаётся ни одного батча.
    pub fn iter(&self) -> AsrResult<Batches<'_>> {
        let mut ranges = Vec::new();
        self.walk(|range| ranges.push(range))?;
        Ok(Batches {
            order: self.ordered_indices(),
            ranges: ranges.into_iter(),
        })
    }

    /// Батчи текущей эпохи как владеющие векторы.
    pub fn batches(&self) -> AsrResult<Vec<Vec<usize>>> {
        Ok(self.iter()?.map(<[usize]>::to_vec).collect())
    }

    /// Сводка по текущей эпохе: кадры, паддинг, размеры батчей.
    pub fn plan_stats(&self) -> AsrResult<PlanStats> {
        let mut stats = PlanStats::default();
        for batch in self.iter()? {
            let max = batch.iter().map(|&i| self.lengths[i]).max().unwrap_or(0);
            let frames: usize = batch.iter().map(|&i| self.lengths[i]).sum();
            stats.num_batches += 1;
            stats.num_examples += batch.len();
            stats.total_frames += frames;
            stats.padded_frames += max * batch.len();
            stats.max_batch_frames = stats.max_batch_frames.max(frames);
            stats.max_batch_size = stats.max_batch_size.max(batch.len());
        }
        Ok(stats)
    }
}

/// Итератор батчей эпохи: срезы порядка эпохи.
pub struct Batches<'a> {
    order: &'a [usize],
    ranges: std::vec::IntoIter<Range<usize>>,
}

impl<'a> Iterator for Batches<'a> {
    type Item = &'a [usize];

    fn next(&mut self) -> Option<Self::Item> {
        let order = self.order;
        self.ranges.next().map(move |r| &order[r])
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.ranges.size_hint()
    }
}

impl ExactSizeIterator for Batches<'_> {}

/// Сводка по группировке эпохи.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlanStats {
    pub num_batches: usize,
    pub num_examples: usize,
    /// Сумма длин всех примеров.
    pub total_frames: usize,
    /// Сумма `max_len * batch_len` по батчам (после паддинга).
    pub padded_frames: usize,
    pub max_batch_frames: usize,
    pub max_batch_size: usize,
}

impl PlanStats {
    /// Доля полезных кадров после паддинга (1.0 — паддинга нет).
    pub fn padding_efficiency(&self) -> f64 {
        if self.padded_frames == 0 {
            return 1.0;
        }
        self.total_frames as f64 / self.padded_frames as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIXED_LENGTHS: [usize; 9] = [5, 1, 9, 3, 7, 2, 8, 4, 6];
    const BUDGET_LENGTHS: [usize; 6] = [3, 4, 3, 9, 2, 2];

    fn sampler(lengths: &[usize], config: SamplerConfig) -> DynamicBatchSampler {
        DynamicBatchSampler::new(lengths.to_vec(), &config).unwrap()
    }

    #[test]
    fn test_config_requires_exactly_one_limit() {
        let both = SamplerConfig {
            batch_size: Some(4),
            max_frame_per_batch: Some(10),
            ..SamplerConfig::default()
        };
        assert!(matches!(
            DynamicBatchSampler::new(vec![1, 2], &both),
            Err(AsrError::Config(_))
        ));
        assert!(matches!(
            DynamicBatchSampler::new(vec![1, 2], &SamplerConfig::default()),
            Err(AsrError::Config(_))
        ));
    }

    #[test]
    fn test_config_rejects_zero_sizes() {
        let cfg = SamplerConfig::fixed(4).with_bucket_size(0);
        assert!(matches!(cfg.limit(), Err(AsrError::Config(_))));
        assert!(matches!(SamplerConfig::fixed(0).limit(), Err(AsrError::Config(_))));
    }

    #[test]
    fn test_fixed_size_groups() {
        let s = sampler(&FIXED_LENGTHS, SamplerConfig::fixed(4).with_shuffle(false));
        let batches = s.batches().unwrap();
        assert_eq!(batches, vec![vec![1, 5, 3, 7], vec![0, 8, 4, 6], vec![2]]);
        assert_eq!(s.num_batches().unwrap(), 3);
    }

    #[test]
    fn test_fixed_size_drop_last() {
        let cfg = SamplerConfig::fixed(4).with_shuffle(false).with_drop_last(true);
        let s = sampler(&FIXED_LENGTHS, cfg);
        assert_eq!(s.batches().unwrap().len(), 2);
        assert_eq!(s.num_batches().unwrap(), FIXED_LENGTHS.len() / 4);
    }

    #[test]
    fn test_frame_budget_identity_order() {
        let cfg = SamplerConfig::max_frames(10).with_shuffle(false).with_bucket_size(1);
        let s = sampler(&BUDGET_LENGTHS, cfg);
        assert_eq!(s.batches().unwrap(), vec![vec![0, 1, 2], vec![3], vec![4, 5]]);
        assert_eq!(s.num_batches().unwrap(), 3);
    }

    #[test]
    fn test_frame_budget_sorted_bucket() {
        let cfg = SamplerConfig::max_frames(10).with_shuffle(false).with_bucket_size(6);
        let s = sampler(&BUDGET_LENGTHS, cfg);
        assert_eq!(s.ordered_indices(), &[4, 5, 0, 2, 1, 3]);
        assert_eq!(s.batches().unwrap(), vec![vec![4, 5, 0, 2], vec![1], vec![3]]);
    }

    #[test]
    fn test_oversized_singleton_flushes_pending() {
        let cfg = SamplerConfig::max_frames(10).with_shuffle(false).with_bucket_size(1);
        let s = sampler(&[2, 3, 15, 1], cfg);
        assert_eq!(s.batches().unwrap(), vec![vec![0, 1], vec![2], vec![3]]);
    }

    #[test]
    fn test_oversized_error_names_length_and_budget() {
        let cfg = SamplerConfig::max_frames(10)
            .with_shuffle(false)
            .with_bucket_size(1)
            .with_allow_oversize_single(false);
        let s = sampler(&[2, 3, 15, 1], cfg);

        let err = s.iter().err().unwrap();
        let msg = err.to_string();
        assert!(matches!(err, AsrError::Data(_)));
        assert!(msg.contains("15"), "{msg}");
        assert!(msg.contains("10"), "{msg}");
        assert!(s.num_batches().is_err());
    }

    #[test]
    fn test_drop_last_in_budget_mode() {
        let cfg = SamplerConfig::max_frames(10)
            .with_shuffle(false)
            .with_bucket_size(1)
            .with_drop_last(true);
        let s = sampler(&BUDGET_LENGTHS, cfg);
        assert_eq!(s.batches().unwrap(), vec![vec![0, 1, 2], vec![3]]);
        assert_eq!(s.num_batches().unwrap(), 2);
    }

    #[test]
    fn test_cache_reused_within_epoch() {
        let s = sampler(&FIXED_LENGTHS, SamplerConfig::fixed(2).with_seed(7));
        let first = s.ordered_indices().as_ptr();
        let _ = s.batches().unwrap();
        assert_eq!(s.ordered_indices().as_ptr(), first);
    }

    #[test]
    fn test_set_epoch_invalidates_cache() {
        let lengths: Vec<usize> = (0..64).map(|i| (i * 37) % 101).collect();
        let mut s = sampler(&lengths, SamplerConfig::fixed(8).with_seed(3).with_bucket_size(1));
        let e0 = s.batches().unwrap();
        assert_eq!(s.batches().unwrap(), e0);

        s.set_epoch(1);
        assert_eq!(s.epoch(), 1);
        let e1 = s.batches().unwrap();
        assert_ne!(e0, e1);

        s.set_epoch(0);
        assert_eq!(s.batches().unwrap(), e0);
    }

    #[test]
    fn test_epoch_does_not_matter_without_shuffle() {
        let mut s = sampler(&FIXED_LENGTHS, SamplerConfig::fixed(3).with_shuffle(false));
        let e0 = s.batches().unwrap();
        s.set_epoch(5);
        assert_eq!(s.batches().unwrap(), e0);
    }

    #[test]
    fn test_bucket_size_one_is_pure_permutation() {
        let lengths: Vec<usize> = (0..40).rev().collect();
        let s = sampler(&lengths, SamplerConfig::fixed(4).with_seed(11).with_bucket_size(1));
        assert_eq!(s.ordered_indices(), s.permutation().as_slice());

        let identity = sampler(&lengths, SamplerConfig::fixed(4).with_shuffle(false).with_bucket_size(1));
        let expected: Vec<usize> = (0..40).collect();
        assert_eq!(identity.ordered_indices(), expected.as_slice());
    }

    #[test]
    fn test_seed_sources() {
        let lengths: Vec<usize> = (0..30).collect();
        let cfg = SamplerConfig::fixed(5);

        let a = DynamicBatchSampler::new(lengths.clone(), &cfg.clone().with_seed(42)).unwrap();
        let b = DynamicBatchSampler::new(lengths.clone(), &cfg.clone().with_seed(42)).unwrap();
        assert_eq!(a.batches().unwrap(), b.batches().unwrap());

        // Явный сид важнее генератора.
        let mut rng = StdRng::seed_from_u64(1);
        let c = DynamicBatchSampler::with_rng(lengths.clone(), &cfg.clone().with_seed(42), &mut rng).unwrap();
        assert_eq!(c.base_seed(), 42);

        let mut r1 = StdRng::seed_from_u64(9);
        let mut r2 = StdRng::seed_from_u64(9);
        let d = DynamicBatchSampler::with_rng(lengths.clone(), &cfg, &mut r1).unwrap();
        let e = DynamicBatchSampler::with_rng(lengths.clone(), &cfg, &mut r2).unwrap();
        assert_eq!(d.base_seed(), e.base_seed());

        // Сид процесса общий для всех сэмплеров без явного сида.
        let f = DynamicBatchSampler::new(lengths.clone(), &cfg).unwrap();
        let g = DynamicBatchSampler::new(lengths, &cfg).unwrap();
        assert_eq!(f.base_seed(), g.base_seed());
    }

    #[test]
    fn test_with_rng_advances_caller_generator() {
        let lengths: Vec<usize> = (0..10).collect();
        let cfg = SamplerConfig::fixed(2);

        let mut rng = StdRng::seed_from_u64(3);
        let first = DynamicBatchSampler::with_rng(lengths.clone(), &cfg, &mut rng).unwrap();
        let second = DynamicBatchSampler::with_rng(lengths.clone(), &cfg, &mut rng).unwrap();
        assert_ne!(first.base_seed(), second.base_seed());

        let mut expected = StdRng::seed_from_u64(3);
        assert_eq!(first.base_seed(), expected.next_u64());
        assert_eq!(second.base_seed(), expected.next_u64());

        // С явным сидом генератор не трогается.
        let mut untouched = StdRng::seed_from_u64(3);
        DynamicBatchSampler::with_rng(lengths, &cfg.clone().with_seed(1), &mut untouched).unwrap();
        assert_eq!(untouched.next_u64(), StdRng::seed_from_u64(3).next_u64());
    }

    #[test]
    fn test_plan_stats() {
        let cfg = SamplerConfig::max_frames(10).with_shuffle(false).with_bucket_size(6);
        let s = sampler(&BUDGET_LENGTHS, cfg);
        let stats = s.plan_stats().unwrap();
        assert_eq!(stats.num_batches, 3);
        assert_eq!(stats.num_examples, 6);
        assert_eq!(stats.total_frames, 23);
        // [2,2,3,3] -> 12, [4] -> 4, [9] -> 9
        assert_eq!(stats.padded_frames, 25);
        assert_eq!(stats.max_batch_frames, 10);
        assert!((stats.padding_efficiency() - 23.0 / 25.0).abs() < 1e-12);
    }

    #[test]
    fn test_empty_lengths() {
        let s = sampler(&[], SamplerConfig::max_frames(10));
        assert_eq!(s.num_batches().unwrap(), 0);
        assert!(s.batches().unwrap().is_empty());
    }
}
