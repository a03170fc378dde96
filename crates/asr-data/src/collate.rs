//! Сборка батча: паддинг признаков и склейка целевых последовательностей.

use asr_core::{AsrError, AsrResult};
use candle_core::{DType, Device, Tensor};

/// Один пример датасета.
#[derive(Debug, Clone)]
pub struct AsrExample {
    /// Признаки (time, num_bins), f32.
    pub features: Tensor,
    /// ID символов транскрипта.
    pub labels: Vec<u32>,
}

/// Батч для модели и CTC loss.
#[derive(Debug, Clone)]
pub struct AsrBatch {
    /// (batch, max_time, num_bins), нули после длины каждого примера.
    pub features: Tensor,
    /// (batch,) I64 — валидные длины признаков.
    pub feature_lengths: Tensor,
    /// (sum(target_lengths),) I64 — все метки подряд.
    pub targets: Tensor,
    /// (batch,) I64 — длины меток.
    pub target_lengths: Tensor,
}

impl AsrBatch {
    pub fn batch_size(&self) -> usize {
        self.feature_lengths.dims1().unwrap_or(0)
    }
}

/// Собрать батч из примеров.
///
/// Ошибка [`AsrError::Data`] для пустого батча и при разной ширине признаков.
pub fn collate(examples: &[AsrExample], device: &Device) -> AsrResult<AsrBatch> {
    let Some(first) = examples.first() else {
        return Err(AsrError::Data("collate: пустой батч".to_string()));
    };
    let (_, num_bins) = first.features.dims2()?;

    let mut frames = Vec::with_capacity(examples.len());
    for (i, ex) in examples.iter().enumerate() {
        let (t, f) = ex.features.dims2()?;
        if f != num_bins {
            return Err(AsrError::Data(format!(
                "collate: пример {i} имеет {f} бинов, ожидалось {num_bins}"
            )));
        }
        frames.push(t);
    }
    let max_time = frames.iter().copied().max().unwrap_or(0);

    let mut data = vec![0f32; examples.len() * max_time * num_bins];
    for (i, ex) in examples.iter().enumerate() {
        let values: Vec<f32> = ex.features.to_dtype(DType::F32)?.flatten_all()?.to_vec1()?;
        let offset = i * max_time * num_bins;
        data[offset..offset + values.len()].copy_from_slice(&values);
    }

    let batch = examples.len();
    let features = Tensor::from_vec(data, (batch, max_time, num_bins), device)?;
    let feature_lengths: Vec<i64> = frames.iter().map(|&t| t as i64).collect();
    let target_lengths: Vec<i64> = examples.iter().map(|ex| ex.labels.len() as i64).collect();
    let targets: Vec<i64> = examples
        .iter()
        .flat_map(|ex| ex.labels.iter().map(|&id| id as i64))
        .collect();
    let num_targets = targets.len();

    Ok(AsrBatch {
        features,
        feature_lengths: Tensor::from_vec(feature_lengths, batch, device)?,
        targets: Tensor::from_vec(targets, num_targets, device)?,
        target_lengths: Tensor::from_vec(target_lengths, batch, device)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn example(time: usize, bins: usize, value: f32, labels: &[u32]) -> AsrExample {
        AsrExample {
            features: Tensor::from_vec(vec![value; time * bins], (time, bins), &Device::Cpu).unwrap(),
            labels: labels.to_vec(),
        }
    }

    #[test]
    fn test_pads_with_zeros() {
        let batch = collate(
            &[example(2, 3, 1.0, &[4, 5]), example(4, 3, 2.0, &[1]), example(0, 3, 9.0, &[])],
            &Device::Cpu,
        )
        .unwrap();

        assert_eq!(batch.batch_size(), 3);
        assert_eq!(batch.features.dims(), &[3, 4, 3]);
        assert_eq!(batch.feature_lengths.to_vec1::<i64>().unwrap(), vec![2, 4, 0]);
        assert_eq!(batch.targets.to_vec1::<i64>().unwrap(), vec![4, 5, 1]);
        assert_eq!(batch.target_lengths.to_vec1::<i64>().unwrap(), vec![2, 1, 0]);

        let first: Vec<Vec<f32>> = batch.features.get(0).unwrap().to_vec2().unwrap();
        assert_eq!(first[1], vec![1.0; 3]);
        assert_eq!(first[2], vec![0.0; 3]);
        let last: Vec<Vec<f32>> = batch.features.get(2).unwrap().to_vec2().unwrap();
        assert!(last.iter().flatten().all(|&v| v == 0.0));
    }

    #[test]
    fn test_empty_batch_is_error() {
        assert!(matches!(collate(&[], &Device::Cpu), Err(AsrError::Data(_))));
    }

    #[test]
    fn test_mismatched_width_is_error() {
        let err = collate(&[example(2, 3, 1.0, &[1]), example(2, 4, 1.0, &[1])], &Device::Cpu);
        assert!(matches!(err, Err(AsrError::Data(_))));
    }
}
