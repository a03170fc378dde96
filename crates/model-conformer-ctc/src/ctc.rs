//! CTC-голова и greedy-декодирование.
//!
//! CtcHead: Linear(encoder_dim → vocab_size) по каждому фрейму.
//! CTC Greedy: argmax → схлопывание повторов → удаление blank.

use candle_core::{D, DType, Module, Result, Tensor};
use candle_nn::{Linear, VarBuilder};

/// CTC-голова: проекция на словарь.
pub struct CtcHead {
    linear: Linear,
    vocab_size: usize,
}

impl CtcHead {
    pub fn load(encoder_dim: usize, vocab_size: usize, vb: VarBuilder) -> Result<Self> {
        let linear = candle_nn::linear(encoder_dim, vocab_size, vb)?;
        Ok(Self { linear, vocab_size })
    }

    /// Логиты: (batch, seq, encoder_dim) → (batch, seq, vocab_size).
    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        self.linear.forward(x)
    }

    /// log_softmax поверх логитов (то, что ждёт CTC loss).
    pub fn log_probs(&self, x: &Tensor) -> Result<Tensor> {
        candle_nn::ops::log_softmax(&self.forward(x)?, D::Minus1)
    }

    pub fn vocab_size(&self) -> usize {
        self.vocab_size
    }

    /// ID blank-токена (последний класс).
    pub fn blank_id(&self) -> u32 {
        (self.vocab_size - 1) as u32
    }
}

/// CTC greedy-декодер по длинам батча.
#[derive(Debug, Clone, Copy)]
pub struct CtcGreedyDecoder {
    blank_id: u32,
}

impl CtcGreedyDecoder {
    pub fn new(blank_id: u32) -> Self {
        Self { blank_id }
    }

    pub fn blank_id(&self) -> u32 {
        self.blank_id
    }

    /// Декодировать батч.
    ///
    /// * `scores` — (batch, seq, vocab): логиты или log-вероятности
    /// * `lengths` — (batch,) валидные длины; фреймы за длиной игнорируются
    pub fn decode(&self, scores: &Tensor, lengths: &Tensor) -> Result<Vec<Vec<u32>>> {
        let (_, seq, _) = scores.dims3()?;
        let best: Vec<Vec<u32>> = scores.argmax(D::Minus1)?.to_vec2()?;
        let lengths = lengths.to_dtype(DType::I64)?.to_vec1::<i64>()?;

        Ok(best
            .iter()
            .zip(lengths.iter())
            .map(|(ids, &len)| {
                let len = (len.max(0) as usize).min(seq);
                self.collapse(&ids[..len])
            })
            .collect())
    }

    /// Убрать последовательные дубликаты, затем blank.
    pub fn collapse(&self, ids: &[u32]) -> Vec<u32> {
        let mut out = Vec::new();
        let mut prev = None;
        for &id in ids {
            if Some(id) != prev && id != self.blank_id {
                out.push(id);
            }
            prev = Some(id);
        }
        out
    }
}
