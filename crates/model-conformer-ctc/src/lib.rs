//! Conformer-CTC — чистая Rust-реализация на Candle.
//!
//! Conv2d-субдискретизация с точным пересчётом длин, Conformer-энкодер
//! с маской паддинга и CTC-голова для посимвольного распознавания речи.

pub mod config;
pub mod conformer;
pub mod ctc;
pub mod length;
pub mod model;
pub mod subsampling;

pub use config::{ConformerCtcConfig, SubsamplingConfig};
pub use conformer::ConformerEncoder;
pub use ctc::{CtcGreedyDecoder, CtcHead};
pub use length::{AxisGeometry, AxisPair, ConvGeometry, conv_output_length, conv_output_lengths, conv_output_lengths_vec};
pub use model::{ConformerCtc, num_parameters};
pub use subsampling::{Conv2dSubsampling, conv2d_im2col};
