//! # audio
//!
//! Audio front-end for RustASR.
//!
//! This crate handles:
//! - WAV file loading and header-only duration probing
//! - Audio resampling to target sample rate (16kHz)
//! - Kaldi-compatible log-mel filterbank extraction

pub mod fbank;
pub mod loader;
pub mod resample;

pub use fbank::FbankExtractor;
pub use loader::{load_mono, load_wav, to_mono, wav_duration};
pub use resample::Resampler;
