//! Integration tests: WAV on disk -> mono 16 kHz -> filterbank features.

use std::path::Path;

use asr_core::FbankConfig;
use audio::{FbankExtractor, load_mono, wav_duration};
use candle_core::Device;

fn write_tone(path: &Path, freq: f32, seconds: f32, sample_rate: u32) {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).unwrap();
    let n = (seconds * sample_rate as f32) as usize;
    for i in 0..n {
        let t = i as f32 / sample_rate as f32;
        let v = (0.3 * (2.0 * std::f32::consts::PI * freq * t).sin() * i16::MAX as f32) as i16;
        writer.write_sample(v).unwrap();
    }
    writer.finalize().unwrap();
}

#[test]
fn test_frame_count_from_header_matches_features() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tone.wav");
    write_tone(&path, 440.0, 1.25, 16000);

    let config = FbankConfig::with_mel_bins(80);
    let duration = wav_duration(&path).unwrap();
    let predicted = config.num_frames((duration * config.sample_rate as f64).round() as usize);

    let audio = load_mono(&path, config.sample_rate).unwrap();
    let extractor = FbankExtractor::new(config).unwrap();
    let features = extractor.extract(&audio.samples, &Device::Cpu).unwrap();

    assert_eq!(features.num_frames, predicted);
    assert_eq!(features.tensor.dims(), &[predicted, 80]);
}

#[test]
fn test_resampled_input_has_finite_features() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tone_8k.wav");
    write_tone(&path, 300.0, 0.5, 8000);

    let audio = load_mono(&path, 16000).unwrap();
    assert_eq!(audio.sample_rate, 16000);
    assert_eq!(audio.samples.len(), 8000);

    let extractor = FbankExtractor::new(FbankConfig::default()).unwrap();
    let features = extractor.extract(&audio.samples, &Device::Cpu).unwrap();
    let values: Vec<f32> = features.tensor.flatten_all().unwrap().to_vec1().unwrap();

    if values.is_empty() {
        eprintln!("Пропуск: слишком короткий сигнал");
        return;
    }
    assert!(values.iter().all(|v| v.is_finite()));
}
