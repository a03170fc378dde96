//!
//! CLI для подготовки данных и проверки CTC Conformer.

mod config;
mod frontend;

use anyhow::{Result, ensure};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Instant;

use asr_data::{
    AsrDataLoader, CharTokenizer, DurationStats, DynamicBatchSampler, JsonlAsrDataset,
    build_manifest, load_transcripts, read_manifest, write_manifest,
};
use audio::{FbankExtractor, load_mono};
use candle_core::{Device, Tensor};
use model_conformer_ctc::{ConformerCtc, num_parameters};

use crate::config::ExperimentConfig;
use crate::frontend::Frontend;

#[derive(Parser)]
#[command(name = "rustasr")]
#[command(author, version, about = "RustASR: CTC Conformer data & model tools", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Построить JSONL-манифест по директории с WAV и файлу транскриптов
    Manifest {
        /// Директория с аудио (ищется рекурсивно)
        #[arg(long)]
        audio_dir: PathBuf,

        /// Транскрипты: `<key> <token> <token> ...` на строку
        #[arg(long)]
        transcripts: PathBuf,

        /// Куда записать манифест
        #[arg(long)]
        output: PathBuf,
    },

    /// Собрать посимвольный словарь по манифестам
    Vocab {
        /// Манифесты (можно несколько раз)
        #[arg(long, required = true)]
        manifest: Vec<PathBuf>,

        /// Дополнительные символы словаря
        #[arg(long, default_value = "")]
        chars: String,

        /// Куда записать `tokens.json`
        #[arg(long)]
        output: PathBuf,
    },

    /// Показать группировку батчей для эпохи (аудио не читается)
    Batches {
        /// YAML-конфиг эксперимента
        #[arg(long)]
        config: PathBuf,

        /// Номер эпохи
        #[arg(long, default_value_t = 0)]
        epoch: u64,

        /// Сколько первых батчей напечатать
        #[arg(long, default_value_t = 5)]
        show: usize,
    },

    /// Прогнать батчи через случайно инициализированную модель
    Forward {
        /// YAML-конфиг эксперимента
        #[arg(long)]
        config: PathBuf,

        /// Device to use (cpu, metal, cuda)
        #[arg(long, default_value = "cpu")]
        device: String,

        /// Номер эпохи
        #[arg(long, default_value_t = 0)]
        epoch: u64,

        /// Ограничить число батчей
        #[arg(long)]
        max_batches: Option<usize>,

        /// Сохранить модель, параметры признаков и словарь в директорию (для `decode`)
        #[arg(long)]
        save: Option<PathBuf>,
    },

    /// Жадная CTC-транскрибация WAV сохранённой моделью
    Decode {
        /// Директория модели (`config.json`, `model.safetensors`, `features.json`, `tokens.json`)
        #[arg(long)]
        model: PathBuf,

        /// Path to the audio file (WAV format)
        #[arg(long)]
        audio: PathBuf,

        /// Device to use (cpu, metal, cuda)
        #[arg(long, default_value = "cpu")]
        device: String,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Manifest {
            audio_dir,
            transcripts,
            output,
        } => run_manifest(audio_dir, transcripts, output),
        Commands::Vocab {
            manifest,
            chars,
            output,
        } => run_vocab(&manifest, &chars, output),
        Commands::Batches {
            config,
            epoch,
            show,
        } => run_batches(config, epoch, show),
        Commands::Forward {
            config,
            device,
            epoch,
            max_batches,
            save,
        } => run_forward(config, &device, epoch, max_batches, save),
        Commands::Decode {
            model,
            audio,
            device,
        } => run_decode(model, audio, &device),
    }
}

fn run_manifest(audio_dir: PathBuf, transcripts: PathBuf, output: PathBuf) -> Result<()> {
    println!("📂 Сборка манифеста: {}", audio_dir.display());

    let transcripts = load_transcripts(&transcripts)?;
    let entries = build_manifest(&audio_dir, &transcripts)?;
    if let Some(parent) = output.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    write_manifest(&output, &entries)?;

    let stats = DurationStats::from_entries(&entries);
    println!("   Записей: {}", stats.count);
    println!(
        "   Всего: {:.2} ч, в среднем {:.2} с",
        stats.total_hours(),
        stats.mean_secs()
    );
    println!();
    println!("📊 Длительности:");
    for (from, to, count) in stats.buckets() {
        println!("   [{from:>5.1}s - {to:>5.1}s) {count}");
    }
    println!();
    println!("💾 Манифест сохранён в: {}", output.display());
    Ok(())
}

fn run_vocab(manifests: &[PathBuf], chars: &str, output: PathBuf) -> Result<()> {
    let tokenizer = CharTokenizer::build(chars, manifests)?;
    tokenizer.save(&output)?;
    println!(
        "🔤 Словарь: {} символов (+ blank = {} классов)",
        tokenizer.vocab_size(),
        tokenizer.vocab_size() + 1
    );
    println!("💾 Сохранён в: {}", output.display());
    Ok(())
}

fn run_batches(config: PathBuf, epoch: u64, show: usize) -> Result<()> {
    let cfg = ExperimentConfig::load(&config)?;
    let entries = read_manifest(&cfg.data.train_manifest)?;
    let dataset = JsonlAsrDataset::from_entries(
        entries,
        CharTokenizer::from_chars(std::iter::empty::<char>()),
        cfg.features.clone(),
    )?;
    let lengths = dataset.frame_lengths();

    let mut sampler = DynamicBatchSampler::new(lengths.clone(), &cfg.sampler)?;
    sampler.set_epoch(epoch);

    let start = Instant::now();
    let stats = sampler.plan_stats()?;
    println!("🧮 Группировка эпохи {epoch} ({:?})", sampler.limit());
    println!("   Сид: {}", sampler.base_seed());
    println!("   Примеров: {}", stats.num_examples);
    println!("   Батчей: {}", stats.num_batches);
    println!("   Кадров: {} (после паддинга {})", stats.total_frames, stats.padded_frames);
    println!(
        "   Эффективность паддинга: {:.1}%",
        stats.padding_efficiency() * 100.0
    );
    println!(
        "   Максимум в батче: {} примеров, {} кадров",
        stats.max_batch_size, stats.max_batch_frames
    );

    for (i, batch) in sampler.iter()?.take(show).enumerate() {
        let frames: usize = batch.iter().map(|&idx| lengths[idx]).sum();
        println!("   #{i}: {} примеров, {frames} кадров", batch.len());
    }
    println!("⏱️  {:.3}s", start.elapsed().as_secs_f32());
    Ok(())
}

fn run_forward(
    config: PathBuf,
    device: &str,
    epoch: u64,
    max_batches: Option<usize>,
    save: Option<PathBuf>,
) -> Result<()> {
    let cfg = ExperimentConfig::load(&config)?;
    let device = create_device(device)?;

    let tokenizer = cfg.tokenizer()?;
    let model_cfg = cfg.resolve_model(&tokenizer)?;
    let dataset =
        JsonlAsrDataset::new(&cfg.data.train_manifest, tokenizer, cfg.features.clone())?;
    let mut loader = AsrDataLoader::new(dataset, &cfg.sampler)?;
    loader.set_epoch(epoch);

    println!("🧠 Инициализация модели...");
    let (model, varmap) = ConformerCtc::init(&model_cfg, &device)?;
    println!(
        "   Параметры: ~{:.2}M, словарь: {} (blank = {})",
        num_parameters(&varmap) as f64 / 1e6,
        model_cfg.vocab_size,
        model_cfg.blank_id()
    );

    let total = loader.num_batches()?;
    let limit = max_batches.unwrap_or(total).min(total);
    println!("🎯 Прогон {limit} из {total} батчей...");

    let start = Instant::now();
    for (i, batch) in loader.iter(&device)?.take(limit).enumerate() {
        let batch = batch?;
        let (_, max_time, _) = batch.features.dims3()?;
        let (logits, out_len) = model.forward(&batch.features, &batch.feature_lengths, false)?;
        let (b, steps, vocab) = logits.dims3()?;

        let expected = model.subsampling().output_time_length(max_time as i64);
        ensure!(
            steps as i64 == expected,
            "батч {i}: {steps} шагов, ожидалось {expected}"
        );
        let out_len: Vec<i64> = out_len.to_vec1()?;
        ensure!(
            out_len.iter().all(|&l| (0..=expected).contains(&l)),
            "батч {i}: длины {out_len:?} вне [0, {expected}]"
        );

        println!(
            "   #{i}: features {:?} → logits [{b}, {steps}, {vocab}], длины {out_len:?}",
            batch.features.dims()
        );
    }
    println!("⏱️  {:.2}s", start.elapsed().as_secs_f32());

    if let Some(dir) = save {
        model.save(&varmap, &dir)?;
        Frontend {
            fbank: loader.dataset().fbank_config().clone(),
            tokenizer: loader.dataset().tokenizer().clone(),
        }
        .save(&dir)?;
        println!("💾 Модель сохранена в: {}", dir.display());
    }
    Ok(())
}

fn run_decode(model_dir: PathBuf, audio: PathBuf, device: &str) -> Result<()> {
    let start = Instant::now();
    let device = create_device(device)?;

    println!("🧠 Загрузка модели...");
    let model = ConformerCtc::load(&model_dir, &device)?;
    let Frontend { fbank, tokenizer } = Frontend::load(&model_dir, model.config())?;

    let extractor = FbankExtractor::new(fbank)?;
    let buffer = load_mono(&audio, extractor.config().sample_rate)?;
    println!(
        "📂 {}: {:.2}s",
        audio.display(),
        buffer.duration()
    );

    let features = extractor.extract(&buffer.samples, &device)?;
    let x = features.tensor.unsqueeze(0)?;
    let x_len = Tensor::new(&[features.num_frames as i64], &device)?;
    let ids = model.transcribe_ids(&x, &x_len)?;
    let text = ids.first().map(|ids| tokenizer.decode(ids)).unwrap_or_default();

    println!();
    println!("📝 Транскрипция:");
    println!("   {text}");
    println!();
    println!("⏱️  Общее время: {:.2}s", start.elapsed().as_secs_f32());
    Ok(())
}

fn create_device(device: &str) -> Result<Device> {
    match device {
        "metal" => {
            // candle может panic при инициализации Metal, если устройство недоступно.
            let prev_hook = std::panic::take_hook();
            std::panic::set_hook(Box::new(|_| {}));
            let res = std::panic::catch_unwind(|| Device::new_metal(0));
            std::panic::set_hook(prev_hook);

            match res {
                Ok(Ok(dev)) => Ok(dev),
                Ok(Err(e)) => Err(e.into()),
                Err(_) => Err(anyhow::anyhow!(
                    "Инициализация Metal недоступна в этом окружении. Попробуйте --device cpu."
                )),
            }
        }
        "cuda" => Ok(Device::new_cuda(0)?),
        _ => Ok(Device::Cpu),
    }
}
