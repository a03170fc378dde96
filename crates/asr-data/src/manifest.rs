//! JSONL-манифест: одна запись `{path, txt, key, duration}` на строку.

use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use asr_core::{AsrError, AsrResult};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Одна запись манифеста.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// Путь к аудиофайлу.
    pub path: PathBuf,
    /// Транскрипт.
    pub txt: String,
    /// Уникальный идентификатор записи.
    pub key: String,
    /// Длительность в секундах.
    pub duration: f64,
}

/// Прочитать манифест. Пустые строки пропускаются, ошибки содержат номер строки.
pub fn read_manifest(path: impl AsRef<Path>) -> AsrResult<Vec<ManifestEntry>> {
    let path = path.as_ref();
    let file = File::open(path)
        .map_err(|e| AsrError::Data(format!("Не удалось открыть манифест {}: {e}", path.display())))?;

    let mut entries = Vec::new();
    for (lineno, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let entry: ManifestEntry = serde_json::from_str(line).map_err(|e| {
            AsrError::Data(format!("{}:{}: {e}", path.display(), lineno + 1))
        })?;
        entries.push(entry);
    }
    Ok(entries)
}

/// Записать манифест (UTF-8 без экранирования не-ASCII).
pub fn write_manifest(path: impl AsRef<Path>, entries: &[ManifestEntry]) -> AsrResult<()> {
    let mut out = BufWriter::new(File::create(path.as_ref())?);
    for entry in entries {
        serde_json::to_writer(&mut out, entry)?;
        out.write_all(b"\n")?;
    }
    out.flush()?;
    Ok(())
}

/// Прочитать файл транскриптов: `<key> <token> <token> ...` на строку.
///
/// Текст — токены, склеенные без разделителей.
pub fn load_transcripts(path: impl AsRef<Path>) -> AsrResult<HashMap<String, String>> {
    let path = path.as_ref();
    let file = File::open(path)
        .map_err(|e| AsrError::Data(format!("Не удалось открыть {}: {e}", path.display())))?;

    let mut transcripts = HashMap::new();
    for line in BufReader::new(file).lines() {
        let line = line?;
        let mut parts = line.split_whitespace();
        let Some(key) = parts.next() else {
            continue;
        };
        transcripts.insert(key.to_string(), parts.collect::<String>());
    }
    Ok(transcripts)
}

/// Рекурсивно собрать `*.wav` в директории, отсортированные по пути.
pub fn find_wav_files(dir: impl AsRef<Path>) -> AsrResult<Vec<PathBuf>> {
    fn visit(dir: &Path, out: &mut Vec<PathBuf>) -> AsrResult<()> {
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if path.is_dir() {
                visit(&path, out)?;
            } else if path
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case("wav"))
            {
                out.push(path);
            }
        }
        Ok(())
    }

    let mut files = Vec::new();
    visit(dir.as_ref(), &mut files)?;
    files.sort();
    Ok(files)
}

/// Построить манифест по директории с аудио и файлу транскриптов.
///
/// Файлы без транскрипта пропускаются с предупреждением. Длительность
/// читается из заголовка WAV.
pub fn build_manifest(
    audio_dir: impl AsRef<Path>,
    transcripts: &HashMap<String, String>,
) -> AsrResult<Vec<ManifestEntry>> {
    let audio_dir = audio_dir.as_ref();
    let files = find_wav_files(audio_dir)?;
    info!("Найдено {} WAV-файлов в {}", files.len(), audio_dir.display());

    let mut entries = Vec::with_capacity(files.len());
    let mut skipped = 0usize;
    for file in files {
        let Some(key) = file.file_stem().and_then(|s| s.to_str()).map(str::to_string) else {
            continue;
        };
        let Some(txt) = transcripts.get(&key) else {
            warn!("Нет транскрипта для {}", file.display());
            skipped += 1;
            continue;
        };
        let duration = audio::wav_duration(&file)?;
        entries.push(ManifestEntry {
            path: file,
            txt: txt.clone(),
            key,
            duration,
        });
    }

    if skipped > 0 {
        warn!("Пропущено {skipped} файлов без транскрипта");
    }
    Ok(entries)
}

/// Ширина корзины гистограммы длительностей, секунды.
pub const DURATION_BUCKET_SECS: f64 = 0.5;

/// Распределение длительностей манифеста.
#[derive(Debug, Clone, PartialEq)]
pub struct DurationStats {
    pub count: usize,
    pub total_secs: f64,
    /// Номер корзины (`duration / 0.5`) → количество записей.
    pub histogram: BTreeMap<u64, usize>,
}

impl DurationStats {
    pub fn from_durations(durations: impl IntoIterator<Item = f64>) -> Self {
        let mut stats = Self {
            count: 0,
            total_secs: 0.0,
            histogram: BTreeMap::new(),
        };
        for d in durations {
            stats.count += 1;
            stats.total_secs += d;
            let bucket = (d.max(0.0) / DURATION_BUCKET_SECS).floor() as u64;
            *stats.histogram.entry(bucket).or_default() += 1;
        }
        stats
    }

    pub fn from_entries(entries: &[ManifestEntry]) -> Self {
        Self::from_durations(entries.iter().map(|e| e.duration))
    }

    pub fn total_hours(&self) -> f64 {
        self.total_secs / 3600.0
    }

    pub fn mean_secs(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.total_secs / self.count as f64
        }
    }

    /// Корзины как `(начало, конец, количество)` в секундах.
    pub fn buckets(&self) -> impl Iterator<Item = (f64, f64, usize)> + '_ {
        self.histogram.iter().map(|(&b, &n)| {
            let start = b as f64 * DURATION_BUCKET_SECS;
            (start, start + DURATION_BUCKET_SECS, n)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(key: &str, txt: &str, duration: f64) -> ManifestEntry {
        ManifestEntry {
            path: PathBuf::from(format!("/data/{key}.wav")),
            txt: txt.to_string(),
            key: key.to_string(),
            duration,
        }
    }

    #[test]
    fn test_manifest_roundtrip_keeps_unicode() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("train.jsonl");
        let entries = vec![entry("a1", "你好世界", 1.25), entry("a2", "привет", 0.4)];
        write_manifest(&path, &entries).unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("你好世界"));
        assert_eq!(raw.lines().count(), 2);
        assert_eq!(read_manifest(&path).unwrap(), entries);
    }

    #[test]
    fn test_read_manifest_reports_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.jsonl");
        std::fs::write(
            &path,
            "{\"path\":\"a.wav\",\"txt\":\"x\",\"key\":\"a\",\"duration\":1.0}\n\n{not json}\n",
        )
        .unwrap();
        let err = read_manifest(&path).unwrap_err().to_string();
        assert!(err.contains(":3:"), "{err}");
    }

    #[test]
    fn test_load_transcripts_joins_tokens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("transcripts.txt");
        std::fs::write(&path, "BAC009 而 对 楼市\n\nBAC010 ok\n").unwrap();
        let t = load_transcripts(&path).unwrap();
        assert_eq!(t.len(), 2);
        assert_eq!(t["BAC009"], "而对楼市");
        assert_eq!(t["BAC010"], "ok");
    }

    #[test]
    fn test_duration_stats() {
        let stats = DurationStats::from_durations([0.2, 0.7, 0.9, 3.1]);
        assert_eq!(stats.count, 4);
        assert!((stats.total_secs - 4.9).abs() < 1e-9);
        assert!((stats.mean_secs() - 1.225).abs() < 1e-9);
        let buckets: Vec<(f64, f64, usize)> = stats.buckets().collect();
        assert_eq!(buckets, vec![(0.0, 0.5, 1), (0.5, 1.0, 2), (3.0, 3.5, 1)]);
    }

    #[test]
    fn test_empty_stats() {
        let stats = DurationStats::from_entries(&[]);
        assert_eq!(stats.mean_secs(), 0.0);
        assert_eq!(stats.total_hours(), 0.0);
    }
}
