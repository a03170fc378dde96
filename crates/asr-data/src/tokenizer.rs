//! Посимвольный токенизатор.
//!
//! Словарь — отсортированное множество символов из транскриптов манифестов
//! плюс необязательная строка-затравка. ID символа — его позиция в словаре.
//! Blank для CTC в словарь не входит: модель добавляет его последним классом.

use std::collections::{BTreeSet, HashMap};
use std::path::Path;

use asr_core::{AsrError, AsrResult};
use tracing::info;

use crate::manifest::read_manifest;

#[derive(Debug, Clone, PartialEq)]
pub struct CharTokenizer {
    chars: Vec<char>,
    char_to_id: HashMap<char, u32>,
}

impl CharTokenizer {
    /// Токенизатор из готового набора символов (сортируется, дубликаты убираются).
    pub fn from_chars(chars: impl IntoIterator<Item = char>) -> Self {
        let chars: Vec<char> = chars.into_iter().collect::<BTreeSet<_>>().into_iter().collect();
        let char_to_id = chars.iter().enumerate().map(|(i, &c)| (c, i as u32)).collect();
        Self { chars, char_to_id }
    }

    /// Собрать словарь по манифестам и строке-затравке.
    pub fn build(seed_chars: &str, manifests: &[impl AsRef<Path>]) -> AsrResult<Self> {
        let mut set: BTreeSet<char> = seed_chars.chars().collect();
        for manifest in manifests {
            for entry in read_manifest(manifest)? {
                set.extend(entry.txt.chars());
            }
        }
        let tokenizer = Self::from_chars(set);
        info!("CharTokenizer: {} символов", tokenizer.vocab_size());
        Ok(tokenizer)
    }

    pub fn vocab_size(&self) -> usize {
        self.chars.len()
    }

    pub fn chars(&self) -> &[char] {
        &self.chars
    }

    /// Текст → ID. Неизвестные символы пропускаются.
    pub fn encode(&self, text: &str) -> Vec<u32> {
        text.chars().filter_map(|c| self.char_to_id.get(&c).copied()).collect()
    }

    /// ID → текст. Неизвестные ID пропускаются.
    pub fn decode(&self, ids: &[u32]) -> String {
        ids.iter()
            .filter_map(|&id| self.chars.get(id as usize))
            .collect()
    }

    /// Сохранить как JSON-массив односимвольных строк.
    pub fn save(&self, path: impl AsRef<Path>) -> AsrResult<()> {
        let tokens: Vec<String> = self.chars.iter().map(|c| c.to_string()).collect();
        std::fs::write(path.as_ref(), serde_json::to_string(&tokens)?)?;
        Ok(())
    }

    /// Загрузить словарь, сохранённый [`Self::save`].
    pub fn load(path: impl AsRef<Path>) -> AsrResult<Self> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path)?;
        let tokens: Vec<String> = serde_json::from_str(&data)?;

        let mut chars = Vec::with_capacity(tokens.len());
        for token in &tokens {
            let mut it = token.chars();
            match (it.next(), it.next()) {
                (Some(c), None) => chars.push(c),
                _ => {
                    return Err(AsrError::Data(format!(
                        "{}: токен {token:?} не является одним символом",
                        path.display()
                    )));
                }
            }
        }
        Ok(Self::from_chars(chars))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::{ManifestEntry, write_manifest};

    #[test]
    fn test_sorted_dedup_vocab() {
        let tok = CharTokenizer::from_chars("cabbac".chars());
        assert_eq!(tok.chars(), &['a', 'b', 'c']);
        assert_eq!(tok.encode("cab"), vec![2, 0, 1]);
    }

    #[test]
    fn test_unknowns_are_skipped() {
        let tok = CharTokenizer::from_chars("ab".chars());
        assert_eq!(tok.encode("axb?"), vec![0, 1]);
        assert_eq!(tok.decode(&[1, 7, 0]), "ba");
    }

    #[test]
    fn test_build_from_manifests_and_seed() {
        let dir = tempfile::tempdir().unwrap();
        let m1 = dir.path().join("a.jsonl");
        let m2 = dir.path().join("b.jsonl");
        let entry = |txt: &str| ManifestEntry {
            path: "x.wav".into(),
            txt: txt.to_string(),
            key: "k".to_string(),
            duration: 1.0,
        };
        write_manifest(&m1, &[entry("你好")]).unwrap();
        write_manifest(&m2, &[entry("好的")]).unwrap();

        let tok = CharTokenizer::build("Z", &[&m1, &m2]).unwrap();
        assert_eq!(tok.vocab_size(), 4);
        assert_eq!(tok.decode(&tok.encode("你好的")), "你好的");
        assert_eq!(tok.chars()[0], 'Z');
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokens.json");
        let tok = CharTokenizer::from_chars("привет мир".chars());
        tok.save(&path).unwrap();
        assert_eq!(CharTokenizer::load(&path).unwrap(), tok);
    }

    #[test]
    fn test_load_rejects_multichar_tokens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokens.json");
        std::fs::write(&path, r#"["a", "bc"]"#).unwrap();
        assert!(matches!(CharTokenizer::load(&path), Err(AsrError::Data(_))));
    }
}
