//! # asr-core
//!
//! Базовые типы, конфигурация и ошибки для обучающего стека RustASR CTC.
//!
//! Этот крейт предоставляет фундаментальные абстракции для всех остальных
//! крейтов в workspace:
//!
//! - Общие типы данных (`AudioBuffer`, `FeatureMatrix`)
//! - Конфигурация filterbank-признаков (`FbankConfig`)
//! - Загрузка YAML/JSON-конфигов
//! - Унифицированная обработка ошибок через `AsrError`

pub mod config;
pub mod error;
pub mod types;

pub use config::{FbankConfig, WindowType, load_json, load_yaml};
pub use error::{AsrError, AsrResult};
pub use types::{AudioBuffer, FeatureMatrix};
