//! Модуль обработки ошибок narration-sync
//!
//! Здесь собраны фатальные ошибки конвейера и нефатальное предупреждение
//! о расхождении длительностей, которое только логируется и попадает в отчеты.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Ошибки конвейера narration-sync
#[derive(Debug, Error)]
pub enum SyncError {
    /// Некорректная или неполная спецификация контента
    #[error("Content validation error: {0}")]
    ContentValidation(String),

    /// Отсутствующий или некорректный профиль таймингов
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Синтез речи исчерпал всю лестницу запасных голосов
    #[error("Synthesis failed for clip {clip} after {attempts} attempts: {message}")]
    Synthesis {
        clip: String,
        attempts: usize,
        message: String,
    },

    /// Сбой рендерера во время сессии воспроизведения
    #[error("Render error at step {step_index} ({kind}): {message}")]
    Render {
        step_index: usize,
        kind: String,
        message: String,
    },

    /// Сессия воспроизведения отменена
    #[error("Playback cancelled during {0}")]
    Cancelled(String),

    /// Ошибка финального кодирования
    #[error("Mux error: {0}")]
    Mux(String),

    /// Ошибка обработки аудио
    #[error("Audio processing error: {0}")]
    AudioProcessing(String),

    /// Ошибка обработки видео
    #[error("Video processing error: {0}")]
    VideoProcessing(String),

    /// В таймлайне есть клип, для которого нет аудио или длительности
    #[error("Missing audio for clip {0}")]
    MissingAudio(String),

    /// Ошибка HTTP запроса
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    /// Ошибка ввода-вывода
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Ошибка сериализации/десериализации JSON
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Ошибка разбора YAML
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl SyncError {
    /// Ошибки, после которых повторный запуск без изменения входных данных бессмыслен
    pub fn is_input_error(&self) -> bool {
        matches!(self, Self::ContentValidation(_) | Self::Configuration(_))
    }
}

/// Тип Result для библиотеки narration-sync
pub type Result<T> = std::result::Result<T, SyncError>;

/// Расхождение измеренной длительности с ожидаемой.
///
/// Не прерывает работу: стадия компенсирует расхождение сама и сообщает о нем.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationWarning {
    /// Стадия, на которой обнаружено расхождение
    pub stage: String,
    /// Ожидаемая длительность в секундах
    pub expected: f64,
    /// Фактическая длительность в секундах
    pub actual: f64,
}

impl ReconciliationWarning {
    pub fn new(stage: impl Into<String>, expected: f64, actual: f64) -> Self {
        Self {
            stage: stage.into(),
            expected,
            actual,
        }
    }

    /// Создает предупреждение только если расхождение больше допуска
    pub fn check(stage: impl Into<String>, expected: f64, actual: f64, tolerance: f64) -> Option<Self> {
        if (actual - expected).abs() > tolerance {
            Some(Self::new(stage, expected, actual))
        } else {
            None
        }
    }

    /// Разница фактической и ожидаемой длительности
    pub fn difference(&self) -> f64 {
        self.actual - self.expected
    }
}

impl fmt::Display for ReconciliationWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: expected {:.3}s, actual {:.3}s (diff {:+.3}s)",
            self.stage,
            self.expected,
            self.actual,
            self.difference()
        )
    }
}
