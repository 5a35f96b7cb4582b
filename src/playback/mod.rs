//! Воспроизведение таймлайна на внешнем визуальном рендерере
//!
//! Рендерер умеет применять шаг таймлайна и записывать видеоряд. Драйвер
//! сессии вызывает его в реальном времени, компенсируя задержку рендерера.

pub mod calibration;
pub mod driver;
pub mod process_renderer;

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::Instant;

use crate::timeline::TimelineStep;

pub use calibration::{CalibrationState, CalibrationSummary};
pub use driver::{PlaybackReport, PlaybackSession, SessionState};
pub use process_renderer::ProcessRenderer;

/// Ошибка рендерера
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct RenderFailure(pub String);

impl RenderFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Записанный видеоряд
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedTrack {
    pub path: PathBuf,
    /// Длительность, измеренная рендерером
    pub duration: f64,
}

/// Визуальный рендерер со скриптуемым применением шагов
#[async_trait]
pub trait VisualRenderer: Send {
    /// Калибровочный замер: подождать `interval` и вернуть фактически прошедшее время
    async fn probe_wait(&mut self, interval: Duration) -> Result<Duration, RenderFailure> {
        let started = Instant::now();
        tokio::time::sleep(interval).await;
        Ok(started.elapsed())
    }

    async fn start_recording(&mut self) -> Result<(), RenderFailure>;

    /// Показать шаг таймлайна
    async fn apply(&mut self, step: &TimelineStep) -> Result<(), RenderFailure>;

    /// Финальный экран после последнего шага
    async fn complete(&mut self) -> Result<(), RenderFailure>;

    async fn stop_recording(&mut self) -> Result<RecordedTrack, RenderFailure>;

    /// Прервать запись и удалить частичный видеоряд
    async fn discard(&mut self) -> Result<(), RenderFailure>;
}
