//! Драйвер сессии воспроизведения
//!
//! Состояния: `Uncalibrated -> Calibrating -> Playing -> Completed`.
//! Шаги вызываются строго по порядку и никогда раньше скомпенсированного
//! целевого времени. Любая ошибка рендерера или отмена переводит сессию в
//! `Completed` с ошибкой, частичная запись удаляется. Сессия не возобновляется.

use std::future::Future;
use std::time::Duration;

use serde::Serialize;
use tokio::time::{sleep, sleep_until, Instant};
use tokio_util::sync::CancellationToken;

use crate::config::PlaybackSettings;
use crate::error::{Result, SyncError};
use crate::playback::calibration::{CalibrationState, CalibrationSummary, ProbeResult};
use crate::playback::{RecordedTrack, RenderFailure, VisualRenderer};
use crate::timeline::Timeline;

/// Начиная с этого остатка ожидание идет одним длинным сном
const COARSE_THRESHOLD: f64 = 0.25;
/// Запас, который оставляет длинный сон до дедлайна
const COARSE_MARGIN: f64 = 0.2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionState {
    Uncalibrated,
    Calibrating,
    Playing,
    Completed,
}

/// Измерение одного шага, секунды от нуля сессии
#[derive(Debug, Clone, Serialize)]
pub struct StepMeasurement {
    pub index: usize,
    pub kind: String,
    pub start_time: f64,
    /// Скомпенсированное время вызова
    pub target: f64,
    /// Когда рендерер был вызван на самом деле
    pub invoked_at: f64,
    /// Когда вызов завершился
    pub actual: f64,
    pub error: f64,
    pub drift: f64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct TimingStats {
    pub mean_error: f64,
    pub mean_abs_error: f64,
    pub min_error: f64,
    pub max_error: f64,
    /// Шагов с ошибкой в пределах допуска синхронизации
    pub within_tolerance: usize,
}

impl TimingStats {
    pub fn from_measurements(steps: &[StepMeasurement], tolerance: f64) -> Self {
        if steps.is_empty() {
            return Self::default();
        }
        let n = steps.len() as f64;
        let errors = steps.iter().map(|s| s.error);
        Self {
            mean_error: errors.clone().sum::<f64>() / n,
            mean_abs_error: errors.clone().map(f64::abs).sum::<f64>() / n,
            min_error: errors.clone().fold(f64::MAX, f64::min),
            max_error: errors.fold(f64::MIN, f64::max),
            within_tolerance: steps.iter().filter(|s| s.error.abs() <= tolerance).count(),
        }
    }
}

/// Отчет успешной сессии
#[derive(Debug, Clone, Serialize)]
pub struct PlaybackReport {
    pub track: RecordedTrack,
    pub calibration: CalibrationSummary,
    pub steps: Vec<StepMeasurement>,
    pub stats: TimingStats,
    pub final_drift: f64,
}

/// Сессия воспроизведения одного таймлайна
pub struct PlaybackSession<'a, R: VisualRenderer> {
    timeline: &'a Timeline,
    renderer: R,
    settings: PlaybackSettings,
    state: SessionState,
    cancel: CancellationToken,
}

fn render_error(step_index: usize, kind: &str, failure: RenderFailure) -> SyncError {
    SyncError::Render {
        step_index,
        kind: kind.to_string(),
        message: failure.0,
    }
}

async fn guarded<T>(cancel: &CancellationToken, stage: &str, fut: impl Future<Output = T>) -> Result<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(SyncError::Cancelled(stage.to_string())),
        value = fut => Ok(value),
    }
}

/// Дождаться дедлайна, не проснувшись раньше него
async fn wait_for(deadline: Instant, settings: &PlaybackSettings) {
    loop {
        let now = Instant::now();
        if now >= deadline {
            return;
        }
        let remaining = (deadline - now).as_secs_f64();
        if remaining > COARSE_THRESHOLD {
            sleep(Duration::from_secs_f64(remaining - COARSE_MARGIN)).await;
        } else if remaining > settings.sync_tolerance {
            let step = (remaining / 4.0).clamp(settings.min_poll_interval, settings.max_poll_interval);
            sleep(Duration::from_secs_f64(step)).await;
        } else {
            sleep_until(deadline).await;
            return;
        }
    }
}

impl<'a, R: VisualRenderer> PlaybackSession<'a, R> {
    pub fn new(timeline: &'a Timeline, renderer: R, settings: PlaybackSettings) -> Self {
        Self {
            timeline,
            renderer,
            settings,
            state: SessionState::Uncalibrated,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Токен для отмены сессии извне
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn into_renderer(self) -> R {
        self.renderer
    }

    /// Провести сессию от калибровки до остановки записи
    pub async fn run(&mut self) -> Result<PlaybackReport> {
        if self.state != SessionState::Uncalibrated {
            return Err(SyncError::Configuration(
                "playback session already ran and cannot be resumed".to_string(),
            ));
        }

        let result = self.drive().await;
        if let Err(e) = &result {
            log::error!("Playback session failed: {}", e);
            if let Err(discard_error) = self.renderer.discard().await {
                log::warn!("Failed to discard partial recording: {}", discard_error);
            }
        }
        self.state = SessionState::Completed;
        result
    }

    async fn calibrate(&mut self) -> Result<CalibrationSummary> {
        let cancel = self.cancel.clone();
        let mut probes = Vec::with_capacity(self.settings.calibration_probes.len());

        for &interval in &self.settings.calibration_probes {
            let probe = self.renderer.probe_wait(Duration::from_secs_f64(interval));
            let elapsed = guarded(&cancel, "calibration", probe)
                .await?
                .map_err(|e| render_error(0, "calibration", e))?;
            probes.push(ProbeResult {
                target: interval,
                actual: elapsed.as_secs_f64(),
            });
        }

        let summary = CalibrationSummary::from_probes(probes, self.settings.stability_threshold);
        if summary.low_confidence {
            log::warn!(
                "Calibration is unstable: lag spread {:.3}s exceeds {:.3}s, timing is low-confidence",
                summary.spread,
                self.settings.stability_threshold
            );
        }
        log::info!(
            "Calibration finished: baseline lag {:.3}s over {} probes",
            summary.baseline_lag,
            summary.probes.len()
        );
        Ok(summary)
    }

    async fn wait_until(&self, zero: Instant, target: f64, stage: &str) -> Result<()> {
        let deadline = zero + Duration::from_secs_f64(target.max(0.0));
        guarded(&self.cancel, stage, wait_for(deadline, &self.settings)).await
    }

    async fn drive(&mut self) -> Result<PlaybackReport> {
        let timeline = self.timeline;
        let cancel = self.cancel.clone();

        self.state = SessionState::Calibrating;
        let summary = self.calibrate().await?;
        let mut calibration = CalibrationState::new(summary.baseline_lag, self.settings.drift_weight);

        guarded(&cancel, "start_recording", self.renderer.start_recording())
            .await?
            .map_err(|e| render_error(0, "start_recording", e))?;

        calibration.reset_drift();
        self.state = SessionState::Playing;
        let zero = Instant::now();
        let mut steps = Vec::with_capacity(timeline.len());

        for step in &timeline.steps {
            let stage = format!("step {}", step.describe());
            let target = calibration.compensated_target(step.start_time);
            self.wait_until(zero, target, &stage).await?;

            let invoked_at = zero.elapsed().as_secs_f64();
            guarded(&cancel, &stage, self.renderer.apply(step))
                .await?
                .map_err(|e| render_error(step.index, step.kind.as_str(), e))?;
            let actual = zero.elapsed().as_secs_f64();

            let timing = calibration.record(step.start_time, target, actual);
            if timing.error.abs() > self.settings.stability_threshold {
                log::warn!(
                    "Step {}: expected {:.3}s, shown at {:.3}s (error {:+.3}s, drift {:.3}s)",
                    step.describe(),
                    step.start_time,
                    actual,
                    timing.error,
                    timing.drift
                );
            } else {
                log::debug!(
                    "Step {}: target {:.3}s, error {:+.3}s, drift {:.3}s",
                    step.describe(),
                    target,
                    timing.error,
                    timing.drift
                );
            }

            steps.push(StepMeasurement {
                index: step.index,
                kind: step.kind.as_str().to_string(),
                start_time: step.start_time,
                target,
                invoked_at,
                actual,
                error: timing.error,
                drift: timing.drift,
            });
        }

        let end = calibration.compensated_target(timeline.total_duration);
        self.wait_until(zero, end, "completion").await?;
        guarded(&cancel, "completion", self.renderer.complete())
            .await?
            .map_err(|e| render_error(timeline.len(), "completion", e))?;

        let track = guarded(&cancel, "stop_recording", self.renderer.stop_recording())
            .await?
            .map_err(|e| render_error(timeline.len(), "stop_recording", e))?;

        let stats = TimingStats::from_measurements(&steps, self.settings.sync_tolerance);
        log::info!(
            "Playback finished: {} steps, mean |error| {:.3}s, max error {:+.3}s, recorded {:.3}s",
            steps.len(),
            stats.mean_abs_error,
            stats.max_error,
            track.duration
        );

        Ok(PlaybackReport {
            track,
            calibration: summary,
            steps,
            stats,
            final_drift: calibration.cumulative_drift(),
        })
    }
}
