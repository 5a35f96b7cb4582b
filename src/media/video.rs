//! Модуль для работы с видео
//!
//! Сверка длительности записанного видеоряда с таймлайном и финальное
//! объединение видео с итоговой аудиодорожкой.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::config::MediaSettings;
use crate::error::{ReconciliationWarning, Result, SyncError};
use crate::utils::ffmpeg::{self, ToolError};

/// Внешний инструмент для работы с медиафайлами
#[async_trait]
pub trait MediaToolkit: Send + Sync {
    /// Измерить длительность файла
    async fn probe_duration(&self, path: &Path) -> Result<f64>;

    /// Равномерно изменить скорость видеоряда: новые метки = `factor * PTS`
    async fn retime(&self, input: &Path, factor: f64, output: &Path) -> Result<()>;

    /// Объединить видео и аудио с жестким ограничением длительности
    async fn encode(&self, video: &Path, audio: &Path, target_duration: f64, output: &Path) -> Result<()>;
}

/// Реализация через ffmpeg/ffprobe
#[derive(Debug, Clone)]
pub struct FfmpegToolkit {
    settings: MediaSettings,
}

impl FfmpegToolkit {
    pub fn new(settings: MediaSettings) -> Self {
        Self { settings }
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(self.settings.command_timeout_secs)
    }

    /// Аргументы финального кодирования
    pub fn encode_args(&self, video: &Path, audio: &Path, target_duration: f64, video_duration: Option<f64>, output: &Path) -> Vec<String> {
        let mut args = vec![
            "-i".to_string(),
            video.to_string_lossy().to_string(),
            "-i".to_string(),
            audio.to_string_lossy().to_string(),
        ];

        // короткий видеоряд добиваем последним кадром
        if let Some(actual) = video_duration {
            let shortfall = target_duration - actual;
            if shortfall > 0.0 {
                args.push("-vf".to_string());
                args.push(format!("tpad=stop_mode=clone:stop_duration={:.3}", shortfall));
            }
        }

        args.extend([
            "-map".to_string(),
            "0:v:0".to_string(),
            "-map".to_string(),
            "1:a:0".to_string(),
            "-c:v".to_string(),
            self.settings.video_codec.clone(),
            "-preset".to_string(),
            self.settings.preset.clone(),
            "-crf".to_string(),
            self.settings.crf.to_string(),
            "-c:a".to_string(),
            self.settings.audio_codec.clone(),
            "-t".to_string(),
            format!("{:.3}", target_duration),
            "-avoid_negative_ts".to_string(),
            "make_zero".to_string(),
            output.to_string_lossy().to_string(),
        ]);
        args
    }
}

fn video_error(e: ToolError) -> SyncError {
    SyncError::VideoProcessing(e.to_string())
}

#[async_trait]
impl MediaToolkit for FfmpegToolkit {
    async fn probe_duration(&self, path: &Path) -> Result<f64> {
        ffmpeg::probe_duration(&self.settings.ffprobe, path, self.timeout())
            .await
            .map_err(video_error)
    }

    async fn retime(&self, input: &Path, factor: f64, output: &Path) -> Result<()> {
        let args = vec![
            "-i".to_string(),
            input.to_string_lossy().to_string(),
            "-filter:v".to_string(),
            format!("setpts={:.6}*PTS", factor),
            "-an".to_string(),
            output.to_string_lossy().to_string(),
        ];
        ffmpeg::run_ffmpeg_command(&self.settings.ffmpeg, &args, self.timeout())
            .await
            .map_err(video_error)
    }

    async fn encode(&self, video: &Path, audio: &Path, target_duration: f64, output: &Path) -> Result<()> {
        let video_duration = match self.probe_duration(video).await {
            Ok(d) => Some(d),
            Err(e) => {
                log::warn!("Cannot probe visual track before encoding: {}", e);
                None
            }
        };
        let args = self.encode_args(video, audio, target_duration, video_duration, output);
        ffmpeg::run_ffmpeg_command(&self.settings.ffmpeg, &args, self.timeout())
            .await
            .map_err(|e| SyncError::Mux(e.to_string()))
    }
}

/// Результат сверки видеоряда
#[derive(Debug, Clone, Serialize)]
pub struct VisualReconciliation {
    /// Видеоряд, который идет на кодирование
    pub path: PathBuf,
    pub expected: f64,
    pub actual: f64,
    /// Примененный коэффициент скорости
    pub factor: Option<f64>,
    pub warning: Option<ReconciliationWarning>,
}

/// Сверить длительность записанного видеоряда с таймлайном.
///
/// При расхождении больше допуска видеоряд равномерно перетаймливается
/// с коэффициентом `expected / actual`. Аудио на этом этапе нет.
pub async fn reconcile_visual_track(
    toolkit: &dyn MediaToolkit,
    recorded: &Path,
    expected: f64,
    tolerance: f64,
    work_dir: &Path,
) -> Result<VisualReconciliation> {
    let actual = toolkit.probe_duration(recorded).await?;
    if actual <= 0.0 {
        return Err(SyncError::VideoProcessing(format!(
            "recorded track {} has zero duration",
            recorded.display()
        )));
    }

    let Some(warning) = ReconciliationWarning::check("visual track", expected, actual, tolerance) else {
        log::info!("Visual track {:.3}s within tolerance of {:.3}s", actual, expected);
        return Ok(VisualReconciliation {
            path: recorded.to_path_buf(),
            expected,
            actual,
            factor: None,
            warning: None,
        });
    };

    let factor = expected / actual;
    log::warn!("{}; retiming visual track with factor {:.4}", warning, factor);

    let ext = recorded.extension().and_then(|e| e.to_str()).unwrap_or("mp4");
    let output = work_dir.join(format!("visual_retimed.{}", ext));
    toolkit.retime(recorded, factor, &output).await?;

    Ok(VisualReconciliation {
        path: output,
        expected,
        actual,
        factor: Some(factor),
        warning: Some(warning),
    })
}

/// Результат финального кодирования
#[derive(Debug, Clone, Serialize)]
pub struct MuxReport {
    pub output: PathBuf,
    /// Длительность результата, равная фактической длине аудиодорожки
    pub duration: f64,
    pub visual: VisualReconciliation,
}

/// Сверить видеоряд и объединить его с аудио.
///
/// Ограничением длительности служит фактическая длина аудиодорожки,
/// а не расчетная длительность таймлайна.
pub async fn mux_final(
    toolkit: &dyn MediaToolkit,
    recorded: &Path,
    timeline_duration: f64,
    audio: &Path,
    audio_duration: f64,
    tolerance: f64,
    output: &Path,
) -> Result<MuxReport> {
    let work_dir = output.parent().unwrap_or_else(|| Path::new("."));
    let visual = reconcile_visual_track(toolkit, recorded, timeline_duration, tolerance, work_dir).await?;

    log::info!(
        "Encoding {} with audio {} capped at {:.3}s",
        visual.path.display(),
        audio.display(),
        audio_duration
    );
    if let Err(e) = toolkit.encode(&visual.path, audio, audio_duration, output).await {
        if output.exists() {
            if let Err(rm) = tokio::fs::remove_file(output).await {
                log::debug!("Cannot remove partial output {}: {}", output.display(), rm);
            }
        }
        log::error!("Final encode failed: {}", e);
        return Err(match e {
            SyncError::Mux(_) => e,
            other => SyncError::Mux(other.to_string()),
        });
    }

    Ok(MuxReport {
        output: output.to_path_buf(),
        duration: audio_duration,
        visual,
    })
}
