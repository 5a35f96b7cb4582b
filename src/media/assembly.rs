//! Сборка итоговой аудиодорожки по таймлайну
//!
//! Курсор сборки перед каждым шагом выравнивается по точному `start_time`
//! шага, а не по сумме длин предыдущих клипов, поэтому ошибки округления
//! не накапливаются. Если итоговая длина расходится с таймлайном, побеждает
//! фактическая длина собранной дорожки.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::config::AssemblySettings;
use crate::error::{ReconciliationWarning, Result, SyncError};
use crate::media::audio::{self, duration_in_seconds, seconds_to_frames};
use crate::timeline::{ClipId, Segment, Timeline, TimelineArtifact};

/// Имя файла итоговой дорожки
pub const MASTER_FILE: &str = "master.wav";

/// Шаг, содержимое предыдущего шага которого вышло за его слот
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepOverrun {
    pub step_index: usize,
    pub kind: String,
    /// На сколько секунд курсор ушел дальше начала шага
    pub overrun: f64,
}

/// Собранная дорожка в памяти
#[derive(Debug, Clone)]
pub struct MasterTrack {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub overruns: Vec<StepOverrun>,
}

impl MasterTrack {
    pub fn duration(&self) -> f64 {
        duration_in_seconds(self.samples.len(), self.sample_rate)
    }
}

/// Отчет о сборке
#[derive(Debug, Clone, Serialize)]
pub struct AssemblyReport {
    pub path: PathBuf,
    pub sample_rate: u32,
    /// Длительность по таймлайну
    pub expected_duration: f64,
    /// Фактическая длительность дорожки, используется при финальном кодировании
    pub actual_duration: f64,
    pub overruns: Vec<StepOverrun>,
    pub warning: Option<ReconciliationWarning>,
}

/// Собрать дорожку из клипов, уже приведенных к `sample_rate`
pub fn render_master(
    timeline: &Timeline,
    clips: &HashMap<ClipId, Vec<f32>>,
    sample_rate: u32,
) -> Result<MasterTrack> {
    let mut samples: Vec<f32> = Vec::with_capacity(seconds_to_frames(timeline.total_duration, sample_rate));
    let mut overruns = Vec::new();

    for step in &timeline.steps {
        let target = seconds_to_frames(step.start_time, sample_rate);
        if samples.len() < target {
            samples.resize(target, 0.0);
        } else if samples.len() > target {
            let overrun = duration_in_seconds(samples.len() - target, sample_rate);
            log::warn!(
                "Step {} starts at {:.3}s but assembled audio already reaches {:.3}s, trimming {:.3}s",
                step.describe(),
                step.start_time,
                duration_in_seconds(samples.len(), sample_rate),
                overrun
            );
            overruns.push(StepOverrun {
                step_index: step.index,
                kind: step.kind.as_str().to_string(),
                overrun,
            });
            samples.truncate(target);
        }

        for segment in &step.segments {
            match segment {
                Segment::Silence { duration } => {
                    let frames = seconds_to_frames(*duration, sample_rate);
                    samples.resize(samples.len() + frames, 0.0);
                }
                Segment::Clip { clip, .. } => {
                    let pcm = clips.get(clip).ok_or_else(|| {
                        log::error!("Step {}: no audio for clip {}", step.describe(), clip);
                        SyncError::MissingAudio(clip.to_string())
                    })?;
                    samples.extend_from_slice(pcm);
                }
            }
        }
    }

    let end = seconds_to_frames(timeline.total_duration, sample_rate);
    if samples.len() < end {
        samples.resize(end, 0.0);
    }

    Ok(MasterTrack {
        samples,
        sample_rate,
        overruns,
    })
}

/// Загрузить все клипы артефакта и привести их к частоте `sample_rate`
pub async fn load_clips(
    artifact: &TimelineArtifact,
    base_dir: &Path,
    sample_rate: u32,
) -> Result<HashMap<ClipId, Vec<f32>>> {
    let mut clips = HashMap::new();
    for id in artifact.timeline.clip_ids() {
        let path = artifact.clip_path(base_dir, &id)?;
        if !path.exists() {
            return Err(SyncError::MissingAudio(format!("{} ({})", id, path.display())));
        }
        let decoded = audio::decode_file(&path).await?;
        let pcm = audio::resample(&decoded.samples, decoded.sample_rate, sample_rate)?;

        if let Some(record) = artifact.clips.get(&id) {
            let measured = duration_in_seconds(pcm.len(), sample_rate);
            if (measured - record.duration).abs() > 0.05 {
                log::warn!(
                    "Clip {}: recorded duration {:.3}s, decoded {:.3}s",
                    id,
                    record.duration,
                    measured
                );
            }
        }
        clips.insert(id, pcm);
    }
    Ok(clips)
}

/// Собрать итоговую дорожку и записать ее в WAV
pub async fn assemble_master_track(
    artifact: &TimelineArtifact,
    base_dir: &Path,
    output_path: &Path,
    settings: &AssemblySettings,
) -> Result<AssemblyReport> {
    let timeline = &artifact.timeline;
    log::info!(
        "Assembling master track: {} steps, expected {:.3}s at {} Hz",
        timeline.len(),
        timeline.total_duration,
        settings.sample_rate
    );

    let clips = load_clips(artifact, base_dir, settings.sample_rate).await?;
    let track = render_master(timeline, &clips, settings.sample_rate)?;

    let actual = track.duration();
    let warning = ReconciliationWarning::check(
        "audio assembly",
        timeline.total_duration,
        actual,
        settings.duration_tolerance,
    );
    match &warning {
        Some(w) => log::warn!("Master track duration mismatch, actual duration wins. {}", w),
        None => log::info!(
            "Master track duration {:.3}s matches timeline {:.3}s",
            actual,
            timeline.total_duration
        ),
    }

    if let Some(parent) = output_path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    audio::encode_wav(&track.samples, track.sample_rate, output_path)?;

    Ok(AssemblyReport {
        path: output_path.to_path_buf(),
        sample_rate: track.sample_rate,
        expected_duration: timeline.total_duration,
        actual_duration: actual,
        overruns: track.overruns,
        warning,
    })
}
