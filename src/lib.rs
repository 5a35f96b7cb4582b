//! Библиотека narration-sync
//!
//! Конвейер озвученного упражнения: синтез клипов, детерминированный
//! таймлайн, воспроизведение на визуальном рендерере с компенсацией задержки
//! и точная сборка аудиодорожки по тому же таймлайну.

pub mod config;
pub mod content;
pub mod error;
pub mod media;
pub mod notification;
pub mod playback;
pub mod progress;
pub mod timeline;
pub mod tts;
pub mod utils;

#[cfg(test)]
mod tests;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::{Settings, TimingProfile};
use crate::content::ContentSpec;
use crate::error::Result;
use crate::media::assembly::MASTER_FILE;
use crate::media::{assemble_master_track, AssemblyReport, MediaToolkit, MuxReport};
use crate::playback::{PlaybackReport, PlaybackSession, RecordedTrack, VisualRenderer};
use crate::progress::{DefaultProgressReporter, ProcessStep, ProgressObserver, ProgressReporter, ProgressTracker};
use crate::timeline::artifact::ARTIFACT_FILE;
use crate::timeline::{estimate_runtime, plan_steps, resolve_plan, RuntimeEstimate, TimelineArtifact};
use crate::tts::cache::SynthesisCache;
use crate::tts::synthesizer::clip_durations;
use crate::tts::{SpeechProvider, Synthesizer, VoiceAssigner};

pub use crate::error::{ReconciliationWarning, SyncError};

/// Файл с описанием записанного видеоряда
pub const RECORDING_FILE: &str = "recording.json";
/// Файл с отчетом о таймингах воспроизведения
pub const PLAYBACK_REPORT_FILE: &str = "playback_report.json";

/// Фасад конвейера
pub struct NarrationSync {
    settings: Settings,
    progress_tracker: Option<ProgressTracker>,
}

impl NarrationSync {
    pub fn new(settings: Settings) -> Self {
        Self {
            settings,
            progress_tracker: None,
        }
    }

    pub fn with_progress_reporter(settings: Settings, reporter: Box<dyn ProgressReporter>) -> Self {
        Self {
            settings,
            progress_tracker: Some(ProgressTracker::with_reporter(reporter)),
        }
    }

    /// Добавить наблюдателя прогресса
    pub fn add_observer(&mut self, observer: Box<dyn ProgressObserver>) -> usize {
        let tracker = self
            .progress_tracker
            .get_or_insert_with(|| ProgressTracker::with_reporter(Box::new(DefaultProgressReporter::new())));
        tracker.add_observer(observer).unwrap_or(0)
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    fn step(&self, step: ProcessStep, details: &str) {
        if let Some(t) = &self.progress_tracker {
            t.set_step(step);
            t.update_step_progress(0.0, Some(details.to_string()));
        }
    }

    fn step_done(&self, details: String) {
        if let Some(t) = &self.progress_tracker {
            t.update_step_progress(100.0, Some(details));
        }
    }

    /// Директория результатов упражнения: `<output_dir>/teil<N>[_ubung<M>]`
    pub fn output_dir_for(&self, content: &ContentSpec) -> PathBuf {
        let name = match content.info.exercise {
            Some(n) => format!("teil{}_ubung{}", content.info.part, n),
            None => format!("teil{}", content.info.part),
        };
        self.settings.paths.output_dir.join(name)
    }

    pub fn resolve_profile(&self, part: u32) -> Result<TimingProfile> {
        TimingProfile::resolve(part, &self.settings.paths.profile_dir, self.settings.allow_default_profile)
    }

    /// Предварительная оценка длительности без синтеза
    pub fn plan(&self, content: &ContentSpec) -> Result<RuntimeEstimate> {
        let profile = self.resolve_profile(content.info.part)?;
        estimate_runtime(content, &profile)
    }

    /// Синтезировать клипы, построить таймлайн и сохранить артефакт в `output_dir`
    pub async fn generate_audio<P: SpeechProvider + 'static>(
        &self,
        content: &ContentSpec,
        provider: Arc<P>,
        output_dir: &Path,
    ) -> Result<TimelineArtifact> {
        log::info!("Generating audio for \"{}\" into {}", content.info.title, output_dir.display());
        let tracker = self.progress_tracker.as_ref();

        self.step(ProcessStep::Validation, "Проверка контента и профиля");
        content.validate()?;
        let profile = self.resolve_profile(content.info.part)?;
        let plan = plan_steps(content, &profile)?;
        self.step_done(format!("Шагов: {}, клипов: {}", plan.steps.len(), plan.clips.len()));

        self.step(ProcessStep::SpeechSynthesis, "Назначение голосов");
        let speech = &self.settings.speech;
        let speakers = content.speakers();
        let assignments = VoiceAssigner::new(speech).assign_all(&speakers);
        for assignment in assignments.iter() {
            log::info!(
                "Voice for {}: {} ({}, {})",
                assignment.speaker,
                assignment.voice,
                assignment.engine.as_str(),
                assignment.gender.as_str()
            );
        }

        let mut synthesizer = Synthesizer::new(provider, speech.clone());
        if speech.use_caching {
            synthesizer = synthesizer.with_cache(SynthesisCache::new(speech)?);
        }
        let asset_dir = &self.settings.paths.asset_dir;
        let asset_dir = asset_dir.is_dir().then_some(asset_dir.as_path());
        let clips = synthesizer
            .synthesize_clips(&plan.clips, &assignments, output_dir, asset_dir, tracker)
            .await?;

        self.step(ProcessStep::TimelineBuild, "Построение таймлайна");
        let timeline = resolve_plan(&plan, &clip_durations(&clips))?;
        let records = clips.iter().map(|c| (c.id.clone(), c.record(output_dir))).collect();
        let artifact = TimelineArtifact::new(
            content.info.title.clone(),
            content.info.part,
            timeline,
            assignments.into_vec(),
            records,
        );
        artifact.verify()?;
        artifact.save(&output_dir.join(ARTIFACT_FILE)).await?;
        self.step_done(format!("Длительность: {:.3}s", artifact.timeline.total_duration));

        Ok(artifact)
    }

    /// Воспроизвести таймлайн на рендерере и записать видеоряд
    pub async fn record<R: VisualRenderer>(
        &self,
        artifact: &TimelineArtifact,
        renderer: R,
        cancel: CancellationToken,
    ) -> Result<(PlaybackReport, R)> {
        self.step(ProcessStep::Recording, "Калибровка и воспроизведение");
        let mut session = PlaybackSession::new(&artifact.timeline, renderer, self.settings.playback.clone())
            .with_cancellation(cancel);
        let report = session.run().await?;
        self.step_done(format!(
            "Записано {:.3}s, средняя ошибка {:.3}s",
            report.track.duration, report.stats.mean_abs_error
        ));
        Ok((report, session.into_renderer()))
    }

    /// Сохранить отчет воспроизведения и описание видеоряда рядом с артефактом
    pub async fn save_playback(&self, report: &PlaybackReport, output_dir: &Path) -> Result<()> {
        tokio::fs::create_dir_all(output_dir).await?;
        let report_json = serde_json::to_string_pretty(report)?;
        tokio::fs::write(output_dir.join(PLAYBACK_REPORT_FILE), report_json).await?;
        let track_json = serde_json::to_string_pretty(&report.track)?;
        tokio::fs::write(output_dir.join(RECORDING_FILE), track_json).await?;
        Ok(())
    }

    pub async fn load_recording(&self, output_dir: &Path) -> Result<RecordedTrack> {
        let raw = tokio::fs::read_to_string(output_dir.join(RECORDING_FILE)).await?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Собрать итоговую аудиодорожку в `base_dir/master.wav`
    pub async fn assemble(&self, artifact: &TimelineArtifact, base_dir: &Path) -> Result<AssemblyReport> {
        self.step(ProcessStep::AudioAssembly, "Сборка аудиодорожки");
        let report = assemble_master_track(
            artifact,
            base_dir,
            &base_dir.join(MASTER_FILE),
            &self.settings.assembly,
        )
        .await?;
        self.step_done(format!("Длительность дорожки: {:.3}s", report.actual_duration));
        Ok(report)
    }

    /// Сверить видеоряд и объединить его с собранной дорожкой
    pub async fn mux(
        &self,
        toolkit: &dyn MediaToolkit,
        artifact: &TimelineArtifact,
        recorded: &RecordedTrack,
        assembly: &AssemblyReport,
        output: &Path,
    ) -> Result<MuxReport> {
        self.step(ProcessStep::Muxing, "Финальное кодирование");
        let report = media::video::mux_final(
            toolkit,
            &recorded.path,
            artifact.timeline.total_duration,
            &assembly.path,
            assembly.actual_duration,
            self.settings.playback.visual_duration_tolerance,
            output,
        )
        .await?;
        if let Some(t) = &self.progress_tracker {
            t.complete();
        }
        log::info!("Final video written to {} ({:.3}s)", report.output.display(), report.duration);
        Ok(report)
    }
}
