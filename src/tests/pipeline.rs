use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::config::Settings;
use crate::content::tests::sample_spec;
use crate::notification::MemoryProgressObserver;
use crate::playback::{RecordedTrack, RenderFailure, VisualRenderer};
use crate::progress::ProcessStep;
use crate::tests::support::{wav_bytes, ScriptedProvider};
use crate::timeline::artifact::ARTIFACT_FILE;
use crate::timeline::{StepKind, TimelineArtifact, TimelineStep};
use crate::NarrationSync;

#[derive(Default)]
struct InstantRenderer {
    shown: Vec<usize>,
}

#[async_trait]
impl VisualRenderer for InstantRenderer {
    async fn start_recording(&mut self) -> Result<(), RenderFailure> {
        Ok(())
    }

    async fn apply(&mut self, step: &TimelineStep) -> Result<(), RenderFailure> {
        self.shown.push(step.index);
        Ok(())
    }

    async fn complete(&mut self) -> Result<(), RenderFailure> {
        Ok(())
    }

    async fn stop_recording(&mut self) -> Result<RecordedTrack, RenderFailure> {
        Ok(RecordedTrack {
            path: PathBuf::from("recording.webm"),
            duration: 0.0,
        })
    }

    async fn discard(&mut self) -> Result<(), RenderFailure> {
        Ok(())
    }
}

fn test_settings(root: &std::path::Path) -> Settings {
    let mut settings = Settings::default();
    settings.speech.output_format = "wav".to_string();
    settings.speech.use_caching = false;
    settings.paths.profile_dir = root.join("profiles");
    settings.paths.asset_dir = root.join("assets");
    settings.paths.output_dir = root.join("output");
    settings.allow_default_profile = true;
    settings
}

#[tokio::test]
async fn test_generate_assemble_and_play_share_one_timeline() {
    let root = tempfile::tempdir().unwrap();
    let observer = MemoryProgressObserver::new();
    let history = observer.handle();

    let mut sync = NarrationSync::new(test_settings(root.path()));
    sync.add_observer(Box::new(observer));

    let content = sample_spec();
    let out_dir = sync.output_dir_for(&content);
    assert!(out_dir.ends_with("teil1_ubung2"));

    let provider = Arc::new(ScriptedProvider::always(wav_bytes(1.0, 16000)));
    let artifact = sync.generate_audio(&content, provider.clone(), &out_dir).await.unwrap();

    let timeline = &artifact.timeline;
    assert!(timeline.check_contiguity().is_ok());
    assert!(matches!(timeline.steps[0].kind, StepKind::LeadIn));
    assert!(matches!(timeline.steps.last().unwrap().kind, StepKind::LeadOut));
    let reveals = timeline
        .steps
        .iter()
        .filter(|s| matches!(s.kind, StepKind::AnswerReveal { .. }))
        .count();
    assert_eq!(reveals, 2);
    let sum: f64 = timeline.steps.iter().map(|s| s.total_duration).sum();
    assert!((sum - timeline.total_duration).abs() < 1e-9);

    // все клипы, включая вступление, синтезированы один раз
    assert_eq!(provider.calls().len(), artifact.clips.len());
    assert_eq!(artifact.voice_assignments.len(), 2);
    assert_eq!(artifact.voice_assignments[0].speaker, "Frau Schulz");

    let loaded = TimelineArtifact::load(&out_dir.join(ARTIFACT_FILE)).await.unwrap();
    assert_eq!(loaded, artifact);

    let assembly = sync.assemble(&loaded, &out_dir).await.unwrap();
    assert!(assembly.path.exists());
    assert!(assembly.overruns.is_empty());
    assert!(assembly.warning.is_none());
    assert!((assembly.actual_duration - timeline.total_duration).abs() < 0.1);

    {
        let updates = history.lock();
        assert!(updates.iter().any(|u| u.step == ProcessStep::SpeechSynthesis.as_str()));
        assert!(updates.iter().any(|u| u.step == ProcessStep::AudioAssembly.as_str()));
    }

    tokio::time::pause();
    let (report, renderer) = sync
        .record(&loaded, InstantRenderer::default(), CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(report.steps.len(), timeline.len());
    assert_eq!(renderer.shown, (0..timeline.len()).collect::<Vec<_>>());
    for (measured, step) in report.steps.iter().zip(&timeline.steps) {
        assert_eq!(measured.start_time, step.start_time);
        assert!(measured.error >= -1e-9);
    }
}

#[tokio::test]
async fn test_missing_profile_without_defaults_fails_before_synthesis() {
    let root = tempfile::tempdir().unwrap();
    let mut settings = test_settings(root.path());
    settings.allow_default_profile = false;
    let sync = NarrationSync::new(settings);

    let provider = Arc::new(ScriptedProvider::always(wav_bytes(1.0, 16000)));
    let err = sync
        .generate_audio(&sample_spec(), provider.clone(), root.path())
        .await
        .unwrap_err();
    assert!(err.is_input_error());
    assert!(provider.calls().is_empty());
}

#[test]
fn test_plan_estimates_without_provider() {
    let root = tempfile::tempdir().unwrap();
    let sync = NarrationSync::new(test_settings(root.path()));
    let estimate = sync.plan(&sample_spec()).unwrap();
    assert!(estimate.total_seconds > 0.0);
    assert!(estimate.words > 0);
}
