//! Синтез клипов с лестницей запасных голосов
//!
//! На каждый клип делается основная попытка и ровно три запасные:
//! тот же голос на нижнем движке, запасной голос того же пола на нижнем
//! движке, последний голос из настроек. Длительность всегда измеряется по
//! полученному аудио.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use futures::future::try_join_all;
use once_cell::sync::Lazy;
use regex::Regex;
use tokio::sync::Semaphore;

use crate::config::{EngineTier, Gender, SpeechSettings, VoiceChoice};
use crate::error::{Result, SyncError};
use crate::media::audio;
use crate::progress::ProgressTracker;
use crate::timeline::builder::{ClipRequest, ClipVoice};
use crate::timeline::{ClipId, ClipRecord};
use crate::tts::cache::SynthesisCache;
use crate::tts::provider::{ProviderError, ProviderErrorKind, SpeechProvider};
use crate::tts::voices::{voice_gender, VoiceAssignments};

/// Директория клипов внутри директории результатов
pub const CLIPS_DIR: &str = "clips";
/// Расширения заранее записанных клипов
const ASSET_EXTENSIONS: &[&str] = &["mp3", "wav", "m4a"];

static TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]*>").expect("valid regex"));

/// Подготовка текста для TTS
pub fn prepare_text(text: &str) -> String {
    let text = TAG_RE.replace_all(text, "");
    text.replace("&nbsp;", " ")
        .replace("&amp;", "&")
        .replace("&quot;", "\"")
        .split_whitespace()
        .collect::<Vec<&str>>()
        .join(" ")
}

/// Результат синтеза одного текста
#[derive(Debug, Clone)]
pub struct Synthesis {
    pub audio: Bytes,
    pub duration: f64,
    pub voice: String,
    pub engine: EngineTier,
    pub attempts: usize,
}

/// Клип, записанный на диск
#[derive(Debug, Clone, PartialEq)]
pub struct SynthesizedClip {
    pub id: ClipId,
    pub path: PathBuf,
    pub duration: f64,
    pub voice: String,
    pub engine: EngineTier,
}

impl SynthesizedClip {
    /// Запись для артефакта с путем относительно `base_dir`
    pub fn record(&self, base_dir: &Path) -> ClipRecord {
        let file = self
            .path
            .strip_prefix(base_dir)
            .map(Path::to_path_buf)
            .unwrap_or_else(|_| self.path.clone());
        ClipRecord {
            file,
            duration: self.duration,
            voice: self.voice.clone(),
            engine: self.engine,
        }
    }
}

/// Адаптер синтеза речи
pub struct Synthesizer<P: SpeechProvider> {
    provider: Arc<P>,
    settings: SpeechSettings,
    cache: Option<SynthesisCache>,
}

impl<P: SpeechProvider + 'static> Synthesizer<P> {
    pub fn new(provider: Arc<P>, settings: SpeechSettings) -> Self {
        Self {
            provider,
            settings,
            cache: None,
        }
    }

    pub fn with_cache(mut self, cache: SynthesisCache) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Лестница попыток: основная и три запасные
    pub fn fallback_ladder(&self, primary: &VoiceChoice, gender: Gender) -> [VoiceChoice; 4] {
        let lower = primary.engine.lower();
        [
            primary.clone(),
            VoiceChoice::new(primary.voice.clone(), lower),
            VoiceChoice::new(self.fallback_voice(&primary.voice, gender), lower),
            self.settings.last_resort.clone(),
        ]
    }

    fn fallback_voice(&self, voice: &str, gender: Gender) -> String {
        if let Some(mapped) = self.settings.fallback_voices.get(voice) {
            return mapped.clone();
        }
        self.settings
            .pool(gender)
            .iter()
            .find(|v| !v.voice.eq_ignore_ascii_case(voice))
            .map(|v| v.voice.clone())
            .unwrap_or_else(|| self.settings.last_resort.voice.clone())
    }

    /// Синтезировать текст заданным голосом с откатом по лестнице
    pub async fn synthesize(&self, clip: &str, text: &str, choice: &VoiceChoice, gender: Gender) -> Result<Synthesis> {
        let text = prepare_text(text);
        if text.is_empty() {
            return Err(SyncError::Synthesis {
                clip: clip.to_string(),
                attempts: 0,
                message: "nothing to synthesize".to_string(),
            });
        }

        let ladder = self.fallback_ladder(choice, gender);
        let mut last_error = String::new();

        for (i, attempt) in ladder.iter().enumerate() {
            if i > 0 {
                log::warn!(
                    "Clip {}: falling back to {} ({}) after: {}",
                    clip,
                    attempt.voice,
                    attempt.engine.as_str(),
                    last_error
                );
            }

            match self.attempt(&text, attempt).await {
                Ok((audio, duration)) => {
                    return Ok(Synthesis {
                        audio,
                        duration,
                        voice: attempt.voice.clone(),
                        engine: attempt.engine,
                        attempts: i + 1,
                    });
                }
                Err(e) if e.kind.aborts_fallback() => {
                    log::error!("Clip {}: provider refused credentials: {}", clip, e.message);
                    return Err(SyncError::Synthesis {
                        clip: clip.to_string(),
                        attempts: i + 1,
                        message: e.to_string(),
                    });
                }
                Err(e) => last_error = e.to_string(),
            }
        }

        log::error!("Clip {}: all {} synthesis attempts failed", clip, ladder.len());
        Err(SyncError::Synthesis {
            clip: clip.to_string(),
            attempts: ladder.len(),
            message: last_error,
        })
    }

    async fn attempt(&self, text: &str, choice: &VoiceChoice) -> std::result::Result<(Bytes, f64), ProviderError> {
        if let Some(cache) = &self.cache {
            if let Some(audio) = cache.get(text, &choice.voice, choice.engine).await {
                match self.measure(&audio) {
                    Ok(duration) => return Ok((audio, duration)),
                    Err(e) => {
                        log::warn!(
                            "Dropping unreadable cache entry for {} ({}): {}",
                            choice.voice,
                            choice.engine.as_str(),
                            e.message
                        );
                        if let Err(e) = cache.remove(text, &choice.voice, choice.engine).await {
                            log::warn!("Failed to remove cache entry: {}", e);
                        }
                    }
                }
            }
        }

        let audio = self.provider.synthesize(text, &choice.voice, choice.engine).await?;
        let duration = self.measure(&audio)?;

        if let Some(cache) = &self.cache {
            if let Err(e) = cache.put(text, &choice.voice, choice.engine, &audio).await {
                log::warn!("Failed to store clip in cache: {}", e);
            }
        }
        Ok((audio, duration))
    }

    fn measure(&self, audio: &[u8]) -> std::result::Result<f64, ProviderError> {
        let duration = audio::measure_duration(audio, Some(&self.settings.output_format))
            .map_err(|e| ProviderError::new(ProviderErrorKind::EmptyAudio, e.to_string()))?;
        if duration <= 0.0 {
            return Err(ProviderError::new(ProviderErrorKind::EmptyAudio, "zero-length audio"));
        }
        Ok(duration)
    }

    /// Выбор голоса для клипа
    fn voice_for(&self, request: &ClipRequest, assignments: &VoiceAssignments) -> (VoiceChoice, Gender) {
        let narrator = &self.settings.narrator;
        let narrator_gender = voice_gender(&narrator.voice, &self.settings).unwrap_or(self.settings.default_gender);
        match &request.voice {
            ClipVoice::Narrator => (narrator.clone(), narrator_gender),
            ClipVoice::Speaker(speaker) => match assignments.get(&speaker.name) {
                Some(a) => (a.choice(), a.gender),
                None => {
                    log::warn!("No voice assigned to '{}', using narrator", speaker.name);
                    (narrator.clone(), narrator_gender)
                }
            },
        }
    }

    /// Синтезировать все клипы плана в `output_dir/clips`.
    ///
    /// Голоса уже назначены, поэтому запросы можно выполнять параллельно.
    /// Первая ошибка останавливает весь пакет.
    pub async fn synthesize_clips(
        &self,
        requests: &[ClipRequest],
        assignments: &VoiceAssignments,
        output_dir: &Path,
        asset_dir: Option<&Path>,
        tracker: Option<&ProgressTracker>,
    ) -> Result<Vec<SynthesizedClip>> {
        let clips_dir = output_dir.join(CLIPS_DIR);
        tokio::fs::create_dir_all(&clips_dir).await?;

        let semaphore = Arc::new(Semaphore::new(self.settings.max_concurrent_requests.max(1)));
        let completed = AtomicUsize::new(0);
        let total = requests.len().max(1);

        let tasks = requests.iter().map(|request| {
            let semaphore = semaphore.clone();
            let clips_dir = clips_dir.clone();
            let completed = &completed;
            async move {
                let _permit = semaphore
                    .acquire()
                    .await
                    .map_err(|e| SyncError::Synthesis {
                        clip: request.id.to_string(),
                        attempts: 0,
                        message: e.to_string(),
                    })?;

                let clip = match self.copy_asset(request, &clips_dir, asset_dir).await? {
                    Some(clip) => clip,
                    None => {
                        let (choice, gender) = self.voice_for(request, assignments);
                        let synthesis = self
                            .synthesize(request.id.as_str(), &request.text, &choice, gender)
                            .await?;
                        let path = clips_dir.join(format!("{}.{}", request.id, self.settings.output_format));
                        tokio::fs::write(&path, &synthesis.audio).await?;
                        SynthesizedClip {
                            id: request.id.clone(),
                            path,
                            duration: synthesis.duration,
                            voice: synthesis.voice,
                            engine: synthesis.engine,
                        }
                    }
                };

                let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
                log::info!("Clip {} ready: {:.3}s ({})", clip.id, clip.duration, clip.voice);
                if let Some(t) = tracker {
                    t.update_step_progress(
                        done as f32 / total as f32 * 100.0,
                        Some(format!("Синтезировано клипов: {}/{}", done, total)),
                    );
                }
                Ok::<_, SyncError>(clip)
            }
        });

        try_join_all(tasks).await
    }

    async fn copy_asset(
        &self,
        request: &ClipRequest,
        clips_dir: &Path,
        asset_dir: Option<&Path>,
    ) -> Result<Option<SynthesizedClip>> {
        let (Some(stem), Some(dir)) = (request.asset, asset_dir) else {
            return Ok(None);
        };

        for ext in ASSET_EXTENSIONS {
            let source = dir.join(format!("{}.{}", stem, ext));
            if !source.is_file() {
                continue;
            }
            let target = clips_dir.join(format!("{}.{}", request.id, ext));
            tokio::fs::copy(&source, &target).await?;
            let decoded = audio::decode_file(&target).await?;
            log::info!("Using pre-recorded {} for clip {}", source.display(), request.id);
            return Ok(Some(SynthesizedClip {
                id: request.id.clone(),
                path: target,
                duration: decoded.duration(),
                voice: "asset".to_string(),
                engine: EngineTier::Standard,
            }));
        }
        Ok(None)
    }
}

/// Длительности клипов для построения таймлайна
pub fn clip_durations(clips: &[SynthesizedClip]) -> BTreeMap<ClipId, f64> {
    clips.iter().map(|c| (c.id.clone(), c.duration)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::Speaker;
    use crate::tests::support::{wav_bytes, ScriptedProvider};
    use crate::tts::voices::VoiceAssigner;

    fn wav_settings() -> SpeechSettings {
        SpeechSettings {
            output_format: "wav".to_string(),
            ..SpeechSettings::default()
        }
    }

    #[test]
    fn test_prepare_text() {
        assert_eq!(prepare_text("  Hallo <b>Welt</b>&nbsp;! "), "Hallo Welt !");
    }

    #[tokio::test]
    async fn test_every_tier_failing_makes_exactly_four_calls() {
        let provider = Arc::new(ScriptedProvider::failing(ProviderErrorKind::Unavailable));
        let synth = Synthesizer::new(provider.clone(), wav_settings());
        let choice = VoiceChoice::new("Vicki", EngineTier::Generative);

        let err = synth.synthesize("narration_01", "Hallo", &choice, Gender::Female).await.unwrap_err();
        match err {
            SyncError::Synthesis { clip, attempts, .. } => {
                assert_eq!(clip, "narration_01");
                assert_eq!(attempts, 4);
            }
            other => panic!("unexpected error: {:?}", other),
        }

        let calls = provider.calls();
        assert_eq!(calls.len(), 4);
        assert_eq!(calls[0], ("Vicki".to_string(), EngineTier::Generative));
        assert_eq!(calls[1], ("Vicki".to_string(), EngineTier::Standard));
        assert_eq!(calls[2], ("Marlene".to_string(), EngineTier::Standard));
        assert_eq!(calls[3], ("Marlene".to_string(), EngineTier::Standard));
    }

    #[tokio::test]
    async fn test_fallback_success_reports_voice_used() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Err(ProviderErrorKind::Throttled),
            Err(ProviderErrorKind::Rejected),
            Ok(wav_bytes(1.25, 16000)),
        ]));
        let synth = Synthesizer::new(provider.clone(), wav_settings());
        let choice = VoiceChoice::new("Daniel", EngineTier::Generative);

        let result = synth.synthesize("narration_02", "Achtung", &choice, Gender::Male).await.unwrap();
        assert_eq!(result.voice, "Hans");
        assert_eq!(result.engine, EngineTier::Standard);
        assert_eq!(result.attempts, 3);
        assert!((result.duration - 1.25).abs() < 1e-3);
    }

    #[tokio::test]
    async fn test_auth_error_stops_ladder() {
        let provider = Arc::new(ScriptedProvider::failing(ProviderErrorKind::Auth));
        let synth = Synthesizer::new(provider.clone(), wav_settings());
        let choice = VoiceChoice::new("Vicki", EngineTier::Generative);

        let err = synth.synthesize("lead_in", "Hallo", &choice, Gender::Female).await.unwrap_err();
        assert!(matches!(err, SyncError::Synthesis { attempts: 1, .. }));
        assert_eq!(provider.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_undecodable_audio_counts_as_failure() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Ok(Bytes::from_static(b"garbage")),
            Ok(wav_bytes(0.5, 8000)),
        ]));
        let synth = Synthesizer::new(provider.clone(), wav_settings());
        let choice = VoiceChoice::new("Vicki", EngineTier::Generative);

        let result = synth.synthesize("reveal_01", "Antwort", &choice, Gender::Female).await.unwrap();
        assert_eq!(result.attempts, 2);
        assert!((result.duration - 0.5).abs() < 1e-3);
    }

    #[tokio::test]
    async fn test_cache_skips_provider_on_rerun() {
        let dir = tempfile::tempdir().unwrap();
        let cache = SynthesisCache::in_dir(dir.path(), "wav").unwrap();
        let provider = Arc::new(ScriptedProvider::new(vec![Ok(wav_bytes(0.75, 8000))]));
        let synth = Synthesizer::new(provider.clone(), wav_settings()).with_cache(cache);
        let choice = VoiceChoice::new("Vicki", EngineTier::Generative);

        synth.synthesize("a", "Hallo", &choice, Gender::Female).await.unwrap();
        let again = synth.synthesize("a", "Hallo", &choice, Gender::Female).await.unwrap();
        assert_eq!(provider.calls().len(), 1);
        assert!((again.duration - 0.75).abs() < 1e-3);
    }

    #[tokio::test]
    async fn test_corrupt_cache_entry_is_resynthesized_with_same_voice() {
        let dir = tempfile::tempdir().unwrap();
        let cache = SynthesisCache::in_dir(dir.path(), "wav").unwrap();
        cache
            .put("Hallo", "Vicki", EngineTier::Generative, b"RIFF\x00\x00")
            .await
            .unwrap();

        let provider = Arc::new(ScriptedProvider::always(wav_bytes(0.75, 8000)));
        let synth = Synthesizer::new(provider.clone(), wav_settings()).with_cache(cache.clone());
        let choice = VoiceChoice::new("Vicki", EngineTier::Generative);

        let result = synth.synthesize("a", "Hallo", &choice, Gender::Female).await.unwrap();
        assert_eq!((result.voice.as_str(), result.engine), ("Vicki", EngineTier::Generative));
        assert_eq!(result.attempts, 1);
        assert_eq!(provider.calls(), vec![("Vicki".to_string(), EngineTier::Generative)]);

        let repaired = cache.get("Hallo", "Vicki", EngineTier::Generative).await.unwrap();
        assert_eq!(repaired, wav_bytes(0.75, 8000));
    }

    #[tokio::test]
    async fn test_fatal_error_stops_remaining_clips() {
        let out = tempfile::tempdir().unwrap();
        let settings = SpeechSettings {
            max_concurrent_requests: 1,
            ..wav_settings()
        };
        let assignments = VoiceAssigner::new(&settings).assign_all(std::iter::empty::<&Speaker>());
        let requests: Vec<ClipRequest> = (1..=5)
            .map(|n| ClipRequest {
                id: ClipId::narration(n),
                text: format!("Satz {}", n),
                voice: ClipVoice::Narrator,
                asset: None,
            })
            .collect();

        let provider = Arc::new(ScriptedProvider::failing(ProviderErrorKind::Auth));
        let synth = Synthesizer::new(provider.clone(), settings);
        let err = synth
            .synthesize_clips(&requests, &assignments, out.path(), None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Synthesis { attempts: 1, .. }));
        assert_eq!(provider.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_synthesize_clips_uses_assignments_and_assets() {
        let out = tempfile::tempdir().unwrap();
        let assets = tempfile::tempdir().unwrap();
        std::fs::write(assets.path().join("lead_in.wav"), wav_bytes(2.0, 8000)).unwrap();

        let settings = wav_settings();
        let speaker = Speaker {
            name: "Herr Weber".to_string(),
            role: None,
            gender: None,
            voice_name: None,
            context: String::new(),
        };
        let assignments = VoiceAssigner::new(&settings).assign_all([&speaker]);

        let requests = vec![
            ClipRequest {
                id: ClipId::lead_in(),
                text: "Willkommen".to_string(),
                voice: ClipVoice::Narrator,
                asset: Some("lead_in"),
            },
            ClipRequest {
                id: ClipId::narration(1),
                text: "Guten Tag".to_string(),
                voice: ClipVoice::Speaker(speaker.clone()),
                asset: None,
            },
        ];

        let provider = Arc::new(ScriptedProvider::always(wav_bytes(1.0, 8000)));
        let synth = Synthesizer::new(provider.clone(), settings);
        let clips = synth
            .synthesize_clips(&requests, &assignments, out.path(), Some(assets.path()), None)
            .await
            .unwrap();

        assert_eq!(clips.len(), 2);
        assert_eq!(clips[0].voice, "asset");
        assert!((clips[0].duration - 2.0).abs() < 1e-3);
        assert_eq!(clips[1].voice, "Daniel");
        assert!(clips[1].path.exists());
        assert_eq!(provider.calls(), vec![("Daniel".to_string(), EngineTier::Generative)]);

        let record = clips[1].record(out.path());
        assert_eq!(record.file, PathBuf::from("clips/narration_01.wav"));
    }
}
