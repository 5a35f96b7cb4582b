//! Модуль конфигурации narration-sync
//!
//! Содержит настройки конвейера (`Settings`, YAML) и профили таймингов
//! (`TimingProfile`), которые загружаются по одному на тип части экзамена.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, SyncError};

/// Переменная окружения, переопределяющая ключ API синтеза речи
pub const API_KEY_ENV: &str = "NARRATION_SYNC_API_KEY";

/// Уровень качества движка синтеза речи
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum EngineTier {
    /// Генеративный движок, лучшее качество
    Generative,
    /// Нейронный движок
    Neural,
    /// Стандартный движок
    Standard,
}

impl Default for EngineTier {
    fn default() -> Self {
        Self::Standard
    }
}

impl EngineTier {
    /// Получить строковое представление движка
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Generative => "generative",
            Self::Neural => "neural",
            Self::Standard => "standard",
        }
    }

    /// Ранг качества: чем меньше, тем лучше
    pub fn rank(&self) -> u8 {
        match self {
            Self::Generative => 0,
            Self::Neural => 1,
            Self::Standard => 2,
        }
    }

    /// Уровень, на который откатывается синтез при сбое
    pub fn lower(&self) -> Self {
        Self::Standard
    }
}

/// Пол говорящего
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    #[serde(alias = "f", alias = "weiblich", alias = "w")]
    Female,
    #[serde(alias = "m", alias = "männlich", alias = "maennlich")]
    Male,
}

impl Default for Gender {
    fn default() -> Self {
        Self::Female
    }
}

impl Gender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Female => "female",
            Self::Male => "male",
        }
    }
}

/// Пара голос + движок
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct VoiceChoice {
    pub voice: String,
    #[serde(default)]
    pub engine: EngineTier,
}

impl VoiceChoice {
    pub fn new(voice: impl Into<String>, engine: EngineTier) -> Self {
        Self {
            voice: voice.into(),
            engine,
        }
    }
}

/// Настройки синтеза речи
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeechSettings {
    /// Адрес HTTP шлюза синтеза речи
    pub endpoint: String,
    /// Ключ API (переопределяется переменной окружения)
    pub api_key: Option<String>,
    /// Таймаут одного запроса в секундах
    pub request_timeout_secs: u64,
    /// Максимальное количество одновременных запросов к API
    pub max_concurrent_requests: usize,
    /// Формат аудио, запрашиваемый у сервиса
    pub output_format: String,
    /// Частота дискретизации, запрашиваемая у сервиса
    pub sample_rate: u32,
    /// Голос диктора для служебных фраз
    pub narrator: VoiceChoice,
    /// Пул женских голосов
    pub female_voices: Vec<VoiceChoice>,
    /// Пул мужских голосов
    pub male_voices: Vec<VoiceChoice>,
    /// Запасной голос для каждого основного
    pub fallback_voices: BTreeMap<String, String>,
    /// Последняя ступень лестницы запасных голосов
    pub last_resort: VoiceChoice,
    /// Пол по умолчанию, если его не удалось определить
    pub default_gender: Gender,
    /// Использовать кэширование
    pub use_caching: bool,
    /// Директория для кэша
    pub cache_dir: Option<PathBuf>,
}

impl Default for SpeechSettings {
    fn default() -> Self {
        let mut fallback_voices = BTreeMap::new();
        fallback_voices.insert("Vicki".to_string(), "Marlene".to_string());
        fallback_voices.insert("Daniel".to_string(), "Hans".to_string());

        Self {
            endpoint: "http://127.0.0.1:8080/v1/speech".to_string(),
            api_key: None,
            request_timeout_secs: 60,
            max_concurrent_requests: 4,
            output_format: "mp3".to_string(),
            sample_rate: 22050,
            narrator: VoiceChoice::new("Vicki", EngineTier::Generative),
            female_voices: vec![
                VoiceChoice::new("Vicki", EngineTier::Generative),
                VoiceChoice::new("Marlene", EngineTier::Standard),
            ],
            male_voices: vec![
                VoiceChoice::new("Daniel", EngineTier::Generative),
                VoiceChoice::new("Hans", EngineTier::Standard),
            ],
            fallback_voices,
            last_resort: VoiceChoice::new("Marlene", EngineTier::Standard),
            default_gender: Gender::Female,
            use_caching: true,
            cache_dir: None,
        }
    }
}

impl SpeechSettings {
    /// Пул голосов для указанного пола
    pub fn pool(&self, gender: Gender) -> &[VoiceChoice] {
        match gender {
            Gender::Female => &self.female_voices,
            Gender::Male => &self.male_voices,
        }
    }

    /// Пол голоса по его присутствию в пулах
    pub fn pool_gender(&self, voice: &str) -> Option<Gender> {
        if self.female_voices.iter().any(|v| v.voice.eq_ignore_ascii_case(voice)) {
            Some(Gender::Female)
        } else if self.male_voices.iter().any(|v| v.voice.eq_ignore_ascii_case(voice)) {
            Some(Gender::Male)
        } else {
            None
        }
    }
}

/// Настройки сессии воспроизведения
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackSettings {
    /// Интервалы калибровочных замеров в секундах
    pub calibration_probes: Vec<f64>,
    /// Допустимый разброс задержек между замерами
    pub stability_threshold: f64,
    /// Точность ожидания целевого времени шага
    pub sync_tolerance: f64,
    /// Вес последнего измерения при обновлении дрейфа
    pub drift_weight: f64,
    /// Минимальный интервал опроса при ожидании
    pub min_poll_interval: f64,
    /// Максимальный интервал опроса при ожидании
    pub max_poll_interval: f64,
    /// Допуск на длительность записанного видео
    pub visual_duration_tolerance: f64,
}

impl Default for PlaybackSettings {
    fn default() -> Self {
        Self {
            calibration_probes: vec![0.5, 1.0, 1.5, 2.0, 3.0, 5.0],
            stability_threshold: 0.1,
            sync_tolerance: 0.02,
            drift_weight: 0.3,
            min_poll_interval: 0.002,
            max_poll_interval: 0.01,
            visual_duration_tolerance: 0.5,
        }
    }
}

/// Настройки сборки итоговой аудиодорожки
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AssemblySettings {
    /// Частота дискретизации итоговой дорожки
    pub sample_rate: u32,
    /// Допуск на расхождение с длительностью таймлайна
    pub duration_tolerance: f64,
}

impl Default for AssemblySettings {
    fn default() -> Self {
        Self {
            sample_rate: 22050,
            duration_tolerance: 0.1,
        }
    }
}

/// Настройки внешних медиа-инструментов
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaSettings {
    pub ffmpeg: String,
    pub ffprobe: String,
    /// Таймаут одной команды в секундах
    pub command_timeout_secs: u64,
    pub video_codec: String,
    pub audio_codec: String,
    pub preset: String,
    pub crf: u32,
}

impl Default for MediaSettings {
    fn default() -> Self {
        Self {
            ffmpeg: "ffmpeg".to_string(),
            ffprobe: "ffprobe".to_string(),
            command_timeout_secs: 600,
            video_codec: "libx264".to_string(),
            audio_codec: "aac".to_string(),
            preset: "medium".to_string(),
            crf: 23,
        }
    }
}

/// Настройки внешнего процесса-рендерера
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererSettings {
    /// Команда запуска: программа и аргументы
    pub command: Vec<String>,
    /// Таймаут ответа на служебные команды в секундах
    pub reply_timeout_secs: u64,
}

impl Default for RendererSettings {
    fn default() -> Self {
        Self {
            command: vec!["node".to_string(), "renderer/bridge.js".to_string()],
            reply_timeout_secs: 60,
        }
    }
}

/// Пути к данным
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathSettings {
    /// Директория с профилями `part<N>.yaml`
    pub profile_dir: PathBuf,
    /// Директория результатов
    pub output_dir: PathBuf,
    /// Директория с заранее записанными клипами вступления и завершения
    pub asset_dir: PathBuf,
}

impl Default for PathSettings {
    fn default() -> Self {
        Self {
            profile_dir: PathBuf::from("config/parts"),
            output_dir: PathBuf::from("output"),
            asset_dir: PathBuf::from("assets/standard-audio"),
        }
    }
}

/// Конфигурация конвейера
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub speech: SpeechSettings,
    pub playback: PlaybackSettings,
    pub assembly: AssemblySettings,
    pub media: MediaSettings,
    pub renderer: RendererSettings,
    pub paths: PathSettings,
    /// Разрешить профиль таймингов по умолчанию, если файл профиля не найден
    pub allow_default_profile: bool,
}

impl Settings {
    /// Загрузить настройки из YAML файла и применить переменные окружения
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            SyncError::Configuration(format!("Cannot read settings {}: {}", path.display(), e))
        })?;
        let mut settings: Settings = serde_yaml::from_str(&raw)?;
        settings.apply_env();
        settings.validate()?;
        Ok(settings)
    }

    /// Переопределить значения из переменных окружения
    pub fn apply_env(&mut self) {
        if let Ok(key) = std::env::var(API_KEY_ENV) {
            if !key.trim().is_empty() {
                self.speech.api_key = Some(key);
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.speech.female_voices.is_empty() && self.speech.male_voices.is_empty() {
            return Err(SyncError::Configuration("Voice pools are empty".to_string()));
        }
        if self.speech.max_concurrent_requests == 0 {
            return Err(SyncError::Configuration(
                "max_concurrent_requests must be positive".to_string(),
            ));
        }
        if self.assembly.sample_rate == 0 {
            return Err(SyncError::Configuration("Assembly sample rate must be positive".to_string()));
        }
        let playback = &self.playback;
        if !(0.0..=1.0).contains(&playback.drift_weight) {
            return Err(SyncError::Configuration(format!(
                "drift_weight must be within [0, 1], got {}",
                playback.drift_weight
            )));
        }
        if playback.min_poll_interval <= 0.0 || playback.max_poll_interval < playback.min_poll_interval {
            return Err(SyncError::Configuration("Invalid poll interval bounds".to_string()));
        }
        if playback.calibration_probes.iter().any(|p| !p.is_finite() || *p <= 0.0) {
            return Err(SyncError::Configuration(
                "Calibration probe intervals must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Паузы и буферы профиля
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingValues {
    /// Время на размышление после прослушивания
    pub thinking_time: f64,
    /// Пауза между повторами
    pub pause_between_plays: f64,
    /// Минимальная длительность перехода между заданиями
    pub transition_duration: f64,
    /// Пауза после объявления правильного ответа
    pub answer_reveal_pause: f64,
    /// Тишина после инструкции
    pub instructions_buffer: f64,
    /// Тишина перед началом задания
    pub task_start_buffer: f64,
}

impl Default for TimingValues {
    fn default() -> Self {
        Self {
            thinking_time: 5.0,
            pause_between_plays: 3.0,
            transition_duration: 2.5,
            answer_reveal_pause: 2.0,
            instructions_buffer: 2.0,
            task_start_buffer: 2.0,
        }
    }
}

/// Количество воспроизведений
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayCounts {
    pub text_play_count: u32,
    pub question_play_count: u32,
}

impl Default for PlayCounts {
    fn default() -> Self {
        Self {
            text_play_count: 2,
            question_play_count: 1,
        }
    }
}

/// Какие служебные шаги попадают в таймлайн
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StructureFlags {
    pub lead_in: bool,
    pub instructions: bool,
    pub answer_reveal: bool,
    pub closing_transition: bool,
    pub lead_out: bool,
    /// Озвучивать вопрос после текста задания
    pub question_prompt: bool,
}

impl Default for StructureFlags {
    fn default() -> Self {
        Self {
            lead_in: true,
            instructions: true,
            answer_reveal: true,
            closing_transition: true,
            lead_out: true,
            question_prompt: false,
        }
    }
}

/// Переопределения для отдельного задания
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskOverride {
    pub thinking_time: Option<f64>,
    pub answer_reveal_pause: Option<f64>,
    pub task_start_buffer: Option<f64>,
    pub repeat_count: Option<u32>,
}

/// Тайминги одного задания с учетом переопределений
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TaskTiming {
    pub task_start_buffer: f64,
    pub repeat_count: u32,
    pub repeat_pause: f64,
    pub thinking_time: f64,
    pub answer_reveal_pause: f64,
    pub question_repeat_count: u32,
}

/// Профиль таймингов для одного типа части
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingProfile {
    pub name: String,
    pub timing: TimingValues,
    pub audio: PlayCounts,
    pub structure: StructureFlags,
    /// Переопределения по номеру задания
    pub overrides: BTreeMap<u32, TaskOverride>,
}

impl Default for TimingProfile {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            timing: TimingValues::default(),
            audio: PlayCounts::default(),
            structure: StructureFlags::default(),
            overrides: BTreeMap::new(),
        }
    }
}

impl TimingProfile {
    /// Имя файла профиля для части
    pub fn file_name(part: u32) -> String {
        format!("part{}.yaml", part)
    }

    /// Загрузить профиль из файла
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            SyncError::Configuration(format!("Cannot read timing profile {}: {}", path.display(), e))
        })?;
        let mut profile: TimingProfile = serde_yaml::from_str(&raw).map_err(|e| {
            SyncError::Configuration(format!("Invalid timing profile {}: {}", path.display(), e))
        })?;
        if profile.name == "default" {
            if let Some(stem) = path.file_stem() {
                profile.name = stem.to_string_lossy().to_string();
            }
        }
        profile.validate()?;
        Ok(profile)
    }

    /// Найти профиль для части.
    ///
    /// Отсутствующий файл заменяется значениями по умолчанию только при
    /// `allow_defaults`; некорректный файл всегда является ошибкой.
    pub fn resolve(part: u32, profile_dir: &Path, allow_defaults: bool) -> Result<Self> {
        let path = profile_dir.join(Self::file_name(part));
        if path.exists() {
            log::info!("Loading timing profile {}", path.display());
            return Self::load(&path);
        }
        if allow_defaults {
            log::warn!("Timing profile {} not found, using defaults", path.display());
            Ok(Self {
                name: format!("part{}-default", part),
                ..Self::default()
            })
        } else {
            Err(SyncError::Configuration(format!(
                "Timing profile {} not found and defaults are disabled",
                path.display()
            )))
        }
    }

    pub fn validate(&self) -> Result<()> {
        let t = &self.timing;
        let values = [
            ("thinking_time", t.thinking_time),
            ("pause_between_plays", t.pause_between_plays),
            ("transition_duration", t.transition_duration),
            ("answer_reveal_pause", t.answer_reveal_pause),
            ("instructions_buffer", t.instructions_buffer),
            ("task_start_buffer", t.task_start_buffer),
        ];
        for (name, value) in values {
            check_duration(&self.name, name, value)?;
        }
        if self.audio.text_play_count == 0 || self.audio.question_play_count == 0 {
            return Err(SyncError::Configuration(format!(
                "Profile {}: play counts must be at least 1",
                self.name
            )));
        }
        for (task, o) in &self.overrides {
            let label = format!("overrides.{}", task);
            for value in [o.thinking_time, o.answer_reveal_pause, o.task_start_buffer].into_iter().flatten() {
                check_duration(&self.name, &label, value)?;
            }
            if o.repeat_count == Some(0) {
                return Err(SyncError::Configuration(format!(
                    "Profile {}: {}.repeat_count must be at least 1",
                    self.name, label
                )));
            }
        }
        Ok(())
    }

    /// Тайминги задания с примененными переопределениями
    pub fn for_task(&self, task_number: u32) -> TaskTiming {
        let o = self.overrides.get(&task_number).cloned().unwrap_or_default();
        TaskTiming {
            task_start_buffer: o.task_start_buffer.unwrap_or(self.timing.task_start_buffer),
            repeat_count: o.repeat_count.unwrap_or(self.audio.text_play_count),
            repeat_pause: self.timing.pause_between_plays,
            thinking_time: o.thinking_time.unwrap_or(self.timing.thinking_time),
            answer_reveal_pause: o.answer_reveal_pause.unwrap_or(self.timing.answer_reveal_pause),
            question_repeat_count: self.audio.question_play_count,
        }
    }
}

fn check_duration(profile: &str, name: &str, value: f64) -> Result<()> {
    if !value.is_finite() || value < 0.0 {
        return Err(SyncError::Configuration(format!(
            "Profile {}: {} must be a non-negative number, got {}",
            profile, name, value
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_profile_requires_defaults() {
        let dir = tempfile::tempdir().unwrap();

        let err = TimingProfile::resolve(3, dir.path(), false).unwrap_err();
        assert!(matches!(err, SyncError::Configuration(_)));

        let profile = TimingProfile::resolve(3, dir.path(), true).unwrap();
        assert_eq!(profile.timing, TimingValues::default());
        assert_eq!(profile.audio.text_play_count, 2);
    }

    #[test]
    fn test_profile_file_with_overrides() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("part2.yaml"),
            r#"
timing:
  thinking_time: 10.0
  answer_reveal_pause: 3.0
audio:
  text_play_count: 1
structure:
  lead_out: false
overrides:
  5:
    answer_reveal_pause: 1.0
"#,
        )
        .unwrap();

        let profile = TimingProfile::resolve(2, dir.path(), false).unwrap();
        assert_eq!(profile.name, "part2");
        assert_eq!(profile.timing.pause_between_plays, 3.0);
        assert!(!profile.structure.lead_out);
        assert!(profile.structure.lead_in);

        let regular = profile.for_task(4);
        assert_eq!(regular.thinking_time, 10.0);
        assert_eq!(regular.answer_reveal_pause, 3.0);
        assert_eq!(regular.repeat_count, 1);

        let last = profile.for_task(5);
        assert_eq!(last.answer_reveal_pause, 1.0);
        assert_eq!(last.thinking_time, 10.0);
    }

    #[test]
    fn test_invalid_profile_is_error_even_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("part1.yaml"), "timing:\n  thinking_time: -1.0\n").unwrap();

        let err = TimingProfile::resolve(1, dir.path(), true).unwrap_err();
        assert!(matches!(err, SyncError::Configuration(_)));
    }

    #[test]
    fn test_settings_defaults_and_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.yaml");
        std::fs::write(
            &path,
            "allow_default_profile: true\nassembly:\n  sample_rate: 24000\nspeech:\n  max_concurrent_requests: 2\n",
        )
        .unwrap();

        let settings = Settings::load(&path).unwrap();
        assert!(settings.allow_default_profile);
        assert_eq!(settings.assembly.sample_rate, 24000);
        assert_eq!(settings.assembly.duration_tolerance, 0.1);
        assert_eq!(settings.speech.max_concurrent_requests, 2);
        assert_eq!(settings.playback.calibration_probes.len(), 6);
        assert_eq!(settings.speech.pool_gender("hans"), Some(Gender::Male));
    }

    #[test]
    fn test_gender_aliases() {
        let g: Gender = serde_json::from_str("\"weiblich\"").unwrap();
        assert_eq!(g, Gender::Female);
        let g: Gender = serde_json::from_str("\"male\"").unwrap();
        assert_eq!(g, Gender::Male);
    }
}
