//! Выбор голосов для говорящих
//!
//! Пол говорящего определяется по приоритету: явное поле, таблица голосов,
//! ключевые слова в имени, роли и контексте, значение по умолчанию.
//! Голос назначается один раз при первом появлении говорящего и дальше
//! не меняется.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::config::{EngineTier, Gender, SpeechSettings, VoiceChoice};
use crate::content::Speaker;

/// Известные голоса и их пол
static VOICE_GENDERS: Lazy<HashMap<&'static str, Gender>> = Lazy::new(|| {
    HashMap::from([
        ("vicki", Gender::Female),
        ("marlene", Gender::Female),
        ("hannah", Gender::Female),
        ("daniel", Gender::Male),
        ("hans", Gender::Male),
    ])
});

const FEMALE_KEYWORDS: &[&str] = &[
    "bäckerei",
    "bibliothek",
    "friseurin",
    "kundin",
    "moderatorin",
    "verkäuferin",
    "mitarbeiterin",
    "lehrerin",
    "ärztin",
    "sekretärin",
];

const MALE_KEYWORDS: &[&str] = &[
    "trainer",
    "optiker",
    "verkäufer",
    "kunde",
    "moderator",
    "mitarbeiter",
    "lehrer",
    "arzt",
    "mechaniker",
    "techniker",
];

/// Откуда взят пол говорящего
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenderSource {
    Explicit,
    VoiceName,
    Keyword,
    Default,
}

/// Назначенный говорящему голос
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceAssignment {
    pub speaker: String,
    pub voice: String,
    pub engine: EngineTier,
    pub gender: Gender,
}

impl VoiceAssignment {
    pub fn choice(&self) -> VoiceChoice {
        VoiceChoice::new(self.voice.clone(), self.engine)
    }
}

fn keyword_gender(text: &str) -> Option<Gender> {
    let text = text.to_lowercase();
    if FEMALE_KEYWORDS.iter().any(|k| text.contains(k)) {
        return Some(Gender::Female);
    }
    if MALE_KEYWORDS.iter().any(|k| text.contains(k)) {
        return Some(Gender::Male);
    }
    None
}

fn pattern_gender(name: &str, role: &str) -> Option<Gender> {
    let name = name.to_lowercase();
    let role = role.to_lowercase();
    if name.contains("frau") || role.contains("frau") {
        return Some(Gender::Female);
    }
    if name.contains("herr") || role.contains("herr") || role.contains("mann") {
        return Some(Gender::Male);
    }
    if role.ends_with("in") {
        return Some(Gender::Female);
    }
    None
}

/// Пол по имени голоса: сначала пулы из настроек, потом общая таблица
pub fn voice_gender(voice: &str, settings: &SpeechSettings) -> Option<Gender> {
    settings
        .pool_gender(voice)
        .or_else(|| VOICE_GENDERS.get(voice.to_lowercase().as_str()).copied())
}

/// Определить пол говорящего
pub fn resolve_gender(speaker: &Speaker, settings: &SpeechSettings) -> (Gender, GenderSource) {
    if let Some(gender) = speaker.gender {
        return (gender, GenderSource::Explicit);
    }
    if let Some(gender) = speaker.voice_name.as_deref().and_then(|v| voice_gender(v, settings)) {
        return (gender, GenderSource::VoiceName);
    }

    let role = speaker.role.as_deref().unwrap_or("");
    let found = keyword_gender(&format!("{} {}", speaker.name, role))
        .or_else(|| pattern_gender(&speaker.name, role))
        .or_else(|| keyword_gender(&speaker.context));
    match found {
        Some(gender) => (gender, GenderSource::Keyword),
        None => (settings.default_gender, GenderSource::Default),
    }
}

/// Назначения голосов в порядке первого появления говорящих
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VoiceAssignments {
    entries: Vec<VoiceAssignment>,
}

impl VoiceAssignments {
    pub fn get(&self, speaker: &str) -> Option<&VoiceAssignment> {
        self.entries.iter().find(|a| a.speaker == speaker)
    }

    pub fn iter(&self) -> impl Iterator<Item = &VoiceAssignment> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn into_vec(self) -> Vec<VoiceAssignment> {
        self.entries
    }
}

/// Назначает голоса говорящим.
///
/// Свободный голос из пула выбирается с предпочтением лучшего движка. Когда
/// свободных голосов нет, голоса раздаются по кругу, а не повторяется один и
/// тот же.
pub struct VoiceAssigner<'a> {
    settings: &'a SpeechSettings,
    assignments: VoiceAssignments,
}

impl<'a> VoiceAssigner<'a> {
    pub fn new(settings: &'a SpeechSettings) -> Self {
        Self {
            settings,
            assignments: VoiceAssignments::default(),
        }
    }

    /// Назначить голос говорящему или вернуть уже назначенный
    pub fn assign(&mut self, speaker: &Speaker) -> VoiceAssignment {
        if let Some(existing) = self.assignments.get(&speaker.name) {
            return existing.clone();
        }

        let (gender, source) = resolve_gender(speaker, self.settings);
        let choice = match speaker.voice_name.as_deref() {
            Some(voice) if voice_gender(voice, self.settings).is_some() => {
                let engine = self
                    .settings
                    .pool(gender)
                    .iter()
                    .find(|v| v.voice.eq_ignore_ascii_case(voice))
                    .map(|v| v.engine)
                    .unwrap_or(EngineTier::Standard);
                VoiceChoice::new(voice, engine)
            }
            _ => self.pick_from_pool(gender),
        };

        let assignment = VoiceAssignment {
            speaker: speaker.name.clone(),
            voice: choice.voice,
            engine: choice.engine,
            gender,
        };
        log::info!(
            "Voice for '{}': {} ({}, {}, gender from {:?})",
            assignment.speaker,
            assignment.voice,
            assignment.engine.as_str(),
            gender.as_str(),
            source
        );
        self.assignments.entries.push(assignment.clone());
        assignment
    }

    fn pick_from_pool(&self, gender: Gender) -> VoiceChoice {
        let mut pool: Vec<&VoiceChoice> = self.settings.pool(gender).iter().collect();
        if pool.is_empty() {
            log::warn!("No {} voices configured, using last resort voice", gender.as_str());
            return self.settings.last_resort.clone();
        }
        pool.sort_by_key(|v| v.engine.rank());

        let same_gender: Vec<&VoiceAssignment> = self
            .assignments
            .iter()
            .filter(|a| a.gender == gender)
            .collect();

        if let Some(free) = pool
            .iter()
            .find(|v| !same_gender.iter().any(|a| a.voice.eq_ignore_ascii_case(&v.voice)))
        {
            return (*free).clone();
        }

        pool[same_gender.len() % pool.len()].clone()
    }

    /// Назначить голоса всем говорящим по порядку
    pub fn assign_all<'s>(mut self, speakers: impl IntoIterator<Item = &'s Speaker>) -> VoiceAssignments {
        for speaker in speakers {
            self.assign(speaker);
        }
        self.assignments
    }

    pub fn into_assignments(self) -> VoiceAssignments {
        self.assignments
    }
}
