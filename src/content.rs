//! Спецификация контента: тексты заданий, говорящие, вопросы и ответы
//!
//! Формат совпадает с пользовательским JSON документом экзамена
//! (`exam_info`, `instructions`, `content`, `questions`).

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::config::Gender;
use crate::error::{Result, SyncError};

/// Общая информация об упражнении
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExamInfo {
    pub title: String,
    #[serde(default)]
    pub level: Option<String>,
    #[serde(default)]
    pub skill: Option<String>,
    /// Номер части, по нему выбирается профиль таймингов
    #[serde(rename = "teil")]
    pub part: u32,
    #[serde(rename = "ubung", default)]
    pub exercise: Option<u32>,
}

/// Текст инструкции
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Instructions {
    pub main: String,
    #[serde(default)]
    pub task: String,
    #[serde(default)]
    pub repetition: String,
}

impl Instructions {
    /// Полный текст инструкции для озвучивания
    pub fn text(&self) -> String {
        [self.main.as_str(), self.task.as_str(), self.repetition.as_str()]
            .iter()
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Сведения о говорящем внутри блока контента
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SpeakerInfo {
    #[serde(default)]
    pub gender: Option<Gender>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub voice_name: Option<String>,
}

/// Озвучиваемый блок контента (одно задание)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NarrationUnit {
    pub number: u32,
    pub text: String,
    pub speaker: String,
    #[serde(default)]
    pub context: String,
    #[serde(default)]
    pub speakers: BTreeMap<String, SpeakerInfo>,
}

/// Говорящий со всеми признаками, по которым выбирается голос
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Speaker {
    pub name: String,
    pub role: Option<String>,
    pub gender: Option<Gender>,
    pub voice_name: Option<String>,
    pub context: String,
}

impl NarrationUnit {
    /// Основной говорящий блока
    pub fn speaker(&self) -> Speaker {
        let info = self.speakers.get(&self.speaker).cloned().unwrap_or_default();
        Speaker {
            name: self.speaker.trim().to_string(),
            role: info.role,
            gender: info.gender,
            voice_name: info.voice_name,
            context: self.context.clone(),
        }
    }
}

/// Вопрос к заданию
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionUnit {
    /// Номер блока контента, к которому относится вопрос
    pub number: u32,
    pub question: String,
    pub options: BTreeMap<String, String>,
    pub correct_answer: String,
}

impl QuestionUnit {
    /// Текст правильного варианта
    pub fn correct_text(&self) -> Option<&str> {
        self.options.get(&self.correct_answer).map(String::as_str)
    }
}

/// Спецификация контента
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentSpec {
    #[serde(rename = "exam_info")]
    pub info: ExamInfo,
    #[serde(default)]
    pub instructions: Instructions,
    #[serde(rename = "content")]
    pub narrations: Vec<NarrationUnit>,
    #[serde(default)]
    pub questions: Vec<QuestionUnit>,
    #[serde(default)]
    pub intro_text: Option<String>,
    #[serde(default)]
    pub outro_text: Option<String>,
}

impl ContentSpec {
    /// Загрузить и проверить спецификацию из JSON файла
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            SyncError::ContentValidation(format!("Cannot read content {}: {}", path.display(), e))
        })?;
        let spec: ContentSpec = serde_json::from_str(&raw).map_err(|e| {
            SyncError::ContentValidation(format!("Malformed content {}: {}", path.display(), e))
        })?;
        spec.validate()?;
        Ok(spec)
    }

    /// Проверить обязательные поля и ссылки между блоками
    pub fn validate(&self) -> Result<()> {
        if self.narrations.is_empty() {
            return invalid("content has no narration units".to_string());
        }

        let mut numbers = HashSet::new();
        for unit in &self.narrations {
            if !numbers.insert(unit.number) {
                return invalid(format!("duplicate narration number {}", unit.number));
            }
            if unit.text.trim().is_empty() {
                return invalid(format!("narration {} has empty text", unit.number));
            }
            if unit.speaker.trim().is_empty() {
                return invalid(format!("narration {} has no speaker", unit.number));
            }
        }

        let mut answered = HashSet::new();
        for question in &self.questions {
            if !numbers.contains(&question.number) {
                return invalid(format!(
                    "question {} refers to a missing narration unit",
                    question.number
                ));
            }
            if !answered.insert(question.number) {
                return invalid(format!("duplicate question for narration {}", question.number));
            }
            if question.options.is_empty() {
                return invalid(format!("question {} has no options", question.number));
            }
            if question.correct_text().is_none() {
                return invalid(format!(
                    "question {}: correct answer '{}' is not among options [{}]",
                    question.number,
                    question.correct_answer,
                    question.options.keys().cloned().collect::<Vec<_>>().join(", ")
                ));
            }
        }
        Ok(())
    }

    /// Вопрос для блока контента
    pub fn question_for(&self, number: u32) -> Option<&QuestionUnit> {
        self.questions.iter().find(|q| q.number == number)
    }

    /// Говорящие в порядке первого появления
    pub fn speakers(&self) -> Vec<Speaker> {
        let mut seen = HashSet::new();
        self.narrations
            .iter()
            .map(NarrationUnit::speaker)
            .filter(|s| seen.insert(s.name.clone()))
            .collect()
    }
}

fn invalid<T>(message: String) -> Result<T> {
    Err(SyncError::ContentValidation(message))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn sample_json() -> &'static str {
        r#"{
            "exam_info": {"title": "Goethe B1 Hören", "level": "B1", "skill": "Hören", "teil": 1, "ubung": 2},
            "instructions": {"main": "Sie hören fünf kurze Texte.", "task": "Wählen Sie die richtige Lösung.", "repetition": "Sie hören jeden Text zweimal."},
            "content": [
                {"number": 1, "text": "Guten Tag, hier ist die Bäckerei Schulz.", "speaker": "Frau Schulz",
                 "context": "Anrufbeantworter", "speakers": {"Frau Schulz": {"role": "Verkäuferin"}}},
                {"number": 2, "text": "Achtung, der Zug fällt aus.", "speaker": "Sprecher",
                 "speakers": {"Sprecher": {"gender": "male", "role": "Mitarbeiter"}}},
                {"number": 3, "text": "Hallo Anna, wir treffen uns um acht.", "speaker": "Frau Schulz"}
            ],
            "questions": [
                {"number": 1, "question": "Was soll Frau Meier tun?", "options": {"a": "Brot abholen", "b": "Anrufen", "c": "Nichts"}, "correct_answer": "a"},
                {"number": 2, "question": "Welcher Zug fällt aus?", "options": {"a": "ICE", "b": "RE", "c": "S-Bahn"}, "correct_answer": "b"}
            ]
        }"#
    }

    pub(crate) fn sample_spec() -> ContentSpec {
        serde_json::from_str(sample_json()).unwrap()
    }

    #[test]
    fn test_parse_original_keys() {
        let spec = sample_spec();
        assert_eq!(spec.info.part, 1);
        assert_eq!(spec.info.exercise, Some(2));
        assert_eq!(spec.narrations.len(), 3);
        assert!(spec.validate().is_ok());
        assert_eq!(
            spec.instructions.text(),
            "Sie hören fünf kurze Texte. Wählen Sie die richtige Lösung. Sie hören jeden Text zweimal."
        );
    }

    #[test]
    fn test_speaker_details_and_order() {
        let spec = sample_spec();
        let speakers = spec.speakers();
        assert_eq!(speakers.len(), 2);
        assert_eq!(speakers[0].name, "Frau Schulz");
        assert_eq!(speakers[0].role.as_deref(), Some("Verkäuferin"));
        assert_eq!(speakers[1].gender, Some(Gender::Male));
    }

    #[test]
    fn test_correct_answer_must_be_an_option() {
        let mut spec = sample_spec();
        spec.questions[0].correct_answer = "d".to_string();
        let err = spec.validate().unwrap_err();
        assert!(matches!(err, SyncError::ContentValidation(ref m) if m.contains("'d'")));
    }

    #[test]
    fn test_orphan_question_rejected() {
        let mut spec = sample_spec();
        spec.questions[1].number = 9;
        assert!(matches!(spec.validate(), Err(SyncError::ContentValidation(_))));
    }

    #[test]
    fn test_empty_text_rejected() {
        let mut spec = sample_spec();
        spec.narrations[2].text = "   ".to_string();
        assert!(matches!(spec.validate(), Err(SyncError::ContentValidation(_))));
    }

    #[test]
    fn test_load_reports_malformed_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("content.json");
        std::fs::write(&path, "{\"exam_info\": {}}").unwrap();
        assert!(matches!(ContentSpec::load(&path), Err(SyncError::ContentValidation(_))));
    }
}
