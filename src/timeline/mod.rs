//! Таймлайн: единственный источник истины о времени
//!
//! Таймлайн строится один раз за запуск и дальше только читается:
//! драйвер воспроизведения, сборщик аудио и финальное кодирование
//! используют его значения, а не пересчитывают длительности сами.

pub mod artifact;
pub mod builder;
pub mod estimate;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use artifact::{ClipRecord, TimelineArtifact};
pub use builder::{build_timeline, plan_steps, resolve_plan, ClipDurations, ClipRequest, StepPlan};
pub use estimate::{estimate_runtime, RuntimeEstimate};

/// Идентификатор аудиоклипа
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClipId(String);

impl ClipId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn lead_in() -> Self {
        Self::new("lead_in")
    }

    pub fn instructions() -> Self {
        Self::new("instructions")
    }

    pub fn transition(task_number: u32) -> Self {
        Self(format!("transition_{:02}", task_number))
    }

    pub fn closing_transition() -> Self {
        Self::new("transition_end")
    }

    pub fn narration(task_number: u32) -> Self {
        Self(format!("narration_{:02}", task_number))
    }

    pub fn question(task_number: u32) -> Self {
        Self(format!("question_{:02}", task_number))
    }

    pub fn reveal(task_number: u32) -> Self {
        Self(format!("reveal_{:02}", task_number))
    }

    pub fn lead_out() -> Self {
        Self::new("lead_out")
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClipId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Вид шага и его данные
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepKind {
    LeadIn,
    Instructions,
    Transition {
        label: String,
    },
    NarrationTask {
        task_number: u32,
        speaker: String,
    },
    AnswerReveal {
        task_number: u32,
        correct_key: String,
        answer_text: String,
    },
    LeadOut,
}

impl StepKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LeadIn => "lead_in",
            Self::Instructions => "instructions",
            Self::Transition { .. } => "transition",
            Self::NarrationTask { .. } => "narration_task",
            Self::AnswerReveal { .. } => "answer_reveal",
            Self::LeadOut => "lead_out",
        }
    }
}

/// Фрагмент содержимого шага
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Segment {
    Silence { duration: f64 },
    Clip { clip: ClipId, duration: f64 },
}

impl Segment {
    pub fn duration(&self) -> f64 {
        match self {
            Self::Silence { duration } | Self::Clip { duration, .. } => *duration,
        }
    }
}

/// Шаг таймлайна
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineStep {
    pub index: usize,
    #[serde(flatten)]
    pub kind: StepKind,
    /// Начало шага от нуля таймлайна, секунды
    pub start_time: f64,
    /// Измеренная длительность основного клипа
    pub base_duration: f64,
    /// Ширина слота шага с повторами, паузами и буферами
    pub total_duration: f64,
    /// Содержимое слота по порядку
    pub segments: Vec<Segment>,
}

impl TimelineStep {
    pub fn end_time(&self) -> f64 {
        self.start_time + self.total_duration
    }

    /// Короткое описание для логов: индекс и вид шага
    pub fn describe(&self) -> String {
        format!("#{} {}", self.index, self.kind.as_str())
    }
}

/// Упорядоченная последовательность шагов без зазоров и перекрытий
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Timeline {
    pub total_duration: f64,
    pub steps: Vec<TimelineStep>,
}

impl Timeline {
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Проверить непрерывность: начало каждого шага равно концу предыдущего
    pub fn check_contiguity(&self) -> std::result::Result<(), String> {
        let mut cursor = 0.0;
        for step in &self.steps {
            if step.start_time != cursor {
                return Err(format!(
                    "step {} starts at {} but previous step ends at {}",
                    step.describe(),
                    step.start_time,
                    cursor
                ));
            }
            cursor = step.end_time();
        }
        if cursor != self.total_duration {
            return Err(format!(
                "timeline total {} differs from step sum {}",
                self.total_duration, cursor
            ));
        }
        Ok(())
    }

    /// Все клипы, на которые ссылаются шаги
    pub fn clip_ids(&self) -> Vec<ClipId> {
        let mut ids: Vec<ClipId> = Vec::new();
        for step in &self.steps {
            for segment in &step.segments {
                if let Segment::Clip { clip, .. } = segment {
                    if !ids.contains(clip) {
                        ids.push(clip.clone());
                    }
                }
            }
        }
        ids
    }
}
