//! Построение таймлайна
//!
//! Работает в два прохода. `plan_steps` по контенту и профилю решает, какие
//! шаги и клипы нужны. `resolve_plan` подставляет измеренные длительности
//! клипов и расставляет времена начала. Оба прохода чистые: одинаковые входные
//! данные дают побитово одинаковый результат.

use std::collections::{BTreeMap, HashMap};

use crate::config::TimingProfile;
use crate::content::{ContentSpec, Speaker};
use crate::error::{Result, SyncError};
use crate::timeline::{ClipId, Segment, StepKind, Timeline, TimelineStep};

/// Текст финального перехода
pub const CLOSING_LABEL: &str = "Ende der Übung";
/// Текст завершения по умолчанию
pub const DEFAULT_OUTRO: &str = "Vielen Dank! Vergessen Sie nicht zu liken und zu abonnieren!";

/// Источник измеренных длительностей клипов
pub trait ClipDurations {
    fn duration_of(&self, clip: &ClipId) -> Option<f64>;
}

impl ClipDurations for HashMap<ClipId, f64> {
    fn duration_of(&self, clip: &ClipId) -> Option<f64> {
        self.get(clip).copied()
    }
}

impl ClipDurations for BTreeMap<ClipId, f64> {
    fn duration_of(&self, clip: &ClipId) -> Option<f64> {
        self.get(clip).copied()
    }
}

/// Чьим голосом озвучивается клип
#[derive(Debug, Clone, PartialEq)]
pub enum ClipVoice {
    Narrator,
    Speaker(Speaker),
}

/// Клип, который нужно получить до построения таймлайна
#[derive(Debug, Clone, PartialEq)]
pub struct ClipRequest {
    pub id: ClipId,
    pub text: String,
    pub voice: ClipVoice,
    /// Имя заранее записанного файла в директории ассетов (без расширения)
    pub asset: Option<&'static str>,
}

/// Повтор вопроса после текста задания
#[derive(Debug, Clone, PartialEq)]
pub struct PromptShape {
    pub clip: ClipId,
    pub repeat_count: u32,
}

/// Как длительность клипа превращается в ширину слота
#[derive(Debug, Clone, PartialEq)]
pub enum StepShape {
    /// Клип и тишина после него
    Single { clip: ClipId, trailing: f64 },
    /// Клип, растянутый тишиной до минимальной длительности
    Padded { clip: ClipId, min_duration: f64 },
    /// Задание: буфер, повторы с паузами, вопрос, время на размышление
    Task {
        clip: ClipId,
        lead: f64,
        repeat_count: u32,
        repeat_pause: f64,
        thinking: f64,
        prompt: Option<PromptShape>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlannedStep {
    pub kind: StepKind,
    pub shape: StepShape,
}

/// Результат первого прохода
#[derive(Debug, Clone, PartialEq)]
pub struct StepPlan {
    pub steps: Vec<PlannedStep>,
    /// Клипы в порядке документа, без повторов
    pub clips: Vec<ClipRequest>,
}

impl StepPlan {
    fn push_clip(&mut self, request: ClipRequest) {
        if !self.clips.iter().any(|c| c.id == request.id) {
            self.clips.push(request);
        }
    }
}

/// Измеренный слот шага
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct MeasuredShape {
    pub base_duration: f64,
    pub total_duration: f64,
    pub segments: Vec<Segment>,
}

/// Решить, какие шаги и клипы нужны для контента
pub fn plan_steps(content: &ContentSpec, profile: &TimingProfile) -> Result<StepPlan> {
    content.validate()?;
    profile.validate()?;

    let structure = &profile.structure;
    let mut plan = StepPlan {
        steps: Vec::new(),
        clips: Vec::new(),
    };

    if structure.lead_in {
        let text = content
            .intro_text
            .clone()
            .unwrap_or_else(|| format!("Willkommen zum {}.", content.info.title.trim()));
        plan.push_clip(ClipRequest {
            id: ClipId::lead_in(),
            text,
            voice: ClipVoice::Narrator,
            asset: Some("lead_in"),
        });
        plan.steps.push(PlannedStep {
            kind: StepKind::LeadIn,
            shape: StepShape::Single {
                clip: ClipId::lead_in(),
                trailing: 0.0,
            },
        });
    }

    if structure.instructions {
        let text = content.instructions.text();
        if text.is_empty() {
            return Err(SyncError::ContentValidation(
                "instructions step is enabled but the instructions text is empty".to_string(),
            ));
        }
        plan.push_clip(ClipRequest {
            id: ClipId::instructions(),
            text,
            voice: ClipVoice::Narrator,
            asset: None,
        });
        plan.steps.push(PlannedStep {
            kind: StepKind::Instructions,
            shape: StepShape::Single {
                clip: ClipId::instructions(),
                trailing: profile.timing.instructions_buffer,
            },
        });
    }

    for unit in &content.narrations {
        let n = unit.number;
        let timing = profile.for_task(n);
        let label = format!("Aufgabe {}", n);

        plan.push_clip(ClipRequest {
            id: ClipId::transition(n),
            text: label.clone(),
            voice: ClipVoice::Narrator,
            asset: None,
        });
        plan.steps.push(PlannedStep {
            kind: StepKind::Transition { label },
            shape: StepShape::Padded {
                clip: ClipId::transition(n),
                min_duration: profile.timing.transition_duration,
            },
        });

        let speaker = unit.speaker();
        plan.push_clip(ClipRequest {
            id: ClipId::narration(n),
            text: unit.text.clone(),
            voice: ClipVoice::Speaker(speaker.clone()),
            asset: None,
        });

        let question = content.question_for(n);
        let prompt = match question {
            Some(q) if structure.question_prompt => {
                plan.push_clip(ClipRequest {
                    id: ClipId::question(n),
                    text: q.question.clone(),
                    voice: ClipVoice::Narrator,
                    asset: None,
                });
                Some(PromptShape {
                    clip: ClipId::question(n),
                    repeat_count: timing.question_repeat_count,
                })
            }
            _ => None,
        };

        plan.steps.push(PlannedStep {
            kind: StepKind::NarrationTask {
                task_number: n,
                speaker: speaker.name,
            },
            shape: StepShape::Task {
                clip: ClipId::narration(n),
                lead: timing.task_start_buffer,
                repeat_count: timing.repeat_count,
                repeat_pause: timing.repeat_pause,
                thinking: timing.thinking_time,
                prompt,
            },
        });

        if let (Some(q), true) = (question, structure.answer_reveal) {
            // validate() гарантирует, что правильный ключ есть среди вариантов
            let answer_text = q.correct_text().unwrap_or_default().to_string();
            plan.push_clip(ClipRequest {
                id: ClipId::reveal(n),
                text: format!("Die richtige Antwort ist {}: {}", q.correct_answer, answer_text),
                voice: ClipVoice::Narrator,
                asset: None,
            });
            plan.steps.push(PlannedStep {
                kind: StepKind::AnswerReveal {
                    task_number: n,
                    correct_key: q.correct_answer.clone(),
                    answer_text,
                },
                shape: StepShape::Single {
                    clip: ClipId::reveal(n),
                    trailing: timing.answer_reveal_pause,
                },
            });
        }
    }

    if structure.closing_transition {
        plan.push_clip(ClipRequest {
            id: ClipId::closing_transition(),
            text: CLOSING_LABEL.to_string(),
            voice: ClipVoice::Narrator,
            asset: None,
        });
        plan.steps.push(PlannedStep {
            kind: StepKind::Transition {
                label: CLOSING_LABEL.to_string(),
            },
            shape: StepShape::Padded {
                clip: ClipId::closing_transition(),
                min_duration: profile.timing.transition_duration,
            },
        });
    }

    if structure.lead_out {
        plan.push_clip(ClipRequest {
            id: ClipId::lead_out(),
            text: content
                .outro_text
                .clone()
                .unwrap_or_else(|| DEFAULT_OUTRO.to_string()),
            voice: ClipVoice::Narrator,
            asset: Some("lead_out"),
        });
        plan.steps.push(PlannedStep {
            kind: StepKind::LeadOut,
            shape: StepShape::Single {
                clip: ClipId::lead_out(),
                trailing: 0.0,
            },
        });
    }

    Ok(plan)
}

/// Подставить длительности клипов и расставить времена начала
pub fn resolve_plan(plan: &StepPlan, durations: &impl ClipDurations) -> Result<Timeline> {
    let mut steps = Vec::with_capacity(plan.steps.len());
    let mut cursor = 0.0_f64;

    for (index, planned) in plan.steps.iter().enumerate() {
        let measured = measure_shape(&planned.shape, durations)?;
        steps.push(TimelineStep {
            index,
            kind: planned.kind.clone(),
            start_time: cursor,
            base_duration: measured.base_duration,
            total_duration: measured.total_duration,
            segments: measured.segments,
        });
        cursor += measured.total_duration;
    }

    log::debug!("Timeline resolved: {} steps, {:.3}s", steps.len(), cursor);
    Ok(Timeline {
        total_duration: cursor,
        steps,
    })
}

/// Построить таймлайн по контенту, профилю и измеренным длительностям
pub fn build_timeline(
    content: &ContentSpec,
    profile: &TimingProfile,
    durations: &impl ClipDurations,
) -> Result<Timeline> {
    let plan = plan_steps(content, profile)?;
    resolve_plan(&plan, durations)
}

fn clip_duration(durations: &impl ClipDurations, clip: &ClipId) -> Result<f64> {
    match durations.duration_of(clip) {
        Some(d) if d.is_finite() && d >= 0.0 => Ok(d),
        Some(d) => Err(SyncError::AudioProcessing(format!(
            "clip {} has invalid measured duration {}",
            clip, d
        ))),
        None => Err(SyncError::MissingAudio(clip.to_string())),
    }
}

fn push_silence(segments: &mut Vec<Segment>, duration: f64) {
    if duration > 0.0 {
        segments.push(Segment::Silence { duration });
    }
}

pub(crate) fn measure_shape(shape: &StepShape, durations: &impl ClipDurations) -> Result<MeasuredShape> {
    let mut segments = Vec::new();
    let (base, total) = match shape {
        StepShape::Single { clip, trailing } => {
            let base = clip_duration(durations, clip)?;
            segments.push(Segment::Clip { clip: clip.clone(), duration: base });
            push_silence(&mut segments, *trailing);
            (base, base + trailing)
        }
        StepShape::Padded { clip, min_duration } => {
            let base = clip_duration(durations, clip)?;
            let total = base.max(*min_duration);
            segments.push(Segment::Clip { clip: clip.clone(), duration: base });
            push_silence(&mut segments, total - base);
            (base, total)
        }
        StepShape::Task {
            clip,
            lead,
            repeat_count,
            repeat_pause,
            thinking,
            prompt,
        } => {
            let base = clip_duration(durations, clip)?;
            let repeats = (*repeat_count).max(1);

            push_silence(&mut segments, *lead);
            for i in 0..repeats {
                if i > 0 {
                    push_silence(&mut segments, *repeat_pause);
                }
                segments.push(Segment::Clip { clip: clip.clone(), duration: base });
            }
            let mut total = lead + base * repeats as f64 + repeat_pause * (repeats - 1) as f64;

            if let Some(prompt) = prompt {
                let prompt_duration = clip_duration(durations, &prompt.clip)?;
                let prompt_repeats = prompt.repeat_count.max(1);
                for _ in 0..prompt_repeats {
                    push_silence(&mut segments, *repeat_pause);
                    segments.push(Segment::Clip {
                        clip: prompt.clip.clone(),
                        duration: prompt_duration,
                    });
                }
                total += (repeat_pause + prompt_duration) * prompt_repeats as f64;
            }

            push_silence(&mut segments, *thinking);
            total += thinking;
            (base, total)
        }
    };

    Ok(MeasuredShape {
        base_duration: base,
        total_duration: total,
        segments,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{StructureFlags, TaskOverride, TimingValues};
    use crate::content::tests::sample_spec;

    fn durations_for(plan: &StepPlan) -> HashMap<ClipId, f64> {
        plan.clips
            .iter()
            .enumerate()
            .map(|(i, c)| (c.id.clone(), 1.1 + i as f64 * 0.37))
            .collect()
    }

    fn bare_profile() -> TimingProfile {
        TimingProfile {
            name: "bare".to_string(),
            timing: TimingValues {
                thinking_time: 0.0,
                pause_between_plays: 0.0,
                transition_duration: 0.0,
                answer_reveal_pause: 0.0,
                instructions_buffer: 0.0,
                task_start_buffer: 0.0,
            },
            structure: StructureFlags {
                lead_in: false,
                instructions: false,
                answer_reveal: false,
                closing_transition: false,
                lead_out: false,
                question_prompt: false,
            },
            ..TimingProfile::default()
        }
    }

    fn single_unit_spec(text: &str) -> ContentSpec {
        let mut spec = sample_spec();
        spec.narrations.truncate(1);
        spec.narrations[0].text = text.to_string();
        spec.questions.truncate(1);
        spec
    }

    #[test]
    fn test_no_gaps_no_overlaps() {
        let spec = sample_spec();
        let profile = TimingProfile::default();
        let plan = plan_steps(&spec, &profile).unwrap();
        let timeline = resolve_plan(&plan, &durations_for(&plan)).unwrap();

        for pair in timeline.steps.windows(2) {
            assert_eq!(pair[1].start_time, pair[0].start_time + pair[0].total_duration);
        }
        assert!(timeline.check_contiguity().is_ok());

        let sum: f64 = timeline.steps.iter().map(|s| s.total_duration).fold(0.0, |a, b| a + b);
        assert_eq!(timeline.total_duration, sum);
    }

    #[test]
    fn test_build_is_deterministic() {
        let spec = sample_spec();
        let profile = TimingProfile::default();
        let plan = plan_steps(&spec, &profile).unwrap();
        let durations = durations_for(&plan);

        let first = build_timeline(&spec, &profile, &durations).unwrap();
        let second = build_timeline(&spec, &profile, &durations).unwrap();
        let starts = |t: &Timeline| t.steps.iter().map(|s| s.start_time.to_bits()).collect::<Vec<_>>();
        assert_eq!(starts(&first), starts(&second));
        assert_eq!(first, second);
    }

    #[test]
    fn test_step_order_and_payloads() {
        let spec = sample_spec();
        let plan = plan_steps(&spec, &TimingProfile::default()).unwrap();
        let kinds: Vec<&str> = plan.steps.iter().map(|s| s.kind.as_str()).collect();
        assert_eq!(
            kinds,
            vec![
                "lead_in",
                "instructions",
                "transition",
                "narration_task",
                "answer_reveal",
                "transition",
                "narration_task",
                "answer_reveal",
                "transition",
                "narration_task",
                "transition",
                "lead_out",
            ]
        );
        assert_eq!(
            plan.steps[4].kind,
            StepKind::AnswerReveal {
                task_number: 1,
                correct_key: "a".to_string(),
                answer_text: "Brot abholen".to_string(),
            }
        );
        let reveal = plan.clips.iter().find(|c| c.id == ClipId::reveal(2)).unwrap();
        assert_eq!(reveal.text, "Die richtige Antwort ist b: RE");
        assert_eq!(plan.clips[0].asset, Some("lead_in"));
    }

    #[test]
    fn test_repeat_count_inflation() {
        let spec = single_unit_spec("Guten Tag.");
        let mut profile = bare_profile();
        profile.timing.task_start_buffer = 2.0;
        profile.timing.pause_between_plays = 3.0;
        profile.timing.thinking_time = 5.0;
        profile.audio.text_play_count = 2;

        let mut durations = HashMap::new();
        durations.insert(ClipId::transition(1), 1.0);
        durations.insert(ClipId::narration(1), 4.0);

        let timeline = build_timeline(&spec, &profile, &durations).unwrap();
        let task = &timeline.steps[1];
        assert_eq!(task.total_duration, 18.0);
        assert_eq!(task.base_duration, 4.0);
        assert_eq!(
            task.segments,
            vec![
                Segment::Silence { duration: 2.0 },
                Segment::Clip { clip: ClipId::narration(1), duration: 4.0 },
                Segment::Silence { duration: 3.0 },
                Segment::Clip { clip: ClipId::narration(1), duration: 4.0 },
                Segment::Silence { duration: 5.0 },
            ]
        );
    }

    #[test]
    fn test_minimal_two_step_timeline() {
        let spec = single_unit_spec("Hallo");
        let mut profile = bare_profile();
        profile.timing.thinking_time = 5.0;
        profile.audio.text_play_count = 1;

        let mut durations = HashMap::new();
        durations.insert(ClipId::transition(1), 0.8);
        durations.insert(ClipId::narration(1), 0.62);

        let timeline = build_timeline(&spec, &profile, &durations).unwrap();
        assert_eq!(timeline.len(), 2);
        assert_eq!(timeline.steps[0].kind.as_str(), "transition");
        assert_eq!(timeline.steps[1].kind.as_str(), "narration_task");
        assert_eq!(timeline.steps[1].total_duration, 0.62 + 5.0);
        assert_eq!(timeline.steps[1].start_time, 0.8);
    }

    #[test]
    fn test_single_repeat_adds_no_pause() {
        let spec = single_unit_spec("Hallo");
        let mut profile = bare_profile();
        profile.timing.pause_between_plays = 3.0;
        profile.timing.thinking_time = 1.0;
        profile.overrides.insert(1, TaskOverride { repeat_count: Some(1), ..Default::default() });

        let mut durations = HashMap::new();
        durations.insert(ClipId::transition(1), 1.0);
        durations.insert(ClipId::narration(1), 2.0);

        let timeline = build_timeline(&spec, &profile, &durations).unwrap();
        assert_eq!(timeline.steps[1].total_duration, 3.0);
        assert!(!timeline.steps[1]
            .segments
            .iter()
            .any(|s| *s == Segment::Silence { duration: 3.0 }));
    }

    #[test]
    fn test_transition_respects_minimum() {
        let spec = single_unit_spec("Hallo");
        let mut profile = bare_profile();
        profile.timing.transition_duration = 2.5;

        let mut durations = HashMap::new();
        durations.insert(ClipId::transition(1), 1.0);
        durations.insert(ClipId::narration(1), 2.0);
        let short = build_timeline(&spec, &profile, &durations).unwrap();
        assert_eq!(short.steps[0].total_duration, 2.5);
        assert_eq!(short.steps[0].base_duration, 1.0);

        durations.insert(ClipId::transition(1), 3.2);
        let long = build_timeline(&spec, &profile, &durations).unwrap();
        assert_eq!(long.steps[0].total_duration, 3.2);
    }

    #[test]
    fn test_last_unit_override_shortens_reveal_pause() {
        let spec = sample_spec();
        let mut profile = TimingProfile::default();
        profile.overrides.insert(
            2,
            TaskOverride {
                answer_reveal_pause: Some(0.5),
                ..Default::default()
            },
        );
        let plan = plan_steps(&spec, &profile).unwrap();
        let durations: HashMap<ClipId, f64> = plan.clips.iter().map(|c| (c.id.clone(), 1.0)).collect();
        let timeline = resolve_plan(&plan, &durations).unwrap();

        let reveals: Vec<f64> = timeline
            .steps
            .iter()
            .filter(|s| s.kind.as_str() == "answer_reveal")
            .map(|s| s.total_duration)
            .collect();
        assert_eq!(reveals, vec![3.0, 1.5]);
    }

    #[test]
    fn test_question_prompt_extends_task() {
        let spec = single_unit_spec("Hallo");
        let mut profile = bare_profile();
        profile.structure.question_prompt = true;
        profile.timing.pause_between_plays = 1.0;
        profile.timing.thinking_time = 4.0;
        profile.audio.text_play_count = 2;
        profile.audio.question_play_count = 1;

        let plan = plan_steps(&spec, &profile).unwrap();
        assert!(plan.clips.iter().any(|c| c.id == ClipId::question(1)));

        let mut durations = HashMap::new();
        durations.insert(ClipId::transition(1), 1.0);
        durations.insert(ClipId::narration(1), 2.0);
        durations.insert(ClipId::question(1), 1.5);
        let timeline = resolve_plan(&plan, &durations).unwrap();
        // 2.0 * 2 + 1.0 + (1.0 + 1.5) + 4.0
        assert_eq!(timeline.steps[1].total_duration, 11.5);
    }

    #[test]
    fn test_missing_clip_duration() {
        let spec = single_unit_spec("Hallo");
        let mut durations = HashMap::new();
        durations.insert(ClipId::transition(1), 1.0);
        let err = build_timeline(&spec, &bare_profile(), &durations).unwrap_err();
        assert!(matches!(err, SyncError::MissingAudio(ref id) if id == "narration_01"));
    }

    #[test]
    fn test_invalid_content_fails_before_durations() {
        let mut spec = sample_spec();
        spec.questions[0].correct_answer = "z".to_string();
        let err = build_timeline(&spec, &TimingProfile::default(), &HashMap::<ClipId, f64>::new()).unwrap_err();
        assert!(matches!(err, SyncError::ContentValidation(_)));
    }
}
