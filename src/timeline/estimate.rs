//! Предварительная оценка длительности по количеству слов
//!
//! Только для планирования и предпросмотра. Результат никогда не становится
//! таймлайном: настоящие длительности берутся из синтезированного аудио.

use std::collections::HashMap;

use serde::Serialize;

use crate::config::TimingProfile;
use crate::content::ContentSpec;
use crate::error::Result;
use crate::timeline::builder::{measure_shape, plan_steps};
use crate::timeline::ClipId;

/// Средний темп речи, слов в секунду
pub const WORDS_PER_SECOND: f64 = 2.5;
/// Минимальная оценка для любого клипа
const MIN_CLIP_SECONDS: f64 = 0.5;

#[derive(Debug, Clone, Serialize)]
pub struct EstimatedStep {
    pub label: String,
    pub seconds: f64,
}

/// Оценка длительности всего упражнения
#[derive(Debug, Clone, Serialize)]
pub struct RuntimeEstimate {
    pub steps: Vec<EstimatedStep>,
    pub total_seconds: f64,
    pub words: usize,
}

/// Оценка длительности произнесения текста
pub fn estimate_speech_seconds(text: &str) -> f64 {
    let words = text.split_whitespace().count();
    (words as f64 / WORDS_PER_SECOND).max(MIN_CLIP_SECONDS)
}

pub fn estimate_runtime(content: &ContentSpec, profile: &TimingProfile) -> Result<RuntimeEstimate> {
    let plan = plan_steps(content, profile)?;

    let mut guesses: HashMap<ClipId, f64> = HashMap::new();
    let mut words = 0;
    for clip in &plan.clips {
        words += clip.text.split_whitespace().count();
        guesses.insert(clip.id.clone(), estimate_speech_seconds(&clip.text));
    }

    let mut steps = Vec::with_capacity(plan.steps.len());
    let mut total_seconds = 0.0;
    for planned in &plan.steps {
        let seconds = measure_shape(&planned.shape, &guesses)?.total_duration;
        total_seconds += seconds;
        steps.push(EstimatedStep {
            label: planned.kind.as_str().to_string(),
            seconds,
        });
    }

    Ok(RuntimeEstimate {
        steps,
        total_seconds,
        words,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::tests::sample_spec;

    #[test]
    fn test_speech_estimate() {
        assert_eq!(estimate_speech_seconds("eins zwei drei vier fünf"), 2.0);
        assert_eq!(estimate_speech_seconds("Hallo"), 0.5);
    }

    #[test]
    fn test_runtime_estimate_covers_every_step() {
        let spec = sample_spec();
        let profile = TimingProfile::default();
        let estimate = estimate_runtime(&spec, &profile).unwrap();

        assert_eq!(estimate.steps.len(), plan_steps(&spec, &profile).unwrap().steps.len());
        let sum: f64 = estimate.steps.iter().map(|s| s.seconds).sum();
        assert!((sum - estimate.total_seconds).abs() < 1e-9);
        assert!(estimate.words > 20);
    }
}
