//! Калибровка задержки рендерера и оценка дрейфа
//!
//! Базовая задержка измеряется один раз перед воспроизведением. Дрейф
//! обновляется после каждого шага экспоненциальным сглаживанием, так что
//! драйвер подстраивается под замедление рендерера в середине сессии.

use serde::Serialize;

/// Один калибровочный замер, секунды
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ProbeResult {
    pub target: f64,
    pub actual: f64,
}

impl ProbeResult {
    pub fn lag(&self) -> f64 {
        self.actual - self.target
    }
}

/// Итог калибровки
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CalibrationSummary {
    pub probes: Vec<ProbeResult>,
    /// Средняя задержка, вычитается из каждого целевого времени
    pub baseline_lag: f64,
    /// Разброс задержек между замерами
    pub spread: f64,
    /// Разброс превысил порог стабильности
    pub low_confidence: bool,
}

impl CalibrationSummary {
    pub fn from_probes(probes: Vec<ProbeResult>, stability_threshold: f64) -> Self {
        if probes.is_empty() {
            return Self {
                probes,
                baseline_lag: 0.0,
                spread: 0.0,
                low_confidence: true,
            };
        }

        let lags: Vec<f64> = probes.iter().map(ProbeResult::lag).collect();
        let baseline_lag = lags.iter().sum::<f64>() / lags.len() as f64;
        let max = lags.iter().cloned().fold(f64::MIN, f64::max);
        let min = lags.iter().cloned().fold(f64::MAX, f64::min);
        let spread = max - min;

        Self {
            probes,
            baseline_lag,
            spread,
            low_confidence: spread > stability_threshold,
        }
    }
}

/// Результат учета одного шага
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepTiming {
    /// Ошибка шага: фактическое время минус `start_time`
    pub error: f64,
    /// Дрейф после обновления
    pub drift: f64,
}

/// Состояние калибровки одной сессии
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationState {
    baseline_lag: f64,
    cumulative_drift: f64,
    drift_weight: f64,
    measurements: usize,
}

impl CalibrationState {
    pub fn new(baseline_lag: f64, drift_weight: f64) -> Self {
        Self {
            baseline_lag,
            cumulative_drift: 0.0,
            drift_weight: drift_weight.clamp(0.0, 1.0),
            measurements: 0,
        }
    }

    pub fn cumulative_drift(&self) -> f64 {
        self.cumulative_drift
    }

    /// Сбросить дрейф в начале воспроизведения
    pub fn reset_drift(&mut self) {
        self.cumulative_drift = 0.0;
        self.measurements = 0;
    }

    /// Время вызова рендерера для момента `start_time`
    pub fn compensated_target(&self, start_time: f64) -> f64 {
        (start_time - self.baseline_lag - self.cumulative_drift).max(0.0)
    }

    /// Учесть шаг, вызванный в `target` и показанный в `actual`.
    ///
    /// В дрейф идет задержка сверх базовой, первое измерение задает его сразу.
    pub fn record(&mut self, start_time: f64, target: f64, actual: f64) -> StepTiming {
        let error = actual - start_time;
        let residual = actual - target - self.baseline_lag;

        self.cumulative_drift = if self.measurements == 0 {
            residual
        } else {
            (1.0 - self.drift_weight) * self.cumulative_drift + self.drift_weight * residual
        };
        self.measurements += 1;

        StepTiming {
            error,
            drift: self.cumulative_drift,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_baseline_and_spread() {
        let probes = vec![
            ProbeResult { target: 0.5, actual: 0.52 },
            ProbeResult { target: 1.0, actual: 1.03 },
            ProbeResult { target: 2.0, actual: 2.04 },
        ];
        let summary = CalibrationSummary::from_probes(probes, 0.1);
        assert!((summary.baseline_lag - 0.03).abs() < 1e-9);
        assert!((summary.spread - 0.02).abs() < 1e-9);
        assert!(!summary.low_confidence);
    }

    #[test]
    fn test_unstable_probes_flagged() {
        let probes = vec![
            ProbeResult { target: 0.5, actual: 0.5 },
            ProbeResult { target: 1.0, actual: 1.25 },
        ];
        assert!(CalibrationSummary::from_probes(probes, 0.1).low_confidence);
    }

    #[test]
    fn test_compensated_target() {
        let mut state = CalibrationState::new(0.05, 0.3);
        assert!((state.compensated_target(10.0) - 9.95).abs() < 1e-12);
        assert_eq!(state.compensated_target(0.0), 0.0);

        state.record(10.0, 9.95, 10.15);
        assert!((state.cumulative_drift() - 0.15).abs() < 1e-12);
        assert!((state.compensated_target(20.0) - 19.8).abs() < 1e-12);
    }

    #[test]
    fn test_drift_is_weighted_toward_recent() {
        let mut state = CalibrationState::new(0.0, 0.3);
        let first = state.record(0.0, 0.0, 0.1);
        assert!((first.drift - 0.1).abs() < 1e-12);
        assert!((first.error - 0.1).abs() < 1e-12);

        // вызов на 0.1 раньше, показ через 0.4
        let second = state.record(5.0, 4.9, 5.3);
        assert!((second.error - 0.3).abs() < 1e-12);
        assert!((second.drift - (0.7 * 0.1 + 0.3 * 0.4)).abs() < 1e-12);
        assert_eq!(state.measurements, 2);

        state.reset_drift();
        assert_eq!(state.cumulative_drift(), 0.0);
    }

    #[test]
    fn test_constant_latency_converges() {
        let latency = 0.2;
        let mut state = CalibrationState::new(0.0, 0.3);
        let mut last_error = f64::MAX;
        for i in 0..6 {
            let start = i as f64 * 4.0;
            let target = state.compensated_target(start);
            last_error = state.record(start, target, target + latency).error;
        }
        assert!((state.cumulative_drift() - latency).abs() < 1e-9);
        assert!(last_error.abs() < 1e-9);
    }
}
