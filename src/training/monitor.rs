//! Monitored-metric bookkeeping shared by checkpointing, early stopping and
//! reduce-on-plateau.

use serde::{Deserialize, Serialize};

/// Direction in which the monitored metric improves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlateauMode {
    /// Metric should decrease (e.g., loss)
    Min,
    /// Metric should increase (e.g., AUC)
    Max,
}

/// Best-so-far tracker for one metric
#[derive(Debug, Clone)]
pub struct MetricMonitor {
    mode: PlateauMode,
    min_delta: f64,
    best: Option<f64>,
}

impl MetricMonitor {
    pub fn new(mode: PlateauMode, min_delta: f64) -> Self {
        Self {
            mode,
            min_delta: min_delta.abs(),
            best: None,
        }
    }

    /// Maximised metric with no tolerance
    pub fn maximize() -> Self {
        Self::new(PlateauMode::Max, 0.0)
    }

    /// True if `value` beats the best value by more than `min_delta`.
    /// NaN never counts as an improvement.
    pub fn is_improvement(&self, value: f64) -> bool {
        if value.is_nan() {
            return false;
        }
        match (self.best, self.mode) {
            (None, _) => true,
            (Some(best), PlateauMode::Max) => value - self.min_delta > best,
            (Some(best), PlateauMode::Min) => value + self.min_delta < best,
        }
    }

    /// Record `value`; returns whether it improved on the best
    pub fn update(&mut self, value: f64) -> bool {
        let improved = self.is_improvement(value);
        if improved {
            self.best = Some(value);
        }
        improved
    }

    pub fn best(&self) -> Option<f64> {
        self.best
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_value_always_improves() {
        let mut monitor = MetricMonitor::maximize();
        assert!(monitor.update(0.1));
        assert_eq!(monitor.best(), Some(0.1));
    }

    #[test]
    fn test_max_mode_requires_strict_gain() {
        let mut monitor = MetricMonitor::maximize();
        monitor.update(0.7);
        assert!(!monitor.update(0.7));
        assert!(!monitor.update(0.6));
        assert!(monitor.update(0.71));
    }

    #[test]
    fn test_min_delta() {
        let mut monitor = MetricMonitor::new(PlateauMode::Min, 1e-3);
        monitor.update(1.0);
        assert!(!monitor.update(0.9995));
        assert!(monitor.update(0.998));
    }

    #[test]
    fn test_nan_is_ignored() {
        let mut monitor = MetricMonitor::maximize();
        assert!(!monitor.update(f64::NAN));
        assert_eq!(monitor.best(), None);
    }
}
