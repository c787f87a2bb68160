//! Early stopping with best-snapshot restoration

use super::monitor::MetricMonitor;

/// What the controller should do after an epoch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EpochOutcome {
    /// The monitored metric beat every earlier epoch
    pub improved: bool,
    /// Patience is exhausted; training should stop
    pub stop: bool,
}

/// Patience-based early stopping.
///
/// `S` is whatever is needed to restore the model, usually a clone of the
/// module itself. A snapshot is taken on every improvement.
#[derive(Debug, Clone)]
pub struct EarlyStopping<S> {
    monitor: MetricMonitor,
    patience: usize,
    wait: usize,
    best_epoch: Option<usize>,
    best_snapshot: Option<S>,
    stopped_epoch: Option<usize>,
}

impl<S: Clone> EarlyStopping<S> {
    pub fn new(monitor: MetricMonitor, patience: usize) -> Self {
        Self {
            monitor,
            patience,
            wait: 0,
            best_epoch: None,
            best_snapshot: None,
            stopped_epoch: None,
        }
    }

    /// Record the metric of `epoch`
    pub fn observe(&mut self, epoch: usize, value: f64, snapshot: &S) -> EpochOutcome {
        let improved = self.monitor.update(value);
        if improved {
            self.wait = 0;
            self.best_epoch = Some(epoch);
            self.best_snapshot = Some(snapshot.clone());
        } else {
            self.wait += 1;
        }

        let stop = !improved && self.wait >= self.patience && epoch > 0;
        if stop {
            self.stopped_epoch = Some(epoch);
        }

        EpochOutcome { improved, stop }
    }

    /// Snapshot of the best epoch, consumed on restore
    pub fn take_best(&mut self) -> Option<S> {
        self.best_snapshot.take()
    }

    pub fn best_epoch(&self) -> Option<usize> {
        self.best_epoch
    }

    pub fn best_value(&self) -> Option<f64> {
        self.monitor.best()
    }

    pub fn stopped_epoch(&self) -> Option<usize> {
        self.stopped_epoch
    }

    pub fn patience(&self) -> usize {
        self.patience
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Runs a metric sequence through early stopping, returning the stop
    /// epoch (if any) and the restored "weights" (the epoch number).
    fn simulate(metrics: &[f64], patience: usize) -> (Option<usize>, Option<usize>) {
        let mut stopper = EarlyStopping::new(MetricMonitor::maximize(), patience);

        for (epoch, &value) in metrics.iter().enumerate() {
            if stopper.observe(epoch, value, &epoch).stop {
                return (Some(epoch), stopper.take_best());
            }
        }
        (None, None)
    }

    #[test]
    fn test_stops_after_plateau_and_restores_best() {
        // Improves for 5 epochs (0..=4), then flat for 10.
        let mut metrics = vec![0.60, 0.65, 0.70, 0.72, 0.75];
        metrics.extend(std::iter::repeat(0.74).take(10));
        metrics.extend([0.9, 0.95]);

        let (stopped, restored) = simulate(&metrics, 10);

        let improve_epoch = 4;
        assert_eq!(stopped, Some(improve_epoch + 10));
        assert_eq!(restored, Some(improve_epoch));
    }

    #[test]
    fn test_runs_to_budget_while_improving() {
        let metrics: Vec<f64> = (0..20).map(|i| 0.5 + i as f64 * 0.01).collect();
        assert_eq!(simulate(&metrics, 10), (None, None));
    }

    #[test]
    fn test_equal_values_do_not_reset_patience() {
        let mut stopper = EarlyStopping::new(MetricMonitor::maximize(), 2);
        assert!(stopper.observe(0, 0.8, &0).improved);
        assert!(!stopper.observe(1, 0.8, &1).stop);
        let outcome = stopper.observe(2, 0.8, &2);
        assert!(outcome.stop);
        assert_eq!(stopper.best_epoch(), Some(0));
        assert_eq!(stopper.stopped_epoch(), Some(2));
    }
}
