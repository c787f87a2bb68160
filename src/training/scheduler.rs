//! Learning Rate Policies
//!
//! The default policy is the piecewise decay used for lesion training:
//! a flat warm phase, a fast exponential decay, then a slow one. The
//! decaying phases compound the *current* rate, so the rate at an epoch
//! depends on the rates that came before it.
//!
//! Reduce-on-plateau is available as an alternative.

use serde::{Deserialize, Serialize};

use super::monitor::{MetricMonitor, PlateauMode};

/// Learning-rate policy selected in the experiment config
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LrPolicy {
    /// Piecewise decay keyed on the fraction of `schedule_epochs`
    Piecewise {
        /// Rate used while `epoch < 0.1 * schedule_epochs`
        base_lr: f64,
        /// Epoch budget the fractions refer to
        schedule_epochs: usize,
        /// Per-epoch exponent while `epoch < 0.25 * schedule_epochs`
        fast_decay: f64,
        /// Per-epoch exponent afterwards
        slow_decay: f64,
    },
    /// Multiply the rate by `factor` after `patience` epochs without improvement
    ReduceOnPlateau {
        factor: f64,
        patience: usize,
        min_delta: f64,
        min_lr: f64,
    },
    /// Keep the initial rate
    Constant,
}

impl Default for LrPolicy {
    fn default() -> Self {
        LrPolicy::Piecewise {
            base_lr: 1e-3,
            schedule_epochs: 50,
            fast_decay: 0.1,
            slow_decay: 0.008,
        }
    }
}

impl LrPolicy {
    /// Reduce-on-plateau with the settings used for AUC monitoring
    pub fn reduce_on_plateau() -> Self {
        LrPolicy::ReduceOnPlateau {
            factor: 0.5,
            patience: 3,
            min_delta: 1e-5,
            min_lr: 0.0,
        }
    }

    /// Human-readable description
    pub fn description(&self) -> String {
        match self {
            LrPolicy::Piecewise {
                base_lr,
                schedule_epochs,
                fast_decay,
                slow_decay,
            } => format!(
                "Piecewise(base={}, E={}, fast=exp(-{}), slow=exp(-{}))",
                base_lr, schedule_epochs, fast_decay, slow_decay
            ),
            LrPolicy::ReduceOnPlateau {
                factor, patience, ..
            } => format!("ReduceOnPlateau(factor={}, patience={})", factor, patience),
            LrPolicy::Constant => "Constant".to_string(),
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        match self {
            LrPolicy::Piecewise {
                base_lr,
                schedule_epochs,
                ..
            } => {
                if *base_lr <= 0.0 {
                    return Err("base_lr must be positive".to_string());
                }
                if *schedule_epochs == 0 {
                    return Err("schedule_epochs must be positive".to_string());
                }
                Ok(())
            }
            LrPolicy::ReduceOnPlateau { factor, .. } if !(0.0..1.0).contains(factor) => {
                Err("factor must be in [0, 1)".to_string())
            }
            _ => Ok(()),
        }
    }
}

/// Piecewise decay step.
///
/// `current_lr` is the rate in effect when the epoch starts; it is ignored in
/// the warm phase and compounded in the two decaying phases.
pub fn piecewise_lr(
    epoch: usize,
    current_lr: f64,
    base_lr: f64,
    schedule_epochs: usize,
    fast_decay: f64,
    slow_decay: f64,
) -> f64 {
    let epoch = epoch as f64;
    let budget = schedule_epochs as f64;

    if epoch < 0.1 * budget {
        base_lr
    } else if epoch < 0.25 * budget {
        current_lr * (-fast_decay).exp()
    } else {
        current_lr * (-slow_decay).exp()
    }
}

/// Reduce-on-plateau state machine
#[derive(Debug, Clone)]
pub struct ReduceOnPlateauState {
    monitor: MetricMonitor,
    epochs_without_improvement: usize,
    current_lr: f64,
    reduction_factor: f64,
    patience: usize,
    min_lr: f64,
}

impl ReduceOnPlateauState {
    pub fn new(
        initial_lr: f64,
        reduction_factor: f64,
        patience: usize,
        min_delta: f64,
        min_lr: f64,
        mode: PlateauMode,
    ) -> Self {
        Self {
            monitor: MetricMonitor::new(mode, min_delta),
            epochs_without_improvement: 0,
            current_lr: initial_lr,
            reduction_factor,
            patience,
            min_lr,
        }
    }

    /// Update with a new metric value and return the rate for the next epoch
    pub fn step(&mut self, metric: f64) -> f64 {
        if self.monitor.update(metric) {
            self.epochs_without_improvement = 0;
        } else {
            self.epochs_without_improvement += 1;

            if self.epochs_without_improvement >= self.patience {
                let new_lr = (self.current_lr * self.reduction_factor).max(self.min_lr);
                if new_lr < self.current_lr {
                    tracing::info!(
                        "Reducing learning rate from {:.3e} to {:.3e}",
                        self.current_lr,
                        new_lr
                    );
                    self.current_lr = new_lr;
                }
                self.epochs_without_improvement = 0;
            }
        }

        self.current_lr
    }
}

/// Drives the optimizer's learning rate across epochs.
///
/// Call [`LrController::begin_epoch`] before each epoch and
/// [`LrController::end_epoch`] with the monitored metric afterwards.
#[derive(Debug, Clone)]
pub struct LrController {
    policy: LrPolicy,
    current_lr: f64,
    plateau: Option<ReduceOnPlateauState>,
}

impl LrController {
    pub fn new(policy: LrPolicy, initial_lr: f64) -> Self {
        let plateau = match &policy {
            LrPolicy::ReduceOnPlateau {
                factor,
                patience,
                min_delta,
                min_lr,
            } => Some(ReduceOnPlateauState::new(
                initial_lr,
                *factor,
                *patience,
                *min_delta,
                *min_lr,
                PlateauMode::Max,
            )),
            _ => None,
        };

        Self {
            policy,
            current_lr: initial_lr,
            plateau,
        }
    }

    /// Rate to train `epoch` with
    pub fn begin_epoch(&mut self, epoch: usize) -> f64 {
        if let LrPolicy::Piecewise {
            base_lr,
            schedule_epochs,
            fast_decay,
            slow_decay,
        } = self.policy
        {
            self.current_lr = piecewise_lr(
                epoch,
                self.current_lr,
                base_lr,
                schedule_epochs,
                fast_decay,
                slow_decay,
            );
        }
        self.current_lr
    }

    /// Feed the monitored metric of the finished epoch
    pub fn end_epoch(&mut self, metric: f64) {
        if let Some(plateau) = &mut self.plateau {
            self.current_lr = plateau.step(metric);
        }
    }

    pub fn current_lr(&self) -> f64 {
        self.current_lr
    }
}
