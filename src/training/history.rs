//! Per-epoch training history

use serde::{Deserialize, Serialize};

/// Metrics of one finished epoch
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EpochRecord {
    pub epoch: usize,
    pub loss: f64,
    pub accuracy: f64,
    pub auc: f64,
    pub val_loss: f64,
    pub val_accuracy: f64,
    pub val_auc: f64,
    pub lr: f64,
}

/// Series of per-epoch metrics, one entry per completed epoch
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingHistory {
    pub loss: Vec<f64>,
    pub accuracy: Vec<f64>,
    pub auc: Vec<f64>,
    pub val_loss: Vec<f64>,
    pub val_accuracy: Vec<f64>,
    pub val_auc: Vec<f64>,
    pub lr: Vec<f64>,
}

impl TrainingHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, record: &EpochRecord) {
        self.loss.push(record.loss);
        self.accuracy.push(record.accuracy);
        self.auc.push(record.auc);
        self.val_loss.push(record.val_loss);
        self.val_accuracy.push(record.val_accuracy);
        self.val_auc.push(record.val_auc);
        self.lr.push(record.lr);
    }

    /// Number of completed epochs
    pub fn len(&self) -> usize {
        self.loss.len()
    }

    pub fn is_empty(&self) -> bool {
        self.loss.is_empty()
    }

    /// `(name, series)` pairs under their persisted key names
    pub fn series(&self) -> [(&'static str, &[f64]); 7] {
        [
            ("loss", &self.loss),
            ("accuracy", &self.accuracy),
            ("auc", &self.auc),
            ("val_loss", &self.val_loss),
            ("val_accuracy", &self.val_accuracy),
            ("val_auc", &self.val_auc),
            ("lr", &self.lr),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(epoch: usize, val_auc: f64) -> EpochRecord {
        EpochRecord {
            epoch,
            loss: 0.7,
            accuracy: 0.5,
            auc: 0.5,
            val_loss: 0.69,
            val_accuracy: 0.5,
            val_auc,
            lr: 1e-3,
        }
    }

    #[test]
    fn test_push_keeps_series_aligned() {
        let mut history = TrainingHistory::new();
        history.push(&record(0, 0.6));
        history.push(&record(1, 0.8));

        assert_eq!(history.len(), 2);
        assert!(history.series().iter().all(|(_, s)| s.len() == 2));
        assert_eq!(history.series()[5], ("val_auc", &[0.6, 0.8][..]));
    }
}
