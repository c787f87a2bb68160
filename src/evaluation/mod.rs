//! Test-set evaluation and binary classification metrics

pub mod evaluator;
pub mod metrics;

pub use evaluator::{evaluate_checkpoint, evaluate_pass, render_plots, EvaluationReport, InferencePass};
pub use metrics::{
    auc, precision_recall_curve, roc_auc_score, roc_curve, ConfusionMatrix, PrecisionRecallCurve, RocCurve,
};
