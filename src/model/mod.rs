//! Model module: backbones, classification heads and the model factory
//!
//! Four architectures are available, selected through [`BackboneKind`]:
//! - ResNet152 with a small dense head (transfer learning)
//! - an EfficientNet feature extractor with a batch-normalised head
//! - Xception built from depthwise-separable convolutions
//! - a compact from-scratch CNN for low-resolution inputs
//!
//! Every model maps `[batch, 3, height, width]` images to one logit per
//! image; the malignant-class probability is its sigmoid.

pub mod classifier;
pub mod compact;
pub mod efficientnet;
pub mod head;
pub mod resnet;
pub mod xception;

use serde::{Deserialize, Serialize};

pub use classifier::{
    build_classifier, Architecture, ClassifierConfig, LesionBackbone, LesionClassifier,
};

/// Backbone selection for the model factory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BackboneKind {
    /// ResNet152 with a frozen backbone and a Dense(100) head
    #[serde(rename = "resnet152", alias = "resnet")]
    ResNet152,
    /// EfficientNet-B1 style feature extractor with a Dense(200) + BatchNorm head
    #[serde(rename = "efficientnet")]
    EfficientNet,
    /// Xception with an average-pooled Dense(10) head
    #[serde(rename = "xception")]
    Xception,
    /// Small CNN trained from scratch
    #[serde(rename = "compact_cnn")]
    CompactCnn,
}

impl BackboneKind {
    /// Name used for output files and pretrained weight lookup
    pub fn model_name(&self) -> &'static str {
        match self {
            BackboneKind::ResNet152 => "resnet152",
            BackboneKind::EfficientNet => "efficientnet_v2_b1",
            BackboneKind::Xception => "xception",
            BackboneKind::CompactCnn => "compact_cnn",
        }
    }

    /// Whether the backbone is meant to start from pretrained weights
    pub fn is_transfer(&self) -> bool {
        !matches!(self, BackboneKind::CompactCnn)
    }
}

impl std::fmt::Display for BackboneKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.model_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_names_are_distinct() {
        let kinds = [
            BackboneKind::ResNet152,
            BackboneKind::EfficientNet,
            BackboneKind::Xception,
            BackboneKind::CompactCnn,
        ];
        let names: std::collections::HashSet<_> = kinds.iter().map(|k| k.model_name()).collect();
        assert_eq!(names.len(), kinds.len());
    }

    #[test]
    fn test_only_compact_is_from_scratch() {
        assert!(BackboneKind::ResNet152.is_transfer());
        assert!(!BackboneKind::CompactCnn.is_transfer());
    }
}
