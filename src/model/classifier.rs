//! Binary lesion classifier and the model factory
//!
//! The architecture is fully described by [`ClassifierConfig`], which is
//! stored next to every checkpoint so a model can be rebuilt and reloaded
//! without knowing in advance which backbone produced it.

use std::path::{Path, PathBuf};

use burn::{
    config::Config,
    module::Module,
    record::{FullPrecisionSettings, NamedMpkFileRecorder},
    tensor::{activation::sigmoid, backend::Backend, Tensor},
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::compact::{CompactCnn, CompactCnnConfig, COMPACT_FEATURES};
use super::efficientnet::{EfficientNet, EfficientNetConfig};
use super::head::{ClassifierHead, HeadConfig};
use super::resnet::{ResNet, ResNetConfig};
use super::xception::{Xception, XceptionConfig};
use super::BackboneKind;
use crate::config::ModelSettings;
use crate::utils::error::{LesionError, Result as LesionResult};

/// Recorder used for model weights, optimizer state and pretrained backbones
pub type WeightsRecorder = NamedMpkFileRecorder<FullPrecisionSettings>;

/// Backbone-specific architecture parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Architecture {
    ResNet(ResNetConfig),
    EfficientNet(EfficientNetConfig),
    Xception(XceptionConfig),
    CompactCnn(CompactCnnConfig),
}

#[derive(Config, Debug)]
pub struct ClassifierConfig {
    pub architecture: Architecture,
    pub image_height: usize,
    pub image_width: usize,
}

impl ClassifierConfig {
    /// Default architecture for a backbone at the given input size
    pub fn for_backbone(kind: BackboneKind, image_height: usize, image_width: usize) -> Self {
        let architecture = match kind {
            BackboneKind::ResNet152 => Architecture::ResNet(ResNetConfig::resnet152()),
            BackboneKind::EfficientNet => Architecture::EfficientNet(EfficientNetConfig::b1()),
            BackboneKind::Xception => Architecture::Xception(XceptionConfig::standard()),
            BackboneKind::CompactCnn => {
                Architecture::CompactCnn(CompactCnnConfig::new(image_height, image_width))
            }
        };
        Self::new(architecture, image_height, image_width)
    }

    pub fn kind(&self) -> BackboneKind {
        match &self.architecture {
            Architecture::ResNet(_) => BackboneKind::ResNet152,
            Architecture::EfficientNet(_) => BackboneKind::EfficientNet,
            Architecture::Xception(_) => BackboneKind::Xception,
            Architecture::CompactCnn(_) => BackboneKind::CompactCnn,
        }
    }

    pub fn validate(&self) -> LesionResult<()> {
        if self.image_height == 0 || self.image_width == 0 {
            return Err(LesionError::Model("image size must be non-zero".to_string()));
        }

        match &self.architecture {
            Architecture::ResNet(c) if c.layers.is_empty() || c.base_width == 0 => Err(
                LesionError::Model("ResNet needs at least one stage and a non-zero width".to_string()),
            ),
            Architecture::EfficientNet(c) if c.stages.is_empty() => {
                Err(LesionError::Model("EfficientNet needs at least one stage".to_string()))
            }
            Architecture::Xception(c) => c.check().map_err(LesionError::Model),
            Architecture::CompactCnn(c) => {
                if c.height != self.image_height || c.width != self.image_width {
                    return Err(LesionError::Model(format!(
                        "compact CNN built for {}x{} but images are {}x{}",
                        c.height, c.width, self.image_height, self.image_width
                    )));
                }
                c.feature_map().map(|_| ()).ok_or_else(|| {
                    LesionError::Model(format!(
                        "compact CNN needs at least 30x30 inputs, got {}x{}",
                        c.height, c.width
                    ))
                })
            }
            _ => Ok(()),
        }
    }

    /// Head matching the backbone's feature width
    pub fn head(&self) -> HeadConfig {
        match &self.architecture {
            Architecture::ResNet(c) => HeadConfig::new(c.output_features())
                .with_hidden(c.head_hidden)
                .with_output_dropout(c.head_dropout),
            Architecture::EfficientNet(c) => HeadConfig::new(c.head_channels)
                .with_input_dropout(c.head_input_dropout)
                .with_hidden(c.head_hidden)
                .with_batch_norm(true),
            Architecture::Xception(c) => HeadConfig::new(c.output_features())
                .with_input_dropout(c.head_dropout)
                .with_hidden(c.head_hidden)
                .with_output_dropout(c.head_dropout),
            Architecture::CompactCnn(_) => HeadConfig::new(COMPACT_FEATURES),
        }
    }

    /// First backbone block left trainable when fine-tuning a ResNet
    pub fn fine_tune_from(&self) -> Option<usize> {
        match &self.architecture {
            Architecture::ResNet(c) => Some(c.last_stage_start()),
            _ => None,
        }
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> LesionClassifier<B> {
        let backbone = match &self.architecture {
            Architecture::ResNet(c) => LesionBackbone::ResNet(c.init(device)),
            Architecture::EfficientNet(c) => LesionBackbone::EfficientNet(c.init(device)),
            Architecture::Xception(c) => LesionBackbone::Xception(c.init(device)),
            Architecture::CompactCnn(c) => LesionBackbone::Compact(c.init(device)),
        };

        LesionClassifier {
            backbone,
            head: self.head().init(device),
        }
    }
}

#[derive(Module, Debug)]
pub enum LesionBackbone<B: Backend> {
    ResNet(ResNet<B>),
    EfficientNet(EfficientNet<B>),
    Xception(Xception<B>),
    Compact(CompactCnn<B>),
}

impl<B: Backend> LesionBackbone<B> {
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        match self {
            LesionBackbone::ResNet(m) => m.forward(images),
            LesionBackbone::EfficientNet(m) => m.forward(images),
            LesionBackbone::Xception(m) => m.forward(images),
            LesionBackbone::Compact(m) => m.forward(images),
        }
    }
}

#[derive(Module, Debug)]
pub struct LesionClassifier<B: Backend> {
    pub backbone: LesionBackbone<B>,
    pub head: ClassifierHead<B>,
}

impl<B: Backend> LesionClassifier<B> {
    /// `[batch, 3, H, W]` → `[batch, 1]` logits
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        self.head.forward(self.backbone.forward(images))
    }

    /// Malignant-class probabilities, `[batch]`
    pub fn predict(&self, images: Tensor<B, 4>) -> Tensor<B, 1> {
        sigmoid(self.forward(images)).flatten(0, 1)
    }

    /// Freeze backbone parameters. `trainable` opens the fine-tuning range
    /// for backbones that define one.
    pub fn freeze_backbone(self, trainable: bool, fine_tune_from: Option<usize>) -> Self {
        let backbone = match self.backbone {
            LesionBackbone::ResNet(m) => {
                LesionBackbone::ResNet(m.freeze(if trainable { fine_tune_from } else { None }))
            }
            LesionBackbone::EfficientNet(m) if trainable => LesionBackbone::EfficientNet(m),
            LesionBackbone::EfficientNet(m) => LesionBackbone::EfficientNet(m.no_grad()),
            LesionBackbone::Xception(m) => LesionBackbone::Xception(m.freeze(trainable)),
            compact @ LesionBackbone::Compact(_) => compact,
        };

        Self {
            backbone,
            head: self.head,
        }
    }

    /// Load backbone weights from `<path>.mpk`, leaving the head untouched
    pub fn load_backbone_weights(self, kind: BackboneKind, path: &Path, device: &B::Device) -> LesionResult<Self> {
        let weights_file = path.with_extension("mpk");
        let unavailable = |reason: String| LesionError::PretrainedWeights {
            backbone: kind.model_name().to_string(),
            path: weights_file.clone(),
            reason,
        };

        if !weights_file.exists() {
            return Err(unavailable("file not found".to_string()));
        }

        let recorder = WeightsRecorder::new();
        let file = PathBuf::from(path);
        let backbone = match self.backbone {
            LesionBackbone::ResNet(m) => m
                .load_file(file, &recorder, device)
                .map(LesionBackbone::ResNet),
            LesionBackbone::EfficientNet(m) => m
                .load_file(file, &recorder, device)
                .map(LesionBackbone::EfficientNet),
            LesionBackbone::Xception(m) => m
                .load_file(file, &recorder, device)
                .map(LesionBackbone::Xception),
            LesionBackbone::Compact(_) => {
                return Err(unavailable("the compact CNN has no pretrained weights".to_string()))
            }
        }
        .map_err(|e| unavailable(format!("{:?}", e)))?;

        Ok(Self {
            backbone,
            head: self.head,
        })
    }

    /// Named head weight matrices for histogram logging
    pub fn head_weights(&self) -> Vec<(String, Tensor<B, 2>)> {
        self.head.weights()
    }
}

/// Model factory: build, optionally load pretrained weights, freeze.
pub fn build_classifier<B: Backend>(
    settings: &ModelSettings,
    image_height: usize,
    image_width: usize,
    device: &B::Device,
) -> LesionResult<(LesionClassifier<B>, ClassifierConfig)> {
    let config = ClassifierConfig::for_backbone(settings.backbone, image_height, image_width);
    config.validate()?;

    let mut model = config.init::<B>(device);
    debug!("Initialized {} with {} parameters", settings.backbone, model.num_params());

    if settings.backbone.is_transfer() {
        if settings.pretrained {
            let path = settings.weights_dir.join(settings.backbone.model_name());
            model = model.load_backbone_weights(settings.backbone, &path, device)?;
            info!("Loaded pretrained {} weights from {:?}", settings.backbone, path);
        }

        if settings.freeze_backbone {
            model = model.freeze_backbone(settings.trainable, config.fine_tune_from());
        }
    }

    Ok((model, config))
}
