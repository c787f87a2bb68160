//! Burn Dataset Integration for lesion images
//!
//! Implements Burn's `Dataset` trait and a `Batcher` producing image tensors
//! rescaled to [0, 1] and float targets for binary cross-entropy.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use burn::data::dataloader::batcher::Batcher;
use burn::data::dataset::Dataset;
use burn::prelude::*;
use image::imageops::FilterType;
use image::ImageReader;
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use tracing::{info, warn};

use super::loader::Label;
use crate::utils::error::{LesionError, Result};

/// A single lesion image ready for Burn
#[derive(Clone, Debug)]
pub struct LesionItem {
    /// Image data as flattened CHW float array [3 * H * W]
    pub image: Vec<f32>,
    pub label: Label,
    /// Image path (for debugging/logging)
    pub path: String,
}

impl LesionItem {
    /// Load an image, resize it to `height` x `width` and rescale to [0, 1]
    pub fn from_path(path: &Path, label: Label, height: usize, width: usize) -> Result<Self> {
        let load_error = |e: &dyn std::fmt::Display| LesionError::ImageLoad(path.to_path_buf(), e.to_string());

        let img = ImageReader::open(path)
            .map_err(|e| load_error(&e))?
            .decode()
            .map_err(|e| load_error(&e))?
            .resize_exact(width as u32, height as u32, FilterType::Triangle)
            .to_rgb8();

        let plane = height * width;
        let mut image = vec![0.0f32; 3 * plane];

        // HWC bytes to CHW floats
        for (x, y, pixel) in img.enumerate_pixels() {
            let offset = y as usize * width + x as usize;
            for c in 0..3 {
                image[c * plane + offset] = pixel[c] as f32 / 255.0;
            }
        }

        Ok(Self {
            image,
            label,
            path: path.to_string_lossy().to_string(),
        })
    }
}

/// Lesion dataset implementing Burn's Dataset trait.
///
/// Either decodes images on demand or holds them all in memory.
#[derive(Debug, Clone)]
pub struct LesionDataset {
    samples: Vec<(PathBuf, Label)>,
    height: usize,
    width: usize,
    cached_items: Option<Vec<LesionItem>>,
}

impl LesionDataset {
    /// Lazy dataset; images are decoded in `get`
    pub fn new(samples: Vec<(PathBuf, Label)>, height: usize, width: usize) -> Self {
        Self {
            samples,
            height,
            width,
            cached_items: None,
        }
    }

    /// Decode every image up front (in parallel). Any unreadable image is an error.
    pub fn new_cached(samples: Vec<(PathBuf, Label)>, height: usize, width: usize) -> Result<Self> {
        let total = samples.len();
        info!("Pre-loading {} images at {}x{}", total, height, width);

        let pb = ProgressBar::new(total as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("  {spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({per_sec})")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );

        let loaded = AtomicUsize::new(0);

        let cached_items = samples
            .par_iter()
            .map(|(path, label)| {
                let item = LesionItem::from_path(path, *label, height, width);
                let count = loaded.fetch_add(1, Ordering::Relaxed) + 1;
                if count % 100 == 0 || count == total {
                    pb.set_position(count as u64);
                }
                item
            })
            .collect::<Result<Vec<_>>>();

        pb.finish_and_clear();
        let cached_items = cached_items?;

        Ok(Self {
            samples,
            height,
            width,
            cached_items: Some(cached_items),
        })
    }

    pub fn labels(&self) -> Vec<Label> {
        self.samples.iter().map(|(_, label)| *label).collect()
    }

    pub fn image_size(&self) -> (usize, usize) {
        (self.height, self.width)
    }
}

impl Dataset<LesionItem> for LesionDataset {
    fn get(&self, index: usize) -> Option<LesionItem> {
        if let Some(ref cached) = self.cached_items {
            return cached.get(index).cloned();
        }

        let (path, label) = self.samples.get(index)?;
        match LesionItem::from_path(path, *label, self.height, self.width) {
            Ok(item) => Some(item),
            Err(e) => {
                warn!("Skipping sample {}: {}", index, e);
                None
            }
        }
    }

    fn len(&self) -> usize {
        self.samples.len()
    }
}

/// A batch of lesion images
#[derive(Clone, Debug)]
pub struct LesionBatch<B: Backend> {
    /// Images with shape [batch_size, 3, height, width]
    pub images: Tensor<B, 4>,
    /// Targets (0.0 / 1.0) with shape [batch_size]
    pub targets: Tensor<B, 1>,
}

/// Batcher for lesion images
#[derive(Clone, Debug)]
pub struct LesionBatcher {
    height: usize,
    width: usize,
}

impl LesionBatcher {
    pub fn new(height: usize, width: usize) -> Self {
        Self { height, width }
    }
}

impl<B: Backend> Batcher<B, LesionItem, LesionBatch<B>> for LesionBatcher {
    fn batch(&self, items: Vec<LesionItem>, device: &B::Device) -> LesionBatch<B> {
        let batch_size = items.len();

        let images_data: Vec<f32> = items.iter().flat_map(|item| item.image.iter().copied()).collect();
        let images = Tensor::<B, 4>::from_data(
            TensorData::new(images_data, [batch_size, 3, self.height, self.width]),
            device,
        );

        let targets_data: Vec<f32> = items.iter().map(|item| item.label.as_target()).collect();
        let targets = Tensor::<B, 1>::from_data(TensorData::new(targets_data, [batch_size]), device);

        LesionBatch { images, targets }
    }
}
