//! End-to-end experiment: load, balance, train, evaluate, persist.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use burn::tensor::backend::AutodiffBackend;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::{info, warn};

use crate::backend::{default_device, TrainingBackend};
use crate::config::{ExperimentConfig, ALL_TRAIN_EXAMPLES};
use crate::dataset::balance::balance_classes;
use crate::dataset::burn_dataset::LesionDataset;
use crate::dataset::loader::{load_split, LesionSplit};
use crate::evaluation::evaluator::{evaluate_checkpoint, render_plots, EvaluationReport};
use crate::model::build_classifier;
use crate::report::persist_results;
use crate::training::trainer::{FitPaths, Trainer};

pub const CONFIG_COPY_FILE: &str = "experiment_config.toml";

/// What a finished run produced
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub output_dir: PathBuf,
    pub base_name: String,
    /// Rows actually used for training
    pub num_train_examples: i64,
    pub epochs_run: usize,
    pub best_epoch: Option<usize>,
    pub stopped_epoch: Option<usize>,
    pub best_checkpoint: PathBuf,
    pub history_file: PathBuf,
    pub text_report: PathBuf,
    pub report: EvaluationReport,
}

/// Run an experiment on the default backend
pub fn run(config: &ExperimentConfig) -> Result<RunSummary> {
    run_with_backend::<TrainingBackend>(config, &default_device())
}

fn load_splits(config: &ExperimentConfig) -> Result<(LesionSplit, LesionSplit, LesionSplit)> {
    let d = &config.data;
    let load = |name: &str, csv: &PathBuf, dir: &PathBuf| {
        load_split(name, csv, dir, &d.image_suffix)
            .with_context(|| format!("Failed to load {} split from {:?}", name, csv))
    };

    Ok((
        load("train", &d.train_csv, &d.train_dir)?,
        load("validation", &d.validation_csv, &d.validation_dir)?,
        load("test", &d.test_csv, &d.test_dir)?,
    ))
}

pub fn run_with_backend<B: AutodiffBackend>(config: &ExperimentConfig, device: &B::Device) -> Result<RunSummary> {
    config.validate().context("Invalid experiment configuration")?;

    let mut rng = match config.seed {
        Some(seed) => ChaCha8Rng::seed_from_u64(seed),
        None => ChaCha8Rng::from_entropy(),
    };

    let (mut train, validation, test) = load_splits(config)?;

    if let Some((n_benign, n_malignant)) = config.balance_caps() {
        let subset = balance_classes(&train.records, n_benign, n_malignant, &mut rng);
        train = train.with_records(subset);
    }
    for split in [&train, &validation, &test] {
        split.log_summary();
    }

    let requested = config.data.num_desired_train_examples;
    let effective = train.len() as i64;
    if effective != requested {
        if requested == ALL_TRAIN_EXAMPLES {
            info!("Using all {} training rows", effective);
        } else {
            warn!(
                "Requested {} training examples but {} are available; updating num_desired_train_examples",
                requested, effective
            );
        }
    }
    let base_name = config.base_name(effective);

    let output_dir = config.output_dir();
    fs::create_dir_all(&output_dir)
        .with_context(|| format!("Failed to create output directory {:?}", output_dir))?;
    config.save(&output_dir.join(CONFIG_COPY_FILE))?;
    info!("Writing outputs to {:?} (base name {})", output_dir, base_name);

    let (height, width) = (config.data.image_height, config.data.image_width);
    let train_ds = LesionDataset::new_cached(train.samples(), height, width)?;
    let val_ds = LesionDataset::new_cached(validation.samples(), height, width)?;
    let test_ds = LesionDataset::new_cached(test.samples(), height, width)?;

    let (model, architecture) = build_classifier::<B>(&config.model, height, width, device)
        .with_context(|| format!("Failed to build {} classifier", config.model.backbone))?;

    let paths = FitPaths::new(&output_dir, config.log_dir(&base_name), &base_name);
    let trainer = Trainer::new(model, architecture, config.training.clone(), device.clone());
    let outcome = trainer.fit(&train_ds, &val_ds, &paths, &mut rng)?;

    let report = evaluate_checkpoint::<B::InnerBackend>(
        &paths.best_checkpoint,
        &test_ds,
        config.training.batch_size,
        config.training.decision_threshold,
        device,
    )
    .context("Failed to evaluate the best checkpoint")?;
    report.log_summary();

    render_plots(&outcome.history, &report, &output_dir, &base_name)?;
    let persisted = persist_results(&output_dir, &base_name, &outcome.history, &report, effective)?;

    Ok(RunSummary {
        output_dir,
        base_name,
        num_train_examples: effective,
        epochs_run: outcome.history.len(),
        best_epoch: outcome.best_epoch,
        stopped_epoch: outcome.stopped_epoch,
        best_checkpoint: paths.best_checkpoint,
        history_file: persisted.history,
        text_report: persisted.text_report,
        report,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::burn_dataset::LesionBatcher;
    use crate::evaluation::evaluator::evaluate_pass;
    use crate::evaluation::metrics::roc_auc_score;
    use crate::model::{BackboneKind, LesionClassifier};
    use crate::report::load_history;
    use crate::training::checkpoint::{load_classifier, load_optimizer};
    use crate::training::histograms::read_events;
    use burn::backend::Autodiff;
    use burn::optim::AdamConfig;
    use burn_ndarray::NdArray;
    use image::{Rgb, RgbImage};
    use std::path::Path;

    type TestBackend = Autodiff<NdArray>;

    /// 10 benign (dark) and 10 malignant (bright) 4x4 solid images
    fn write_fixture(root: &Path) -> ExperimentConfig {
        let images = root.join("images");
        fs::create_dir_all(&images).unwrap();

        let mut csv = String::from("image_name,target\n");
        for i in 0..20 {
            let malignant = i % 2 == 1;
            let shade = if malignant { 200 + i as u8 } else { 20 + i as u8 };
            let name = format!("ISIC_{:04}", i);
            RgbImage::from_pixel(4, 4, Rgb([shade, shade / 2, shade / 3]))
                .save(images.join(format!("{}.png", name)))
                .unwrap();
            csv.push_str(&format!("{},{}\n", name, malignant as u8));
        }
        let csv_path = root.join("rows.csv");
        fs::write(&csv_path, csv).unwrap();

        let mut config = ExperimentConfig::default();
        config.seed = Some(42);
        config.data.train_csv = csv_path.clone();
        config.data.validation_csv = csv_path.clone();
        config.data.test_csv = csv_path;
        config.data.train_dir = images.clone();
        config.data.validation_dir = images.clone();
        config.data.test_dir = images;
        config.data.image_suffix = ".png".to_string();
        config.data.image_height = 32;
        config.data.image_width = 32;
        config.model.backbone = BackboneKind::CompactCnn;
        config.model.pretrained = false;
        config.training.epochs = 2;
        config.training.batch_size = 2;
        config.output.output_root = root.join("outputs");
        config.output.log_root = root.join("logs");
        config
    }

    #[test]
    fn test_smoke_run_writes_history() {
        let dir = tempfile::tempdir().unwrap();
        let config = write_fixture(dir.path());
        let device = Default::default();

        let summary = run_with_backend::<TestBackend>(&config, &device).unwrap();

        assert_eq!(summary.num_train_examples, 20);
        assert_eq!(summary.base_name, "compact_cnn20");
        assert_eq!(summary.output_dir, dir.path().join("outputs/id_22/compact_cnn-1"));
        assert_eq!(summary.epochs_run, 2);

        let history = load_history(&summary.history_file).unwrap();
        for key in ["loss", "val_loss", "test_accuracy", "auc"] {
            assert!(history.contains_key(key), "missing {}", key);
        }
        assert_eq!(history["loss"].as_series().map(|s| s.len()), Some(2));

        let out = &summary.output_dir;
        assert!(out.join(CONFIG_COPY_FILE).exists());
        assert!(out.join("best_model_compact_cnn20/model.mpk").exists());
        assert!(out.join("last_model_compact_cnn20/architecture.json").exists());
        assert!(out.join("metrics_compact_cnn20.png").exists());
        assert!(out.join("cm_compact_cnn20.png").exists());
        assert!(summary.text_report.exists());

        let events = read_events(&dir.path().join("logs/compact_cnn20/events.jsonl")).unwrap();
        assert_eq!(events.len(), summary.epochs_run);
        assert_eq!(events[1].epoch, 1);
        assert!(events[0].histograms.iter().any(|h| h.name == "val_probabilities"));

        let optimizer = AdamConfig::new().init::<TestBackend, LesionClassifier<TestBackend>>();
        let last = out.join("last_model_compact_cnn20");
        assert!(load_optimizer::<TestBackend, _>(&last, optimizer, &device).is_ok());
    }

    #[test]
    fn test_balanced_request_names_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = write_fixture(dir.path());
        config.data.num_desired_train_examples = 8;
        config.training.epochs = 1;
        let device = Default::default();

        let summary = run_with_backend::<TestBackend>(&config, &device).unwrap();

        assert_eq!(summary.num_train_examples, 8);
        assert_eq!(summary.base_name, "compact_cnn8");
        assert!(summary.output_dir.ends_with("compact_cnn8"));
    }

    #[test]
    fn test_best_checkpoint_remeasures_at_least_prior_val_auc() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = write_fixture(dir.path());
        config.training.epochs = 3;
        config.training.histogram_freq = 0;
        let device = Default::default();

        let summary = run_with_backend::<TestBackend>(&config, &device).unwrap();
        let history = load_history(&summary.history_file).unwrap();
        let val_auc = history["val_auc"].as_series().unwrap().to_vec();
        let best_epoch = summary.best_epoch.unwrap();

        let (model, arch, metadata) = load_classifier::<NdArray>(&summary.best_checkpoint, &device).unwrap();
        assert_eq!(metadata.epoch, best_epoch);

        let split = load_split(
            "validation",
            &config.data.validation_csv,
            &config.data.validation_dir,
            &config.data.image_suffix,
        )
        .unwrap();
        let dataset = LesionDataset::new_cached(split.samples(), arch.image_height, arch.image_width).unwrap();
        let batcher = LesionBatcher::new(arch.image_height, arch.image_width);
        let pass = evaluate_pass(&model, &dataset, &batcher, config.training.batch_size, &device).unwrap();
        let remeasured = roc_auc_score(&pass.labels, &pass.probabilities).unwrap();

        for earlier in &val_auc[..=best_epoch] {
            assert!(remeasured >= earlier - 1e-6, "{} < {}", remeasured, earlier);
        }
    }

    #[test]
    fn test_missing_csv_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = write_fixture(dir.path());
        config.data.test_csv = dir.path().join("missing.csv");

        let err = run_with_backend::<TestBackend>(&config, &Default::default()).unwrap_err();
        assert!(format!("{:#}", err).contains("test split"));
    }
}
