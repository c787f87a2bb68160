//! Skin-lesion classification CLI
//!
//! Trains one backbone on the HAM10000 splits, evaluates the best checkpoint
//! on the test split and writes every artefact under the output directory.

use std::io::IsTerminal;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use tracing::info;

use lesion_classifier::backend::backend_name;
use lesion_classifier::config::ExperimentConfig;
use lesion_classifier::pipeline::{self, RunSummary};
use lesion_classifier::utils::logging::{init_logging, LogConfig, LogLevel};

/// Binary skin-lesion classification with transfer learning
#[derive(Parser, Debug)]
#[command(name = "lesion_classifier")]
#[command(version = "0.1.0")]
#[command(about = "Train and evaluate a benign/malignant lesion classifier with Burn", long_about = None)]
struct Cli {
    /// Training-set size, split evenly between classes (-1 uses every row) [default: -1]
    #[arg(long = "num_desired_train_examples", allow_negative_numbers = true)]
    num_desired_train_examples: Option<i64>,

    /// TOML experiment configuration; built-in defaults when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, default_value = "false")]
    verbose: bool,

    /// Only log errors
    #[arg(short, long, default_value = "false", conflicts_with = "verbose")]
    quiet: bool,

    /// Log level override (trace, debug, info, warn, error)
    #[arg(long = "log_level")]
    log_level: Option<String>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut log_config = if cli.verbose {
        LogConfig::verbose()
    } else if cli.quiet {
        LogConfig::quiet()
    } else if !std::io::stdout().is_terminal() {
        LogConfig::production()
    } else {
        LogConfig::default()
    };
    if let Some(level) = &cli.log_level {
        log_config.level = LogLevel::parse(level);
    }
    let _ = init_logging(&log_config);

    print_banner();

    let mut config = match &cli.config {
        Some(path) => ExperimentConfig::load(path)
            .with_context(|| format!("Failed to load configuration {:?}", path))?,
        None => ExperimentConfig::default(),
    };
    if let Some(n) = cli.num_desired_train_examples {
        config.data.num_desired_train_examples = n;
    }

    println!("  Backend:  {}", backend_name().cyan());
    println!("  Backbone: {}", config.model.backbone.to_string().cyan());
    println!(
        "  Examples: {}",
        config.data.num_desired_train_examples.to_string().cyan()
    );
    println!();
    info!("Configuration: {:?}", config);

    let summary = pipeline::run(&config)?;
    print_summary(&summary);

    Ok(())
}

fn print_banner() {
    println!(
        "{}",
        r#"
 ╔══════════════════════════════════════════════════════════╗
 ║   Skin Lesion Classification                             ║
 ║   Benign vs Malignant with Burn + Rust                   ║
 ╚══════════════════════════════════════════════════════════╝
  "#
        .green()
    );
}

fn print_summary(summary: &RunSummary) {
    let report = &summary.report;

    println!();
    println!("{}", "Run Complete!".green().bold());
    println!("  Base name:     {}", summary.base_name);
    println!("  Epochs run:    {}", summary.epochs_run);
    if let Some(best) = summary.best_epoch {
        println!("  Best epoch:    {}", best + 1);
    }
    if let Some(stopped) = summary.stopped_epoch {
        println!("  {} at epoch {}", "Stopped early".yellow(), stopped + 1);
    }
    println!();
    println!("{}", "Test Metrics".cyan().bold());
    println!("  Accuracy:  {:.4}", report.test_accuracy);
    println!("  AUC:       {:.4}", report.test_auc);
    println!("  Recall:    {:.4}", report.recall);
    println!("  Precision: {:.4}", report.precision);
    println!("  F1:        {:.4}", report.f1);
    println!("  Loss:      {:.4}", report.test_loss);
    println!();
    println!("  Outputs:   {:?}", summary.output_dir);
}
