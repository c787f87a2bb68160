//! Histogram event log
//!
//! Appends one JSON object per logged epoch to `events.jsonl`, holding the
//! epoch scalars and histograms of head weights and validation probabilities.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::history::EpochRecord;
use crate::utils::error::Result;

pub const EVENTS_FILE: &str = "events.jsonl";
const DEFAULT_BINS: usize = 30;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Histogram {
    pub name: String,
    pub min: f64,
    pub max: f64,
    pub count: usize,
    pub mean: f64,
    /// Right edges of the buckets
    pub bucket_limits: Vec<f64>,
    pub bucket_counts: Vec<u64>,
}

impl Histogram {
    /// Equal-width histogram; non-finite values are skipped
    pub fn from_values(name: impl Into<String>, values: &[f64], bins: usize) -> Self {
        let finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
        let bins = bins.max(1);

        if finite.is_empty() {
            return Self {
                name: name.into(),
                min: 0.0,
                max: 0.0,
                count: 0,
                mean: 0.0,
                bucket_limits: Vec::new(),
                bucket_counts: Vec::new(),
            };
        }

        let min = finite.iter().copied().fold(f64::INFINITY, f64::min);
        let max = finite.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let mean = finite.iter().sum::<f64>() / finite.len() as f64;

        // A constant tensor collapses into one bucket
        let bins = if max > min { bins } else { 1 };
        let width = (max - min) / bins as f64;

        let mut bucket_counts = vec![0u64; bins];
        for v in &finite {
            let idx = if width > 0.0 {
                (((v - min) / width) as usize).min(bins - 1)
            } else {
                0
            };
            bucket_counts[idx] += 1;
        }

        let bucket_limits = (1..=bins).map(|i| min + width * i as f64).collect();

        Self {
            name: name.into(),
            min,
            max,
            count: finite.len(),
            mean,
            bucket_limits,
            bucket_counts,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistogramEvent {
    pub epoch: usize,
    pub scalars: EpochRecord,
    pub histograms: Vec<Histogram>,
}

/// Appends events to `<log_dir>/events.jsonl`
pub struct HistogramWriter {
    path: PathBuf,
    frequency: usize,
    writer: BufWriter<File>,
}

impl HistogramWriter {
    /// Returns None when `frequency` is 0
    pub fn create(log_dir: &Path, frequency: usize) -> Result<Option<Self>> {
        if frequency == 0 {
            return Ok(None);
        }
        fs::create_dir_all(log_dir)?;
        let path = log_dir.join(EVENTS_FILE);
        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        Ok(Some(Self {
            path,
            frequency,
            writer: BufWriter::new(file),
        }))
    }

    pub fn should_log(&self, epoch: usize) -> bool {
        epoch % self.frequency == 0
    }

    pub fn write(&mut self, record: &EpochRecord, tensors: &[(String, Vec<f64>)]) -> Result<()> {
        let event = HistogramEvent {
            epoch: record.epoch,
            scalars: *record,
            histograms: tensors
                .iter()
                .map(|(name, values)| Histogram::from_values(name.clone(), values, DEFAULT_BINS))
                .collect(),
        };

        serde_json::to_writer(&mut self.writer, &event)?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Read every event of a log back
pub fn read_events(path: &Path) -> Result<Vec<HistogramEvent>> {
    fs::read_to_string(path)?
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| serde_json::from_str(line).map_err(Into::into))
        .collect()
}
