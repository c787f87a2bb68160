//! CSV dataset loader
//!
//! Each split is described by a CSV with at least the columns `image_name`
//! and `target` ("0" benign, "1" malignant). Other columns are ignored.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::utils::error::{LesionError, Result};
use crate::utils::format_number;

/// Binary lesion label
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Label {
    Benign,
    Malignant,
}

impl Label {
    /// Parse the CSV representation ("0" or "1")
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "0" => Some(Label::Benign),
            "1" => Some(Label::Malignant),
            _ => None,
        }
    }

    pub fn as_index(&self) -> usize {
        match self {
            Label::Benign => 0,
            Label::Malignant => 1,
        }
    }

    pub fn as_target(&self) -> f32 {
        self.as_index() as f32
    }
}

impl std::fmt::Display for Label {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_index())
    }
}

/// One dataset row
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LesionRecord {
    pub image_name: String,
    pub label: Label,
}

impl LesionRecord {
    pub fn new(image_name: impl Into<String>, label: Label) -> Self {
        Self {
            image_name: image_name.into(),
            label,
        }
    }
}

#[derive(Debug, Deserialize)]
struct CsvRow {
    image_name: String,
    target: String,
}

/// A loaded split: rows plus where their images live
#[derive(Debug, Clone)]
pub struct LesionSplit {
    pub name: String,
    pub records: Vec<LesionRecord>,
    pub image_dir: PathBuf,
    pub image_suffix: String,
}

impl LesionSplit {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// `(benign, malignant)` counts
    pub fn class_counts(&self) -> (usize, usize) {
        class_counts(&self.records)
    }

    pub fn image_path(&self, record: &LesionRecord) -> PathBuf {
        self.image_dir
            .join(format!("{}{}", record.image_name, self.image_suffix))
    }

    /// `(path, label)` pairs in row order
    pub fn samples(&self) -> Vec<(PathBuf, Label)> {
        self.records
            .iter()
            .map(|r| (self.image_path(r), r.label))
            .collect()
    }

    pub fn with_records(&self, records: Vec<LesionRecord>) -> Self {
        Self {
            records,
            ..self.clone()
        }
    }

    pub fn log_summary(&self) {
        let (benign, malignant) = self.class_counts();
        info!(
            "{}: {} rows (0: {}, 1: {})",
            self.name,
            format_number(self.len()),
            benign,
            malignant
        );
    }
}

/// `(benign, malignant)` counts
pub fn class_counts(records: &[LesionRecord]) -> (usize, usize) {
    records.iter().fold((0, 0), |(b, m), r| match r.label {
        Label::Benign => (b + 1, m),
        Label::Malignant => (b, m + 1),
    })
}

/// Read the rows of one CSV file
pub fn read_records(csv_path: &Path) -> Result<Vec<LesionRecord>> {
    let csv_error = |message: String| LesionError::Csv {
        path: csv_path.to_path_buf(),
        message,
    };

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_path(csv_path)
        .map_err(|e| csv_error(e.to_string()))?;

    let mut records = Vec::new();
    for (i, row) in reader.deserialize::<CsvRow>().enumerate() {
        let row = row.map_err(|e| csv_error(e.to_string()))?;
        let label = Label::parse(&row.target).ok_or_else(|| {
            LesionError::Dataset(format!(
                "{}: row {} ('{}') has target '{}', expected \"0\" or \"1\"",
                csv_path.display(),
                i + 2,
                row.image_name,
                row.target
            ))
        })?;
        records.push(LesionRecord::new(row.image_name, label));
    }

    Ok(records)
}

/// Load one split
pub fn load_split(name: &str, csv_path: &Path, image_dir: &Path, image_suffix: &str) -> Result<LesionSplit> {
    let records = read_records(csv_path)?;
    Ok(LesionSplit {
        name: name.to_string(),
        records,
        image_dir: image_dir.to_path_buf(),
        image_suffix: image_suffix.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write_csv(dir: &Path, content: &str) -> PathBuf {
        let path = dir.join("split.csv");
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_reads_rows_and_ignores_extra_columns() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_csv(
            dir.path(),
            "lesion_id,image_name,target,age\nL1,ISIC_0001,0,45\nL2,ISIC_0002,1,60\n",
        );

        let records = read_records(&path).unwrap();
        assert_eq!(
            records,
            vec![
                LesionRecord::new("ISIC_0001", Label::Benign),
                LesionRecord::new("ISIC_0002", Label::Malignant),
            ]
        );
    }

    #[test]
    fn test_missing_column_is_csv_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_csv(dir.path(), "image_name,label\nISIC_0001,0\n");
        assert!(matches!(read_records(&path), Err(LesionError::Csv { .. })));
    }

    #[test]
    fn test_bad_label_names_the_row() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_csv(dir.path(), "image_name,target\na,0\nb,benign\n");
        let err = read_records(&path).unwrap_err().to_string();
        assert!(err.contains("row 3"));
        assert!(err.contains("benign"));
    }

    #[test]
    fn test_split_paths_and_counts() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_csv(dir.path(), "image_name,target\na,0\nb,1\nc,0\n");
        let split = load_split("train", &path, Path::new("/images"), ".jpg").unwrap();

        assert_eq!(split.class_counts(), (2, 1));
        assert_eq!(split.samples()[1], (PathBuf::from("/images/b.jpg"), Label::Malignant));
    }

    #[test]
    fn test_missing_file() {
        let result = read_records(Path::new("/nonexistent/train.csv"));
        assert!(matches!(result, Err(LesionError::Csv { .. })));
    }
}
