// ============================================================
// Layer 6 — Evaluation Metrics Logger
// ============================================================
// Appends one CSV row per evaluation event, so a run's learning
// curve survives the process even though the in-memory metric
// history does not.
//
// Example CSV output:
//   split,step,metric,value
//   dev,1000,avg_recall,0.412300
//   test,1000,avg_recall,0.398100
//   dev,2000,avg_recall,0.455000
//
// Only the leader worker writes rows.
//
// Reference: Rust Book §12 (I/O and File Handling)

use anyhow::{Context, Result};
use std::{
    fs::{self, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
};
use serde::{Deserialize, Serialize};

use crate::domain::metrics::{EvalOutcome, Split};

/// One row of the evaluation CSV
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalRow {
    /// "dev" or "test"
    pub split: String,

    /// Step counter at the time of evaluation
    pub step: u64,

    /// Name of the primary metric
    pub metric: String,

    pub value: f64,
}

impl EvalRow {
    pub fn new(split: Split, step: u64, outcome: &EvalOutcome) -> Self {
        Self {
            split:  split.to_string(),
            step,
            metric: outcome.primary_metric.clone(),
            value:  outcome.primary_value,
        }
    }
}

/// Logs evaluation events to a CSV file for later analysis.
pub struct MetricsLogger {
    /// Full path to the CSV file
    csv_path: PathBuf,
}

impl MetricsLogger {
    /// Create a new MetricsLogger.
    /// Writes the CSV header if the file doesn't exist yet, so repeated
    /// runs keep appending to the same log.
    pub fn new(csv_path: impl Into<PathBuf>) -> Result<Self> {
        let csv_path = csv_path.into();

        if let Some(parent) = csv_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("Cannot create '{}'", parent.display()))?;
        }

        if !csv_path.exists() {
            let mut f = fs::File::create(&csv_path)
                .with_context(|| format!("Cannot create '{}'", csv_path.display()))?;
            writeln!(f, "split,step,metric,value")?;
            tracing::debug!("Created metrics CSV: '{}'", csv_path.display());
        }

        Ok(Self { csv_path })
    }

    /// Append one evaluation event as a new row.
    pub fn log(&self, row: &EvalRow) -> Result<()> {
        let mut f = OpenOptions::new()
            .append(true)
            .open(&self.csv_path)
            .with_context(|| format!("Cannot open '{}'", self.csv_path.display()))?;

        writeln!(f, "{},{},{},{:.6}", row.split, row.step, row.metric, row.value)?;

        tracing::debug!(
            "Logged {} evaluation at step {}: {}={:.4}",
            row.split,
            row.step,
            row.metric,
            row.value,
        );

        Ok(())
    }

    /// Return the path to the metrics CSV file
    pub fn csv_path(&self) -> &Path {
        &self.csv_path
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_written_once() {
        let dir  = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("eval.csv");

        let logger  = MetricsLogger::new(&path).unwrap();
        let outcome = EvalOutcome::new("avg_recall", 0.5);
        logger.log(&EvalRow::new(Split::Dev, 10, &outcome)).unwrap();

        // Re-opening must not repeat the header
        let again = MetricsLogger::new(&path).unwrap();
        again.log(&EvalRow::new(Split::Test, 20, &outcome)).unwrap();

        let csv = fs::read_to_string(again.csv_path()).unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines, vec![
            "split,step,metric,value",
            "dev,10,avg_recall,0.500000",
            "test,20,avg_recall,0.500000",
        ]);
    }
}
