// ============================================================
// Layer 3 — Evaluation Outcomes and Metric History
// ============================================================
// An evaluator reports one PRIMARY metric whose name is chosen
// at runtime (e.g. "avg_recall" or "t2i_r@1"), plus any number
// of auxiliary metrics. The controller never assumes a fixed
// metric name: it records whatever the outcome names as primary.
//
// MetricHistory is append-only while the run is going and is
// only ranked (descending by value) when the final "best"
// report is produced.

use std::collections::BTreeMap;
use std::fmt;

/// Held-out splits the controller can evaluate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Split {
    Dev,
    Test,
}

impl Split {
    pub fn as_str(&self) -> &'static str {
        match self {
            Split::Dev  => "dev",
            Split::Test => "test",
        }
    }
}

impl fmt::Display for Split {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one full evaluation pass over a split.
#[derive(Debug, Clone, PartialEq)]
pub struct EvalOutcome {
    /// Name of the metric to track across the run
    pub primary_metric: String,
    /// Value of that metric
    pub primary_value: f64,
    /// Every other metric the evaluator computed
    pub auxiliary: BTreeMap<String, f64>,
}

impl EvalOutcome {
    pub fn new(primary_metric: impl Into<String>, primary_value: f64) -> Self {
        Self {
            primary_metric: primary_metric.into(),
            primary_value,
            auxiliary: BTreeMap::new(),
        }
    }

    pub fn with_auxiliary(mut self, name: impl Into<String>, value: f64) -> Self {
        self.auxiliary.insert(name.into(), value);
        self
    }

    /// One-line human readable summary, primary metric first.
    pub fn summary(&self) -> String {
        let mut line = format!("{}: {:.6}", self.primary_metric, self.primary_value);
        for (name, value) in &self.auxiliary {
            line.push_str(&format!(", {name}: {value:.6}"));
        }
        line
    }
}

/// One evaluation event: (step, metric name, metric value).
#[derive(Debug, Clone, PartialEq)]
pub struct MetricRecord {
    pub step:   u64,
    pub metric: String,
    pub value:  f64,
}

impl MetricRecord {
    pub fn new(step: u64, metric: impl Into<String>, value: f64) -> Self {
        Self { step, metric: metric.into(), value }
    }

    pub fn from_outcome(step: u64, outcome: &EvalOutcome) -> Self {
        Self::new(step, outcome.primary_metric.clone(), outcome.primary_value)
    }
}

/// Append-only record of evaluation events for one split.
#[derive(Debug, Clone, Default)]
pub struct MetricHistory {
    records: Vec<MetricRecord>,
}

impl MetricHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, record: MetricRecord) {
        self.records.push(record);
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records in insertion order.
    #[cfg(test)]
    pub fn records(&self) -> &[MetricRecord] {
        &self.records
    }

    /// Records sorted descending by value. The sort is stable, so among
    /// equal values the earliest evaluation comes first.
    pub fn ranked(&self) -> Vec<&MetricRecord> {
        let mut ranked: Vec<&MetricRecord> = self.records.iter().collect();
        ranked.sort_by(|a, b| b.value.total_cmp(&a.value));
        ranked
    }

    /// Highest-valued record, if any evaluation happened.
    pub fn best(&self) -> Option<&MetricRecord> {
        self.ranked().into_iter().next()
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_best_is_highest_value() {
        let mut h = MetricHistory::new();
        h.push(MetricRecord::new(10, "recall@1", 0.40));
        h.push(MetricRecord::new(20, "recall@1", 0.55));
        h.push(MetricRecord::new(30, "recall@1", 0.50));

        let best = h.best().unwrap();
        assert_eq!(best, &MetricRecord::new(20, "recall@1", 0.55));
    }

    #[test]
    fn test_ranking_leaves_insertion_order_untouched() {
        let mut h = MetricHistory::new();
        h.push(MetricRecord::new(1, "m", 0.1));
        h.push(MetricRecord::new(2, "m", 0.9));

        let ranked: Vec<u64> = h.ranked().iter().map(|r| r.step).collect();
        assert_eq!(ranked, vec![2, 1]);
        assert_eq!(h.records()[0].step, 1);
    }

    #[test]
    fn test_ties_keep_earliest_first() {
        let mut h = MetricHistory::new();
        h.push(MetricRecord::new(5, "m", 0.7));
        h.push(MetricRecord::new(9, "m", 0.7));
        assert_eq!(h.best().unwrap().step, 5);
    }

    #[test]
    fn test_empty_history_has_no_best() {
        assert!(MetricHistory::new().best().is_none());
    }

    #[test]
    fn test_record_from_outcome_uses_primary_metric() {
        let outcome = EvalOutcome::new("t2i_r@1", 0.31).with_auxiliary("avg_recall", 0.5);
        let rec     = MetricRecord::from_outcome(42, &outcome);
        assert_eq!(rec, MetricRecord::new(42, "t2i_r@1", 0.31));
    }

    #[test]
    fn test_summary_lists_primary_first() {
        let outcome = EvalOutcome::new("avg_recall", 0.5).with_auxiliary("i2t_r@1", 0.25);
        assert_eq!(outcome.summary(), "avg_recall: 0.500000, i2t_r@1: 0.250000");
    }
}
