// ============================================================
// Layer 5 — Learning Rate Schedules
// ============================================================
// The engine asks `lr_at(step)` before every optimiser step.
// Steps are 1-based (the first optimisation step is step 1).
//
//   linear_warmup_decay : 0 → lr linearly over warmup, then linearly to 0 at the last step
//   noam_decay          : lr · √w · min(s^-½, s · w^-³⁄²)   (peaks at lr when s = w)
//   manual_warmup_decay : linear warmup, then piecewise-constant values between boundaries
//
// Reference: Vaswani et al. (2017) §5.3 (noam schedule)

use anyhow::{ensure, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerKind {
    LinearWarmupDecay,
    NoamDecay,
    ManualWarmupDecay,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LrSchedule {
    LinearWarmupDecay { base: f64, warmup: u64, total: u64 },
    NoamDecay         { base: f64, warmup: u64 },
    ManualWarmupDecay { base: f64, warmup: u64, boundaries: Vec<u64>, values: Vec<f64> },
}

/// Piecewise decay points derived from epoch-based settings:
/// boundaries at `epoch_k * steps_per_epoch`, values `lr * scale^i`.
pub fn epoch_decay_plan(
    base:            f64,
    scale:           f64,
    decay_epochs:    &[u64],
    steps_per_epoch: u64,
) -> (Vec<u64>, Vec<f64>) {
    let boundaries: Vec<u64> = decay_epochs.iter().map(|e| e * steps_per_epoch).collect();
    let values = (0..=boundaries.len() as i32)
        .map(|i| base * scale.powi(i))
        .collect();
    (boundaries, values)
}

impl LrSchedule {
    pub fn build(
        kind:       SchedulerKind,
        base:       f64,
        warmup:     u64,
        total:      u64,
        boundaries: Vec<u64>,
        values:     Vec<f64>,
    ) -> Result<Self> {
        ensure!(base > 0.0, "learning rate must be positive, got {base}");
        Ok(match kind {
            SchedulerKind::LinearWarmupDecay => Self::LinearWarmupDecay { base, warmup, total },
            SchedulerKind::NoamDecay         => Self::NoamDecay { base, warmup },
            SchedulerKind::ManualWarmupDecay => {
                ensure!(
                    values.len() == boundaries.len() + 1,
                    "piecewise decay needs one more value than boundaries ({} vs {})",
                    values.len(),
                    boundaries.len()
                );
                ensure!(
                    boundaries.windows(2).all(|w| w[0] <= w[1]),
                    "decay boundaries must be non-decreasing"
                );
                Self::ManualWarmupDecay { base, warmup, boundaries, values }
            }
        })
    }

    pub fn lr_at(&self, step: u64) -> f64 {
        match self {
            Self::LinearWarmupDecay { base, warmup, total } => {
                if step < *warmup {
                    return base * step as f64 / *warmup as f64;
                }
                if *total == 0 {
                    return *base;
                }
                let progress = step.min(*total) as f64 / *total as f64;
                base * (1.0 - progress)
            }
            Self::NoamDecay { base, warmup } => {
                if step == 0 {
                    return 0.0;
                }
                let w = (*warmup).max(1) as f64;
                let s = step as f64;
                base * w.sqrt() * s.powf(-0.5).min(s * w.powf(-1.5))
            }
            Self::ManualWarmupDecay { base, warmup, boundaries, values } => {
                if step < *warmup {
                    return base * step as f64 / *warmup as f64;
                }
                let idx = boundaries.iter().take_while(|&&b| step >= b).count();
                values[idx]
            }
        }
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-12
    }

    #[test]
    fn test_linear_warmup_then_decay() {
        let s = LrSchedule::build(SchedulerKind::LinearWarmupDecay, 1e-3, 10, 100, vec![], vec![]).unwrap();
        assert!(close(s.lr_at(5), 5e-4));
        assert!(close(s.lr_at(50), 5e-4));
        assert!(close(s.lr_at(100), 0.0));
        assert!(close(s.lr_at(150), 0.0));
    }

    #[test]
    fn test_noam_peaks_at_warmup() {
        let s = LrSchedule::build(SchedulerKind::NoamDecay, 2e-4, 400, 0, vec![], vec![]).unwrap();
        assert!(close(s.lr_at(400), 2e-4));
        assert!(s.lr_at(200) < 2e-4);
        assert!(s.lr_at(1600) < 2e-4);
        assert!(close(s.lr_at(1600), 1e-4));
    }

    #[test]
    fn test_manual_decay_steps_down_at_boundaries() {
        let (bounds, values) = epoch_decay_plan(1e-3, 0.1, &[2, 4], 50);
        assert_eq!(bounds, vec![100, 200]);

        let s = LrSchedule::build(SchedulerKind::ManualWarmupDecay, 1e-3, 10, 0, bounds, values).unwrap();
        assert!(close(s.lr_at(1), 1e-4));
        assert!(close(s.lr_at(99), 1e-3));
        assert!(close(s.lr_at(100), 1e-4));
        assert!(close(s.lr_at(250), 1e-5));
    }

    #[test]
    fn test_manual_decay_rejects_mismatched_values() {
        let built = LrSchedule::build(SchedulerKind::ManualWarmupDecay, 1e-3, 0, 0, vec![10], vec![1e-3]);
        assert!(built.is_err());
    }

    #[test]
    fn test_non_positive_base_rejected() {
        assert!(LrSchedule::build(SchedulerKind::NoamDecay, 0.0, 1, 1, vec![], vec![]).is_err());
    }
}
