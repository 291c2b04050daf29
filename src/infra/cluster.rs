// ============================================================
// Layer 6 — Cluster Environment
// ============================================================
// Reads the worker topology a launcher exports for multi-worker
// runs and turns it into:
//
//   WorkerRole → this worker's index (0 = leader) and the count
//   SyncPlan   → collective-communication settings, validated once
//
// Variables:
//   TRAINERS_NUM       worker count (falls back to the endpoint count)
//   TRAINER_ID         this worker's index
//   TRAINER_ENDPOINTS  comma-separated host:port list
//   CURRENT_ENDPOINT   this worker's host:port
//   SELECTED_DEVICES   comma-separated device ids for this process
//
// Gradient all-reduce itself is not performed here.

use anyhow::{anyhow, bail, ensure, Context, Result};

use crate::application::config::DistributedSettings;
use crate::domain::role::WorkerRole;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClusterEnv {
    pub trainers_num:     Option<usize>,
    pub trainer_id:       usize,
    pub endpoints:        Vec<String>,
    pub current_endpoint: Option<String>,
    pub selected_devices: Vec<usize>,
}

fn split_list(raw: &str) -> impl Iterator<Item = &str> {
    raw.split(',').map(str::trim).filter(|s| !s.is_empty())
}

fn parse_usize(key: &str, raw: &str) -> Result<usize> {
    raw.trim()
        .parse()
        .with_context(|| format!("{key}='{raw}' is not a non-negative integer"))
}

impl ClusterEnv {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key → value source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let trainers_num = lookup("TRAINERS_NUM")
            .map(|v| parse_usize("TRAINERS_NUM", &v))
            .transpose()?;
        let trainer_id = lookup("TRAINER_ID")
            .map(|v| parse_usize("TRAINER_ID", &v))
            .transpose()?
            .unwrap_or(0);
        let endpoints = lookup("TRAINER_ENDPOINTS")
            .map(|v| split_list(&v).map(String::from).collect())
            .unwrap_or_default();
        let selected_devices = lookup("SELECTED_DEVICES")
            .map(|v| {
                split_list(&v)
                    .map(|d| parse_usize("SELECTED_DEVICES", d))
                    .collect::<Result<Vec<_>>>()
            })
            .transpose()?
            .unwrap_or_default();

        Ok(Self {
            trainers_num,
            trainer_id,
            endpoints,
            current_endpoint: lookup("CURRENT_ENDPOINT"),
            selected_devices,
        })
    }

    /// This worker's role. Single-process runs are always the leader.
    pub fn role(&self, distributed: bool) -> Result<WorkerRole> {
        if !distributed {
            return Ok(WorkerRole::standalone());
        }
        ensure!(
            !self.endpoints.is_empty(),
            "Distributed mode needs TRAINER_ENDPOINTS"
        );
        let n = self.endpoints.len();
        if let Some(declared) = self.trainers_num {
            if declared != n {
                tracing::warn!(
                    "TRAINERS_NUM={} but {} endpoints are listed; using {}",
                    declared, n, n
                );
            }
        }
        WorkerRole::new(self.trainer_id, n)
            .ok_or_else(|| anyhow!("TRAINER_ID={} is out of range for {} workers", self.trainer_id, n))
    }

    /// Device id this process should run on, if one was selected.
    pub fn device_id(&self) -> Option<usize> {
        self.selected_devices.first().copied()
    }
}

// ─── SyncPlan ─────────────────────────────────────────────────────────────────
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HierarchicalRanks {
    pub inter: usize,
    pub exter: usize,
}

/// Collective-communication layout for one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncPlan {
    pub comm_streams: usize,
    pub hierarchical: Option<HierarchicalRanks>,
}

impl SyncPlan {
    /// Hierarchical all-reduce only engages when there are more workers
    /// than fit in one inner group.
    pub fn build(settings: &DistributedSettings, trainers: usize) -> Result<Self> {
        let comm_streams = settings.nccl_comm_num.max(1);
        let inter = settings.hierarchical_allreduce_inter_nranks;

        let hierarchical = if settings.use_hierarchical_allreduce && trainers > inter {
            if inter <= 1 {
                bail!("hierarchical_allreduce_inter_nranks must be > 1, got {inter}");
            }
            if trainers % inter != 0 {
                bail!("{trainers} workers cannot be split into groups of {inter}");
            }
            Some(HierarchicalRanks { inter, exter: trainers / inter })
        } else {
            None
        };

        Ok(Self { comm_streams, hierarchical })
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> ClusterEnv {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ClusterEnv::from_lookup(|k| map.get(k).cloned()).unwrap()
    }

    fn settings(hier: bool, inter: usize) -> DistributedSettings {
        DistributedSettings {
            is_distributed:                      true,
            nccl_comm_num:                       1,
            use_hierarchical_allreduce:          hier,
            hierarchical_allreduce_inter_nranks: inter,
        }
    }

    #[test]
    fn test_standalone_ignores_environment() {
        let e = env(&[("TRAINER_ID", "3")]);
        assert_eq!(e.role(false).unwrap(), WorkerRole::standalone());
    }

    #[test]
    fn test_role_from_endpoints() {
        let e = env(&[
            ("TRAINER_ID", "1"),
            ("TRAINER_ENDPOINTS", "10.0.0.1:6170, 10.0.0.2:6170"),
            ("CURRENT_ENDPOINT", "10.0.0.2:6170"),
            ("SELECTED_DEVICES", "2,3"),
        ]);
        let role = e.role(true).unwrap();
        assert_eq!(role.trainers_num(), 2);
        assert!(!role.is_leader());
        assert_eq!(e.device_id(), Some(2));
        assert_eq!(e.current_endpoint.as_deref(), Some("10.0.0.2:6170"));
    }

    #[test]
    fn test_distributed_needs_endpoints_and_valid_id() {
        assert!(env(&[]).role(true).is_err());
        assert!(env(&[("TRAINER_ID", "2"), ("TRAINER_ENDPOINTS", "a:1,b:1")]).role(true).is_err());
    }

    #[test]
    fn test_bad_integer_is_an_error() {
        let map: HashMap<&str, &str> = [("TRAINER_ID", "x")].into_iter().collect();
        assert!(ClusterEnv::from_lookup(|k| map.get(k).map(|v| v.to_string())).is_err());
    }

    #[test]
    fn test_hierarchical_plan() {
        let plan = SyncPlan::build(&settings(true, 4), 8).unwrap();
        assert_eq!(plan.hierarchical, Some(HierarchicalRanks { inter: 4, exter: 2 }));

        // Fewer workers than one group: flat all-reduce
        assert_eq!(SyncPlan::build(&settings(true, 8), 4).unwrap().hierarchical, None);

        assert!(SyncPlan::build(&settings(true, 3), 8).is_err());
        assert!(SyncPlan::build(&settings(true, 1), 8).is_err());
    }
}
