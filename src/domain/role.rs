// ============================================================
// Layer 3 — Worker Role
// ============================================================
// In a multi-worker run every process executes the same loop.
// Only the leader (worker index 0) performs side effects that
// must happen once per run: checkpoint writes, metric history
// updates, and the final result banners.

/// This process's position in the worker fleet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerRole {
    trainer_id:   usize,
    trainers_num: usize,
}

impl WorkerRole {
    /// A single-process run: one worker, which is the leader.
    pub fn standalone() -> Self {
        Self { trainer_id: 0, trainers_num: 1 }
    }

    /// Returns None when the index is outside the fleet or the fleet is empty.
    pub fn new(trainer_id: usize, trainers_num: usize) -> Option<Self> {
        (trainers_num > 0 && trainer_id < trainers_num)
            .then_some(Self { trainer_id, trainers_num })
    }

    pub fn is_leader(&self) -> bool {
        self.trainer_id == 0
    }

    pub fn trainer_id(&self) -> usize {
        self.trainer_id
    }

    pub fn trainers_num(&self) -> usize {
        self.trainers_num
    }
}

impl Default for WorkerRole {
    fn default() -> Self {
        Self::standalone()
    }
}
