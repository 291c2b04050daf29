// ============================================================
// Layer 3 — Batch Feed Types
// ============================================================
// A batch source never "throws" at the end of its data.
// Instead `next_batch()` returns a tagged value:
//
//   Feed::Batch(b)   → one more minibatch to train on
//   Feed::Exhausted  → every epoch has been consumed
//
// so the controller's transition from Running to Draining is
// an ordinary `match` arm.

/// One pull from a batch source.
#[derive(Debug, Clone, PartialEq)]
pub enum Feed<T> {
    /// A minibatch ready for the engine
    Batch(T),
    /// The underlying iterable is consumed
    Exhausted,
}

#[cfg(test)]
impl<T> Feed<T> {
    pub fn is_exhausted(&self) -> bool {
        matches!(self, Feed::Exhausted)
    }
}

/// Where a training feed currently is, for progress lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EpochProgress {
    /// Current epoch, starting at 1
    pub epoch: usize,
    /// Examples consumed so far within this epoch (this worker's shard)
    pub example: usize,
    /// Total examples in the corpus
    pub total_examples: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exhausted_flag() {
        assert!(Feed::<u8>::Exhausted.is_exhausted());
        assert!(!Feed::Batch(3u8).is_exhausted());
    }
}
