//! Adaptive batch sizing against provider limits.

/// Tracks how many blocks to request per batch.
///
/// Halves on `RangeTooLarge` or a timeout (never below 1) and doubles back
/// toward the maximum after a run of consecutive successful batches.
#[derive(Debug, Clone)]
pub struct BatchSizer {
    max: u64,
    current: u64,
    grow_after: u32,
    streak: u32,
}

impl BatchSizer {
    pub fn new(max: u64, grow_after: u32) -> Self {
        let max = max.max(1);
        Self {
            max,
            current: max,
            grow_after: grow_after.max(1),
            streak: 0,
        }
    }

    pub fn current(&self) -> u64 {
        self.current
    }

    pub fn max(&self) -> u64 {
        self.max
    }

    pub fn shrink(&mut self) {
        self.current = (self.current / 2).max(1);
        self.streak = 0;
        tracing::debug!(batch_size = self.current, "Batch size reduced");
    }

    /// Caps the batch at a size the provider is known to accept.
    pub fn record_success(&mut self) {
        if self.current >= self.max {
            return;
        }
        self.streak += 1;
        if self.streak >= self.grow_after {
            self.current = (self.current.saturating_mul(2)).min(self.max);
            self.streak = 0;
            tracing::debug!(batch_size = self.current, "Batch size increased");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shrink_floors_at_one() {
        let mut s = BatchSizer::new(4, 3);
        s.shrink();
        s.shrink();
        s.shrink();
        s.shrink();
        assert_eq!(s.current(), 1);
    }

    #[test]
    fn grows_back_after_streak() {
        let mut s = BatchSizer::new(2000, 2);
        s.shrink();
        assert_eq!(s.current(), 1000);
        s.record_success();
        assert_eq!(s.current(), 1000);
        s.record_success();
        assert_eq!(s.current(), 2000);
        s.record_success();
        assert_eq!(s.current(), 2000);
    }

    #[test]
    fn failure_resets_streak() {
        let mut s = BatchSizer::new(100, 2);
        s.shrink();
        s.record_success();
        s.shrink();
        s.record_success();
        assert_eq!(s.current(), 25);
    }
}
