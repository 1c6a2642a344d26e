//! Per-stage run-order counter.

/// Hands out strictly increasing run-order values for one stage.
///
/// The counter is a plain value owned by the builder; nothing global is
/// involved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunOrderCounter {
    last: u32,
}

impl RunOrderCounter {
    /// Creates a counter whose first value is 1.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the highest run-order handed out or observed (0 if none).
    #[must_use]
    pub fn current(&self) -> u32 {
        self.last
    }

    /// Returns the next run-order value.
    pub fn advance(&mut self) -> u32 {
        self.last = self.last.saturating_add(1);
        self.last
    }

    /// Records an explicitly chosen run-order so later values stay above it.
    pub fn observe(&mut self, run_order: u32) {
        self.last = self.last.max(run_order);
    }
}
