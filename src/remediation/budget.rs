use std::time::{Duration, Instant};

/// Source of the invocation's remaining wall-clock budget.
///
/// Hosts with their own deadline (serverless runtimes, job schedulers) plug
/// in here; the loop only asks between iterations and never interrupts.
pub trait RemainingBudget: Send + Sync {
    fn elapsed(&self) -> Duration;

    fn remaining(&self) -> Duration;
}

/// Fixed budget measured from a start instant.
#[derive(Debug, Clone, Copy)]
pub struct WallClockBudget {
    started: Instant,
    limit: Duration,
}

impl WallClockBudget {
    #[must_use]
    pub const fn new(started: Instant, limit: Duration) -> Self {
        Self { started, limit }
    }

    #[must_use]
    pub fn start(limit: Duration) -> Self {
        Self::new(Instant::now(), limit)
    }
}

impl RemainingBudget for WallClockBudget {
    fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    fn remaining(&self) -> Duration {
        self.limit.saturating_sub(self.elapsed())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BudgetCheck {
    pub approaching: bool,
    pub elapsed: Duration,
}

/// Approaching means strictly less than `buffer` remains.
#[must_use]
pub fn check_budget(budget: &dyn RemainingBudget, buffer: Duration) -> BudgetCheck {
    BudgetCheck {
        approaching: budget.remaining() < buffer,
        elapsed: budget.elapsed(),
    }
}
