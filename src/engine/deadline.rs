use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Single wall-clock budget shared by the compile and run phases of one run.
///
/// Compilation may use at most `compile_percent` of the budget, counted from
/// acceptance. The run phase always ends at the overall deadline, so time a
/// fast compile leaves unused goes to the program while a slow compile can
/// never push the run past it.
#[derive(Debug, Clone, Copy)]
pub struct TimeBudget {
    accepted: Instant,
    total: Duration,
    compile_percent: u64,
}

impl TimeBudget {
    pub fn new(accepted: Instant, total: Duration, compile_percent: u64) -> Self {
        Self {
            accepted,
            total,
            compile_percent: compile_percent.min(100),
        }
    }

    pub fn total(&self) -> Duration {
        self.total
    }

    pub fn compile_allowance(&self) -> Duration {
        self.total * self.compile_percent as u32 / 100
    }

    pub fn compile_deadline(&self) -> Instant {
        self.accepted + self.compile_allowance()
    }

    pub fn run_deadline(&self) -> Instant {
        self.accepted + self.total
    }
}

/// Cancels a token once the deadline passes. Dropping the timer disarms it.
#[derive(Debug)]
pub struct DeadlineTimer {
    handle: JoinHandle<()>,
}

impl DeadlineTimer {
    pub fn arm(token: CancellationToken, deadline: Instant) -> Self {
        let handle = tokio::spawn(async move {
            tokio::time::sleep_until(deadline.into()).await;
            token.cancel();
        });
        Self { handle }
    }
}

impl Drop for DeadlineTimer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
