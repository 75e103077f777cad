use std::sync::atomic::{AtomicU64, Ordering};

use crate::engine::models::ExecutionStatus;

#[derive(Debug, Default)]
pub struct MetricsRegistry {
    started_total: AtomicU64,
    succeeded_total: AtomicU64,
    rejected_total: AtomicU64,
    toolchain_missing_total: AtomicU64,
    compile_failed_total: AtomicU64,
    runtime_failed_total: AtomicU64,
    timed_out_total: AtomicU64,
    internal_failed_total: AtomicU64,
    in_flight: AtomicU64,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn started(&self) {
        self.started_total.fetch_add(1, Ordering::Relaxed);
        self.in_flight.fetch_add(1, Ordering::Relaxed);
    }

    pub fn finished(&self, status: ExecutionStatus) {
        let counter = match status {
            ExecutionStatus::Success => &self.succeeded_total,
            ExecutionStatus::ValidationError | ExecutionStatus::SecurityViolation => {
                &self.rejected_total
            }
            ExecutionStatus::ToolchainMissing => &self.toolchain_missing_total,
            ExecutionStatus::CompileError => &self.compile_failed_total,
            ExecutionStatus::RuntimeError => &self.runtime_failed_total,
            ExecutionStatus::Timeout => &self.timed_out_total,
            ExecutionStatus::InternalError => &self.internal_failed_total,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        self.decrement_in_flight();
    }

    pub fn in_flight(&self) -> u64 {
        self.in_flight.load(Ordering::Relaxed)
    }

    pub fn timed_out(&self) -> u64 {
        self.timed_out_total.load(Ordering::Relaxed)
    }

    pub fn render_prometheus(&self) -> String {
        format!(
            concat!(
                "# TYPE execution_started_total counter\n",
                "execution_started_total {}\n",
                "# TYPE execution_succeeded_total counter\n",
                "execution_succeeded_total {}\n",
                "# TYPE execution_rejected_total counter\n",
                "execution_rejected_total {}\n",
                "# TYPE execution_toolchain_missing_total counter\n",
                "execution_toolchain_missing_total {}\n",
                "# TYPE execution_compile_failed_total counter\n",
                "execution_compile_failed_total {}\n",
                "# TYPE execution_runtime_failed_total counter\n",
                "execution_runtime_failed_total {}\n",
                "# TYPE execution_timed_out_total counter\n",
                "execution_timed_out_total {}\n",
                "# TYPE execution_internal_failed_total counter\n",
                "execution_internal_failed_total {}\n",
                "# TYPE execution_in_flight gauge\n",
                "execution_in_flight {}\n"
            ),
            self.started_total.load(Ordering::Relaxed),
            self.succeeded_total.load(Ordering::Relaxed),
            self.rejected_total.load(Ordering::Relaxed),
            self.toolchain_missing_total.load(Ordering::Relaxed),
            self.compile_failed_total.load(Ordering::Relaxed),
            self.runtime_failed_total.load(Ordering::Relaxed),
            self.timed_out_total.load(Ordering::Relaxed),
            self.internal_failed_total.load(Ordering::Relaxed),
            self.in_flight.load(Ordering::Relaxed),
        )
    }

    fn decrement_in_flight(&self) {
        let mut current = self.in_flight.load(Ordering::Relaxed);
        while current > 0 {
            match self.in_flight.compare_exchange_weak(
                current,
                current - 1,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return,
                Err(actual) => current = actual,
            }
        }
    }
}
