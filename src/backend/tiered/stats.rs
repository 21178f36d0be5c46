use std::ops::Add;
use std::sync::atomic::{AtomicU64, Ordering};

/// Lock-free counters for one tier controller
#[derive(Debug, Default)]
pub struct TierStats {
    interpreted_calls: AtomicU64,
    compilations_scheduled: AtomicU64,
    compilations_completed: AtomicU64,
    compilations_failed: AtomicU64,
    handles_promoted: AtomicU64,
    compile_time_us: AtomicU64,
}

impl TierStats {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub(crate) fn record_interpreted_call(&self) {
        self.interpreted_calls.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_scheduled(&self) {
        self.compilations_scheduled.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_completed(&self, elapsed_us: u64) {
        self.compilations_completed.fetch_add(1, Ordering::Relaxed);
        self.compile_time_us.fetch_add(elapsed_us, Ordering::Relaxed);
    }

    pub(crate) fn record_failed(&self, elapsed_us: u64) {
        self.compilations_failed.fetch_add(1, Ordering::Relaxed);
        self.compile_time_us.fetch_add(elapsed_us, Ordering::Relaxed);
    }

    pub(crate) fn record_promoted_handle(&self) {
        self.handles_promoted.fetch_add(1, Ordering::Relaxed);
    }

    /// Copy the current counter values
    pub fn snapshot(&self) -> TierStatsSnapshot {
        TierStatsSnapshot {
            interpreted_calls: self.interpreted_calls.load(Ordering::Relaxed),
            compilations_scheduled: self.compilations_scheduled.load(Ordering::Relaxed),
            compilations_completed: self.compilations_completed.load(Ordering::Relaxed),
            compilations_failed: self.compilations_failed.load(Ordering::Relaxed),
            handles_promoted: self.handles_promoted.load(Ordering::Relaxed),
            compile_time_us: self.compile_time_us.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`TierStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TierStatsSnapshot {
    /// Calls served by the interpreter
    pub interpreted_calls: u64,

    /// Background compilations handed to the scheduler
    pub compilations_scheduled: u64,

    /// Compilations that populated the compiled-code slot
    pub compilations_completed: u64,

    /// Compilations that failed (permanent per function)
    pub compilations_failed: u64,

    /// Interpreted handles that switched their dispatch to compiled code
    pub handles_promoted: u64,

    /// Total time spent generating code, in microseconds
    pub compile_time_us: u64,
}

impl TierStatsSnapshot {
    /// Average code generation time per attempt, in microseconds
    pub fn average_compile_time_us(&self) -> f64 {
        let attempts = self.compilations_completed + self.compilations_failed;
        if attempts == 0 {
            0.0
        } else {
            self.compile_time_us as f64 / attempts as f64
        }
    }
}

impl Add for TierStatsSnapshot {
    type Output = TierStatsSnapshot;

    fn add(self, other: TierStatsSnapshot) -> TierStatsSnapshot {
        TierStatsSnapshot {
            interpreted_calls: self.interpreted_calls + other.interpreted_calls,
            compilations_scheduled: self.compilations_scheduled + other.compilations_scheduled,
            compilations_completed: self.compilations_completed + other.compilations_completed,
            compilations_failed: self.compilations_failed + other.compilations_failed,
            handles_promoted: self.handles_promoted + other.handles_promoted,
            compile_time_us: self.compile_time_us + other.compile_time_us,
        }
    }
}
