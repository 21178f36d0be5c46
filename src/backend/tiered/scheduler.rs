//! Where background compilation runs.
//!
//! Promotion never compiles on the invoking thread: the tier controller
//! packages the work as a [`CompileTask`] and hands it to a
//! [`CompileScheduler`]. Scheduling is fire-and-forget; a task's outcome lands
//! back on the controller, never on the caller that triggered it.

use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam_channel::{unbounded, Receiver, Sender};

/// A boxed compilation task that can be sent across threads
pub type CompileTask = Box<dyn FnOnce() + Send + 'static>;

/// Executes compilation tasks off the invoking thread
pub trait CompileScheduler: Send + Sync {
    /// Submit a task; must return without waiting for it to run
    fn schedule(&self, task: CompileTask);

    /// Short name used in logs
    fn name(&self) -> &'static str;
}

/// Runs tasks on rayon's global work-stealing pool
#[derive(Debug, Default, Clone, Copy)]
pub struct RayonScheduler;

impl CompileScheduler for RayonScheduler {
    fn schedule(&self, task: CompileTask) {
        rayon::spawn(task);
    }

    fn name(&self) -> &'static str {
        "rayon"
    }
}

/// Queues tasks until the host drains them
///
/// Useful for hosts that compile at safepoints of their own choosing, and
/// for deterministic tests of the promotion protocol.
pub struct DeferredScheduler {
    sender: Sender<CompileTask>,
    receiver: Receiver<CompileTask>,
    submitted: AtomicU64,
}

impl DeferredScheduler {
    pub fn new() -> Self {
        let (sender, receiver) = unbounded();
        DeferredScheduler {
            sender,
            receiver,
            submitted: AtomicU64::new(0),
        }
    }

    /// Number of tasks waiting to run
    pub fn pending(&self) -> usize {
        self.receiver.len()
    }

    /// Total tasks ever submitted
    pub fn submitted(&self) -> u64 {
        self.submitted.load(Ordering::Relaxed)
    }

    /// Run every queued task on the current thread, returning how many ran
    pub fn run_pending(&self) -> usize {
        let mut ran = 0;
        while let Ok(task) = self.receiver.try_recv() {
            task();
            ran += 1;
        }
        ran
    }
}

impl Default for DeferredScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl CompileScheduler for DeferredScheduler {
    fn schedule(&self, task: CompileTask) {
        self.submitted.fetch_add(1, Ordering::Relaxed);
        // Both channel ends live in `self`, so the send cannot fail.
        let _ = self.sender.send(task);
    }

    fn name(&self) -> &'static str {
        "deferred"
    }
}
