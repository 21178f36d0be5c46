//! Dedicated worker pool for background compilation
//!
//! Keeps code generation off rayon's global pool when the host uses rayon
//! for its own parallel work.
//!
//! # Design
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     CompileWorkerPool                       │
//! │                                                             │
//! │  ┌─────────┐    ┌──────────────────────────────────────┐   │
//! │  │ Sender  │───>│        Unbounded Channel             │   │
//! │  └─────────┘    └──────────────────────────────────────┘   │
//! │                           │                                 │
//! │          ┌────────────────┼────────────────┐               │
//! │          ▼                ▼                ▼               │
//! │    ┌──────────┐    ┌──────────┐    ┌──────────┐           │
//! │    │ Worker 1 │    │ Worker 2 │    │ Worker N │           │
//! │    │ (recv)   │    │ (recv)   │    │ (recv)   │           │
//! │    └──────────┘    └──────────┘    └──────────┘           │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! The channel is unbounded so `schedule` never blocks an invoking thread.
//! Workers exit when the pool is dropped and the channel closes.

use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{unbounded, Receiver, Sender};
use tracing::{debug, error};

use super::scheduler::{CompileScheduler, CompileTask};

/// A persistent pool of compile worker threads
pub struct CompileWorkerPool {
    sender: Option<Sender<CompileTask>>,
    workers: Vec<JoinHandle<()>>,
    num_threads: usize,
}

impl CompileWorkerPool {
    /// Create a pool with `num_threads` workers (0 = one per CPU)
    pub fn new(num_threads: usize) -> io::Result<Self> {
        let num_threads = if num_threads == 0 {
            num_cpus::get()
        } else {
            num_threads
        };
        let (sender, receiver) = unbounded::<CompileTask>();

        let workers = (0..num_threads)
            .map(|id| {
                let rx = receiver.clone();
                thread::Builder::new()
                    .name(format!("lambda-compile-{}", id))
                    .spawn(move || worker_loop(rx))
            })
            .collect::<io::Result<Vec<_>>>()?;

        debug!(target: "tiered_lambda::tiered::pool", num_threads, "Compile worker pool started");

        Ok(Self {
            sender: Some(sender),
            workers,
            num_threads,
        })
    }

    /// Get the number of worker threads in the pool
    pub fn num_threads(&self) -> usize {
        self.num_threads
    }
}

impl CompileScheduler for CompileWorkerPool {
    fn schedule(&self, task: CompileTask) {
        if let Some(sender) = &self.sender {
            if sender.send(task).is_err() {
                error!(target: "tiered_lambda::tiered::pool", "Compile workers gone, task dropped");
            }
        }
    }

    fn name(&self) -> &'static str {
        "dedicated"
    }
}

impl Drop for CompileWorkerPool {
    fn drop(&mut self) {
        // Closing the channel lets workers finish queued tasks and exit
        drop(self.sender.take());
        // The last reference can be released by a task on one of our own
        // workers; that thread exits on its own once the channel drains.
        let current = thread::current().id();
        for worker in self.workers.drain(..) {
            if worker.thread().id() != current {
                let _ = worker.join();
            }
        }
    }
}

/// Worker thread main loop
fn worker_loop(receiver: Receiver<CompileTask>) {
    while let Ok(task) = receiver.recv() {
        // A panicking task must not take the worker down with it
        if panic::catch_unwind(AssertUnwindSafe(task)).is_err() {
            error!(target: "tiered_lambda::tiered::pool", "Compile task panicked");
        }
    }
}
