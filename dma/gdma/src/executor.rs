// SPDX-FileCopyrightText: 2024 Redox OS Developers
// SPDX-License-Identifier: MIT

//! Deferred work
//!
//! The interrupt handler never runs the dispatcher itself; it schedules the
//! channel on an [`Executor`]. [`Worker`] is a dedicated thread, the
//! userspace stand-in for a kernel tasklet. [`ManualExecutor`] holds work
//! until it is drained explicitly, which keeps tests deterministic.

use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle, Thread};
use std::time::Duration;

use crossbeam_queue::ArrayQueue;
use log::{debug, warn};
use parking_lot::Mutex;

/// Routine that can be run later from another context
pub trait Deferred: Send + Sync {
    fn run(&self);
}

/// Schedules deferred routines
pub trait Executor: Send + Sync {
    /// Queue `work`; false if it was refused and will never run
    fn schedule(&self, work: Arc<dyn Deferred>) -> bool;
}

/// How long an idle worker parks before rechecking for shutdown
const IDLE_PARK: Duration = Duration::from_millis(50);

/// Dedicated worker thread
pub struct Worker {
    queue: Arc<ArrayQueue<Arc<dyn Deferred>>>,
    shutdown: Arc<AtomicBool>,
    thread: Thread,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Worker {
    /// Spawn a worker named `name` with room for `depth` pending routines
    pub fn spawn(name: &str, depth: usize) -> io::Result<Self> {
        let queue: Arc<ArrayQueue<Arc<dyn Deferred>>> = Arc::new(ArrayQueue::new(depth.max(1)));
        let shutdown = Arc::new(AtomicBool::new(false));

        let handle = {
            let queue = Arc::clone(&queue);
            let shutdown = Arc::clone(&shutdown);
            thread::Builder::new()
                .name(name.to_string())
                .spawn(move || worker_loop(&queue, &shutdown))?
        };

        Ok(Self {
            queue,
            shutdown,
            thread: handle.thread().clone(),
            handle: Mutex::new(Some(handle)),
        })
    }

    /// Routines waiting to run
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Stop the thread after it drains what is queued
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
        self.thread.unpark();
        if thread::current().id() == self.thread.id() {
            // last reference dropped by a routine on the worker itself
            return;
        }
        if let Some(handle) = self.handle.lock().take() {
            if handle.join().is_err() {
                warn!("gdma: worker thread panicked");
            }
        }
    }
}

fn worker_loop(queue: &ArrayQueue<Arc<dyn Deferred>>, shutdown: &AtomicBool) {
    debug!("gdma: worker started");
    loop {
        while let Some(work) = queue.pop() {
            work.run();
        }
        if shutdown.load(Ordering::Acquire) {
            break;
        }
        thread::park_timeout(IDLE_PARK);
    }
    debug!("gdma: worker stopped");
}

impl Executor for Worker {
    fn schedule(&self, work: Arc<dyn Deferred>) -> bool {
        if self.shutdown.load(Ordering::Acquire) {
            warn!("gdma: worker stopped, dropping deferred work");
            return false;
        }
        if self.queue.push(work).is_err() {
            // each channel holds at most one slot, so this means the queue
            // is smaller than the channel count
            warn!("gdma: worker queue full, dropping deferred work");
            return false;
        }
        self.thread.unpark();
        true
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Executor drained by the caller
#[derive(Default)]
pub struct ManualExecutor {
    pending: Mutex<VecDeque<Arc<dyn Deferred>>>,
}

impl ManualExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Routines waiting to run
    pub fn pending(&self) -> usize {
        self.pending.lock().len()
    }

    /// Run queued routines, including ones they schedule, until none are left
    ///
    /// Returns how many ran.
    pub fn run_pending(&self) -> usize {
        let mut ran = 0;
        loop {
            let next = self.pending.lock().pop_front();
            match next {
                Some(work) => {
                    work.run();
                    ran += 1;
                }
                None => return ran,
            }
        }
    }
}

impl Executor for ManualExecutor {
    fn schedule(&self, work: Arc<dyn Deferred>) -> bool {
        self.pending.lock().push_back(work);
        true
    }
}
