// SPDX-FileCopyrightText: 2024 Redox OS Developers
// SPDX-License-Identifier: MIT

//! Dispatcher: reap finished descriptors, start the next one
//!
//! A dispatcher pass runs in three steps:
//!
//! 1. **Reap** (locked): every `Done` descriptor leaves the queue, its
//!    buffers are unmapped and `last_completed` moves to its cookie.
//! 2. **Dispatch** (locked, allocated channels only): the first `Busy`
//!    descriptor ends the scan; the first `Prepared` one is programmed into
//!    the engine. Hardware-busy leaves it `Prepared` for a later trigger. A
//!    request the engine cannot encode is marked `Done` and another pass is
//!    scheduled so the rest of the queue keeps moving.
//! 3. **Notify** (unlocked): reaped descriptors run their callbacks and are
//!    dropped.
//!
//! Passes on one channel never overlap. A trigger that arrives while a pass
//! is running is folded into one extra pass run by the current owner.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use log::{debug, trace, warn};

use crate::channel::Channel;
use crate::descriptor::{Descriptor, Status, TxFlags};
use crate::device::{MapDirection, Platform};
use crate::error::Error;

const IDLE: u8 = 0;
const RUNNING: u8 = 1;
const RERUN: u8 = 2;

/// Run-state of a per-channel deferred routine
pub(crate) struct Tasklet {
    state: AtomicU8,
    scheduled: AtomicBool,
}

impl Tasklet {
    pub(crate) const fn new() -> Self {
        Self {
            state: AtomicU8::new(IDLE),
            scheduled: AtomicBool::new(false),
        }
    }

    /// Run `pass`, or fold this call into the pass already running
    pub(crate) fn run(&self, mut pass: impl FnMut()) {
        loop {
            match self
                .state
                .compare_exchange(IDLE, RUNNING, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => break,
                Err(RUNNING) => {
                    if self
                        .state
                        .compare_exchange(RUNNING, RERUN, Ordering::AcqRel, Ordering::Acquire)
                        .is_ok()
                    {
                        debug!("gdma: dispatcher busy, pass coalesced");
                        return;
                    }
                }
                Err(_) => return,
            }
        }

        loop {
            pass();
            match self
                .state
                .compare_exchange(RUNNING, IDLE, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return,
                Err(_) => self.state.store(RUNNING, Ordering::Release),
            }
        }
    }

    /// Claim the scheduled bit; false if a run is already queued
    pub(crate) fn claim_schedule(&self) -> bool {
        !self.scheduled.swap(true, Ordering::AcqRel)
    }

    /// Release the scheduled bit before a deferred run starts
    pub(crate) fn clear_schedule(&self) {
        self.scheduled.store(false, Ordering::Release);
    }

    #[cfg(test)]
    pub(crate) fn is_scheduled(&self) -> bool {
        self.scheduled.load(Ordering::Acquire)
    }
}

impl<P: Platform> Channel<P> {
    /// One non-reentrant dispatcher pass
    pub(crate) fn run_dispatcher(&self) {
        self.tasklet.run(|| self.dispatch());
    }

    fn dispatch(&self) {
        let mut reaped: Vec<Descriptor> = Vec::new();
        let mut reschedule = false;

        {
            let mut state = self.state.lock();

            let mut i = 0;
            while i < state.queue.len() {
                if state.queue[i].status != Status::Done {
                    i += 1;
                    continue;
                }
                if let Some(mut desc) = state.queue.remove(i) {
                    self.release_buffers(&desc);
                    if let Some(cookie) = desc.cookie {
                        state.cookies.complete(cookie);
                    }
                    trace!("gdma{}: reaped cookie {:?}", self.id, desc.cookie);
                    desc.status = Status::Free;
                    reaped.push(desc);
                }
            }

            // the register window may already be unmapped
            let startable = state.allocated;
            if !startable && !state.queue.is_empty() {
                trace!("gdma{}: channel not allocated, nothing started", self.id);
            }

            for desc in state.queue.iter_mut().filter(|_| startable) {
                match desc.status {
                    Status::Busy => break,
                    Status::Prepared => {
                        match self.engine.start(&desc.request) {
                            Ok(()) => {
                                trace!("gdma{}: started cookie {:?}", self.id, desc.cookie);
                                desc.status = Status::Busy;
                                self.stats.record_start(desc.request.len);
                            }
                            Err(Error::Busy) => {
                                debug!(
                                    "gdma{}: engine busy, cookie {:?} stays queued",
                                    self.id, desc.cookie
                                );
                                self.stats.record_busy();
                            }
                            Err(err) => {
                                warn!(
                                    "gdma{}: dropping cookie {:?}: {}",
                                    self.id, desc.cookie, err
                                );
                                desc.status = Status::Done;
                                self.stats.record_rejected();
                                reschedule = true;
                            }
                        }
                        break;
                    }
                    Status::Done | Status::Free => {}
                }
            }
        }

        if reschedule {
            self.schedule();
        }

        for mut desc in reaped {
            desc.notify();
            self.stats.record_complete();
        }
    }

    /// Hand the buffers of a finished descriptor back to the mapping layer
    fn release_buffers(&self, desc: &Descriptor) {
        let request = &desc.request;
        if request.reads_source() && !desc.flags.contains(TxFlags::SKIP_SRC_UNMAP) {
            self.platform
                .unmap_buffer(request.src, request.len, MapDirection::Source);
        }
        if request.writes_destination() && !desc.flags.contains(TxFlags::SKIP_DEST_UNMAP) {
            self.platform
                .unmap_buffer(request.dst, request.len, MapDirection::Destination);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn test_tasklet_runs_pass_once() {
        let tasklet = Tasklet::new();
        let runs = Cell::new(0);
        tasklet.run(|| runs.set(runs.get() + 1));
        assert_eq!(runs.get(), 1);
    }

    #[test]
    fn test_nested_trigger_coalesces_into_one_rerun() {
        let tasklet = Tasklet::new();
        let runs = Cell::new(0);

        tasklet.run(|| {
            runs.set(runs.get() + 1);
            if runs.get() == 1 {
                // two triggers while running collapse to one extra pass
                tasklet.run(|| unreachable!());
                tasklet.run(|| unreachable!());
            }
        });

        assert_eq!(runs.get(), 2);
    }

    #[test]
    fn test_schedule_bit() {
        let tasklet = Tasklet::new();
        assert!(tasklet.claim_schedule());
        assert!(!tasklet.claim_schedule());
        assert!(tasklet.is_scheduled());
        tasklet.clear_schedule();
        assert!(tasklet.claim_schedule());
    }
}
