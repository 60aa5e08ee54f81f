// SPDX-FileCopyrightText: 2024 Redox OS Developers
// SPDX-License-Identifier: MIT

//! GDMA channel and submission API
//!
//! A channel owns the descriptor queue of one engine. Clients prepare a
//! descriptor, submit it for a cookie, then call [`Channel::issue_pending`]
//! to get the dispatcher going. Completion is reported through the
//! descriptor callback and can be polled with [`Channel::tx_status`].
//!
//! The queue and the cookie counters sit behind one spinlock. It is held
//! only for queue edits and register programming, never across a callback,
//! so the interrupt handler may take it.

use std::collections::VecDeque;
use std::sync::{Arc, Weak};

use log::{debug, trace, warn};
use spin::Mutex as SpinMutex;

use crate::config::{Capabilities, GdmaConfig};
use crate::cookie::{Cookie, CookieCounter, DmaStatus};
use crate::descriptor::{Descriptor, Request, Status, TxFlags};
use crate::device::Platform;
use crate::dispatch::Tasklet;
use crate::engine::Engine;
use crate::error::{Error, Resource, Result};
use crate::executor::Deferred;
use crate::regs::{Burst, DmaAddr, Stat, MAX_TRANSFER_LEN};
use crate::stats::{ChannelStats, StatsSnapshot};

/// Channel control operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    /// Abandon every queued descriptor
    TerminateAll,
    /// Suspend the running transfer
    Pause,
    /// Continue a suspended transfer
    Resume,
}

/// State guarded by the channel lock
pub(crate) struct ChannelState {
    pub(crate) queue: VecDeque<Descriptor>,
    pub(crate) cookies: CookieCounter,
    pub(crate) allocated: bool,
    /// Owning device is gone; the channel can never be allocated again
    pub(crate) retired: bool,
}

/// One DMA channel
pub struct Channel<P: Platform> {
    pub(crate) id: usize,
    pub(crate) irq: u32,
    pub(crate) platform: Arc<P>,
    pub(crate) engine: Arc<Engine<P::Regs>>,
    pub(crate) state: SpinMutex<ChannelState>,
    pub(crate) tasklet: Tasklet,
    pub(crate) stats: ChannelStats,
    capabilities: Capabilities,
    burst: Burst,
    me: Weak<Self>,
}

impl<P: Platform> Channel<P> {
    pub(crate) fn new(
        id: usize,
        irq: u32,
        platform: Arc<P>,
        engine: Arc<Engine<P::Regs>>,
        config: &GdmaConfig,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            id,
            irq,
            platform,
            engine,
            state: SpinMutex::new(ChannelState {
                queue: VecDeque::new(),
                cookies: CookieCounter::new(),
                allocated: false,
                retired: false,
            }),
            tasklet: Tasklet::new(),
            stats: ChannelStats::new(),
            capabilities: config.capabilities,
            burst: config.max_burst,
            me: me.clone(),
        })
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// Transfer kinds this channel accepts at prepare time
    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    /// STAT bit that signals completion on this channel
    pub fn completion_bit(&self) -> Stat {
        self.engine.target().done_bit()
    }

    pub fn is_allocated(&self) -> bool {
        self.state.lock().allocated
    }

    /// Reset the cookie counters and unmask the completion interrupt
    pub fn alloc_resources(&self) -> Result<()> {
        {
            let mut state = self.state.lock();
            if state.allocated || state.retired {
                return Err(Error::ResourceUnavailable(Resource::Channel));
            }
            state.cookies = CookieCounter::new();
            state.allocated = true;
        }

        self.platform.enable_irq(self.irq);
        debug!("gdma{}: resources allocated", self.id);
        Ok(())
    }

    /// Mask the completion interrupt and drop the cookie history
    ///
    /// Submission stops first, then anything still queued is terminated.
    pub fn free_resources(&self) {
        let queued = {
            let mut state = self.state.lock();
            if !state.allocated {
                return;
            }
            state.allocated = false;
            state.queue.len()
        };

        if queued > 0 {
            warn!("gdma{}: freeing channel with descriptors queued", self.id);
            self.terminate_all();
        }
        self.state.lock().cookies = CookieCounter::new();

        self.platform.disable_irq(self.irq);
        debug!("gdma{}: resources freed", self.id);
    }

    /// Free the channel for good; the register window is about to go away
    pub(crate) fn retire(&self) {
        self.state.lock().retired = true;
        self.free_resources();
    }

    fn check_len(&self, len: usize) -> Result<u32> {
        if len > MAX_TRANSFER_LEN {
            debug!("gdma{}: rejecting {} byte transfer", self.id, len);
            return Err(Error::UnsupportedLength);
        }
        u32::try_from(len).map_err(|_| Error::UnsupportedLength)
    }

    /// Build a memory-to-memory copy
    ///
    /// The burst length is always the engine maximum.
    pub fn prepare_copy(
        &self,
        dst: DmaAddr,
        src: DmaAddr,
        len: usize,
        flags: TxFlags,
    ) -> Result<Descriptor> {
        if !self.capabilities.contains(Capabilities::MEMCPY) {
            return Err(Error::NotSupported);
        }
        let len = self.check_len(len)?;
        Ok(Descriptor::new(
            Request::copy(dst, src, len, self.burst),
            flags,
        ))
    }

    /// Build a pattern fill
    ///
    /// Fails with [`Error::NotSupported`] unless the board advertises
    /// [`Capabilities::FILL`], which no shipping revision does. The entry
    /// point is kept so clients need no change once one does.
    pub fn prepare_fill(
        &self,
        dst: DmaAddr,
        pattern: u64,
        len: usize,
        flags: TxFlags,
    ) -> Result<Descriptor> {
        if !self.capabilities.contains(Capabilities::FILL) {
            return Err(Error::NotSupported);
        }
        let len = self.check_len(len)?;
        Ok(Descriptor::new(
            Request::fill(dst, pattern, len, self.burst),
            flags,
        ))
    }

    /// Build a pattern match; same availability rules as [`prepare_fill`](Self::prepare_fill)
    pub fn prepare_match(
        &self,
        src: DmaAddr,
        pattern: u64,
        mask: u64,
        len: usize,
        flags: TxFlags,
    ) -> Result<Descriptor> {
        if !self.capabilities.contains(Capabilities::PATTERN_MATCH) {
            return Err(Error::NotSupported);
        }
        let len = self.check_len(len)?;
        Ok(Descriptor::new(
            Request::pattern_match(src, pattern, mask, len, self.burst),
            flags,
        ))
    }

    /// Queue `desc` and everything chained to it
    ///
    /// Each descriptor gets the next cookie in order; the cookie of the last
    /// one is returned. Nothing is started until [`issue_pending`](Self::issue_pending).
    /// A channel without allocated resources rejects the whole chain with
    /// [`Error::ResourceUnavailable`].
    pub fn submit(&self, desc: Descriptor) -> Result<Cookie> {
        let chain = desc.into_chain();
        let count = chain.len();

        let mut state = self.state.lock();
        if !state.allocated {
            drop(state);
            debug!("gdma{}: submit on unallocated channel", self.id);
            return Err(Error::ResourceUnavailable(Resource::Channel));
        }
        let mut last = Cookie::MIN;
        for mut desc in chain {
            last = state.cookies.assign();
            desc.cookie = Some(last);
            desc.status = Status::Prepared;
            trace!("gdma{}: queued cookie {}", self.id, last);
            state.queue.push_back(desc);
        }
        drop(state);

        self.stats.record_submit(count);
        Ok(last)
    }

    /// Run one dispatcher pass now
    pub fn issue_pending(&self) {
        self.run_dispatcher();
    }

    /// Completion state of `cookie`
    pub fn tx_status(&self, cookie: Cookie) -> DmaStatus {
        self.state.lock().cookies.status(cookie)
    }

    /// Mark every queued descriptor done and reap them
    ///
    /// Software-only: the engine cannot be aborted, so a transfer already
    /// running still completes and raises its interrupt later.
    pub fn terminate_all(&self) {
        let count = {
            let mut state = self.state.lock();
            for desc in state.queue.iter_mut() {
                desc.status = Status::Done;
            }
            state.queue.len()
        };

        if count > 0 {
            debug!("gdma{}: terminating {} descriptors", self.id, count);
            self.stats.record_terminated(count);
        }
        self.run_dispatcher();
    }

    /// Channel control entry point
    pub fn control(&self, command: ControlCommand) -> Result<()> {
        match command {
            ControlCommand::TerminateAll => {
                self.terminate_all();
                Ok(())
            }
            ControlCommand::Pause | ControlCommand::Resume => Err(Error::NotSupported),
        }
    }

    /// Cookie and status of every queued descriptor, head first
    pub fn queue_status(&self) -> Vec<(Option<Cookie>, Status)> {
        self.state
            .lock()
            .queue
            .iter()
            .map(|desc| (desc.cookie, desc.status))
            .collect()
    }

    /// Number of queued descriptors
    pub fn queued(&self) -> usize {
        self.state.lock().queue.len()
    }

    pub fn last_issued(&self) -> Option<Cookie> {
        self.state.lock().cookies.last_issued()
    }

    pub fn last_completed(&self) -> Option<Cookie> {
        self.state.lock().cookies.last_completed()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Queue a deferred dispatcher pass
    pub(crate) fn schedule(&self) {
        if !self.tasklet.claim_schedule() {
            return;
        }
        let queued = match self.me.upgrade() {
            Some(me) => self.platform.schedule(me),
            None => false,
        };
        if !queued {
            // let the next trigger try again
            warn!("gdma{}: dispatcher pass not scheduled", self.id);
            self.tasklet.clear_schedule();
        }
    }
}

impl<P: Platform> Deferred for Channel<P> {
    fn run(&self) {
        self.tasklet.clear_schedule();
        self.run_dispatcher();
    }
}
