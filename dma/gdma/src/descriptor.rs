//! Transfer descriptors
//!
//! A [`Descriptor`] is one transfer request plus its completion state and
//! callback. It is built by one of the channel's `prepare_*` calls, handed
//! to [`Channel::submit`](crate::channel::Channel::submit), and from then on
//! owned by the channel queue until the dispatcher reaps it.

use core::fmt;

use bitflags::bitflags;

use crate::cookie::Cookie;
use crate::regs::{Burst, DmaAddr};

/// Descriptor state
///
/// ```text
/// prepare_*      dispatcher         irq / terminate_all      reap
///   ──► Prepared ──────────► Busy ────────────────────► Done ───► Free
///          │                                              ▲
///          └──────── InvalidConfig / terminate_all ───────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Removed from the queue, storage about to be released
    Free,
    /// Built, possibly queued, not yet handed to hardware
    Prepared,
    /// Programmed into the engine
    Busy,
    /// Finished (or abandoned), waiting to be reaped
    Done,
}

/// Transfer kind with its kind-specific operands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferKind {
    /// Memory to memory copy
    Copy,
    /// Fill destination with a 64-bit pattern
    Fill { pattern: u64 },
    /// Search source for a pattern under a bit mask
    Match { pattern: u64, mask: u64 },
}

/// Register-level description of one transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Request {
    pub kind: TransferKind,
    pub src: DmaAddr,
    pub dst: DmaAddr,
    pub len: u32,
    pub burst: Burst,
}

impl Request {
    /// Copy request
    pub fn copy(dst: DmaAddr, src: DmaAddr, len: u32, burst: Burst) -> Self {
        Self {
            kind: TransferKind::Copy,
            src,
            dst,
            len,
            burst,
        }
    }

    /// Fill request
    pub fn fill(dst: DmaAddr, pattern: u64, len: u32, burst: Burst) -> Self {
        Self {
            kind: TransferKind::Fill { pattern },
            src: 0,
            dst,
            len,
            burst,
        }
    }

    /// Pattern-match request
    pub fn pattern_match(src: DmaAddr, pattern: u64, mask: u64, len: u32, burst: Burst) -> Self {
        Self {
            kind: TransferKind::Match { pattern, mask },
            src,
            dst: 0,
            len,
            burst,
        }
    }

    /// Whether the engine reads from `src`
    pub fn reads_source(&self) -> bool {
        !matches!(self.kind, TransferKind::Fill { .. })
    }

    /// Whether the engine writes to `dst`
    pub fn writes_destination(&self) -> bool {
        !matches!(self.kind, TransferKind::Match { .. })
    }
}

bitflags! {
    /// Per-transfer flags supplied at prepare time
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct TxFlags: u32 {
        /// Run the completion callback when the descriptor is reaped
        const PREP_INTERRUPT = 1 << 0;
        /// Client acknowledges the descriptor may be reused
        const CTRL_ACK = 1 << 1;
        /// Leave the source mapping alone on completion
        const SKIP_SRC_UNMAP = 1 << 2;
        /// Leave the destination mapping alone on completion
        const SKIP_DEST_UNMAP = 1 << 3;
    }
}

/// Completion callback; captures whatever argument the client needs
pub type Callback = Box<dyn FnOnce() + Send + 'static>;

/// One queued transfer
pub struct Descriptor {
    pub(crate) cookie: Option<Cookie>,
    pub(crate) status: Status,
    pub(crate) request: Request,
    pub(crate) flags: TxFlags,
    callback: Option<Callback>,
    chain: Vec<Descriptor>,
}

impl Descriptor {
    pub(crate) fn new(request: Request, flags: TxFlags) -> Self {
        Self {
            cookie: None,
            status: Status::Prepared,
            request,
            flags,
            callback: None,
            chain: Vec::new(),
        }
    }

    /// Cookie assigned at submit time
    pub fn cookie(&self) -> Option<Cookie> {
        self.cookie
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn flags(&self) -> TxFlags {
        self.flags
    }

    /// Set the completion callback
    ///
    /// The callback runs at most once, outside the channel lock, and only if
    /// the descriptor was prepared with [`TxFlags::PREP_INTERRUPT`].
    pub fn set_callback<F>(&mut self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.callback = Some(Box::new(callback));
    }

    /// Builder form of [`set_callback`](Self::set_callback)
    pub fn with_callback<F>(mut self, callback: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        self.set_callback(callback);
        self
    }

    /// Link `next` behind this descriptor (and behind anything already linked)
    ///
    /// The whole chain is queued by a single submit, each link receiving its
    /// own sequential cookie.
    pub fn chain(&mut self, mut next: Descriptor) {
        let tail = core::mem::take(&mut next.chain);
        self.chain.push(next);
        self.chain.extend(tail);
    }

    /// Builder form of [`chain`](Self::chain)
    pub fn then(mut self, next: Descriptor) -> Self {
        self.chain(next);
        self
    }

    /// Number of descriptors a submit of this one will queue
    pub fn chain_len(&self) -> usize {
        1 + self.chain.len()
    }

    /// Split into submission order: this descriptor first, then its links
    pub(crate) fn into_chain(mut self) -> Vec<Descriptor> {
        let links = core::mem::take(&mut self.chain);
        let mut all = Vec::with_capacity(1 + links.len());
        all.push(self);
        all.extend(links);
        all
    }

    /// Run the callback if the client asked for it
    ///
    /// Returns whether a callback ran.
    pub(crate) fn notify(&mut self) -> bool {
        match self.callback.take() {
            Some(callback) if self.flags.contains(TxFlags::PREP_INTERRUPT) => {
                callback();
                true
            }
            _ => false,
        }
    }
}

impl fmt::Debug for Descriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Descriptor")
            .field("cookie", &self.cookie)
            .field("status", &self.status)
            .field("request", &self.request)
            .field("flags", &self.flags)
            .field("callback", &self.callback.is_some())
            .field("chain", &self.chain.len())
            .finish()
    }
}
