//! Register-level driver for the single-transfer copy engine

use log::trace;

use crate::descriptor::{Request, TransferKind};
use crate::error::{Error, Result};
use crate::regs::{control_word, offset, Function, IrqTarget, RegisterIo, Stat};

/// One GDMA engine behind a register window
pub struct Engine<R> {
    regs: R,
    target: IrqTarget,
}

impl<R: RegisterIo> Engine<R> {
    /// Wrap a mapped register window; completions are routed to `target`
    pub fn new(regs: R, target: IrqTarget) -> Self {
        Self { regs, target }
    }

    pub fn regs(&self) -> &R {
        &self.regs
    }

    /// Interrupt target programmed into every transfer
    pub fn target(&self) -> IrqTarget {
        self.target
    }

    /// Current STAT value
    pub fn status(&self) -> Stat {
        Stat::from_bits_retain(self.regs.read(offset::STAT))
    }

    /// Whether a transfer is running
    pub fn is_busy(&self) -> bool {
        self.status().contains(Stat::START)
    }

    /// Control word for `request`
    ///
    /// Only copies can be programmed: the fill and match register paths are
    /// not wired on any shipping revision.
    fn control(&self, request: &Request) -> Result<u32> {
        match request.kind {
            TransferKind::Copy => Ok(control_word(Function::Copy, request.burst, self.target)),
            TransferKind::Fill { .. } | TransferKind::Match { .. } => Err(Error::InvalidConfig),
        }
    }

    /// Program `request` and set START
    ///
    /// Fails with [`Error::InvalidConfig`] if the request has no control word
    /// and with [`Error::Busy`] if START is already set. Nothing is written
    /// on failure.
    pub fn start(&self, request: &Request) -> Result<()> {
        let con = self.control(request)?;

        let stat = self.status();
        if stat.contains(Stat::START) {
            return Err(Error::Busy);
        }

        trace!(
            "gdma: start con={:#x} src={:#x} dst={:#x} size={}",
            con,
            request.src,
            request.dst,
            request.len
        );

        self.regs.write(offset::CON, con);
        self.regs.write(offset::DST, request.dst);
        self.regs.write(offset::SRC, request.src);
        self.regs.write(offset::SIZE, request.len);
        self.regs.write(offset::STAT, (stat | Stat::START).bits());

        Ok(())
    }

    /// Abort the running transfer
    ///
    /// The engine has no abort command; a started transfer always runs to
    /// completion.
    pub fn stop(&self) -> Result<()> {
        Err(Error::NotSupported)
    }

    /// Completion bits currently raised
    pub fn pending_completions(&self) -> Stat {
        self.status() & Stat::DONE_ANY
    }

    /// Clear the completion bits in `bits`
    pub fn acknowledge(&self, bits: Stat) {
        let stat = self.status();
        self.regs
            .write(offset::STAT, (stat - (bits & Stat::DONE_ANY)).bits());
    }
}
