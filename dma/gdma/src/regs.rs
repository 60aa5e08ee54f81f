//! GDMA register file
//!
//! All registers are 32 bits wide and live at fixed offsets from the
//! per-device base address.

use std::sync::Arc;

use bitflags::bitflags;
use log::warn;

/// Register offsets
pub mod offset {
    pub const CON: usize = 0x00; // Control
    pub const SIZE: usize = 0x04; // Transfer length in bytes
    pub const SRC: usize = 0x08; // Source address
    pub const DST: usize = 0x0C; // Destination address
    pub const FILL0: usize = 0x10; // Fill pattern low
    pub const FILL1: usize = 0x14; // Fill pattern high
    pub const MAT0: usize = 0x18; // Match pattern low
    pub const MAT1: usize = 0x1C; // Match pattern high
    pub const BITEN0: usize = 0x20; // Match bit-enable low
    pub const BITEN1: usize = 0x24; // Match bit-enable high
    pub const STAT: usize = 0x28; // Status
    pub const PMADDR: usize = 0x2C; // Pattern-match result address
}

/// Size of the register window in bytes
pub const REG_SPAN: usize = 0x30;

/// Largest length the SIZE register accepts
pub const MAX_TRANSFER_LEN: usize = 0x00FF_FFFF;

/// Device-visible bus address
pub type DmaAddr = u32;

bitflags! {
    /// STAT register bits
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Stat: u32 {
        /// Transfer running; set by software, cleared by hardware on completion
        const START = 1 << 0;
        /// Pattern match found
        const PM_SUCCESS = 1 << 4;
        /// Completion directed at the ARM core
        const DONE_ARM = 1 << 5;
        /// Completion directed at DSP0
        const DONE_DSP0 = 1 << 6;
        /// Completion directed at DSP1
        const DONE_DSP1 = 1 << 7;

        const DONE_ANY = Self::DONE_ARM.bits() | Self::DONE_DSP0.bits() | Self::DONE_DSP1.bits();
    }
}

/// CON register fields
mod con {
    pub const FUNC_SHIFT: u32 = 0;
    pub const BURST_SHIFT: u32 = 4;
    pub const TARGET_SHIFT: u32 = 8;
}

/// Engine function selected in CON
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Function {
    Copy = 0,
    Fill = 1,
    Match = 2,
}

/// Bus burst length in beats
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Burst {
    Single = 0,
    Incr4 = 1,
    Incr8 = 2,
    Incr16 = 3,
}

impl Burst {
    /// Largest burst the engine supports
    pub const MAX: Burst = Burst::Incr16;

    /// Number of beats per burst
    pub fn beats(self) -> u32 {
        match self {
            Burst::Single => 1,
            Burst::Incr4 => 4,
            Burst::Incr8 => 8,
            Burst::Incr16 => 16,
        }
    }

    /// Parse a beat count
    pub fn from_beats(beats: u32) -> Option<Self> {
        match beats {
            1 => Some(Burst::Single),
            4 => Some(Burst::Incr4),
            8 => Some(Burst::Incr8),
            16 => Some(Burst::Incr16),
            _ => None,
        }
    }
}

/// Processor that receives the completion interrupt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrqTarget {
    Arm = 0,
    Dsp0 = 1,
    Dsp1 = 2,
}

impl IrqTarget {
    /// STAT bit the hardware raises for this target
    pub fn done_bit(self) -> Stat {
        match self {
            IrqTarget::Arm => Stat::DONE_ARM,
            IrqTarget::Dsp0 => Stat::DONE_DSP0,
            IrqTarget::Dsp1 => Stat::DONE_DSP1,
        }
    }
}

/// Build a CON value
pub fn control_word(function: Function, burst: Burst, target: IrqTarget) -> u32 {
    (function as u32) << con::FUNC_SHIFT
        | (burst as u32) << con::BURST_SHIFT
        | (target as u32) << con::TARGET_SHIFT
}

/// 32-bit register access
pub trait RegisterIo: Send + Sync {
    /// Read the register at `offset`
    fn read(&self, offset: usize) -> u32;

    /// Write `value` to the register at `offset`
    fn write(&self, offset: usize, value: u32);
}

impl<T: RegisterIo + ?Sized> RegisterIo for Arc<T> {
    fn read(&self, offset: usize) -> u32 {
        (**self).read(offset)
    }

    fn write(&self, offset: usize, value: u32) {
        (**self).write(offset, value)
    }
}

/// Memory-mapped register window
#[derive(Debug)]
pub struct Mmio {
    base: usize,
}

impl Mmio {
    /// Wrap a mapped register window
    ///
    /// # Safety
    ///
    /// `base` must point to at least [`REG_SPAN`] bytes of mapped, 4-byte
    /// aligned device memory that stays mapped for the lifetime of the value.
    pub const unsafe fn new(base: usize) -> Self {
        Self { base }
    }

    /// Base address of the window
    pub fn base(&self) -> usize {
        self.base
    }

    /// Address of the register at `offset`, if it lies inside the window
    fn reg(&self, offset: usize) -> Option<usize> {
        if offset % 4 != 0 || offset >= REG_SPAN {
            warn!("gdma: register offset {:#x} outside window", offset);
            return None;
        }
        Some(self.base + offset)
    }
}

impl RegisterIo for Mmio {
    /// Out-of-window or misaligned offsets read as zero
    fn read(&self, offset: usize) -> u32 {
        match self.reg(offset) {
            // SAFETY: in-window and aligned, mapped per `Mmio::new`
            Some(addr) => unsafe { core::ptr::read_volatile(addr as *const u32) },
            None => 0,
        }
    }

    /// Out-of-window or misaligned offsets are dropped
    fn write(&self, offset: usize, value: u32) {
        if let Some(addr) = self.reg(offset) {
            // SAFETY: in-window and aligned, mapped per `Mmio::new`
            unsafe { core::ptr::write_volatile(addr as *mut u32, value) }
        }
    }
}
