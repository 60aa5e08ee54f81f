// SPDX-FileCopyrightText: 2024 Redox OS Developers
// SPDX-License-Identifier: MIT

//! Simulated board
//!
//! [`SimRegisters`] is a register file that remembers every transfer
//! software starts; the "hardware" side is driven explicitly through
//! [`SimRegisters::finish`]. [`SimPlatform`] provides a soft interrupt
//! controller with shared lines and masking, an ordered log of platform
//! calls, and one-shot failure injection for bring-up paths.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use log::{debug, trace};
use parking_lot::Mutex;

use crate::device::{IrqHandler, MapDirection, Platform};
use crate::error::{Error, Resource, Result};
use crate::executor::{Deferred, Executor};
use crate::irq::IrqReturn;
use crate::regs::{offset, DmaAddr, IrqTarget, RegisterIo, Stat, REG_SPAN};

const NUM_REGS: usize = REG_SPAN / 4;

/// Transfer latched when software set START
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transfer {
    pub con: u32,
    pub src: u32,
    pub dst: u32,
    pub size: u32,
}

/// In-memory GDMA register file
pub struct SimRegisters {
    regs: [AtomicU32; NUM_REGS],
    transfers: Mutex<Vec<Transfer>>,
}

impl SimRegisters {
    pub fn new() -> Self {
        Self {
            regs: std::array::from_fn(|_| AtomicU32::new(0)),
            transfers: Mutex::new(Vec::new()),
        }
    }

    fn reg(&self, offset: usize) -> Option<&AtomicU32> {
        if offset % 4 != 0 {
            return None;
        }
        self.regs.get(offset / 4)
    }

    fn stat(&self) -> &AtomicU32 {
        &self.regs[offset::STAT / 4]
    }

    /// Every transfer started so far, oldest first
    pub fn transfers(&self) -> Vec<Transfer> {
        self.transfers.lock().clone()
    }

    pub fn is_running(&self) -> bool {
        self.stat().load(Ordering::Acquire) & Stat::START.bits() != 0
    }

    /// Set or clear START behind software's back
    pub fn force_busy(&self, busy: bool) {
        if busy {
            self.stat().fetch_or(Stat::START.bits(), Ordering::AcqRel);
        } else {
            self.stat().fetch_and(!Stat::START.bits(), Ordering::AcqRel);
        }
    }

    /// Set arbitrary STAT bits
    pub fn raise(&self, bits: Stat) {
        self.stat().fetch_or(bits.bits(), Ordering::AcqRel);
    }

    /// Complete the running transfer: clear START, raise the completion bit
    ///
    /// Returns false if nothing was running.
    pub fn finish(&self, target: IrqTarget) -> bool {
        let done = target.done_bit().bits();
        self.stat()
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |stat| {
                (stat & Stat::START.bits() != 0).then(|| (stat & !Stat::START.bits()) | done)
            })
            .is_ok()
    }
}

impl Default for SimRegisters {
    fn default() -> Self {
        Self::new()
    }
}

impl RegisterIo for SimRegisters {
    fn read(&self, offset: usize) -> u32 {
        self.reg(offset)
            .map(|reg| reg.load(Ordering::Acquire))
            .unwrap_or(0)
    }

    fn write(&self, offset: usize, value: u32) {
        let Some(reg) = self.reg(offset) else {
            return;
        };
        let old = reg.swap(value, Ordering::AcqRel);

        if offset == offset::STAT
            && value & Stat::START.bits() != 0
            && old & Stat::START.bits() == 0
        {
            let transfer = Transfer {
                con: self.read(offset::CON),
                src: self.read(offset::SRC),
                dst: self.read(offset::DST),
                size: self.read(offset::SIZE),
            };
            trace!("gdma-sim: latched {:?}", transfer);
            self.transfers.lock().push(transfer);
        }
    }
}

/// Platform call recorded by [`SimPlatform`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlatformEvent {
    MapRegisters { base: usize, len: usize },
    UnmapRegisters,
    RequestIrq(u32),
    FreeIrq(u32),
    EnableIrq(u32),
    DisableIrq(u32),
}

/// Bring-up step that can be made to fail once
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum FailPoint {
    MapRegisters,
    RequestIrq,
}

/// Buffer unmapping recorded during reap
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Unmap {
    pub addr: DmaAddr,
    pub len: u32,
    pub direction: MapDirection,
}

#[derive(Default)]
struct IrqLine {
    handlers: Vec<IrqHandler>,
    enabled: bool,
}

/// Board backed by [`SimRegisters`] and a soft interrupt controller
pub struct SimPlatform {
    registers: Arc<SimRegisters>,
    executor: Arc<dyn Executor>,
    lines: Mutex<BTreeMap<u32, IrqLine>>,
    events: Mutex<Vec<PlatformEvent>>,
    unmaps: Mutex<Vec<Unmap>>,
    armed: Mutex<BTreeSet<FailPoint>>,
}

impl SimPlatform {
    /// Deferred work goes to `executor`
    pub fn new<E: Executor + 'static>(executor: Arc<E>) -> Self {
        Self {
            registers: Arc::new(SimRegisters::new()),
            executor,
            lines: Mutex::new(BTreeMap::new()),
            events: Mutex::new(Vec::new()),
            unmaps: Mutex::new(Vec::new()),
            armed: Mutex::new(BTreeSet::new()),
        }
    }

    /// The register file every mapping resolves to
    pub fn registers(&self) -> Arc<SimRegisters> {
        Arc::clone(&self.registers)
    }

    /// Make the next call at `point` fail
    pub fn fail_next(&self, point: FailPoint) {
        self.armed.lock().insert(point);
    }

    fn should_fail(&self, point: FailPoint) -> bool {
        self.armed.lock().remove(&point)
    }

    fn record(&self, event: PlatformEvent) {
        self.events.lock().push(event);
    }

    /// Platform calls so far, oldest first
    pub fn events(&self) -> Vec<PlatformEvent> {
        self.events.lock().clone()
    }

    /// Buffer unmappings so far, oldest first
    pub fn unmaps(&self) -> Vec<Unmap> {
        self.unmaps.lock().clone()
    }

    pub fn irq_enabled(&self, irq: u32) -> bool {
        self.lines
            .lock()
            .get(&irq)
            .map_or(false, |line| line.enabled)
    }

    /// Handlers attached to `irq`
    pub fn irq_handlers(&self, irq: u32) -> usize {
        self.lines
            .lock()
            .get(&irq)
            .map_or(0, |line| line.handlers.len())
    }

    /// Deliver `irq` to every handler on the line
    ///
    /// A masked line delivers nothing; the STAT bits stay pending.
    pub fn raise_irq(&self, irq: u32) -> IrqReturn {
        let handlers = match self.lines.lock().get(&irq) {
            Some(line) if line.enabled => line.handlers.clone(),
            _ => {
                debug!("gdma-sim: irq {} masked or unclaimed", irq);
                return IrqReturn::None;
            }
        };

        let mut ret = IrqReturn::None;
        for handler in handlers {
            if handler() == IrqReturn::Handled {
                ret = IrqReturn::Handled;
            }
        }
        ret
    }

    /// Finish the running transfer for `target` and deliver `irq`
    pub fn complete_transfer(&self, irq: u32, target: IrqTarget) -> IrqReturn {
        if !self.registers.finish(target) {
            debug!("gdma-sim: nothing running");
        }
        self.raise_irq(irq)
    }
}

impl Platform for SimPlatform {
    type Regs = Arc<SimRegisters>;

    fn map_registers(&self, base: usize, len: usize) -> Result<Self::Regs> {
        if self.should_fail(FailPoint::MapRegisters) {
            return Err(Error::ResourceUnavailable(Resource::Registers));
        }
        self.record(PlatformEvent::MapRegisters { base, len });
        Ok(self.registers())
    }

    fn unmap_registers(&self, _regs: &Self::Regs) {
        self.record(PlatformEvent::UnmapRegisters);
    }

    fn request_irq(&self, irq: u32, handler: IrqHandler) -> Result<()> {
        if self.should_fail(FailPoint::RequestIrq) {
            return Err(Error::ResourceUnavailable(Resource::Irq));
        }
        self.lines
            .lock()
            .entry(irq)
            .or_default()
            .handlers
            .push(handler);
        self.record(PlatformEvent::RequestIrq(irq));
        Ok(())
    }

    fn free_irq(&self, irq: u32) {
        // one handler per device on the sim board
        if let Some(line) = self.lines.lock().get_mut(&irq) {
            line.handlers.pop();
        }
        self.record(PlatformEvent::FreeIrq(irq));
    }

    fn enable_irq(&self, irq: u32) {
        self.lines.lock().entry(irq).or_default().enabled = true;
        self.record(PlatformEvent::EnableIrq(irq));
    }

    fn disable_irq(&self, irq: u32) {
        if let Some(line) = self.lines.lock().get_mut(&irq) {
            line.enabled = false;
        }
        self.record(PlatformEvent::DisableIrq(irq));
    }

    fn unmap_buffer(&self, addr: DmaAddr, len: u32, direction: MapDirection) {
        self.unmaps.lock().push(Unmap {
            addr,
            len,
            direction,
        });
    }

    fn schedule(&self, work: Arc<dyn Deferred>) -> bool {
        self.executor.schedule(work)
    }
}
