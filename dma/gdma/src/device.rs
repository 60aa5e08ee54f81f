// SPDX-FileCopyrightText: 2024 Redox OS Developers
// SPDX-License-Identifier: MIT

//! GDMA device lifecycle
//!
//! Bring-up maps the register window, builds the engine and its single
//! channel, and hooks the completion interrupt. A failure at any step
//! releases what the earlier steps acquired, newest first, so no partially
//! built device is ever reachable. Teardown runs the same steps backwards.
//!
//! ```text
//!   create:   map_registers ──► Engine + Channel ──► request_irq
//!   destroy:  terminate_all ──► free channel ──► free_irq ──► unmap_registers
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use log::{error, info};

use crate::channel::Channel;
use crate::config::GdmaConfig;
use crate::engine::Engine;
use crate::error::{Error, Resource, Result};
use crate::executor::Deferred;
use crate::irq::IrqReturn;
use crate::regs::{DmaAddr, RegisterIo, REG_SPAN};

/// Interrupt handler registered with the platform
pub type IrqHandler = Arc<dyn Fn() -> IrqReturn + Send + Sync>;

/// Which side of a transfer a buffer mapping belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapDirection {
    /// Engine reads from the buffer
    Source,
    /// Engine writes to the buffer
    Destination,
}

/// Board services the engine depends on
///
/// Register mapping, interrupt plumbing, buffer-mapping teardown and the
/// deferred-work primitive all come from here; nothing in this crate talks
/// to the bus directly.
pub trait Platform: Send + Sync + Sized + 'static {
    /// Register window handed out by [`map_registers`](Self::map_registers)
    type Regs: RegisterIo + 'static;

    /// Map `len` bytes of registers at physical address `base`
    fn map_registers(&self, base: usize, len: usize) -> Result<Self::Regs>;

    /// Release a mapping made by [`map_registers`](Self::map_registers)
    fn unmap_registers(&self, regs: &Self::Regs);

    /// Attach `handler` to `irq`; the line may be shared with other devices
    fn request_irq(&self, irq: u32, handler: IrqHandler) -> Result<()>;

    /// Detach the handler registered by this device
    fn free_irq(&self, irq: u32);

    fn enable_irq(&self, irq: u32);

    fn disable_irq(&self, irq: u32);

    /// Tear down the device mapping of a buffer once its transfer is reaped
    fn unmap_buffer(&self, addr: DmaAddr, len: u32, direction: MapDirection);

    /// Run `work` later, outside interrupt context
    ///
    /// Returns false if the work was refused and will never run.
    fn schedule(&self, work: Arc<dyn Deferred>) -> bool;
}

/// Resources discovered for one device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceResources {
    /// Physical base of the register window
    pub reg_base: usize,
    /// Length of the register window
    pub reg_len: usize,
    /// Completion interrupt line
    pub irq: u32,
}

/// One GDMA controller
pub struct Device<P: Platform> {
    platform: Arc<P>,
    engine: Arc<Engine<P::Regs>>,
    channels: Vec<Arc<Channel<P>>>,
    resources: DeviceResources,
    removed: AtomicBool,
}

impl<P: Platform> Device<P> {
    /// Bring up a device
    ///
    /// The hardware has one engine, so exactly one channel is created.
    pub fn create(
        platform: Arc<P>,
        resources: DeviceResources,
        config: &GdmaConfig,
    ) -> Result<Arc<Self>> {
        if resources.reg_len < REG_SPAN {
            error!(
                "gdma: register window {:#x}+{:#x} too small",
                resources.reg_base, resources.reg_len
            );
            return Err(Error::ResourceUnavailable(Resource::Registers));
        }

        let regs = platform
            .map_registers(resources.reg_base, resources.reg_len)
            .map_err(|err| {
                error!("gdma: failed to map registers: {}", err);
                err
            })?;

        let engine = Arc::new(Engine::new(regs, config.irq_target));
        let channel = Channel::new(
            0,
            resources.irq,
            Arc::clone(&platform),
            Arc::clone(&engine),
            config,
        );

        let device = Arc::new(Self {
            platform: Arc::clone(&platform),
            engine,
            channels: vec![channel],
            resources,
            removed: AtomicBool::new(false),
        });

        let weak: Weak<Self> = Arc::downgrade(&device);
        let handler: IrqHandler = Arc::new(move || match weak.upgrade() {
            Some(device) => device.handle_irq(),
            None => IrqReturn::None,
        });

        if let Err(err) = platform.request_irq(resources.irq, handler) {
            error!("gdma: failed to request irq {}: {}", resources.irq, err);
            // nothing was hooked, so only the mapping needs undoing
            device.removed.store(true, Ordering::Release);
            platform.unmap_registers(device.engine.regs());
            return Err(err);
        }

        info!(
            "gdma: device at {:#x} irq {} with {} channel(s)",
            resources.reg_base,
            resources.irq,
            device.channels.len()
        );
        Ok(device)
    }

    /// Tear the device down; later calls do nothing
    pub fn destroy(&self) {
        if self.removed.swap(true, Ordering::AcqRel) {
            return;
        }

        for channel in &self.channels {
            channel.terminate_all();
            channel.retire();
        }
        self.platform.free_irq(self.resources.irq);
        self.platform.unmap_registers(self.engine.regs());

        info!("gdma: device at {:#x} removed", self.resources.reg_base);
    }

    pub fn is_removed(&self) -> bool {
        self.removed.load(Ordering::Acquire)
    }

    pub fn resources(&self) -> DeviceResources {
        self.resources
    }

    pub fn engine(&self) -> &Engine<P::Regs> {
        &self.engine
    }

    pub fn channels(&self) -> &[Arc<Channel<P>>] {
        &self.channels
    }

    pub fn channel(&self, id: usize) -> Option<&Arc<Channel<P>>> {
        self.channels.get(id)
    }

    /// Allocate the first free channel
    pub fn request_channel(&self) -> Result<Arc<Channel<P>>> {
        if self.is_removed() {
            return Err(Error::ResourceUnavailable(Resource::Channel));
        }
        for channel in &self.channels {
            if channel.alloc_resources().is_ok() {
                return Ok(Arc::clone(channel));
            }
        }
        Err(Error::ResourceUnavailable(Resource::Channel))
    }

    /// Terminate and free a channel obtained from [`request_channel`](Self::request_channel)
    pub fn release_channel(&self, channel: &Channel<P>) {
        channel.terminate_all();
        channel.free_resources();
    }
}

impl<P: Platform> Drop for Device<P> {
    fn drop(&mut self) {
        self.destroy();
    }
}
