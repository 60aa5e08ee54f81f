//! Completion interrupt handling
//!
//! Runs in interrupt context. The handler only flips the in-flight
//! descriptor to `Done` and clears the STAT bit, both under the channel
//! spinlock; reaping and the next start are left to a deferred dispatcher
//! pass.

use log::{trace, warn};

use crate::channel::Channel;
use crate::descriptor::Status;
use crate::device::{Device, Platform};
use crate::regs::Stat;

/// Interrupt handler result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrqReturn {
    /// No completion bit was ours; the line is shared
    None,
    Handled,
}

impl<P: Platform> Device<P> {
    /// Completion interrupt entry point
    pub fn handle_irq(&self) -> IrqReturn {
        if self.is_removed() {
            return IrqReturn::None;
        }
        let pending = self.engine().pending_completions();
        if pending.is_empty() {
            return IrqReturn::None;
        }

        let mut handled = false;
        for channel in self.channels() {
            let bit = channel.completion_bit();
            if !pending.contains(bit) {
                continue;
            }
            channel.complete_in_flight(bit);
            channel.schedule();
            handled = true;
        }

        if handled {
            IrqReturn::Handled
        } else {
            trace!("gdma: stat {:?} routed elsewhere", pending);
            IrqReturn::None
        }
    }
}

impl<P: Platform> Channel<P> {
    /// Mark the in-flight descriptor done and acknowledge `bit`
    fn complete_in_flight(&self, bit: Stat) {
        let mut state = self.state.lock();

        match state
            .queue
            .iter_mut()
            .find(|desc| desc.status == Status::Busy)
        {
            Some(desc) => {
                trace!("gdma{}: cookie {:?} done", self.id, desc.cookie);
                desc.status = Status::Done;
            }
            None => {
                // terminate_all already reaped it
                warn!("gdma{}: completion with no transfer in flight", self.id);
                self.stats.record_spurious();
            }
        }

        self.engine.acknowledge(bit);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GdmaConfig;
    use crate::descriptor::TxFlags;
    use crate::device::DeviceResources;
    use crate::executor::ManualExecutor;
    use crate::regs::{IrqTarget, REG_SPAN};
    use crate::sim::SimPlatform;
    use std::sync::Arc;

    const IRQ: u32 = 17;

    fn device(config: &GdmaConfig) -> (Arc<SimPlatform>, Arc<ManualExecutor>, Arc<Device<SimPlatform>>) {
        let executor = Arc::new(ManualExecutor::new());
        let platform = Arc::new(SimPlatform::new(executor.clone()));
        let resources = DeviceResources {
            reg_base: 0x1300_0000,
            reg_len: REG_SPAN,
            irq: IRQ,
        };
        let device = Device::create(platform.clone(), resources, config).unwrap();
        device.request_channel().unwrap();
        (platform, executor, device)
    }

    #[test]
    fn test_no_completion_bits_is_not_mine() {
        let (platform, executor, _device) = device(&GdmaConfig::default());
        assert_eq!(platform.raise_irq(IRQ), IrqReturn::None);
        assert_eq!(executor.pending(), 0);
    }

    #[test]
    fn test_other_target_is_not_mine() {
        let (platform, executor, device) = device(&GdmaConfig::default());
        platform.registers().raise(Stat::DONE_DSP1);

        assert_eq!(device.handle_irq(), IrqReturn::None);
        assert_eq!(executor.pending(), 0);
        // left for whoever owns it
        assert!(device.engine().status().contains(Stat::DONE_DSP1));
    }

    #[test]
    fn test_completion_marks_busy_done_and_defers() {
        let (platform, executor, device) = device(&GdmaConfig::default());
        let ch = device.channel(0).unwrap();

        let desc = ch.prepare_copy(0x2000, 0x1000, 64, TxFlags::empty()).unwrap();
        let cookie = ch.submit(desc).unwrap();
        ch.issue_pending();
        assert_eq!(ch.queue_status(), vec![(Some(cookie), Status::Busy)]);

        platform.complete_transfer(IRQ, IrqTarget::Arm);

        // only flipped, not reaped
        assert_eq!(ch.queue_status(), vec![(Some(cookie), Status::Done)]);
        assert!(device.engine().pending_completions().is_empty());
        assert_eq!(executor.pending(), 1);

        executor.run_pending();
        assert_eq!(ch.queued(), 0);
        assert_eq!(ch.last_completed(), Some(cookie));
    }

    #[test]
    fn test_repeated_irq_schedules_once() {
        let (platform, executor, device) = device(&GdmaConfig::default());
        let ch = device.channel(0).unwrap();
        ch.submit(ch.prepare_copy(0x2000, 0x1000, 64, TxFlags::empty()).unwrap()).unwrap();
        ch.issue_pending();

        platform.complete_transfer(IRQ, IrqTarget::Arm);
        platform.registers().raise(Stat::DONE_ARM);
        assert_eq!(platform.raise_irq(IRQ), IrqReturn::Handled);

        assert_eq!(executor.pending(), 1);
        assert_eq!(ch.stats().spurious_irqs, 1);
    }

    #[test]
    fn test_irq_with_empty_queue_is_tolerated() {
        let (platform, executor, device) = device(&GdmaConfig::default());
        platform.registers().raise(Stat::DONE_ARM);

        assert_eq!(platform.raise_irq(IRQ), IrqReturn::Handled);
        assert_eq!(device.channel(0).unwrap().stats().spurious_irqs, 1);
        assert!(device.engine().pending_completions().is_empty());
        assert_eq!(executor.run_pending(), 1);
    }

    #[test]
    fn test_dsp_target_routing() {
        let config = GdmaConfig {
            irq_target: IrqTarget::Dsp0,
            ..GdmaConfig::default()
        };
        let (platform, _, device) = device(&config);
        let ch = device.channel(0).unwrap();
        assert_eq!(ch.completion_bit(), Stat::DONE_DSP0);

        ch.submit(ch.prepare_copy(0x2000, 0x1000, 64, TxFlags::empty()).unwrap()).unwrap();
        ch.issue_pending();
        platform.complete_transfer(IRQ, IrqTarget::Dsp0);
        assert_eq!(ch.queue_status()[0].1, Status::Done);
    }
}
