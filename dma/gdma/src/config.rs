//! Engine configuration

use bitflags::bitflags;
use log::warn;

use crate::regs::{Burst, IrqTarget};

bitflags! {
    /// Transfer kinds a board revision accepts at prepare time
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Capabilities: u32 {
        const MEMCPY = 1 << 0;
        const FILL = 1 << 1;
        const PATTERN_MATCH = 1 << 2;
    }
}

/// GDMA configuration
#[derive(Debug, Clone)]
pub struct GdmaConfig {
    /// Processor that receives completion interrupts
    pub irq_target: IrqTarget,
    /// Largest burst the engine supports; every transfer uses it
    pub max_burst: Burst,
    /// Transfer kinds accepted at prepare time
    pub capabilities: Capabilities,
    /// Slots in a worker's deferred-work queue (at least one per channel)
    pub worker_queue_depth: usize,
}

impl Default for GdmaConfig {
    fn default() -> Self {
        Self {
            irq_target: IrqTarget::Arm,
            max_burst: Burst::MAX,
            capabilities: Capabilities::MEMCPY,
            worker_queue_depth: 32,
        }
    }
}

impl GdmaConfig {
    /// Parse configuration from environment
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Parse configuration from any key/value source
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(val) = lookup("GDMA_IRQ_TARGET") {
            match parse_target(&val) {
                Some(target) => config.irq_target = target,
                None => warn!("gdma: ignoring GDMA_IRQ_TARGET={}", val),
            }
        }

        if let Some(val) = lookup("GDMA_MAX_BURST") {
            match val.parse().ok().and_then(Burst::from_beats) {
                Some(burst) => config.max_burst = burst,
                None => warn!("gdma: ignoring GDMA_MAX_BURST={}", val),
            }
        }

        if let Some(val) = lookup("GDMA_CAPS") {
            match parse_capabilities(&val) {
                Some(caps) => config.capabilities = caps,
                None => warn!("gdma: ignoring GDMA_CAPS={}", val),
            }
        }

        if let Some(val) = lookup("GDMA_WORKER_QUEUE_DEPTH") {
            match val.parse::<usize>() {
                Ok(n) if n > 0 => config.worker_queue_depth = n,
                _ => warn!("gdma: ignoring GDMA_WORKER_QUEUE_DEPTH={}", val),
            }
        }

        config
    }
}

fn parse_target(val: &str) -> Option<IrqTarget> {
    match val.to_lowercase().as_str() {
        "arm" => Some(IrqTarget::Arm),
        "dsp0" => Some(IrqTarget::Dsp0),
        "dsp1" => Some(IrqTarget::Dsp1),
        _ => None,
    }
}

fn parse_capabilities(val: &str) -> Option<Capabilities> {
    let mut caps = Capabilities::empty();
    for name in val.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        caps |= match name.to_lowercase().as_str() {
            "memcpy" | "copy" => Capabilities::MEMCPY,
            "fill" | "memset" => Capabilities::FILL,
            "match" => Capabilities::PATTERN_MATCH,
            _ => return None,
        };
    }
    Some(caps)
}
