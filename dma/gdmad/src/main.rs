// SPDX-FileCopyrightText: 2024 Redox OS Developers
// SPDX-License-Identifier: MIT

//! GDMA self-test daemon
//!
//! Brings one GDMA device up on the simulated board, pushes a batch of copy
//! transfers through it and reports what the channel saw.
//!
//! ```text
//! ┌──────────────┐ submit/issue ┌──────────────┐  START   ┌──────────────┐
//! │  bench loop  │─────────────►│   Channel    │─────────►│  hw model    │
//! └──────▲───────┘              └──────▲───────┘          └──────┬───────┘
//!        │ callbacks                   │ dispatcher pass         │ irq
//!        │                      ┌──────┴───────┐                 │
//!        └──────────────────────│ gdma-worker  │◄── schedule ────┘
//!                               └──────────────┘
//! ```

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use log::{info, warn};

use gdma::sim::SimPlatform;
use gdma::{Device, DeviceResources, GdmaConfig, Worker};

mod bench;

/// Register window of the simulated device
const SIM_REG_BASE: usize = 0x1300_0000;
const SIM_REG_LEN: usize = 0x1000;
const SIM_IRQ: u32 = 42;

/// Daemon configuration
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    /// Transfers to run
    pub transfers: usize,
    /// Bytes per transfer
    pub transfer_size: usize,
    /// Descriptors linked per submit
    pub chain: usize,
    /// Time the hardware model takes per transfer
    pub hw_latency: Duration,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            transfers: 256,
            transfer_size: 64 * 1024,
            chain: 4,
            hw_latency: Duration::from_micros(20),
        }
    }
}

fn parse_config() -> DaemonConfig {
    let mut config = DaemonConfig::default();

    if let Some(n) = env_parse::<usize>("GDMAD_TRANSFERS") {
        config.transfers = n;
    }
    if let Some(n) = env_parse::<usize>("GDMAD_TRANSFER_SIZE") {
        config.transfer_size = n;
    }
    if let Some(n) = env_parse::<usize>("GDMAD_CHAIN") {
        config.chain = n.max(1);
    }
    if let Some(us) = env_parse::<u64>("GDMAD_HW_LATENCY_US") {
        config.hw_latency = Duration::from_micros(us);
    }

    config
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    let val = std::env::var(key).ok()?;
    match val.parse() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!("gdmad: ignoring {}={}", key, val);
            None
        }
    }
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    info!("gdmad: starting v{}", env!("CARGO_PKG_VERSION"));

    let gdma_config = GdmaConfig::from_env();
    let config = parse_config();
    info!("gdmad: {:?}", gdma_config);
    info!("gdmad: {:?}", config);

    let worker = Worker::spawn("gdma-worker", gdma_config.worker_queue_depth)
        .context("failed to spawn gdma worker")?;
    let platform = Arc::new(SimPlatform::new(Arc::new(worker)));

    let resources = DeviceResources {
        reg_base: SIM_REG_BASE,
        reg_len: SIM_REG_LEN,
        irq: SIM_IRQ,
    };
    let device = Device::create(Arc::clone(&platform), resources, &gdma_config)
        .context("failed to bring up gdma device")?;

    let results = bench::run(&platform, &device, &gdma_config, &config);
    device.destroy();

    let results = results?;
    results.print_report();

    if !results.in_order {
        bail!("completions arrived out of submission order");
    }
    if results.completed != results.submitted {
        bail!(
            "{} of {} transfers completed",
            results.completed,
            results.submitted
        );
    }

    info!("gdmad: self-test passed");
    Ok(())
}
