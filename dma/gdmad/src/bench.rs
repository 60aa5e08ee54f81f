//! Copy-transfer workload against the simulated board

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context};
use log::{debug, info};

use gdma::sim::SimPlatform;
use gdma::{Channel, Descriptor, Device, GdmaConfig, StatsSnapshot, TxFlags};

use crate::DaemonConfig;

const SRC_BASE: u32 = 0x4000_0000;
const DST_BASE: u32 = 0x8000_0000;

/// Workload results
#[derive(Debug, Clone)]
pub struct BenchResults {
    pub submitted: usize,
    pub completed: usize,
    /// Callbacks fired in cookie order
    pub in_order: bool,
    pub elapsed: Duration,
    pub stats: StatsSnapshot,
}

impl BenchResults {
    pub fn throughput_mbps(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.stats.bytes_started as f64 / secs / 1_000_000.0
        } else {
            0.0
        }
    }

    pub fn print_report(&self) {
        println!("=== GDMA self-test ===");
        println!("transfers:     {}/{}", self.completed, self.submitted);
        println!("in order:      {}", self.in_order);
        println!("elapsed:       {:?}", self.elapsed);
        println!("throughput:    {:.2} MB/s", self.throughput_mbps());
        println!("started:       {}", self.stats.started);
        println!("bytes:         {}", self.stats.bytes_started);
        println!("busy retries:  {}", self.stats.busy_retries);
        println!("rejected:      {}", self.stats.rejected);
        println!("spurious irqs: {}", self.stats.spurious_irqs);
    }
}

/// Hardware model: completes whatever is running after `latency`
fn spawn_hw_model(
    platform: Arc<SimPlatform>,
    irq: u32,
    gdma_config: &GdmaConfig,
    latency: Duration,
    stop: Arc<AtomicBool>,
) -> anyhow::Result<thread::JoinHandle<()>> {
    let target = gdma_config.irq_target;
    thread::Builder::new()
        .name("gdma-hw".to_string())
        .spawn(move || {
            let regs = platform.registers();
            while !stop.load(Ordering::Acquire) {
                if regs.is_running() {
                    thread::sleep(latency);
                    platform.complete_transfer(irq, target);
                } else {
                    thread::yield_now();
                }
            }
        })
        .context("failed to spawn hardware model")
}

fn build_chain(
    channel: &Channel<SimPlatform>,
    first: usize,
    count: usize,
    size: usize,
    tx: &mpsc::Sender<usize>,
) -> anyhow::Result<Descriptor> {
    let stride = u32::try_from(size).context("transfer size exceeds address space")?;

    let mut links = (first..first + count).map(|i| {
        let offset = stride.wrapping_mul(i as u32);
        let tx = tx.clone();
        channel
            .prepare_copy(
                DST_BASE.wrapping_add(offset),
                SRC_BASE.wrapping_add(offset),
                size,
                TxFlags::PREP_INTERRUPT,
            )
            .map(|desc| {
                desc.with_callback(move || {
                    let _ = tx.send(i);
                })
            })
    });

    let mut head = links
        .next()
        .ok_or_else(|| anyhow!("empty chain"))?
        .context("prepare_copy failed")?;
    for desc in links {
        head.chain(desc.context("prepare_copy failed")?);
    }
    Ok(head)
}

/// Run the workload described by `config` on `device`
pub fn run(
    platform: &Arc<SimPlatform>,
    device: &Device<SimPlatform>,
    gdma_config: &GdmaConfig,
    config: &DaemonConfig,
) -> anyhow::Result<BenchResults> {
    let channel = device
        .request_channel()
        .context("no free gdma channel")?;

    let stop = Arc::new(AtomicBool::new(false));
    let hw = spawn_hw_model(
        Arc::clone(platform),
        device.resources().irq,
        gdma_config,
        config.hw_latency,
        Arc::clone(&stop),
    )?;

    let (tx, rx) = mpsc::channel();
    let start = Instant::now();

    let mut submitted = 0;
    while submitted < config.transfers {
        let count = config.chain.min(config.transfers - submitted);
        let desc = build_chain(&channel, submitted, count, config.transfer_size, &tx)?;
        let cookie = channel.submit(desc).context("submit failed")?;
        debug!("gdmad: submitted {} up to cookie {}", count, cookie);
        channel.issue_pending();
        submitted += count;
    }
    drop(tx);

    let deadline = config.hw_latency * config.transfers as u32 + Duration::from_secs(10);
    let mut order = Vec::with_capacity(submitted);
    while order.len() < submitted {
        let remaining = deadline.saturating_sub(start.elapsed());
        match rx.recv_timeout(remaining) {
            Ok(i) => order.push(i),
            Err(err) => {
                info!("gdmad: stopped waiting after {} completions: {}", order.len(), err);
                break;
            }
        }
    }
    let elapsed = start.elapsed();

    stop.store(true, Ordering::Release);
    if hw.join().is_err() {
        return Err(anyhow!("hardware model panicked"));
    }
    device.release_channel(&channel);

    Ok(BenchResults {
        submitted,
        completed: order.len(),
        in_order: order.iter().enumerate().all(|(n, &i)| n == i),
        elapsed,
        stats: channel.stats(),
    })
}
