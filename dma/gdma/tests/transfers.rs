use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use gdma::sim::{PlatformEvent, SimPlatform, Unmap};
use gdma::{
    Capabilities, Channel, Cookie, Descriptor, Device, DeviceResources, DmaStatus, Error, GdmaConfig,
    IrqReturn, IrqTarget, ManualExecutor, MapDirection, Resource, Status, TxFlags, MAX_TRANSFER_LEN,
};

const IRQ: u32 = 42;

struct Board {
    platform: Arc<SimPlatform>,
    executor: Arc<ManualExecutor>,
    device: Arc<Device<SimPlatform>>,
    channel: Arc<Channel<SimPlatform>>,
}

impl Board {
    fn new(config: GdmaConfig) -> Self {
        let executor = Arc::new(ManualExecutor::new());
        let platform = Arc::new(SimPlatform::new(executor.clone()));
        let resources = DeviceResources {
            reg_base: 0x1300_0000,
            reg_len: 0x1000,
            irq: IRQ,
        };
        let device = Device::create(platform.clone(), resources, &config).unwrap();
        let channel = device.request_channel().unwrap();
        Self {
            platform,
            executor,
            device,
            channel,
        }
    }

    /// Hardware finishes the running transfer, then deferred work runs
    fn complete(&self) {
        assert_eq!(
            self.platform.complete_transfer(IRQ, IrqTarget::Arm),
            IrqReturn::Handled
        );
        self.executor.run_pending();
    }

    fn busy_count(&self) -> usize {
        self.channel
            .queue_status()
            .iter()
            .filter(|(_, status)| *status == Status::Busy)
            .count()
    }
}

fn counter() -> (Arc<AtomicUsize>, impl Fn() -> Box<dyn FnOnce() + Send>) {
    let hits = Arc::new(AtomicUsize::new(0));
    let h = Arc::clone(&hits);
    (hits, move || {
        let h = Arc::clone(&h);
        let callback: Box<dyn FnOnce() + Send> = Box::new(move || {
            h.fetch_add(1, Ordering::SeqCst);
        });
        callback
    })
}

#[test]
fn test_happy_path() {
    let board = Board::new(GdmaConfig::default());
    let ch = &board.channel;
    let (hits, callback) = counter();

    let first = ch
        .prepare_copy(0x2000, 0x1000, 512, TxFlags::PREP_INTERRUPT)
        .unwrap()
        .with_callback(callback());
    let c1 = ch.submit(first).unwrap();
    let second = ch
        .prepare_copy(0x4000, 0x3000, 1024, TxFlags::PREP_INTERRUPT)
        .unwrap()
        .with_callback(callback());
    let c2 = ch.submit(second).unwrap();
    assert_eq!((c1.get(), c2.get()), (1, 2));
    assert_eq!(ch.tx_status(c1), DmaStatus::InProgress);

    ch.issue_pending();
    let regs = board.platform.registers();
    assert!(regs.is_running());
    assert_eq!(regs.transfers().len(), 1);
    assert_eq!(regs.transfers()[0].src, 0x1000);
    assert_eq!(regs.transfers()[0].dst, 0x2000);
    assert_eq!(regs.transfers()[0].size, 512);

    board.complete();
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert_eq!(ch.tx_status(c1), DmaStatus::Complete);
    assert_eq!(ch.tx_status(c2), DmaStatus::InProgress);
    assert_eq!(regs.transfers().len(), 2);
    assert_eq!(regs.transfers()[1].src, 0x3000);
    assert_eq!(regs.transfers()[1].size, 1024);

    board.complete();
    assert_eq!(hits.load(Ordering::SeqCst), 2);
    assert_eq!(ch.tx_status(c1), DmaStatus::Complete);
    assert_eq!(ch.tx_status(c2), DmaStatus::Complete);
    assert_eq!(ch.queued(), 0);
    assert!(!regs.is_running());

    assert_eq!(
        board.platform.unmaps(),
        vec![
            Unmap {
                addr: 0x1000,
                len: 512,
                direction: MapDirection::Source
            },
            Unmap {
                addr: 0x2000,
                len: 512,
                direction: MapDirection::Destination
            },
            Unmap {
                addr: 0x3000,
                len: 1024,
                direction: MapDirection::Source
            },
            Unmap {
                addr: 0x4000,
                len: 1024,
                direction: MapDirection::Destination
            },
        ]
    );

    let stats = ch.stats();
    assert_eq!(stats.started, 2);
    assert_eq!(stats.completed, 2);
    assert_eq!(stats.bytes_started, 1536);
    assert_eq!(stats.outstanding(), 0);
}

#[test]
fn test_unknown_cookie_is_error() {
    let board = Board::new(GdmaConfig::default());
    let ch = &board.channel;
    let cookie = Cookie::new(5).unwrap();
    assert_eq!(ch.tx_status(cookie), DmaStatus::Error);

    ch.submit(ch.prepare_copy(0x2000, 0x1000, 16, TxFlags::empty()).unwrap()).unwrap();
    assert_eq!(ch.tx_status(cookie), DmaStatus::Error);
}

#[test]
fn test_oversized_request() {
    let board = Board::new(GdmaConfig::default());
    let ch = &board.channel;

    let err = ch
        .prepare_copy(0x2000, 0x1000, MAX_TRANSFER_LEN + 1, TxFlags::empty())
        .unwrap_err();
    assert_eq!(err, Error::UnsupportedLength);
    assert_eq!(ch.queued(), 0);
    assert_eq!(ch.last_issued(), None);
    assert_eq!(ch.stats().submitted, 0);
}

#[test]
fn test_fill_not_supported() {
    let board = Board::new(GdmaConfig::default());
    let err = board
        .channel
        .prepare_fill(0x2000, 0x5A5A, 256, TxFlags::empty())
        .unwrap_err();
    assert_eq!(err, Error::NotSupported);
    assert_eq!(board.channel.queued(), 0);
}

#[test]
fn test_busy_retry() {
    let board = Board::new(GdmaConfig::default());
    let ch = &board.channel;
    let regs = board.platform.registers();

    let cookie = ch.submit(ch.prepare_copy(0x2000, 0x1000, 64, TxFlags::empty()).unwrap()).unwrap();
    regs.force_busy(true);
    ch.issue_pending();

    assert_eq!(ch.queue_status(), vec![(Some(cookie), Status::Prepared)]);
    assert!(regs.transfers().is_empty());
    assert_eq!(ch.stats().busy_retries, 1);
    assert_eq!(ch.tx_status(cookie), DmaStatus::InProgress);

    regs.force_busy(false);
    ch.issue_pending();
    assert_eq!(ch.queue_status(), vec![(Some(cookie), Status::Busy)]);
    assert_eq!(regs.transfers().len(), 1);

    board.complete();
    assert_eq!(ch.tx_status(cookie), DmaStatus::Complete);
}

#[test]
fn test_invalid_config_does_not_stall_queue() {
    let config = GdmaConfig {
        capabilities: Capabilities::MEMCPY | Capabilities::FILL,
        ..GdmaConfig::default()
    };
    let board = Board::new(config);
    let ch = &board.channel;
    let (hits, callback) = counter();

    let fill = ch
        .prepare_fill(0x8000, 0xFFFF_0000, 128, TxFlags::PREP_INTERRUPT)
        .unwrap()
        .with_callback(callback());
    let fill_cookie = ch.submit(fill).unwrap();
    let copy_cookie = ch.submit(ch.prepare_copy(0x2000, 0x1000, 64, TxFlags::empty()).unwrap()).unwrap();

    ch.issue_pending();
    assert_eq!(
        ch.queue_status(),
        vec![
            (Some(fill_cookie), Status::Done),
            (Some(copy_cookie), Status::Prepared),
        ]
    );
    // the follow-up pass is already queued
    assert_eq!(board.executor.pending(), 1);

    board.executor.run_pending();
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert_eq!(ch.tx_status(fill_cookie), DmaStatus::Complete);
    assert_eq!(ch.queue_status(), vec![(Some(copy_cookie), Status::Busy)]);

    let regs = board.platform.registers();
    assert_eq!(regs.transfers().len(), 1);
    assert_eq!(regs.transfers()[0].src, 0x1000);
    assert_eq!(ch.stats().rejected, 1);
    assert_eq!(
        board.platform.unmaps()[0],
        Unmap {
            addr: 0x8000,
            len: 128,
            direction: MapDirection::Destination
        }
    );
}

#[test]
fn test_fifo_completion_order() {
    let board = Board::new(GdmaConfig::default());
    let ch = &board.channel;
    let order = Arc::new(Mutex::new(Vec::new()));

    let mut descs: Vec<Descriptor> = (0..6u32)
        .map(|i| {
            let order = Arc::clone(&order);
            ch.prepare_copy(0x10_0000 + i * 0x1000, 0x1000 + i * 0x100, 256, TxFlags::PREP_INTERRUPT)
                .unwrap()
                .with_callback(move || order.lock().push(i))
        })
        .collect();

    // first three chained into one submit, the rest submitted alone
    let rest = descs.split_off(3);
    let mut links = descs.into_iter();
    let head = links.next().unwrap();
    assert_eq!(ch.submit(links.fold(head, Descriptor::then)).unwrap().get(), 3);
    for desc in rest {
        ch.submit(desc).unwrap();
    }

    ch.issue_pending();
    for _ in 0..6 {
        board.complete();
    }

    assert_eq!(*order.lock(), vec![0, 1, 2, 3, 4, 5]);
    let starts: Vec<u32> = board
        .platform
        .registers()
        .transfers()
        .iter()
        .map(|t| t.src)
        .collect();
    assert_eq!(starts, vec![0x1000, 0x1100, 0x1200, 0x1300, 0x1400, 0x1500]);
}

#[test]
fn test_idempotent_reap() {
    let board = Board::new(GdmaConfig::default());
    let ch = &board.channel;
    let (hits, callback) = counter();

    let desc = ch
        .prepare_copy(0x2000, 0x1000, 64, TxFlags::PREP_INTERRUPT)
        .unwrap()
        .with_callback(callback());
    let cookie = ch.submit(desc).unwrap();
    ch.issue_pending();
    board.complete();

    let completed = ch.last_completed();
    assert_eq!(completed, Some(cookie));
    ch.issue_pending();
    ch.issue_pending();

    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert_eq!(ch.last_completed(), completed);
    assert_eq!(ch.stats().completed, 1);
}

#[test]
fn test_irq_after_terminate_all() {
    let board = Board::new(GdmaConfig::default());
    let ch = &board.channel;
    let (hits, callback) = counter();

    for i in 0..3u32 {
        let desc = ch
            .prepare_copy(0x2000 + i * 0x100, 0x1000, 64, TxFlags::PREP_INTERRUPT)
            .unwrap()
            .with_callback(callback());
        ch.submit(desc).unwrap();
    }
    ch.issue_pending();
    ch.terminate_all();
    assert_eq!(hits.load(Ordering::SeqCst), 3);
    assert_eq!(ch.queued(), 0);

    // the transfer started before termination still finishes
    board.complete();

    assert_eq!(hits.load(Ordering::SeqCst), 3);
    assert_eq!(ch.stats().spurious_irqs, 1);
    assert_eq!(ch.tx_status(Cookie::new(3).unwrap()), DmaStatus::Complete);
    assert_eq!(board.platform.registers().transfers().len(), 1);

    // the channel keeps working afterwards
    let cookie = ch.submit(ch.prepare_copy(0x9000, 0x8000, 64, TxFlags::empty()).unwrap()).unwrap();
    ch.issue_pending();
    board.complete();
    assert_eq!(ch.tx_status(cookie), DmaStatus::Complete);
}

#[test]
fn test_at_most_one_busy() {
    let board = Board::new(GdmaConfig::default());
    let ch = &board.channel;

    for round in 0..4u32 {
        for i in 0..3u32 {
            let src = 0x1000 + (round * 3 + i) * 0x40;
            ch.submit(ch.prepare_copy(src + 0x10_0000, src, 64, TxFlags::empty()).unwrap()).unwrap();
            ch.issue_pending();
            assert!(board.busy_count() <= 1);
        }
        board.complete();
        assert!(board.busy_count() <= 1);
    }

    while ch.queued() > 0 {
        board.complete();
        assert!(board.busy_count() <= 1);
    }
    assert_eq!(board.platform.registers().transfers().len(), 12);
}

#[test]
fn test_callback_resubmits() {
    let board = Board::new(GdmaConfig::default());
    let ch = Arc::clone(&board.channel);
    let (hits, callback) = counter();

    let follow_up = ch
        .prepare_copy(0x6000, 0x5000, 32, TxFlags::PREP_INTERRUPT)
        .unwrap()
        .with_callback(callback());
    let inner = Arc::clone(&ch);
    let first = ch
        .prepare_copy(0x2000, 0x1000, 32, TxFlags::PREP_INTERRUPT)
        .unwrap()
        .with_callback(move || {
            inner.submit(follow_up).unwrap();
            inner.issue_pending();
        });

    ch.submit(first).unwrap();
    ch.issue_pending();
    board.complete();

    // the follow-up was started by the same dispatcher run
    let regs = board.platform.registers();
    assert_eq!(regs.transfers().len(), 2);
    assert_eq!(regs.transfers()[1].src, 0x5000);
    assert_eq!(board.busy_count(), 1);

    board.complete();
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert_eq!(ch.queued(), 0);
}

#[test]
fn test_skip_unmap_flags() {
    let board = Board::new(GdmaConfig::default());
    let ch = &board.channel;

    let skip_src = ch
        .prepare_copy(0x2000, 0x1000, 64, TxFlags::SKIP_SRC_UNMAP)
        .unwrap();
    let skip_both = ch
        .prepare_copy(
            0x4000,
            0x3000,
            64,
            TxFlags::SKIP_SRC_UNMAP | TxFlags::SKIP_DEST_UNMAP,
        )
        .unwrap();
    ch.submit(skip_src).unwrap();
    ch.submit(skip_both).unwrap();
    ch.issue_pending();
    board.complete();
    board.complete();

    assert_eq!(
        board.platform.unmaps(),
        vec![Unmap {
            addr: 0x2000,
            len: 64,
            direction: MapDirection::Destination
        }]
    );
}

#[test]
fn test_destroy_with_transfer_in_flight() {
    let board = Board::new(GdmaConfig::default());
    let ch = &board.channel;
    let (hits, callback) = counter();

    let desc = ch
        .prepare_copy(0x2000, 0x1000, 64, TxFlags::PREP_INTERRUPT)
        .unwrap()
        .with_callback(callback());
    ch.submit(desc).unwrap();
    ch.issue_pending();

    board.device.destroy();
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert!(!ch.is_allocated());

    // handler is gone; the completion lands nowhere
    assert_eq!(
        board.platform.complete_transfer(IRQ, IrqTarget::Arm),
        IrqReturn::None
    );
}

#[test]
fn test_nothing_programmed_after_destroy() {
    let board = Board::new(GdmaConfig::default());
    let ch = &board.channel;
    board.device.destroy();
    assert_eq!(
        board.platform.events().last(),
        Some(&PlatformEvent::UnmapRegisters)
    );

    let desc = ch.prepare_copy(0x2000, 0x1000, 64, TxFlags::empty()).unwrap();
    assert_eq!(
        ch.submit(desc),
        Err(Error::ResourceUnavailable(Resource::Channel))
    );
    ch.issue_pending();

    assert_eq!(
        ch.alloc_resources(),
        Err(Error::ResourceUnavailable(Resource::Channel))
    );
    assert_eq!(ch.queued(), 0);
    assert!(board.platform.registers().transfers().is_empty());
    assert!(!board.platform.registers().is_running());
}
