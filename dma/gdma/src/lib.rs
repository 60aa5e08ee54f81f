//! GDMA descriptor engine
//!
//! Driver for a general-purpose DMA engine that runs one memory-to-memory
//! transfer at a time. Clients queue descriptors on a [`Channel`], receive a
//! [`Cookie`] per descriptor, and learn about completion through callbacks
//! or by polling [`Channel::tx_status`].
//!
//! ```text
//!  client                        deferred context               irq context
//!  ──────                        ────────────────               ───────────
//!  prepare_copy ─► Descriptor
//!  submit ───────► queue (cookie N, Prepared)
//!  issue_pending ─────────────►  dispatcher pass
//!                                 reap Done  ─► callbacks
//!                                 start next ─► STAT.START
//!                                        ▲                      completion
//!                                        │                          │
//!                                        └── schedule ◄── Busy → Done, ack STAT
//! ```
//!
//! Hardware access and the board services (register mapping, interrupt
//! lines, buffer unmapping, deferred work) are reached through the
//! [`Platform`] trait. [`sim`] provides a software board used by the tests
//! and the `gdmad` self-test daemon.

pub mod channel;
pub mod config;
pub mod cookie;
pub mod descriptor;
pub mod device;
mod dispatch;
pub mod engine;
pub mod error;
pub mod executor;
pub mod irq;
pub mod regs;
pub mod sim;
pub mod stats;

pub use self::channel::{Channel, ControlCommand};
pub use self::config::{Capabilities, GdmaConfig};
pub use self::cookie::{Cookie, DmaStatus};
pub use self::descriptor::{Callback, Descriptor, Request, Status, TransferKind, TxFlags};
pub use self::device::{Device, DeviceResources, IrqHandler, MapDirection, Platform};
pub use self::engine::Engine;
pub use self::error::{Error, Resource, Result};
pub use self::executor::{Deferred, Executor, ManualExecutor, Worker};
pub use self::irq::IrqReturn;
pub use self::regs::{Burst, DmaAddr, IrqTarget, Mmio, RegisterIo, Stat, MAX_TRANSFER_LEN};
pub use self::stats::StatsSnapshot;
