//! Intel 82599-class 10GbE data plane.
//!
//! Brings a device from reset to a multi-queue, interrupt-driven state and
//! moves packets between hardware descriptor rings and an upper network
//! stack without copying.
//!
//! ```text
//!   Device::bring_up ─┬─ reset, capabilities, packet buffer split
//!                     ├─ FlowSteering (5-tuple, flow director)
//!                     ├─ TxRing x N ── handshake ── RxRing x M
//!                     └─ IVAR / MSI-X / link
//!   Device::split ──► worker::spawn_rx_workers (one pinned thread per queue)
//!                 ──► worker::spawn_tx_generators, or TxRing::transmit inline
//! ```
//!
//! Memory comes from a [`dma_pool::DmaAllocator`]; registers are reached
//! through [`RegisterIo`]; packets go up through [`UpperStack`].

pub mod config;
pub mod desc;
pub mod device;
pub mod error;
pub mod flow;
pub mod mbuf;
pub mod mmio;
pub mod regs;
pub mod ring;
pub mod rx;
pub mod stack;
pub mod tx;
pub mod worker;

#[cfg(any(test, feature = "sim"))]
pub mod sim;

pub use config::{DeviceConfig, FilterSpec, QueueBinding, RxQueueConfig, Timeouts, TxQueueConfig};
pub use device::{Device, DeviceStats, LinkSpeed, LinkStatus};
pub use error::{ConfigError, Direction, Error, Result};
pub use flow::{FdirConfig, FdirFilter, FilterProto, FiveTupleFilter, FlowSteering};
pub use mbuf::{ChecksumOffload, L4Proto, PacketBuf, Segment, SegmentOwner, SharedRef};
pub use mmio::{Mmio, RegisterIo};
pub use ring::{QueueState, RingCtx, RxRing, TxRing};
pub use rx::RxStats;
pub use stack::{Handshake, Readiness, RxVerdict, StackState, UpperStack};
pub use tx::{Reclaim, TxPath, TxStats};
pub use worker::{IrqWait, PollMode, RxWorker, TxSource, TxWorker, WorkerOptions};
