//! Driver error types.
//!
//! Errors fall in four classes, and the variant tells which:
//!
//! - **Fatal** (`ResetTimeout`, `InitTimeout`, `QueueEnableTimeout`,
//!   `FdirInitTimeout`, `HandshakeTimeout`, `Alloc` during ring setup): the
//!   device cannot be armed. Bring-up returns the error and the device is
//!   dropped.
//! - **Soft**: not represented here. Reclaim reports "nothing yet" through
//!   [`Reclaim::Busy`](crate::tx::Reclaim) and send paths return how much
//!   they accepted.
//! - **Logged**: disable timeouts, unknown verdicts, link down. Logged and
//!   never surfaced.
//! - **Invariant**: a design invariant was breached. Debug builds assert;
//!   release builds surface [`Error::Invariant`].

use dma_pool::DmaError;

use crate::ring::QueueState;

/// Result alias for the driver.
pub type Result<T> = core::result::Result<T, Error>;

/// Driver errors.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Device reset did not self-clear.
    #[error("device {device}: reset did not complete")]
    ResetTimeout { device: usize },

    /// A hardware init step (EEPROM auto-read, DMA init, security path)
    /// never reported done.
    #[error("device {device}: {step} did not complete")]
    InitTimeout { device: usize, step: &'static str },

    /// Queue enable bit never read back as set.
    #[error("device {device}: {dir} queue {queue} did not enable")]
    QueueEnableTimeout {
        device: usize,
        dir: Direction,
        queue: u16,
    },

    /// Flow director never reported init done.
    #[error("device {device}: flow director init did not complete")]
    FdirInitTimeout { device: usize },

    /// Flow director add command never completed.
    #[error("device {device}: flow director command stuck (FDIRCMD {fdircmd:#x})")]
    FdirCommandTimeout { device: usize, fdircmd: u32 },

    /// Upper stack never reported readiness.
    #[error("device {device}: peer did not reach {wanted:?}")]
    HandshakeTimeout {
        device: usize,
        wanted: crate::stack::StackState,
    },

    /// Allocator refused a chunk.
    #[error("allocation failed: {0}")]
    Alloc(#[from] DmaError),

    /// Descriptor chunk too small or misaligned.
    #[error("descriptor table needs {needed} bytes, chunk has {provided}")]
    DescTableLayout { needed: usize, provided: usize },

    /// Operation needs an enabled queue.
    #[error("{dir} queue {queue} is {state:?}")]
    QueueNotEnabled {
        dir: Direction,
        queue: u16,
        state: QueueState,
    },

    /// Send entry point does not match the queue's configured path.
    #[error("tx queue {queue}: configured for the {configured:?} path")]
    WrongTxPath {
        queue: u16,
        configured: crate::tx::TxPath,
    },

    /// Simple path takes only single-segment, unchained packets without
    /// offload requests.
    #[error("tx queue {queue}: packet needs the full send path")]
    NeedsFullPath { queue: u16 },

    /// Packet can never fit the ring (too many segments or fragments).
    #[error("packet needs {needed} descriptors, ring admits {max}")]
    PacketTooLarge { needed: usize, max: usize },

    /// A filter collides with one already installed.
    #[error("filter conflict: {0}")]
    FilterConflict(&'static str),

    /// Filter parameters out of range.
    #[error("invalid filter: {0}")]
    InvalidFilter(&'static str),

    /// Configuration rejected.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A design invariant was breached.
    #[error("invariant violated: {0}")]
    Invariant(&'static str),

    /// Worker thread could not be spawned.
    #[error("worker spawn failed: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("queue count {0} outside 1..=64")]
    QueueCount(usize),
    #[error("ring size {0} must be a multiple of 8 in 8..=4096")]
    RingSize(u16),
    #[error("rs_thresh {rs_thresh} must be >= 4, below ring size {ring_size} and divide it")]
    RsThresh { rs_thresh: u16, ring_size: u16 },
    #[error("free_thresh {free_thresh} must be below ring size {ring_size}")]
    FreeThresh { free_thresh: u16, ring_size: u16 },
    #[error("buffer size {0} must be a multiple of 1024 in 1024..=16384")]
    BufferSize(u32),
    #[error("affinity mask {mask:#x} has {cores} cores for {queues} queues")]
    Affinity { mask: u64, cores: usize, queues: usize },
    #[error("flex byte offset {0} must be even and <= 62")]
    FlexOffset(u8),
    #[error("interrupt vector {0} out of range")]
    Vector(u32),
    #[error("packet buffer partitions {0} must be 1, 4 or 8")]
    PbPartitions(u8),
}

/// Queue direction, for messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Rx,
    Tx,
}

impl core::fmt::Display for Direction {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Rx => f.write_str("rx"),
            Self::Tx => f.write_str("tx"),
        }
    }
}

impl Error {
    /// True for errors after which the device must not be used.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::ResetTimeout { .. }
                | Self::InitTimeout { .. }
                | Self::QueueEnableTimeout { .. }
                | Self::FdirInitTimeout { .. }
                | Self::FdirCommandTimeout { .. }
                | Self::HandshakeTimeout { .. }
                | Self::Alloc(_)
                | Self::DescTableLayout { .. }
                | Self::Invariant(_)
        )
    }
}
