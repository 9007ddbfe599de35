//! Device and queue configuration.
//!
//! Plain typed structs with sane defaults. Parsing the external config
//! format is the caller's job; [`DeviceConfig::validate`] checks every
//! parameter before any register is touched.

use std::time::Duration;

use crate::error::ConfigError;
use crate::flow::{FdirConfig, FiveTupleFilter};
use crate::regs;
use crate::tx::TxPath;

// ═══════════════════════════════════════════════════════════════════════════
// LIMITS
// ═══════════════════════════════════════════════════════════════════════════

/// Smallest ring.
pub const MIN_RING_SIZE: u16 = 8;
/// Largest ring.
pub const MAX_RING_SIZE: u16 = 4096;
/// Ring sizes are multiples of this (xDLEN must be a multiple of 128 bytes).
pub const RING_SIZE_ALIGN: u16 = 8;
/// Smallest TX report-status batch.
pub const MIN_RS_THRESH: u16 = 4;

// ═══════════════════════════════════════════════════════════════════════════
// QUEUES
// ═══════════════════════════════════════════════════════════════════════════

/// Per RX queue parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RxQueueConfig {
    /// Descriptors.
    pub ring_size: u16,
    /// Packet buffer size in bytes (SRRCTL granularity: 1 KB).
    pub buf_size: u32,
    /// Drop when no descriptors are free instead of backing up the FIFO.
    pub drop_en: bool,
}

impl Default for RxQueueConfig {
    fn default() -> Self {
        Self {
            ring_size: 512,
            buf_size: 2048,
            drop_en: true,
        }
    }
}

/// Per TX queue parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxQueueConfig {
    /// Descriptors.
    pub ring_size: u16,
    /// Request a status write-back every `rs_thresh` descriptors.
    pub rs_thresh: u16,
    /// Reclaim when fewer than this many descriptors are free.
    pub free_thresh: u16,
    /// Send path, fixed for the queue's lifetime.
    pub path: TxPath,
    /// TXDCTL prefetch threshold.
    pub pthresh: u8,
    /// TXDCTL host threshold.
    pub hthresh: u8,
    /// TXDCTL write-back threshold.
    pub wthresh: u8,
}

impl Default for TxQueueConfig {
    fn default() -> Self {
        Self {
            ring_size: 512,
            rs_thresh: 32,
            free_thresh: 32,
            path: TxPath::Simple,
            pthresh: 32,
            hthresh: 1,
            wthresh: 0,
        }
    }
}

fn check_ring_size(n: u16) -> Result<(), ConfigError> {
    if !(MIN_RING_SIZE..=MAX_RING_SIZE).contains(&n) || n % RING_SIZE_ALIGN != 0 {
        return Err(ConfigError::RingSize(n));
    }
    Ok(())
}

impl RxQueueConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_ring_size(self.ring_size)?;
        if !(1024..=16384).contains(&self.buf_size) || self.buf_size % 1024 != 0 {
            return Err(ConfigError::BufferSize(self.buf_size));
        }
        Ok(())
    }
}

impl TxQueueConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_ring_size(self.ring_size)?;
        // A packet never spans more than one report-status boundary only if
        // the boundaries tile the ring exactly. One slot stays unposted, so a
        // single boundary at `cap - 1` would never be written.
        if self.rs_thresh < MIN_RS_THRESH
            || self.rs_thresh >= self.ring_size
            || self.ring_size % self.rs_thresh != 0
        {
            return Err(ConfigError::RsThresh {
                rs_thresh: self.rs_thresh,
                ring_size: self.ring_size,
            });
        }
        if self.free_thresh >= self.ring_size {
            return Err(ConfigError::FreeThresh {
                free_thresh: self.free_thresh,
                ring_size: self.ring_size,
            });
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// TIMEOUTS
// ═══════════════════════════════════════════════════════════════════════════

/// Bounded waits used during bring-up and teardown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timeouts {
    /// Delay between register polls.
    pub poll_delay: Duration,
    /// Polls for reset self-clear.
    pub reset_retries: u32,
    /// Polls for queue enable/disable read-back.
    pub queue_retries: u32,
    /// Polls for EEPROM auto-read, DMA init and SECRX ready.
    pub init_retries: u32,
    /// Polls for flow director init done.
    pub fdir_init_retries: u32,
    /// Polls for a flow director command to complete.
    pub fdir_cmd_retries: u32,
    /// Polls for link up.
    pub link_retries: u32,
    /// Wait for the stack to reach TxConfigured.
    pub handshake: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            poll_delay: Duration::from_millis(1),
            reset_retries: 10,
            queue_retries: 10,
            init_retries: 10,
            fdir_init_retries: 10,
            fdir_cmd_retries: 10,
            link_retries: 100,
            handshake: Duration::from_secs(5),
        }
    }
}

impl Timeouts {
    /// No delays; for simulated devices.
    pub fn immediate() -> Self {
        Self {
            poll_delay: Duration::ZERO,
            handshake: Duration::from_millis(200),
            ..Self::default()
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// FILTERS AND BINDINGS
// ═══════════════════════════════════════════════════════════════════════════

/// A steering rule installed at bring-up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterSpec {
    /// 5-tuple filter in slot `index`.
    FiveTuple { index: u8, filter: FiveTupleFilter },
    /// Flow director perfect match on the flex word.
    Fdir { signature: u16, queue: u16 },
}

/// Where a queue's worker runs and which vector wakes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueBinding {
    pub queue: u16,
    pub core: usize,
    pub vector: u32,
}

/// Cores named by an affinity mask, lowest first.
pub fn cores_in_mask(mask: u64) -> impl Iterator<Item = usize> {
    (0..64).filter(move |b| mask & (1u64 << b) != 0)
}

/// Bind `queues` queues to the set bits of `mask`, queue `i` on the `i`-th
/// set bit, vector `vector_base + i`.
pub fn bind_queues(
    mask: u64,
    queues: usize,
    vector_base: u32,
) -> Result<Vec<QueueBinding>, ConfigError> {
    let cores = mask.count_ones() as usize;
    if cores < queues {
        return Err(ConfigError::Affinity {
            mask,
            cores,
            queues,
        });
    }
    Ok(cores_in_mask(mask)
        .take(queues)
        .enumerate()
        .map(|(i, core)| QueueBinding {
            queue: i as u16,
            core,
            vector: vector_base + i as u32,
        })
        .collect())
}

// ═══════════════════════════════════════════════════════════════════════════
// DEVICE
// ═══════════════════════════════════════════════════════════════════════════

/// Everything bring-up needs.
#[derive(Debug, Clone)]
pub struct DeviceConfig {
    /// Device index, used for allocator partitions and log context.
    pub device: usize,
    /// RX queues (one worker each).
    pub rx_queues: usize,
    /// TX queues.
    pub tx_queues: usize,
    pub rx: RxQueueConfig,
    pub tx: TxQueueConfig,
    /// Cores for RX workers.
    pub rx_affinity: u64,
    /// Cores for TX generators.
    pub tx_affinity: u64,
    /// First MSI-X vector; queue `i` uses `vector_base + i`.
    pub vector_base: u32,
    /// Interrupt throttle interval in microseconds (0 = off).
    pub itr_us: u16,
    /// Packet buffer partitions (traffic classes): 1, 4 or 8.
    pub pb_partitions: u8,
    /// Accept all unicast and multicast.
    pub promiscuous: bool,
    /// Flow director; `None` leaves it off.
    pub fdir: Option<FdirConfig>,
    /// Steering rules.
    pub filters: Vec<FilterSpec>,
    pub timeouts: Timeouts,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            device: 0,
            rx_queues: 1,
            tx_queues: 1,
            rx: RxQueueConfig::default(),
            tx: TxQueueConfig::default(),
            rx_affinity: 0x1,
            tx_affinity: 0x1,
            vector_base: 0,
            itr_us: 40,
            pb_partitions: 1,
            promiscuous: false,
            fdir: None,
            filters: Vec::new(),
            timeouts: Timeouts::default(),
        }
    }
}

impl DeviceConfig {
    /// Check every parameter.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for n in [self.rx_queues, self.tx_queues] {
            if n == 0 || n > regs::MAX_QUEUES as usize {
                return Err(ConfigError::QueueCount(n));
            }
        }
        self.rx.validate()?;
        self.tx.validate()?;

        let last_vector = self.vector_base + self.rx_queues as u32 - 1;
        if last_vector >= regs::MAX_VECTORS {
            return Err(ConfigError::Vector(last_vector));
        }
        if !matches!(self.pb_partitions, 1 | 4 | 8) {
            return Err(ConfigError::PbPartitions(self.pb_partitions));
        }
        if let Some(fdir) = &self.fdir {
            fdir.validate()?;
        }
        self.rx_bindings()?;
        self.tx_bindings()?;
        Ok(())
    }

    /// Core and vector per RX queue.
    pub fn rx_bindings(&self) -> Result<Vec<QueueBinding>, ConfigError> {
        bind_queues(self.rx_affinity, self.rx_queues, self.vector_base)
    }

    /// Core per TX queue; TX queues have no vector of their own.
    pub fn tx_bindings(&self) -> Result<Vec<QueueBinding>, ConfigError> {
        bind_queues(self.tx_affinity, self.tx_queues, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        DeviceConfig::default().validate().unwrap();
    }

    #[test]
    fn test_ring_size_rules() {
        for bad in [0u16, 4, 12, 4104] {
            let cfg = RxQueueConfig {
                ring_size: bad,
                ..Default::default()
            };
            assert_eq!(cfg.validate(), Err(ConfigError::RingSize(bad)));
        }
        let cfg = TxQueueConfig {
            ring_size: 8,
            rs_thresh: 4,
            free_thresh: 4,
            ..Default::default()
        };
        cfg.validate().unwrap();
    }

    #[test]
    fn test_rs_thresh_must_tile_ring() {
        let cfg = TxQueueConfig {
            ring_size: 24,
            rs_thresh: 16,
            free_thresh: 4,
            ..Default::default()
        };
        assert!(matches!(cfg.validate(), Err(ConfigError::RsThresh { .. })));
    }

    #[test]
    fn test_rs_thresh_below_ring_size() {
        let cfg = TxQueueConfig {
            ring_size: 8,
            rs_thresh: 8,
            free_thresh: 4,
            ..Default::default()
        };
        assert_eq!(
            cfg.validate(),
            Err(ConfigError::RsThresh {
                rs_thresh: 8,
                ring_size: 8
            })
        );
        let cfg = TxQueueConfig {
            rs_thresh: 4,
            ..cfg
        };
        cfg.validate().unwrap();
    }

    #[test]
    fn test_bindings_follow_mask() {
        let b = bind_queues(0b1011_0000, 3, 2).unwrap();
        assert_eq!(
            b.iter().map(|b| (b.queue, b.core, b.vector)).collect::<Vec<_>>(),
            vec![(0, 4, 2), (1, 5, 3), (2, 7, 4)]
        );
        assert_eq!(
            bind_queues(0b1, 2, 0),
            Err(ConfigError::Affinity {
                mask: 1,
                cores: 1,
                queues: 2
            })
        );
    }

    #[test]
    fn test_vector_range() {
        let cfg = DeviceConfig {
            rx_queues: 4,
            rx_affinity: 0xF,
            vector_base: 62,
            ..Default::default()
        };
        assert_eq!(cfg.validate(), Err(ConfigError::Vector(65)));
    }
}
