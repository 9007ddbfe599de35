//! Ring manager: per-queue DMA ring lifecycle.
//!
//! A ring is created once at bring-up, configured, and torn down when the
//! device goes away. It is never resized.
//!
//! # Queue state machine
//! ```text
//!   Unconfigured ──> Disabling ──> Disabled ──> Configuring ──> Enabled
//!                        ▲                                         │
//!                        └──────────────── disable() ──────────────┘
//! ```
//! Only `Enabled` admits traffic. An enable that never reads back is fatal;
//! a disable that never reads back is logged and ignored.

pub mod rx;
pub mod tx;

pub use rx::RxRing;
pub use tx::{TxEntry, TxRing};

use std::sync::Arc;

use dma_pool::{BufferKind, DmaAllocator};

use crate::config::Timeouts;
use crate::desc::{DescTable, Descriptor, DESC_SIZE};
use crate::error::{Direction, Error, Result};
use crate::mmio::RegisterIo;

/// Per-queue lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueueState {
    #[default]
    Unconfigured,
    Disabling,
    Disabled,
    Configuring,
    Enabled,
}

/// What a ring needs to reach its device and allocator.
#[derive(Clone)]
pub struct RingCtx {
    pub io: Arc<dyn RegisterIo>,
    pub alloc: Arc<dyn DmaAllocator>,
    pub device: usize,
    pub timeouts: Timeouts,
}

impl core::fmt::Debug for RingCtx {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RingCtx")
            .field("device", &self.device)
            .field("timeouts", &self.timeouts)
            .finish_non_exhaustive()
    }
}

/// Clear a queue's enable bit and wait for it to drop.
///
/// Never fails: a queue that does not stop is logged and left alone.
pub(crate) fn disable_queue(ctx: &RingCtx, dir: Direction, queue: u16, ctl: u32, enable: u32) {
    ctx.io.clear_bits(ctl, enable);
    let t = &ctx.timeouts;
    if !ctx.io.poll_clear(ctl, enable, t.queue_retries, t.poll_delay) {
        log::warn!(
            "[ixgbe dev{} {}q{}] queue did not disable, continuing",
            ctx.device,
            dir,
            queue
        );
    }
}

/// Set a queue's enable bit and wait for it to read back.
pub(crate) fn enable_queue(
    ctx: &RingCtx,
    dir: Direction,
    queue: u16,
    ctl: u32,
    enable: u32,
) -> Result<()> {
    ctx.io.set_bits(ctl, enable);
    let t = &ctx.timeouts;
    if !ctx.io.poll_set(ctl, enable, t.queue_retries, t.poll_delay) {
        log::error!(
            "[ixgbe dev{} {}q{}] queue enable timed out",
            ctx.device,
            dir,
            queue
        );
        return Err(Error::QueueEnableTimeout {
            device: ctx.device,
            dir,
            queue,
        });
    }
    Ok(())
}

/// Allocate and lay out a descriptor table.
pub(crate) fn alloc_table<D: Descriptor>(
    ctx: &RingCtx,
    core: usize,
    len: u16,
) -> Result<DescTable<D>> {
    let chunk = ctx.alloc.alloc(BufferKind::DescRing, ctx.device, core)?;
    // SAFETY: the chunk was just allocated and is owned by the table.
    match unsafe { DescTable::new(chunk, len) } {
        Ok(t) => Ok(t),
        Err(e) => {
            free_table_chunk(ctx, chunk.virt());
            Err(e)
        }
    }
}

pub(crate) fn free_table<D: Descriptor>(ctx: &RingCtx, table: &DescTable<D>) {
    free_table_chunk(ctx, table.chunk().virt());
}

fn free_table_chunk(ctx: &RingCtx, virt: core::ptr::NonNull<u8>) {
    if let Err(e) = ctx.alloc.free(virt, BufferKind::DescRing, ctx.device) {
        log::error!("[ixgbe dev{}] descriptor ring free failed: {}", ctx.device, e);
    }
}

/// Program a ring's base and length registers.
pub(crate) fn program_base<D: Descriptor>(
    io: &dyn RegisterIo,
    table: &DescTable<D>,
    bal: u32,
    bah: u32,
    len: u32,
) {
    debug_assert_eq!(table.byte_len() as usize, table.len() as usize * DESC_SIZE);
    io.write32(bal, table.phys() as u32);
    io.write32(bah, (table.phys() >> 32) as u32);
    io.write32(len, table.byte_len());
}


#[cfg(test)]
mod tests {
    use super::testutil::{rx_cfg, tx_cfg, Rig, BINDING};
    use super::*;
    use crate::error::ConfigError;
    use crate::regs;
    use crate::sim::SimFaults;
    use crate::tx::TxPath;

    #[test]
    fn test_rx_configure_programs_queue() {
        let rig = Rig::new();
        let ring = RxRing::configure(rig.ctx(), &rx_cfg(), BINDING).unwrap();

        assert_eq!(ring.state(), QueueState::Enabled);
        assert_eq!(rig.sim.reg(regs::rdlen(0)), 8 * 16);
        assert_eq!(rig.sim.reg(regs::rdt(0)), 7);
        assert_ne!(rig.sim.reg(regs::rxdctl(0)) & regs::RXDCTL_ENABLE, 0);
        let srrctl = rig.sim.reg(regs::srrctl(0));
        assert_eq!(srrctl & regs::SRRCTL_BSIZEPKT_MASK, 2);
        assert_ne!(srrctl & regs::SRRCTL_DROP_EN, 0);
        // 8 slots + 1 spare.
        assert_eq!(rig.packets_free(), 64 - 9);
        ring.check_bound().unwrap();
    }

    #[test]
    fn test_rx_drop_returns_everything() {
        let rig = Rig::new();
        let ring = RxRing::configure(rig.ctx(), &rx_cfg(), BINDING).unwrap();
        drop(ring);
        assert_eq!(rig.packets_free(), 64);
        assert_eq!(rig.tables_free(), 4);
        assert_eq!(rig.sim.reg(regs::rxdctl(0)) & regs::RXDCTL_ENABLE, 0);
    }

    #[test]
    fn test_enable_timeout_is_fatal_and_frees() {
        let rig = Rig::with_faults(SimFaults {
            refuse_enable: Some((Direction::Rx, 0)),
            ..Default::default()
        });
        let err = RxRing::configure(rig.ctx(), &rx_cfg(), BINDING).unwrap_err();
        assert!(matches!(err, Error::QueueEnableTimeout { queue: 0, .. }));
        assert!(err.is_fatal());
        assert_eq!(rig.packets_free(), 64);
        assert_eq!(rig.tables_free(), 4);
    }

    #[test]
    fn test_stuck_disable_is_not_fatal() {
        let rig = Rig::with_faults(SimFaults {
            stuck_disable: true,
            ..Default::default()
        });
        let mut ring = TxRing::configure(rig.ctx(), &tx_cfg(TxPath::Simple), 0, 0).unwrap();
        ring.disable();
        assert_eq!(ring.state(), QueueState::Disabled);
        assert_ne!(rig.sim.reg(regs::txdctl(0)) & regs::TXDCTL_ENABLE, 0);
    }

    #[test]
    fn test_rx_allocation_failure_is_fatal() {
        let rig = Rig::with_packets(4);
        let err = RxRing::configure(rig.ctx(), &rx_cfg(), BINDING).unwrap_err();
        assert!(matches!(err, Error::Alloc(_)));
        assert_eq!(rig.packets_free(), 4);
        assert_eq!(rig.tables_free(), 4);
    }

    #[test]
    fn test_tx_configure_initial_accounting() {
        let rig = Rig::new();
        let ring = TxRing::configure(rig.ctx(), &tx_cfg(TxPath::Simple), 0, 0).unwrap();
        assert_eq!(ring.free_count(), 7);
        assert_eq!(ring.used_count(), 0);
        assert_eq!(ring.last_cleaned(), 7);
        ring.check_accounting().unwrap();
        let txdctl = rig.sim.reg(regs::txdctl(0));
        assert_eq!(txdctl & 0x7F, 32);
        assert_eq!(rig.sim.reg(regs::tdlen(0)), 128);
    }

    #[test]
    fn test_bad_ring_config_rejected() {
        let rig = Rig::new();
        let mut cfg = tx_cfg(TxPath::Simple);
        cfg.rs_thresh = 3;
        let err = TxRing::configure(rig.ctx(), &cfg, 0, 0).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert_eq!(rig.tables_free(), 4);
    }

    #[test]
    fn test_single_rs_boundary_rejected() {
        // With rs_thresh == capacity the only boundary is the reserved slot.
        let rig = Rig::new();
        let mut cfg = tx_cfg(TxPath::Full);
        cfg.rs_thresh = cfg.ring_size;
        let err = TxRing::configure(rig.ctx(), &cfg, 0, 0).unwrap_err();
        assert!(matches!(err, Error::Config(ConfigError::RsThresh { rs_thresh: 8, ring_size: 8 })));
        assert_eq!(rig.tables_free(), 4);
    }
}
