//! TX ring lifecycle and bookkeeping.
//!
//! The send and reclaim paths live in [`crate::tx`]; this file owns the
//! ring's memory, its cursors and the accounting invariant
//! `free_count + used_count == capacity - 1`.

use crate::config::TxQueueConfig;
use crate::desc::{Cursor, DescTable, TxDesc};
use crate::error::{Direction, Error, Result};
use crate::mbuf::{ChecksumOffload, PacketBuf};
use crate::regs;
use crate::tx::{TxPath, TxStats};

use super::{alloc_table, disable_queue, enable_queue, free_table, program_base, QueueState, RingCtx};

/// Software shadow of one TX descriptor.
#[derive(Debug)]
pub struct TxEntry {
    /// Packet whose last descriptor is this slot.
    pub(crate) pkt: Option<PacketBuf>,
    /// Last descriptor of the packet occupying this slot.
    pub(crate) last_id: u16,
}

/// One TX queue.
pub struct TxRing {
    pub(crate) ctx: RingCtx,
    pub(crate) queue: u16,
    pub(crate) core: usize,
    pub(crate) table: DescTable<TxDesc>,
    pub(crate) sw: Vec<TxEntry>,
    /// Next descriptor to fill.
    pub(crate) tail: Cursor,
    /// Next report-status boundary the reclaim paths check.
    pub(crate) next_dd: u16,
    /// Next report-status boundary the send paths mark.
    pub(crate) next_rs: u16,
    /// Last descriptor already reclaimed.
    pub(crate) last_cleaned: u16,
    pub(crate) free_count: u16,
    pub(crate) used_count: u16,
    pub(crate) rs_thresh: u16,
    pub(crate) free_thresh: u16,
    pub(crate) path: TxPath,
    /// Offload of the last context descriptor written.
    pub(crate) ctx_cache: Option<ChecksumOffload>,
    pub(crate) state: QueueState,
    pub(crate) stats: TxStats,
}

impl TxRing {
    /// Allocate and enable TX queue `queue`.
    ///
    /// Transmit DMA (DMATXCTL.TE) must already be on.
    pub fn configure(ctx: RingCtx, cfg: &TxQueueConfig, queue: u16, core: usize) -> Result<Self> {
        cfg.validate()?;
        let q = queue as u32;
        let cap = cfg.ring_size;
        let table = alloc_table::<TxDesc>(&ctx, core, cap)?;

        let mut ring = Self {
            ctx,
            queue,
            core,
            table,
            sw: (0..cap)
                .map(|i| TxEntry {
                    pkt: None,
                    last_id: i,
                })
                .collect(),
            tail: Cursor::new(0, cap),
            next_dd: cfg.rs_thresh - 1,
            next_rs: cfg.rs_thresh - 1,
            last_cleaned: cap - 1,
            free_count: cap - 1,
            used_count: 0,
            rs_thresh: cfg.rs_thresh,
            free_thresh: cfg.free_thresh,
            path: cfg.path,
            ctx_cache: None,
            state: QueueState::Unconfigured,
            stats: TxStats::default(),
        };

        ring.disable();
        ring.state = QueueState::Configuring;

        let io = &*ring.ctx.io;
        program_base(io, &ring.table, regs::tdbal(q), regs::tdbah(q), regs::tdlen(q));
        io.write32(regs::tdh(q), 0);
        io.write32(regs::tdt(q), 0);
        io.write32(
            regs::txdctl(q),
            (cfg.pthresh as u32) << regs::TXDCTL_PTHRESH_SHIFT
                | (cfg.hthresh as u32) << regs::TXDCTL_HTHRESH_SHIFT
                | (cfg.wthresh as u32) << regs::TXDCTL_WTHRESH_SHIFT,
        );

        enable_queue(&ring.ctx, Direction::Tx, queue, regs::txdctl(q), regs::TXDCTL_ENABLE)?;
        ring.state = QueueState::Enabled;

        log::debug!(
            "[ixgbe dev{} txq{}] {} descriptors at {:#x}, rs_thresh {}, {:?} path",
            ring.ctx.device,
            queue,
            cap,
            ring.table.phys(),
            ring.rs_thresh,
            ring.path
        );
        Ok(ring)
    }

    /// Stop the queue. A queue that does not stop is logged, not fatal.
    pub fn disable(&mut self) {
        self.state = QueueState::Disabling;
        disable_queue(
            &self.ctx,
            Direction::Tx,
            self.queue,
            regs::txdctl(self.queue as u32),
            regs::TXDCTL_ENABLE,
        );
        self.state = QueueState::Disabled;
    }

    pub fn queue(&self) -> u16 {
        self.queue
    }

    /// Core whose allocator partition this queue draws from.
    pub fn core(&self) -> usize {
        self.core
    }

    pub fn state(&self) -> QueueState {
        self.state
    }

    pub fn path(&self) -> TxPath {
        self.path
    }

    pub fn capacity(&self) -> u16 {
        self.table.len()
    }

    /// Descriptors available for new packets.
    pub fn free_count(&self) -> u16 {
        self.free_count
    }

    /// Descriptors posted and not yet reclaimed.
    pub fn used_count(&self) -> u16 {
        self.used_count
    }

    /// Next descriptor to fill.
    pub fn tail(&self) -> u16 {
        self.tail.get()
    }

    pub fn last_cleaned(&self) -> u16 {
        self.last_cleaned
    }

    pub fn stats(&self) -> &TxStats {
        &self.stats
    }

    /// `free_count + used_count == capacity - 1`.
    pub fn check_accounting(&self) -> Result<()> {
        if self.free_count as u32 + self.used_count as u32 != self.capacity() as u32 - 1 {
            debug_assert!(
                false,
                "tx accounting: free {} + used {} != {} - 1",
                self.free_count,
                self.used_count,
                self.capacity()
            );
            return Err(Error::Invariant("tx free + used != capacity - 1"));
        }
        Ok(())
    }

    pub(crate) fn ensure_enabled(&self) -> Result<()> {
        if self.state != QueueState::Enabled {
            return Err(Error::QueueNotEnabled {
                dir: Direction::Tx,
                queue: self.queue,
                state: self.state,
            });
        }
        Ok(())
    }

    /// Move `n` descriptors from free to used.
    pub(crate) fn take_descs(&mut self, n: u16) {
        debug_assert!(n <= self.free_count);
        self.free_count -= n;
        self.used_count += n;
    }

    /// Move `n` descriptors from used to free.
    pub(crate) fn credit_descs(&mut self, n: u16) -> Result<()> {
        if n > self.used_count {
            debug_assert!(false, "crediting {n} of {} used descriptors", self.used_count);
            return Err(Error::Invariant("tx reclaim beyond posted descriptors"));
        }
        self.used_count -= n;
        self.free_count += n;
        Ok(())
    }

    /// Release the packet parked at `idx`, if any.
    pub(crate) fn release_entry(&mut self, idx: u16) -> Result<()> {
        if let Some(pkt) = self.sw[idx as usize].pkt.take() {
            let r = pkt.release(&*self.ctx.alloc, self.ctx.device)?;
            self.stats.segments_freed += r.segments_freed as u64;
            self.stats.chains_released += r.chains_released as u64;
        }
        Ok(())
    }

    #[cfg(any(test, feature = "sim"))]
    pub(crate) fn table_mut(&mut self) -> &mut DescTable<TxDesc> {
        &mut self.table
    }
}

impl Drop for TxRing {
    fn drop(&mut self) {
        if matches!(self.state, QueueState::Enabled | QueueState::Configuring) {
            self.disable();
        }
        for idx in 0..self.sw.len() as u16 {
            if let Err(e) = self.release_entry(idx) {
                log::error!("[ixgbe dev{} txq{}] release failed: {}", self.ctx.device, self.queue, e);
            }
        }
        free_table(&self.ctx, &self.table);
    }
}

impl core::fmt::Debug for TxRing {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TxRing")
            .field("queue", &self.queue)
            .field("state", &self.state)
            .field("path", &self.path)
            .field("tail", &self.tail.get())
            .field("free", &self.free_count)
            .field("used", &self.used_count)
            .finish()
    }
}
