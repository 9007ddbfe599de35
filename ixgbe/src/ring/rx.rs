//! RX ring lifecycle.
//!
//! Every descriptor is bound 1:1 to a driver-owned packet buffer from the
//! moment the ring is configured until it is dropped. The burst path that
//! drains completions lives in [`crate::rx`].

use crate::config::{QueueBinding, RxQueueConfig};
use crate::desc::{Cursor, DescTable, RxDesc};
use crate::error::{Direction, Error, Result};
use crate::mbuf::PacketBuf;
use crate::regs;
use crate::rx::RxStats;

use super::{alloc_table, disable_queue, enable_queue, free_table, program_base, QueueState, RingCtx};

/// One RX queue.
pub struct RxRing {
    pub(crate) ctx: RingCtx,
    pub(crate) binding: QueueBinding,
    pub(crate) table: DescTable<RxDesc>,
    /// Buffer bound to each slot. `None` only transiently inside a burst.
    pub(crate) bufs: Vec<Option<PacketBuf>>,
    /// Pre-allocated replacement for a buffer the stack keeps.
    pub(crate) spare: Option<PacketBuf>,
    /// Next slot to inspect.
    pub(crate) rx_tail: Cursor,
    pub(crate) state: QueueState,
    pub(crate) stats: RxStats,
    /// Last burst stopped on an empty allocator with completions pending.
    pub(crate) stalled: bool,
}

impl RxRing {
    /// Allocate, arm and enable the ring for `binding.queue`.
    ///
    /// Buffers come from `binding.core`'s allocator partition. Allocation
    /// failure and enable timeout are fatal; whatever was allocated is
    /// returned to the allocator when the partial ring drops.
    pub fn configure(ctx: RingCtx, cfg: &RxQueueConfig, binding: QueueBinding) -> Result<Self> {
        cfg.validate()?;
        let q = binding.queue as u32;
        let table = alloc_table::<RxDesc>(&ctx, binding.core, cfg.ring_size)?;

        let mut ring = Self {
            ctx,
            binding,
            table,
            bufs: Vec::with_capacity(cfg.ring_size as usize),
            spare: None,
            rx_tail: Cursor::new(0, cfg.ring_size),
            state: QueueState::Unconfigured,
            stats: RxStats::default(),
            stalled: false,
        };

        ring.disable();
        ring.state = QueueState::Configuring;

        let io = &*ring.ctx.io;
        program_base(io, &ring.table, regs::rdbal(q), regs::rdbah(q), regs::rdlen(q));
        let mut srrctl = (cfg.buf_size >> regs::SRRCTL_BSIZEPKT_SHIFT) & regs::SRRCTL_BSIZEPKT_MASK
            | regs::SRRCTL_DESCTYPE_ADV_ONEBUF;
        if cfg.drop_en {
            srrctl |= regs::SRRCTL_DROP_EN;
        }
        io.write32(regs::srrctl(q), srrctl);
        io.clear_bits(regs::dca_rxctrl(q), regs::DCA_RXCTRL_DATA_WRO_EN);
        io.write32(regs::rdh(q), 0);
        io.write32(regs::rdt(q), 0);

        ring.populate()?;
        ring.spare = Some(ring.alloc_buf()?);

        enable_queue(&ring.ctx, Direction::Rx, binding.queue, regs::rxdctl(q), regs::RXDCTL_ENABLE)?;

        // Hand every slot but one to the device.
        ring.ctx.io.publish_tail(regs::rdt(q), cfg.ring_size as u32 - 1);
        ring.state = QueueState::Enabled;

        log::debug!(
            "[ixgbe dev{} rxq{}] {} descriptors at {:#x}, core {}, vector {}",
            ring.ctx.device,
            q,
            cfg.ring_size,
            ring.table.phys(),
            binding.core,
            binding.vector
        );
        Ok(ring)
    }

    pub(crate) fn alloc_buf(&self) -> Result<PacketBuf> {
        PacketBuf::alloc(&*self.ctx.alloc, self.ctx.device, self.binding.core)
    }

    /// Bind a fresh buffer to every slot.
    fn populate(&mut self) -> Result<()> {
        for idx in 0..self.table.len() {
            let buf = self.alloc_buf()?;
            self.table.write(idx, RxDesc::armed(buf.phys()));
            self.bufs.push(Some(buf));
        }
        Ok(())
    }

    /// Stop the queue. A queue that does not stop is logged, not fatal.
    pub fn disable(&mut self) {
        self.state = QueueState::Disabling;
        disable_queue(
            &self.ctx,
            Direction::Rx,
            self.binding.queue,
            regs::rxdctl(self.binding.queue as u32),
            regs::RXDCTL_ENABLE,
        );
        self.state = QueueState::Disabled;
    }

    /// Queue index.
    pub fn queue(&self) -> u16 {
        self.binding.queue
    }

    pub fn binding(&self) -> QueueBinding {
        self.binding
    }

    pub fn state(&self) -> QueueState {
        self.state
    }

    pub fn capacity(&self) -> u16 {
        self.table.len()
    }

    /// Next slot the burst scan will look at.
    pub fn rx_tail(&self) -> u16 {
        self.rx_tail.get()
    }

    pub fn stats(&self) -> &RxStats {
        &self.stats
    }

    /// Completed descriptors were left in the ring for lack of a buffer.
    ///
    /// The device will not signal them again, so the caller must retry
    /// without waiting for an interrupt.
    pub fn is_stalled(&self) -> bool {
        self.stalled
    }

    pub(crate) fn ensure_enabled(&self) -> Result<()> {
        if self.state != QueueState::Enabled {
            return Err(Error::QueueNotEnabled {
                dir: Direction::Rx,
                queue: self.binding.queue,
                state: self.state,
            });
        }
        Ok(())
    }

    /// Check that every slot is bound to a non-null buffer whose address is
    /// what the descriptor points at.
    pub fn check_bound(&self) -> Result<()> {
        if self.state != QueueState::Enabled {
            return Ok(());
        }
        for (idx, slot) in self.bufs.iter().enumerate() {
            let ok = match slot {
                Some(buf) => {
                    let d = self.table.read(idx as u16);
                    // Completed slots carry write-back data instead of the address.
                    !d.status().is_empty() || d.pkt_addr() == buf.phys()
                }
                None => false,
            };
            if !ok {
                debug_assert!(false, "rx slot {idx} unbound");
                return Err(Error::Invariant("rx slot bound to no buffer"));
            }
        }
        Ok(())
    }

    #[cfg(any(test, feature = "sim"))]
    pub(crate) fn table(&self) -> &DescTable<RxDesc> {
        &self.table
    }

    #[cfg(any(test, feature = "sim"))]
    pub(crate) fn table_mut(&mut self) -> &mut DescTable<RxDesc> {
        &mut self.table
    }
}

impl Drop for RxRing {
    fn drop(&mut self) {
        if matches!(self.state, QueueState::Enabled | QueueState::Configuring) {
            self.disable();
        }
        let alloc = &*self.ctx.alloc;
        for buf in self.bufs.drain(..).flatten().chain(self.spare.take()) {
            if let Err(e) = buf.release(alloc, self.ctx.device) {
                log::error!(
                    "[ixgbe dev{} rxq{}] buffer free failed: {}",
                    self.ctx.device,
                    self.binding.queue,
                    e
                );
            }
        }
        free_table(&self.ctx, &self.table);
    }
}

impl core::fmt::Debug for RxRing {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RxRing")
            .field("queue", &self.binding.queue)
            .field("state", &self.state)
            .field("capacity", &self.table.len())
            .field("rx_tail", &self.rx_tail.get())
            .finish()
    }
}
