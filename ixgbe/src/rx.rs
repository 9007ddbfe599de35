//! RX dispatch engine.
//!
//! # Burst scan
//! Starting at `rx_tail`, descriptors are examined in groups of
//! [`LOOK_AHEAD`]. Within a group the done bits are counted until the first
//! clear one; a partial group ends the burst. After an acquire fence the
//! counted descriptors are delivered in order:
//!
//! ```text
//!   DD DD DD DD DD .. .. ..     <- group of 8, 5 done
//!   └──── delivered ────┘ stop
//! ```
//!
//! Each delivered slot is recycled immediately:
//! - `Reuse`: the same buffer is re-armed.
//! - `Keep`: the buffer is adopted by the stack, the pre-allocated spare is
//!   armed in its place.
//! - `Error(code)`: logged, the same buffer is re-armed.
//!
//! The tail register is written once per burst, one behind `rx_tail`, and
//! the queue's interrupt vector is unmasked afterwards.

use core::sync::atomic::{fence, Ordering};

use crate::desc::{RxDesc, RxStatus, RX_ERR_RXE};
use crate::error::{Error, Result};
use crate::mbuf::PacketBuf;
use crate::regs;
use crate::ring::RxRing;
use crate::stack::{RxVerdict, UpperStack};

/// Descriptors examined per scan group.
pub const LOOK_AHEAD: u16 = 8;

/// Per RX queue counters.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RxStats {
    /// Packets delivered to the stack.
    pub packets: u64,
    pub bytes: u64,
    /// Bursts that delivered at least one packet.
    pub bursts: u64,
    pub kept: u64,
    pub reused: u64,
    /// Stack verdicts other than keep/reuse.
    pub stack_errors: u64,
    /// Frames the hardware flagged bad or split; recycled undelivered.
    pub hw_errors: u64,
    /// Scans stopped because no replacement buffer could be allocated.
    pub alloc_stalls: u64,
}

enum Step {
    Done,
    Stall,
}

impl RxRing {
    /// Drain completed descriptors and deliver them to `stack`.
    ///
    /// Returns the number of descriptors consumed (delivered or recycled).
    pub fn rx_burst(&mut self, stack: &dyn UpperStack) -> Result<usize> {
        self.ensure_enabled()?;
        // The device never completes the slot RDT points at.
        let budget = self.capacity() - 1;
        let mut handled: u16 = 0;
        self.stalled = false;

        'scan: while handled < budget {
            let want = LOOK_AHEAD.min(budget - handled);
            let mut ready = 0;
            while ready < want
                && self
                    .table
                    .read(self.rx_tail.ahead(ready))
                    .status()
                    .contains(RxStatus::DD)
            {
                ready += 1;
            }
            if ready == 0 {
                break;
            }

            // Descriptor contents are valid only after DD was observed.
            fence(Ordering::Acquire);

            for _ in 0..ready {
                match self.complete_one(stack)? {
                    Step::Done => handled += 1,
                    Step::Stall => {
                        self.stalled = true;
                        break 'scan;
                    }
                }
            }
            if ready < LOOK_AHEAD {
                break;
            }
        }

        let q = self.binding.queue as u32;
        if handled > 0 {
            self.stats.bursts += 1;
            self.ctx.io.publish_tail(regs::rdt(q), self.rx_tail.prev() as u32);
        }
        self.rearm();
        Ok(handled as usize)
    }

    /// Unmask this queue's interrupt vector.
    pub fn rearm(&self) {
        let v = self.binding.vector;
        self.ctx.io.write32(regs::eims_ex(v / 32), 1 << (v % 32));
    }

    fn complete_one(&mut self, stack: &dyn UpperStack) -> Result<Step> {
        let idx = self.rx_tail.get();
        let desc = self.table.read(idx);
        let status = desc.status();
        let len = desc.length() as u32;

        let Some(mut buf) = self.bufs[idx as usize].take() else {
            debug_assert!(false, "rx slot {idx} completed with no buffer");
            return Err(Error::Invariant("rx slot completed with no buffer"));
        };

        if desc.status_error() & RX_ERR_RXE != 0
            || !status.contains(RxStatus::EOP)
            || len > buf.capacity()
        {
            log::trace!(
                "[ixgbe dev{} rxq{}] dropping slot {} (status {:#x}, len {})",
                self.ctx.device,
                self.binding.queue,
                idx,
                desc.status_error(),
                len
            );
            self.stats.hw_errors += 1;
            self.bind(idx, buf);
            return Ok(Step::Done);
        }

        if self.spare.is_none() {
            match self.alloc_buf() {
                Ok(b) => self.spare = Some(b),
                Err(_) => {
                    // Leave the completion in place; the caller retries.
                    self.bufs[idx as usize] = Some(buf);
                    self.stats.alloc_stalls += 1;
                    return Ok(Step::Stall);
                }
            }
        }

        buf.set_len(len);
        let (device, queue) = (self.ctx.device, self.binding.queue);
        let verdict = stack.receive_packet(&buf, len as usize, device, queue);
        self.stats.packets += 1;
        self.stats.bytes += len as u64;

        match verdict {
            RxVerdict::Keep => {
                let Some(spare) = self.spare.take() else {
                    return Err(Error::Invariant("keep verdict without spare buffer"));
                };
                stack.adopt(buf, device, queue);
                self.stats.kept += 1;
                self.bind(idx, spare);
            }
            RxVerdict::Reuse => {
                self.stats.reused += 1;
                self.bind(idx, buf);
            }
            RxVerdict::Error(code) => {
                log::error!(
                    "[ixgbe dev{} rxq{}] stack returned error {} for slot {}",
                    device,
                    queue,
                    code,
                    idx
                );
                self.stats.stack_errors += 1;
                self.bind(idx, buf);
            }
        }
        Ok(Step::Done)
    }

    /// Re-arm slot `idx` with `buf` and step past it.
    fn bind(&mut self, idx: u16, mut buf: PacketBuf) {
        buf.set_len(0);
        self.table.write(idx, RxDesc::armed(buf.phys()));
        self.bufs[idx as usize] = Some(buf);
        self.rx_tail.advance(1);
    }
}
