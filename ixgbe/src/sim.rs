//! In-memory 82599 register model.
//!
//! [`SimNic`] stands in for a mapped BAR. It behaves like the device on the
//! few registers bring-up depends on:
//!
//! - CTRL reset bits self-clear
//! - queue enable bits read back as written
//! - FDIRCTRL reports init done, FDIRCMD command bits self-clear
//! - EEPROM auto-read, DMA init, security RX ready and link up read as set
//! - statistics registers clear on read
//!
//! Each of these can be broken with [`SimFaults`]. Every write is logged in
//! order so tests can check sequencing.
//!
//! Two ways to play the device's DMA side:
//! - [`complete_tx`] / [`receive`] work on a ring the test holds directly;
//! - [`SimNic::inject_rx`] / [`SimNic::complete_tx_dma`] follow the ring
//!   base registers like real hardware and work on rings owned by worker
//!   threads. They need bus addresses equal to CPU addresses.

use std::ops::Range;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Condvar, Mutex as StdMutex};
use std::time::{Duration, Instant};

use spin::Mutex;

use crate::desc::{Cursor, RxDesc, RxStatus, TxCmd, TxDesc, TXD_STAT_DD};
use crate::error::Direction;
use crate::mmio::RegisterIo;
use crate::regs;
use crate::ring::{RxRing, TxRing};
use crate::worker::IrqWait;

/// BAR size covered by the model.
pub const SIM_BAR_SIZE: u32 = 0x20000;

/// MAC address the model reports.
pub const SIM_MAC: [u8; 6] = [0x02, 0x00, 0x5E, 0x10, 0x00, 0x01];

const CLEAR_ON_READ: [u32; 9] = [
    regs::CRCERRS,
    regs::MPC0,
    regs::GPRC,
    regs::GPTC,
    regs::GORCL,
    regs::GORCH,
    regs::GOTCL,
    regs::GOTCH,
    regs::RNBC0,
];

/// Misbehaviours to inject.
#[derive(Debug, Clone, Default)]
pub struct SimFaults {
    /// CTRL reset never self-clears.
    pub stuck_reset: bool,
    /// EEPROM auto-read never completes.
    pub no_eeprom: bool,
    /// This queue's enable bit never reads back.
    pub refuse_enable: Option<(Direction, u16)>,
    /// Enable bits never clear.
    pub stuck_disable: bool,
    /// Flow director never reports init done.
    pub no_fdir_init: bool,
    /// Flow director commands never complete.
    pub stuck_fdir_cmd: bool,
    /// Link stays down.
    pub link_down: bool,
}

/// A flow director command as the device saw it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FdirCommand {
    pub fdircmd: u32,
    pub fdirhash: u32,
    pub fdirvlan: u32,
}

/// Simulated register file.
pub struct SimNic {
    regs: Vec<AtomicU32>,
    faults: SimFaults,
    writes: Mutex<Vec<(u32, u32)>>,
    fdir: Mutex<Vec<FdirCommand>>,
    sent: Mutex<Vec<(u16, u32)>>,
    irq_pending: StdMutex<u64>,
    irq_cond: Condvar,
}

impl Default for SimNic {
    fn default() -> Self {
        Self::new()
    }
}

impl SimNic {
    /// A healthy device with link up at 10G.
    pub fn new() -> Self {
        Self::with_faults(SimFaults::default())
    }

    pub fn with_faults(faults: SimFaults) -> Self {
        let sim = Self {
            regs: (0..SIM_BAR_SIZE / 4).map(|_| AtomicU32::new(0)).collect(),
            faults,
            writes: Mutex::new(Vec::new()),
            fdir: Mutex::new(Vec::new()),
            sent: Mutex::new(Vec::new()),
            irq_pending: StdMutex::new(0),
            irq_cond: Condvar::new(),
        };
        if !sim.faults.no_eeprom {
            sim.set_reg(regs::EEC, regs::EEC_ARD);
        }
        sim.set_reg(regs::RDRXCTL, regs::RDRXCTL_DMAIDONE);
        sim.set_reg(regs::SECRXSTAT, regs::SECRXSTAT_SECRX_RDY);
        if !sim.faults.link_down {
            sim.set_reg(regs::LINKS, regs::LINKS_UP | regs::LINKS_SPEED_10G);
        }
        let m = SIM_MAC;
        sim.set_reg(regs::RAL0, u32::from_le_bytes([m[0], m[1], m[2], m[3]]));
        sim.set_reg(regs::RAH0, u16::from_le_bytes([m[4], m[5]]) as u32 | regs::RAH_AV);
        sim
    }

    fn cell(&self, offset: u32) -> &AtomicU32 {
        assert!(
            offset % 4 == 0 && offset < SIM_BAR_SIZE,
            "register {offset:#x} outside simulated BAR"
        );
        &self.regs[offset as usize / 4]
    }

    /// Register value without read side effects.
    pub fn reg(&self, offset: u32) -> u32 {
        self.cell(offset).load(Ordering::SeqCst)
    }

    /// Set a register without logging or side effects.
    pub fn set_reg(&self, offset: u32, value: u32) {
        self.cell(offset).store(value, Ordering::SeqCst);
    }

    /// Every write so far, in order.
    pub fn writes(&self) -> Vec<(u32, u32)> {
        self.writes.lock().clone()
    }

    /// Position in the write log of the first write to `offset` with any of
    /// `bits` set.
    pub fn first_write(&self, offset: u32, bits: u32) -> Option<usize> {
        self.writes
            .lock()
            .iter()
            .position(|&(o, v)| o == offset && v & bits != 0)
    }

    /// Non-zero registers in `range`, ascending.
    pub fn snapshot(&self, range: Range<u32>) -> Vec<(u32, u32)> {
        range
            .step_by(4)
            .map(|o| (o, self.reg(o)))
            .filter(|&(_, v)| v != 0)
            .collect()
    }

    /// Flow director commands issued so far.
    pub fn fdir_commands(&self) -> Vec<FdirCommand> {
        self.fdir.lock().clone()
    }

    /// Frames the device "put on the wire": (queue, length).
    pub fn sent_frames(&self) -> Vec<(u16, u32)> {
        self.sent.lock().clone()
    }

    fn queue_ctl(offset: u32) -> Option<(Direction, u16)> {
        let span = 0x40 * regs::MAX_QUEUES;
        for (dir, base) in [(Direction::Rx, regs::rxdctl(0)), (Direction::Tx, regs::txdctl(0))] {
            if (base..base + span).contains(&offset) && (offset - base) % 0x40 == 0 {
                return Some((dir, ((offset - base) / 0x40) as u16));
            }
        }
        None
    }

    /// Vector mapped to RX queue `queue` through IVAR, if valid.
    fn rx_vector(&self, queue: u16) -> Option<u32> {
        let q = queue as u32;
        let entry = self.reg(regs::ivar(q >> 1)) >> (16 * (q & 1)) & 0xFF;
        (entry & regs::IVAR_ALLOC_VAL != 0).then_some(entry & 0x7F)
    }

    /// Latch an interrupt on `vector`.
    pub fn raise(&self, vector: u32) {
        let mut p = self.irq_pending.lock().unwrap_or_else(|e| e.into_inner());
        *p |= 1u64 << vector;
        self.irq_cond.notify_all();
    }

    // ═══════════════════════════════════════════════════════════════════════
    // DMA SIDE
    // ═══════════════════════════════════════════════════════════════════════

    fn ring_base(&self, bal: u32, bah: u32) -> u64 {
        self.reg(bal) as u64 | (self.reg(bah) as u64) << 32
    }

    /// Receive `frame` on `queue` the way the device would: take the
    /// descriptor at RDH, copy the frame into its buffer, write back, bump
    /// RDH and raise the queue's vector. Returns false if the ring is full.
    ///
    /// # Safety
    /// The ring's descriptor and buffer bus addresses must be valid CPU
    /// addresses for the same memory, and the ring must be enabled.
    pub unsafe fn inject_rx(&self, queue: u16, frame: &[u8]) -> bool {
        let q = queue as u32;
        let len = (self.reg(regs::rdlen(q)) / 16) as u16;
        let head = self.reg(regs::rdh(q)) as u16;
        let tail = self.reg(regs::rdt(q)) as u16;
        if len == 0 || head == tail {
            return false;
        }
        let base = self.ring_base(regs::rdbal(q), regs::rdbah(q)) as *mut RxDesc;
        let slot = base.add(head as usize);
        let desc = slot.read_volatile();
        let buf = desc.pkt_addr() as *mut u8;
        core::ptr::copy_nonoverlapping(frame.as_ptr(), buf, frame.len());
        slot.write_volatile(RxDesc::written_back(
            RxStatus::DD | RxStatus::EOP,
            0,
            frame.len() as u16,
        ));
        self.set_reg(regs::rdh(q), ((head + 1) % len) as u32);
        if let Some(v) = self.rx_vector(queue) {
            self.raise(v);
        }
        true
    }

    /// Transmit everything posted on `queue` between TDH and TDT: record
    /// each frame, write back `DD` where `RS` was asked, advance TDH.
    /// Returns frames sent.
    ///
    /// # Safety
    /// As for [`inject_rx`](Self::inject_rx).
    pub unsafe fn complete_tx_dma(&self, queue: u16) -> usize {
        let q = queue as u32;
        let len = (self.reg(regs::tdlen(q)) / 16) as u16;
        if len == 0 {
            return 0;
        }
        let base = self.ring_base(regs::tdbal(q), regs::tdbah(q)) as *mut TxDesc;
        let mut head = self.reg(regs::tdh(q)) as u16;
        let tail = self.reg(regs::tdt(q)) as u16;
        let mut frames = 0;
        let mut frame_len = 0;
        while head != tail {
            let slot = base.add(head as usize);
            let mut d = slot.read_volatile();
            // Context descriptors carry no payload.
            if d.cmd().contains(TxCmd::DTYP_DATA) {
                frame_len += d.len();
                if d.cmd().contains(TxCmd::EOP) {
                    self.sent.lock().push((queue, frame_len));
                    frame_len = 0;
                    frames += 1;
                }
            }
            if d.cmd().contains(TxCmd::RS) {
                d.olinfo_status |= TXD_STAT_DD;
                slot.write_volatile(d);
            }
            head = (head + 1) % len;
        }
        self.set_reg(regs::tdh(q), head as u32);
        frames
    }
}

impl RegisterIo for SimNic {
    fn read32(&self, offset: u32) -> u32 {
        let cell = self.cell(offset);
        if CLEAR_ON_READ.contains(&offset) {
            cell.swap(0, Ordering::SeqCst)
        } else {
            cell.load(Ordering::SeqCst)
        }
    }

    fn write32(&self, offset: u32, value: u32) {
        self.writes.lock().push((offset, value));
        let f = &self.faults;
        let cell = self.cell(offset);

        let stored = match offset {
            regs::CTRL if value & regs::CTRL_RST_MASK != 0 && !f.stuck_reset => {
                value & !regs::CTRL_RST_MASK
            }
            regs::FDIRCTRL if !f.no_fdir_init => value | regs::FDIRCTRL_INIT_DONE,
            regs::FDIRCMD => {
                if value & regs::FDIRCMD_CMD_MASK != 0 {
                    self.fdir.lock().push(FdirCommand {
                        fdircmd: value,
                        fdirhash: self.reg(regs::FDIRHASH),
                        fdirvlan: self.reg(regs::FDIRVLAN),
                    });
                }
                if f.stuck_fdir_cmd {
                    value
                } else {
                    value & !regs::FDIRCMD_CMD_MASK
                }
            }
            regs::EIMS => cell.load(Ordering::SeqCst) | value,
            regs::EIMC => {
                self.cell(regs::EIMS).fetch_and(!value, Ordering::SeqCst);
                value
            }
            _ => match Self::queue_ctl(offset) {
                Some((dir, queue)) => {
                    let enable = match dir {
                        Direction::Rx => regs::RXDCTL_ENABLE,
                        Direction::Tx => regs::TXDCTL_ENABLE,
                    };
                    let was = cell.load(Ordering::SeqCst) & enable;
                    if f.refuse_enable == Some((dir, queue)) {
                        value & !enable
                    } else if f.stuck_disable && was != 0 {
                        value | enable
                    } else {
                        value
                    }
                }
                None => value,
            },
        };
        cell.store(stored, Ordering::SeqCst);
    }
}

impl IrqWait for SimNic {
    fn wait(&self, vector: u32, timeout: Duration) -> bool {
        let bit = 1u64 << vector;
        let deadline = Instant::now() + timeout;
        let mut p = self.irq_pending.lock().unwrap_or_else(|e| e.into_inner());
        while *p & bit == 0 {
            let left = deadline.saturating_duration_since(Instant::now());
            if left.is_zero() {
                return false;
            }
            p = match self.irq_cond.wait_timeout(p, left) {
                Ok((g, _)) => g,
                Err(e) => e.into_inner().0,
            };
        }
        // Auto-clear on delivery.
        *p &= !bit;
        true
    }
}

impl core::fmt::Debug for SimNic {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SimNic")
            .field("faults", &self.faults)
            .field("writes", &self.writes.lock().len())
            .finish_non_exhaustive()
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// DIRECT RING HELPERS
// ═══════════════════════════════════════════════════════════════════════════

/// Write back `DD` on every posted descriptor of `ring` that has `RS` set.
/// Returns descriptors written back.
pub fn complete_tx(ring: &mut TxRing) -> usize {
    let start = Cursor::new(ring.last_cleaned() + 1, ring.capacity());
    let used = ring.used_count();
    let table = ring.table_mut();
    let mut n = 0;
    for i in 0..used {
        let idx = start.ahead(i);
        let mut d = table.read(idx);
        if d.cmd().contains(TxCmd::RS) && !d.is_done() {
            d.olinfo_status |= TXD_STAT_DD;
            table.write(idx, d);
            n += 1;
        }
    }
    n
}

/// Complete one good frame per entry of `lens` on `ring`, starting at the
/// first slot not yet written back. Returns frames written.
pub fn receive(ring: &mut RxRing, lens: &[u16]) -> usize {
    receive_with(ring, lens, RxStatus::DD | RxStatus::EOP, 0)
}

/// As [`receive`], with explicit status and error bits.
pub fn receive_with(ring: &mut RxRing, lens: &[u16], status: RxStatus, errors: u32) -> usize {
    let cap = ring.capacity();
    let mut cur = Cursor::new(ring.rx_tail(), cap);
    let mut pending = 0;
    while pending < cap - 1 && ring.table().read(cur.get()).status().contains(RxStatus::DD) {
        cur.advance(1);
        pending += 1;
    }
    let room = (cap - 1 - pending) as usize;
    let n = lens.len().min(room);
    for &len in &lens[..n] {
        ring.table_mut().write(cur.get(), RxDesc::written_back(status, errors, len));
        cur.advance(1);
    }
    n
}
