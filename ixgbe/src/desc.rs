//! Advanced RX/TX descriptor formats and the descriptor table view.
//!
//! Descriptors are 16-byte hardware records. They are never heap objects:
//! a [`DescTable`] is a typed view over one allocator chunk, and every slot
//! access goes through a bounds-checked index. Fields the device writes
//! back are read with volatile loads.
//!
//! # RX (advanced, one buffer)
//! ```text
//! read:        [ packet address : 64 ][ header address : 64 ]
//! write-back:  [ info : 32 | rss : 32 ][ status/error : 32 | len : 16 | vlan : 16 ]
//! ```
//!
//! # TX (advanced data / context)
//! ```text
//! data:     [ buffer address : 64 ][ cmd_type_len : 32 | olinfo_status : 32 ]
//! context:  [ vlan_macip_lens : 32 | seqnum_seed : 32 ][ type_tucmd_mlhl : 32 | mss_l4len_idx : 32 ]
//! ```

use core::marker::PhantomData;
use core::ptr::NonNull;

use bitflags::bitflags;
use dma_pool::DmaChunk;

use crate::error::{Error, Result};

/// Size of every descriptor.
pub const DESC_SIZE: usize = 16;

bitflags! {
    /// RX write-back status (low half of the status/error word).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct RxStatus: u32 {
        /// Descriptor done.
        const DD = 1 << 0;
        /// End of packet.
        const EOP = 1 << 1;
        /// VLAN tag stripped.
        const VP = 1 << 3;
        /// UDP checksum computed.
        const UDPCS = 1 << 4;
        /// L4 checksum computed.
        const L4CS = 1 << 5;
        /// IPv4 checksum computed.
        const IPCS = 1 << 6;
    }
}

/// RX error: frame error (CRC, symbol, length). The frame is undeliverable.
pub const RX_ERR_RXE: u32 = 1 << 29;
/// RX error: IPv4 header checksum.
pub const RX_ERR_IPE: u32 = 1 << 30;
/// RX error: L4 checksum.
pub const RX_ERR_L4E: u32 = 1 << 31;

bitflags! {
    /// TX data descriptor command/type bits (`cmd_type_len`).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TxCmd: u32 {
        /// End of packet.
        const EOP = 1 << 24;
        /// Insert FCS.
        const IFCS = 1 << 25;
        /// Report status.
        const RS = 1 << 27;
        /// Extended (advanced) descriptor.
        const DEXT = 1 << 29;
        /// Advanced data descriptor type.
        const DTYP_DATA = 0x3 << 20;
        /// Advanced context descriptor type.
        const DTYP_CTXT = 0x2 << 20;
    }
}

/// TX write-back: descriptor done, in `olinfo_status`.
pub const TXD_STAT_DD: u32 = 1;
/// Check context: apply the context descriptor to this packet.
pub const TXD_OLINFO_CC: u32 = 1 << 7;
/// Insert IPv4 checksum.
pub const TXD_POPTS_IXSM: u32 = 1 << 8;
/// Insert L4 checksum.
pub const TXD_POPTS_TXSM: u32 = 1 << 9;
pub const TXD_PAYLEN_SHIFT: u32 = 14;
pub const TXD_DTALEN_MASK: u32 = 0xFFFF;

pub const TXCTX_MACLEN_SHIFT: u32 = 9;
pub const TXCTX_TUCMD_IPV4: u32 = 1 << 10;
pub const TXCTX_TUCMD_L4T_UDP: u32 = 0;
pub const TXCTX_TUCMD_L4T_TCP: u32 = 1 << 11;

// ═══════════════════════════════════════════════════════════════════════════
// DESCRIPTOR RECORDS
// ═══════════════════════════════════════════════════════════════════════════

/// Marker for plain-old-data 16-byte descriptor records.
///
/// # Safety
/// Implementors must be `repr(C)`, 16 bytes, valid for any bit pattern.
pub unsafe trait Descriptor: Copy + Default {}

/// Advanced RX descriptor.
#[repr(C, align(16))]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RxDesc {
    lo: u64,
    hi: u64,
}

impl RxDesc {
    /// Read-format descriptor pointing at a packet buffer.
    #[inline]
    pub const fn armed(pkt_addr: u64) -> Self {
        Self { lo: pkt_addr, hi: 0 }
    }

    /// Packet address (read format).
    #[inline]
    pub const fn pkt_addr(&self) -> u64 {
        self.lo
    }

    /// Raw status/error word (write-back).
    #[inline]
    pub const fn status_error(&self) -> u32 {
        self.hi as u32
    }

    /// Status bits (write-back).
    #[inline]
    pub const fn status(&self) -> RxStatus {
        RxStatus::from_bits_truncate(self.status_error())
    }

    /// Received length (write-back).
    #[inline]
    pub const fn length(&self) -> u16 {
        (self.hi >> 32) as u16
    }

    /// Hardware write-back, used by the register simulator.
    pub const fn written_back(status: RxStatus, errors: u32, length: u16) -> Self {
        Self {
            lo: 0,
            hi: (status.bits() | errors) as u64 | (length as u64) << 32,
        }
    }
}

// SAFETY: repr(C), two u64s.
unsafe impl Descriptor for RxDesc {}

/// Advanced TX data descriptor.
#[repr(C, align(16))]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TxDesc {
    pub buffer_addr: u64,
    pub cmd_type_len: u32,
    pub olinfo_status: u32,
}

impl TxDesc {
    /// Data descriptor for one buffer segment.
    #[inline]
    pub fn data(addr: u64, len: u32, cmd: TxCmd, olinfo: u32) -> Self {
        Self {
            buffer_addr: addr,
            cmd_type_len: (TxCmd::DTYP_DATA | TxCmd::DEXT | TxCmd::IFCS | cmd).bits()
                | (len & TXD_DTALEN_MASK),
            olinfo_status: olinfo,
        }
    }

    /// Command bits.
    #[inline]
    pub fn cmd(&self) -> TxCmd {
        TxCmd::from_bits_truncate(self.cmd_type_len)
    }

    /// Buffer length.
    #[inline]
    pub fn len(&self) -> u32 {
        self.cmd_type_len & TXD_DTALEN_MASK
    }

    /// True if the descriptor describes no bytes.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Done bit (write-back).
    #[inline]
    pub fn is_done(&self) -> bool {
        self.olinfo_status & TXD_STAT_DD != 0
    }

    /// Set the report-status bit.
    #[inline]
    pub fn set_rs(&mut self) {
        self.cmd_type_len |= TxCmd::RS.bits();
    }
}

// SAFETY: repr(C), 16 bytes of integers.
unsafe impl Descriptor for TxDesc {}

/// Advanced TX context descriptor (checksum offload metadata).
#[repr(C, align(16))]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TxContextDesc {
    pub vlan_macip_lens: u32,
    pub seqnum_seed: u32,
    pub type_tucmd_mlhl: u32,
    pub mss_l4len_idx: u32,
}

impl TxContextDesc {
    /// Reinterpret as a data-ring slot.
    #[inline]
    pub fn into_slot(self) -> TxDesc {
        TxDesc {
            buffer_addr: self.vlan_macip_lens as u64 | (self.seqnum_seed as u64) << 32,
            cmd_type_len: self.type_tucmd_mlhl,
            olinfo_status: self.mss_l4len_idx,
        }
    }
}

const _: () = assert!(core::mem::size_of::<RxDesc>() == DESC_SIZE);
const _: () = assert!(core::mem::size_of::<TxDesc>() == DESC_SIZE);
const _: () = assert!(core::mem::size_of::<TxContextDesc>() == DESC_SIZE);

// ═══════════════════════════════════════════════════════════════════════════
// DESCRIPTOR TABLE
// ═══════════════════════════════════════════════════════════════════════════

/// Typed, bounds-checked view of a descriptor ring in DMA memory.
pub struct DescTable<D: Descriptor> {
    base: NonNull<D>,
    phys: u64,
    len: u16,
    chunk: DmaChunk,
    _marker: PhantomData<D>,
}

impl<D: Descriptor> DescTable<D> {
    /// Lay out `len` descriptors over `chunk` and zero them.
    ///
    /// # Safety
    /// `chunk` must be exclusively owned by the table until the ring frees
    /// it.
    pub unsafe fn new(chunk: DmaChunk, len: u16) -> Result<Self> {
        let bytes = len as usize * DESC_SIZE;
        if len == 0
            || chunk.len() < bytes
            || chunk.phys() % crate::regs::DESC_RING_ALIGN as u64 != 0
            || chunk.virt().as_ptr() as usize % core::mem::align_of::<D>() != 0
        {
            return Err(Error::DescTableLayout {
                needed: bytes,
                provided: chunk.len(),
            });
        }
        core::ptr::write_bytes(chunk.virt().as_ptr(), 0, bytes);
        Ok(Self {
            base: chunk.virt().cast::<D>(),
            phys: chunk.phys(),
            len,
            chunk,
            _marker: PhantomData,
        })
    }

    /// Number of slots.
    #[inline]
    pub fn len(&self) -> u16 {
        self.len
    }

    /// True if the table has no slots.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Bus address of slot 0.
    #[inline]
    pub fn phys(&self) -> u64 {
        self.phys
    }

    /// Ring length in bytes, as programmed into xDLEN.
    #[inline]
    pub fn byte_len(&self) -> u32 {
        self.len as u32 * DESC_SIZE as u32
    }

    #[inline]
    fn slot(&self, idx: u16) -> *mut D {
        assert!(idx < self.len, "descriptor {idx} out of ring of {}", self.len);
        // SAFETY: bounds checked.
        unsafe { self.base.as_ptr().add(idx as usize) }
    }

    /// Volatile read of a slot.
    #[inline]
    pub fn read(&self, idx: u16) -> D {
        // SAFETY: in-bounds, aligned, POD.
        unsafe { self.slot(idx).read_volatile() }
    }

    /// Volatile write of a slot.
    #[inline]
    pub fn write(&mut self, idx: u16, desc: D) {
        // SAFETY: in-bounds, aligned, POD.
        unsafe { self.slot(idx).write_volatile(desc) }
    }

    /// Backing chunk.
    pub fn chunk(&self) -> DmaChunk {
        self.chunk
    }
}

// SAFETY: the table exclusively owns its chunk.
unsafe impl<D: Descriptor> Send for DescTable<D> {}

// ═══════════════════════════════════════════════════════════════════════════
// CURSOR
// ═══════════════════════════════════════════════════════════════════════════

/// Ring index with wrap-around arithmetic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cursor {
    pos: u16,
    cap: u16,
}

impl Cursor {
    /// Cursor at `pos` in a ring of `cap` slots.
    #[inline]
    pub const fn new(pos: u16, cap: u16) -> Self {
        Self { pos: pos % cap, cap }
    }

    /// Current slot.
    #[inline]
    pub const fn get(self) -> u16 {
        self.pos
    }

    /// Slot `n` ahead.
    #[inline]
    pub const fn ahead(self, n: u16) -> u16 {
        ((self.pos as u32 + n as u32) % self.cap as u32) as u16
    }

    /// Slot one behind.
    #[inline]
    pub const fn prev(self) -> u16 {
        if self.pos == 0 {
            self.cap - 1
        } else {
            self.pos - 1
        }
    }

    /// Move forward by `n`.
    #[inline]
    pub fn advance(&mut self, n: u16) {
        self.pos = self.ahead(n);
    }

    /// Slots from `self` forward to `to` (0 if equal).
    #[inline]
    pub const fn distance_to(self, to: u16) -> u16 {
        ((to as u32 + self.cap as u32 - self.pos as u32) % self.cap as u32) as u16
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cursor_wraps() {
        let mut c = Cursor::new(6, 8);
        assert_eq!(c.ahead(3), 1);
        c.advance(2);
        assert_eq!(c.get(), 0);
        assert_eq!(c.prev(), 7);
        assert_eq!(Cursor::new(6, 8).distance_to(1), 3);
        assert_eq!(Cursor::new(2, 8).distance_to(2), 0);
    }

    #[test]
    fn test_rx_writeback_fields() {
        let d = RxDesc::written_back(RxStatus::DD | RxStatus::EOP, 0, 1514);
        assert!(d.status().contains(RxStatus::DD | RxStatus::EOP));
        assert_eq!(d.length(), 1514);
        assert_eq!(RxDesc::armed(0x1000).status(), RxStatus::empty());
    }

    #[test]
    fn test_tx_data_descriptor_bits() {
        let mut d = TxDesc::data(0xABC0, 60, TxCmd::EOP, 60 << TXD_PAYLEN_SHIFT);
        assert_eq!(d.len(), 60);
        assert!(d.cmd().contains(TxCmd::EOP | TxCmd::IFCS | TxCmd::DEXT));
        assert!(!d.cmd().contains(TxCmd::RS));
        d.set_rs();
        assert!(d.cmd().contains(TxCmd::RS));
        assert!(!d.is_done());
    }
}
