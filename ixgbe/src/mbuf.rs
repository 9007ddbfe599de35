//! Zero-copy packet buffers.
//!
//! A [`PacketBuf`] is the unit exchanged between rings, the allocator and
//! the upper stack. Its memory is handed to the device by bus address and
//! never copied.
//!
//! # Ownership
//! ```text
//!   allocator ──alloc──> driver (RX slot / TX caller)
//!       ▲                    │
//!       │              post to ring ──> device ──done──> reclaim
//!       │                                                  │
//!       └────────── release() frees Driver-owned segments ─┘
//! ```
//!
//! Whoever holds the `PacketBuf` value owns it. Posting it to a ring moves
//! it into the ring's shadow array, so nothing else can touch memory the
//! device may be reading. A buffer is never shared between queue workers;
//! the only cross-thread field is the optional [`SharedRef`] counter.
//!
//! Each segment records who frees it: `Driver(kind)` segments go back to the
//! allocator on release, `Application` segments are left alone.

use std::ptr::NonNull;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use dma_pool::{BufferKind, DmaAllocator, DmaChunk};

use crate::error::{Error, Result};

/// Extra segments beyond the head.
pub const MAX_EXTRA_SEGMENTS: usize = 2;
/// Segments per packet.
pub const MAX_SEGMENTS: usize = 1 + MAX_EXTRA_SEGMENTS;

/// Who returns a segment's memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentOwner {
    /// The driver frees it to the allocator partition of this kind.
    Driver(BufferKind),
    /// The application keeps it (e.g. a cached response body).
    Application,
}

/// One contiguous piece of a packet.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    virt: NonNull<u8>,
    phys: u64,
    cap: u32,
    len: u32,
    owner: SegmentOwner,
}

impl Segment {
    /// Segment over an allocator chunk, initially empty.
    pub fn from_chunk(chunk: DmaChunk, owner: SegmentOwner) -> Self {
        Self {
            virt: chunk.virt(),
            phys: chunk.phys(),
            cap: chunk.len() as u32,
            len: 0,
            owner,
        }
    }

    /// Segment over memory the application manages.
    ///
    /// # Safety
    /// `virt` must map `len` bytes at bus address `phys` and stay valid
    /// until the packet is reclaimed.
    pub unsafe fn application(virt: NonNull<u8>, phys: u64, len: u32) -> Self {
        Self {
            virt,
            phys,
            cap: len,
            len,
            owner: SegmentOwner::Application,
        }
    }

    #[inline]
    pub fn virt(&self) -> NonNull<u8> {
        self.virt
    }

    #[inline]
    pub fn phys(&self) -> u64 {
        self.phys
    }

    #[inline]
    pub fn len(&self) -> u32 {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn capacity(&self) -> u32 {
        self.cap
    }

    #[inline]
    pub fn owner(&self) -> SegmentOwner {
        self.owner
    }

    /// Set the valid length.
    ///
    /// # Panics
    /// Panics if `len` exceeds the capacity.
    pub fn set_len(&mut self, len: u32) {
        assert!(len <= self.cap, "segment length {len} exceeds capacity {}", self.cap);
        self.len = len;
    }

    /// Free the segment if the driver owns it. Returns whether it was freed.
    fn release(&self, alloc: &dyn DmaAllocator, device: usize) -> Result<bool> {
        match self.owner {
            SegmentOwner::Driver(kind) => {
                alloc.free(self.virt, kind, device)?;
                Ok(true)
            }
            SegmentOwner::Application => Ok(false),
        }
    }
}

impl core::fmt::Debug for Segment {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Segment")
            .field("virt", &self.virt)
            .field("phys", &format_args!("{:#x}", self.phys))
            .field("len", &self.len)
            .field("owner", &self.owner)
            .finish()
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// SHARED REFERENCE COUNT
// ═══════════════════════════════════════════════════════════════════════════

/// Reference count shared by every in-flight packet that points into one
/// buffer chain.
///
/// The chain head owns the counter; packets carry a handle. Cloning the
/// handle does not take a reference: references are taken explicitly with
/// [`acquire`](Self::acquire) and dropped with [`release`](Self::release),
/// exactly once per transmission. The holder that observes the count reach
/// zero is the one that may free the chain.
#[derive(Clone, Debug)]
pub struct SharedRef(Arc<AtomicU32>);

impl SharedRef {
    /// Counter starting at `initial` references.
    pub fn new(initial: u32) -> Self {
        Self(Arc::new(AtomicU32::new(initial)))
    }

    /// Current count.
    pub fn count(&self) -> u32 {
        self.0.load(Ordering::Acquire)
    }

    /// True once every reference has been released.
    pub fn is_released(&self) -> bool {
        self.count() == 0
    }

    /// Take one more reference.
    pub fn acquire(&self) {
        self.0.fetch_add(1, Ordering::AcqRel);
    }

    /// Drop one reference. Returns `true` for the release that hit zero.
    ///
    /// Releasing a counter that is already zero is an invariant breach and
    /// leaves the counter at zero.
    pub fn release(&self) -> Result<bool> {
        match self
            .0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
        {
            Ok(prev) => Ok(prev == 1),
            Err(_) => {
                debug_assert!(false, "shared reference released below zero");
                Err(Error::Invariant("shared reference released below zero"))
            }
        }
    }

    /// True if both handles name the same counter.
    pub fn same_chain(&self, other: &SharedRef) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// CHECKSUM OFFLOAD
// ═══════════════════════════════════════════════════════════════════════════

/// L4 protocol for checksum insertion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum L4Proto {
    None,
    Udp,
    Tcp,
}

/// Checksum offload request carried by a TX packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChecksumOffload {
    /// MAC header length.
    pub l2_len: u8,
    /// IP header length.
    pub l3_len: u16,
    /// Insert the IPv4 header checksum.
    pub ipv4: bool,
    /// Insert the L4 checksum.
    pub l4: L4Proto,
}

impl ChecksumOffload {
    /// IPv4 + UDP behind a plain Ethernet header.
    pub const fn udp4() -> Self {
        Self {
            l2_len: 14,
            l3_len: 20,
            ipv4: true,
            l4: L4Proto::Udp,
        }
    }

    /// IPv4 + TCP behind a plain Ethernet header.
    pub const fn tcp4() -> Self {
        Self {
            l2_len: 14,
            l3_len: 20,
            ipv4: true,
            l4: L4Proto::Tcp,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// PACKET BUFFER
// ═══════════════════════════════════════════════════════════════════════════

/// What [`PacketBuf::release`] did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Released {
    /// Segments returned to the allocator.
    pub segments_freed: usize,
    /// Shared chains whose count hit zero.
    pub chains_released: usize,
}

impl core::ops::AddAssign for Released {
    fn add_assign(&mut self, rhs: Self) {
        self.segments_freed += rhs.segments_freed;
        self.chains_released += rhs.chains_released;
    }
}

/// A zero-copy packet: head segment, up to two extra segments, an optional
/// shared reference, an optional offload request, and an optional link to
/// the next fragment.
#[derive(Debug)]
pub struct PacketBuf {
    head: Segment,
    extra: [Option<Segment>; MAX_EXTRA_SEGMENTS],
    refs: Option<SharedRef>,
    offload: Option<ChecksumOffload>,
    next: Option<Box<PacketBuf>>,
}

impl PacketBuf {
    /// Packet around a head segment.
    pub fn new(head: Segment) -> Self {
        Self {
            head,
            extra: [None, None],
            refs: None,
            offload: None,
            next: None,
        }
    }

    /// Allocate an empty, driver-owned packet buffer.
    pub fn alloc(alloc: &dyn DmaAllocator, device: usize, core: usize) -> Result<Self> {
        let chunk = alloc.alloc(BufferKind::Packet, device, core)?;
        Ok(Self::new(Segment::from_chunk(
            chunk,
            SegmentOwner::Driver(BufferKind::Packet),
        )))
    }

    /// Head segment.
    #[inline]
    pub fn head(&self) -> &Segment {
        &self.head
    }

    /// Head bus address.
    #[inline]
    pub fn phys(&self) -> u64 {
        self.head.phys
    }

    /// Head CPU pointer.
    #[inline]
    pub fn virt(&self) -> NonNull<u8> {
        self.head.virt
    }

    /// Head length.
    #[inline]
    pub fn len(&self) -> u32 {
        self.head.len
    }

    /// True if the head segment is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.head.len == 0
    }

    /// Head capacity.
    #[inline]
    pub fn capacity(&self) -> u32 {
        self.head.cap
    }

    /// Set the head length.
    pub fn set_len(&mut self, len: u32) {
        self.head.set_len(len);
    }

    /// Total bytes across all segments of this packet (not the chain).
    pub fn total_len(&self) -> u32 {
        self.segments().map(Segment::len).sum()
    }

    /// Head bytes.
    pub fn data(&self) -> &[u8] {
        // SAFETY: holding the value means the device does not own it.
        unsafe { std::slice::from_raw_parts(self.head.virt.as_ptr(), self.head.len as usize) }
    }

    /// Head bytes, writable, up to capacity.
    pub fn data_mut(&mut self) -> &mut [u8] {
        // SAFETY: as above, and the value is held mutably.
        unsafe { std::slice::from_raw_parts_mut(self.head.virt.as_ptr(), self.head.cap as usize) }
    }

    /// Append a segment (header/payload split).
    pub fn push_segment(&mut self, seg: Segment) -> Result<()> {
        let slot = self
            .extra
            .iter_mut()
            .find(|s| s.is_none())
            .ok_or(Error::PacketTooLarge {
                needed: MAX_SEGMENTS + 1,
                max: MAX_SEGMENTS,
            })?;
        *slot = Some(seg);
        Ok(())
    }

    /// All segments, head first.
    pub fn segments(&self) -> impl Iterator<Item = &Segment> {
        std::iter::once(&self.head).chain(self.extra.iter().flatten())
    }

    /// Number of segments.
    pub fn segment_count(&self) -> usize {
        1 + self.extra.iter().flatten().count()
    }

    /// Attach a shared reference handle.
    pub fn with_shared_ref(mut self, refs: SharedRef) -> Self {
        self.refs = Some(refs);
        self
    }

    /// Shared reference handle, if any.
    pub fn shared_ref(&self) -> Option<&SharedRef> {
        self.refs.as_ref()
    }

    /// Request checksum offload.
    pub fn with_offload(mut self, offload: ChecksumOffload) -> Self {
        self.offload = Some(offload);
        self
    }

    /// Offload request, if any.
    pub fn offload(&self) -> Option<&ChecksumOffload> {
        self.offload.as_ref()
    }

    /// Link `next` after the last fragment of this chain.
    pub fn chain(&mut self, next: PacketBuf) {
        match self.next.as_deref_mut() {
            Some(n) => n.chain(next),
            None => self.next = Some(Box::new(next)),
        }
    }

    /// Next fragment.
    pub fn next(&self) -> Option<&PacketBuf> {
        self.next.as_deref()
    }

    /// Detach the rest of the chain.
    pub fn take_next(&mut self) -> Option<PacketBuf> {
        self.next.take().map(|b| *b)
    }

    /// Fragments in this chain, including `self`.
    pub fn chain_len(&self) -> usize {
        let mut n = 1;
        let mut cur = self.next();
        while let Some(p) = cur {
            n += 1;
            cur = p.next();
        }
        n
    }

    /// Release the packet and every fragment after it.
    ///
    /// Driver-owned segments go back to the allocator, shared references are
    /// dropped once. Application segments are untouched. A failure does not
    /// stop the walk; the first error is returned once the chain is done.
    pub fn release(self, alloc: &dyn DmaAllocator, device: usize) -> Result<Released> {
        let mut out = Released::default();
        let mut first_err = None;
        let mut cur = Some(self);
        while let Some(mut pkt) = cur {
            cur = pkt.take_next();
            for seg in pkt.segments() {
                match seg.release(alloc, device) {
                    Ok(true) => out.segments_freed += 1,
                    Ok(false) => {}
                    Err(e) => {
                        first_err.get_or_insert(e);
                    }
                }
            }
            if let Some(refs) = pkt.refs.take() {
                match refs.release() {
                    Ok(true) => out.chains_released += 1,
                    Ok(false) => {}
                    Err(e) => {
                        first_err.get_or_insert(e);
                    }
                }
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(out),
        }
    }
}

// SAFETY: a PacketBuf is moved, never shared; its memory belongs to
// whoever holds it.
unsafe impl Send for PacketBuf {}

#[cfg(test)]
mod tests {
    use super::*;
    use dma_pool::{DmaError, SlabConfig, SlabPool};

    fn pool() -> SlabPool {
        SlabPool::new(&[SlabConfig::new(BufferKind::Packet, 0, 2048).chunks_per_core(8)]).unwrap()
    }

    #[test]
    fn test_release_respects_owner() {
        let pool = pool();
        let mut pkt = PacketBuf::alloc(&pool, 0, 0).unwrap();
        pkt.set_len(64);

        let mut app_mem = vec![0u8; 128];
        let app_seg = unsafe {
            Segment::application(NonNull::new(app_mem.as_mut_ptr()).unwrap(), 0xF000, 128)
        };
        pkt.push_segment(app_seg).unwrap();
        assert_eq!(pkt.segment_count(), 2);
        assert_eq!(pkt.total_len(), 192);

        let released = pkt.release(&pool, 0).unwrap();
        assert_eq!(released.segments_freed, 1);
        assert_eq!(pool.get_total_avail(BufferKind::Packet, 0), 8);
    }

    #[test]
    fn test_segment_limit() {
        let pool = pool();
        let mut pkt = PacketBuf::alloc(&pool, 0, 0).unwrap();
        for _ in 0..MAX_EXTRA_SEGMENTS {
            let c = pool.alloc(BufferKind::Packet, 0, 0).unwrap();
            pkt.push_segment(Segment::from_chunk(c, SegmentOwner::Driver(BufferKind::Packet)))
                .unwrap();
        }
        let c = pool.alloc(BufferKind::Packet, 0, 0).unwrap();
        assert!(pkt
            .push_segment(Segment::from_chunk(c, SegmentOwner::Driver(BufferKind::Packet)))
            .is_err());
        assert_eq!(pkt.release(&pool, 0).unwrap().segments_freed, 3);
        pool.free(c.virt(), BufferKind::Packet, 0).unwrap();
        assert_eq!(pool.get_total_avail(BufferKind::Packet, 0), 8);
    }

    #[test]
    fn test_shared_ref_released_exactly_once() {
        let refs = SharedRef::new(2);
        assert!(!refs.release().unwrap());
        assert!(refs.release().unwrap());
        assert!(refs.is_released());
    }

    #[test]
    #[cfg(not(debug_assertions))]
    fn test_shared_ref_underflow_is_error() {
        let refs = SharedRef::new(0);
        assert!(matches!(refs.release(), Err(Error::Invariant(_))));
        assert_eq!(refs.count(), 0);
    }

    #[test]
    fn test_chain_release() {
        let pool = pool();
        let refs = SharedRef::new(3);
        let mut head = PacketBuf::alloc(&pool, 0, 0).unwrap().with_shared_ref(refs.clone());
        for _ in 0..2 {
            head.chain(PacketBuf::alloc(&pool, 0, 0).unwrap().with_shared_ref(refs.clone()));
        }
        assert_eq!(head.chain_len(), 3);

        let released = head.release(&pool, 0).unwrap();
        assert_eq!(released.segments_freed, 3);
        assert_eq!(released.chains_released, 1);
        assert!(refs.is_released());
    }
    #[test]
    fn test_release_continues_past_failure() {
        let pool = pool();
        let refs = SharedRef::new(2);
        let mut head = PacketBuf::alloc(&pool, 0, 0).unwrap().with_shared_ref(refs.clone());
        let stale = pool.alloc(BufferKind::Packet, 0, 0).unwrap();
        head.push_segment(Segment::from_chunk(stale, SegmentOwner::Driver(BufferKind::Packet)))
            .unwrap();
        pool.free(stale.virt(), BufferKind::Packet, 0).unwrap();
        head.chain(PacketBuf::alloc(&pool, 0, 0).unwrap().with_shared_ref(refs.clone()));

        let err = head.release(&pool, 0).unwrap_err();
        assert!(matches!(err, Error::Alloc(DmaError::DoubleFree { .. })));
        // Everything after the failed segment was still released.
        assert!(refs.is_released());
        assert_eq!(pool.get_total_avail(BufferKind::Packet, 0), 8);
    }
}
