//! DMA memory allocator contract and core-partitioned slab pool.
//!
//! Device drivers never own memory policy. They ask a [`DmaAllocator`] for
//! fixed-size chunks of a given [`BufferKind`] on behalf of a device and a
//! CPU core, and hand the chunks back when hardware is done with them.
//!
//! # Contract
//!
//! - `alloc(kind, device, core)` returns a chunk with both a CPU pointer and
//!   the bus address the device must be programmed with.
//! - `free(ptr, kind, device)` returns the chunk to the partition it came
//!   from. Freeing a pointer twice is reported, never silently accepted.
//! - Implementations must be safe for concurrent per-core allocation and
//!   free. Drivers rely on this and take no locks of their own.
//!
//! # Usage
//!
//! ```ignore
//! use dma_pool::{BufferKind, DmaAllocator, SlabConfig, SlabPool};
//!
//! let pool = SlabPool::new(&[
//!     SlabConfig::new(BufferKind::DescRing, 0, 4096).cores(2).chunks_per_core(8),
//!     SlabConfig::new(BufferKind::Packet, 0, 2048).cores(2).chunks_per_core(1024),
//! ])?;
//!
//! let chunk = pool.alloc(BufferKind::Packet, 0, 1)?;
//! // program chunk.phys() into a descriptor...
//! pool.free(chunk.virt(), BufferKind::Packet, 0)?;
//! ```

#![no_std]

extern crate alloc;

use core::fmt;
use core::ptr::NonNull;

mod slab;

pub use slab::{SlabConfig, SlabPool};

/// Page size (4KB).
pub const PAGE_SIZE: usize = 4096;

// ============================================================================
// Utility functions
// ============================================================================

/// Align a value up to the given alignment.
#[inline]
pub const fn align_up(val: usize, align: usize) -> usize {
    (val + align - 1) & !(align - 1)
}

// ============================================================================
// Buffer kinds and chunks
// ============================================================================

/// What a chunk is used for. Each kind is a separate partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferKind {
    /// Descriptor table memory (one chunk per ring).
    DescRing,
    /// Packet payload memory (one chunk per buffer).
    Packet,
}

impl fmt::Display for BufferKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DescRing => f.write_str("desc-ring"),
            Self::Packet => f.write_str("packet"),
        }
    }
}

/// A chunk of DMA-capable memory.
///
/// Carries both the CPU-visible pointer and the bus address the device
/// sees. The chunk does not free itself; ownership is tracked by whoever
/// holds it.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct DmaChunk {
    virt: NonNull<u8>,
    phys: u64,
    len: usize,
}

impl DmaChunk {
    /// Create a chunk descriptor.
    ///
    /// # Safety
    /// - `virt` must point to `len` bytes of DMA-capable memory
    /// - `phys` must be the device-visible address of `virt`
    pub const unsafe fn new(virt: NonNull<u8>, phys: u64, len: usize) -> Self {
        Self { virt, phys, len }
    }

    /// CPU pointer.
    #[inline]
    pub const fn virt(&self) -> NonNull<u8> {
        self.virt
    }

    /// Bus address.
    #[inline]
    pub const fn phys(&self) -> u64 {
        self.phys
    }

    /// Size in bytes.
    #[inline]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// True for a zero-length chunk.
    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }
}

// SAFETY: a chunk is an address pair; access through it is unsafe anyway.
unsafe impl Send for DmaChunk {}
unsafe impl Sync for DmaChunk {}

impl fmt::Debug for DmaChunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DmaChunk")
            .field("virt", &self.virt)
            .field("phys", &format_args!("{:#x}", self.phys))
            .field("len", &format_args!("{:#x}", self.len))
            .finish()
    }
}

// ============================================================================
// Error types
// ============================================================================

/// DMA allocator errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DmaError {
    /// No partition configured for this kind/device pair.
    #[error("no {kind} partition for device {device}")]
    UnknownPartition { kind: BufferKind, device: usize },
    /// Core index outside the partition.
    #[error("core {core} not served by {kind} partition of device {device}")]
    InvalidCore {
        kind: BufferKind,
        device: usize,
        core: usize,
    },
    /// The per-core free list is empty.
    #[error("{kind} partition of device {device} exhausted on core {core}")]
    Exhausted {
        kind: BufferKind,
        device: usize,
        core: usize,
    },
    /// Pointer does not belong to the partition.
    #[error("pointer {addr:#x} is not a {kind} chunk of device {device}")]
    ForeignPointer {
        kind: BufferKind,
        device: usize,
        addr: usize,
    },
    /// Chunk was already free.
    #[error("double free of {kind} chunk {addr:#x}")]
    DoubleFree { kind: BufferKind, addr: usize },
    /// Chunk size / alignment / count unusable.
    #[error("invalid slab layout")]
    InvalidLayout,
    /// Backing memory could not be obtained.
    #[error("backing allocation failed")]
    OutOfMemory,
}

/// Result type for DMA operations.
pub type Result<T> = core::result::Result<T, DmaError>;

// ============================================================================
// Allocator contract
// ============================================================================

/// Allocator consumed by the drivers.
///
/// Implementations must tolerate concurrent calls from different cores.
pub trait DmaAllocator: Send + Sync {
    /// Allocate one chunk of `kind` for `device` from `core`'s partition.
    fn alloc(&self, kind: BufferKind, device: usize, core: usize) -> Result<DmaChunk>;

    /// Return a chunk previously handed out by [`alloc`](Self::alloc).
    fn free(&self, ptr: NonNull<u8>, kind: BufferKind, device: usize) -> Result<()>;

    /// Bus address of a chunk pointer.
    fn get_phys_addr(&self, ptr: NonNull<u8>, kind: BufferKind, device: usize) -> Result<u64>;

    /// Free chunks across all cores.
    fn get_total_avail(&self, kind: BufferKind, device: usize) -> usize;

    /// Free chunks on one core.
    fn get_num_avail_per_core(&self, kind: BufferKind, device: usize, core: usize) -> usize;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_align_functions() {
        assert_eq!(align_up(0, 4096), 0);
        assert_eq!(align_up(1, 4096), 4096);
        assert_eq!(align_up(4096, 4096), 4096);
    }

    #[test]
    fn test_kind_display() {
        use alloc::string::ToString;
        assert_eq!(BufferKind::DescRing.to_string(), "desc-ring");
        assert_eq!(BufferKind::Packet.to_string(), "packet");
    }
}
