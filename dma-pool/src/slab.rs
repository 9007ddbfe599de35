//! Core-partitioned slab pool.
//!
//! One slab per (kind, device). A slab is a single contiguous backing
//! region cut into equal chunks; chunk `i` belongs to core
//! `i / chunks_per_core` for its whole life. Each core has its own free
//! list behind its own spinlock, so cores never contend with each other,
//! and a freed chunk always goes home to the core that owns it.
//!
//! # Memory Layout
//! ```text
//! base                                                     base + size
//! |  core 0 chunks ... |  core 1 chunks ... |  ...  |  core N-1 chunks |
//! ```
//!
//! Bus addresses are `virt + phys_offset`. The offset is zero for identity
//! mapped memory and non-zero when an IOMMU or bus window translates.

use alloc::alloc::{alloc_zeroed, dealloc, Layout};
use alloc::vec::Vec;
use core::ptr::NonNull;
use core::sync::atomic::{AtomicU64, Ordering};

use spin::Mutex;

use crate::{BufferKind, DmaAllocator, DmaChunk, DmaError, Result};

/// Minimum chunk alignment accepted by the pool (one cache line).
pub const MIN_CHUNK_ALIGN: usize = 64;

/// Configuration of one slab.
#[derive(Debug, Clone, Copy)]
pub struct SlabConfig {
    kind: BufferKind,
    device: usize,
    chunk_size: usize,
    align: usize,
    cores: usize,
    chunks_per_core: usize,
    phys_offset: u64,
    zero_on_alloc: bool,
}

impl SlabConfig {
    /// Slab of `chunk_size`-byte chunks for `kind` on `device`.
    ///
    /// Defaults: one core, 64 chunks, 128-byte alignment, identity mapping,
    /// descriptor rings zeroed on allocation.
    pub const fn new(kind: BufferKind, device: usize, chunk_size: usize) -> Self {
        Self {
            kind,
            device,
            chunk_size,
            align: 128,
            cores: 1,
            chunks_per_core: 64,
            phys_offset: 0,
            zero_on_alloc: matches!(kind, BufferKind::DescRing),
        }
    }

    /// Number of cores served.
    pub const fn cores(mut self, cores: usize) -> Self {
        self.cores = cores;
        self
    }

    /// Chunks reserved for each core.
    pub const fn chunks_per_core(mut self, count: usize) -> Self {
        self.chunks_per_core = count;
        self
    }

    /// Chunk alignment (power of two, at least [`MIN_CHUNK_ALIGN`]).
    pub const fn align(mut self, align: usize) -> Self {
        self.align = align;
        self
    }

    /// Offset added to CPU addresses to form bus addresses.
    pub const fn phys_offset(mut self, offset: u64) -> Self {
        self.phys_offset = offset;
        self
    }

    /// Zero chunk contents on every allocation.
    pub const fn zero_on_alloc(mut self, zero: bool) -> Self {
        self.zero_on_alloc = zero;
        self
    }

    fn stride(&self) -> usize {
        crate::align_up(self.chunk_size, self.align)
    }

    fn validate(&self) -> Result<()> {
        if self.chunk_size == 0
            || self.cores == 0
            || self.chunks_per_core == 0
            || !self.align.is_power_of_two()
            || self.align < MIN_CHUNK_ALIGN
            || self.chunks_per_core > u32::MAX as usize
        {
            return Err(DmaError::InvalidLayout);
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// SLAB
// ═══════════════════════════════════════════════════════════════════════════

struct Slab {
    config: SlabConfig,
    base: NonNull<u8>,
    layout: Layout,
    /// One free list per core, chunk indices.
    free: Vec<Mutex<Vec<u32>>>,
    /// One bit per chunk, set while handed out.
    in_use: Vec<AtomicU64>,
}

impl Slab {
    fn new(config: SlabConfig) -> Result<Self> {
        config.validate()?;

        let stride = config.stride();
        let total_chunks = config
            .cores
            .checked_mul(config.chunks_per_core)
            .ok_or(DmaError::InvalidLayout)?;
        let size = stride
            .checked_mul(total_chunks)
            .ok_or(DmaError::InvalidLayout)?;
        let layout = Layout::from_size_align(size, config.align.max(crate::PAGE_SIZE))
            .map_err(|_| DmaError::InvalidLayout)?;

        // SAFETY: layout has non-zero size (validated above).
        let base = NonNull::new(unsafe { alloc_zeroed(layout) }).ok_or(DmaError::OutOfMemory)?;

        let free = (0..config.cores)
            .map(|core| {
                let first = core * config.chunks_per_core;
                // Reverse so pops hand out ascending addresses.
                let list: Vec<u32> = (first..first + config.chunks_per_core)
                    .rev()
                    .map(|i| i as u32)
                    .collect();
                Mutex::new(list)
            })
            .collect();

        let in_use = (0..total_chunks.div_ceil(64))
            .map(|_| AtomicU64::new(0))
            .collect();

        log::debug!(
            "dma-pool: {} slab dev{}: {} cores x {} chunks x {:#x} bytes at {:p}",
            config.kind,
            config.device,
            config.cores,
            config.chunks_per_core,
            stride,
            base
        );

        Ok(Self {
            config,
            base,
            layout,
            free,
            in_use,
        })
    }

    fn chunk(&self, index: usize) -> DmaChunk {
        let offset = index * self.config.stride();
        // SAFETY: index < total chunks, so offset stays inside the region.
        let virt = unsafe { NonNull::new_unchecked(self.base.as_ptr().add(offset)) };
        let phys = virt.as_ptr() as u64 + self.config.phys_offset;
        // SAFETY: virt points at `chunk_size` bytes of the backing region.
        unsafe { DmaChunk::new(virt, phys, self.config.chunk_size) }
    }

    fn index_of(&self, ptr: NonNull<u8>) -> Result<usize> {
        let foreign = DmaError::ForeignPointer {
            kind: self.config.kind,
            device: self.config.device,
            addr: ptr.as_ptr() as usize,
        };
        let addr = ptr.as_ptr() as usize;
        let base = self.base.as_ptr() as usize;
        if addr < base || addr >= base + self.layout.size() {
            return Err(foreign);
        }
        let offset = addr - base;
        if offset % self.config.stride() != 0 {
            return Err(foreign);
        }
        Ok(offset / self.config.stride())
    }

    fn mark(&self, index: usize, used: bool) -> bool {
        let word = &self.in_use[index / 64];
        let bit = 1u64 << (index % 64);
        let prev = if used {
            word.fetch_or(bit, Ordering::AcqRel)
        } else {
            word.fetch_and(!bit, Ordering::AcqRel)
        };
        (prev & bit != 0) != used
    }

    fn alloc(&self, core: usize) -> Result<DmaChunk> {
        let list = self.free.get(core).ok_or(DmaError::InvalidCore {
            kind: self.config.kind,
            device: self.config.device,
            core,
        })?;

        let index = list.lock().pop().ok_or(DmaError::Exhausted {
            kind: self.config.kind,
            device: self.config.device,
            core,
        })? as usize;

        let changed = self.mark(index, true);
        debug_assert!(changed, "free list held an in-use chunk");

        let chunk = self.chunk(index);
        if self.config.zero_on_alloc {
            // SAFETY: chunk is exclusively ours until freed.
            unsafe { core::ptr::write_bytes(chunk.virt().as_ptr(), 0, chunk.len()) };
        }
        Ok(chunk)
    }

    fn free(&self, ptr: NonNull<u8>) -> Result<()> {
        let index = self.index_of(ptr)?;
        if !self.mark(index, false) {
            return Err(DmaError::DoubleFree {
                kind: self.config.kind,
                addr: ptr.as_ptr() as usize,
            });
        }
        let home = index / self.config.chunks_per_core;
        self.free[home].lock().push(index as u32);
        Ok(())
    }

    fn phys_of(&self, ptr: NonNull<u8>) -> Result<u64> {
        self.index_of(ptr)?;
        Ok(ptr.as_ptr() as u64 + self.config.phys_offset)
    }

    fn avail_on(&self, core: usize) -> usize {
        self.free.get(core).map_or(0, |list| list.lock().len())
    }

    fn avail_total(&self) -> usize {
        self.free.iter().map(|list| list.lock().len()).sum()
    }
}

impl Drop for Slab {
    fn drop(&mut self) {
        // SAFETY: allocated in `new` with this exact layout.
        unsafe { dealloc(self.base.as_ptr(), self.layout) };
    }
}

// SAFETY: the region is owned by the slab; mutation goes through the
// per-core locks and the atomic bitmap.
unsafe impl Send for Slab {}
unsafe impl Sync for Slab {}

// ═══════════════════════════════════════════════════════════════════════════
// POOL
// ═══════════════════════════════════════════════════════════════════════════

/// A set of slabs, one per (kind, device).
pub struct SlabPool {
    slabs: Vec<Slab>,
}

impl SlabPool {
    /// Build a pool from slab configurations.
    ///
    /// A (kind, device) pair may appear only once.
    pub fn new(configs: &[SlabConfig]) -> Result<Self> {
        let mut slabs: Vec<Slab> = Vec::with_capacity(configs.len());
        for config in configs {
            if slabs
                .iter()
                .any(|s| s.config.kind == config.kind && s.config.device == config.device)
            {
                return Err(DmaError::InvalidLayout);
            }
            slabs.push(Slab::new(*config)?);
        }
        Ok(Self { slabs })
    }

    fn slab(&self, kind: BufferKind, device: usize) -> Result<&Slab> {
        self.slabs
            .iter()
            .find(|s| s.config.kind == kind && s.config.device == device)
            .ok_or(DmaError::UnknownPartition { kind, device })
    }

    /// Chunk size of a partition.
    pub fn chunk_size(&self, kind: BufferKind, device: usize) -> Option<usize> {
        self.slab(kind, device).ok().map(|s| s.config.chunk_size)
    }

    /// Number of cores a partition serves.
    pub fn cores(&self, kind: BufferKind, device: usize) -> Option<usize> {
        self.slab(kind, device).ok().map(|s| s.config.cores)
    }
}

impl DmaAllocator for SlabPool {
    fn alloc(&self, kind: BufferKind, device: usize, core: usize) -> Result<DmaChunk> {
        self.slab(kind, device)?.alloc(core)
    }

    fn free(&self, ptr: NonNull<u8>, kind: BufferKind, device: usize) -> Result<()> {
        self.slab(kind, device)?.free(ptr)
    }

    fn get_phys_addr(&self, ptr: NonNull<u8>, kind: BufferKind, device: usize) -> Result<u64> {
        self.slab(kind, device)?.phys_of(ptr)
    }

    fn get_total_avail(&self, kind: BufferKind, device: usize) -> usize {
        self.slab(kind, device).map_or(0, Slab::avail_total)
    }

    fn get_num_avail_per_core(&self, kind: BufferKind, device: usize, core: usize) -> usize {
        self.slab(kind, device).map_or(0, |s| s.avail_on(core))
    }
}
