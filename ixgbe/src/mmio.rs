//! Register access layer.
//!
//! Every register access in the driver goes through [`RegisterIo`]. The trait
//! is the seam between the data plane and whatever maps the BAR: the real
//! [`Mmio`] window, or the simulator used by tests.
//!
//! # Ordering
//! - Reads are followed by an acquire fence, so status bits observed in a
//!   register are ordered before any descriptor reads that depend on them.
//! - Writes are preceded by a release fence.
//! - [`RegisterIo::publish_tail`] issues a full fence before the doorbell
//!   write. Descriptor contents must be globally visible before the device
//!   is told to fetch them.
//! - [`RegisterIo::write_flush`] reads STATUS back to push posted writes
//!   out to the device.
//!
//! Nothing here fails. Timeouts and their policy belong to the callers.

use core::ptr::NonNull;
use core::sync::atomic::{fence, Ordering};
use std::thread;
use std::time::Duration;

use crate::regs;

/// 32-bit register window.
pub trait RegisterIo: Send + Sync {
    /// Read a 32-bit register.
    fn read32(&self, offset: u32) -> u32;

    /// Write a 32-bit register.
    fn write32(&self, offset: u32, value: u32);

    /// Flush posted writes with a dummy read.
    #[inline]
    fn write_flush(&self) {
        let _ = self.read32(regs::STATUS);
    }

    /// Publish a ring tail (doorbell).
    #[inline]
    fn publish_tail(&self, offset: u32, value: u32) {
        fence(Ordering::SeqCst);
        self.write32(offset, value);
    }

    /// Read-modify-write: set bits.
    #[inline]
    fn set_bits(&self, offset: u32, bits: u32) {
        let v = self.read32(offset);
        self.write32(offset, v | bits);
    }

    /// Read-modify-write: clear bits.
    #[inline]
    fn clear_bits(&self, offset: u32, bits: u32) {
        let v = self.read32(offset);
        self.write32(offset, v & !bits);
    }

    /// Poll until all of `mask` reads as set.
    ///
    /// Checks once immediately, then up to `retries` more times with `delay`
    /// between checks. Returns whether the bits were observed.
    fn poll_set(&self, offset: u32, mask: u32, retries: u32, delay: Duration) -> bool {
        poll(retries, delay, || self.read32(offset) & mask == mask)
    }

    /// Poll until all of `mask` reads as clear.
    fn poll_clear(&self, offset: u32, mask: u32, retries: u32, delay: Duration) -> bool {
        poll(retries, delay, || self.read32(offset) & mask == 0)
    }
}

fn poll(retries: u32, delay: Duration, mut done: impl FnMut() -> bool) -> bool {
    if done() {
        return true;
    }
    for _ in 0..retries {
        if !delay.is_zero() {
            thread::sleep(delay);
        }
        if done() {
            return true;
        }
    }
    false
}

// ═══════════════════════════════════════════════════════════════════════════
// MAPPED BAR
// ═══════════════════════════════════════════════════════════════════════════

/// A mapped BAR0 register window.
pub struct Mmio {
    base: NonNull<u8>,
    len: usize,
}

impl Mmio {
    /// Wrap a mapped register window.
    ///
    /// # Safety
    /// - `base` must map `len` bytes of device registers, uncached
    /// - the mapping must outlive this value
    pub unsafe fn new(base: NonNull<u8>, len: usize) -> Self {
        Self { base, len }
    }

    /// Window length in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// True if the window is empty.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    fn reg(&self, offset: u32) -> *mut u32 {
        let offset = offset as usize;
        assert!(
            offset % 4 == 0 && offset + 4 <= self.len,
            "register {offset:#x} outside BAR of {:#x} bytes",
            self.len
        );
        // SAFETY: bounds checked above.
        unsafe { self.base.as_ptr().add(offset).cast::<u32>() }
    }
}

impl RegisterIo for Mmio {
    #[inline]
    fn read32(&self, offset: u32) -> u32 {
        // SAFETY: aligned, in-bounds device register.
        let v = unsafe { self.reg(offset).read_volatile() };
        fence(Ordering::Acquire);
        v
    }

    #[inline]
    fn write32(&self, offset: u32, value: u32) {
        fence(Ordering::Release);
        // SAFETY: aligned, in-bounds device register.
        unsafe { self.reg(offset).write_volatile(value) }
    }
}

// SAFETY: register accesses are single volatile loads/stores; the
// per-queue partitioning of the window is the callers' contract.
unsafe impl Send for Mmio {}
unsafe impl Sync for Mmio {}

impl core::fmt::Debug for Mmio {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Mmio")
            .field("base", &self.base)
            .field("len", &format_args!("{:#x}", self.len))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mmio_over_plain_memory() {
        let mut backing = vec![0u32; 64];
        let base = NonNull::new(backing.as_mut_ptr().cast::<u8>()).unwrap();
        let mmio = unsafe { Mmio::new(base, backing.len() * 4) };

        mmio.write32(0x10, 0xDEAD_BEEF);
        assert_eq!(mmio.read32(0x10), 0xDEAD_BEEF);

        mmio.set_bits(0x10, 0x1);
        mmio.clear_bits(0x10, 0xF000_0000);
        assert_eq!(mmio.read32(0x10), 0x0EAD_BEEF);

        mmio.publish_tail(0x20, 7);
        assert_eq!(backing[8], 7);
    }

    #[test]
    fn test_poll_bounds() {
        let mut backing = vec![0u32; 4];
        let base = NonNull::new(backing.as_mut_ptr().cast::<u8>()).unwrap();
        let mmio = unsafe { Mmio::new(base, 16) };

        assert!(mmio.poll_clear(0x4, 0x1, 0, Duration::ZERO));
        assert!(!mmio.poll_set(0x4, 0x1, 3, Duration::ZERO));
        mmio.write32(0x4, 0x3);
        assert!(mmio.poll_set(0x4, 0x1, 0, Duration::ZERO));
    }

    #[test]
    #[should_panic(expected = "outside BAR")]
    fn test_out_of_bounds_register() {
        let mut backing = vec![0u32; 4];
        let base = NonNull::new(backing.as_mut_ptr().cast::<u8>()).unwrap();
        let mmio = unsafe { Mmio::new(base, 16) };
        mmio.read32(0x10);
    }
}
