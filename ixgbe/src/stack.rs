//! Contract with the upper network stack.
//!
//! Two pieces: the per-packet delivery callback ([`UpperStack`]) and the
//! bring-up handshake ([`Handshake`]). The handshake is a pair of
//! [`Readiness`] cells, one written by the driver and one by the stack, each
//! a monotonic [`StackState`] guarded by a mutex and condition variable.
//! Waiting never sleep-polls.

use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::mbuf::PacketBuf;

/// What the stack did with a delivered packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RxVerdict {
    /// The stack takes the buffer. The driver hands it over with
    /// [`UpperStack::adopt`] and binds a fresh buffer to the slot.
    Keep,
    /// The stack is done with the bytes; the same buffer goes back to the slot.
    Reuse,
    /// Stack-defined failure. Logged, buffer reused.
    Error(i32),
}

/// Packet consumer above the driver.
///
/// Called from RX workers, one per queue, concurrently. Implementations
/// must be `Send + Sync`.
pub trait UpperStack: Send + Sync {
    /// Look at a received packet.
    ///
    /// `pkt.len()` equals `len`. The buffer stays owned by the ring unless the
    /// verdict is [`RxVerdict::Keep`].
    fn receive_packet(&self, pkt: &PacketBuf, len: usize, device: usize, queue: u16)
        -> RxVerdict;

    /// Take ownership of a packet after returning [`RxVerdict::Keep`].
    ///
    /// The stack must eventually give it back with
    /// [`PacketBuf::release`](crate::mbuf::PacketBuf::release).
    fn adopt(&self, pkt: PacketBuf, device: usize, queue: u16);
}

// ═══════════════════════════════════════════════════════════════════════════
// READINESS
// ═══════════════════════════════════════════════════════════════════════════

/// Bring-up progress, ordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum StackState {
    #[default]
    Created,
    TxConfigured,
    RxConfigured,
    Ready,
}

/// A monotonic state cell other threads can wait on.
#[derive(Debug, Default)]
pub struct Readiness {
    state: Mutex<StackState>,
    cond: Condvar,
}

impl Readiness {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, StackState> {
        // A panicking peer cannot leave the state half-written.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Current state.
    pub fn get_state(&self) -> StackState {
        *self.lock()
    }

    /// Advance to `state` and wake waiters. Moving backwards is ignored.
    pub fn set_state(&self, state: StackState) {
        let mut cur = self.lock();
        if state < *cur {
            log::warn!("readiness: ignoring regression {:?} -> {:?}", *cur, state);
            return;
        }
        *cur = state;
        self.cond.notify_all();
    }

    /// Block until the state is at least `wanted`.
    ///
    /// Returns the observed state, or `None` if `timeout` elapsed first.
    pub fn wait_at_least(&self, wanted: StackState, timeout: Duration) -> Option<StackState> {
        let deadline = Instant::now() + timeout;
        let mut cur = self.lock();
        while *cur < wanted {
            let left = deadline.saturating_duration_since(Instant::now());
            if left.is_zero() {
                return None;
            }
            cur = match self.cond.wait_timeout(cur, left) {
                Ok((guard, _)) => guard,
                Err(e) => e.into_inner().0,
            };
        }
        Some(*cur)
    }
}

/// Both sides of the bring-up handshake.
#[derive(Debug, Default)]
pub struct Handshake {
    /// Written by the driver.
    pub nic: Readiness,
    /// Written by the stack.
    pub stack: Readiness,
}

impl Handshake {
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_state_order() {
        assert!(StackState::Created < StackState::TxConfigured);
        assert!(StackState::TxConfigured < StackState::RxConfigured);
        assert!(StackState::RxConfigured < StackState::Ready);
    }

    #[test]
    fn test_wait_wakes_on_set() {
        let hs = Arc::new(Handshake::new());
        let peer = {
            let hs = Arc::clone(&hs);
            thread::spawn(move || {
                hs.nic
                    .wait_at_least(StackState::TxConfigured, Duration::from_secs(5))
                    .map(|_| hs.stack.set_state(StackState::Ready))
            })
        };
        hs.nic.set_state(StackState::TxConfigured);
        assert_eq!(
            hs.stack.wait_at_least(StackState::TxConfigured, Duration::from_secs(5)),
            Some(StackState::Ready)
        );
        assert!(peer.join().unwrap().is_some());
    }

    #[test]
    fn test_wait_times_out() {
        let r = Readiness::new();
        assert_eq!(r.wait_at_least(StackState::Ready, Duration::from_millis(10)), None);
    }

    #[test]
    fn test_no_regression() {
        let r = Readiness::new();
        r.set_state(StackState::RxConfigured);
        r.set_state(StackState::TxConfigured);
        assert_eq!(r.get_state(), StackState::RxConfigured);
    }
}
