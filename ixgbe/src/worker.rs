//! Worker runtime: one pinned thread per RX queue, optional TX generators.
//!
//! Rings move into their worker by value and come back out through
//! [`RxWorker::join`] / [`TxWorker::join`] once the shared shutdown flag is
//! raised. The flag is checked between bursts, so a worker stops within one
//! vector wait timeout.
//!
//! ```text
//!   loop:
//!     shutdown?  -> return ring
//!     wait(vector, timeout)      (or spin with rx_poll)
//!     rx_burst                   -> UpperStack::receive_packet
//!                                   (also on timeout while the ring is stalled)
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::mbuf::PacketBuf;
use crate::ring::{RxRing, TxRing};
use crate::stack::UpperStack;

/// Blocks until an interrupt vector fires.
///
/// Provided by the environment's MSI-X routing. Implementations clear the
/// pending state on delivery.
pub trait IrqWait: Send + Sync {
    /// Wait for `vector`. Returns false on timeout.
    fn wait(&self, vector: u32, timeout: Duration) -> bool;
}

/// Busy polling: every wait returns immediately.
#[derive(Debug, Default, Clone, Copy)]
pub struct PollMode;

impl IrqWait for PollMode {
    fn wait(&self, _vector: u32, _timeout: Duration) -> bool {
        core::hint::spin_loop();
        true
    }
}

/// Supplies frames to a TX generator.
pub trait TxSource: Send + Sync {
    /// Append up to `max` packets for `queue` to `out`.
    fn produce(&self, queue: u16, max: usize, out: &mut Vec<PacketBuf>);
}

/// Worker knobs.
#[derive(Debug, Clone)]
pub struct WorkerOptions {
    /// Upper bound on one vector wait; also bounds shutdown latency.
    pub wait_timeout: Duration,
    /// Pin each worker to its queue's core.
    pub pin: bool,
    /// Skip the vector wait and spin on the ring.
    pub poll: bool,
    /// Packets a TX generator asks for per round.
    pub tx_batch: usize,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            wait_timeout: Duration::from_millis(10),
            pin: true,
            poll: cfg!(feature = "rx_poll"),
            tx_batch: 32,
        }
    }
}

/// A running RX worker.
#[derive(Debug)]
pub struct RxWorker {
    pub queue: u16,
    pub core: usize,
    handle: JoinHandle<Result<RxRing>>,
}

impl RxWorker {
    /// Wait for the worker to stop and take its ring back.
    pub fn join(self) -> Result<RxRing> {
        self.handle
            .join()
            .map_err(|_| Error::Invariant("rx worker panicked"))?
    }
}

/// A running TX generator.
#[derive(Debug)]
pub struct TxWorker {
    pub queue: u16,
    pub core: usize,
    handle: JoinHandle<Result<TxRing>>,
}

impl TxWorker {
    pub fn join(self) -> Result<TxRing> {
        self.handle
            .join()
            .map_err(|_| Error::Invariant("tx worker panicked"))?
    }
}

/// Start one worker per ring.
///
/// On a spawn failure the workers already started keep running until
/// `shutdown` is raised; the error is returned.
pub fn spawn_rx_workers(
    rings: Vec<RxRing>,
    stack: Arc<dyn UpperStack>,
    irq: Arc<dyn IrqWait>,
    shutdown: Arc<AtomicBool>,
    opts: WorkerOptions,
) -> Result<Vec<RxWorker>> {
    let mut workers = Vec::with_capacity(rings.len());
    for ring in rings {
        let b = ring.binding();
        let stack = stack.clone();
        let irq = irq.clone();
        let shutdown = shutdown.clone();
        let opts = opts.clone();
        let handle = thread::Builder::new()
            .name(format!("ixgbe{}-rx{}", ring.ctx.device, b.queue))
            .spawn(move || rx_loop(ring, &*stack, &*irq, &shutdown, &opts))?;
        workers.push(RxWorker {
            queue: b.queue,
            core: b.core,
            handle,
        });
    }
    Ok(workers)
}

fn rx_loop(
    mut ring: RxRing,
    stack: &dyn UpperStack,
    irq: &dyn IrqWait,
    shutdown: &AtomicBool,
    opts: &WorkerOptions,
) -> Result<RxRing> {
    let b = ring.binding();
    if opts.pin {
        pin_to_core(b.core);
    }
    log::debug!(
        "[ixgbe dev{} rxq{}] worker up on core {}, vector {}",
        ring.ctx.device,
        b.queue,
        b.core,
        b.vector
    );

    while !shutdown.load(Ordering::Acquire) {
        let fired = opts.poll || irq.wait(b.vector, opts.wait_timeout);
        // A stalled ring gets no further interrupt for what it already holds.
        if fired || ring.is_stalled() {
            ring.rx_burst(stack)?;
        }
    }

    log::debug!(
        "[ixgbe dev{} rxq{}] worker down: {:?}",
        ring.ctx.device,
        b.queue,
        ring.stats()
    );
    Ok(ring)
}

/// Start one traffic generator per TX ring, feeding from `source`.
pub fn spawn_tx_generators(
    rings: Vec<TxRing>,
    source: Arc<dyn TxSource>,
    shutdown: Arc<AtomicBool>,
    opts: WorkerOptions,
) -> Result<Vec<TxWorker>> {
    let mut workers = Vec::with_capacity(rings.len());
    for ring in rings {
        let (queue, core) = (ring.queue(), ring.core());
        let source = source.clone();
        let shutdown = shutdown.clone();
        let opts = opts.clone();
        let handle = thread::Builder::new()
            .name(format!("ixgbe{}-tx{}", ring.ctx.device, queue))
            .spawn(move || tx_loop(ring, &*source, &shutdown, &opts))?;
        workers.push(TxWorker {
            queue,
            core,
            handle,
        });
    }
    Ok(workers)
}

fn tx_loop(
    mut ring: TxRing,
    source: &dyn TxSource,
    shutdown: &AtomicBool,
    opts: &WorkerOptions,
) -> Result<TxRing> {
    if opts.pin {
        pin_to_core(ring.core());
    }
    let mut pending = Vec::with_capacity(opts.tx_batch);
    let mut result = Ok(());

    while !shutdown.load(Ordering::Acquire) {
        if pending.is_empty() {
            source.produce(ring.queue(), opts.tx_batch, &mut pending);
        }
        let sent = match ring.transmit(&mut pending) {
            Ok(n) => n,
            Err(e) => {
                result = Err(e);
                break;
            }
        };
        if sent == 0 {
            if let Err(e) = ring.reclaim() {
                result = Err(e);
                break;
            }
            thread::yield_now();
        }
    }

    // Whatever the ring did not take goes back to the allocator.
    for pkt in pending.drain(..) {
        if let Err(e) = pkt.release(&*ring.ctx.alloc, ring.ctx.device) {
            log::error!("[ixgbe dev{} txq{}] release failed: {}", ring.ctx.device, ring.queue(), e);
        }
    }
    log::debug!(
        "[ixgbe dev{} txq{}] generator down: {:?}",
        ring.ctx.device,
        ring.queue(),
        ring.stats()
    );
    result.map(|()| ring)
}

/// Pin the calling thread to `core`. Failure is logged; the worker runs
/// unpinned.
#[cfg(target_os = "linux")]
pub fn pin_to_core(core: usize) {
    if core >= libc::CPU_SETSIZE as usize {
        log::warn!("core {} beyond CPU_SETSIZE, running unpinned", core);
        return;
    }
    // SAFETY: cpu_set_t is plain data; zeroed is the empty set.
    let ret = unsafe {
        let mut set: libc::cpu_set_t = core::mem::zeroed();
        libc::CPU_SET(core, &mut set);
        libc::sched_setaffinity(0, core::mem::size_of::<libc::cpu_set_t>(), &set)
    };
    if ret != 0 {
        log::warn!(
            "pinning to core {} failed: {}",
            core,
            std::io::Error::last_os_error()
        );
    }
}

#[cfg(not(target_os = "linux"))]
pub fn pin_to_core(core: usize) {
    log::trace!("core pinning unsupported here, core {} ignored", core);
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::time::Instant;

    use spin::Mutex;

    use super::*;
    use crate::ring::testutil::{rx_cfg, Rig, BINDING};
    use crate::sim;
    use crate::stack::RxVerdict;

    #[test]
    fn poll_mode_always_fires() {
        assert!(PollMode.wait(3, Duration::ZERO));
    }

    #[test]
    fn default_options_follow_feature() {
        let o = WorkerOptions::default();
        assert_eq!(o.poll, cfg!(feature = "rx_poll"));
        assert!(o.pin);
    }

    #[test]
    fn pinning_to_absent_core_is_not_fatal() {
        pin_to_core(1000);
    }

    /// A vector that never fires.
    struct Silent;

    impl IrqWait for Silent {
        fn wait(&self, _vector: u32, timeout: Duration) -> bool {
            thread::sleep(timeout);
            false
        }
    }

    /// Keeps the first `keep` buffers, recycles the rest.
    struct Keeper {
        keep: usize,
        seen: AtomicUsize,
        kept: Mutex<Vec<PacketBuf>>,
    }

    impl UpperStack for Keeper {
        fn receive_packet(&self, _pkt: &PacketBuf, _len: usize, _device: usize, _queue: u16) -> RxVerdict {
            if self.seen.fetch_add(1, Ordering::SeqCst) < self.keep {
                RxVerdict::Keep
            } else {
                RxVerdict::Reuse
            }
        }

        fn adopt(&self, pkt: PacketBuf, _device: usize, _queue: u16) {
            self.kept.lock().push(pkt);
        }
    }

    #[test]
    fn stalled_ring_drains_without_interrupt() {
        // 8 slots + spare + one extra: the third completion stalls.
        let rig = Rig::with_packets(10);
        let mut ring = RxRing::configure(rig.ctx(), &rx_cfg(), BINDING).unwrap();
        let stack = Arc::new(Keeper {
            keep: 2,
            seen: AtomicUsize::new(0),
            kept: Mutex::new(Vec::new()),
        });

        assert_eq!(sim::receive(&mut ring, &[60; 4]), 4);
        assert_eq!(ring.rx_burst(&*stack).unwrap(), 2);
        assert!(ring.is_stalled());
        for p in stack.kept.lock().drain(..) {
            p.release(&*rig.pool, 0).unwrap();
        }

        let shutdown = Arc::new(AtomicBool::new(false));
        let opts = WorkerOptions {
            wait_timeout: Duration::from_millis(1),
            pin: false,
            poll: false,
            tx_batch: 8,
        };
        let workers =
            spawn_rx_workers(vec![ring], stack.clone(), Arc::new(Silent), shutdown.clone(), opts)
                .unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while stack.seen.load(Ordering::SeqCst) < 4 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
        shutdown.store(true, Ordering::Release);
        let ring = workers.into_iter().next().unwrap().join().unwrap();

        assert_eq!(stack.seen.load(Ordering::SeqCst), 4);
        assert_eq!(ring.rx_tail(), 4);
        assert!(!ring.is_stalled());
        assert_eq!(ring.stats().alloc_stalls, 1);
        ring.check_bound().unwrap();
    }
}
