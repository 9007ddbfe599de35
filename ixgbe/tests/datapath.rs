mod common;

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use common::{config, eventually, pool_is_full, CountingStack, Harness};
use dma_pool::SlabPool;
use exo_ixgbe::sim::SimNic;
use exo_ixgbe::worker::{spawn_rx_workers, spawn_tx_generators};
use exo_ixgbe::{IrqWait, PacketBuf, PollMode, TxPath, TxSource, WorkerOptions};

const WAIT: Duration = Duration::from_secs(5);

fn opts() -> WorkerOptions {
    WorkerOptions {
        wait_timeout: Duration::from_millis(5),
        pin: false,
        poll: false,
        tx_batch: 8,
    }
}

/// Feed `frames` frames of `len` bytes into `queue`, waiting for room.
fn inject(sim: &SimNic, queue: u16, frames: usize, len: usize) -> bool {
    let frame = vec![0xA5u8; len];
    let mut sent = 0;
    eventually(WAIT, || {
        // SAFETY: the pool maps bus addresses 1:1 and the ring is enabled.
        while sent < frames && unsafe { sim.inject_rx(queue, &frame) } {
            sent += 1;
        }
        sent == frames
    })
}

#[test]
fn test_rx_workers_deliver_and_stop() {
    let h = Harness::new();
    let mut dev = h.bring_up(config(2, 1)).unwrap();
    let (rx, tx) = dev.split();
    drop(tx);

    let stack = Arc::new(CountingStack::default());
    let shutdown = Arc::new(AtomicBool::new(false));
    let irq: Arc<dyn IrqWait> = h.sim.clone();
    let workers = spawn_rx_workers(rx, stack.clone(), irq, shutdown.clone(), opts()).unwrap();
    assert_eq!(workers.iter().map(|w| w.core).collect::<Vec<_>>(), vec![0, 1]);

    // More frames than either ring holds, so the workers must keep up.
    assert!(inject(&h.sim, 0, 20, 64));
    assert!(inject(&h.sim, 1, 20, 128));
    assert!(eventually(WAIT, || stack.packets() == 40));
    assert_eq!(stack.bytes.load(Ordering::SeqCst), 20 * 64 + 20 * 128);

    shutdown.store(true, Ordering::Release);
    let rings: Vec<_> = workers.into_iter().map(|w| w.join().unwrap()).collect();
    assert_eq!(rings.iter().map(|r| r.stats().packets).sum::<u64>(), 40);
    for r in &rings {
        r.check_bound().unwrap();
    }

    drop(rings);
    drop(dev);
    assert!(pool_is_full(&h.pool));
}

#[test]
fn test_poll_mode_worker() {
    let h = Harness::new();
    let mut dev = h.bring_up(config(1, 1)).unwrap();
    let (rx, _tx) = dev.split();

    let stack = Arc::new(CountingStack::default());
    let shutdown = Arc::new(AtomicBool::new(false));
    let workers = spawn_rx_workers(
        rx,
        stack.clone(),
        Arc::new(PollMode),
        shutdown.clone(),
        WorkerOptions {
            poll: true,
            ..opts()
        },
    )
    .unwrap();

    assert!(inject(&h.sim, 0, 12, 60));
    assert!(eventually(WAIT, || stack.packets() == 12));

    shutdown.store(true, Ordering::Release);
    for w in workers {
        w.join().unwrap();
    }
}

/// Hands out a fixed number of 64-byte frames.
struct Frames {
    pool: Arc<SlabPool>,
    left: AtomicUsize,
}

impl TxSource for Frames {
    fn produce(&self, _queue: u16, max: usize, out: &mut Vec<PacketBuf>) {
        for _ in 0..max {
            if self
                .left
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
                .is_err()
            {
                return;
            }
            let Ok(mut pkt) = PacketBuf::alloc(&*self.pool, 0, 0) else {
                self.left.fetch_add(1, Ordering::AcqRel);
                return;
            };
            pkt.set_len(64);
            out.push(pkt);
        }
    }
}

fn run_generator(path: TxPath) {
    let h = Harness::new();
    let mut cfg = config(1, 1);
    cfg.tx.path = path;
    let mut dev = h.bring_up(cfg).unwrap();
    let (rx, tx) = dev.split();
    drop(rx);

    let source = Arc::new(Frames {
        pool: h.pool.clone(),
        left: AtomicUsize::new(30),
    });
    let shutdown = Arc::new(AtomicBool::new(false));
    let workers = spawn_tx_generators(tx, source, shutdown.clone(), opts()).unwrap();

    let sim = h.sim.clone();
    assert!(eventually(WAIT, || {
        // SAFETY: bus addresses are CPU addresses and the ring is enabled.
        unsafe { sim.complete_tx_dma(0) };
        sim.sent_frames().len() == 30
    }));
    assert!(sim.sent_frames().iter().all(|&(q, len)| q == 0 && len == 64));

    shutdown.store(true, Ordering::Release);
    let mut rings: Vec<_> = workers.into_iter().map(|w| w.join().unwrap()).collect();
    let ring = &mut rings[0];
    assert_eq!(ring.stats().packets, 30);
    while ring.reclaim().unwrap() > 0 {}
    ring.check_accounting().unwrap();

    drop(rings);
    drop(dev);
    assert!(pool_is_full(&h.pool));
}

#[test]
fn test_tx_generator_simple_path() {
    run_generator(TxPath::Simple);
}

#[test]
fn test_tx_generator_full_path() {
    run_generator(TxPath::Full);
}

#[test]
fn test_irq_wait_times_out() {
    let sim = SimNic::new();
    assert!(!sim.wait(3, Duration::from_millis(5)));
    sim.raise(3);
    assert!(sim.wait(3, Duration::ZERO));
    // Delivery clears the latch.
    assert!(!sim.wait(3, Duration::ZERO));
}

#[test]
fn test_irq_wakes_waiter() {
    let sim = Arc::new(SimNic::new());
    let waiter = {
        let sim = sim.clone();
        thread::spawn(move || sim.wait(7, WAIT))
    };
    thread::sleep(Duration::from_millis(10));
    sim.raise(7);
    assert!(waiter.join().unwrap());
}
