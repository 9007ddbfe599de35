//! Wiring shared by the integration tests: simulated device, pool, a peer
//! that answers the readiness handshake, and a counting upper stack.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use dma_pool::{BufferKind, DmaAllocator, SlabConfig, SlabPool};
use exo_ixgbe::sim::{SimFaults, SimNic};
use exo_ixgbe::{
    Device, DeviceConfig, Handshake, PacketBuf, Result, RxQueueConfig, RxVerdict, StackState,
    Timeouts, TxQueueConfig, UpperStack,
};

pub const CORES: usize = 2;
pub const DESC_CHUNKS: usize = 8;
pub const PACKET_CHUNKS: usize = 128;

/// Two cores, bus address == CPU address.
pub fn pool() -> Arc<SlabPool> {
    let pool = SlabPool::new(&[
        SlabConfig::new(BufferKind::DescRing, 0, 4096)
            .cores(CORES)
            .chunks_per_core(DESC_CHUNKS),
        SlabConfig::new(BufferKind::Packet, 0, 2048)
            .cores(CORES)
            .chunks_per_core(PACKET_CHUNKS),
    ])
    .unwrap();
    Arc::new(pool)
}

/// True when every chunk is back in the pool.
pub fn pool_is_full(pool: &SlabPool) -> bool {
    pool.get_total_avail(BufferKind::DescRing, 0) == CORES * DESC_CHUNKS
        && pool.get_total_avail(BufferKind::Packet, 0) == CORES * PACKET_CHUNKS
}

/// Small rings, one queue per core, no poll delays.
pub fn config(rx_queues: usize, tx_queues: usize) -> DeviceConfig {
    DeviceConfig {
        rx_queues,
        tx_queues,
        rx: RxQueueConfig {
            ring_size: 8,
            ..Default::default()
        },
        tx: TxQueueConfig {
            ring_size: 8,
            rs_thresh: 4,
            free_thresh: 4,
            ..Default::default()
        },
        rx_affinity: (1 << rx_queues) - 1,
        tx_affinity: (1 << tx_queues) - 1,
        timeouts: Timeouts::immediate(),
        ..Default::default()
    }
}

/// Walk the stack side of the handshake in step with the device. `probe`
/// runs once the device reports TX configured, before the stack answers.
pub fn spawn_peer<F>(handshake: Arc<Handshake>, probe: F) -> JoinHandle<()>
where
    F: FnOnce() + Send + 'static,
{
    thread::spawn(move || {
        let wait = Duration::from_secs(5);
        if handshake.nic.wait_at_least(StackState::TxConfigured, wait).is_none() {
            return;
        }
        probe();
        handshake.stack.set_state(StackState::TxConfigured);
        if handshake.nic.wait_at_least(StackState::RxConfigured, wait).is_none() {
            return;
        }
        handshake.stack.set_state(StackState::RxConfigured);
        if handshake.nic.wait_at_least(StackState::Ready, wait).is_some() {
            handshake.stack.set_state(StackState::Ready);
        }
    })
}

pub struct Harness {
    pub sim: Arc<SimNic>,
    pub pool: Arc<SlabPool>,
    pub handshake: Arc<Handshake>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_faults(SimFaults::default())
    }

    pub fn with_faults(faults: SimFaults) -> Self {
        Self {
            sim: Arc::new(SimNic::with_faults(faults)),
            pool: pool(),
            handshake: Arc::new(Handshake::new()),
        }
    }

    /// Bring up with a cooperating peer.
    pub fn bring_up(&self, config: DeviceConfig) -> Result<Device> {
        let peer = spawn_peer(self.handshake.clone(), || {});
        let dev = self.bring_up_alone(config);
        if dev.is_ok() {
            peer.join().unwrap();
        }
        dev
    }

    /// Bring up with nobody answering the handshake.
    pub fn bring_up_alone(&self, config: DeviceConfig) -> Result<Device> {
        Device::bring_up(
            self.sim.clone(),
            self.pool.clone(),
            config,
            self.handshake.clone(),
        )
    }
}

/// Counts deliveries and recycles every buffer.
#[derive(Default)]
pub struct CountingStack {
    pub packets: AtomicUsize,
    pub bytes: AtomicUsize,
}

impl CountingStack {
    pub fn packets(&self) -> usize {
        self.packets.load(Ordering::SeqCst)
    }
}

impl UpperStack for CountingStack {
    fn receive_packet(&self, _pkt: &PacketBuf, len: usize, _device: usize, _queue: u16) -> RxVerdict {
        self.packets.fetch_add(1, Ordering::SeqCst);
        self.bytes.fetch_add(len, Ordering::SeqCst);
        RxVerdict::Reuse
    }

    fn adopt(&self, _pkt: PacketBuf, _device: usize, _queue: u16) {
        unreachable!("counting stack never keeps buffers")
    }
}

/// Poll `cond` until it holds or `timeout` passes.
pub fn eventually(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(1));
    }
    cond()
}
