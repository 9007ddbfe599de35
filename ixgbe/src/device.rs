//! Device controller: bring-up, teardown, identity and statistics.
//!
//! # Bring-up sequence
//! 1. Reset (interrupts masked first; a reset that never self-clears is fatal)
//! 2. Flush pending TX (loopback + buffer clear)
//! 3. Capabilities: EEPROM auto-read, DMA init done, MAC address, statistics
//!    cleared, CRC strip/insert, broadcast accept
//! 4. Packet buffer partitioning (flow director share carved out first)
//! 5. Security RX path paused; flow director and filters programmed; resumed
//! 6. TX DMA on, TX rings armed
//! 7. Handshake: announce TX configured, wait for the stack (bounded, fatal)
//! 8. RX rings armed, RX on, announce RX configured
//! 9. Interrupt routing: IVAR, GPIE MSI-X with auto-clear, EITR throttle
//! 10. Link: wait for it, log speed (down is not fatal)
//! 11. Queue interrupts unmasked
//! 12. Announce Ready
//!
//! # Reference
//! Intel 82599 10GbE Controller Datasheet, section 4.6 (Device
//! Initialization)

use std::sync::Arc;
use std::thread;

use dma_pool::DmaAllocator;

use crate::config::{DeviceConfig, FilterSpec, QueueBinding};
use crate::error::{Error, Result};
use crate::flow::FlowSteering;
use crate::mmio::RegisterIo;
use crate::regs;
use crate::ring::{RingCtx, RxRing, TxRing};
use crate::stack::{Handshake, StackState};

/// Negotiated link speed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkSpeed {
    Mb100,
    Gb1,
    Gb10,
}

/// Link state at the end of bring-up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LinkStatus {
    pub up: bool,
    pub speed: Option<LinkSpeed>,
}

/// Device counters, accumulated across clear-on-read reads.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DeviceStats {
    pub rx_packets: u64,
    pub tx_packets: u64,
    pub rx_bytes: u64,
    pub tx_bytes: u64,
    pub crc_errors: u64,
    /// Frames dropped for lack of packet buffer space.
    pub missed: u64,
    /// Frames dropped for lack of RX descriptors.
    pub rx_no_desc: u64,
}

/// One 82599 port, armed and running.
pub struct Device {
    ctx: RingCtx,
    config: DeviceConfig,
    handshake: Arc<Handshake>,
    mac: [u8; 6],
    link: LinkStatus,
    rx: Vec<RxRing>,
    tx: Vec<TxRing>,
    flow: FlowSteering,
    stats: DeviceStats,
    stopped: bool,
}

impl Device {
    /// Bring the device from reset to Ready.
    ///
    /// Any fatal error aborts bring-up; the partially built device is
    /// dropped, which returns every ring and buffer to the allocator.
    pub fn bring_up(
        io: Arc<dyn RegisterIo>,
        alloc: Arc<dyn DmaAllocator>,
        config: DeviceConfig,
        handshake: Arc<Handshake>,
    ) -> Result<Self> {
        config.validate()?;
        let ctx = RingCtx {
            io: io.clone(),
            alloc,
            device: config.device,
            timeouts: config.timeouts.clone(),
        };
        let mut dev = Self {
            flow: FlowSteering::new(io, config.device, config.timeouts.clone()),
            ctx,
            config,
            handshake,
            mac: [0; 6],
            link: LinkStatus::default(),
            rx: Vec::new(),
            tx: Vec::new(),
            stats: DeviceStats::default(),
            stopped: false,
        };

        log::info!("[ixgbe dev{}] bring-up", dev.ctx.device);
        dev.reset()?;
        dev.clear_pending_tx();
        dev.init_hw()?;
        dev.partition_packet_buffer();
        dev.setup_steering()?;
        dev.setup_tx()?;
        dev.wait_for_stack()?;
        dev.setup_rx()?;
        dev.setup_interrupts()?;
        dev.check_link();
        dev.enable_interrupts()?;
        dev.handshake.nic.set_state(StackState::Ready);

        log::info!(
            "[ixgbe dev{}] ready: {} rx / {} tx queues, mac {}",
            dev.ctx.device,
            dev.rx.len(),
            dev.tx.len(),
            fmt_mac(&dev.mac)
        );
        Ok(dev)
    }

    fn io(&self) -> &dyn RegisterIo {
        &*self.ctx.io
    }

    fn mask_interrupts(&self) {
        let io = self.io();
        io.write32(regs::EIMC, regs::EIMC_ALL);
        io.write32(regs::eimc_ex(0), u32::MAX);
        io.write32(regs::eimc_ex(1), u32::MAX);
        io.write_flush();
    }

    fn reset(&mut self) -> Result<()> {
        self.mask_interrupts();
        let io = self.io();
        io.set_bits(regs::CTRL, regs::CTRL_RST_MASK);
        io.write_flush();

        let t = &self.ctx.timeouts;
        if !io.poll_clear(regs::CTRL, regs::CTRL_RST_MASK, t.reset_retries, t.poll_delay) {
            log::error!("[ixgbe dev{}] reset timed out", self.ctx.device);
            return Err(Error::ResetTimeout {
                device: self.ctx.device,
            });
        }
        // Reset re-enables interrupt causes.
        self.mask_interrupts();
        self.io()
            .set_bits(regs::CTRL_EXT, regs::CTRL_EXT_DRV_LOAD | regs::CTRL_EXT_NS_DIS);
        log::debug!("[ixgbe dev{}] reset done", self.ctx.device);
        Ok(())
    }

    /// Drop anything the TX FIFO held from before the reset.
    fn clear_pending_tx(&self) {
        let io = self.io();
        let hlreg0 = io.read32(regs::HLREG0);
        io.write32(regs::HLREG0, hlreg0 | regs::HLREG0_LPBK);
        io.set_bits(regs::GCR_EXT, regs::GCR_EXT_BUFFERS_CLEAR);
        io.write_flush();
        if !self.ctx.timeouts.poll_delay.is_zero() {
            thread::sleep(self.ctx.timeouts.poll_delay);
        }
        io.clear_bits(regs::GCR_EXT, regs::GCR_EXT_BUFFERS_CLEAR);
        io.write32(regs::HLREG0, hlreg0);
        io.write_flush();
    }

    fn wait_bits(&self, offset: u32, bits: u32, step: &'static str) -> Result<()> {
        let t = &self.ctx.timeouts;
        if !self.io().poll_set(offset, bits, t.init_retries, t.poll_delay) {
            log::error!("[ixgbe dev{}] {} timed out", self.ctx.device, step);
            return Err(Error::InitTimeout {
                device: self.ctx.device,
                step,
            });
        }
        Ok(())
    }

    fn init_hw(&mut self) -> Result<()> {
        self.wait_bits(regs::EEC, regs::EEC_ARD, "EEPROM auto-read")?;
        self.wait_bits(regs::RDRXCTL, regs::RDRXCTL_DMAIDONE, "DMA init")?;

        let io = self.io();
        let ral = io.read32(regs::RAL0).to_le_bytes();
        let rah = io.read32(regs::RAH0).to_le_bytes();
        self.mac = [ral[0], ral[1], ral[2], ral[3], rah[0], rah[1]];

        // Discard whatever the counters held before reset.
        let _ = self.read_counters();

        let io = self.io();
        io.set_bits(regs::HLREG0, regs::HLREG0_TXCRCEN | regs::HLREG0_RXCRCSTRP);
        io.set_bits(regs::RDRXCTL, regs::RDRXCTL_CRCSTRIP);
        let mut fctrl = regs::FCTRL_BAM;
        if self.config.promiscuous {
            fctrl |= regs::FCTRL_MPE | regs::FCTRL_UPE;
        }
        io.set_bits(regs::FCTRL, fctrl);
        log::debug!("[ixgbe dev{}] mac {}", self.ctx.device, fmt_mac(&self.mac));
        Ok(())
    }

    /// Split RX/TX packet buffers evenly across traffic classes.
    fn partition_packet_buffer(&self) {
        let parts = self.config.pb_partitions as u32;
        let fdir_kb = self.config.fdir.map_or(0, |f| f.pballoc.kb());
        let rx_kb = (regs::RX_PB_SIZE_KB - fdir_kb) / parts;
        let tx_kb = regs::TX_PB_SIZE_KB / parts;

        let io = self.io();
        for tc in 0..8 {
            let (rx, tx, thresh) = if tc < parts {
                (rx_kb, tx_kb, tx_kb - regs::TX_PB_MAX_FRAME_KB)
            } else {
                (0, 0, 0)
            };
            io.write32(regs::rxpbsize(tc), rx << regs::RXPBSIZE_SHIFT);
            io.write32(regs::txpbsize(tc), tx << regs::TXPBSIZE_SHIFT);
            io.write32(regs::txpbthresh(tc), thresh);
        }
        log::debug!(
            "[ixgbe dev{}] packet buffer: {} x {} KB rx, {} x {} KB tx",
            self.ctx.device,
            parts,
            rx_kb,
            parts,
            tx_kb
        );
    }

    /// Program flow director and filters with the security RX path paused.
    fn setup_steering(&mut self) -> Result<()> {
        if self.config.fdir.is_none() && self.config.filters.is_empty() {
            return Ok(());
        }
        self.io().set_bits(regs::SECRXCTRL, regs::SECRXCTRL_RX_DIS);
        self.wait_bits(regs::SECRXSTAT, regs::SECRXSTAT_SECRX_RDY, "security RX drain")?;

        if let Some(fdir) = self.config.fdir {
            self.flow.init_fdir_perfect(&fdir)?;
        }
        for rule in &self.config.filters {
            match rule {
                FilterSpec::FiveTuple { index, filter } => {
                    self.flow.setup_flow_filter(*index, filter)?;
                }
                FilterSpec::Fdir { signature, queue } => {
                    self.flow.setup_fdir_filter(*signature, *queue)?;
                }
            }
        }

        self.io().clear_bits(regs::SECRXCTRL, regs::SECRXCTRL_RX_DIS);
        Ok(())
    }

    fn setup_tx(&mut self) -> Result<()> {
        let io = self.io();
        io.set_bits(regs::DMATXCTL, regs::DMATXCTL_TE);
        io.set_bits(regs::RTTDCS, regs::RTTDCS_ARBDIS);
        io.write32(regs::MTQC, 0);

        for b in self.config.tx_bindings()? {
            let ring = TxRing::configure(self.ctx.clone(), &self.config.tx, b.queue, b.core)?;
            self.tx.push(ring);
        }
        self.io().clear_bits(regs::RTTDCS, regs::RTTDCS_ARBDIS);
        Ok(())
    }

    fn wait_for_stack(&self) -> Result<()> {
        self.handshake.nic.set_state(StackState::TxConfigured);
        let wanted = StackState::TxConfigured;
        match self
            .handshake
            .stack
            .wait_at_least(wanted, self.ctx.timeouts.handshake)
        {
            Some(state) => {
                log::debug!("[ixgbe dev{}] stack is {:?}", self.ctx.device, state);
                Ok(())
            }
            None => {
                log::error!("[ixgbe dev{}] stack never reached {:?}", self.ctx.device, wanted);
                Err(Error::HandshakeTimeout {
                    device: self.ctx.device,
                    wanted,
                })
            }
        }
    }

    fn setup_rx(&mut self) -> Result<()> {
        for b in self.config.rx_bindings()? {
            let ring = RxRing::configure(self.ctx.clone(), &self.config.rx, b)?;
            self.rx.push(ring);
        }
        self.io().set_bits(regs::RXCTRL, regs::RXCTRL_RXEN);
        self.handshake.nic.set_state(StackState::RxConfigured);
        Ok(())
    }

    /// Route queue `queue` of `kind` (0 = RX, 1 = TX) to `vector`.
    fn set_ivar(&self, kind: u32, queue: u16, vector: u32) {
        let q = queue as u32;
        let reg = regs::ivar(q >> 1);
        let shift = 16 * (q & 1) + 8 * kind;
        let io = self.io();
        let mut ivar = io.read32(reg);
        ivar &= !(0xFF << shift);
        ivar |= (vector | regs::IVAR_ALLOC_VAL) << shift;
        io.write32(reg, ivar);
    }

    fn vector_mask(&self) -> u64 {
        self.rx
            .iter()
            .fold(0u64, |m, r| m | 1u64 << r.binding().vector)
    }

    fn setup_interrupts(&mut self) -> Result<()> {
        let bindings: Vec<QueueBinding> = self.rx.iter().map(RxRing::binding).collect();
        for b in &bindings {
            self.set_ivar(0, b.queue, b.vector);
        }
        // TX completions share the vector of the RX queue with the same index.
        for t in &self.tx {
            let b = bindings[t.queue() as usize % bindings.len()];
            self.set_ivar(1, t.queue(), b.vector);
        }

        let io = self.io();
        io.write32(
            regs::GPIE,
            regs::GPIE_MSIX_MODE | regs::GPIE_OCD | regs::GPIE_EIAME | regs::GPIE_PBA_SUPPORT,
        );
        let mask = self.vector_mask();
        io.write32(regs::EIAC, mask as u32);
        io.write32(regs::eiam_ex(0), mask as u32);
        io.write32(regs::eiam_ex(1), (mask >> 32) as u32);

        let itr = ((self.config.itr_us as u32 / 2) << regs::EITR_ITR_SHIFT) & regs::EITR_ITR_MASK;
        for b in &bindings {
            io.write32(regs::eitr(b.vector), itr | regs::EITR_CNT_WDIS);
        }
        Ok(())
    }

    fn check_link(&mut self) {
        let t = &self.ctx.timeouts;
        let io = self.io();
        let up = io.poll_set(regs::LINKS, regs::LINKS_UP, t.link_retries, t.poll_delay);
        let links = io.read32(regs::LINKS);
        let speed = match links & regs::LINKS_SPEED_MASK {
            regs::LINKS_SPEED_10G => Some(LinkSpeed::Gb10),
            regs::LINKS_SPEED_1G => Some(LinkSpeed::Gb1),
            regs::LINKS_SPEED_100M => Some(LinkSpeed::Mb100),
            _ => None,
        };
        self.link = LinkStatus {
            up,
            speed: if up { speed } else { None },
        };
        if up {
            log::info!("[ixgbe dev{}] link up, {:?}", self.ctx.device, speed);
        } else {
            log::warn!("[ixgbe dev{}] link down, continuing", self.ctx.device);
        }
    }

    fn enable_interrupts(&self) -> Result<()> {
        let mask = self.vector_mask();
        let io = self.io();
        io.write32(regs::eims_ex(0), mask as u32);
        io.write32(regs::eims_ex(1), (mask >> 32) as u32);
        io.write_flush();
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════
    // RUNTIME
    // ═══════════════════════════════════════════════════════════════════════

    pub fn device(&self) -> usize {
        self.ctx.device
    }

    pub fn mac(&self) -> [u8; 6] {
        self.mac
    }

    pub fn link(&self) -> LinkStatus {
        self.link
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    pub fn flow(&self) -> &FlowSteering {
        &self.flow
    }

    /// RX rings still held by the device.
    pub fn rx_rings_mut(&mut self) -> &mut [RxRing] {
        &mut self.rx
    }

    /// TX rings still held by the device.
    pub fn tx_rings_mut(&mut self) -> &mut [TxRing] {
        &mut self.tx
    }

    /// Hand the rings to the worker runtime. The device keeps filters,
    /// interrupts and statistics.
    pub fn split(&mut self) -> (Vec<RxRing>, Vec<TxRing>) {
        (std::mem::take(&mut self.rx), std::mem::take(&mut self.tx))
    }

    fn read_counters(&self) -> DeviceStats {
        let io = self.io();
        let wide = |lo: u32, hi: u32| io.read32(lo) as u64 | (io.read32(hi) as u64) << 32;
        DeviceStats {
            rx_packets: io.read32(regs::GPRC) as u64,
            tx_packets: io.read32(regs::GPTC) as u64,
            rx_bytes: wide(regs::GORCL, regs::GORCH),
            tx_bytes: wide(regs::GOTCL, regs::GOTCH),
            crc_errors: io.read32(regs::CRCERRS) as u64,
            missed: io.read32(regs::MPC0) as u64,
            rx_no_desc: io.read32(regs::RNBC0) as u64,
        }
    }

    /// Fold the hardware counters into the running totals and return them.
    pub fn stats(&mut self) -> &DeviceStats {
        let d = self.read_counters();
        let s = &mut self.stats;
        s.rx_packets += d.rx_packets;
        s.tx_packets += d.tx_packets;
        s.rx_bytes += d.rx_bytes;
        s.tx_bytes += d.tx_bytes;
        s.crc_errors += d.crc_errors;
        s.missed += d.missed;
        s.rx_no_desc += d.rx_no_desc;
        &self.stats
    }

    /// Stop traffic: disable the queues still held, turn RX off, mask
    /// interrupts. Best effort; never fails. Idempotent.
    pub fn shutdown(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        for r in &mut self.rx {
            r.disable();
        }
        for t in &mut self.tx {
            t.disable();
        }
        self.io().clear_bits(regs::RXCTRL, regs::RXCTRL_RXEN);
        self.mask_interrupts();
        self.io().clear_bits(regs::CTRL_EXT, regs::CTRL_EXT_DRV_LOAD);
        log::info!("[ixgbe dev{}] stopped", self.ctx.device);
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl core::fmt::Debug for Device {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Device")
            .field("device", &self.ctx.device)
            .field("mac", &fmt_mac(&self.mac))
            .field("link", &self.link)
            .field("rx", &self.rx)
            .field("tx", &self.tx)
            .finish_non_exhaustive()
    }
}

fn fmt_mac(mac: &[u8; 6]) -> String {
    format!(
        "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
        mac[0], mac[1], mac[2], mac[3], mac[4], mac[5]
    )
}
