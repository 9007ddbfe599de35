//! TX send and reclaim engine.
//!
//! Two send paths, fixed per queue at configuration:
//!
//! - **Simple** ([`TxRing::send`]): one descriptor per packet, filled in
//!   groups of four. Reclaim ([`TxRing::tx_free_bufs`]) works in fixed
//!   batches of `rs_thresh` descriptors ending on a report-status boundary.
//! - **Full** ([`TxRing::multi_send`]): up to three segments per packet, an
//!   optional context descriptor for checksum offload, fragment chains posted
//!   all-or-nothing. Reclaim ([`TxRing::xmit_cleanup`]) frees up to the end
//!   of the packet that straddles the next boundary.
//!
//! # Report-status boundaries
//! The device only writes back `DD` on descriptors with `RS` set. Boundaries
//! sit at `rs_thresh - 1`, `2 * rs_thresh - 1`, ... and tile the ring
//! exactly. The send paths mark one descriptor per boundary crossed (the
//! boundary itself on the simple path, the last descriptor of the packet
//! holding it on the full path); the reclaim paths check the same boundary.
//!
//! ```text
//!   rs_thresh = 4, capacity = 8
//!   idx:   0  1  2  3  4  5  6  7
//!                   ^RS         ^RS
//!   next_dd = 3 -> 7 -> 3 ...
//! ```

use crate::desc::{
    Cursor, TxCmd, TxContextDesc, TxDesc, TXCTX_MACLEN_SHIFT, TXCTX_TUCMD_IPV4,
    TXCTX_TUCMD_L4T_TCP, TXCTX_TUCMD_L4T_UDP, TXD_OLINFO_CC, TXD_PAYLEN_SHIFT, TXD_POPTS_IXSM,
    TXD_POPTS_TXSM, TXD_STAT_DD,
};
use crate::error::{Error, Result};
use crate::mbuf::{ChecksumOffload, L4Proto, PacketBuf};
use crate::regs;
use crate::ring::TxRing;

/// Send path of a TX queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TxPath {
    #[default]
    Simple,
    Full,
}

/// Result of one [`TxRing::xmit_cleanup`] run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reclaim {
    /// The device has not finished the next batch. Try again later.
    Busy,
    /// Descriptors `from..=to` (wrapping) were reclaimed.
    Done { from: u16, to: u16, freed: u16 },
}

/// Per TX queue counters.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TxStats {
    pub packets: u64,
    pub bytes: u64,
    /// Reclaim runs that freed descriptors.
    pub reclaim_runs: u64,
    /// Reclaim attempts that found the device still busy.
    pub reclaim_busy: u64,
    pub descs_reclaimed: u64,
    pub segments_freed: u64,
    pub chains_released: u64,
    pub ctx_written: u64,
    pub ctx_reused: u64,
}

impl TxRing {
    fn ensure_path(&self, path: TxPath) -> Result<()> {
        if self.path != path {
            return Err(Error::WrongTxPath {
                queue: self.queue,
                configured: self.path,
            });
        }
        Ok(())
    }

    fn doorbell(&self) {
        self.ctx
            .io
            .publish_tail(regs::tdt(self.queue as u32), self.tail.get() as u32);
    }

    /// Clear the write-back status of a reclaimed descriptor so a stale `DD`
    /// is never mistaken for a new completion.
    fn reset_status(&mut self, idx: u16) {
        let mut d = self.table.read(idx);
        d.olinfo_status &= !TXD_STAT_DD;
        self.table.write(idx, d);
    }

    fn release_range(&mut self, from: u16, count: u16) -> Result<()> {
        let cursor = Cursor::new(from, self.capacity());
        for i in 0..count {
            self.release_entry(cursor.ahead(i))?;
        }
        Ok(())
    }

    /// Send through whichever path the queue was configured for.
    pub fn transmit(&mut self, pkts: &mut Vec<PacketBuf>) -> Result<usize> {
        match self.path {
            TxPath::Simple => self.send(pkts),
            TxPath::Full => self.multi_send(pkts),
        }
    }

    /// One reclaim run on the configured path. Returns descriptors freed.
    pub fn reclaim(&mut self) -> Result<u16> {
        match self.path {
            TxPath::Simple => self.tx_free_bufs(),
            TxPath::Full => match self.xmit_cleanup()? {
                Reclaim::Busy => Ok(0),
                Reclaim::Done { freed, .. } => Ok(freed),
            },
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // SIMPLE PATH
    // ═══════════════════════════════════════════════════════════════════════

    /// Post single-segment packets from the front of `pkts`.
    ///
    /// Accepted packets are removed from `pkts`; the rest stay for the
    /// caller to retry. Returns the number accepted.
    pub fn send(&mut self, pkts: &mut Vec<PacketBuf>) -> Result<usize> {
        self.ensure_enabled()?;
        self.ensure_path(TxPath::Simple)?;
        if pkts
            .iter()
            .any(|p| p.segment_count() > 1 || p.next().is_some() || p.offload().is_some())
        {
            return Err(Error::NeedsFullPath { queue: self.queue });
        }

        if self.free_count < self.free_thresh {
            self.tx_free_bufs()?;
        }
        let n = pkts.len().min(self.free_count as usize) as u16;
        if n == 0 {
            return Ok(0);
        }

        let base = self.tail;
        let mut idx = base;
        let mut groups = pkts[..n as usize].chunks_exact(4);
        for g in &mut groups {
            let descs = [
                simple_desc(&g[0]),
                simple_desc(&g[1]),
                simple_desc(&g[2]),
                simple_desc(&g[3]),
            ];
            for d in descs {
                self.table.write(idx.get(), d);
                idx.advance(1);
            }
        }
        for p in groups.remainder() {
            self.table.write(idx.get(), simple_desc(p));
            idx.advance(1);
        }

        // Mark every boundary this burst covers.
        while base.distance_to(self.next_rs) < n {
            let mut d = self.table.read(self.next_rs);
            d.set_rs();
            self.table.write(self.next_rs, d);
            self.next_rs = (self.next_rs + self.rs_thresh) % self.capacity();
        }

        for (k, pkt) in pkts.drain(..n as usize).enumerate() {
            let slot = base.ahead(k as u16);
            self.stats.bytes += pkt.len() as u64;
            let e = &mut self.sw[slot as usize];
            e.last_id = slot;
            e.pkt = Some(pkt);
        }
        self.stats.packets += n as u64;
        self.tail = idx;
        self.take_descs(n);
        self.doorbell();
        Ok(n as usize)
    }

    /// Reclaim one batch of `rs_thresh` descriptors if the device has
    /// finished it.
    ///
    /// Returns descriptors freed; 0 means the device is still busy, which is
    /// not an error.
    pub fn tx_free_bufs(&mut self) -> Result<u16> {
        self.ensure_path(TxPath::Simple)?;
        let thresh = self.rs_thresh;
        if self.used_count < thresh || !self.table.read(self.next_dd).is_done() {
            self.stats.reclaim_busy += 1;
            return Ok(0);
        }

        let first = self.next_dd + 1 - thresh;
        self.release_range(first, thresh)?;
        self.reset_status(self.next_dd);

        self.last_cleaned = self.next_dd;
        self.next_dd = (self.next_dd + thresh) % self.capacity();
        self.credit_descs(thresh)?;
        self.stats.reclaim_runs += 1;
        self.stats.descs_reclaimed += thresh as u64;
        log::trace!(
            "[ixgbe dev{} txq{}] freed {}..={}, {} free",
            self.ctx.device,
            self.queue,
            first,
            self.last_cleaned,
            self.free_count
        );
        Ok(thresh)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // FULL PATH
    // ═══════════════════════════════════════════════════════════════════════

    /// Descriptors a packet chain needs, given the context cache state
    /// before it. Updates `cache` as posting would.
    fn descs_needed(pkt: &PacketBuf, cache: &mut Option<ChecksumOffload>) -> usize {
        let mut n = 0;
        let mut cur = Some(pkt);
        while let Some(p) = cur {
            if let Some(off) = p.offload() {
                if *cache != Some(*off) {
                    *cache = Some(*off);
                    n += 1;
                }
            }
            n += p.segment_count();
            cur = p.next();
        }
        n
    }

    /// Post multi-segment packets and fragment chains from the front of
    /// `pkts`.
    ///
    /// A chain is posted whole or not at all. When a chain does not fit,
    /// completed descriptors are reclaimed first; if the device is still
    /// busy the call stops and the rest of `pkts` is left for the caller.
    pub fn multi_send(&mut self, pkts: &mut Vec<PacketBuf>) -> Result<usize> {
        self.ensure_enabled()?;
        self.ensure_path(TxPath::Full)?;

        let max = self.capacity() as usize - 1;
        let mut cache = self.ctx_cache;
        let mut needs = Vec::with_capacity(pkts.len());
        for p in pkts.iter() {
            let n = Self::descs_needed(p, &mut cache);
            if n > max {
                return Err(Error::PacketTooLarge { needed: n, max });
            }
            needs.push(n as u16);
        }

        let mut reserved: u16 = 0;
        let mut accepted = 0;
        'fit: for &n in &needs {
            while reserved + n > self.free_count {
                if self.xmit_cleanup()? == Reclaim::Busy {
                    break 'fit;
                }
            }
            reserved += n;
            accepted += 1;
        }
        if accepted == 0 {
            return Ok(0);
        }

        for head in pkts.drain(..accepted) {
            let mut cur = Some(head);
            while let Some(mut frag) = cur {
                cur = frag.take_next();
                self.post_one(frag);
            }
        }
        self.doorbell();
        Ok(accepted)
    }

    /// Write one packet (context descriptor if needed, then its segments).
    fn post_one(&mut self, pkt: PacketBuf) {
        let first = self.tail;
        let payload = pkt.total_len();
        let mut olinfo = payload << TXD_PAYLEN_SHIFT;
        let mut descs: [Option<TxDesc>; 4] = [None; 4];
        let mut n = 0;

        if let Some(off) = pkt.offload().copied() {
            if self.ctx_cache != Some(off) {
                descs[n] = Some(context_desc(&off).into_slot());
                n += 1;
                self.ctx_cache = Some(off);
                self.stats.ctx_written += 1;
            } else {
                self.stats.ctx_reused += 1;
            }
            olinfo |= TXD_OLINFO_CC;
            if off.ipv4 {
                olinfo |= TXD_POPTS_IXSM;
            }
            if off.l4 != L4Proto::None {
                olinfo |= TXD_POPTS_TXSM;
            }
        }

        let segs = pkt.segment_count();
        for (i, seg) in pkt.segments().enumerate() {
            let cmd = if i + 1 == segs { TxCmd::EOP } else { TxCmd::empty() };
            descs[n] = Some(TxDesc::data(seg.phys(), seg.len(), cmd, olinfo));
            n += 1;
        }

        let total = n as u16;
        let last = first.ahead(total - 1);
        let rs = first.distance_to(self.next_rs) < total;
        for (k, d) in descs.into_iter().flatten().enumerate() {
            let idx = first.ahead(k as u16);
            let mut d = d;
            if rs && idx == last {
                d.set_rs();
            }
            self.table.write(idx, d);
            self.sw[idx as usize].last_id = last;
        }
        if rs {
            self.next_rs = (self.next_rs + self.rs_thresh) % self.capacity();
        }

        self.stats.packets += 1;
        self.stats.bytes += payload as u64;
        self.sw[last as usize].pkt = Some(pkt);
        self.tail.advance(total);
        self.take_descs(total);
    }

    /// Reclaim through the end of the packet holding the next report-status
    /// boundary.
    ///
    /// Soft-fails with [`Reclaim::Busy`] when that boundary has not been
    /// posted or the device has not written it back. Calling again without
    /// new completions is a no-op.
    pub fn xmit_cleanup(&mut self) -> Result<Reclaim> {
        self.ensure_path(TxPath::Full)?;
        let cap = self.capacity();
        let first = Cursor::new(self.last_cleaned + 1, cap);
        let sentinel = self.next_dd;

        if first.distance_to(sentinel) >= self.used_count {
            self.stats.reclaim_busy += 1;
            return Ok(Reclaim::Busy);
        }
        let last = self.sw[sentinel as usize].last_id;
        if !self.table.read(last).is_done() {
            self.stats.reclaim_busy += 1;
            return Ok(Reclaim::Busy);
        }

        let freed = first.distance_to(last) + 1;
        if freed > self.used_count {
            debug_assert!(false, "reclaim of {freed} exceeds {} used", self.used_count);
            return Err(Error::Invariant("tx reclaim beyond posted descriptors"));
        }

        // Wrapped ranges are walked as two runs: first..cap, then 0..=last.
        let from = first.get();
        if from <= last {
            self.release_range(from, freed)?;
        } else {
            self.release_range(from, cap - from)?;
            self.release_range(0, last + 1)?;
        }
        self.reset_status(last);

        self.last_cleaned = last;
        self.next_dd = (sentinel + self.rs_thresh) % cap;
        self.credit_descs(freed)?;
        self.stats.reclaim_runs += 1;
        self.stats.descs_reclaimed += freed as u64;
        Ok(Reclaim::Done {
            from,
            to: last,
            freed,
        })
    }
}

fn simple_desc(pkt: &PacketBuf) -> TxDesc {
    let len = pkt.len();
    TxDesc::data(pkt.phys(), len, TxCmd::EOP, len << TXD_PAYLEN_SHIFT)
}

fn context_desc(off: &ChecksumOffload) -> TxContextDesc {
    let mut tucmd = (TxCmd::DTYP_CTXT | TxCmd::DEXT).bits();
    if off.ipv4 {
        tucmd |= TXCTX_TUCMD_IPV4;
    }
    tucmd |= match off.l4 {
        L4Proto::Tcp => TXCTX_TUCMD_L4T_TCP,
        L4Proto::Udp | L4Proto::None => TXCTX_TUCMD_L4T_UDP,
    };
    TxContextDesc {
        vlan_macip_lens: (off.l2_len as u32) << TXCTX_MACLEN_SHIFT | off.l3_len as u32,
        seqnum_seed: 0,
        type_tucmd_mlhl: tucmd,
        mss_l4len_idx: 0,
    }
}

#[cfg(test)]
mod tests {
    use dma_pool::{BufferKind, DmaAllocator};
    use proptest::prelude::*;

    use super::*;
    use crate::mbuf::{Segment, SegmentOwner, SharedRef};
    use crate::ring::testutil::{tx_cfg, Rig};
    use crate::sim;

    fn ring(rig: &Rig, path: TxPath) -> TxRing {
        TxRing::configure(rig.ctx(), &tx_cfg(path), 0, 0).unwrap()
    }

    /// Packet of `segs` segments, 100 bytes each.
    fn pkt(rig: &Rig, segs: usize) -> PacketBuf {
        let mut p = PacketBuf::alloc(&*rig.pool, 0, 0).unwrap();
        p.set_len(100);
        for _ in 1..segs {
            let c = rig.pool.alloc(BufferKind::Packet, 0, 0).unwrap();
            let mut s = Segment::from_chunk(c, SegmentOwner::Driver(BufferKind::Packet));
            s.set_len(100);
            p.push_segment(s).unwrap();
        }
        p
    }

    fn pkts(rig: &Rig, n: usize, segs: usize) -> Vec<PacketBuf> {
        (0..n).map(|_| pkt(rig, segs)).collect()
    }

    fn release_all(rig: &Rig, pkts: Vec<PacketBuf>) {
        for p in pkts {
            p.release(&*rig.pool, 0).unwrap();
        }
    }

    // ─── simple path ───

    #[test]
    fn test_batch_of_four_reclaimed() {
        let rig = Rig::new();
        let mut ring = ring(&rig, TxPath::Simple);
        let mut batch = pkts(&rig, 4, 1);

        assert_eq!(ring.send(&mut batch).unwrap(), 4);
        assert!(batch.is_empty());
        assert_eq!(ring.free_count(), 3);
        assert_eq!(rig.sim.reg(regs::tdt(0)), 4);
        assert!(ring.table.read(3).cmd().contains(TxCmd::RS));
        assert!(!ring.table.read(2).cmd().contains(TxCmd::RS));

        // Not written back yet.
        assert_eq!(ring.tx_free_bufs().unwrap(), 0);

        assert_eq!(sim::complete_tx(&mut ring), 1);
        assert_eq!(ring.tx_free_bufs().unwrap(), 4);
        assert_eq!(ring.free_count(), 7);
        assert_eq!(ring.last_cleaned(), 3);
        assert_eq!(rig.packets_free(), 64);
        ring.check_accounting().unwrap();
    }

    #[test]
    fn test_partial_batch_waits() {
        let rig = Rig::new();
        let mut ring = ring(&rig, TxPath::Simple);

        ring.send(&mut pkts(&rig, 2, 1)).unwrap();
        assert_eq!(sim::complete_tx(&mut ring), 0);
        assert_eq!(ring.tx_free_bufs().unwrap(), 0);

        ring.send(&mut pkts(&rig, 2, 1)).unwrap();
        sim::complete_tx(&mut ring);
        assert_eq!(ring.tx_free_bufs().unwrap(), 4);
        assert_eq!(ring.stats().reclaim_busy, 1);
    }

    #[test]
    fn test_send_stops_at_free_count() {
        let rig = Rig::new();
        let mut ring = ring(&rig, TxPath::Simple);
        let mut batch = pkts(&rig, 10, 1);

        assert_eq!(ring.send(&mut batch).unwrap(), 7);
        assert_eq!(batch.len(), 3);
        assert_eq!(ring.free_count(), 0);

        sim::complete_tx(&mut ring);
        assert_eq!(ring.tx_free_bufs().unwrap(), 4);

        assert_eq!(ring.send(&mut batch).unwrap(), 3);
        assert_eq!(ring.tail(), 2);
        // The burst covered slot 7, which now asks for status.
        assert!(ring.table.read(7).cmd().contains(TxCmd::RS));

        sim::complete_tx(&mut ring);
        assert_eq!(ring.tx_free_bufs().unwrap(), 4);
        assert_eq!(ring.used_count(), 2);
        assert_eq!(ring.last_cleaned(), 7);
        ring.check_accounting().unwrap();
    }

    #[test]
    fn test_many_laps() {
        let rig = Rig::new();
        let mut ring = ring(&rig, TxPath::Simple);
        for _ in 0..10 {
            assert_eq!(ring.send(&mut pkts(&rig, 4, 1)).unwrap(), 4);
            sim::complete_tx(&mut ring);
            assert_eq!(ring.tx_free_bufs().unwrap(), 4);
            ring.check_accounting().unwrap();
        }
        assert_eq!(ring.stats().packets, 40);
        assert_eq!(ring.stats().descs_reclaimed, 40);
        assert_eq!(rig.packets_free(), 64);
    }

    #[test]
    fn test_simple_path_rejects_segmented() {
        let rig = Rig::new();
        let mut ring = ring(&rig, TxPath::Simple);

        let mut batch = vec![pkt(&rig, 1), pkt(&rig, 2)];
        let err = ring.send(&mut batch).unwrap_err();
        assert!(matches!(err, Error::NeedsFullPath { queue: 0 }));
        assert_eq!(batch.len(), 2);
        assert_eq!(ring.used_count(), 0);

        let mut offloaded = vec![pkt(&rig, 1).with_offload(ChecksumOffload::udp4())];
        assert!(ring.send(&mut offloaded).is_err());

        release_all(&rig, batch);
        release_all(&rig, offloaded);
    }

    #[test]
    fn test_path_is_fixed() {
        let rig = Rig::new();
        let mut simple = ring(&rig, TxPath::Simple);
        assert!(matches!(
            simple.xmit_cleanup(),
            Err(Error::WrongTxPath { configured: TxPath::Simple, .. })
        ));
        let mut batch = pkts(&rig, 1, 1);
        assert!(simple.multi_send(&mut batch).is_err());
        release_all(&rig, batch);
    }

    // ─── full path ───

    #[test]
    fn test_wrapped_reclaim() {
        let rig = Rig::new();
        let mut ring = TxRing::configure(rig.ctx(), &tx_cfg(TxPath::Full), 0, 0).unwrap();

        // Two 3-segment packets: slots 0..=5, status on 5.
        assert_eq!(ring.multi_send(&mut pkts(&rig, 2, 3)).unwrap(), 2);
        assert!(ring.table.read(5).cmd().contains(TxCmd::RS));
        sim::complete_tx(&mut ring);
        assert_eq!(
            ring.xmit_cleanup().unwrap(),
            Reclaim::Done {
                from: 0,
                to: 5,
                freed: 6
            }
        );

        // One single, one 3-segment packet: slots 6, 7, 0, 1; status on 1.
        let mut batch = vec![pkt(&rig, 1), pkt(&rig, 3)];
        assert_eq!(ring.multi_send(&mut batch).unwrap(), 2);
        assert!(ring.table.read(1).cmd().contains(TxCmd::RS));
        assert_eq!(ring.xmit_cleanup().unwrap(), Reclaim::Busy);

        sim::complete_tx(&mut ring);
        assert_eq!(
            ring.xmit_cleanup().unwrap(),
            Reclaim::Done {
                from: 6,
                to: 1,
                freed: 4
            }
        );
        assert_eq!(ring.xmit_cleanup().unwrap(), Reclaim::Busy);

        assert_eq!(ring.stats().segments_freed, 10);
        assert_eq!(ring.free_count(), 7);
        assert_eq!(rig.packets_free(), 64);
        ring.check_accounting().unwrap();
    }

    #[test]
    fn test_cleanup_is_idempotent() {
        let rig = Rig::new();
        let mut ring = ring(&rig, TxPath::Full);
        ring.multi_send(&mut pkts(&rig, 4, 1)).unwrap();
        sim::complete_tx(&mut ring);

        assert!(matches!(ring.xmit_cleanup().unwrap(), Reclaim::Done { freed: 4, .. }));
        let before = (ring.free_count(), ring.last_cleaned(), ring.stats().segments_freed);
        assert_eq!(ring.xmit_cleanup().unwrap(), Reclaim::Busy);
        assert_eq!(ring.xmit_cleanup().unwrap(), Reclaim::Busy);
        let after = (ring.free_count(), ring.last_cleaned(), ring.stats().segments_freed);
        assert_eq!(before, after);
    }

    #[test]
    fn test_context_descriptor_cached() {
        let rig = Rig::new();
        let mut ring = ring(&rig, TxPath::Full);
        let mut batch: Vec<_> = (0..3)
            .map(|_| pkt(&rig, 1).with_offload(ChecksumOffload::udp4()))
            .collect();

        assert_eq!(ring.multi_send(&mut batch).unwrap(), 3);
        assert_eq!(ring.used_count(), 4);
        assert_eq!(ring.stats().ctx_written, 1);
        assert_eq!(ring.stats().ctx_reused, 2);

        let ctx = ring.table.read(0);
        assert!(ctx.cmd().contains(TxCmd::DTYP_CTXT));
        assert!(!ctx.cmd().contains(TxCmd::DTYP_DATA));
        assert_eq!(ctx.buffer_addr as u32, 14 << TXCTX_MACLEN_SHIFT | 20);
        let data = ring.table.read(1);
        assert!(data.cmd().contains(TxCmd::DTYP_DATA | TxCmd::EOP));
        assert_ne!(data.olinfo_status & TXD_OLINFO_CC, 0);
        assert_ne!(data.olinfo_status & TXD_POPTS_IXSM, 0);
        assert_ne!(data.olinfo_status & TXD_POPTS_TXSM, 0);
        assert_eq!(data.olinfo_status >> TXD_PAYLEN_SHIFT, 100);

        sim::complete_tx(&mut ring);
        ring.reclaim().unwrap();

        // A different offload needs a fresh context.
        ring.multi_send(&mut vec![pkt(&rig, 1).with_offload(ChecksumOffload::tcp4())])
            .unwrap();
        assert_eq!(ring.stats().ctx_written, 2);
    }

    #[test]
    fn test_chain_released_once() {
        let rig = Rig::new();
        let mut ring = ring(&rig, TxPath::Full);
        let refs = SharedRef::new(2);

        let mut head = pkt(&rig, 2).with_shared_ref(refs.clone());
        head.chain(pkt(&rig, 2).with_shared_ref(refs.clone()));
        assert_eq!(ring.multi_send(&mut vec![head]).unwrap(), 1);
        assert_eq!(refs.count(), 2);

        sim::complete_tx(&mut ring);
        assert!(matches!(ring.xmit_cleanup().unwrap(), Reclaim::Done { freed: 4, .. }));
        assert!(refs.is_released());
        assert_eq!(ring.stats().chains_released, 1);
        assert_eq!(ring.stats().segments_freed, 4);
        assert_eq!(rig.packets_free(), 64);
    }

    #[test]
    fn test_chain_is_all_or_nothing() {
        let rig = Rig::new();
        let mut ring = ring(&rig, TxPath::Full);
        ring.multi_send(&mut pkts(&rig, 2, 3)).unwrap();
        assert_eq!(ring.free_count(), 1);

        let mut head = pkt(&rig, 1);
        head.chain(pkt(&rig, 1));
        let mut batch = vec![head];
        // Device still busy: nothing posted, chain left for a retry.
        assert_eq!(ring.multi_send(&mut batch).unwrap(), 0);
        assert_eq!(batch.len(), 1);
        assert_eq!(ring.used_count(), 6);

        sim::complete_tx(&mut ring);
        assert_eq!(ring.multi_send(&mut batch).unwrap(), 1);
        assert_eq!(ring.used_count(), 2);
        ring.check_accounting().unwrap();
    }

    #[test]
    fn test_oversized_chain_rejected() {
        let rig = Rig::new();
        let mut ring = ring(&rig, TxPath::Full);
        let mut head = pkt(&rig, 3);
        head.chain(pkt(&rig, 3));
        head.chain(pkt(&rig, 3));
        let mut batch = vec![head];

        let err = ring.multi_send(&mut batch).unwrap_err();
        assert!(matches!(err, Error::PacketTooLarge { needed: 9, max: 7 }));
        assert_eq!(batch.len(), 1);
        assert_eq!(ring.used_count(), 0);
        release_all(&rig, batch);
    }

    #[test]
    fn test_transmit_dispatches_on_path() {
        let rig = Rig::new();
        let mut full = ring(&rig, TxPath::Full);
        assert_eq!(full.transmit(&mut pkts(&rig, 2, 2)).unwrap(), 2);
        assert_eq!(full.reclaim().unwrap(), 0);
        sim::complete_tx(&mut full);
        assert_eq!(full.reclaim().unwrap(), 4);
    }

    #[test]
    fn test_drop_releases_in_flight() {
        let rig = Rig::new();
        let mut ring = ring(&rig, TxPath::Full);
        ring.multi_send(&mut pkts(&rig, 2, 3)).unwrap();
        drop(ring);
        assert_eq!(rig.packets_free(), 64);
        assert_eq!(rig.tables_free(), 4);
    }

    proptest! {
        #[test]
        fn accounting_survives_any_schedule(
            full in any::<bool>(),
            ops in prop::collection::vec((0u8..3, 1usize..6, 1usize..4), 1..60),
        ) {
            let rig = Rig::new();
            let path = if full { TxPath::Full } else { TxPath::Simple };
            let mut ring = ring(&rig, path);

            for (op, n, segs) in ops {
                match op {
                    0 => {
                        let segs = if full { segs } else { 1 };
                        let mut batch = pkts(&rig, n, segs);
                        ring.transmit(&mut batch).unwrap();
                        release_all(&rig, batch);
                    }
                    1 => {
                        sim::complete_tx(&mut ring);
                    }
                    _ => {
                        ring.reclaim().unwrap();
                    }
                }
                prop_assert!(ring.check_accounting().is_ok());
            }

            drop(ring);
            prop_assert_eq!(rig.packets_free(), 64);
        }
    }
}
