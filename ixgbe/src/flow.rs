//! Flow steering: 5-tuple filters and flow director perfect match.
//!
//! Filters are programmed once during bring-up, while the security RX path
//! is paused. Each rule is write-once: re-programming the same rule is a
//! no-op in effect, installing a different rule over it is a conflict.
//!
//! # 5-tuple slot write order
//! ```text
//! FTQF = 0                      slot disabled while it is rewritten
//! SAQF, DAQF, SDPQF             addresses and ports
//! L34T_IMIR                     target queue
//! FTQF = proto|prio|mask|en     enabled last
//! ```

use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::sync::Arc;

use bitflags::bitflags;

use crate::config::Timeouts;
use crate::error::{ConfigError, Error, Result};
use crate::mmio::RegisterIo;
use crate::regs;

// ═══════════════════════════════════════════════════════════════════════════
// 5-TUPLE
// ═══════════════════════════════════════════════════════════════════════════

/// L4 protocol matched by a 5-tuple filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FilterProto {
    Tcp,
    Udp,
    /// Match any protocol.
    Any,
}

impl FilterProto {
    /// Priority class: more specific protocols win.
    pub const fn priority(self) -> u32 {
        match self {
            Self::Udp => 3,
            Self::Tcp => 2,
            Self::Any => 1,
        }
    }

    const fn ftqf_bits(self) -> u32 {
        match self {
            Self::Tcp | Self::Any => regs::FTQF_PROTOCOL_TCP,
            Self::Udp => regs::FTQF_PROTOCOL_UDP,
        }
    }
}

/// A 5-tuple steering rule. `None` fields are wildcards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FiveTupleFilter {
    pub src_ip: Option<Ipv4Addr>,
    pub dst_ip: Option<Ipv4Addr>,
    pub src_port: Option<u16>,
    pub dst_port: Option<u16>,
    pub proto: FilterProto,
    /// RX queue matching packets land on.
    pub queue: u16,
}

type TupleKey = (
    Option<Ipv4Addr>,
    Option<Ipv4Addr>,
    Option<u16>,
    Option<u16>,
    FilterProto,
);

impl FiveTupleFilter {
    fn key(&self) -> TupleKey {
        (self.src_ip, self.dst_ip, self.src_port, self.dst_port, self.proto)
    }

    /// FTQF value: protocol, priority, compare mask, pool mask, enable.
    fn ftqf(&self) -> u32 {
        // A set mask bit means "do not compare"; clear the bit of every
        // field that is specified.
        let mut mask = 0x1F;
        if self.src_ip.is_some() {
            mask &= regs::FTQF_SOURCE_ADDR_MASK;
        }
        if self.dst_ip.is_some() {
            mask &= regs::FTQF_DEST_ADDR_MASK;
        }
        if self.src_port.is_some() {
            mask &= regs::FTQF_SOURCE_PORT_MASK;
        }
        if self.dst_port.is_some() {
            mask &= regs::FTQF_DEST_PORT_MASK;
        }
        if self.proto != FilterProto::Any {
            mask &= regs::FTQF_PROTOCOL_COMP_MASK;
        }

        (self.proto.ftqf_bits() & regs::FTQF_PROTOCOL_MASK)
            | (self.proto.priority() & regs::FTQF_PRIORITY_MASK) << regs::FTQF_PRIORITY_SHIFT
            | mask << regs::FTQF_5TUPLE_MASK_SHIFT
            | regs::FTQF_POOL_MASK_EN
            | regs::FTQF_QUEUE_ENABLE
    }
}

/// Address as the device expects it: network byte order in the register.
fn ip_reg(ip: Option<Ipv4Addr>) -> u32 {
    ip.map_or(0, |ip| u32::from_le_bytes(ip.octets()))
}

/// Port in network byte order within the 16-bit field.
fn port_reg(port: Option<u16>) -> u32 {
    port.map_or(0, |p| u16::from_le_bytes(p.to_be_bytes()) as u32)
}

// ═══════════════════════════════════════════════════════════════════════════
// FLOW DIRECTOR
// ═══════════════════════════════════════════════════════════════════════════

bitflags! {
    /// FDIRM: input fields excluded from matching.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FdirMaskFields: u32 {
        const VLANID = 0x01;
        const VLANP = 0x02;
        const POOL = 0x04;
        const L4P = 0x08;
        const FLEX = 0x10;
        const DIPV6 = 0x20;
    }
}

/// Flow director register layout variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FdirVariant {
    /// 82599 / X540.
    #[default]
    Ixgbe82599,
    /// X550 family; has an SCTP port mask register.
    X550,
}

/// Packet buffer carved out for flow director tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FdirPballoc {
    #[default]
    K64,
    K128,
    K256,
}

impl FdirPballoc {
    const fn ctrl_bits(self) -> u32 {
        match self {
            Self::K64 => regs::FDIRCTRL_PBALLOC_64K,
            Self::K128 => regs::FDIRCTRL_PBALLOC_128K,
            Self::K256 => regs::FDIRCTRL_PBALLOC_256K,
        }
    }

    /// KB taken from the RX packet buffer.
    pub const fn kb(self) -> u32 {
        32 << self.ctrl_bits()
    }
}

/// Flow director perfect-match parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FdirConfig {
    pub pballoc: FdirPballoc,
    /// Byte offset of the 2-byte flex word from the start of the frame.
    pub flex_offset: u8,
    pub variant: FdirVariant,
}

impl FdirConfig {
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.flex_offset % 2 != 0 || self.flex_offset > 62 {
            return Err(ConfigError::FlexOffset(self.flex_offset));
        }
        Ok(())
    }
}

/// An installed flow director rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FdirFilter {
    /// Flex word value, as read big-endian from the frame.
    pub signature: u16,
    pub queue: u16,
    /// Software index programmed into FDIRHASH.
    pub sw_index: u16,
    /// Bucket hash.
    pub bucket: u16,
}

/// Flow type carried in FDIRCMD; perfect match on the flex word uses the
/// plain IPv4 type.
const FDIR_FLOW_TYPE_IPV4: u32 = 0x0;

/// ATR hash input, 11 dwords in wire byte order.
///
/// ```text
/// 0      vm_pool | flow_type | vlan_id
/// 1..=4  dst ip
/// 5..=8  src ip
/// 9      src port | dst port
/// 10     flex bytes | bucket hash
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
struct AtrInput([[u8; 4]; 11]);

impl AtrInput {
    fn flex(signature: u16) -> Self {
        let mut input = Self::default();
        let [a, b] = signature.to_be_bytes();
        input.0[10] = [a, b, 0, 0];
        input
    }

    /// Mask used for perfect match on the flex word only.
    fn flex_mask() -> Self {
        let mut mask = Self::default();
        mask.0[10] = [0xFF, 0xFF, 0, 0];
        mask
    }

    fn masked(mut self, mask: &Self) -> Self {
        for (w, m) in self.0.iter_mut().zip(mask.0.iter()) {
            for (b, mb) in w.iter_mut().zip(m.iter()) {
                *b &= mb;
            }
        }
        self
    }

    fn dword(&self, i: usize) -> u32 {
        u32::from_be_bytes(self.0[i])
    }
}

/// 13-bit ATR bucket hash used by perfect-match filters.
fn atr_bucket_hash(input: &AtrInput) -> u16 {
    let key = regs::ATR_BUCKET_HASH_KEY;
    let flow_vm_vlan = input.dword(0);

    let hi_dword = (1..11).fold(0u32, |acc, i| acc ^ input.dword(i));
    let mut lo = hi_dword.rotate_left(16);
    let hi = hi_dword ^ flow_vm_vlan ^ (flow_vm_vlan >> 16);

    let mut bucket = 0u32;
    let mut iterate = |n: u32, lo: u32, hi: u32| {
        if key & (1 << n) != 0 {
            bucket ^= lo >> n;
        }
        if key & (1 << (n + 16)) != 0 {
            bucket ^= hi >> n;
        }
    };

    iterate(0, lo, hi);
    // VLAN and pool bits join the low word only after bit 0.
    lo ^= flow_vm_vlan ^ (flow_vm_vlan << 16);
    for n in 1..16 {
        iterate(n, lo, hi);
    }
    (bucket & 0x1FFF) as u16
}

// ═══════════════════════════════════════════════════════════════════════════
// STEERING TABLE
// ═══════════════════════════════════════════════════════════════════════════

/// Per-device filter state and the registers behind it.
pub struct FlowSteering {
    io: Arc<dyn RegisterIo>,
    device: usize,
    timeouts: Timeouts,
    five_tuple: BTreeMap<u8, FiveTupleFilter>,
    fdir: BTreeMap<u16, FdirFilter>,
    fdir_cfg: Option<FdirConfig>,
    next_sw_index: u16,
}

impl FlowSteering {
    pub fn new(io: Arc<dyn RegisterIo>, device: usize, timeouts: Timeouts) -> Self {
        Self {
            io,
            device,
            timeouts,
            five_tuple: BTreeMap::new(),
            fdir: BTreeMap::new(),
            fdir_cfg: None,
            next_sw_index: 0,
        }
    }

    /// Install a 5-tuple filter in slot `index`.
    pub fn setup_flow_filter(&mut self, index: u8, filter: &FiveTupleFilter) -> Result<()> {
        if index as u32 >= regs::MAX_FTQF_FILTERS {
            return Err(Error::InvalidFilter("5-tuple index out of range"));
        }
        if filter.queue as u32 >= regs::MAX_QUEUES {
            return Err(Error::InvalidFilter("target queue out of range"));
        }
        if let Some(existing) = self.five_tuple.get(&index) {
            if existing != filter {
                return Err(Error::FilterConflict("5-tuple slot already holds another rule"));
            }
        }
        if self
            .five_tuple
            .iter()
            .any(|(i, f)| *i != index && f.key() == filter.key())
        {
            return Err(Error::FilterConflict("same 5-tuple installed in another slot"));
        }

        let i = index as u32;
        let io = &*self.io;
        io.write32(regs::ftqf(i), 0);
        io.write32(regs::saqf(i), ip_reg(filter.src_ip));
        io.write32(regs::daqf(i), ip_reg(filter.dst_ip));
        io.write32(
            regs::sdpqf(i),
            port_reg(filter.dst_port) << regs::SDPQF_DSTPORT_SHIFT | port_reg(filter.src_port),
        );
        io.write32(
            regs::l34t_imir(i),
            regs::L34T_IMIR_RESERVE
                | (filter.queue as u32) << regs::L34T_IMIR_QUEUE_SHIFT
                | regs::L34T_IMIR_SIZE_BP,
        );
        io.write32(regs::ftqf(i), filter.ftqf());

        log::debug!(
            "[ixgbe dev{}] 5-tuple {}: {:?} -> rxq{}",
            self.device,
            index,
            filter.key(),
            filter.queue
        );
        self.five_tuple.insert(index, *filter);
        Ok(())
    }

    /// Put the flow director in perfect-match mode on the flex word.
    pub fn init_fdir_perfect(&mut self, cfg: &FdirConfig) -> Result<()> {
        cfg.validate()?;
        let io = &*self.io;

        io.write32(regs::FDIRHKEY, regs::ATR_BUCKET_HASH_KEY);
        io.write32(regs::FDIRSKEY, regs::ATR_SIGNATURE_HASH_KEY);

        let fdirm = FdirMaskFields::all() - FdirMaskFields::FLEX;
        io.write32(regs::FDIRM, fdirm.bits());
        for reg in [
            regs::FDIRSIP4M,
            regs::FDIRDIP4M,
            regs::FDIRTCPM,
            regs::FDIRUDPM,
            regs::FDIRIP6M,
        ] {
            io.write32(reg, u32::MAX);
        }
        if cfg.variant == FdirVariant::X550 {
            io.write32(regs::FDIRSCTPM, u32::MAX);
        }

        let fdirctrl = cfg.pballoc.ctrl_bits()
            | regs::FDIRCTRL_PERFECT_MATCH
            | regs::FDIRCTRL_REPORT_STATUS
            | (cfg.flex_offset as u32 / 2) << regs::FDIRCTRL_FLEX_SHIFT
            | 0xA << regs::FDIRCTRL_MAX_LENGTH_SHIFT
            | 4 << regs::FDIRCTRL_FULL_THRESH_SHIFT;
        io.write32(regs::FDIRCTRL, fdirctrl);
        io.write_flush();

        let t = &self.timeouts;
        if !io.poll_set(
            regs::FDIRCTRL,
            regs::FDIRCTRL_INIT_DONE,
            t.fdir_init_retries,
            t.poll_delay,
        ) {
            log::error!("[ixgbe dev{}] flow director init timed out", self.device);
            return Err(Error::FdirInitTimeout {
                device: self.device,
            });
        }
        log::info!(
            "[ixgbe dev{}] flow director perfect match, flex offset {}, {} KB",
            self.device,
            cfg.flex_offset,
            cfg.pballoc.kb()
        );
        self.fdir_cfg = Some(*cfg);
        Ok(())
    }

    /// Steer frames whose flex word equals `signature` to `queue`.
    ///
    /// Returns the software index of the rule.
    pub fn setup_fdir_filter(&mut self, signature: u16, queue: u16) -> Result<u16> {
        if self.fdir_cfg.is_none() {
            return Err(Error::InvalidFilter("flow director not initialized"));
        }
        if queue as u32 >= regs::MAX_QUEUES {
            return Err(Error::InvalidFilter("target queue out of range"));
        }
        let sw_index = match self.fdir.get(&signature) {
            Some(f) if f.queue != queue => {
                return Err(Error::FilterConflict("signature already steered elsewhere"));
            }
            Some(f) => f.sw_index,
            None => {
                let i = self.next_sw_index;
                self.next_sw_index = self.next_sw_index.wrapping_add(1);
                i
            }
        };

        let input = AtrInput::flex(signature).masked(&AtrInput::flex_mask());
        let bucket = atr_bucket_hash(&input);

        let io = &*self.io;
        io.write32(regs::FDIRIPSA, 0);
        io.write32(regs::FDIRIPDA, 0);
        io.write32(regs::FDIRPORT, 0);
        io.write32(regs::FDIRVLAN, (signature as u32) << regs::FDIRVLAN_FLEX_SHIFT);
        io.write32(
            regs::FDIRHASH,
            bucket as u32
                | 1 << regs::FDIRHASH_BUCKET_VALID_SHIFT
                | (sw_index as u32) << regs::FDIRHASH_SIG_SW_INDEX_SHIFT,
        );
        io.write_flush();

        io.write32(
            regs::FDIRCMD,
            regs::FDIRCMD_CMD_ADD_FLOW
                | regs::FDIRCMD_FILTER_UPDATE
                | regs::FDIRCMD_LAST
                | regs::FDIRCMD_QUEUE_EN
                | FDIR_FLOW_TYPE_IPV4 << regs::FDIRCMD_FLOW_TYPE_SHIFT
                | (queue as u32) << regs::FDIRCMD_RX_QUEUE_SHIFT,
        );

        let t = &self.timeouts;
        if !io.poll_clear(
            regs::FDIRCMD,
            regs::FDIRCMD_CMD_MASK,
            t.fdir_cmd_retries,
            t.poll_delay,
        ) {
            return Err(Error::FdirCommandTimeout {
                device: self.device,
                fdircmd: io.read32(regs::FDIRCMD),
            });
        }

        log::debug!(
            "[ixgbe dev{}] fdir {:#06x} -> rxq{} (bucket {:#x}, index {})",
            self.device,
            signature,
            queue,
            bucket,
            sw_index
        );
        self.fdir.insert(
            signature,
            FdirFilter {
                signature,
                queue,
                sw_index,
                bucket,
            },
        );
        Ok(sw_index)
    }

    /// Installed 5-tuple rules by slot.
    pub fn five_tuple_filters(&self) -> impl Iterator<Item = (u8, &FiveTupleFilter)> {
        self.five_tuple.iter().map(|(i, f)| (*i, f))
    }

    /// Installed flow director rules by signature.
    pub fn fdir_filters(&self) -> impl Iterator<Item = &FdirFilter> {
        self.fdir.values()
    }

    /// Flow director configuration, once initialized.
    pub fn fdir_config(&self) -> Option<&FdirConfig> {
        self.fdir_cfg.as_ref()
    }
}

impl core::fmt::Debug for FlowSteering {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("FlowSteering")
            .field("device", &self.device)
            .field("five_tuple", &self.five_tuple)
            .field("fdir", &self.fdir)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{SimFaults, SimNic};

    fn steering(sim: &Arc<SimNic>) -> FlowSteering {
        FlowSteering::new(sim.clone(), 0, Timeouts::immediate())
    }

    fn udp_rule(queue: u16) -> FiveTupleFilter {
        FiveTupleFilter {
            src_ip: None,
            dst_ip: Some(Ipv4Addr::new(10, 0, 0, 1)),
            src_port: None,
            dst_port: Some(11211),
            proto: FilterProto::Udp,
            queue,
        }
    }

    #[test]
    fn test_five_tuple_registers() {
        let sim = Arc::new(SimNic::new());
        let mut fs = steering(&sim);
        fs.setup_flow_filter(3, &udp_rule(2)).unwrap();

        assert_eq!(sim.reg(regs::saqf(3)), 0);
        assert_eq!(sim.reg(regs::daqf(3)), u32::from_le_bytes([10, 0, 0, 1]));
        assert_eq!(
            sim.reg(regs::sdpqf(3)),
            (u16::from_le_bytes(11211u16.to_be_bytes()) as u32) << 16
        );
        assert_eq!(
            sim.reg(regs::l34t_imir(3)),
            regs::L34T_IMIR_RESERVE | 2 << 21 | regs::L34T_IMIR_SIZE_BP
        );

        let ftqf = sim.reg(regs::ftqf(3));
        assert_eq!(ftqf & 0x3, regs::FTQF_PROTOCOL_UDP);
        assert_eq!(ftqf >> 2 & 0x7, 3);
        // Source address and source port are don't-care.
        assert_eq!(ftqf >> 25 & 0x1F, 0x1F & 0x1D & 0x17 & 0x0F);
        assert_ne!(ftqf & regs::FTQF_QUEUE_ENABLE, 0);
        assert_ne!(ftqf & regs::FTQF_POOL_MASK_EN, 0);
    }

    #[test]
    fn test_five_tuple_enable_written_last() {
        let sim = Arc::new(SimNic::new());
        let mut fs = steering(&sim);
        fs.setup_flow_filter(0, &udp_rule(1)).unwrap();

        let writes = sim.writes();
        let slot: Vec<u32> = writes
            .iter()
            .map(|(off, _)| *off)
            .filter(|off| (0xE000..0xEA00).contains(off))
            .collect();
        assert_eq!(slot.first(), Some(&regs::ftqf(0)));
        assert_eq!(slot.last(), Some(&regs::ftqf(0)));
        assert_eq!(writes.iter().find(|(o, _)| *o == regs::ftqf(0)).unwrap().1, 0);
    }

    #[test]
    fn test_five_tuple_deterministic() {
        let a = Arc::new(SimNic::new());
        let b = Arc::new(SimNic::new());
        for sim in [&a, &b] {
            let mut fs = steering(sim);
            fs.setup_flow_filter(0, &udp_rule(1)).unwrap();
            fs.setup_flow_filter(
                1,
                &FiveTupleFilter {
                    src_ip: Some(Ipv4Addr::new(192, 168, 1, 9)),
                    dst_ip: None,
                    src_port: Some(4000),
                    dst_port: None,
                    proto: FilterProto::Tcp,
                    queue: 0,
                },
            )
            .unwrap();
        }
        assert_eq!(a.snapshot(0xE000..0xEA00), b.snapshot(0xE000..0xEA00));
    }

    #[test]
    fn test_five_tuple_conflicts() {
        let sim = Arc::new(SimNic::new());
        let mut fs = steering(&sim);
        fs.setup_flow_filter(0, &udp_rule(1)).unwrap();
        // Same rule, same slot: fine.
        fs.setup_flow_filter(0, &udp_rule(1)).unwrap();
        assert!(matches!(
            fs.setup_flow_filter(0, &udp_rule(2)),
            Err(Error::FilterConflict(_))
        ));
        assert!(matches!(
            fs.setup_flow_filter(5, &udp_rule(2)),
            Err(Error::FilterConflict(_))
        ));
        assert_eq!(fs.five_tuple_filters().count(), 1);
    }

    #[test]
    fn test_wildcard_priority() {
        let f = FiveTupleFilter {
            src_ip: None,
            dst_ip: None,
            src_port: None,
            dst_port: Some(80),
            proto: FilterProto::Any,
            queue: 0,
        };
        let ftqf = f.ftqf();
        assert_eq!(ftqf >> 2 & 0x7, 1);
        // Protocol stays masked.
        assert_eq!(ftqf >> 25 & 0x1F, 0x17);
    }

    #[test]
    fn test_fdir_init_programs_masks() {
        let sim = Arc::new(SimNic::new());
        let mut fs = steering(&sim);
        fs.init_fdir_perfect(&FdirConfig {
            flex_offset: 12,
            variant: FdirVariant::X550,
            ..Default::default()
        })
        .unwrap();
        assert_eq!(sim.reg(regs::FDIRHKEY), 0x3DAD_14E2);
        assert_eq!(sim.reg(regs::FDIRSKEY), 0x174D_3614);
        assert_eq!(sim.reg(regs::FDIRM), 0x2F);
        assert_eq!(sim.reg(regs::FDIRSCTPM), u32::MAX);
        let ctrl = sim.reg(regs::FDIRCTRL);
        assert_eq!(ctrl >> 16 & 0x1F, 6);
        assert_ne!(ctrl & regs::FDIRCTRL_PERFECT_MATCH, 0);
    }

    #[test]
    fn test_fdir_init_timeout_is_fatal() {
        let sim = Arc::new(SimNic::with_faults(SimFaults {
            no_fdir_init: true,
            ..Default::default()
        }));
        let mut fs = steering(&sim);
        let err = fs.init_fdir_perfect(&FdirConfig::default()).unwrap_err();
        assert!(matches!(err, Error::FdirInitTimeout { device: 0 }));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_fdir_filter_indices_and_conflicts() {
        let sim = Arc::new(SimNic::new());
        let mut fs = steering(&sim);
        assert!(fs.setup_fdir_filter(0x1234, 1).is_err());
        fs.init_fdir_perfect(&FdirConfig::default()).unwrap();

        assert_eq!(fs.setup_fdir_filter(0x1234, 1).unwrap(), 0);
        assert_eq!(fs.setup_fdir_filter(0xBEEF, 2).unwrap(), 1);
        // Idempotent re-program keeps the index.
        assert_eq!(fs.setup_fdir_filter(0x1234, 1).unwrap(), 0);
        assert!(matches!(
            fs.setup_fdir_filter(0x1234, 3),
            Err(Error::FilterConflict(_))
        ));

        let cmds = sim.fdir_commands();
        assert_eq!(cmds.len(), 3);
        let cmd = cmds[1];
        assert_eq!(cmd.fdircmd >> 16 & 0x7F, 2);
        assert_eq!(cmd.fdirvlan >> 16, 0xBEEF);
        assert_eq!(cmd.fdirhash >> 16, 1);
        assert_ne!(cmd.fdirhash & 1 << 15, 0);
    }

    #[test]
    fn test_bucket_hash_properties() {
        let mask = AtrInput::flex_mask();
        assert_eq!(atr_bucket_hash(&AtrInput::flex(0).masked(&mask)), 0);
        let a = atr_bucket_hash(&AtrInput::flex(0x0800).masked(&mask));
        let b = atr_bucket_hash(&AtrInput::flex(0x86DD).masked(&mask));
        assert_eq!((a, b), (0x0472, 0x1CBF));
        assert_eq!(a, atr_bucket_hash(&AtrInput::flex(0x0800).masked(&mask)));
    }

    #[test]
    fn test_flex_offset_validation() {
        let cfg = FdirConfig {
            flex_offset: 13,
            ..Default::default()
        };
        assert_eq!(cfg.validate(), Err(ConfigError::FlexOffset(13)));
    }
}
