//! Intel 82599 register map.
//!
//! Only the registers the data plane touches. Offsets and bit positions are
//! taken from the 82599 10GbE Controller Datasheet, section 8.
//!
//! Per-queue registers are functions of the queue index; queues 0..63 use
//! the low register bank.

// ═══════════════════════════════════════════════════════════════════════════
// GENERAL CONTROL
// ═══════════════════════════════════════════════════════════════════════════

pub const CTRL: u32 = 0x00000;
pub const CTRL_LNK_RST: u32 = 1 << 3;
pub const CTRL_RST: u32 = 1 << 26;
pub const CTRL_RST_MASK: u32 = CTRL_LNK_RST | CTRL_RST;

pub const STATUS: u32 = 0x00008;

pub const CTRL_EXT: u32 = 0x00018;
pub const CTRL_EXT_NS_DIS: u32 = 1 << 16;
pub const CTRL_EXT_DRV_LOAD: u32 = 1 << 28;

pub const EEC: u32 = 0x10010;
pub const EEC_ARD: u32 = 1 << 9;

pub const GCR_EXT: u32 = 0x11050;
pub const GCR_EXT_BUFFERS_CLEAR: u32 = 1 << 30;

pub const RAL0: u32 = 0x0A200;
pub const RAH0: u32 = 0x0A204;
pub const RAH_AV: u32 = 1 << 31;

// ═══════════════════════════════════════════════════════════════════════════
// INTERRUPTS
// ═══════════════════════════════════════════════════════════════════════════

pub const EICR: u32 = 0x00800;
pub const EIAC: u32 = 0x00810;
pub const EIMS: u32 = 0x00880;
pub const EIMC: u32 = 0x00888;
pub const EIAM: u32 = 0x00890;
pub const EIMC_ALL: u32 = 0x7FFF_FFFF;

pub const GPIE: u32 = 0x00898;
pub const GPIE_MSIX_MODE: u32 = 1 << 4;
pub const GPIE_OCD: u32 = 1 << 5;
pub const GPIE_EIAME: u32 = 1 << 30;
pub const GPIE_PBA_SUPPORT: u32 = 1 << 31;

/// Extended interrupt mask set, vectors `32*i .. 32*i+31`.
#[inline]
pub const fn eims_ex(i: u32) -> u32 {
    0x00AA0 + 4 * i
}

/// Extended interrupt mask clear.
#[inline]
pub const fn eimc_ex(i: u32) -> u32 {
    0x00AB0 + 4 * i
}

/// Extended auto-mask.
#[inline]
pub const fn eiam_ex(i: u32) -> u32 {
    0x00AD0 + 4 * i
}

/// Interrupt throttle, vectors 0..23 and 24..127.
#[inline]
pub const fn eitr(vector: u32) -> u32 {
    if vector <= 23 {
        0x00820 + 4 * vector
    } else {
        0x012300 + 4 * (vector - 24)
    }
}
/// EITR interval field, in 2 µs units at bits 11:3.
pub const EITR_ITR_SHIFT: u32 = 3;
pub const EITR_ITR_MASK: u32 = 0x0FF8;
pub const EITR_CNT_WDIS: u32 = 1 << 31;

/// Interrupt vector allocation, two queues per register.
#[inline]
pub const fn ivar(i: u32) -> u32 {
    0x00900 + 4 * i
}
pub const IVAR_ALLOC_VAL: u32 = 0x80;

// ═══════════════════════════════════════════════════════════════════════════
// RECEIVE
// ═══════════════════════════════════════════════════════════════════════════

#[inline]
pub const fn rdbal(q: u32) -> u32 {
    0x01000 + 0x40 * q
}
#[inline]
pub const fn rdbah(q: u32) -> u32 {
    0x01004 + 0x40 * q
}
#[inline]
pub const fn rdlen(q: u32) -> u32 {
    0x01008 + 0x40 * q
}
#[inline]
pub const fn dca_rxctrl(q: u32) -> u32 {
    0x0100C + 0x40 * q
}
#[inline]
pub const fn rdh(q: u32) -> u32 {
    0x01010 + 0x40 * q
}
#[inline]
pub const fn srrctl(q: u32) -> u32 {
    0x01014 + 0x40 * q
}
#[inline]
pub const fn rdt(q: u32) -> u32 {
    0x01018 + 0x40 * q
}
#[inline]
pub const fn rxdctl(q: u32) -> u32 {
    0x01028 + 0x40 * q
}

pub const RXDCTL_ENABLE: u32 = 1 << 25;
pub const DCA_RXCTRL_DATA_WRO_EN: u32 = 1 << 13;

pub const SRRCTL_BSIZEPKT_SHIFT: u32 = 10;
pub const SRRCTL_BSIZEPKT_MASK: u32 = 0x1F;
pub const SRRCTL_DESCTYPE_ADV_ONEBUF: u32 = 0x0200_0000;
pub const SRRCTL_DROP_EN: u32 = 1 << 28;

pub const RXCTRL: u32 = 0x03000;
pub const RXCTRL_RXEN: u32 = 1;

pub const FCTRL: u32 = 0x05080;
pub const FCTRL_MPE: u32 = 1 << 8;
pub const FCTRL_UPE: u32 = 1 << 9;
pub const FCTRL_BAM: u32 = 1 << 10;

pub const RDRXCTL: u32 = 0x02F00;
pub const RDRXCTL_CRCSTRIP: u32 = 1 << 1;
pub const RDRXCTL_DMAIDONE: u32 = 1 << 3;

/// RX packet buffer size per traffic class; size field is KB at bits 19:10.
#[inline]
pub const fn rxpbsize(tc: u32) -> u32 {
    0x03C00 + 4 * tc
}
pub const RXPBSIZE_SHIFT: u32 = 10;

pub const SECRXCTRL: u32 = 0x08D00;
pub const SECRXCTRL_RX_DIS: u32 = 1 << 1;
pub const SECRXSTAT: u32 = 0x08D04;
pub const SECRXSTAT_SECRX_RDY: u32 = 1;

// ═══════════════════════════════════════════════════════════════════════════
// TRANSMIT
// ═══════════════════════════════════════════════════════════════════════════

#[inline]
pub const fn tdbal(q: u32) -> u32 {
    0x06000 + 0x40 * q
}
#[inline]
pub const fn tdbah(q: u32) -> u32 {
    0x06004 + 0x40 * q
}
#[inline]
pub const fn tdlen(q: u32) -> u32 {
    0x06008 + 0x40 * q
}
#[inline]
pub const fn tdh(q: u32) -> u32 {
    0x06010 + 0x40 * q
}
#[inline]
pub const fn tdt(q: u32) -> u32 {
    0x06018 + 0x40 * q
}
#[inline]
pub const fn txdctl(q: u32) -> u32 {
    0x06028 + 0x40 * q
}

pub const TXDCTL_PTHRESH_SHIFT: u32 = 0;
pub const TXDCTL_HTHRESH_SHIFT: u32 = 8;
pub const TXDCTL_WTHRESH_SHIFT: u32 = 16;
pub const TXDCTL_ENABLE: u32 = 1 << 25;

pub const DMATXCTL: u32 = 0x04A80;
pub const DMATXCTL_TE: u32 = 1;

pub const RTTDCS: u32 = 0x04900;
pub const RTTDCS_ARBDIS: u32 = 1 << 6;
pub const MTQC: u32 = 0x08120;

pub const HLREG0: u32 = 0x04240;
pub const HLREG0_TXCRCEN: u32 = 1 << 0;
pub const HLREG0_RXCRCSTRP: u32 = 1 << 1;
pub const HLREG0_LPBK: u32 = 1 << 15;

/// TX packet buffer size per traffic class, KB at bits 19:10.
#[inline]
pub const fn txpbsize(tc: u32) -> u32 {
    0x0CC00 + 4 * tc
}
/// TX packet buffer threshold per traffic class, KB.
#[inline]
pub const fn txpbthresh(tc: u32) -> u32 {
    0x04950 + 4 * tc
}
pub const TXPBSIZE_SHIFT: u32 = 10;

// ═══════════════════════════════════════════════════════════════════════════
// LINK
// ═══════════════════════════════════════════════════════════════════════════

pub const LINKS: u32 = 0x042A4;
pub const LINKS_UP: u32 = 1 << 30;
pub const LINKS_SPEED_MASK: u32 = 0x3000_0000;
pub const LINKS_SPEED_10G: u32 = 0x3000_0000;
pub const LINKS_SPEED_1G: u32 = 0x2000_0000;
pub const LINKS_SPEED_100M: u32 = 0x1000_0000;

// ═══════════════════════════════════════════════════════════════════════════
// STATISTICS (clear on read)
// ═══════════════════════════════════════════════════════════════════════════

pub const CRCERRS: u32 = 0x04000;
pub const MPC0: u32 = 0x03FA0;
pub const GPRC: u32 = 0x04074;
pub const GPTC: u32 = 0x04080;
pub const GORCL: u32 = 0x04088;
pub const GORCH: u32 = 0x0408C;
pub const GOTCL: u32 = 0x04090;
pub const GOTCH: u32 = 0x04094;
pub const RNBC0: u32 = 0x03FC0;

// ═══════════════════════════════════════════════════════════════════════════
// 5-TUPLE FILTERS (128 entries)
// ═══════════════════════════════════════════════════════════════════════════

pub const MAX_FTQF_FILTERS: u32 = 128;

#[inline]
pub const fn saqf(i: u32) -> u32 {
    0x0E000 + 4 * i
}
#[inline]
pub const fn daqf(i: u32) -> u32 {
    0x0E200 + 4 * i
}
#[inline]
pub const fn sdpqf(i: u32) -> u32 {
    0x0E400 + 4 * i
}
#[inline]
pub const fn ftqf(i: u32) -> u32 {
    0x0E600 + 4 * i
}
#[inline]
pub const fn l34t_imir(i: u32) -> u32 {
    0x0E800 + 4 * i
}

pub const SDPQF_DSTPORT_SHIFT: u32 = 16;

pub const FTQF_PROTOCOL_MASK: u32 = 0x3;
pub const FTQF_PROTOCOL_TCP: u32 = 0x0;
pub const FTQF_PROTOCOL_UDP: u32 = 0x1;
pub const FTQF_PROTOCOL_SCTP: u32 = 0x2;
pub const FTQF_PRIORITY_MASK: u32 = 0x7;
pub const FTQF_PRIORITY_SHIFT: u32 = 2;
pub const FTQF_5TUPLE_MASK_SHIFT: u32 = 25;
pub const FTQF_SOURCE_ADDR_MASK: u32 = 0x1E;
pub const FTQF_DEST_ADDR_MASK: u32 = 0x1D;
pub const FTQF_SOURCE_PORT_MASK: u32 = 0x1B;
pub const FTQF_DEST_PORT_MASK: u32 = 0x17;
pub const FTQF_PROTOCOL_COMP_MASK: u32 = 0x0F;
pub const FTQF_POOL_MASK_EN: u32 = 1 << 30;
pub const FTQF_QUEUE_ENABLE: u32 = 1 << 31;

pub const L34T_IMIR_SIZE_BP: u32 = 0x0000_1000;
pub const L34T_IMIR_RESERVE: u32 = 0x0008_0000;
pub const L34T_IMIR_QUEUE_SHIFT: u32 = 21;

// ═══════════════════════════════════════════════════════════════════════════
// FLOW DIRECTOR
// ═══════════════════════════════════════════════════════════════════════════

pub const FDIRCTRL: u32 = 0x0EE00;
pub const FDIRCTRL_PBALLOC_64K: u32 = 0x1;
pub const FDIRCTRL_PBALLOC_128K: u32 = 0x2;
pub const FDIRCTRL_PBALLOC_256K: u32 = 0x3;
pub const FDIRCTRL_INIT_DONE: u32 = 1 << 3;
pub const FDIRCTRL_PERFECT_MATCH: u32 = 1 << 4;
pub const FDIRCTRL_REPORT_STATUS: u32 = 1 << 5;
pub const FDIRCTRL_FLEX_SHIFT: u32 = 16;
pub const FDIRCTRL_MAX_LENGTH_SHIFT: u32 = 24;
pub const FDIRCTRL_FULL_THRESH_SHIFT: u32 = 28;

pub const FDIRIPSA: u32 = 0x0EE18;
pub const FDIRIPDA: u32 = 0x0EE1C;
pub const FDIRPORT: u32 = 0x0EE20;
pub const FDIRVLAN: u32 = 0x0EE24;
pub const FDIRHASH: u32 = 0x0EE28;
pub const FDIRCMD: u32 = 0x0EE2C;
pub const FDIRSIP4M: u32 = 0x0EE40;
pub const FDIRDIP4M: u32 = 0x0EE44;
pub const FDIRHKEY: u32 = 0x0EE68;
pub const FDIRSKEY: u32 = 0x0EE6C;
pub const FDIRM: u32 = 0x0EE70;
pub const FDIRIP6M: u32 = 0x0EE74;
pub const FDIRTCPM: u32 = 0x0EE78;
pub const FDIRUDPM: u32 = 0x0EE7C;
/// X550 only.
pub const FDIRSCTPM: u32 = 0x0EE80;

pub const FDIRVLAN_FLEX_SHIFT: u32 = 16;

pub const FDIRHASH_BUCKET_VALID_SHIFT: u32 = 15;
pub const FDIRHASH_SIG_SW_INDEX_SHIFT: u32 = 16;

pub const FDIRCMD_CMD_MASK: u32 = 0x3;
pub const FDIRCMD_CMD_ADD_FLOW: u32 = 0x1;
pub const FDIRCMD_FILTER_UPDATE: u32 = 0x8;
pub const FDIRCMD_FLOW_TYPE_SHIFT: u32 = 5;
pub const FDIRCMD_LAST: u32 = 0x800;
pub const FDIRCMD_QUEUE_EN: u32 = 0x8000;
pub const FDIRCMD_RX_QUEUE_SHIFT: u32 = 16;

/// ATR hash keys programmed into FDIRHKEY / FDIRSKEY.
pub const ATR_BUCKET_HASH_KEY: u32 = 0x3DAD_14E2;
pub const ATR_SIGNATURE_HASH_KEY: u32 = 0x174D_3614;

// ═══════════════════════════════════════════════════════════════════════════
// LIMITS
// ═══════════════════════════════════════════════════════════════════════════

/// Queues per direction.
pub const MAX_QUEUES: u32 = 64;
/// MSI-X vectors.
pub const MAX_VECTORS: u32 = 64;
/// RX packet buffer, KB.
pub const RX_PB_SIZE_KB: u32 = 512;
/// TX packet buffer, KB.
pub const TX_PB_SIZE_KB: u32 = 160;
/// Largest frame the TX threshold must accommodate, KB.
pub const TX_PB_MAX_FRAME_KB: u32 = 10;
/// RDLEN / TDLEN must be a multiple of 128 bytes.
pub const DESC_RING_ALIGN: usize = 128;
