//! Width-adaptive CSR access.
//!
//! LiteX SoCs are built with either 8-bit or 32-bit CSR data buses. On an
//! 8-bit bus every CSR byte sits in its own 32-bit aligned bus word, so a
//! 32-bit CSR at `addr` is spread over `addr`, `addr + 4`, `addr + 8` and
//! `addr + 12`, least significant byte first. On a 32-bit bus a CSR word is
//! a bus word.

use std::fmt::{self, Display, Formatter};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::packet::{self, PACKET_LEN};
use crate::transport::Transport;
use crate::{Error, Result};

/// Distance between consecutive bus words.
pub const LANE_STRIDE: u32 = 4;

/// What a failed read lane reads as.
pub const READ_SENTINEL: u32 = 0xffff_ffff;

// Big enough that an oversized datagram shows up as a length mismatch
// rather than being silently truncated to exactly one packet.
const RECV_BUF_LEN: usize = 64;

/// The native data width of the SoC's CSR bus.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CsrWidth {
    /// One byte of CSR data per bus word. LiteX's default.
    #[default]
    #[serde(rename = "8")]
    Bits8,
    /// A full 32-bit CSR word per bus word.
    #[serde(rename = "32")]
    Bits32,
}

impl CsrWidth {
    pub fn from_bits(bits: u32) -> Option<Self> {
        match bits {
            8 => Some(CsrWidth::Bits8),
            32 => Some(CsrWidth::Bits32),
            _ => None,
        }
    }

    pub fn bits(self) -> u32 {
        match self {
            CsrWidth::Bits8 => 8,
            CsrWidth::Bits32 => 32,
        }
    }

    fn lane_mask(self) -> u32 {
        match self {
            CsrWidth::Bits8 => 0xff,
            CsrWidth::Bits32 => 0xffff_ffff,
        }
    }
}

impl Display for CsrWidth {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}-bit", self.bits())
    }
}

/// The result of [`CsrBus::write32_verified`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteReport {
    pub old: u32,
    pub new: u32,
    pub wanted: u32,
}

impl WriteReport {
    pub fn stuck(&self) -> bool {
        self.new != self.wanted
    }
}

/// Register reads and writes of any width over an Etherbone link.
#[derive(Debug)]
pub struct CsrBus<T> {
    link: T,
    width: CsrWidth,
}

impl<T: Transport> CsrBus<T> {
    pub fn new(link: T, width: CsrWidth) -> Self {
        CsrBus { link, width }
    }

    pub fn width(&self) -> CsrWidth {
        self.width
    }

    pub fn link(&self) -> &T {
        &self.link
    }

    pub fn link_mut(&mut self) -> &mut T {
        &mut self.link
    }

    pub fn into_link(self) -> T {
        self.link
    }

    /// One bus read: exactly one request out and one reply in.
    pub fn read_word(&mut self, address: u32) -> Result<u32> {
        self.link.send(&packet::encode_read(address))?;
        let mut buf = [0u8; RECV_BUF_LEN];
        let len = self.link.recv(&mut buf)?;
        let value = packet::decode_response(&buf[..len])
            .ok_or(Error::LengthMismatch { address, len })?;
        debug!("read {address:#010x} = {value:#010x}");
        Ok(value)
    }

    /// One bus write. Etherbone doesn't acknowledge writes, so nothing is
    /// read back.
    pub fn write_word(&mut self, address: u32, value: u32) -> Result<()> {
        debug!("write {address:#010x} = {value:#010x}");
        let buf = packet::encode_write(address, value);
        let sent = self.link.send(&buf)?;
        if sent != PACKET_LEN {
            warn!(sent, "short etherbone write");
        }
        Ok(())
    }

    pub fn read8(&mut self, address: u32) -> Result<u8> {
        self.read_bytes(address, 1).map(|v| v as u8)
    }

    pub fn read16(&mut self, address: u32) -> Result<u16> {
        self.read_bytes(address, 2).map(|v| v as u16)
    }

    pub fn read32(&mut self, address: u32) -> Result<u32> {
        self.read_bytes(address, 4).map(|v| v as u32)
    }

    pub fn read64(&mut self, address: u32) -> Result<u64> {
        self.read_bytes(address, 8)
    }

    pub fn write8(&mut self, address: u32, value: u8) -> Result<()> {
        self.write_bytes(address, 1, value.into())
    }

    pub fn write16(&mut self, address: u32, value: u16) -> Result<()> {
        self.write_bytes(address, 2, value.into())
    }

    pub fn write32(&mut self, address: u32, value: u32) -> Result<()> {
        self.write_bytes(address, 4, value.into())
    }

    pub fn write64(&mut self, address: u32, value: u64) -> Result<()> {
        self.write_bytes(address, 8, value)
    }

    /// Write a 32-bit CSR and read it back, reporting what was there before
    /// and what's there now.
    pub fn write32_verified(&mut self, address: u32, value: u32) -> Result<WriteReport> {
        let old = self.read32(address)?;
        self.write32(address, value)?;
        let new = self.read32(address)?;
        Ok(WriteReport {
            old,
            new,
            wanted: value,
        })
    }

    /// How many bus transactions an access of `bytes` bytes takes, and how
    /// many value bits each one carries.
    fn lanes(&self, bytes: u32) -> (u32, u32) {
        match self.width {
            CsrWidth::Bits8 => (bytes, 8),
            CsrWidth::Bits32 => (bytes.div_ceil(4), 32),
        }
    }

    fn read_bytes(&mut self, address: u32, bytes: u32) -> Result<u64> {
        let (lanes, lane_bits) = self.lanes(bytes);
        let mut value = 0u64;
        let mut failed = 0;
        let mut mismatch = None;

        // A short reply fails that lane only; the rest are still read.
        for i in 0..lanes {
            let lane_addr = address.wrapping_add(i * LANE_STRIDE);
            let lane = match self.read_word(lane_addr) {
                Ok(word) => word,
                Err(err @ Error::LengthMismatch { .. }) => {
                    warn!("{err}");
                    failed += 1;
                    mismatch = Some(err);
                    READ_SENTINEL
                }
                Err(err) => return Err(err),
            };
            value |= u64::from(lane & self.width.lane_mask()) << (i * lane_bits);
        }

        let value = value & mask(bytes);
        match mismatch {
            None => Ok(value),
            Some(err) if lanes == 1 => Err(err),
            Some(_) => Err(Error::PartialRead {
                address,
                value,
                lanes: lanes as usize,
                failed,
            }),
        }
    }

    fn write_bytes(&mut self, address: u32, bytes: u32, value: u64) -> Result<()> {
        let (lanes, lane_bits) = self.lanes(bytes);
        let value = value & mask(bytes);
        for i in 0..lanes {
            let lane = (value >> (i * lane_bits)) as u32 & self.width.lane_mask();
            self.write_word(address.wrapping_add(i * LANE_STRIDE), lane)?;
        }
        Ok(())
    }
}

fn mask(bytes: u32) -> u64 {
    match bytes {
        8 => u64::MAX,
        n => (1u64 << (n * 8)) - 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{BusOp, SimulatedBus};

    fn bus(width: CsrWidth) -> CsrBus<SimulatedBus> {
        CsrBus::new(SimulatedBus::new(), width)
    }

    #[test]
    fn narrow_bus_splits_words_lsb_first() {
        let mut bus = bus(CsrWidth::Bits8);
        bus.write32(0x1000, 0x1234_5678).unwrap();
        assert_eq!(
            bus.link().ops(),
            [
                BusOp::Write { address: 0x1000, value: 0x78 },
                BusOp::Write { address: 0x1004, value: 0x56 },
                BusOp::Write { address: 0x1008, value: 0x34 },
                BusOp::Write { address: 0x100c, value: 0x12 },
            ]
        );

        bus.link_mut().clear_ops();
        assert_eq!(bus.read32(0x1000).unwrap(), 0x1234_5678);
        assert_eq!(
            bus.link().ops(),
            [
                BusOp::Read { address: 0x1000 },
                BusOp::Read { address: 0x1004 },
                BusOp::Read { address: 0x1008 },
                BusOp::Read { address: 0x100c },
            ]
        );
    }

    #[test]
    fn narrow_bus_lane_counts() {
        let mut bus = bus(CsrWidth::Bits8);
        bus.write16(0, 0xbeef).unwrap();
        assert_eq!(bus.link().ops().len(), 2);
        bus.write64(0x100, 0x0102_0304_0506_0708).unwrap();
        assert_eq!(bus.link().ops().len(), 10);
        assert_eq!(bus.link().peek(0x100), 0x08);
        assert_eq!(bus.link().peek(0x11c), 0x01);
        assert_eq!(bus.read64(0x100).unwrap(), 0x0102_0304_0506_0708);
        assert_eq!(bus.read16(0).unwrap(), 0xbeef);
    }

    #[test]
    fn narrow_bus_only_uses_the_low_byte_of_each_word() {
        let mut bus = bus(CsrWidth::Bits8);
        bus.link_mut().poke(0x20, 0xaaaa_aa11);
        bus.link_mut().poke(0x24, 0xbbbb_bb22);
        assert_eq!(bus.read16(0x20).unwrap(), 0x2211);
    }

    #[test]
    fn wide_bus_masks_narrow_accesses() {
        let mut bus = bus(CsrWidth::Bits32);
        bus.link_mut().poke(0x40, 0x1234_5678);
        assert_eq!(bus.read8(0x40).unwrap(), 0x78);
        assert_eq!(bus.read16(0x40).unwrap(), 0x5678);
        assert_eq!(bus.link().ops().len(), 2);

        bus.write8(0x44, 0xab).unwrap();
        assert_eq!(bus.link().peek(0x44), 0xab);
        bus.write16(0x48, 0xabcd).unwrap();
        assert_eq!(bus.link().peek(0x48), 0xabcd);
    }

    #[test]
    fn wide_bus_splits_64_bit_accesses_low_word_first() {
        let mut bus = bus(CsrWidth::Bits32);
        bus.write64(0x80, 0x1111_2222_3333_4444).unwrap();
        assert_eq!(
            bus.link().ops(),
            [
                BusOp::Write { address: 0x80, value: 0x3333_4444 },
                BusOp::Write { address: 0x84, value: 0x1111_2222 },
            ]
        );
        assert_eq!(bus.read64(0x80).unwrap(), 0x1111_2222_3333_4444);
    }

    #[test]
    fn short_reply_fails_one_lane_and_keeps_going() {
        let mut bus = bus(CsrWidth::Bits8);
        bus.write32(0x200, 0x4433_2211).unwrap();
        bus.link_mut().clear_ops();
        bus.link_mut().truncate_reply(1, 19);

        let err = bus.read32(0x200).unwrap_err();
        assert!(
            matches!(
                err,
                Error::PartialRead { address: 0x200, value: 0x4433_ff11, lanes: 4, failed: 1 }
            ),
            "{err:?}"
        );
        assert_eq!(err.read_value(), Some(0x4433_ff11));
        assert_eq!(bus.link().ops().len(), 4);
    }

    #[test]
    fn short_reply_on_a_single_lane_read() {
        let mut bus = bus(CsrWidth::Bits32);
        bus.link_mut().truncate_reply(0, 19);
        let err = bus.read32(0x10).unwrap_err();
        assert!(matches!(err, Error::LengthMismatch { address: 0x10, len: 19 }));
        assert_eq!(err.read_value().map(|v| v as u32), Some(READ_SENTINEL));

        // The next read is unaffected.
        bus.link_mut().poke(0x10, 5);
        assert_eq!(bus.read32(0x10).unwrap(), 5);
    }

    #[test]
    fn verified_write_reports_before_and_after() {
        let mut bus = bus(CsrWidth::Bits32);
        bus.link_mut().poke(0x300, 1);
        let report = bus.write32_verified(0x300, 2).unwrap();
        assert_eq!(report, WriteReport { old: 1, new: 2, wanted: 2 });
        assert!(!report.stuck());
    }

    #[test]
    fn width_from_bits() {
        assert_eq!(CsrWidth::from_bits(8), Some(CsrWidth::Bits8));
        assert_eq!(CsrWidth::from_bits(32), Some(CsrWidth::Bits32));
        assert_eq!(CsrWidth::from_bits(16), None);
        assert_eq!(CsrWidth::Bits32.to_string(), "32-bit");
    }
}
