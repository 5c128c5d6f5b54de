//! The Etherbone wire format, restricted to what a single 32-bit access needs.
//!
//! Every packet this crate sends or expects back is exactly [`PACKET_LEN`]
//! bytes: an 8-byte header followed by one record carrying one operation.
//!
//! ```text
//!  0      1      2      3      4      5      6      7
//! +------+------+------+------+------+------+------+------+
//! | 4e   | 6f   | VVVV?nRF    | ppppaaaa    | padding     |
//! +------+------+------+------+------+------+------+------+
//! | flags| BE   | wcnt | rcnt | write address / probe id  |
//! +------+------+------+------+------+------+------+------+
//! | value                     |
//! +------+------+------+------+
//! ```
//!
//! All multi-byte fields are big-endian. A read request carries the address
//! to read in the value field; a write request carries the address in the
//! write-address field.

use crate::{Error, Result};

/// Size of a header plus one record.
pub const PACKET_LEN: usize = 20;

pub const MAGIC: [u8; 2] = [0x4e, 0x6f];
pub const VERSION: u8 = 1;

/// Address and port size code for 32-bit wide fields.
pub const SIZE_32: u8 = 4;

/// Byte enable with all four lanes of the value active.
pub const BYTE_ENABLE_ALL: u8 = 0x0f;

/// Bits of the header's flag byte (the low nibble of byte 2).
pub mod header_flags {
    pub const PROBE: u8 = 0b0001;
    pub const PROBE_REPLY: u8 = 0b0010;
    pub const NO_READS: u8 = 0b0100;
}

/// Bits of a record's flag byte.
pub mod record_flags {
    pub const WFF: u8 = 0b0000_0010;
    pub const WCA: u8 = 0b0000_0100;
    pub const CYC: u8 = 0b0000_1000;
    pub const RFF: u8 = 0b0010_0000;
    pub const RCA: u8 = 0b0100_0000;
    pub const BCA: u8 = 0b1000_0000;
}

const OFF_RECORD: usize = 8;
const OFF_WRITE_ADDR: usize = 12;
const OFF_VALUE: usize = 16;

/// The packet header. The version is always [`VERSION`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Header {
    /// Bitmask of [`header_flags`].
    pub flags: u8,
    pub addr_size: u8,
    pub port_size: u8,
}

impl Default for Header {
    fn default() -> Self {
        Header {
            flags: 0,
            addr_size: SIZE_32,
            port_size: SIZE_32,
        }
    }
}

/// The single record following the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Record {
    /// Bitmask of [`record_flags`].
    pub flags: u8,
    pub byte_enable: u8,
    pub write_count: u8,
    pub read_count: u8,
    /// Where writes go, or the base return address of a read.
    pub write_addr: u32,
    /// The written value, or the address to read.
    pub value: u32,
}

/// One Etherbone packet carrying exactly one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EtherbonePacket {
    pub header: Header,
    pub record: Record,
}

impl EtherbonePacket {
    /// A request to read the bus word at `address`.
    pub fn read(address: u32) -> Self {
        Self::single(0, 1, 0, address)
    }

    /// A request to write `value` to the bus word at `address`.
    pub fn write(address: u32, value: u32) -> Self {
        Self::single(1, 0, address, value)
    }

    /// What a device sends back to answer a read: one write of the read
    /// value to the (zero) return address.
    pub fn reply(value: u32) -> Self {
        Self::single(1, 0, 0, value)
    }

    fn single(write_count: u8, read_count: u8, write_addr: u32, value: u32) -> Self {
        EtherbonePacket {
            header: Header::default(),
            record: Record {
                flags: 0,
                byte_enable: BYTE_ENABLE_ALL,
                write_count,
                read_count,
                write_addr,
                value,
            },
        }
    }

    pub fn is_read(&self) -> bool {
        self.record.read_count == 1 && self.record.write_count == 0
    }

    pub fn is_write(&self) -> bool {
        self.record.write_count == 1 && self.record.read_count == 0
    }

    /// Serialise into a fresh buffer. Every byte is written, padding
    /// included.
    pub fn to_bytes(&self) -> [u8; PACKET_LEN] {
        let mut buf = [0u8; PACKET_LEN];
        buf[0..2].copy_from_slice(&MAGIC);
        buf[2] = (VERSION << 4) | (self.header.flags & 0x0f);
        buf[3] = (self.header.port_size << 4) | (self.header.addr_size & 0x0f);
        buf[4..OFF_RECORD].fill(0);

        buf[OFF_RECORD] = self.record.flags;
        buf[OFF_RECORD + 1] = self.record.byte_enable;
        buf[OFF_RECORD + 2] = self.record.write_count;
        buf[OFF_RECORD + 3] = self.record.read_count;
        buf[OFF_WRITE_ADDR..OFF_VALUE].copy_from_slice(&self.record.write_addr.to_be_bytes());
        buf[OFF_VALUE..PACKET_LEN].copy_from_slice(&self.record.value.to_be_bytes());
        buf
    }

    /// Parse a packet, rejecting anything that isn't a version 1,
    /// single-record packet of exactly [`PACKET_LEN`] bytes.
    pub fn parse(buf: &[u8]) -> Result<Self> {
        let buf: &[u8; PACKET_LEN] = buf
            .try_into()
            .map_err(|_| Error::MalformedPacket("wrong length"))?;
        if buf[0..2] != MAGIC {
            return Err(Error::MalformedPacket("bad magic"));
        }
        if buf[2] >> 4 != VERSION {
            return Err(Error::MalformedPacket("unsupported version"));
        }

        Ok(EtherbonePacket {
            header: Header {
                flags: buf[2] & 0x0f,
                addr_size: buf[3] & 0x0f,
                port_size: buf[3] >> 4,
            },
            record: Record {
                flags: buf[OFF_RECORD],
                byte_enable: buf[OFF_RECORD + 1],
                write_count: buf[OFF_RECORD + 2],
                read_count: buf[OFF_RECORD + 3],
                write_addr: be32(buf, OFF_WRITE_ADDR),
                value: be32(buf, OFF_VALUE),
            },
        })
    }
}

fn be32(buf: &[u8; PACKET_LEN], offset: usize) -> u32 {
    let mut word = [0u8; 4];
    word.copy_from_slice(&buf[offset..offset + 4]);
    u32::from_be_bytes(word)
}

/// Encode a single read of `address`.
pub fn encode_read(address: u32) -> [u8; PACKET_LEN] {
    EtherbonePacket::read(address).to_bytes()
}

/// Encode a single write of `value` to `address`.
pub fn encode_write(address: u32, value: u32) -> [u8; PACKET_LEN] {
    EtherbonePacket::write(address, value).to_bytes()
}

/// Pull the value out of a reply, or `None` if `buf` isn't exactly one
/// packet long.
pub fn decode_response(buf: &[u8]) -> Option<u32> {
    let buf: &[u8; PACKET_LEN] = buf.try_into().ok()?;
    Some(be32(buf, OFF_VALUE))
}
