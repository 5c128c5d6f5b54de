//! An in-memory Wishbone device that speaks Etherbone.
//!
//! [`SimulatedBus`] answers requests the way a LiteX Etherbone core would,
//! keeping the bus in a sparse word map. It records every transaction and
//! can inject the faults a real link produces: truncated replies and debug
//! packets lost on the way to the CPU.

use std::collections::{HashMap, VecDeque};
use std::io;
use std::net::{SocketAddr, UdpSocket};

use crate::csr::{CsrWidth, LANE_STRIDE};
use crate::debug::DebugRegisters;
use crate::packet::{EtherbonePacket, PACKET_LEN};
use crate::transport::Transport;
use crate::{Error, Result};

/// One bus transaction as the device saw it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusOp {
    Read { address: u32 },
    Write { address: u32, value: u32 },
}

/// The VexRiscv debug bridge CSRs: a counter that advances once per
/// debug operation the CPU completes.
#[derive(Debug)]
struct DebugModel {
    regs: DebugRegisters,
    width: CsrWidth,
    /// Counter polls to swallow before a sync completes.
    sync_latency: u32,
    pending_sync: Option<u32>,
    /// Extra increments folded into the next advance.
    lost: u32,
}

/// A fake Etherbone device backed by memory.
#[derive(Debug, Default)]
pub struct SimulatedBus {
    memory: HashMap<u32, u32>,
    replies: VecDeque<Vec<u8>>,
    ops: Vec<BusOp>,
    truncations: HashMap<usize, usize>,
    reads_seen: usize,
    debug: Option<DebugModel>,
}

impl SimulatedBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a bus word directly, without recording a transaction.
    pub fn poke(&mut self, address: u32, value: u32) {
        self.memory.insert(address, value);
    }

    /// Look at a bus word directly, without recording a transaction.
    pub fn peek(&self, address: u32) -> u32 {
        self.memory.get(&address).copied().unwrap_or(0)
    }

    /// Every transaction since creation or the last [`clear_ops`].
    ///
    /// [`clear_ops`]: SimulatedBus::clear_ops
    pub fn ops(&self) -> &[BusOp] {
        &self.ops
    }

    pub fn clear_ops(&mut self) {
        self.ops.clear();
    }

    /// Cut the reply to the `nth` read from now (counting from 0) down to
    /// `len` bytes.
    pub fn truncate_reply(&mut self, nth: usize, len: usize) {
        self.truncations.insert(self.reads_seen + nth, len);
    }

    /// Put the VexRiscv debug bridge CSRs at `regs`, laid out for a CSR bus
    /// of `width`.
    pub fn attach_debug_port(&mut self, regs: DebugRegisters, width: CsrWidth) {
        self.debug = Some(DebugModel {
            regs,
            width,
            sync_latency: 0,
            pending_sync: None,
            lost: 0,
        });
    }

    /// Make each sync stall for `polls` counter reads before the counter
    /// moves.
    pub fn set_sync_latency(&mut self, polls: u32) {
        if let Some(debug) = &mut self.debug {
            debug.sync_latency = polls;
        }
    }

    /// Pretend `count` debug packets went missing: the next counter advance
    /// jumps by `count + 1`.
    pub fn lose_debug_packets(&mut self, count: u32) {
        if let Some(debug) = &mut self.debug {
            debug.lost += count;
        }
    }

    /// The current debug counter value.
    pub fn debug_counter(&self) -> Option<u32> {
        let debug = self.debug.as_ref()?;
        Some(self.load_csr(debug.regs.counter, debug.width))
    }

    pub fn set_debug_counter(&mut self, value: u32) {
        if let Some((counter, width)) = self.debug.as_ref().map(|d| (d.regs.counter, d.width)) {
            self.store_csr(counter, width, value);
        }
    }

    /// Read a multi-lane CSR straight out of memory.
    pub fn load_csr(&self, base: u32, width: CsrWidth) -> u32 {
        match width {
            CsrWidth::Bits32 => self.peek(base),
            CsrWidth::Bits8 => (0..4).fold(0, |acc, i| {
                acc | (self.peek(base.wrapping_add(i * LANE_STRIDE)) & 0xff) << (i * 8)
            }),
        }
    }

    /// Write a multi-lane CSR straight into memory.
    pub fn store_csr(&mut self, base: u32, width: CsrWidth, value: u32) {
        match width {
            CsrWidth::Bits32 => self.poke(base, value),
            CsrWidth::Bits8 => {
                for i in 0..4 {
                    self.poke(base.wrapping_add(i * LANE_STRIDE), (value >> (i * 8)) & 0xff);
                }
            }
        }
    }

    /// Receive one request datagram on `socket` and, for reads, reply to the
    /// sender's host on `reply_port`.
    pub fn answer_datagram(&mut self, socket: &UdpSocket, reply_port: u16) -> Result<()> {
        let mut buf = [0u8; 64];
        let (len, from) = socket.recv_from(&mut buf)?;
        self.send(&buf[..len])?;
        if let Some(reply) = self.replies.pop_front() {
            socket.send_to(&reply, SocketAddr::new(from.ip(), reply_port))?;
        }
        Ok(())
    }

    fn advance_counter(&mut self) {
        let Some(debug) = &mut self.debug else {
            return;
        };
        let step = 1 + std::mem::take(&mut debug.lost);
        let (counter, width) = (debug.regs.counter, debug.width);
        let value = self.load_csr(counter, width).wrapping_add(step);
        self.store_csr(counter, width, value);
    }

    fn on_read(&mut self, address: u32) {
        let Some(debug) = &mut self.debug else {
            return;
        };
        if address != debug.regs.counter {
            return;
        }
        let completes = match debug.pending_sync {
            Some(0) => {
                debug.pending_sync = None;
                true
            }
            Some(n) => {
                debug.pending_sync = Some(n - 1);
                false
            }
            None => false,
        };
        if completes {
            self.advance_counter();
        }
    }

    fn on_write(&mut self, address: u32) {
        let Some(debug) = &mut self.debug else {
            return;
        };
        let advances = if address == debug.regs.sync {
            if debug.sync_latency > 0 {
                debug.pending_sync = Some(debug.sync_latency);
            }
            debug.sync_latency == 0
        } else {
            address == debug.regs.core || address == debug.regs.data
        };
        if advances {
            self.advance_counter();
        }
    }
}

impl Transport for SimulatedBus {
    fn send(&mut self, bytes: &[u8]) -> Result<usize> {
        let packet = EtherbonePacket::parse(bytes)?;
        if packet.is_read() {
            let address = packet.record.value;
            self.ops.push(BusOp::Read { address });
            self.on_read(address);

            let mut reply = EtherbonePacket::reply(self.peek(address)).to_bytes().to_vec();
            if let Some(len) = self.truncations.remove(&self.reads_seen) {
                reply.truncate(len);
            }
            self.reads_seen += 1;
            self.replies.push_back(reply);
        } else if packet.is_write() {
            let (address, value) = (packet.record.write_addr, packet.record.value);
            self.ops.push(BusOp::Write { address, value });
            self.poke(address, value);
            self.on_write(address);
        } else {
            return Err(Error::MalformedPacket("not a single read or write"));
        }
        Ok(PACKET_LEN)
    }

    fn recv(&mut self, buf: &mut [u8]) -> Result<usize> {
        let reply = self.replies.pop_front().ok_or_else(|| {
            Error::Io(io::Error::new(io::ErrorKind::WouldBlock, "no reply pending"))
        })?;
        let len = reply.len().min(buf.len());
        buf[..len].copy_from_slice(&reply[..len]);
        Ok(len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet;

    fn regs() -> DebugRegisters {
        DebugRegisters {
            core: 0x100,
            data: 0x110,
            sync: 0x120,
            counter: 0x130,
        }
    }

    #[test]
    fn reads_are_answered_and_writes_are_not() {
        let mut bus = SimulatedBus::new();
        bus.send(&packet::encode_write(8, 99)).unwrap();
        assert!(bus.recv(&mut [0u8; 20]).is_err());

        bus.send(&packet::encode_read(8)).unwrap();
        let mut buf = [0u8; 20];
        let len = bus.recv(&mut buf).unwrap();
        assert_eq!(packet::decode_response(&buf[..len]), Some(99));
    }

    #[test]
    fn garbage_is_rejected() {
        let mut bus = SimulatedBus::new();
        assert!(bus.send(&[0u8; 20]).is_err());
        assert!(bus.ops().is_empty());
    }

    #[test]
    fn sync_and_register_writes_advance_the_counter() {
        let mut bus = SimulatedBus::new();
        bus.attach_debug_port(regs(), CsrWidth::Bits8);
        bus.set_debug_counter(0x1ff);
        assert_eq!(bus.peek(0x130), 0xff);
        assert_eq!(bus.peek(0x134), 0x01);

        bus.send(&packet::encode_write(0x120, 0)).unwrap();
        assert_eq!(bus.debug_counter(), Some(0x200));
        bus.send(&packet::encode_write(0x100, 1)).unwrap();
        assert_eq!(bus.debug_counter(), Some(0x201));

        bus.lose_debug_packets(2);
        bus.send(&packet::encode_write(0x110, 1)).unwrap();
        assert_eq!(bus.debug_counter(), Some(0x204));
    }

    #[test]
    fn sync_latency_holds_the_counter_back() {
        let mut bus = SimulatedBus::new();
        bus.attach_debug_port(regs(), CsrWidth::Bits32);
        bus.set_sync_latency(2);
        bus.send(&packet::encode_write(0x120, 4)).unwrap();
        assert_eq!(bus.debug_counter(), Some(0));
        for _ in 0..2 {
            bus.send(&packet::encode_read(0x130)).unwrap();
            assert_eq!(bus.debug_counter(), Some(0));
        }
        bus.send(&packet::encode_read(0x130)).unwrap();
        assert_eq!(bus.debug_counter(), Some(1));
    }

    #[test]
    fn byte_lanes_wrap_at_the_top_of_the_address_space() {
        let mut bus = SimulatedBus::new();
        bus.store_csr(0xffff_fffc, CsrWidth::Bits8, 0x4433_2211);
        assert_eq!(bus.peek(0xffff_fffc), 0x11);
        assert_eq!(bus.peek(0x0), 0x22);
        assert_eq!(bus.peek(0x8), 0x44);
        assert_eq!(bus.load_csr(0xffff_fffc, CsrWidth::Bits8), 0x4433_2211);
    }
}
