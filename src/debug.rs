//! The VexRiscv debug port, reached through the CPU's debug bridge CSRs.
//!
//! The CPU exposes two debug registers, `CORE` and `DATA`. The bridge in
//! front of it counts every debug operation it completes in a free-running
//! counter CSR. Writes go straight to the register CSRs; reads are started
//! by writing the register's offset to the sync CSR and are done once the
//! counter moves. Comparing the counter against what we last saw tells us
//! whether any of our packets went missing on the way.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::csr::CsrBus;
use crate::transport::Transport;
use crate::{Error, Result};

/// One of the two debug registers, named by its offset in the debug port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DebugRegister {
    /// Halt/resume/step control and status, at offset 0.
    Core,
    /// Instruction injection and result readback, at offset 4.
    Data,
}

impl DebugRegister {
    pub fn from_offset(offset: u32) -> Result<Self> {
        match offset {
            0 => Ok(DebugRegister::Core),
            4 => Ok(DebugRegister::Data),
            other => Err(Error::UnsupportedDebugAddress(other)),
        }
    }

    pub fn offset(self) -> u32 {
        match self {
            DebugRegister::Core => 0,
            DebugRegister::Data => 4,
        }
    }
}

/// Where the debug bridge CSRs live on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DebugRegisters {
    pub core: u32,
    pub data: u32,
    /// Written with a register offset to latch that register for reading.
    pub sync: u32,
    /// Advances once per completed debug operation.
    pub counter: u32,
}

impl DebugRegisters {
    /// The CSR name prefix LiteX gives the debug bridge.
    pub const DEFAULT_PREFIX: &'static str = "riscv_debug";

    pub fn address_of(&self, register: DebugRegister) -> u32 {
        match register {
            DebugRegister::Core => self.core,
            DebugRegister::Data => self.data,
        }
    }
}

/// A jump in the debug counter other than the expected single step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterGap {
    pub previous: u32,
    pub observed: u32,
}

impl CounterGap {
    pub fn expected(&self) -> u32 {
        self.previous.wrapping_add(1)
    }
}

/// What we know about the debug counter.
///
/// Only the most recent value is kept, so a gap is always measured against
/// the previous access, never reconstructed further back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebugBridgeState {
    last_seen_counter: u32,
    gaps: u64,
    last_gap: Option<CounterGap>,
}

impl DebugBridgeState {
    pub fn new(last_seen_counter: u32) -> Self {
        DebugBridgeState {
            last_seen_counter,
            gaps: 0,
            last_gap: None,
        }
    }

    pub fn last_seen_counter(&self) -> u32 {
        self.last_seen_counter
    }

    /// How many accesses have seen the counter jump by something other than
    /// one.
    pub fn gaps(&self) -> u64 {
        self.gaps
    }

    pub fn last_gap(&self) -> Option<CounterGap> {
        self.last_gap
    }

    /// Record the counter value read at the end of an access.
    fn observe(&mut self, counter: u32) -> Option<CounterGap> {
        let gap = (counter.wrapping_sub(self.last_seen_counter) != 1).then_some(CounterGap {
            previous: self.last_seen_counter,
            observed: counter,
        });
        if gap.is_some() {
            self.gaps += 1;
            self.last_gap = gap;
        }
        self.last_seen_counter = counter;
        gap
    }
}

/// A session's handle on the debug port.
#[derive(Debug, Clone)]
pub struct DebugPort {
    regs: DebugRegisters,
    state: DebugBridgeState,
    poll_limit: Option<u32>,
}

impl DebugPort {
    /// Read the counter once and start tracking from just before it.
    ///
    /// Every access moves the counter by one, so the first access after
    /// connecting sees it two ahead of the stored value and reports one gap.
    pub fn connect<T: Transport>(bus: &mut CsrBus<T>, regs: DebugRegisters) -> Result<Self> {
        let counter = bus.read32(regs.counter)?;
        debug!(counter, "debug port counter at connect");
        Ok(Self::with_state(regs, DebugBridgeState::new(counter.wrapping_sub(1))))
    }

    pub fn with_state(regs: DebugRegisters, state: DebugBridgeState) -> Self {
        DebugPort {
            regs,
            state,
            poll_limit: None,
        }
    }

    /// Give up waiting for a read to sync after `polls` counter reads instead
    /// of spinning forever.
    pub fn with_poll_limit(mut self, polls: u32) -> Self {
        self.poll_limit = Some(polls);
        self
    }

    pub fn registers(&self) -> &DebugRegisters {
        &self.regs
    }

    pub fn state(&self) -> &DebugBridgeState {
        &self.state
    }

    /// Latch `register` through the sync CSR and read it.
    ///
    /// Short replies on the counter don't stop the handshake. Only a short
    /// reply on the register itself comes back as an error, carrying the
    /// sentinel value, after the counter has been tracked as usual.
    pub fn read<T: Transport>(
        &mut self,
        bus: &mut CsrBus<T>,
        register: DebugRegister,
    ) -> Result<u32> {
        let (c0, _) = self.read_counter(bus)?;
        bus.write8(self.regs.sync, register.offset() as u8)?;
        self.wait_for_sync(bus, c0)?;
        let value = match bus.read32(self.regs.address_of(register)) {
            Err(e) if e.read_value().is_none() => return Err(e),
            value => value,
        };
        self.finish(bus)?;
        if let Ok(v) = &value {
            debug!("debug read {register:?} = {v:#010x}");
        }
        value
    }

    pub fn write<T: Transport>(
        &mut self,
        bus: &mut CsrBus<T>,
        register: DebugRegister,
        value: u32,
    ) -> Result<()> {
        let (c0, _) = self.read_counter(bus)?;
        debug!(c0, "debug write {register:?} = {value:#010x}");
        bus.write32(self.regs.address_of(register), value)?;
        self.finish(bus)?;
        Ok(())
    }

    /// Read the counter CSR. A short reply is logged and its sentinel value
    /// used in place of the counter; the flag is `false` then.
    fn read_counter<T: Transport>(&self, bus: &mut CsrBus<T>) -> Result<(u32, bool)> {
        match bus.read32(self.regs.counter) {
            Ok(counter) => Ok((counter, true)),
            Err(e) => match e.read_value() {
                Some(value) => {
                    warn!("debug counter: {e}");
                    Ok((value as u32, false))
                }
                None => Err(e),
            },
        }
    }

    /// Spin on the counter until it moves away from `c0`. A short reply
    /// counts as movement.
    fn wait_for_sync<T: Transport>(&self, bus: &mut CsrBus<T>, c0: u32) -> Result<()> {
        let mut polls = 0u32;
        loop {
            let (counter, intact) = self.read_counter(bus)?;
            if !intact || counter != c0 {
                return Ok(());
            }
            polls = polls.saturating_add(1);
            if let Some(limit) = self.poll_limit {
                if polls >= limit {
                    return Err(Error::SyncTimeout(polls));
                }
            }
        }
    }

    fn finish<T: Transport>(&mut self, bus: &mut CsrBus<T>) -> Result<()> {
        let (c1, _) = self.read_counter(bus)?;
        if let Some(gap) = self.state.observe(c1) {
            warn!(
                "lost debug packet: expected counter {:#x}, got {:#x}",
                gap.expected(),
                gap.observed
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::csr::CsrWidth;
    use crate::sim::{BusOp, SimulatedBus};

    const REGS: DebugRegisters = DebugRegisters {
        core: 0xe000_d800,
        data: 0xe000_d810,
        sync: 0xe000_d820,
        counter: 0xe000_d824,
    };

    fn bus(width: CsrWidth, counter: u32) -> CsrBus<SimulatedBus> {
        let mut sim = SimulatedBus::new();
        sim.attach_debug_port(REGS, width);
        sim.set_debug_counter(counter);
        CsrBus::new(sim, width)
    }

    #[test]
    fn offsets() {
        assert_eq!(DebugRegister::from_offset(0).unwrap(), DebugRegister::Core);
        assert_eq!(DebugRegister::from_offset(4).unwrap(), DebugRegister::Data);
        assert_eq!(DebugRegister::Data.offset(), 4);
        for bad in [1, 2, 3, 5, 6, 7, 8] {
            assert!(matches!(
                DebugRegister::from_offset(bad),
                Err(Error::UnsupportedDebugAddress(a)) if a == bad
            ));
        }
    }

    #[test]
    fn connect_starts_one_behind_the_counter() {
        let mut bus = bus(CsrWidth::Bits8, 0x20);
        let port = DebugPort::connect(&mut bus, REGS).unwrap();
        assert_eq!(port.state().last_seen_counter(), 0x1f);

        let mut bus = CsrBus::new(SimulatedBus::new(), CsrWidth::Bits32);
        let port = DebugPort::connect(&mut bus, REGS).unwrap();
        assert_eq!(port.state().last_seen_counter(), u32::MAX);
    }

    #[test]
    fn read_syncs_then_reads_the_register() {
        let mut bus = bus(CsrWidth::Bits32, 7);
        bus.link_mut().poke(REGS.data, 0x1234);
        let mut port = DebugPort::with_state(REGS, DebugBridgeState::new(7));

        assert_eq!(port.read(&mut bus, DebugRegister::Data).unwrap(), 0x1234);
        assert_eq!(
            bus.link().ops(),
            [
                BusOp::Read { address: REGS.counter },
                BusOp::Write { address: REGS.sync, value: 4 },
                BusOp::Read { address: REGS.counter },
                BusOp::Read { address: REGS.data },
                BusOp::Read { address: REGS.counter },
            ]
        );
        assert_eq!(port.state().last_seen_counter(), 8);
        assert_eq!(port.state().gaps(), 0);
    }

    #[test]
    fn read_spins_until_the_counter_moves() {
        let mut bus = bus(CsrWidth::Bits32, 0);
        bus.link_mut().set_sync_latency(5);
        let mut port = DebugPort::with_state(REGS, DebugBridgeState::new(0));

        port.read(&mut bus, DebugRegister::Core).unwrap();
        let polls = bus
            .link()
            .ops()
            .iter()
            .filter(|op| **op == BusOp::Read { address: REGS.counter })
            .count();
        // c0, five stalled polls, the one that sees the change, c1.
        assert_eq!(polls, 8);
        assert_eq!(port.state().gaps(), 0);
    }

    #[test]
    fn poll_limit_turns_a_stuck_sync_into_an_error() {
        let mut bus = bus(CsrWidth::Bits32, 0);
        bus.link_mut().set_sync_latency(100);
        let mut port = DebugPort::with_state(REGS, DebugBridgeState::new(0)).with_poll_limit(3);

        let err = port.read(&mut bus, DebugRegister::Core).unwrap_err();
        assert!(matches!(err, Error::SyncTimeout(3)), "{err:?}");
    }

    #[test]
    fn write_goes_straight_to_the_register() {
        let mut bus = bus(CsrWidth::Bits8, 3);
        let mut port = DebugPort::with_state(REGS, DebugBridgeState::new(3));
        port.write(&mut bus, DebugRegister::Core, 0x0002_0000).unwrap();

        assert_eq!(bus.link().load_csr(REGS.core, CsrWidth::Bits8), 0x0002_0000);
        assert!(!bus
            .link()
            .ops()
            .iter()
            .any(|op| matches!(op, BusOp::Write { address, .. } if *address == REGS.sync)));
        assert_eq!(port.state().last_seen_counter(), 4);
        assert_eq!(port.state().gaps(), 0);
    }

    #[test]
    fn lost_packets_are_reported_once_and_tracking_moves_on() {
        let mut bus = bus(CsrWidth::Bits32, 10);
        bus.link_mut().poke(REGS.core, 0x0000_1001);
        bus.link_mut().lose_debug_packets(2);
        let mut port = DebugPort::with_state(REGS, DebugBridgeState::new(10));

        assert_eq!(port.read(&mut bus, DebugRegister::Core).unwrap(), 0x0000_1001);
        assert_eq!(port.state().gaps(), 1);
        assert_eq!(
            port.state().last_gap(),
            Some(CounterGap { previous: 10, observed: 13 })
        );
        assert_eq!(port.state().last_gap().unwrap().expected(), 11);
        assert_eq!(port.state().last_seen_counter(), 13);

        // The next access is measured against 13, not 10.
        port.read(&mut bus, DebugRegister::Core).unwrap();
        assert_eq!(port.state().gaps(), 1);
        assert_eq!(port.state().last_seen_counter(), 14);
    }

    #[test]
    fn counter_wraps() {
        let mut bus = bus(CsrWidth::Bits8, u32::MAX);
        let mut port = DebugPort::with_state(REGS, DebugBridgeState::new(u32::MAX));
        port.write(&mut bus, DebugRegister::Data, 1).unwrap();
        assert_eq!(port.state().last_seen_counter(), 0);
        assert_eq!(port.state().gaps(), 0);
    }

    #[test]
    fn short_counter_reply_before_a_read_still_reads_the_register() {
        let mut bus = bus(CsrWidth::Bits32, 7);
        bus.link_mut().poke(REGS.data, 0x1234);
        bus.link_mut().truncate_reply(0, 19);
        let mut port = DebugPort::with_state(REGS, DebugBridgeState::new(7));

        assert_eq!(port.read(&mut bus, DebugRegister::Data).unwrap(), 0x1234);
        assert!(bus.link().ops().contains(&BusOp::Write { address: REGS.sync, value: 4 }));
        assert_eq!(port.state().last_seen_counter(), 8);
        assert_eq!(port.state().gaps(), 0);
    }

    #[test]
    fn short_reply_while_polling_ends_the_wait() {
        let mut bus = bus(CsrWidth::Bits32, 7);
        bus.link_mut().poke(REGS.core, 0x55);
        bus.link_mut().truncate_reply(1, 19);
        let mut port = DebugPort::with_state(REGS, DebugBridgeState::new(7));

        assert_eq!(port.read(&mut bus, DebugRegister::Core).unwrap(), 0x55);
        assert_eq!(
            bus.link().ops(),
            [
                BusOp::Read { address: REGS.counter },
                BusOp::Write { address: REGS.sync, value: 0 },
                BusOp::Read { address: REGS.counter },
                BusOp::Read { address: REGS.core },
                BusOp::Read { address: REGS.counter },
            ]
        );
        assert_eq!(port.state().last_seen_counter(), 8);
    }

    #[test]
    fn short_counter_reply_after_a_read_is_still_tracked() {
        let mut bus = bus(CsrWidth::Bits32, 7);
        bus.link_mut().poke(REGS.data, 0x1234);
        bus.link_mut().truncate_reply(3, 19);
        let mut port = DebugPort::with_state(REGS, DebugBridgeState::new(7));

        assert_eq!(port.read(&mut bus, DebugRegister::Data).unwrap(), 0x1234);
        assert_eq!(port.state().last_seen_counter(), u32::MAX);
        assert_eq!(
            port.state().last_gap(),
            Some(CounterGap { previous: 7, observed: u32::MAX })
        );
    }

    #[test]
    fn short_register_reply_is_the_only_error_a_read_returns() {
        let mut bus = bus(CsrWidth::Bits32, 7);
        bus.link_mut().truncate_reply(2, 19);
        let mut port = DebugPort::with_state(REGS, DebugBridgeState::new(7));

        let err = port.read(&mut bus, DebugRegister::Data).unwrap_err();
        assert!(matches!(err, Error::LengthMismatch { address, .. } if address == REGS.data));
        assert_eq!(bus.link().ops().last(), Some(&BusOp::Read { address: REGS.counter }));
        assert_eq!(port.state().last_seen_counter(), 8);
        assert_eq!(port.state().gaps(), 0);
    }

    #[test]
    fn short_counter_reply_before_a_write_still_writes() {
        let mut bus = bus(CsrWidth::Bits8, 3);
        bus.link_mut().truncate_reply(0, 19);
        let mut port = DebugPort::with_state(REGS, DebugBridgeState::new(3));

        port.write(&mut bus, DebugRegister::Core, 0x0002_0000).unwrap();
        assert_eq!(bus.link().load_csr(REGS.core, CsrWidth::Bits8), 0x0002_0000);
        assert_eq!(port.state().last_seen_counter(), 4);
        assert_eq!(port.state().gaps(), 0);
    }

    #[test]
    fn short_counter_reply_after_a_write_is_still_tracked() {
        let mut bus = bus(CsrWidth::Bits32, 3);
        bus.link_mut().truncate_reply(1, 19);
        let mut port = DebugPort::with_state(REGS, DebugBridgeState::new(3));

        port.write(&mut bus, DebugRegister::Data, 9).unwrap();
        assert_eq!(bus.link().peek(REGS.data), 9);
        assert_eq!(port.state().last_seen_counter(), u32::MAX);
        assert_eq!(port.state().gaps(), 1);
    }
}
