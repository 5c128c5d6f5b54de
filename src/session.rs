use crate::csr::CsrBus;
use crate::debug::{DebugPort, DebugRegister, DebugRegisters};
use crate::transport::Transport;
use crate::{Error, Result};

/// Everything needed to talk to one SoC: the bus link and, optionally, the
/// CPU's debug port together with its counter tracking.
///
/// A session is driven by one thread at a time; nothing in it is shared.
#[derive(Debug)]
pub struct Session<T> {
    bus: CsrBus<T>,
    debug: Option<DebugPort>,
}

impl<T: Transport> Session<T> {
    /// A session with plain bus access only.
    pub fn new(bus: CsrBus<T>) -> Self {
        Session { bus, debug: None }
    }

    /// A session that also drives the debug port at `regs`.
    ///
    /// Reads the debug counter once to start loss tracking.
    pub fn with_debug_port(mut bus: CsrBus<T>, regs: DebugRegisters) -> Result<Self> {
        let debug = DebugPort::connect(&mut bus, regs)?;
        Ok(Session {
            bus,
            debug: Some(debug),
        })
    }

    /// Swap in a debug port set up some other way (a preset counter state,
    /// a poll limit).
    pub fn set_debug_port(&mut self, port: DebugPort) {
        self.debug = Some(port);
    }

    pub fn bus(&mut self) -> &mut CsrBus<T> {
        &mut self.bus
    }

    pub fn debug_port(&self) -> Option<&DebugPort> {
        self.debug.as_ref()
    }

    /// Read the debug register at `offset` (0 for `CORE`, 4 for `DATA`).
    pub fn debug_read(&mut self, offset: u32) -> Result<u32> {
        let register = DebugRegister::from_offset(offset)?;
        let port = self.debug.as_mut().ok_or(Error::NoDebugPort)?;
        port.read(&mut self.bus, register)
    }

    /// Write the debug register at `offset` (0 for `CORE`, 4 for `DATA`).
    pub fn debug_write(&mut self, offset: u32, value: u32) -> Result<()> {
        let register = DebugRegister::from_offset(offset)?;
        let port = self.debug.as_mut().ok_or(Error::NoDebugPort)?;
        port.write(&mut self.bus, register, value)
    }

    /// End the session, handing back the link.
    pub fn into_link(self) -> T {
        self.bus.into_link()
    }
}
