use std::net::{Ipv4Addr, SocketAddr};

use serde::{Deserialize, Serialize};

use crate::csr::{CsrBus, CsrWidth};
use crate::debug::{DebugPort, DebugRegisters};
use crate::session::Session;
use crate::transport::{Connection, Protocol};
use crate::Result;

/// The port LiteX Etherbone cores listen on, and reply to.
pub const DEFAULT_ETHERBONE_PORT: u16 = 1234;

/// The port OpenOCD's VexRiscv driver expects the debug bridge on.
pub const DEFAULT_BRIDGE_PORT: u16 = 7893;

/// How to reach a SoC and how to serve its debug port.
///
/// Every field has a default, so a config file only needs to name what it
/// changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct Config {
    /// Host name or address of the Etherbone core.
    pub host: String,
    pub port: u16,
    /// Local port replies arrive on, for UDP. `0` picks one.
    pub local_port: u16,
    pub protocol: Protocol,
    pub csr_width: CsrWidth,
    /// Where the debug bridge server listens for OpenOCD.
    pub listen: SocketAddr,
    /// The debug bridge CSRs. Without them the session has no debug port.
    pub debug: Option<DebugRegisters>,
    /// Give up on a debug read after this many counter polls.
    pub sync_poll_limit: Option<u32>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            host: "10.0.11.2".to_owned(),
            port: DEFAULT_ETHERBONE_PORT,
            local_port: DEFAULT_ETHERBONE_PORT,
            protocol: Protocol::Udp,
            csr_width: CsrWidth::Bits8,
            listen: SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_BRIDGE_PORT)),
            debug: None,
            sync_poll_limit: None,
        }
    }
}

impl Config {
    pub fn open_link(&self) -> Result<Connection> {
        Connection::open(self.protocol, &self.host, self.port, self.local_port)
    }

    /// Open the link and, if debug registers are configured, the debug port.
    pub fn connect(&self) -> Result<Session<Connection>> {
        let bus = CsrBus::new(self.open_link()?, self.csr_width);
        self.start_session(bus)
    }

    /// Build a session over an existing bus.
    pub fn start_session<T: crate::transport::Transport>(
        &self,
        mut bus: CsrBus<T>,
    ) -> Result<Session<T>> {
        let Some(regs) = self.debug else {
            return Ok(Session::new(bus));
        };
        let mut port = DebugPort::connect(&mut bus, regs)?;
        if let Some(limit) = self.sync_poll_limit {
            port = port.with_poll_limit(limit);
        }
        let mut session = Session::new(bus);
        session.set_debug_port(port);
        Ok(session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimulatedBus;

    #[test]
    fn defaults_match_the_stock_etherbone_setup() {
        let config = Config::default();
        assert_eq!(config.port, 1234);
        assert_eq!(config.local_port, 1234);
        assert_eq!(config.protocol, Protocol::Udp);
        assert_eq!(config.csr_width, CsrWidth::Bits8);
        assert_eq!(config.listen.port(), 7893);
    }

    #[test]
    fn start_session_without_debug_registers_skips_the_counter() {
        let config = Config::default();
        let session = config
            .start_session(CsrBus::new(SimulatedBus::new(), CsrWidth::Bits8))
            .unwrap();
        assert!(session.debug_port().is_none());
        assert!(session.into_link().ops().is_empty());
    }

    #[test]
    fn start_session_with_debug_registers() {
        let regs = DebugRegisters {
            core: 0,
            data: 0x10,
            sync: 0x20,
            counter: 0x24,
        };
        let config = Config {
            csr_width: CsrWidth::Bits32,
            debug: Some(regs),
            sync_poll_limit: Some(10),
            ..Config::default()
        };
        let mut sim = SimulatedBus::new();
        sim.attach_debug_port(regs, CsrWidth::Bits32);
        sim.set_debug_counter(5);

        let session = config
            .start_session(CsrBus::new(sim, config.csr_width))
            .unwrap();
        let port = session.debug_port().unwrap();
        assert_eq!(port.state().last_seen_counter(), 4);
        assert_eq!(port.registers(), &regs);
    }
}
