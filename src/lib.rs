//! Register access and a VexRiscv debug bridge for LiteX SoCs over
//! Etherbone.
//!
//! [`CsrBus`] reads and writes registers over a [`Transport`] (UDP or TCP),
//! splitting accesses into 8-bit lanes on SoCs built with the default CSR
//! data width. [`DebugPort`] drives the CPU's debug bridge on top of that,
//! and [`BridgeServer`] exposes both to OpenOCD.
//!
//! [`Transport`]: transport::Transport

pub mod config;
pub mod csr;
pub mod debug;
mod error;
pub mod packet;
pub mod server;
pub mod session;
#[cfg(any(test, feature = "sim"))]
pub mod sim;
mod soc_info;
pub mod transport;

pub use config::Config;
pub use csr::{CsrBus, CsrWidth, WriteReport};
pub use debug::{DebugBridgeState, DebugPort, DebugRegister, DebugRegisters};
pub use error::{Error, Result};
pub use server::BridgeServer;
pub use session::Session;
pub use soc_info::*;
pub use transport::{Connection, Protocol, TcpTransport, UdpTransport};
