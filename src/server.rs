//! A TCP server speaking OpenOCD's VexRiscv bridge protocol.
//!
//! Each request is a fixed 10-byte record:
//!
//! ```text
//! +----+------+---------------+---------------+
//! | rw | size | address (LE)  | data (LE)     |
//! +----+------+---------------+---------------+
//!   0    1      2..6            6..10
//! ```
//!
//! `rw` is 0 for a read and 1 for a write; `size` is 0, 1 or 2 for an 8, 16
//! or 32-bit access. Reads are answered with the 4-byte value; writes aren't
//! answered at all. Addresses inside [`DEBUG_WINDOW`] go to the CPU debug
//! port, everything else goes to the bus.

use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpListener};
use std::ops::Range;

use tracing::{debug, error, info, warn};

use crate::session::Session;
use crate::transport::Transport;
use crate::{Error, Result};

pub const REQUEST_LEN: usize = 10;
pub const RESPONSE_LEN: usize = 4;

/// Where OpenOCD expects the debug port's `CORE` and `DATA` registers.
pub const DEBUG_WINDOW: Range<u32> = 0xf00f_0000..0xf00f_0008;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Read,
    Write,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SizeClass {
    Byte,
    Halfword,
    Word,
}

impl SizeClass {
    pub fn bits(self) -> u32 {
        match self {
            SizeClass::Byte => 8,
            SizeClass::Halfword => 16,
            SizeClass::Word => 32,
        }
    }

    fn mask(self) -> u32 {
        match self {
            SizeClass::Byte => 0xff,
            SizeClass::Halfword => 0xffff,
            SizeClass::Word => 0xffff_ffff,
        }
    }
}

/// Why a request was dropped without an answer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RequestError {
    #[error("unrecognized request length {0}")]
    Length(usize),
    #[error("unrecognized readwrite command {0}")]
    Op(u8),
    #[error("unrecognized size {0}")]
    Size(u8),
    #[error("unsupported {bits}-bit debug access at {address:#010x}")]
    DebugSize { address: u32, bits: u32 },
}

/// One decoded request from the debugger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExternalRequest {
    pub op: Op,
    pub size: SizeClass,
    pub address: u32,
    pub data: u32,
}

/// Where a request ends up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// A plain bus access at this address.
    Bus(u32),
    /// A debug port access at this offset into the debug window.
    Debug(u32),
}

impl ExternalRequest {
    pub fn parse(buf: &[u8]) -> Result<Self, RequestError> {
        let buf: &[u8; REQUEST_LEN] = buf
            .try_into()
            .map_err(|_| RequestError::Length(buf.len()))?;

        let op = match buf[0] {
            0 => Op::Read,
            1 => Op::Write,
            other => return Err(RequestError::Op(other)),
        };
        let size = match buf[1] {
            0 => SizeClass::Byte,
            1 => SizeClass::Halfword,
            2 => SizeClass::Word,
            other => return Err(RequestError::Size(other)),
        };
        let address = u32::from_le_bytes([buf[2], buf[3], buf[4], buf[5]]);
        let data = u32::from_le_bytes([buf[6], buf[7], buf[8], buf[9]]);

        if DEBUG_WINDOW.contains(&address) && size != SizeClass::Word {
            return Err(RequestError::DebugSize {
                address,
                bits: size.bits(),
            });
        }

        Ok(ExternalRequest {
            op,
            size,
            address,
            data,
        })
    }

    pub fn to_bytes(&self) -> [u8; REQUEST_LEN] {
        let mut buf = [0u8; REQUEST_LEN];
        buf[0] = match self.op {
            Op::Read => 0,
            Op::Write => 1,
        };
        buf[1] = match self.size {
            SizeClass::Byte => 0,
            SizeClass::Halfword => 1,
            SizeClass::Word => 2,
        };
        buf[2..6].copy_from_slice(&self.address.to_le_bytes());
        buf[6..10].copy_from_slice(&self.data.to_le_bytes());
        buf
    }

    pub fn route(&self) -> Route {
        if DEBUG_WINDOW.contains(&self.address) {
            Route::Debug(self.address - DEBUG_WINDOW.start)
        } else {
            Route::Bus(self.address)
        }
    }
}

/// Serves one debugger at a time on top of a [`Session`].
#[derive(Debug)]
pub struct BridgeServer<T> {
    listener: TcpListener,
    session: Session<T>,
}

impl<T: Transport> BridgeServer<T> {
    pub fn bind(addr: SocketAddr, session: Session<T>) -> Result<Self> {
        let listener = TcpListener::bind(addr).map_err(|source| Error::Bind {
            port: addr.port(),
            source,
        })?;
        Ok(BridgeServer { listener, session })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn session(&mut self) -> &mut Session<T> {
        &mut self.session
    }

    /// Accept and serve clients one after another, forever.
    ///
    /// Only returns on an accept failure or an unsupported debug address,
    /// which means the client and this bridge disagree about the debug
    /// port layout.
    pub fn run(&mut self) -> Result<()> {
        loop {
            self.accept_one()?;
        }
    }

    /// Accept one client and serve it until it disconnects.
    pub fn accept_one(&mut self) -> Result<()> {
        info!("accepting connections on {}", self.local_addr()?);
        let (stream, peer) = self.listener.accept()?;
        info!(%peer, "accepted debugger connection");
        self.serve(stream)
    }

    /// Serve requests from `client` until it hangs up.
    pub fn serve<S: Read + Write>(&mut self, mut client: S) -> Result<()> {
        let mut buf = [0u8; REQUEST_LEN];
        loop {
            let len = match client.read(&mut buf) {
                Ok(0) => {
                    info!("debugger disconnected");
                    return Ok(());
                }
                Ok(len) => len,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!("debugger connection failed: {e}");
                    return Ok(());
                }
            };

            let request = match ExternalRequest::parse(&buf[..len]) {
                Ok(request) => request,
                Err(e) => {
                    warn!("dropping request: {e}");
                    continue;
                }
            };

            let response = match self.handle(&request) {
                Ok(response) => response,
                Err(e @ Error::UnsupportedDebugAddress(_)) => return Err(e),
                Err(e) => match (request.op, e.read_value()) {
                    (Op::Read, Some(value)) => {
                        warn!("{e}");
                        Some(value as u32 & request.size.mask())
                    }
                    (Op::Write, Some(_)) => {
                        warn!("{e}");
                        None
                    }
                    (_, None) => {
                        error!("bus access failed, dropping debugger: {e}");
                        return Ok(());
                    }
                },
            };

            if let Some(value) = response {
                let bytes: [u8; RESPONSE_LEN] = value.to_le_bytes();
                if let Err(e) = client.write_all(&bytes).and_then(|()| client.flush()) {
                    warn!("couldn't answer debugger: {e}");
                    return Ok(());
                }
            }
        }
    }

    /// Carry out one request. Returns the value to send back, for reads.
    pub fn handle(&mut self, request: &ExternalRequest) -> Result<Option<u32>> {
        let ExternalRequest { op, size, data, .. } = *request;
        match (request.route(), op) {
            (Route::Debug(offset), _) if size != SizeClass::Word => {
                Err(Error::UnsupportedDebugSize {
                    offset,
                    bits: size.bits(),
                })
            }
            (Route::Debug(offset), Op::Read) => {
                let value = self.session.debug_read(offset)?;
                debug!("32-bit debug read {offset:#x} = {value:#010x}");
                Ok(Some(value))
            }
            (Route::Debug(offset), Op::Write) => {
                debug!("32-bit debug write {offset:#x} = {data:#010x}");
                self.session.debug_write(offset, data)?;
                Ok(None)
            }
            (Route::Bus(address), Op::Read) => {
                let bus = self.session.bus();
                let value = match size {
                    SizeClass::Byte => bus.read8(address)?.into(),
                    SizeClass::Halfword => bus.read16(address)?.into(),
                    SizeClass::Word => bus.read32(address)?,
                };
                debug!("{}-bit read {address:#010x} = {value:#x}", size.bits());
                Ok(Some(value))
            }
            (Route::Bus(address), Op::Write) => {
                debug!("{}-bit write {address:#010x} = {:#x}", size.bits(), data & size.mask());
                let bus = self.session.bus();
                match size {
                    SizeClass::Byte => bus.write8(address, data as u8)?,
                    SizeClass::Halfword => bus.write16(address, data as u16)?,
                    SizeClass::Word => bus.write32(address, data)?,
                }
                Ok(None)
            }
        }
    }
}
