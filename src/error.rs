use std::io;
use std::net::SocketAddr;

use thiserror::Error;

/// Everything that can go wrong talking to a LiteX SoC over Etherbone.
#[derive(Debug, Error)]
pub enum Error {
    /// The remote host name couldn't be turned into a socket address.
    #[error("failed to resolve remote address {host}:{port}")]
    Resolve {
        host: String,
        port: u16,
        #[source]
        source: io::Error,
    },
    /// The OS refused to give us a socket.
    #[error("unable to create socket")]
    Socket(#[source] io::Error),
    /// The UDP receive socket couldn't be bound to its local port.
    #[error("unable to bind receive socket to port {port}")]
    Bind {
        port: u16,
        #[source]
        source: io::Error,
    },
    /// The TCP connection to the remote bridge couldn't be established.
    #[error("unable to connect to {addr}")]
    Connect {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    /// A `send` or `recv` on an established link failed.
    #[error("bus link I/O failed")]
    Io(#[from] io::Error),
    /// The bus replied to a read with something other than one whole
    /// Etherbone packet.
    #[error("unexpected read length {len} for {address:#010x}")]
    LengthMismatch { address: u32, len: usize },
    /// Some lanes of a multi-lane read came back with the wrong length.
    ///
    /// Every lane is still issued; the failed ones hold all-ones in `value`.
    #[error("{failed} of {lanes} lanes failed reading {address:#010x}")]
    PartialRead {
        address: u32,
        value: u64,
        lanes: usize,
        failed: usize,
    },
    /// The buffer handed to the packet parser isn't an Etherbone packet.
    #[error("malformed Etherbone packet: {0}")]
    MalformedPacket(&'static str),
    /// A debug port access named something other than `CORE` (0) or `DATA`
    /// (4).
    #[error("unsupported debug register address {0:#x}")]
    UnsupportedDebugAddress(u32),
    /// The debug registers only take whole 32-bit accesses.
    #[error("unsupported {bits}-bit debug access at offset {offset:#x}")]
    UnsupportedDebugSize { offset: u32, bits: u32 },
    /// The session was opened without a debug port.
    #[error("no debug port configured")]
    NoDebugPort,
    /// The debug counter didn't move within the configured number of polls.
    #[error("debug counter did not advance after {0} polls")]
    SyncTimeout(u32),
    /// The SoC info has no `csr` memory region.
    #[error("SoC info has no `csr` memory region")]
    NoCsrRegion,
    /// A CSR the caller asked for by name isn't in the SoC info.
    #[error("CSR `{0}` not found in SoC info")]
    MissingCsr(String),
    /// `config_csr_data_width` is something other than 8 or 32.
    #[error("unsupported CSR data width {0}")]
    UnsupportedCsrWidth(String),
}

impl Error {
    /// The value a failed read produced anyway, if there is one.
    ///
    /// Length mismatches yield the all-ones sentinel (truncated by the caller
    /// to the access width); partial reads yield whatever was assembled.
    pub fn read_value(&self) -> Option<u64> {
        match *self {
            Error::LengthMismatch { .. } => Some(u64::MAX),
            Error::PartialRead { value, .. } => Some(value),
            _ => None,
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
