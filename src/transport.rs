//! Byte links to an Etherbone bridge.
//!
//! A [`Transport`] moves one packet out and one packet in. It never retries,
//! reorders or frames anything: a lost or duplicated datagram is visible to
//! whoever is driving it, and keeping requests and replies in lock-step is
//! the caller's job.

use std::io::{self, Read, Write};
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, TcpStream, ToSocketAddrs, UdpSocket};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::packet::PACKET_LEN;
use crate::{Error, Result};

/// A link that can carry Etherbone packets.
pub trait Transport {
    /// Send `bytes` as one packet. Returns how many bytes went out.
    fn send(&mut self, bytes: &[u8]) -> Result<usize>;

    /// Receive one packet into `buf`. Returns its length.
    fn recv(&mut self, buf: &mut [u8]) -> Result<usize>;
}

impl<T: Transport + ?Sized> Transport for &mut T {
    fn send(&mut self, bytes: &[u8]) -> Result<usize> {
        (**self).send(bytes)
    }

    fn recv(&mut self, buf: &mut [u8]) -> Result<usize> {
        (**self).recv(buf)
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn send(&mut self, bytes: &[u8]) -> Result<usize> {
        (**self).send(bytes)
    }

    fn recv(&mut self, buf: &mut [u8]) -> Result<usize> {
        (**self).recv(buf)
    }
}

/// Which kind of socket to reach the bridge over.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// Separate receive and transmit datagram sockets. This is what LiteX
    /// Etherbone cores speak.
    #[default]
    Udp,
    /// A single connected stream, for bridges behind a TCP proxy.
    Tcp,
}

fn resolve(host: &str, port: u16) -> Result<SocketAddr> {
    let resolve_err = |source| Error::Resolve {
        host: host.to_owned(),
        port,
        source,
    };
    (host, port)
        .to_socket_addrs()
        .map_err(resolve_err)?
        .next()
        .ok_or_else(|| {
            resolve_err(io::Error::new(
                io::ErrorKind::NotFound,
                "no addresses returned",
            ))
        })
}

/// Etherbone over UDP.
///
/// Replies are accepted from any source on the receive socket; requests go
/// out of a second, unbound socket to the resolved remote address.
#[derive(Debug)]
pub struct UdpTransport {
    rx: UdpSocket,
    tx: UdpSocket,
    remote: SocketAddr,
}

impl UdpTransport {
    /// Bind the receive half to `local_port` on every interface (`0` picks an
    /// ephemeral port), then resolve `host:port` and open the transmit half.
    pub fn connect(host: &str, port: u16, local_port: u16) -> Result<Self> {
        let rx = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, local_port)).map_err(|source| {
            Error::Bind {
                port: local_port,
                source,
            }
        })?;

        let remote = resolve(host, port)?;
        let tx = match remote {
            SocketAddr::V4(_) => UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)),
            SocketAddr::V6(_) => UdpSocket::bind((Ipv6Addr::UNSPECIFIED, 0)),
        }
        .map_err(Error::Socket)?;

        info!(%remote, local_port, "opened etherbone link over udp");
        Ok(UdpTransport { rx, tx, remote })
    }

    /// Where replies should be sent.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.rx.local_addr()?)
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote
    }
}

impl Transport for UdpTransport {
    fn send(&mut self, bytes: &[u8]) -> Result<usize> {
        Ok(self.tx.send_to(bytes, self.remote)?)
    }

    fn recv(&mut self, buf: &mut [u8]) -> Result<usize> {
        let (len, from) = self.rx.recv_from(buf)?;
        debug!(%from, len, "udp datagram");
        Ok(len)
    }
}

/// Etherbone over a TCP stream.
#[derive(Debug)]
pub struct TcpTransport {
    stream: TcpStream,
}

impl TcpTransport {
    pub fn connect(host: &str, port: u16) -> Result<Self> {
        let addr = resolve(host, port)?;
        let stream =
            TcpStream::connect(addr).map_err(|source| Error::Connect { addr, source })?;
        info!(remote = %addr, "opened etherbone link over tcp");
        Ok(TcpTransport { stream })
    }

    /// Wrap an already connected stream.
    pub fn from_stream(stream: TcpStream) -> Self {
        TcpTransport { stream }
    }
}

impl Transport for TcpTransport {
    fn send(&mut self, bytes: &[u8]) -> Result<usize> {
        self.stream.write_all(bytes)?;
        Ok(bytes.len())
    }

    /// Reads until one packet's worth of bytes has arrived or the peer hangs
    /// up, since a stream doesn't keep packet boundaries.
    fn recv(&mut self, buf: &mut [u8]) -> Result<usize> {
        let want = buf.len().min(PACKET_LEN);
        let mut filled = 0;
        while filled < want {
            match self.stream.read(&mut buf[filled..want]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(filled)
    }
}

/// Either kind of link, picked at runtime.
#[derive(Debug)]
pub enum Connection {
    Udp(UdpTransport),
    Tcp(TcpTransport),
}

impl Connection {
    /// Open a link to `host:port`. `local_port` only matters for UDP.
    pub fn open(protocol: Protocol, host: &str, port: u16, local_port: u16) -> Result<Self> {
        Ok(match protocol {
            Protocol::Udp => Connection::Udp(UdpTransport::connect(host, port, local_port)?),
            Protocol::Tcp => Connection::Tcp(TcpTransport::connect(host, port)?),
        })
    }

    pub fn protocol(&self) -> Protocol {
        match self {
            Connection::Udp(_) => Protocol::Udp,
            Connection::Tcp(_) => Protocol::Tcp,
        }
    }

    /// Release the sockets.
    pub fn close(self) {
        info!(protocol = ?self.protocol(), "closing etherbone link");
    }
}

impl Transport for Connection {
    fn send(&mut self, bytes: &[u8]) -> Result<usize> {
        match self {
            Connection::Udp(t) => t.send(bytes),
            Connection::Tcp(t) => t.send(bytes),
        }
    }

    fn recv(&mut self, buf: &mut [u8]) -> Result<usize> {
        match self {
            Connection::Udp(t) => t.recv(buf),
            Connection::Tcp(t) => t.recv(buf),
        }
    }
}
