//! UDP socket link

use crate::error::TransportError;
use crate::host::{Host, Link};
use log::info;
use std::io;
use std::net::{SocketAddr, UdpSocket};

/// Non-blocking UDP socket used as a [`Link`]
pub struct UdpLink {
    socket: UdpSocket,
    local_addr: SocketAddr,
}

impl UdpLink {
    pub fn bind(address: SocketAddr) -> io::Result<Self> {
        let socket = UdpSocket::bind(address)?;
        socket.set_nonblocking(true)?;
        let local_addr = socket.local_addr()?;

        Ok(Self { socket, local_addr })
    }
}

impl Link for UdpLink {
    fn send_to(&mut self, data: &[u8], address: SocketAddr) -> io::Result<()> {
        self.socket.send_to(data, address).map(|_| ())
    }

    fn recv_from(&mut self, buffer: &mut [u8]) -> io::Result<Option<(usize, SocketAddr)>> {
        match self.socket.recv_from(buffer) {
            Ok(received) => Ok(Some(received)),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

/// Opens a UDP transport host
///
/// `bind` of `None` picks an ephemeral port on all interfaces, which is what
/// an outbound-only client wants.
pub fn open(
    bind: Option<SocketAddr>,
    max_peers: usize,
    channels: u8,
) -> Result<Host<UdpLink>, TransportError> {
    let address = bind.unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 0)));
    let link = UdpLink::bind(address)?;
    info!("UDP host bound to {}", link.local_addr());

    Ok(Host::new(link, max_peers, channels))
}
