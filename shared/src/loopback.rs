//! In-process datagram network
//!
//! [`LoopbackNetwork`] routes datagrams between [`LoopbackLink`]s living in the
//! same process. It behaves like a lossless local UDP network and lets tests
//! cut an endpoint off to simulate a remote end that stopped answering.

use crate::error::TransportError;
use crate::host::{Host, Link};
use log::debug;
use std::collections::{HashMap, HashSet, VecDeque};
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex, MutexGuard};

const FIRST_EPHEMERAL_PORT: u16 = 49152;

type Datagram = (SocketAddr, Vec<u8>);

#[derive(Default)]
struct Hub {
    endpoints: HashMap<SocketAddr, VecDeque<Datagram>>,
    muted: HashSet<SocketAddr>,
    next_port: u16,
    delivered: u64,
    dropped: u64,
}

impl Hub {
    /// Finds the bound endpoint a datagram for `to` lands on, honouring
    /// wildcard binds
    fn route(&self, to: SocketAddr) -> Option<SocketAddr> {
        if self.endpoints.contains_key(&to) {
            return Some(to);
        }

        let wildcard = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), to.port());
        if self.endpoints.contains_key(&wildcard) {
            return Some(wildcard);
        }

        None
    }

    fn allocate(&mut self) -> SocketAddr {
        loop {
            let port = FIRST_EPHEMERAL_PORT.wrapping_add(self.next_port);
            self.next_port = self.next_port.wrapping_add(1);

            let address = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port);
            if self.route(address).is_none() {
                return address;
            }
        }
    }
}

/// Shared handle to an in-process network
#[derive(Clone, Default)]
pub struct LoopbackNetwork {
    hub: Arc<Mutex<Hub>>,
}

impl LoopbackNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    fn hub(&self) -> MutexGuard<'_, Hub> {
        self.hub.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Binds a new endpoint, picking a local port when `bind` is `None`
    pub fn bind(&self, bind: Option<SocketAddr>) -> Result<LoopbackLink, TransportError> {
        let mut hub = self.hub();

        let address = match bind {
            Some(address) => {
                if hub.endpoints.contains_key(&address) {
                    return Err(TransportError::AddressInUse(address));
                }
                address
            }
            None => hub.allocate(),
        };

        hub.endpoints.insert(address, VecDeque::new());
        debug!("Loopback endpoint bound to {}", address);

        Ok(LoopbackLink {
            network: self.clone(),
            address,
            open: true,
        })
    }

    /// Opens a transport host on this network
    pub fn open(
        &self,
        bind: Option<SocketAddr>,
        max_peers: usize,
        channels: u8,
    ) -> Result<Host<LoopbackLink>, TransportError> {
        Ok(Host::new(self.bind(bind)?, max_peers, channels))
    }

    /// Silently drops everything sent to or from `address`
    pub fn mute(&self, address: SocketAddr) {
        self.hub().muted.insert(address);
    }

    pub fn unmute(&self, address: SocketAddr) {
        self.hub().muted.remove(&address);
    }

    /// Delivers a raw datagram as if `from` had sent it
    pub fn inject(&self, from: SocketAddr, to: SocketAddr, data: Vec<u8>) {
        self.deliver(from, to, data);
    }

    pub fn delivered(&self) -> u64 {
        self.hub().delivered
    }

    pub fn dropped(&self) -> u64 {
        self.hub().dropped
    }

    fn deliver(&self, from: SocketAddr, to: SocketAddr, data: Vec<u8>) {
        let mut hub = self.hub();

        let bound_from = hub.route(from).unwrap_or(from);
        // A wildcard bind answers from the loopback address, as a real socket would
        let from = if from.ip().is_unspecified() {
            SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), from.port())
        } else {
            from
        };

        let target = hub.route(to);
        let muted = hub.muted.contains(&bound_from)
            || hub.muted.contains(&from)
            || target.map_or(false, |target| hub.muted.contains(&target));

        match target {
            Some(target) if !muted => {
                if let Some(queue) = hub.endpoints.get_mut(&target) {
                    queue.push_back((from, data));
                }
                hub.delivered += 1;
            }
            _ => hub.dropped += 1,
        }
    }

    fn receive(&self, address: SocketAddr) -> Option<Datagram> {
        self.hub()
            .endpoints
            .get_mut(&address)
            .and_then(VecDeque::pop_front)
    }

    fn unbind(&self, address: SocketAddr) {
        self.hub().endpoints.remove(&address);
    }
}

/// One bound endpoint of a [`LoopbackNetwork`]
pub struct LoopbackLink {
    network: LoopbackNetwork,
    address: SocketAddr,
    open: bool,
}

impl Link for LoopbackLink {
    fn send_to(&mut self, data: &[u8], address: SocketAddr) -> io::Result<()> {
        if !self.open {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "link closed"));
        }

        self.network.deliver(self.address, address, data.to_vec());
        Ok(())
    }

    fn recv_from(&mut self, buffer: &mut [u8]) -> io::Result<Option<(usize, SocketAddr)>> {
        if !self.open {
            return Ok(None);
        }

        Ok(self.network.receive(self.address).map(|(from, data)| {
            let len = data.len().min(buffer.len());
            buffer[..len].copy_from_slice(&data[..len]);
            (len, from)
        }))
    }

    fn local_addr(&self) -> SocketAddr {
        self.address
    }

    fn close(&mut self) {
        if self.open {
            self.open = false;
            self.network.unbind(self.address);
        }
    }
}

impl Drop for LoopbackLink {
    fn drop(&mut self) {
        self.close();
    }
}
