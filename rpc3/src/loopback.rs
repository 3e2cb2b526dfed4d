//! In-process transport for tests and single-process demos.

use std::{
    cell::RefCell,
    collections::{HashMap, HashSet, VecDeque},
    net::SocketAddr,
    rc::Rc,
};

use bytes::Bytes;
use foldhash::fast::RandomState;

use crate::transport::{Packet, SendParams, SystemAddress, Transport};

#[derive(Default)]
struct Inner {
    inboxes: HashMap<SocketAddr, VecDeque<Packet>, RandomState>,
    links: HashSet<(SocketAddr, SocketAddr), RandomState>,
}

/// A set of endpoints that exchange frames through in-memory queues.
#[derive(Clone, Default)]
pub struct LoopbackNetwork {
    inner: Rc<RefCell<Inner>>,
}

impl LoopbackNetwork {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn join(&self, address: SocketAddr) -> Rc<LoopbackTransport> {
        self.inner.borrow_mut().inboxes.entry(address).or_default();
        Rc::new(LoopbackTransport {
            network: self.clone(),
            address,
            sent: RefCell::default(),
        })
    }

    pub fn connect(&self, a: SocketAddr, b: SocketAddr) {
        let mut inner = self.inner.borrow_mut();
        inner.links.insert((a, b));
        inner.links.insert((b, a));
    }

    pub fn disconnect(&self, a: SocketAddr, b: SocketAddr) {
        let mut inner = self.inner.borrow_mut();
        inner.links.remove(&(a, b));
        inner.links.remove(&(b, a));
    }
}

/// A frame as it was handed to [`Transport::send`].
#[derive(Debug, Clone)]
pub struct SentFrame {
    pub target: SystemAddress,
    pub params: SendParams,
    pub data: Bytes,
}

pub struct LoopbackTransport {
    network: LoopbackNetwork,
    address: SocketAddr,
    sent: RefCell<Vec<SentFrame>>,
}

impl LoopbackTransport {
    #[must_use]
    pub fn address(&self) -> SocketAddr {
        self.address
    }

    /// Pops the oldest frame delivered to this endpoint.
    #[must_use]
    pub fn receive(&self) -> Option<Packet> {
        self.network
            .inner
            .borrow_mut()
            .inboxes
            .get_mut(&self.address)?
            .pop_front()
    }

    /// Every frame this endpoint sent, delivered or not.
    #[must_use]
    pub fn sent_frames(&self) -> Vec<SentFrame> {
        self.sent.borrow().clone()
    }

    pub fn clear_sent(&self) {
        self.sent.borrow_mut().clear();
    }
}

impl Transport for LoopbackTransport {
    fn send(&self, frame: Bytes, params: &SendParams, target: SystemAddress) {
        self.sent.borrow_mut().push(SentFrame {
            target,
            params: *params,
            data: frame.clone(),
        });
        let Some(to) = target.0 else {
            return;
        };
        let mut inner = self.network.inner.borrow_mut();
        if !inner.links.contains(&(self.address, to)) {
            tracing::debug!("loopback drop {} -> {to}: not connected", self.address);
            return;
        }
        if let Some(inbox) = inner.inboxes.get_mut(&to) {
            inbox.push_back(Packet {
                sender: SystemAddress::from(self.address),
                data: frame,
            });
        }
    }

    fn connected_peers(&self) -> Vec<SystemAddress> {
        let mut peers: Vec<_> = self
            .network
            .inner
            .borrow()
            .links
            .iter()
            .filter(|(from, _)| *from == self.address)
            .map(|(_, to)| *to)
            .collect();
        peers.sort();
        peers.into_iter().map(SystemAddress::from).collect()
    }

    fn local_address(&self) -> SystemAddress {
        SystemAddress::from(self.address)
    }
}
