use std::net::SocketAddr;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Peer address on the transport; `UNASSIGNED` means "no peer".
#[derive(Deserialize, Serialize, Debug, Default, PartialEq, Eq, Hash, Clone, Copy)]
#[serde(transparent)]
pub struct SystemAddress(pub Option<SocketAddr>);

impl SystemAddress {
    pub const UNASSIGNED: SystemAddress = SystemAddress(None);

    #[must_use]
    pub fn is_assigned(self) -> bool {
        self.0.is_some()
    }
}

impl From<SocketAddr> for SystemAddress {
    fn from(value: SocketAddr) -> Self {
        Self(Some(value))
    }
}

impl std::fmt::Display for SystemAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.0 {
            Some(addr) => write!(f, "{addr}"),
            None => f.write_str("unassigned"),
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Default, PartialEq, Eq, Clone, Copy, clap::ValueEnum)]
pub enum PacketPriority {
    Immediate,
    #[default]
    High,
    Medium,
    Low,
}

#[derive(Deserialize, Serialize, Debug, Default, PartialEq, Eq, Clone, Copy, clap::ValueEnum)]
pub enum PacketReliability {
    Unreliable,
    UnreliableSequenced,
    Reliable,
    #[default]
    ReliableOrdered,
    ReliableSequenced,
}

/// Delivery parameters handed to the transport with every frame.
#[derive(Deserialize, Serialize, Debug, Default, PartialEq, Eq, Clone, Copy)]
pub struct SendParams {
    pub priority: PacketPriority,
    pub reliability: PacketReliability,
    pub ordering_channel: u8,
}

/// An inbound frame and the peer it came from.
#[derive(Debug, Clone)]
pub struct Packet {
    pub sender: SystemAddress,
    pub data: Bytes,
}

/// What the transport should do with a packet after the RPC layer saw it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveResult {
    /// Not an RPC frame; hand it to the next consumer.
    Continue,
    /// Handled or dropped here.
    Consumed,
}

/// Connection layer the RPC engine sends through.
///
/// Sends are fire-and-forget: delivery failures are the transport's to log.
pub trait Transport {
    fn send(&self, frame: Bytes, params: &SendParams, target: SystemAddress);

    fn connected_peers(&self) -> Vec<SystemAddress>;

    fn local_address(&self) -> SystemAddress;
}
