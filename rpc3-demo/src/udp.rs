use std::{cell::RefCell, net::SocketAddr, rc::Rc, sync::Arc};

use bytes::Bytes;
use rpc3::{Packet, ReceiveResult, RemoteError, Rpc, SendParams, SystemAddress, Transport};
use tokio::{net::UdpSocket, sync::mpsc};
use tokio_util::sync::CancellationToken;

const MAX_DATAGRAM_SIZE: usize = 1 << 16;
const OUTBOX_SIZE: usize = 1024;

/// Datagram transport for an [`Rpc`] endpoint.
///
/// Frames are sent best effort whatever reliability is requested. Every
/// address a datagram arrives from becomes a peer, so broadcasts reach
/// everyone who has talked to this endpoint.
pub struct UdpTransport {
    socket: Arc<UdpSocket>,
    local: SocketAddr,
    outbox: mpsc::Sender<(Bytes, SocketAddr)>,
    peers: RefCell<Vec<SocketAddr>>,
}

impl UdpTransport {
    /// Binds a socket and starts its send loop.
    ///
    /// # Errors
    ///
    /// Returns the bind error.
    pub async fn bind(addr: SocketAddr) -> std::io::Result<Rc<Self>> {
        let socket = Arc::new(UdpSocket::bind(addr).await?);
        let local = socket.local_addr()?;
        let (outbox, receiver) = mpsc::channel(OUTBOX_SIZE);
        tokio::spawn(Self::start_send_loop(socket.clone(), receiver));
        Ok(Rc::new(Self {
            socket,
            local,
            outbox,
            peers: RefCell::default(),
        }))
    }

    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local
    }

    pub fn add_peer(&self, addr: SocketAddr) -> bool {
        let mut peers = self.peers.borrow_mut();
        if peers.contains(&addr) {
            return false;
        }
        tracing::info!("new peer {addr}");
        peers.push(addr);
        true
    }

    /// Feeds received datagrams to `rpc` until `token` is cancelled.
    ///
    /// # Errors
    ///
    /// Returns the first socket receive error.
    pub async fn serve(&self, rpc: &Rpc, token: &CancellationToken) -> std::io::Result<()> {
        let mut buffer = vec![0u8; MAX_DATAGRAM_SIZE];
        loop {
            let (n, sender) = tokio::select! {
                () = token.cancelled() => return Ok(()),
                r = self.socket.recv_from(&mut buffer) => r?,
            };
            self.add_peer(sender);

            let packet = Packet {
                sender: sender.into(),
                data: Bytes::copy_from_slice(&buffer[..n]),
            };
            if rpc.on_receive(&packet) == ReceiveResult::Continue {
                match RemoteError::parse(&packet.data) {
                    Ok(err) => tracing::warn!("{sender} reported {err}"),
                    Err(_) => tracing::debug!("ignoring {n} bytes from {sender}"),
                }
            }
        }
    }

    async fn start_send_loop(
        socket: Arc<UdpSocket>,
        mut receiver: mpsc::Receiver<(Bytes, SocketAddr)>,
    ) {
        while let Some((frame, target)) = receiver.recv().await {
            if let Err(e) = socket.send_to(&frame, target).await {
                tracing::error!("send to {target} failed: {e}");
            }
        }
    }
}

impl Transport for UdpTransport {
    fn send(&self, frame: Bytes, params: &SendParams, target: SystemAddress) {
        let Some(addr) = target.0 else {
            tracing::warn!("dropping frame without a target");
            return;
        };
        tracing::trace!("sending {} bytes to {addr} with {params:?}", frame.len());
        if let Err(e) = self.outbox.try_send((frame, addr)) {
            tracing::warn!("dropping frame for {addr}: {e}");
        }
    }

    fn connected_peers(&self) -> Vec<SystemAddress> {
        self.peers.borrow().iter().map(|&addr| addr.into()).collect()
    }

    fn local_address(&self) -> SystemAddress {
        self.local.into()
    }
}
