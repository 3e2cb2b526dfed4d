use std::time::Duration;

use clap::Parser;
use rpc3::{NetworkId, PacketPriority, PacketReliability, Rpc, SendParams};
use rpc3_demo::{Session, play, udp::UdpTransport};
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug, Clone)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Server address.
    #[arg(default_value = "127.0.0.1:8000")]
    pub addr: std::net::SocketAddr,

    /// Local address.
    #[arg(long, default_value = "0.0.0.0:0")]
    pub bind: std::net::SocketAddr,

    /// Player to hit.
    #[arg(long, default_value = "1")]
    pub target: u64,

    /// Player dealing the damage.
    #[arg(long, default_value = "2")]
    pub attacker: u64,

    /// Damage amount.
    #[arg(short, long, default_value = "25")]
    pub damage: i32,

    /// Round announced with the `round_start` signal.
    #[arg(long, default_value = "1")]
    pub round: u32,

    /// Reliability of the calls.
    #[arg(long, default_value = "reliable-ordered")]
    pub reliability: PacketReliability,

    /// How long to wait for error reports, in milliseconds.
    #[arg(long, default_value = "500")]
    pub wait_ms: u64,
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let args = Args::parse();

    let transport = UdpTransport::bind(args.bind).await.unwrap();
    transport.add_peer(args.addr);
    let rpc = Rpc::new(transport.clone());
    rpc.set_send_params(SendParams {
        priority: PacketPriority::High,
        reliability: args.reliability,
        ordering_channel: 0,
    });

    let token = CancellationToken::new();
    let session = async {
        let sent = play(
            &rpc,
            &Session {
                target: NetworkId(args.target),
                attacker: NetworkId(args.attacker),
                damage: args.damage,
                round: args.round,
            },
        );
        tracing::info!("sent {sent} of 3 messages");

        tokio::time::sleep(Duration::from_millis(args.wait_ms)).await;
        token.cancel();
    };

    let (served, ()) = tokio::join!(transport.serve(&rpc, &token), session);
    if let Err(e) = served {
        tracing::error!("client stopped: {e}");
    }
}
