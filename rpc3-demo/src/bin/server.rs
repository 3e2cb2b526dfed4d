use clap::Parser;
use rpc3::Rpc;
use rpc3_demo::{World, register_handlers, udp::UdpTransport};
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug, Clone)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Listen address.
    #[arg(default_value = "0.0.0.0:8000")]
    pub addr: std::net::SocketAddr,

    /// Names of the hosted players, with ids starting at 1.
    #[arg(long, value_delimiter = ',', default_value = "alice,bob")]
    pub players: Vec<String>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let args = Args::parse();

    let names: Vec<&str> = args.players.iter().map(String::as_str).collect();
    let world = World::new(&names);
    let transport = UdpTransport::bind(args.addr).await.unwrap();
    let rpc = Rpc::new(transport.clone());
    register_handlers(&rpc, &world);

    tracing::info!(
        "Serving {:?} on {}...",
        names,
        transport.local_addr().to_string()
    );

    let token = CancellationToken::new();
    if let Err(e) = transport.serve(&rpc, &token).await {
        tracing::error!("server stopped: {e}");
    }
}
