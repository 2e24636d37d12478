use clap::Parser;
use log::info;
use relay::forwarder::Forwarder;
use relay::network::RelayServer;
use std::net::SocketAddr;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Address to listen on
    #[arg(short, long, default_value = "0.0.0.0:50000")]
    bind: String,

    /// Tunnel id shared with the session's peers (random when omitted)
    #[arg(short, long)]
    tunnel_id: Option<u16>,

    /// Virtual port route as PORT=ADDR, repeatable
    #[arg(short, long = "route", value_parser = parse_route)]
    routes: Vec<(u16, SocketAddr)>,
}

fn parse_route(s: &str) -> Result<(u16, SocketAddr), String> {
    let (port, addr) = s
        .split_once('=')
        .ok_or_else(|| format!("expected PORT=ADDR, got '{}'", s))?;
    let port = port
        .trim()
        .parse::<u16>()
        .map_err(|e| format!("bad virtual port '{}': {}", port, e))?;
    let addr = addr
        .trim()
        .parse::<SocketAddr>()
        .map_err(|e| format!("bad address '{}': {}", addr, e))?;
    Ok((port, addr))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    let tunnel_id = args.tunnel_id.unwrap_or_else(rand::random);
    info!("Starting relay for tunnel {}", tunnel_id);

    let mut forwarder = Forwarder::new(tunnel_id);
    for (port, addr) in args.routes {
        if forwarder.add_route(port, addr) {
            info!("Route {} -> {}", port, addr);
        } else {
            return Err(format!("conflicting route {}={}", port, addr).into());
        }
    }

    let mut server = RelayServer::bind(&args.bind, forwarder).await?;

    tokio::select! {
        result = server.run() => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
