use clap::Parser;
use log::info;
use peer::config::SessionConfig;
use peer::network::PeerNode;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Session configuration file (TOML)
    #[arg(short, long)]
    config: PathBuf,

    /// Local address for the session socket
    #[arg(short, long, default_value = "0.0.0.0:7000")]
    bind: String,

    /// Simulated frames per second
    #[arg(short, long, default_value = "30", value_parser = clap::value_parser!(u32).range(1..))]
    frame_rate: u32,

    /// Stop after this many frames instead of running until Ctrl+C
    #[arg(long)]
    frames: Option<u32>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    info!("Starting peer...");
    info!("Loading session from {}", args.config.display());
    let config = SessionConfig::load(&args.config)?;

    let mut node = PeerNode::bind(&config, &args.bind, args.frame_rate).await?;
    info!("Running at {} frames per second", args.frame_rate);

    tokio::select! {
        result = node.run(args.frames) => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    let state = node.session().sync_state();
    info!(
        "Session ended at frame {} in latency tier {}",
        node.session().frame(),
        state.current_tier
    );

    Ok(())
}
