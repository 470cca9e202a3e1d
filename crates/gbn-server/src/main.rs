use anyhow::{Context, Result};
use clap::Parser;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use gbn_abstract::{FaultConfig, ProtocolConfig};
use gbn_core::DirectoryStore;
use gbn_net::{Server, ServerConfig};

#[derive(Parser, Debug)]
#[command(author, version, about = "Serve files over UDP with Go-Back-N")]
struct Args {
    /// UDP port to listen on.
    port: u16,

    /// Directory requested names are resolved against.
    #[arg(long, default_value = ".")]
    root: PathBuf,

    /// Percent of outgoing datagrams to drop.
    #[arg(long, env = "LOSS_PCT", default_value_t = 0)]
    loss_pct: u8,

    /// Percent of outgoing datagrams with one payload byte flipped.
    #[arg(long, env = "CORRUPT_PCT", default_value_t = 0)]
    corrupt_pct: u8,

    #[arg(long, env = "WINDOW_SIZE", default_value_t = 10)]
    window_size: u32,

    /// Retransmission timeout in seconds.
    #[arg(long, env = "RTO_SEC", default_value_t = 0.5)]
    rto_sec: f64,

    /// Abandon a transfer after this many timeouts in a row without an
    /// advancing ack. 0 never gives up.
    #[arg(long, env = "MAX_STALLED_TIMEOUTS", default_value_t = 0)]
    max_stalled_timeouts: u32,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    tracing_subscriber::fmt::init();

    let config = ServerConfig {
        protocol: ProtocolConfig {
            window_size: args.window_size,
            rto_sec: args.rto_sec,
            max_stalled_timeouts: args.max_stalled_timeouts,
            ..Default::default()
        },
        fault: FaultConfig {
            loss_pct: args.loss_pct,
            corrupt_pct: args.corrupt_pct,
        },
    };

    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, args.port));
    let store = Arc::new(DirectoryStore::new(&args.root));
    let server = Server::bind(addr, store.clone(), config)
        .await
        .context("Failed to start server")?;

    info!("listening on UDP port {}", args.port);
    info!("serving files from {}", store.root().display());
    info!("simulation settings:");
    info!("    LOSS_PCT    = {}%", args.loss_pct);
    info!("    CORRUPT_PCT = {}%", args.corrupt_pct);
    info!("    WINDOW_SIZE = {}", args.window_size);
    info!("    RTO_SEC     = {}s", args.rto_sec);
    if args.max_stalled_timeouts > 0 {
        info!("    giving up after {} stalled timeouts", args.max_stalled_timeouts);
    }

    server.run().await.context("Server stopped")?;
    Ok(())
}
