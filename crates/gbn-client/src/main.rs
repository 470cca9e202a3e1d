use anyhow::{Context, Result};
use clap::Parser;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs::File;
use tokio::io::BufWriter;
use tracing::info;

use gbn_abstract::{FaultConfig, ProtocolConfig};
use gbn_net::{ClientConfig, fetch};

#[derive(Parser, Debug)]
#[command(author, version, about = "Fetch a file over UDP with Go-Back-N")]
struct Args {
    server_ip: IpAddr,
    port: u16,
    /// Name of the resource to request.
    resource: String,

    /// Where to write the file. Defaults to the resource's file name in the
    /// current directory.
    #[arg(long, short)]
    output: Option<PathBuf>,

    /// Percent of outgoing acks to drop.
    #[arg(long, env = "CLIENT_LOSS_PCT", default_value_t = 0)]
    loss_pct: u8,

    /// Seconds of silence before the last ack is repeated.
    #[arg(long, default_value_t = 1.0)]
    idle_ack_sec: f64,

    /// Give up after this many seconds.
    #[arg(long)]
    deadline_sec: Option<f64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    tracing_subscriber::fmt::init();

    let output_path = match &args.output {
        Some(path) => path.clone(),
        None => Path::new(&args.resource)
            .file_name()
            .map(PathBuf::from)
            .with_context(|| format!("Cannot derive an output name from {:?}", args.resource))?,
    };

    let config = ClientConfig {
        protocol: ProtocolConfig {
            idle_ack_sec: args.idle_ack_sec,
            ..Default::default()
        },
        fault: FaultConfig {
            loss_pct: args.loss_pct,
            corrupt_pct: 0,
        },
        deadline: args
            .deadline_sec
            .map(Duration::try_from_secs_f64)
            .transpose()
            .context("Invalid deadline")?,
        ..Default::default()
    };

    let file = File::create(&output_path)
        .await
        .with_context(|| format!("Failed to create {}", output_path.display()))?;
    let mut output = BufWriter::new(file);

    let server = SocketAddr::new(args.server_ip, args.port);
    let summary = fetch(server, &args.resource, &mut output, &config)
        .await
        .with_context(|| format!("Failed to fetch {}", args.resource))?;

    info!(
        "file saved to {} ({} bytes, {} rejected packet(s), {:.3}s)",
        output_path.display(),
        summary.bytes,
        summary.rejected,
        summary.elapsed.as_secs_f64()
    );
    Ok(())
}
