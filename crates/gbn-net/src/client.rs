use gbn_abstract::{FaultConfig, ProtocolConfig, RECV_BUF_LEN, TransportProtocol};
use gbn_core::{FaultyChannel, GbnReceiver};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::net::UdpSocket;
use tokio::time::{Instant, sleep_until};
use tracing::{debug, info, warn};

use crate::driver::{Actions, Driver, send_all};
use crate::error::{ClientError, is_transport_reset};

#[derive(Debug, Clone, Copy)]
pub struct ClientConfig {
    pub protocol: ProtocolConfig,
    /// Applied to everything the client sends.
    pub fault: FaultConfig,
    /// How long to keep answering retransmitted packets after EOF, so a
    /// lost final ack can still reach the server.
    pub linger: Duration,
    /// Give up if the transfer has not completed by then. `None` waits
    /// forever.
    pub deadline: Option<Duration>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            protocol: ProtocolConfig::default(),
            fault: FaultConfig::default(),
            linger: Duration::from_secs(1),
            deadline: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchSummary {
    pub bytes: u64,
    /// Packets accepted, EOF included.
    pub packets: u64,
    pub rejected: u64,
    pub corrupted: u64,
    pub elapsed: Duration,
}

/// Request `resource` from `server` and stream it into `output`.
pub async fn fetch<W>(
    server: SocketAddr,
    resource: &str,
    output: &mut W,
    config: &ClientConfig,
) -> Result<FetchSummary, ClientError>
where
    W: AsyncWrite + Unpin,
{
    config.protocol.validate()?;
    config.fault.validate()?;

    let bind: SocketAddr = if server.is_ipv4() {
        ([0, 0, 0, 0], 0).into()
    } else {
        (std::net::Ipv6Addr::UNSPECIFIED, 0).into()
    };
    let socket = UdpSocket::bind(bind).await?;
    socket.connect(server).await?;
    info!("requesting {} from {}", resource, server);

    let receiver = GbnReceiver::new(resource, &config.protocol);
    let mut driver = Driver::new(receiver, FaultyChannel::new(config.fault), "client", server);
    let started = Instant::now();
    let deadline = config.deadline.map(|d| started + d);
    let mut linger_until: Option<Instant> = None;
    let mut buf = vec![0u8; RECV_BUF_LEN];

    let actions = driver.init();
    flush_actions(&socket, output, actions).await?;

    loop {
        if linger_until.is_none() && driver.engine().is_done() {
            let stats = driver.engine().stats();
            info!(
                "EOF received, wrote {} byte(s) in {:.3}s",
                stats.bytes,
                started.elapsed().as_secs_f64()
            );
            output.flush().await.map_err(ClientError::Output)?;
            linger_until = Some(Instant::now() + config.linger);
        }

        let wake = [driver.next_deadline(), linger_until, deadline]
            .into_iter()
            .flatten()
            .min();

        let actions = tokio::select! {
            received = socket.recv(&mut buf) => match received {
                Ok(n) => driver.on_datagram(&buf[..n]),
                Err(err) if is_transport_reset(&err) => {
                    // Server not (yet) listening; the idle timer re-sends.
                    warn!("{}: {}", server, err);
                    continue;
                }
                Err(err) => return Err(err.into()),
            },
            _ = sleep_until(wake.unwrap_or_else(Instant::now)), if wake.is_some() => {
                let now = Instant::now();
                if linger_until.is_some_and(|t| now >= t) {
                    break;
                }
                if linger_until.is_none() && deadline.is_some_and(|t| now >= t) {
                    return Err(ClientError::DeadlineExceeded {
                        resource: resource.to_string(),
                        elapsed: started.elapsed(),
                        received: driver.engine().stats().bytes,
                    });
                }
                driver.fire_due()
            }
        };

        if let Err(err) = flush_actions(&socket, output, actions).await {
            match err {
                ClientError::Io(ref io) if is_transport_reset(io) => {
                    warn!("{}: {}", server, io);
                }
                other => return Err(other),
            }
        }
    }

    let stats = driver.engine().stats();
    debug!(
        "{} acks sent, {} rejected ({} corrupted)",
        stats.acks_sent, stats.rejected, stats.corrupted
    );
    Ok(FetchSummary {
        bytes: stats.bytes,
        packets: stats.accepted,
        rejected: stats.rejected,
        corrupted: stats.corrupted,
        elapsed: started.elapsed(),
    })
}

async fn flush_actions<W>(
    socket: &UdpSocket,
    output: &mut W,
    actions: Actions,
) -> Result<(), ClientError>
where
    W: AsyncWrite + Unpin,
{
    for chunk in &actions.delivered {
        output.write_all(chunk).await.map_err(ClientError::Output)?;
    }
    send_all(socket, None, &actions.outgoing).await?;
    Ok(())
}
