use bytes::Bytes;
use gbn_abstract::{FaultConfig, Flag, Packet, ProtocolConfig, RECV_BUF_LEN};
use gbn_core::{FaultyChannel, ResourceStore, ServerSession, SessionState};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::time::{Instant, sleep_until};
use tracing::{debug, info, warn};

use crate::driver::{Driver, send_all};
use crate::error::{ServerError, is_transport_reset};

/// Datagrams queued per session before new ones are dropped.
const SESSION_QUEUE: usize = 256;

#[derive(Debug, Clone, Copy, Default)]
pub struct ServerConfig {
    pub protocol: ProtocolConfig,
    /// Applied to everything the server sends.
    pub fault: FaultConfig,
}

impl ServerConfig {
    pub fn validate(&self) -> Result<(), ServerError> {
        self.protocol.validate()?;
        self.fault.validate()?;
        Ok(())
    }
}

/// Serves resources to any number of concurrent clients, one session per
/// peer address.
pub struct Server {
    socket: Arc<UdpSocket>,
    store: Arc<dyn ResourceStore>,
    config: ServerConfig,
}

impl Server {
    pub async fn bind(
        addr: SocketAddr,
        store: Arc<dyn ResourceStore>,
        config: ServerConfig,
    ) -> Result<Self, ServerError> {
        config.validate()?;
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: addr.to_string(),
                source,
            })?;
        Ok(Self {
            socket: Arc::new(socket),
            store,
            config,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.socket.local_addr()?)
    }

    /// Receive forever, routing each datagram to its peer's session.
    pub async fn run(self) -> Result<(), ServerError> {
        info!("listening on {}", self.local_addr()?);
        let mut sessions: HashMap<SocketAddr, mpsc::Sender<Bytes>> = HashMap::new();
        let mut buf = vec![0u8; RECV_BUF_LEN];

        loop {
            let (n, peer) = match self.socket.recv_from(&mut buf).await {
                Ok(received) => received,
                Err(err) if is_transport_reset(&err) => {
                    debug!("ignoring {} on the listening socket", err);
                    continue;
                }
                Err(err) => return Err(err.into()),
            };
            let datagram = Bytes::copy_from_slice(&buf[..n]);

            let datagram = match sessions.get(&peer) {
                Some(tx) => match tx.try_send(datagram) {
                    Ok(()) => continue,
                    Err(TrySendError::Full(_)) => {
                        debug!("session queue for {} is full, dropping datagram", peer);
                        continue;
                    }
                    Err(TrySendError::Closed(datagram)) => {
                        sessions.remove(&peer);
                        datagram
                    }
                },
                None => datagram,
            };

            if !is_request(&datagram) {
                debug!("ignoring {} byte datagram from idle peer {}", n, peer);
                continue;
            }

            sessions.retain(|_, tx| !tx.is_closed());
            let (tx, rx) = mpsc::channel(SESSION_QUEUE);
            sessions.insert(peer, tx);
            tokio::spawn(run_session(
                Arc::clone(&self.socket),
                peer,
                datagram,
                rx,
                Arc::clone(&self.store),
                self.config,
            ));
        }
    }
}

fn is_request(datagram: &[u8]) -> bool {
    Packet::decode(datagram)
        .map(|p| p.header.flag == Flag::Data && !p.payload.is_empty())
        .unwrap_or(false)
}

/// One peer's transfer, opened by `request`. Ends when the transfer
/// finishes or aborts, or when the request could not be served.
async fn run_session(
    socket: Arc<UdpSocket>,
    peer: SocketAddr,
    request: Bytes,
    mut rx: mpsc::Receiver<Bytes>,
    store: Arc<dyn ResourceStore>,
    config: ServerConfig,
) -> SessionState {
    let session = ServerSession::new(config.protocol, store);
    let mut driver = Driver::new(session, FaultyChannel::new(config.fault), "server", peer);
    let far_future = Duration::from_secs(365 * 24 * 3600);
    let mut actions = driver.on_datagram(&request);

    loop {
        if let Err(err) = send_all(&socket, Some(peer), &actions.outgoing).await {
            if is_transport_reset(&err) {
                warn!("[server {}] transport reset: {}", peer, err);
            } else {
                warn!("[server {}] send failed: {}", peer, err);
            }
            driver.drive(|session, ctx| session.abort(ctx, &err.to_string()));
            break;
        }

        match driver.engine().state() {
            SessionState::Transferring => {}
            SessionState::AwaitingRequest => {
                if let Some(err) = driver.engine().last_error() {
                    warn!("[server {}] request refused: {}", peer, err);
                }
                break;
            }
            SessionState::Complete | SessionState::Aborted => break,
        }

        let deadline = driver.next_deadline();
        actions = tokio::select! {
            datagram = rx.recv() => match datagram {
                Some(datagram) => driver.on_datagram(&datagram),
                None => break,
            },
            _ = sleep_until(deadline.unwrap_or_else(|| Instant::now() + far_future)), if deadline.is_some() => {
                driver.fire_due()
            }
        };
    }

    let stats = driver.engine().sender().stats();
    debug!(
        "[server {}] session ended: {} sent, {} retransmitted, {} timeouts",
        peer, stats.sent, stats.retransmitted, stats.timeouts
    );
    driver.engine().state()
}

#[cfg(test)]
mod tests {
    use super::*;
    use gbn_abstract::MSS;
    use gbn_core::MemoryStore;

    #[test]
    fn only_named_data_packets_open_sessions() {
        assert!(is_request(&Packet::request("a.txt").encode()));
        assert!(!is_request(&Packet::request("").encode()));
        assert!(!is_request(&Packet::ack(3).encode()));
        assert!(!is_request(&[0u8; 4]));
    }

    #[tokio::test]
    async fn send_failure_aborts_only_that_session() {
        let socket = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
        let store: Arc<dyn ResourceStore> =
            Arc::new(MemoryStore::new().with("big", Bytes::from(vec![7u8; 4 * MSS])));
        // The kernel refuses to send to port 0.
        let unreachable: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let (_tx, rx) = mpsc::channel(SESSION_QUEUE);

        let state = tokio::time::timeout(
            Duration::from_secs(5),
            run_session(
                socket,
                unreachable,
                Packet::request("big").encode(),
                rx,
                store,
                ServerConfig::default(),
            ),
        )
        .await
        .expect("session should end on the send error");
        assert_eq!(state, SessionState::Aborted);
    }

    #[tokio::test]
    async fn refused_request_ends_the_session() {
        let socket = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
        let peer = socket.local_addr().unwrap();
        let (_tx, rx) = mpsc::channel(SESSION_QUEUE);

        let state = run_session(
            socket,
            peer,
            Packet::request("missing").encode(),
            rx,
            Arc::new(MemoryStore::new()),
            ServerConfig::default(),
        )
        .await;
        assert_eq!(state, SessionState::AwaitingRequest);
    }

    #[test]
    fn config_validation_rejects_bad_percentages() {
        let config = ServerConfig {
            fault: FaultConfig {
                loss_pct: 150,
                corrupt_pct: 0,
            },
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ServerError::Config(_))));
    }
}
