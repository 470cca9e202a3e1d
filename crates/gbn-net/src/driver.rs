use bytes::Bytes;
use gbn_abstract::{SystemContext, TimerCommand, TransportProtocol, capture};
use gbn_core::{Fate, FaultyChannel};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::Instant;
use tracing::{debug, info};

/// Pending engine timers on the wall clock. An id may have several expiries
/// pending until it is cancelled.
#[derive(Debug, Default)]
pub struct Timers {
    pending: Vec<(u32, Instant)>,
}

impl Timers {
    pub fn apply(&mut self, now: Instant, commands: &[TimerCommand]) {
        for command in commands {
            match *command {
                TimerCommand::Start { delay_ms, timer_id } => {
                    self.pending
                        .push((timer_id, now + Duration::from_millis(delay_ms)));
                }
                TimerCommand::Cancel { timer_id } => {
                    self.pending.retain(|(id, _)| *id != timer_id);
                }
            }
        }
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.iter().map(|(_, at)| *at).min()
    }

    /// Remove and return the ids due at `now`, earliest first.
    pub fn take_due(&mut self, now: Instant) -> Vec<u32> {
        let mut due: Vec<(u32, Instant)> = Vec::new();
        self.pending.retain(|&(id, at)| {
            if at <= now {
                due.push((id, at));
                false
            } else {
                true
            }
        });
        due.sort_by_key(|&(_, at)| at);
        due.into_iter().map(|(id, _)| id).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

/// What an engine callback left for the socket layer.
#[derive(Debug, Default)]
pub struct Actions {
    /// Datagrams that survived the outbound channel.
    pub outgoing: Vec<Bytes>,
    pub delivered: Vec<Vec<u8>>,
}

impl Actions {
    fn merge(&mut self, other: Actions) {
        self.outgoing.extend(other.outgoing);
        self.delivered.extend(other.delivered);
    }
}

/// Runs one engine against the wall clock and an outbound faulty channel.
pub struct Driver<P> {
    engine: P,
    channel: FaultyChannel,
    timers: Timers,
    epoch: Instant,
    role: &'static str,
    peer: SocketAddr,
}

impl<P: TransportProtocol> Driver<P> {
    pub fn new(engine: P, channel: FaultyChannel, role: &'static str, peer: SocketAddr) -> Self {
        Self {
            engine,
            channel,
            timers: Timers::default(),
            epoch: Instant::now(),
            role,
            peer,
        }
    }

    pub fn engine(&self) -> &P {
        &self.engine
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.timers.next_deadline()
    }

    pub fn init(&mut self) -> Actions {
        self.drive(|engine, ctx| engine.init(ctx))
    }

    pub fn on_datagram(&mut self, datagram: &[u8]) -> Actions {
        self.drive(|engine, ctx| engine.on_datagram(ctx, datagram))
    }

    /// Fire every timer that is due.
    pub fn fire_due(&mut self) -> Actions {
        let mut actions = Actions::default();
        for timer_id in self.timers.take_due(Instant::now()) {
            actions.merge(self.drive(|engine, ctx| engine.on_timer(ctx, timer_id)));
        }
        actions
    }

    /// Run one engine callback and apply what it buffered.
    pub fn drive<F>(&mut self, f: F) -> Actions
    where
        F: FnOnce(&mut P, &mut dyn SystemContext),
    {
        let now = Instant::now();
        let now_ms = now.duration_since(self.epoch).as_millis() as u64;
        let engine = &mut self.engine;
        let buffer = capture(now_ms, |ctx| f(engine, ctx));

        for line in &buffer.logs {
            info!("[{} {}] {}", self.role, self.peer, line);
        }
        for (name, value) in &buffer.metrics {
            debug!("[{} {}] {} = {}", self.role, self.peer, name, value);
        }
        self.timers.apply(now, &buffer.timers);

        let mut outgoing = Vec::with_capacity(buffer.outgoing.len());
        for datagram in buffer.outgoing {
            match self.channel.transmit(datagram) {
                Fate::Dropped => debug!("[{} {}] LOSS", self.role, self.peer),
                Fate::Delivered { datagram, .. } => outgoing.push(datagram),
            }
        }

        Actions {
            outgoing,
            delivered: buffer.delivered,
        }
    }
}

/// Send datagrams in order, stopping at the first error.
pub async fn send_all(
    socket: &UdpSocket,
    peer: Option<SocketAddr>,
    datagrams: &[Bytes],
) -> std::io::Result<()> {
    for datagram in datagrams {
        match peer {
            Some(peer) => socket.send_to(datagram, peer).await?,
            None => socket.send(datagram).await?,
        };
    }
    Ok(())
}
