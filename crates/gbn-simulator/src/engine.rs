use crate::trace::SimulationReport;
use bytes::{Bytes, BytesMut};
use gbn_abstract::{
    ActionBuffer, HEADER_LEN, Packet, ProtocolConfig, ScopedContext, SimConfig,
    TimerCommand, TransportProtocol,
};
use gbn_core::{Fate, FaultyChannel, GbnReceiver, MemoryStore, ServerSession};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info};

/// Virtual time after which [`Simulator::run_until_complete`] gives up.
pub const DEFAULT_HORIZON_MS: u64 = 600_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum NodeId {
    Server,
    Client,
}

impl NodeId {
    pub fn peer(&self) -> Self {
        match self {
            NodeId::Server => NodeId::Client,
            NodeId::Client => NodeId::Server,
        }
    }
}

#[derive(Debug)]
pub enum EventType {
    DatagramArrival {
        to: NodeId,
        datagram: Bytes,
    },
    TimerExpiry {
        node: NodeId,
        timer_id: u32,
        generation: u64,
    },
}

#[derive(Debug)]
struct Event {
    time: u64,
    event_type: EventType,
    id: u64, // tie-breaker for events at the same time
}

// Min-heap on (time, id).
impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        self.time == other.time && self.id == other.id
    }
}

impl Eq for Event {}

impl PartialOrd for Event {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Event {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .time
            .cmp(&self.time)
            .then_with(|| other.id.cmp(&self.id))
    }
}

/// A compact textual summary of one link-layer event.
#[derive(Debug, Clone, Serialize)]
pub struct LinkEventSummary {
    pub time: u64,
    pub description: String,
}

pub struct Simulator {
    time: u64,
    event_queue: BinaryHeap<Event>,
    event_id_counter: u64,

    config: SimConfig,
    rng: StdRng,
    server_link: FaultyChannel,
    client_link: FaultyChannel,

    pub server: Box<dyn TransportProtocol>,
    pub client: Box<dyn TransportProtocol>,

    /// Payload chunks delivered by the client, in order.
    pub delivered_data: Vec<Vec<u8>>,
    pub server_packet_count: u32,
    pub client_packet_count: u32,
    /// Server datagrams whose sequence number had already been sent once.
    pub retransmissions: u32,
    server_seqs_sent: HashSet<u32>,

    /// Samples recorded via `SystemContext::record_metric`, keyed by name.
    pub metrics: HashMap<String, Vec<(u64, f64)>>,

    drop_server_seq_once: Vec<u32>,
    corrupt_server_seq_once: Vec<u32>,
    drop_client_ack_once: Vec<u32>,

    pub link_events: Vec<LinkEventSummary>,

    /// Bumped on every cancel; expiries carrying an older generation are stale.
    timer_generations: HashMap<(NodeId, u32), u64>,
}

impl Simulator {
    pub fn new(
        config: SimConfig,
        server: Box<dyn TransportProtocol>,
        client: Box<dyn TransportProtocol>,
    ) -> Self {
        let rng = StdRng::seed_from_u64(config.seed);
        let server_link = FaultyChannel::seeded(config.fault, config.seed ^ 0x5eed_0001);
        let client_link = FaultyChannel::seeded(config.fault, config.seed ^ 0x5eed_0002);

        Self {
            time: 0,
            event_queue: BinaryHeap::new(),
            event_id_counter: 0,
            config,
            rng,
            server_link,
            client_link,
            server,
            client,
            delivered_data: Vec::new(),
            server_packet_count: 0,
            client_packet_count: 0,
            retransmissions: 0,
            server_seqs_sent: HashSet::new(),
            metrics: HashMap::new(),
            drop_server_seq_once: Vec::new(),
            corrupt_server_seq_once: Vec::new(),
            drop_client_ack_once: Vec::new(),
            link_events: Vec::new(),
            timer_generations: HashMap::new(),
        }
    }

    /// A server holding a single in-memory resource and a client fetching it.
    pub fn transfer(
        config: SimConfig,
        protocol: ProtocolConfig,
        name: &str,
        data: impl Into<Bytes>,
    ) -> Self {
        let store = MemoryStore::new().with(name, data);
        let server = ServerSession::new(protocol, Arc::new(store));
        let client = GbnReceiver::new(name, &protocol);
        Self::new(config, Box::new(server), Box::new(client))
    }

    /// Drop the first datagram the server sends with sequence number `seq`.
    pub fn add_drop_server_seq_once(&mut self, seq: u32) {
        self.drop_server_seq_once.push(seq);
    }

    /// Flip a payload byte of the first data datagram the server sends with
    /// sequence number `seq`.
    pub fn add_corrupt_server_seq_once(&mut self, seq: u32) {
        self.corrupt_server_seq_once.push(seq);
    }

    /// Drop the first datagram the client sends carrying `ack`. The request
    /// carries ack 0.
    pub fn add_drop_client_ack_once(&mut self, ack: u32) {
        self.drop_client_ack_once.push(ack);
    }

    pub fn peek_next_event_time(&self) -> Option<u64> {
        self.event_queue.peek().map(|e| e.time)
    }

    pub fn current_time(&self) -> u64 {
        self.time
    }

    /// Both endpoints reached their terminal state.
    pub fn is_complete(&self) -> bool {
        self.server.is_done() && self.client.is_done()
    }

    /// The client's output stream so far.
    pub fn output(&self) -> Vec<u8> {
        self.delivered_data.concat()
    }

    fn push_event(&mut self, time: u64, event_type: EventType) {
        self.event_queue.push(Event {
            time,
            event_type,
            id: self.event_id_counter,
        });
        self.event_id_counter += 1;
    }

    pub fn init(&mut self) {
        let mut buffer = ActionBuffer::default();
        self.server
            .init(&mut ScopedContext::new(&mut buffer, self.time));
        self.process_actions(NodeId::Server, buffer);

        let mut buffer = ActionBuffer::default();
        self.client
            .init(&mut ScopedContext::new(&mut buffer, self.time));
        self.process_actions(NodeId::Client, buffer);
    }

    /// Process the next event. Returns false once the queue is empty.
    pub fn step(&mut self) -> bool {
        let Some(event) = self.event_queue.pop() else {
            return false;
        };
        self.time = event.time;

        match event.event_type {
            EventType::DatagramArrival { to, datagram } => {
                debug!("{} byte datagram arrives at {:?} at {}", datagram.len(), to, self.time);
                let mut buffer = ActionBuffer::default();
                {
                    let mut ctx = ScopedContext::new(&mut buffer, self.time);
                    match to {
                        NodeId::Server => self.server.on_datagram(&mut ctx, &datagram),
                        NodeId::Client => self.client.on_datagram(&mut ctx, &datagram),
                    }
                }
                self.process_actions(to, buffer);
            }
            EventType::TimerExpiry {
                node,
                timer_id,
                generation,
            } => {
                if self.timer_generations.get(&(node, timer_id)) != Some(&generation) {
                    debug!("skipping stale timer {} of {:?}", timer_id, node);
                    return true;
                }

                let mut buffer = ActionBuffer::default();
                {
                    let mut ctx = ScopedContext::new(&mut buffer, self.time);
                    match node {
                        NodeId::Server => self.server.on_timer(&mut ctx, timer_id),
                        NodeId::Client => self.client.on_timer(&mut ctx, timer_id),
                    }
                }
                self.process_actions(node, buffer);
            }
        }
        true
    }

    /// Step until both endpoints finish, the server gives up, the queue
    /// drains, or the next event lies beyond `horizon_ms`.
    ///
    /// Returns whether the transfer completed.
    pub fn run_until(&mut self, horizon_ms: u64) -> bool {
        while let Some(next) = self.peek_next_event_time() {
            if next > horizon_ms {
                break;
            }
            if self.server.is_done() && !self.client.is_done() {
                info!("server finished before the client; stopping");
                break;
            }
            self.step();
        }
        self.is_complete()
    }

    pub fn run_until_complete(&mut self) -> bool {
        self.init();
        self.run_until(DEFAULT_HORIZON_MS)
    }

    pub fn export_report(&self) -> SimulationReport {
        SimulationReport {
            config: self.config.clone(),
            duration_ms: self.time,
            complete: self.is_complete(),
            delivered_data: self.delivered_data.clone(),
            server_packet_count: self.server_packet_count,
            client_packet_count: self.client_packet_count,
            retransmissions: self.retransmissions,
            metrics: self.metrics.clone(),
            link_events: self.link_events.clone(),
        }
    }

    fn record(&mut self, description: String) {
        self.link_events.push(LinkEventSummary {
            time: self.time,
            description,
        });
    }

    fn process_actions(&mut self, source: NodeId, buffer: ActionBuffer) {
        for (name, value) in buffer.metrics {
            self.metrics
                .entry(name)
                .or_default()
                .push((self.time, value));
        }

        for log in buffer.logs {
            info!("[{:?}] {}", source, log);
        }

        for data in buffer.delivered {
            self.record(format!("[{:?}] DELIVERED {} bytes", source, data.len()));
            self.delivered_data.push(data);
        }

        // Applied in call order so that restart (cancel + start) arms the
        // new generation.
        for command in buffer.timers {
            match command {
                TimerCommand::Cancel { timer_id } => {
                    *self
                        .timer_generations
                        .entry((source, timer_id))
                        .or_insert(0) += 1;
                }
                TimerCommand::Start { delay_ms, timer_id } => {
                    let generation = *self
                        .timer_generations
                        .entry((source, timer_id))
                        .or_insert(0);
                    self.push_event(
                        self.time + delay_ms,
                        EventType::TimerExpiry {
                            node: source,
                            timer_id,
                            generation,
                        },
                    );
                }
            }
        }

        for datagram in buffer.outgoing {
            self.transmit(source, datagram);
        }
    }

    fn transmit(&mut self, source: NodeId, datagram: Bytes) {
        let target = source.peer();
        let header = Packet::decode(&datagram).ok().map(|p| p.header);
        let label = match header {
            Some(h) => format!("seq={} ack={}", h.seq, h.ack),
            None => format!("{} raw bytes", datagram.len()),
        };

        let mut datagram = datagram;
        match source {
            NodeId::Server => {
                self.server_packet_count += 1;
                if let Some(h) = header
                    && !self.server_seqs_sent.insert(h.seq)
                {
                    self.retransmissions += 1;
                }

                if let Some(seq) = header.map(|h| h.seq) {
                    if take_once(&mut self.drop_server_seq_once, seq) {
                        self.record(format!("[Server->Client] DROP (scripted) {}", label));
                        return;
                    }
                    if datagram.len() > HEADER_LEN
                        && take_once(&mut self.corrupt_server_seq_once, seq)
                    {
                        let mut damaged = BytesMut::from(&datagram[..]);
                        damaged[HEADER_LEN] ^= 0xFF;
                        datagram = damaged.freeze();
                        self.record(format!("[Server->Client] CORRUPT (scripted) {}", label));
                    }
                }
            }
            NodeId::Client => {
                self.client_packet_count += 1;
                if let Some(h) = header
                    && take_once(&mut self.drop_client_ack_once, h.ack)
                {
                    self.record(format!("[Client->Server] DROP (scripted) {}", label));
                    return;
                }
            }
        }

        let link = match source {
            NodeId::Server => &mut self.server_link,
            NodeId::Client => &mut self.client_link,
        };
        let datagram = match link.transmit(datagram) {
            Fate::Dropped => {
                self.record(format!("[{:?}->{:?}] DROP (random loss) {}", source, target, label));
                return;
            }
            Fate::Delivered {
                datagram,
                corrupted,
            } => {
                if corrupted {
                    self.record(format!("[{:?}->{:?}] CORRUPT {}", source, target, label));
                }
                datagram
            }
        };

        let copies = if self.roll(self.config.duplicate_pct) {
            self.record(format!("[{:?}->{:?}] DUPLICATE {}", source, target, label));
            2
        } else {
            1
        };

        for _ in 0..copies {
            let latency = self
                .rng
                .random_range(self.config.min_latency..=self.config.max_latency);
            self.record(format!(
                "[{:?}->{:?}] SEND {} (latency={}ms)",
                source, target, label, latency
            ));
            self.push_event(
                self.time + latency,
                EventType::DatagramArrival {
                    to: target,
                    datagram: datagram.clone(),
                },
            );
        }
    }

    fn roll(&mut self, pct: u8) -> bool {
        pct > 0 && self.rng.random_range(0..100u8) < pct
    }
}

fn take_once(pending: &mut Vec<u32>, value: u32) -> bool {
    match pending.iter().position(|v| *v == value) {
        Some(pos) => {
            pending.remove(pos);
            true
        }
        None => false,
    }
}
