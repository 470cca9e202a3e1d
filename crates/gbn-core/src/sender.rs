//! Go-Back-N sender.
//!
//! The sender owns the ordered segments of one resource plus a virtual
//! terminal segment (an empty `AckOrEof` packet with `seq == segments.len()`),
//! so a transfer of `n` segments spans `total = n + 1` sequence numbers.
//!
//! ```text
//!      base            next_seq          total
//!  ─────┼─────────────────┼────────────────┼──▶ seq
//!  acked│<── in flight ──>│<── sendable ──>│
//! ```
//!
//! `next_seq - base` never exceeds the window. One timer covers the whole
//! window; on expiry every packet in `[base, next_seq)` is resent in order.

use bytes::Bytes;
use gbn_abstract::{Flag, Packet, ProtocolConfig, SystemContext, TransportProtocol};

pub const RETRANSMIT_TIMER: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SenderState {
    Idle,
    Sending,
    Done,
    /// Gave up after too many timeouts without progress.
    Aborted,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SenderStats {
    /// First transmissions.
    pub sent: u64,
    pub retransmitted: u64,
    pub timeouts: u64,
    pub started_at: u64,
}

#[derive(Debug)]
pub struct GbnSender {
    config: ProtocolConfig,
    segments: Vec<Bytes>,
    base: u32,
    next_seq: u32,
    total: u32,
    state: SenderState,
    stalled_timeouts: u32,
    stats: SenderStats,
}

impl GbnSender {
    pub fn new(config: ProtocolConfig) -> Self {
        Self {
            config,
            segments: Vec::new(),
            base: 0,
            next_seq: 0,
            total: 0,
            state: SenderState::Idle,
            stalled_timeouts: 0,
            stats: SenderStats::default(),
        }
    }

    /// Begin a transfer: fill the window and arm the retransmission timer.
    pub fn start(&mut self, ctx: &mut dyn SystemContext, segments: Vec<Bytes>) {
        self.total = segments.len() as u32 + 1;
        self.segments = segments;
        self.base = 0;
        self.next_seq = 0;
        self.stalled_timeouts = 0;
        self.stats = SenderStats {
            started_at: ctx.now(),
            ..Default::default()
        };
        self.state = SenderState::Sending;

        if self.segments.is_empty() {
            ctx.log("resource is empty, sending EOF only");
        } else {
            ctx.log(&format!("prepared {} segment(s) (+EOF)", self.segments.len()));
        }

        self.fill_window(ctx);
        ctx.restart_timer(self.config.rto_ms(), RETRANSMIT_TIMER);
    }

    /// Transmit new packets while the window has room.
    pub fn fill_window(&mut self, ctx: &mut dyn SystemContext) {
        if self.state != SenderState::Sending {
            return;
        }
        while self.next_seq < self.total && self.next_seq - self.base < self.config.window_size {
            self.transmit(ctx, self.next_seq, false);
            self.stats.sent += 1;
            self.next_seq += 1;
        }
        ctx.record_metric("in_flight", (self.next_seq - self.base) as f64);
    }

    /// Apply a cumulative ack. Returns whether the window advanced.
    ///
    /// Duplicate and stale acks are ignored; they never trigger a
    /// retransmission on their own.
    pub fn on_ack(&mut self, ctx: &mut dyn SystemContext, ack: u32) -> bool {
        if self.state != SenderState::Sending || ack <= self.base {
            return false;
        }
        if ack > self.next_seq {
            ctx.log(&format!(
                "ignoring ACK {} beyond next seq {}",
                ack, self.next_seq
            ));
            return false;
        }

        ctx.log(&format!("ACK {}", ack));
        self.base = ack;
        self.stalled_timeouts = 0;
        if self.base == self.total {
            self.state = SenderState::Done;
            let elapsed = ctx.now().saturating_sub(self.stats.started_at);
            ctx.log(&format!(
                "transfer complete in {:.3}s: {} packet(s), {} retransmitted",
                elapsed as f64 / 1000.0,
                self.total,
                self.stats.retransmitted
            ));
        }
        true
    }

    /// Resend every outstanding packet, oldest first.
    pub fn on_timeout(&mut self, ctx: &mut dyn SystemContext) {
        if self.state != SenderState::Sending {
            return;
        }
        self.stats.timeouts += 1;
        self.stalled_timeouts += 1;
        if self.config.max_stalled_timeouts > 0
            && self.stalled_timeouts > self.config.max_stalled_timeouts
        {
            ctx.log(&format!(
                "giving up after {} timeouts without progress at base {}",
                self.config.max_stalled_timeouts, self.base
            ));
            self.state = SenderState::Aborted;
            return;
        }

        ctx.log(&format!(
            "timeout -> retransmit {}..{}",
            self.base,
            self.next_seq.saturating_sub(1)
        ));
        for seq in self.base..self.next_seq {
            self.transmit(ctx, seq, true);
            self.stats.retransmitted += 1;
        }
    }

    pub fn base(&self) -> u32 {
        self.base
    }

    pub fn next_seq(&self) -> u32 {
        self.next_seq
    }

    pub fn total(&self) -> u32 {
        self.total
    }

    pub fn state(&self) -> SenderState {
        self.state
    }

    pub fn stats(&self) -> SenderStats {
        self.stats
    }

    fn packet_for(&self, seq: u32) -> Packet {
        match self.segments.get(seq as usize) {
            Some(payload) => Packet::data(seq, payload.clone()),
            None => Packet::eof(seq),
        }
    }

    fn transmit(&self, ctx: &mut dyn SystemContext, seq: u32, resend: bool) {
        let packet = self.packet_for(seq);
        ctx.log(&format!(
            "{} seq={} len={}{}",
            if resend { "RESEND" } else { "send" },
            seq,
            packet.payload.len(),
            if packet.header.flag == Flag::AckOrEof {
                " [EOF]"
            } else {
                ""
            }
        ));
        ctx.send_datagram(packet.encode());
    }

    fn finish_or_rearm(&mut self, ctx: &mut dyn SystemContext) {
        match self.state {
            SenderState::Sending => {
                self.fill_window(ctx);
                ctx.restart_timer(self.config.rto_ms(), RETRANSMIT_TIMER);
            }
            SenderState::Done | SenderState::Aborted => ctx.cancel_timer(RETRANSMIT_TIMER),
            SenderState::Idle => {}
        }
    }
}

impl TransportProtocol for GbnSender {
    fn on_datagram(&mut self, ctx: &mut dyn SystemContext, datagram: &[u8]) {
        if self.state != SenderState::Sending {
            return;
        }
        match Packet::decode(datagram) {
            Ok(packet) if packet.header.flag == Flag::AckOrEof => {
                self.on_ack(ctx, packet.header.ack);
            }
            Ok(packet) => ctx.log(&format!(
                "ignoring data packet seq={} during transfer",
                packet.header.seq
            )),
            Err(err) => ctx.log(&format!("ignoring ack: {}", err)),
        }
        self.finish_or_rearm(ctx);
    }

    fn on_timer(&mut self, ctx: &mut dyn SystemContext, timer_id: u32) {
        if timer_id != RETRANSMIT_TIMER || self.state != SenderState::Sending {
            return;
        }
        self.on_timeout(ctx);
        self.finish_or_rearm(ctx);
    }

    fn is_done(&self) -> bool {
        matches!(self.state, SenderState::Done | SenderState::Aborted)
    }
}
