//! Go-Back-N receiver.
//!
//! Packets are accepted strictly in sequence order; nothing is buffered.
//! Every inbound datagram is answered with a cumulative ack carrying
//! `next_expected`, so rejected packets produce duplicate acks.

use gbn_abstract::{Flag, Packet, PacketError, ProtocolConfig, SystemContext, TransportProtocol};
use thiserror::Error;

pub const IDLE_TIMER: u32 = 1;

/// Why an inbound datagram was dropped.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Rejection {
    #[error(transparent)]
    Malformed(#[from] PacketError),
    #[error("length mismatch for seq={seq}: header says {declared}, got {present}")]
    LengthMismatch {
        seq: u32,
        declared: u16,
        present: usize,
    },
    #[error("drop corrupted seq={seq}")]
    ChecksumMismatch { seq: u32 },
    #[error("out of order seq={seq}, expecting {expected}")]
    OutOfOrder { seq: u32, expected: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Accepted { seq: u32, eof: bool },
    Rejected(Rejection),
    /// The stream already ended; the final ack is repeated.
    AfterEof,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReceiverStats {
    pub accepted: u64,
    pub rejected: u64,
    pub corrupted: u64,
    pub bytes: u64,
    pub acks_sent: u64,
}

#[derive(Debug)]
pub struct GbnReceiver {
    resource: String,
    idle_ms: u64,
    next_expected: u32,
    done: bool,
    stats: ReceiverStats,
}

impl GbnReceiver {
    pub fn new(resource: impl Into<String>, config: &ProtocolConfig) -> Self {
        Self {
            resource: resource.into(),
            idle_ms: config.idle_ack_ms(),
            next_expected: 0,
            done: false,
            stats: ReceiverStats::default(),
        }
    }

    /// Validate one datagram, deliver its payload if it is the next one in
    /// sequence, and answer with a cumulative ack.
    pub fn accept(&mut self, ctx: &mut dyn SystemContext, datagram: &[u8]) -> Verdict {
        if self.done {
            self.send_ack(ctx);
            return Verdict::AfterEof;
        }

        let verdict = match self.check(datagram) {
            Ok(packet) => {
                let seq = packet.header.seq;
                if !packet.payload.is_empty() {
                    ctx.deliver_data(&packet.payload);
                    self.stats.bytes += packet.payload.len() as u64;
                }
                self.next_expected += 1;
                self.stats.accepted += 1;
                let eof = packet.header.flag == Flag::AckOrEof;
                if eof {
                    self.done = true;
                    ctx.log(&format!(
                        "EOF received, {} byte(s) in {} packet(s)",
                        self.stats.bytes, self.stats.accepted
                    ));
                }
                Verdict::Accepted { seq, eof }
            }
            Err(rejection) => {
                self.stats.rejected += 1;
                if matches!(rejection, Rejection::ChecksumMismatch { .. }) {
                    self.stats.corrupted += 1;
                }
                ctx.log(&rejection.to_string());
                Verdict::Rejected(rejection)
            }
        };

        self.send_ack(ctx);
        verdict
    }

    pub fn next_expected(&self) -> u32 {
        self.next_expected
    }

    pub fn stats(&self) -> ReceiverStats {
        self.stats
    }

    fn check(&self, datagram: &[u8]) -> Result<Packet, Rejection> {
        let packet = Packet::decode(datagram)?;
        let header = packet.header;
        if !packet.length_matches() {
            return Err(Rejection::LengthMismatch {
                seq: header.seq,
                declared: header.data_len,
                present: packet.payload.len(),
            });
        }
        if !packet.checksum_matches() {
            return Err(Rejection::ChecksumMismatch { seq: header.seq });
        }
        if header.seq != self.next_expected {
            return Err(Rejection::OutOfOrder {
                seq: header.seq,
                expected: self.next_expected,
            });
        }
        Ok(packet)
    }

    fn send_ack(&mut self, ctx: &mut dyn SystemContext) {
        self.stats.acks_sent += 1;
        ctx.send_datagram(Packet::ack(self.next_expected).encode());
    }

    fn send_request(&self, ctx: &mut dyn SystemContext) {
        ctx.send_datagram(Packet::request(&self.resource).encode());
    }
}

impl TransportProtocol for GbnReceiver {
    fn init(&mut self, ctx: &mut dyn SystemContext) {
        ctx.log(&format!("requesting {}", self.resource));
        self.send_request(ctx);
        ctx.restart_timer(self.idle_ms, IDLE_TIMER);
    }

    fn on_datagram(&mut self, ctx: &mut dyn SystemContext, datagram: &[u8]) {
        self.accept(ctx, datagram);
        if self.done {
            ctx.cancel_timer(IDLE_TIMER);
        } else {
            ctx.restart_timer(self.idle_ms, IDLE_TIMER);
        }
    }

    fn on_timer(&mut self, ctx: &mut dyn SystemContext, timer_id: u32) {
        if timer_id != IDLE_TIMER || self.done {
            return;
        }
        if self.next_expected == 0 {
            ctx.log(&format!("no data yet, re-requesting {}", self.resource));
            self.send_request(ctx);
        } else {
            ctx.log(&format!("idle, duplicate ACK {}", self.next_expected));
            self.send_ack(ctx);
        }
        ctx.restart_timer(self.idle_ms, IDLE_TIMER);
    }

    fn is_done(&self) -> bool {
        self.done
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use gbn_abstract::{ActionBuffer, HEADER_LEN, TimerCommand, capture};

    fn receiver() -> GbnReceiver {
        GbnReceiver::new("file.bin", &ProtocolConfig::default())
    }

    fn data(seq: u32, payload: &[u8]) -> Bytes {
        Packet::data(seq, Bytes::copy_from_slice(payload)).encode()
    }

    fn acks(buffer: &ActionBuffer) -> Vec<u32> {
        buffer
            .outgoing
            .iter()
            .map(|d| Packet::decode(d).unwrap().header.ack)
            .collect()
    }

    fn feed(rx: &mut GbnReceiver, datagram: &[u8]) -> (Verdict, ActionBuffer) {
        let mut verdict = None;
        let buffer = capture(0, |ctx| verdict = Some(rx.accept(ctx, datagram)));
        (verdict.unwrap(), buffer)
    }

    #[test]
    fn init_sends_request_and_arms_idle_timer() {
        let mut rx = receiver();
        let buffer = capture(0, |ctx| rx.init(ctx));
        let request = Packet::decode(&buffer.outgoing[0]).unwrap();
        assert_eq!(request.header.flag, Flag::Data);
        assert_eq!((request.header.seq, request.header.ack), (0, 0));
        assert_eq!(&request.payload[..], b"file.bin");
        assert!(buffer.timers.contains(&TimerCommand::Start {
            delay_ms: 1000,
            timer_id: IDLE_TIMER
        }));
    }

    #[test]
    fn in_order_packets_are_delivered_and_acked() {
        let mut rx = receiver();
        let (v, b) = feed(&mut rx, &data(0, b"hello "));
        assert_eq!(v, Verdict::Accepted { seq: 0, eof: false });
        assert_eq!(b.delivered, vec![b"hello ".to_vec()]);
        assert_eq!(acks(&b), vec![1]);

        let (_, b) = feed(&mut rx, &data(1, b"world"));
        assert_eq!(acks(&b), vec![2]);

        let (v, b) = feed(&mut rx, &Packet::eof(2).encode());
        assert_eq!(v, Verdict::Accepted { seq: 2, eof: true });
        assert!(b.delivered.is_empty());
        assert_eq!(acks(&b), vec![3]);
        assert!(rx.is_done());
    }

    #[test]
    fn ack_packet_seq_mirrors_next_expected() {
        let mut rx = receiver();
        let (_, b) = feed(&mut rx, &data(0, b"x"));
        let ack = Packet::decode(&b.outgoing[0]).unwrap();
        assert_eq!(ack.header.flag, Flag::AckOrEof);
        assert_eq!((ack.header.seq, ack.header.ack), (0, 1));
        assert!(ack.payload.is_empty());
    }

    #[test]
    fn malformed_datagram_gets_duplicate_ack() {
        let mut rx = receiver();
        feed(&mut rx, &data(0, b"a"));
        let (v, b) = feed(&mut rx, &[0u8; HEADER_LEN - 1]);
        assert!(matches!(v, Verdict::Rejected(Rejection::Malformed(_))));
        assert_eq!(acks(&b), vec![1]);
        assert_eq!(rx.next_expected(), 1);
    }

    #[test]
    fn length_mismatch_is_dropped() {
        let mut rx = receiver();
        let wire = data(0, b"abcdef");
        let (v, b) = feed(&mut rx, &wire[..wire.len() - 2]);
        assert!(matches!(
            v,
            Verdict::Rejected(Rejection::LengthMismatch {
                declared: 6,
                present: 4,
                ..
            })
        ));
        assert!(b.delivered.is_empty());
        assert_eq!(acks(&b), vec![0]);
    }

    #[test]
    fn corrupted_payload_is_dropped() {
        let mut rx = receiver();
        let mut wire = data(0, b"abcdef").to_vec();
        wire[HEADER_LEN] ^= 0xFF;
        let (v, b) = feed(&mut rx, &wire);
        assert_eq!(v, Verdict::Rejected(Rejection::ChecksumMismatch { seq: 0 }));
        assert!(b.delivered.is_empty());
        assert_eq!(acks(&b), vec![0]);
        assert_eq!(b.logs, vec!["drop corrupted seq=0".to_string()]);
        assert_eq!(rx.stats().corrupted, 1);
    }

    #[test]
    fn future_and_duplicate_packets_are_not_buffered() {
        let mut rx = receiver();
        let (v, b) = feed(&mut rx, &data(2, b"later"));
        assert_eq!(
            v,
            Verdict::Rejected(Rejection::OutOfOrder {
                seq: 2,
                expected: 0
            })
        );
        assert_eq!(acks(&b), vec![0]);

        feed(&mut rx, &data(0, b"first"));
        let (_, b) = feed(&mut rx, &data(0, b"first"));
        assert!(b.delivered.is_empty());
        assert_eq!(acks(&b), vec![1]);

        // seq 2 must be resent after seq 1; the earlier copy was discarded.
        let (v, _) = feed(&mut rx, &data(2, b"later"));
        assert!(matches!(v, Verdict::Rejected(Rejection::OutOfOrder { .. })));
    }

    #[test]
    fn packets_after_eof_only_repeat_the_final_ack() {
        let mut rx = receiver();
        feed(&mut rx, &Packet::eof(0).encode());
        let (v, b) = feed(&mut rx, &data(1, b"extra"));
        assert_eq!(v, Verdict::AfterEof);
        assert!(b.delivered.is_empty());
        assert_eq!(acks(&b), vec![1]);
        assert_eq!(rx.next_expected(), 1);
    }

    #[test]
    fn idle_timer_rerequests_until_data_arrives() {
        let mut rx = receiver();
        capture(0, |ctx| rx.init(ctx));
        let b = capture(1000, |ctx| rx.on_timer(ctx, IDLE_TIMER));
        let resent = Packet::decode(&b.outgoing[0]).unwrap();
        assert_eq!(&resent.payload[..], b"file.bin");

        capture(1100, |ctx| rx.on_datagram(ctx, &data(0, b"x")));
        let b = capture(2100, |ctx| rx.on_timer(ctx, IDLE_TIMER));
        let dup = Packet::decode(&b.outgoing[0]).unwrap();
        assert_eq!(dup.header.flag, Flag::AckOrEof);
        assert_eq!(dup.header.ack, 1);
        assert_eq!(
            b.timers.last(),
            Some(&TimerCommand::Start {
                delay_ms: 1000,
                timer_id: IDLE_TIMER
            })
        );
    }

    #[test]
    fn eof_cancels_the_idle_timer() {
        let mut rx = receiver();
        let b = capture(0, |ctx| rx.on_datagram(ctx, &Packet::eof(0).encode()));
        assert_eq!(
            b.timers,
            vec![TimerCommand::Cancel {
                timer_id: IDLE_TIMER
            }]
        );
        let late = capture(5000, |ctx| rx.on_timer(ctx, IDLE_TIMER));
        assert!(late.outgoing.is_empty());
    }

    #[test]
    fn next_expected_is_monotonic_under_arbitrary_input() {
        use rand::rngs::StdRng;
        use rand::seq::IndexedRandom;
        use rand::{Rng, SeedableRng};

        let segments: Vec<Vec<u8>> = (0..12).map(|i| vec![i as u8; 1 + i * 7]).collect();
        let mut wire: Vec<Bytes> = segments
            .iter()
            .enumerate()
            .map(|(i, s)| data(i as u32, s))
            .collect();
        wire.push(Packet::eof(segments.len() as u32).encode());

        for seed in 0..20 {
            let mut rng = StdRng::seed_from_u64(seed);
            let mut rx = receiver();
            let mut output = Vec::new();
            let mut last = 0;
            while !rx.is_done() {
                // Mostly the expected packet, otherwise a random, possibly
                // damaged, packet from anywhere in the stream.
                let mut datagram = if rng.random_bool(0.4) {
                    wire[rx.next_expected() as usize].to_vec()
                } else {
                    wire.choose(&mut rng).unwrap().to_vec()
                };
                if rng.random_bool(0.2) && datagram.len() > HEADER_LEN {
                    let pos = rng.random_range(HEADER_LEN..datagram.len());
                    datagram[pos] ^= 0xFF;
                }
                if rng.random_bool(0.1) {
                    datagram.truncate(rng.random_range(0..datagram.len()));
                }

                let before = rx.next_expected();
                let (verdict, b) = feed(&mut rx, &datagram);
                for chunk in b.delivered {
                    output.extend(chunk);
                }
                let after = rx.next_expected();
                match verdict {
                    Verdict::Accepted { .. } => assert_eq!(after, before + 1),
                    _ => assert_eq!(after, before),
                }
                assert!(after >= last);
                last = after;
            }
            assert_eq!(output, segments.concat());
        }
    }
}
