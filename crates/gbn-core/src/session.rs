//! Serving side of one transfer: wait for a request, resolve the resource,
//! then drive a [`GbnSender`] until it finishes.

use std::sync::Arc;

use gbn_abstract::{Flag, Packet, ProtocolConfig, SystemContext, TransportProtocol};

use crate::resource::{ResourceError, ResourceStore};
use crate::segment::segment;
use crate::sender::{GbnSender, SenderState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    AwaitingRequest,
    Transferring,
    Complete,
    Aborted,
}

pub struct ServerSession {
    store: Arc<dyn ResourceStore>,
    sender: GbnSender,
    state: SessionState,
    resource: Option<String>,
    last_error: Option<ResourceError>,
}

impl ServerSession {
    pub fn new(config: ProtocolConfig, store: Arc<dyn ResourceStore>) -> Self {
        Self {
            store,
            sender: GbnSender::new(config),
            state: SessionState::AwaitingRequest,
            resource: None,
            last_error: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn resource(&self) -> Option<&str> {
        self.resource.as_deref()
    }

    /// The reason the most recent request was refused, if any.
    pub fn last_error(&self) -> Option<&ResourceError> {
        self.last_error.as_ref()
    }

    pub fn sender(&self) -> &GbnSender {
        &self.sender
    }

    /// Abort an active transfer, e.g. after the transport reported a reset.
    pub fn abort(&mut self, ctx: &mut dyn SystemContext, reason: &str) {
        if self.state == SessionState::Transferring {
            ctx.log(&format!("aborting transfer: {}", reason));
            ctx.cancel_timer(crate::sender::RETRANSMIT_TIMER);
            self.state = SessionState::Aborted;
        }
    }

    fn on_request(&mut self, ctx: &mut dyn SystemContext, datagram: &[u8]) {
        let packet = match Packet::decode(datagram) {
            Ok(packet) => packet,
            Err(err) => {
                ctx.log(&format!("bad request: {}", err));
                return;
            }
        };
        if packet.header.flag != Flag::Data {
            ctx.log("ignoring non-request packet while idle");
            return;
        }
        if !packet.length_matches() || !packet.checksum_matches() {
            ctx.log("bad request: damaged in transit");
            return;
        }

        let name = request_name(&packet.payload);
        if name.is_empty() {
            ctx.log("empty resource name in request");
            return;
        }

        match self.store.load(&name) {
            Ok(data) => {
                ctx.log(&format!("client requested: {}", name));
                self.last_error = None;
                self.resource = Some(name);
                self.state = SessionState::Transferring;
                self.sender.start(ctx, segment(data));
            }
            Err(err) => {
                ctx.log(&err.to_string());
                self.last_error = Some(err);
            }
        }
    }

    fn sync_state(&mut self) {
        if self.state != SessionState::Transferring {
            return;
        }
        match self.sender.state() {
            SenderState::Done => self.state = SessionState::Complete,
            SenderState::Aborted => self.state = SessionState::Aborted,
            SenderState::Idle | SenderState::Sending => {}
        }
    }
}

impl TransportProtocol for ServerSession {
    fn on_datagram(&mut self, ctx: &mut dyn SystemContext, datagram: &[u8]) {
        match self.state {
            SessionState::AwaitingRequest => self.on_request(ctx, datagram),
            SessionState::Transferring => self.sender.on_datagram(ctx, datagram),
            SessionState::Complete | SessionState::Aborted => {}
        }
        self.sync_state();
    }

    fn on_timer(&mut self, ctx: &mut dyn SystemContext, timer_id: u32) {
        if self.state == SessionState::Transferring {
            self.sender.on_timer(ctx, timer_id);
            self.sync_state();
        }
    }

    fn is_done(&self) -> bool {
        matches!(self.state, SessionState::Complete | SessionState::Aborted)
    }
}

/// Decode a requested name, skipping bytes that are not valid UTF-8.
fn request_name(payload: &[u8]) -> String {
    let name: String = payload.utf8_chunks().map(|chunk| chunk.valid()).collect();
    name.trim().to_string()
}
