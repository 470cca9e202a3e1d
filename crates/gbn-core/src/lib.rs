//! Go-Back-N protocol engines.
//!
//! - [`sender`]   sliding-window transmitter with a single retransmission timer
//! - [`receiver`] in-order acceptor emitting cumulative acks
//! - [`session`]  request handling on the serving side
//! - [`channel`]  loss and corruption injection
//!
//! Engines are driven through [`gbn_abstract::TransportProtocol`] and never
//! perform I/O themselves.

pub mod channel;
pub mod receiver;
pub mod resource;
pub mod segment;
pub mod sender;
pub mod session;

pub use channel::{Fate, FaultyChannel};
pub use receiver::{GbnReceiver, ReceiverStats, Rejection, Verdict};
pub use resource::{DirectoryStore, MemoryStore, ResourceError, ResourceStore};
pub use segment::segment;
pub use sender::{GbnSender, SenderState, SenderStats};
pub use session::{ServerSession, SessionState};
