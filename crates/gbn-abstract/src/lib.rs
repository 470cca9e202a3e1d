pub mod checksum;
pub mod config;
pub mod interface;
pub mod packet;
pub mod scenario;

pub use checksum::internet_checksum;
pub use config::{ConfigError, FaultConfig, ProtocolConfig, SimConfig};
pub use interface::{
    ActionBuffer, ScopedContext, SystemContext, TimerCommand, TransportProtocol, capture,
};
pub use packet::{Flag, HEADER_LEN, Header, MSS, Packet, PacketError, RECV_BUF_LEN};

pub use scenario::{
    ProtocolOverride, ResourceContent, ResourceSpec, SimConfigOverride, TestAction,
    TestAssertion, TestScenario,
};
