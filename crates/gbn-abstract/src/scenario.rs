use crate::config::{ProtocolConfig, SimConfig};
use serde::Deserialize;

#[derive(Deserialize, Debug, Clone)]
pub struct TestScenario {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub config: SimConfigOverride,
    #[serde(default)]
    pub protocol: ProtocolOverride,
    pub resource: ResourceSpec,
    #[serde(default)]
    pub actions: Vec<TestAction>,
    #[serde(default)]
    pub assertions: Vec<TestAssertion>,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct SimConfigOverride {
    pub loss_pct: Option<u8>,
    pub corrupt_pct: Option<u8>,
    pub duplicate_pct: Option<u8>,
    pub min_latency: Option<u64>,
    pub max_latency: Option<u64>,
    pub seed: Option<u64>,
}

impl SimConfigOverride {
    pub fn apply_to(&self, config: &mut SimConfig) {
        if let Some(v) = self.loss_pct {
            config.fault.loss_pct = v;
        }
        if let Some(v) = self.corrupt_pct {
            config.fault.corrupt_pct = v;
        }
        if let Some(v) = self.duplicate_pct {
            config.duplicate_pct = v;
        }
        if let Some(v) = self.min_latency {
            config.min_latency = v;
        }
        if let Some(v) = self.max_latency {
            config.max_latency = v;
        }
        if let Some(v) = self.seed {
            config.seed = v;
        }
    }
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct ProtocolOverride {
    pub window_size: Option<u32>,
    pub rto_sec: Option<f64>,
    pub idle_ack_sec: Option<f64>,
    pub max_stalled_timeouts: Option<u32>,
}

impl ProtocolOverride {
    pub fn apply_to(&self, config: &mut ProtocolConfig) {
        if let Some(v) = self.window_size {
            config.window_size = v;
        }
        if let Some(v) = self.rto_sec {
            config.rto_sec = v;
        }
        if let Some(v) = self.idle_ack_sec {
            config.idle_ack_sec = v;
        }
        if let Some(v) = self.max_stalled_timeouts {
            config.max_stalled_timeouts = v;
        }
    }
}

/// The resource served during the scenario.
#[derive(Deserialize, Debug, Clone)]
pub struct ResourceSpec {
    pub name: String,
    #[serde(flatten)]
    pub content: ResourceContent,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(untagged)]
pub enum ResourceContent {
    /// Literal UTF-8 text.
    Text { text: String },
    /// `size` bytes counting up from 0 and wrapping at 256.
    Pattern { size: usize },
}

impl ResourceContent {
    pub fn bytes(&self) -> Vec<u8> {
        match self {
            ResourceContent::Text { text } => text.as_bytes().to_vec(),
            ResourceContent::Pattern { size } => (0..*size).map(|i| i as u8).collect(),
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TestAction {
    /// Deterministically drop the first datagram the server sends with given seq
    DropNextFromServerSeq { seq: u32 },
    /// Deterministically corrupt the first data datagram the server sends with given seq
    CorruptNextFromServerSeq { seq: u32 },
    /// Deterministically drop the first datagram the client sends with given ack number
    /// (the request carries ack 0)
    DropNextFromClientAck { ack: u32 },
}

#[derive(Deserialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TestAssertion {
    /// The client's output equals the served resource byte for byte
    OutputMatchesResource,
    /// Both endpoints reached their terminal state
    TransferComplete,
    /// The number of datagrams sent by the server is within range
    ServerPacketCount { min: u32, max: Option<u32> },
    /// The number of datagrams sent by the client is within range
    ClientPacketCount { min: u32, max: Option<u32> },
    /// At least `min` retransmissions were triggered by timeouts
    Retransmissions { min: u32 },
    /// Simulation finishes within time
    MaxDuration { ms: u64 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resource_content_variants() {
        let text = ResourceContent::Text {
            text: "abc".into(),
        };
        assert_eq!(text.bytes(), b"abc");
        let pattern = ResourceContent::Pattern { size: 258 };
        let bytes = pattern.bytes();
        assert_eq!(bytes.len(), 258);
        assert_eq!((bytes[0], bytes[255], bytes[256]), (0, 255, 0));
    }

    #[test]
    fn overrides_only_touch_present_fields() {
        let mut sim = SimConfig::default();
        SimConfigOverride {
            loss_pct: Some(30),
            seed: Some(9),
            ..Default::default()
        }
        .apply_to(&mut sim);
        assert_eq!(sim.fault.loss_pct, 30);
        assert_eq!(sim.fault.corrupt_pct, 0);
        assert_eq!(sim.seed, 9);
        assert_eq!(sim.max_latency, SimConfig::default().max_latency);

        let mut proto = ProtocolConfig::default();
        ProtocolOverride {
            window_size: Some(3),
            ..Default::default()
        }
        .apply_to(&mut proto);
        assert_eq!(proto.window_size, 3);
        assert_eq!(proto.rto_sec, 0.5);
    }
}
