use serde::Serialize;
use std::collections::HashMap;

use gbn_abstract::SimConfig;

use crate::engine::LinkEventSummary;

#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    pub config: SimConfig,
    pub duration_ms: u64,
    /// Whether both endpoints reached their terminal state.
    pub complete: bool,
    /// Payload chunks in the order the client delivered them.
    pub delivered_data: Vec<Vec<u8>>,
    pub server_packet_count: u32,
    pub client_packet_count: u32,
    pub retransmissions: u32,
    pub metrics: HashMap<String, Vec<(u64, f64)>>,
    pub link_events: Vec<LinkEventSummary>,
}

impl SimulationReport {
    /// The client's output stream.
    pub fn output(&self) -> Vec<u8> {
        self.delivered_data.concat()
    }

    pub fn max_metric(&self, name: &str) -> Option<f64> {
        self.metrics
            .get(name)?
            .iter()
            .map(|(_, v)| *v)
            .reduce(f64::max)
    }
}
