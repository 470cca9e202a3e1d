//! Deterministic discrete-event simulation of one server and one client
//! joined by a faulty link.

pub mod engine;
pub mod scenario_runner;
pub mod trace;

pub use engine::{DEFAULT_HORIZON_MS, LinkEventSummary, NodeId, Simulator};
pub use trace::SimulationReport;
