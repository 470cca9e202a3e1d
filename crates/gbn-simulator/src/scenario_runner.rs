use anyhow::{Context, anyhow, bail};
use gbn_abstract::{ProtocolConfig, SimConfig, TestAction, TestAssertion, TestScenario};
use std::fs;
use std::path::Path;
use tracing::info;

use crate::{SimulationReport, Simulator};

/// Virtual time budget when a scenario asserts no `max_duration`.
const DEFAULT_MAX_DURATION_MS: u64 = 60_000;

pub fn load_scenario(path: impl AsRef<Path>) -> anyhow::Result<TestScenario> {
    let path = path.as_ref();
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read scenario file {}", path.display()))?;
    toml::from_str(&content).context("Failed to parse scenario")
}

pub fn run_scenario(path: impl AsRef<Path>) -> anyhow::Result<SimulationReport> {
    let scenario = load_scenario(path)?;
    run(&scenario)
}

/// Build the simulator a scenario describes, with its scripted faults armed.
pub fn build(scenario: &TestScenario) -> anyhow::Result<Simulator> {
    let mut config = SimConfig::default();
    scenario.config.apply_to(&mut config);
    config.validate().context("Invalid link configuration")?;

    let mut protocol = ProtocolConfig::default();
    scenario.protocol.apply_to(&mut protocol);
    protocol
        .validate()
        .context("Invalid protocol configuration")?;

    let mut sim = Simulator::transfer(
        config,
        protocol,
        &scenario.resource.name,
        scenario.resource.content.bytes(),
    );
    for action in &scenario.actions {
        match action {
            TestAction::DropNextFromServerSeq { seq } => sim.add_drop_server_seq_once(*seq),
            TestAction::CorruptNextFromServerSeq { seq } => sim.add_corrupt_server_seq_once(*seq),
            TestAction::DropNextFromClientAck { ack } => sim.add_drop_client_ack_once(*ack),
        }
    }
    Ok(sim)
}

/// Run a scenario to completion and check its assertions.
pub fn run(scenario: &TestScenario) -> anyhow::Result<SimulationReport> {
    info!("Running Scenario: {}", scenario.name);
    info!("Description: {}", scenario.description);

    let mut sim = build(scenario)?;
    sim.init();

    let max_duration = scenario
        .assertions
        .iter()
        .find_map(|a| match a {
            TestAssertion::MaxDuration { ms } => Some(*ms),
            _ => None,
        })
        .unwrap_or(DEFAULT_MAX_DURATION_MS);

    let complete = sim.run_until(max_duration);
    let report = sim.export_report();
    if !complete && sim.peek_next_event_time().is_some_and(|t| t > max_duration) {
        bail!("Test timed out after {} ms", max_duration);
    }

    let expected = scenario.resource.content.bytes();
    for assertion in &scenario.assertions {
        match assertion {
            TestAssertion::OutputMatchesResource => {
                let output = report.output();
                if output != expected {
                    return Err(anyhow!(
                        "Assertion Failed: client output ({} bytes) differs from resource ({} bytes)",
                        output.len(),
                        expected.len()
                    ));
                }
            }
            TestAssertion::TransferComplete => {
                if !report.complete {
                    return Err(anyhow!("Assertion Failed: transfer did not complete"));
                }
            }
            TestAssertion::ServerPacketCount { min, max } => {
                check_range("Server", report.server_packet_count, *min, *max)?
            }
            TestAssertion::ClientPacketCount { min, max } => {
                check_range("Client", report.client_packet_count, *min, *max)?
            }
            TestAssertion::Retransmissions { min } => {
                if report.retransmissions < *min {
                    return Err(anyhow!(
                        "Assertion Failed: {} retransmissions, expected at least {}",
                        report.retransmissions,
                        min
                    ));
                }
            }
            TestAssertion::MaxDuration { .. } => {} // checked while running
        }
    }

    info!("Test Scenario Passed!");
    Ok(report)
}

fn check_range(who: &str, count: u32, min: u32, max: Option<u32>) -> anyhow::Result<()> {
    if count < min {
        bail!("Assertion Failed: {who} sent {count} packets, expected min {min}");
    }
    if let Some(max) = max
        && count > max
    {
        bail!("Assertion Failed: {who} sent {count} packets, expected max {max}");
    }
    Ok(())
}
