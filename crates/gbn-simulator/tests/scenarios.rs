use gbn_abstract::{FaultConfig, MSS, ProtocolConfig, SimConfig};
use gbn_simulator::{SimulationReport, Simulator, scenario_runner};
use std::path::PathBuf;

fn scenario_path(file: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("../../scenarios")
        .join(file)
}

fn clean_link() -> SimConfig {
    SimConfig {
        min_latency: 20,
        max_latency: 20,
        ..Default::default()
    }
}

/// Ack numbers the client put on the wire, in send order.
fn client_acks(report: &SimulationReport) -> Vec<u32> {
    report
        .link_events
        .iter()
        .filter(|e| e.description.starts_with("[Client->Server] SEND"))
        .filter_map(|e| {
            let rest = e.description.split("ack=").nth(1)?;
            rest.split_whitespace().next()?.parse().ok()
        })
        .collect()
}

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 251) as u8).collect()
}

#[test]
fn bundled_scenarios_pass() {
    for file in [
        "empty_resource.toml",
        "three_segments.toml",
        "corrupt_once.toml",
        "lossy.toml",
    ] {
        let report = scenario_runner::run_scenario(scenario_path(file))
            .unwrap_or_else(|e| panic!("{file}: {e:#}"));
        assert!(report.complete, "{file}");
    }
}

#[test]
fn empty_resource_is_a_single_eof() {
    let mut sim = Simulator::transfer(clean_link(), ProtocolConfig::default(), "empty", Vec::new());
    assert!(sim.run_until_complete());
    assert_eq!(sim.server_packet_count, 1);
    assert!(sim.output().is_empty());
    // request, then the ack for EOF
    assert_eq!(client_acks(&sim.export_report()), vec![0, 1]);
}

#[test]
fn three_segments_are_acked_in_order() {
    let data = pattern(3 * MSS - 100);
    let mut sim = Simulator::transfer(clean_link(), ProtocolConfig::default(), "three", data.clone());
    assert!(sim.run_until_complete());
    let report = sim.export_report();
    assert_eq!(report.output(), data);
    assert_eq!(report.server_packet_count, 4);
    assert_eq!(report.retransmissions, 0);
    assert_eq!(client_acks(&report), vec![0, 1, 2, 3, 4]);
    assert_eq!(report.delivered_data.len(), 3);
}

#[test]
fn corrupted_segment_is_recovered_by_window_retransmission() {
    let data = pattern(3 * MSS - 100);
    let mut sim = Simulator::transfer(clean_link(), ProtocolConfig::default(), "three", data.clone());
    sim.add_corrupt_server_seq_once(1);
    assert!(sim.run_until_complete());
    let report = sim.export_report();

    assert_eq!(report.output(), data);
    // The first pass leaves the client at next_expected=1; every later packet
    // of that pass is answered with a duplicate ack.
    let acks = client_acks(&report);
    assert_eq!(&acks[..5], &[0, 1, 1, 1, 1]);
    assert_eq!(&acks[5..], &[2, 3, 4]);
    // seq 1, 2 and 3 resent after one RTO.
    assert_eq!(report.retransmissions, 3);
    assert!(report.duration_ms >= 500);
}

#[test]
fn lost_final_ack_is_repeated_until_the_server_hears_it() {
    let data = pattern(2 * MSS);
    let mut sim = Simulator::transfer(clean_link(), ProtocolConfig::default(), "two", data.clone());
    sim.add_drop_client_ack_once(3);
    assert!(sim.run_until_complete());
    assert_eq!(sim.output(), data);
    // The EOF is resent once and answered after the client finished.
    assert_eq!(sim.retransmissions, 1);
}

#[test]
fn lost_request_is_retried() {
    let mut sim = Simulator::transfer(clean_link(), ProtocolConfig::default(), "x", &b"xyz"[..]);
    sim.add_drop_client_ack_once(0);
    assert!(sim.run_until_complete());
    assert_eq!(sim.output(), b"xyz");
    assert!(sim.current_time() >= 1000);
}

#[test]
fn terminates_with_identical_output_across_seeds() {
    let data = pattern(12 * MSS + 77);
    for seed in 0..40 {
        let config = SimConfig {
            fault: FaultConfig {
                loss_pct: 15,
                corrupt_pct: 15,
            },
            duplicate_pct: 10,
            min_latency: 1,
            max_latency: 120,
            seed,
        };
        let protocol = ProtocolConfig {
            window_size: 1 + (seed as u32 % 8),
            ..Default::default()
        };
        let mut sim = Simulator::transfer(config, protocol, "file", data.clone());
        assert!(sim.run_until_complete(), "seed {seed} did not complete");

        let report = sim.export_report();
        assert_eq!(report.output(), data, "seed {seed}");
        let peak = report.max_metric("in_flight").unwrap_or(0.0);
        assert!(peak <= protocol.window_size as f64, "seed {seed}: in flight {peak}");
    }
}

#[test]
fn heavy_loss_still_terminates_with_default_protocol() {
    let data = pattern(6 * MSS + 10);
    let protocol = ProtocolConfig {
        window_size: 1,
        ..Default::default()
    };
    for seed in 0..8 {
        let config = SimConfig {
            fault: FaultConfig {
                loss_pct: 90,
                corrupt_pct: 0,
            },
            min_latency: 10,
            max_latency: 50,
            seed,
            ..Default::default()
        };
        let mut sim = Simulator::transfer(config, protocol, "file", data.clone());
        sim.init();
        // Ten hours of virtual time.
        assert!(sim.run_until(36_000_000), "seed {seed} did not complete");
        assert_eq!(sim.output(), data, "seed {seed}");
    }
}

#[test]
fn delivered_chunks_follow_segment_order() {
    let data = pattern(5 * MSS);
    let config = SimConfig {
        fault: FaultConfig {
            loss_pct: 25,
            corrupt_pct: 0,
        },
        min_latency: 1,
        max_latency: 200,
        seed: 99,
        ..Default::default()
    };
    let mut sim = Simulator::transfer(config, ProtocolConfig::default(), "file", data.clone());
    assert!(sim.run_until_complete());
    let chunks = &sim.delivered_data;
    assert_eq!(chunks.len(), 5);
    for (i, chunk) in chunks.iter().enumerate() {
        assert_eq!(&chunk[..], &data[i * MSS..(i + 1) * MSS]);
    }
}

#[test]
fn report_serializes_to_json() {
    let mut sim = Simulator::transfer(clean_link(), ProtocolConfig::default(), "a", &b"abc"[..]);
    sim.run_until_complete();
    let json = serde_json::to_value(sim.export_report()).unwrap();
    assert_eq!(json["complete"], true);
    assert_eq!(json["server_packet_count"], 2);
    assert!(json["link_events"].as_array().unwrap().len() >= 4);
}

#[test]
fn eof_follows_the_last_segment_on_the_wire() {
    let data = pattern(MSS + 1);
    let mut sim = Simulator::transfer(clean_link(), ProtocolConfig::default(), "f", data);
    sim.run_until_complete();
    let report = sim.export_report();
    assert!(
        report
            .link_events
            .iter()
            .any(|e| e.description == "[Server->Client] SEND seq=2 ack=0 (latency=20ms)")
    );
}
