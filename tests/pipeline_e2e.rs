//! End-to-end pipeline test against a stubbed transport.
//!
//! Two single-instance regions, latency and p2p enabled, UDP disabled. The
//! stub serves canned ping and iperf3 output, so the test exercises the
//! real runner, collector, matrix and formatting code paths without any
//! network or infrastructure.

use std::fs;
use std::path::Path;

use netbench::bench::pairing::PairingOptions;
use netbench::bench::{latency, p2p};
use netbench::collect::{format, results};
use netbench::instance_info::{InstanceDirectory, RegionInstances};
use netbench::remote::{CommandOutput, Transport};

struct StubTransport;

impl Transport for StubTransport {
    fn run(&self, ip: &str, command: &str) -> color_eyre::Result<CommandOutput> {
        let stdout = if command.starts_with("iperf3 -c") {
            // Different rates per source so matrix cells are distinguishable
            let mbps: f64 = if ip == "52.0.0.1" { 100.0 } else { 250.0 };
            serde_json::json!({
                "end": {
                    "sum_sent": { "bits_per_second": mbps * 1e6, "retransmits": 2 },
                    "sum_received": {
                        "bits_per_second": mbps * 1e6 * 0.97,
                        "bytes": 1.0e8,
                        "seconds": 10.0
                    }
                }
            })
            .to_string()
        } else {
            String::new()
        };
        Ok(CommandOutput {
            success: true,
            stdout,
            stderr: String::new(),
        })
    }

    fn fetch(&self, ip: &str, _remote_path: &str, local_path: &Path) -> color_eyre::Result<()> {
        let avg = if ip == "52.0.0.1" { 75.0 } else { 80.0 };
        let content = format!(
            "--- ping statistics ---\n\
             20 packets transmitted, 20 received, 0% packet loss, time 3802ms\n\
             rtt min/avg/max/mdev = {:.3}/{:.3}/{:.3}/0.210 ms\n",
            avg - 1.0,
            avg,
            avg + 1.0
        );
        fs::write(local_path, content)?;
        Ok(())
    }
}

fn two_region_directory() -> InstanceDirectory {
    let mut dir = InstanceDirectory::default();
    dir.instances.insert(
        "us-east-1".to_string(),
        RegionInstances {
            public_ips: vec!["52.0.0.1".to_string()],
            private_ips: vec!["10.0.0.1".to_string()],
        },
    );
    dir.instances.insert(
        "eu-west-2".to_string(),
        RegionInstances {
            public_ips: vec!["52.0.0.2".to_string()],
            private_ips: vec!["10.1.0.1".to_string()],
        },
    );
    dir
}

#[test]
fn two_regions_produce_full_off_diagonal_matrices() {
    let scratch = tempfile::TempDir::new().unwrap();
    let data_dir = scratch.path();
    let directory = two_region_directory();
    let transport = StubTransport;
    let opts = PairingOptions {
        all_regions: true,
        ..Default::default()
    };

    let latency_batch =
        latency::run_latency_tests(&directory, &transport, &opts, 20, data_dir).unwrap();
    assert_eq!(latency_batch.records.len(), 2);
    assert!(!latency_batch.errors_occurred);

    let p2p_batch =
        p2p::run_p2p_tests(&directory, &transport, &opts, 10, 1, data_dir).unwrap();
    assert_eq!(p2p_batch.records.len(), 2);
    assert!(p2p_batch.records.iter().all(|r| r.status == "success"));

    let collected = results::collect_results(data_dir).unwrap();
    assert_eq!(collected.point_to_point_tests.len(), 2);
    assert!(collected
        .point_to_point_tests
        .iter()
        .all(|t| t.status == "success" && !t.source_region.is_unknown()));

    let formatted = format::build_formatted_data(&collected, data_dir);

    let latency_matrix = formatted.latency_matrix.as_ref().unwrap();
    assert_eq!(latency_matrix.labels, vec!["eu-west-2", "us-east-1"]);
    assert!((latency_matrix.get("us-east-1", "eu-west-2") - 75.0).abs() < 1e-6);
    assert!((latency_matrix.get("eu-west-2", "us-east-1") - 80.0).abs() < 1e-6);
    assert!(latency_matrix.get("us-east-1", "us-east-1").is_nan());
    assert!(latency_matrix.get("eu-west-2", "eu-west-2").is_nan());

    let bw_matrix = formatted.p2p_bandwidth_matrix.as_ref().unwrap();
    assert!((bw_matrix.get("us-east-1", "eu-west-2") - 97.0).abs() < 1e-6);
    assert!((bw_matrix.get("eu-west-2", "us-east-1") - 242.5).abs() < 1e-6);
    assert!(bw_matrix.get("us-east-1", "us-east-1").is_nan());

    let written = format::write_formatted_artifacts(&formatted, data_dir).unwrap();
    assert!(written
        .iter()
        .any(|p| p.file_name().unwrap().to_str().unwrap().starts_with("latency_matrix_")));

    let md = fs::read_to_string(data_dir.join("formatted_results.md")).unwrap();
    assert!(md.contains("us-east-1"));
    assert!(md.contains("75.00"));
}
