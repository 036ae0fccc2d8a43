//! Point-to-point iperf3 TCP throughput tests.
//!
//! The target instance runs an iperf3 server daemon, the source runs the
//! client with JSON output, and the parsed send/receive rates are written
//! per pair. Stale iperf3 servers are killed before the batch and all
//! servers are killed after it.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use color_eyre::eyre::WrapErr;
use color_eyre::Result;
use log::{info, warn};
use serde::{Deserialize, Serialize};

use super::pairing::{enumerate_pairs, PairingOptions, TestPair};
use super::run_timestamp;
use crate::instance_info::InstanceDirectory;
use crate::remote::Transport;

/// One p2p throughput measurement
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct P2pRecord {
    pub source_region: String,
    pub target_region: String,
    pub source_ip: String,
    pub target_ip: String,
    pub sent_mbps: f64,
    pub received_mbps: f64,
    pub status: String,
    pub result_file: Option<String>,
    pub error: Option<String>,
}

/// Outcome of a p2p batch
pub struct P2pBatch {
    pub records: Vec<P2pRecord>,
    pub summary_csv: Option<PathBuf>,
    pub errors_occurred: bool,
}

/// Extract sum_sent / sum_received rates in Mbps from iperf3 JSON output
pub fn parse_iperf3_tcp(payload: &serde_json::Value) -> Option<(f64, f64)> {
    let end = payload.get("end")?;
    let sent = end
        .get("sum_sent")
        .and_then(|s| s.get("bits_per_second"))
        .and_then(serde_json::Value::as_f64)?;
    let received = end
        .get("sum_received")
        .and_then(|s| s.get("bits_per_second"))
        .and_then(serde_json::Value::as_f64)?;
    Some((sent / 1e6, received / 1e6))
}

/// Run the p2p throughput batch over the enumerated pairs
pub fn run_p2p_tests(
    directory: &InstanceDirectory,
    transport: &dyn Transport,
    opts: &PairingOptions,
    duration_secs: u64,
    parallel_streams: u32,
    data_dir: &Path,
) -> Result<P2pBatch> {
    fs::create_dir_all(data_dir)
        .wrap_err_with(|| format!("Failed to create data directory '{}'", data_dir.display()))?;

    let pairs = enumerate_pairs(directory, opts)?;
    kill_servers(transport, &pairs);

    let mut records = Vec::new();
    let mut errors_occurred = false;

    for pair in &pairs {
        if pair.source.ip == pair.target.ip {
            // iperf3 cannot serve and connect on the same host here
            info!("Skipping self-test for {}", pair.source.label);
            continue;
        }

        info!(
            "Testing throughput: {} -> {}",
            pair.source.label, pair.target.label
        );
        let record = run_pair(transport, pair, duration_secs, parallel_streams, data_dir);
        if record.status != "success" {
            errors_occurred = true;
        }
        records.push(record);
    }

    kill_servers(transport, &pairs);

    let summary_csv = write_csv_summary(&records, data_dir)?;
    write_json_summary(&records, data_dir)?;

    Ok(P2pBatch {
        records,
        summary_csv,
        errors_occurred,
    })
}

fn run_pair(
    transport: &dyn Transport,
    pair: &TestPair,
    duration_secs: u64,
    parallel_streams: u32,
    data_dir: &Path,
) -> P2pRecord {
    let timestamp = run_timestamp();
    let mut record = P2pRecord {
        source_region: pair.source.label.clone(),
        target_region: pair.target.label.clone(),
        source_ip: pair.source.ip.clone(),
        target_ip: pair.target.ip.clone(),
        sent_mbps: 0.0,
        received_mbps: 0.0,
        status: "error".to_string(),
        result_file: None,
        error: None,
    };

    let server = transport.run(&pair.target.ip, "iperf3 -s -D");
    if !matches!(&server, Ok(output) if output.success) {
        warn!("Could not start iperf3 server on {}", pair.target.ip);
        record.error = Some("failed to start iperf3 server".to_string());
        return record;
    }

    let client_cmd = format!(
        "iperf3 -c {} -t {} -P {} -J",
        pair.target.ip, duration_secs, parallel_streams
    );
    let output = match transport.run(&pair.source.ip, &client_cmd) {
        Ok(output) if output.success => output,
        Ok(output) => {
            warn!(
                "iperf3 client failed {} -> {}: {}",
                pair.source.ip,
                pair.target.ip,
                output.stderr.trim()
            );
            record.error = Some(output.stderr.trim().to_string());
            return record;
        }
        Err(e) => {
            warn!(
                "iperf3 client failed {} -> {}: {}",
                pair.source.ip, pair.target.ip, e
            );
            record.error = Some(e.to_string());
            return record;
        }
    };

    let payload: serde_json::Value = match serde_json::from_str(&output.stdout) {
        Ok(v) => v,
        Err(e) => {
            warn!("Unparseable iperf3 output from {}: {}", pair.source.ip, e);
            record.error = Some(format!("invalid iperf3 JSON: {}", e));
            return record;
        }
    };

    let result_file = data_dir.join(format!(
        "p2p_{}_to_{}_{}.json",
        pair.source.ip, pair.target.ip, timestamp
    ));
    if let Err(e) = fs::write(&result_file, output.stdout.as_bytes()) {
        warn!("Failed to write '{}': {}", result_file.display(), e);
        record.error = Some(e.to_string());
        return record;
    }
    record.result_file = Some(result_file.to_string_lossy().into_owned());

    match parse_iperf3_tcp(&payload) {
        Some((sent, received)) => {
            record.sent_mbps = sent;
            record.received_mbps = received;
            record.status = "success".to_string();
            info!(
                "Throughput {} -> {}: {:.2} Mbps sent, {:.2} Mbps received",
                pair.source.label, pair.target.label, sent, received
            );
        }
        None => {
            // iperf3 reports its own failures inside the JSON body
            let detail = payload
                .get("error")
                .and_then(serde_json::Value::as_str)
                .unwrap_or("missing end summary")
                .to_string();
            warn!(
                "iperf3 reported an error {} -> {}: {}",
                pair.source.label, pair.target.label, detail
            );
            record.error = Some(detail);
        }
    }

    record
}

/// Kill iperf3 servers on every distinct target IP, ignoring failures
fn kill_servers(transport: &dyn Transport, pairs: &[TestPair]) {
    let targets: BTreeSet<&str> = pairs.iter().map(|p| p.target.ip.as_str()).collect();
    for ip in targets {
        if transport.run(ip, "pkill -f 'iperf3 -s' || true").is_err() {
            warn!("Could not reach {} to stop iperf3 servers", ip);
        }
    }
}

fn write_csv_summary(records: &[P2pRecord], data_dir: &Path) -> Result<Option<PathBuf>> {
    if records.is_empty() {
        warn!("No p2p records to summarize");
        return Ok(None);
    }

    let csv_path = data_dir.join(format!("p2p_results_{}.csv", run_timestamp()));
    let mut writer = csv::Writer::from_path(&csv_path)
        .wrap_err_with(|| format!("Failed to create '{}'", csv_path.display()))?;

    writer.write_record([
        "source_region",
        "target_region",
        "sent_mbps",
        "received_mbps",
        "status",
        "file",
    ])?;
    for record in records {
        writer.write_record([
            record.source_region.clone(),
            record.target_region.clone(),
            format!("{:.3}", record.sent_mbps),
            format!("{:.3}", record.received_mbps),
            record.status.clone(),
            record.result_file.clone().unwrap_or_default(),
        ])?;
    }
    writer.flush()?;

    info!("P2p summary saved to {:?}", csv_path);
    Ok(Some(csv_path))
}

/// Batch summary keyed by result file, the collector's second reconciliation
/// source
fn write_json_summary(records: &[P2pRecord], data_dir: &Path) -> Result<()> {
    if records.is_empty() {
        return Ok(());
    }
    let path = data_dir.join(format!("p2p_test_summary_{}.json", run_timestamp()));
    let entries: Vec<serde_json::Value> = records
        .iter()
        .map(|r| {
            serde_json::json!({
                "result_file": r.result_file,
                "source_region": r.source_region,
                "target_region": r.target_region,
                "source_ip": r.source_ip,
                "target_ip": r.target_ip,
                "status": r.status,
            })
        })
        .collect();
    fs::write(&path, serde_json::to_string_pretty(&entries)?)
        .wrap_err_with(|| format!("Failed to write '{}'", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_iperf3_tcp() {
        let payload = serde_json::json!({
            "end": {
                "sum_sent": { "bits_per_second": 94_500_000.0 },
                "sum_received": { "bits_per_second": 93_200_000.0 }
            }
        });
        let (sent, received) = parse_iperf3_tcp(&payload).unwrap();
        assert!((sent - 94.5).abs() < 1e-9);
        assert!((received - 93.2).abs() < 1e-9);
    }

    #[test]
    fn test_parse_iperf3_tcp_error_payload() {
        let payload = serde_json::json!({
            "error": "unable to connect to server: Connection refused"
        });
        assert!(parse_iperf3_tcp(&payload).is_none());
    }
}
