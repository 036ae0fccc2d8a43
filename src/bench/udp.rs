//! One-to-many iperf3 UDP tests.
//!
//! A single server instance (the first instance of the configured server
//! region) receives UDP streams from every other instance in turn. Each
//! client writes its iperf3 JSON locally, which is copied back and stored as
//! a raw result file. The batch summary carries the server region, the IP
//! type and an IP-to-region map so the collector can attribute results even
//! when a payload lacks region fields.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use color_eyre::eyre::{eyre, WrapErr};
use color_eyre::Result;
use log::{info, warn};
use serde::{Deserialize, Serialize};

use super::run_timestamp;
use crate::instance_info::InstanceDirectory;
use crate::remote::Transport;

/// One server-to-client UDP measurement
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UdpRecord {
    pub server_region: String,
    pub client_region: String,
    pub server_ip: String,
    pub client_ip: String,
    pub bandwidth_mbps: f64,
    pub jitter_ms: f64,
    pub lost_percent: f64,
    pub status: String,
    pub result_file: Option<String>,
    pub error: Option<String>,
}

/// Outcome of a UDP batch
pub struct UdpBatch {
    pub records: Vec<UdpRecord>,
    pub summary_file: Option<PathBuf>,
    pub errors_occurred: bool,
}

/// Extract bandwidth/jitter/loss from an iperf3 UDP client payload
pub fn parse_iperf3_udp(payload: &serde_json::Value) -> Option<(f64, f64, f64)> {
    let sum = payload.get("end")?.get("sum")?;
    let bps = sum.get("bits_per_second")?.as_f64()?;
    let jitter = sum.get("jitter_ms")?.as_f64()?;
    let lost = sum
        .get("lost_percent")
        .and_then(serde_json::Value::as_f64)
        .unwrap_or(0.0);
    Some((bps / 1e6, jitter, lost))
}

/// Run UDP tests toward the server region.
///
/// The first server-region instance serves; with intra-region testing and
/// several server-region instances, each instance serves in turn under an
/// `region_instanceN` label. Clients are the first instance of every other
/// region plus, under intra-region testing, the server-region siblings.
#[allow(clippy::too_many_arguments)]
pub fn run_udp_tests(
    directory: &InstanceDirectory,
    transport: &dyn Transport,
    server_region: &str,
    bandwidth: &str,
    duration_secs: u64,
    use_private_ip: bool,
    intra_region: bool,
    data_dir: &Path,
) -> Result<UdpBatch> {
    fs::create_dir_all(data_dir)
        .wrap_err_with(|| format!("Failed to create data directory '{}'", data_dir.display()))?;

    let server_ips = directory
        .get(server_region)
        .map(|r| r.ips(use_private_ip).to_vec())
        .unwrap_or_default();
    if server_ips.is_empty() {
        return Err(eyre!(
            "No instances available in UDP server region '{}'",
            server_region
        ));
    }

    let rotate = intra_region && server_ips.len() > 1;
    let server_count = if rotate { server_ips.len() } else { 1 };

    let mut ip_to_region_map = BTreeMap::new();
    let mut records = Vec::new();
    let mut errors_occurred = false;

    for (si, server_ip) in server_ips.iter().take(server_count).enumerate() {
        let server_label = if rotate {
            format!("{}_instance{}", server_region, si + 1)
        } else {
            server_region.to_string()
        };
        ip_to_region_map.insert(server_ip.clone(), server_label.clone());
        info!(
            "UDP server: {} ({}), bandwidth {}",
            server_label, server_ip, bandwidth
        );

        // The distro iperf3 service would hold the port
        let _ = transport.run(
            server_ip,
            "sudo systemctl stop iperf3 2>/dev/null; pkill -f 'iperf3 -s' || true",
        );
        let server = transport.run(server_ip, "iperf3 -s -D");
        if !matches!(&server, Ok(output) if output.success) {
            warn!("Could not start iperf3 UDP server on {}", server_ip);
            errors_occurred = true;
            continue;
        }

        for region in directory.regions() {
            let Some(instances) = directory.get(&region) else {
                continue;
            };
            let ips = instances.ips(use_private_ip);
            if ips.is_empty() {
                warn!("No {} IPs for {}. Skipping UDP clients there.",
                    if use_private_ip { "private" } else { "public" }, region);
                continue;
            }

            let clients: Vec<(String, &String)> = if region == server_region && intra_region {
                // Sibling instances in the server region
                ips.iter()
                    .enumerate()
                    .filter(|(_, ip)| *ip != server_ip)
                    .map(|(i, ip)| (format!("{}_instance{}", region, i + 1), ip))
                    .collect()
            } else if region == server_region {
                Vec::new()
            } else {
                vec![(region.clone(), &ips[0])]
            };

            for (client_label, client_ip) in clients {
                ip_to_region_map.insert(client_ip.clone(), client_label.clone());
                info!("UDP test: {} ({}) -> {}", client_label, client_ip, server_label);
                let record = run_client(
                    transport,
                    &server_label,
                    server_ip,
                    &client_label,
                    client_ip,
                    bandwidth,
                    duration_secs,
                    data_dir,
                );
                if record.status != "success" {
                    errors_occurred = true;
                }
                records.push(record);
            }
        }

        // Restore the instance to its pre-test state
        let _ = transport.run(
            server_ip,
            "pkill -f 'iperf3 -s' || true; sudo systemctl start iperf3 2>/dev/null || true",
        );
    }

    let summary_file = write_summary(
        &records,
        server_region,
        use_private_ip,
        &ip_to_region_map,
        data_dir,
    )?;

    Ok(UdpBatch {
        records,
        summary_file,
        errors_occurred,
    })
}

#[allow(clippy::too_many_arguments)]
fn run_client(
    transport: &dyn Transport,
    server_region: &str,
    server_ip: &str,
    client_region: &str,
    client_ip: &str,
    bandwidth: &str,
    duration_secs: u64,
    data_dir: &Path,
) -> UdpRecord {
    let timestamp = run_timestamp();
    let mut record = UdpRecord {
        server_region: server_region.to_string(),
        client_region: client_region.to_string(),
        server_ip: server_ip.to_string(),
        client_ip: client_ip.to_string(),
        bandwidth_mbps: 0.0,
        jitter_ms: 0.0,
        lost_percent: 0.0,
        status: "error".to_string(),
        result_file: None,
        error: None,
    };

    let client_cmd = format!(
        "iperf3 -u -c {} -b {} -t {} -J > /tmp/iperf3_udp_result.json",
        server_ip, bandwidth, duration_secs
    );
    let run = transport.run(client_ip, &client_cmd);
    if !matches!(&run, Ok(output) if output.success) {
        warn!("UDP client failed on {}", client_ip);
        record.error = Some("iperf3 UDP client failed".to_string());
        return record;
    }

    let result_file = data_dir.join(format!(
        "udp_multicast_{}_to_{}_{}.json",
        server_ip, client_ip, timestamp
    ));
    if let Err(e) = transport.fetch(client_ip, "/tmp/iperf3_udp_result.json", &result_file) {
        warn!("Could not fetch UDP results from {}: {}", client_ip, e);
        record.error = Some(e.to_string());
        return record;
    }
    record.result_file = Some(result_file.to_string_lossy().into_owned());

    let content = fs::read_to_string(&result_file).unwrap_or_default();
    let payload: serde_json::Value = match serde_json::from_str(&content) {
        Ok(v) => v,
        Err(e) => {
            warn!("Unparseable UDP result from {}: {}", client_ip, e);
            record.error = Some(format!("invalid iperf3 JSON: {}", e));
            return record;
        }
    };

    match parse_iperf3_udp(&payload) {
        Some((mbps, jitter, lost)) => {
            record.bandwidth_mbps = mbps;
            record.jitter_ms = jitter;
            record.lost_percent = lost;
            record.status = "success".to_string();
            info!(
                "UDP {} -> {}: {:.2} Mbps, jitter {:.3} ms, loss {:.2}%",
                client_region, server_region, mbps, jitter, lost
            );
        }
        None => {
            let detail = payload
                .get("error")
                .and_then(serde_json::Value::as_str)
                .unwrap_or("missing end summary")
                .to_string();
            warn!("iperf3 reported a UDP error on {}: {}", client_ip, detail);
            record.error = Some(detail);
        }
    }

    record
}

fn write_summary(
    records: &[UdpRecord],
    server_region: &str,
    use_private_ip: bool,
    ip_to_region_map: &BTreeMap<String, String>,
    data_dir: &Path,
) -> Result<Option<PathBuf>> {
    if records.is_empty() {
        warn!("No UDP records to summarize");
        return Ok(None);
    }

    let path = data_dir.join(format!("udp_multicast_summary_{}.json", run_timestamp()));
    let summary = serde_json::json!({
        "server_region": server_region,
        "ip_type": if use_private_ip { "private" } else { "public" },
        "ip_to_region_map": ip_to_region_map,
        "results": records,
    });
    fs::write(&path, serde_json::to_string_pretty(&summary)?)
        .wrap_err_with(|| format!("Failed to write '{}'", path.display()))?;

    info!("UDP summary saved to {:?}", path);
    Ok(Some(path))
}
