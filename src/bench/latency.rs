//! Ping latency tests between instance pairs.
//!
//! For every enumerated pair the client instance pings the target, the raw
//! ping output is copied back and parsed, and the stats are written as a
//! timestamped JSON file named by the two IPs. A batch summary maps each
//! result file back to its region pair, and a CSV summarizes the batch.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use color_eyre::eyre::WrapErr;
use color_eyre::Result;
use log::{info, warn};
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::pairing::{enumerate_pairs, PairingOptions};
use super::run_timestamp;
use crate::instance_info::InstanceDirectory;
use crate::remote::Transport;

static PACKET_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d+) packets transmitted, (\d+) received, ([\d.]+)% packet loss")
        .expect("Invalid packet stats regex")
});
static TIMING_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"min/avg/max/mdev = ([\d.]+)/([\d.]+)/([\d.]+)/([\d.]+) ms")
        .expect("Invalid timing stats regex")
});

/// Parsed `ping` statistics; fields stay None when the output lacks them
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PingStats {
    pub min_ms: Option<f64>,
    pub avg_ms: Option<f64>,
    pub max_ms: Option<f64>,
    pub mdev_ms: Option<f64>,
    pub packet_loss_percent: Option<f64>,
    pub packets_transmitted: Option<u64>,
    pub packets_received: Option<u64>,
}

/// Payload of a per-test latency result file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LatencyResult {
    #[serde(flatten)]
    pub stats: PingStats,
    pub source_ip: String,
    pub target_ip: String,
    pub source_region: String,
    pub target_region: String,
    pub timestamp: String,
    pub ping_count: u32,
}

/// One completed latency test with its result file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LatencyRecord {
    pub source_region: String,
    pub target_region: String,
    pub result_file: String,
    pub ping_stats: PingStats,
}

/// Outcome of a latency batch
pub struct LatencyBatch {
    pub records: Vec<LatencyRecord>,
    pub summary_csv: Option<PathBuf>,
    pub errors_occurred: bool,
}

/// Parse raw `ping` output into stats
pub fn parse_ping_output(content: &str) -> PingStats {
    let mut stats = PingStats::default();

    if let Some(caps) = PACKET_RE.captures(content) {
        stats.packets_transmitted = caps[1].parse().ok();
        stats.packets_received = caps[2].parse().ok();
        stats.packet_loss_percent = caps[3].parse().ok();
    }
    if let Some(caps) = TIMING_RE.captures(content) {
        stats.min_ms = caps[1].parse().ok();
        stats.avg_ms = caps[2].parse().ok();
        stats.max_ms = caps[3].parse().ok();
        stats.mdev_ms = caps[4].parse().ok();
    }

    stats
}

/// Run the latency test batch over the enumerated pairs
pub fn run_latency_tests(
    directory: &InstanceDirectory,
    transport: &dyn Transport,
    opts: &PairingOptions,
    ping_count: u32,
    data_dir: &Path,
) -> Result<LatencyBatch> {
    fs::create_dir_all(data_dir)
        .wrap_err_with(|| format!("Failed to create data directory '{}'", data_dir.display()))?;

    let pairs = enumerate_pairs(directory, opts)?;
    let mut records = Vec::new();
    let mut errors_occurred = false;

    for pair in &pairs {
        info!(
            "Testing latency: {} -> {} (using {} IPs)",
            pair.source.label,
            pair.target.label,
            if opts.use_private_ip { "private" } else { "public" }
        );

        let timestamp = run_timestamp();
        let ping_cmd = format!(
            "ping -c {} -i 0.2 {} > /tmp/ping_result.txt",
            ping_count, pair.target.ip
        );

        let run = transport.run(&pair.source.ip, &ping_cmd);
        if !matches!(&run, Ok(output) if output.success) {
            warn!(
                "Latency test failed {} -> {}",
                pair.source.ip, pair.target.ip
            );
            errors_occurred = true;
            continue;
        }

        let raw_path = data_dir.join("ping_result.txt");
        if let Err(e) = transport.fetch(&pair.source.ip, "/tmp/ping_result.txt", &raw_path) {
            warn!(
                "Could not fetch ping results from {}: {}",
                pair.source.ip, e
            );
            errors_occurred = true;
            continue;
        }

        let content = fs::read_to_string(&raw_path).unwrap_or_default();
        let stats = parse_ping_output(&content);

        let result_file = data_dir.join(format!(
            "latency_{}_to_{}_{}.json",
            pair.target.ip, pair.source.ip, timestamp
        ));
        let payload = LatencyResult {
            stats: stats.clone(),
            source_ip: pair.source.ip.clone(),
            target_ip: pair.target.ip.clone(),
            source_region: pair.source.label.clone(),
            target_region: pair.target.label.clone(),
            timestamp,
            ping_count,
        };
        fs::write(&result_file, serde_json::to_string_pretty(&payload)?)
            .wrap_err_with(|| format!("Failed to write '{}'", result_file.display()))?;
        info!("Latency test completed, results saved to {:?}", result_file);

        records.push(LatencyRecord {
            source_region: pair.source.label.clone(),
            target_region: pair.target.label.clone(),
            result_file: result_file.to_string_lossy().into_owned(),
            ping_stats: stats,
        });
    }

    let summary_csv = write_csv_summary(&records, data_dir)?;
    write_json_summary(&records, data_dir)?;

    Ok(LatencyBatch {
        records,
        summary_csv,
        errors_occurred,
    })
}

fn write_csv_summary(records: &[LatencyRecord], data_dir: &Path) -> Result<Option<PathBuf>> {
    if records.is_empty() {
        warn!("No latency records to summarize");
        return Ok(None);
    }

    let csv_path = data_dir.join(format!("latency_results_{}.csv", run_timestamp()));
    let mut writer = csv::Writer::from_path(&csv_path)
        .wrap_err_with(|| format!("Failed to create '{}'", csv_path.display()))?;

    writer.write_record([
        "source_region",
        "target_region",
        "min_latency_ms",
        "avg_latency_ms",
        "max_latency_ms",
        "mdev_ms",
        "packet_loss_percent",
        "file",
    ])?;
    for record in records {
        let s = &record.ping_stats;
        writer.write_record([
            record.source_region.clone(),
            record.target_region.clone(),
            optional_field(s.min_ms),
            optional_field(s.avg_ms),
            optional_field(s.max_ms),
            optional_field(s.mdev_ms),
            optional_field(s.packet_loss_percent),
            record.result_file.clone(),
        ])?;
    }
    writer.flush()?;

    info!("Latency summary saved to {:?}", csv_path);
    Ok(Some(csv_path))
}

/// Batch summary mapping result files to region pairs, used by the
/// collector when payload metadata is missing
fn write_json_summary(records: &[LatencyRecord], data_dir: &Path) -> Result<()> {
    if records.is_empty() {
        return Ok(());
    }
    let path = data_dir.join(format!("latency_summary_{}.json", run_timestamp()));
    let entries: Vec<serde_json::Value> = records
        .iter()
        .map(|r| {
            serde_json::json!({
                "result_file": r.result_file,
                "source_region": r.source_region,
                "target_region": r.target_region,
            })
        })
        .collect();
    fs::write(&path, serde_json::to_string_pretty(&entries)?)
        .wrap_err_with(|| format!("Failed to write '{}'", path.display()))?;
    Ok(())
}

fn optional_field(value: Option<f64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}
