//! Parse stage: success-only CSV tables and run statistics.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use color_eyre::eyre::WrapErr;
use color_eyre::Result;
use log::{info, warn};
use serde::{Deserialize, Serialize};

use super::results::CollectedResults;
use crate::bench::run_timestamp;

/// Min/avg/max over one metric
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricStats {
    pub min: f64,
    pub avg: f64,
    pub max: f64,
}

impl MetricStats {
    fn of(values: &[f64]) -> Option<MetricStats> {
        if values.is_empty() {
            return None;
        }
        Some(MetricStats {
            min: values.iter().copied().fold(f64::INFINITY, f64::min),
            avg: values.iter().sum::<f64>() / values.len() as f64,
            max: values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        })
    }
}

/// Run statistics document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub timestamp: String,
    pub p2p_total: usize,
    pub p2p_successful: usize,
    pub udp_total: usize,
    pub udp_successful: usize,
    pub p2p_bandwidth_mbps: Option<MetricStats>,
    pub udp_bandwidth_mbps: Option<MetricStats>,
    pub udp_mean_jitter_ms: Option<f64>,
    pub udp_mean_lost_percent: Option<f64>,
    /// `source->target` pair label to mean bandwidth in Mbps
    pub p2p_pair_means: BTreeMap<String, f64>,
    /// `server->client` pair label to mean bandwidth in Mbps
    pub udp_pair_means: BTreeMap<String, f64>,
}

/// Artifacts written by the parse stage
pub struct SummaryArtifacts {
    pub p2p_csv: Option<PathBuf>,
    pub udp_csv: Option<PathBuf>,
    pub summary_json: PathBuf,
    pub summary: RunSummary,
}

/// Write success-only CSVs and the statistics document
pub fn summarize(results: &CollectedResults, data_dir: &Path) -> Result<SummaryArtifacts> {
    let timestamp = run_timestamp();

    let p2p_success: Vec<_> = results
        .point_to_point_tests
        .iter()
        .filter(|t| t.status == "success")
        .collect();
    let udp_success: Vec<_> = results
        .udp_multicast_tests
        .iter()
        .filter(|t| t.status == "success")
        .collect();

    let p2p_csv = if p2p_success.is_empty() {
        warn!("No successful p2p tests to tabulate");
        None
    } else {
        let path = data_dir.join(format!("p2p_results_{}.csv", timestamp));
        let mut writer = csv::Writer::from_path(&path)
            .wrap_err_with(|| format!("Failed to create '{}'", path.display()))?;
        writer.write_record([
            "source_region",
            "target_region",
            "bandwidth_mbps",
            "transfer_mb",
            "duration_sec",
            "retransmits",
            "file",
        ])?;
        for test in &p2p_success {
            writer.write_record([
                test.source_region.to_string(),
                test.target_region.to_string(),
                format!("{:.3}", test.bits_per_second.unwrap_or(0.0) / 1e6),
                format!("{:.3}", test.bytes.unwrap_or(0.0) / 1e6),
                format!("{:.2}", test.seconds.unwrap_or(0.0)),
                test.retransmits.map(|r| r.to_string()).unwrap_or_default(),
                test.file.clone(),
            ])?;
        }
        writer.flush()?;
        Some(path)
    };

    let udp_csv = if udp_success.is_empty() {
        warn!("No successful UDP tests to tabulate");
        None
    } else {
        let path = data_dir.join(format!("udp_results_{}.csv", timestamp));
        let mut writer = csv::Writer::from_path(&path)
            .wrap_err_with(|| format!("Failed to create '{}'", path.display()))?;
        writer.write_record([
            "server_region",
            "client_region",
            "bandwidth_mbps",
            "jitter_ms",
            "lost_packets",
            "lost_percent",
            "file",
        ])?;
        for test in &udp_success {
            writer.write_record([
                test.server_region.to_string(),
                test.client_region.to_string(),
                format!("{:.3}", test.bits_per_second.unwrap_or(0.0) / 1e6),
                format!("{:.4}", test.jitter_ms.unwrap_or(0.0)),
                test.lost_packets.map(|v| v.to_string()).unwrap_or_default(),
                format!("{:.3}", test.lost_percent.unwrap_or(0.0)),
                test.file.clone(),
            ])?;
        }
        writer.flush()?;
        Some(path)
    };

    let p2p_mbps: Vec<f64> = p2p_success
        .iter()
        .filter_map(|t| t.bits_per_second)
        .map(|b| b / 1e6)
        .collect();
    let udp_mbps: Vec<f64> = udp_success
        .iter()
        .filter_map(|t| t.bits_per_second)
        .map(|b| b / 1e6)
        .collect();
    let jitters: Vec<f64> = udp_success.iter().filter_map(|t| t.jitter_ms).collect();
    let losses: Vec<f64> = udp_success.iter().filter_map(|t| t.lost_percent).collect();

    let summary = RunSummary {
        timestamp: timestamp.clone(),
        p2p_total: results.point_to_point_tests.len(),
        p2p_successful: p2p_success.len(),
        udp_total: results.udp_multicast_tests.len(),
        udp_successful: udp_success.len(),
        p2p_bandwidth_mbps: MetricStats::of(&p2p_mbps),
        udp_bandwidth_mbps: MetricStats::of(&udp_mbps),
        udp_mean_jitter_ms: mean(&jitters),
        udp_mean_lost_percent: mean(&losses),
        p2p_pair_means: pair_means(p2p_success.iter().filter_map(|t| {
            t.bits_per_second
                .map(|b| (t.source_region.to_string(), t.target_region.to_string(), b / 1e6))
        })),
        udp_pair_means: pair_means(udp_success.iter().filter_map(|t| {
            t.bits_per_second
                .map(|b| (t.server_region.to_string(), t.client_region.to_string(), b / 1e6))
        })),
    };

    let summary_json = data_dir.join(format!("results_summary_{}.json", timestamp));
    fs::write(&summary_json, serde_json::to_string_pretty(&summary)?)
        .wrap_err_with(|| format!("Failed to write '{}'", summary_json.display()))?;
    info!("Run summary saved to {:?}", summary_json);

    Ok(SummaryArtifacts {
        p2p_csv,
        udp_csv,
        summary_json,
        summary,
    })
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

fn pair_means<I>(observations: I) -> BTreeMap<String, f64>
where
    I: Iterator<Item = (String, String, f64)>,
{
    let mut sums: BTreeMap<String, (f64, u32)> = BTreeMap::new();
    for (a, b, value) in observations {
        let entry = sums.entry(format!("{}->{}", a, b)).or_insert((0.0, 0));
        entry.0 += value;
        entry.1 += 1;
    }
    sums.into_iter()
        .map(|(pair, (sum, count))| (pair, sum / f64::from(count)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collect::results::{P2pTest, RegionTag, UdpTest};
    use tempfile::TempDir;

    fn p2p(source: &str, target: &str, status: &str, bps: f64) -> P2pTest {
        P2pTest {
            source_region: RegionTag::from(source),
            target_region: RegionTag::from(target),
            source_ip: None,
            target_ip: None,
            status: status.to_string(),
            bits_per_second: Some(bps),
            bytes: Some(1e8),
            seconds: Some(10.0),
            retransmits: Some(3),
            error: None,
            file: "p2p_x.json".to_string(),
        }
    }

    fn udp(server: &str, client: &str, bps: f64, jitter: f64, lost: f64) -> UdpTest {
        UdpTest {
            server_region: RegionTag::from(server),
            client_region: RegionTag::from(client),
            server_ip: None,
            client_ip: None,
            status: "success".to_string(),
            bits_per_second: Some(bps),
            jitter_ms: Some(jitter),
            lost_packets: Some(1),
            packets: Some(100),
            lost_percent: Some(lost),
            error: None,
            file: "udp_x.json".to_string(),
        }
    }

    #[test]
    fn test_summary_counts_and_stats() {
        let dir = TempDir::new().unwrap();
        let results = CollectedResults {
            timestamp: "20240101_120000".to_string(),
            point_to_point_tests: vec![
                p2p("a", "b", "success", 1e8),
                p2p("a", "b", "success", 3e8),
                p2p("b", "a", "error", 0.0),
            ],
            udp_multicast_tests: vec![udp("a", "b", 5e7, 0.2, 1.0), udp("a", "c", 1.5e8, 0.4, 3.0)],
        };

        let artifacts = summarize(&results, dir.path()).unwrap();
        let summary = &artifacts.summary;
        assert_eq!(summary.p2p_total, 3);
        assert_eq!(summary.p2p_successful, 2);
        let p2p_stats = summary.p2p_bandwidth_mbps.as_ref().unwrap();
        assert!((p2p_stats.min - 100.0).abs() < 1e-6);
        assert!((p2p_stats.avg - 200.0).abs() < 1e-6);
        assert!((p2p_stats.max - 300.0).abs() < 1e-6);
        assert!((summary.udp_mean_jitter_ms.unwrap() - 0.3).abs() < 1e-9);
        assert!((summary.udp_mean_lost_percent.unwrap() - 2.0).abs() < 1e-9);
        // repeated pair averaged
        assert!((summary.p2p_pair_means["a->b"] - 200.0).abs() < 1e-6);
        // UDP pairs are keyed server->client
        assert!((summary.udp_pair_means["a->b"] - 50.0).abs() < 1e-6);
        assert!((summary.udp_pair_means["a->c"] - 150.0).abs() < 1e-6);

        assert!(artifacts.p2p_csv.unwrap().exists());
        assert!(artifacts.summary_json.exists());
    }

    #[test]
    fn test_error_only_results_produce_no_csv() {
        let dir = TempDir::new().unwrap();
        let results = CollectedResults {
            timestamp: "20240101_120000".to_string(),
            point_to_point_tests: vec![p2p("a", "b", "error", 0.0)],
            udp_multicast_tests: vec![],
        };
        let artifacts = summarize(&results, dir.path()).unwrap();
        assert!(artifacts.p2p_csv.is_none());
        assert!(artifacts.udp_csv.is_none());
        assert_eq!(artifacts.summary.p2p_successful, 0);
    }
}
