//! Formatting stage: matrices, histograms, formatted JSON and Markdown.

use std::fs;
use std::path::{Path, PathBuf};

use color_eyre::eyre::WrapErr;
use color_eyre::Result;
use log::{info, warn};
use serde::{Deserialize, Serialize};

use super::matrix::{histogram, Histogram, Matrix};
use super::results::CollectedResults;
use crate::bench::run_timestamp;

const HISTOGRAM_BINS: usize = 10;

/// All matrix/histogram data of a run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormattedData {
    pub timestamp: String,
    pub latency_matrix: Option<Matrix>,
    pub p2p_bandwidth_matrix: Option<Matrix>,
    pub udp_bandwidth_matrix: Option<Matrix>,
    pub udp_loss_matrix: Option<Matrix>,
    pub latency_histogram: Option<Histogram>,
    pub p2p_bandwidth_histogram: Option<Histogram>,
    pub udp_bandwidth_histogram: Option<Histogram>,
}

/// Build all matrices from collected results plus the latency result files
/// in the data directory
pub fn build_formatted_data(results: &CollectedResults, data_dir: &Path) -> FormattedData {
    let latency_matrix = non_empty(Matrix::from_triples(&latency_triples(data_dir)));

    let p2p_triples: Vec<(String, String, f64)> = results
        .point_to_point_tests
        .iter()
        .filter(|t| t.status == "success")
        .filter_map(|t| {
            t.bits_per_second.map(|b| {
                (
                    t.source_region.to_string(),
                    t.target_region.to_string(),
                    b / 1e6,
                )
            })
        })
        .collect();
    let p2p_bandwidth_matrix = non_empty(Matrix::from_triples(&p2p_triples));

    let udp_success: Vec<_> = results
        .udp_multicast_tests
        .iter()
        .filter(|t| t.status == "success")
        .collect();
    // UDP matrices are server rows by client columns
    let udp_bw_triples: Vec<(String, String, f64)> = udp_success
        .iter()
        .filter_map(|t| {
            t.bits_per_second.map(|b| {
                (
                    t.server_region.to_string(),
                    t.client_region.to_string(),
                    b / 1e6,
                )
            })
        })
        .collect();
    let udp_bandwidth_matrix = non_empty(Matrix::from_triples(&udp_bw_triples));

    let udp_loss_triples: Vec<(String, String, f64)> = udp_success
        .iter()
        .filter_map(|t| {
            t.lost_percent.map(|l| {
                (
                    t.server_region.to_string(),
                    t.client_region.to_string(),
                    l,
                )
            })
        })
        .collect();
    let udp_loss_matrix = non_empty(Matrix::from_triples(&udp_loss_triples));

    let hist = |m: &Option<Matrix>| {
        m.as_ref()
            .and_then(|m| histogram(&m.finite_values(), HISTOGRAM_BINS))
    };

    FormattedData {
        timestamp: run_timestamp(),
        latency_histogram: hist(&latency_matrix),
        p2p_bandwidth_histogram: hist(&p2p_bandwidth_matrix),
        udp_bandwidth_histogram: hist(&udp_bandwidth_matrix),
        latency_matrix,
        p2p_bandwidth_matrix,
        udp_bandwidth_matrix,
        udp_loss_matrix,
    }
}

/// Write matrix CSVs, the formatted JSON document and the Markdown summary
pub fn write_formatted_artifacts(data: &FormattedData, data_dir: &Path) -> Result<Vec<PathBuf>> {
    let mut written = Vec::new();

    let matrices: [(&str, &Option<Matrix>); 4] = [
        ("latency_matrix", &data.latency_matrix),
        ("p2p_bandwidth_matrix", &data.p2p_bandwidth_matrix),
        ("udp_bandwidth_matrix", &data.udp_bandwidth_matrix),
        ("udp_loss_matrix", &data.udp_loss_matrix),
    ];
    for (name, matrix) in matrices {
        let Some(matrix) = matrix else {
            continue;
        };
        let path = data_dir.join(format!("{}_{}.csv", name, data.timestamp));
        matrix.write_csv(&path)?;
        info!("Matrix saved to {:?}", path);
        written.push(path);
    }

    let json_path = data_dir.join(format!("formatted_data_{}.json", data.timestamp));
    fs::write(&json_path, serde_json::to_string_pretty(data)?)
        .wrap_err_with(|| format!("Failed to write '{}'", json_path.display()))?;
    written.push(json_path);

    let md_path = data_dir.join("formatted_results.md");
    fs::write(&md_path, render_markdown(data))
        .wrap_err_with(|| format!("Failed to write '{}'", md_path.display()))?;
    written.push(md_path);

    Ok(written)
}

/// Read region-attributed latency results back from the data directory
fn latency_triples(data_dir: &Path) -> Vec<(String, String, f64)> {
    let pattern = data_dir
        .join("latency_*.json")
        .to_string_lossy()
        .into_owned();
    let Ok(entries) = glob::glob(&pattern) else {
        return Vec::new();
    };

    let mut triples = Vec::new();
    for path in entries.filter_map(std::result::Result::ok) {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default();
        if name.contains("summary") {
            continue;
        }
        let Ok(content) = fs::read_to_string(&path) else {
            continue;
        };
        let Ok(payload) = serde_json::from_str::<serde_json::Value>(&content) else {
            warn!("Skipping unparseable latency file {:?}", path);
            continue;
        };
        let (Some(src), Some(dst), Some(avg)) = (
            payload.get("source_region").and_then(|v| v.as_str()),
            payload.get("target_region").and_then(|v| v.as_str()),
            payload.get("avg_ms").and_then(|v| v.as_f64()),
        ) else {
            continue;
        };
        triples.push((src.to_string(), dst.to_string(), avg));
    }
    triples
}

fn non_empty(matrix: Matrix) -> Option<Matrix> {
    if matrix.is_empty() {
        None
    } else {
        Some(matrix)
    }
}

/// Render all matrices as Markdown tables
pub fn render_markdown(data: &FormattedData) -> String {
    let mut md = String::new();
    md.push_str("# Network Benchmark Results\n\n");
    md.push_str(&format!("Generated: {}\n\n", data.timestamp));

    let sections: [(&str, &str, &Option<Matrix>); 4] = [
        ("Latency", "avg ms, source row to target column", &data.latency_matrix),
        ("TCP Bandwidth", "Mbps, source row to target column", &data.p2p_bandwidth_matrix),
        ("UDP Bandwidth", "Mbps, server row to client column", &data.udp_bandwidth_matrix),
        ("UDP Packet Loss", "percent, server row to client column", &data.udp_loss_matrix),
    ];
    for (title, caption, matrix) in sections {
        md.push_str(&format!("## {}\n\n", title));
        let Some(matrix) = matrix else {
            md.push_str("No data.\n\n");
            continue;
        };
        md.push_str(&format!("{}\n\n", caption));
        md.push_str(&markdown_table(matrix));
        md.push('\n');
    }

    md
}

fn markdown_table(matrix: &Matrix) -> String {
    let mut table = String::new();
    table.push_str("| |");
    for label in &matrix.labels {
        table.push_str(&format!(" {} |", label));
    }
    table.push('\n');
    table.push_str("|---|");
    for _ in &matrix.labels {
        table.push_str("---|");
    }
    table.push('\n');
    for (label, row) in matrix.labels.iter().zip(&matrix.values) {
        table.push_str(&format!("| {} |", label));
        for value in row {
            if value.is_finite() {
                table.push_str(&format!(" {:.2} |", value));
            } else {
                table.push_str(" |");
            }
        }
        table.push('\n');
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collect::results::{P2pTest, RegionTag, UdpTest};
    use tempfile::TempDir;

    fn p2p_success(source: &str, target: &str, bps: f64) -> P2pTest {
        P2pTest {
            source_region: RegionTag::from(source),
            target_region: RegionTag::from(target),
            source_ip: None,
            target_ip: None,
            status: "success".to_string(),
            bits_per_second: Some(bps),
            bytes: None,
            seconds: None,
            retransmits: None,
            error: None,
            file: String::new(),
        }
    }

    fn udp_success(server: &str, client: &str, bps: f64, lost: f64) -> UdpTest {
        UdpTest {
            server_region: RegionTag::from(server),
            client_region: RegionTag::from(client),
            server_ip: None,
            client_ip: None,
            status: "success".to_string(),
            bits_per_second: Some(bps),
            jitter_ms: Some(0.1),
            lost_packets: None,
            packets: None,
            lost_percent: Some(lost),
            error: None,
            file: String::new(),
        }
    }

    fn empty_results() -> CollectedResults {
        CollectedResults {
            timestamp: "20240101_120000".to_string(),
            point_to_point_tests: vec![],
            udp_multicast_tests: vec![],
        }
    }

    #[test]
    fn test_latency_matrix_from_result_files() {
        let dir = TempDir::new().unwrap();
        let payload = serde_json::json!({
            "source_region": "us-east-1",
            "target_region": "eu-west-2",
            "avg_ms": 75.2,
            "min_ms": 74.0
        });
        fs::write(
            dir.path().join("latency_2.2.2.2_to_1.1.1.1_20240101_120000.json"),
            payload.to_string(),
        )
        .unwrap();

        let data = build_formatted_data(&empty_results(), dir.path());
        let matrix = data.latency_matrix.unwrap();
        assert!((matrix.get("us-east-1", "eu-west-2") - 75.2).abs() < 1e-6);
        assert!(matrix.get("eu-west-2", "us-east-1").is_nan());
    }

    #[test]
    fn test_unknown_region_appears_in_matrix() {
        let dir = TempDir::new().unwrap();
        let mut results = empty_results();
        results
            .point_to_point_tests
            .push(p2p_success("us-east-1", "unknown", 1e8));

        let data = build_formatted_data(&results, dir.path());
        let matrix = data.p2p_bandwidth_matrix.unwrap();
        assert!(matrix.labels.contains(&"unknown".to_string()));
        assert!((matrix.get("us-east-1", "unknown") - 100.0).abs() < 1e-6);
    }

    #[test]
    fn test_udp_matrices_have_server_rows_and_client_columns() {
        let dir = TempDir::new().unwrap();
        let mut results = empty_results();
        results
            .udp_multicast_tests
            .push(udp_success("ap-northeast-1", "eu-west-2", 4e7, 2.5));

        let data = build_formatted_data(&results, dir.path());

        let bw = data.udp_bandwidth_matrix.unwrap();
        assert!((bw.get("ap-northeast-1", "eu-west-2") - 40.0).abs() < 1e-6);
        assert!(bw.get("eu-west-2", "ap-northeast-1").is_nan());

        let loss = data.udp_loss_matrix.unwrap();
        assert!((loss.get("ap-northeast-1", "eu-west-2") - 2.5).abs() < 1e-6);
        assert!(loss.get("eu-west-2", "ap-northeast-1").is_nan());
    }

    #[test]
    fn test_artifacts_written() {
        let dir = TempDir::new().unwrap();
        let mut results = empty_results();
        results
            .point_to_point_tests
            .push(p2p_success("a", "b", 2e8));

        let data = build_formatted_data(&results, dir.path());
        let written = write_formatted_artifacts(&data, dir.path()).unwrap();
        assert!(written.iter().any(|p| p
            .file_name()
            .unwrap()
            .to_str()
            .unwrap()
            .starts_with("p2p_bandwidth_matrix_")));
        assert!(dir.path().join("formatted_results.md").exists());

        let md = fs::read_to_string(dir.path().join("formatted_results.md")).unwrap();
        assert!(md.contains("## TCP Bandwidth"));
        assert!(md.contains("200.00"));
    }
}
