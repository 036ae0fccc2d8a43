//! Collection and region reconciliation of raw test results.
//!
//! Raw iperf3 payloads carry no region identity, so each discovered file is
//! attributed to a region pair by, in priority order: region fields embedded
//! in the payload itself, the batch summary file that names the result file,
//! and finally the two IPs in the filename looked up in the IP-to-region map
//! assembled from all summary files of the run. A side that stays unresolved
//! is tagged unknown and kept; downstream stages aggregate it as a real
//! label.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use color_eyre::eyre::WrapErr;
use color_eyre::Result;
use log::{info, warn};
use regex::Regex;
use serde::de::Deserializer;
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};

use crate::bench::run_timestamp;

static FILENAME_IPS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"([\d.]+)_to_([\d.]+)_").expect("Invalid filename IP regex")
});

/// Region identity of one side of a test. Unresolved sides stay tagged
/// rather than collapsing into a magic string, but serialize as the literal
/// `"unknown"` for artifact compatibility.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RegionTag {
    Known(String),
    Unknown,
}

impl RegionTag {
    pub fn as_str(&self) -> &str {
        match self {
            RegionTag::Known(name) => name,
            RegionTag::Unknown => "unknown",
        }
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, RegionTag::Unknown)
    }
}

impl fmt::Display for RegionTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for RegionTag {
    fn from(value: &str) -> Self {
        if value == "unknown" || value.is_empty() {
            RegionTag::Unknown
        } else {
            RegionTag::Known(value.to_string())
        }
    }
}

impl Serialize for RegionTag {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for RegionTag {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(RegionTag::from(s.as_str()))
    }
}

/// A collected TCP point-to-point test
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct P2pTest {
    pub source_region: RegionTag,
    pub target_region: RegionTag,
    pub source_ip: Option<String>,
    pub target_ip: Option<String>,
    pub status: String,
    pub bits_per_second: Option<f64>,
    pub bytes: Option<f64>,
    pub seconds: Option<f64>,
    pub retransmits: Option<u64>,
    pub error: Option<String>,
    pub file: String,
}

/// A collected UDP test
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UdpTest {
    pub server_region: RegionTag,
    pub client_region: RegionTag,
    pub server_ip: Option<String>,
    pub client_ip: Option<String>,
    pub status: String,
    pub bits_per_second: Option<f64>,
    pub jitter_ms: Option<f64>,
    pub lost_packets: Option<u64>,
    pub packets: Option<u64>,
    pub lost_percent: Option<f64>,
    pub error: Option<String>,
    pub file: String,
}

/// The collected-results document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectedResults {
    pub timestamp: String,
    pub point_to_point_tests: Vec<P2pTest>,
    pub udp_multicast_tests: Vec<UdpTest>,
}

/// Region-pair attribution for one result file, assembled from the run's
/// summary files
#[derive(Debug, Default)]
struct Attribution {
    /// result filename -> (source label, target label)
    by_file: HashMap<String, (String, String)>,
    /// ip -> region label
    by_ip: HashMap<String, String>,
}

/// Collect all p2p and UDP result files in the data directory
pub fn collect_results(data_dir: &Path) -> Result<CollectedResults> {
    let attribution = load_attribution(data_dir);

    let mut p2p = Vec::new();
    for path in discover(data_dir, "p2p_*.json")? {
        p2p.push(collect_p2p_file(&path, &attribution));
    }

    let mut udp = Vec::new();
    for path in discover(data_dir, "udp_multicast_*.json")? {
        udp.push(collect_udp_file(&path, &attribution));
    }

    info!(
        "Collected {} p2p and {} UDP test results",
        p2p.len(),
        udp.len()
    );

    Ok(CollectedResults {
        timestamp: run_timestamp(),
        point_to_point_tests: p2p,
        udp_multicast_tests: udp,
    })
}

/// Write the collected document to `collected_results_{ts}.json`
pub fn save_collected(results: &CollectedResults, data_dir: &Path) -> Result<PathBuf> {
    let path = data_dir.join(format!("collected_results_{}.json", results.timestamp));
    fs::write(&path, serde_json::to_string_pretty(results)?)
        .wrap_err_with(|| format!("Failed to write '{}'", path.display()))?;
    info!("Collected results saved to {:?}", path);
    Ok(path)
}

/// Glob result files for a pattern, excluding summary files
fn discover(data_dir: &Path, pattern: &str) -> Result<Vec<PathBuf>> {
    let full = data_dir.join(pattern);
    let pattern_str = full.to_string_lossy().into_owned();
    let mut paths: Vec<PathBuf> = glob::glob(&pattern_str)
        .wrap_err_with(|| format!("Invalid glob pattern '{}'", pattern_str))?
        .filter_map(std::result::Result::ok)
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| !n.contains("summary"))
        })
        .collect();
    paths.sort();
    Ok(paths)
}

/// Merge region attributions from every summary file in the data directory
fn load_attribution(data_dir: &Path) -> Attribution {
    let mut attribution = Attribution::default();

    for path in discover_summaries(data_dir, "p2p_test_summary_*.json") {
        let Some(entries) = read_json(&path).and_then(|v| v.as_array().cloned()) else {
            continue;
        };
        for entry in entries {
            let (Some(src), Some(dst)) = (
                entry.get("source_region").and_then(|v| v.as_str()),
                entry.get("target_region").and_then(|v| v.as_str()),
            ) else {
                continue;
            };
            if let Some(file) = entry.get("result_file").and_then(|v| v.as_str()) {
                if let Some(name) = Path::new(file).file_name().and_then(|n| n.to_str()) {
                    attribution
                        .by_file
                        .insert(name.to_string(), (src.to_string(), dst.to_string()));
                }
            }
            if let Some(ip) = entry.get("source_ip").and_then(|v| v.as_str()) {
                attribution.by_ip.insert(ip.to_string(), src.to_string());
            }
            if let Some(ip) = entry.get("target_ip").and_then(|v| v.as_str()) {
                attribution.by_ip.insert(ip.to_string(), dst.to_string());
            }
        }
    }

    for path in discover_summaries(data_dir, "udp_multicast_summary_*.json") {
        let Some(summary) = read_json(&path) else {
            continue;
        };
        if let Some(map) = summary.get("ip_to_region_map").and_then(|v| v.as_object()) {
            for (ip, region) in map {
                if let Some(region) = region.as_str() {
                    attribution.by_ip.insert(ip.clone(), region.to_string());
                }
            }
        }
        let Some(results) = summary.get("results").and_then(|v| v.as_array()) else {
            continue;
        };
        for entry in results {
            let (Some(server), Some(client), Some(file)) = (
                entry.get("server_region").and_then(|v| v.as_str()),
                entry.get("client_region").and_then(|v| v.as_str()),
                entry.get("result_file").and_then(|v| v.as_str()),
            ) else {
                continue;
            };
            if let Some(name) = Path::new(file).file_name().and_then(|n| n.to_str()) {
                attribution
                    .by_file
                    .insert(name.to_string(), (server.to_string(), client.to_string()));
            }
        }
    }

    attribution
}

fn discover_summaries(data_dir: &Path, pattern: &str) -> Vec<PathBuf> {
    let pattern_str = data_dir.join(pattern).to_string_lossy().into_owned();
    glob::glob(&pattern_str)
        .map(|it| it.filter_map(std::result::Result::ok).collect())
        .unwrap_or_default()
}

fn read_json(path: &Path) -> Option<serde_json::Value> {
    let content = fs::read_to_string(path).ok()?;
    serde_json::from_str(&content).ok()
}

/// Extract `(first_ip, second_ip)` from a result filename
pub fn ips_from_filename(name: &str) -> Option<(String, String)> {
    let caps = FILENAME_IPS_RE.captures(name)?;
    Some((caps[1].to_string(), caps[2].to_string()))
}

/// Resolve the region pair for a result file: payload fields, then summary
/// entry, then filename IPs against the IP map
fn resolve_regions(
    payload: Option<&serde_json::Value>,
    file_name: &str,
    first_key: &str,
    second_key: &str,
    attribution: &Attribution,
) -> (RegionTag, RegionTag) {
    if let Some(payload) = payload {
        let first = payload.get(first_key).and_then(|v| v.as_str());
        let second = payload.get(second_key).and_then(|v| v.as_str());
        if let (Some(first), Some(second)) = (first, second) {
            return (RegionTag::from(first), RegionTag::from(second));
        }
    }

    if let Some((first, second)) = attribution.by_file.get(file_name) {
        return (
            RegionTag::Known(first.clone()),
            RegionTag::Known(second.clone()),
        );
    }

    if let Some((first_ip, second_ip)) = ips_from_filename(file_name) {
        let lookup = |ip: &str| {
            attribution
                .by_ip
                .get(ip)
                .map(|r| RegionTag::Known(r.clone()))
                .unwrap_or(RegionTag::Unknown)
        };
        return (lookup(&first_ip), lookup(&second_ip));
    }

    warn!("Could not attribute regions for '{}'", file_name);
    (RegionTag::Unknown, RegionTag::Unknown)
}

fn collect_p2p_file(path: &Path, attribution: &Attribution) -> P2pTest {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default()
        .to_string();
    let payload = read_json(path);
    // p2p filenames are source_to_target
    let (source_region, target_region) = resolve_regions(
        payload.as_ref(),
        &file_name,
        "source_region",
        "target_region",
        attribution,
    );
    let (source_ip, target_ip) = match ips_from_filename(&file_name) {
        Some((a, b)) => (Some(a), Some(b)),
        None => (None, None),
    };

    let mut test = P2pTest {
        source_region,
        target_region,
        source_ip,
        target_ip,
        status: "unknown".to_string(),
        bits_per_second: None,
        bytes: None,
        seconds: None,
        retransmits: None,
        error: None,
        file: path.to_string_lossy().into_owned(),
    };

    let Some(payload) = payload else {
        test.status = "error".to_string();
        test.error = Some("unreadable or invalid JSON".to_string());
        return test;
    };

    if let Some(err) = payload.get("error").and_then(|v| v.as_str()) {
        test.status = "error".to_string();
        test.error = Some(err.to_string());
        return test;
    }

    let sent = payload.get("end").and_then(|e| e.get("sum_sent"));
    let received = payload.get("end").and_then(|e| e.get("sum_received"));
    if let Some(received) = received {
        test.status = "success".to_string();
        test.bits_per_second = received.get("bits_per_second").and_then(|v| v.as_f64());
        test.bytes = received.get("bytes").and_then(|v| v.as_f64());
        test.seconds = received.get("seconds").and_then(|v| v.as_f64());
        test.retransmits = sent
            .and_then(|s| s.get("retransmits"))
            .and_then(|v| v.as_u64());
    }

    test
}

fn collect_udp_file(path: &Path, attribution: &Attribution) -> UdpTest {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default()
        .to_string();
    let payload = read_json(path);
    // udp filenames are server_to_client
    let (server_region, client_region) = resolve_regions(
        payload.as_ref(),
        &file_name,
        "server_region",
        "client_region",
        attribution,
    );
    let (server_ip, client_ip) = match ips_from_filename(&file_name) {
        Some((a, b)) => (Some(a), Some(b)),
        None => (None, None),
    };

    let mut test = UdpTest {
        server_region,
        client_region,
        server_ip,
        client_ip,
        status: "unknown".to_string(),
        bits_per_second: None,
        jitter_ms: None,
        lost_packets: None,
        packets: None,
        lost_percent: None,
        error: None,
        file: path.to_string_lossy().into_owned(),
    };

    let Some(payload) = payload else {
        test.status = "error".to_string();
        test.error = Some("unreadable or invalid JSON".to_string());
        return test;
    };

    if let Some(err) = payload.get("error").and_then(|v| v.as_str()) {
        test.status = "error".to_string();
        test.error = Some(err.to_string());
        return test;
    }

    if let Some(sum) = payload.get("end").and_then(|e| e.get("sum")) {
        test.status = "success".to_string();
        test.bits_per_second = sum.get("bits_per_second").and_then(|v| v.as_f64());
        test.jitter_ms = sum.get("jitter_ms").and_then(|v| v.as_f64());
        test.lost_packets = sum.get("lost_packets").and_then(|v| v.as_u64());
        test.packets = sum.get("packets").and_then(|v| v.as_u64());
        test.lost_percent = sum.get("lost_percent").and_then(|v| v.as_f64());
    }

    test
}
