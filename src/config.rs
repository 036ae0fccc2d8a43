//! Benchmark run configuration.
//!
//! The configuration is a single JSON file. Missing keys fall back to the
//! same defaults the tool has always used, so a minimal config only needs
//! `aws_regions`.

use std::collections::HashMap;
use std::fs::File;
use std::path::Path;

use color_eyre::eyre::WrapErr;
use color_eyre::Result;
use log::info;
use serde::{Deserialize, Serialize};

/// Benchmark configuration loaded from `config.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Regions to provision instances in; order drives test iteration order
    pub aws_regions: Vec<String>,

    #[serde(default = "default_instance_type")]
    pub instance_type: String,
    #[serde(default = "default_ssh_key_name")]
    pub ssh_key_name: String,
    #[serde(default)]
    pub create_ssh_key: bool,
    /// Instances per region unless overridden in `region_instance_counts`
    #[serde(default = "default_instance_count")]
    pub instance_count: u32,
    #[serde(default)]
    pub region_instance_counts: HashMap<String, u32>,
    #[serde(default)]
    pub use_private_ip: bool,
    #[serde(default)]
    pub test_intra_region: bool,

    #[serde(default = "default_true")]
    pub run_latency_tests: bool,
    #[serde(default = "default_ping_count")]
    pub ping_count: u32,

    #[serde(default)]
    pub run_p2p_tests: bool,
    #[serde(default = "default_test_duration")]
    pub p2p_duration: u64,
    #[serde(default = "default_parallel")]
    pub p2p_parallel: u32,

    #[serde(default)]
    pub run_udp_tests: bool,
    #[serde(default)]
    pub udp_server_region: Option<String>,
    #[serde(default = "default_udp_bandwidth")]
    pub udp_bandwidth: String,
    #[serde(default = "default_test_duration")]
    pub udp_duration: u64,

    #[serde(default = "default_true")]
    pub run_terraform_apply: bool,
    /// Destroy provisioned resources at the end of the run
    #[serde(default = "default_true", alias = "run_terraform_destroy")]
    pub cleanup_resources: bool,

    #[serde(default = "default_true")]
    pub generate_visualizations: bool,
    #[serde(default = "default_true")]
    pub generate_report: bool,
}

fn default_instance_type() -> String {
    "t2.micro".to_string()
}

fn default_ssh_key_name() -> String {
    "aws-network-benchmark".to_string()
}

fn default_instance_count() -> u32 {
    1
}

fn default_ping_count() -> u32 {
    20
}

fn default_test_duration() -> u64 {
    10
}

fn default_parallel() -> u32 {
    1
}

fn default_udp_bandwidth() -> String {
    "1G".to_string()
}

fn default_true() -> bool {
    true
}

impl Config {
    /// Validate cross-field consistency
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.aws_regions.is_empty() {
            return Err(ValidationError::MissingRegions);
        }

        if self.run_udp_tests {
            match &self.udp_server_region {
                None => return Err(ValidationError::MissingUdpServerRegion),
                Some(region) if !self.aws_regions.contains(region) => {
                    return Err(ValidationError::UdpServerRegionNotListed(region.clone()));
                }
                Some(_) => {}
            }
        }

        Ok(())
    }

    /// Instance count for a region, falling back to the global default
    pub fn instances_for(&self, region: &str) -> u32 {
        *self
            .region_instance_counts
            .get(region)
            .unwrap_or(&self.instance_count)
    }
}

/// Configuration validation errors
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("'aws_regions' must be specified and non-empty")]
    MissingRegions,
    #[error("'udp_server_region' must be specified when 'run_udp_tests' is true")]
    MissingUdpServerRegion,
    #[error("'udp_server_region' ({0}) must be one of the regions listed in 'aws_regions'")]
    UdpServerRegionNotListed(String),
}

/// Load and validate configuration from a JSON file
pub fn load_config(config_path: &Path) -> Result<Config> {
    info!("Loading configuration from: {:?}", config_path);

    let file = File::open(config_path)
        .wrap_err_with(|| format!("Configuration file '{}' not found", config_path.display()))?;
    let config: Config = serde_json::from_reader(file).wrap_err_with(|| {
        format!(
            "Configuration file '{}' contains invalid JSON",
            config_path.display()
        )
    })?;

    config.validate()?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_config(json: &str) -> NamedTempFile {
        let mut temp_file = NamedTempFile::new().unwrap();
        write!(temp_file, "{}", json).unwrap();
        temp_file
    }

    #[test]
    fn test_minimal_config_defaults() {
        let temp_file = write_config(r#"{"aws_regions": ["us-east-1", "eu-west-2"]}"#);
        let config = load_config(temp_file.path()).unwrap();

        assert_eq!(config.instance_type, "t2.micro");
        assert_eq!(config.ssh_key_name, "aws-network-benchmark");
        assert!(!config.create_ssh_key);
        assert_eq!(config.instance_count, 1);
        assert!(!config.use_private_ip);
        assert!(!config.test_intra_region);
        assert!(config.run_latency_tests);
        assert_eq!(config.ping_count, 20);
        assert!(!config.run_p2p_tests);
        assert_eq!(config.p2p_duration, 10);
        assert!(!config.run_udp_tests);
        assert_eq!(config.udp_bandwidth, "1G");
        assert!(config.cleanup_resources);
        assert!(config.generate_report);
    }

    #[test]
    fn test_empty_regions_rejected() {
        let temp_file = write_config(r#"{"aws_regions": []}"#);
        assert!(load_config(temp_file.path()).is_err());
    }

    #[test]
    fn test_udp_requires_server_region() {
        let temp_file = write_config(r#"{"aws_regions": ["us-east-1"], "run_udp_tests": true}"#);
        assert!(load_config(temp_file.path()).is_err());
    }

    #[test]
    fn test_udp_server_region_must_be_listed() {
        let temp_file = write_config(
            r#"{
                "aws_regions": ["us-east-1"],
                "run_udp_tests": true,
                "udp_server_region": "eu-west-2"
            }"#,
        );
        let err = load_config(temp_file.path()).unwrap_err();
        assert!(err.to_string().contains("eu-west-2"));
    }

    #[test]
    fn test_run_terraform_destroy_alias() {
        let temp_file =
            write_config(r#"{"aws_regions": ["us-east-1"], "run_terraform_destroy": false}"#);
        let config = load_config(temp_file.path()).unwrap();
        assert!(!config.cleanup_resources);
    }

    #[test]
    fn test_region_instance_counts() {
        let temp_file = write_config(
            r#"{
                "aws_regions": ["us-east-1", "eu-west-2"],
                "instance_count": 1,
                "region_instance_counts": {"eu-west-2": 2}
            }"#,
        );
        let config = load_config(temp_file.path()).unwrap();
        assert_eq!(config.instances_for("us-east-1"), 1);
        assert_eq!(config.instances_for("eu-west-2"), 2);
    }

    #[test]
    fn test_invalid_json_rejected() {
        let temp_file = write_config("{not json");
        assert!(load_config(temp_file.path()).is_err());
    }
}
