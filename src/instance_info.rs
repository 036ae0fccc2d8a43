//! Instance directory built from Terraform output.
//!
//! After `terraform apply`, `terraform output -json` exposes
//! `instance_public_ips.value.<name>` and `instance_private_ips.value.<name>`
//! arrays keyed by the human region names from the generated `outputs.tf`.
//! This module turns that into the per-run instance directory keyed by AWS
//! region codes, persisted as `data/instance_info.json` and consumed
//! read-only by every test runner. Insertion order is preserved because the
//! pair-enumeration contract iterates regions in directory order.

use std::fs;
use std::path::Path;

use color_eyre::eyre::{eyre, WrapErr};
use color_eyre::Result;
use indexmap::IndexMap;
use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::regions::region_code;

/// IP addresses for the instances of one region
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegionInstances {
    pub public_ips: Vec<String>,
    pub private_ips: Vec<String>,
}

impl RegionInstances {
    /// IPs of the requested type
    pub fn ips(&self, use_private: bool) -> &[String] {
        if use_private {
            &self.private_ips
        } else {
            &self.public_ips
        }
    }
}

/// The resolved map of region code to instance IPs for one run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InstanceDirectory {
    pub instances: IndexMap<String, RegionInstances>,
}

impl InstanceDirectory {
    /// Region codes in directory (insertion) order
    pub fn regions(&self) -> Vec<String> {
        self.instances.keys().cloned().collect()
    }

    pub fn get(&self, region: &str) -> Option<&RegionInstances> {
        self.instances.get(region)
    }

    /// Build the directory from parsed `terraform output -json`
    pub fn from_terraform_output(output: &serde_json::Value) -> Result<Self> {
        let public = output
            .get("instance_public_ips")
            .and_then(|v| v.get("value"))
            .and_then(|v| v.as_object())
            .ok_or_else(|| {
                eyre!("Missing 'instance_public_ips.value' in Terraform output; check terraform/outputs.tf")
            })?;
        let private = output
            .get("instance_private_ips")
            .and_then(|v| v.get("value"))
            .and_then(|v| v.as_object())
            .ok_or_else(|| {
                eyre!("Missing 'instance_private_ips.value' in Terraform output; check terraform/outputs.tf")
            })?;

        let mut instances: IndexMap<String, RegionInstances> = IndexMap::new();
        let mut any_public_ip = false;

        for (name, public_value) in public {
            let Some(private_value) = private.get(name) else {
                warn!(
                    "Private IPs for region key '{}' not found in Terraform output. Skipping.",
                    name
                );
                continue;
            };

            let public_ips = string_array(public_value);
            let private_ips = string_array(private_value);
            if public_ips.iter().any(|ip| !ip.is_empty()) {
                any_public_ip = true;
            }

            instances.insert(
                region_code(name),
                RegionInstances {
                    public_ips,
                    private_ips,
                },
            );
        }

        if !any_public_ip {
            warn!("All public IPs are empty! Check that the VPC/subnet assigns public IPs and the instances set associate_public_ip_address.");
        }

        Ok(Self { instances })
    }

    /// Persist the directory as pretty-printed JSON
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .wrap_err_with(|| format!("Failed to create directory '{}'", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)
            .wrap_err_with(|| format!("Failed to write instance info '{}'", path.display()))?;
        info!("Instance info saved to: {:?}", path);
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .wrap_err_with(|| format!("Unable to load instance info file '{}'", path.display()))?;
        let directory: Self = serde_json::from_str(&content)
            .wrap_err_with(|| format!("Invalid instance info JSON in '{}'", path.display()))?;
        Ok(directory)
    }
}

fn string_array(value: &serde_json::Value) -> Vec<String> {
    match value {
        serde_json::Value::Array(items) => items
            .iter()
            .filter_map(|v| v.as_str())
            .map(|s| s.to_string())
            .collect(),
        // Single-instance outputs occasionally come back as a bare string
        serde_json::Value::String(s) => vec![s.clone()],
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample_output() -> serde_json::Value {
        serde_json::json!({
            "instance_public_ips": {
                "value": {
                    "virginia": ["3.84.1.1"],
                    "london": ["18.130.2.2"]
                }
            },
            "instance_private_ips": {
                "value": {
                    "virginia": ["10.0.1.1"],
                    "london": ["10.1.2.2"]
                }
            }
        })
    }

    #[test]
    fn test_from_terraform_output() {
        let directory = InstanceDirectory::from_terraform_output(&sample_output()).unwrap();
        assert_eq!(directory.regions(), vec!["us-east-1", "eu-west-2"]);
        let virginia = directory.get("us-east-1").unwrap();
        assert_eq!(virginia.public_ips, vec!["3.84.1.1"]);
        assert_eq!(virginia.private_ips, vec!["10.0.1.1"]);
        assert_eq!(virginia.ips(true), ["10.0.1.1"]);
    }

    #[test]
    fn test_missing_private_side_skips_region() {
        let output = serde_json::json!({
            "instance_public_ips": {
                "value": { "virginia": ["3.84.1.1"], "london": ["18.130.2.2"] }
            },
            "instance_private_ips": {
                "value": { "virginia": ["10.0.1.1"] }
            }
        });
        let directory = InstanceDirectory::from_terraform_output(&output).unwrap();
        assert_eq!(directory.regions(), vec!["us-east-1"]);
    }

    #[test]
    fn test_missing_outputs_is_error() {
        let output = serde_json::json!({ "vpc_ids": { "value": {} } });
        assert!(InstanceDirectory::from_terraform_output(&output).is_err());
    }

    #[test]
    fn test_save_load_round_trip_preserves_order() {
        let directory = InstanceDirectory::from_terraform_output(&sample_output()).unwrap();
        let dir = tempdir().unwrap();
        let path = dir.path().join("data/instance_info.json");

        directory.save(&path).unwrap();
        let loaded = InstanceDirectory::load(&path).unwrap();
        assert_eq!(loaded.regions(), vec!["us-east-1", "eu-west-2"]);
    }
}
