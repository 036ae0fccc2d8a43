//! Region-pair enumeration.
//!
//! Produces the ordered list of (source, target) endpoints to test from the
//! instance directory. Iteration follows directory insertion order, not
//! sorted order. Same-region pairs are skipped unless intra-region testing
//! is enabled; a region with several instances expands to all distinct
//! instance-index pairs, labelled `<region>_instanceN` so downstream
//! aggregation keeps them off the matrix diagonal.

use log::warn;

use crate::instance_info::InstanceDirectory;

/// One side of a test pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// Region code, or `<region>_instanceN` for intra-region endpoints
    pub label: String,
    pub region: String,
    pub ip: String,
}

/// An ordered (source, target) pair; the test runs on the source against
/// the target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestPair {
    pub source: Endpoint,
    pub target: Endpoint,
}

/// Pair selection flags
#[derive(Debug, Clone, Default)]
pub struct PairingOptions {
    pub all_regions: bool,
    pub intra_region: bool,
    pub use_private_ip: bool,
    /// Explicit single pair when `all_regions` is false
    pub source_region: Option<String>,
    pub target_region: Option<String>,
}

/// Pairing errors
#[derive(Debug, thiserror::Error)]
pub enum PairingError {
    #[error("Provide all_regions or both source_region and target_region")]
    MissingSelection,
    #[error("Missing IPs for region '{0}'")]
    MissingIps(String),
}

fn region_endpoint(label: &str, region: &str, ip: &str) -> Endpoint {
    Endpoint {
        label: label.to_string(),
        region: region.to_string(),
        ip: ip.to_string(),
    }
}

/// Enumerate the ordered pair set to test
pub fn enumerate_pairs(
    directory: &InstanceDirectory,
    opts: &PairingOptions,
) -> Result<Vec<TestPair>, PairingError> {
    let mut pairs = Vec::new();

    if opts.all_regions {
        let regions = directory.regions();
        for src_region in &regions {
            for dest_region in &regions {
                if !opts.intra_region && src_region == dest_region {
                    continue;
                }

                let source_ips = directory
                    .get(src_region)
                    .map(|r| r.ips(opts.use_private_ip))
                    .unwrap_or(&[]);
                let target_ips = directory
                    .get(dest_region)
                    .map(|r| r.ips(opts.use_private_ip))
                    .unwrap_or(&[]);

                if source_ips.is_empty() || target_ips.is_empty() {
                    warn!(
                        "Missing {} IPs for {} or {}. Skipping test.",
                        if opts.use_private_ip { "private" } else { "public" },
                        src_region,
                        dest_region
                    );
                    continue;
                }

                if src_region == dest_region && source_ips.len() > 1 {
                    // All distinct instance-index pairs within the region
                    for (i, s_ip) in source_ips.iter().enumerate() {
                        for (j, t_ip) in target_ips.iter().enumerate() {
                            if i == j {
                                continue;
                            }
                            pairs.push(TestPair {
                                source: region_endpoint(
                                    &format!("{}_instance{}", src_region, i + 1),
                                    src_region,
                                    s_ip,
                                ),
                                target: region_endpoint(
                                    &format!("{}_instance{}", dest_region, j + 1),
                                    dest_region,
                                    t_ip,
                                ),
                            });
                        }
                    }
                } else {
                    // Inter-region, or single-instance intra-region. The
                    // latter is a self-pair; runners that cannot test an
                    // instance against itself skip it by IP.
                    pairs.push(TestPair {
                        source: region_endpoint(src_region, src_region, &source_ips[0]),
                        target: region_endpoint(dest_region, dest_region, &target_ips[0]),
                    });
                }
            }
        }
    } else {
        let (Some(src_region), Some(dest_region)) =
            (&opts.source_region, &opts.target_region)
        else {
            return Err(PairingError::MissingSelection);
        };

        let source_ips = directory
            .get(src_region)
            .map(|r| r.ips(opts.use_private_ip))
            .unwrap_or(&[]);
        let target_ips = directory
            .get(dest_region)
            .map(|r| r.ips(opts.use_private_ip))
            .unwrap_or(&[]);
        if source_ips.is_empty() {
            return Err(PairingError::MissingIps(src_region.clone()));
        }
        if target_ips.is_empty() {
            return Err(PairingError::MissingIps(dest_region.clone()));
        }

        pairs.push(TestPair {
            source: region_endpoint(src_region, src_region, &source_ips[0]),
            target: region_endpoint(dest_region, dest_region, &target_ips[0]),
        });
    }

    Ok(pairs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance_info::RegionInstances;

    fn directory(regions: &[(&str, usize)]) -> InstanceDirectory {
        let mut dir = InstanceDirectory::default();
        for (ri, (region, count)) in regions.iter().enumerate() {
            let instances = RegionInstances {
                public_ips: (0..*count).map(|i| format!("52.{}.0.{}", ri, i + 1)).collect(),
                private_ips: (0..*count).map(|i| format!("10.{}.0.{}", ri, i + 1)).collect(),
            };
            dir.instances.insert(region.to_string(), instances);
        }
        dir
    }

    #[test]
    fn test_all_regions_pair_count_is_n_times_n_minus_one() {
        for n in 2..=5 {
            let regions: Vec<(String, usize)> =
                (0..n).map(|i| (format!("region-{}", i), 1)).collect();
            let refs: Vec<(&str, usize)> =
                regions.iter().map(|(r, c)| (r.as_str(), *c)).collect();
            let dir = directory(&refs);

            let pairs = enumerate_pairs(
                &dir,
                &PairingOptions {
                    all_regions: true,
                    ..Default::default()
                },
            )
            .unwrap();
            assert_eq!(pairs.len(), n * (n - 1));
        }
    }

    #[test]
    fn test_iteration_follows_insertion_order() {
        let dir = directory(&[("us-west-2", 1), ("ap-northeast-1", 1), ("eu-west-2", 1)]);
        let pairs = enumerate_pairs(
            &dir,
            &PairingOptions {
                all_regions: true,
                ..Default::default()
            },
        )
        .unwrap();

        // First source is the first inserted region even though it sorts last
        assert_eq!(pairs[0].source.region, "us-west-2");
        assert_eq!(pairs[0].target.region, "ap-northeast-1");
        assert_eq!(pairs[1].target.region, "eu-west-2");
    }

    #[test]
    fn test_intra_region_expands_instance_pairs() {
        let dir = directory(&[("us-east-1", 3)]);
        let pairs = enumerate_pairs(
            &dir,
            &PairingOptions {
                all_regions: true,
                intra_region: true,
                ..Default::default()
            },
        )
        .unwrap();

        // 3 instances -> 3*2 directed pairs
        assert_eq!(pairs.len(), 6);
        assert_eq!(pairs[0].source.label, "us-east-1_instance1");
        assert_eq!(pairs[0].target.label, "us-east-1_instance2");
        assert!(pairs.iter().all(|p| p.source.label != p.target.label));
    }

    #[test]
    fn test_single_instance_intra_region_keeps_self_pair() {
        let dir = directory(&[("us-east-1", 1), ("eu-west-2", 1)]);
        let pairs = enumerate_pairs(
            &dir,
            &PairingOptions {
                all_regions: true,
                intra_region: true,
                ..Default::default()
            },
        )
        .unwrap();

        // 2 inter-region pairs plus one self-pair per region
        assert_eq!(pairs.len(), 4);
        let self_pairs: Vec<_> = pairs
            .iter()
            .filter(|p| p.source.region == p.target.region)
            .collect();
        assert_eq!(self_pairs.len(), 2);
        assert_eq!(self_pairs[0].source.ip, self_pairs[0].target.ip);
    }

    #[test]
    fn test_region_without_requested_ip_type_is_skipped() {
        let mut dir = directory(&[("us-east-1", 1), ("eu-west-2", 1)]);
        dir.instances.get_mut("eu-west-2").unwrap().public_ips.clear();

        let pairs = enumerate_pairs(
            &dir,
            &PairingOptions {
                all_regions: true,
                ..Default::default()
            },
        )
        .unwrap();
        assert!(pairs.is_empty());

        // The private side is intact, so private-IP pairing still works
        let pairs = enumerate_pairs(
            &dir,
            &PairingOptions {
                all_regions: true,
                use_private_ip: true,
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(pairs.len(), 2);
    }

    #[test]
    fn test_explicit_pair_mode() {
        let dir = directory(&[("us-east-1", 1), ("eu-west-2", 1)]);
        let pairs = enumerate_pairs(
            &dir,
            &PairingOptions {
                source_region: Some("eu-west-2".to_string()),
                target_region: Some("us-east-1".to_string()),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].source.region, "eu-west-2");
        assert_eq!(pairs[0].target.region, "us-east-1");
    }

    #[test]
    fn test_explicit_pair_requires_both_regions() {
        let dir = directory(&[("us-east-1", 1)]);
        let err = enumerate_pairs(
            &dir,
            &PairingOptions {
                source_region: Some("us-east-1".to_string()),
                ..Default::default()
            },
        )
        .unwrap_err();
        assert!(matches!(err, PairingError::MissingSelection));
    }
}
