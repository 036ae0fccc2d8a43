//! # Netbench - Cross-region AWS network benchmarking
//!
//! This library automates end-to-end network benchmarking between AWS
//! regions: it generates Terraform for a configured region set, provisions
//! ephemeral EC2 instances, drives ping and iperf3 tests between them over
//! SSH, and aggregates the results into region-pair matrices and report
//! artifacts before tearing the infrastructure back down.
//!
//! ## Architecture
//!
//! The library is organized into several modules:
//!
//! - `config`: JSON run configuration and validation
//! - `regions`: region code/name tables and fallback AMIs
//! - `terraform`: Terraform config generation and CLI runner
//! - `provision`: SSH key management
//! - `instance_info`: provisioned-instance directory from Terraform output
//! - `remote`: SSH/SCP transport to the instances
//! - `bench`: pair enumeration and the latency/p2p/udp test runners
//! - `collect`: result collection, region reconciliation, matrices and
//!   formatted artifacts
//! - `report`: self-contained HTML report
//! - `pipeline`: the end-to-end workflow

pub mod bench;
pub mod collect;
pub mod config;
pub mod instance_info;
pub mod pipeline;
pub mod provision;
pub mod regions;
pub mod remote;
pub mod report;
pub mod terraform;
