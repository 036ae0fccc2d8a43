//! Orphaned-instance cleanup CLI.
//!
//! Benchmark runs that are killed mid-flight leave EC2 instances behind
//! with no local state to resume from. This utility finds instances tagged
//! with the benchmark project tag across regions and lists, stops or
//! terminates them via the AWS CLI.

use std::process::Command;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{eyre, Result, WrapErr};
use env_logger::Env;
use log::{info, warn};

const PROJECT_TAG: &str = "aws-network-benchmark";

#[derive(Parser)]
#[command(name = "netbench-cleanup")]
#[command(about = "Find and clean up benchmark EC2 instances")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Regions to scan
    #[arg(short, long, required = true, num_args = 1..)]
    regions: Vec<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// List benchmark instances per region
    List,
    /// Stop running benchmark instances
    Stop,
    /// Terminate benchmark instances
    Terminate,
}

fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    for region in &cli.regions {
        let instances = find_instances(region)?;
        if instances.is_empty() {
            info!("{}: no benchmark instances", region);
            continue;
        }

        match cli.command {
            Commands::List => {
                for (id, state) in &instances {
                    info!("{}: {} ({})", region, id, state);
                }
            }
            Commands::Stop => {
                let ids: Vec<&str> = instances
                    .iter()
                    .filter(|(_, state)| state == "running")
                    .map(|(id, _)| id.as_str())
                    .collect();
                if ids.is_empty() {
                    info!("{}: nothing running to stop", region);
                } else {
                    run_instance_action(region, "stop-instances", &ids)?;
                    info!("{}: stopping {} instance(s)", region, ids.len());
                }
            }
            Commands::Terminate => {
                let ids: Vec<&str> = instances.iter().map(|(id, _)| id.as_str()).collect();
                run_instance_action(region, "terminate-instances", &ids)?;
                info!("{}: terminating {} instance(s)", region, ids.len());
            }
        }
    }

    Ok(())
}

/// List `(instance_id, state)` for benchmark-tagged instances in a region
fn find_instances(region: &str) -> Result<Vec<(String, String)>> {
    let tag_filter = format!("Name=tag:Project,Values={}", PROJECT_TAG);
    let output = Command::new("aws")
        .args(["ec2", "describe-instances", "--region", region])
        .arg("--filters")
        .arg(&tag_filter)
        .arg("Name=instance-state-name,Values=pending,running,stopping,stopped")
        .args([
            "--query",
            "Reservations[].Instances[].[InstanceId,State.Name]",
            "--output",
            "json",
        ])
        .output()
        .wrap_err("Failed to run the aws CLI; is it installed?")?;

    if !output.status.success() {
        return Err(eyre!(
            "aws describe-instances failed for {}: {}",
            region,
            String::from_utf8_lossy(&output.stderr).trim()
        ));
    }

    let parsed: serde_json::Value = serde_json::from_slice(&output.stdout)
        .wrap_err_with(|| format!("Unparseable describe-instances output for {}", region))?;
    let Some(rows) = parsed.as_array() else {
        return Ok(Vec::new());
    };

    let mut instances = Vec::new();
    for row in rows {
        let (Some(id), Some(state)) = (
            row.get(0).and_then(|v| v.as_str()),
            row.get(1).and_then(|v| v.as_str()),
        ) else {
            warn!("{}: skipping malformed describe-instances row", region);
            continue;
        };
        instances.push((id.to_string(), state.to_string()));
    }
    Ok(instances)
}

fn run_instance_action(region: &str, action: &str, ids: &[&str]) -> Result<()> {
    let mut cmd = Command::new("aws");
    cmd.args(["ec2", action, "--region", region, "--instance-ids"]);
    cmd.args(ids);

    let output = cmd
        .output()
        .wrap_err("Failed to run the aws CLI; is it installed?")?;
    if !output.status.success() {
        return Err(eyre!(
            "aws {} failed for {}: {}",
            action,
            region,
            String::from_utf8_lossy(&output.stderr).trim()
        ));
    }
    Ok(())
}
