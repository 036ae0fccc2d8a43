//! Benchmark workflow orchestration.
//!
//! The run is a strictly forward sequence of stages. Every external command
//! is attempted once; there is no retry or backoff. Setup failures abort
//! the run and, when resource cleanup is enabled, trigger a best-effort
//! terraform destroy so instances do not keep billing. Individual test
//! failures mark the phase failed and the run moves on; post-processing
//! failures are logged and skipped.

use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use color_eyre::eyre::WrapErr;
use color_eyre::Result;
use log::{error, info, warn};

use crate::bench::pairing::PairingOptions;
use crate::bench::{latency, p2p, udp};
use crate::collect::{format, results, summary};
use crate::config::{load_config, Config};
use crate::instance_info::InstanceDirectory;
use crate::provision::ensure_ssh_key;
use crate::remote::{SshTransport, Transport};
use crate::{report, terraform};

const SSH_SETTLE_SECS: u64 = 60;

/// Workflow stages, reached strictly in order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    Init,
    KeyReady,
    TerraformApplied,
    InstancesResolved,
    TestsRun,
    Collected,
    Destroyed,
}

/// Run parameters from the CLI
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub config_path: PathBuf,
    pub data_dir: PathBuf,
    pub terraform_dir: PathBuf,
    pub key_dir: PathBuf,
    pub skip_terraform: bool,
    pub skip_install: bool,
    pub skip_tests: bool,
    /// Force terraform destroy at the end regardless of config
    pub force_cleanup: bool,
    /// Wait for sshd after provisioning; tests disable this
    pub wait_for_ssh: bool,
}

/// Which test phases failed during the run
#[derive(Debug, Clone, Copy, Default)]
pub struct TestPhaseOutcome {
    pub latency_failed: bool,
    pub p2p_failed: bool,
    pub udp_failed: bool,
}

impl TestPhaseOutcome {
    pub fn any_failed(&self) -> bool {
        self.latency_failed || self.p2p_failed || self.udp_failed
    }
}

/// Run the whole benchmark workflow; returns the process exit code
pub fn run(opts: &RunOptions) -> i32 {
    match run_inner(opts) {
        Ok(clean) => {
            if clean {
                info!("Benchmark run completed successfully");
                0
            } else {
                warn!("Benchmark run completed with failures");
                1
            }
        }
        Err(e) => {
            error!("Benchmark run aborted: {:#}", e);
            1
        }
    }
}

fn run_inner(opts: &RunOptions) -> Result<bool> {
    let mut stage = Stage::Init;
    let config = load_config(&opts.config_path)?;

    let key_path = ensure_ssh_key(&opts.key_dir, &config.ssh_key_name, config.create_ssh_key)?;
    stage = advance(stage, Stage::KeyReady);

    let directory = match resolve_instances(&config, opts, &mut stage) {
        Ok(directory) => directory,
        Err(e) => {
            if config.cleanup_resources && stage >= Stage::TerraformApplied {
                warn!("Setup failed, destroying provisioned resources");
                terraform::destroy(&opts.terraform_dir);
            }
            return Err(e);
        }
    };
    stage = advance(stage, Stage::InstancesResolved);

    if opts.wait_for_ssh && !opts.skip_terraform {
        info!("Waiting {}s for instances to accept SSH", SSH_SETTLE_SECS);
        thread::sleep(Duration::from_secs(SSH_SETTLE_SECS));
    }

    let transport = SshTransport::new(key_path);
    if !opts.skip_install {
        install_tools(&directory, &transport, config.use_private_ip);
    }

    let mut clean = true;
    if opts.skip_tests {
        info!("Skipping test execution");
    } else {
        let outcome = run_test_phase(&config, &directory, &transport, &opts.data_dir);
        clean &= !outcome.any_failed();
    }
    stage = advance(stage, Stage::TestsRun);

    clean &= run_post_processing(&config, &opts.data_dir);
    stage = advance(stage, Stage::Collected);

    if config.cleanup_resources || opts.force_cleanup {
        if !terraform::destroy(&opts.terraform_dir) {
            warn!("Terraform destroy failed; instances may still be running");
            clean = false;
        }
        advance(stage, Stage::Destroyed);
    } else {
        info!("Leaving provisioned resources running (cleanup disabled)");
    }

    Ok(clean)
}

fn advance(current: Stage, next: Stage) -> Stage {
    debug_assert!(next > current, "stage order violated");
    next
}

/// Provision via terraform, or reuse a previously saved instance directory
fn resolve_instances(
    config: &Config,
    opts: &RunOptions,
    stage: &mut Stage,
) -> Result<InstanceDirectory> {
    let info_path = opts.data_dir.join("instance_info.json");

    if opts.skip_terraform || !config.run_terraform_apply {
        info!("Reusing instance info from {:?}", info_path);
        return InstanceDirectory::load(&info_path);
    }

    terraform::generate_configs(config, &opts.terraform_dir)?;
    terraform::init(&opts.terraform_dir)?;
    // A failed apply can still leave resources behind, so the stage must
    // reflect the attempt before the result is known
    *stage = advance(*stage, Stage::TerraformApplied);
    terraform::apply(&opts.terraform_dir)?;

    let output = terraform::output_json(&opts.terraform_dir)?;
    let directory = InstanceDirectory::from_terraform_output(&output)?;
    std::fs::create_dir_all(&opts.data_dir).wrap_err_with(|| {
        format!("Failed to create data directory '{}'", opts.data_dir.display())
    })?;
    directory.save(&info_path)?;
    Ok(directory)
}

/// Best-effort iperf3 install on every instance
fn install_tools(directory: &InstanceDirectory, transport: &dyn Transport, use_private_ip: bool) {
    for region in directory.regions() {
        let Some(instances) = directory.get(&region) else {
            continue;
        };
        for ip in instances.ips(use_private_ip) {
            info!("Installing iperf3 on {} ({})", region, ip);
            match transport.run(ip, "sudo yum install -y iperf3") {
                Ok(output) if output.success => {}
                _ => warn!("Could not install iperf3 on {}", ip),
            }
        }
    }
}

/// Run the enabled test phases. A failed phase is logged and the next phase
/// still runs.
pub fn run_test_phase(
    config: &Config,
    directory: &InstanceDirectory,
    transport: &dyn Transport,
    data_dir: &Path,
) -> TestPhaseOutcome {
    let mut outcome = TestPhaseOutcome::default();
    let pairing = PairingOptions {
        all_regions: true,
        intra_region: config.test_intra_region,
        use_private_ip: config.use_private_ip,
        ..Default::default()
    };

    if config.run_latency_tests {
        match latency::run_latency_tests(
            directory,
            transport,
            &pairing,
            config.ping_count,
            data_dir,
        ) {
            Ok(batch) => outcome.latency_failed = batch.errors_occurred,
            Err(e) => {
                error!("Latency test phase failed: {:#}", e);
                outcome.latency_failed = true;
            }
        }
    }

    if config.run_p2p_tests {
        match p2p::run_p2p_tests(
            directory,
            transport,
            &pairing,
            config.p2p_duration,
            config.p2p_parallel,
            data_dir,
        ) {
            Ok(batch) => outcome.p2p_failed = batch.errors_occurred,
            Err(e) => {
                error!("P2p test phase failed: {:#}", e);
                outcome.p2p_failed = true;
            }
        }
    }

    if config.run_udp_tests {
        // Validated to be present when run_udp_tests is set
        let server_region = config.udp_server_region.as_deref().unwrap_or_default();
        match udp::run_udp_tests(
            directory,
            transport,
            server_region,
            &config.udp_bandwidth,
            config.udp_duration,
            config.use_private_ip,
            config.test_intra_region,
            data_dir,
        ) {
            Ok(batch) => outcome.udp_failed = batch.errors_occurred,
            Err(e) => {
                error!("UDP test phase failed: {:#}", e);
                outcome.udp_failed = true;
            }
        }
    }

    outcome
}

/// Collection, statistics, formatting and reporting. Failures here never
/// abort the run.
pub fn run_post_processing(config: &Config, data_dir: &Path) -> bool {
    let mut clean = true;

    let collected = match results::collect_results(data_dir) {
        Ok(collected) => {
            if let Err(e) = results::save_collected(&collected, data_dir) {
                warn!("Could not save collected results: {:#}", e);
                clean = false;
            }
            Some(collected)
        }
        Err(e) => {
            warn!("Result collection failed: {:#}", e);
            clean = false;
            None
        }
    };

    let Some(collected) = collected else {
        return clean;
    };

    if let Err(e) = summary::summarize(&collected, data_dir) {
        warn!("Result summarization failed: {:#}", e);
        clean = false;
    }

    if config.generate_visualizations {
        let formatted = format::build_formatted_data(&collected, data_dir);
        if let Err(e) = format::write_formatted_artifacts(&formatted, data_dir) {
            warn!("Formatting stage failed: {:#}", e);
            clean = false;
        }
        if config.generate_report {
            let viz_dir = data_dir.join("visualization");
            if let Err(e) = report::generate_html_report(&formatted, &viz_dir) {
                warn!("Report generation failed: {:#}", e);
                clean = false;
            }
        }
    }

    clean
}
