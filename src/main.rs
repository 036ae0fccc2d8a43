use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use color_eyre::Result;
use env_logger::Env;
use log::info;

use netbench::pipeline::{self, RunOptions};

/// Cross-region AWS network benchmark orchestrator
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the benchmark configuration JSON file
    #[arg(short, long, default_value = "config.json")]
    config: PathBuf,

    /// Directory for result files
    #[arg(long, default_value = "data")]
    data_dir: PathBuf,

    /// Directory for generated Terraform configuration
    #[arg(long, default_value = "terraform")]
    terraform_dir: PathBuf,

    /// Directory holding the SSH key pair
    #[arg(long, default_value = "keys")]
    key_dir: PathBuf,

    /// Reuse existing infrastructure instead of running Terraform
    #[arg(long)]
    skip_terraform: bool,

    /// Skip the remote iperf3 install step
    #[arg(long)]
    skip_install: bool,

    /// Skip test execution (collect and format existing results only)
    #[arg(long)]
    skip_tests: bool,

    /// Destroy provisioned resources at the end regardless of config
    #[arg(long)]
    cleanup: bool,
}

fn main() -> Result<ExitCode> {
    color_eyre::install()?;
    let args = Args::parse();
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    info!("Starting network benchmark");
    info!("Configuration file: {:?}", args.config);
    info!("Data directory: {:?}", args.data_dir);

    let opts = RunOptions {
        config_path: args.config,
        data_dir: args.data_dir,
        terraform_dir: args.terraform_dir,
        key_dir: args.key_dir,
        skip_terraform: args.skip_terraform,
        skip_install: args.skip_install,
        skip_tests: args.skip_tests,
        force_cleanup: args.cleanup,
        wait_for_ssh: true,
    };

    let code = pipeline::run(&opts);
    Ok(ExitCode::from(code as u8))
}
