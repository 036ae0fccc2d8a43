//! Resource cleanup behavior when provisioning fails mid-run.
//!
//! A stub `terraform` binary on PATH records its invocations and fails the
//! apply step. With resource cleanup enabled, the pipeline must still
//! attempt a destroy so a half-provisioned run does not leave instances
//! billing.

use std::env;
use std::fs;
use std::os::unix::fs::PermissionsExt;

use netbench::pipeline::{self, RunOptions};

#[test]
fn apply_failure_still_attempts_destroy() {
    let scratch = tempfile::TempDir::new().unwrap();
    let root = scratch.path();

    // Stub terraform: log each subcommand, fail only `apply`
    let bin_dir = root.join("bin");
    fs::create_dir_all(&bin_dir).unwrap();
    let log_path = root.join("terraform_invocations.log");
    let stub = bin_dir.join("terraform");
    fs::write(
        &stub,
        format!(
            "#!/bin/sh\necho \"$1\" >> \"{}\"\nif [ \"$1\" = \"apply\" ]; then exit 1; fi\nexit 0\n",
            log_path.display()
        ),
    )
    .unwrap();
    fs::set_permissions(&stub, fs::Permissions::from_mode(0o755)).unwrap();
    env::set_var(
        "PATH",
        format!("{}:{}", bin_dir.display(), env::var("PATH").unwrap_or_default()),
    );

    let config_path = root.join("config.json");
    fs::write(
        &config_path,
        r#"{"aws_regions": ["us-east-1", "eu-west-2"]}"#,
    )
    .unwrap();

    // Existing key so setup reaches the terraform stages
    let key_dir = root.join("keys");
    fs::create_dir_all(&key_dir).unwrap();
    fs::write(key_dir.join("aws-network-benchmark"), "dummy").unwrap();

    let opts = RunOptions {
        config_path,
        data_dir: root.join("data"),
        terraform_dir: root.join("terraform"),
        key_dir,
        skip_terraform: false,
        skip_install: true,
        skip_tests: true,
        force_cleanup: false,
        wait_for_ssh: false,
    };

    let code = pipeline::run(&opts);
    assert_eq!(code, 1);

    let invocations = fs::read_to_string(&log_path).unwrap();
    let commands: Vec<&str> = invocations.lines().collect();
    assert_eq!(commands, vec!["init", "apply", "destroy"]);
}
