//! Remote command execution over SSH.
//!
//! Every test runner talks to instances through the [`Transport`] trait so
//! the whole pipeline can run against canned output in tests. The production
//! implementation shells out to `ssh`/`scp` with host key checking disabled,
//! exactly one attempt per command and no retry.

use std::path::{Path, PathBuf};
use std::process::Command;

use color_eyre::eyre::WrapErr;
use color_eyre::Result;
use log::debug;

/// Captured output of a remote command
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

/// Remote execution seam used by all test runners
pub trait Transport {
    /// Run a shell command on the instance at `ip`
    fn run(&self, ip: &str, command: &str) -> Result<CommandOutput>;

    /// Copy a remote file to a local path
    fn fetch(&self, ip: &str, remote_path: &str, local_path: &Path) -> Result<()>;
}

/// ssh/scp-backed transport
pub struct SshTransport {
    key_path: PathBuf,
    user: String,
}

impl SshTransport {
    pub fn new(key_path: PathBuf) -> Self {
        Self {
            key_path,
            user: "ec2-user".to_string(),
        }
    }
}

impl Transport for SshTransport {
    fn run(&self, ip: &str, command: &str) -> Result<CommandOutput> {
        debug!("ssh {}@{}: {}", self.user, ip, command);
        let output = Command::new("ssh")
            .arg("-i")
            .arg(&self.key_path)
            .arg("-o")
            .arg("StrictHostKeyChecking=no")
            .arg(format!("{}@{}", self.user, ip))
            .arg(command)
            .output()
            .wrap_err_with(|| format!("Failed to execute ssh to {}", ip))?;

        Ok(CommandOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    fn fetch(&self, ip: &str, remote_path: &str, local_path: &Path) -> Result<()> {
        debug!("scp {}@{}:{} -> {:?}", self.user, ip, remote_path, local_path);
        let output = Command::new("scp")
            .arg("-i")
            .arg(&self.key_path)
            .arg("-o")
            .arg("StrictHostKeyChecking=no")
            .arg(format!("{}@{}:{}", self.user, ip, remote_path))
            .arg(local_path)
            .output()
            .wrap_err_with(|| format!("Failed to execute scp from {}", ip))?;

        if !output.status.success() {
            return Err(color_eyre::eyre::eyre!(
                "scp from {}:{} failed: {}",
                ip,
                remote_path,
                String::from_utf8_lossy(&output.stderr)
            ));
        }
        Ok(())
    }
}
