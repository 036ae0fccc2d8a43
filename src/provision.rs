//! SSH key management for instance access.
//!
//! The benchmark uses a single RSA key pair shared across all regions. The
//! public key is imported by the generated Terraform; the private key stays
//! next to the Terraform working directory.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use color_eyre::eyre::{eyre, WrapErr};
use color_eyre::Result;
use log::info;

/// Ensure the SSH key pair exists, creating it when allowed.
///
/// Returns the private key path. Missing key with `create` false is a fatal
/// setup error.
pub fn ensure_ssh_key(key_dir: &Path, key_name: &str, create: bool) -> Result<PathBuf> {
    let private_key = key_dir.join(key_name);

    if private_key.exists() {
        info!("Using existing SSH key: {:?}", private_key);
        return Ok(private_key);
    }

    if !create {
        return Err(eyre!(
            "SSH key '{}' not found and 'create_ssh_key' is false. \
             Create the key manually or set 'create_ssh_key' to true in the config.",
            private_key.display()
        ));
    }

    info!(
        "SSH key '{}' not found. Creating new key pair in {:?}...",
        key_name, key_dir
    );
    fs::create_dir_all(key_dir)
        .wrap_err_with(|| format!("Failed to create key directory '{}'", key_dir.display()))?;

    // Key without passphrase; one attempt, failure aborts the run
    let output = Command::new("ssh-keygen")
        .args(["-t", "rsa", "-b", "2048", "-N", ""])
        .arg("-f")
        .arg(&private_key)
        .output()
        .wrap_err("Failed to execute ssh-keygen")?;

    if !output.status.success() {
        return Err(eyre!(
            "ssh-keygen failed: {}",
            String::from_utf8_lossy(&output.stderr)
        ));
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&private_key, fs::Permissions::from_mode(0o600))
            .wrap_err("Failed to set private key permissions")?;
    }

    info!(
        "Created SSH key pair: {:?}, {:?}",
        private_key,
        private_key.with_extension("pub")
    );
    Ok(private_key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_existing_key_is_reused() {
        let dir = tempdir().unwrap();
        let key_path = dir.path().join("bench-key");
        fs::write(&key_path, "dummy").unwrap();

        let resolved = ensure_ssh_key(dir.path(), "bench-key", false).unwrap();
        assert_eq!(resolved, key_path);
    }

    #[test]
    fn test_missing_key_without_create_is_fatal() {
        let dir = tempdir().unwrap();
        let err = ensure_ssh_key(dir.path(), "absent-key", false).unwrap_err();
        assert!(err.to_string().contains("create_ssh_key"));
    }
}
