//! External process invocations.
//!
//! The installer shells out for three things it deliberately does not
//! reimplement: the Java keytool (truststore import), the SQL
//! initialization script shipped with the crate, and the container
//! volume manager. They sit behind [`ExternalRunner`] so the
//! installation transaction can be exercised in tests without Java or a
//! container runtime on the machine.

use std::path::Path;
use std::process::{Command, Output};

use crate::error::{FerrowheadError, Result};

/// Name of the SQL initialization script copied into each cloud
/// directory and executed on first install.
pub const INIT_SQL_SCRIPT: &str = "initSQL.sh";

pub trait ExternalRunner {
    /// Import a PEM certificate into a PKCS#12 truststore under the given
    /// alias, creating the truststore when it does not exist yet.
    fn import_truststore(
        &self,
        truststore: &Path,
        cert_file: &Path,
        alias: &str,
        storepass: &str,
    ) -> Result<()>;

    /// Run the SQL initialization script with `cloud_dir` as its working
    /// directory.
    fn run_sql_init(&self, cloud_dir: &Path) -> Result<()>;

    fn volume_exists(&self, volume: &str) -> Result<bool>;

    fn create_volume(&self, volume: &str) -> Result<()>;

    fn remove_volume(&self, volume: &str) -> Result<()>;
}

/// Production implementation backed by `keytool` and `docker`.
pub struct SystemRunner;

fn check_exit(tool: &str, output: Output) -> Result<()> {
    if output.status.success() {
        return Ok(());
    }
    let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
    combined.push_str(&String::from_utf8_lossy(&output.stderr));
    Err(FerrowheadError::ExternalTool {
        tool: tool.to_string(),
        output: combined,
    })
}

impl ExternalRunner for SystemRunner {
    fn import_truststore(
        &self,
        truststore: &Path,
        cert_file: &Path,
        alias: &str,
        storepass: &str,
    ) -> Result<()> {
        let output = Command::new("keytool")
            .arg("-importcert")
            .arg("-trustcacerts")
            .arg("-noprompt")
            .arg("-storepass")
            .arg(storepass)
            .arg("-keystore")
            .arg(truststore)
            .arg("-file")
            .arg(cert_file)
            .arg("-alias")
            .arg(alias)
            .output()?;
        check_exit("keytool", output)
    }

    fn run_sql_init(&self, cloud_dir: &Path) -> Result<()> {
        let output = Command::new("sh")
            .arg(INIT_SQL_SCRIPT)
            .current_dir(cloud_dir)
            .output()?;
        check_exit(INIT_SQL_SCRIPT, output)
    }

    fn volume_exists(&self, volume: &str) -> Result<bool> {
        let output = Command::new("docker")
            .args(["volume", "ls", "--format", "{{.Name}}"])
            .output()?;
        check_exit("docker volume ls", output.clone())?;
        let listing = String::from_utf8_lossy(&output.stdout);
        Ok(listing.lines().any(|line| line.trim() == volume))
    }

    fn create_volume(&self, volume: &str) -> Result<()> {
        let output = Command::new("docker")
            .args(["volume", "create", "--name", volume])
            .output()?;
        check_exit("docker volume create", output)
    }

    fn remove_volume(&self, volume: &str) -> Result<()> {
        let output = Command::new("docker")
            .args(["volume", "rm", volume])
            .output()?;
        check_exit("docker volume rm", output)
    }
}
