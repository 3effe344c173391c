//! The all-or-nothing installation transaction and its inverse.
//!
//! Installation is a linear pipeline: render configuration files, build
//! and store the certificate hierarchy, assemble the truststore, stage
//! the SQL initialization, and create the external volume. Every path
//! created along the way is registered with a [`RollbackGuard`]; if any
//! step fails, the guard removes everything the failed run created and
//! the error is surfaced as a single [`FerrowheadError::Transaction`].
//! The `installed` flag is written last, so it can never be `true` after
//! an interrupted run.
//!
//! Tiers persisted by an earlier successful install are reused, not
//! recreated, so a retried install after a rollback starts from a clean
//! directory without disturbing the shared root/org material.

use std::collections::HashSet;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::cert_store::{
    store_cloud_files, store_org_files, store_root_files, store_sysop_files, store_system_files,
    store_truststore,
};
use crate::configs::{
    load_cloud_config, store_cloud_config, CloudConfig, CloudRegistry, CLOUD_CONFIG_FILE_NAME,
};
use crate::error::Result;
use crate::external::{ExternalRunner, INIT_SQL_SCRIPT};
use crate::hierarchy::{build_hierarchy, CertificatePaths};
use crate::templates::{
    generate_compose_file, generate_config_files, CORE_SYSTEM_CONFIG_DIR, DOCKER_COMPOSE_FILE_NAME,
};

/// SQL initialization script shipped with the crate and copied into
/// every cloud directory.
const INIT_SQL_CONTENTS: &str = include_str!("../assets/initSQL.sh");

const SQL_DIR: &str = "sql";

/// Tracks every artifact created by an in-flight installation.
///
/// Dropping the guard without [`commit`](RollbackGuard::commit) removes
/// all registered files, then all registered directories in reverse
/// registration order. Already-missing paths are not an error during
/// cleanup; any other removal failure is logged as a warning so it never
/// masks the error that triggered the rollback.
pub struct RollbackGuard {
    files: Vec<PathBuf>,
    dirs: Vec<PathBuf>,
    committed: bool,
}

impl RollbackGuard {
    pub fn new() -> Self {
        Self {
            files: Vec::new(),
            dirs: Vec::new(),
            committed: false,
        }
    }

    pub fn track(&mut self, path: PathBuf) {
        self.files.push(path);
    }

    pub fn track_all(&mut self, paths: Vec<PathBuf>) {
        self.files.extend(paths);
    }

    /// Register a directory that did not exist before this transaction.
    /// Rolled back with its entire contents.
    pub fn track_dir(&mut self, path: PathBuf) {
        self.dirs.push(path);
    }

    /// Keep everything: the transaction succeeded.
    pub fn commit(&mut self) {
        self.committed = true;
    }
}

impl Default for RollbackGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for RollbackGuard {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        if self.files.is_empty() && self.dirs.is_empty() {
            return;
        }
        warn!(
            files = self.files.len(),
            dirs = self.dirs.len(),
            "rolling back installation artifacts"
        );
        for path in &self.files {
            if let Err(e) = fs::remove_file(path) {
                if e.kind() != ErrorKind::NotFound {
                    warn!(path = %path.display(), error = %e, "could not remove file during rollback");
                }
            }
        }
        for dir in self.dirs.iter().rev() {
            if let Err(e) = fs::remove_dir_all(dir) {
                if e.kind() != ErrorKind::NotFound {
                    warn!(path = %dir.display(), error = %e, "could not remove directory during rollback");
                }
            }
        }
    }
}

/// Register `dir` for rollback if it does not exist yet, then create it.
fn create_dir_tracked(guard: &mut RollbackGuard, dir: &Path) -> Result<()> {
    // Register the outermost missing ancestor so rollback removes the
    // whole subtree this transaction introduced.
    let mut missing_root = None;
    let mut probe = dir.to_path_buf();
    loop {
        if probe.exists() {
            break;
        }
        missing_root = Some(probe.clone());
        match probe.parent() {
            Some(parent) => probe = parent.to_path_buf(),
            None => break,
        }
    }
    if let Some(root) = missing_root {
        guard.track_dir(root);
    }
    fs::create_dir_all(dir)?;
    Ok(())
}

fn sql_initialized(cloud_dir: &Path) -> bool {
    cloud_dir
        .join(SQL_DIR)
        .join("create_empty_arrowhead_db.sql")
        .is_file()
}

/// Install one local cloud: certificates, configuration artifacts, SQL
/// staging, and the external volume, atomically.
///
/// On success the cloud configuration is persisted with
/// `installed: true`. On any failure every path created by this run is
/// removed and the original cause is returned inside a
/// [`FerrowheadError::Transaction`]; the `installed` flag is left
/// untouched.
pub fn install_cloud(
    cloud_dir: &Path,
    runner: &dyn ExternalRunner,
    cloud_password: &str,
    org_password: &str,
) -> Result<()> {
    let config_path = cloud_dir.join(CLOUD_CONFIG_FILE_NAME);
    // Validation failures here are pre-transaction: nothing has been
    // created yet and there is nothing to roll back.
    let mut cloud_config = load_cloud_config(&config_path)?;

    info!(cloud = %cloud_config.cloud_identifier(), "installing local cloud");

    let mut guard = RollbackGuard::new();
    let outcome = run_install(
        &cloud_config,
        cloud_dir,
        runner,
        cloud_password,
        org_password,
        &mut guard,
    )
    .and_then(|()| {
        cloud_config.installed = true;
        store_cloud_config(&config_path, &cloud_config)
    });

    match outcome {
        Ok(()) => {
            guard.commit();
            info!(cloud = %cloud_config.cloud_identifier(), "finished installing local cloud");
            Ok(())
        }
        Err(e) => Err(e.into_transaction()),
    }
}

fn run_install(
    cloud_config: &CloudConfig,
    cloud_dir: &Path,
    runner: &dyn ExternalRunner,
    cloud_password: &str,
    org_password: &str,
    guard: &mut RollbackGuard,
) -> Result<()> {
    // Core system property files and the compose file.
    create_dir_tracked(guard, &cloud_dir.join(CORE_SYSTEM_CONFIG_DIR))?;
    guard.track_all(generate_config_files(cloud_config, cloud_dir, cloud_password)?);
    guard.track(generate_compose_file(cloud_config, cloud_dir, cloud_password)?);

    // Certificate hierarchy. Only tiers generated in this run are
    // stored; reused tiers keep their existing files byte-identical.
    let paths = CertificatePaths::new(
        cloud_dir,
        &cloud_config.cloud_name,
        &cloud_config.org_name,
    )?;
    let certs = build_hierarchy(cloud_config, cloud_dir, cloud_password, org_password)?;

    if certs.root.generated {
        create_dir_tracked(guard, &paths.root_cert_dir)?;
        guard.track_all(store_root_files(&paths.root_cert_dir, &certs.root.pair)?);
    }
    if certs.org.generated {
        create_dir_tracked(guard, &paths.org_cert_dir)?;
        guard.track_all(store_org_files(
            &paths.org_cert_dir,
            &cloud_config.org_name,
            &certs.org.pair,
            &certs.root.pair.cert,
            Some(org_password),
        )?);
    }
    create_dir_tracked(guard, &paths.cloud_cert_dir)?;
    if certs.cloud.generated {
        guard.track_all(store_cloud_files(
            &paths.cloud_cert_dir,
            &cloud_config.cloud_name,
            &cloud_config.org_name,
            &certs.cloud.pair,
            &certs.org.pair.cert,
            &certs.root.pair.cert,
            Some(cloud_password),
        )?);
    }

    guard.track_all(store_sysop_files(
        &paths.cloud_cert_dir,
        &cloud_config.cloud_name,
        &certs.sysop,
        &certs.cloud.pair.cert,
        &certs.org.pair.cert,
        &certs.root.pair.cert,
        Some(cloud_password),
    )?);
    for (name, pair) in &certs.core_systems {
        guard.track_all(store_system_files(
            &paths.cloud_cert_dir,
            name,
            pair,
            &certs.cloud.pair.cert,
            &certs.org.pair.cert,
            &certs.root.pair.cert,
            Some(cloud_password),
        )?);
    }
    for (client_id, pair) in &certs.client_systems {
        guard.track_all(store_system_files(
            &paths.cloud_cert_dir,
            client_id,
            pair,
            &certs.cloud.pair.cert,
            &certs.org.pair.cert,
            &certs.root.pair.cert,
            Some(cloud_password),
        )?);
    }
    info!("created certificates");

    // Cloud-wide truststore, built from the stored cloud certificate.
    guard.track(store_truststore(
        runner,
        &paths.cloud_cert_dir,
        &certs.cloud.pair.cert,
        cloud_password,
    )?);

    // SQL staging: the init script itself, then its outputs on first run.
    let script_path = cloud_dir.join(INIT_SQL_SCRIPT);
    fs::write(&script_path, INIT_SQL_CONTENTS)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&script_path, fs::Permissions::from_mode(0o755))?;
    }
    guard.track(script_path);

    if !sql_initialized(cloud_dir) {
        let sql_dir = cloud_dir.join(SQL_DIR);
        let preexisting: HashSet<PathBuf> = if sql_dir.is_dir() {
            fs::read_dir(&sql_dir)?
                .collect::<std::io::Result<Vec<_>>>()?
                .into_iter()
                .map(|entry| entry.path())
                .collect()
        } else {
            guard.track_dir(sql_dir.clone());
            HashSet::new()
        };
        runner.run_sql_init(cloud_dir)?;
        if sql_dir.is_dir() {
            for entry in fs::read_dir(&sql_dir)? {
                let path = entry?.path();
                if !preexisting.contains(&path) {
                    guard.track(path);
                }
            }
        }
        info!("initialized SQL tables");
    }

    // The volume is deliberately not tracked for rollback: it may hold
    // data from a previous failed-then-retried install and is removed
    // only by uninstall.
    let volume = format!("mysql.{}", cloud_config.cloud_identifier());
    if !runner.volume_exists(&volume)? {
        runner.create_volume(&volume)?;
        info!(volume = %volume, "created container volume");
    }

    Ok(())
}

fn remove_dir_tolerant(dir: &Path) -> Result<()> {
    match fs::remove_dir_all(dir) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

fn remove_file_tolerant(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Remove everything an installation created for this cloud.
///
/// Uninstall has no rollback: its steps are destructive and
/// order-independent, and a failure may leave a partially-cleaned
/// directory. The organization- and root-tier directories are never
/// touched; sibling clouds may share them.
pub fn uninstall_cloud(
    cloud_dir: &Path,
    runner: &dyn ExternalRunner,
    registry: &mut dyn CloudRegistry,
    complete: bool,
    keep_sysop: bool,
) -> Result<()> {
    let config_path = cloud_dir.join(CLOUD_CONFIG_FILE_NAME);
    let mut cloud_config = load_cloud_config(&config_path)?;
    let cloud_identifier = cloud_config.cloud_identifier();

    let certs_dir = cloud_dir.join("certs");
    if keep_sysop {
        let crypto_dir = certs_dir.join("crypto");
        if crypto_dir.is_dir() {
            for entry in fs::read_dir(&crypto_dir)? {
                let path = entry?.path();
                let keep = path
                    .file_name()
                    .and_then(|name| name.to_str())
                    .map(|name| name.starts_with("sysop."))
                    .unwrap_or(false);
                if !keep {
                    remove_file_tolerant(&path)?;
                }
            }
        }
    } else {
        remove_dir_tolerant(&certs_dir)?;
    }
    remove_dir_tolerant(&cloud_dir.join(CORE_SYSTEM_CONFIG_DIR))?;
    remove_dir_tolerant(&cloud_dir.join(SQL_DIR))?;
    remove_file_tolerant(&cloud_dir.join(DOCKER_COMPOSE_FILE_NAME))?;
    remove_file_tolerant(&cloud_dir.join(INIT_SQL_SCRIPT))?;

    let volume = format!("mysql.{cloud_identifier}");
    match runner.volume_exists(&volume) {
        Ok(true) => {
            if let Err(e) = runner.remove_volume(&volume) {
                warn!(volume = %volume, error = %e, "could not remove container volume");
            }
        }
        Ok(false) => {}
        Err(e) => warn!(error = %e, "could not list container volumes"),
    }

    cloud_config.installed = false;
    store_cloud_config(&config_path, &cloud_config)?;

    if complete {
        registry.delete(&cloud_identifier)?;
    }

    info!(cloud = %cloud_identifier, "uninstallation complete");
    Ok(())
}
