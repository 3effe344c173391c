//! Registration of client systems in an existing cloud configuration.
//!
//! Client systems are appended to `cloud_config.yaml` before install;
//! the installation transaction materializes certificates for whatever
//! client systems exist at transaction time.

use std::collections::HashSet;
use std::path::Path;

use tracing::info;

use crate::configs::{load_cloud_config, store_cloud_config, SystemSpec};
use crate::error::{FerrowheadError, Result};
use crate::templates::nth_address;
use crate::validation::{validate_dns_label, validate_san};

/// First port probed when no explicit port is given or the given one is
/// already taken on the same address.
const CLIENT_PORT_RANGE: std::ops::Range<u16> = 5000..8000;

fn find_first_missing(taken: &[u16]) -> u16 {
    let taken: HashSet<u16> = taken.iter().copied().collect();
    CLIENT_PORT_RANGE
        .clone()
        .find(|candidate| !taken.contains(candidate))
        .unwrap_or(CLIENT_PORT_RANGE.end - 1)
}

/// Add one client system entry, returning its assigned id.
///
/// The address defaults to the subnet's first host address; the port is
/// auto-assigned from the client range when absent or colliding. Extra
/// SAN tokens are validated before anything is written.
pub fn add_client_system(
    config_file_path: &Path,
    system_name: &str,
    system_address: Option<&str>,
    system_port: Option<u16>,
    system_additional_addresses: Option<Vec<String>>,
) -> Result<String> {
    let mut cloud_config = load_cloud_config(config_file_path)?;

    validate_dns_label(system_name)?;
    if let Some(sans) = &system_additional_addresses {
        for san in sans {
            validate_san(san)?;
        }
    }

    let address = match system_address {
        Some(addr) => addr.to_string(),
        None => nth_address(&cloud_config.subnet, 1)?.to_string(),
    };

    let taken_ports: Vec<u16> = cloud_config
        .client_systems
        .values()
        .filter(|system| system.address == address)
        .map(|system| system.port)
        .collect();
    let port = match system_port {
        Some(port) if !taken_ports.contains(&port) => port,
        _ => find_first_missing(&taken_ports),
    };

    for system in cloud_config.client_systems.values() {
        if system.system_name == system_name && system.address == address && system.port == port {
            return Err(FerrowheadError::Validation(format!(
                "client system with name \"{system_name}\", address {address}, and port {port} already exists"
            )));
        }
    }

    let serial = cloud_config
        .client_systems
        .values()
        .filter(|system| system.system_name == system_name)
        .count();
    let id = format!("{system_name}-{serial:03}");

    cloud_config.client_systems.insert(
        id.clone(),
        SystemSpec {
            system_name: system_name.to_string(),
            address,
            port,
            domain: None,
            sans: system_additional_addresses,
        },
    );

    store_cloud_config(config_file_path, &cloud_config)?;
    info!(id = %id, "added client system");

    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::create::create_cloud_config;
    use crate::configs::{InMemoryRegistry, CLOUD_CONFIG_FILE_NAME};
    use tempfile::TempDir;

    fn fixture() -> (TempDir, std::path::PathBuf) {
        let dir = TempDir::new().unwrap();
        let cloud_dir = dir.path().join("test-org").join("test-cloud");
        let mut registry = InMemoryRegistry::default();
        create_cloud_config(
            &cloud_dir,
            "test-cloud",
            "test-org",
            true,
            "172.16.2.0/24",
            &[],
            &[],
            &mut registry,
        )
        .unwrap();
        let config_path = cloud_dir.join(CLOUD_CONFIG_FILE_NAME);
        (dir, config_path)
    }

    #[test]
    fn assigns_defaults_and_serial_ids() {
        let (_dir, config_path) = fixture();

        let first = add_client_system(&config_path, "sensor", None, None, None).unwrap();
        let second = add_client_system(&config_path, "sensor", None, None, None).unwrap();
        assert_eq!(first, "sensor-000");
        assert_eq!(second, "sensor-001");

        let config = load_cloud_config(&config_path).unwrap();
        let a = &config.client_systems["sensor-000"];
        let b = &config.client_systems["sensor-001"];
        assert_eq!(a.address, "172.16.2.1");
        assert_eq!(a.port, 5000);
        assert_eq!(b.port, 5001);
    }

    #[test]
    fn colliding_port_is_reassigned() {
        let (_dir, config_path) = fixture();

        add_client_system(&config_path, "sensor", Some("172.16.2.9"), Some(5000), None).unwrap();
        add_client_system(&config_path, "sensor", Some("172.16.2.9"), Some(5000), None).unwrap();

        let config = load_cloud_config(&config_path).unwrap();
        assert_eq!(config.client_systems["sensor-000"].port, 5000);
        assert_eq!(config.client_systems["sensor-001"].port, 5001);
    }

    #[test]
    fn rejects_bad_sans() {
        let (_dir, config_path) = fixture();

        let bad_san = add_client_system(
            &config_path,
            "gauge",
            None,
            None,
            Some(vec!["ips:1.2.3.4".to_string()]),
        );
        assert!(matches!(bad_san, Err(FerrowheadError::Validation(_))));
    }
}
