//! Creation of a new cloud configuration.
//!
//! `cloud create` materializes a `cloud_config.yaml` with the selected
//! core system set and registers the cloud directory. Nothing is signed
//! or rendered here; that happens at install time.

use std::fs;
use std::path::Path;

use clap::ValueEnum;
use indexmap::IndexMap;
use tracing::info;

use crate::configs::{
    store_cloud_config, CloudConfig, CloudRegistry, SystemSpec, CLOUD_CONFIG_FILE_NAME,
};
use crate::error::{FerrowheadError, Result};
use crate::templates::nth_address;
use crate::validation::{validate_dns_label, validate_san};

/// Optional core system groups beyond the mandatory three.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CloudConfiguration {
    Intercloud,
    Eventhandler,
    Onboarding,
}

fn core_system(name: &str, domain: &str, port: u16, address: Option<String>) -> SystemSpec {
    SystemSpec {
        system_name: name.to_string(),
        address: address.unwrap_or_default(),
        port,
        domain: Some(domain.to_string()),
        sans: None,
    }
}

/// Build and persist the configuration for a new local cloud.
///
/// Core systems are assigned consecutive subnet addresses starting at
/// index 3 (indices 0-2 are reserved for the network, the client
/// default, and the database).
pub fn create_cloud_config(
    target_directory: &Path,
    cloud_name: &str,
    org_name: &str,
    ssl_enabled: bool,
    ip_subnet: &str,
    core_san: &[String],
    include: &[CloudConfiguration],
    registry: &mut dyn CloudRegistry,
) -> Result<()> {
    validate_dns_label(cloud_name)
        .map_err(|_| FerrowheadError::Validation("CLOUD_NAME must be a valid DNS string".into()))?;
    validate_dns_label(org_name)
        .map_err(|_| FerrowheadError::Validation("ORG_NAME must be a valid DNS string".into()))?;
    for san in core_san {
        validate_san(san)?;
    }
    // Fails early on a malformed subnet.
    nth_address(ip_subnet, 0)?;

    let mut core_systems = IndexMap::new();
    core_systems.insert(
        "service_registry".to_string(),
        core_system(
            "service_registry",
            "serviceregistry",
            8443,
            Some(nth_address(ip_subnet, 3)?.to_string()),
        ),
    );
    core_systems.insert(
        "orchestrator".to_string(),
        core_system(
            "orchestrator",
            "orchestrator",
            8441,
            Some(nth_address(ip_subnet, 4)?.to_string()),
        ),
    );
    core_systems.insert(
        "authorization".to_string(),
        core_system(
            "authorization",
            "authorization",
            8445,
            Some(nth_address(ip_subnet, 5)?.to_string()),
        ),
    );

    let mut next_address = 6;
    let mut add = |core_systems: &mut IndexMap<String, SystemSpec>,
                   name: &str,
                   domain: &str,
                   port: u16|
     -> Result<()> {
        let spec = core_system(
            name,
            domain,
            port,
            Some(nth_address(ip_subnet, next_address)?.to_string()),
        );
        core_systems.insert(name.to_string(), spec);
        next_address += 1;
        Ok(())
    };

    if include.contains(&CloudConfiguration::Eventhandler) {
        add(&mut core_systems, "event_handler", "eventhandler", 8455)?;
    }
    if include.contains(&CloudConfiguration::Intercloud) {
        add(&mut core_systems, "gateway", "gateway", 8453)?;
        add(&mut core_systems, "gatekeeper", "gatekeeper", 8449)?;
    }
    if include.contains(&CloudConfiguration::Onboarding) {
        add(&mut core_systems, "system_registry", "systemregistry", 8437)?;
        add(&mut core_systems, "device_registry", "deviceregistry", 8439)?;
        add(
            &mut core_systems,
            "certificate_authority",
            "certificate-authority",
            8448,
        )?;
        add(
            &mut core_systems,
            "onboarding_controller",
            "onboarding-controller",
            8435,
        )?;
    }

    let cloud_config = CloudConfig {
        cloud_name: cloud_name.to_string(),
        org_name: org_name.to_string(),
        ssl_enabled,
        subnet: ip_subnet.to_string(),
        core_san: core_san.to_vec(),
        installed: false,
        client_systems: IndexMap::new(),
        core_systems,
    };

    fs::create_dir_all(target_directory)?;
    store_cloud_config(
        &target_directory.join(CLOUD_CONFIG_FILE_NAME),
        &cloud_config,
    )?;
    registry.set(&cloud_config.cloud_identifier(), target_directory)?;

    info!(
        cloud = %cloud_config.cloud_identifier(),
        directory = %target_directory.display(),
        "created cloud configuration"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::configs::{load_cloud_config, InMemoryRegistry};
    use tempfile::TempDir;

    #[test]
    fn creates_registered_valid_config() {
        let dir = TempDir::new().unwrap();
        let cloud_dir = dir.path().join("test-org").join("test-cloud");
        let mut registry = InMemoryRegistry::default();

        create_cloud_config(
            &cloud_dir,
            "test-cloud",
            "test-org",
            true,
            "172.16.2.0/24",
            &["ip:127.0.0.1".to_string()],
            &[CloudConfiguration::Eventhandler],
            &mut registry,
        )
        .unwrap();

        let config = load_cloud_config(&cloud_dir.join(CLOUD_CONFIG_FILE_NAME)).unwrap();
        assert!(!config.installed);
        assert_eq!(config.core_systems.len(), 4);
        assert_eq!(
            config.core_systems["service_registry"].address,
            "172.16.2.3"
        );
        assert_eq!(config.core_systems["event_handler"].address, "172.16.2.6");
        assert_eq!(registry.get("test-cloud.test-org"), Some(cloud_dir));
    }

    #[test]
    fn rejects_invalid_names() {
        let dir = TempDir::new().unwrap();
        let mut registry = InMemoryRegistry::default();
        let result = create_cloud_config(
            dir.path(),
            "bad_cloud",
            "test-org",
            true,
            "172.16.2.0/24",
            &[],
            &[],
            &mut registry,
        );
        assert!(matches!(result, Err(FerrowheadError::Validation(_))));
    }
}
