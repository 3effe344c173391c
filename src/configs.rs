//! Cloud configuration and the registry of installed clouds.
//!
//! `cloud_config.yaml` is the persisted unit of truth for one local
//! cloud. Its top-level shape is a contract shared with the property and
//! compose renderers: exactly the keys of [`CloudConfig`] are valid, and
//! a file missing or adding a key is rejected before any component runs.
//! The `installed` flag is the single durable signal that the on-disk
//! artifacts are expected to exist; it flips to `true` only at the end of
//! a fully successful installation transaction.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::{FerrowheadError, Result};
use crate::validation::{validate_dns_label, validate_san};

pub const CLOUD_CONFIG_FILE_NAME: &str = "cloud_config.yaml";

/// One core or client system entry. Core systems carry a `domain` (the
/// certificate/host name component); client systems may carry extra SANs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SystemSpec {
    pub system_name: String,
    pub address: String,
    pub port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sans: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CloudConfig {
    pub cloud_name: String,
    pub org_name: String,
    pub ssl_enabled: bool,
    pub subnet: String,
    pub core_san: Vec<String>,
    pub installed: bool,
    pub client_systems: IndexMap<String, SystemSpec>,
    pub core_systems: IndexMap<String, SystemSpec>,
}

/// Wrapper matching the file's single top-level `cloud` key.
#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct CloudConfigFile {
    cloud: CloudConfig,
}

impl CloudConfig {
    /// Identifier string `{cloud_name}.{org_name}` used for registry
    /// entries, container names, and the mysql volume.
    pub fn cloud_identifier(&self) -> String {
        format!("{}.{}", self.cloud_name, self.org_name)
    }

    /// Semantic checks beyond the serde shape: names are DNS labels, the
    /// subnet parses, every SAN token is well-formed, and every core
    /// system has a domain.
    pub fn validate(&self) -> Result<()> {
        validate_dns_label(&self.cloud_name)?;
        validate_dns_label(&self.org_name)?;
        self.subnet.parse::<ipnet::Ipv4Net>().map_err(|_| {
            FerrowheadError::Validation(format!("invalid ip network '{}'", self.subnet))
        })?;
        for san in &self.core_san {
            validate_san(san)?;
        }
        for (name, system) in &self.core_systems {
            if system.domain.is_none() {
                return Err(FerrowheadError::Validation(format!(
                    "core system '{name}' has no domain"
                )));
            }
        }
        for system in self.client_systems.values() {
            for san in system.sans.as_deref().unwrap_or_default() {
                validate_san(san)?;
            }
        }
        Ok(())
    }
}

/// Load and validate a cloud configuration file.
///
/// A missing file, a missing or unknown key, or a semantic violation is
/// a validation error raised before any side effect.
pub fn load_cloud_config(config_file_path: &Path) -> Result<CloudConfig> {
    if !config_file_path.is_file() {
        return Err(FerrowheadError::Validation(format!(
            "no cloud configuration at {}; run `ferrowhead cloud create` before installing",
            config_file_path.display()
        )));
    }

    let contents = fs::read_to_string(config_file_path)?;
    let parsed: CloudConfigFile = serde_yaml::from_str(&contents).map_err(|e| {
        FerrowheadError::Validation(format!("malformed cloud configuration file: {e}"))
    })?;
    parsed.cloud.validate()?;

    Ok(parsed.cloud)
}

/// Persist a cloud configuration, preserving the `cloud:` wrapper.
pub fn store_cloud_config(config_file_path: &Path, cloud_config: &CloudConfig) -> Result<()> {
    let rendered = serde_yaml::to_string(&CloudConfigFile {
        cloud: cloud_config.clone(),
    })?;
    fs::write(config_file_path, rendered)?;
    Ok(())
}

/// Mapping from cloud identifier (`{cloud}.{org}`) to its directory.
///
/// Injected into the commands that need it so they can be tested against
/// [`InMemoryRegistry`] instead of a file on disk.
pub trait CloudRegistry {
    fn get(&self, cloud_identifier: &str) -> Option<PathBuf>;
    fn set(&mut self, cloud_identifier: &str, directory: &Path) -> Result<()>;
    fn delete(&mut self, cloud_identifier: &str) -> Result<()>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct RegistryFile {
    #[serde(rename = "local-clouds", default)]
    local_clouds: BTreeMap<String, PathBuf>,
}

/// TOML-file-backed registry, persisted on every mutation.
pub struct FileRegistry {
    path: PathBuf,
    clouds: BTreeMap<String, PathBuf>,
}

impl FileRegistry {
    pub fn open(path: PathBuf) -> Result<Self> {
        let clouds = if path.is_file() {
            let contents = fs::read_to_string(&path)?;
            let file: RegistryFile = toml::from_str(&contents)
                .map_err(|e| FerrowheadError::Registry(format!("malformed registry: {e}")))?;
            file.local_clouds
        } else {
            BTreeMap::new()
        };
        Ok(Self { path, clouds })
    }

    fn persist(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = RegistryFile {
            local_clouds: self.clouds.clone(),
        };
        let rendered = toml::to_string_pretty(&file)
            .map_err(|e| FerrowheadError::Registry(e.to_string()))?;
        fs::write(&self.path, rendered)?;
        Ok(())
    }
}

impl CloudRegistry for FileRegistry {
    fn get(&self, cloud_identifier: &str) -> Option<PathBuf> {
        self.clouds.get(cloud_identifier).cloned()
    }

    fn set(&mut self, cloud_identifier: &str, directory: &Path) -> Result<()> {
        self.clouds
            .insert(cloud_identifier.to_string(), directory.to_path_buf());
        self.persist()
    }

    fn delete(&mut self, cloud_identifier: &str) -> Result<()> {
        self.clouds.remove(cloud_identifier);
        self.persist()
    }
}

/// Registry kept entirely in memory, for tests.
#[derive(Default)]
pub struct InMemoryRegistry {
    clouds: BTreeMap<String, PathBuf>,
}

impl CloudRegistry for InMemoryRegistry {
    fn get(&self, cloud_identifier: &str) -> Option<PathBuf> {
        self.clouds.get(cloud_identifier).cloned()
    }

    fn set(&mut self, cloud_identifier: &str, directory: &Path) -> Result<()> {
        self.clouds
            .insert(cloud_identifier.to_string(), directory.to_path_buf());
        Ok(())
    }

    fn delete(&mut self, cloud_identifier: &str) -> Result<()> {
        self.clouds.remove(cloud_identifier);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const VALID_CONFIG: &str = r#"
cloud:
  cloud_name: test-cloud
  org_name: test-org
  ssl_enabled: true
  subnet: 172.16.2.0/24
  core_san:
  - ip:127.0.0.1
  installed: false
  client_systems: {}
  core_systems:
    service_registry:
      system_name: service_registry
      address: 172.16.2.3
      port: 8443
      domain: serviceregistry
"#;

    fn write_config(dir: &TempDir, contents: &str) -> PathBuf {
        let path = dir.path().join(CLOUD_CONFIG_FILE_NAME);
        fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn valid_config_round_trips() {
        let dir = TempDir::new().unwrap();
        let path = write_config(&dir, VALID_CONFIG);

        let config = load_cloud_config(&path).unwrap();
        assert_eq!(config.cloud_identifier(), "test-cloud.test-org");
        assert_eq!(config.core_systems.len(), 1);

        store_cloud_config(&path, &config).unwrap();
        let reloaded = load_cloud_config(&path).unwrap();
        assert_eq!(reloaded.subnet, config.subnet);
    }

    #[test]
    fn missing_file_is_validation_error() {
        let dir = TempDir::new().unwrap();
        let result = load_cloud_config(&dir.path().join(CLOUD_CONFIG_FILE_NAME));
        assert!(matches!(result, Err(FerrowheadError::Validation(_))));
    }

    #[test]
    fn missing_key_is_rejected() {
        let dir = TempDir::new().unwrap();
        let without_subnet = VALID_CONFIG.replace("  subnet: 172.16.2.0/24\n", "");
        let path = write_config(&dir, &without_subnet);
        assert!(matches!(
            load_cloud_config(&path),
            Err(FerrowheadError::Validation(_))
        ));
    }

    #[test]
    fn extra_key_is_rejected() {
        let dir = TempDir::new().unwrap();
        let with_extra = format!("{VALID_CONFIG}  surprise: true\n");
        let path = write_config(&dir, &with_extra);
        assert!(matches!(
            load_cloud_config(&path),
            Err(FerrowheadError::Validation(_))
        ));
    }

    #[test]
    fn malformed_core_san_is_rejected() {
        let dir = TempDir::new().unwrap();
        let bad_san = VALID_CONFIG.replace("ip:127.0.0.1", "ips:127.0.0.1");
        let path = write_config(&dir, &bad_san);
        assert!(matches!(
            load_cloud_config(&path),
            Err(FerrowheadError::Validation(_))
        ));
    }

    #[test]
    fn file_registry_persists_entries() {
        let dir = TempDir::new().unwrap();
        let registry_path = dir.path().join("clouds.toml");
        {
            let mut registry = FileRegistry::open(registry_path.clone()).unwrap();
            registry
                .set("alpha.example", &dir.path().join("example/alpha"))
                .unwrap();
        }
        let registry = FileRegistry::open(registry_path).unwrap();
        assert_eq!(
            registry.get("alpha.example"),
            Some(dir.path().join("example/alpha"))
        );
        assert_eq!(registry.get("missing.example"), None);
    }
}
