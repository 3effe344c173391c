//! Tier resolution and certificate hierarchy construction.
//!
//! Each CA tier (root, organization, cloud) is resolved independently:
//! the tier's PKCS#12 file exists and decrypts, and the loaded pair is
//! reused; the file does not exist, and a fresh tier is generated and
//! signed by its parent. A file that exists but cannot be decrypted
//! fails the whole run. Regeneration on a wrong password would silently
//! invalidate every certificate already trusting that tier, so the two
//! outcomes are never conflated.
//!
//! Existence is checked at file granularity for all three tiers; this
//! lets several clouds share one organization CA and several
//! organizations share one root CA, and lets a cloud be re-provisioned
//! without disturbing its siblings.

use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use tracing::{debug, info};

use crate::cert_store::{load_p12, ROOT_P12_PASSWORD};
use crate::configs::CloudConfig;
use crate::error::{FerrowheadError, Result};
use crate::generate_ca_cert::generate_ca_cert;
use crate::generate_root_ca::generate_root_certificate;
use crate::generate_system_cert::generate_system_cert;
use crate::keycert::KeyCertPair;

/// Directory names of the shared tiers under an organization directory.
pub const ROOT_CERT_DIR: &str = "root-certs";
pub const ORG_CERT_DIR: &str = "org-certs";

/// How one tier will be materialized, decided purely from file existence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TierAction {
    Generate,
    Reuse,
}

/// Decide whether a tier is generated fresh or reused from disk.
pub fn resolve_tier(p12_path: &Path) -> TierAction {
    if p12_path.is_file() {
        TierAction::Reuse
    } else {
        TierAction::Generate
    }
}

/// Crypto directories and tier bundle paths for one cloud.
pub struct CertificatePaths {
    pub root_cert_dir: PathBuf,
    pub org_cert_dir: PathBuf,
    pub cloud_cert_dir: PathBuf,
    pub root_p12: PathBuf,
    pub org_p12: PathBuf,
    pub cloud_p12: PathBuf,
}

impl CertificatePaths {
    pub fn new(cloud_dir: &Path, cloud_name: &str, org_name: &str) -> Result<Self> {
        let org_dir = cloud_dir.parent().ok_or_else(|| {
            FerrowheadError::Validation(format!(
                "cloud directory {} has no parent organization directory",
                cloud_dir.display()
            ))
        })?;
        let root_cert_dir = org_dir.join(ROOT_CERT_DIR).join("crypto");
        let org_cert_dir = org_dir.join(ORG_CERT_DIR).join("crypto");
        let cloud_cert_dir = cloud_dir.join("certs").join("crypto");
        Ok(Self {
            root_p12: root_cert_dir.join("root.p12"),
            org_p12: org_cert_dir.join(format!("{org_name}.p12")),
            cloud_p12: cloud_cert_dir.join(format!("{cloud_name}.p12")),
            root_cert_dir,
            org_cert_dir,
            cloud_cert_dir,
        })
    }
}

/// A resolved tier: the pair itself plus whether it was generated in this
/// run (and therefore still needs to be stored).
pub struct TierOutcome {
    pub pair: KeyCertPair,
    pub generated: bool,
}

/// Everything the hierarchy builder produces for one installation.
pub struct CloudCertificates {
    pub root: TierOutcome,
    pub org: TierOutcome,
    pub cloud: TierOutcome,
    pub sysop: KeyCertPair,
    /// Keyed by the core-system map key, which is also the file basename.
    pub core_systems: IndexMap<String, KeyCertPair>,
    pub client_systems: IndexMap<String, KeyCertPair>,
}

fn resolve_root(paths: &CertificatePaths) -> Result<TierOutcome> {
    match resolve_tier(&paths.root_p12) {
        TierAction::Reuse => {
            debug!(path = %paths.root_p12.display(), "reusing root certificate");
            let (pair, _) = load_p12(&paths.root_p12, ROOT_P12_PASSWORD)?;
            Ok(TierOutcome {
                pair,
                generated: false,
            })
        }
        TierAction::Generate => {
            info!("generating root certificate");
            Ok(TierOutcome {
                pair: generate_root_certificate()?,
                generated: true,
            })
        }
    }
}

fn resolve_org(
    paths: &CertificatePaths,
    org_name: &str,
    root: &KeyCertPair,
    org_password: &str,
) -> Result<TierOutcome> {
    match resolve_tier(&paths.org_p12) {
        TierAction::Reuse => {
            debug!(path = %paths.org_p12.display(), "reusing organization certificate");
            let (pair, cas) = load_p12(&paths.org_p12, org_password)?;
            if cas.len() != 1 {
                return Err(FerrowheadError::CertificateLoad {
                    path: paths.org_p12.clone(),
                    reason: format!(
                        "organization certificate can only have one CA, currently has {}",
                        cas.len()
                    ),
                });
            }
            Ok(TierOutcome {
                pair,
                generated: false,
            })
        }
        TierAction::Generate => {
            info!(org = org_name, "generating organization certificate");
            let pair = generate_ca_cert(&format!("{org_name}.arrowhead.eu"), None, root)?;
            Ok(TierOutcome {
                pair,
                generated: true,
            })
        }
    }
}

fn resolve_cloud(
    paths: &CertificatePaths,
    cloud_name: &str,
    org_name: &str,
    org: &KeyCertPair,
    cloud_password: &str,
) -> Result<TierOutcome> {
    match resolve_tier(&paths.cloud_p12) {
        TierAction::Reuse => {
            debug!(path = %paths.cloud_p12.display(), "reusing cloud certificate");
            let (pair, cas) = load_p12(&paths.cloud_p12, cloud_password)?;
            if cas.len() != 2 {
                return Err(FerrowheadError::CertificateLoad {
                    path: paths.cloud_p12.clone(),
                    reason: format!(
                        "cloud certificate must have exactly two CAs, currently has {}",
                        cas.len()
                    ),
                });
            }
            Ok(TierOutcome {
                pair,
                generated: false,
            })
        }
        TierAction::Generate => {
            info!(cloud = cloud_name, "generating cloud certificate");
            let pair = generate_ca_cert(
                &format!("{cloud_name}.{org_name}.arrowhead.eu"),
                Some(2),
                org,
            )?;
            Ok(TierOutcome {
                pair,
                generated: true,
            })
        }
    }
}

/// Resolve all three CA tiers, then issue the sysop and system leaves.
///
/// Core-system leaves and the sysop leaf are signed by the cloud tier;
/// client-system leaves are signed by the organization tier, since client
/// systems are trusted org-wide and may later move between clouds.
pub fn build_hierarchy(
    cloud_config: &CloudConfig,
    cloud_dir: &Path,
    cloud_password: &str,
    org_password: &str,
) -> Result<CloudCertificates> {
    let cloud_name = &cloud_config.cloud_name;
    let org_name = &cloud_config.org_name;
    let paths = CertificatePaths::new(cloud_dir, cloud_name, org_name)?;

    let root = resolve_root(&paths)?;
    let org = resolve_org(&paths, org_name, &root.pair, org_password)?;
    let cloud = resolve_cloud(&paths, cloud_name, org_name, &org.pair, cloud_password)?;

    let sysop = generate_system_cert(
        &format!("sysop.{cloud_name}.{org_name}.arrowhead.eu"),
        None,
        None,
        &cloud.pair,
    )?;

    let mut core_systems = IndexMap::new();
    for (name, system) in &cloud_config.core_systems {
        let domain = system.domain.as_deref().ok_or_else(|| {
            FerrowheadError::Validation(format!("core system '{name}' has no domain"))
        })?;
        let pair = generate_system_cert(
            &format!("{domain}.{cloud_name}.{org_name}.arrowhead.eu"),
            Some(&system.address),
            Some(&cloud_config.core_san),
            &cloud.pair,
        )?;
        core_systems.insert(name.clone(), pair);
    }

    let mut client_systems = IndexMap::new();
    for (client_id, system) in &cloud_config.client_systems {
        let pair = generate_system_cert(
            &format!("{}.{cloud_name}.{org_name}.arrowhead.eu", system.system_name),
            Some(&system.address),
            system.sans.as_deref(),
            &org.pair,
        )?;
        client_systems.insert(client_id.clone(), pair);
    }

    info!(
        core = core_systems.len(),
        clients = client_systems.len(),
        "issued system certificates"
    );

    Ok(CloudCertificates {
        root,
        org,
        cloud,
        sysop,
        core_systems,
        client_systems,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cert_store::{store_org_files, store_root_files};
    use crate::configs::SystemSpec;
    use tempfile::TempDir;

    fn test_config() -> CloudConfig {
        let mut core_systems = IndexMap::new();
        core_systems.insert(
            "service_registry".to_string(),
            SystemSpec {
                system_name: "service_registry".to_string(),
                address: "172.16.2.3".to_string(),
                port: 8443,
                domain: Some("serviceregistry".to_string()),
                sans: None,
            },
        );
        let mut client_systems = IndexMap::new();
        client_systems.insert(
            "sensor-001".to_string(),
            SystemSpec {
                system_name: "sensor".to_string(),
                address: "172.16.2.1".to_string(),
                port: 5000,
                domain: None,
                sans: Some(vec!["dns:sensor.local".to_string()]),
            },
        );
        CloudConfig {
            cloud_name: "test-cloud".to_string(),
            org_name: "test-org".to_string(),
            ssl_enabled: true,
            subnet: "172.16.2.0/24".to_string(),
            core_san: vec!["ip:127.0.0.1".to_string()],
            installed: false,
            client_systems,
            core_systems,
        }
    }

    fn issuer_cn(cert: &openssl::x509::X509) -> String {
        cert.issuer_name()
            .entries_by_nid(openssl::nid::Nid::COMMONNAME)
            .next()
            .unwrap()
            .data()
            .as_utf8()
            .unwrap()
            .to_string()
    }

    #[test]
    fn resolve_tier_is_file_granular() {
        let dir = TempDir::new().unwrap();
        let p12 = dir.path().join("cloud.p12");
        assert_eq!(resolve_tier(&p12), TierAction::Generate);
        std::fs::write(&p12, b"not checked here").unwrap();
        assert_eq!(resolve_tier(&p12), TierAction::Reuse);
    }

    #[test]
    fn fresh_hierarchy_generates_all_tiers() {
        let dir = TempDir::new().unwrap();
        let cloud_dir = dir.path().join("test-org").join("test-cloud");
        std::fs::create_dir_all(&cloud_dir).unwrap();

        let certs = build_hierarchy(&test_config(), &cloud_dir, "cpw", "opw").unwrap();
        assert!(certs.root.generated);
        assert!(certs.org.generated);
        assert!(certs.cloud.generated);

        // Chain: leaf issuer == cloud subject, cloud issuer == org subject,
        // org issuer == root subject, root self-signed; signatures verify
        // transitively up to the root.
        let sr = &certs.core_systems["service_registry"];
        assert_eq!(issuer_cn(&sr.cert), "test-cloud.test-org.arrowhead.eu");
        assert!(sr
            .cert
            .verify(&certs.cloud.pair.cert.public_key().unwrap())
            .unwrap());
        assert_eq!(
            issuer_cn(&certs.cloud.pair.cert),
            "test-org.arrowhead.eu"
        );
        assert!(certs
            .cloud
            .pair
            .cert
            .verify(&certs.org.pair.cert.public_key().unwrap())
            .unwrap());
        assert_eq!(issuer_cn(&certs.org.pair.cert), "arrowhead.eu");
        assert!(certs
            .org
            .pair
            .cert
            .verify(&certs.root.pair.cert.public_key().unwrap())
            .unwrap());

        // Client systems chain to the organization, not the cloud.
        let client = &certs.client_systems["sensor-001"];
        assert_eq!(issuer_cn(&client.cert), "test-org.arrowhead.eu");
        assert!(client
            .cert
            .verify(&certs.org.pair.cert.public_key().unwrap())
            .unwrap());
    }

    #[test]
    fn existing_tiers_are_reused_byte_identically() {
        let dir = TempDir::new().unwrap();
        let cloud_dir = dir.path().join("test-org").join("test-cloud");
        std::fs::create_dir_all(&cloud_dir).unwrap();
        let config = test_config();

        let first = build_hierarchy(&config, &cloud_dir, "cpw", "opw").unwrap();
        let paths = CertificatePaths::new(&cloud_dir, "test-cloud", "test-org").unwrap();
        std::fs::create_dir_all(&paths.root_cert_dir).unwrap();
        std::fs::create_dir_all(&paths.org_cert_dir).unwrap();
        store_root_files(&paths.root_cert_dir, &first.root.pair).unwrap();
        store_org_files(
            &paths.org_cert_dir,
            "test-org",
            &first.org.pair,
            &first.root.pair.cert,
            Some("opw"),
        )
        .unwrap();

        let second = build_hierarchy(&config, &cloud_dir, "cpw", "opw").unwrap();
        assert!(!second.root.generated);
        assert!(!second.org.generated);
        assert!(second.cloud.generated);
        assert_eq!(
            first.root.pair.cert.to_der().unwrap(),
            second.root.pair.cert.to_der().unwrap()
        );
        assert_eq!(
            first.org.pair.cert.to_der().unwrap(),
            second.org.pair.cert.to_der().unwrap()
        );
        // Leaf tiers are regenerated: the cloud certificate differs.
        assert_ne!(
            first.cloud.pair.cert.to_der().unwrap(),
            second.cloud.pair.cert.to_der().unwrap()
        );
    }

    #[test]
    fn wrong_org_password_is_fatal() {
        let dir = TempDir::new().unwrap();
        let cloud_dir = dir.path().join("test-org").join("test-cloud");
        std::fs::create_dir_all(&cloud_dir).unwrap();
        let config = test_config();

        let first = build_hierarchy(&config, &cloud_dir, "cpw", "opw").unwrap();
        let paths = CertificatePaths::new(&cloud_dir, "test-cloud", "test-org").unwrap();
        std::fs::create_dir_all(&paths.org_cert_dir).unwrap();
        store_org_files(
            &paths.org_cert_dir,
            "test-org",
            &first.org.pair,
            &first.root.pair.cert,
            Some("opw"),
        )
        .unwrap();

        let result = build_hierarchy(&config, &cloud_dir, "cpw", "wrong");
        assert!(matches!(
            result,
            Err(FerrowheadError::CertificateLoad { .. })
        ));
    }
}
