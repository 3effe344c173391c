//! Rendering of core-system property files and the compose file.
//!
//! The property keys and the compose service definitions are external
//! contracts consumed by the containerized core systems; the file paths
//! and names they reference must match the certificate store's layout
//! exactly (`certs/crypto/{system}.p12`, `certs/crypto/truststore.p12`,
//! `core_system_config/{system}.properties`).

use std::fmt::Write as _;
use std::fs;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use ipnet::Ipv4Net;
use serde::Serialize;
use tracing::info;

use crate::configs::CloudConfig;
use crate::error::{FerrowheadError, Result};

pub const CORE_SYSTEM_CONFIG_DIR: &str = "core_system_config";
pub const DOCKER_COMPOSE_FILE_NAME: &str = "docker-compose.yml";

/// Database password assigned to a core system's schema user.
pub fn db_password(system_name: &str) -> &'static str {
    match system_name {
        "service_registry" => "ZzNNpxrbZGVvfJ8G",
        "orchestrator" => "KbgD2mTr8DQ4vtc8",
        "authorization" => "hqZFUkuHxhekfqCs",
        "event_handler" => "gRLjXbqu9YwYhfK8",
        "gateway" => "LfjdMDuGwESzbuT9",
        "gatekeeper" => "fbJNszcvNVh8XVLz",
        "system_registry" => "AuFHeXRkwZXur2cT",
        "device_registry" => "cpYhqCeWzF2vRNwG",
        "certificate_authority" => "mUv6PTbeQm7GcJXM",
        "onboarding_controller" => "ByhW9kFcQd4Vd5nq",
        _ => "DefaultDbPassword",
    }
}

pub(crate) fn nth_address(subnet: &str, index: u32) -> Result<Ipv4Addr> {
    let net: Ipv4Net = subnet
        .parse()
        .map_err(|_| FerrowheadError::Validation(format!("invalid ip network '{subnet}'")))?;
    Ok(Ipv4Addr::from(u32::from(net.network()) + index))
}

/// Render one `.properties` file per core system into
/// `core_system_config/`, returning every path written.
pub fn generate_config_files(
    cloud_config: &CloudConfig,
    cloud_dir: &Path,
    cert_password: &str,
) -> Result<Vec<PathBuf>> {
    let cloud_name = &cloud_config.cloud_name;
    let org_name = &cloud_config.org_name;
    let cloud_identifier = cloud_config.cloud_identifier();

    let sr = cloud_config.core_systems.get("service_registry").ok_or_else(|| {
        FerrowheadError::Validation("cloud configuration has no service_registry".into())
    })?;
    let sr_address = sr.address.clone();
    let sr_port = sr.port;

    let config_dir = cloud_dir.join(CORE_SYSTEM_CONFIG_DIR);
    fs::create_dir_all(&config_dir)?;

    let mut written = Vec::new();
    for (system, spec) in &cloud_config.core_systems {
        let domain = spec.domain.as_deref().ok_or_else(|| {
            FerrowheadError::Validation(format!("core system '{system}' has no domain"))
        })?;
        let system_cn = format!("{domain}.{cloud_name}.{org_name}.arrowhead.eu");

        let mut properties = String::new();
        let _ = writeln!(properties, "############################################");
        let _ = writeln!(properties, "###       APPLICATION PARAMETERS        ###");
        let _ = writeln!(properties, "############################################");
        let _ = writeln!(properties);
        let _ = writeln!(
            properties,
            "spring.datasource.url=jdbc:mysql://mysql.{cloud_identifier}:3306/arrowhead?serverTimezone=Europe/Budapest"
        );
        let _ = writeln!(properties, "spring.datasource.username={system}");
        let _ = writeln!(
            properties,
            "spring.datasource.password={}",
            db_password(system)
        );
        let _ = writeln!(
            properties,
            "spring.datasource.driver-class-name=com.mysql.cj.jdbc.Driver"
        );
        let _ = writeln!(properties);
        let _ = writeln!(properties, "server.address={}", spec.address);
        let _ = writeln!(properties, "server.port={}", spec.port);
        let _ = writeln!(properties, "domain.name={}", spec.address);
        let _ = writeln!(properties, "domain.port={}", spec.port);
        let _ = writeln!(properties);
        let _ = writeln!(properties, "sr_address={sr_address}");
        let _ = writeln!(properties, "sr_port={sr_port}");
        let _ = writeln!(properties);
        let _ = writeln!(properties, "############################################");
        let _ = writeln!(properties, "###           SECURE MODE               ###");
        let _ = writeln!(properties, "############################################");
        let _ = writeln!(properties);
        let _ = writeln!(properties, "server.ssl.enabled={}", cloud_config.ssl_enabled);
        let _ = writeln!(properties, "server.ssl.key-store-type=PKCS12");
        let _ = writeln!(properties, "server.ssl.key-store=file:{system}.p12");
        let _ = writeln!(properties, "server.ssl.key-store-password={cert_password}");
        let _ = writeln!(properties, "server.ssl.key-alias={system_cn}");
        let _ = writeln!(properties, "server.ssl.key-password={cert_password}");
        let _ = writeln!(properties, "server.ssl.client-auth=need");
        let _ = writeln!(properties, "server.ssl.trust-store-type=PKCS12");
        let _ = writeln!(properties, "server.ssl.trust-store=file:truststore.p12");
        let _ = writeln!(properties, "server.ssl.trust-store-password={cert_password}");
        let _ = writeln!(
            properties,
            "disable.hostname.verifier={}",
            !cloud_config.ssl_enabled
        );

        let path = config_dir.join(format!("{system}.properties"));
        fs::write(&path, properties)?;
        written.push(path);
    }

    info!(count = written.len(), "generated core system configuration files");
    Ok(written)
}

#[derive(Serialize)]
struct ComposeDocument {
    version: String,
    services: IndexMap<String, ComposeService>,
    volumes: IndexMap<String, ComposeVolume>,
    networks: IndexMap<String, ComposeNetwork>,
}

#[derive(Serialize)]
struct ComposeService {
    container_name: String,
    image: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    environment: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    depends_on: Vec<String>,
    volumes: Vec<String>,
    networks: IndexMap<String, ComposeServiceNetwork>,
    ports: Vec<String>,
}

#[derive(Serialize)]
struct ComposeServiceNetwork {
    ipv4_address: String,
}

#[derive(Serialize)]
struct ComposeVolume {
    external: bool,
}

#[derive(Serialize)]
struct ComposeNetwork {
    ipam: ComposeIpam,
}

#[derive(Serialize)]
struct ComposeIpam {
    config: Vec<ComposeIpamConfig>,
}

#[derive(Serialize)]
struct ComposeIpamConfig {
    subnet: String,
}

/// Render `docker-compose.yml`: the mysql service on the subnet's second
/// host address plus one service per core system mounting its PKCS#12
/// bundle and the shared truststore.
pub fn generate_compose_file(
    cloud_config: &CloudConfig,
    cloud_dir: &Path,
    password: &str,
) -> Result<PathBuf> {
    let cloud_identifier = cloud_config.cloud_identifier();
    let mysql_name = format!("mysql.{cloud_identifier}");

    let mut services = IndexMap::new();
    let mut mysql_networks = IndexMap::new();
    mysql_networks.insert(
        cloud_identifier.clone(),
        ComposeServiceNetwork {
            ipv4_address: nth_address(&cloud_config.subnet, 2)?.to_string(),
        },
    );
    services.insert(
        mysql_name.clone(),
        ComposeService {
            container_name: mysql_name.clone(),
            image: "mysql:5.7".to_string(),
            environment: vec![format!("MYSQL_ROOT_PASSWORD={password}")],
            depends_on: Vec::new(),
            volumes: vec![
                format!("{mysql_name}:/var/lib/mysql"),
                "./sql:/docker-entrypoint-initdb.d/".to_string(),
            ],
            networks: mysql_networks,
            ports: vec!["3306:3306".to_string()],
        },
    );

    for (system, spec) in &cloud_config.core_systems {
        let domain = spec.domain.as_deref().ok_or_else(|| {
            FerrowheadError::Validation(format!("core system '{system}' has no domain"))
        })?;
        let mut networks = IndexMap::new();
        networks.insert(
            cloud_identifier.clone(),
            ComposeServiceNetwork {
                ipv4_address: spec.address.clone(),
            },
        );
        services.insert(
            domain.to_string(),
            ComposeService {
                container_name: format!("{domain}.{cloud_identifier}"),
                image: format!("svetlint/{domain}:4.3.0"),
                environment: Vec::new(),
                depends_on: vec![mysql_name.clone()],
                volumes: vec![
                    format!(
                        "./{CORE_SYSTEM_CONFIG_DIR}/{system}.properties:/{domain}/application.properties"
                    ),
                    format!("./certs/crypto/{system}.p12:/{domain}/{system}.p12"),
                    format!("./certs/crypto/truststore.p12:/{domain}/truststore.p12"),
                ],
                networks,
                ports: vec![format!("{0}:{0}", spec.port)],
            },
        );
    }

    let mut volumes = IndexMap::new();
    volumes.insert(mysql_name, ComposeVolume { external: true });

    let mut networks = IndexMap::new();
    networks.insert(
        cloud_identifier,
        ComposeNetwork {
            ipam: ComposeIpam {
                config: vec![ComposeIpamConfig {
                    subnet: cloud_config.subnet.clone(),
                }],
            },
        },
    );

    let document = ComposeDocument {
        version: "3".to_string(),
        services,
        volumes,
        networks,
    };

    let compose_path = cloud_dir.join(DOCKER_COMPOSE_FILE_NAME);
    fs::write(&compose_path, serde_yaml::to_string(&document)?)?;
    info!("generated {}", DOCKER_COMPOSE_FILE_NAME);

    Ok(compose_path)
}

#[cfg(test)]
mod tests {
    use super::*;
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
        core_systems.insert(
            "orchestrator".to_string(),
            SystemSpec {
                system_name: "orchestrator".to_string(),
                address: "172.16.2.4".to_string(),
                port: 8441,
                domain: Some("orchestrator".to_string()),
                sans: None,
            },
        );
        CloudConfig {
            cloud_name: "test-cloud".to_string(),
            org_name: "test-org".to_string(),
            ssl_enabled: true,
            subnet: "172.16.2.0/24".to_string(),
            core_san: vec![],
            installed: false,
            client_systems: IndexMap::new(),
            core_systems,
        }
    }

    #[test]
    fn properties_reference_store_layout() {
        let dir = TempDir::new().unwrap();
        let written = generate_config_files(&test_config(), dir.path(), "pw").unwrap();
        assert_eq!(written.len(), 2);

        let sr = fs::read_to_string(
            dir.path()
                .join(CORE_SYSTEM_CONFIG_DIR)
                .join("service_registry.properties"),
        )
        .unwrap();
        assert!(sr.contains("server.ssl.key-store=file:service_registry.p12"));
        assert!(sr.contains(
            "server.ssl.key-alias=serviceregistry.test-cloud.test-org.arrowhead.eu"
        ));
        assert!(sr.contains("sr_address=172.16.2.3"));
        assert!(sr.contains("server.ssl.enabled=true"));
    }

    #[test]
    fn compose_file_lists_every_service() {
        let dir = TempDir::new().unwrap();
        let path = generate_compose_file(&test_config(), dir.path(), "pw").unwrap();
        let compose: serde_yaml::Value =
            serde_yaml::from_str(&fs::read_to_string(path).unwrap()).unwrap();

        let services = compose.get("services").unwrap();
        assert!(services.get("mysql.test-cloud.test-org").is_some());
        assert!(services.get("serviceregistry").is_some());
        assert!(services.get("orchestrator").is_some());

        let mysql = services.get("mysql.test-cloud.test-org").unwrap();
        let address = mysql
            .get("networks")
            .unwrap()
            .get("test-cloud.test-org")
            .unwrap()
            .get("ipv4_address")
            .unwrap()
            .as_str()
            .unwrap();
        assert_eq!(address, "172.16.2.2");

        let volumes = compose.get("volumes").unwrap();
        assert!(volumes.get("mysql.test-cloud.test-org").is_some());
    }
}
