//! Ferrowhead - Arrowhead local cloud management library
//!
//! Provisions an isolated, self-signed PKI for Eclipse Arrowhead local
//! clouds and applies it, together with generated service configuration,
//! as an atomic installation step.
//!
//! # Certificate hierarchy
//!
//! ```text
//! Root CA (arrowhead.eu, self-signed)
//!   └── Organization CA ({org}.arrowhead.eu)
//!       └── Cloud CA ({cloud}.{org}.arrowhead.eu, pathlen=2)
//!           └── sysop + core system certificates
//!       └── client system certificates (signed org-wide)
//! ```
//!
//! Root and organization tiers are created once and shared: every cloud
//! under an organization reuses the organization CA, and every
//! organization reuses the root. Cloud and system tiers are regenerated
//! per installation.
//!
//! # Installation transaction
//!
//! [`installation::install_cloud`] renders the core system property
//! files and the compose file, builds and stores the certificate
//! hierarchy, assembles the truststore through keytool, stages the SQL
//! initialization, and creates the external database volume. Every path
//! it creates is tracked; any failure removes them all and surfaces a
//! single [`FerrowheadError::Transaction`]. Only a fully successful run
//! flips `installed: true` in `cloud_config.yaml`.
//!
//! # Example
//!
//! ```no_run
//! use ferrowhead::commands::create::create_cloud_config;
//! use ferrowhead::configs::FileRegistry;
//! use ferrowhead::external::SystemRunner;
//! use ferrowhead::installation::install_cloud;
//! use std::path::Path;
//!
//! # fn main() -> ferrowhead::Result<()> {
//! let cloud_dir = Path::new("/home/user/.ferrowhead/local-clouds/test-org/test-cloud");
//! let mut registry = FileRegistry::open("/home/user/.ferrowhead/clouds.toml".into())?;
//!
//! create_cloud_config(
//!     cloud_dir,
//!     "test-cloud",
//!     "test-org",
//!     true,
//!     "172.16.2.0/24",
//!     &[],
//!     &[],
//!     &mut registry,
//! )?;
//! install_cloud(cloud_dir, &SystemRunner, "123456", "123456")?;
//! # Ok(())
//! # }
//! ```

pub mod cert_store;
pub mod commands;
pub mod configs;
pub mod error;
pub mod external;
pub mod generate_ca_cert;
pub mod generate_root_ca;
pub mod generate_system_cert;
pub mod hierarchy;
pub mod installation;
pub mod keycert;
pub mod templates;
pub mod validation;

pub use error::{FerrowheadError, Result};
pub use keycert::KeyCertPair;
