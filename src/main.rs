//! Ferrowhead CLI - manage Arrowhead local clouds
//!
//! ```bash
//! # Create a cloud configuration
//! ferrowhead cloud create test-cloud.test-org --subnet 172.16.2.0/24
//!
//! # Register a client system before installing
//! ferrowhead cloud client-add test-cloud.test-org --name sensor --san dns:sensor.local
//!
//! # Install: certificates, configuration, SQL staging, volume
//! ferrowhead cloud install test-cloud.test-org
//!
//! # Tear it down again
//! ferrowhead cloud uninstall test-cloud.test-org --complete
//! ```

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use ferrowhead::commands::client_add::add_client_system;
use ferrowhead::commands::create::{create_cloud_config, CloudConfiguration};
use ferrowhead::configs::{CloudRegistry, FileRegistry, CLOUD_CONFIG_FILE_NAME};
use ferrowhead::external::SystemRunner;
use ferrowhead::installation::{install_cloud, uninstall_cloud};

/// Manage Arrowhead local clouds: PKI provisioning, configuration
/// generation, and atomic installation.
#[derive(Parser)]
#[command(name = "ferrowhead")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Directory holding all local clouds and the cloud registry
    #[arg(long, env = "FERROWHEAD_DIR")]
    dir: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Set up, install, and remove local clouds
    #[command(subcommand)]
    Cloud(CloudCommands),
}

#[derive(Subcommand)]
enum CloudCommands {
    /// Create a new cloud configuration
    Create(CreateArgs),
    /// Install a created cloud: certificates, config files, SQL, volume
    Install(InstallArgs),
    /// Remove an installed cloud's artifacts
    Uninstall(UninstallArgs),
    /// Add a client system to a cloud configuration
    ClientAdd(ClientAddArgs),
}

#[derive(Args)]
struct CreateArgs {
    /// Cloud identifier of format <CLOUD_NAME>.<ORG_NAME>
    cloud_identifier: String,

    /// IP subnet of the cloud network
    #[arg(long, default_value = "172.16.1.0/24")]
    subnet: String,

    /// Disable SSL between core systems
    #[arg(long)]
    disable_ssl: bool,

    /// Extra SAN applied to every core system certificate (repeatable)
    #[arg(long = "san")]
    core_san: Vec<String>,

    /// Optional core system groups to include (repeatable)
    #[arg(long = "include", value_enum)]
    include: Vec<CloudConfiguration>,
}

#[derive(Args)]
struct InstallArgs {
    /// Cloud identifier of format <CLOUD_NAME>.<ORG_NAME>
    cloud_identifier: String,

    /// Password protecting the cloud and system PKCS#12 bundles
    #[arg(long, default_value = "123456")]
    cloud_password: String,

    /// Password protecting the organization PKCS#12 bundle
    #[arg(long, default_value = "123456")]
    org_password: String,
}

#[derive(Args)]
struct UninstallArgs {
    /// Cloud identifier of format <CLOUD_NAME>.<ORG_NAME>
    cloud_identifier: String,

    /// Also remove the cloud's registry entry
    #[arg(long)]
    complete: bool,

    /// Keep the sysop certificate and key
    #[arg(long)]
    keep_sysop: bool,
}

#[derive(Args)]
struct ClientAddArgs {
    /// Cloud identifier of format <CLOUD_NAME>.<ORG_NAME>
    cloud_identifier: String,

    /// Client system name
    #[arg(long)]
    name: String,

    /// Client system address; defaults to the subnet's first host
    #[arg(long)]
    address: Option<String>,

    /// Client system port; auto-assigned when absent or taken
    #[arg(long)]
    port: Option<u16>,

    /// Additional SAN for the client certificate (repeatable)
    #[arg(long = "san")]
    sans: Vec<String>,
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("ferrowhead=debug,info"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("ferrowhead=info,warn"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn ferrowhead_dir(cli_dir: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(dir) = cli_dir {
        return Ok(dir);
    }
    let home = std::env::var_os("HOME").context("HOME is not set; pass --dir")?;
    Ok(PathBuf::from(home).join(".ferrowhead"))
}

fn split_identifier(cloud_identifier: &str) -> Result<(&str, &str)> {
    match cloud_identifier.split_once('.') {
        Some((cloud_name, org_name)) if !cloud_name.is_empty() && !org_name.is_empty() => {
            Ok((cloud_name, org_name))
        }
        _ => bail!("cloud identifier must have the format <CLOUD_NAME>.<ORG_NAME>"),
    }
}

fn resolve_cloud_dir(registry: &FileRegistry, cloud_identifier: &str) -> Result<PathBuf> {
    registry.get(cloud_identifier).with_context(|| {
        format!("cloud '{cloud_identifier}' is not registered; run `ferrowhead cloud create` first")
    })
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let base_dir = ferrowhead_dir(cli.dir)?;
    let mut registry = FileRegistry::open(base_dir.join("clouds.toml"))
        .context("could not open cloud registry")?;

    match cli.command {
        Commands::Cloud(CloudCommands::Create(args)) => {
            let (cloud_name, org_name) = split_identifier(&args.cloud_identifier)?;
            let cloud_dir = base_dir
                .join("local-clouds")
                .join(org_name)
                .join(cloud_name);
            create_cloud_config(
                &cloud_dir,
                cloud_name,
                org_name,
                !args.disable_ssl,
                &args.subnet,
                &args.core_san,
                &args.include,
                &mut registry,
            )?;
        }
        Commands::Cloud(CloudCommands::Install(args)) => {
            let cloud_dir = resolve_cloud_dir(&registry, &args.cloud_identifier)?;
            install_cloud(
                &cloud_dir,
                &SystemRunner,
                &args.cloud_password,
                &args.org_password,
            )?;
        }
        Commands::Cloud(CloudCommands::Uninstall(args)) => {
            let cloud_dir = resolve_cloud_dir(&registry, &args.cloud_identifier)?;
            uninstall_cloud(
                &cloud_dir,
                &SystemRunner,
                &mut registry,
                args.complete,
                args.keep_sysop,
            )?;
        }
        Commands::Cloud(CloudCommands::ClientAdd(args)) => {
            let cloud_dir = resolve_cloud_dir(&registry, &args.cloud_identifier)?;
            let sans = (!args.sans.is_empty()).then_some(args.sans);
            add_client_system(
                &cloud_dir.join(CLOUD_CONFIG_FILE_NAME),
                &args.name,
                args.address.as_deref(),
                args.port,
                sans,
            )?;
        }
    }

    Ok(())
}
