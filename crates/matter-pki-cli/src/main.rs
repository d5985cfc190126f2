//! Matter PKI CLI - provision the PAA/PAI attestation hierarchy
//!
//! `matter-pki` resolves a deployment configuration into a root or
//! subordinate intent and drives it to activated authorities.
//!
//! # Examples
//!
//! ```bash
//! # Check identifiers before writing a configuration
//! matter-pki validate --vid FFF1 --pids 8000,8001
//!
//! # Show the resolved deployment intent
//! matter-pki --config paa.toml plan
//!
//! # Provision and keep resumable state
//! matter-pki --config paa.toml provision --state state.json
//!
//! # Check the audit log chain
//! matter-pki audit verify ~/.local/share/matter-pki/audit.jsonl
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod audit;
mod plan;
mod provision;
mod validate;

/// Matter PKI CLI - attestation hierarchy provisioning
#[derive(Parser)]
#[command(name = "matter-pki")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Deployment configuration file path
    #[arg(short, long, env = "MATTER_PKI_CONFIG")]
    #[arg(default_value = "matter-pki.toml")]
    config: String,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate vendor and product identifiers
    Validate(validate::ValidateArgs),

    /// Print the resolved deployment intent without provisioning
    Plan(plan::PlanArgs),

    /// Provision the authorities of the configured deployment
    Provision(provision::ProvisionArgs),

    /// Inspect the provisioning audit log
    Audit(audit::AuditArgs),
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("matter_pki=debug,info"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("matter_pki=info,warn"))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config_path = shellexpand::tilde(&cli.config).to_string();
    debug!(config_path = %config_path, "starting matter-pki");

    match cli.command {
        Commands::Validate(args) => validate::execute(args),
        Commands::Plan(args) => plan::execute(args, &config_path),
        Commands::Provision(args) => provision::execute(args, &config_path).await,
        Commands::Audit(args) => audit::execute(args),
    }
}
