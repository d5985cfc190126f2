//! Audit command - verify the provisioning event log

use anyhow::{bail, Result};
use clap::{Args, Subcommand};

/// Inspect the provisioning audit log
#[derive(Args, Debug)]
pub struct AuditArgs {
    #[command(subcommand)]
    pub command: AuditCommand,
}

#[derive(Subcommand, Debug)]
pub enum AuditCommand {
    /// Verify the hash chain of an audit log file
    Verify {
        /// Audit log path
        path: String,
    },
}

/// Execute the audit command
pub fn execute(args: AuditArgs) -> Result<()> {
    match args.command {
        AuditCommand::Verify { path } => {
            let path = shellexpand::tilde(&path).to_string();
            match matter_pki::audit::verify_file(&path)? {
                Ok(count) => {
                    println!("{path}: {count} records, chain intact");
                    Ok(())
                }
                Err(e) => bail!("{path}: {e}"),
            }
        }
    }
}
