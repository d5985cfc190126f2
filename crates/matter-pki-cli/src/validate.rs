//! Validate command - check VID/PID values
//!
//! Identifiers must be four uppercase hexadecimal digits. Nothing is
//! normalized: `fff1` and `0xFFF1` are rejected, not rewritten.

use anyhow::{bail, Result};
use clap::Args;
use matter_pki::identifier::parse_product_ids;
use matter_pki::{Identifier, IdentifierField};

/// Validate vendor and product identifiers
#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// Vendor id
    #[arg(long)]
    pub vid: Option<String>,

    /// Comma-separated product ids
    #[arg(long)]
    pub pids: Option<String>,
}

/// Execute the validate command
pub fn execute(args: ValidateArgs) -> Result<()> {
    if args.vid.is_none() && args.pids.is_none() {
        bail!("nothing to validate, pass --vid and/or --pids");
    }

    if let Some(vid) = &args.vid {
        let vid = Identifier::validate(IdentifierField::VendorId, vid)?;
        println!("VID {vid} (0x{:04X}) ok", vid.value());
    }

    if let Some(pids) = &args.pids {
        let pids = parse_product_ids(pids)?;
        for (i, pid) in pids.iter().enumerate() {
            println!("PID[{i}] {pid} (0x{:04X}) ok", pid.value());
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_lowercase_vid() {
        let args = ValidateArgs {
            vid: Some("fff1".to_string()),
            pids: None,
        };
        assert!(execute(args).is_err());
    }

    #[test]
    fn test_requires_an_argument() {
        assert!(execute(ValidateArgs { vid: None, pids: None }).is_err());
    }

    #[test]
    fn test_accepts_pid_list() {
        let args = ValidateArgs {
            vid: Some("FFF1".to_string()),
            pids: Some("8000,8001".to_string()),
        };
        assert!(execute(args).is_ok());
    }
}
