//! Deployment configuration

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default validity of a newly generated root, in days.
pub const DEFAULT_ROOT_VALIDITY_DAYS: u32 = 3650;
/// Default validity of subordinates, in days.
pub const DEFAULT_SUBORDINATE_VALIDITY_DAYS: u32 = 3600;
/// Name of the CRL bucket created with a new root, after the stack prefix.
pub const ROOT_CRL_BUCKET_SUFFIX: &str = "matter-crl-bucket";

/// One deployment of the hierarchy.
///
/// Absence of `subordinate_count` selects root mode. List-valued options
/// are comma-joined and matched to subordinates by position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentConfig {
    /// Prefix for stack and shared resource names
    #[serde(default)]
    pub stack_prefix: String,

    /// Region of this deployment
    pub region: String,

    /// Account that owns the authorities
    #[serde(default = "default_account")]
    pub account: String,

    /// Number of subordinates to create
    #[serde(default)]
    pub subordinate_count: Option<usize>,

    /// Generate a new root instead of adopting `parent_authority_arn`
    #[serde(default)]
    pub generate_new_root: bool,

    /// Existing root (root mode) or parent (subordinate mode)
    #[serde(default)]
    pub parent_authority_arn: Option<String>,

    /// Vendor id of a new root
    #[serde(default)]
    pub vendor_id: Option<String>,

    /// Product ids, one per subordinate
    #[serde(default)]
    pub product_ids: String,

    /// Common names
    #[serde(default)]
    pub common_names: String,

    /// Organizations
    #[serde(default)]
    pub organizations: String,

    /// Organizational units, optional
    #[serde(default)]
    pub organizational_units: String,

    /// Validity in days; defaults depend on the mode
    #[serde(default)]
    pub validity_days: Option<u32>,

    /// Validity end date (`YYYYMMDDHHMMSS`), overrides the default day count
    #[serde(default)]
    pub validity_end_date: String,

    /// CRL bucket (subordinate mode)
    #[serde(default)]
    pub crl_bucket_name: Option<String>,

    /// Validity of device certificates issued under the subordinates
    #[serde(default)]
    pub dac_validity_days: Option<u32>,
}

fn default_account() -> String {
    "000000000000".to_string()
}

impl DeploymentConfig {
    /// A root-mode configuration for `region` with every option at its default.
    pub fn new(region: impl Into<String>) -> Self {
        Self {
            stack_prefix: String::new(),
            region: region.into(),
            account: default_account(),
            subordinate_count: None,
            generate_new_root: false,
            parent_authority_arn: None,
            vendor_id: None,
            product_ids: String::new(),
            common_names: String::new(),
            organizations: String::new(),
            organizational_units: String::new(),
            validity_days: None,
            validity_end_date: String::new(),
            crl_bucket_name: None,
            dac_validity_days: None,
        }
    }

    /// Parses a TOML document.
    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| Error::Config(e.to_string()))
    }

    /// Loads a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read {}: {e}", path.display())))?;
        Self::from_toml(&text).map_err(|e| Error::Config(format!("{}: {e}", path.display())))
    }

    /// Renders as TOML.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))
    }

    /// True when this deployment creates subordinates.
    pub fn is_subordinate_mode(&self) -> bool {
        self.subordinate_count.is_some()
    }

    /// CRL bucket created with a generated root.
    pub fn root_crl_bucket_name(&self) -> String {
        format!("{}{ROOT_CRL_BUCKET_SUFFIX}", self.stack_prefix)
    }
}
