//! Deployment intent.
//!
//! A [`DeploymentConfig`] is resolved exactly once into a
//! [`DeploymentIntent`]. Everything that can be checked without the
//! authority service is checked here, so a bad PID or a short name list
//! stops the run before any authority exists.
//!
//! | `subordinate_count` | `generate_new_root` | intent |
//! |---|---|---|
//! | absent | false | [`DeploymentIntent::AdoptRoot`] |
//! | absent | true | [`DeploymentIntent::GenerateRoot`] |
//! | present | ignored | [`DeploymentIntent::Subordinates`] |

use crate::arn::AuthorityArn;
use crate::authority::{Tier, Validity};
use crate::config::{DeploymentConfig, DEFAULT_ROOT_VALIDITY_DAYS, DEFAULT_SUBORDINATE_VALIDITY_DAYS};
use crate::identifier::{parse_product_ids, Identifier, IdentifierField, LIST_DELIMITER};
use crate::lifecycle::subordinate_logical_id;
use crate::subject::{compose, SubjectAttributeSet};
use crate::ValidationError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which of the three deployment shapes a run has.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentKind {
    /// Reference an existing root.
    AdoptRoot,
    /// Create and self-sign a new root.
    GenerateRoot,
    /// Create subordinates under an existing parent.
    Subordinates,
}

impl IntentKind {
    /// True for the two root-mode shapes.
    pub fn is_root(self) -> bool {
        !matches!(self, Self::Subordinates)
    }
}

impl fmt::Display for IntentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::AdoptRoot => "adopt-root",
            Self::GenerateRoot => "generate-root",
            Self::Subordinates => "subordinates",
        };
        f.write_str(name)
    }
}

/// A root authority to generate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootSpec {
    /// Subject common name.
    pub common_name: String,
    /// Vendor id carried in the subject.
    pub vendor_id: Identifier,
    /// Subject organization.
    pub organization: String,
    /// Subject organizational unit, if any.
    pub organizational_unit: Option<String>,
    /// Validity assigned at signing.
    pub validity: Validity,
    /// Bucket the root's revocation list is published to.
    pub crl_bucket_name: String,
}

impl RootSpec {
    /// Subject of the root.
    pub fn subject(&self) -> SubjectAttributeSet {
        compose(
            Tier::Root,
            &self.common_name,
            &self.vendor_id,
            &self.organization,
            self.organizational_unit.as_deref(),
            None,
        )
    }
}

/// One subordinate of a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubordinateSpec {
    /// Position in the batch.
    pub index: usize,
    /// Subject common name.
    pub common_name: String,
    /// Subject organization.
    pub organization: String,
    /// Subject organizational unit, if any.
    pub organizational_unit: Option<String>,
    /// Product id; `None` yields a vendor-scoped subordinate.
    pub product_id: Option<Identifier>,
}

impl SubordinateSpec {
    /// Logical id (`PAI-<index>`).
    pub fn logical_id(&self) -> String {
        subordinate_logical_id(self.index)
    }

    /// Subject under the parent's vendor id.
    pub fn subject(&self, vendor_id: &Identifier) -> SubjectAttributeSet {
        compose(
            Tier::Subordinate,
            &self.common_name,
            vendor_id,
            &self.organization,
            self.organizational_unit.as_deref(),
            self.product_id.as_ref(),
        )
    }
}

/// Subordinates to create under one parent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubordinateBatch {
    pub parent: AuthorityArn,
    pub subordinates: Vec<SubordinateSpec>,
    pub validity: Validity,
    pub crl_bucket_name: String,
    pub dac_validity_days: Option<u32>,
}

/// What a deployment does, decided once at the entry point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DeploymentIntent {
    /// Reference an existing root; nothing is created or signed.
    AdoptRoot {
        /// The adopted root.
        root: AuthorityArn,
    },
    /// Create a self-signed root.
    GenerateRoot(RootSpec),
    /// Create subordinates chained to `parent`.
    Subordinates(SubordinateBatch),
}

impl DeploymentIntent {
    /// Resolves and fully validates `config`.
    pub fn resolve(config: &DeploymentConfig) -> Result<Self, ValidationError> {
        match config.subordinate_count {
            Some(count) => resolve_subordinates(config, count).map(Self::Subordinates),
            None if config.generate_new_root => resolve_root(config).map(Self::GenerateRoot),
            None => {
                let root = required(config.parent_authority_arn.as_deref(), "parent_authority_arn")?;
                Ok(Self::AdoptRoot {
                    root: AuthorityArn::parse(root)?,
                })
            }
        }
    }

    /// Shape of this intent.
    pub fn kind(&self) -> IntentKind {
        match self {
            Self::AdoptRoot { .. } => IntentKind::AdoptRoot,
            Self::GenerateRoot(_) => IntentKind::GenerateRoot,
            Self::Subordinates(_) => IntentKind::Subordinates,
        }
    }
}

fn required<'a>(value: Option<&'a str>, parameter: &'static str) -> Result<&'a str, ValidationError> {
    value
        .filter(|v| !v.is_empty())
        .ok_or(ValidationError::MissingParameter { parameter })
}

fn resolve_validity(config: &DeploymentConfig, default_days: u32) -> Result<Validity, ValidationError> {
    Validity::resolve(
        config.validity_days.unwrap_or(default_days),
        config.validity_days.is_some(),
        &config.validity_end_date,
    )
}

fn resolve_root(config: &DeploymentConfig) -> Result<RootSpec, ValidationError> {
    let vendor_id = Identifier::validate(
        IdentifierField::VendorId,
        required(config.vendor_id.as_deref(), "vendor_id")?,
    )?;
    let common_name = required(Some(&config.common_names), "common_names")?;
    let organization = required(Some(&config.organizations), "organizations")?;

    Ok(RootSpec {
        common_name: common_name.to_string(),
        vendor_id,
        organization: organization.to_string(),
        organizational_unit: Some(config.organizational_units.clone()).filter(|ou| !ou.is_empty()),
        validity: resolve_validity(config, DEFAULT_ROOT_VALIDITY_DAYS)?,
        crl_bucket_name: config.root_crl_bucket_name(),
    })
}

/// Splits a positional list that must cover `count` entries.
fn positional(
    list: &str,
    parameter: &'static str,
    count: usize,
    allow_empty: bool,
) -> Result<Vec<String>, ValidationError> {
    let items: Vec<&str> = list.split(LIST_DELIMITER).collect();
    if items.len() < count {
        return Err(ValidationError::ListTooShort {
            parameter,
            expected: count,
            actual: items.len(),
        });
    }
    items
        .into_iter()
        .take(count)
        .enumerate()
        .map(|(index, item)| {
            if item.is_empty() && !allow_empty {
                Err(ValidationError::EmptyValue { parameter, index })
            } else {
                Ok(item.to_string())
            }
        })
        .collect()
}

fn resolve_subordinates(config: &DeploymentConfig, count: usize) -> Result<SubordinateBatch, ValidationError> {
    if count == 0 {
        return Err(ValidationError::InvalidSubordinateCount { value: count });
    }

    let parent = AuthorityArn::parse(required(config.parent_authority_arn.as_deref(), "parent_authority_arn")?)?;

    let product_ids = parse_product_ids(&config.product_ids)?;
    if !product_ids.is_empty() && product_ids.len() != count {
        return Err(ValidationError::ProductIdCountMismatch {
            expected: count,
            actual: product_ids.len(),
        });
    }

    let common_names = positional(&config.common_names, "common_names", count, false)?;
    let organizations = positional(&config.organizations, "organizations", count, false)?;
    let organizational_units = if config.organizational_units.is_empty() {
        vec![String::new(); count]
    } else {
        positional(&config.organizational_units, "organizational_units", count, true)?
    };

    let validity = resolve_validity(config, DEFAULT_SUBORDINATE_VALIDITY_DAYS)?;
    let crl_bucket_name = required(config.crl_bucket_name.as_deref(), "crl_bucket_name")?.to_string();
    if config.dac_validity_days == Some(0) {
        return Err(ValidationError::ZeroValidity);
    }

    let subordinates = common_names
        .into_iter()
        .zip(organizations)
        .zip(organizational_units)
        .enumerate()
        .map(|(index, ((common_name, organization), organizational_unit))| SubordinateSpec {
            index,
            common_name,
            organization,
            organizational_unit: Some(organizational_unit).filter(|ou| !ou.is_empty()),
            product_id: product_ids.get(index).cloned(),
        })
        .collect();

    Ok(SubordinateBatch {
        parent,
        subordinates,
        validity,
        crl_bucket_name,
        dac_validity_days: config.dac_validity_days,
    })
}
