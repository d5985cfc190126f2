//! Authority data model.
//!
//! An [`AuthorityRecord`] tracks one certificate authority (the PAA or a
//! PAI) from creation through activation. Records are never destroyed:
//! an authority's private key cannot be regenerated, and losing it
//! invalidates every certificate beneath it.

use crate::arn::AuthorityArn;
use crate::csr::Csr;
use crate::subject::SubjectAttributeSet;
use crate::{Error, Result, ValidationError};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Tag key attached to every CA, valued `paa` or `pai`.
pub const CA_TYPE_TAG: &str = "matterCAType";

/// Tag key attached to every Matter PKI resource.
pub const PKI_TAG: &str = "matterPKITag";

/// Format of an explicit validity end date.
pub const END_DATE_FORMAT: &str = "%Y%m%d%H%M%S";

/// CRL expiration in days.
pub const CRL_EXPIRATION_DAYS: u32 = 90;

/// Position of an authority in the two-tier hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Tier {
    /// Self-signed Product Attestation Authority.
    Root,
    /// Product Attestation Intermediate chained beneath the root.
    Subordinate,
}

impl Tier {
    /// Value of the [`CA_TYPE_TAG`] tag.
    pub fn tag_value(self) -> &'static str {
        match self {
            Self::Root => "paa",
            Self::Subordinate => "pai",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Root => write!(f, "ROOT"),
            Self::Subordinate => write!(f, "SUBORDINATE"),
        }
    }
}

/// Key algorithm. Fixed to P-256.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum KeyAlgorithm {
    /// NIST P-256.
    #[default]
    #[serde(rename = "EC_prime256v1")]
    EcPrime256v1,
}

/// Signing algorithm. Fixed to ECDSA with SHA-256.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SigningAlgorithm {
    /// ECDSA over SHA-256.
    #[default]
    #[serde(rename = "SHA256WITHECDSA")]
    Sha256WithEcdsa,
}

/// Hardware protection level for authority keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum KeyStorageSecurityStandard {
    /// FIPS 140-2 level 3 or higher.
    #[default]
    #[serde(rename = "FIPS_140_2_LEVEL_3_OR_HIGHER")]
    Fips1402Level3OrHigher,
}

/// Certificate validity, either a day count or an explicit end date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "Type", content = "Value", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Validity {
    /// Valid for this many days from issuance.
    Days(u32),
    /// Valid until this instant (UTC).
    EndDate(#[serde(with = "end_date_format")] NaiveDateTime),
}

impl Validity {
    /// Resolves validity from a day count and an optional end date.
    ///
    /// A non-empty end date is the sole discriminator and wins over the
    /// default day count. `explicit_days` marks a day count the operator set
    /// explicitly; combining it with an end date is a conflict.
    pub fn resolve(days: u32, explicit_days: bool, end_date: &str) -> std::result::Result<Self, ValidationError> {
        if end_date.is_empty() {
            if days == 0 {
                return Err(ValidationError::ZeroValidity);
            }
            return Ok(Self::Days(days));
        }
        if explicit_days {
            return Err(ValidationError::ConflictingValidity {
                days,
                end_date: end_date.to_string(),
            });
        }
        NaiveDateTime::parse_from_str(end_date, END_DATE_FORMAT)
            .map(Self::EndDate)
            .map_err(|_| ValidationError::InvalidEndDate {
                value: end_date.to_string(),
            })
    }

    /// Service name of the validity type.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Days(_) => "DAYS",
            Self::EndDate(_) => "END_DATE",
        }
    }
}

mod end_date_format {
    use super::END_DATE_FORMAT;
    use chrono::NaiveDateTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &NaiveDateTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.format(END_DATE_FORMAT).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveDateTime, D::Error> {
        let raw = String::deserialize(deserializer)?;
        NaiveDateTime::parse_from_str(&raw, END_DATE_FORMAT).map_err(serde::de::Error::custom)
    }
}

/// CRL publication settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RevocationConfiguration {
    /// CRL generation enabled.
    pub enabled: bool,
    /// CRL expiration.
    pub expiration_in_days: u32,
    /// Bucket receiving the CRLs.
    pub s3_bucket_name: String,
    /// Object ACL applied to published CRLs.
    pub s3_object_acl: String,
    /// Matter certificates omit the CRL distribution point extension.
    pub omit_distribution_point_extension: bool,
}

impl RevocationConfiguration {
    /// Revocation settings for an attestation authority publishing to `bucket`.
    pub fn for_bucket(bucket: impl Into<String>) -> Self {
        Self {
            enabled: true,
            expiration_in_days: CRL_EXPIRATION_DAYS,
            s3_bucket_name: bucket.into(),
            s3_object_acl: "BUCKET_OWNER_FULL_CONTROL".to_string(),
            omit_distribution_point_extension: true,
        }
    }
}

/// Operations the removal policy forbids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RemovalOperation {
    /// Deleting the authority.
    Delete,
    /// Replacing the authority in place.
    Replace,
}

impl fmt::Display for RemovalOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Delete => write!(f, "deletion"),
            Self::Replace => write!(f, "replacement"),
        }
    }
}

/// What happens to an authority when its deployment is removed or replaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Retention {
    /// Keep the authority.
    Retain,
}

/// Removal policy of an authority. Retain on both, for every record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemovalPolicy {
    /// Policy on delete.
    pub on_delete: Retention,
    /// Policy on replace.
    pub on_replace: Retention,
}

impl RemovalPolicy {
    /// The only removal policy authorities carry.
    pub const RETAIN: Self = Self {
        on_delete: Retention::Retain,
        on_replace: Retention::Retain,
    };
}

/// Everything the authority service needs to create an authority.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorityConfig {
    /// Root or subordinate.
    pub tier: Tier,
    /// Key algorithm.
    pub key_algorithm: KeyAlgorithm,
    /// Signing algorithm.
    pub signing_algorithm: SigningAlgorithm,
    /// Key storage protection.
    pub key_storage_security_standard: KeyStorageSecurityStandard,
    /// Subject.
    pub subject: SubjectAttributeSet,
    /// CRL configuration.
    pub revocation: RevocationConfiguration,
    /// Resource tags.
    pub tags: BTreeMap<String, String>,
}

impl AuthorityConfig {
    /// Builds the configuration for an authority of `tier`.
    pub fn new(tier: Tier, subject: SubjectAttributeSet, crl_bucket: impl Into<String>) -> Self {
        let mut tags = BTreeMap::new();
        tags.insert(CA_TYPE_TAG.to_string(), tier.tag_value().to_string());
        tags.insert(PKI_TAG.to_string(), String::new());

        Self {
            tier,
            key_algorithm: KeyAlgorithm::default(),
            signing_algorithm: SigningAlgorithm::default(),
            key_storage_security_standard: KeyStorageSecurityStandard::default(),
            subject,
            revocation: RevocationConfiguration::for_bucket(crl_bucket),
            tags,
        }
    }
}

/// Lifecycle of an authority. Transitions only move forward, one step at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LifecycleState {
    /// Authority object created.
    Created,
    /// Signing request available.
    CsrIssued,
    /// Certificate issued by the signer.
    Signed,
    /// Certificate installed, authority usable.
    Activated,
}

impl LifecycleState {
    /// The state that follows `self`, if any.
    pub fn next(self) -> Option<Self> {
        match self {
            Self::Created => Some(Self::CsrIssued),
            Self::CsrIssued => Some(Self::Signed),
            Self::Signed => Some(Self::Activated),
            Self::Activated => None,
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Created => "CREATED",
            Self::CsrIssued => "CSR_ISSUED",
            Self::Signed => "SIGNED",
            Self::Activated => "ACTIVATED",
        };
        f.write_str(name)
    }
}

/// Certificate installed on an activated authority.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivationRecord {
    /// Signed certificate (PEM).
    pub certificate: String,
    /// Parent certificate chain for subordinates (PEM).
    pub certificate_chain: Option<String>,
    /// Always `ACTIVE`.
    pub status: AuthorityStatus,
}

/// Authority status set on activation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthorityStatus {
    /// Usable.
    Active,
}

/// One certificate authority tracked by the lifecycle manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorityRecord {
    /// Logical id (`PAA`, `PAI-<i>`).
    pub logical_id: String,
    /// Service configuration used at creation.
    pub config: AuthorityConfig,
    /// Validity requested from the signer.
    pub validity: Validity,
    /// Assigned resource name.
    pub arn: AuthorityArn,
    /// Parent authority; `None` for the root.
    pub parent: Option<AuthorityArn>,
    /// Current lifecycle state.
    pub state: LifecycleState,
    /// Signing request produced at creation.
    pub csr: Option<Csr>,
    /// Issued certificate resource name.
    pub certificate_arn: Option<String>,
    /// Issued certificate body (PEM).
    pub certificate: Option<String>,
    /// Parent certificate fetched for the chain (PEM).
    pub certificate_chain: Option<String>,
    /// Present once activated.
    pub activation: Option<ActivationRecord>,
    /// Retain on delete and replace.
    pub removal_policy: RemovalPolicy,
}

impl AuthorityRecord {
    /// Tier of the authority.
    pub fn tier(&self) -> Tier {
        self.config.tier
    }

    /// Moves to `next`, which must be the immediate successor state.
    pub fn advance(&mut self, next: LifecycleState) -> Result<()> {
        if self.state.next() != Some(next) {
            return Err(Error::State(format!(
                "authority {} cannot move from {} to {}",
                self.logical_id, self.state, next
            )));
        }
        self.state = next;
        Ok(())
    }

    /// True once the authority carries an activation record.
    pub fn is_usable(&self) -> bool {
        self.state == LifecycleState::Activated && self.activation.is_some()
    }
}
