//! Authority and certificate resource names.
//!
//! Authorities are addressed as
//! `arn:<partition>:acm-pca:<region>:<account>:certificate-authority/<id>`
//! and their issued certificates as `<authority-arn>/certificate/<id>`.

use crate::ValidationError;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

const SERVICE: &str = "acm-pca";
const AUTHORITY_RESOURCE: &str = "certificate-authority/";
const CERTIFICATE_SEGMENT: &str = "/certificate/";

/// A parsed certificate authority ARN.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(into = "String")]
pub struct AuthorityArn {
    partition: String,
    region: String,
    account: String,
    id: String,
}

impl AuthorityArn {
    /// Builds the ARN of a new authority.
    pub fn new(region: &str, account: &str, id: &str) -> Self {
        Self {
            partition: "aws".to_string(),
            region: region.to_string(),
            account: account.to_string(),
            id: id.to_string(),
        }
    }

    /// Parses an authority ARN.
    pub fn parse(value: &str) -> Result<Self, ValidationError> {
        let invalid = || ValidationError::InvalidArn {
            value: value.to_string(),
        };

        let mut parts = value.splitn(6, ':');
        let (Some("arn"), Some(partition), Some(SERVICE), Some(region), Some(account), Some(resource)) = (
            parts.next(),
            parts.next(),
            parts.next(),
            parts.next(),
            parts.next(),
            parts.next(),
        ) else {
            return Err(invalid());
        };

        let id = resource.strip_prefix(AUTHORITY_RESOURCE).ok_or_else(invalid)?;
        if partition.is_empty() || region.is_empty() || account.is_empty() || id.is_empty() || id.contains('/') {
            return Err(invalid());
        }

        Ok(Self {
            partition: partition.to_string(),
            region: region.to_string(),
            account: account.to_string(),
            id: id.to_string(),
        })
    }

    /// Region the authority lives in.
    pub fn region(&self) -> &str {
        &self.region
    }

    /// Owning account.
    pub fn account(&self) -> &str {
        &self.account
    }

    /// Authority id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// ARN of a certificate issued by this authority.
    pub fn certificate_arn(&self, certificate_id: &str) -> String {
        format!("{self}{CERTIFICATE_SEGMENT}{certificate_id}")
    }

    /// Returns true if `certificate_arn` names a certificate issued by this authority.
    pub fn issued(&self, certificate_arn: &str) -> bool {
        certificate_arn
            .strip_prefix(&self.to_string())
            .and_then(|rest| rest.strip_prefix(CERTIFICATE_SEGMENT))
            .is_some_and(|id| !id.is_empty())
    }
}

impl fmt::Display for AuthorityArn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "arn:{}:{SERVICE}:{}:{}:{AUTHORITY_RESOURCE}{}",
            self.partition, self.region, self.account, self.id
        )
    }
}

impl FromStr for AuthorityArn {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl From<AuthorityArn> for String {
    fn from(arn: AuthorityArn) -> Self {
        arn.to_string()
    }
}

impl<'de> Deserialize<'de> for AuthorityArn {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

/// Console deep-link to the certificate tab of an authority.
pub fn console_link(region: &str, authority: &str) -> String {
    format!("https://console.aws.amazon.com/acm-pca/home?region={region}#/details?arn={authority}&tab=certificate")
}
