//! Authority service trait and implementations.
//!
//! The provisioning engine never holds authority keys. It asks an
//! [`AuthorityService`] to create authorities, sign requests against a
//! template, return certificates and install them. Implementations include:
//!
//! - [`LocalAuthorityService`] - in-process service for one region, backed by `rcgen`

mod local;

pub use local::{LocalAuthorityService, ServiceStats};

use crate::arn::AuthorityArn;
use crate::authority::{AuthorityConfig, AuthorityStatus, SigningAlgorithm, Tier, Validity};
use crate::csr::Csr;
use crate::subject::CustomAttribute;
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

const TEMPLATE_PREFIX: &str = "arn:aws:acm-pca:::template/";

/// Certificate templates used by the hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CertificateTemplate {
    /// Self-signed root with extensions passed through the request.
    RootCaApiPassthrough,
    /// Subordinate CA, path length 0, extensions passed through.
    SubordinateCaPathLen0ApiPassthrough,
    /// End-entity certificate with critical basic constraints.
    EndEntityCriticalBasicConstraintsApiPassthrough,
}

impl CertificateTemplate {
    /// Template ARN.
    pub fn arn(self) -> String {
        let name = match self {
            Self::RootCaApiPassthrough => "RootCACertificate_APIPassthrough/V1",
            Self::SubordinateCaPathLen0ApiPassthrough => {
                "BlankSubordinateCACertificate_PathLen0_APIPassthrough/V1"
            }
            Self::EndEntityCriticalBasicConstraintsApiPassthrough => {
                "BlankEndEntityCertificate_CriticalBasicConstraints_APIPassthrough/V1"
            }
        };
        format!("{TEMPLATE_PREFIX}{name}")
    }

    /// Looks a template up by ARN.
    pub fn from_arn(arn: &str) -> Option<Self> {
        [
            Self::RootCaApiPassthrough,
            Self::SubordinateCaPathLen0ApiPassthrough,
            Self::EndEntityCriticalBasicConstraintsApiPassthrough,
        ]
        .into_iter()
        .find(|template| template.arn() == arn)
    }
}

impl fmt::Display for CertificateTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.arn())
    }
}

/// A raw extension passed through the signing request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CustomExtension {
    /// Dotted OID.
    pub object_identifier: String,
    /// Base64 of the DER extension value.
    pub value: String,
    /// Critical flag.
    pub critical: bool,
}

/// Operations of the authority service, for error reporting and failure injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ServiceOperation {
    /// `createAuthority`.
    CreateAuthority,
    /// `signCertificate`.
    SignCertificate,
    /// `getCertificate`.
    GetCertificate,
    /// `getAuthorityCertificate`.
    GetAuthorityCertificate,
    /// `activateAuthority`.
    ActivateAuthority,
    /// `describeAuthority`.
    DescribeAuthority,
}

impl ServiceOperation {
    /// Wire name.
    pub fn name(self) -> &'static str {
        match self {
            Self::CreateAuthority => "CreateCertificateAuthority",
            Self::SignCertificate => "IssueCertificate",
            Self::GetCertificate => "GetCertificate",
            Self::GetAuthorityCertificate => "GetCertificateAuthorityCertificate",
            Self::ActivateAuthority => "ImportCertificateAuthorityCertificate",
            Self::DescribeAuthority => "DescribeCertificateAuthority",
        }
    }
}

impl fmt::Display for ServiceOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Result of `createAuthority`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedAuthority {
    /// Assigned name.
    pub arn: AuthorityArn,
    /// The authority's signing request.
    pub csr: Csr,
}

/// A `signCertificate` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct SignRequest {
    /// Authority whose key signs the request.
    pub certificate_authority_arn: AuthorityArn,
    /// CSR with line breaks escaped as `\n`.
    pub csr: String,
    /// Certificate template.
    pub template_arn: String,
    /// Requested validity.
    pub validity: Validity,
    /// Signing algorithm.
    pub signing_algorithm: SigningAlgorithm,
    /// Extensions passed through to the certificate.
    pub custom_extensions: Vec<CustomExtension>,
    /// Changes on every provisioning run.
    pub idempotency_token: String,
}

/// A certificate and, for subordinates, its issuer chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateBody {
    /// Issued certificate (PEM).
    pub certificate: String,
    /// Chain of the issuer (PEM), empty for self-signed certificates.
    pub certificate_chain: Option<String>,
}

/// An `activateAuthority` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivationRequest {
    /// Authority being activated.
    pub arn: AuthorityArn,
    /// Its signed certificate (PEM).
    pub certificate: String,
    /// Parent chain (PEM). Required for subordinates.
    pub certificate_chain: Option<String>,
    /// Always `ACTIVE`.
    pub status: AuthorityStatus,
}

/// Lifecycle status reported by the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServiceStatus {
    /// Waiting for a certificate.
    PendingCertificate,
    /// Usable.
    Active,
}

/// Result of `describeAuthority`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorityDescription {
    /// Authority name.
    pub arn: AuthorityArn,
    /// Root or subordinate.
    pub tier: Tier,
    /// Current status.
    pub status: ServiceStatus,
    /// Subject as custom attributes.
    pub subject_custom_attributes: Vec<CustomAttribute>,
    /// Resource tags.
    pub tags: BTreeMap<String, String>,
}

/// A certificate authority service for one region.
///
/// Calls for one authority must be issued in the order create, sign, fetch,
/// activate. Calls for distinct authorities may run concurrently.
#[async_trait]
pub trait AuthorityService: Send + Sync {
    /// Region this service operates in.
    fn region(&self) -> &str;

    /// Creates an authority and returns its name and signing request.
    async fn create_authority(&self, config: &AuthorityConfig) -> Result<CreatedAuthority>;

    /// Signs a request with the key of `request.certificate_authority_arn`.
    ///
    /// Returns the ARN of the issued certificate.
    async fn sign_certificate(&self, request: &SignRequest) -> Result<String>;

    /// Fetches a certificate issued by `authority`.
    async fn get_certificate(&self, authority: &AuthorityArn, certificate_arn: &str) -> Result<CertificateBody>;

    /// Fetches the installed certificate of `authority`.
    async fn get_authority_certificate(&self, authority: &AuthorityArn) -> Result<CertificateBody>;

    /// Installs a certificate on an authority and marks it active.
    async fn activate_authority(&self, request: &ActivationRequest) -> Result<()>;

    /// Describes an authority.
    async fn describe_authority(&self, authority: &AuthorityArn) -> Result<AuthorityDescription>;
}
