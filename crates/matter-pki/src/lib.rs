//! Provisioning engine for the Matter product-attestation PKI.
//!
//! This crate provisions a two-tier X.509 hierarchy: a self-signed Product
//! Attestation Authority (PAA) and one or more Product Attestation
//! Intermediates (PAIs) chained beneath it. Both tiers carry vendor/product
//! identity as custom subject attributes.
//!
//! # Components
//!
//! - [`identifier`] - VID/PID validation (`^[0-9A-F]{4}$`)
//! - [`subject`] - Subject attribute composition (four fixed variants)
//! - [`authority`] - Authority data model, validity, revocation, lifecycle state
//! - [`lifecycle`] - Authority lifecycle manager with deletion safety
//! - [`signing`] - Cross-authority signing workflow (root and subordinate paths)
//! - [`intent`] - Discriminated deployment intent resolved from [`config`]
//! - [`orchestrator`] - Hierarchy orchestrator driving a provisioning run
//! - [`shared`] - Deduplication policy for region-shared audit infrastructure
//! - [`access`] - Capability scopes requested from the authorization layer
//! - [`audit`] - Tamper-evident provisioning event log
//! - [`outputs`] - Certificate ARNs, console links and identity lines
//! - [`ca`] - Authority service trait and the in-process implementation

pub mod access;
pub mod arn;
pub mod audit;
pub mod authority;
pub mod ca;
pub mod certificate;
pub mod config;
pub mod csr;
pub mod identifier;
pub mod intent;
pub mod lifecycle;
pub mod oid;
pub mod orchestrator;
pub mod outputs;
pub mod shared;
pub mod signing;
pub mod subject;

pub use arn::AuthorityArn;
pub use audit::{AuditEvent, ProvisioningAudit};
pub use authority::{AuthorityRecord, LifecycleState, RemovalOperation, Tier, Validity};
pub use ca::{AuthorityService, LocalAuthorityService};
pub use config::DeploymentConfig;
pub use csr::Csr;
pub use identifier::{Identifier, IdentifierField};
pub use intent::DeploymentIntent;
pub use lifecycle::LifecycleManager;
pub use orchestrator::{HierarchyOrchestrator, ProvisioningReport, RegionalServices};
pub use shared::{SharedResourceDecision, SharedResourcePolicy};
pub use signing::{ExecutionToken, RefreshPolicy, SigningStep, SigningWorkflow};
pub use subject::{CustomAttribute, SubjectAttributeSet, SubjectVariant};

/// Errors that can occur while provisioning the attestation hierarchy.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Deployment input violates a format or consistency contract.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// A subject attribute set outside the four fixed variants was produced.
    #[error(transparent)]
    Composition(#[from] CompositionError),

    /// A signing, retrieval or activation call failed for an authority.
    #[error("signing workflow failed for authority {authority} at step {step}: {reason}")]
    SigningWorkflow {
        /// Logical id of the affected authority.
        authority: String,
        /// The step that failed.
        step: SigningStep,
        /// Underlying failure.
        reason: String,
    },

    /// An attempt was made to delete or replace an authority.
    #[error("deletion safety violation: {operation} of authority {authority} is never permitted")]
    DeletionSafety {
        /// Logical id of the authority.
        authority: String,
        /// The rejected operation.
        operation: RemovalOperation,
    },

    /// The external authority service rejected or failed a call.
    #[error("authority service error during {operation}: {message}")]
    Service {
        /// Service operation name.
        operation: String,
        /// Service-provided message.
        message: String,
        /// Capacity-exceeded or throttled responses are transient.
        transient: bool,
    },

    /// Certificate parsing error.
    #[error("certificate error: {0}")]
    Certificate(String),

    /// Provisioning state could not be loaded or is inconsistent.
    #[error("provisioning state error: {0}")]
    State(String),

    /// Configuration could not be parsed.
    #[error("configuration error: {0}")]
    Config(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub(crate) fn service(operation: &str, message: impl Into<String>) -> Self {
        Self::Service {
            operation: operation.to_string(),
            message: message.into(),
            transient: false,
        }
    }

    /// Returns true for transient service responses that the call layer may retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Service { transient: true, .. })
    }
}

/// Deployment input rejected before any authority is touched.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// VID or PID does not match `^[0-9A-F]{4}$`.
    #[error("invalid {field} '{value}', should be 4-digit hexadecimal number in all capitals")]
    InvalidIdentifier {
        /// Which identifier was rejected.
        field: IdentifierField,
        /// The offending value.
        value: String,
    },

    /// The PID list does not hold exactly one PID per subordinate authority.
    #[error("product id list has {actual} entries but {expected} subordinate authorities were requested")]
    ProductIdCountMismatch {
        /// Subordinate count.
        expected: usize,
        /// Number of PIDs supplied.
        actual: usize,
    },

    /// A positional list holds fewer entries than subordinate authorities.
    #[error("parameter {parameter} has {actual} entries but {expected} are required")]
    ListTooShort {
        /// Parameter name.
        parameter: &'static str,
        /// Required number of entries.
        expected: usize,
        /// Supplied number of entries.
        actual: usize,
    },

    /// A required value is empty.
    #[error("parameter {parameter} is empty at index {index}")]
    EmptyValue {
        /// Parameter name.
        parameter: &'static str,
        /// Position in the delimited list.
        index: usize,
    },

    /// Both an explicit day count and an end date were supplied.
    #[error("validity given both as {days} days and as end date '{end_date}'")]
    ConflictingValidity {
        /// Explicit day count.
        days: u32,
        /// Explicit end date.
        end_date: String,
    },

    /// End date is not in `YYYYMMDDHHMMSS` format.
    #[error("invalid validity end date '{value}', expected YYYYMMDDHHMMSS")]
    InvalidEndDate {
        /// The offending value.
        value: String,
    },

    /// A validity of zero days.
    #[error("validity in days must be positive")]
    ZeroValidity,

    /// A required parameter is missing for the selected mode.
    #[error("missing required parameter {parameter}")]
    MissingParameter {
        /// Parameter name.
        parameter: &'static str,
    },

    /// Subordinate count of zero.
    #[error("subordinate count must be at least 1, got {value}")]
    InvalidSubordinateCount {
        /// The offending count.
        value: usize,
    },

    /// Parent authority has no Matter VID attribute in its subject.
    #[error("parent authority {arn} isn't VID-scoped (no vendor id custom attribute in its subject)")]
    ParentNotVendorScoped {
        /// Parent authority ARN.
        arn: String,
    },

    /// Resource name could not be parsed.
    #[error("invalid authority ARN '{value}'")]
    InvalidArn {
        /// The offending value.
        value: String,
    },
}

/// A subject attribute set that matches none of the four fixed variants.
///
/// Composition goes through [`SubjectVariant`], so these are programming
/// contract violations or malformed descriptions from the service.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CompositionError {
    /// A standard subject field was mixed with custom attributes.
    #[error("subject mixes standard field {field} with custom attributes")]
    MixedAttributeForms {
        /// The standard field name.
        field: String,
    },

    /// An attribute OID outside the Matter subject profile.
    #[error("subject attribute {oid} is not part of the attestation subject profile")]
    UnknownAttribute {
        /// The offending OID.
        oid: String,
    },

    /// Attributes present in an order or combination no variant produces.
    #[error("subject attributes [{oids}] do not match any subject variant")]
    UnexpectedLayout {
        /// Comma-joined OIDs in encounter order.
        oids: String,
    },

    /// A product id was attached to a root authority subject.
    #[error("root authority subject cannot carry a product id")]
    ProductIdOnRoot,
}

/// Result type for provisioning operations.
pub type Result<T> = std::result::Result<T, Error>;
