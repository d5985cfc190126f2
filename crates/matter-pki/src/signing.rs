//! Cross-authority signing workflow.
//!
//! Turns an authority in `CSR_ISSUED` into an activated certificate
//! authority. The root signs its own request with the root template. A
//! subordinate's request goes to its parent, which may live in another
//! region:
//!
//! 1. transmit the CSR to the parent's signer (PathLen0 template plus an
//!    explicit keyCertSign/cRLSign key-usage override)
//! 2. record the certificate ARN, fetch the certificate body
//! 3. use the parent's own certificate as the chain
//! 4. activate the subordinate
//!
//! Calls for one authority are strictly sequential. Every call carries the
//! run's [`ExecutionToken`], so a redeploy always reaches the signer again
//! instead of being answered from an earlier run.
//!
//! Resuming never re-signs. An authority found in `SIGNED` is fetched and
//! activated; one found in `ACTIVATED` is left alone or, under
//! [`RefreshPolicy::AlwaysRefresh`], has its certificate re-fetched.

use crate::arn::AuthorityArn;
use crate::audit::AuditEvent;
use crate::authority::{ActivationRecord, AuthorityRecord, AuthorityStatus, LifecycleState, Tier};
use crate::ca::{ActivationRequest, AuthorityService, CertificateTemplate, CustomExtension, SignRequest};
use crate::certificate::Certificate;
use crate::lifecycle::LifecycleManager;
use crate::{oid, Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// DER of a key-usage bit string with keyCertSign and cRLSign set, base64.
pub const KEY_USAGE_CERT_AND_CRL_SIGN: &str = "AwIBBg==";

/// Steps of the workflow, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SigningStep {
    /// Preparing the CSR for the signer.
    TransmitCsr,
    /// The signer's issue call.
    Sign,
    /// Fetching the issued certificate.
    FetchCertificate,
    /// Fetching the parent's own certificate.
    FetchParentCertificate,
    /// Installing the certificate on the authority.
    Activate,
}

impl fmt::Display for SigningStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::TransmitCsr => "transmit-csr",
            Self::Sign => "sign",
            Self::FetchCertificate => "fetch-certificate",
            Self::FetchParentCertificate => "fetch-parent-certificate",
            Self::Activate => "activate",
        };
        f.write_str(name)
    }
}

/// Idempotency token of one provisioning run: `<unix-millis>-<uuid>`.
///
/// A new token is minted for every run, so the signer never treats a
/// redeploy as a repeat of an earlier request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExecutionToken(String);

impl ExecutionToken {
    /// Mints a fresh token.
    pub fn new() -> Self {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default();
        Self(format!("{millis}-{}", Uuid::new_v4()))
    }

    /// The token text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ExecutionToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ExecutionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What a re-run does with certificates recorded by earlier runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshPolicy {
    /// Re-fetch certificates on every run.
    #[default]
    AlwaysRefresh,
    /// Trust recorded certificates.
    ReuseRecorded,
}

/// The key-usage override attached to every subordinate signing request.
pub fn key_usage_override() -> CustomExtension {
    CustomExtension {
        object_identifier: oid::KEY_USAGE.to_string(),
        value: KEY_USAGE_CERT_AND_CRL_SIGN.to_string(),
        critical: true,
    }
}

/// The activated parent of a subordinate batch.
#[derive(Clone)]
pub struct ParentAuthority {
    /// Parent ARN.
    pub arn: AuthorityArn,
    /// Service of the parent's region.
    pub service: Arc<dyn AuthorityService>,
    /// Parent's own certificate (PEM).
    pub certificate: String,
}

impl fmt::Debug for ParentAuthority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParentAuthority")
            .field("arn", &self.arn)
            .field("region", &self.service.region())
            .finish_non_exhaustive()
    }
}

impl ParentAuthority {
    /// Fetches the parent's certificate once for a whole batch.
    pub async fn fetch(arn: AuthorityArn, service: Arc<dyn AuthorityService>) -> Result<Self> {
        let body = service
            .get_authority_certificate(&arn)
            .await
            .and_then(|body| Certificate::from_pem(&body.certificate).map(|_| body))
            .map_err(|e| Error::SigningWorkflow {
                authority: arn.to_string(),
                step: SigningStep::FetchParentCertificate,
                reason: e.to_string(),
            })?;
        Ok(Self {
            arn,
            service,
            certificate: body.certificate,
        })
    }
}

/// Drives authorities of one run through signing and activation.
pub struct SigningWorkflow<'a> {
    lifecycle: &'a LifecycleManager,
    token: ExecutionToken,
    refresh: RefreshPolicy,
}

impl<'a> SigningWorkflow<'a> {
    /// Creates a workflow over `lifecycle` for one run.
    pub fn new(lifecycle: &'a LifecycleManager, token: ExecutionToken, refresh: RefreshPolicy) -> Self {
        Self {
            lifecycle,
            token,
            refresh,
        }
    }

    /// Token of this run.
    pub fn token(&self) -> &ExecutionToken {
        &self.token
    }

    /// Self-signs and activates the root authority `logical_id`.
    pub async fn run_root(&self, service: &dyn AuthorityService, logical_id: &str) -> Result<AuthorityRecord> {
        let record = self.load(logical_id, Tier::Root).await?;
        let issuer = record.arn.clone();
        self.complete(service, service, &issuer, None, record).await
    }

    /// Has `parent` sign the subordinate `logical_id`, then activates it.
    ///
    /// `service` is the subordinate's own regional service.
    pub async fn run_subordinate(
        &self,
        service: &dyn AuthorityService,
        parent: &ParentAuthority,
        logical_id: &str,
    ) -> Result<AuthorityRecord> {
        let record = self.load(logical_id, Tier::Subordinate).await?;
        if record.parent.as_ref() != Some(&parent.arn) {
            return Err(Error::State(format!(
                "authority {logical_id} is chained to {:?}, not {}",
                record.parent.as_ref().map(ToString::to_string),
                parent.arn
            )));
        }
        self.complete(service, parent.service.as_ref(), &parent.arn, Some(parent), record)
            .await
    }

    async fn load(&self, logical_id: &str, tier: Tier) -> Result<AuthorityRecord> {
        let record = self
            .lifecycle
            .get(logical_id)
            .await
            .ok_or_else(|| Error::State(format!("unknown authority {logical_id}")))?;
        if record.tier() != tier {
            return Err(Error::State(format!("authority {logical_id} is not a {tier} authority")));
        }
        Ok(record)
    }

    async fn complete(
        &self,
        service: &dyn AuthorityService,
        signer: &dyn AuthorityService,
        issuer: &AuthorityArn,
        parent: Option<&ParentAuthority>,
        record: AuthorityRecord,
    ) -> Result<AuthorityRecord> {
        let result = self.advance(service, signer, issuer, parent, record).await;
        if let Err(Error::SigningWorkflow { authority, step, reason }) = &result {
            let event = AuditEvent::StepFailed {
                step: *step,
                reason: reason.clone(),
            };
            if let Err(e) = self.lifecycle.audit().append(authority.clone(), event).await {
                warn!(authority = %authority, error = %e, "failed to audit step failure");
            }
        }
        result
    }

    async fn advance(
        &self,
        service: &dyn AuthorityService,
        signer: &dyn AuthorityService,
        issuer: &AuthorityArn,
        parent: Option<&ParentAuthority>,
        mut record: AuthorityRecord,
    ) -> Result<AuthorityRecord> {
        let id = record.logical_id.clone();
        debug!(authority = %id, state = %record.state, refresh = ?self.refresh, "resuming signing workflow");

        if record.state == LifecycleState::Created {
            return Err(Error::State(format!("authority {id} has no signing request")));
        }

        if record.state == LifecycleState::CsrIssued {
            record = self.sign(signer, issuer, parent.is_some(), record).await?;
        }

        if record.state == LifecycleState::Signed {
            if record.certificate.is_none() || self.refresh == RefreshPolicy::AlwaysRefresh {
                record = self.fetch(signer, issuer, parent, record).await?;
            }
            record = self.activate(service, parent, record).await?;
        } else if record.state == LifecycleState::Activated && self.refresh == RefreshPolicy::AlwaysRefresh {
            record = self.fetch(signer, issuer, parent, record).await?;
        }

        Ok(record)
    }

    fn fail(&self, authority: &str, step: SigningStep, reason: impl fmt::Display) -> Error {
        let reason = reason.to_string();
        warn!(authority = %authority, %step, %reason, "signing workflow step failed");
        Error::SigningWorkflow {
            authority: authority.to_string(),
            step,
            reason,
        }
    }

    async fn sign(
        &self,
        signer: &dyn AuthorityService,
        issuer: &AuthorityArn,
        subordinate: bool,
        record: AuthorityRecord,
    ) -> Result<AuthorityRecord> {
        let id = record.logical_id.as_str();
        let csr = record
            .csr
            .as_ref()
            .ok_or_else(|| self.fail(id, SigningStep::TransmitCsr, "no signing request recorded"))?;

        let (template, custom_extensions) = if subordinate {
            (
                CertificateTemplate::SubordinateCaPathLen0ApiPassthrough,
                vec![key_usage_override()],
            )
        } else {
            (CertificateTemplate::RootCaApiPassthrough, Vec::new())
        };
        let request = SignRequest {
            certificate_authority_arn: issuer.clone(),
            csr: csr.escaped_for_json(),
            template_arn: template.arn(),
            validity: record.validity,
            signing_algorithm: record.config.signing_algorithm,
            custom_extensions,
            idempotency_token: self.token.to_string(),
        };

        let certificate_arn = signer
            .sign_certificate(&request)
            .await
            .map_err(|e| self.fail(id, SigningStep::Sign, e))?;
        info!(authority = %id, issuer = %issuer, certificate = %certificate_arn, "certificate issued");
        self.lifecycle.record_signed(id, &certificate_arn, template).await
    }

    async fn fetch(
        &self,
        signer: &dyn AuthorityService,
        issuer: &AuthorityArn,
        parent: Option<&ParentAuthority>,
        record: AuthorityRecord,
    ) -> Result<AuthorityRecord> {
        let id = record.logical_id.as_str();
        let certificate_arn = record
            .certificate_arn
            .as_deref()
            .ok_or_else(|| self.fail(id, SigningStep::FetchCertificate, "no certificate ARN recorded"))?;

        let body = signer
            .get_certificate(issuer, certificate_arn)
            .await
            .map_err(|e| self.fail(id, SigningStep::FetchCertificate, e))?;
        let certificate =
            Certificate::from_pem(&body.certificate).map_err(|e| self.fail(id, SigningStep::FetchCertificate, e))?;

        let chain = match parent {
            Some(parent) => {
                let parent_certificate = Certificate::from_pem(&parent.certificate)
                    .map_err(|e| self.fail(id, SigningStep::FetchParentCertificate, e))?;
                certificate
                    .verify_issued_by(&parent_certificate)
                    .map_err(|e| self.fail(id, SigningStep::FetchParentCertificate, e))?;
                Some(parent.certificate.as_str())
            }
            None => None,
        };

        debug!(authority = %id, fingerprint = %certificate.fingerprint(), "fetched certificate");
        self.lifecycle
            .record_certificate(id, &body.certificate, chain, &certificate.fingerprint())
            .await
    }

    async fn activate(
        &self,
        service: &dyn AuthorityService,
        parent: Option<&ParentAuthority>,
        record: AuthorityRecord,
    ) -> Result<AuthorityRecord> {
        let id = record.logical_id.as_str();
        let certificate = record
            .certificate
            .clone()
            .ok_or_else(|| self.fail(id, SigningStep::Activate, "no certificate recorded"))?;
        let certificate_chain = parent.map(|p| p.certificate.clone());

        let request = ActivationRequest {
            arn: record.arn.clone(),
            certificate: certificate.clone(),
            certificate_chain: certificate_chain.clone(),
            status: AuthorityStatus::Active,
        };
        service
            .activate_authority(&request)
            .await
            .map_err(|e| self.fail(id, SigningStep::Activate, e))?;

        self.lifecycle
            .record_activation(
                id,
                ActivationRecord {
                    certificate,
                    certificate_chain,
                    status: AuthorityStatus::Active,
                },
            )
            .await
    }
}
