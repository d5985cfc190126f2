//! Authority lifecycle manager.
//!
//! Owns every [`AuthorityRecord`] of a deployment, keyed by logical id,
//! and moves records through `CREATED -> CSR_ISSUED -> SIGNED -> ACTIVATED`.
//! Records are persisted after every transition so an interrupted run can
//! resume from the last completed state.
//!
//! Deleting or replacing an authority is never permitted. [`LifecycleManager::delete`]
//! and [`LifecycleManager::replace`] exist only to reject such requests.

use crate::arn::AuthorityArn;
use crate::audit::{AuditEvent, ProvisioningAudit};
use crate::authority::{
    ActivationRecord, AuthorityConfig, AuthorityRecord, LifecycleState, RemovalOperation, RemovalPolicy, Validity,
};
use crate::ca::{AuthorityService, CertificateTemplate};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Version of the persisted state layout.
pub const STATE_VERSION: u32 = 1;

/// Logical id of the root authority.
pub const ROOT_LOGICAL_ID: &str = "PAA";

/// Logical id of the subordinate authority at `index`.
pub fn subordinate_logical_id(index: usize) -> String {
    format!("PAI-{index}")
}

/// Persisted provisioning state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisioningState {
    /// Layout version.
    pub version: u32,
    /// Records by logical id.
    pub records: BTreeMap<String, AuthorityRecord>,
}

impl Default for ProvisioningState {
    fn default() -> Self {
        Self {
            version: STATE_VERSION,
            records: BTreeMap::new(),
        }
    }
}

impl ProvisioningState {
    /// Loads state from `path`; a missing file is an empty state.
    pub async fn load(path: &Path) -> Result<Self> {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(e.into()),
        };
        let state: Self = serde_json::from_slice(&bytes)?;
        if state.version != STATE_VERSION {
            return Err(Error::State(format!(
                "{} has state version {}, expected {STATE_VERSION}",
                path.display(),
                state.version
            )));
        }
        Ok(state)
    }

    /// Writes state to `path` through a temporary file and a rename.
    pub async fn save(&self, path: &Path) -> Result<()> {
        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        tokio::fs::write(&tmp, serde_json::to_vec_pretty(self)?).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }
}

/// Tracks authorities through their lifecycle.
pub struct LifecycleManager {
    state: RwLock<ProvisioningState>,
    path: Option<PathBuf>,
    audit: ProvisioningAudit,
}

impl LifecycleManager {
    /// Creates a manager without persistence.
    pub fn in_memory(audit: ProvisioningAudit) -> Self {
        Self {
            state: RwLock::new(ProvisioningState::default()),
            path: None,
            audit,
        }
    }

    /// Opens a manager persisted at `path`, loading earlier records.
    pub async fn open(path: impl Into<PathBuf>, audit: ProvisioningAudit) -> Result<Self> {
        let path = path.into();
        let state = ProvisioningState::load(&path).await?;
        debug!(path = %path.display(), records = state.records.len(), "loaded provisioning state");
        Ok(Self {
            state: RwLock::new(state),
            path: Some(path),
            audit,
        })
    }

    /// The audit log events are written to.
    pub fn audit(&self) -> &ProvisioningAudit {
        &self.audit
    }

    async fn persist(&self, state: &ProvisioningState) -> Result<()> {
        match &self.path {
            Some(path) => state.save(path).await,
            None => Ok(()),
        }
    }

    /// Creates the authority `logical_id` unless it already exists.
    ///
    /// Creation and CSR extraction happen together, so a fresh record is
    /// returned in `CSR_ISSUED`. An existing record is returned unchanged;
    /// asking for a different configuration of an existing authority is a
    /// replacement and is rejected.
    pub async fn create(
        &self,
        service: &dyn AuthorityService,
        logical_id: &str,
        config: AuthorityConfig,
        validity: Validity,
        parent: Option<AuthorityArn>,
    ) -> Result<AuthorityRecord> {
        if let Some(existing) = self.get(logical_id).await {
            if existing.config != config || existing.parent != parent {
                return Err(self.reject(logical_id, RemovalOperation::Replace).await);
            }
            if existing.validity != validity {
                warn!(
                    authority = %logical_id,
                    recorded = ?existing.validity,
                    requested = ?validity,
                    "validity of an existing authority is fixed; keeping the recorded value"
                );
            }
            debug!(authority = %logical_id, state = %existing.state, "authority already exists");
            return Ok(existing);
        }

        let created = service.create_authority(&config).await?;
        let mut record = AuthorityRecord {
            logical_id: logical_id.to_string(),
            config,
            validity,
            arn: created.arn,
            parent,
            state: LifecycleState::Created,
            csr: None,
            certificate_arn: None,
            certificate: None,
            certificate_chain: None,
            activation: None,
            removal_policy: RemovalPolicy::RETAIN,
        };
        record.csr = Some(created.csr);
        record.advance(LifecycleState::CsrIssued)?;
        info!(authority = %logical_id, arn = %record.arn, tier = %record.tier(), "created authority");

        {
            let mut state = self.state.write().await;
            state.records.insert(logical_id.to_string(), record.clone());
            self.persist(&state).await?;
        }

        self.audit
            .append(
                logical_id,
                AuditEvent::AuthorityCreated {
                    arn: record.arn.to_string(),
                    tier: record.tier(),
                },
            )
            .await?;
        self.audit.append(logical_id, AuditEvent::CsrIssued).await?;
        Ok(record)
    }

    /// Returns the record of `logical_id`.
    pub async fn get(&self, logical_id: &str) -> Option<AuthorityRecord> {
        self.state.read().await.records.get(logical_id).cloned()
    }

    /// All records, ordered by logical id.
    pub async fn records(&self) -> Vec<AuthorityRecord> {
        self.state.read().await.records.values().cloned().collect()
    }

    async fn update<F>(&self, logical_id: &str, f: F) -> Result<AuthorityRecord>
    where
        F: FnOnce(&mut AuthorityRecord) -> Result<()>,
    {
        let mut state = self.state.write().await;
        let record = state
            .records
            .get_mut(logical_id)
            .ok_or_else(|| Error::State(format!("unknown authority {logical_id}")))?;
        f(record)?;
        let updated = record.clone();
        self.persist(&state).await?;
        Ok(updated)
    }

    /// `CSR_ISSUED -> SIGNED`, recording the issued certificate's ARN.
    pub async fn record_signed(
        &self,
        logical_id: &str,
        certificate_arn: &str,
        template: CertificateTemplate,
    ) -> Result<AuthorityRecord> {
        let record = self
            .update(logical_id, |record| {
                record.advance(LifecycleState::Signed)?;
                record.certificate_arn = Some(certificate_arn.to_string());
                Ok(())
            })
            .await?;
        self.audit
            .append(
                logical_id,
                AuditEvent::CertificateSigned {
                    certificate_arn: certificate_arn.to_string(),
                    template: template.arn(),
                },
            )
            .await?;
        Ok(record)
    }

    /// Stores the fetched certificate body and chain. Does not change state.
    pub async fn record_certificate(
        &self,
        logical_id: &str,
        certificate: &str,
        certificate_chain: Option<&str>,
        fingerprint: &str,
    ) -> Result<AuthorityRecord> {
        let record = self
            .update(logical_id, |record| {
                if record.state < LifecycleState::Signed {
                    return Err(Error::State(format!(
                        "authority {logical_id} has no signed certificate (state {})",
                        record.state
                    )));
                }
                record.certificate = Some(certificate.to_string());
                record.certificate_chain = certificate_chain.map(str::to_string);
                Ok(())
            })
            .await?;
        self.audit
            .append(
                logical_id,
                AuditEvent::CertificateFetched {
                    fingerprint: fingerprint.to_string(),
                },
            )
            .await?;
        Ok(record)
    }

    /// `SIGNED -> ACTIVATED`, attaching the activation record.
    pub async fn record_activation(&self, logical_id: &str, activation: ActivationRecord) -> Result<AuthorityRecord> {
        let record = self
            .update(logical_id, |record| {
                record.advance(LifecycleState::Activated)?;
                record.activation = Some(activation);
                Ok(())
            })
            .await?;
        self.audit
            .append(
                logical_id,
                AuditEvent::AuthorityActivated {
                    arn: record.arn.to_string(),
                },
            )
            .await?;
        info!(authority = %logical_id, arn = %record.arn, "activated authority");
        Ok(record)
    }

    async fn reject(&self, logical_id: &str, operation: RemovalOperation) -> Error {
        warn!(authority = %logical_id, %operation, "rejected removal of authority");
        if let Err(e) = self.audit.append(logical_id, AuditEvent::DeletionRejected { operation }).await {
            warn!(authority = %logical_id, error = %e, "failed to audit rejected removal");
        }
        Error::DeletionSafety {
            authority: logical_id.to_string(),
            operation,
        }
    }

    /// Rejects deletion of any authority, in any state.
    pub async fn delete(&self, logical_id: &str) -> Result<()> {
        Err(self.reject(logical_id, RemovalOperation::Delete).await)
    }

    /// Rejects in-place replacement of any authority, in any state.
    pub async fn replace(&self, logical_id: &str, _config: AuthorityConfig) -> Result<()> {
        Err(self.reject(logical_id, RemovalOperation::Replace).await)
    }

    /// Writes the current state to disk, if persisted.
    pub async fn save(&self) -> Result<()> {
        let state = self.state.read().await;
        self.persist(&state).await
    }
}
