//! Tamper-evident provisioning event log.
//!
//! Every state change of an authority is appended as an [`AuditRecord`].
//! Records form a SHA-256 hash chain: each carries the hash of its
//! predecessor, so modifying any record invalidates every later link.
//! The log stays in memory and is optionally mirrored to an
//! [`AuditBackend`]; [`ProvisioningAudit::open`] uses a JSON-lines file.
//! A record the backend refuses is not added to the chain.
//!
//! Async callers go through [`ProvisioningAudit::append`], which runs the
//! backend write on the blocking pool.
//!
//! # Example
//!
//! ```
//! use matter_pki::audit::{AuditEvent, ProvisioningAudit};
//!
//! let log = ProvisioningAudit::in_memory();
//! log.record("PAA", AuditEvent::CsrIssued).unwrap();
//! log.record("PAA", AuditEvent::AuthorityActivated { arn: "arn:x".to_string() }).unwrap();
//! assert!(log.verify_chain().is_ok());
//! ```

use crate::authority::{RemovalOperation, Tier};
use crate::shared::SharedResourceDecision;
use crate::signing::SigningStep;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// What happened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditEvent {
    /// Authority object created.
    AuthorityCreated {
        /// Assigned ARN.
        arn: String,
        /// Root or subordinate.
        tier: Tier,
    },
    /// Signing request recorded.
    CsrIssued,
    /// Certificate issued by the signer.
    CertificateSigned {
        /// Issued certificate ARN.
        certificate_arn: String,
        /// Template used.
        template: String,
    },
    /// Certificate body retrieved.
    CertificateFetched {
        /// SHA-256 fingerprint of the certificate.
        fingerprint: String,
    },
    /// Certificate installed, authority active.
    AuthorityActivated {
        /// ARN of the activated authority.
        arn: String,
    },
    /// A signing workflow step failed.
    StepFailed {
        /// The failed step.
        step: SigningStep,
        /// Failure message.
        reason: String,
    },
    /// A delete or replace was refused.
    DeletionRejected {
        /// The refused operation.
        operation: RemovalOperation,
    },
    /// Shared infrastructure gating decided for a region.
    SharedInfrastructureDecided {
        /// Deployment region.
        region: String,
        /// Outcome.
        decision: SharedResourceDecision,
    },
}

/// One link of the chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    /// Monotonic sequence number, starting at 1.
    pub sequence: u64,
    /// When the event was recorded.
    pub timestamp: DateTime<Utc>,
    /// Logical id of the authority (or the deployment).
    pub authority: String,
    /// The event.
    pub event: AuditEvent,
    /// Hash of the previous record; `None` for the first.
    pub prev_hash: Option<String>,
}

impl AuditRecord {
    /// SHA-256 over every field including `prev_hash`.
    pub fn content_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.sequence.to_le_bytes());
        hasher.update(self.timestamp.timestamp_nanos_opt().unwrap_or_default().to_le_bytes());
        hasher.update(self.authority.as_bytes());
        hasher.update(serde_json::to_vec(&self.event).unwrap_or_default());
        if let Some(ref prev) = self.prev_hash {
            hasher.update(prev.as_bytes());
        }
        hex::encode(hasher.finalize())
    }
}

/// First broken link of a chain.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChainVerificationError {
    /// The first record has a `prev_hash`.
    #[error("genesis record (seq={sequence}) has a prev_hash")]
    InvalidGenesis {
        /// Sequence number of the record.
        sequence: u64,
    },
    /// A record's `prev_hash` does not match its predecessor.
    #[error("hash mismatch at seq={sequence}: expected {expected}, got {actual}")]
    HashMismatch {
        /// Sequence number of the record.
        sequence: u64,
        /// Hash of the predecessor.
        expected: String,
        /// Stored `prev_hash`.
        actual: String,
    },
    /// A record other than the first lacks its `prev_hash`.
    #[error("record (seq={sequence}) is missing its prev_hash")]
    MissingPrevHash {
        /// Sequence number of the record.
        sequence: u64,
    },
    /// Sequence numbers are not consecutive.
    #[error("sequence gap: expected {expected}, got {actual}")]
    SequenceGap {
        /// Expected sequence number.
        expected: u64,
        /// Stored sequence number.
        actual: u64,
    },
}

/// Durable sink for audit records.
///
/// `append` runs under the log lock, in sequence order.
pub trait AuditBackend: Send + fmt::Debug {
    /// Persists one record. An error keeps the record out of the chain.
    fn append(&mut self, record: &AuditRecord) -> Result<()>;
}

/// JSON-lines file, one record per line, flushed on every append.
#[derive(Debug)]
pub struct JsonlFileBackend {
    file: File,
}

impl JsonlFileBackend {
    /// Opens `path` for appending, creating it if missing.
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self { file })
    }
}

impl AuditBackend for JsonlFileBackend {
    fn append(&mut self, record: &AuditRecord) -> Result<()> {
        let line = serde_json::to_string(record)?;
        writeln!(self.file, "{line}")?;
        self.file.flush()?;
        Ok(())
    }
}

#[derive(Debug, Default)]
struct Inner {
    records: Vec<AuditRecord>,
    tail_hash: Option<String>,
    backend: Option<Box<dyn AuditBackend>>,
}

/// Append-only, hash-chained provisioning log. Cloning shares the log.
#[derive(Debug, Clone, Default)]
pub struct ProvisioningAudit {
    inner: Arc<Mutex<Inner>>,
    path: Option<PathBuf>,
}

impl ProvisioningAudit {
    /// Creates an empty in-memory log.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Creates an empty log mirrored to `backend`.
    pub fn with_backend(backend: impl AuditBackend + 'static) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                backend: Some(Box::new(backend)),
                ..Inner::default()
            })),
            path: None,
        }
    }

    /// Opens a file-backed log, loading and verifying existing records.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let records = load_records(&path)?;
        verify_records(&records).map_err(|e| Error::State(format!("audit log {}: {e}", path.display())))?;

        let backend = JsonlFileBackend::open(&path)?;
        let tail_hash = records.last().map(AuditRecord::content_hash);
        Ok(Self {
            inner: Arc::new(Mutex::new(Inner {
                records,
                tail_hash,
                backend: Some(Box::new(backend)),
            })),
            path: Some(path),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Backing file, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Appends an event and returns its sequence number.
    ///
    /// Blocks on the backend write; use [`append`](Self::append) from async code.
    pub fn record(&self, authority: impl Into<String>, event: AuditEvent) -> Result<u64> {
        let mut inner = self.lock();
        let record = AuditRecord {
            sequence: inner.records.last().map_or(1, |r| r.sequence + 1),
            timestamp: Utc::now(),
            authority: authority.into(),
            event,
            prev_hash: inner.tail_hash.clone(),
        };

        if let Some(backend) = inner.backend.as_mut() {
            backend.append(&record)?;
        }

        let sequence = record.sequence;
        inner.tail_hash = Some(record.content_hash());
        inner.records.push(record);
        Ok(sequence)
    }

    /// Appends an event from async code without blocking the runtime.
    pub async fn append(&self, authority: impl Into<String>, event: AuditEvent) -> Result<u64> {
        let log = self.clone();
        let authority = authority.into();
        tokio::task::spawn_blocking(move || log.record(authority, event))
            .await
            .map_err(|e| Error::State(format!("audit append task failed: {e}")))?
    }

    /// All records, oldest first.
    pub fn export(&self) -> Vec<AuditRecord> {
        self.lock().records.clone()
    }

    /// Records of one authority.
    pub fn records_for(&self, authority: &str) -> Vec<AuditRecord> {
        self.lock()
            .records
            .iter()
            .filter(|r| r.authority == authority)
            .cloned()
            .collect()
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.lock().records.len()
    }

    /// True when nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Hash of the newest record.
    pub fn tail_hash(&self) -> Option<String> {
        self.lock().tail_hash.clone()
    }

    /// Verifies the in-memory chain.
    pub fn verify_chain(&self) -> std::result::Result<(), ChainVerificationError> {
        verify_records(&self.lock().records)
    }
}

/// Loads a JSON-lines audit file and verifies its chain.
///
/// Returns the number of records.
pub fn verify_file(path: impl AsRef<Path>) -> Result<std::result::Result<usize, ChainVerificationError>> {
    let records = load_records(path.as_ref())?;
    Ok(verify_records(&records).map(|()| records.len()))
}

fn load_records(path: &Path) -> Result<Vec<AuditRecord>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let reader = BufReader::new(File::open(path)?);
    let mut records = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        records.push(serde_json::from_str(&line)?);
    }
    Ok(records)
}

fn verify_records(records: &[AuditRecord]) -> std::result::Result<(), ChainVerificationError> {
    let Some(first) = records.first() else {
        return Ok(());
    };
    if first.prev_hash.is_some() {
        return Err(ChainVerificationError::InvalidGenesis {
            sequence: first.sequence,
        });
    }

    for pair in records.windows(2) {
        let (prev, record) = (&pair[0], &pair[1]);
        if record.sequence != prev.sequence + 1 {
            return Err(ChainVerificationError::SequenceGap {
                expected: prev.sequence + 1,
                actual: record.sequence,
            });
        }
        let expected = prev.content_hash();
        match &record.prev_hash {
            Some(actual) if *actual == expected => {}
            Some(actual) => {
                return Err(ChainVerificationError::HashMismatch {
                    sequence: record.sequence,
                    expected,
                    actual: actual.clone(),
                })
            }
            None => {
                return Err(ChainVerificationError::MissingPrevHash {
                    sequence: record.sequence,
                })
            }
        }
    }
    Ok(())
}
