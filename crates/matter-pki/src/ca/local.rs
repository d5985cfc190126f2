//! In-process authority service for a single region.
//!
//! Holds authority keys and signs with `rcgen` according to the template
//! semantics of the hierarchy:
//!
//! - root template: self-signed, `CA:true`, keyCertSign/cRLSign/digitalSignature
//! - subordinate PathLen0 template: `CA:true, pathlen:0`, key usage taken only
//!   from the extensions passed through the request
//!
//! The end-entity template is only referenced by the issuance worker
//! contract; signing with it is rejected.
//!
//! [`LocalAuthorityService::new`] keeps everything in memory.
//! [`LocalAuthorityService::open`] mirrors authorities, keys and issued
//! certificates to a JSON store so a later process can resume against the
//! same authorities. Failures can be injected per operation to exercise
//! resume paths.

use super::{
    ActivationRequest, AuthorityDescription, AuthorityService, CertificateBody, CertificateTemplate,
    CreatedAuthority, CustomExtension, ServiceOperation, ServiceStatus, SignRequest,
};
use crate::arn::AuthorityArn;
use crate::authority::{AuthorityConfig, Tier, Validity};
use crate::certificate::Certificate;
use crate::csr::Csr;
use crate::subject::SubjectAttributeSet;
use crate::{oid, Error, Result};
use async_trait::async_trait;
use base64::Engine;
use rcgen::{
    BasicConstraints, CertificateParams, CertificateSigningRequestParams, IsCa, Issuer, KeyPair,
    KeyUsagePurpose, SerialNumber,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use time::{Duration as TimeDuration, OffsetDateTime};
use tokio::sync::{Mutex, RwLock};
use tracing::debug;
use uuid::Uuid;

/// Call counters, for asserting what a provisioning run did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServiceStats {
    /// Authorities created.
    pub authorities_created: usize,
    /// Certificates issued (all templates).
    pub certificates_issued: usize,
    /// Certificates issued with the root template.
    pub self_signed_certificates: usize,
    /// `getCertificate` calls served.
    pub certificate_fetches: usize,
    /// `getAuthorityCertificate` calls served.
    pub authority_certificate_fetches: usize,
    /// Activations performed.
    pub activations: usize,
}

struct LocalAuthority {
    config: AuthorityConfig,
    key: KeyPair,
    csr: Csr,
    status: ServiceStatus,
    certificate: Option<String>,
    certificate_chain: Option<String>,
}

struct IssuedCertificate {
    issuer: AuthorityArn,
    body: CertificateBody,
}

#[derive(Default)]
struct Registry {
    authorities: HashMap<AuthorityArn, LocalAuthority>,
    issued: HashMap<String, IssuedCertificate>,
    idempotency: HashMap<(String, String), String>,
    stats: ServiceStats,
}

/// On-disk form of a [`Registry`].
#[derive(Serialize, Deserialize)]
struct RegistrySnapshot {
    authorities: Vec<StoredAuthority>,
    issued: Vec<StoredCertificate>,
}

#[derive(Serialize, Deserialize)]
struct StoredAuthority {
    arn: AuthorityArn,
    config: AuthorityConfig,
    /// PKCS#8 PEM.
    private_key: String,
    csr: Csr,
    status: ServiceStatus,
    certificate: Option<String>,
    certificate_chain: Option<String>,
}

#[derive(Serialize, Deserialize)]
struct StoredCertificate {
    certificate_arn: String,
    issuer: AuthorityArn,
    certificate: String,
    certificate_chain: Option<String>,
}

impl Registry {
    fn snapshot(&self) -> RegistrySnapshot {
        let mut authorities: Vec<_> = self
            .authorities
            .iter()
            .map(|(arn, authority)| StoredAuthority {
                arn: arn.clone(),
                config: authority.config.clone(),
                private_key: authority.key.serialize_pem(),
                csr: authority.csr.clone(),
                status: authority.status,
                certificate: authority.certificate.clone(),
                certificate_chain: authority.certificate_chain.clone(),
            })
            .collect();
        authorities.sort_by(|a, b| a.arn.cmp(&b.arn));

        let mut issued: Vec<_> = self
            .issued
            .iter()
            .map(|(certificate_arn, issued)| StoredCertificate {
                certificate_arn: certificate_arn.clone(),
                issuer: issued.issuer.clone(),
                certificate: issued.body.certificate.clone(),
                certificate_chain: issued.body.certificate_chain.clone(),
            })
            .collect();
        issued.sort_by(|a, b| a.certificate_arn.cmp(&b.certificate_arn));

        RegistrySnapshot { authorities, issued }
    }

    fn restore(snapshot: RegistrySnapshot) -> Result<Self> {
        let mut registry = Self::default();
        for stored in snapshot.authorities {
            let key = KeyPair::from_pem(&stored.private_key)
                .map_err(|e| Error::State(format!("stored key of authority {} is unreadable: {e}", stored.arn)))?;
            registry.authorities.insert(
                stored.arn,
                LocalAuthority {
                    config: stored.config,
                    key,
                    csr: stored.csr,
                    status: stored.status,
                    certificate: stored.certificate,
                    certificate_chain: stored.certificate_chain,
                },
            );
        }
        for stored in snapshot.issued {
            registry.issued.insert(
                stored.certificate_arn,
                IssuedCertificate {
                    issuer: stored.issuer,
                    body: CertificateBody {
                        certificate: stored.certificate,
                        certificate_chain: stored.certificate_chain,
                    },
                },
            );
        }
        Ok(registry)
    }
}

/// An authority service running in this process.
pub struct LocalAuthorityService {
    region: String,
    account: String,
    registry: RwLock<Registry>,
    store: Option<PathBuf>,
    failures: Mutex<HashMap<ServiceOperation, bool>>,
}

impl LocalAuthorityService {
    /// Creates an empty service for `region` owned by `account`.
    pub fn new(region: impl Into<String>, account: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            account: account.into(),
            registry: RwLock::new(Registry::default()),
            store: None,
            failures: Mutex::new(HashMap::new()),
        }
    }

    /// Opens a service backed by the store at `path`, loading the
    /// authorities an earlier process left there. A missing file is an
    /// empty store.
    ///
    /// The store holds private keys.
    pub async fn open(region: impl Into<String>, account: impl Into<String>, path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let registry = match tokio::fs::read(&path).await {
            Ok(bytes) => Registry::restore(serde_json::from_slice(&bytes)?)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Registry::default(),
            Err(e) => return Err(e.into()),
        };
        debug!(
            path = %path.display(),
            authorities = registry.authorities.len(),
            "opened local authority store"
        );
        Ok(Self {
            region: region.into(),
            account: account.into(),
            registry: RwLock::new(registry),
            store: Some(path),
            failures: Mutex::new(HashMap::new()),
        })
    }

    /// Backing store, if any.
    pub fn store_path(&self) -> Option<&Path> {
        self.store.as_deref()
    }

    async fn persist(&self, registry: &Registry) -> Result<()> {
        let Some(path) = &self.store else {
            return Ok(());
        };
        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        tokio::fs::write(&tmp, serde_json::to_vec_pretty(&registry.snapshot())?).await?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o600)).await?;
        }
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }

    /// Makes the next call of `operation` fail.
    pub async fn fail_next(&self, operation: ServiceOperation, transient: bool) {
        self.failures.lock().await.insert(operation, transient);
    }

    /// Call counters so far.
    pub async fn stats(&self) -> ServiceStats {
        self.registry.read().await.stats
    }

    /// Number of authorities held.
    pub async fn authority_count(&self) -> usize {
        self.registry.read().await.authorities.len()
    }

    async fn check_injected(&self, operation: ServiceOperation) -> Result<()> {
        match self.failures.lock().await.remove(&operation) {
            Some(transient) => Err(Error::Service {
                operation: operation.name().to_string(),
                message: "injected failure".to_string(),
                transient,
            }),
            None => Ok(()),
        }
    }
}

fn not_found(operation: ServiceOperation, what: &str) -> Error {
    Error::service(operation.name(), format!("ResourceNotFoundException: {what}"))
}

fn validity_window(validity: Validity) -> Result<(OffsetDateTime, OffsetDateTime)> {
    let now = OffsetDateTime::now_utc();
    let not_after = match validity {
        Validity::Days(days) => now + TimeDuration::days(i64::from(days)),
        Validity::EndDate(end) => OffsetDateTime::from_unix_timestamp(end.and_utc().timestamp())
            .map_err(|e| Error::service(ServiceOperation::SignCertificate.name(), format!("invalid end date: {e}")))?,
    };
    if not_after <= now {
        return Err(Error::service(
            ServiceOperation::SignCertificate.name(),
            "ValidationException: validity ends in the past",
        ));
    }
    Ok((now, not_after))
}

fn random_serial() -> SerialNumber {
    let mut bytes = *Uuid::new_v4().as_bytes();
    bytes[0] &= 0x7f;
    SerialNumber::from_slice(&bytes)
}

fn to_rcgen_extension(extension: &CustomExtension) -> Result<rcgen::CustomExtension> {
    let operation = ServiceOperation::SignCertificate.name();
    let components = oid::components(&extension.object_identifier)
        .ok_or_else(|| Error::service(operation, format!("invalid extension OID {}", extension.object_identifier)))?;
    let content = base64::engine::general_purpose::STANDARD
        .decode(&extension.value)
        .map_err(|e| Error::service(operation, format!("invalid extension value: {e}")))?;
    let mut ext = rcgen::CustomExtension::from_oid_content(&components, content);
    ext.set_criticality(extension.critical);
    Ok(ext)
}

fn apply_template(params: &mut CertificateParams, template: CertificateTemplate) -> Result<()> {
    match template {
        CertificateTemplate::RootCaApiPassthrough => {
            params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
            params.key_usages = vec![
                KeyUsagePurpose::DigitalSignature,
                KeyUsagePurpose::KeyCertSign,
                KeyUsagePurpose::CrlSign,
            ];
        }
        CertificateTemplate::SubordinateCaPathLen0ApiPassthrough => {
            params.is_ca = IsCa::Ca(BasicConstraints::Constrained(0));
            params.key_usages = Vec::new();
            params.use_authority_key_identifier_extension = true;
        }
        CertificateTemplate::EndEntityCriticalBasicConstraintsApiPassthrough => {
            return Err(Error::service(
                ServiceOperation::SignCertificate.name(),
                format!("InvalidRequestException: template {template} is not supported by the local service"),
            ));
        }
    }
    Ok(())
}

fn join_chain(certificate: &str, chain: Option<&str>) -> String {
    match chain {
        Some(chain) => format!("{certificate}{chain}"),
        None => certificate.to_string(),
    }
}

#[async_trait]
impl AuthorityService for LocalAuthorityService {
    fn region(&self) -> &str {
        &self.region
    }

    async fn create_authority(&self, config: &AuthorityConfig) -> Result<CreatedAuthority> {
        let operation = ServiceOperation::CreateAuthority;
        self.check_injected(operation).await?;

        let key = KeyPair::generate_for(&rcgen::PKCS_ECDSA_P256_SHA256)
            .map_err(|e| Error::service(operation.name(), format!("key generation failed: {e}")))?;
        let mut params = CertificateParams::new(vec![])
            .map_err(|e| Error::service(operation.name(), format!("failed to create params: {e}")))?;
        params.distinguished_name = config.subject.to_distinguished_name();

        let csr_pem = params
            .serialize_request(&key)
            .and_then(|csr| csr.pem())
            .map_err(|e| Error::service(operation.name(), format!("CSR serialization failed: {e}")))?;
        let csr = Csr::from_pem(&csr_pem)?;

        let arn = AuthorityArn::new(&self.region, &self.account, &Uuid::new_v4().to_string());
        let mut registry = self.registry.write().await;
        registry.authorities.insert(
            arn.clone(),
            LocalAuthority {
                config: config.clone(),
                key,
                csr: csr.clone(),
                status: ServiceStatus::PendingCertificate,
                certificate: None,
                certificate_chain: None,
            },
        );
        registry.stats.authorities_created += 1;
        self.persist(&registry).await?;
        debug!(arn = %arn, tier = %config.tier, "created authority");

        Ok(CreatedAuthority { arn, csr })
    }

    async fn sign_certificate(&self, request: &SignRequest) -> Result<String> {
        let operation = ServiceOperation::SignCertificate;
        self.check_injected(operation).await?;

        let csr = Csr::from_escaped(&request.csr)
            .map_err(|e| Error::service(operation.name(), format!("MalformedCSRException: {e}")))?;
        let template = CertificateTemplate::from_arn(&request.template_arn)
            .ok_or_else(|| Error::service(operation.name(), format!("unknown template {}", request.template_arn)))?;

        let mut registry = self.registry.write().await;
        let dedup_key = (request.idempotency_token.clone(), request.csr.clone());
        if let Some(existing) = registry.idempotency.get(&dedup_key) {
            return Ok(existing.clone());
        }

        let issuer_arn = &request.certificate_authority_arn;
        let issuer = registry
            .authorities
            .get(issuer_arn)
            .ok_or_else(|| not_found(operation, &issuer_arn.to_string()))?;

        let mut csr_params = CertificateSigningRequestParams::from_pem(csr.as_pem())
            .map_err(|e| Error::service(operation.name(), format!("MalformedCSRException: {e}")))?;
        let (not_before, not_after) = validity_window(request.validity)?;
        csr_params.params.not_before = not_before;
        csr_params.params.not_after = not_after;
        csr_params.params.serial_number = Some(random_serial());
        apply_template(&mut csr_params.params, template)?;
        for extension in &request.custom_extensions {
            csr_params.params.custom_extensions.push(to_rcgen_extension(extension)?);
        }

        let body = if template == CertificateTemplate::RootCaApiPassthrough {
            if issuer.config.tier != Tier::Root || issuer.csr.escaped_for_json() != csr.escaped_for_json() {
                return Err(Error::service(
                    operation.name(),
                    "InvalidRequestException: root template only signs the authority's own request",
                ));
            }
            let certificate = csr_params
                .params
                .self_signed(&issuer.key)
                .map_err(|e| Error::service(operation.name(), format!("certificate signing failed: {e}")))?;
            CertificateBody {
                certificate: certificate.pem(),
                certificate_chain: None,
            }
        } else {
            let (Some(issuer_pem), ServiceStatus::Active) = (issuer.certificate.as_deref(), issuer.status) else {
                return Err(Error::service(
                    operation.name(),
                    format!("InvalidStateException: authority {issuer_arn} is not active"),
                ));
            };
            let signer = Issuer::from_ca_cert_pem(issuer_pem, &issuer.key)
                .map_err(|e| Error::service(operation.name(), format!("failed to load issuer: {e}")))?;
            let certificate = csr_params
                .signed_by(&signer)
                .map_err(|e| Error::service(operation.name(), format!("certificate signing failed: {e}")))?;
            CertificateBody {
                certificate: certificate.pem(),
                certificate_chain: Some(join_chain(issuer_pem, issuer.certificate_chain.as_deref())),
            }
        };

        let certificate_arn = issuer_arn.certificate_arn(&Uuid::new_v4().simple().to_string());
        registry.issued.insert(
            certificate_arn.clone(),
            IssuedCertificate {
                issuer: issuer_arn.clone(),
                body,
            },
        );
        registry.idempotency.insert(dedup_key, certificate_arn.clone());
        registry.stats.certificates_issued += 1;
        if template == CertificateTemplate::RootCaApiPassthrough {
            registry.stats.self_signed_certificates += 1;
        }
        self.persist(&registry).await?;
        debug!(issuer = %issuer_arn, certificate = %certificate_arn, template = %template, "issued certificate");

        Ok(certificate_arn)
    }

    async fn get_certificate(&self, authority: &AuthorityArn, certificate_arn: &str) -> Result<CertificateBody> {
        let operation = ServiceOperation::GetCertificate;
        self.check_injected(operation).await?;

        let mut registry = self.registry.write().await;
        let body = registry
            .issued
            .get(certificate_arn)
            .filter(|issued| &issued.issuer == authority)
            .map(|issued| issued.body.clone())
            .ok_or_else(|| not_found(operation, certificate_arn))?;
        registry.stats.certificate_fetches += 1;
        Ok(body)
    }

    async fn get_authority_certificate(&self, authority: &AuthorityArn) -> Result<CertificateBody> {
        let operation = ServiceOperation::GetAuthorityCertificate;
        self.check_injected(operation).await?;

        let mut registry = self.registry.write().await;
        let entry = registry
            .authorities
            .get(authority)
            .ok_or_else(|| not_found(operation, &authority.to_string()))?;
        let Some(certificate) = entry.certificate.clone() else {
            return Err(Error::service(
                operation.name(),
                format!("InvalidStateException: authority {authority} has no certificate installed"),
            ));
        };
        let body = CertificateBody {
            certificate,
            certificate_chain: entry.certificate_chain.clone(),
        };
        registry.stats.authority_certificate_fetches += 1;
        Ok(body)
    }

    async fn activate_authority(&self, request: &ActivationRequest) -> Result<()> {
        let operation = ServiceOperation::ActivateAuthority;
        self.check_injected(operation).await?;

        let certificate = Certificate::from_pem(&request.certificate)?;
        let mut registry = self.registry.write().await;
        let entry = registry
            .authorities
            .get_mut(&request.arn)
            .ok_or_else(|| not_found(operation, &request.arn.to_string()))?;

        if entry.status == ServiceStatus::Active {
            if entry.certificate.as_deref() == Some(request.certificate.as_str()) {
                return Ok(());
            }
            return Err(Error::service(
                operation.name(),
                format!("InvalidStateException: authority {} is already active", request.arn),
            ));
        }

        let subject = SubjectAttributeSet::classify(entry.config.tier, &certificate.subject_attributes()?)?;
        if subject != entry.config.subject {
            return Err(Error::service(
                operation.name(),
                "CertificateMismatchException: certificate subject does not match the authority",
            ));
        }

        match (entry.config.tier, request.certificate_chain.as_deref()) {
            (Tier::Root, None) => certificate.verify_issued_by(&certificate)?,
            (Tier::Subordinate, Some(chain)) => {
                let parent = Certificate::from_pem(chain)?;
                certificate.verify_issued_by(&parent)?;
            }
            (Tier::Root, Some(_)) => {
                return Err(Error::service(
                    operation.name(),
                    "InvalidRequestException: root certificates take no chain",
                ))
            }
            (Tier::Subordinate, None) => {
                return Err(Error::service(
                    operation.name(),
                    "InvalidRequestException: subordinate certificates require a chain",
                ))
            }
        }

        entry.status = ServiceStatus::Active;
        entry.certificate = Some(request.certificate.clone());
        entry.certificate_chain = request.certificate_chain.clone();
        registry.stats.activations += 1;
        self.persist(&registry).await?;
        debug!(arn = %request.arn, "activated authority");
        Ok(())
    }

    async fn describe_authority(&self, authority: &AuthorityArn) -> Result<AuthorityDescription> {
        let operation = ServiceOperation::DescribeAuthority;
        self.check_injected(operation).await?;

        let registry = self.registry.read().await;
        let entry = registry
            .authorities
            .get(authority)
            .ok_or_else(|| not_found(operation, &authority.to_string()))?;
        Ok(AuthorityDescription {
            arn: authority.clone(),
            tier: entry.config.tier,
            status: entry.status,
            subject_custom_attributes: entry.config.subject.attributes(),
            tags: entry.config.tags.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authority::{AuthorityStatus, SigningAlgorithm};
    use crate::identifier::{Identifier, IdentifierField};
    use crate::subject::compose;

    fn config(tier: Tier) -> AuthorityConfig {
        let vid = Identifier::validate(IdentifierField::VendorId, "FFF1").unwrap();
        let pid = Identifier::validate(IdentifierField::ProductId, "8000").unwrap();
        let subject = compose(tier, "Test", &vid, "Org", None, Some(&pid));
        AuthorityConfig::new(tier, subject, "crl-bucket")
    }

    fn sign_request(issuer: &AuthorityArn, csr: &Csr, template: CertificateTemplate) -> SignRequest {
        SignRequest {
            certificate_authority_arn: issuer.clone(),
            csr: csr.escaped_for_json(),
            template_arn: template.arn(),
            validity: Validity::Days(30),
            signing_algorithm: SigningAlgorithm::Sha256WithEcdsa,
            custom_extensions: Vec::new(),
            idempotency_token: Uuid::new_v4().to_string(),
        }
    }

    async fn active_root(service: &LocalAuthorityService) -> (AuthorityArn, String) {
        let root = service.create_authority(&config(Tier::Root)).await.unwrap();
        let request = sign_request(&root.arn, &root.csr, CertificateTemplate::RootCaApiPassthrough);
        let cert_arn = service.sign_certificate(&request).await.unwrap();
        let body = service.get_certificate(&root.arn, &cert_arn).await.unwrap();
        service
            .activate_authority(&ActivationRequest {
                arn: root.arn.clone(),
                certificate: body.certificate.clone(),
                certificate_chain: None,
                status: AuthorityStatus::Active,
            })
            .await
            .unwrap();
        (root.arn, body.certificate)
    }

    #[tokio::test]
    async fn test_root_self_sign_and_activate() {
        let service = LocalAuthorityService::new("us-east-1", "111122223333");
        let (arn, pem) = active_root(&service).await;

        let cert = Certificate::from_pem(&pem).unwrap();
        assert!(cert.is_self_issued().unwrap());
        assert!(cert.ca_constraints().unwrap().unwrap().ca);
        assert_eq!(cert.subject_attributes().unwrap().len(), 3);

        let description = service.describe_authority(&arn).await.unwrap();
        assert_eq!(description.status, ServiceStatus::Active);

        let stats = service.stats().await;
        assert_eq!(stats.self_signed_certificates, 1);
        assert_eq!(stats.activations, 1);
    }

    #[tokio::test]
    async fn test_subordinate_takes_key_usage_from_request() {
        let service = LocalAuthorityService::new("us-east-1", "111122223333");
        let (root_arn, root_pem) = active_root(&service).await;

        let sub = service.create_authority(&config(Tier::Subordinate)).await.unwrap();
        let mut request = sign_request(&root_arn, &sub.csr, CertificateTemplate::SubordinateCaPathLen0ApiPassthrough);
        request.custom_extensions.push(CustomExtension {
            object_identifier: oid::KEY_USAGE.to_string(),
            value: "AwIBBg==".to_string(),
            critical: true,
        });
        let cert_arn = service.sign_certificate(&request).await.unwrap();
        let body = service.get_certificate(&root_arn, &cert_arn).await.unwrap();
        assert_eq!(body.certificate_chain.as_deref(), Some(root_pem.as_str()));

        let cert = Certificate::from_pem(&body.certificate).unwrap();
        let usage = cert.key_usage().unwrap().unwrap();
        assert!(usage.key_cert_sign && usage.crl_sign && usage.critical);
        assert!(!usage.digital_signature);
        assert_eq!(cert.ca_constraints().unwrap().unwrap().path_len, Some(0));
        assert_eq!(cert.subject_attributes().unwrap().len(), 4);
        cert.verify_issued_by(&Certificate::from_pem(&root_pem).unwrap()).unwrap();
    }

    #[tokio::test]
    async fn test_root_template_refuses_foreign_csr() {
        let service = LocalAuthorityService::new("us-east-1", "111122223333");
        let root = service.create_authority(&config(Tier::Root)).await.unwrap();
        let other = service.create_authority(&config(Tier::Root)).await.unwrap();
        let request = sign_request(&root.arn, &other.csr, CertificateTemplate::RootCaApiPassthrough);
        assert!(service.sign_certificate(&request).await.is_err());
    }

    #[tokio::test]
    async fn test_inactive_parent_cannot_sign() {
        let service = LocalAuthorityService::new("us-east-1", "111122223333");
        let root = service.create_authority(&config(Tier::Root)).await.unwrap();
        let sub = service.create_authority(&config(Tier::Subordinate)).await.unwrap();
        let request = sign_request(&root.arn, &sub.csr, CertificateTemplate::SubordinateCaPathLen0ApiPassthrough);
        assert!(service.sign_certificate(&request).await.is_err());
    }

    #[tokio::test]
    async fn test_idempotency_token_deduplicates() {
        let service = LocalAuthorityService::new("us-east-1", "111122223333");
        let root = service.create_authority(&config(Tier::Root)).await.unwrap();
        let request = sign_request(&root.arn, &root.csr, CertificateTemplate::RootCaApiPassthrough);

        let first = service.sign_certificate(&request).await.unwrap();
        let second = service.sign_certificate(&request).await.unwrap();
        assert_eq!(first, second);

        let mut fresh = request.clone();
        fresh.idempotency_token = Uuid::new_v4().to_string();
        assert_ne!(service.sign_certificate(&fresh).await.unwrap(), first);
        assert_eq!(service.stats().await.certificates_issued, 2);
    }

    #[tokio::test]
    async fn test_injected_failure_fires_once() {
        let service = LocalAuthorityService::new("us-east-1", "111122223333");
        service.fail_next(ServiceOperation::CreateAuthority, true).await;

        let err = service.create_authority(&config(Tier::Root)).await.unwrap_err();
        assert!(err.is_transient());
        assert!(service.create_authority(&config(Tier::Root)).await.is_ok());
    }

    #[tokio::test]
    async fn test_subordinate_activation_requires_chain() {
        let service = LocalAuthorityService::new("us-east-1", "111122223333");
        let (root_arn, _) = active_root(&service).await;
        let sub = service.create_authority(&config(Tier::Subordinate)).await.unwrap();
        let request = sign_request(&root_arn, &sub.csr, CertificateTemplate::SubordinateCaPathLen0ApiPassthrough);
        let cert_arn = service.sign_certificate(&request).await.unwrap();
        let body = service.get_certificate(&root_arn, &cert_arn).await.unwrap();

        let activation = ActivationRequest {
            arn: sub.arn.clone(),
            certificate: body.certificate,
            certificate_chain: None,
            status: AuthorityStatus::Active,
        };
        assert!(service.activate_authority(&activation).await.is_err());

        let activation = ActivationRequest {
            certificate_chain: body.certificate_chain,
            ..activation
        };
        service.activate_authority(&activation).await.unwrap();
        // Re-importing the same certificate is a no-op.
        service.activate_authority(&activation).await.unwrap();
        assert_eq!(service.stats().await.activations, 2);
    }

    #[tokio::test]
    async fn test_end_entity_template_is_rejected() {
        let service = LocalAuthorityService::new("us-east-1", "111122223333");
        let (root_arn, _) = active_root(&service).await;
        let sub = service.create_authority(&config(Tier::Subordinate)).await.unwrap();

        let request = sign_request(
            &root_arn,
            &sub.csr,
            CertificateTemplate::EndEntityCriticalBasicConstraintsApiPassthrough,
        );
        let err = service.sign_certificate(&request).await.unwrap_err();
        assert!(matches!(err, Error::Service { .. }));
        assert!(err.to_string().contains("not supported"));
        assert_eq!(service.stats().await.certificates_issued, 1);
    }

    #[tokio::test]
    async fn test_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("authorities.json");

        let service = LocalAuthorityService::open("us-east-1", "111122223333", path.clone())
            .await
            .unwrap();
        let (root_arn, root_pem) = active_root(&service).await;
        let sub = service.create_authority(&config(Tier::Subordinate)).await.unwrap();
        assert_eq!(service.store_path(), Some(path.as_path()));
        drop(service);

        let reopened = LocalAuthorityService::open("us-east-1", "111122223333", path.clone())
            .await
            .unwrap();
        assert_eq!(reopened.authority_count().await, 2);
        let stored = reopened.get_authority_certificate(&root_arn).await.unwrap();
        assert_eq!(stored.certificate, root_pem);
        let description = reopened.describe_authority(&sub.arn).await.unwrap();
        assert_eq!(description.status, ServiceStatus::PendingCertificate);

        // The restored root key still signs.
        let request = sign_request(&root_arn, &sub.csr, CertificateTemplate::SubordinateCaPathLen0ApiPassthrough);
        let cert_arn = reopened.sign_certificate(&request).await.unwrap();
        let body = reopened.get_certificate(&root_arn, &cert_arn).await.unwrap();
        Certificate::from_pem(&body.certificate)
            .unwrap()
            .verify_issued_by(&Certificate::from_pem(&root_pem).unwrap())
            .unwrap();
    }

    #[tokio::test]
    async fn test_missing_store_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let service = LocalAuthorityService::open("eu-west-1", "111122223333", dir.path().join("none.json"))
            .await
            .unwrap();
        assert_eq!(service.authority_count().await, 0);
        assert!(!dir.path().join("none.json").exists());
    }
}
