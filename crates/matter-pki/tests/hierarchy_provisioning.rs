//! End-to-end provisioning of the attestation hierarchy.
//!
//! ```text
//! DeploymentConfig → DeploymentIntent → create (CSR_ISSUED)
//!   → sign (SIGNED) → fetch → activate (ACTIVATED) → outputs
//! ```
//!
//! Every scenario runs against in-process regional authority services.

use std::sync::Arc;

use chrono::{TimeZone, Utc};
use matter_pki::audit::{verify_file, AuditEvent};
use matter_pki::certificate::Certificate;
use matter_pki::{
    AuthorityArn, AuthorityService, DeploymentConfig, Error, HierarchyOrchestrator, LifecycleManager,
    LifecycleState, LocalAuthorityService, ProvisioningAudit, ProvisioningReport, RefreshPolicy, RegionalServices,
    RemovalOperation, SharedResourceDecision, SigningStep, ValidationError,
};
use matter_pki::ca::ServiceOperation;

const ACCOUNT: &str = "111122223333";

fn root_config(region: &str) -> DeploymentConfig {
    let mut config = DeploymentConfig::new(region);
    config.account = ACCOUNT.to_string();
    config.generate_new_root = true;
    config.vendor_id = Some("1234".to_string());
    config.common_names = "Test".to_string();
    config.organizations = "Org".to_string();
    config
}

fn batch_config(region: &str, parent: &AuthorityArn, count: usize) -> DeploymentConfig {
    let mut config = DeploymentConfig::new(region);
    config.account = ACCOUNT.to_string();
    config.subordinate_count = Some(count);
    config.parent_authority_arn = Some(parent.to_string());
    config.common_names = (0..count).map(|i| format!("PAI {i}")).collect::<Vec<_>>().join(",");
    config.organizations = vec!["Org"; count].join(",");
    config.product_ids = (0..count).map(|i| format!("{:04X}", 0x8000 + i)).collect::<Vec<_>>().join(",");
    config.crl_bucket_name = Some("matter-crl-bucket".to_string());
    config.dac_validity_days = Some(365);
    config
}

fn orchestrator(config: DeploymentConfig, services: RegionalServices) -> HierarchyOrchestrator {
    HierarchyOrchestrator::new(
        config,
        services,
        LifecycleManager::in_memory(ProvisioningAudit::in_memory()),
    )
}

async fn provision_root(service: &Arc<LocalAuthorityService>) -> (ProvisioningReport, AuthorityArn) {
    let services = RegionalServices::new().with(service.clone());
    let report = orchestrator(root_config(service.region()), services)
        .provision()
        .await
        .unwrap();
    assert!(report.succeeded(), "{:?}", report.failures().collect::<Vec<_>>());
    let arn = report.authorities[0].arn.clone().unwrap();
    (report, arn)
}

// ============================================================================
// Root generation
// ============================================================================

#[tokio::test]
async fn root_generation_produces_one_activated_authority() {
    let service = Arc::new(LocalAuthorityService::new("us-east-1", ACCOUNT));
    let services = RegionalServices::new().with(service.clone());
    let orchestrator = orchestrator(root_config("us-east-1"), services);

    let report = orchestrator.provision().await.unwrap();
    assert!(report.succeeded());

    let stats = service.stats().await;
    assert_eq!(stats.authorities_created, 1);
    assert_eq!(stats.certificates_issued, 1);
    assert_eq!(stats.self_signed_certificates, 1);
    assert_eq!(stats.activations, 1);

    let records = orchestrator.lifecycle().records().await;
    assert_eq!(records.len(), 1);
    let root = &records[0];
    assert_eq!(root.state, LifecycleState::Activated);
    assert_eq!(root.config.subject.len(), 3);
    assert!(root.activation.as_ref().unwrap().certificate_chain.is_none());

    let certificate = Certificate::from_pem(root.certificate.as_deref().unwrap()).unwrap();
    assert!(certificate.is_self_issued().unwrap());
    assert_eq!(certificate.subject_attributes().unwrap(), root.config.subject.attributes());
    let usage = certificate.key_usage().unwrap().unwrap();
    assert!(usage.key_cert_sign && usage.crl_sign && usage.digital_signature);

    assert_eq!(
        report.output("PAA"),
        Some(format!("VID=1234 CN=Test {}", root.arn).as_str())
    );
    assert_eq!(report.output("PAACertArn"), root.certificate_arn.as_deref());
    assert_eq!(report.shared_infrastructure.decision, SharedResourceDecision::Create);
}

#[tokio::test]
async fn end_date_becomes_certificate_not_after() {
    let service = Arc::new(LocalAuthorityService::new("us-east-1", ACCOUNT));
    let mut config = root_config("us-east-1");
    config.validity_end_date = "20401231235959".to_string();
    let orchestrator = orchestrator(config, RegionalServices::new().with(service));

    let report = orchestrator.provision().await.unwrap();
    assert!(report.succeeded());

    let root = orchestrator.lifecycle().get("PAA").await.unwrap();
    let certificate = Certificate::from_pem(root.certificate.as_deref().unwrap()).unwrap();
    assert_eq!(
        certificate.not_after().unwrap(),
        Utc.with_ymd_and_hms(2040, 12, 31, 23, 59, 59).unwrap()
    );
}

#[tokio::test]
async fn compose_is_deterministic_across_runs() {
    let first = Arc::new(LocalAuthorityService::new("us-east-1", ACCOUNT));
    let second = Arc::new(LocalAuthorityService::new("us-east-1", ACCOUNT));
    let a = orchestrator(root_config("us-east-1"), RegionalServices::new().with(first));
    let b = orchestrator(root_config("us-east-1"), RegionalServices::new().with(second));
    a.provision().await.unwrap();
    b.provision().await.unwrap();

    let a = a.lifecycle().records().await;
    let b = b.lifecycle().records().await;
    assert_eq!(a[0].config.subject, b[0].config.subject);
    assert_eq!(
        serde_json::to_vec(&a[0].config.subject.attributes()).unwrap(),
        serde_json::to_vec(&b[0].config.subject.attributes()).unwrap()
    );
}

// ============================================================================
// Subordinate batches
// ============================================================================

#[tokio::test]
async fn five_subordinates_are_chained_to_the_parent() {
    let service = Arc::new(LocalAuthorityService::new("us-east-1", ACCOUNT));
    let (_, root_arn) = provision_root(&service).await;
    let before = service.stats().await;

    let services = RegionalServices::new().with(service.clone());
    let orchestrator = orchestrator(batch_config("us-east-1", &root_arn, 5), services);
    let report = orchestrator.provision().await.unwrap();
    assert!(report.succeeded());

    let after = service.stats().await;
    assert_eq!(after.authorities_created - before.authorities_created, 5);
    assert_eq!(after.self_signed_certificates, before.self_signed_certificates);
    assert_eq!(after.activations - before.activations, 5);
    assert_eq!(after.authority_certificate_fetches - before.authority_certificate_fetches, 1);

    let parent_pem = service.get_authority_certificate(&root_arn).await.unwrap().certificate;
    let parent = Certificate::from_pem(&parent_pem).unwrap();

    let records = orchestrator.lifecycle().records().await;
    assert_eq!(records.len(), 5);
    for record in &records {
        assert_eq!(record.state, LifecycleState::Activated);
        assert_eq!(record.parent.as_ref(), Some(&root_arn));
        assert_eq!(record.config.subject.vendor_id().as_str(), "1234");
        let activation = record.activation.as_ref().unwrap();
        assert_eq!(activation.certificate_chain.as_deref(), Some(parent_pem.as_str()));

        let certificate = Certificate::from_pem(&activation.certificate).unwrap();
        certificate.verify_issued_by(&parent).unwrap();
        let constraints = certificate.ca_constraints().unwrap().unwrap();
        assert!(constraints.ca);
        assert_eq!(constraints.path_len, Some(0));
        let usage = certificate.key_usage().unwrap().unwrap();
        assert!(usage.key_cert_sign && usage.crl_sign && usage.critical);
        assert!(!usage.digital_signature);
    }

    for i in 0..5 {
        let line = report.output(&format!("PAI{i}")).unwrap();
        assert!(line.starts_with(&format!("VID=1234 PID={:04X} CN=PAI {i} arn:", 0x8000 + i)), "{line}");
        assert!(report.output(&format!("CertArnPAI{i}")).is_some());
        assert!(report.output(&format!("CertLinkPAI{i}")).unwrap().contains("tab=certificate"));
    }
    assert!(report.access.issuance_worker.is_some());
    assert_eq!(report.stack_name, "MatterStackPAI");
}

#[tokio::test]
async fn pid_count_mismatch_fails_before_any_authority_is_created() {
    let service = Arc::new(LocalAuthorityService::new("us-east-1", ACCOUNT));
    let (_, root_arn) = provision_root(&service).await;
    let before = service.authority_count().await;

    let mut config = batch_config("us-east-1", &root_arn, 5);
    config.product_ids = "8000,8001".to_string();
    let err = orchestrator(config, RegionalServices::new().with(service.clone()))
        .provision()
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        Error::Validation(ValidationError::ProductIdCountMismatch { expected: 5, actual: 2 })
    ));
    assert_eq!(service.authority_count().await, before);
}

#[tokio::test]
async fn subordinates_without_pids_omit_the_pid_segment() {
    let service = Arc::new(LocalAuthorityService::new("us-east-1", ACCOUNT));
    let (_, root_arn) = provision_root(&service).await;

    let mut config = batch_config("us-east-1", &root_arn, 2);
    config.product_ids = String::new();
    config.organizational_units = "Lights,Locks".to_string();
    let orchestrator = orchestrator(config, RegionalServices::new().with(service));
    let report = orchestrator.provision().await.unwrap();

    assert!(report.succeeded());
    assert!(report.output("PAI1").unwrap().starts_with("VID=1234 CN=PAI 1 arn:"));
    let record = orchestrator.lifecycle().get("PAI-1").await.unwrap();
    assert_eq!(record.config.subject.len(), 4);
    assert_eq!(record.config.subject.organizational_unit(), Some("Locks"));
}

// ============================================================================
// Resume semantics
// ============================================================================

#[tokio::test]
async fn failed_activation_resumes_without_resigning() {
    let service = Arc::new(LocalAuthorityService::new("us-east-1", ACCOUNT));
    let (_, root_arn) = provision_root(&service).await;

    let orchestrator = orchestrator(
        batch_config("us-east-1", &root_arn, 3),
        RegionalServices::new().with(service.clone()),
    );
    service.fail_next(ServiceOperation::ActivateAuthority, true).await;
    let first = orchestrator.provision().await.unwrap();

    assert!(!first.succeeded());
    let failures: Vec<_> = first.failures().collect();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].state, Some(LifecycleState::Signed));
    assert!(failures[0].error.as_deref().unwrap().contains(&failures[0].logical_id));
    assert_eq!(first.authorities.iter().filter(|a| a.is_activated()).count(), 2);
    let issued = service.stats().await.certificates_issued;

    let second = orchestrator.provision().await.unwrap();
    assert!(second.succeeded());
    assert_ne!(first.execution_token, second.execution_token);
    assert_eq!(service.stats().await.certificates_issued, issued);
    for record in orchestrator.lifecycle().records().await {
        assert_eq!(record.state, LifecycleState::Activated);
    }

    let failed_steps: Vec<_> = orchestrator
        .lifecycle()
        .audit()
        .export()
        .into_iter()
        .filter_map(|r| match r.event {
            AuditEvent::StepFailed { step, .. } => Some(step),
            _ => None,
        })
        .collect();
    assert_eq!(failed_steps, [SigningStep::Activate]);
}

#[tokio::test]
async fn failed_signing_leaves_siblings_untouched() {
    let service = Arc::new(LocalAuthorityService::new("us-east-1", ACCOUNT));
    let (_, root_arn) = provision_root(&service).await;

    let orchestrator = orchestrator(
        batch_config("us-east-1", &root_arn, 2),
        RegionalServices::new().with(service.clone()),
    );
    service.fail_next(ServiceOperation::SignCertificate, false).await;
    let report = orchestrator.provision().await.unwrap();

    let failed = report.failures().next().unwrap();
    assert_eq!(failed.state, Some(LifecycleState::CsrIssued));
    assert!(failed.error.as_deref().unwrap().contains("sign"));
    let sibling = report.authorities.iter().find(|a| a.error.is_none()).unwrap();
    assert!(sibling.is_activated());
    assert!(report.output(&format!("PAI{}", &sibling.logical_id[4..])).is_some());
}

#[tokio::test]
async fn persisted_state_resumes_in_a_new_process() {
    let dir = tempfile::tempdir().unwrap();
    let state = dir.path().join("state.json");
    let audit_path = dir.path().join("audit.jsonl");
    let service = Arc::new(LocalAuthorityService::new("us-east-1", ACCOUNT));

    let audit = ProvisioningAudit::open(&audit_path).unwrap();
    let lifecycle = LifecycleManager::open(&state, audit).await.unwrap();
    HierarchyOrchestrator::new(
        root_config("us-east-1"),
        RegionalServices::new().with(service.clone()),
        lifecycle,
    )
    .provision()
    .await
    .unwrap();
    let stats = service.stats().await;

    let audit = ProvisioningAudit::open(&audit_path).unwrap();
    let lifecycle = LifecycleManager::open(&state, audit).await.unwrap();
    let report = HierarchyOrchestrator::new(
        root_config("us-east-1"),
        RegionalServices::new().with(service.clone()),
        lifecycle,
    )
    .with_refresh_policy(RefreshPolicy::ReuseRecorded)
    .provision()
    .await
    .unwrap();

    assert!(report.succeeded());
    assert_eq!(service.stats().await, stats);
    assert!(verify_file(&audit_path).unwrap().unwrap() > 0);
}

// ============================================================================
// Deletion safety
// ============================================================================

#[tokio::test]
async fn deletion_and_replacement_are_rejected_in_every_state() {
    let service = Arc::new(LocalAuthorityService::new("us-east-1", ACCOUNT));
    let (_, root_arn) = provision_root(&service).await;

    let orchestrator = orchestrator(
        batch_config("us-east-1", &root_arn, 3),
        RegionalServices::new().with(service.clone()),
    );
    // PAI-0 stops at CSR_ISSUED, one sibling at SIGNED, one activates.
    service.fail_next(ServiceOperation::SignCertificate, false).await;
    service.fail_next(ServiceOperation::ActivateAuthority, false).await;
    orchestrator.provision().await.unwrap();

    let lifecycle = orchestrator.lifecycle();
    let mut states = Vec::new();
    for record in lifecycle.records().await {
        states.push(record.state);
        for (operation, result) in [
            (RemovalOperation::Delete, lifecycle.delete(&record.logical_id).await),
            (
                RemovalOperation::Replace,
                lifecycle.replace(&record.logical_id, record.config.clone()).await,
            ),
        ] {
            match result {
                Err(Error::DeletionSafety { authority, operation: rejected }) => {
                    assert_eq!(authority, record.logical_id);
                    assert_eq!(rejected, operation);
                }
                other => panic!("{operation} of {} was not rejected: {other:?}", record.logical_id),
            }
        }
        assert_ne!(lifecycle.get(&record.logical_id).await, None);
    }
    states.sort();
    states.dedup();
    assert!(states.len() >= 2, "expected authorities in several states, got {states:?}");

    let rejections = lifecycle
        .audit()
        .export()
        .into_iter()
        .filter(|r| matches!(r.event, AuditEvent::DeletionRejected { .. }))
        .count();
    assert_eq!(rejections, 6);
    assert!(lifecycle.audit().verify_chain().is_ok());
}

// ============================================================================
// Cross-region
// ============================================================================

#[tokio::test]
async fn cross_region_subordinates_are_signed_by_the_parent_region() {
    let east = Arc::new(LocalAuthorityService::new("us-east-1", ACCOUNT));
    let west = Arc::new(LocalAuthorityService::new("eu-west-1", ACCOUNT));
    let (_, root_arn) = provision_root(&east).await;
    let east_before = east.stats().await;

    let services = RegionalServices::new().with(east.clone()).with(west.clone());
    let orchestrator = orchestrator(batch_config("eu-west-1", &root_arn, 2), services);
    let report = orchestrator.provision().await.unwrap();
    assert!(report.succeeded());

    assert_eq!(west.authority_count().await, 2);
    assert_eq!(west.stats().await.activations, 2);
    assert_eq!(west.stats().await.certificates_issued, 0);
    assert_eq!(east.stats().await.certificates_issued - east_before.certificates_issued, 2);

    for record in orchestrator.lifecycle().records().await {
        assert_eq!(record.arn.region(), "eu-west-1");
        assert!(report
            .output(&format!("CertLinkPAI{}", &record.logical_id[4..]))
            .unwrap()
            .contains("region=eu-west-1"));
    }
    assert_eq!(report.shared_infrastructure.decision, SharedResourceDecision::Create);
    assert!(report.shared_infrastructure.resources.is_some());
}

#[tokio::test]
async fn same_region_subordinates_assume_shared_infrastructure() {
    let service = Arc::new(LocalAuthorityService::new("us-east-1", ACCOUNT));
    let (_, root_arn) = provision_root(&service).await;

    let report = orchestrator(
        batch_config("us-east-1", &root_arn, 1),
        RegionalServices::new().with(service),
    )
    .provision()
    .await
    .unwrap();
    assert_eq!(
        report.shared_infrastructure.decision,
        SharedResourceDecision::AssumeExisting
    );
    assert!(report.shared_infrastructure.resources.is_none());
    assert!(report.output("LogGroupName").is_none());
}

#[tokio::test]
async fn missing_parent_region_is_a_run_level_error() {
    let east = Arc::new(LocalAuthorityService::new("us-east-1", ACCOUNT));
    let (_, root_arn) = provision_root(&east).await;
    let west = Arc::new(LocalAuthorityService::new("eu-west-1", ACCOUNT));

    let err = orchestrator(
        batch_config("eu-west-1", &root_arn, 1),
        RegionalServices::new().with(west.clone()),
    )
    .provision()
    .await
    .unwrap_err();
    assert!(matches!(err, Error::Config(_)));
    assert_eq!(west.authority_count().await, 0);
}
