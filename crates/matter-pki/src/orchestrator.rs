//! Hierarchy orchestrator.
//!
//! Drives one provisioning run:
//!
//! 1. resolve the [`DeploymentIntent`] (all validation happens here)
//! 2. for a generated root: create it, self-sign, activate
//! 3. for a subordinate batch: read the VID from the parent, fetch the
//!    parent certificate once, then create, sign and activate every
//!    subordinate concurrently
//! 4. plan capability scopes and region-shared infrastructure
//!
//! A failing authority does not stop its siblings. It is reported in its
//! [`AuthorityOutcome`] and fails the run as a whole; completed siblings
//! keep their state and a re-run resumes the rest.

use crate::access::AccessPlan;
use crate::arn::AuthorityArn;
use crate::audit::AuditEvent;
use crate::authority::{AuthorityConfig, AuthorityRecord, LifecycleState, Tier};
use crate::ca::AuthorityService;
use crate::config::DeploymentConfig;
use crate::identifier::{Identifier, IdentifierField};
use crate::intent::{DeploymentIntent, IntentKind, RootSpec, SubordinateBatch, SubordinateSpec};
use crate::lifecycle::{LifecycleManager, ROOT_LOGICAL_ID};
use crate::outputs::{self, DeploymentOutput};
use crate::shared::SharedInfrastructurePlan;
use crate::signing::{ExecutionToken, ParentAuthority, RefreshPolicy, SigningWorkflow};
use crate::{oid, Error, Result, ValidationError};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Authority services by region.
#[derive(Clone, Default)]
pub struct RegionalServices {
    services: BTreeMap<String, Arc<dyn AuthorityService>>,
}

impl RegionalServices {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `service` under its own region, replacing any earlier one.
    pub fn insert(&mut self, service: Arc<dyn AuthorityService>) {
        self.services.insert(service.region().to_string(), service);
    }

    /// Builder form of [`insert`](Self::insert).
    pub fn with(mut self, service: Arc<dyn AuthorityService>) -> Self {
        self.insert(service);
        self
    }

    /// Service of `region`.
    pub fn get(&self, region: &str) -> Result<Arc<dyn AuthorityService>> {
        self.services
            .get(region)
            .cloned()
            .ok_or_else(|| Error::Config(format!("no authority service configured for region {region}")))
    }

    /// Configured regions.
    pub fn regions(&self) -> impl Iterator<Item = &str> {
        self.services.keys().map(String::as_str)
    }
}

impl std::fmt::Debug for RegionalServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.regions()).finish()
    }
}

/// How one authority fared in a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorityOutcome {
    /// `PAA` or `PAI-<index>`.
    pub logical_id: String,
    /// Root or subordinate.
    pub tier: Tier,
    /// Assigned ARN, once created.
    pub arn: Option<AuthorityArn>,
    /// Last state reached; `None` if the authority was never created.
    pub state: Option<LifecycleState>,
    /// Failure message when the authority did not reach `ACTIVATED`.
    pub error: Option<String>,
}

impl AuthorityOutcome {
    fn from_result(logical_id: String, tier: Tier, result: &Result<AuthorityRecord>, last: Option<AuthorityRecord>) -> Self {
        match result {
            Ok(record) => Self {
                logical_id,
                tier,
                arn: Some(record.arn.clone()),
                state: Some(record.state),
                error: None,
            },
            Err(e) => Self {
                logical_id,
                tier,
                arn: last.as_ref().map(|r| r.arn.clone()),
                state: last.map(|r| r.state),
                error: Some(e.to_string()),
            },
        }
    }

    /// True once the authority is activated.
    pub fn is_activated(&self) -> bool {
        self.error.is_none() && self.state == Some(LifecycleState::Activated)
    }
}

/// Everything a run produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisioningReport {
    pub stack_name: String,
    pub intent_kind: IntentKind,
    pub execution_token: ExecutionToken,
    pub authorities: Vec<AuthorityOutcome>,
    pub outputs: Vec<DeploymentOutput>,
    pub shared_infrastructure: SharedInfrastructurePlan,
    pub access: AccessPlan,
    /// Hash of the last audit record.
    pub audit_tail: Option<String>,
}

impl ProvisioningReport {
    /// True if no authority failed.
    pub fn succeeded(&self) -> bool {
        self.authorities.iter().all(|a| a.error.is_none())
    }

    /// Failed authorities.
    pub fn failures(&self) -> impl Iterator<Item = &AuthorityOutcome> {
        self.authorities.iter().filter(|a| a.error.is_some())
    }

    /// Value of output `key`.
    pub fn output(&self, key: &str) -> Option<&str> {
        self.outputs.iter().find(|o| o.key == key).map(|o| o.value.as_str())
    }
}

/// Drives provisioning runs for one deployment configuration.
pub struct HierarchyOrchestrator {
    config: DeploymentConfig,
    services: RegionalServices,
    lifecycle: LifecycleManager,
    refresh: RefreshPolicy,
}

impl HierarchyOrchestrator {
    /// Creates an orchestrator that records authorities in `lifecycle`.
    pub fn new(config: DeploymentConfig, services: RegionalServices, lifecycle: LifecycleManager) -> Self {
        Self {
            config,
            services,
            lifecycle,
            refresh: RefreshPolicy::default(),
        }
    }

    /// Sets what re-runs do with recorded certificates.
    pub fn with_refresh_policy(mut self, refresh: RefreshPolicy) -> Self {
        self.refresh = refresh;
        self
    }

    /// Configuration of this deployment.
    pub fn config(&self) -> &DeploymentConfig {
        &self.config
    }

    /// Lifecycle manager holding this deployment's records.
    pub fn lifecycle(&self) -> &LifecycleManager {
        &self.lifecycle
    }

    /// Resolves the deployment intent without touching any service.
    pub fn plan(&self) -> Result<DeploymentIntent> {
        Ok(DeploymentIntent::resolve(&self.config)?)
    }

    /// Runs one provisioning pass.
    ///
    /// Returns an error for run-level failures (invalid configuration,
    /// unknown region, unreadable parent). Per-authority failures land in
    /// the report.
    pub async fn provision(&self) -> Result<ProvisioningReport> {
        let intent = self.plan()?;
        let kind = intent.kind();
        let token = ExecutionToken::new();
        let stack_name = outputs::stack_name(&self.config.stack_prefix, kind);
        let service = self.services.get(&self.config.region)?;
        info!(stack = %stack_name, intent = %kind, region = %self.config.region, token = %token, "starting provisioning run");

        let workflow = SigningWorkflow::new(&self.lifecycle, token.clone(), self.refresh);
        let mut authorities = Vec::new();
        let mut deployment_outputs = Vec::new();

        let (access, root_region) = match &intent {
            DeploymentIntent::AdoptRoot { root } => {
                debug!(root = %root, "adopting existing root");
                (
                    AccessPlan::for_root(&self.config.stack_prefix, &self.config.account, root),
                    root.region().to_string(),
                )
            }
            DeploymentIntent::GenerateRoot(spec) => {
                let (outcome, record) = self.generate_root(service.as_ref(), &workflow, spec).await?;
                if outcome.is_activated() {
                    deployment_outputs.extend(outputs::root_outputs(&record)?);
                }
                deployment_outputs.extend(outputs::crl_bucket_outputs(&spec.crl_bucket_name, &self.config.region));
                authorities.push(outcome);
                (
                    AccessPlan::for_root(&self.config.stack_prefix, &self.config.account, &record.arn),
                    self.config.region.clone(),
                )
            }
            DeploymentIntent::Subordinates(batch) => {
                for (outcome, record) in self.provision_batch(service.as_ref(), &workflow, batch).await? {
                    if let (true, Some(record)) = (outcome.is_activated(), record.as_ref()) {
                        let index = batch
                            .subordinates
                            .iter()
                            .find(|s| s.logical_id() == outcome.logical_id)
                            .map(|s| s.index)
                            .unwrap_or_default();
                        deployment_outputs.extend(outputs::subordinate_outputs(index, record)?);
                    }
                    authorities.push(outcome);
                }
                (
                    AccessPlan::for_subordinates(batch.dac_validity_days),
                    batch.parent.region().to_string(),
                )
            }
        };

        let shared = SharedInfrastructurePlan::plan(
            &self.config.stack_prefix,
            kind,
            &self.config.region,
            &root_region,
            &access,
        );
        self.lifecycle
            .audit()
            .append(
                stack_name.clone(),
                AuditEvent::SharedInfrastructureDecided {
                    region: shared.region.clone(),
                    decision: shared.decision,
                },
            )
            .await?;
        info!(region = %shared.region, decision = %shared.decision, "region-shared infrastructure");
        deployment_outputs.extend(outputs::shared_outputs(kind, &self.config.account, &shared));

        self.lifecycle.save().await?;

        let report = ProvisioningReport {
            stack_name,
            intent_kind: kind,
            execution_token: token,
            authorities,
            outputs: deployment_outputs,
            shared_infrastructure: shared,
            access,
            audit_tail: self.lifecycle.audit().tail_hash(),
        };
        if report.succeeded() {
            info!(stack = %report.stack_name, authorities = report.authorities.len(), "provisioning run complete");
        } else {
            warn!(
                stack = %report.stack_name,
                failed = report.failures().count(),
                "provisioning run finished with failures"
            );
        }
        Ok(report)
    }

    async fn generate_root(
        &self,
        service: &dyn AuthorityService,
        workflow: &SigningWorkflow<'_>,
        spec: &RootSpec,
    ) -> Result<(AuthorityOutcome, AuthorityRecord)> {
        let config = AuthorityConfig::new(Tier::Root, spec.subject(), &spec.crl_bucket_name);
        let created = self
            .lifecycle
            .create(service, ROOT_LOGICAL_ID, config, spec.validity, None)
            .await?;

        let result = workflow.run_root(service, ROOT_LOGICAL_ID).await;
        let last = self.lifecycle.get(ROOT_LOGICAL_ID).await;
        let outcome = AuthorityOutcome::from_result(ROOT_LOGICAL_ID.to_string(), Tier::Root, &result, last.clone());
        Ok((outcome, result.ok().or(last).unwrap_or(created)))
    }

    async fn provision_batch(
        &self,
        service: &dyn AuthorityService,
        workflow: &SigningWorkflow<'_>,
        batch: &SubordinateBatch,
    ) -> Result<Vec<(AuthorityOutcome, Option<AuthorityRecord>)>> {
        let parent_service = self.services.get(batch.parent.region())?;
        let vendor_id = parent_vendor_id(parent_service.as_ref(), &batch.parent).await?;
        let parent = ParentAuthority::fetch(batch.parent.clone(), parent_service).await?;
        info!(
            parent = %parent.arn,
            vid = %vendor_id,
            subordinates = batch.subordinates.len(),
            "signing subordinate batch"
        );

        let runs = batch
            .subordinates
            .iter()
            .map(|spec| self.provision_subordinate(service, workflow, batch, &parent, &vendor_id, spec));
        Ok(join_all(runs).await)
    }

    async fn provision_subordinate(
        &self,
        service: &dyn AuthorityService,
        workflow: &SigningWorkflow<'_>,
        batch: &SubordinateBatch,
        parent: &ParentAuthority,
        vendor_id: &Identifier,
        spec: &SubordinateSpec,
    ) -> (AuthorityOutcome, Option<AuthorityRecord>) {
        let logical_id = spec.logical_id();
        let config = AuthorityConfig::new(Tier::Subordinate, spec.subject(vendor_id), &batch.crl_bucket_name);

        let result = match self
            .lifecycle
            .create(service, &logical_id, config, batch.validity, Some(parent.arn.clone()))
            .await
        {
            Ok(_) => workflow.run_subordinate(service, parent, &logical_id).await,
            Err(e) => Err(e),
        };
        if let Err(e) = &result {
            warn!(authority = %logical_id, error = %e, "subordinate provisioning failed");
        }

        let last = self.lifecycle.get(&logical_id).await;
        let outcome = AuthorityOutcome::from_result(logical_id, Tier::Subordinate, &result, last.clone());
        (outcome, result.ok().or(last))
    }
}

/// Reads the VID from the subject of the parent authority.
async fn parent_vendor_id(service: &dyn AuthorityService, parent: &AuthorityArn) -> Result<Identifier> {
    let description = service.describe_authority(parent).await?;
    if description.tier != Tier::Root {
        return Err(Error::State(format!("parent authority {parent} is not a root authority")));
    }
    let value = description
        .subject_custom_attributes
        .iter()
        .find(|a| a.object_identifier == oid::MATTER_VENDOR_ID)
        .map(|a| a.value.as_str())
        .ok_or_else(|| ValidationError::ParentNotVendorScoped {
            arn: parent.to_string(),
        })?;
    Ok(Identifier::validate(IdentifierField::VendorId, value)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::ProvisioningAudit;
    use crate::ca::LocalAuthorityService;

    fn root_config() -> DeploymentConfig {
        let mut config = DeploymentConfig::new("us-east-1");
        config.account = "111122223333".to_string();
        config.generate_new_root = true;
        config.vendor_id = Some("FFF1".to_string());
        config.common_names = "Test PAA".to_string();
        config.organizations = "Org".to_string();
        config
    }

    fn orchestrator(config: DeploymentConfig, service: Arc<LocalAuthorityService>) -> HierarchyOrchestrator {
        HierarchyOrchestrator::new(
            config,
            RegionalServices::new().with(service),
            LifecycleManager::in_memory(ProvisioningAudit::in_memory()),
        )
    }

    #[test]
    fn test_regional_services_lookup() {
        let services = RegionalServices::new()
            .with(Arc::new(LocalAuthorityService::new("us-east-1", "1")))
            .with(Arc::new(LocalAuthorityService::new("eu-west-1", "1")));
        assert_eq!(services.regions().collect::<Vec<_>>(), ["eu-west-1", "us-east-1"]);
        assert!(services.get("eu-west-1").is_ok());
        assert!(matches!(services.get("ap-south-1"), Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn test_generate_root_report() {
        let service = Arc::new(LocalAuthorityService::new("us-east-1", "111122223333"));
        let report = orchestrator(root_config(), service.clone()).provision().await.unwrap();

        assert!(report.succeeded());
        assert_eq!(report.stack_name, "MatterStackPAA");
        assert_eq!(report.intent_kind, IntentKind::GenerateRoot);
        assert_eq!(report.authorities.len(), 1);
        assert!(report.authorities[0].is_activated());
        assert!(report.output("PAA").unwrap().starts_with("VID=FFF1 CN=Test PAA arn:aws:acm-pca:us-east-1:"));
        assert_eq!(report.output("CrlBucketName"), Some("matter-crl-bucket"));
        assert_eq!(
            report.output("CrlBucketUrl"),
            Some("http://matter-crl-bucket.s3-website-us-east-1.amazonaws.com")
        );
        assert_eq!(report.output("LogGroupName"), Some("MatterAudit"));
        assert!(report.audit_tail.is_some());
    }

    #[tokio::test]
    async fn test_adopt_root_creates_nothing() {
        let service = Arc::new(LocalAuthorityService::new("us-east-1", "111122223333"));
        let mut config = DeploymentConfig::new("us-east-1");
        config.parent_authority_arn = Some("arn:aws:acm-pca:us-east-1:111122223333:certificate-authority/r".into());

        let report = orchestrator(config, service.clone()).provision().await.unwrap();
        assert!(report.authorities.is_empty());
        assert_eq!(report.access.bindings.len(), 5);
        assert_eq!(service.authority_count().await, 0);
    }

    #[tokio::test]
    async fn test_unknown_region_is_run_level_error() {
        let service = Arc::new(LocalAuthorityService::new("eu-west-1", "111122223333"));
        let err = orchestrator(root_config(), service).provision().await.unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[tokio::test]
    async fn test_parent_must_be_vendor_scoped_root() {
        let service = Arc::new(LocalAuthorityService::new("us-east-1", "111122223333"));
        let root = orchestrator(root_config(), service.clone()).provision().await.unwrap();
        let root_arn = root.authorities[0].arn.clone().unwrap();

        let vid = parent_vendor_id(service.as_ref(), &root_arn).await.unwrap();
        assert_eq!(vid.as_str(), "FFF1");

        let missing = AuthorityArn::new("us-east-1", "111122223333", "missing");
        assert!(parent_vendor_id(service.as_ref(), &missing).await.is_err());
    }
}
