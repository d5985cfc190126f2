//! Region-shared audit infrastructure.
//!
//! Audit storage, the backup plan, the log group and the trail exist once
//! per region. A root deployment always declares them. A subordinate
//! deployment declares them only when it lands in a different region than
//! its root; in the root's region they already exist. Declaring them twice
//! duplicates infrastructure, skipping them leaves a region without an
//! audit trail.
//!
//! The engine only declares these resources. Creating them is left to the
//! infrastructure layer.

use crate::access::{AccessPlan, Role};
use crate::authority::PKI_TAG;
use crate::intent::IntentKind;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Retention of audit objects, in days (five years).
pub const AUDIT_RETENTION_DAYS: u32 = 1827;
/// Days before audit objects move to archive storage (two months).
pub const ARCHIVE_TRANSITION_DAYS: u32 = 60;
/// Retention of the audit log group, in days.
pub const LOG_RETENTION_DAYS: u32 = 60;
/// Namespace of the audit metric filters.
pub const METRIC_NAMESPACE: &str = "CloudTrail";

/// Whether this deployment declares the region-shared resources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SharedResourceDecision {
    /// Declare them.
    Create,
    /// They were declared by the root deployment in this region.
    AssumeExisting,
}

impl fmt::Display for SharedResourceDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Create => f.write_str("create"),
            Self::AssumeExisting => f.write_str("assume-existing"),
        }
    }
}

/// The deduplication rule.
#[derive(Debug, Clone, Copy, Default)]
pub struct SharedResourcePolicy;

impl SharedResourcePolicy {
    /// Root deployments always create; subordinates create iff the regions differ.
    pub fn decide(kind: IntentKind, this_region: &str, root_region: &str) -> SharedResourceDecision {
        if kind.is_root() || this_region != root_region {
            SharedResourceDecision::Create
        } else {
            SharedResourceDecision::AssumeExisting
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupPlanSpec {
    pub plan_name: String,
    pub vault_name: String,
    pub rule_name: String,
    /// Monthly, at midnight on the first.
    pub schedule: String,
    pub delete_after_days: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditBucketSpec {
    pub name: String,
    pub versioned: bool,
    pub kms_encrypted: bool,
    pub key_rotation: bool,
    pub enforce_ssl: bool,
    pub object_lock_mode: String,
    pub object_lock_days: u32,
    pub archive_transition_days: u32,
    pub expiration_days: u32,
    pub backup_selection: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricFilterSpec {
    pub name: String,
    pub pattern: String,
    pub namespace: String,
}

impl MetricFilterSpec {
    fn new(name: &str, pattern: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            pattern: pattern.into(),
            namespace: METRIC_NAMESPACE.to_string(),
        }
    }

    fn role(name: &str, role_name: &str) -> Self {
        Self::new(name, format!("iam.amazonaws.com {role_name}"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogGroupSpec {
    pub name: String,
    pub retention_days: u32,
    pub metric_filters: Vec<MetricFilterSpec>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrailSpec {
    pub name: String,
    pub log_group: String,
    pub bucket: String,
    pub file_validation: bool,
    pub s3_data_events: bool,
}

/// The declared resources.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SharedResources {
    pub backup_plan: BackupPlanSpec,
    pub audit_bucket: AuditBucketSpec,
    pub log_group: LogGroupSpec,
    pub trail: TrailSpec,
}

/// Outcome of the policy for one deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SharedInfrastructurePlan {
    pub region: String,
    pub decision: SharedResourceDecision,
    /// Present only for [`SharedResourceDecision::Create`].
    pub resources: Option<SharedResources>,
}

impl SharedInfrastructurePlan {
    /// Applies the policy and declares the resources it calls for.
    pub fn plan(stack_prefix: &str, kind: IntentKind, region: &str, root_region: &str, access: &AccessPlan) -> Self {
        let decision = SharedResourcePolicy::decide(kind, region, root_region);
        let resources = match decision {
            SharedResourceDecision::Create => Some(declare(stack_prefix, kind, access)),
            SharedResourceDecision::AssumeExisting => None,
        };
        Self {
            region: region.to_string(),
            decision,
            resources,
        }
    }
}

fn declare(prefix: &str, kind: IntentKind, access: &AccessPlan) -> SharedResources {
    let backup_plan = BackupPlanSpec {
        plan_name: format!("{prefix}MatterAuditLoggingBackupPlan"),
        vault_name: format!("{prefix}MatterAuditLoggingBackupVault"),
        rule_name: "RuleForMonthlyBackups".to_string(),
        schedule: "cron(0 0 1 * ? *)".to_string(),
        delete_after_days: 32,
    };

    let audit_bucket = AuditBucketSpec {
        name: format!("{prefix}matter-pki-audit-logs"),
        versioned: true,
        kms_encrypted: true,
        key_rotation: true,
        enforce_ssl: true,
        object_lock_mode: "GOVERNANCE".to_string(),
        object_lock_days: AUDIT_RETENTION_DAYS,
        archive_transition_days: ARCHIVE_TRANSITION_DAYS,
        expiration_days: AUDIT_RETENTION_DAYS,
        backup_selection: "S3BackupSelection".to_string(),
    };

    let mut metric_filters = vec![
        MetricFilterSpec::new("AllPCAEventsFilter", r#"{ ($.eventSource = "acm-pca.amazonaws.com") }"#),
        MetricFilterSpec::new(
            "MatterAuditLoggingBucketFilter",
            format!(
                r#"{{ ($.eventSource= "s3.amazonaws.com") && ($.requestParameters.bucketName = "{}*") }}"#,
                audit_bucket.name
            ),
        ),
        MetricFilterSpec::new("MatterTaggedFilter", PKI_TAG),
    ];
    if kind.is_root() {
        metric_filters.push(MetricFilterSpec::role("MatterPAARoleFilter", &access.role_name(Role::ManagePaa)));
        metric_filters.push(MetricFilterSpec::role("MatterPAIRoleFilter", &access.role_name(Role::IssuePai)));
    } else {
        metric_filters.push(MetricFilterSpec::role("MatterIssueDACRoleFilter", &access.role_name(Role::IssueDac)));
    }
    metric_filters.push(MetricFilterSpec::role("MatterAuditorRoleFilter", &access.role_name(Role::Auditor)));
    metric_filters.push(MetricFilterSpec::role(
        "MatterAuditLoggingBackupRoleFilter",
        &access.role_name(Role::AuditLoggingBackup),
    ));
    metric_filters.push(MetricFilterSpec::new(
        "MatterAuditLoggingBackupPlanFilter",
        format!("backup.amazonaws.com {}", backup_plan.plan_name),
    ));

    let log_group = LogGroupSpec {
        name: format!("{prefix}MatterAudit"),
        retention_days: LOG_RETENTION_DAYS,
        metric_filters,
    };

    let trail = TrailSpec {
        name: format!("{prefix}MatterAuditTrail"),
        log_group: log_group.name.clone(),
        bucket: audit_bucket.name.clone(),
        file_validation: true,
        s3_data_events: true,
    };

    SharedResources {
        backup_plan,
        audit_bucket,
        log_group,
        trail,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arn::AuthorityArn;

    #[test]
    fn test_decision_table() {
        use SharedResourceDecision::*;
        for kind in [IntentKind::AdoptRoot, IntentKind::GenerateRoot] {
            assert_eq!(SharedResourcePolicy::decide(kind, "us-east-1", "us-east-1"), Create);
            assert_eq!(SharedResourcePolicy::decide(kind, "eu-west-1", "us-east-1"), Create);
        }
        assert_eq!(
            SharedResourcePolicy::decide(IntentKind::Subordinates, "us-east-1", "us-east-1"),
            AssumeExisting
        );
        assert_eq!(
            SharedResourcePolicy::decide(IntentKind::Subordinates, "eu-west-1", "us-east-1"),
            Create
        );
    }

    #[test]
    fn test_same_region_subordinates_declare_nothing() {
        let access = AccessPlan::for_subordinates(None);
        let plan = SharedInfrastructurePlan::plan("", IntentKind::Subordinates, "us-east-1", "us-east-1", &access);
        assert_eq!(plan.decision, SharedResourceDecision::AssumeExisting);
        assert!(plan.resources.is_none());
    }

    #[test]
    fn test_root_resources() {
        let root = AuthorityArn::new("us-east-1", "111122223333", "root");
        let access = AccessPlan::for_root("Dev", "111122223333", &root);
        let plan = SharedInfrastructurePlan::plan("Dev", IntentKind::GenerateRoot, "us-east-1", "us-east-1", &access);
        let resources = plan.resources.unwrap();

        assert_eq!(resources.backup_plan.plan_name, "DevMatterAuditLoggingBackupPlan");
        assert_eq!(resources.audit_bucket.name, "Devmatter-pki-audit-logs");
        assert_eq!(resources.audit_bucket.object_lock_days, 1827);
        assert_eq!(resources.trail.log_group, "DevMatterAudit");

        let names: Vec<_> = resources.log_group.metric_filters.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(
            names,
            [
                "AllPCAEventsFilter",
                "MatterAuditLoggingBucketFilter",
                "MatterTaggedFilter",
                "MatterPAARoleFilter",
                "MatterPAIRoleFilter",
                "MatterAuditorRoleFilter",
                "MatterAuditLoggingBackupRoleFilter",
                "MatterAuditLoggingBackupPlanFilter",
            ]
        );
        assert_eq!(
            resources.log_group.metric_filters[3].pattern,
            "iam.amazonaws.com DevMatterManagePAARole"
        );
    }

    #[test]
    fn test_cross_region_subordinates_filter_dac_role() {
        let access = AccessPlan::for_subordinates(Some(30));
        let plan = SharedInfrastructurePlan::plan("", IntentKind::Subordinates, "eu-west-1", "us-east-1", &access);
        let filters = plan.resources.unwrap().log_group.metric_filters;
        assert_eq!(filters.len(), 7);
        assert_eq!(filters[3].name, "MatterIssueDACRoleFilter");
        assert_eq!(filters[3].pattern, "iam.amazonaws.com MatterIssueDACRole");
    }
}
