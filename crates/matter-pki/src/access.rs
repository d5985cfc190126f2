//! Capability scopes requested from the authorization layer.
//!
//! Five roles live under [`ROLE_PATH`]. A root deployment defines them,
//! scoped to the root ARN. Subordinates are never enumerated: their
//! permissions key on the `matterCAType=pai` tag attached at creation.
//! Subordinate deployments bind to the existing roles by name and add the
//! contract of the device-certificate issuance worker.

use crate::arn::AuthorityArn;
use crate::authority::{Tier, CA_TYPE_TAG, PKI_TAG};
use crate::ca::CertificateTemplate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Path of every role.
pub const ROLE_PATH: &str = "/MatterPKI/";

const TEMPLATE_CONDITION_KEY: &str = "acm-pca:TemplateArn";
const ISSUE_CERTIFICATE: &str = "acm-pca:IssueCertificate";
const LIST_AUTHORITIES: &str = "acm-pca:ListCertificateAuthorities";

/// Certificate issue calls per second the service admits.
pub const ISSUE_CERTIFICATE_MAX_TPS: u32 = 25;
/// Average run time of one worker invocation, in seconds.
pub const WORKER_AVG_EXEC_SECONDS: u32 = 11;
/// Requests per worker invocation.
pub const WORKER_BATCH_SIZE: u32 = 5;

/// The fixed capability sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Role {
    /// Issue device certificates from subordinates only.
    IssueDac,
    /// Create subordinates and have the root sign them.
    IssuePai,
    /// Read-only auditing.
    Auditor,
    /// Manage the root.
    ManagePaa,
    /// Back up the audit bucket.
    AuditLoggingBackup,
}

impl Role {
    /// All roles, in definition order.
    pub const ALL: [Role; 5] = [
        Role::ManagePaa,
        Role::IssuePai,
        Role::Auditor,
        Role::AuditLoggingBackup,
        Role::IssueDac,
    ];

    /// Role name without the stack prefix.
    pub fn base_name(self) -> &'static str {
        match self {
            Self::IssueDac => "MatterIssueDACRole",
            Self::IssuePai => "MatterIssuePAIRole",
            Self::Auditor => "MatterAuditorRole",
            Self::ManagePaa => "MatterManagePAARole",
            Self::AuditLoggingBackup => "S3BackupRole",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.base_name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum Effect {
    Allow,
    Deny,
}

/// Condition operator -> key -> value.
pub type Conditions = BTreeMap<String, BTreeMap<String, String>>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PolicyStatement {
    pub effect: Effect,
    #[serde(rename = "Action")]
    pub actions: Vec<String>,
    #[serde(rename = "Resource")]
    pub resources: Vec<String>,
    #[serde(rename = "Condition", default, skip_serializing_if = "BTreeMap::is_empty")]
    pub conditions: Conditions,
}

impl PolicyStatement {
    fn new(effect: Effect, actions: &[&str], resources: &[&str]) -> Self {
        Self {
            effect,
            actions: actions.iter().map(|a| a.to_string()).collect(),
            resources: resources.iter().map(|r| r.to_string()).collect(),
            conditions: Conditions::new(),
        }
    }

    fn when(mut self, operator: &str, key: &str, value: impl Into<String>) -> Self {
        self.conditions
            .entry(operator.to_string())
            .or_default()
            .insert(key.to_string(), value.into());
        self
    }

    fn on_subordinates(self) -> Self {
        self.when("StringEquals", &format!("aws:ResourceTag/{CA_TYPE_TAG}"), Tier::Subordinate.tag_value())
    }
}

/// `StringLike` pattern matching every version of `template`.
pub fn template_pattern(template: CertificateTemplate) -> String {
    let arn = template.arn();
    format!("{}*", arn.trim_end_matches(|c: char| c.is_ascii_digit()))
}

/// Who may assume a role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum Principal {
    Account(String),
    Service(String),
}

/// A role this deployment defines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleDefinition {
    pub role: Role,
    pub name: String,
    pub path: String,
    pub assumed_by: Principal,
    pub tags: BTreeMap<String, String>,
    pub statements: Vec<PolicyStatement>,
    pub managed_policies: Vec<String>,
}

/// How a deployment obtains a role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "binding", rename_all = "snake_case")]
pub enum RoleBinding {
    /// Defined by this deployment.
    Create(RoleDefinition),
    /// Defined by the root deployment, referenced by name.
    Existing {
        /// Referenced role.
        role: Role,
        /// Role name.
        name: String,
    },
}

impl RoleBinding {
    /// The bound role.
    pub fn role(&self) -> Role {
        match self {
            Self::Create(definition) => definition.role,
            Self::Existing { role, .. } => *role,
        }
    }

    /// The bound role's name.
    pub fn name(&self) -> &str {
        match self {
            Self::Create(definition) => &definition.name,
            Self::Existing { name, .. } => name,
        }
    }
}

/// Queue wiring of the issuance worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueSettings {
    pub input_suffix: String,
    pub batch_size: u32,
    pub max_receive_count: u32,
    pub visibility_timeout_secs: u64,
    pub reserved_concurrency: u32,
    pub timeout_secs: u64,
    pub report_batch_item_failures: bool,
}

impl Default for QueueSettings {
    fn default() -> Self {
        let timeout_secs = 60;
        Self {
            input_suffix: ".csr".to_string(),
            batch_size: WORKER_BATCH_SIZE,
            max_receive_count: 5,
            visibility_timeout_secs: timeout_secs * 6,
            reserved_concurrency: ISSUE_CERTIFICATE_MAX_TPS / WORKER_BATCH_SIZE * WORKER_AVG_EXEC_SECONDS,
            timeout_secs,
            report_batch_item_failures: true,
        }
    }
}

/// What the device-certificate issuance worker runs under.
///
/// Issuance itself happens outside the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuanceWorkerContract {
    /// Validity of issued device certificates.
    pub dac_validity_days: Option<u32>,
    /// Template the worker must issue with.
    pub template: CertificateTemplate,
    /// Worker permissions, identical to [`Role::IssueDac`].
    pub statements: Vec<PolicyStatement>,
    /// Queue wiring.
    pub queue: QueueSettings,
}

impl IssuanceWorkerContract {
    pub fn new(dac_validity_days: Option<u32>) -> Self {
        Self {
            dac_validity_days,
            template: CertificateTemplate::EndEntityCriticalBasicConstraintsApiPassthrough,
            statements: dac_issuance_statements(),
            queue: QueueSettings::default(),
        }
    }
}

/// Permissions for issuing device certificates from subordinates.
pub fn dac_issuance_statements() -> Vec<PolicyStatement> {
    let dac_template = template_pattern(CertificateTemplate::EndEntityCriticalBasicConstraintsApiPassthrough);
    vec![
        PolicyStatement::new(Effect::Allow, &[ISSUE_CERTIFICATE], &["*"])
            .when("StringLike", TEMPLATE_CONDITION_KEY, dac_template.clone())
            .on_subordinates(),
        PolicyStatement::new(Effect::Deny, &[ISSUE_CERTIFICATE], &["*"])
            .when("StringNotLike", TEMPLATE_CONDITION_KEY, dac_template)
            .on_subordinates(),
        PolicyStatement::new(
            Effect::Allow,
            &[
                "acm-pca:RevokeCertificate",
                "acm-pca:GetCertificate",
                "acm-pca:GetCertificateAuthorityCertificate",
                "acm-pca:DescribeCertificateAuthority",
            ],
            &["*"],
        )
        .on_subordinates(),
        PolicyStatement::new(Effect::Allow, &[LIST_AUTHORITIES], &["*"]),
    ]
}

fn issue_pai_statements(root: &str) -> Vec<PolicyStatement> {
    let pai_template = template_pattern(CertificateTemplate::SubordinateCaPathLen0ApiPassthrough);
    vec![
        PolicyStatement::new(Effect::Allow, &[ISSUE_CERTIFICATE], &[root])
            .when("StringLike", TEMPLATE_CONDITION_KEY, pai_template.clone()),
        PolicyStatement::new(Effect::Deny, &[ISSUE_CERTIFICATE], &[root])
            .when("StringNotLike", TEMPLATE_CONDITION_KEY, pai_template),
        PolicyStatement::new(
            Effect::Allow,
            &[
                "acm-pca:GetCertificateAuthorityCertificate",
                "acm-pca:ImportCertificateAuthorityCertificate",
                "acm-pca:DeleteCertificateAuthority",
                "acm-pca:UpdateCertificateAuthority",
                "acm-pca:DescribeCertificateAuthority",
                "acm-pca:GetCertificateAuthorityCsr",
            ],
            &["*"],
        )
        .on_subordinates(),
        PolicyStatement::new(
            Effect::Allow,
            &[
                "acm-pca:RevokeCertificate",
                "acm-pca:GetCertificate",
                "acm-pca:GetCertificateAuthorityCertificate",
                "acm-pca:DescribeCertificateAuthority",
            ],
            &[root],
        ),
        PolicyStatement::new(
            Effect::Allow,
            &[
                LIST_AUTHORITIES,
                "acm-pca:CreateCertificateAuthority",
                "acm-pca:TagCertificateAuthority",
            ],
            &["*"],
        ),
    ]
}

const AUDITOR_ACTIONS: [&str; 9] = [
    "acm-pca:CreateCertificateAuthorityAuditReport",
    "acm-pca:DescribeCertificateAuthority",
    "acm-pca:DescribeCertificateAuthorityAuditReport",
    "acm-pca:GetCertificateAuthorityCsr",
    "acm-pca:GetCertificateAuthorityCertificate",
    "acm-pca:GetCertificate",
    "acm-pca:GetPolicy",
    "acm-pca:ListPermissions",
    "acm-pca:ListTags",
];

fn auditor_statements(root: &str) -> Vec<PolicyStatement> {
    vec![
        PolicyStatement::new(Effect::Allow, &AUDITOR_ACTIONS, &[root]),
        PolicyStatement::new(Effect::Allow, &AUDITOR_ACTIONS, &["*"]).on_subordinates(),
    ]
}

fn manage_paa_statements(root: &str) -> Vec<PolicyStatement> {
    vec![
        PolicyStatement::new(
            Effect::Allow,
            &[
                "acm-pca:UpdateCertificateAuthority",
                "acm-pca:DescribeCertificateAuthority",
                "acm-pca:GetCertificate",
                "acm-pca:GetCertificateAuthorityCertificate",
            ],
            &[root],
        ),
        PolicyStatement::new(Effect::Allow, &[LIST_AUTHORITIES], &["*"]),
    ]
}

const BACKUP_MANAGED_POLICIES: [&str; 4] = [
    "service-role/AWSBackupServiceRolePolicyForBackup",
    "service-role/AWSBackupServiceRolePolicyForRestores",
    "AWSBackupServiceRolePolicyForS3Backup",
    "AWSBackupServiceRolePolicyForS3Restore",
];

/// The role bindings of one deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessPlan {
    pub bindings: Vec<RoleBinding>,
    pub issuance_worker: Option<IssuanceWorkerContract>,
}

impl AccessPlan {
    /// Roles defined by a root deployment, scoped to `root`.
    pub fn for_root(stack_prefix: &str, account: &str, root: &AuthorityArn) -> Self {
        let root = root.to_string();
        let bindings = Role::ALL
            .into_iter()
            .map(|role| {
                let mut tags = BTreeMap::new();
                let (assumed_by, statements, managed_policies) = match role {
                    Role::AuditLoggingBackup => (
                        Principal::Service("backup.amazonaws.com".to_string()),
                        Vec::new(),
                        BACKUP_MANAGED_POLICIES.iter().map(|p| p.to_string()).collect(),
                    ),
                    _ => {
                        tags.insert(PKI_TAG.to_string(), String::new());
                        let statements = match role {
                            Role::ManagePaa => manage_paa_statements(&root),
                            Role::IssuePai => issue_pai_statements(&root),
                            Role::Auditor => auditor_statements(&root),
                            _ => dac_issuance_statements(),
                        };
                        (Principal::Account(account.to_string()), statements, Vec::new())
                    }
                };
                RoleBinding::Create(RoleDefinition {
                    role,
                    name: format!("{stack_prefix}{}", role.base_name()),
                    path: ROLE_PATH.to_string(),
                    assumed_by,
                    tags,
                    statements,
                    managed_policies,
                })
            })
            .collect();

        Self {
            bindings,
            issuance_worker: None,
        }
    }

    /// Existing roles referenced by a subordinate deployment.
    ///
    /// References use the unprefixed role names.
    pub fn for_subordinates(dac_validity_days: Option<u32>) -> Self {
        let bindings = Role::ALL
            .into_iter()
            .map(|role| RoleBinding::Existing {
                role,
                name: role.base_name().to_string(),
            })
            .collect();
        Self {
            bindings,
            issuance_worker: Some(IssuanceWorkerContract::new(dac_validity_days)),
        }
    }

    /// Binding of `role`.
    pub fn binding(&self, role: Role) -> Option<&RoleBinding> {
        self.bindings.iter().find(|b| b.role() == role)
    }

    /// Name of `role`, falling back to its base name.
    pub fn role_name(&self, role: Role) -> String {
        self.binding(role)
            .map(|b| b.name().to_string())
            .unwrap_or_else(|| role.base_name().to_string())
    }
}
