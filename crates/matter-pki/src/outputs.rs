//! Human-facing outputs of a deployment.
//!
//! Every activated authority yields its certificate ARN, a console link
//! and an identity line of the form `VID=<vid> [PID=<pid>] CN=<cn> <arn>`.

use crate::arn::console_link;
use crate::authority::AuthorityRecord;
use crate::intent::IntentKind;
use crate::shared::SharedInfrastructurePlan;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// One named output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentOutput {
    /// Output name, e.g. `PAACertArn`.
    pub key: String,
    /// Output value.
    pub value: String,
    /// Human-readable description.
    pub description: String,
}

impl DeploymentOutput {
    fn new(key: impl Into<String>, value: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            description: description.into(),
        }
    }
}

/// Name of the deployment stack.
pub fn stack_name(stack_prefix: &str, kind: IntentKind) -> String {
    let tier = if kind.is_root() { "PAA" } else { "PAI" };
    format!("{stack_prefix}MatterStack{tier}")
}

/// `VID=<vid> [PID=<pid>] CN=<cn> <arn>` for an authority.
pub fn identity_line(record: &AuthorityRecord) -> String {
    let subject = &record.config.subject;
    let mut line = format!("VID={}", subject.vendor_id());
    if let Some(pid) = subject.product_id() {
        line.push_str(&format!(" PID={pid}"));
    }
    line.push_str(&format!(" CN={} {}", subject.common_name(), record.arn));
    line
}

fn certificate_arn(record: &AuthorityRecord) -> Result<&str> {
    record
        .certificate_arn
        .as_deref()
        .ok_or_else(|| Error::State(format!("authority {} has no certificate", record.logical_id)))
}

/// Outputs of a generated root.
pub fn root_outputs(record: &AuthorityRecord) -> Result<Vec<DeploymentOutput>> {
    let arn = record.arn.to_string();
    Ok(vec![
        DeploymentOutput::new("PAACertArn", certificate_arn(record)?, "The ARN of the PAA certificate"),
        DeploymentOutput::new(
            "PAACertLink",
            console_link(record.arn.region(), &arn),
            "The link to the PAA certificate in the console",
        ),
        DeploymentOutput::new("PAA", identity_line(record), "The ARN of the PAA"),
    ])
}

/// Outputs of subordinate `index`.
pub fn subordinate_outputs(index: usize, record: &AuthorityRecord) -> Result<Vec<DeploymentOutput>> {
    let arn = record.arn.to_string();
    Ok(vec![
        DeploymentOutput::new(
            format!("CertArnPAI{index}"),
            certificate_arn(record)?,
            format!("The certificate ARN for PAI{index}"),
        ),
        DeploymentOutput::new(format!("PAI{index}"), identity_line(record), format!("The ARN of PAI{index}")),
        DeploymentOutput::new(
            format!("CertLinkPAI{index}"),
            console_link(record.arn.region(), &arn),
            "The link to the PAI certificate in the console",
        ),
    ])
}

/// Regions whose website endpoint uses `s3-website-<region>` instead of `s3-website.<region>`.
const DASHED_WEBSITE_REGIONS: &[&str] = &[
    "us-east-1",
    "us-west-1",
    "us-west-2",
    "ap-southeast-1",
    "ap-southeast-2",
    "ap-northeast-1",
    "sa-east-1",
    "eu-west-1",
    "us-gov-west-1",
];

/// Website URL of bucket `name` in `region`.
pub fn bucket_website_url(name: &str, region: &str) -> String {
    let separator = if DASHED_WEBSITE_REGIONS.contains(&region) { '-' } else { '.' };
    format!("http://{name}.s3-website{separator}{region}.amazonaws.com")
}

/// The CRL bucket created with a new root.
pub fn crl_bucket_outputs(name: &str, region: &str) -> Vec<DeploymentOutput> {
    vec![
        DeploymentOutput::new(
            "CrlBucketUrl",
            bucket_website_url(name, region),
            "The url of the bucket used for storing CRLs",
        ),
        DeploymentOutput::new("CrlBucketName", name, "The name of the bucket used for storing CRLs"),
    ]
}

/// Log group and trail outputs; root deployments only.
pub fn shared_outputs(kind: IntentKind, account: &str, plan: &SharedInfrastructurePlan) -> Vec<DeploymentOutput> {
    let Some(resources) = plan.resources.as_ref().filter(|_| kind.is_root()) else {
        return Vec::new();
    };
    vec![
        DeploymentOutput::new("LogGroupName", &resources.log_group.name, "The name of the audit log group"),
        DeploymentOutput::new(
            "CloudTrailArn",
            format!("arn:aws:cloudtrail:{}:{account}:trail/{}", plan.region, resources.trail.name),
            "The ARN of the audit trail",
        ),
    ]
}
