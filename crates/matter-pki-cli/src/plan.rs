//! Plan command - resolve the deployment intent
//!
//! Prints what a provisioning run would do, as JSON, without creating
//! anything.

use anyhow::{Context, Result};
use clap::Args;
use matter_pki::access::AccessPlan;
use matter_pki::intent::DeploymentIntent;
use matter_pki::outputs::stack_name;
use matter_pki::DeploymentConfig;
use serde_json::json;

/// Print the resolved deployment intent
#[derive(Args, Debug)]
pub struct PlanArgs {
    /// Include the requested role scopes
    #[arg(long)]
    pub access: bool,
}

/// Execute the plan command
pub fn execute(args: PlanArgs, config_path: &str) -> Result<()> {
    let config = DeploymentConfig::load(config_path)
        .with_context(|| format!("failed to load deployment config {config_path}"))?;
    println!("{}", render(&config, args.access)?);
    Ok(())
}

fn render(config: &DeploymentConfig, access: bool) -> Result<String> {
    let intent = DeploymentIntent::resolve(config)?;
    let mut plan = json!({
        "stack_name": stack_name(&config.stack_prefix, intent.kind()),
        "region": config.region,
        "intent": intent,
    });

    if access {
        let scopes = match &intent {
            DeploymentIntent::AdoptRoot { root } => AccessPlan::for_root(&config.stack_prefix, &config.account, root),
            DeploymentIntent::Subordinates(batch) => AccessPlan::for_subordinates(batch.dac_validity_days),
            // Role scopes of a generated root depend on its assigned ARN.
            DeploymentIntent::GenerateRoot(_) => return Ok(serde_json::to_string_pretty(&plan)?),
        };
        plan["access"] = serde_json::to_value(scopes)?;
    }

    Ok(serde_json::to_string_pretty(&plan)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_root_plan() {
        let mut config = DeploymentConfig::new("us-east-1");
        config.generate_new_root = true;
        config.vendor_id = Some("FFF1".to_string());
        config.common_names = "Test".to_string();
        config.organizations = "Org".to_string();

        let rendered = render(&config, true).unwrap();
        let value: serde_json::Value = serde_json::from_str(&rendered).unwrap();
        assert_eq!(value["stack_name"], "MatterStackPAA");
        assert_eq!(value["intent"]["kind"], "generate_root");
        assert!(value.get("access").is_none());
    }

    #[test]
    fn test_render_rejects_invalid_vid() {
        let mut config = DeploymentConfig::new("us-east-1");
        config.generate_new_root = true;
        config.vendor_id = Some("fff1".to_string());
        config.common_names = "Test".to_string();
        config.organizations = "Org".to_string();
        assert!(render(&config, false).is_err());
    }
}
