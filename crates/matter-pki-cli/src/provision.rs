//! Provision command - drive the configured deployment to activated authorities
//!
//! Authorities are held by in-process services, one per region the run
//! touches, each mirrored to `local-authorities-<region>.json` next to the
//! state file. Lifecycle state and the audit log are written to disk too, so
//! a failed run can be resumed with the same `--state` and `--audit` paths.
//! A `--root-config` deployment keeps its own `root-state.json` there.

use anyhow::{bail, Context, Result};
use clap::Args;
use matter_pki::lifecycle::ROOT_LOGICAL_ID;
use matter_pki::{
    DeploymentConfig, HierarchyOrchestrator, LifecycleManager, LocalAuthorityService, ProvisioningAudit,
    ProvisioningReport, RefreshPolicy, RegionalServices,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

/// Provision the configured deployment
#[derive(Args, Debug)]
pub struct ProvisionArgs {
    /// Lifecycle state file
    #[arg(long, env = "MATTER_PKI_STATE")]
    #[arg(default_value = "~/.local/share/matter-pki/state.json")]
    pub state: String,

    /// Audit log file
    #[arg(long, env = "MATTER_PKI_AUDIT")]
    #[arg(default_value = "~/.local/share/matter-pki/audit.jsonl")]
    pub audit: String,

    /// Root deployment to provision first; its PAA becomes the parent of the configured batch
    #[arg(long)]
    pub root_config: Option<String>,

    /// Reuse recorded certificates instead of fetching them again
    #[arg(long)]
    pub reuse_recorded: bool,

    /// Print the full report as JSON
    #[arg(long)]
    pub json: bool,
}

/// Execute the provision command
pub async fn execute(args: ProvisionArgs, config_path: &str) -> Result<()> {
    let mut config = DeploymentConfig::load(config_path)
        .with_context(|| format!("failed to load deployment config {config_path}"))?;

    let audit_path = shellexpand::tilde(&args.audit).to_string();
    let state_path = PathBuf::from(shellexpand::tilde(&args.state).to_string());
    for path in [Path::new(&audit_path), state_path.as_path()] {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;
        }
    }
    let audit = ProvisioningAudit::open(&audit_path).with_context(|| format!("failed to open audit log {audit_path}"))?;

    let mut services = RegionalServices::new();
    add_region(&mut services, &config, &state_path).await?;

    if let Some(root_path) = &args.root_config {
        let root_path = shellexpand::tilde(root_path).to_string();
        let root_config = DeploymentConfig::load(&root_path)
            .with_context(|| format!("failed to load root config {root_path}"))?;
        if root_config.is_subordinate_mode() || !root_config.generate_new_root {
            bail!("{root_path} does not generate a new root");
        }
        add_region(&mut services, &root_config, &state_path).await?;

        let root_state = state_path.with_file_name("root-state.json");
        let root_lifecycle = LifecycleManager::open(&root_state, audit.clone())
            .await
            .with_context(|| format!("failed to open state {}", root_state.display()))?;
        let root = HierarchyOrchestrator::new(root_config, services.clone(), root_lifecycle);
        let report = root.provision().await?;
        print_report(&report, args.json)?;
        if !report.succeeded() {
            bail!("root deployment {} failed", report.stack_name);
        }
        let parent = root
            .lifecycle()
            .get(ROOT_LOGICAL_ID)
            .await
            .context("root deployment recorded no PAA")?;
        info!(parent = %parent.arn, "using provisioned root as parent");
        config.parent_authority_arn = Some(parent.arn.to_string());
    }

    let lifecycle = LifecycleManager::open(&state_path, audit)
        .await
        .with_context(|| format!("failed to open state {}", state_path.display()))?;
    let refresh = if args.reuse_recorded {
        RefreshPolicy::ReuseRecorded
    } else {
        RefreshPolicy::AlwaysRefresh
    };

    let report = HierarchyOrchestrator::new(config, services, lifecycle)
        .with_refresh_policy(refresh)
        .provision()
        .await?;
    print_report(&report, args.json)?;

    if !report.succeeded() {
        bail!(
            "{} of {} authorities failed; rerun with the same --state to resume",
            report.failures().count(),
            report.authorities.len()
        );
    }
    Ok(())
}

/// Opens the persisted local service of `config.region` unless one is registered.
async fn add_region(services: &mut RegionalServices, config: &DeploymentConfig, state_path: &Path) -> Result<()> {
    if services.get(&config.region).is_ok() {
        return Ok(());
    }
    let store = state_path.with_file_name(format!("local-authorities-{}.json", config.region));
    let service = LocalAuthorityService::open(&config.region, &config.account, &store)
        .await
        .with_context(|| format!("failed to open authority store {}", store.display()))?;
    services.insert(Arc::new(service));
    Ok(())
}

fn print_report(report: &ProvisioningReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    println!("{} ({})", report.stack_name, report.intent_kind);
    for authority in &report.authorities {
        let state = authority.state.map_or_else(|| "-".to_string(), |s| s.to_string());
        match &authority.error {
            None => println!("  {:<8} {state}", authority.logical_id),
            Some(error) => println!("  {:<8} {state}  FAILED: {error}", authority.logical_id),
        }
    }
    for output in &report.outputs {
        println!("  {} = {}", output.key, output.value);
    }
    println!("  shared infrastructure: {}", report.shared_infrastructure.decision);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const ROOT_CONFIG: &str =
        "region = \"us-east-1\"\ngenerate_new_root = true\nvendor_id = \"FFF1\"\ncommon_names = \"Test\"\norganizations = \"Org\"\n";

    fn args(dir: &Path, root_config: Option<&Path>) -> ProvisionArgs {
        ProvisionArgs {
            state: dir.join("state/state.json").display().to_string(),
            audit: dir.join("state/audit.jsonl").display().to_string(),
            root_config: root_config.map(|p| p.display().to_string()),
            reuse_recorded: false,
            json: false,
        }
    }

    #[tokio::test]
    async fn test_add_region_once() {
        let dir = tempfile::tempdir().unwrap();
        let state = dir.path().join("state.json");
        let config = DeploymentConfig::new("us-east-1");
        let mut services = RegionalServices::new();
        add_region(&mut services, &config, &state).await.unwrap();
        add_region(&mut services, &config, &state).await.unwrap();
        assert_eq!(services.regions().collect::<Vec<_>>(), ["us-east-1"]);
    }

    #[tokio::test]
    async fn test_rerun_with_root_config_reuses_authorities() {
        let dir = tempfile::tempdir().unwrap();
        let root_path = dir.path().join("paa.toml");
        std::fs::write(&root_path, ROOT_CONFIG).unwrap();
        let batch_path = dir.path().join("pai.toml");
        std::fs::write(
            &batch_path,
            "region = \"us-east-1\"\nsubordinate_count = 1\nproduct_ids = \"8000\"\ncommon_names = \"PAI\"\norganizations = \"Org\"\ncrl_bucket_name = \"crl\"\n",
        )
        .unwrap();

        execute(args(dir.path(), Some(&root_path)), batch_path.to_str().unwrap())
            .await
            .unwrap();
        let store = dir.path().join("state/local-authorities-us-east-1.json");
        let first_store = std::fs::read_to_string(&store).unwrap();
        let state = dir.path().join("state/state.json");
        let first_state = std::fs::read_to_string(&state).unwrap();

        execute(args(dir.path(), Some(&root_path)), batch_path.to_str().unwrap())
            .await
            .unwrap();
        assert_eq!(std::fs::read_to_string(&store).unwrap(), first_store);
        assert_eq!(std::fs::read_to_string(&state).unwrap(), first_state);
        assert!(dir.path().join("state/root-state.json").exists());
        assert!(matter_pki::audit::verify_file(dir.path().join("state/audit.jsonl"))
            .unwrap()
            .is_ok());
    }

    #[tokio::test]
    async fn test_provision_root_with_persisted_state() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("paa.toml");
        std::fs::write(&config_path, ROOT_CONFIG).unwrap();

        execute(args(dir.path(), None), config_path.to_str().unwrap()).await.unwrap();
        assert!(dir.path().join("state/state.json").exists());
        assert!(dir.path().join("state/local-authorities-us-east-1.json").exists());
        assert!(matter_pki::audit::verify_file(dir.path().join("state/audit.jsonl"))
            .unwrap()
            .is_ok());
    }
}
