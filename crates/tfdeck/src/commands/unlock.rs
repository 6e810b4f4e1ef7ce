use crate::utils;
use anyhow::bail;
use colored::Colorize;
use tfdeck_runner::Orchestrator;

pub async fn handle(
    orchestrator: &Orchestrator,
    resource_id: &str,
    lock_id: &str,
    env: &[String],
) -> anyhow::Result<()> {
    let env = utils::parse_env_pairs(env)?;
    let result = orchestrator.force_unlock(resource_id, lock_id, &env).await;
    utils::print_output(&result.output);

    if !result.success {
        bail!("Failed to release state lock {} for {}", lock_id, resource_id);
    }
    eprintln!("{} State lock {} released", "✓".green(), lock_id.cyan());
    Ok(())
}
