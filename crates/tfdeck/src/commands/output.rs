use crate::utils;
use anyhow::{Context, bail};
use colored::Colorize;
use tfdeck_runner::{Orchestrator, parse_output_values};

pub async fn handle(
    orchestrator: &Orchestrator,
    resource_id: Option<&str>,
    json: bool,
    env: &[String],
) -> anyhow::Result<()> {
    let env = utils::parse_env_pairs(env)?;
    let result = orchestrator.output(resource_id, &env).await;
    if !result.success {
        eprint!("{}", result.output);
        bail!("terraform output failed");
    }

    if json {
        print!("{}", result.output);
        return Ok(());
    }

    let values = parse_output_values(&result.output).context("Unexpected terraform output")?;
    if values.is_empty() {
        println!("{}", "No outputs".dimmed());
        return Ok(());
    }
    for (name, value) in &values {
        println!("{} = {}", name.cyan(), value.display_value());
    }
    Ok(())
}
