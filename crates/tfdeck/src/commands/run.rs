use crate::StreamArgs;
use crate::utils;
use anyhow::bail;
use colored::Colorize;
use tfdeck_runner::{Operation, Orchestrator, RunOptions};

pub async fn handle(
    orchestrator: &Orchestrator,
    operation: Operation,
    resource_id: &str,
    auto_approve: bool,
    args: StreamArgs,
) -> anyhow::Result<()> {
    let env = utils::parse_env_pairs(&args.env)?;
    if !args.no_warmup {
        orchestrator.start_warmup();
    }

    if !args.raw {
        eprintln!("{} {} {}", "→".blue(), operation.to_string().bold(), resource_id.cyan());
    }

    let options = RunOptions {
        auto_approve,
        var_files: args.var_files,
        env,
    };
    let success = utils::relay_stream(orchestrator.stream(operation, resource_id, options), args.raw).await?;

    if !args.raw {
        utils::print_outcome(operation.as_str(), resource_id, success);
    }
    if !success {
        bail!("terraform {} failed for {}", operation, resource_id);
    }
    Ok(())
}
