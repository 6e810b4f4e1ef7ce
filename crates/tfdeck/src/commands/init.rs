use crate::utils;
use anyhow::bail;
use tfdeck_runner::Orchestrator;

pub async fn handle(
    orchestrator: &Orchestrator,
    resource_id: &str,
    upgrade: bool,
    env: &[String],
    raw: bool,
    no_warmup: bool,
) -> anyhow::Result<()> {
    let env = utils::parse_env_pairs(env)?;
    if !no_warmup {
        orchestrator.start_warmup();
    }

    let success = if upgrade {
        let result = orchestrator.reinitialize(resource_id, &env).await;
        utils::print_output(&result.output);
        result.success
    } else {
        utils::relay_stream(orchestrator.stream_init(resource_id, env), raw).await?
    };

    if !raw {
        utils::print_outcome("init", resource_id, success);
    }
    if !success {
        bail!("terraform init failed for {}", resource_id);
    }
    Ok(())
}
