use colored::Colorize;
use serde::Serialize;
use tfdeck_core::Instance;
use tfdeck_runner::Orchestrator;

#[derive(Serialize)]
struct ResourceRow<'a> {
    #[serde(flatten)]
    instance: &'a Instance,
    initialized: bool,
}

pub fn handle(orchestrator: &Orchestrator, json: bool) -> anyhow::Result<()> {
    let map = orchestrator.instances();

    if json {
        let rows: Vec<ResourceRow> = map
            .iter()
            .map(|instance| ResourceRow {
                instance,
                initialized: instance.is_initialized(),
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    if map.is_empty() {
        println!(
            "{}",
            format!(
                "No instances found in {}",
                orchestrator.catalog().instances_dir().display()
            )
            .dimmed()
        );
        return Ok(());
    }

    let id_width = map.ids().map(str::len).max().unwrap_or(0).max(11);
    let dir_width = map
        .iter()
        .map(|i| i.dir_name.len())
        .max()
        .unwrap_or(0)
        .max(9);

    let header = format!(
        "{:<id_width$}  {:<dir_width$}  {:<14}  INIT",
        "RESOURCE ID", "DIRECTORY", "KIND"
    );
    println!("{}", header.bold());
    for instance in map.iter() {
        let init = if instance.is_initialized() {
            "yes".green()
        } else {
            "no".dimmed()
        };
        println!(
            "{}  {:<dir_width$}  {:<14}  {}",
            format!("{:<id_width$}", instance.resource_id).cyan(),
            instance.dir_name,
            instance.kind.to_string(),
            init,
        );
    }
    Ok(())
}
