use colored::Colorize;
use tfdeck_runner::Orchestrator;

pub fn handle(orchestrator: &Orchestrator, resource_id: &str) -> anyhow::Result<()> {
    let instance = orchestrator.catalog().resolve(resource_id)?;
    let initialized = orchestrator.init_status(resource_id)?;

    println!("{}", instance.resource_id.cyan().bold());
    println!("  Directory:   {}", instance.path.display());
    println!("  Kind:        {}", instance.kind);
    println!(
        "  Initialized: {}",
        if initialized { "yes".green() } else { "no".yellow() }
    );

    let var_files = orchestrator.default_var_files(resource_id);
    if var_files.is_empty() {
        println!("  Var files:   {}", "none".dimmed());
    } else {
        for file in &var_files {
            println!("  Var file:    {}", file.display());
        }
    }

    if let Some(description) = orchestrator.describe(resource_id)? {
        println!();
        println!("{}", description.trim_end());
    }
    Ok(())
}
