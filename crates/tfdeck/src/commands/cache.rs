use anyhow::bail;
use colored::Colorize;
use tfdeck_runner::{CacheState, CacheStatus, Orchestrator};

fn print_status(status: &CacheStatus) {
    let state = match status.state {
        CacheState::NotStarted => "not started".dimmed(),
        CacheState::Warming => "warming".yellow(),
        CacheState::Ready if status.error.is_some() => "failed".red(),
        CacheState::Ready => "ready".green(),
    };
    println!("State:    {}", state);
    println!("Progress: {}%", status.progress);
    println!("Message:  {}", status.message);
    if let Some(error) = &status.error {
        println!("Error:    {}", error.red());
    }
}

pub fn status(orchestrator: &Orchestrator, json: bool) -> anyhow::Result<()> {
    let status = orchestrator.cache_status();
    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else {
        println!("Cache: {}", orchestrator.warmer().cache_dir().display());
        print_status(&status);
    }
    Ok(())
}

/// フォアグラウンドでキャッシュを温め、進捗が変わるたびに表示
pub async fn warmup(orchestrator: &Orchestrator) -> anyhow::Result<()> {
    let mut rx = orchestrator.warmer().subscribe();
    orchestrator.start_warmup();

    let mut last_progress = None;
    loop {
        let status = rx.borrow_and_update().clone();
        if last_progress != Some(status.progress) {
            println!("{} {} ({}%)", "→".blue(), status.message, status.progress);
            last_progress = Some(status.progress);
        }
        if status.ready || rx.changed().await.is_err() {
            break;
        }
    }

    let status = orchestrator.cache_status();
    if let Some(error) = status.error {
        bail!("Provider cache warmup failed: {}", error);
    }
    println!("{} {}", "✓".green(), status.message);
    Ok(())
}
