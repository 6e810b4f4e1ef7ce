use anyhow::{Context, bail};
use colored::Colorize;
use futures_util::StreamExt;
use tfdeck_runner::{ExtraEnv, LineStream, parse_exit_sentinel};
use tokio::io::AsyncWriteExt;

/// 繰り返し指定された `-e KEY=VALUE` を解析
pub fn parse_env_pairs(pairs: &[String]) -> anyhow::Result<ExtraEnv> {
    let mut env = ExtraEnv::new();
    for pair in pairs {
        let (key, value) = pair
            .split_once('=')
            .with_context(|| format!("Invalid environment variable '{}', expected KEY=VALUE", pair))?;
        let key = key.trim();
        if key.is_empty() {
            bail!("Invalid environment variable '{}', empty key", pair);
        }
        env.insert(key.to_string(), value.to_string());
    }
    Ok(env)
}

/// 行ストリームを stdout に出力し、終了センチネルの結果を返す
///
/// センチネル自体は raw モードでのみ表示する。
pub async fn relay_stream(mut stream: LineStream, raw: bool) -> anyhow::Result<bool> {
    let mut stdout = tokio::io::stdout();
    let mut result = None;

    while let Some(line) = stream.next().await {
        if let Some(success) = parse_exit_sentinel(&line) {
            result = Some(success);
            if !raw {
                continue;
            }
        }
        stdout.write_all(line.as_bytes()).await?;
        stdout.flush().await?;
    }

    result.context("Output ended without an exit status")
}

/// バッファされた terraform 出力を表示(最終行に改行を付ける)
pub fn print_output(output: &str) {
    print!("{}", output);
    if !output.is_empty() && !output.ends_with('\n') {
        println!();
    }
}

/// 完了した操作の結果行を stderr に表示
pub fn print_outcome(operation: &str, resource_id: &str, success: bool) {
    if success {
        eprintln!(
            "{} {} {}",
            "✓".green(),
            operation.bold(),
            format!("succeeded for {}", resource_id).green()
        );
    } else {
        eprintln!(
            "{} {} {}",
            "✗".red(),
            operation.bold(),
            format!("failed for {}", resource_id).red()
        );
    }
}
