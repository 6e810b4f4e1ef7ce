mod commands;
mod utils;

use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use tfdeck_config::Settings;
use tfdeck_runner::{Operation, Orchestrator};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "tfdeck")]
#[command(about = "Run terraform plan/apply/destroy across a directory of instances", long_about = None)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct GlobalArgs {
    /// instances/ を含むTerraformルート
    #[arg(long, global = true, env = "TERRAFORM_DIR")]
    terraform_dir: Option<PathBuf>,

    /// 共有プロバイダープラグインキャッシュ
    #[arg(long, global = true, env = "TF_PLUGIN_CACHE_DIR")]
    plugin_cache_dir: Option<PathBuf>,

    /// terraform 実行ファイル
    #[arg(long, global = true, env = "TFDECK_TERRAFORM_BIN")]
    terraform_bin: Option<PathBuf>,

    /// stderr にデバッグログを出す(RUST_LOG が優先)
    #[arg(short, long, global = true)]
    verbose: bool,
}

/// ストリーミング操作で共通のオプション
#[derive(Args)]
struct StreamArgs {
    /// 追加の変数ファイル(複数指定可)
    #[arg(long = "var-file", value_name = "FILE")]
    var_files: Vec<PathBuf>,

    /// terraform に渡す追加の環境変数 (KEY=VALUE、複数指定可)
    #[arg(short = 'e', long = "env", value_name = "KEY=VALUE")]
    env: Vec<String>,

    /// ストリームをそのまま表示(終了センチネルを含む)
    #[arg(long)]
    raw: bool,

    /// init 前のプロバイダー事前ダウンロードを行わない
    #[arg(long)]
    no_warmup: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// 発見したインスタンスの一覧
    Resources {
        /// JSONで出力
        #[arg(long)]
        json: bool,
    },
    /// インスタンスの詳細を表示
    Show {
        resource_id: String,
    },
    /// terraform plan
    Plan {
        resource_id: String,
        #[command(flatten)]
        stream: StreamArgs,
    },
    /// terraform apply(リソースごとに直列化)
    Apply {
        resource_id: String,
        /// -auto-approve を付ける
        #[arg(short = 'y', long)]
        auto_approve: bool,
        #[command(flatten)]
        stream: StreamArgs,
    },
    /// terraform destroy(リソースごとに直列化)
    Destroy {
        resource_id: String,
        /// -auto-approve を付ける
        #[arg(short = 'y', long)]
        auto_approve: bool,
        #[command(flatten)]
        stream: StreamArgs,
    },
    /// terraform init(初期化済みならスキップ)
    Init {
        resource_id: String,
        /// 初期化済みでも -upgrade 付きで init を再実行
        #[arg(long)]
        upgrade: bool,
        /// terraform に渡す追加の環境変数 (KEY=VALUE、複数指定可)
        #[arg(short = 'e', long = "env", value_name = "KEY=VALUE")]
        env: Vec<String>,
        /// ストリームをそのまま表示(終了センチネルを含む)
        #[arg(long)]
        raw: bool,
        /// init 前のプロバイダー事前ダウンロードを行わない
        #[arg(long)]
        no_warmup: bool,
    },
    /// インスタンス(またはTerraformルート)の terraform output -json
    Output {
        resource_id: Option<String>,
        /// terraform のJSONをそのまま表示
        #[arg(long)]
        json: bool,
        /// terraform に渡す追加の環境変数 (KEY=VALUE、複数指定可)
        #[arg(short = 'e', long = "env", value_name = "KEY=VALUE")]
        env: Vec<String>,
    },
    /// 残った terraform の state ロックを解除
    ForceUnlock {
        resource_id: String,
        lock_id: String,
        /// terraform に渡す追加の環境変数 (KEY=VALUE、複数指定可)
        #[arg(short = 'e', long = "env", value_name = "KEY=VALUE")]
        env: Vec<String>,
    },
    /// プロバイダーキャッシュの状態を表示
    CacheStatus {
        /// JSONで出力
        #[arg(long)]
        json: bool,
    },
    /// プロバイダーをプラグインキャッシュにダウンロード
    Warmup,
    /// バージョンを表示
    Version,
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    // stdout は terraform の出力専用
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_settings(global: &GlobalArgs) -> anyhow::Result<Settings> {
    let mut settings = Settings::load()?;
    if let Some(dir) = &global.terraform_dir {
        settings.terraform_dir = dir.clone();
    }
    if let Some(dir) = &global.plugin_cache_dir {
        settings.plugin_cache_dir = dir.clone();
    }
    if let Some(bin) = &global.terraform_bin {
        settings.terraform_bin = bin.clone();
    }
    Ok(settings)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.global.verbose);

    if matches!(cli.command, Commands::Version) {
        println!("tfdeck {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let settings = match load_settings(&cli.global) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("{} {:#}", "Error:".red().bold(), e);
            std::process::exit(1);
        }
    };
    tracing::debug!(
        terraform_dir = %settings.terraform_dir.display(),
        terraform_bin = %settings.terraform_bin.display(),
        "Loaded settings"
    );
    let orchestrator = Orchestrator::from_settings(&settings);

    let result = match cli.command {
        Commands::Resources { json } => commands::resources::handle(&orchestrator, json),
        Commands::Show { resource_id } => commands::show::handle(&orchestrator, &resource_id),
        Commands::Plan {
            resource_id,
            stream,
        } => commands::run::handle(&orchestrator, Operation::Plan, &resource_id, false, stream).await,
        Commands::Apply {
            resource_id,
            auto_approve,
            stream,
        } => {
            commands::run::handle(&orchestrator, Operation::Apply, &resource_id, auto_approve, stream)
                .await
        }
        Commands::Destroy {
            resource_id,
            auto_approve,
            stream,
        } => {
            commands::run::handle(
                &orchestrator,
                Operation::Destroy,
                &resource_id,
                auto_approve,
                stream,
            )
            .await
        }
        Commands::Init {
            resource_id,
            upgrade,
            env,
            raw,
            no_warmup,
        } => {
            commands::init::handle(&orchestrator, &resource_id, upgrade, &env, raw, no_warmup).await
        }
        Commands::Output {
            resource_id,
            json,
            env,
        } => commands::output::handle(&orchestrator, resource_id.as_deref(), json, &env).await,
        Commands::ForceUnlock {
            resource_id,
            lock_id,
            env,
        } => commands::unlock::handle(&orchestrator, &resource_id, &lock_id, &env).await,
        Commands::CacheStatus { json } => commands::cache::status(&orchestrator, json),
        Commands::Warmup => commands::cache::warmup(&orchestrator).await,
        Commands::Version => Ok(()),
    };

    if let Err(e) = result {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        std::process::exit(1);
    }

    Ok(())
}
