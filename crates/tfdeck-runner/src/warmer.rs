//! プロバイダーキャッシュのウォームアップ
//!
//! 設定されたプロバイダーを共有プラグインキャッシュにプロセスごとに1回だけ
//! ダウンロードする。リソースごとの最初の `terraform init` はリンクするだけになる。
//! 待機側はダウンロードの成否にかかわらず終了時に解放される。

use crate::error::Result;
use crate::process::{ExtraEnv, ProcessRunner};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tfdeck_config::{PLUGIN_CACHE_DIR_ENV, Settings};
use tokio::sync::watch;
use tracing::{debug, info, warn};

const SCRATCH_PREFIX: &str = "tfdeck-warmup-";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheState {
    NotStarted,
    Warming,
    Ready,
}

/// ウォーマーの状態のスナップショット
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheStatus {
    pub state: CacheState,
    pub ready: bool,
    /// 0..=100、減ることはない
    pub progress: u8,
    pub message: String,
    /// キャッシュが埋まらずに終わった場合に設定される
    pub error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl CacheStatus {
    fn not_started() -> Self {
        Self {
            state: CacheState::NotStarted,
            ready: false,
            progress: 0,
            message: "Provider cache warmup not started".to_string(),
            error: None,
            updated_at: Utc::now(),
        }
    }
}

/// `terraform init` の出力行を進捗のマイルストーンに対応付ける
pub fn phase_for_line(line: &str, provider_source: &str) -> Option<(u8, String)> {
    let namespace = provider_source.split('/').next().unwrap_or(provider_source);
    let text = line.trim().trim_start_matches("- ").trim();

    let progress = if text.contains("Initializing provider plugins") {
        10
    } else if text.contains("Finding latest version")
        || text.contains(&format!("Finding {provider_source} versions"))
    {
        30
    } else if text.contains(&format!("Installing {namespace}")) {
        60
    } else if text.contains(&format!("Installed {namespace}")) {
        90
    } else {
        return None;
    };

    Some((progress, text.to_string()))
}

/// Background provider download with a watchable status
#[derive(Debug)]
pub struct ProviderCacheWarmer {
    runner: ProcessRunner,
    cache_dir: PathBuf,
    provider_path: PathBuf,
    provider_source: String,
    provider_name: String,
    provider_version: Option<String>,
    scratch_parent: Option<PathBuf>,
    started: AtomicBool,
    status: watch::Sender<CacheStatus>,
}

impl ProviderCacheWarmer {
    pub fn new(runner: ProcessRunner, settings: &Settings) -> Self {
        let (status, _) = watch::channel(CacheStatus::not_started());

        Self {
            runner,
            cache_dir: settings.plugin_cache_dir.clone(),
            provider_path: settings.provider_cache_path(),
            provider_source: settings.provider_source.clone(),
            provider_name: settings.provider_name().to_string(),
            provider_version: settings.provider_version.clone(),
            scratch_parent: None,
            started: AtomicBool::new(false),
            status,
        }
    }

    /// 一時設定をシステムの一時ディレクトリではなく `dir` の下に作る
    pub fn with_scratch_parent(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_parent = Some(dir.into());
        self
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// `<cache>/registry.terraform.io/<namespace>/<name>`
    pub fn provider_cache_path(&self) -> &Path {
        &self.provider_path
    }

    /// ウォームアップを開始する。効果があるのは最初の呼び出しのみ
    ///
    /// 最初の呼び出しで `true` を返す。tokio ランタイムが必要。
    pub fn start(self: &Arc<Self>) -> bool {
        if self.started.swap(true, Ordering::SeqCst) {
            debug!("Provider cache warmup already started");
            return false;
        }

        if self.is_populated() {
            info!(provider = %self.provider_source, "Provider cache already populated");
            self.finish("Provider cache already populated", None);
            return true;
        }

        self.status.send_modify(|s| {
            s.state = CacheState::Warming;
            s.message = format!("Downloading {}", self.provider_source);
            s.updated_at = Utc::now();
        });

        let warmer = Arc::clone(self);
        tokio::spawn(async move { warmer.warm().await });
        true
    }

    pub fn status(&self) -> CacheStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<CacheStatus> {
        self.status.subscribe()
    }

    pub fn is_warming(&self) -> bool {
        self.status.borrow().state == CacheState::Warming
    }

    /// ウォームアップ終了まで待つ。開始されていなければ即座に戻る
    pub async fn await_ready(&self) {
        if !self.started.load(Ordering::SeqCst) {
            return;
        }
        let mut rx = self.status.subscribe();
        // sender は self と同じ寿命なので失敗しない
        let _ = rx.wait_for(|s| s.ready).await;
    }

    fn is_populated(&self) -> bool {
        std::fs::read_dir(&self.provider_path)
            .map(|mut entries| entries.next().is_some())
            .unwrap_or(false)
    }

    async fn warm(&self) {
        let started_at = Utc::now();
        match self.download().await {
            Ok(true) => {
                info!(
                    provider = %self.provider_source,
                    elapsed_ms = (Utc::now() - started_at).num_milliseconds(),
                    "Provider cache warmed"
                );
                self.finish("Provider cache ready", None);
            }
            Ok(false) => {
                warn!(provider = %self.provider_source, "Provider cache warmup exited with failure");
                self.finish(
                    "Provider cache warmup failed",
                    Some("terraform init exited with a non-zero status".to_string()),
                );
            }
            Err(e) => {
                warn!(provider = %self.provider_source, error = %e, "Provider cache warmup failed");
                self.finish(
                    &format!("Provider cache warmup failed: {e}"),
                    Some(e.to_string()),
                );
            }
        }
    }

    /// 一時ディレクトリで init を実行(どの経路でもディレクトリは削除される)
    async fn download(&self) -> Result<bool> {
        tokio::fs::create_dir_all(&self.cache_dir).await?;

        let mut builder = tempfile::Builder::new();
        builder.prefix(SCRATCH_PREFIX);
        let scratch = match &self.scratch_parent {
            Some(parent) => builder.tempdir_in(parent)?,
            None => builder.tempdir()?,
        };
        tokio::fs::write(scratch.path().join("main.tf"), self.scratch_config()).await?;

        let mut env = ExtraEnv::new();
        env.insert(
            PLUGIN_CACHE_DIR_ENV.to_string(),
            self.cache_dir.to_string_lossy().into_owned(),
        );
        let args = warmup_args();
        let mut lines = self.runner.spawn_lines(&args, scratch.path(), &env)?;

        while let Some(line) = lines.next_line().await? {
            if let Some((progress, message)) = phase_for_line(&line, &self.provider_source) {
                self.advance(progress, message);
            }
        }
        Ok(lines.wait().await?)
    }

    fn scratch_config(&self) -> String {
        let version = self
            .provider_version
            .as_ref()
            .map(|v| format!("\n      version = \"{v}\""))
            .unwrap_or_default();
        format!(
            "terraform {{\n  required_providers {{\n    {name} = {{\n      source  = \"{source}\"{version}\n    }}\n  }}\n}}\n",
            name = self.provider_name,
            source = self.provider_source,
        )
    }

    fn advance(&self, progress: u8, message: String) {
        self.status.send_if_modified(|s| {
            if progress <= s.progress || s.ready {
                return false;
            }
            info!(progress, message = %message, "Provider cache warmup progress");
            s.progress = progress;
            s.message = message;
            s.updated_at = Utc::now();
            true
        });
    }

    fn finish(&self, message: &str, error: Option<String>) {
        self.status.send_modify(|s| {
            s.state = CacheState::Ready;
            s.ready = true;
            s.progress = 100;
            s.message = message.to_string();
            s.error = error;
            s.updated_at = Utc::now();
        });
    }
}

fn warmup_args() -> Vec<String> {
    ["init", "-no-color", "-input=false", "-backend=false"]
        .into_iter()
        .map(String::from)
        .collect()
}
