//! plan/apply/destroy のオーケストレーション
//!
//! ストリーミングされる操作はすべて同じ手順を踏む:
//! リソース解決 → (状態を変更する操作のみ)ロック取得 → 初期化確認 →
//! サブコマンド実行 → 終了センチネル送出

use crate::locks::ResourceLockRegistry;
use crate::process::{CommandOutput, ExtraEnv, ProcessRunner};
use crate::stream::{LineSink, LineStream};
use crate::warmer::{CacheStatus, ProviderCacheWarmer};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tfdeck_config::Settings;
use tfdeck_core::{CoreError, Instance, InstanceCatalog, ResourceMap};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Plan,
    Apply,
    Destroy,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Plan => "plan",
            Operation::Apply => "apply",
            Operation::Destroy => "destroy",
        }
    }

    /// 状態を変更する操作は実行中ずっとリソースロックを保持する
    pub fn is_mutating(&self) -> bool {
        matches!(self, Operation::Apply | Operation::Destroy)
    }

    fn progress_label(&self) -> &'static str {
        match self {
            Operation::Plan => "Planning",
            Operation::Apply => "Applying",
            Operation::Destroy => "Destroying",
        }
    }

    /// この操作の terraform 引数
    pub fn args(&self, options: &RunOptions) -> Vec<String> {
        let mut args = vec![
            self.as_str().to_string(),
            "-no-color".to_string(),
            "-input=false".to_string(),
        ];
        if *self == Operation::Plan {
            // plan は state を書かないのでバックエンドロックを取らない
            args.push("-lock=false".to_string());
            args.push("-compact-warnings".to_string());
        }
        for var_file in &options.var_files {
            args.push("-var-file".to_string());
            args.push(var_file.to_string_lossy().into_owned());
        }
        if self.is_mutating() && options.auto_approve {
            args.push("-auto-approve".to_string());
        }
        args
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Operation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "plan" => Ok(Operation::Plan),
            "apply" => Ok(Operation::Apply),
            "destroy" => Ok(Operation::Destroy),
            other => Err(format!("Unknown operation: {other}")),
        }
    }
}

/// ストリーミング操作1回分のオプション
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// plan では無視
    pub auto_approve: bool,
    pub var_files: Vec<PathBuf>,
    pub env: ExtraEnv,
}

impl RunOptions {
    pub fn with_auto_approve(mut self, auto_approve: bool) -> Self {
        self.auto_approve = auto_approve;
        self
    }

    pub fn with_var_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.var_files.push(path.into());
        self
    }

    pub fn with_env(mut self, env: ExtraEnv) -> Self {
        self.env = env;
        self
    }
}

fn init_args(upgrade: bool) -> Vec<String> {
    let mut args: Vec<String> = ["init", "-no-color", "-input=false"]
        .into_iter()
        .map(String::from)
        .collect();
    if upgrade {
        args.push("-upgrade".to_string());
    }
    args
}

/// 管理リソースに対する terraform 操作の入口
#[derive(Debug, Clone)]
pub struct Orchestrator {
    terraform_dir: PathBuf,
    catalog: Arc<InstanceCatalog>,
    locks: Arc<ResourceLockRegistry>,
    warmer: Arc<ProviderCacheWarmer>,
    runner: ProcessRunner,
}

impl Orchestrator {
    pub fn new(
        terraform_dir: impl Into<PathBuf>,
        catalog: Arc<InstanceCatalog>,
        locks: Arc<ResourceLockRegistry>,
        warmer: Arc<ProviderCacheWarmer>,
        runner: ProcessRunner,
    ) -> Self {
        Self {
            terraform_dir: terraform_dir.into(),
            catalog,
            locks,
            warmer,
            runner,
        }
    }

    /// 解決済みの設定から各コンポーネントを組み立てる
    pub fn from_settings(settings: &Settings) -> Self {
        let runner = ProcessRunner::from_settings(settings);
        let warmer = ProviderCacheWarmer::new(runner.clone(), settings);
        Self::new(
            &settings.terraform_dir,
            Arc::new(InstanceCatalog::new(settings.instances_dir())),
            Arc::new(ResourceLockRegistry::new()),
            Arc::new(warmer),
            runner,
        )
    }

    pub fn terraform_dir(&self) -> &Path {
        &self.terraform_dir
    }

    pub fn catalog(&self) -> &InstanceCatalog {
        &self.catalog
    }

    pub fn locks(&self) -> &ResourceLockRegistry {
        &self.locks
    }

    pub fn warmer(&self) -> &Arc<ProviderCacheWarmer> {
        &self.warmer
    }

    /// プロバイダーキャッシュのウォームアップをバックグラウンドで開始
    pub fn start_warmup(&self) -> bool {
        self.warmer.start()
    }

    pub fn cache_status(&self) -> CacheStatus {
        self.warmer.status()
    }

    /// 現在のリソースマップ
    pub fn instances(&self) -> Arc<ResourceMap> {
        self.catalog.map()
    }

    /// リソースに対応するディレクトリ(存在確認はしない)
    pub fn resolve_directory(&self, resource_id: &str) -> Option<PathBuf> {
        self.catalog.resolve_directory(resource_id)
    }

    /// `terraform init` 済みかどうか
    pub fn init_status(&self, resource_id: &str) -> Result<bool, CoreError> {
        Ok(self.catalog.resolve(resource_id)?.is_initialized())
    }

    /// リソースの `DESCRIPTION.md`
    pub fn describe(&self, resource_id: &str) -> Result<Option<String>, CoreError> {
        self.catalog.resolve(resource_id)?.description()
    }

    /// デフォルトで適用する変数ファイル: インスタンス自身の `terraform.tfvars`
    pub fn default_var_files(&self, resource_id: &str) -> Vec<PathBuf> {
        self.catalog
            .resolve(resource_id)
            .ok()
            .and_then(|instance| instance.tfvars_file())
            .into_iter()
            .collect()
    }

    pub fn stream_plan(&self, resource_id: &str, options: RunOptions) -> LineStream {
        self.stream(Operation::Plan, resource_id, options)
    }

    pub fn stream_apply(&self, resource_id: &str, options: RunOptions) -> LineStream {
        self.stream(Operation::Apply, resource_id, options)
    }

    pub fn stream_destroy(&self, resource_id: &str, options: RunOptions) -> LineStream {
        self.stream(Operation::Destroy, resource_id, options)
    }

    /// 操作の出力をストリーミングする。最後に終了センチネルがちょうど1行付く
    pub fn stream(&self, operation: Operation, resource_id: &str, options: RunOptions) -> LineStream {
        let orchestrator = self.clone();
        let resource_id = resource_id.to_string();
        LineStream::spawn(move |sink| async move {
            let success = orchestrator
                .drive(&sink, operation, &resource_id, &options)
                .await;
            info!(resource_id = %resource_id, %operation, success, "Operation finished");
            sink.finish(success).await;
        })
    }

    /// `terraform init` をストリーミング(初期化済みなら `Already initialized`)
    pub fn stream_init(&self, resource_id: &str, env: ExtraEnv) -> LineStream {
        let orchestrator = self.clone();
        let resource_id = resource_id.to_string();
        LineStream::spawn(move |sink| async move {
            let success = match orchestrator.resolve_into(&sink, &resource_id).await {
                Some(instance) => orchestrator.init_into(&sink, &instance, &env).await,
                None => false,
            };
            sink.finish(success).await;
        })
    }

    async fn drive(
        &self,
        sink: &LineSink,
        operation: Operation,
        resource_id: &str,
        options: &RunOptions,
    ) -> bool {
        let Some(instance) = self.resolve_into(sink, resource_id).await else {
            return false;
        };

        let _guard = if operation.is_mutating() {
            Some(self.locks.acquire(resource_id, operation.as_str()).await)
        } else {
            None
        };

        if !self.init_into(sink, &instance, &options.env).await {
            warn!(resource_id = %resource_id, %operation, "terraform init failed, not running operation");
            return false;
        }

        sink.send(format!(
            "{} terraform in: {}",
            operation.progress_label(),
            instance.path.display()
        ))
        .await;
        self.runner
            .relay(sink, &operation.args(options), &instance.path, &options.env)
            .await
    }

    /// リソースを解決する。失敗時は `Error:` 行を送る
    async fn resolve_into(&self, sink: &LineSink, resource_id: &str) -> Option<Instance> {
        match self.catalog.resolve(resource_id) {
            Ok(instance) => Some(instance),
            Err(e) => {
                warn!(resource_id = %resource_id, error = %e, "Failed to resolve resource");
                sink.send(format!("Error: {e}")).await;
                None
            }
        }
    }

    async fn init_into(&self, sink: &LineSink, instance: &Instance, env: &ExtraEnv) -> bool {
        if instance.is_initialized() {
            sink.send("Already initialized").await;
            return true;
        }

        if self.warmer.is_warming() {
            self.relay_cache_progress(sink).await;
        }

        info!(resource_id = %instance.resource_id, dir = %instance.path.display(), "Initializing");
        self.runner
            .relay(sink, &init_args(false), &instance.path, env)
            .await
    }

    /// 準備完了までウォームアップの進捗を中継(連続する同一行は省く)
    async fn relay_cache_progress(&self, sink: &LineSink) {
        let mut rx = self.warmer.subscribe();
        let mut last_line: Option<String> = None;

        loop {
            let status = rx.borrow_and_update().clone();
            let line = format!("Provider cache: {} ({}%)", status.message, status.progress);
            if last_line.as_deref() != Some(line.as_str()) {
                sink.send(line.as_str()).await;
                last_line = Some(line);
            }
            if status.ready || rx.changed().await.is_err() {
                break;
            }
        }
    }

    /// バッファ付きの init。`.terraform/` があればスキップ
    pub async fn ensure_initialized(&self, instance: &Instance, env: &ExtraEnv) -> CommandOutput {
        if instance.is_initialized() {
            return CommandOutput {
                success: true,
                output: "Already initialized\n".to_string(),
            };
        }
        self.warmer.await_ready().await;
        self.runner.run(&init_args(false), &instance.path, env).await
    }

    /// 初期化済みかどうかに関係なく `terraform init -upgrade` を実行
    pub async fn reinitialize(&self, resource_id: &str, env: &ExtraEnv) -> CommandOutput {
        let instance = match self.catalog.resolve(resource_id) {
            Ok(instance) => instance,
            Err(e) => return CommandOutput::failed(format!("Error: {e}")),
        };

        let _guard = self.locks.acquire(resource_id, "init").await;
        self.warmer.await_ready().await;
        self.runner.run(&init_args(true), &instance.path, env).await
    }

    /// 残ったバックエンドロックを解除する
    ///
    /// ロックIDはそのまま渡す。一致するかは terraform が判断する。
    pub async fn force_unlock(&self, resource_id: &str, lock_id: &str, env: &ExtraEnv) -> CommandOutput {
        let instance = match self.catalog.resolve(resource_id) {
            Ok(instance) => instance,
            Err(e) => return CommandOutput::failed(format!("Error: {e}")),
        };

        let init = self.ensure_initialized(&instance, env).await;
        if !init.success {
            return init;
        }

        info!(resource_id = %resource_id, lock_id = %lock_id, "Force-unlocking terraform state");
        let args = vec![
            "force-unlock".to_string(),
            "-force".to_string(),
            lock_id.to_string(),
        ];
        self.runner.run(&args, &instance.path, env).await
    }

    /// リソース(またはTerraformルート)の `terraform output -json`
    pub async fn output(&self, resource_id: Option<&str>, env: &ExtraEnv) -> CommandOutput {
        let dir = resource_id
            .and_then(|id| self.resolve_directory(id))
            .filter(|dir| dir.is_dir())
            .unwrap_or_else(|| self.terraform_dir.clone());

        debug!(dir = %dir.display(), "Reading terraform outputs");
        let args = vec!["output".to_string(), "-json".to_string()];
        self.runner.run(&args, &dir, env).await
    }
}
