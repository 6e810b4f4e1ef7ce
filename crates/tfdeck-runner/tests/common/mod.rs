//! 共通フィクスチャ: 使い捨てのTerraformルートと偽の `terraform` バイナリ

#![allow(dead_code)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tempfile::TempDir;
use tfdeck_config::Settings;
use tfdeck_runner::{Orchestrator, ProcessRunner, parse_exit_sentinel};

/// 呼び出しを `$FAKE_TF_LOG` に記録し、terraform の出力を真似る。
///
/// 環境変数で挙動を切り替える: `FAKE_TF_INIT_FAIL`, `FAKE_TF_WARMUP_FAIL`,
/// `FAKE_TF_WARMUP_KILL`, `FAKE_TF_INIT_SLEEP`, `FAKE_TF_APPLY_SLEEP`.
const FAKE_TERRAFORM: &str = r#"#!/bin/sh
echo "$*" >> "$FAKE_TF_LOG"
case "$1" in
  init)
    if [ -n "$FAKE_TF_INIT_FAIL" ]; then
      echo "Error: Failed to query available provider packages" >&2
      exit 1
    fi
    echo "Initializing the backend..."
    echo "Initializing provider plugins..."
    echo "- Finding latest version of hashicorp/aws..."
    sleep "${FAKE_TF_INIT_SLEEP:-0}"
    echo "- Installing hashicorp/aws v5.31.0..."
    echo "- Installed hashicorp/aws v5.31.0 (signed by HashiCorp)"
    case "$*" in
      *-backend=false*)
        if [ -n "$FAKE_TF_WARMUP_KILL" ]; then
          kill -9 $$
        fi
        if [ -n "$FAKE_TF_WARMUP_FAIL" ]; then
          echo "Error: registry.terraform.io is unreachable" >&2
          exit 1
        fi
        mkdir -p "$TF_PLUGIN_CACHE_DIR/registry.terraform.io/hashicorp/aws/5.31.0"
        ;;
      *)
        mkdir -p .terraform
        ;;
    esac
    echo "Terraform has been successfully initialized!"
    ;;
  plan)
    echo "Plan: 1 to add, 0 to change, 0 to destroy."
    ;;
  apply|destroy)
    if [ -e .running ]; then
      echo "OVERLAP" >> "$FAKE_TF_LOG"
    fi
    touch .running
    echo "$1 started"
    sleep "${FAKE_TF_APPLY_SLEEP:-0}"
    rm -f .running
    echo "$1 complete" >&2
    ;;
  force-unlock)
    echo "Terraform state has been successfully unlocked!"
    echo "lock id: $3"
    ;;
  output)
    echo "{\"cwd\":{\"sensitive\":false,\"type\":\"string\",\"value\":\"$PWD\"}}"
    ;;
  *)
    echo "unsupported command: $1" >&2
    exit 1
    ;;
esac
"#;

/// テストバイナリごとに1回だけ書き込む。他のテストが実行中に書き換えると
/// ETXTBSY で失敗する。
static FAKE_BIN: LazyLock<(TempDir, PathBuf)> = LazyLock::new(|| {
    let dir = tempfile::tempdir().unwrap();
    let bin = dir.path().join("terraform");
    fs::write(&bin, FAKE_TERRAFORM).unwrap();
    fs::set_permissions(&bin, fs::Permissions::from_mode(0o755)).unwrap();
    (dir, bin)
});

pub fn fake_terraform() -> PathBuf {
    FAKE_BIN.1.clone()
}

pub struct Fixture {
    pub temp: TempDir,
    pub terraform_dir: PathBuf,
    pub cache_dir: PathBuf,
    pub log: PathBuf,
}

impl Fixture {
    pub fn new() -> Self {
        let temp = tempfile::tempdir().unwrap();
        let terraform_dir = temp.path().join("terraform");
        let cache_dir = temp.path().join("plugin-cache");
        let log = temp.path().join("invocations.log");
        fs::create_dir_all(terraform_dir.join("instances")).unwrap();
        fs::write(&log, "").unwrap();

        Self {
            temp,
            terraform_dir,
            cache_dir,
            log,
        }
    }

    /// `module "<module>"` を宣言する `instances/<dir_name>` を追加
    pub fn add_instance(&self, dir_name: &str, module: &str) -> PathBuf {
        let dir = self.terraform_dir.join("instances").join(dir_name);
        fs::create_dir_all(&dir).unwrap();
        fs::write(
            dir.join("main.tf"),
            format!("module \"{module}\" {{\n  source = \"../../modules/{dir_name}\"\n}}\n"),
        )
        .unwrap();
        dir
    }

    pub fn mark_initialized(&self, dir: &Path) {
        fs::create_dir_all(dir.join(".terraform")).unwrap();
    }

    pub fn settings(&self) -> Settings {
        Settings::new(&self.terraform_dir, &self.cache_dir).with_terraform_bin(fake_terraform())
    }

    pub fn runner(&self, env: &[(&str, &str)]) -> ProcessRunner {
        let mut runner = ProcessRunner::from_settings(&self.settings())
            .with_env("FAKE_TF_LOG", self.log.to_string_lossy());
        for (key, value) in env {
            runner = runner.with_env(*key, *value);
        }
        runner
    }

    pub fn orchestrator(&self) -> Orchestrator {
        self.orchestrator_with(&[])
    }

    /// すべての terraform プロセスに `env` を渡すオーケストレーター
    pub fn orchestrator_with(&self, env: &[(&str, &str)]) -> Orchestrator {
        let settings = self.settings();
        let runner = self.runner(env);
        let warmer = tfdeck_runner::ProviderCacheWarmer::new(runner.clone(), &settings);
        Orchestrator::new(
            &settings.terraform_dir,
            std::sync::Arc::new(tfdeck_core::InstanceCatalog::new(settings.instances_dir())),
            std::sync::Arc::new(tfdeck_runner::ResourceLockRegistry::new()),
            std::sync::Arc::new(warmer),
            runner,
        )
    }

    /// 偽 terraform が呼ばれた引数(1呼び出し1行)
    pub fn invocations(&self) -> Vec<String> {
        fs::read_to_string(&self.log)
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect()
    }
}

/// 最終行が唯一のセンチネルであることを確認し、その結果を返す
pub fn sentinel_result(lines: &[String]) -> bool {
    let sentinels: Vec<usize> = lines
        .iter()
        .enumerate()
        .filter(|(_, line)| parse_exit_sentinel(line).is_some())
        .map(|(i, _)| i)
        .collect();
    assert_eq!(sentinels, vec![lines.len() - 1], "lines: {lines:#?}");
    parse_exit_sentinel(&lines[lines.len() - 1]).unwrap()
}
