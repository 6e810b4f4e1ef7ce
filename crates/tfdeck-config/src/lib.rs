//! tfdeck の設定
//!
//! 設定はレイヤーで解決する: 組み込みのデフォルト → JSON設定ファイル(任意) →
//! 環境変数。バイナリはさらにコマンドライン引数を上に重ねる。

pub mod error;

pub use error::*;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// 管理対象のTerraformツリーのルート(`instances/` を含む)
pub const TERRAFORM_DIR_ENV: &str = "TERRAFORM_DIR";
/// 共有プロバイダープラグインキャッシュ(terraform 自身も解釈する)
pub const PLUGIN_CACHE_DIR_ENV: &str = "TF_PLUGIN_CACHE_DIR";
pub const TERRAFORM_BIN_ENV: &str = "TFDECK_TERRAFORM_BIN";
pub const PROVIDER_SOURCE_ENV: &str = "TFDECK_PROVIDER_SOURCE";
pub const PROVIDER_VERSION_ENV: &str = "TFDECK_PROVIDER_VERSION";
/// 設定ファイルのパスを明示
pub const CONFIG_PATH_ENV: &str = "TFDECK_CONFIG_PATH";

const DEFAULT_TERRAFORM_DIR: &str = "/terraform";
const DEFAULT_TERRAFORM_BIN: &str = "terraform";
const DEFAULT_PROVIDER_SOURCE: &str = "hashicorp/aws";
const INSTANCES_DIR: &str = "instances";
const SETTINGS_FILE: &str = "settings.json";
const PROVIDER_REGISTRY_HOST: &str = "registry.terraform.io";

/// 解決済みの実行時設定
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    /// Terraformルートディレクトリ
    pub terraform_dir: PathBuf,
    /// すべての `terraform init` が使う共有プラグインキャッシュ
    pub plugin_cache_dir: PathBuf,
    /// terraform 実行ファイル(PATH 上の名前または絶対パス)
    pub terraform_bin: PathBuf,
    /// ウォームアップで事前ダウンロードするプロバイダー(例: `hashicorp/aws`)
    pub provider_source: String,
    /// 事前ダウンロードするプロバイダーのバージョン制約(任意)
    pub provider_version: Option<String>,
}

/// 設定の1レイヤー(全フィールド任意)
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct SettingsLayer {
    terraform_dir: Option<PathBuf>,
    plugin_cache_dir: Option<PathBuf>,
    terraform_bin: Option<PathBuf>,
    provider_source: Option<String>,
    provider_version: Option<String>,
}

impl SettingsLayer {
    fn from_env() -> Self {
        Self {
            terraform_dir: env_value(TERRAFORM_DIR_ENV).map(PathBuf::from),
            plugin_cache_dir: env_value(PLUGIN_CACHE_DIR_ENV).map(PathBuf::from),
            terraform_bin: env_value(TERRAFORM_BIN_ENV).map(PathBuf::from),
            provider_source: env_value(PROVIDER_SOURCE_ENV),
            provider_version: env_value(PROVIDER_VERSION_ENV),
        }
    }

    /// `upper` の値が `self` の値より優先される
    fn overlay(self, upper: SettingsLayer) -> Self {
        Self {
            terraform_dir: upper.terraform_dir.or(self.terraform_dir),
            plugin_cache_dir: upper.plugin_cache_dir.or(self.plugin_cache_dir),
            terraform_bin: upper.terraform_bin.or(self.terraform_bin),
            provider_source: upper.provider_source.or(self.provider_source),
            provider_version: upper.provider_version.or(self.provider_version),
        }
    }
}

/// 空文字は未設定として扱う
fn env_value(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl Settings {
    /// 2つのディレクトリ以外をデフォルト値にした設定
    pub fn new(terraform_dir: impl Into<PathBuf>, plugin_cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            terraform_dir: terraform_dir.into(),
            plugin_cache_dir: plugin_cache_dir.into(),
            terraform_bin: PathBuf::from(DEFAULT_TERRAFORM_BIN),
            provider_source: DEFAULT_PROVIDER_SOURCE.to_string(),
            provider_version: None,
        }
    }

    /// 設定を読み込む: デフォルト → 設定ファイル → 環境変数
    pub fn load() -> Result<Self> {
        let file_layer = match find_settings_file() {
            Some(path) => read_settings_file(&path)?,
            None => SettingsLayer::default(),
        };
        Self::from_layers(file_layer, SettingsLayer::from_env())
    }

    fn from_layers(file_layer: SettingsLayer, env_layer: SettingsLayer) -> Result<Self> {
        let layer = file_layer.overlay(env_layer);

        let plugin_cache_dir = match layer.plugin_cache_dir {
            Some(dir) => dir,
            None => default_plugin_cache_dir()?,
        };

        let settings = Self {
            terraform_dir: layer
                .terraform_dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_TERRAFORM_DIR)),
            plugin_cache_dir,
            terraform_bin: layer
                .terraform_bin
                .unwrap_or_else(|| PathBuf::from(DEFAULT_TERRAFORM_BIN)),
            provider_source: layer
                .provider_source
                .unwrap_or_else(|| DEFAULT_PROVIDER_SOURCE.to_string()),
            provider_version: layer.provider_version,
        };
        settings.validate()?;

        debug!(
            terraform_dir = %settings.terraform_dir.display(),
            plugin_cache_dir = %settings.plugin_cache_dir.display(),
            provider = %settings.provider_source,
            "Resolved settings"
        );
        Ok(settings)
    }

    pub fn with_terraform_bin(mut self, bin: impl Into<PathBuf>) -> Self {
        self.terraform_bin = bin.into();
        self
    }

    pub fn with_provider(mut self, source: impl Into<String>, version: Option<String>) -> Self {
        self.provider_source = source.into();
        self.provider_version = version;
        self
    }

    /// 型では検証できない値をチェック
    pub fn validate(&self) -> Result<()> {
        match self.provider_source.split_once('/') {
            Some((namespace, name))
                if !namespace.is_empty() && !name.is_empty() && !name.contains('/') =>
            {
                Ok(())
            }
            _ => Err(ConfigError::InvalidProviderSource(
                self.provider_source.clone(),
            )),
        }
    }

    /// 管理インスタンスごとのサブディレクトリを持つディレクトリ
    pub fn instances_dir(&self) -> PathBuf {
        self.terraform_dir.join(INSTANCES_DIR)
    }

    /// ローカルのプロバイダー名(`hashicorp/aws` なら `aws`)
    pub fn provider_name(&self) -> &str {
        self.provider_source
            .rsplit('/')
            .next()
            .unwrap_or(&self.provider_source)
    }

    /// プラグインキャッシュ内で terraform がプロバイダーを置く場所
    pub fn provider_cache_path(&self) -> PathBuf {
        self.plugin_cache_dir
            .join(PROVIDER_REGISTRY_HOST)
            .join(&self.provider_source)
    }
}

/// tfdeck 自身の設定ディレクトリ(`~/.config/tfdeck`)
pub fn config_dir() -> Result<PathBuf> {
    Ok(dirs::config_dir()
        .ok_or(ConfigError::ConfigDirNotFound)?
        .join("tfdeck"))
}

/// terraform の慣例的なプラグインキャッシュの場所
pub fn default_plugin_cache_dir() -> Result<PathBuf> {
    Ok(dirs::home_dir()
        .ok_or(ConfigError::HomeDirNotFound)?
        .join(".terraform.d")
        .join("plugin-cache"))
}

/// 設定ファイルを探す
///
/// 1. `TFDECK_CONFIG_PATH`
/// 2. `~/.config/tfdeck/settings.json`
///
/// ファイルは任意。`None` ならデフォルトと環境変数のみを使う。
fn find_settings_file() -> Option<PathBuf> {
    if let Some(explicit) = env_value(CONFIG_PATH_ENV) {
        let path = PathBuf::from(&explicit);
        if path.is_file() {
            return Some(path);
        }
        warn!(path = %explicit, "TFDECK_CONFIG_PATH is set but file does not exist");
    }

    let global = config_dir().ok()?.join(SETTINGS_FILE);
    global.is_file().then_some(global)
}

fn read_settings_file(path: &Path) -> Result<SettingsLayer> {
    let content = std::fs::read_to_string(path)?;
    let layer = serde_json::from_str(&content).map_err(|e| ConfigError::InvalidSettings {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    debug!(path = %path.display(), "Loaded settings file");
    Ok(layer)
}
