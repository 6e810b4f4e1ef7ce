//! インスタンスの発見
//!
//! `<terraform_dir>/instances/` からTerraformルートモジュールを探し、
//! それぞれを論理リソースIDに対応付ける。正はファイルシステムで、
//! [`InstanceCatalog`] は直近のスキャン結果をキャッシュするだけ。

use crate::error::{CoreError, Result};
use crate::resource::{Instance, RESOURCE_ID_FILE, ROOT_MODULE_FILE};
use regex::Regex;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock, RwLock};
use tracing::{debug, info, warn};

static MODULE_DECLARATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"^module\s+"([^"]+)"\s*\{"#).unwrap());

/// リソースID → インスタンス、およびディレクトリ名からの逆引き
#[derive(Debug, Clone, Default)]
pub struct ResourceMap {
    by_id: BTreeMap<String, Instance>,
    by_dir: BTreeMap<String, String>,
}

impl ResourceMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// インスタンスを追加する。同じIDの既存エントリは置き換える
    pub fn insert(&mut self, instance: Instance) -> Option<Instance> {
        let previous = self.by_id.remove(&instance.resource_id);
        if let Some(ref prev) = previous {
            self.by_dir.remove(&prev.dir_name);
        }
        self.by_dir
            .insert(instance.dir_name.clone(), instance.resource_id.clone());
        self.by_id.insert(instance.resource_id.clone(), instance);
        previous
    }

    pub fn get(&self, resource_id: &str) -> Option<&Instance> {
        self.by_id.get(resource_id)
    }

    /// リソースIDに対応するディレクトリ名
    pub fn dir_name(&self, resource_id: &str) -> Option<&str> {
        self.by_id.get(resource_id).map(|i| i.dir_name.as_str())
    }

    /// ディレクトリ名に対応するリソースID
    pub fn resource_id_for_dir(&self, dir_name: &str) -> Option<&str> {
        self.by_dir.get(dir_name).map(String::as_str)
    }

    pub fn contains(&self, resource_id: &str) -> bool {
        self.by_id.contains_key(resource_id)
    }

    /// ソート済みのID一覧
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.by_id.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Instance> {
        self.by_id.values()
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

/// インスタンスディレクトリのリソースIDを決定する
///
/// 1. `.resource_id` マーカーファイル(前後の空白を除いてそのまま使う)
/// 2. `main.tf` の最初の `module "<name>" {` 宣言
/// 3. ディレクトリ名の `-` を `_` に置き換えたもの
pub fn resource_id_for_instance(instance_dir: &Path) -> String {
    let marker = instance_dir.join(RESOURCE_ID_FILE);
    if let Ok(content) = std::fs::read_to_string(&marker) {
        let id = content.trim();
        if !id.is_empty() {
            return id.to_string();
        }
        // 空のIDは要求できないので、次の候補にフォールバック
        warn!(marker = %marker.display(), "Empty resource id marker, ignoring");
    }

    let declared = std::fs::read_to_string(instance_dir.join(ROOT_MODULE_FILE))
        .ok()
        .and_then(|content| declared_module_name(&content));
    if let Some(name) = declared {
        return name;
    }

    let dir_name = instance_dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    sanitize_dir_name(&dir_name)
}

/// 行頭で宣言された最初のモジュール名
pub fn declared_module_name(main_tf: &str) -> Option<String> {
    main_tf.lines().find_map(|line| {
        MODULE_DECLARATION
            .captures(line.trim())
            .map(|caps| caps[1].to_string())
    })
}

/// `ec2-datadog-docker` → `ec2_datadog_docker`
pub fn sanitize_dir_name(dir_name: &str) -> String {
    dir_name.replace('-', "_")
}

/// instances ディレクトリをスキャンする
///
/// `main.tf` を含むサブディレクトリだけが対象。ソート順に処理するので、
/// 同じIDになるディレクトリが複数あれば後のものが必ず勝つ。
/// ルートが存在しない・読めない場合は空のマップを返す。
#[tracing::instrument(skip(instances_dir), fields(instances_dir = %instances_dir.display()))]
pub fn discover_instances(instances_dir: &Path) -> ResourceMap {
    let mut map = ResourceMap::new();

    let entries = match std::fs::read_dir(instances_dir) {
        Ok(entries) => entries,
        Err(e) => {
            debug!(error = %e, "Instances directory not readable");
            return map;
        }
    };

    let mut dirs: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_dir() && path.join(ROOT_MODULE_FILE).is_file())
        .collect();
    dirs.sort();

    for dir in dirs {
        let resource_id = resource_id_for_instance(&dir);
        let instance = Instance::new(resource_id, &dir);
        debug!(
            resource_id = %instance.resource_id,
            dir = %instance.dir_name,
            kind = %instance.kind,
            "Discovered instance"
        );
        if let Some(previous) = map.insert(instance) {
            warn!(
                resource_id = %previous.resource_id,
                replaced = %previous.dir_name,
                "Duplicate resource id, later directory wins"
            );
        }
    }

    info!(instance_count = map.len(), "Discovered instances");
    map
}

/// [`discover_instances`] の結果をプロセス中キャッシュする
#[derive(Debug)]
pub struct InstanceCatalog {
    instances_dir: PathBuf,
    cache: RwLock<Option<Arc<ResourceMap>>>,
}

impl InstanceCatalog {
    pub fn new(instances_dir: impl Into<PathBuf>) -> Self {
        Self {
            instances_dir: instances_dir.into(),
            cache: RwLock::new(None),
        }
    }

    pub fn instances_dir(&self) -> &Path {
        &self.instances_dir
    }

    /// 現在のマップ(初回使用時にスキャン)
    pub fn map(&self) -> Arc<ResourceMap> {
        {
            let cache = self.cache.read().unwrap_or_else(|e| e.into_inner());
            if let Some(map) = cache.as_ref() {
                return Arc::clone(map);
            }
        }

        let mut cache = self.cache.write().unwrap_or_else(|e| e.into_inner());
        // 書き込みロック待ちの間に他の呼び出しがスキャン済みかもしれない
        if let Some(map) = cache.as_ref() {
            return Arc::clone(map);
        }
        let map = Arc::new(discover_instances(&self.instances_dir));
        *cache = Some(Arc::clone(&map));
        map
    }

    /// 再スキャンしてキャッシュを置き換える
    pub fn refresh(&self) -> Arc<ResourceMap> {
        let map = Arc::new(discover_instances(&self.instances_dir));
        let mut cache = self.cache.write().unwrap_or_else(|e| e.into_inner());
        *cache = Some(Arc::clone(&map));
        map
    }

    /// キャッシュを破棄する。次の参照で再スキャン
    pub fn invalidate(&self) {
        let mut cache = self.cache.write().unwrap_or_else(|e| e.into_inner());
        *cache = None;
        debug!(instances_dir = %self.instances_dir.display(), "Instance cache invalidated");
    }

    /// リソースIDに対応するディレクトリ(存在確認はしない)
    pub fn resolve_directory(&self, resource_id: &str) -> Option<PathBuf> {
        self.map().get(resource_id).map(|i| i.path.clone())
    }

    /// 実在するインスタンスに解決する
    ///
    /// 未知のIDなら1回だけ再スキャンし、実行中に追加されたインスタンスも拾う。
    pub fn resolve(&self, resource_id: &str) -> Result<Instance> {
        let mut instance = self.map().get(resource_id).cloned();
        if instance.is_none() {
            debug!(resource_id = %resource_id, "Unknown resource id, rescanning");
            instance = self.refresh().get(resource_id).cloned();
        }

        let instance =
            instance.ok_or_else(|| CoreError::ResourceNotFound(resource_id.to_string()))?;
        if !instance.exists() {
            return Err(CoreError::DirectoryMissing {
                resource_id: resource_id.to_string(),
                path: instance.path,
            });
        }
        Ok(instance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write_instance(root: &Path, dir: &str, main_tf: &str) -> PathBuf {
        let path = root.join(dir);
        fs::create_dir_all(&path).unwrap();
        fs::write(path.join("main.tf"), main_tf).unwrap();
        path
    }

    #[test]
    fn test_declared_module_name() {
        let main_tf = r#"
terraform {
  required_version = ">= 1.5"
}

module "ec2_datadog_docker" {
  source = "../../modules/ec2"
}

module "second" {
  source = "x"
}
"#;
        assert_eq!(
            declared_module_name(main_tf),
            Some("ec2_datadog_docker".to_string())
        );
        assert_eq!(declared_module_name("resource \"aws_instance\" \"x\" {}"), None);
        // コメントアウトされた宣言は数えない
        assert_eq!(declared_module_name("# module \"x\" {"), None);
    }

    #[test]
    fn test_sanitize_dir_name() {
        assert_eq!(sanitize_dir_name("ec2-datadog-docker"), "ec2_datadog_docker");
        // 置き換えるのはハイフンだけ
        assert_eq!(sanitize_dir_name("ec2-web.v2"), "ec2_web.v2");
        assert_eq!(sanitize_dir_name("eks cluster"), "eks cluster");
        assert_eq!(sanitize_dir_name("shared"), "shared");
    }

    #[test]
    fn test_resource_id_priority() {
        let temp_dir = tempfile::tempdir().unwrap();
        let root = temp_dir.path();

        let with_marker = write_instance(root, "ec2-a", "module \"from_module\" {\n}\n");
        fs::write(with_marker.join(".resource_id"), "  from_marker\n").unwrap();
        assert_eq!(resource_id_for_instance(&with_marker), "from_marker");

        let with_module = write_instance(root, "ec2-b", "module \"from_module\" {\n}\n");
        assert_eq!(resource_id_for_instance(&with_module), "from_module");

        let plain = write_instance(root, "ec2-plain-dir", "resource \"null_resource\" \"x\" {}\n");
        assert_eq!(resource_id_for_instance(&plain), "ec2_plain_dir");

        let empty_marker = write_instance(root, "ec2-empty", "");
        fs::write(empty_marker.join(".resource_id"), "\n").unwrap();
        assert_eq!(resource_id_for_instance(&empty_marker), "ec2_empty");
    }

    #[test]
    fn test_discover_instances_skips_non_instances() {
        let temp_dir = tempfile::tempdir().unwrap();
        let root = temp_dir.path();

        write_instance(root, "ec2-web", "module \"ec2_web\" {\n}\n");
        write_instance(root, "shared", "module \"security_group\" {\n}\n");
        fs::create_dir_all(root.join("modules-only")).unwrap();
        fs::write(root.join("README.md"), "not a directory").unwrap();

        let map = discover_instances(root);
        assert_eq!(map.len(), 2);
        assert_eq!(map.ids().collect::<Vec<_>>(), vec!["ec2_web", "security_group"]);
        assert_eq!(map.dir_name("security_group"), Some("shared"));
        assert_eq!(map.resource_id_for_dir("ec2-web"), Some("ec2_web"));
        assert!(!map.contains("modules_only"));
    }

    #[test]
    fn test_discover_missing_root_is_empty() {
        let temp_dir = tempfile::tempdir().unwrap();
        let map = discover_instances(&temp_dir.path().join("does-not-exist"));
        assert!(map.is_empty());
    }

    #[test]
    fn test_duplicate_ids_last_sorted_wins() {
        let temp_dir = tempfile::tempdir().unwrap();
        let root = temp_dir.path();

        // 作成順ではなくソート順で決まることを確認するため逆順に作る
        write_instance(root, "b-second", "module \"dup\" {\n}\n");
        write_instance(root, "a-first", "module \"dup\" {\n}\n");

        let map = discover_instances(root);
        assert_eq!(map.len(), 1);
        assert_eq!(map.dir_name("dup"), Some("b-second"));
        assert_eq!(map.resource_id_for_dir("b-second"), Some("dup"));
        assert_eq!(map.resource_id_for_dir("a-first"), None);
    }

    #[test]
    fn test_discovered_ids_resolve_to_live_instances() {
        let temp_dir = tempfile::tempdir().unwrap();
        let root = temp_dir.path();
        write_instance(root, "ec2-web", "module \"ec2_web\" {\n}\n");
        write_instance(root, "eks-cluster", "");
        write_instance(root, "shared", "module \"security_group\" {\n}\n");

        let catalog = InstanceCatalog::new(root);
        let map = catalog.map();
        for id in map.ids() {
            let instance = catalog.resolve(id).unwrap();
            assert!(instance.path.is_dir());
            assert!(instance.path.join("main.tf").is_file());
        }
    }

    #[test]
    fn test_catalog_resolve_errors() {
        let temp_dir = tempfile::tempdir().unwrap();
        let root = temp_dir.path();
        let dir = write_instance(root, "ec2-web", "module \"ec2\" {\n}\n");

        let catalog = InstanceCatalog::new(root);
        assert!(matches!(
            catalog.resolve("nonexistent"),
            Err(CoreError::ResourceNotFound(id)) if id == "nonexistent"
        ));

        assert_eq!(catalog.resolve_directory("ec2"), Some(dir.clone()));
        fs::remove_dir_all(&dir).unwrap();

        // キャッシュには残っているがディスクからは消えている
        assert_eq!(catalog.resolve_directory("ec2"), Some(dir.clone()));
        let err = catalog.resolve("ec2").unwrap_err();
        assert!(matches!(err, CoreError::DirectoryMissing { .. }));
        assert!(err.to_string().contains("Resource directory not found"));
    }

    #[test]
    fn test_catalog_picks_up_new_instances() {
        let temp_dir = tempfile::tempdir().unwrap();
        let root = temp_dir.path();
        write_instance(root, "ec2-web", "module \"ec2\" {\n}\n");

        let catalog = InstanceCatalog::new(root);
        assert_eq!(catalog.map().len(), 1);

        write_instance(root, "eks-cluster", "module \"eks\" {\n}\n");
        // ミスか明示的な無効化まではキャッシュは古いまま
        assert_eq!(catalog.map().len(), 1);
        assert!(catalog.resolve("eks").is_ok());
        assert_eq!(catalog.map().len(), 2);

        write_instance(root, "ecs-app", "module \"ecs\" {\n}\n");
        catalog.invalidate();
        assert_eq!(catalog.map().len(), 3);
    }
}
