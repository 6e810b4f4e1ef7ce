//! 管理インスタンスのモデル

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Terraformルートモジュールのファイル。これがないディレクトリはインスタンスではない
pub const ROOT_MODULE_FILE: &str = "main.tf";
/// リソースIDを固定するマーカー
pub const RESOURCE_ID_FILE: &str = ".resource_id";
/// Created by `terraform init`
pub const INIT_MARKER_DIR: &str = ".terraform";
/// インスタンスごとの変数の上書き
pub const TFVARS_FILE: &str = "terraform.tfvars";
pub const DESCRIPTION_FILE: &str = "DESCRIPTION.md";

/// 管理リソースの大まかな種類
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Ec2,
    Rds,
    Eks,
    Ecs,
    Ecr,
    Lambda,
    Dbm,
    Test,
    SecurityGroup,
}

impl ResourceKind {
    /// ディレクトリの命名規則から種類を推定
    pub fn from_dir_name(dir_name: &str) -> Self {
        if dir_name == "shared" {
            return ResourceKind::SecurityGroup;
        }
        if dir_name == "deploy-spring-boot" {
            return ResourceKind::Ecr;
        }

        const PREFIXES: [(&str, ResourceKind); 7] = [
            ("ec2-", ResourceKind::Ec2),
            ("eks-", ResourceKind::Eks),
            ("ecs-", ResourceKind::Ecs),
            ("lambda-", ResourceKind::Lambda),
            ("dbm-", ResourceKind::Dbm),
            ("ecr-", ResourceKind::Ecr),
            ("test-file-", ResourceKind::Test),
        ];

        PREFIXES
            .iter()
            .find(|(prefix, _)| dir_name.starts_with(prefix))
            .map(|(_, kind)| *kind)
            .unwrap_or(ResourceKind::Ec2)
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceKind::Ec2 => write!(f, "ec2"),
            ResourceKind::Rds => write!(f, "rds"),
            ResourceKind::Eks => write!(f, "eks"),
            ResourceKind::Ecs => write!(f, "ecs"),
            ResourceKind::Ecr => write!(f, "ecr"),
            ResourceKind::Lambda => write!(f, "lambda"),
            ResourceKind::Dbm => write!(f, "dbm"),
            ResourceKind::Test => write!(f, "test"),
            ResourceKind::SecurityGroup => write!(f, "security_group"),
        }
    }
}

/// 発見したTerraformインスタンスのディレクトリ
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instance {
    /// すべての操作で使う論理ID
    pub resource_id: String,
    /// instances ルート配下のディレクトリ名
    pub dir_name: String,
    /// Absolute (or root-relative) path to the directory
    pub path: PathBuf,
    pub kind: ResourceKind,
}

impl Instance {
    pub fn new(resource_id: impl Into<String>, path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let dir_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let kind = ResourceKind::from_dir_name(&dir_name);

        Self {
            resource_id: resource_id.into(),
            dir_name,
            path,
            kind,
        }
    }

    pub fn exists(&self) -> bool {
        self.path.is_dir()
    }

    /// `terraform init` 済みかどうか
    pub fn is_initialized(&self) -> bool {
        self.path.join(INIT_MARKER_DIR).exists()
    }

    /// インスタンス自身の `terraform.tfvars`(あれば)
    pub fn tfvars_file(&self) -> Option<PathBuf> {
        let path = self.path.join(TFVARS_FILE);
        path.is_file().then_some(path)
    }

    /// `DESCRIPTION.md` の内容(あれば)
    pub fn description(&self) -> Result<Option<String>> {
        let path = self.path.join(DESCRIPTION_FILE);
        if !path.is_file() {
            return Ok(None);
        }
        Ok(Some(std::fs::read_to_string(path)?))
    }
}
