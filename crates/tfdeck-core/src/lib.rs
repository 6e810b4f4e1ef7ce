//! tfdeck コア
//!
//! Terraformインスタンスのディレクトリを論理リソースIDに対応付ける。

pub mod discovery;
pub mod error;
pub mod resource;

pub use discovery::{
    InstanceCatalog, ResourceMap, declared_module_name, discover_instances,
    resource_id_for_instance, sanitize_dir_name,
};
pub use error::{CoreError, Result};
pub use resource::{Instance, ResourceKind};
