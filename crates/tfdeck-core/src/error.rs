use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    /// このIDに対応するインスタンスディレクトリがない
    #[error("Unknown resource ID: {0}")]
    ResourceNotFound(String),

    /// IDは既知だがディレクトリが消えている
    #[error("Resource directory not found: {path}")]
    DirectoryMissing { resource_id: String, path: PathBuf },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CoreError>;
