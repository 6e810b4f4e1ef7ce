use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config directory not found")]
    ConfigDirNotFound,

    #[error("Home directory not found; set TF_PLUGIN_CACHE_DIR explicitly")]
    HomeDirNotFound,

    #[error("Invalid settings file: {path}\nReason: {message}")]
    InvalidSettings { path: PathBuf, message: String },

    #[error("Invalid provider source '{0}', expected <namespace>/<name>")]
    InvalidProviderSource(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ConfigError>;
