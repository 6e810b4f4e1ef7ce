use thiserror::Error;

#[derive(Error, Debug)]
pub enum RunnerError {
    #[error("Failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read terraform output: {0}")]
    Output(#[from] serde_json::Error),

    #[error(transparent)]
    Core(#[from] tfdeck_core::CoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, RunnerError>;
