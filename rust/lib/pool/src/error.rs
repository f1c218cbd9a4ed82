use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
    #[error("config error: {0}")]
    Config(String),

    #[error("connect error: {0}")]
    Connect(String),

    #[error("pool not found: {0}")]
    PoolNotFound(String),

    #[error("cluster connection is shut down")]
    Shutdown,

    #[error("object not found: {0}")]
    NotFound(String),

    #[error("I/O error: {0}")]
    Io(String),
}
