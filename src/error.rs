use tokio::task::JoinError;

/// Fatal configuration problems. These are raised before any socket exists
/// and halt startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("REDIS_URL is required when the redis auth backend is selected")]
    MissingRedisUrl,
    #[error("DATABASE_URL is required when the sqlite auth backend is selected")]
    MissingDatabaseUrl,
    #[error("a bot phone number is required for pairing when QR mode is disabled")]
    MissingBotNumber,
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error(transparent)]
    ConfigError(#[from] ConfigError),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("JSON processing error: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("Redis error: {0}")]
    RedisError(#[from] fred::error::RedisError),
    #[error("SQL error: {0}")]
    SqlError(#[from] sqlx::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("JSON processing error: {0}")]
    JsonError(#[from] serde_json::Error),
}

/// Transient failures surfaced by the socket collaborator. These are logged,
/// the triggering operation is skipped, and the session keeps running.
#[derive(Debug, thiserror::Error)]
pub enum SocketError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("socket is closed")]
    Closed,
}

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("group metadata unavailable for {0}")]
    MetadataUnavailable(String),

    #[error(transparent)]
    StoreError(#[from] StoreError),
    #[error(transparent)]
    SocketError(#[from] SocketError),
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    ConfigError(#[from] ConfigError),
    #[error(transparent)]
    AuthError(#[from] AuthError),
    #[error(transparent)]
    StoreError(#[from] StoreError),
    #[error(transparent)]
    SocketError(#[from] SocketError),
    #[error(transparent)]
    CacheError(#[from] CacheError),

    #[error("Failed from tokio join: {0}")]
    TokioJoinError(#[from] JoinError),

    #[error("An unknown error occurred: {0}")]
    Other(anyhow::Error),
}
