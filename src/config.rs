//! Session configuration, read from the process environment.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_SESSION_NAME: &str = "main";
pub const DEFAULT_LOCAL_AUTH_PATH: &str = "auth_state";
pub const DEFAULT_STORE_PATH: &str = "store.json";

/// Recognized options for one session: interactive-linking (QR) mode flag,
/// bot phone number for the pairing path, auth-backend selector and its
/// connection strings, and the local credential directory.
#[derive(Debug, Clone)]
pub struct Config {
    pub session_name: String,
    /// Interactive-code (QR) linking instead of the pairing-code path.
    pub qr_mode: bool,
    /// Phone number used to request a pairing code when QR mode is off.
    pub bot_number: Option<String>,
    /// Explicit auth backend selector (`redis` | `sqlite` | `local`).
    pub auth_store: Option<String>,
    /// Legacy flag forcing the document (redis) backend.
    pub use_redis_auth: bool,
    pub redis_url: Option<String>,
    pub database_url: Option<String>,
    /// Directory for the local-file credential backend.
    pub local_auth_path: PathBuf,
    /// Snapshot path for the file-backed store.
    pub store_path: PathBuf,
    /// Memory-tier TTL of the group metadata cache.
    pub group_metadata_ttl: Duration,
}

impl Config {
    /// Build a configuration from environment variables, falling back to
    /// defaults for everything optional. Nothing is validated here; missing
    /// required values surface as [`ConfigError`](crate::error::ConfigError)
    /// at the point where the option is actually needed, before any socket
    /// is constructed.
    pub fn from_env() -> Self {
        let flag = |name: &str| {
            env::var(name)
                .map(|v| v.eq_ignore_ascii_case("true"))
                .unwrap_or(false)
        };
        let opt = |name: &str| env::var(name).ok().filter(|v| !v.is_empty());

        Config {
            session_name: opt("SESSION_NAME").unwrap_or_else(|| DEFAULT_SESSION_NAME.to_string()),
            qr_mode: flag("QR"),
            bot_number: opt("BOT_NUMBER"),
            auth_store: opt("AUTH_STORE").map(|v| v.to_lowercase()),
            use_redis_auth: flag("USE_REDIS_AUTH"),
            redis_url: opt("REDIS_URL"),
            database_url: opt("DATABASE_URL"),
            local_auth_path: opt("LOCAL_AUTH_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_LOCAL_AUTH_PATH)),
            store_path: opt("STORE_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_STORE_PATH)),
            group_metadata_ttl: Duration::from_secs(60 * 60),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            session_name: DEFAULT_SESSION_NAME.to_string(),
            qr_mode: false,
            bot_number: None,
            auth_store: None,
            use_redis_auth: false,
            redis_url: None,
            database_url: None,
            local_auth_path: PathBuf::from(DEFAULT_LOCAL_AUTH_PATH),
            store_path: PathBuf::from(DEFAULT_STORE_PATH),
            group_metadata_ttl: Duration::from_secs(60 * 60),
        }
    }
}
