//! Credential state and auth-backend selection.
//!
//! Exactly one backend owns the persisted credential record for a session:
//! the document store (redis), the relational store (sqlite) or the local
//! file store, with local file as the default. A remote backend without its
//! connection string is a fatal configuration error raised before any
//! socket exists.

pub mod local;
pub mod redis;
pub mod sqlite;

use std::fmt::Display;

use async_trait::async_trait;
use log::info;
use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::{AuthError, ConfigError};

pub const AUTH_BACKEND_REDIS: &str = "redis";
pub const AUTH_BACKEND_SQLITE: &str = "sqlite";
pub const AUTH_BACKEND_LOCAL: &str = "local";

/// Opaque credential blob plus key material for one session.
///
/// Mutated on every credentials-updated event and erased only on a terminal
/// logout. The `registered` flag decides whether a linking flow (pairing
/// code or QR) is needed at connect time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub client_id: String,
    pub registration_id: u32,
    pub noise_key: Vec<u8>,
    pub identity_key: Vec<u8>,
    pub registered: bool,
    /// Own jid, known after linking completes.
    pub me: Option<String>,
}

impl Credentials {
    /// Fresh, unregistered credentials with random key material.
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        let mut noise_key = vec![0u8; 32];
        rng.fill_bytes(&mut noise_key);
        let mut identity_key = vec![0u8; 32];
        rng.fill_bytes(&mut identity_key);
        Credentials {
            client_id: uuid::Uuid::new_v4().to_string(),
            registration_id: rng.gen_range(1..16_384),
            noise_key,
            identity_key,
            registered: false,
            me: None,
        }
    }
}

/// Persistence operations of the selected backend.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Durably commit the given credentials before returning. Invoked on
    /// every credentials-updated event.
    async fn persist(&self, creds: &Credentials) -> Result<(), AuthError>;

    /// Remove all persisted material for the session name. Used only on a
    /// terminal logout; missing records are not an error.
    async fn erase(&self) -> Result<(), AuthError>;
}

pub struct AuthState {
    pub creds: Credentials,
    pub store: Box<dyn CredentialStore>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthBackend {
    Redis,
    Sqlite,
    Local,
}

impl Display for AuthBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let backend = match self {
            AuthBackend::Redis => AUTH_BACKEND_REDIS,
            AuthBackend::Sqlite => AUTH_BACKEND_SQLITE,
            AuthBackend::Local => AUTH_BACKEND_LOCAL,
        };
        write!(f, "{backend}")
    }
}

/// Resolve which backend to use. The legacy redis flag wins over the
/// explicit selector; anything unrecognized falls back to the local file
/// store.
pub fn select_backend(config: &Config) -> AuthBackend {
    if config.use_redis_auth {
        return AuthBackend::Redis;
    }
    match config.auth_store.as_deref() {
        Some(AUTH_BACKEND_REDIS) => AuthBackend::Redis,
        Some(AUTH_BACKEND_SQLITE) => AuthBackend::Sqlite,
        _ => AuthBackend::Local,
    }
}

/// Select a backend, load (or generate) the credential state and return it
/// together with the backend's persist/erase operations.
pub async fn auth_state(config: &Config) -> Result<AuthState, AuthError> {
    let backend = select_backend(config);
    info!("[auth_state]: initializing auth backend: {backend}");

    match backend {
        AuthBackend::Redis => {
            let url = config
                .redis_url
                .as_deref()
                .ok_or(ConfigError::MissingRedisUrl)?;
            let store = redis::RedisCredentialStore::connect(url, &config.session_name).await?;
            let creds = store.load_or_generate().await?;
            Ok(AuthState {
                creds,
                store: Box::new(store),
            })
        }
        AuthBackend::Sqlite => {
            let url = config
                .database_url
                .as_deref()
                .ok_or(ConfigError::MissingDatabaseUrl)?;
            let store = sqlite::SqliteCredentialStore::connect(url, &config.session_name).await?;
            let creds = store.load_or_generate().await?;
            Ok(AuthState {
                creds,
                store: Box::new(store),
            })
        }
        AuthBackend::Local => {
            let store = local::LocalCredentialStore::new(
                config.local_auth_path.clone(),
                &config.session_name,
            );
            let creds = store.load_or_generate().await?;
            Ok(AuthState {
                creds,
                store: Box::new(store),
            })
        }
    }
}
