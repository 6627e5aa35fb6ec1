//! Document-store credential backend (redis).

use async_trait::async_trait;
use fred::clients::RedisClient;
use fred::prelude::*;
use log::info;

use crate::auth::{CredentialStore, Credentials};
use crate::error::AuthError;

pub struct RedisCredentialStore {
    client: RedisClient,
    key: String,
}

impl RedisCredentialStore {
    /// One credential record per session name, under a fixed key prefix.
    fn record_key(session_name: &str) -> String {
        format!("watalk:auth:{session_name}")
    }

    pub async fn connect(url: &str, session_name: &str) -> Result<Self, AuthError> {
        let config = RedisConfig::from_url(url)?;
        let client = Builder::from_config(config).build()?;
        client.init().await?;
        Ok(RedisCredentialStore {
            client,
            key: Self::record_key(session_name),
        })
    }

    pub async fn load_or_generate(&self) -> Result<Credentials, AuthError> {
        let raw: Option<String> = self.client.get(self.key.as_str()).await?;
        match raw {
            Some(raw) => Ok(serde_json::from_str(&raw)?),
            None => {
                let creds = Credentials::generate();
                self.persist(&creds).await?;
                Ok(creds)
            }
        }
    }
}

#[async_trait]
impl CredentialStore for RedisCredentialStore {
    async fn persist(&self, creds: &Credentials) -> Result<(), AuthError> {
        let raw = serde_json::to_string(creds)?;
        self.client
            .set::<(), _, _>(self.key.as_str(), raw, None, None, false)
            .await?;
        Ok(())
    }

    async fn erase(&self) -> Result<(), AuthError> {
        let removed: u64 = self.client.del(self.key.as_str()).await?;
        info!("[erase]: removed {removed} credential record(s) for {}", self.key);
        Ok(())
    }
}
