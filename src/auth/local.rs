//! Local file credential backend (the default).

use std::path::PathBuf;

use async_trait::async_trait;
use log::{error, info};
use tokio::io::AsyncWriteExt;

use crate::auth::{CredentialStore, Credentials};
use crate::error::AuthError;

pub struct LocalCredentialStore {
    dir: PathBuf,
    session_name: String,
}

impl LocalCredentialStore {
    pub fn new(dir: PathBuf, session_name: &str) -> Self {
        LocalCredentialStore {
            dir,
            session_name: session_name.to_string(),
        }
    }

    fn creds_path(&self) -> PathBuf {
        self.dir.join(format!("creds-{}.json", self.session_name))
    }

    /// Read the persisted record for this session, or generate (and
    /// immediately persist) a fresh unregistered one.
    pub async fn load_or_generate(&self) -> Result<Credentials, AuthError> {
        match tokio::fs::read(self.creds_path()).await {
            Ok(raw) => Ok(serde_json::from_slice(&raw)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let creds = Credentials::generate();
                self.persist(&creds).await?;
                Ok(creds)
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl CredentialStore for LocalCredentialStore {
    async fn persist(&self, creds: &Credentials) -> Result<(), AuthError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let raw = serde_json::to_vec(creds)?;
        let mut file = tokio::fs::File::create(self.creds_path()).await?;
        file.write_all(&raw).await?;
        // Commit before returning; a credential update lost to a crash
        // invalidates the whole session.
        file.sync_all().await?;
        Ok(())
    }

    async fn erase(&self) -> Result<(), AuthError> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            if let Err(e) = tokio::fs::remove_file(entry.path()).await {
                error!("[erase]: failed to remove {:?}: {e}", entry.path());
            }
        }
        info!("[erase]: all auth files removed from {:?}", self.dir);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_load_generates_then_reloads_same_creds() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let store = LocalCredentialStore::new(dir.path().to_path_buf(), "main");

        let generated = store
            .load_or_generate()
            .await
            .expect("Failed to generate credentials");
        let reloaded = store
            .load_or_generate()
            .await
            .expect("Failed to reload credentials");
        assert_eq!(generated, reloaded);
    }

    #[tokio::test]
    async fn test_persist_then_erase_removes_record() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let store = LocalCredentialStore::new(dir.path().to_path_buf(), "main");

        let mut creds = store
            .load_or_generate()
            .await
            .expect("Failed to generate credentials");
        creds.registered = true;
        store.persist(&creds).await.expect("Failed to persist");

        store.erase().await.expect("Failed to erase");
        let regenerated = store
            .load_or_generate()
            .await
            .expect("Failed to regenerate credentials");
        assert!(!regenerated.registered);
    }

    #[tokio::test]
    async fn test_erase_missing_dir_is_ok() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let store = LocalCredentialStore::new(dir.path().join("never-created"), "main");
        store.erase().await.expect("erase should tolerate a missing dir");
    }
}
