//! Durable store collaborator.
//!
//! Storage engine internals are out of scope; the session only depends on
//! the [`Store`] trait. [`FileStore`] is the JSON-snapshot implementation
//! used by embedders that want the default single-file layout: one message
//! map per chat, one contact record per jid, group metadata as an
//! identifier-to-metadata mapping.

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::StoreError;
use crate::jid;
use crate::metadata::GroupMetadata;
use crate::socket::{Contact, ContactPatch};
use crate::wire::WebMessageInfo;

#[async_trait]
pub trait Store: Send + Sync {
    /// Load persisted state. Called once at session start.
    async fn load(&self) -> Result<(), StoreError>;

    /// Persist the current state. The session drives this periodically and
    /// once more on teardown.
    async fn flush(&self) -> Result<(), StoreError>;

    async fn load_message(&self, chat: &str, id: &str) -> Option<WebMessageInfo>;
    async fn save_message(&self, chat: &str, message: &WebMessageInfo);

    async fn get_group_metadata(&self, group_jid: &str) -> Option<GroupMetadata>;
    async fn set_group_metadata(&self, group_jid: &str, metadata: &GroupMetadata);

    async fn get_contact(&self, contact_jid: &str) -> Option<Contact>;
    async fn update_contacts(&self, patches: &[ContactPatch]);
    async fn upsert_contacts(&self, contacts: &[Contact]);
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreData {
    contacts: HashMap<String, Contact>,
    groups: HashMap<String, GroupMetadata>,
    /// chat jid -> message id -> envelope
    messages: HashMap<String, HashMap<String, WebMessageInfo>>,
}

/// Single-file JSON snapshot store.
pub struct FileStore {
    path: PathBuf,
    data: RwLock<StoreData>,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        FileStore {
            path: path.into(),
            data: RwLock::new(StoreData::default()),
        }
    }
}

#[async_trait]
impl Store for FileStore {
    async fn load(&self) -> Result<(), StoreError> {
        let raw = match tokio::fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("[load]: no store snapshot at {:?}, starting empty", self.path);
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };
        let data: StoreData = serde_json::from_slice(&raw)?;
        info!(
            "[load]: loaded store snapshot ({} chats, {} groups, {} contacts)",
            data.messages.len(),
            data.groups.len(),
            data.contacts.len()
        );
        *self.data.write().await = data;
        Ok(())
    }

    async fn flush(&self) -> Result<(), StoreError> {
        let raw = {
            let data = self.data.read().await;
            serde_json::to_vec(&*data)?
        };
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        tokio::fs::write(&self.path, raw).await?;
        debug!("[flush]: store snapshot written to {:?}", self.path);
        Ok(())
    }

    async fn load_message(&self, chat: &str, id: &str) -> Option<WebMessageInfo> {
        self.data
            .read()
            .await
            .messages
            .get(&jid::normalize(chat))
            .and_then(|chat_messages| chat_messages.get(id))
            .cloned()
    }

    async fn save_message(&self, chat: &str, message: &WebMessageInfo) {
        if message.key.id.is_empty() {
            return;
        }
        self.data
            .write()
            .await
            .messages
            .entry(jid::normalize(chat))
            .or_default()
            .insert(message.key.id.clone(), message.clone());
    }

    async fn get_group_metadata(&self, group_jid: &str) -> Option<GroupMetadata> {
        self.data
            .read()
            .await
            .groups
            .get(&jid::normalize(group_jid))
            .cloned()
    }

    async fn set_group_metadata(&self, group_jid: &str, metadata: &GroupMetadata) {
        self.data
            .write()
            .await
            .groups
            .insert(jid::normalize(group_jid), metadata.clone());
    }

    async fn get_contact(&self, contact_jid: &str) -> Option<Contact> {
        self.data
            .read()
            .await
            .contacts
            .get(&jid::normalize(contact_jid))
            .cloned()
    }

    async fn update_contacts(&self, patches: &[ContactPatch]) {
        let mut data = self.data.write().await;
        for patch in patches {
            let id = jid::normalize(&patch.id);
            if id.is_empty() {
                continue;
            }
            let contact = data.contacts.entry(id.clone()).or_insert_with(|| Contact {
                id: id.clone(),
                ..Default::default()
            });
            if let Some(name) = &patch.name {
                contact.name = Some(name.clone());
            }
            if let Some(notify) = &patch.notify {
                contact.notify = Some(notify.clone());
            }
        }
    }

    async fn upsert_contacts(&self, contacts: &[Contact]) {
        let mut data = self.data.write().await;
        for contact in contacts {
            let id = jid::normalize(&contact.id);
            if id.is_empty() {
                continue;
            }
            let mut contact = contact.clone();
            contact.id = id.clone();
            data.contacts.insert(id, contact);
        }
    }
}
