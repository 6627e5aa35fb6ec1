//! Shared test doubles: an in-memory store, a scripted socket and a
//! scripted socket factory.
#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{broadcast, RwLock};
use tokio::time::Instant;

use watalk::error::{SocketError, StoreError};
use watalk::metadata::GroupMetadata;
use watalk::socket::{Contact, ContactPatch, Socket, SocketEvent, SocketFactory, SocketOptions};
use watalk::store::Store;
use watalk::wire::{MessageKey, WebMessageInfo};

#[derive(Default)]
pub struct MemStore {
    pub messages: RwLock<HashMap<String, HashMap<String, WebMessageInfo>>>,
    pub groups: RwLock<HashMap<String, GroupMetadata>>,
    pub contacts: RwLock<HashMap<String, Contact>>,
}

#[async_trait]
impl Store for MemStore {
    async fn load(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn flush(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn load_message(&self, chat: &str, id: &str) -> Option<WebMessageInfo> {
        self.messages
            .read()
            .await
            .get(chat)
            .and_then(|msgs| msgs.get(id))
            .cloned()
    }

    async fn save_message(&self, chat: &str, message: &WebMessageInfo) {
        self.messages
            .write()
            .await
            .entry(watalk::jid::normalize(chat))
            .or_default()
            .insert(message.key.id.clone(), message.clone());
    }

    async fn get_group_metadata(&self, group_jid: &str) -> Option<GroupMetadata> {
        self.groups.read().await.get(group_jid).cloned()
    }

    async fn set_group_metadata(&self, group_jid: &str, metadata: &GroupMetadata) {
        self.groups
            .write()
            .await
            .insert(group_jid.to_string(), metadata.clone());
    }

    async fn get_contact(&self, contact_jid: &str) -> Option<Contact> {
        self.contacts.read().await.get(contact_jid).cloned()
    }

    async fn update_contacts(&self, patches: &[ContactPatch]) {
        let mut contacts = self.contacts.write().await;
        for patch in patches {
            let contact = contacts.entry(patch.id.clone()).or_insert_with(|| Contact {
                id: patch.id.clone(),
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

    async fn upsert_contacts(&self, new_contacts: &[Contact]) {
        let mut contacts = self.contacts.write().await;
        for contact in new_contacts {
            contacts.insert(contact.id.clone(), contact.clone());
        }
    }
}

/// Socket double that replays a scripted event sequence on first subscribe
/// and records pairing-code requests.
pub struct ScriptedSocket {
    events: broadcast::Sender<SocketEvent>,
    script: StdMutex<Vec<SocketEvent>>,
    pub metadata: Option<GroupMetadata>,
    pub user: Option<String>,
    /// Recorded (phone, request instant) pairs.
    pub pairing_requests: Arc<StdMutex<Vec<(String, Instant)>>>,
    /// Emit a terminal logged-out close right after a pairing request; lets
    /// pairing tests run the session to completion deterministically.
    pub close_after_pairing: bool,
}

impl ScriptedSocket {
    pub fn new(script: Vec<SocketEvent>) -> Self {
        let (events, _) = broadcast::channel(64);
        ScriptedSocket {
            events,
            script: StdMutex::new(script),
            metadata: None,
            user: None,
            pairing_requests: Arc::new(StdMutex::new(Vec::new())),
            close_after_pairing: false,
        }
    }
}

#[async_trait]
impl Socket for ScriptedSocket {
    fn subscribe(&self) -> broadcast::Receiver<SocketEvent> {
        let receiver = self.events.subscribe();
        let script: Vec<SocketEvent> = std::mem::take(&mut *self.script.lock().unwrap());
        if !script.is_empty() {
            let sender = self.events.clone();
            tokio::spawn(async move {
                // Let the dispatch loop reach recv() before replaying.
                tokio::time::sleep(Duration::from_millis(5)).await;
                for event in script {
                    let _ = sender.send(event);
                    tokio::time::sleep(Duration::from_millis(1)).await;
                }
            });
        }
        receiver
    }

    fn user_jid(&self) -> Option<String> {
        self.user.clone()
    }

    async fn group_metadata(&self, _jid: &str) -> Result<GroupMetadata, SocketError> {
        self.metadata
            .clone()
            .ok_or_else(|| SocketError::Transport("no metadata scripted".to_string()))
    }

    async fn send_text(&self, _jid: &str, _body: &str) -> Result<(), SocketError> {
        Ok(())
    }

    async fn request_pairing_code(&self, phone: &str) -> Result<String, SocketError> {
        self.pairing_requests
            .lock()
            .unwrap()
            .push((phone.to_string(), Instant::now()));
        if self.close_after_pairing {
            let _ = self.events.send(SocketEvent::ConnectionUpdate {
                state: Some(watalk::socket::ConnectionState::Close),
                reason: Some(watalk::socket::DisconnectReason::LoggedOut),
                qr: None,
            });
        }
        Ok("ABCD-EFGH".to_string())
    }

    async fn download_media(&self, _key: &MessageKey) -> Result<Vec<u8>, SocketError> {
        Ok(b"media-bytes".to_vec())
    }
}

/// Factory handing out scripted sockets in order and recording connect
/// instants (for delay assertions against the paused clock).
pub struct ScriptedFactory {
    sockets: StdMutex<VecDeque<Arc<ScriptedSocket>>>,
    pub connects: StdMutex<Vec<Instant>>,
}

impl ScriptedFactory {
    pub fn new(sockets: Vec<Arc<ScriptedSocket>>) -> Self {
        ScriptedFactory {
            sockets: StdMutex::new(sockets.into()),
            connects: StdMutex::new(Vec::new()),
        }
    }

    pub fn connect_count(&self) -> usize {
        self.connects.lock().unwrap().len()
    }
}

#[async_trait]
impl SocketFactory for ScriptedFactory {
    async fn latest_version(&self) -> Result<[u32; 3], SocketError> {
        Ok([2, 3000, 1])
    }

    async fn connect(
        &self,
        _creds: &watalk::auth::Credentials,
        _options: &SocketOptions,
    ) -> Result<Arc<dyn Socket>, SocketError> {
        self.connects.lock().unwrap().push(Instant::now());
        let sock = self
            .sockets
            .lock()
            .unwrap()
            .pop_front()
            .ok_or(SocketError::Closed)?;
        Ok(sock as Arc<dyn Socket>)
    }
}
