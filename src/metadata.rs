//! Group metadata cache.
//!
//! Cache-aside across three tiers: a TTL'd memory tier, the durable store
//! tier and, as the source of truth, a live fetch through the socket layer.
//! A hit in an earlier tier repopulates nothing upstream; a live fetch
//! populates both cache tiers. Membership changes are applied to an owned
//! snapshot which is then written to both tiers, so the tiers never alias
//! one shared object.
//!
//! All mutation (and the live-fetch/populate path) is serialized per
//! normalized group identifier: a metadata fetch and a membership change for
//! the same group may be in flight concurrently and must not interleave, or
//! the read-modify-write cycle loses updates. Different groups never block
//! each other.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;

use crate::error::CacheError;
use crate::jid;
use crate::socket::{GroupPatch, ParticipantAction, Socket};
use crate::store::Store;

/// Admin role of a group participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdminRole {
    Admin,
    SuperAdmin,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Participant {
    /// Stable identifier as reported by the protocol (may be a lid).
    pub id: String,
    /// Phone-number-based identifier, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jid: Option<String>,
    /// Privacy identifier, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub admin: Option<AdminRole>,
}

impl Participant {
    pub fn new(id: &str) -> Self {
        Participant {
            id: id.to_string(),
            ..Default::default()
        }
    }

    pub fn is_admin(&self) -> bool {
        self.admin.is_some()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GroupMetadata {
    pub id: String,
    pub subject: String,
    pub participants: Vec<Participant>,
}

struct MemoryEntry {
    metadata: GroupMetadata,
    cached_at: Instant,
}

/// One cache instance per session, passed explicitly to the normalizer.
pub struct GroupMetadataCache {
    ttl: Duration,
    memory: RwLock<HashMap<String, MemoryEntry>>,
    store: Arc<dyn Store>,
    /// Per-group mutation guards. Entries are created on first use and kept
    /// for the session lifetime; the set of groups a session sees is small.
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl GroupMetadataCache {
    pub fn new(store: Arc<dyn Store>, ttl: Duration) -> Self {
        GroupMetadataCache {
            ttl,
            memory: RwLock::new(HashMap::new()),
            store,
            locks: Mutex::new(HashMap::new()),
        }
    }

    async fn guard(&self, group_jid: &str) -> Arc<Mutex<()>> {
        self.locks
            .lock()
            .await
            .entry(group_jid.to_string())
            .or_default()
            .clone()
    }

    /// Memory-tier lookup. An expired entry is treated as a miss and evicted.
    async fn memory_get(&self, group_jid: &str) -> Option<GroupMetadata> {
        {
            let memory = self.memory.read().await;
            match memory.get(group_jid) {
                Some(entry) if entry.cached_at.elapsed() < self.ttl => {
                    return Some(entry.metadata.clone());
                }
                Some(_) => {}
                None => return None,
            }
        }
        // Evict, unless a concurrent update refreshed the entry in between.
        let mut memory = self.memory.write().await;
        if let Some(entry) = memory.get(group_jid) {
            if entry.cached_at.elapsed() >= self.ttl {
                memory.remove(group_jid);
            }
        }
        None
    }

    async fn write_both_tiers(&self, group_jid: &str, metadata: &GroupMetadata) {
        self.memory.write().await.insert(
            group_jid.to_string(),
            MemoryEntry {
                metadata: metadata.clone(),
                cached_at: Instant::now(),
            },
        );
        self.store.set_group_metadata(group_jid, metadata).await;
    }

    /// Cached metadata without touching the live socket: memory tier first,
    /// then the durable tier (which repopulates memory on a hit).
    async fn cached(&self, group_jid: &str) -> Option<GroupMetadata> {
        if let Some(metadata) = self.memory_get(group_jid).await {
            return Some(metadata);
        }
        let metadata = self.store.get_group_metadata(group_jid).await?;
        self.memory.write().await.insert(
            group_jid.to_string(),
            MemoryEntry {
                metadata: metadata.clone(),
                cached_at: Instant::now(),
            },
        );
        Some(metadata)
    }

    async fn fetch_live(&self, sock: &dyn Socket, group_jid: &str) -> Option<GroupMetadata> {
        match sock.group_metadata(group_jid).await {
            Ok(mut metadata) => {
                metadata.id = group_jid.to_string();
                normalize_participants(&mut metadata.participants);
                self.write_both_tiers(group_jid, &metadata).await;
                debug!("[fetch_live]: cached metadata for group {group_jid}");
                Some(metadata)
            }
            Err(e) => {
                error!("[fetch_live]: failed to fetch group metadata for {group_jid}: {e}");
                None
            }
        }
    }

    /// Resolve group metadata, consulting the tiers in order. Returns `None`
    /// (and mutates nothing) when all three tiers miss.
    pub async fn get(&self, sock: &dyn Socket, group_jid: &str) -> Option<GroupMetadata> {
        let group_jid = jid::normalize(group_jid);
        if group_jid.is_empty() {
            return None;
        }
        if let Some(metadata) = self.memory_get(&group_jid).await {
            return Some(metadata);
        }

        let guard = self.guard(&group_jid).await;
        let _serialized = guard.lock().await;

        // Re-check under the guard: a concurrent fetch or membership update
        // may have populated the tiers while we waited.
        if let Some(metadata) = self.cached(&group_jid).await {
            return Some(metadata);
        }
        self.fetch_live(sock, &group_jid).await
    }

    /// Apply a membership-change event and write the mutated snapshot back
    /// to both tiers. When no tier (including a last-resort live fetch) can
    /// produce the group, the event is dropped without partial mutation.
    pub async fn apply_participants_update(
        &self,
        sock: &dyn Socket,
        group_jid: &str,
        participants: &[String],
        action: ParticipantAction,
    ) -> Result<(), CacheError> {
        let group_jid = jid::normalize(group_jid);
        let participant_jids: Vec<String> = participants
            .iter()
            .map(|p| jid::normalize(p))
            .filter(|p| !p.is_empty())
            .collect();
        info!(
            "[apply_participants_update]: {action:?} for {group_jid}: {}",
            participant_jids.join(", ")
        );

        let guard = self.guard(&group_jid).await;
        let _serialized = guard.lock().await;

        let mut metadata = match self.cached(&group_jid).await {
            Some(metadata) => metadata,
            None => match self.fetch_live(sock, &group_jid).await {
                Some(metadata) => metadata,
                None => return Err(CacheError::MetadataUnavailable(group_jid)),
            },
        };

        match action {
            ParticipantAction::Add => {
                for pid in &participant_jids {
                    let already_member = metadata
                        .participants
                        .iter()
                        .any(|p| jid::normalize(&p.id) == *pid);
                    if !already_member {
                        metadata.participants.push(Participant::new(pid));
                    }
                }
            }
            ParticipantAction::Promote => {
                for p in &mut metadata.participants {
                    if participant_jids.contains(&jid::normalize(&p.id)) {
                        p.admin = Some(AdminRole::Admin);
                    }
                }
            }
            ParticipantAction::Demote => {
                for p in &mut metadata.participants {
                    if participant_jids.contains(&jid::normalize(&p.id)) {
                        p.admin = None;
                    }
                }
            }
            ParticipantAction::Remove => {
                metadata
                    .participants
                    .retain(|p| !participant_jids.contains(&jid::normalize(&p.id)));
            }
        }

        self.write_both_tiers(&group_jid, &metadata).await;
        debug!("[apply_participants_update]: updated group metadata cache for {group_jid}");
        Ok(())
    }

    /// Apply a group-level metadata patch (subject change) to whatever the
    /// cache tiers already hold. Unknown groups are skipped; the next `get`
    /// fetches fresh metadata anyway.
    pub async fn apply_group_patch(&self, patch: &GroupPatch) {
        let group_jid = jid::normalize(&patch.id);
        let guard = self.guard(&group_jid).await;
        let _serialized = guard.lock().await;

        let Some(mut metadata) = self.cached(&group_jid).await else {
            debug!("[apply_group_patch]: no cached metadata for {group_jid}, skipping");
            return;
        };
        if let Some(subject) = &patch.subject {
            metadata.subject = subject.clone();
        }
        self.write_both_tiers(&group_jid, &metadata).await;
    }
}

/// Normalize the phone-number and privacy identifiers of fetched
/// participants; the stable id is kept as reported.
fn normalize_participants(participants: &mut [Participant]) {
    for p in participants {
        if let Some(j) = &p.jid {
            let normalized = jid::normalize(j);
            p.jid = (!normalized.is_empty()).then_some(normalized);
        }
        if let Some(l) = &p.lid {
            let normalized = jid::normalize(l);
            p.lid = (!normalized.is_empty()).then_some(normalized);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{SocketError, StoreError};
    use crate::socket::SocketEvent;
    use crate::wire::{MessageKey, WebMessageInfo};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::broadcast;

    const GROUP: &str = "12036304@g.us";
    const TTL: Duration = Duration::from_secs(3600);

    #[derive(Default)]
    struct MemStore {
        groups: RwLock<HashMap<String, GroupMetadata>>,
    }

    #[async_trait]
    impl Store for MemStore {
        async fn load(&self) -> Result<(), StoreError> {
            Ok(())
        }
        async fn flush(&self) -> Result<(), StoreError> {
            Ok(())
        }
        async fn load_message(&self, _chat: &str, _id: &str) -> Option<WebMessageInfo> {
            None
        }
        async fn save_message(&self, _chat: &str, _message: &WebMessageInfo) {}
        async fn get_group_metadata(&self, group_jid: &str) -> Option<GroupMetadata> {
            self.groups.read().await.get(group_jid).cloned()
        }
        async fn set_group_metadata(&self, group_jid: &str, metadata: &GroupMetadata) {
            self.groups
                .write()
                .await
                .insert(group_jid.to_string(), metadata.clone());
        }
        async fn get_contact(&self, _contact_jid: &str) -> Option<crate::socket::Contact> {
            None
        }
        async fn update_contacts(&self, _patches: &[crate::socket::ContactPatch]) {}
        async fn upsert_contacts(&self, _contacts: &[crate::socket::Contact]) {}
    }

    struct FetchCountingSocket {
        metadata: Option<GroupMetadata>,
        fetches: AtomicUsize,
        events: broadcast::Sender<SocketEvent>,
    }

    impl FetchCountingSocket {
        fn new(metadata: Option<GroupMetadata>) -> Self {
            let (events, _) = broadcast::channel(8);
            FetchCountingSocket {
                metadata,
                fetches: AtomicUsize::new(0),
                events,
            }
        }

        fn fetch_count(&self) -> usize {
            self.fetches.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Socket for FetchCountingSocket {
        fn subscribe(&self) -> broadcast::Receiver<SocketEvent> {
            self.events.subscribe()
        }
        fn user_jid(&self) -> Option<String> {
            None
        }
        async fn group_metadata(&self, _jid: &str) -> Result<GroupMetadata, SocketError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            self.metadata
                .clone()
                .ok_or_else(|| SocketError::Transport("metadata fetch failed".to_string()))
        }
        async fn send_text(&self, _jid: &str, _body: &str) -> Result<(), SocketError> {
            Ok(())
        }
        async fn request_pairing_code(&self, _phone: &str) -> Result<String, SocketError> {
            Err(SocketError::Closed)
        }
        async fn download_media(&self, _key: &MessageKey) -> Result<Vec<u8>, SocketError> {
            Err(SocketError::Closed)
        }
    }

    fn group_of(ids: &[&str]) -> GroupMetadata {
        GroupMetadata {
            id: GROUP.to_string(),
            subject: "fixture".to_string(),
            participants: ids.iter().map(|id| Participant::new(id)).collect(),
        }
    }

    #[tokio::test]
    async fn test_second_get_within_ttl_skips_live_fetch() {
        let store = Arc::new(MemStore::default());
        let cache = GroupMetadataCache::new(store, TTL);
        let sock = FetchCountingSocket::new(Some(group_of(&["628111111111@s.whatsapp.net"])));

        let first = cache.get(&sock, GROUP).await.expect("first get failed");
        let second = cache.get(&sock, GROUP).await.expect("second get failed");
        assert_eq!(first, second);
        assert_eq!(sock.fetch_count(), 1);
    }

    #[tokio::test]
    async fn test_failed_live_fetch_mutates_nothing() {
        let store = Arc::new(MemStore::default());
        let cache = GroupMetadataCache::new(store.clone(), TTL);
        let sock = FetchCountingSocket::new(None);

        assert!(cache.get(&sock, GROUP).await.is_none());
        assert!(store.get_group_metadata(GROUP).await.is_none());
        assert!(cache.memory_get(GROUP).await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_memory_entry_consults_durable_tier() {
        let store = Arc::new(MemStore::default());
        let cache = GroupMetadataCache::new(store.clone(), TTL);
        let sock = FetchCountingSocket::new(Some(group_of(&["628111111111@s.whatsapp.net"])));

        cache.get(&sock, GROUP).await.expect("first get failed");
        assert_eq!(sock.fetch_count(), 1);

        tokio::time::advance(TTL + Duration::from_secs(1)).await;

        let after_expiry = cache.get(&sock, GROUP).await.expect("get after expiry failed");
        // Served from the durable tier, not a second live fetch.
        assert_eq!(sock.fetch_count(), 1);
        assert_eq!(after_expiry.participants.len(), 1);
    }

    #[tokio::test]
    async fn test_add_existing_member_is_idempotent() {
        let store = Arc::new(MemStore::default());
        let cache = GroupMetadataCache::new(store.clone(), TTL);
        let sock = FetchCountingSocket::new(None);
        store
            .set_group_metadata(GROUP, &group_of(&["628111111111@s.whatsapp.net"]))
            .await;

        cache
            .apply_participants_update(
                &sock,
                GROUP,
                &["628111111111@s.whatsapp.net".to_string()],
                ParticipantAction::Add,
            )
            .await
            .expect("add failed");
        let metadata = store.get_group_metadata(GROUP).await.expect("group missing");
        assert_eq!(metadata.participants.len(), 1);
    }

    #[tokio::test]
    async fn test_remove_non_member_is_noop() {
        let store = Arc::new(MemStore::default());
        let cache = GroupMetadataCache::new(store.clone(), TTL);
        let sock = FetchCountingSocket::new(None);
        store
            .set_group_metadata(GROUP, &group_of(&["628111111111@s.whatsapp.net"]))
            .await;

        cache
            .apply_participants_update(
                &sock,
                GROUP,
                &["628999999999@s.whatsapp.net".to_string()],
                ParticipantAction::Remove,
            )
            .await
            .expect("remove failed");
        let metadata = store.get_group_metadata(GROUP).await.expect("group missing");
        assert_eq!(metadata.participants.len(), 1);
    }

    #[tokio::test]
    async fn test_promote_then_demote_round_trips_role() {
        let store = Arc::new(MemStore::default());
        let cache = GroupMetadataCache::new(store.clone(), TTL);
        let sock = FetchCountingSocket::new(None);
        let member = "628111111111@s.whatsapp.net";
        store.set_group_metadata(GROUP, &group_of(&[member])).await;

        cache
            .apply_participants_update(
                &sock,
                GROUP,
                &[member.to_string()],
                ParticipantAction::Promote,
            )
            .await
            .expect("promote failed");
        let promoted = store.get_group_metadata(GROUP).await.expect("group missing");
        assert_eq!(promoted.participants[0].admin, Some(AdminRole::Admin));

        cache
            .apply_participants_update(
                &sock,
                GROUP,
                &[member.to_string()],
                ParticipantAction::Demote,
            )
            .await
            .expect("demote failed");
        let demoted = store.get_group_metadata(GROUP).await.expect("group missing");
        assert_eq!(demoted.participants[0].admin, None);
    }

    #[tokio::test]
    async fn test_remove_updates_both_tiers() {
        let store = Arc::new(MemStore::default());
        let cache = GroupMetadataCache::new(store.clone(), TTL);
        let sock = FetchCountingSocket::new(None);
        let removed = "628333333333@s.whatsapp.net";
        store
            .set_group_metadata(
                GROUP,
                &group_of(&[
                    "628111111111@s.whatsapp.net",
                    "628222222222@s.whatsapp.net",
                    removed,
                ]),
            )
            .await;

        cache
            .apply_participants_update(
                &sock,
                GROUP,
                &[removed.to_string()],
                ParticipantAction::Remove,
            )
            .await
            .expect("remove failed");

        let durable = store.get_group_metadata(GROUP).await.expect("group missing");
        let memory = cache.memory_get(GROUP).await.expect("memory tier missing");
        for tier in [durable, memory] {
            assert_eq!(tier.participants.len(), 2);
            assert!(tier.participants.iter().all(|p| p.id != removed));
        }
    }

    #[tokio::test]
    async fn test_unavailable_metadata_drops_event_without_mutation() {
        let store = Arc::new(MemStore::default());
        let cache = GroupMetadataCache::new(store.clone(), TTL);
        let sock = FetchCountingSocket::new(None);

        let result = cache
            .apply_participants_update(
                &sock,
                GROUP,
                &["628111111111@s.whatsapp.net".to_string()],
                ParticipantAction::Add,
            )
            .await;
        assert!(matches!(result, Err(CacheError::MetadataUnavailable(_))));
        assert!(store.get_group_metadata(GROUP).await.is_none());
    }

    #[tokio::test]
    async fn test_group_patch_updates_subject_in_both_tiers() {
        let store = Arc::new(MemStore::default());
        let cache = GroupMetadataCache::new(store.clone(), TTL);
        store
            .set_group_metadata(GROUP, &group_of(&["628111111111@s.whatsapp.net"]))
            .await;

        cache
            .apply_group_patch(&GroupPatch {
                id: GROUP.to_string(),
                subject: Some("renamed".to_string()),
            })
            .await;

        let durable = store.get_group_metadata(GROUP).await.expect("group missing");
        assert_eq!(durable.subject, "renamed");
        let memory = cache.memory_get(GROUP).await.expect("memory tier missing");
        assert_eq!(memory.subject, "renamed");
    }
}
