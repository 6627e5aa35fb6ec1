//! Message normalization pipeline.
//!
//! Converts one raw envelope into a [`NormalizedMessage`] before any
//! business logic runs: content unwrapping, chat/sender identity
//! resolution (including privacy-identifier mapping through group
//! metadata), device-origin classification, edited-message canonicalization,
//! body extraction and quote-chain resolution.
//!
//! Normalization is total: it never fails on missing or malformed optional
//! fields. Every derived field has a safe default (empty string, `false`,
//! `None`); the only envelopes that produce no output at all are system
//! envelopes with no user-visible content.

use std::collections::HashMap;
use std::fmt::Display;
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use log::debug;

use crate::error::SocketError;
use crate::jid;
use crate::metadata::{GroupMetadataCache, Participant};
use crate::socket::{ContactPatch, Socket};
use crate::store::Store;
use crate::wire::{self, MessageContent, MessageKey, WebMessageInfo};

/// Device family a message id was minted on, derived from fixed id
/// prefix/length heuristics. Unrecognized shapes classify as `Unknown`,
/// never as an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceOrigin {
    Ios,
    Web,
    Android,
    Desktop,
    Unknown,
}

impl Display for DeviceOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let origin = match self {
            DeviceOrigin::Ios => "ios",
            DeviceOrigin::Web => "web",
            DeviceOrigin::Android => "android",
            DeviceOrigin::Desktop => "desktop",
            DeviceOrigin::Unknown => "unknown",
        };
        write!(f, "{origin}")
    }
}

pub fn classify_device(id: &str) -> DeviceOrigin {
    if id.starts_with("3A") {
        DeviceOrigin::Ios
    } else if id.starts_with("3EB") {
        DeviceOrigin::Web
    } else if id.len() >= 21 {
        DeviceOrigin::Android
    } else if id.len() >= 18 {
        DeviceOrigin::Desktop
    } else {
        DeviceOrigin::Unknown
    }
}

/// Ids minted by bot clients follow two fixed prefix/length shapes.
pub fn is_bot_id(id: &str) -> bool {
    (id.starts_with("BAE5") && id.len() == 16) || (id.starts_with("B24E") && id.len() == 20)
}

/// Lid -> phone-jid lookup built from participants that carry both forms.
pub fn build_lid_map(participants: &[Participant]) -> HashMap<String, String> {
    let mut map = HashMap::new();
    for p in participants {
        if jid::is_lid(&p.id) {
            if let Some(phone_jid) = &p.jid {
                map.insert(p.id.clone(), phone_jid.clone());
            }
        }
    }
    map
}

/// Resolve a privacy identifier to a phone-number-based jid: lookup map
/// first, then a participant scan, then the raw identifier as a last
/// resort. Non-lid input is just normalized.
pub fn resolve_lid(
    raw_jid: &str,
    participants: &[Participant],
    lid_map: &HashMap<String, String>,
) -> String {
    if raw_jid.is_empty() {
        return String::new();
    }
    if !jid::is_lid(raw_jid) {
        return jid::normalize(raw_jid);
    }
    if let Some(phone_jid) = lid_map.get(raw_jid) {
        return jid::normalize(phone_jid);
    }
    if let Some(p) = participants
        .iter()
        .find(|p| p.id == raw_jid || p.lid.as_deref() == Some(raw_jid))
    {
        let resolved = jid::normalize(p.jid.as_deref().unwrap_or(&p.id));
        if !resolved.is_empty() {
            return resolved;
        }
    }
    raw_jid.to_string()
}

/// Canonical, fully-resolved message record.
#[derive(Debug, Clone)]
pub struct NormalizedMessage {
    pub id: String,
    pub chat: String,
    pub sender: String,
    /// Resolved group sender; empty outside groups.
    pub participant: String,
    /// Normalized participant before privacy-identifier resolution.
    pub participant_lid: String,
    pub from_me: bool,
    pub is_group: bool,
    pub device: DeviceOrigin,
    pub is_bot: bool,
    pub kind: &'static str,
    pub body: String,
    pub mentions: Vec<String>,
    pub push_name: String,
    pub expiration: u64,
    pub is_media: bool,
    pub is_admin: bool,
    pub is_bot_admin: bool,
    pub quoted: Option<Box<QuotedMessage>>,
    pub timestamp: DateTime<Utc>,
}

/// The referenced prior message of a reply, normalized with the same
/// pipeline, plus the original key for on-demand re-fetch.
#[derive(Debug, Clone)]
pub struct QuotedMessage {
    pub key: MessageKey,
    pub chat: String,
    pub sender: String,
    pub from_me: bool,
    pub is_group: bool,
    pub device: DeviceOrigin,
    pub is_bot: bool,
    pub kind: &'static str,
    pub body: String,
    pub mentions: Vec<String>,
    pub is_media: bool,
    /// Unwrapped snapshot of the quoted content as embedded in the reply.
    pub content: MessageContent,
}

impl QuotedMessage {
    /// Re-fetch the full original envelope by id from the store, falling
    /// back to a reconstruction from the embedded snapshot.
    pub async fn fetch_original(&self, store: &dyn Store) -> Option<WebMessageInfo> {
        if self.key.id.is_empty() {
            return None;
        }
        if let Some(found) = store.load_message(&self.key.remote_jid, &self.key.id).await {
            return Some(found);
        }
        Some(WebMessageInfo {
            key: self.key.clone(),
            message: Some(self.content.clone()),
            message_timestamp: None,
            push_name: None,
            participant: self.is_group.then(|| self.sender.clone()),
        })
    }

    /// Download the media payload of the quoted message; delegated to the
    /// socket layer.
    pub async fn download_media(&self, sock: &dyn Socket) -> Result<Vec<u8>, SocketError> {
        sock.download_media(&self.key).await
    }
}

struct EditMarker {
    key: Option<MessageKey>,
    replacement: MessageContent,
}

/// Edit marker buried in an `editedMessage` wrapper, if any.
fn edited_marker(content: &MessageContent) -> Option<EditMarker> {
    let proto = content
        .edited_message
        .as_ref()?
        .message
        .as_ref()?
        .protocol_message
        .as_ref()?;
    let replacement = proto.edited_message.as_deref()?.clone();
    Some(EditMarker {
        key: proto.key.clone(),
        replacement,
    })
}

pub struct MessageNormalizer {
    store: Arc<dyn Store>,
    cache: Arc<GroupMetadataCache>,
}

impl MessageNormalizer {
    pub fn new(store: Arc<dyn Store>, cache: Arc<GroupMetadataCache>) -> Self {
        MessageNormalizer { store, cache }
    }

    /// Normalize one raw envelope. Returns `None` for envelopes with no
    /// user-visible content (missing content, protocol acks and other
    /// system markers).
    pub async fn normalize(
        &self,
        sock: &dyn Socket,
        raw: &WebMessageInfo,
    ) -> Option<NormalizedMessage> {
        let message = raw.message.clone()?;
        let mut content = wire::unwrap_content(message);

        let key = &raw.key;
        // Broadcast/status sentinels carry the real chat identity in the
        // participant field.
        let chat = if jid::is_status(&key.remote_jid) {
            jid::normalize(
                key.participant
                    .as_deref()
                    .or(raw.participant.as_deref())
                    .unwrap_or_default(),
            )
        } else {
            jid::normalize(&key.remote_jid)
        };
        let id = key.id.clone();
        let from_me = key.from_me;
        let device = classify_device(&id);
        let is_bot = is_bot_id(&id);
        let is_group = jid::is_group(&chat);

        let bot_jid = sock
            .user_jid()
            .map(|j| jid::normalize(&j))
            .unwrap_or_default();

        let metadata = if is_group {
            self.cache.get(sock, &chat).await
        } else {
            None
        };
        let lid_map = metadata
            .as_ref()
            .map(|m| build_lid_map(&m.participants))
            .unwrap_or_default();

        let raw_participant = raw
            .participant
            .clone()
            .or_else(|| key.participant.clone())
            .unwrap_or_default();
        let participant_lid = jid::normalize(&raw_participant);
        let participant = match &metadata {
            Some(m) if is_group => resolve_lid(&participant_lid, &m.participants, &lid_map),
            _ => participant_lid.clone(),
        };

        let sender = if from_me {
            bot_jid.clone()
        } else if is_group && !participant.is_empty() {
            participant.clone()
        } else {
            chat.clone()
        };

        let (is_admin, is_bot_admin) = match &metadata {
            Some(m) => {
                let admins: Vec<&Participant> =
                    m.participants.iter().filter(|p| p.is_admin()).collect();
                (
                    admins
                        .iter()
                        .any(|a| jid::same_user_digits(&a.id, &sender)),
                    admins.iter().any(|a| {
                        jid::same_user_digits(a.jid.as_deref().unwrap_or(&a.id), &bot_jid)
                    }),
                )
            }
            None => (false, false),
        };

        let push_name = raw.push_name.clone().unwrap_or_default();
        if !push_name.is_empty() && !sender.is_empty() {
            let known_notify = self
                .store
                .get_contact(&sender)
                .await
                .and_then(|c| c.notify);
            if known_notify.as_deref() != Some(push_name.as_str()) {
                self.store
                    .update_contacts(&[ContactPatch {
                        id: sender.clone(),
                        name: None,
                        notify: Some(push_name.clone()),
                    }])
                    .await;
            }
        }

        // An edit envelope is never shown as the body: re-fetch the
        // canonical current content for the original id and re-run
        // classification on that.
        if let Some(edit) = edited_marker(&content) {
            let canonical = match &edit.key {
                Some(k) if !k.id.is_empty() => self
                    .store
                    .load_message(&chat, &k.id)
                    .await
                    .and_then(|m| m.message),
                _ => None,
            };
            content = wire::unwrap_content(canonical.unwrap_or(edit.replacement));
            debug!("[normalize]: resolved edited content for message {id}");
        }

        let kind = content.kind();
        if kind == "protocolMessage" {
            // Pure system marker (revoke, key distribution, ...): nothing
            // user-visible survives unwrapping.
            return None;
        }

        let quoted = build_quoted(
            &content,
            &chat,
            is_group,
            metadata.as_ref().map(|m| m.participants.as_slice()),
            &lid_map,
            &bot_jid,
        );

        let timestamp = raw
            .message_timestamp
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
            .unwrap_or_else(Utc::now);

        Some(NormalizedMessage {
            id,
            chat,
            sender,
            participant,
            participant_lid,
            from_me,
            is_group,
            device,
            is_bot,
            kind,
            body: content.body(),
            mentions: content.mentions(),
            push_name,
            expiration: content
                .context_info()
                .and_then(|c| c.expiration)
                .unwrap_or(0),
            is_media: content.is_media(),
            is_admin,
            is_bot_admin,
            quoted,
            timestamp,
        })
    }
}

/// Apply the normalization steps to an embedded quote context, if present.
fn build_quoted(
    content: &MessageContent,
    chat: &str,
    is_group: bool,
    participants: Option<&[Participant]>,
    lid_map: &HashMap<String, String>,
    bot_jid: &str,
) -> Option<Box<QuotedMessage>> {
    let ctx = content.context_info()?;
    let embedded = ctx.quoted_message.as_deref()?;
    let quoted_content = wire::unwrap_content(embedded.clone());

    let quoted_participant = jid::normalize(ctx.participant.as_deref().unwrap_or_default());
    let remote = ctx.remote_jid.clone().unwrap_or_default();
    let id = ctx.stanza_id.clone().unwrap_or_default();
    let from_me = !quoted_participant.is_empty() && quoted_participant == bot_jid;

    let key = MessageKey {
        remote_jid: if remote.is_empty() {
            chat.to_string()
        } else {
            remote.clone()
        },
        from_me,
        id: id.clone(),
        participant: (!quoted_participant.is_empty()).then(|| quoted_participant.clone()),
    };

    let quoted_chat = if jid::is_group(&remote) || jid::is_status(&remote) {
        quoted_participant.clone()
    } else {
        jid::normalize(&key.remote_jid)
    };

    let base_sender = if quoted_participant.is_empty() {
        quoted_chat.clone()
    } else {
        quoted_participant.clone()
    };
    let sender = match participants {
        Some(participants) if is_group => resolve_lid(&base_sender, participants, lid_map),
        _ => base_sender,
    };

    Some(Box::new(QuotedMessage {
        from_me: key.from_me,
        is_group: jid::is_group(&quoted_chat),
        device: classify_device(&id),
        is_bot: is_bot_id(&id),
        kind: quoted_content.kind(),
        body: quoted_content.body(),
        mentions: quoted_content.mentions(),
        is_media: quoted_content.is_media(),
        chat: quoted_chat,
        sender,
        key,
        content: quoted_content,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::AdminRole;

    #[test]
    fn test_device_classification_table() {
        assert_eq!(classify_device("3A0B1C2D3E4F"), DeviceOrigin::Ios);
        assert_eq!(classify_device("3EB0F4A1B2C3"), DeviceOrigin::Web);
        // 21 characters, no recognized prefix.
        assert_eq!(
            classify_device("ABCDEF012345678901234"),
            DeviceOrigin::Android
        );
        // 18 characters, no recognized prefix.
        assert_eq!(classify_device("ABCDEF012345678901"), DeviceOrigin::Desktop);
        assert_eq!(classify_device("SHORTID"), DeviceOrigin::Unknown);
        assert_eq!(classify_device(""), DeviceOrigin::Unknown);
    }

    #[test]
    fn test_bot_id_shapes() {
        assert!(is_bot_id("BAE5ABCDEF012345"));
        assert!(is_bot_id("B24EABCDEF0123456789"));
        assert!(!is_bot_id("BAE5ABCDEF01234567"));
        assert!(!is_bot_id("3EB0F4A1B2C3"));
    }

    fn lid_participant(lid: &str, phone: &str) -> Participant {
        Participant {
            id: lid.to_string(),
            jid: Some(phone.to_string()),
            lid: Some(lid.to_string()),
            admin: None,
        }
    }

    #[test]
    fn test_resolve_lid_through_map() {
        let participants = vec![lid_participant("9137842@lid", "628111111111@s.whatsapp.net")];
        let lid_map = build_lid_map(&participants);
        assert_eq!(
            resolve_lid("9137842@lid", &participants, &lid_map),
            "628111111111@s.whatsapp.net"
        );
    }

    #[test]
    fn test_resolve_lid_through_participant_scan() {
        let mut participants = vec![lid_participant("9137842@lid", "628111111111@s.whatsapp.net")];
        // Not in the map (no lid key match) but findable by scan.
        participants[0].id = "other@s.whatsapp.net".to_string();
        assert_eq!(
            resolve_lid("9137842@lid", &participants, &HashMap::new()),
            "628111111111@s.whatsapp.net"
        );
    }

    #[test]
    fn test_resolve_lid_falls_back_to_raw() {
        assert_eq!(
            resolve_lid("9137842@lid", &[], &HashMap::new()),
            "9137842@lid"
        );
    }

    #[test]
    fn test_resolve_non_lid_is_normalized() {
        assert_eq!(
            resolve_lid("628111111111:2@s.whatsapp.net", &[], &HashMap::new()),
            "628111111111@s.whatsapp.net"
        );
    }

    #[test]
    fn test_build_lid_map_requires_both_forms() {
        let participants = vec![
            lid_participant("9137842@lid", "628111111111@s.whatsapp.net"),
            Participant {
                id: "555@lid".to_string(),
                jid: None,
                lid: None,
                admin: Some(AdminRole::Admin),
            },
            Participant::new("628222222222@s.whatsapp.net"),
        ];
        let map = build_lid_map(&participants);
        assert_eq!(map.len(), 1);
        assert!(map.contains_key("9137842@lid"));
    }
}
