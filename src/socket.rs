//! Socket-layer collaborator contract.
//!
//! The protocol/encryption implementation lives outside this crate; the
//! session only sees it through [`Socket`] / [`SocketFactory`] and the
//! ordered [`SocketEvent`] stream. Events are a single tagged union consumed
//! by one dispatch loop, so handling stays exhaustive by construction.

use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::auth::Credentials;
use crate::error::SocketError;
use crate::metadata::GroupMetadata;
use crate::wire::{MessageKey, WebMessageInfo};

/// Connection-state leg of a connection update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Close,
}

/// Status code attached to a disconnect. Logged-out is the only terminal
/// reason; everything else warrants a retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    BadSession,
    ConnectionClosed,
    ConnectionLost,
    ConnectionReplaced,
    Forbidden,
    LoggedOut,
    MultideviceMismatch,
    RestartRequired,
    UnavailableService,
    Unknown,
}

impl DisconnectReason {
    pub fn from_code(code: u16) -> Self {
        match code {
            401 => DisconnectReason::LoggedOut,
            403 => DisconnectReason::Forbidden,
            408 => DisconnectReason::ConnectionLost,
            411 => DisconnectReason::MultideviceMismatch,
            428 => DisconnectReason::ConnectionClosed,
            440 => DisconnectReason::ConnectionReplaced,
            500 => DisconnectReason::BadSession,
            503 => DisconnectReason::UnavailableService,
            515 => DisconnectReason::RestartRequired,
            _ => DisconnectReason::Unknown,
        }
    }

    /// Reconnection is attempted only when the disconnect is not logged-out.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, DisconnectReason::LoggedOut)
    }
}

impl Display for DisconnectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let reason = match self {
            DisconnectReason::BadSession => "bad session",
            DisconnectReason::ConnectionClosed => "connection closed",
            DisconnectReason::ConnectionLost => "connection lost",
            DisconnectReason::ConnectionReplaced => "connection replaced",
            DisconnectReason::Forbidden => "forbidden",
            DisconnectReason::LoggedOut => "logged out",
            DisconnectReason::MultideviceMismatch => "multidevice mismatch",
            DisconnectReason::RestartRequired => "restart required",
            DisconnectReason::UnavailableService => "service unavailable",
            DisconnectReason::Unknown => "unknown",
        };
        write!(f, "{reason}")
    }
}

/// Membership-change verb of a participants update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParticipantAction {
    Add,
    Remove,
    Promote,
    Demote,
}

/// Partial update for a known contact.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ContactPatch {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notify: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Contact {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notify: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verified_name: Option<String>,
}

/// Partial update for group-level metadata (subject changes and the like).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GroupPatch {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PollUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub poll_update_message_key: Option<MessageKey>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub votes: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MessageUpdate {
    pub key: MessageKey,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub poll_updates: Vec<PollUpdate>,
}

/// Everything the socket layer can tell us, as one tagged union.
#[derive(Debug, Clone)]
pub enum SocketEvent {
    CredsUpdate(Credentials),
    ConnectionUpdate {
        state: Option<ConnectionState>,
        reason: Option<DisconnectReason>,
        qr: Option<String>,
    },
    MessagesUpsert(Vec<WebMessageInfo>),
    MessagesUpdate(Vec<MessageUpdate>),
    GroupsUpdate(Vec<GroupPatch>),
    GroupParticipantsUpdate {
        jid: String,
        participants: Vec<String>,
        action: ParticipantAction,
    },
    ContactsUpdate(Vec<ContactPatch>),
    ContactsUpsert(Vec<Contact>),
}

/// Options the session passes to the socket factory for one connection
/// attempt.
#[derive(Debug, Clone)]
pub struct SocketOptions {
    pub version: [u32; 3],
    /// QR rotation timeout; `None` on the pairing-code path.
    pub qr_timeout: Option<Duration>,
    pub print_qr: bool,
}

/// One live connection. Exactly one exists per session at any time.
#[async_trait]
pub trait Socket: Send + Sync {
    /// Subscribe to the ordered event stream of this connection.
    fn subscribe(&self) -> broadcast::Receiver<SocketEvent>;

    /// Own (bot) jid, known once the connection is registered.
    fn user_jid(&self) -> Option<String>;

    /// Live-fetch group metadata from the protocol.
    async fn group_metadata(&self, jid: &str) -> Result<GroupMetadata, SocketError>;

    async fn send_text(&self, jid: &str, body: &str) -> Result<(), SocketError>;

    /// Request an out-of-band pairing code for the given phone number.
    async fn request_pairing_code(&self, phone: &str) -> Result<String, SocketError>;

    /// Download the media payload referenced by a message key.
    async fn download_media(&self, key: &MessageKey) -> Result<Vec<u8>, SocketError>;
}

/// Constructs one [`Socket`] per connection attempt.
#[async_trait]
pub trait SocketFactory: Send + Sync {
    /// Resolve the protocol version to connect with.
    async fn latest_version(&self) -> Result<[u32; 3], SocketError>;

    async fn connect(
        &self,
        creds: &Credentials,
        options: &SocketOptions,
    ) -> Result<Arc<dyn Socket>, SocketError>;
}

#[async_trait]
impl<T: SocketFactory + ?Sized> SocketFactory for Arc<T> {
    async fn latest_version(&self) -> Result<[u32; 3], SocketError> {
        (**self).latest_version().await
    }

    async fn connect(
        &self,
        creds: &Credentials,
        options: &SocketOptions,
    ) -> Result<Arc<dyn Socket>, SocketError> {
        (**self).connect(creds, options).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disconnect_reason_codes() {
        assert_eq!(DisconnectReason::from_code(401), DisconnectReason::LoggedOut);
        assert_eq!(
            DisconnectReason::from_code(440),
            DisconnectReason::ConnectionReplaced
        );
        assert_eq!(DisconnectReason::from_code(999), DisconnectReason::Unknown);
    }

    #[test]
    fn test_only_logged_out_is_terminal() {
        assert!(!DisconnectReason::LoggedOut.is_recoverable());
        assert!(DisconnectReason::ConnectionLost.is_recoverable());
        assert!(DisconnectReason::Unknown.is_recoverable());
    }
}
