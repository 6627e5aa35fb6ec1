//! Session core for a multi-device messaging protocol client.
//!
//! The crate owns the orchestration layer on top of an external protocol
//! implementation: credential-backend selection, the socket connection
//! lifecycle (linking, reconnection, teardown), a consistent view of group
//! membership under a volatile event stream, and normalization of raw
//! envelopes into canonical message records before any business logic runs.
//!
//! The protocol/encryption itself, the durable storage engine and the
//! command dispatcher are collaborators behind the [`socket::Socket`],
//! [`store::Store`] and [`plugins::PluginHost`] traits.

pub mod auth;
pub mod config;
pub mod error;
pub mod jid;
pub mod metadata;
pub mod normalize;
pub mod plugins;
pub mod session;
pub mod socket;
pub mod store;
pub mod wire;

pub use config::Config;
pub use error::{AuthError, CacheError, ConfigError, SessionError, SocketError, StoreError};
pub use metadata::{AdminRole, GroupMetadata, GroupMetadataCache, Participant};
pub use normalize::{DeviceOrigin, MessageNormalizer, NormalizedMessage, QuotedMessage};
pub use session::{SessionManager, SessionState};
pub use socket::{Socket, SocketEvent, SocketFactory};
pub use store::{FileStore, Store};
