//! Plugin dispatcher collaborator.
//!
//! Command handling is out of core scope; the session only needs a seam to
//! hand normalized message batches to. [`PluginHost::process`] is the sole
//! ingress for normalized messages.

use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, info};

use crate::normalize::NormalizedMessage;
use crate::socket::Socket;

#[async_trait]
pub trait PluginHost: Send + Sync {
    /// Load (or reload) the plugin set. Returns how many were loaded.
    async fn load_plugins(&self) -> anyhow::Result<usize>;

    /// Start watching plugin sources for hot reload.
    fn watch_plugins(&self);

    /// (Re)schedule periodic plugin tasks against the currently open socket.
    fn schedule_periodic_tasks(&self, sock: Arc<dyn Socket>);

    /// Dispatch one batch of normalized messages.
    async fn process(&self, sock: Arc<dyn Socket>, batch: Vec<NormalizedMessage>);
}

/// Host that only logs what it would dispatch. Useful as a default and in
/// embedders that bring their own command layer later.
pub struct LogPluginHost;

#[async_trait]
impl PluginHost for LogPluginHost {
    async fn load_plugins(&self) -> anyhow::Result<usize> {
        Ok(0)
    }

    fn watch_plugins(&self) {}

    fn schedule_periodic_tasks(&self, _sock: Arc<dyn Socket>) {
        debug!("[schedule_periodic_tasks]: no periodic tasks registered");
    }

    async fn process(&self, _sock: Arc<dyn Socket>, batch: Vec<NormalizedMessage>) {
        for message in &batch {
            info!(
                "[process]: {} from {} in {}: {}",
                message.kind, message.sender, message.chat, message.body
            );
        }
    }
}
