//! Session connection state machine and event dispatch.
//!
//! One [`SessionManager`] owns one session: its credential state, the
//! active socket (exactly one at any time) and the event dispatch loop.
//! Independent sessions are independent managers with no shared state.
//!
//! # States
//!
//! ```text
//! Init -- run() --> Connecting --> { Open | Pairing | QrWait }
//! Open/Pairing/QrWait -- close (recoverable reason) --> ClosedRecoverable
//! ClosedRecoverable -- fixed delay --> Connecting
//! any -- close (logged out) --> ClosedTerminal (credentials erased)
//! ```
//!
//! Reconnection uses a fixed delay with an unbounded retry count. The
//! pairing-code request fires once per linking attempt, after a fixed
//! delay, with the trimmed configured phone number; its failure is logged
//! and non-fatal. Errors raised while handling one event are caught and
//! logged at the event boundary and never prevent delivery of subsequent
//! events.

use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::auth::{self, AuthState};
use crate::config::Config;
use crate::error::{ConfigError, SessionError};
use crate::jid;
use crate::metadata::GroupMetadataCache;
use crate::normalize::MessageNormalizer;
use crate::plugins::PluginHost;
use crate::socket::{
    ConnectionState, DisconnectReason, MessageUpdate, Socket, SocketEvent, SocketFactory,
    SocketOptions,
};
use crate::store::Store;

pub const RECONNECT_DELAY: Duration = Duration::from_secs(3);
pub const PAIRING_CODE_DELAY: Duration = Duration::from_secs(6);
pub const STORE_SAVE_INTERVAL: Duration = Duration::from_secs(30);
pub const QR_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Init,
    Connecting,
    Open,
    /// Waiting for the user to enter a pairing code.
    Pairing,
    /// Waiting for the user to scan a rotated linking code.
    QrWait,
    ClosedRecoverable,
    ClosedTerminal,
}

impl Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match self {
            SessionState::Init => "Init",
            SessionState::Connecting => "Connecting",
            SessionState::Open => "Open",
            SessionState::Pairing => "Pairing",
            SessionState::QrWait => "QrWait",
            SessionState::ClosedRecoverable => "ClosedRecoverable",
            SessionState::ClosedTerminal => "ClosedTerminal",
        };
        write!(f, "{state}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CloseDisposition {
    Recoverable,
    Terminal,
}

pub struct SessionManager<F> {
    session_name: String,
    config: Config,
    factory: F,
    store: Arc<dyn Store>,
    cache: Arc<GroupMetadataCache>,
    normalizer: MessageNormalizer,
    plugins: Arc<dyn PluginHost>,
    state: SessionState,
    auth: Option<AuthState>,
    use_pairing: bool,
    pairing_requested: bool,
    erased: bool,
    attempts: u64,
}

impl<F: SocketFactory> SessionManager<F> {
    /// Wire up one session. The metadata cache is constructed here, one
    /// instance per session, and handed to the normalizer explicitly.
    pub fn new(
        config: Config,
        factory: F,
        store: Arc<dyn Store>,
        plugins: Arc<dyn PluginHost>,
    ) -> Self {
        let cache = Arc::new(GroupMetadataCache::new(
            store.clone(),
            config.group_metadata_ttl,
        ));
        let normalizer = MessageNormalizer::new(store.clone(), cache.clone());
        SessionManager {
            session_name: config.session_name.clone(),
            config,
            factory,
            store,
            cache,
            normalizer,
            plugins,
            state: SessionState::Init,
            auth: None,
            use_pairing: false,
            pairing_requested: false,
            erased: false,
            attempts: 0,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn cache(&self) -> &Arc<GroupMetadataCache> {
        &self.cache
    }

    fn set_state(&mut self, next: SessionState) {
        if self.state != next {
            info!("[set_state]: session {}: {} -> {}", self.session_name, self.state, next);
            self.state = next;
        }
    }

    /// Run the session until a terminal disconnect.
    ///
    /// Fatal configuration errors (missing connection string, missing phone
    /// number on the pairing path) surface here before any socket exists.
    pub async fn run(&mut self) -> Result<(), SessionError> {
        info!("[run]: starting session: {}", self.session_name);

        self.store.load().await?;
        let save_token = self.start_periodic_save();

        let result = self.run_connected().await;

        save_token.cancel();
        if let Err(e) = self.store.flush().await {
            error!("[run]: final store flush failed: {e}");
        }
        info!("[run]: session {} terminated", self.session_name);
        result
    }

    async fn run_connected(&mut self) -> Result<(), SessionError> {
        let auth = auth::auth_state(&self.config).await?;
        if !auth.creds.registered {
            self.use_pairing = !self.config.qr_mode;
            if self.use_pairing && self.config.bot_number.is_none() {
                return Err(ConfigError::MissingBotNumber.into());
            }
        }
        self.auth = Some(auth);

        let version = self.factory.latest_version().await?;
        info!(
            "[run_connected]: protocol version: {}",
            version.map(|v| v.to_string()).join(".")
        );

        match self.plugins.load_plugins().await {
            Ok(count) => info!("[run_connected]: loaded {count} plugin(s)"),
            Err(e) => error!("[run_connected]: failed to load plugins: {e}"),
        }
        self.plugins.watch_plugins();

        loop {
            self.set_state(SessionState::Connecting);
            self.attempts += 1;
            self.pairing_requested = false;

            let creds = self.auth.as_ref().unwrap().creds.clone();
            let options = SocketOptions {
                version,
                qr_timeout: (!self.use_pairing).then_some(QR_TIMEOUT),
                print_qr: self.config.qr_mode,
            };
            let sock = match self.factory.connect(&creds, &options).await {
                Ok(sock) => sock,
                Err(e) => {
                    error!(
                        "[run_connected]: failed to construct socket (attempt {}): {e}",
                        self.attempts
                    );
                    self.set_state(SessionState::ClosedRecoverable);
                    tokio::time::sleep(RECONNECT_DELAY).await;
                    continue;
                }
            };
            self.plugins.schedule_periodic_tasks(sock.clone());

            match self.dispatch(sock).await {
                CloseDisposition::Recoverable => {
                    self.set_state(SessionState::ClosedRecoverable);
                    warn!(
                        "[run_connected]: session {} reconnecting in {:?}",
                        self.session_name, RECONNECT_DELAY
                    );
                    tokio::time::sleep(RECONNECT_DELAY).await;
                }
                CloseDisposition::Terminal => break,
            }
        }

        self.set_state(SessionState::ClosedTerminal);
        Ok(())
    }

    /// Background task persisting the store on a fixed interval. Cancelled
    /// only on terminal teardown.
    fn start_periodic_save(&self) -> CancellationToken {
        let token = CancellationToken::new();
        let store = self.store.clone();
        let task_token = token.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = task_token.cancelled() => break,
                    _ = tokio::time::sleep(STORE_SAVE_INTERVAL) => {
                        if let Err(e) = store.flush().await {
                            error!("[start_periodic_save]: store flush failed: {e}");
                        }
                    }
                }
            }
        });
        token
    }

    /// Consume the event stream of one connection until it closes.
    async fn dispatch(&mut self, sock: Arc<dyn Socket>) -> CloseDisposition {
        let mut events = sock.subscribe();
        loop {
            let event = match events.recv().await {
                Ok(event) => event,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("[dispatch]: event stream lagged, {skipped} event(s) skipped");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => {
                    warn!("[dispatch]: event stream ended without a close event");
                    return CloseDisposition::Recoverable;
                }
            };
            match self.handle_event(&sock, event).await {
                Ok(Some(disposition)) => return disposition,
                Ok(None) => {}
                // One event failing must never prevent delivery of the next.
                Err(e) => error!("[dispatch]: error while handling event: {e}"),
            }
        }
    }

    async fn handle_event(
        &mut self,
        sock: &Arc<dyn Socket>,
        event: SocketEvent,
    ) -> Result<Option<CloseDisposition>, SessionError> {
        match event {
            SocketEvent::CredsUpdate(creds) => {
                if let Some(auth) = &mut self.auth {
                    auth.creds = creds.clone();
                    auth.store.persist(&creds).await?;
                    debug!("[handle_event]: credentials persisted");
                }
            }
            SocketEvent::ConnectionUpdate { state, reason, qr } => {
                return self.handle_connection_update(sock, state, reason, qr).await;
            }
            SocketEvent::MessagesUpsert(raw_messages) => {
                let mut batch = Vec::with_capacity(raw_messages.len());
                for raw in &raw_messages {
                    self.store.save_message(&raw.key.remote_jid, raw).await;
                    if let Some(message) = self.normalizer.normalize(sock.as_ref(), raw).await {
                        batch.push(message);
                    }
                }
                if !batch.is_empty() {
                    self.plugins.process(sock.clone(), batch).await;
                }
            }
            SocketEvent::MessagesUpdate(updates) => {
                self.handle_messages_update(&updates).await;
            }
            SocketEvent::GroupsUpdate(patches) => {
                for patch in &patches {
                    self.cache.apply_group_patch(patch).await;
                }
            }
            SocketEvent::GroupParticipantsUpdate {
                jid,
                participants,
                action,
            } => {
                // A metadata miss drops this event without partial mutation.
                self.cache
                    .apply_participants_update(sock.as_ref(), &jid, &participants, action)
                    .await?;
            }
            SocketEvent::ContactsUpdate(patches) => {
                self.store.update_contacts(&patches).await;
            }
            SocketEvent::ContactsUpsert(contacts) => {
                self.store.upsert_contacts(&contacts).await;
            }
        }
        Ok(None)
    }

    async fn handle_connection_update(
        &mut self,
        sock: &Arc<dyn Socket>,
        state: Option<ConnectionState>,
        reason: Option<DisconnectReason>,
        qr: Option<String>,
    ) -> Result<Option<CloseDisposition>, SessionError> {
        if let Some(code) = qr {
            if self.config.qr_mode {
                self.set_state(SessionState::QrWait);
                info!(
                    "[handle_connection_update]: scan the linking code for session {}:",
                    self.session_name
                );
                info!("{code}");
            }
        }

        match state {
            Some(ConnectionState::Connecting) => {
                let registered = self.auth.as_ref().map(|a| a.creds.registered).unwrap_or(false);
                if self.use_pairing && !registered && !self.pairing_requested {
                    self.pairing_requested = true;
                    self.set_state(SessionState::Pairing);
                    self.spawn_pairing_request(sock.clone());
                }
            }
            Some(ConnectionState::Open) => {
                self.attempts = 0;
                self.set_state(SessionState::Open);
                info!(
                    "[handle_connection_update]: connection opened successfully for session {}",
                    self.session_name
                );
            }
            Some(ConnectionState::Close) => {
                let reason = reason.unwrap_or(DisconnectReason::Unknown);
                let recoverable = reason.is_recoverable();
                warn!(
                    "[handle_connection_update]: connection closed for session {} (reason: {reason}, reconnecting: {recoverable})",
                    self.session_name
                );
                if !recoverable {
                    self.erase_credentials().await;
                    return Ok(Some(CloseDisposition::Terminal));
                }
                return Ok(Some(CloseDisposition::Recoverable));
            }
            None => {}
        }
        Ok(None)
    }

    /// Request a pairing code after the fixed delay. Failure is logged and
    /// the session stays in `Pairing`; the user can restart the flow.
    fn spawn_pairing_request(&self, sock: Arc<dyn Socket>) {
        let Some(phone) = self.config.bot_number.clone() else {
            return;
        };
        let session_name = self.session_name.clone();
        tokio::spawn(async move {
            tokio::time::sleep(PAIRING_CODE_DELAY).await;
            match sock.request_pairing_code(phone.trim()).await {
                Ok(code) => {
                    info!("[spawn_pairing_request]: pairing code for session {session_name}: {code}");
                    info!("[spawn_pairing_request]: enter the code on your phone under linked devices");
                }
                Err(e) => {
                    error!("[spawn_pairing_request]: failed to request pairing code: {e}");
                }
            }
        });
    }

    /// Erase persisted credentials, exactly once, on a terminal logout.
    async fn erase_credentials(&mut self) {
        if self.erased {
            return;
        }
        self.erased = true;
        let Some(auth) = &self.auth else { return };
        match auth.store.erase().await {
            Ok(()) => info!(
                "[erase_credentials]: session {} logged out, credentials removed; restart to relink",
                self.session_name
            ),
            Err(e) => error!("[erase_credentials]: failed to erase credentials: {e}"),
        }
    }

    /// Poll-update aggregation for message-updated events: re-load the poll
    /// creation envelope from the store and log the aggregate.
    async fn handle_messages_update(&self, updates: &[MessageUpdate]) {
        for update in updates {
            if update.poll_updates.is_empty() {
                continue;
            }
            let chat = jid::normalize(&update.key.remote_jid);
            match self.store.load_message(&chat, &update.key.id).await {
                Some(creation) if creation.message.is_some() => {
                    let votes: usize = update.poll_updates.iter().map(|p| p.votes.len()).sum();
                    info!(
                        "[handle_messages_update]: poll {} aggregated {votes} vote(s)",
                        update.key.id
                    );
                }
                _ => debug!(
                    "[handle_messages_update]: poll creation {} not found in store",
                    update.key.id
                ),
            }
        }
    }
}
