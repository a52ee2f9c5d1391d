use super::backoff::ReconnectBackoff;
use super::overrides::OptimisticOverrides;
use crate::config::ClientConfig;
use crate::core::{ProtectionFlags, TokenState};
use crate::realtime::{ClientMessage, ServerMessage};
use crate::transport::TokenUpdate;
use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Duration};
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use tracing::{debug, error, info, instrument, warn};
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

struct Shared {
    url: String,
    connect_timeout: Duration,
    interests: RwLock<HashSet<String>>,
    /// Populated only while a socket is open
    outbound: RwLock<Option<mpsc::UnboundedSender<Message>>>,
    state: RwLock<ConnectionState>,
    updates: broadcast::Sender<TokenUpdate>,
    overrides: Option<Arc<OptimisticOverrides<ProtectionFlags>>>,
    subscriber_id: RwLock<Option<String>>,
}

/// The single push connection a client keeps to the realtime gateway.
/// Interests survive reconnects and are replayed on every open.
pub struct LiveConnection {
    shared: Arc<Shared>,
    initial_backoff: Duration,
    max_backoff: Duration,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for LiveConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveConnection")
            .field("url", &self.shared.url)
            .finish_non_exhaustive()
    }
}

impl LiveConnection {
    pub fn new(url: impl Into<String>, config: &ClientConfig) -> Self {
        Self::build(url.into(), config, None)
    }

    /// Pushed protection flags pass through `overrides` before reaching subscribers
    pub fn with_overrides(
        url: impl Into<String>,
        config: &ClientConfig,
        overrides: Arc<OptimisticOverrides<ProtectionFlags>>,
    ) -> Self {
        Self::build(url.into(), config, Some(overrides))
    }

    fn build(url: String, config: &ClientConfig, overrides: Option<Arc<OptimisticOverrides<ProtectionFlags>>>) -> Self {
        let (updates, _) = broadcast::channel(256);
        Self {
            shared: Arc::new(Shared {
                url,
                connect_timeout: Duration::from_secs(config.connect_timeout_secs),
                interests: RwLock::new(HashSet::new()),
                outbound: RwLock::new(None),
                state: RwLock::new(ConnectionState::Disconnected),
                updates,
                overrides,
                subscriber_id: RwLock::new(None),
            }),
            initial_backoff: Duration::from_millis(config.backoff_initial_ms),
            max_backoff: Duration::from_millis(config.backoff_max_ms),
            task: Mutex::new(None),
        }
    }

    /// Spawn the connect/reconnect loop. Calling it again while running is a no-op.
    pub fn start(&self) {
        let Ok(mut task) = self.task.lock() else {
            error!("Live connection task slot poisoned");
            return;
        };
        if task.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }
        let shared = self.shared.clone();
        let backoff = ReconnectBackoff::new(self.initial_backoff, self.max_backoff);
        *task = Some(tokio::spawn(run(shared, backoff)));
    }

    /// Cancels the connection and any pending reconnect timer
    pub async fn shutdown(&self) {
        let handle = match self.task.lock() {
            Ok(mut task) => task.take(),
            Err(_) => None,
        };
        if let Some(handle) = handle {
            handle.abort();
            let _ = handle.await;
        }
        *self.shared.outbound.write().await = None;
        *self.shared.state.write().await = ConnectionState::Disconnected;
        info!(url = %self.shared.url, "Live connection shut down");
    }

    pub async fn subscribe(&self, token: &str) {
        let added = self.shared.interests.write().await.insert(token.to_string());
        if added {
            send_command(&self.shared, &ClientMessage::Subscribe { token: token.to_string() }).await;
        }
    }

    pub async fn unsubscribe(&self, token: &str) {
        let removed = self.shared.interests.write().await.remove(token);
        if removed {
            send_command(&self.shared, &ClientMessage::Unsubscribe { token: token.to_string() }).await;
        }
    }

    pub fn updates(&self) -> broadcast::Receiver<TokenUpdate> {
        self.shared.updates.subscribe()
    }

    pub async fn state(&self) -> ConnectionState {
        *self.shared.state.read().await
    }

    pub async fn interests(&self) -> Vec<String> {
        let mut tokens: Vec<String> = self.shared.interests.read().await.iter().cloned().collect();
        tokens.sort();
        tokens
    }

    /// Identifier assigned by the server on the current connection
    pub async fn subscriber_id(&self) -> Option<String> {
        self.shared.subscriber_id.read().await.clone()
    }
}

impl Drop for LiveConnection {
    fn drop(&mut self) {
        if let Ok(mut task) = self.task.lock() {
            if let Some(handle) = task.take() {
                handle.abort();
            }
        }
    }
}

/// Queue a command if connected; otherwise the replay on next open covers it
async fn send_command(shared: &Shared, command: &ClientMessage) {
    let Some(tx) = shared.outbound.read().await.clone() else {
        debug!(?command, "Not connected, command deferred to replay");
        return;
    };
    match command.to_text() {
        Ok(text) => {
            if tx.send(Message::Text(text)).is_err() {
                debug!("Connection closing, command deferred to replay");
            }
        }
        Err(e) => error!(error = %e, "Failed to encode client command"),
    }
}

async fn set_state(shared: &Shared, state: ConnectionState) {
    *shared.state.write().await = state;
}

async fn run(shared: Arc<Shared>, mut backoff: ReconnectBackoff) {
    info!(url = %shared.url, "Starting live connection loop");
    loop {
        set_state(&shared, ConnectionState::Connecting).await;

        match connect_and_handle(&shared, &mut backoff).await {
            Ok(()) => debug!("Live connection closed"),
            Err(e) => warn!(error = %e, url = %shared.url, "Live connection failed"),
        }

        *shared.outbound.write().await = None;
        *shared.subscriber_id.write().await = None;
        set_state(&shared, ConnectionState::Reconnecting).await;

        let delay = backoff.next_delay();
        info!(delay_ms = delay.as_millis() as u64, "Reconnecting after backoff");
        sleep(delay).await;
    }
}

#[instrument(skip(shared, backoff), fields(url = %shared.url))]
async fn connect_and_handle(shared: &Shared, backoff: &mut ReconnectBackoff) -> Result<()> {
    let url = Url::parse(&shared.url).context("Failed to parse websocket URL")?;
    let (ws_stream, _) = timeout(shared.connect_timeout, connect_async(url))
        .await
        .context("Connection timeout")?
        .context("Failed to connect to websocket")?;

    info!("🔗 Live connection open");
    backoff.reset();
    set_state(shared, ConnectionState::Connected).await;

    let (mut ws_sender, mut ws_receiver) = ws_stream.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

    // Replay before publishing the sender so a concurrent subscribe is not sent twice
    {
        let mut outbound = shared.outbound.write().await;
        let interests = shared.interests.read().await;
        for token in interests.iter() {
            let text = ClientMessage::Subscribe { token: token.clone() }.to_text()?;
            tx.send(Message::Text(text))?;
        }
        debug!(count = interests.len(), "Replayed subscriptions");
        *outbound = Some(tx);
    }

    loop {
        tokio::select! {
            Some(message) = rx.recv() => {
                ws_sender.send(message).await.context("Failed to send frame")?;
            }
            frame = ws_receiver.next() => match frame {
                Some(Ok(Message::Text(text))) => handle_server_text(shared, &text).await,
                Some(Ok(Message::Close(_))) | None => return Ok(()),
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e.into()),
            }
        }
    }
}

async fn handle_server_text(shared: &Shared, text: &str) {
    let message: ServerMessage = match serde_json::from_str(text) {
        Ok(message) => message,
        Err(e) => {
            warn!(error = %e, "Ignoring undecodable server frame");
            return;
        }
    };

    match message {
        ServerMessage::Welcome { subscriber } => {
            debug!(subscriber = %subscriber, "Received welcome");
            *shared.subscriber_id.write().await = Some(subscriber);
        }
        ServerMessage::TokenUpdated { state, .. } => {
            let state = match &shared.overrides {
                Some(overrides) => overlay_protection(overrides, state),
                None => state,
            };
            let _ = shared.updates.send(TokenUpdate::new(state));
        }
        ServerMessage::Error { message } => warn!(%message, "Server rejected a command"),
        ServerMessage::Subscribed { .. } | ServerMessage::Unsubscribed { .. } | ServerMessage::Pong => {}
    }
}

/// Replace server-reported protection flags with a pending local write, if any
pub(crate) fn overlay_protection(overrides: &OptimisticOverrides<ProtectionFlags>, mut state: TokenState) -> TokenState {
    let incoming = state.protection.clone().unwrap_or_default();
    let resolved = overrides.resolve(state.token(), incoming);
    if state.protection.is_some() || resolved != ProtectionFlags::default() {
        state.protection = Some(resolved);
    }
    state
}
