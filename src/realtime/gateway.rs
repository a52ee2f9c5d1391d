use super::hub::RealtimeHub;
use super::protocol::{ClientMessage, ServerMessage};
use crate::core::TokenId;
use crate::engine::AggregationEngine;
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

/// Websocket front door of the realtime hub
pub struct RealtimeGateway {
    hub: Arc<RealtimeHub>,
    bind_address: String,
    engine: Option<Arc<AggregationEngine>>,
}

impl RealtimeGateway {
    pub fn new(hub: Arc<RealtimeHub>, bind_address: impl Into<String>) -> Self {
        Self {
            hub,
            bind_address: bind_address.into(),
            engine: None,
        }
    }

    /// With an engine attached, each new subscription triggers one aggregation
    /// so the subscriber receives a current state without waiting for traffic.
    pub fn with_engine(mut self, engine: Arc<AggregationEngine>) -> Self {
        self.engine = Some(engine);
        self
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) -> anyhow::Result<()> {
        let listener = TcpListener::bind(&self.bind_address).await?;
        info!("🔌 Realtime gateway listening on ws://{}", self.bind_address);

        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        let hub = self.hub.clone();
                        let engine = self.engine.clone();
                        tokio::spawn(handle_connection(stream, addr, hub, engine));
                    }
                    Err(e) => warn!(error = %e, "Failed to accept connection"),
                },
                _ = shutdown.recv() => {
                    info!("🛑 Realtime gateway shutting down");
                    break;
                }
            }
        }
        Ok(())
    }
}

async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    hub: Arc<RealtimeHub>,
    engine: Option<Arc<AggregationEngine>>,
) {
    let ws_stream = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            error!(%addr, error = %e, "WebSocket handshake failed");
            return;
        }
    };

    let subscriber = hub.next_subscriber_id();
    let mut outbound = hub.attach(&subscriber);
    info!(%addr, subscriber = %subscriber, "New realtime connection");

    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    let welcome = ServerMessage::Welcome { subscriber: subscriber.clone() };
    if let Ok(text) = welcome.encode() {
        if ws_sender.send(Message::Text(text)).await.is_err() {
            hub.disconnect(&subscriber);
            return;
        }
    }

    let send_id = subscriber.clone();
    let mut send_task = tokio::spawn(async move {
        while let Some(message) = outbound.recv().await {
            let Some(text) = outbound_frame(&send_id, &message) else {
                continue;
            };
            if ws_sender.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    let recv_hub = hub.clone();
    let recv_id = subscriber.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(frame) = ws_receiver.next().await {
            match frame {
                Ok(Message::Text(text)) => {
                    let reply = handle_client_message(&recv_hub, &recv_id, &text);
                    if let (Some(engine), Some(ServerMessage::Subscribed { token })) = (&engine, &reply) {
                        prime(engine.clone(), token.clone());
                    }
                    if let Some(reply) = reply {
                        if let Some(tx) = recv_hub.sender(&recv_id) {
                            if tx.try_send(reply).is_err() {
                                debug!(subscriber = %recv_id, "Reply dropped, queue unavailable");
                            }
                        }
                    }
                }
                Ok(Message::Close(_)) => {
                    debug!(subscriber = %recv_id, "Client sent close frame");
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(subscriber = %recv_id, error = %e, "WebSocket receive error");
                    break;
                }
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    hub.disconnect(&subscriber);
    info!(%addr, subscriber = %subscriber, "Realtime connection closed");
}

fn prime(engine: Arc<AggregationEngine>, token: String) {
    tokio::spawn(async move {
        if let Err(e) = engine.get_token_state(&token, None).await {
            warn!(token = %token, error = %e, "Initial aggregation for subscriber failed");
        }
    });
}

/// Wire text for one queued message. An update that cannot be encoded is
/// replaced by an error frame so the subscriber learns it missed one.
pub fn outbound_frame(subscriber: &str, message: &ServerMessage) -> Option<String> {
    let e = match message.encode() {
        Ok(text) => return Some(text),
        Err(e) => e,
    };
    warn!(subscriber = %subscriber, error = %e, "Unencodable message, sending error frame instead");
    let notice = match message {
        ServerMessage::TokenUpdated { token, .. } => format!("update for {token} could not be encoded: {e}"),
        _ => format!("message could not be encoded: {e}"),
    };
    ServerMessage::error(notice).encode().ok()
}

/// Apply one client frame to the hub and produce the reply, if any
pub fn handle_client_message(hub: &RealtimeHub, subscriber: &str, text: &str) -> Option<ServerMessage> {
    let message = match ClientMessage::parse(text) {
        Ok(message) => message,
        Err(e) => return Some(ServerMessage::error(format!("invalid message: {e}"))),
    };

    match message {
        ClientMessage::Subscribe { token } => match TokenId::parse(&token) {
            Ok(token) => {
                hub.subscribe(subscriber, token.as_str());
                Some(ServerMessage::Subscribed { token: token.to_string() })
            }
            Err(e) => Some(ServerMessage::error(e.to_string())),
        },
        ClientMessage::Unsubscribe { token } => match TokenId::parse(&token) {
            Ok(token) => {
                hub.unsubscribe(subscriber, token.as_str());
                Some(ServerMessage::Unsubscribed { token: token.to_string() })
            }
            Err(e) => Some(ServerMessage::error(e.to_string())),
        },
        ClientMessage::Ping => Some(ServerMessage::Pong),
    }
}
