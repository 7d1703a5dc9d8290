use std::future::Future;

use anyhow::Context;
use futures_util::{SinkExt, StreamExt};
use reqwest::{Client, ClientBuilder};
use reqwest_websocket::{CloseCode, Message, RequestBuilderExt, WebSocket};
use tokio::sync::{broadcast, watch};
use tokio::time::{Duration, sleep};
use tracing::{debug, info, warn};

use crate::command::{Command, ConnectionState};
use crate::message::{DecodeError, InboundMessage, decode_binary, decode_text};

pub const DEFAULT_ENDPOINT: &str = "ws://localhost:8000/ws";

/// Transport-level frame as seen by the connection loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
    Ping(Vec<u8>),
    Pong,
    Close(String),
}

pub trait Connector: Send + Sync {
    type Session: Session;

    fn connect(&self) -> impl Future<Output = anyhow::Result<Self::Session>> + Send;
}

pub trait Session: Send {
    /// `None` once the peer has gone away.
    fn next_frame(&mut self) -> impl Future<Output = Option<anyhow::Result<Frame>>> + Send;

    fn pong(&mut self, payload: Vec<u8>) -> impl Future<Output = anyhow::Result<()>> + Send;

    fn close(self) -> impl Future<Output = anyhow::Result<()>> + Send;
}

pub struct WebSocketConnector {
    client: Client,
    endpoint: String,
}

impl WebSocketConnector {
    pub fn new(endpoint: impl Into<String>) -> Result<WebSocketConnector, anyhow::Error> {
        Ok(WebSocketConnector {
            client: build_ws_client()?,
            endpoint: endpoint.into(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl Connector for WebSocketConnector {
    type Session = WebSocketSession;

    async fn connect(&self) -> anyhow::Result<WebSocketSession> {
        let response = self
            .client
            .get(&self.endpoint)
            .upgrade()
            .send()
            .await
            .with_context(|| format!("connecting to {}", self.endpoint))?;
        let socket = response
            .into_websocket()
            .await
            .with_context(|| format!("websocket handshake with {}", self.endpoint))?;
        Ok(WebSocketSession { socket })
    }
}

pub struct WebSocketSession {
    socket: WebSocket,
}

impl Session for WebSocketSession {
    async fn next_frame(&mut self) -> Option<anyhow::Result<Frame>> {
        let message = match self.socket.next().await? {
            Ok(message) => message,
            Err(err) => return Some(Err(err.into())),
        };
        let frame = match message {
            Message::Text(text) => Frame::Text(text),
            Message::Binary(bytes) => Frame::Binary(bytes.to_vec()),
            Message::Ping(payload) => Frame::Ping(payload.to_vec()),
            Message::Pong(_) => Frame::Pong,
            Message::Close { code, reason } => Frame::Close(format!("code={code}, reason={reason:?}")),
        };
        Some(Ok(frame))
    }

    async fn pong(&mut self, payload: Vec<u8>) -> anyhow::Result<()> {
        self.socket.send(Message::Pong(payload.into())).await?;
        Ok(())
    }

    async fn close(mut self) -> anyhow::Result<()> {
        self.socket
            .send(Message::Close {
                code: CloseCode::Normal,
                reason: String::new(),
            })
            .await?;
        Ok(())
    }
}

enum SessionEnd {
    Closed(String),
    Teardown,
}

/// Owns the single live socket of a dashboard session and republishes what
/// arrives on it. Every close schedules exactly one reconnect after
/// `reconnect_delay`; the exit signal cancels both the socket and any
/// pending reconnect. The current state is also kept on a watch channel so
/// a subscriber that lagged on the broadcast can catch up.
pub struct ConnectionManager<C> {
    connector: C,
    reconnect_delay: Duration,
    tx: broadcast::Sender<Command>,
    state_tx: watch::Sender<ConnectionState>,
}

impl<C: Connector> ConnectionManager<C> {
    pub fn new(
        connector: C,
        reconnect_delay: Duration,
        tx: broadcast::Sender<Command>,
    ) -> ConnectionManager<C> {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        ConnectionManager {
            connector,
            reconnect_delay,
            tx,
            state_tx,
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    fn set_state(&mut self, state: ConnectionState) {
        let previous = self.state();
        if previous == state {
            return;
        }
        info!(from = %previous, to = %state, "connection state changed");
        self.state_tx.send_replace(state);
        let _ = self.tx.send(Command::Connection(state));
    }

    fn emit_error(&self, message: impl Into<String>) {
        let _ = self.tx.send(Command::Error(message.into()));
    }

    pub async fn run(&mut self, exit_rx: &mut broadcast::Receiver<()>) {
        let mut attempt: u64 = 0;
        loop {
            attempt += 1;
            debug!(attempt, "opening websocket");
            let connected = tokio::select! {
                biased;
                _ = exit_rx.recv() => break,
                result = self.connector.connect() => result,
            };
            let end = match connected {
                Ok(session) => {
                    self.set_state(ConnectionState::Open);
                    self.pump(session, exit_rx).await
                }
                Err(err) => SessionEnd::Closed(format!("failed to connect: {err:#}")),
            };
            match end {
                SessionEnd::Teardown => break,
                SessionEnd::Closed(reason) => {
                    self.set_state(ConnectionState::Disconnected);
                    warn!(
                        %reason,
                        retry_in_ms = self.reconnect_delay.as_millis() as u64,
                        "websocket disconnected"
                    );
                    self.emit_error(reason);
                }
            }
            tokio::select! {
                biased;
                _ = exit_rx.recv() => {
                    debug!("reconnect cancelled by teardown");
                    break;
                }
                _ = sleep(self.reconnect_delay) => {}
            }
        }
        self.set_state(ConnectionState::Disconnected);
    }

    async fn pump(
        &mut self,
        mut session: C::Session,
        exit_rx: &mut broadcast::Receiver<()>,
    ) -> SessionEnd {
        loop {
            let frame = tokio::select! {
                biased;
                _ = exit_rx.recv() => {
                    self.set_state(ConnectionState::Closing);
                    if let Err(err) = session.close().await {
                        debug!(error = %err, "close frame not delivered");
                    }
                    return SessionEnd::Teardown;
                }
                frame = session.next_frame() => frame,
            };
            match frame {
                None => {
                    return SessionEnd::Closed("connection closed by server".to_string());
                }
                Some(Err(err)) => {
                    return SessionEnd::Closed(format!("websocket read error: {err:#}"));
                }
                Some(Ok(Frame::Text(text))) => self.dispatch(decode_text(&text)),
                Some(Ok(Frame::Binary(bytes))) => self.dispatch(decode_binary(bytes)),
                Some(Ok(Frame::Ping(payload))) => {
                    if let Err(err) = session.pong(payload).await {
                        return SessionEnd::Closed(format!("failed to reply pong: {err:#}"));
                    }
                }
                Some(Ok(Frame::Pong)) => {}
                Some(Ok(Frame::Close(reason))) => {
                    return SessionEnd::Closed(format!("websocket closed by server: {reason}"));
                }
            }
        }
    }

    fn dispatch(&self, decoded: Result<InboundMessage, DecodeError>) {
        match decoded {
            Ok(message) => {
                debug!(kind = message.kind(), "frame decoded");
                let _ = self.tx.send(Command::Inbound(message));
            }
            Err(err) => {
                warn!(error = %err, "discarding undecodable frame");
                let _ = self.tx.send(Command::FrameDiscarded(err.to_string()));
            }
        }
    }
}

fn build_ws_client() -> Result<Client, anyhow::Error> {
    // No overall timeout: it would also bound the lifetime of the upgraded socket.
    Ok(ClientBuilder::new()
        .connect_timeout(Duration::from_secs(5))
        .build()?)
}
