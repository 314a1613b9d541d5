use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{Sink, SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout};
use warp::ws::{Message, WebSocket};

use crate::auth::Identity;
use crate::config::HubSettings;
use crate::messages::ClientMessage;
use crate::presence::PresenceTracker;
use crate::registry::{ConnectionHandle, ConnectionRegistry, Outbound, Session};
use crate::relay::{FeedEvent, FeedRelay};
use crate::router::MessageRouter;
use crate::store::Store;

/// How long a closing connection gets to flush frames already queued, such
/// as the close frame sent after a missed pong.
const WRITER_DRAIN: Duration = Duration::from_secs(2);

/// Owns the registry and every component that reads it. One instance per
/// process, cloned into each connection.
#[derive(Clone)]
pub struct Server {
    registry: ConnectionRegistry,
    presence: PresenceTracker,
    router: MessageRouter,
    relay: FeedRelay,
    ping_interval: Option<Duration>,
    pong_timeout: Duration,
}

impl Server {
    pub fn new(store: Arc<dyn Store>, settings: &HubSettings) -> Self {
        let registry = ConnectionRegistry::new();
        Server {
            presence: PresenceTracker::new(registry.clone(), store.clone()),
            router: MessageRouter::new(registry.clone(), store, settings),
            relay: FeedRelay::new(registry.clone()),
            registry,
            ping_interval: settings.ping_interval,
            pong_timeout: settings.pong_timeout,
        }
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn presence(&self) -> &PresenceTracker {
        &self.presence
    }

    /// Runs one authenticated connection until the client goes away or stops
    /// answering pings.
    pub async fn handle_connection(&self, ws: WebSocket, identity: Identity) {
        let (ws_tx, mut ws_rx) = ws.split();
        let (tx, rx) = mpsc::unbounded_channel();
        let session = Session::new(identity, ConnectionHandle::new(tx.clone()));

        log::info!("{} connected ({})", session.identity, session.handle.id());

        let writer = spawn_writer(ws_tx, rx);

        self.presence.on_connect(&session.identity, session.handle.clone()).await;

        let (pong_tx, pong_rx) = mpsc::unbounded_channel();
        let keepalive = self
            .ping_interval
            .map(|every| spawn_keepalive(tx.clone(), pong_rx, every, self.pong_timeout));
        let keepalive_abort = keepalive.as_ref().map(JoinHandle::abort_handle);
        let expired = async move {
            match keepalive {
                Some(handle) => {
                    let _ = handle.await;
                }
                None => std::future::pending::<()>().await,
            }
        };
        tokio::pin!(expired);

        loop {
            tokio::select! {
                frame = ws_rx.next() => match frame {
                    Some(Ok(msg)) => {
                        if msg.is_pong() {
                            let _ = pong_tx.send(());
                        } else if msg.is_close() {
                            break;
                        } else if let Ok(text) = msg.to_str() {
                            match ClientMessage::decode(text) {
                                Ok(message) => self.handle_client_message(&session, message).await,
                                Err(e) => log::debug!("Dropped frame from {}: {}", session.identity, e),
                            }
                        }
                    }
                    Some(Err(e)) => {
                        log::warn!("WebSocket error for {}: {}", session.identity, e);
                        break;
                    }
                    None => break,
                },
                () = &mut expired => {
                    log::info!("{} stopped answering pings", session.identity);
                    break;
                }
            }
        }

        if let Some(abort) = keepalive_abort {
            abort.abort();
        }

        self.presence.on_disconnect(&session.identity, session.handle.id()).await;
        log::info!("{} disconnected ({})", session.identity, session.handle.id());

        drop(session);
        drop(tx);
        finish_writer(writer).await;
    }

    pub async fn handle_client_message(&self, session: &Session, message: ClientMessage) {
        match message {
            ClientMessage::SendMessage { to, text } => {
                self.router.send(session, to, text).await;
            }
            ClientMessage::TypingStart { to } => {
                self.router.typing(&session.identity, &to, true).await;
            }
            ClientMessage::TypingStop { to } => {
                self.router.typing(&session.identity, &to, false).await;
            }
            feed => {
                if let Some(event) = FeedEvent::from_client(feed) {
                    self.relay.relay(&session.identity, event).await;
                }
            }
        }
    }
}

/// Forwards queued frames to the socket until every sender is gone or a
/// close frame has been written.
fn spawn_writer<S>(mut sink: S, mut rx: mpsc::UnboundedReceiver<Message>) -> JoinHandle<()>
where
    S: Sink<Message> + Unpin + Send + 'static,
    S::Error: Display,
{
    tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let closing = message.is_close();
            if let Err(e) = sink.send(message).await {
                log::debug!("Failed to send WebSocket message: {}", e);
                break;
            }
            if closing {
                break;
            }
        }
    })
}

/// Lets the writer flush what is already queued, then gives up on it.
async fn finish_writer(mut writer: JoinHandle<()>) {
    if timeout(WRITER_DRAIN, &mut writer).await.is_err() {
        log::debug!("Writer still busy after {:?}; aborting", WRITER_DRAIN);
        writer.abort();
    }
}

/// Pings every `every`; finishes when a pong is missed or the writer is gone.
fn spawn_keepalive(
    tx: Outbound,
    mut pong_rx: mpsc::UnboundedReceiver<()>,
    every: Duration,
    pong_timeout: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(every);
        ticker.tick().await;

        loop {
            ticker.tick().await;
            if tx.send(Message::ping(Vec::new())).is_err() {
                break;
            }
            match timeout(pong_timeout, pong_rx.recv()).await {
                Ok(Some(())) => {
                    // Pongs that arrived early would satisfy the next round.
                    while pong_rx.try_recv().is_ok() {}
                }
                _ => {
                    let _ = tx.send(Message::close_with(1001u16, "pong timeout"));
                    break;
                }
            }
        }
    })
}
