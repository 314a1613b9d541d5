use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;
use warp::ws::Message;

use crate::auth::Identity;
use crate::messages::ServerMessage;

pub type Outbound = mpsc::UnboundedSender<Message>;

/// Sending side of one live WebSocket session.
#[derive(Clone, Debug)]
pub struct ConnectionHandle {
    id: Uuid,
    tx: Outbound,
}

impl ConnectionHandle {
    pub fn new(tx: Outbound) -> Self {
        ConnectionHandle {
            id: Uuid::new_v4(),
            tx,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Queues a frame for the writer task. Returns `false` once the session
    /// has gone away; callers treat that as a miss, never as an error.
    pub fn push_frame(&self, frame: Message) -> bool {
        self.tx.send(frame).is_ok()
    }

    pub fn push(&self, message: &ServerMessage) -> bool {
        match message.to_frame() {
            Some(frame) => self.push_frame(frame),
            None => false,
        }
    }
}

/// The identity a connection authenticated as, plus its own handle.
#[derive(Clone, Debug)]
pub struct Session {
    pub identity: Identity,
    pub handle: ConnectionHandle,
}

impl Session {
    pub fn new(identity: Identity, handle: ConnectionHandle) -> Self {
        Session { identity, handle }
    }
}

/// Identity -> most recent live connection. A later registration replaces
/// the earlier one without closing it.
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    connections: Arc<RwLock<HashMap<Identity, ConnectionHandle>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the handle this registration superseded, if any.
    pub async fn register(&self, identity: Identity, handle: ConnectionHandle) -> Option<ConnectionHandle> {
        let mut connections = self.connections.write().await;
        connections.insert(identity, handle)
    }

    /// Removes whatever is registered for `identity`, even if it belongs to
    /// a newer connection than the caller's.
    pub async fn unregister(&self, identity: &Identity) -> Option<ConnectionHandle> {
        let mut connections = self.connections.write().await;
        connections.remove(identity)
    }

    /// Removes the entry only if it still points at `connection_id`.
    pub async fn unregister_if_current(&self, identity: &Identity, connection_id: Uuid) -> bool {
        let mut connections = self.connections.write().await;
        match connections.get(identity) {
            Some(handle) if handle.id() == connection_id => {
                connections.remove(identity);
                true
            }
            _ => false,
        }
    }

    pub async fn lookup(&self, identity: &Identity) -> Option<ConnectionHandle> {
        let connections = self.connections.read().await;
        connections.get(identity).cloned()
    }

    pub async fn is_online(&self, identity: &Identity) -> bool {
        let connections = self.connections.read().await;
        connections.contains_key(identity)
    }

    pub async fn online(&self) -> Vec<Identity> {
        let connections = self.connections.read().await;
        let mut identities: Vec<Identity> = connections.keys().cloned().collect();
        identities.sort();
        identities
    }

    pub async fn len(&self) -> usize {
        self.connections.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.connections.read().await.is_empty()
    }

    /// Removes `identity` if it still points at `connection_id` and, under
    /// the same write lock, announces `message` to everyone left. A reconnect
    /// therefore always lands either before the removal (which then fails)
    /// or after the announcement.
    pub async fn remove_and_announce(
        &self,
        identity: &Identity,
        connection_id: Uuid,
        message: &ServerMessage,
    ) -> Option<usize> {
        let mut connections = self.connections.write().await;
        match connections.get(identity) {
            Some(handle) if handle.id() == connection_id => {
                connections.remove(identity);
            }
            _ => return None,
        }
        let delivered = message
            .to_frame()
            .map_or(0, |frame| fan_out(&connections, &frame, Some(identity)));
        Some(delivered)
    }

    /// Fans `message` out to every registered connection except `except`'s.
    /// Returns how many connections accepted the frame.
    pub async fn broadcast_except(&self, message: &ServerMessage, except: Option<&Identity>) -> usize {
        let Some(frame) = message.to_frame() else {
            return 0;
        };

        let connections = self.connections.read().await;
        fan_out(&connections, &frame, except)
    }
}

fn fan_out(
    connections: &HashMap<Identity, ConnectionHandle>,
    frame: &Message,
    except: Option<&Identity>,
) -> usize {
    let mut delivered = 0;
    for (identity, handle) in connections {
        if Some(identity) == except {
            continue;
        }
        if handle.push_frame(frame.clone()) {
            delivered += 1;
        } else {
            log::debug!("Dropped broadcast to closed connection of {}", identity);
        }
    }
    delivered
}
