use std::sync::Arc;
use std::time::Duration;

use crate::auth::Identity;
use crate::config::HubSettings;
use crate::messages::{DirectMessage, ServerMessage};
use crate::registry::{ConnectionRegistry, Session};
use crate::store::Store;

/// What happened to one direct message.
#[derive(Debug, Clone)]
pub struct SendReceipt {
    pub message: DirectMessage,
    pub persisted: bool,
    pub delivered: bool,
}

/// Point-to-point delivery. Persisting and pushing are separate steps: a
/// failed write is retried and reported to the sender, while the live push
/// happens either way and is never retried.
#[derive(Clone)]
pub struct MessageRouter {
    registry: ConnectionRegistry,
    store: Arc<dyn Store>,
    persist_attempts: u32,
    persist_backoff: Duration,
}

impl MessageRouter {
    pub fn new(registry: ConnectionRegistry, store: Arc<dyn Store>, settings: &HubSettings) -> Self {
        MessageRouter {
            registry,
            store,
            persist_attempts: settings.persist_attempts.max(1),
            persist_backoff: settings.persist_backoff,
        }
    }

    pub async fn send(&self, sender: &Session, to: Identity, text: String) -> SendReceipt {
        let message = DirectMessage::new(sender.identity.clone(), to, text);
        let persisted = self.persist(&message).await;

        let frame = ServerMessage::NewMessage {
            message: message.clone(),
        };

        let delivered = if message.to == sender.identity {
            false
        } else {
            match self.registry.lookup(&message.to).await {
                Some(handle) => handle.push(&frame),
                None => {
                    log::debug!("{} is offline; message {} not delivered live", message.to, message.id);
                    false
                }
            }
        };

        if !sender.handle.push(&frame) {
            log::debug!("Sender {} went away before echo of {}", sender.identity, message.id);
        }

        if !persisted {
            sender.handle.push(&ServerMessage::Error {
                message: format!("message {} could not be saved", message.id),
            });
        }

        SendReceipt {
            message,
            persisted,
            delivered,
        }
    }

    async fn persist(&self, message: &DirectMessage) -> bool {
        for attempt in 1..=self.persist_attempts {
            match self.store.append_message(message).await {
                Ok(()) => return true,
                Err(e) if attempt < self.persist_attempts => {
                    log::warn!(
                        "Persisting message {} failed (attempt {}/{}): {}",
                        message.id,
                        attempt,
                        self.persist_attempts,
                        e
                    );
                    tokio::time::sleep(self.persist_backoff * attempt).await;
                }
                Err(e) => {
                    log::error!(
                        "Giving up on message {} after {} attempts: {}",
                        message.id,
                        attempt,
                        e
                    );
                }
            }
        }
        false
    }

    /// Forwards a typing indicator to `to` only.
    pub async fn typing(&self, from: &Identity, to: &Identity, started: bool) -> bool {
        if from == to {
            return false;
        }
        let Some(handle) = self.registry.lookup(to).await else {
            return false;
        };
        let frame = if started {
            ServerMessage::TypingStart { from: from.clone() }
        } else {
            ServerMessage::TypingStop { from: from.clone() }
        };
        handle.push(&frame)
    }
}
