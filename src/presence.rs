//! Online/offline tracking.
//!
//! An identity is online iff the registry holds a connection for it. The
//! durable store gets a best-effort copy of that state for the REST side.

use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::auth::Identity;
use crate::messages::ServerMessage;
use crate::registry::{ConnectionHandle, ConnectionRegistry};
use crate::store::Store;

#[derive(Clone)]
pub struct PresenceTracker {
    registry: ConnectionRegistry,
    store: Arc<dyn Store>,
}

impl PresenceTracker {
    pub fn new(registry: ConnectionRegistry, store: Arc<dyn Store>) -> Self {
        PresenceTracker { registry, store }
    }

    pub async fn on_connect(&self, identity: &Identity, handle: ConnectionHandle) {
        if let Some(previous) = self.registry.register(identity.clone(), handle.clone()).await {
            log::info!(
                "Connection {} of {} superseded by {}",
                previous.id(),
                identity,
                handle.id()
            );
        }

        if let Err(e) = self.store.set_presence(identity, true, Utc::now()).await {
            log::warn!("Failed to record {} as online: {}", identity, e);
        }

        let identities = self
            .registry
            .online()
            .await
            .into_iter()
            .filter(|other| other != identity)
            .collect();
        handle.push(&ServerMessage::PresenceSnapshot { identities });

        let notified = self
            .registry
            .broadcast_except(
                &ServerMessage::PresenceOnline {
                    identity: identity.clone(),
                },
                Some(identity),
            )
            .await;
        log::debug!("{} online, notified {} connections", identity, notified);
    }

    /// Returns `false` when the connection had already been superseded; the
    /// identity is still online through its newer connection and nothing is
    /// announced.
    pub async fn on_disconnect(&self, identity: &Identity, connection_id: Uuid) -> bool {
        let last_seen = Utc::now();
        let offline = ServerMessage::PresenceOffline {
            identity: identity.clone(),
            last_seen,
        };
        let Some(notified) = self
            .registry
            .remove_and_announce(identity, connection_id, &offline)
            .await
        else {
            log::debug!(
                "Stale connection {} of {} closed; newer connection stays registered",
                connection_id,
                identity
            );
            return false;
        };
        log::debug!("{} offline, notified {} connections", identity, notified);

        if let Err(e) = self.store.set_presence(identity, false, last_seen).await {
            log::warn!("Failed to record {} as offline: {}", identity, e);
        }

        // A reconnect may have written `online` while the offline write was
        // in flight; the registry is the source of truth.
        if self.registry.is_online(identity).await {
            log::debug!("{} reconnected while going offline", identity);
            if let Err(e) = self.store.set_presence(identity, true, Utc::now()).await {
                log::warn!("Failed to record {} as online: {}", identity, e);
            }
        }
        true
    }

    pub async fn is_online(&self, identity: &Identity) -> bool {
        self.registry.is_online(identity).await
    }

    pub async fn online(&self) -> Vec<Identity> {
        self.registry.online().await
    }
}
