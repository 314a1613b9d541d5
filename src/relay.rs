use crate::auth::Identity;
use crate::messages::{ClientMessage, CommentSnapshot, PostSnapshot, ServerMessage};
use crate::registry::ConnectionRegistry;

/// Who receives a relayed feed event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BroadcastScope {
    Everyone,
    EveryoneButOrigin,
}

/// Client-asserted feed update. Relayed as-is for responsiveness; nothing
/// checks that the post or comment exists.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedEvent {
    NewPost(PostSnapshot),
    LikeToggled { post_id: String, likes: Vec<Identity> },
    NewComment { post_id: String, comment: CommentSnapshot },
}

impl FeedEvent {
    /// `None` for client frames that are not feed events.
    pub fn from_client(message: ClientMessage) -> Option<Self> {
        match message {
            ClientMessage::NewPost { post } => Some(FeedEvent::NewPost(post)),
            ClientMessage::LikeToggled { post_id, likes } => Some(FeedEvent::LikeToggled { post_id, likes }),
            ClientMessage::NewComment { post_id, comment } => Some(FeedEvent::NewComment { post_id, comment }),
            _ => None,
        }
    }

    // The author already rendered its own post; likes and comments are
    // echoed back to the origin as well.
    pub fn scope(&self) -> BroadcastScope {
        match self {
            FeedEvent::NewPost(_) => BroadcastScope::EveryoneButOrigin,
            FeedEvent::LikeToggled { .. } | FeedEvent::NewComment { .. } => BroadcastScope::Everyone,
        }
    }

    fn into_server_message(self) -> ServerMessage {
        match self {
            FeedEvent::NewPost(post) => ServerMessage::NewPost { post },
            FeedEvent::LikeToggled { post_id, likes } => ServerMessage::LikeUpdate { post_id, likes },
            FeedEvent::NewComment { post_id, comment } => ServerMessage::NewComment { post_id, comment },
        }
    }
}

#[derive(Clone)]
pub struct FeedRelay {
    registry: ConnectionRegistry,
}

impl FeedRelay {
    pub fn new(registry: ConnectionRegistry) -> Self {
        FeedRelay { registry }
    }

    pub async fn relay(&self, origin: &Identity, event: FeedEvent) -> usize {
        let except = match event.scope() {
            BroadcastScope::Everyone => None,
            BroadcastScope::EveryoneButOrigin => Some(origin),
        };
        let message = event.into_server_message();
        self.registry.broadcast_except(&message, except).await
    }
}
