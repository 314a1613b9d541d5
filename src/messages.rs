use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;
use warp::ws::Message;

use crate::auth::Identity;

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("malformed frame: {0}")]
    Json(#[from] serde_json::Error),
    #[error("message has no recipient")]
    MissingRecipient,
    #[error("message text is empty")]
    EmptyText,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct DirectMessage {
    pub id: Uuid,
    pub from: Identity,
    pub to: Identity,
    pub text: String,
    pub created_at: DateTime<Utc>,
    /// Written as `false` on creation. Nothing flips it yet.
    pub seen: bool,
}

impl DirectMessage {
    pub fn new(from: Identity, to: Identity, text: String) -> Self {
        DirectMessage {
            id: Uuid::new_v4(),
            from,
            to,
            text,
            created_at: Utc::now(),
            seen: false,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Author {
    pub id: Identity,
    pub name: String,
    #[serde(default)]
    pub avatar: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct CommentSnapshot {
    pub id: String,
    pub text: String,
    pub user: Author,
    pub created_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct PostSnapshot {
    pub id: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub image: String,
    pub user: Author,
    #[serde(default)]
    pub likes: Vec<Identity>,
    #[serde(default)]
    pub comments: Vec<CommentSnapshot>,
    pub created_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "type")]
pub enum ClientMessage {
    #[serde(rename = "send-message")]
    SendMessage {
        to: Identity,
        text: String,
    },
    #[serde(rename = "typing-start")]
    TypingStart {
        to: Identity,
    },
    #[serde(rename = "typing-stop")]
    TypingStop {
        to: Identity,
    },
    #[serde(rename = "new-post")]
    NewPost {
        post: PostSnapshot,
    },
    #[serde(rename = "like-toggled")]
    LikeToggled {
        post_id: String,
        likes: Vec<Identity>,
    },
    #[serde(rename = "new-comment")]
    NewComment {
        post_id: String,
        comment: CommentSnapshot,
    },
}

impl ClientMessage {
    /// Parses one text frame. Frames with an unknown `type`, missing fields,
    /// or an unaddressed/blank direct message are rejected.
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        let message: ClientMessage = serde_json::from_str(text)?;
        if let ClientMessage::SendMessage { to, text } = &message {
            if to.is_empty() {
                return Err(ProtocolError::MissingRecipient);
            }
            if text.trim().is_empty() {
                return Err(ProtocolError::EmptyText);
            }
        }
        Ok(message)
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "presence-snapshot")]
    PresenceSnapshot {
        identities: Vec<Identity>,
    },
    #[serde(rename = "presence-online")]
    PresenceOnline {
        identity: Identity,
    },
    #[serde(rename = "presence-offline")]
    PresenceOffline {
        identity: Identity,
        last_seen: DateTime<Utc>,
    },
    #[serde(rename = "new-message")]
    NewMessage {
        message: DirectMessage,
    },
    #[serde(rename = "typing-start")]
    TypingStart {
        from: Identity,
    },
    #[serde(rename = "typing-stop")]
    TypingStop {
        from: Identity,
    },
    #[serde(rename = "new-post")]
    NewPost {
        post: PostSnapshot,
    },
    #[serde(rename = "like-update")]
    LikeUpdate {
        post_id: String,
        likes: Vec<Identity>,
    },
    #[serde(rename = "new-comment")]
    NewComment {
        post_id: String,
        comment: CommentSnapshot,
    },
    #[serde(rename = "error")]
    Error {
        message: String,
    },
}

impl ServerMessage {
    pub fn to_frame(&self) -> Option<Message> {
        match serde_json::to_string(self) {
            Ok(text) => Some(Message::text(text)),
            Err(e) => {
                log::error!("Failed to encode server message: {}", e);
                None
            }
        }
    }
}
