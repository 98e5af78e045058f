use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::chat::{ChatDescriptor, MemberDescriptor};
use crate::classify::MessageKind;
use crate::media::TransientMedia;

/// Message id unique per (chat, native message) pair: `{chat_id}_{message_id}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MessageUid(String);

impl MessageUid {
    pub fn new(chat_id: i64, message_id: i32) -> Self {
        Self(format!("{}_{}", chat_id, message_id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageUid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Platform-neutral message handed to the coordinator.
///
/// Owns its attachment: the transient file is deleted when the message is
/// dropped, i.e. once the coordinator is done with it.
#[derive(Debug)]
pub struct NeutralMessage {
    pub uid: MessageUid,
    pub author: MemberDescriptor,
    pub chat: Arc<ChatDescriptor>,
    pub text: String,
    pub kind: MessageKind,
    pub timestamp: DateTime<Utc>,
    pub media: Option<TransientMedia>,
}

/// A message the coordinator wants delivered to a Telegram chat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundRequest {
    pub chat_id: i64,
    pub text: String,
    pub file: Option<PathBuf>,
}

impl OutboundRequest {
    pub fn text(chat_id: i64, text: impl Into<String>) -> Self {
        Self {
            chat_id,
            text: text.into(),
            file: None,
        }
    }

    pub fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.file = Some(path.into());
        self
    }
}
