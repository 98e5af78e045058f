//! Capability surface of the underlying Telegram client library.
//!
//! The core never talks to a concrete client type. Everything it needs from
//! the network (dialog enumeration, the update subscription, media download,
//! sending and entity lookup) goes through [`TelegramApi`], and the data it
//! gets back is expressed in the small native model defined here.

#[cfg(feature = "grammers")]
pub mod telegram;

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;

/// Routing metadata of a message: which conversation it belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Peer {
    User(i64),
    Chat(i64),
    Channel(i64),
}

impl Peer {
    /// Native chat id, whatever the peer flavour.
    pub fn chat_id(&self) -> i64 {
        match *self {
            Peer::User(id) | Peer::Chat(id) | Peer::Channel(id) => id,
        }
    }
}

/// Attribute markers carried by a document payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentAttribute {
    Filename(String),
    Sticker,
    Video,
    Audio,
    /// Markers the core does not interpret (image size, animated, ...).
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Document {
    pub mime_type: Option<String>,
    pub attributes: Vec<DocumentAttribute>,
}

/// Media payload attached to a native message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NativeMedia {
    Photo,
    Document(Document),
    /// Anything else the client reports (polls, geo points, web pages...).
    Unsupported(String),
}

/// A new message as delivered by the update subscription.
#[derive(Debug, Clone)]
pub struct NativeMessage {
    pub id: i32,
    pub peer: Peer,
    /// Sending peer; `None` for anonymous channel posts.
    pub sender_id: Option<i64>,
    pub text: String,
    pub date: DateTime<Utc>,
    pub outgoing: bool,
    pub media: Option<NativeMedia>,
}

impl NativeMessage {
    pub fn chat_id(&self) -> i64 {
        self.peer.chat_id()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    User,
    Group,
    Channel,
}

/// One conversation from the account's dialog list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DialogEntry {
    pub kind: EntityKind,
    pub id: i64,
    pub name: String,
    pub is_self: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityInfo {
    pub id: i64,
    pub kind: EntityKind,
    pub display_name: String,
}

/// Async API of a connected Telegram client.
///
/// Implementations own the transport; they are driven exclusively from the
/// bridge's event loop.
#[async_trait]
pub trait TelegramApi: Send + Sync {
    /// Enumerate the account's dialogs, most recent first.
    fn list_dialogs(&self) -> BoxStream<'_, Result<DialogEntry>>;

    /// Wait for the next new-message update. `Ok(None)` means the update
    /// stream has ended and no further messages will arrive.
    async fn next_update(&self) -> Result<Option<NativeMessage>>;

    /// Download the media attached to `message` into `destination`.
    async fn download_media(&self, message: &NativeMessage, destination: &Path) -> Result<()>;

    /// Forget any media the client still holds for a message. Called once the
    /// message has been handled, whether or not its media was downloaded.
    async fn discard_media(&self, chat_id: i64, message_id: i32);

    /// Send a message, attaching the file at `file` by path. Returns the id
    /// the server assigned to the sent message.
    async fn send_message(&self, chat_id: i64, text: &str, file: Option<&Path>) -> Result<i32>;

    async fn get_entity(&self, peer_id: i64) -> Result<EntityInfo>;

    /// Download the entity's profile photo. Returns `false` when it has none.
    async fn download_profile_photo(&self, entity: &EntityInfo, destination: &Path)
        -> Result<bool>;

    async fn disconnect(&self) -> Result<()>;
}

#[async_trait]
impl<T: TelegramApi + ?Sized> TelegramApi for Arc<T> {
    fn list_dialogs(&self) -> BoxStream<'_, Result<DialogEntry>> {
        (**self).list_dialogs()
    }

    async fn next_update(&self) -> Result<Option<NativeMessage>> {
        (**self).next_update().await
    }

    async fn download_media(&self, message: &NativeMessage, destination: &Path) -> Result<()> {
        (**self).download_media(message, destination).await
    }

    async fn discard_media(&self, chat_id: i64, message_id: i32) {
        (**self).discard_media(chat_id, message_id).await
    }

    async fn send_message(&self, chat_id: i64, text: &str, file: Option<&Path>) -> Result<i32> {
        (**self).send_message(chat_id, text, file).await
    }

    async fn get_entity(&self, peer_id: i64) -> Result<EntityInfo> {
        (**self).get_entity(peer_id).await
    }

    async fn download_profile_photo(
        &self,
        entity: &EntityInfo,
        destination: &Path,
    ) -> Result<bool> {
        (**self).download_profile_photo(entity, destination).await
    }

    async fn disconnect(&self) -> Result<()> {
        (**self).disconnect().await
    }
}
