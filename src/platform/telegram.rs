//! [`TelegramApi`] backed by a grammers MTProto user session.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use grammers_client::types::{Chat, Downloadable, Media, Message};
use grammers_client::{Client, Config as ClientConfig, InitParams, InputMessage, Update};
use grammers_session::Session;
use tracing::{debug, info};

use crate::config::{ProxyConfig, TelegramConfig};
use crate::platform::{
    DialogEntry, Document, DocumentAttribute, EntityInfo, EntityKind, NativeMedia, NativeMessage,
    Peer, TelegramApi,
};

pub struct GrammersClient {
    client: Client,
    session_file: PathBuf,
    /// Every chat seen in dialogs or updates, for sending and lookups by id.
    peers: Mutex<HashMap<i64, Chat>>,
    /// Media of received messages, held until downloaded or discarded.
    pending_media: Mutex<HashMap<(i64, i32), Media>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl GrammersClient {
    /// Load the session, connect and make sure it is signed in.
    pub async fn connect(config: TelegramConfig, proxy: Option<ProxyConfig>) -> Result<Self> {
        let session_file = config.session_path();
        if let Some(parent) = session_file.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create session directory: {}", parent.display())
                })?;
            }
        }

        let session = Session::load_file_or_create(&session_file)
            .with_context(|| format!("Failed to load session: {}", session_file.display()))?;
        let params = InitParams {
            proxy_url: proxy.as_ref().map(ProxyConfig::url),
            ..Default::default()
        };

        let client = Client::connect(ClientConfig {
            session,
            api_id: config.api_id,
            api_hash: config.api_hash.clone(),
            params,
        })
        .await
        .context("Failed to connect to Telegram")?;

        if !client
            .is_authorized()
            .await
            .context("Failed to check authorization")?
        {
            bail!(
                "Session {} is not signed in",
                session_file.display()
            );
        }
        info!("Telegram session loaded from {}", session_file.display());

        Ok(Self {
            client,
            session_file,
            peers: Mutex::new(HashMap::new()),
            pending_media: Mutex::new(HashMap::new()),
        })
    }

    fn remember(&self, chat: Chat) {
        lock(&self.peers).insert(chat.id(), chat);
    }

    async fn lookup(&self, id: i64) -> Result<Chat> {
        if let Some(chat) = lock(&self.peers).get(&id).cloned() {
            return Ok(chat);
        }
        // Enumerating dialogs fills the peer map as a side effect.
        let mut dialogs = self.list_dialogs();
        while let Some(entry) = dialogs.try_next().await? {
            if entry.id == id {
                break;
            }
        }
        lock(&self.peers)
            .get(&id)
            .cloned()
            .ok_or_else(|| anyhow!("PEER_ID_INVALID: no dialog with id {}", id))
    }

    fn native_message(&self, message: Message) -> NativeMessage {
        let chat = message.chat();
        let chat_id = chat.id();
        let peer = match &chat {
            Chat::User(_) => Peer::User(chat_id),
            Chat::Group(_) => Peer::Chat(chat_id),
            Chat::Channel(_) => Peer::Channel(chat_id),
        };
        self.remember(chat);

        let sender_id = message.sender().map(|sender| {
            let id = sender.id();
            self.remember(sender);
            id
        });

        let media = message.media().map(|media| {
            let native = native_media(&media);
            lock(&self.pending_media).insert((chat_id, message.id()), media);
            native
        });

        NativeMessage {
            id: message.id(),
            peer,
            sender_id,
            text: message.text().to_string(),
            date: message.date(),
            outgoing: message.outgoing(),
            media,
        }
    }
}

fn dialog_entry(chat: &Chat) -> DialogEntry {
    let (kind, is_self) = match chat {
        Chat::User(user) => (EntityKind::User, user.is_self()),
        Chat::Group(_) => (EntityKind::Group, false),
        Chat::Channel(_) => (EntityKind::Channel, false),
    };
    DialogEntry {
        kind,
        id: chat.id(),
        name: chat.name().to_string(),
        is_self,
    }
}

fn native_media(media: &Media) -> NativeMedia {
    match media {
        Media::Photo(_) => NativeMedia::Photo,
        Media::Document(doc) => NativeMedia::Document(native_document(doc)),
        Media::Sticker(sticker) => {
            let mut doc = native_document(&sticker.document);
            doc.attributes.push(DocumentAttribute::Sticker);
            NativeMedia::Document(doc)
        }
        _ => NativeMedia::Unsupported("media".to_string()),
    }
}

fn native_document(doc: &grammers_client::types::media::Document) -> Document {
    let mut attributes = Vec::new();
    let name = doc.name();
    if !name.is_empty() {
        attributes.push(DocumentAttribute::Filename(name.to_string()));
    }
    if doc.duration().is_some() {
        if doc.resolution().is_some() {
            attributes.push(DocumentAttribute::Video);
        } else {
            attributes.push(DocumentAttribute::Audio);
        }
    }
    Document {
        mime_type: doc.mime_type().map(str::to_string),
        attributes,
    }
}

#[async_trait]
impl TelegramApi for GrammersClient {
    fn list_dialogs(&self) -> BoxStream<'_, Result<DialogEntry>> {
        stream::unfold(Some(self.client.iter_dialogs()), move |state| async move {
            let mut dialogs = state?;
            match dialogs.next().await {
                Ok(Some(dialog)) => {
                    let chat = dialog.chat().clone();
                    let entry = dialog_entry(&chat);
                    self.remember(chat);
                    Some((Ok(entry), Some(dialogs)))
                }
                Ok(None) => None,
                Err(e) => Some((
                    Err(anyhow::Error::new(e).context("Failed to fetch dialogs")),
                    None,
                )),
            }
        })
        .boxed()
    }

    async fn next_update(&self) -> Result<Option<NativeMessage>> {
        loop {
            let update = self
                .client
                .next_update()
                .await
                .context("Failed to receive update")?;
            match update {
                Update::NewMessage(message) => return Ok(Some(self.native_message(message))),
                _ => debug!("Skipping non-message update"),
            }
        }
    }

    async fn download_media(&self, message: &NativeMessage, destination: &Path) -> Result<()> {
        let media = lock(&self.pending_media)
            .remove(&(message.chat_id(), message.id))
            .ok_or_else(|| anyhow!("No pending media for message {}", message.id))?;
        self.client
            .download_media(&Downloadable::Media(media), destination)
            .await
            .with_context(|| format!("Failed to download media of message {}", message.id))
    }

    async fn discard_media(&self, chat_id: i64, message_id: i32) {
        if lock(&self.pending_media).remove(&(chat_id, message_id)).is_some() {
            debug!(chat_id, message_id, "Dropped undownloaded media");
        }
    }

    async fn send_message(&self, chat_id: i64, text: &str, file: Option<&Path>) -> Result<i32> {
        let chat = self.lookup(chat_id).await?;
        let mut input = InputMessage::text(text);
        if let Some(path) = file {
            let uploaded = self
                .client
                .upload_file(path)
                .await
                .with_context(|| format!("Failed to upload {}", path.display()))?;
            input = input.document(uploaded);
        }
        let sent = self
            .client
            .send_message(chat.pack(), input)
            .await
            .with_context(|| format!("Failed to send message to {}", chat_id))?;
        Ok(sent.id())
    }

    async fn get_entity(&self, peer_id: i64) -> Result<EntityInfo> {
        let chat = self.lookup(peer_id).await?;
        let entry = dialog_entry(&chat);
        Ok(EntityInfo {
            id: entry.id,
            kind: entry.kind,
            display_name: entry.name,
        })
    }

    async fn download_profile_photo(
        &self,
        entity: &EntityInfo,
        destination: &Path,
    ) -> Result<bool> {
        let chat = self.lookup(entity.id).await?;
        let Some(photo) = chat.photo_downloadable(true) else {
            return Ok(false);
        };
        self.client
            .download_media(&photo, destination)
            .await
            .with_context(|| format!("Failed to download photo of {}", entity.id))?;
        Ok(true)
    }

    async fn disconnect(&self) -> Result<()> {
        lock(&self.pending_media).clear();
        self.client
            .session()
            .save_to_file(&self.session_file)
            .with_context(|| format!("Failed to save session: {}", self.session_file.display()))?;
        info!("Telegram session saved");
        Ok(())
    }
}
