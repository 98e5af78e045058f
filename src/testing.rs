//! In-memory stand-ins for the Telegram client and the coordinator.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use chrono::Utc;
use futures::stream::{self, BoxStream, StreamExt};
use tokio::sync::{mpsc, Semaphore};

use crate::classify::MessageKind;
use crate::coordinator::Coordinator;
use crate::message::NeutralMessage;
use crate::platform::{DialogEntry, EntityInfo, EntityKind, NativeMessage, Peer, TelegramApi};

pub fn native_message(chat_id: i64, id: i32, text: &str) -> NativeMessage {
    NativeMessage {
        id,
        peer: Peer::Chat(chat_id),
        sender_id: None,
        text: text.to_string(),
        date: Utc::now(),
        outgoing: false,
        media: None,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub chat_id: i64,
    pub text: String,
    pub file: Option<PathBuf>,
}

pub struct FakeTelegram {
    dialogs: Mutex<Vec<DialogEntry>>,
    enumerations: AtomicUsize,
    fail_dialogs: AtomicBool,
    media: Mutex<HashMap<(i64, i32), Vec<u8>>>,
    photos: Mutex<HashMap<i64, Vec<u8>>>,
    updates_tx: Mutex<Option<mpsc::UnboundedSender<NativeMessage>>>,
    updates_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<NativeMessage>>,
    sent: Mutex<Vec<SentMessage>>,
    discarded: Mutex<Vec<(i64, i32)>>,
    next_message_id: AtomicI32,
    disconnected: AtomicBool,
}

impl FakeTelegram {
    pub fn new(dialogs: Vec<DialogEntry>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            dialogs: Mutex::new(dialogs),
            enumerations: AtomicUsize::new(0),
            fail_dialogs: AtomicBool::new(false),
            media: Mutex::new(HashMap::new()),
            photos: Mutex::new(HashMap::new()),
            updates_tx: Mutex::new(Some(tx)),
            updates_rx: tokio::sync::Mutex::new(rx),
            sent: Mutex::new(Vec::new()),
            discarded: Mutex::new(Vec::new()),
            next_message_id: AtomicI32::new(1000),
            disconnected: AtomicBool::new(false),
        }
    }

    /// Private chat "Alice" (100) and group "Team" (200).
    pub fn with_alice_and_team() -> Self {
        Self::new(vec![
            DialogEntry {
                kind: EntityKind::User,
                id: 100,
                name: "Alice".to_string(),
                is_self: false,
            },
            DialogEntry {
                kind: EntityKind::Group,
                id: 200,
                name: "Team".to_string(),
                is_self: false,
            },
        ])
    }

    pub fn dialog_enumerations(&self) -> usize {
        self.enumerations.load(Ordering::SeqCst)
    }

    pub fn fail_dialogs(&self, fail: bool) {
        self.fail_dialogs.store(fail, Ordering::SeqCst);
    }

    pub fn set_media(&self, chat_id: i64, message_id: i32, bytes: Vec<u8>) {
        self.media
            .lock()
            .unwrap()
            .insert((chat_id, message_id), bytes);
    }

    pub fn set_profile_photo(&self, entity_id: i64, bytes: Vec<u8>) {
        self.photos.lock().unwrap().insert(entity_id, bytes);
    }

    pub fn push_update(&self, message: NativeMessage) {
        if let Some(tx) = self.updates_tx.lock().unwrap().as_ref() {
            tx.send(message).unwrap();
        }
    }

    /// End the update stream.
    pub fn close_updates(&self) {
        self.updates_tx.lock().unwrap().take();
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().unwrap().clone()
    }

    /// `(chat_id, message_id)` of every message whose media was discarded.
    pub fn discarded(&self) -> Vec<(i64, i32)> {
        self.discarded.lock().unwrap().clone()
    }

    pub fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::SeqCst)
    }

    fn dialog(&self, id: i64) -> Option<DialogEntry> {
        self.dialogs
            .lock()
            .unwrap()
            .iter()
            .find(|d| d.id == id)
            .cloned()
    }

    fn ensure_connected(&self) -> Result<()> {
        if self.is_disconnected() {
            bail!("connection closed");
        }
        Ok(())
    }
}

#[async_trait]
impl TelegramApi for FakeTelegram {
    fn list_dialogs(&self) -> BoxStream<'_, Result<DialogEntry>> {
        self.enumerations.fetch_add(1, Ordering::SeqCst);
        if self.fail_dialogs.load(Ordering::SeqCst) {
            return stream::once(async { Err(anyhow!("FLOOD_WAIT_5")) }).boxed();
        }
        let dialogs = self.dialogs.lock().unwrap().clone();
        stream::iter(dialogs.into_iter().map(Ok)).boxed()
    }

    async fn next_update(&self) -> Result<Option<NativeMessage>> {
        let mut rx = self.updates_rx.lock().await;
        Ok(rx.recv().await)
    }

    async fn download_media(&self, message: &NativeMessage, destination: &Path) -> Result<()> {
        self.ensure_connected()?;
        let bytes = self
            .media
            .lock()
            .unwrap()
            .get(&(message.chat_id(), message.id))
            .cloned()
            .ok_or_else(|| anyhow!("FILE_REFERENCE_EXPIRED"))?;
        std::fs::write(destination, bytes)?;
        Ok(())
    }

    async fn discard_media(&self, chat_id: i64, message_id: i32) {
        self.discarded.lock().unwrap().push((chat_id, message_id));
    }

    async fn send_message(&self, chat_id: i64, text: &str, file: Option<&Path>) -> Result<i32> {
        self.ensure_connected()?;
        if self.dialog(chat_id).is_none() {
            bail!("PEER_ID_INVALID");
        }
        self.sent.lock().unwrap().push(SentMessage {
            chat_id,
            text: text.to_string(),
            file: file.map(Path::to_path_buf),
        });
        Ok(self.next_message_id.fetch_add(1, Ordering::SeqCst))
    }

    async fn get_entity(&self, peer_id: i64) -> Result<EntityInfo> {
        self.ensure_connected()?;
        let dialog = self
            .dialog(peer_id)
            .ok_or_else(|| anyhow!("Could not find the input entity for {}", peer_id))?;
        Ok(EntityInfo {
            id: dialog.id,
            kind: dialog.kind,
            display_name: dialog.name,
        })
    }

    async fn download_profile_photo(
        &self,
        entity: &EntityInfo,
        destination: &Path,
    ) -> Result<bool> {
        self.ensure_connected()?;
        let Some(bytes) = self.photos.lock().unwrap().get(&entity.id).cloned() else {
            return Ok(false);
        };
        std::fs::write(destination, bytes)?;
        Ok(true)
    }

    async fn disconnect(&self) -> Result<()> {
        self.disconnected.store(true, Ordering::SeqCst);
        self.close_updates();
        Ok(())
    }
}

/// What the coordinator saw, captured while the message was still alive.
#[derive(Debug, Clone)]
pub struct Delivered {
    pub uid: String,
    pub kind: MessageKind,
    pub text: String,
    pub chat_name: String,
    pub author_name: String,
    pub author_id: String,
    pub media_path: Option<PathBuf>,
    pub media_bytes: Option<Vec<u8>>,
}

#[derive(Default)]
pub struct RecordingCoordinator {
    delivered: Mutex<Vec<Delivered>>,
    fail_next: AtomicBool,
    started: AtomicUsize,
    gate: Mutex<Option<Arc<Semaphore>>>,
}

impl RecordingCoordinator {
    pub fn delivered(&self) -> Vec<Delivered> {
        self.delivered.lock().unwrap().clone()
    }

    /// Number of `deliver` calls entered so far, finished or not.
    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    /// Make every following delivery wait for a permit on the returned gate.
    pub fn hold(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *self.gate.lock().unwrap() = Some(Arc::clone(&gate));
        gate
    }

    pub fn fail_next(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl Coordinator for RecordingCoordinator {
    async fn deliver(&self, message: NeutralMessage) -> Result<()> {
        self.started.fetch_add(1, Ordering::SeqCst);
        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.acquire().await?.forget();
        }
        if self.fail_next.swap(false, Ordering::SeqCst) {
            bail!("master channel unavailable");
        }
        let media_path = message.media.as_ref().map(|m| m.path().to_path_buf());
        let media_bytes = media_path
            .as_ref()
            .map(std::fs::read)
            .transpose()?;
        self.delivered.lock().unwrap().push(Delivered {
            uid: message.uid.to_string(),
            kind: message.kind,
            text: message.text.clone(),
            chat_name: message.chat.name.clone(),
            author_name: message.author.display_name.clone(),
            author_id: message.author.id.clone(),
            media_path,
            media_bytes,
        });
        Ok(())
    }
}
