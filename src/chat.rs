use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use futures::TryStreamExt;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::platform::{DialogEntry, EntityKind, TelegramApi};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatKind {
    Private { is_self: bool },
    Group,
}

/// A resolved conversation. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatDescriptor {
    pub id: i64,
    pub name: String,
    pub kind: ChatKind,
}

impl ChatDescriptor {
    pub fn from_dialog(dialog: &DialogEntry) -> Self {
        let kind = match dialog.kind {
            EntityKind::User => ChatKind::Private {
                is_self: dialog.is_self,
            },
            EntityKind::Group | EntityKind::Channel => ChatKind::Group,
        };
        Self {
            id: dialog.id,
            name: dialog.name.clone(),
            kind,
        }
    }

    pub fn uid(&self) -> String {
        self.id.to_string()
    }

    pub fn is_group(&self) -> bool {
        self.kind == ChatKind::Group
    }
}

/// Author of a message within a chat. Built per message, never cached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberDescriptor {
    pub chat: Arc<ChatDescriptor>,
    pub display_name: String,
    pub id: String,
}

impl MemberDescriptor {
    pub const SELF_ID: &'static str = "__self__";

    /// The account itself, used as author of outbound echoes.
    pub fn myself(chat: Arc<ChatDescriptor>) -> Self {
        Self {
            chat,
            display_name: "You".to_string(),
            id: Self::SELF_ID.to_string(),
        }
    }
}

/// Maps native chat ids to descriptors, enumerating dialogs on a miss.
///
/// Entries live as long as the resolver and are never evicted. Misses can
/// optionally be remembered for a short time so unknown ids do not trigger a
/// full enumeration on every lookup.
pub struct ChatResolver {
    api: Arc<dyn TelegramApi>,
    cache: RwLock<HashMap<i64, Arc<ChatDescriptor>>>,
    misses: Mutex<HashMap<i64, Instant>>,
    negative_ttl: Option<Duration>,
}

impl ChatResolver {
    pub fn new(api: Arc<dyn TelegramApi>, negative_ttl: Option<Duration>) -> Self {
        Self {
            api,
            cache: RwLock::new(HashMap::new()),
            misses: Mutex::new(HashMap::new()),
            negative_ttl,
        }
    }

    pub fn cached(&self, chat_id: i64) -> Option<Arc<ChatDescriptor>> {
        self.cache
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&chat_id)
            .cloned()
    }

    pub fn cache_len(&self) -> usize {
        self.cache.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub async fn resolve(&self, chat_id: i64) -> Result<Arc<ChatDescriptor>> {
        if let Some(chat) = self.cached(chat_id) {
            debug!(chat_id, "chat cache hit");
            return Ok(chat);
        }
        if self.recently_missed(chat_id) {
            debug!(chat_id, "chat negative cache hit");
            return Err(Error::ChatNotFound(chat_id));
        }

        debug!(chat_id, "chat cache miss, enumerating dialogs");
        let mut dialogs = self.api.list_dialogs();
        while let Some(dialog) = dialogs
            .try_next()
            .await
            .map_err(|e| Error::network("Failed to enumerate dialogs", e))?
        {
            if dialog.id == chat_id {
                return Ok(self.insert(ChatDescriptor::from_dialog(&dialog)));
            }
        }

        self.remember_miss(chat_id);
        Err(Error::ChatNotFound(chat_id))
    }

    /// Every dialog of the account. Descriptors already cached are returned
    /// as the cached instances; new ones are added to the cache.
    pub async fn resolve_all(&self) -> Result<Vec<Arc<ChatDescriptor>>> {
        let dialogs: Vec<DialogEntry> = self
            .api
            .list_dialogs()
            .try_collect()
            .await
            .map_err(|e| Error::network("Failed to enumerate dialogs", e))?;

        let chats: Vec<_> = dialogs
            .iter()
            .map(|d| self.insert(ChatDescriptor::from_dialog(d)))
            .collect();
        info!("Resolved {} chats", chats.len());
        Ok(chats)
    }

    /// Insert unless present; the first descriptor for an id wins.
    fn insert(&self, chat: ChatDescriptor) -> Arc<ChatDescriptor> {
        let mut cache = self.cache.write().unwrap_or_else(|e| e.into_inner());
        let entry = cache.entry(chat.id).or_insert_with(|| Arc::new(chat));
        Arc::clone(entry)
    }

    fn recently_missed(&self, chat_id: i64) -> bool {
        let Some(ttl) = self.negative_ttl else {
            return false;
        };
        let mut misses = self.misses.lock().unwrap_or_else(|e| e.into_inner());
        match misses.get(&chat_id) {
            Some(at) if at.elapsed() < ttl => true,
            Some(_) => {
                misses.remove(&chat_id);
                false
            }
            None => false,
        }
    }

    /// Record a miss, pruning entries that have already expired.
    fn remember_miss(&self, chat_id: i64) {
        let Some(ttl) = self.negative_ttl else {
            return;
        };
        let mut misses = self.misses.lock().unwrap_or_else(|e| e.into_inner());
        misses.retain(|_, at| at.elapsed() < ttl);
        misses.insert(chat_id, Instant::now());
    }
}
