use std::sync::Arc;

use tracing::{debug, error, warn};

use crate::chat::{ChatDescriptor, ChatResolver, MemberDescriptor};
use crate::classify::{classify, MessageKind};
use crate::coordinator::Coordinator;
use crate::error::{Error, Result};
use crate::media::MediaMaterializer;
use crate::message::{MessageUid, NeutralMessage};
use crate::platform::{NativeMessage, TelegramApi};

/// Turns native new-message events into neutral messages for the coordinator.
pub struct InboundTranslator {
    api: Arc<dyn TelegramApi>,
    resolver: Arc<ChatResolver>,
    materializer: MediaMaterializer,
    coordinator: Arc<dyn Coordinator>,
}

impl InboundTranslator {
    pub fn new(
        api: Arc<dyn TelegramApi>,
        resolver: Arc<ChatResolver>,
        materializer: MediaMaterializer,
        coordinator: Arc<dyn Coordinator>,
    ) -> Self {
        Self {
            api,
            resolver,
            materializer,
            coordinator,
        }
    }

    /// Translate and deliver one event.
    ///
    /// Failures are logged here and then returned: the update loop keeps
    /// going, so this is the only place they become visible. Media the client
    /// holds for the message is released on every outcome.
    pub async fn handle(&self, message: NativeMessage) -> Result<()> {
        let chat_id = message.chat_id();
        let message_id = message.id;
        let has_media = message.media.is_some();

        let result = async {
            let neutral = self.translate(message).await?;
            debug!(uid = %neutral.uid, kind = %neutral.kind, "Delivering message");
            self.coordinator
                .deliver(neutral)
                .await
                .map_err(Error::Coordinator)
        }
        .await;

        if has_media {
            self.api.discard_media(chat_id, message_id).await;
        }
        if let Err(e) = &result {
            error!(chat_id, message_id, "Failed to handle inbound message: {:#}", e);
        }
        result
    }

    pub async fn translate(&self, message: NativeMessage) -> Result<NeutralMessage> {
        let chat = self.resolver.resolve(message.chat_id()).await?;
        let classification = classify(message.media.as_ref());

        let media = if classification.has_media() {
            match self.materializer.materialize(&message, &classification).await {
                Ok(media) => Some(media),
                Err(e) if classification.fallback => {
                    warn!(
                        chat_id = chat.id,
                        message_id = message.id,
                        "Unrecognized media could not be downloaded, delivering without it: {:#}",
                        e
                    );
                    None
                }
                Err(e) => return Err(e),
            }
        } else {
            None
        };

        let author = self.author(&message, &chat).await?;

        Ok(NeutralMessage {
            uid: MessageUid::new(chat.id, message.id),
            author,
            chat,
            text: message.text,
            kind: classification.kind,
            timestamp: message.date,
            media,
        })
    }

    async fn author(
        &self,
        message: &NativeMessage,
        chat: &Arc<ChatDescriptor>,
    ) -> Result<MemberDescriptor> {
        let Some(sender_id) = message.sender_id else {
            return Ok(MemberDescriptor {
                chat: Arc::clone(chat),
                display_name: chat.name.clone(),
                id: chat.uid(),
            });
        };

        if message.outgoing {
            return Ok(MemberDescriptor::myself(Arc::clone(chat)));
        }

        let entity = self
            .api
            .get_entity(sender_id)
            .await
            .map_err(|e| Error::network(format!("Failed to look up sender {}", sender_id), e))?;
        Ok(MemberDescriptor {
            chat: Arc::clone(chat),
            display_name: entity.display_name,
            id: entity.id.to_string(),
        })
    }
}
