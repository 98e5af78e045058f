use std::sync::Arc;

use chrono::Utc;
use tracing::info;

use crate::chat::{ChatResolver, MemberDescriptor};
use crate::classify::{kind_for_path, MessageKind};
use crate::error::{Error, Result};
use crate::message::{MessageUid, NeutralMessage, OutboundRequest};
use crate::platform::TelegramApi;

/// Sends coordinator messages to Telegram. Failures are returned as-is and
/// never retried here.
pub struct OutboundDispatcher {
    api: Arc<dyn TelegramApi>,
    resolver: Arc<ChatResolver>,
}

impl OutboundDispatcher {
    pub fn new(api: Arc<dyn TelegramApi>, resolver: Arc<ChatResolver>) -> Self {
        Self { api, resolver }
    }

    /// Send `request` and return the accepted message as seen from this side.
    pub async fn send(&self, request: OutboundRequest) -> Result<NeutralMessage> {
        let chat = self.resolver.resolve(request.chat_id).await?;

        // Attachments go by path so the client library sniffs the MIME type
        // from the file name.
        let message_id = self
            .api
            .send_message(request.chat_id, &request.text, request.file.as_deref())
            .await
            .map_err(|e| {
                Error::network(format!("Failed to send to chat {}", request.chat_id), e)
            })?;

        let kind = request
            .file
            .as_deref()
            .map(kind_for_path)
            .unwrap_or(MessageKind::Text);
        info!(
            chat_id = request.chat_id,
            message_id,
            kind = %kind,
            "Sent message"
        );

        Ok(NeutralMessage {
            uid: MessageUid::new(chat.id, message_id),
            author: MemberDescriptor::myself(Arc::clone(&chat)),
            chat,
            text: request.text,
            kind,
            timestamp: Utc::now(),
            media: None,
        })
    }
}
