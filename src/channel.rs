use std::future::Future;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::bridge::{Bridge, BridgeState};
use crate::chat::{ChatDescriptor, ChatResolver};
use crate::classify::MessageKind;
use crate::config::BridgeConfig;
use crate::coordinator::Coordinator;
use crate::error::{Error, Result};
use crate::inbound::InboundTranslator;
use crate::media::{ChatPicture, MediaMaterializer};
use crate::message::{NeutralMessage, OutboundRequest};
use crate::outbound::OutboundDispatcher;
use crate::platform::TelegramApi;

/// Identity the channel presents to the coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelInfo {
    pub id: &'static str,
    pub name: &'static str,
    pub emoji: &'static str,
    pub instance_id: Option<String>,
}

/// Kinds accepted by [`TelegramChannel::send`].
pub const SUPPORTED_KINDS: &[MessageKind] = &[
    MessageKind::Text,
    MessageKind::Image,
    MessageKind::File,
    MessageKind::Video,
    MessageKind::Audio,
];

/// Synchronous, coordinator-facing Telegram channel.
///
/// Every method blocks the calling thread until the network work it
/// triggers has finished on the bridge's event loop.
pub struct TelegramChannel {
    bridge: Bridge,
    api: Arc<dyn TelegramApi>,
    resolver: Arc<ChatResolver>,
    inbound: Arc<InboundTranslator>,
    outbound: Arc<OutboundDispatcher>,
    pictures: Arc<MediaMaterializer>,
    instance_id: Option<String>,
}

impl TelegramChannel {
    /// Run `handshake` to obtain a connected client and wire up the channel.
    pub fn connect<F, A>(
        config: &BridgeConfig,
        coordinator: Arc<dyn Coordinator>,
        handshake: F,
    ) -> Result<Self>
    where
        F: Future<Output = anyhow::Result<A>> + Send + 'static,
        A: TelegramApi + 'static,
    {
        let bridge = Bridge::new(config.call_timeout())?;
        let api: Arc<dyn TelegramApi> = Arc::new(bridge.connect(handshake)?);

        let resolver = Arc::new(ChatResolver::new(
            Arc::clone(&api),
            config.negative_cache_ttl(),
        ));
        let inbound = Arc::new(InboundTranslator::new(
            Arc::clone(&api),
            Arc::clone(&resolver),
            MediaMaterializer::new(Arc::clone(&api), config.media_dir.clone()),
            coordinator,
        ));
        let outbound = Arc::new(OutboundDispatcher::new(
            Arc::clone(&api),
            Arc::clone(&resolver),
        ));
        let pictures = Arc::new(MediaMaterializer::new(
            Arc::clone(&api),
            config.media_dir.clone(),
        ));

        Ok(Self {
            bridge,
            api,
            resolver,
            inbound,
            outbound,
            pictures,
            instance_id: None,
        })
    }

    #[must_use]
    pub fn with_instance_id(mut self, instance_id: impl Into<String>) -> Self {
        self.instance_id = Some(instance_id.into());
        self
    }

    pub fn info(&self) -> ChannelInfo {
        ChannelInfo {
            id: "telegram",
            name: "Telegram",
            emoji: "✈️",
            instance_id: self.instance_id.clone(),
        }
    }

    pub fn state(&self) -> BridgeState {
        self.bridge.state()
    }

    pub fn list_chats(&self) -> Result<Vec<Arc<ChatDescriptor>>> {
        let resolver = Arc::clone(&self.resolver);
        self.bridge
            .run_blocking(async move { resolver.resolve_all().await })
    }

    pub fn get_chat(&self, chat_id: i64) -> Result<Arc<ChatDescriptor>> {
        let resolver = Arc::clone(&self.resolver);
        self.bridge
            .run_blocking(async move { resolver.resolve(chat_id).await })
    }

    pub fn send(&self, request: OutboundRequest) -> Result<NeutralMessage> {
        let outbound = Arc::clone(&self.outbound);
        self.bridge
            .run_blocking(async move { outbound.send(request).await })
    }

    /// Profile picture of a chat as a byte stream.
    pub fn get_chat_picture(&self, chat_id: i64) -> Result<ChatPicture> {
        let resolver = Arc::clone(&self.resolver);
        let api = Arc::clone(&self.api);
        let pictures = Arc::clone(&self.pictures);
        self.bridge.run_blocking(async move {
            let chat = resolver.resolve(chat_id).await?;
            let entity = api
                .get_entity(chat.id)
                .await
                .map_err(|e| {
                    Error::network(format!("Failed to look up chat {}", chat.id), e)
                })?;
            pictures
                .profile_photo(&entity)
                .await?
                .ok_or(Error::PictureNotFound(chat_id))
        })
    }

    /// Looking up past messages is not offered by this channel.
    pub fn get_message_by_id(&self, _chat_id: i64, _message_id: &str) -> Result<NeutralMessage> {
        Err(Error::OperationNotSupported("get_message_by_id"))
    }

    /// Status updates from the coordinator are accepted and dropped.
    pub fn send_status(&self, status: &str) {
        debug!(status, "Ignoring status update");
    }

    /// Consume new-message updates until [`TelegramChannel::stop_polling`]
    /// is called or the update stream ends. Blocks the calling thread.
    pub fn start_polling(&self) -> Result<()> {
        let api = Arc::clone(&self.api);
        let inbound = Arc::clone(&self.inbound);

        self.bridge.run_forever(move |shutdown| async move {
            let outcome = loop {
                // An update that is already queued wins over shutdown, so it
                // is seen and dropped below instead of left in the client.
                let update = tokio::select! {
                    biased;
                    update = api.next_update() => update,
                    _ = shutdown.cancelled() => break Ok(()),
                };

                match update {
                    Ok(Some(message)) => {
                        if shutdown.is_cancelled() {
                            debug!(
                                message_id = message.id,
                                "Dropping update received while stopping"
                            );
                            if message.media.is_some() {
                                api.discard_media(message.chat_id(), message.id).await;
                            }
                            break Ok(());
                        }
                        // Already logged by the translator; one bad message
                        // must not end the subscription.
                        let _ = inbound.handle(message).await;
                    }
                    Ok(None) => {
                        info!("Update stream closed");
                        break Ok(());
                    }
                    Err(e) => {
                        error!("Failed to receive updates: {:#}", e);
                        break Err(Error::network("Failed to receive updates", e));
                    }
                }
            };

            if let Err(e) = api.disconnect().await {
                warn!("Failed to disconnect cleanly: {:#}", e);
            }
            outcome
        })
    }

    /// Stop polling. When the loop is running this only signals it; the
    /// polling thread disconnects before `start_polling` returns.
    pub fn stop_polling(&self) -> Result<()> {
        match self.bridge.request_stop() {
            BridgeState::Polling => {
                info!("Stopping polling");
                Ok(())
            }
            BridgeState::Created | BridgeState::Connected => {
                let api = Arc::clone(&self.api);
                self.bridge.finish_stop(async move {
                    api.disconnect()
                        .await
                        .map_err(|e| Error::network("Failed to disconnect", e))
                })
            }
            BridgeState::Stopping | BridgeState::Stopped => Ok(()),
        }
    }
}
