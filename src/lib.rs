//! Telegram channel for a multi-channel message forwarder.
//!
//! [`TelegramChannel`] is the synchronous surface a coordinator talks to.
//! Under it, a [`Bridge`] owns the event loop that every network call runs
//! on, inbound updates flow through the [`InboundTranslator`], and outbound
//! messages through the [`OutboundDispatcher`].

pub mod bridge;
pub mod channel;
pub mod chat;
pub mod classify;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod inbound;
pub mod media;
pub mod message;
pub mod outbound;
pub mod platform;

#[cfg(test)]
mod testing;

pub use bridge::{Bridge, BridgeState};
pub use channel::{ChannelInfo, TelegramChannel};
pub use chat::{ChatDescriptor, ChatKind, ChatResolver, MemberDescriptor};
pub use classify::{classify, Classification, MessageKind};
pub use config::Config;
pub use coordinator::Coordinator;
pub use error::{Error, Result};
pub use inbound::InboundTranslator;
pub use media::{ChatPicture, MediaMaterializer, TransientMedia};
pub use message::{MessageUid, NeutralMessage, OutboundRequest};
pub use outbound::OutboundDispatcher;
pub use platform::TelegramApi;
