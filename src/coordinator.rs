use anyhow::Result;
use async_trait::async_trait;

use crate::message::NeutralMessage;

/// The forwarding host that consumes translated messages.
#[async_trait]
pub trait Coordinator: Send + Sync {
    /// Deliver an inbound message. Any attached media file stays on disk
    /// until `message` is dropped.
    async fn deliver(&self, message: NeutralMessage) -> Result<()>;
}
