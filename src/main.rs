use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tgbridge::platform::telegram::GrammersClient;
use tgbridge::{BridgeState, Config, Coordinator, NeutralMessage, TelegramChannel};

/// Writes every inbound message to the log.
struct LogCoordinator;

#[async_trait]
impl Coordinator for LogCoordinator {
    async fn deliver(&self, message: NeutralMessage) -> Result<()> {
        info!(
            uid = %message.uid,
            chat = %message.chat.name,
            author = %message.author.display_name,
            kind = %message.kind,
            media = ?message.media.as_ref().map(|m| m.path().display().to_string()),
            "{}",
            message.text
        );
        Ok(())
    }
}

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tgbridge=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    info!("Loading configuration from: {}", config_path.display());
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    info!("Configuration loaded successfully");
    info!("  Instance: {}", config.telegram.instance_id);
    info!("  Session: {}", config.telegram.session_path().display());
    if let Some(proxy) = &config.proxy {
        info!("  Proxy: {}", proxy.url());
    }

    let handshake = GrammersClient::connect(config.telegram.clone(), config.proxy.clone());
    let channel = Arc::new(
        TelegramChannel::connect(&config.bridge, Arc::new(LogCoordinator), handshake)?
            .with_instance_id(config.telegram.instance_id.clone()),
    );

    for chat in channel.list_chats()? {
        info!("  Chat {} ({:?}): {}", chat.id, chat.kind, chat.name);
    }

    spawn_shutdown_listener(Arc::clone(&channel))?;

    info!("Bridge is polling...");
    if let Err(e) = channel.start_polling() {
        // Ctrl-C before polling began already stopped and disconnected.
        if channel.state() != BridgeState::Stopped {
            return Err(e.into());
        }
    }
    info!("Bridge stopped");

    Ok(())
}

/// Stop polling on Ctrl-C so the session is saved on the way out.
fn spawn_shutdown_listener(channel: Arc<TelegramChannel>) -> Result<()> {
    let signals = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to build signal runtime")?;
    std::thread::Builder::new()
        .name("shutdown".to_string())
        .spawn(move || {
            match signals.block_on(tokio::signal::ctrl_c()) {
                Ok(()) => info!("Shutdown signal received"),
                Err(e) => {
                    error!("Unable to listen for shutdown signal: {}", e);
                    return;
                }
            }
            if let Err(e) = channel.stop_polling() {
                error!("Failed to stop polling: {}", e);
            }
        })
        .context("Failed to spawn shutdown listener")?;
    Ok(())
}
