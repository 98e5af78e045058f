use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub proxy: Option<ProxyConfig>,
    #[serde(default)]
    pub bridge: BridgeConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TelegramConfig {
    pub api_id: i32,
    pub api_hash: String,
    #[serde(default = "default_instance_id")]
    pub instance_id: String,
    /// Defaults to `data/<instance_id>.session`.
    #[serde(default)]
    pub session_file: Option<PathBuf>,
}

impl TelegramConfig {
    pub fn session_path(&self) -> PathBuf {
        self.session_file
            .clone()
            .unwrap_or_else(|| PathBuf::from("data").join(format!("{}.session", self.instance_id)))
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProxyProtocol {
    Http,
    Socks5,
}

impl std::fmt::Display for ProxyProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProxyProtocol::Http => write!(f, "http"),
            ProxyProtocol::Socks5 => write!(f, "socks5"),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ProxyConfig {
    pub protocol: ProxyProtocol,
    pub host: String,
    pub port: u16,
}

impl ProxyConfig {
    pub fn url(&self) -> String {
        format!("{}://{}:{}", self.protocol, self.host, self.port)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct BridgeConfig {
    /// Upper bound for a blocking call marshaled onto the polling loop.
    /// 0 waits indefinitely.
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,
    /// Where transient media files are created. System temp dir if unset.
    #[serde(default)]
    pub media_dir: Option<PathBuf>,
    /// How long an unknown chat id is remembered as missing. 0 disables.
    #[serde(default = "default_negative_cache_ttl_secs")]
    pub negative_cache_ttl_secs: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            call_timeout_secs: default_call_timeout_secs(),
            media_dir: None,
            negative_cache_ttl_secs: default_negative_cache_ttl_secs(),
        }
    }
}

impl BridgeConfig {
    pub fn call_timeout(&self) -> Option<Duration> {
        non_zero_secs(self.call_timeout_secs)
    }

    pub fn negative_cache_ttl(&self) -> Option<Duration> {
        non_zero_secs(self.negative_cache_ttl_secs)
    }
}

fn non_zero_secs(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

fn default_instance_id() -> String {
    "default".to_string()
}

fn default_call_timeout_secs() -> u64 {
    60
}

fn default_negative_cache_ttl_secs() -> u64 {
    30
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config = Self::from_toml_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        if let Some(dir) = &config.bridge.media_dir {
            if !dir.exists() {
                std::fs::create_dir_all(dir).with_context(|| {
                    format!("Failed to create media directory: {}", dir.display())
                })?;
            }
        }

        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.telegram.api_id <= 0 {
            bail!("telegram.api_id must be a positive integer");
        }
        if self.telegram.api_hash.trim().is_empty() {
            bail!("telegram.api_hash must not be empty");
        }
        if let Some(proxy) = &self.proxy {
            if proxy.host.trim().is_empty() {
                bail!("proxy.host must not be empty");
            }
        }
        Ok(())
    }
}
