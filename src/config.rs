use crate::error::ViewerError;
use anyhow::{Context, Result};
use clap::Parser;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_CONFIG_PATH: &str = "./log-viewer.toml";
const DEFAULT_API_URL: &str = "http://localhost:8080/api";
const SOCKJS_WEBSOCKET_SUFFIX: &str = "/websocket";

#[derive(Parser, Debug, Default)]
#[clap(name = "admin-log-viewer", version, about)]
pub struct Cli {
    /// Path to configuration file (defaults to ./log-viewer.toml when present)
    #[clap(long)]
    pub config: Option<PathBuf>,

    /// Override API base URL
    #[clap(long, env = "API_URL")]
    pub api_url: Option<String>,

    /// Bearer token for the admin endpoints
    #[clap(long, env = "API_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Number of history lines to request
    #[clap(long)]
    pub history_limit: Option<usize>,

    /// Do not print live records as they arrive
    #[clap(long)]
    pub no_follow: bool,

    /// Disable level colours
    #[clap(long)]
    pub no_color: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api_url: String,
    pub token: Option<String>,
    pub history_limit: usize,
    pub buffer_capacity: usize,
    pub reconnect_delay_ms: u64,
    pub log_stream_path: String,
    pub sockjs_transport: bool,
    /// Full WebSocket URL of the log stream; derived from `api_url` when unset
    pub stream_url: Option<String>,
    pub topic: String,
    pub history_first: bool,
    pub follow: bool,
    /// Colour the level column (only applied when stdout is a terminal)
    pub color: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            token: None,
            history_limit: 200,
            buffer_capacity: crate::log_buffer::DEFAULT_CAPACITY,
            reconnect_delay_ms: 5000,
            log_stream_path: "/ws-log".to_string(),
            sockjs_transport: true,
            stream_url: None,
            topic: "/topic/logs".to_string(),
            history_first: true,
            follow: true,
            color: true,
        }
    }
}

impl Config {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn history_url(&self) -> String {
        format!("{}/admin/logs", self.api_url.trim_end_matches('/'))
    }

    /// WebSocket URL of the log stream: the API base without its `/api`
    /// suffix plus the stream path, on the matching ws scheme.
    pub fn live_feed_url(&self) -> String {
        if let Some(ref url) = self.stream_url {
            return url.clone();
        }

        let base = self.api_url.trim_end_matches('/');
        let base = base.strip_suffix("/api").unwrap_or(base);

        let base = if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{}", rest)
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{}", rest)
        } else {
            base.to_string()
        };

        let mut url = format!("{}{}", base, self.log_stream_path);
        if self.sockjs_transport {
            url.push_str(SOCKJS_WEBSOCKET_SUFFIX);
        }
        url
    }

    /// Host part of the API URL, sent in the STOMP `host` header.
    pub fn host(&self) -> String {
        let without_scheme = self
            .api_url
            .split_once("://")
            .map(|(_, rest)| rest)
            .unwrap_or(&self.api_url);
        without_scheme
            .split(['/', ':'])
            .next()
            .unwrap_or("localhost")
            .to_string()
    }

    pub fn validate(&self) -> crate::error::Result<()> {
        if !(self.api_url.starts_with("http://") || self.api_url.starts_with("https://")) {
            return Err(ViewerError::ConfigError(format!(
                "api_url must start with http:// or https://, got {}",
                self.api_url
            )));
        }
        if self.buffer_capacity == 0 {
            return Err(ViewerError::ConfigError(
                "buffer_capacity must be greater than zero".to_string(),
            ));
        }
        if self.history_limit == 0 || self.history_limit > self.buffer_capacity {
            return Err(ViewerError::ConfigError(format!(
                "history_limit must be between 1 and {}, got {}",
                self.buffer_capacity, self.history_limit
            )));
        }
        if let Some(ref url) = self.stream_url {
            if !(url.starts_with("ws://") || url.starts_with("wss://")) {
                return Err(ViewerError::ConfigError(format!(
                    "stream_url must start with ws:// or wss://, got {}",
                    url
                )));
            }
        }
        if !self.topic.starts_with('/') || !self.log_stream_path.starts_with('/') {
            return Err(ViewerError::ConfigError(
                "topic and log_stream_path must start with '/'".to_string(),
            ));
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<Config> {
    let config_content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    toml::from_str(&config_content).context("Failed to parse config file")
}

pub fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = match cli.config {
        Some(ref path) => read_config_file(path)?,
        None if Path::new(DEFAULT_CONFIG_PATH).exists() => {
            read_config_file(Path::new(DEFAULT_CONFIG_PATH))?
        }
        None => Config::default(),
    };

    // Apply environment / CLI overrides
    if let Some(ref api_url) = cli.api_url {
        config.api_url = api_url.clone();
    }

    if let Some(ref token) = cli.token {
        config.token = Some(token.clone());
    }

    if let Some(history_limit) = cli.history_limit {
        config.history_limit = history_limit;
    }

    if cli.no_follow {
        config.follow = false;
    }

    if cli.no_color {
        config.color = false;
    }

    config.validate().context("Invalid configuration")?;

    Ok(config)
}
