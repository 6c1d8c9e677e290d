use std::{fs, path::PathBuf, time::Duration};

use anyhow::{Context, Result};
use chat_api::PeerId;
use directories::ProjectDirs;
use serde::Deserialize;

use crate::cli::Cli;
use crate::session::{ReconnectPolicy, SessionOptions};

/// Client configuration resolved from file, env and CLI.
#[derive(Clone, Debug)]
pub struct Config {
    /// Base URL of the relay's HTTP API.
    pub server_url: String,
    pub user_id: PeerId,
    pub request_timeout: Duration,
    pub reconnect: ReconnectPolicy,
}

#[derive(Deserialize, Default)]
struct FileConfig {
    #[serde(default)]
    server: FileServer,
    #[serde(default)]
    session: FileSession,
    #[serde(default)]
    reconnect: FileReconnect,
}

#[derive(Deserialize)]
struct FileServer {
    #[serde(default = "default_server_url")]
    url: String,
}

#[derive(Deserialize, Default)]
struct FileSession {
    #[serde(default)]
    user_id: Option<String>,
    #[serde(default)]
    request_timeout_secs: Option<u64>,
}

#[derive(Deserialize, Default)]
struct FileReconnect {
    #[serde(default)]
    max_attempts: u32,
    #[serde(default)]
    initial_backoff_ms: Option<u64>,
    #[serde(default)]
    max_backoff_ms: Option<u64>,
}

fn default_server_url() -> String {
    "http://127.0.0.1:8000".into()
}

fn default_timeout_secs() -> u64 {
    10
}

impl Default for FileServer {
    fn default() -> Self {
        Self {
            url: default_server_url(),
        }
    }
}

impl Config {
    /// Resolve configuration from CLI, environment variables, config file and defaults.
    pub fn load(cli: &Cli) -> Result<Self> {
        let mut server_url = default_server_url();
        let mut user_id: Option<String> = None;
        let mut timeout_secs = default_timeout_secs();
        let mut reconnect = ReconnectPolicy::never();

        // config file path precedence: CLI -> ENV -> default
        let config_path = cli
            .config
            .clone()
            .or_else(|| std::env::var("CHATCORE_CONFIG").ok().map(PathBuf::from))
            .unwrap_or_else(default_config_path);

        if let Ok(bytes) = fs::read(&config_path) {
            let contents = String::from_utf8_lossy(&bytes);
            let file_cfg: FileConfig = toml::from_str(&contents).context("invalid config file")?;
            server_url = file_cfg.server.url;
            user_id = file_cfg.session.user_id;
            if let Some(t) = file_cfg.session.request_timeout_secs {
                timeout_secs = t;
            }
            reconnect.max_attempts = file_cfg.reconnect.max_attempts;
            if let Some(ms) = file_cfg.reconnect.initial_backoff_ms {
                reconnect.initial_backoff = Duration::from_millis(ms);
            }
            if let Some(ms) = file_cfg.reconnect.max_backoff_ms {
                reconnect.max_backoff = Duration::from_millis(ms);
            }
        }

        // environment overrides
        if let Ok(url) = std::env::var("CHATCORE_SERVER") {
            server_url = url;
        }
        if let Ok(id) = std::env::var("CHATCORE_USER") {
            user_id = Some(id);
        }
        if let Ok(t) = std::env::var("CHATCORE_TIMEOUT_SECS") {
            if let Ok(t) = t.parse::<u64>() {
                timeout_secs = t;
            }
        }

        // CLI overrides
        if let Some(url) = &cli.server {
            server_url = url.clone();
        }
        if let Some(id) = &cli.user {
            user_id = Some(id.clone());
        }
        if let Some(t) = cli.timeout_secs {
            timeout_secs = t;
        }

        let user_id = user_id
            .filter(|id| !id.trim().is_empty())
            .context("missing_user_id")?;
        if timeout_secs == 0 {
            anyhow::bail!("invalid_timeout");
        }
        if !(server_url.starts_with("http://") || server_url.starts_with("https://")) {
            anyhow::bail!("invalid_server_url");
        }

        Ok(Self {
            server_url: server_url.trim_end_matches('/').to_string(),
            user_id: PeerId::new(user_id),
            request_timeout: Duration::from_secs(timeout_secs),
            reconnect,
        })
    }

    /// Websocket endpoint of the relay's presence channel.
    pub fn ws_url(&self) -> String {
        let base = if let Some(rest) = self.server_url.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = self.server_url.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            self.server_url.clone()
        };
        format!("{base}/ws/chat")
    }

    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            request_timeout: self.request_timeout,
            reconnect: self.reconnect,
        }
    }
}

/// Default location of the client config file.
pub fn default_config_path() -> PathBuf {
    ProjectDirs::from("org", "chatcore", "chatcore")
        .map(|dirs| dirs.config_dir().join("chatcore.toml"))
        .unwrap_or_else(|| PathBuf::from("config/chatcore.toml"))
}
