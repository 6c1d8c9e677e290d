use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};

use anyhow::{Context, Result};
use chat_api::UserProfile;
use clap::Parser;
use serde::Deserialize;

/// Command line options for the relay.
#[derive(Parser, Debug, Default)]
#[command(author, version, about)]
pub struct Cli {
    /// Override bind address (host:port).
    #[arg(long)]
    pub bind: Option<String>,
    /// Override server port.
    #[arg(long)]
    pub port: Option<u16>,
    /// Enable or disable logging (true/false).
    #[arg(long)]
    pub logging: Option<bool>,
    /// Path to configuration file.
    #[arg(long)]
    pub config: Option<PathBuf>,
}

/// Relay settings after merging CLI, environment, file and defaults.
#[derive(Clone, Debug)]
pub struct Config {
    /// host:port for the HTTP and websocket listener.
    pub bind: String,
    pub logging_enabled: bool,
    /// Grace period before a peer whose last connection closed is reported offline.
    pub presence_debounce: Duration,
    /// Directory entries known before anyone connects.
    pub users: Vec<UserProfile>,
}

const DEFAULT_PORT: u16 = 8000;
const DEFAULT_DEBOUNCE_MS: u64 = 1000;
const DEFAULT_CONFIG_PATH: &str = "config/chat_relay.toml";

/// `chat_relay.toml`; every key is optional.
#[derive(Deserialize, Default)]
#[serde(default)]
struct FileConfig {
    server: FileServer,
    logging: FileLogging,
    presence: FilePresence,
    users: Vec<UserProfile>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct FileServer {
    port: Option<u16>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct FileLogging {
    enabled: Option<bool>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct FilePresence {
    debounce_ms: Option<u64>,
}

impl FileConfig {
    /// A missing file yields defaults; a malformed one is an error.
    fn read(path: &Path) -> Result<Self> {
        match fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents)
                .with_context(|| format!("invalid config file {}", path.display())),
            Err(_) => Ok(Self::default()),
        }
    }
}

fn env_value<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok()?.parse().ok()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: format!("127.0.0.1:{DEFAULT_PORT}"),
            logging_enabled: true,
            presence_debounce: Duration::from_millis(DEFAULT_DEBOUNCE_MS),
            users: Vec::new(),
        }
    }
}

impl Config {
    /// Each setting takes the first of CLI, `CHAT_RELAY_*` env, file, default.
    pub fn load(cli: &Cli) -> Result<Self> {
        let path = cli
            .config
            .clone()
            .or_else(|| env_value("CHAT_RELAY_CONFIG"))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
        let file = FileConfig::read(&path)?;

        let port = cli
            .port
            .or_else(|| env_value("CHAT_RELAY_PORT"))
            .or(file.server.port)
            .unwrap_or(DEFAULT_PORT);
        if port < 1024 {
            anyhow::bail!("invalid_port");
        }
        let logging_enabled = cli
            .logging
            .or_else(|| env_value("CHAT_RELAY_LOGGING"))
            .or(file.logging.enabled)
            .unwrap_or(true);
        let debounce_ms = env_value("CHAT_RELAY_DEBOUNCE_MS")
            .or(file.presence.debounce_ms)
            .unwrap_or(DEFAULT_DEBOUNCE_MS);
        if file.users.iter().any(|u| u.peer_id.as_str().trim().is_empty()) {
            anyhow::bail!("invalid_user_id");
        }
        // an explicit bind wins over the port alone
        let bind = cli
            .bind
            .clone()
            .or_else(|| std::env::var("BIND").ok())
            .unwrap_or_else(|| format!("127.0.0.1:{port}"));

        Ok(Self {
            bind,
            logging_enabled,
            presence_debounce: Duration::from_millis(debounce_ms),
            users: file.users,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::fs;

    fn clear_env() {
        for key in [
            "CHAT_RELAY_CONFIG",
            "CHAT_RELAY_PORT",
            "CHAT_RELAY_LOGGING",
            "CHAT_RELAY_DEBOUNCE_MS",
            "BIND",
        ] {
            std::env::remove_var(key);
        }
    }

    fn load_file(contents: &str) -> Result<Config> {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cfg.toml");
        fs::write(&path, contents).unwrap();
        let cli = Cli {
            config: Some(path),
            ..Default::default()
        };
        Config::load(&cli)
    }

    #[test]
    #[serial]
    fn valid_config_parses() {
        clear_env();
        let cfg = load_file(
            "[server]\nport=5555\n[logging]\nenabled=false\n[presence]\ndebounce_ms=250\n\n[[users]]\nclerkId=\"alice\"\nfullName=\"Alice\"\n",
        )
        .unwrap();
        assert_eq!(cfg.bind, "127.0.0.1:5555");
        assert!(!cfg.logging_enabled);
        assert_eq!(cfg.presence_debounce, Duration::from_millis(250));
        assert_eq!(cfg.users.len(), 1);
        assert_eq!(cfg.users[0].full_name, "Alice");
        assert!(cfg.users[0].image_url.is_none());
    }

    #[test]
    #[serial]
    fn invalid_port_fails() {
        clear_env();
        assert!(load_file("[server]\nport=80\n").is_err());
    }

    #[test]
    #[serial]
    fn missing_keys_defaults() {
        clear_env();
        let cfg = load_file("").unwrap();
        assert_eq!(cfg.bind, "127.0.0.1:8000");
        assert!(cfg.logging_enabled);
        assert_eq!(cfg.presence_debounce, Duration::from_secs(1));
        assert!(cfg.users.is_empty());
    }

    #[test]
    #[serial]
    fn precedence_cli_env_file() {
        clear_env();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cfg.toml");
        fs::write(&path, "[server]\nport=1111\n[presence]\ndebounce_ms=5\n").unwrap();
        std::env::set_var("CHAT_RELAY_PORT", "2222");
        std::env::set_var("CHAT_RELAY_DEBOUNCE_MS", "7");
        let cli = Cli {
            config: Some(path),
            port: Some(3333),
            ..Default::default()
        };
        let cfg = Config::load(&cli).unwrap();
        assert_eq!(cfg.bind, "127.0.0.1:3333");
        assert_eq!(cfg.presence_debounce, Duration::from_millis(7));
        clear_env();
    }

    #[test]
    #[serial]
    fn blank_seeded_user_fails() {
        clear_env();
        assert!(load_file("[[users]]\nclerkId=\" \"\nfullName=\"Nobody\"\n").is_err());
    }

    #[test]
    #[serial]
    fn env_logging_overrides_file() {
        clear_env();
        std::env::set_var("CHAT_RELAY_LOGGING", "false");
        let cfg = load_file("[logging]\nenabled=true\n").unwrap();
        assert!(!cfg.logging_enabled);
        clear_env();
    }

    #[test]
    #[serial]
    fn malformed_file_is_rejected() {
        clear_env();
        assert!(load_file("[server]\nport=\"high\"\n").is_err());
    }
}
