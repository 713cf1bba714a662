use anyhow::{Context, Result};
use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

pub const DEFAULT_CONFIG_PATH: &str = "/etc/vidfetch-env";
pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 8000;
pub const DEFAULT_STATIC_DIR: &str = "static";
pub const DEFAULT_API_PREFIX: &str = "/api";
pub const DEFAULT_YTDLP_PATH: &str = "yt-dlp";
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (iPhone; CPU iPhone OS 17_5 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.5 Mobile/15E148 Safari/604.1";
pub const DEFAULT_PLAYER_CLIENTS: &[&str] = &["ios", "android", "web"];
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 15;
pub const DEFAULT_MAX_IMAGE_BYTES: u64 = 10 * 1024 * 1024;

/// Values read from the `KEY=VALUE` config file. Everything is optional; gaps
/// are filled from the defaults above by [`Settings::apply`].
#[derive(Debug, Clone, Default)]
pub struct EnvConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub static_dir: Option<PathBuf>,
    pub api_prefix: Option<String>,
    pub ytdlp_path: Option<PathBuf>,
    pub user_agent: Option<String>,
    pub player_clients: Option<Vec<String>>,
    pub connect_timeout_secs: Option<u64>,
    pub max_image_bytes: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub host: String,
    pub port: u16,
    pub static_dir: PathBuf,
    pub api_prefix: String,
    pub ytdlp_path: PathBuf,
    pub user_agent: String,
    pub player_clients: Vec<String>,
    pub connect_timeout: Duration,
    pub max_image_bytes: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            static_dir: PathBuf::from(DEFAULT_STATIC_DIR),
            api_prefix: DEFAULT_API_PREFIX.to_string(),
            ytdlp_path: PathBuf::from(DEFAULT_YTDLP_PATH),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            player_clients: DEFAULT_PLAYER_CLIENTS
                .iter()
                .map(|client| client.to_string())
                .collect(),
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            max_image_bytes: DEFAULT_MAX_IMAGE_BYTES,
        }
    }
}

impl Settings {
    pub fn apply(mut self, cfg: EnvConfig) -> Self {
        if let Some(host) = cfg.host {
            self.host = host;
        }
        if let Some(port) = cfg.port {
            self.port = port;
        }
        if let Some(static_dir) = cfg.static_dir {
            self.static_dir = static_dir;
        }
        if let Some(prefix) = cfg.api_prefix {
            self.api_prefix = normalize_prefix(&prefix);
        }
        if let Some(path) = cfg.ytdlp_path {
            self.ytdlp_path = path;
        }
        if let Some(user_agent) = cfg.user_agent {
            self.user_agent = user_agent;
        }
        if let Some(clients) = cfg.player_clients {
            self.player_clients = clients;
        }
        if let Some(secs) = cfg.connect_timeout_secs {
            self.connect_timeout = Duration::from_secs(secs);
        }
        if let Some(max) = cfg.max_image_bytes {
            self.max_image_bytes = max;
        }
        self
    }
}

/// Turns `api`, `/api/` and `/api` into `/api`; `/` and the empty string mean
/// "mount at the root".
pub fn normalize_prefix(raw: &str) -> String {
    let trimmed = raw.trim().trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("/{trimmed}")
    }
}

pub fn read_env_config(path: &Path) -> Result<Option<EnvConfig>> {
    if !path.exists() {
        return Ok(None);
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("Reading {}", path.display()))?;
    let mut cfg = EnvConfig::default();
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let Some((key, value_raw)) = trimmed.split_once('=') else {
            continue;
        };
        let value = value_raw.trim().trim_matches('"');
        if value.is_empty() {
            continue;
        }
        match key.trim() {
            "VIDFETCH_HOST" => cfg.host = Some(value.to_string()),
            "VIDFETCH_PORT" => {
                let port: u16 = value
                    .parse()
                    .with_context(|| format!("Parsing VIDFETCH_PORT from {}", path.display()))?;
                cfg.port = Some(port);
            }
            "STATIC_DIR" => cfg.static_dir = Some(PathBuf::from(value)),
            "API_PREFIX" => cfg.api_prefix = Some(value.to_string()),
            "YTDLP_PATH" => cfg.ytdlp_path = Some(PathBuf::from(value)),
            "USER_AGENT" => cfg.user_agent = Some(value.to_string()),
            "PLAYER_CLIENTS" => {
                let clients: Vec<String> = value
                    .split(',')
                    .map(str::trim)
                    .filter(|client| !client.is_empty())
                    .map(str::to_string)
                    .collect();
                cfg.player_clients = Some(clients);
            }
            "CONNECT_TIMEOUT_SECS" => {
                let secs: u64 = value.parse().with_context(|| {
                    format!("Parsing CONNECT_TIMEOUT_SECS from {}", path.display())
                })?;
                cfg.connect_timeout_secs = Some(secs);
            }
            "MAX_IMAGE_BYTES" => {
                let max: u64 = value
                    .parse()
                    .with_context(|| format!("Parsing MAX_IMAGE_BYTES from {}", path.display()))?;
                cfg.max_image_bytes = Some(max);
            }
            _ => {}
        }
    }
    Ok(Some(cfg))
}

/// The config file is optional; defaults apply when it is absent.
pub fn load_settings_from(path: impl AsRef<Path>) -> Result<Settings> {
    let path = path.as_ref();
    let settings = Settings::default();
    Ok(match read_env_config(path)? {
        Some(cfg) => settings.apply(cfg),
        None => settings,
    })
}
