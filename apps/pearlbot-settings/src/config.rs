use std::env;
use std::net::SocketAddr;

use thiserror::Error;

const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8002";
const DEFAULT_LOG_FILTER: &str = "info";
const DEFAULT_ADMIN_API_VERSION: &str = shopify_admin_client::DEFAULT_API_VERSION;
const DEFAULT_USE_ONLINE_TOKENS: bool = false;
const DEFAULT_CALLBACK_TIMEOUT_MS: u64 =
    pearlbot_client_core::callback::DEFAULT_CALLBACK_TIMEOUT_MS;
const DEFAULT_SESSION_TOKEN_LEEWAY_SECONDS: u64 = 5;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl LogFormat {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "text" | "pretty" => Some(Self::Text),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: SocketAddr,
    pub log_filter: String,
    pub log_format: LogFormat,
    pub shopify_api_key: String,
    pub shopify_api_secret: String,
    pub shopify_app_url: Option<String>,
    pub shopify_admin_api_version: String,
    pub shopify_use_online_tokens: bool,
    pub shopify_admin_base_url: Option<String>,
    pub shopify_pearlbot_id: Option<String>,
    pub pearlbot_base_url: String,
    pub pearlbot_api_url: String,
    pub pearlbot_callback_timeout_ms: u64,
    pub session_token_leeway_seconds: u64,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid PEARLBOT_BIND_ADDR value '{value}': {source}")]
    InvalidBindAddr {
        value: String,
        source: std::net::AddrParseError,
    },
    #[error("missing required environment variable {name}")]
    MissingRequired { name: &'static str },
    #[error("invalid {name} value '{value}': expected a non-negative integer")]
    InvalidNumber { name: &'static str, value: String },
    #[error("invalid {name} value '{value}': expected true or false")]
    InvalidBool { name: &'static str, value: String },
    #[error("invalid PEARLBOT_LOG_FORMAT value '{value}': expected text or json")]
    InvalidLogFormat { value: String },
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Reads configuration through `lookup`, which returns the raw value of a
    /// variable if set. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        let bind_addr_raw =
            read("PEARLBOT_BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string());
        let bind_addr = bind_addr_raw
            .trim()
            .parse()
            .map_err(|source| ConfigError::InvalidBindAddr {
                value: bind_addr_raw.clone(),
                source,
            })?;

        let log_filter =
            read("PEARLBOT_LOG_FILTER").unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string());

        let log_format = match read("PEARLBOT_LOG_FORMAT") {
            Some(value) => {
                LogFormat::parse(&value).ok_or(ConfigError::InvalidLogFormat { value })?
            }
            None => LogFormat::default(),
        };

        let shopify_api_key = read("SHOPIFY_API_KEY")
            .map(|value| value.trim().to_string())
            .ok_or(ConfigError::MissingRequired {
                name: "SHOPIFY_API_KEY",
            })?;
        let shopify_api_secret = read("SHOPIFY_API_SECRET").ok_or(ConfigError::MissingRequired {
            name: "SHOPIFY_API_SECRET",
        })?;

        let shopify_app_url = resolve_app_url(read("SHOPIFY_APP_URL"), read("HOST"));

        let shopify_admin_api_version = read("SHOPIFY_ADMIN_API_VERSION")
            .map(|value| value.trim().to_string())
            .unwrap_or_else(|| DEFAULT_ADMIN_API_VERSION.to_string());

        let shopify_use_online_tokens = match read("SHOPIFY_USE_ONLINE_TOKENS") {
            Some(value) => parse_bool("SHOPIFY_USE_ONLINE_TOKENS", &value)?,
            None => DEFAULT_USE_ONLINE_TOKENS,
        };

        let shopify_admin_base_url =
            read("SHOPIFY_ADMIN_BASE_URL").map(|value| value.trim().to_string());
        let shopify_pearlbot_id =
            read("SHOPIFY_PEARLBOT_ID").map(|value| value.trim().to_string());

        let pearlbot_base_url = read("PEARLBOT_BASE_URL")
            .map(|value| value.trim().to_string())
            .unwrap_or_default();
        let pearlbot_api_url = read("PEARLBOT_API_URL")
            .map(|value| value.trim().to_string())
            .unwrap_or_default();

        let pearlbot_callback_timeout_ms = match read("PEARLBOT_CALLBACK_TIMEOUT_MS") {
            Some(value) => parse_u64("PEARLBOT_CALLBACK_TIMEOUT_MS", &value)?,
            None => DEFAULT_CALLBACK_TIMEOUT_MS,
        };

        let session_token_leeway_seconds = match read("SHOPIFY_SESSION_TOKEN_LEEWAY_SECONDS") {
            Some(value) => parse_u64("SHOPIFY_SESSION_TOKEN_LEEWAY_SECONDS", &value)?,
            None => DEFAULT_SESSION_TOKEN_LEEWAY_SECONDS,
        };

        Ok(Self {
            bind_addr,
            log_filter,
            log_format,
            shopify_api_key,
            shopify_api_secret,
            shopify_app_url,
            shopify_admin_api_version,
            shopify_use_online_tokens,
            shopify_admin_base_url,
            shopify_pearlbot_id,
            pearlbot_base_url,
            pearlbot_api_url,
            pearlbot_callback_timeout_ms,
            session_token_leeway_seconds,
        })
    }

    pub fn for_tests() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            log_filter: "debug".to_string(),
            log_format: LogFormat::Text,
            shopify_api_key: "pearlbot-test-client-id".to_string(),
            shopify_api_secret: "pearlbot-test-client-secret".to_string(),
            shopify_app_url: Some("https://pearlbot-settings.test".to_string()),
            shopify_admin_api_version: DEFAULT_ADMIN_API_VERSION.to_string(),
            shopify_use_online_tokens: false,
            shopify_admin_base_url: None,
            shopify_pearlbot_id: Some("0f3c6a1e-pearlbot-embed".to_string()),
            pearlbot_base_url: "https://app.pearlbot.test".to_string(),
            pearlbot_api_url: "https://api.pearlbot.test".to_string(),
            pearlbot_callback_timeout_ms: 2_000,
            session_token_leeway_seconds: DEFAULT_SESSION_TOKEN_LEEWAY_SECONDS,
        }
    }
}

// HOST is what the Shopify CLI tunnel exports; it wins when the app URL is
// unset or already points at the same place.
fn resolve_app_url(app_url: Option<String>, host: Option<String>) -> Option<String> {
    let app_url = app_url.map(|value| value.trim().trim_end_matches('/').to_string());
    let host = host.map(|value| value.trim().trim_end_matches('/').to_string());
    match (app_url, host) {
        (None, Some(host)) => Some(host),
        (Some(app_url), Some(host)) if app_url == host => Some(host),
        (app_url, _) => app_url,
    }
}

fn parse_bool(name: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidBool {
            name,
            value: value.to_string(),
        }),
    }
}

fn parse_u64(name: &'static str, value: &str) -> Result<u64, ConfigError> {
    value
        .trim()
        .parse::<u64>()
        .map_err(|_| ConfigError::InvalidNumber {
            name,
            value: value.to_string(),
        })
}
