use serde::Deserialize;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid TOML at line {line}, column {column}: {message}")]
    InvalidToml {
        line: usize,
        column: usize,
        message: String,
    },

    #[error("invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}

/// Static wiring for the sync layer, normally parsed from the embedding
/// application's settings file. Every field has a default so a partial
/// (or empty) document is valid.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub feed: FeedSettings,
    #[serde(default)]
    pub sync: SyncSettings,
    #[serde(default)]
    pub router: RouterSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_api_base_url")]
    pub base_url: String,

    /// Static application key sent on REST calls and the feed handshake.
    #[serde(default)]
    pub key: String,

    #[serde(default = "default_request_timeout_seconds")]
    pub request_timeout_seconds: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_api_base_url(),
            key: String::new(),
            request_timeout_seconds: default_request_timeout_seconds(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeedSettings {
    #[serde(default = "default_feed_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_max_connect_attempts")]
    pub max_connect_attempts: u32,

    #[serde(default = "default_retry_delay_seconds")]
    pub retry_delay_seconds: u64,

    #[serde(default = "default_connect_timeout_seconds")]
    pub connect_timeout_seconds: u64,
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            endpoint: default_feed_endpoint(),
            max_connect_attempts: default_max_connect_attempts(),
            retry_delay_seconds: default_retry_delay_seconds(),
            connect_timeout_seconds: default_connect_timeout_seconds(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SyncSettings {
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RouterSettings {
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

impl Default for RouterSettings {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
        }
    }
}

fn default_api_base_url() -> String {
    "https://api.rookery.app".to_string()
}

fn default_request_timeout_seconds() -> u64 {
    30
}

fn default_feed_endpoint() -> String {
    "wss://feed.rookery.app/socket".to_string()
}

fn default_max_connect_attempts() -> u32 {
    5
}

fn default_retry_delay_seconds() -> u64 {
    5
}

fn default_connect_timeout_seconds() -> u64 {
    30
}

fn default_page_size() -> u32 {
    25
}

fn default_channel_capacity() -> usize {
    1024
}

impl Config {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(toml_str: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(toml_str).map_err(|e| {
            let (line, column) = e.span().map_or((0, 0), |span| {
                let before = &toml_str[..span.start];
                let line = before.chars().filter(|&c| c == '\n').count() + 1;
                let column = before
                    .rfind('\n')
                    .map_or(span.start + 1, |nl| span.start - nl);
                (line, column)
            });
            ConfigError::InvalidToml {
                line,
                column,
                message: e.message().to_string(),
            }
        })?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.api.base_url.starts_with("http://") && !self.api.base_url.starts_with("https://") {
            return Err(ConfigError::InvalidValue {
                field: "api.base_url".to_string(),
                message: "must be an http:// or https:// URL".to_string(),
            });
        }

        if !self.feed.endpoint.starts_with("ws://") && !self.feed.endpoint.starts_with("wss://") {
            return Err(ConfigError::InvalidValue {
                field: "feed.endpoint".to_string(),
                message: "must be a ws:// or wss:// URL".to_string(),
            });
        }

        if self.sync.page_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "sync.page_size".to_string(),
                message: "must be at least 1".to_string(),
            });
        }

        if self.feed.max_connect_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                field: "feed.max_connect_attempts".to_string(),
                message: "must be at least 1".to_string(),
            });
        }

        Ok(())
    }
}
