//! Configuration management for mailsort

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// General settings
    #[serde(default)]
    pub general: GeneralConfig,

    /// Mailbox settings
    #[serde(default)]
    pub mail: MailConfig,

    /// Vector index settings
    #[serde(default)]
    pub index: IndexConfig,

    /// Embedding service settings
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Classification / answering model settings
    #[serde(default)]
    pub llm: LlmConfig,
}

/// General application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Log level (debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Optional log file; when set, logs are also written to a daily rolling file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_file: Option<PathBuf>,

    /// Data directory path
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_file: None,
            data_dir: default_data_dir(),
        }
    }
}

/// IMAP mailbox settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailConfig {
    /// IMAP server host
    #[serde(default = "default_imap_host")]
    pub host: String,

    /// IMAP server port (implicit TLS)
    #[serde(default = "default_imap_port")]
    pub port: u16,

    /// Login user name; also used as the From address of drafts
    #[serde(default)]
    pub username: String,

    /// Environment variable holding the IMAP password
    #[serde(default = "default_password_env")]
    pub password_env: String,

    /// Mailbox that is searched for mail
    #[serde(default = "default_mailbox")]
    pub mailbox: String,

    /// Folder drafts are appended to (e.g. "[Gmail]/Drafts" on Gmail)
    #[serde(default = "default_drafts_folder")]
    pub drafts_folder: String,

    /// Authentication timeout in milliseconds
    #[serde(default = "default_auth_timeout_ms")]
    pub auth_timeout_ms: u64,

    /// Messages fetched per UID FETCH round-trip when reading the whole mailbox
    #[serde(default = "default_fetch_batch_size")]
    pub fetch_batch_size: usize,

    /// Global rate limit for IMAP round-trips (requests per second)
    #[serde(default = "default_rate_limit")]
    pub rate_limit_per_second: u32,
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            host: default_imap_host(),
            port: default_imap_port(),
            username: String::new(),
            password_env: default_password_env(),
            mailbox: default_mailbox(),
            drafts_folder: default_drafts_folder(),
            auth_timeout_ms: default_auth_timeout_ms(),
            fetch_batch_size: default_fetch_batch_size(),
            rate_limit_per_second: default_rate_limit(),
        }
    }
}

/// Vector index settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Index (table) name
    #[serde(default = "default_index_name")]
    pub name: String,

    /// Days since the last indexing run; the watermark lookback is this plus one day
    #[serde(default = "default_days_last_run")]
    pub days_last_run: u32,

    /// Maximum chunk size in characters
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// LanceDB URI (defaults to `<data_dir>/lancedb`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            name: default_index_name(),
            days_last_run: default_days_last_run(),
            chunk_size: default_chunk_size(),
            uri: None,
        }
    }
}

/// Embedding service settings (OpenAI-compatible `/embeddings`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    #[serde(default = "default_openai_base_url")]
    pub base_url: String,

    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Environment variable holding the API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Request timeout in milliseconds
    #[serde(default = "default_request_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            base_url: default_openai_base_url(),
            model: default_embedding_model(),
            api_key_env: default_api_key_env(),
            timeout_ms: default_request_timeout_ms(),
        }
    }
}

/// Chat model settings (OpenAI-compatible `/chat/completions`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_openai_base_url")]
    pub base_url: String,

    #[serde(default = "default_chat_model")]
    pub model: String,

    /// Environment variable holding the API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Request timeout in milliseconds
    #[serde(default = "default_request_timeout_ms")]
    pub timeout_ms: u64,

    /// Business the classification and answering prompts speak for
    #[serde(default = "default_organization")]
    pub organization: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_openai_base_url(),
            model: default_chat_model(),
            api_key_env: default_api_key_env(),
            timeout_ms: default_request_timeout_ms(),
            organization: default_organization(),
        }
    }
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_data_dir() -> PathBuf {
    get_data_dir()
}

fn default_imap_host() -> String {
    "imap.mail.yahoo.com".to_string()
}

fn default_imap_port() -> u16 {
    993
}

fn default_password_env() -> String {
    "MAILSORT_IMAP_PASSWORD".to_string()
}

fn default_mailbox() -> String {
    "INBOX".to_string()
}

fn default_drafts_folder() -> String {
    "Drafts".to_string()
}

fn default_auth_timeout_ms() -> u64 {
    3000
}

fn default_fetch_batch_size() -> usize {
    50
}

fn default_rate_limit() -> u32 {
    10
}

fn default_index_name() -> String {
    "emails".to_string()
}

fn default_days_last_run() -> u32 {
    1
}

fn default_chunk_size() -> usize {
    1000
}

fn default_openai_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}

fn default_chat_model() -> String {
    "gpt-4".to_string()
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_request_timeout_ms() -> u64 {
    30000
}

fn default_organization() -> String {
    "TrustedParts.com".to_string()
}

/// Get the data directory (XDG: ~/.local/share/mailsort)
fn get_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".local")
        .join("share")
        .join(crate::APP_NAME)
}

/// Get the config directory (XDG: ~/.config/mailsort)
fn get_config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join(crate::APP_NAME)
}

impl Config {
    /// Default config file location
    pub fn default_path() -> PathBuf {
        get_config_dir().join("config.toml")
    }

    /// Load configuration from a specific path, then apply environment overrides
    pub fn load_from(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            toml::from_str(&contents)?
        } else {
            Config::default()
        };

        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Apply `IMAP_*` / `OPENAI_MODEL` overrides from the given lookup
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("IMAP_HOST") {
            self.mail.host = host;
        }
        if let Some(port) = lookup("IMAP_PORT") {
            self.mail.port = port.trim().parse().map_err(|_| Error::InvalidConfig {
                field: "IMAP_PORT".to_string(),
                reason: format!("'{}' is not a valid port", port),
            })?;
        }
        if let Some(username) = lookup("IMAP_USERNAME") {
            self.mail.username = username;
        }
        if let Some(model) = lookup("OPENAI_MODEL") {
            self.llm.model = model;
        }
        Ok(())
    }

    /// Check the settings the pipelines cannot run without
    pub fn validate(&self) -> Result<()> {
        if self.mail.username.trim().is_empty() {
            return Err(Error::InvalidConfig {
                field: "mail.username".to_string(),
                reason: "must not be empty".to_string(),
            });
        }
        if self.index.name.trim().is_empty() {
            return Err(Error::InvalidConfig {
                field: "index.name".to_string(),
                reason: "must not be empty".to_string(),
            });
        }
        if self.index.chunk_size == 0 {
            return Err(Error::InvalidConfig {
                field: "index.chunk_size".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }

    /// Render the configuration as TOML
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))
    }

    /// Get the LanceDB URI
    pub fn lancedb_uri(&self) -> String {
        match &self.index.uri {
            Some(uri) => uri.clone(),
            None => self
                .general
                .data_dir
                .join("lancedb")
                .to_string_lossy()
                .into_owned(),
        }
    }
}

/// Read a secret from the environment variable named by a config field
pub fn secret_from_env(field: &str, env_name: &str) -> Result<String> {
    match std::env::var(env_name) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(Error::InvalidConfig {
            field: field.to_string(),
            reason: format!("environment variable {} is missing or empty", env_name),
        }),
    }
}
