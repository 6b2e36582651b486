//! Messaging configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the core can run with zero
//! configuration against in-memory collaborators.

use std::path::PathBuf;
use std::time::Duration;

use tandem_shared::constants::MAX_PLAINTEXT_BYTES;

/// Messaging configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessagingConfig {
    /// Base URL of the REST backend hosting the key directory.
    /// Env: `TANDEM_DIRECTORY_URL`
    /// Default: unset (no HTTP directory).
    pub directory_url: Option<String>,

    /// API key sent as `apikey` and bearer token to the directory.
    /// Env: `TANDEM_DIRECTORY_API_KEY`
    pub directory_api_key: Option<String>,

    /// Table (or view) holding `id` and `public_key` columns.
    /// Env: `TANDEM_DIRECTORY_TABLE`
    /// Default: `profiles`
    pub directory_table: String,

    /// Timeout for a single directory request.
    /// Env: `TANDEM_HTTP_TIMEOUT_SECS`
    /// Default: `15`
    pub request_timeout: Duration,

    /// Directory for the local SQLite database.
    /// Env: `TANDEM_DATA_DIR`
    /// Default: unset (platform data directory).
    pub data_dir: Option<PathBuf>,

    /// Largest plaintext accepted by `send`, capped at 64 KiB.
    /// Env: `TANDEM_MAX_MESSAGE_BYTES`
    pub max_message_bytes: usize,
}

impl Default for MessagingConfig {
    fn default() -> Self {
        Self {
            directory_url: None,
            directory_api_key: None,
            directory_table: "profiles".to_string(),
            request_timeout: Duration::from_secs(15),
            data_dir: None,
            max_message_bytes: MAX_PLAINTEXT_BYTES,
        }
    }
}

impl MessagingConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(url) = lookup("TANDEM_DIRECTORY_URL") {
            let url = url.trim().trim_end_matches('/').to_string();
            if url.starts_with("http://") || url.starts_with("https://") {
                config.directory_url = Some(url);
            } else if !url.is_empty() {
                tracing::warn!(value = %url, "Invalid TANDEM_DIRECTORY_URL, ignoring");
            }
        }

        if let Some(key) = lookup("TANDEM_DIRECTORY_API_KEY") {
            if !key.is_empty() {
                config.directory_api_key = Some(key);
            }
        }

        if let Some(table) = lookup("TANDEM_DIRECTORY_TABLE") {
            if !table.trim().is_empty() {
                config.directory_table = table.trim().to_string();
            }
        }

        if let Some(val) = lookup("TANDEM_HTTP_TIMEOUT_SECS") {
            match val.parse::<u64>() {
                Ok(secs) if secs > 0 => config.request_timeout = Duration::from_secs(secs),
                _ => tracing::warn!(value = %val, "Invalid TANDEM_HTTP_TIMEOUT_SECS, using default"),
            }
        }

        if let Some(dir) = lookup("TANDEM_DATA_DIR") {
            if !dir.is_empty() {
                config.data_dir = Some(PathBuf::from(dir));
            }
        }

        if let Some(val) = lookup("TANDEM_MAX_MESSAGE_BYTES") {
            match val.parse::<usize>() {
                Ok(n) if n > 0 => config.max_message_bytes = n.min(MAX_PLAINTEXT_BYTES),
                _ => tracing::warn!(value = %val, "Invalid TANDEM_MAX_MESSAGE_BYTES, using default"),
            }
        }

        config
    }
}
