//! Environment-sourced runtime configuration.
//!
//! All settings are resolved once at startup by [`Config::from_env`] and are
//! read-only afterwards. A `.env` file in the working directory is honored
//! when the binary calls `dotenvy::dotenv()` before loading.

use anyhow::{bail, Context, Result};
use std::time::Duration;

/// How the client authenticates against the API endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    /// Static key sent in the `api-key` header.
    ApiKey,
    /// Refreshable token sent as `Authorization: Bearer`.
    BearerToken,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub api_base: String,
    pub auth_mode: AuthMode,
    pub api_key: Option<String>,
    /// External command that prints a fresh bearer token (bearer mode only).
    pub token_command: Option<String>,
    pub api_version: String,
    pub chat_deployment: String,
    pub embeddings_deployment: Option<String>,
    pub system_message: String,
    pub temperature: f32,
    pub max_retries: u32,
    pub backoff_base_secs: f64,
    pub token_refresh_secs: u64,
    pub timeout_secs: u64,
    pub max_upload_mb: usize,
    pub max_files: usize,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub embeddings_batch_size: usize,
    pub debug: bool,
}

fn default_system_message() -> String {
    "You are a helpful assistant.".to_string()
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env_opt(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("Invalid value for {}: '{}'", key, raw)),
        None => Ok(default),
    }
}

fn env_bool(key: &str, default: bool) -> bool {
    match env_opt(key) {
        Some(raw) => matches!(raw.trim().to_lowercase().as_str(), "true" | "1" | "t"),
        None => default,
    }
}

impl Config {
    /// Resolve the full configuration from the process environment.
    ///
    /// Fails on a missing endpoint, a malformed numeric value, or a
    /// combination that cannot work (e.g. overlap >= chunk size).
    pub fn from_env() -> Result<Config> {
        let api_base = env_opt("GCHAT_API_BASE")
            .context("GCHAT_API_BASE must be set to the API endpoint base URL")?;

        let auth_mode = match env_opt("GCHAT_AUTH_MODE").as_deref() {
            None | Some("api_key") => AuthMode::ApiKey,
            Some("bearer_token") => AuthMode::BearerToken,
            Some(other) => bail!(
                "Unknown GCHAT_AUTH_MODE: '{}'. Must be api_key or bearer_token.",
                other
            ),
        };

        let config = Config {
            api_base: api_base.trim_end_matches('/').to_string(),
            auth_mode,
            api_key: env_opt("GCHAT_API_KEY"),
            token_command: env_opt("GCHAT_TOKEN_COMMAND"),
            api_version: env_opt("GCHAT_API_VERSION")
                .unwrap_or_else(|| "2023-12-01-preview".to_string()),
            chat_deployment: env_opt("GCHAT_CHAT_DEPLOYMENT")
                .context("GCHAT_CHAT_DEPLOYMENT must name the chat model deployment")?,
            embeddings_deployment: env_opt("GCHAT_EMBEDDINGS_DEPLOYMENT"),
            system_message: env_opt("GCHAT_SYSTEM_MESSAGE").unwrap_or_else(default_system_message),
            temperature: env_parse("GCHAT_TEMPERATURE", 0.9f32)?,
            max_retries: env_parse("GCHAT_MAX_RETRIES", 5u32)?,
            backoff_base_secs: env_parse("GCHAT_BACKOFF_BASE_SECS", 1.0f64)?,
            token_refresh_secs: env_parse("GCHAT_TOKEN_REFRESH_SECS", 1800u64)?,
            timeout_secs: env_parse("GCHAT_TIMEOUT_SECS", 30u64)?,
            max_upload_mb: env_parse("GCHAT_MAX_UPLOAD_MB", 100usize)?,
            max_files: env_parse("GCHAT_MAX_FILES", 10usize)?,
            chunk_size: env_parse("GCHAT_CHUNK_SIZE", 1000usize)?,
            chunk_overlap: env_parse("GCHAT_CHUNK_OVERLAP", 10usize)?,
            embeddings_batch_size: env_parse("GCHAT_EMBEDDINGS_BATCH_SIZE", 16usize)?,
            debug: env_bool("GCHAT_DEBUG", false),
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            bail!("GCHAT_CHUNK_SIZE must be > 0");
        }
        if self.chunk_overlap >= self.chunk_size {
            bail!(
                "GCHAT_CHUNK_OVERLAP ({}) must be smaller than GCHAT_CHUNK_SIZE ({})",
                self.chunk_overlap,
                self.chunk_size
            );
        }
        if self.max_retries == 0 {
            bail!("GCHAT_MAX_RETRIES must be >= 1");
        }
        if self.embeddings_batch_size == 0 {
            bail!("GCHAT_EMBEDDINGS_BATCH_SIZE must be > 0");
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            bail!("GCHAT_TEMPERATURE must be in [0.0, 2.0]");
        }
        if self.auth_mode == AuthMode::ApiKey && self.api_key.is_none() {
            bail!("GCHAT_API_KEY must be set when GCHAT_AUTH_MODE is api_key");
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn max_upload_bytes(&self) -> usize {
        self.max_upload_mb * 1024 * 1024
    }
}
