//! Credential ownership and bearer-token refresh.
//!
//! The [`CredentialProvider`] is the only process-wide shared mutable state:
//! every session reads the current credential from it before each API
//! attempt. Static API keys never change; bearer tokens are re-fetched from
//! a [`TokenSource`] when stale. Refresh is last-writer-wins, which is safe
//! because bearer tokens are idempotent credentials.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tokio::sync::RwLock;

use crate::error::ApiError;

/// Seconds before nominal expiry at which a token is already considered stale.
const EXPIRY_SAFETY_MARGIN_SECS: i64 = 60;

/// The credential attached to a single API attempt.
#[derive(Debug, Clone)]
pub enum Credential {
    ApiKey(String),
    Bearer { token: String },
}

/// A freshly minted bearer token as returned by a [`TokenSource`].
#[derive(Debug, Clone)]
pub struct BearerToken {
    pub token: String,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Opaque supplier of bearer tokens (identity provider, CLI helper, ...).
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn fetch(&self) -> Result<BearerToken, ApiError>;
}

struct CachedToken {
    token: String,
    issued_at: DateTime<Utc>,
    expires_at: Option<DateTime<Utc>>,
}

impl CachedToken {
    fn is_stale(&self, now: DateTime<Utc>, refresh_interval_secs: u64) -> bool {
        if let Some(expires_at) = self.expires_at {
            if now + ChronoDuration::seconds(EXPIRY_SAFETY_MARGIN_SECS) >= expires_at {
                return true;
            }
        }
        now - self.issued_at >= ChronoDuration::seconds(refresh_interval_secs as i64)
    }
}

enum ProviderInner {
    ApiKey(String),
    Bearer {
        source: Box<dyn TokenSource>,
        refresh_interval_secs: u64,
        cached: RwLock<Option<CachedToken>>,
    },
}

/// Owns the process credential; hands out a clone of the current value.
pub struct CredentialProvider {
    inner: ProviderInner,
}

impl CredentialProvider {
    pub fn api_key(key: impl Into<String>) -> Self {
        Self {
            inner: ProviderInner::ApiKey(key.into()),
        }
    }

    pub fn bearer(source: Box<dyn TokenSource>, refresh_interval_secs: u64) -> Self {
        Self {
            inner: ProviderInner::Bearer {
                source,
                refresh_interval_secs,
                cached: RwLock::new(None),
            },
        }
    }

    /// The current credential, refreshing a stale or absent bearer token.
    ///
    /// Concurrent sessions may race to refresh; the last write wins and every
    /// caller still receives a valid token.
    pub async fn current(&self) -> Result<Credential, ApiError> {
        match &self.inner {
            ProviderInner::ApiKey(key) => Ok(Credential::ApiKey(key.clone())),
            ProviderInner::Bearer {
                source,
                refresh_interval_secs,
                cached,
            } => {
                let now = Utc::now();
                {
                    let guard = cached.read().await;
                    if let Some(token) = guard.as_ref() {
                        if !token.is_stale(now, *refresh_interval_secs) {
                            return Ok(Credential::Bearer {
                                token: token.token.clone(),
                            });
                        }
                    }
                }

                let fresh = source.fetch().await?;
                tracing::debug!(expires_at = ?fresh.expires_at, "Refreshed bearer token");
                let credential = Credential::Bearer {
                    token: fresh.token.clone(),
                };
                let mut guard = cached.write().await;
                *guard = Some(CachedToken {
                    token: fresh.token,
                    issued_at: now,
                    expires_at: fresh.expires_at,
                });
                Ok(credential)
            }
        }
    }
}

/// Token source that runs an external command and reads the token from its
/// stdout (first line). Expiry is unknown to the command protocol, so the
/// provider relies on the refresh interval alone.
pub struct CommandTokenSource {
    command: String,
}

impl CommandTokenSource {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

#[async_trait]
impl TokenSource for CommandTokenSource {
    async fn fetch(&self) -> Result<BearerToken, ApiError> {
        let output = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .output()
            .await
            .map_err(|e| ApiError::Auth {
                message: format!("token command failed to start: {}", e),
            })?;

        if !output.status.success() {
            return Err(ApiError::Auth {
                message: format!("token command exited with {}", output.status),
            });
        }

        let token = String::from_utf8_lossy(&output.stdout)
            .lines()
            .next()
            .unwrap_or("")
            .trim()
            .to_string();
        if token.is_empty() {
            return Err(ApiError::Auth {
                message: "token command produced no output".to_string(),
            });
        }

        Ok(BearerToken {
            token,
            expires_at: None,
        })
    }
}
