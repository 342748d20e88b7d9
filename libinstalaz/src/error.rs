//! Error types for Instalaz

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, InstalazError>;

#[derive(Error, Debug)]
pub enum InstalazError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DbError),

    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    #[error("Access token for account {account_id} expired at {expired_at}; reconnect the account")]
    TokenExpired { account_id: i64, expired_at: i64 },

    #[error("Publish error: {0}")]
    Publish(#[from] PublishError),

    #[error("Content source error: {0}")]
    ContentSource(#[from] ContentSourceError),

    #[error("Account {0} is already publishing")]
    AccountBusy(i64),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl InstalazError {
    /// Returns the appropriate exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            InstalazError::InvalidInput(_) => 3,
            InstalazError::Auth(_) => 2,
            InstalazError::TokenExpired { .. } => 2,
            InstalazError::Publish(PublishError::AuthExpired(_)) => 2,
            _ => 1,
        }
    }

    /// Classify this error for the activity log and notifications
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            InstalazError::TokenExpired { .. } => FailureKind::AuthExpired,
            InstalazError::Auth(_) => FailureKind::AuthExpired,
            InstalazError::Publish(e) => e.failure_kind(),
            InstalazError::ContentSource(ContentSourceError::Exhausted(_)) => {
                FailureKind::ContentExhausted
            }
            InstalazError::ContentSource(_) => FailureKind::ContentUnavailable,
            InstalazError::AccountBusy(_) => FailureKind::Busy,
            _ => FailureKind::Other,
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to write file: {0}")]
    WriteError(std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Failed to parse settings: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value: {0}")]
    InvalidValue(String),
}

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database operation failed: {0}")]
    SqlxError(#[from] sqlx::Error),

    #[error("Migration failed: {0}")]
    MigrationError(#[from] sqlx::migrate::MigrateError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

#[derive(Error, Debug, Clone)]
pub enum AuthError {
    #[error("Facebook App ID and App Secret are not configured")]
    AppNotConfigured,

    #[error("OAuth state mismatch: {0}")]
    StateMismatch(String),

    #[error("Authorization code rejected: {0}")]
    CodeRejected(String),

    #[error("No Instagram Business Accounts found. Make sure your Instagram account is a Business or Creator account linked to a Facebook Page.")]
    NoBusinessAccount,

    #[error("Connected Instagram account {got} does not match account {expected}")]
    AccountMismatch { expected: String, got: String },

    #[error("Instagram account {0} is already connected to another account")]
    AlreadyLinked(String),

    #[error("Facebook API error: {0}")]
    Upstream(String),
}

/// Errors from the Instagram Graph API publish protocol
///
/// Cloneable so retry logic can inspect and re-raise the last failure.
#[derive(Error, Debug, Clone)]
pub enum PublishError {
    #[error("Access token rejected: {0}")]
    AuthExpired(String),

    #[error("Rate limit exceeded: {0}")]
    RateLimited(String),

    #[error("Invalid media: {0}")]
    InvalidMedia(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Media container not ready: {0}")]
    NotReady(String),

    #[error("Request rejected: {0}")]
    Rejected(String),

    /// The publish request may have reached Instagram but no media id came back
    #[error("Publish outcome unknown: {0}")]
    Unconfirmed(String),
}

impl PublishError {
    /// Transient errors are retried within a single publish attempt
    pub fn is_transient(&self) -> bool {
        matches!(self, PublishError::Network(_) | PublishError::RateLimited(_))
    }

    pub fn failure_kind(&self) -> FailureKind {
        match self {
            PublishError::AuthExpired(_) => FailureKind::AuthExpired,
            PublishError::RateLimited(_) => FailureKind::RateLimited,
            PublishError::InvalidMedia(_) => FailureKind::InvalidMedia,
            PublishError::Network(_) => FailureKind::Network,
            PublishError::NotReady(_) => FailureKind::NotReady,
            PublishError::Rejected(_) => FailureKind::Other,
            PublishError::Unconfirmed(_) => FailureKind::Network,
        }
    }
}

#[derive(Error, Debug, Clone)]
pub enum ContentSourceError {
    #[error("Content source unreachable: {0}")]
    Unreachable(String),

    #[error("No unposted content left: {0}")]
    Exhausted(String),

    #[error("Content source misconfigured: {0}")]
    Misconfigured(String),
}

/// Coarse failure category recorded in the activity log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    AuthExpired,
    RateLimited,
    InvalidMedia,
    Network,
    NotReady,
    ContentExhausted,
    ContentUnavailable,
    Busy,
    Other,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::AuthExpired => "auth_expired",
            FailureKind::RateLimited => "rate_limited",
            FailureKind::InvalidMedia => "invalid_media",
            FailureKind::Network => "network",
            FailureKind::NotReady => "not_ready",
            FailureKind::ContentExhausted => "content_exhausted",
            FailureKind::ContentUnavailable => "content_unavailable",
            FailureKind::Busy => "busy",
            FailureKind::Other => "other",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
