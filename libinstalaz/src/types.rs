//! Core types for Instalaz

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::error::{InstalazError, Result};

/// What an account publishes
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AccountKind {
    Carousel,
    Reel,
}

impl AccountKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountKind::Carousel => "carousel",
            AccountKind::Reel => "reel",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "carousel" => Ok(AccountKind::Carousel),
            "reel" => Ok(AccountKind::Reel),
            other => Err(InstalazError::InvalidInput(format!(
                "Unknown account type '{}'. Valid options: carousel, reel",
                other
            ))),
        }
    }

    /// Default preview page size on the dashboard
    pub fn preview_page_size(&self) -> u32 {
        match self {
            AccountKind::Carousel => 12,
            AccountKind::Reel => 8,
        }
    }
}

impl std::fmt::Display for AccountKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
    Active,
    Expired,
    Disconnected,
}

impl AccountStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountStatus::Active => "active",
            AccountStatus::Expired => "expired",
            AccountStatus::Disconnected => "disconnected",
        }
    }

    pub fn from_db(s: &str) -> Self {
        match s {
            "expired" => AccountStatus::Expired,
            "disconnected" => AccountStatus::Disconnected,
            _ => AccountStatus::Active,
        }
    }
}

/// The four named daily posting slots
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Slot {
    Morning,
    Afternoon,
    Evening,
    Night,
}

impl Slot {
    pub const ALL: [Slot; 4] = [Slot::Morning, Slot::Afternoon, Slot::Evening, Slot::Night];

    pub fn as_str(&self) -> &'static str {
        match self {
            Slot::Morning => "morning",
            Slot::Afternoon => "afternoon",
            Slot::Evening => "evening",
            Slot::Night => "night",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "morning" => Some(Slot::Morning),
            "afternoon" => Some(Slot::Afternoon),
            "evening" => Some(Slot::Evening),
            "night" => Some(Slot::Night),
            _ => None,
        }
    }
}

impl std::fmt::Display for Slot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-account slot toggles
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct SlotFlags {
    pub morning: bool,
    pub afternoon: bool,
    pub evening: bool,
    pub night: bool,
}

impl Default for SlotFlags {
    fn default() -> Self {
        Self {
            morning: true,
            afternoon: true,
            evening: true,
            night: true,
        }
    }
}

impl SlotFlags {
    pub fn is_enabled(&self, slot: Slot) -> bool {
        match slot {
            Slot::Morning => self.morning,
            Slot::Afternoon => self.afternoon,
            Slot::Evening => self.evening,
            Slot::Night => self.night,
        }
    }
}

/// Outcome of the last publish run for an account
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunStatus {
    pub at: Option<i64>,
    pub status: Option<String>,
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: i64,
    pub name: String,
    pub kind: AccountKind,
    pub ig_user_id: Option<String>,
    pub page_id: Option<String>,
    pub page_name: Option<String>,
    pub instagram_username: Option<String>,
    pub profile_picture_url: Option<String>,
    pub has_token: bool,
    pub token_expires_at: Option<i64>,
    pub last_token_refresh: Option<i64>,
    pub status: AccountStatus,
    pub caption_url: Option<String>,
    pub base_url: Option<String>,
    pub video_base_url: Option<String>,
    pub manifest_url: Option<String>,
    pub slides_per_post: u32,
    pub max_items: u32,
    pub caption_index: i64,
    pub state_prefix: String,
    pub schedule_enabled: bool,
    pub slots: SlotFlags,
    pub app_id: Option<String>,
    pub busy_since: Option<i64>,
    pub last_run: RunStatus,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Account {
    /// Whether the scheduler should fire this account for `slot`
    pub fn wants_slot(&self, slot: Slot) -> bool {
        self.status == AccountStatus::Active && self.schedule_enabled && self.slots.is_enabled(slot)
    }
}

/// Fields for creating an account, either from onboarding or the dashboard form
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewAccount {
    pub name: String,
    #[serde(default = "default_kind")]
    pub kind: AccountKind,
    #[serde(default)]
    pub ig_user_id: Option<String>,
    #[serde(default)]
    pub page_id: Option<String>,
    #[serde(default)]
    pub page_name: Option<String>,
    #[serde(default)]
    pub instagram_username: Option<String>,
    #[serde(default)]
    pub profile_picture_url: Option<String>,
    #[serde(default)]
    pub caption_url: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub video_base_url: Option<String>,
    #[serde(default)]
    pub manifest_url: Option<String>,
    #[serde(default = "default_slides_per_post")]
    pub slides_per_post: u32,
    #[serde(default = "default_max_items")]
    pub max_items: u32,
    /// Generated from the IG user id (or a random suffix) when absent
    #[serde(default)]
    pub state_prefix: Option<String>,
    #[serde(default = "default_true")]
    pub schedule_enabled: bool,
    #[serde(default)]
    pub slots: SlotFlags,
}

impl NewAccount {
    pub fn new(name: impl Into<String>, kind: AccountKind) -> Self {
        Self {
            name: name.into(),
            kind,
            ig_user_id: None,
            page_id: None,
            page_name: None,
            instagram_username: None,
            profile_picture_url: None,
            caption_url: None,
            base_url: None,
            video_base_url: None,
            manifest_url: None,
            slides_per_post: default_slides_per_post(),
            max_items: default_max_items(),
            state_prefix: None,
            schedule_enabled: true,
            slots: SlotFlags::default(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(InstalazError::InvalidInput(
                "Account name cannot be empty".to_string(),
            ));
        }
        if !(1..=10).contains(&self.slides_per_post) {
            return Err(InstalazError::InvalidInput(format!(
                "slides_per_post must be between 1 and 10 (got {})",
                self.slides_per_post
            )));
        }
        if self.max_items == 0 {
            return Err(InstalazError::InvalidInput(
                "max_items must be positive".to_string(),
            ));
        }
        if let Some(ig) = &self.ig_user_id {
            let valid = !ig.is_empty()
                && ig.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
            if !valid {
                return Err(InstalazError::InvalidInput(format!(
                    "Invalid Instagram user id '{}'",
                    ig
                )));
            }
        }
        Ok(())
    }
}

/// Partial update from the dashboard edit form
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccountUpdate {
    pub name: Option<String>,
    pub kind: Option<AccountKind>,
    pub caption_url: Option<String>,
    pub base_url: Option<String>,
    pub video_base_url: Option<String>,
    pub manifest_url: Option<String>,
    pub slides_per_post: Option<u32>,
    pub max_items: Option<u32>,
    pub schedule_enabled: Option<bool>,
    pub slots: Option<SlotFlags>,
    pub app_id: Option<String>,
    pub app_secret: Option<String>,
}

fn default_kind() -> AccountKind {
    AccountKind::Carousel
}

fn default_slides_per_post() -> u32 {
    1
}

fn default_max_items() -> u32 {
    10000
}

fn default_true() -> bool {
    true
}

/// An OAuth access token
///
/// Debug output is redacted; call `expose()` only at the HTTP boundary.
#[derive(Clone)]
pub struct AccessToken(std::sync::Arc<SecretString>);

impl AccessToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(std::sync::Arc::new(SecretString::from(token.into())))
    }

    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AccessToken([REDACTED])")
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RefreshType {
    ShortToLong,
    ManualRefresh,
    AutoRefresh,
}

impl RefreshType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RefreshType::ShortToLong => "short_to_long",
            RefreshType::ManualRefresh => "manual_refresh",
            RefreshType::AutoRefresh => "auto_refresh",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TokenState {
    Valid,
    ExpiringSoon,
    Expired,
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenStatus {
    pub status: TokenState,
    pub expires_at: Option<i64>,
    pub days_remaining: Option<i64>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PostOutcome {
    Pending,
    Posted,
    Failed,
}

impl PostOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            PostOutcome::Pending => "pending",
            PostOutcome::Posted => "posted",
            PostOutcome::Failed => "failed",
        }
    }

    pub fn from_db(s: &str) -> Self {
        match s {
            "posted" => PostOutcome::Posted,
            "failed" => PostOutcome::Failed,
            _ => PostOutcome::Pending,
        }
    }
}

/// One content item within one publish attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostHistoryEntry {
    pub id: i64,
    pub batch_id: String,
    pub account_id: i64,
    pub item_id: String,
    pub item_url: String,
    pub slot: Option<String>,
    pub outcome: PostOutcome,
    pub media_id: Option<String>,
    pub permalink: Option<String>,
    pub error: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ActivityStatus {
    Success,
    Error,
    Running,
    Warning,
    Info,
}

impl ActivityStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityStatus::Success => "success",
            ActivityStatus::Error => "error",
            ActivityStatus::Running => "running",
            ActivityStatus::Warning => "warning",
            ActivityStatus::Info => "info",
        }
    }

    pub fn from_db(s: &str) -> Self {
        match s {
            "success" => ActivityStatus::Success,
            "error" => ActivityStatus::Error,
            "running" => ActivityStatus::Running,
            "warning" => ActivityStatus::Warning,
            _ => ActivityStatus::Info,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityEntry {
    pub id: i64,
    pub account_id: Option<i64>,
    pub account_name: Option<String>,
    pub action: String,
    pub status: ActivityStatus,
    pub message: String,
    pub details: Option<serde_json::Value>,
    pub created_at: i64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
}

/// A publishable file at a public URL
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContentItem {
    /// Stable identifier; the file name within the source
    pub id: String,
    pub url: String,
    pub kind: MediaKind,
}
