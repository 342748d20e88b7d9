//! Publish notifications via the Telegram Bot API
//!
//! Delivery is best-effort: failures are logged and never reach the caller.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use serde_json::json;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::{ConfigError, Result};

const TELEGRAM_API: &str = "https://api.telegram.org";

/// Failure text beyond this many characters is cut
pub const MAX_ERROR_CHARS: usize = 300;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct NotifierStatus {
    pub enabled: bool,
    pub bot_token_set: bool,
    pub chat_id_set: bool,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    fn status(&self) -> NotifierStatus;

    /// Send an HTML message; returns whether it was delivered
    async fn send(&self, html: &str) -> bool;

    async fn publish_succeeded(
        &self,
        account_name: &str,
        media_type: &str,
        permalink: Option<&str>,
        media_id: &str,
    ) -> bool {
        self.send(&success_message(account_name, media_type, permalink, media_id))
            .await
    }

    async fn publish_failed(&self, account_name: &str, error: &str) -> bool {
        self.send(&failure_message(account_name, error)).await
    }

    async fn token_expiring(&self, account_name: &str, days_remaining: i64) -> bool {
        self.send(&expiring_message(account_name, days_remaining)).await
    }
}

pub fn success_message(account_name: &str, media_type: &str, permalink: Option<&str>, media_id: &str) -> String {
    let icon = if media_type == "reel" { "🎬" } else { "🎠" };
    let mut msg = format!(
        "✅ <b>{}</b>\n{} {} published successfully!",
        escape_html(account_name),
        icon,
        title_case(media_type)
    );
    if let Some(link) = permalink.filter(|l| !l.is_empty()) {
        msg.push_str(&format!("\n\n🔗 <a href='{}'>View on Instagram</a>", escape_html(link)));
    }
    if !media_id.is_empty() {
        msg.push_str(&format!("\n📋 Media ID: <code>{}</code>", escape_html(media_id)));
    }
    msg
}

pub fn failure_message(account_name: &str, error: &str) -> String {
    format!(
        "❌ <b>{}</b>\n\n⚠️ Publish failed:\n<code>{}</code>",
        escape_html(account_name),
        escape_html(&truncate_error(error))
    )
}

pub fn expiring_message(account_name: &str, days_remaining: i64) -> String {
    let when = match days_remaining {
        0 => "today".to_string(),
        1 => "in 1 day".to_string(),
        n => format!("in {} days", n),
    };
    format!(
        "⏳ <b>{}</b>\n\nInstagram access expires {}. Reconnect the account from the dashboard to keep posting.",
        escape_html(account_name),
        when
    )
}

pub fn truncate_error(error: &str) -> String {
    if error.chars().count() <= MAX_ERROR_CHARS {
        return error.to_string();
    }
    let cut: String = error.chars().take(MAX_ERROR_CHARS).collect();
    format!("{}...", cut)
}

fn title_case(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('\'', "&#39;")
}

/// Notifier that drops everything
#[derive(Debug, Default)]
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    fn status(&self) -> NotifierStatus {
        NotifierStatus {
            enabled: false,
            bot_token_set: false,
            chat_id_set: false,
        }
    }

    async fn send(&self, _html: &str) -> bool {
        false
    }
}

pub struct TelegramNotifier {
    client: reqwest::Client,
    api_base: String,
    bot_token: SecretString,
    chat_id: String,
}

impl TelegramNotifier {
    pub fn new(bot_token: String, chat_id: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| ConfigError::InvalidValue(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self {
            client,
            api_base: TELEGRAM_API.to_string(),
            bot_token: SecretString::from(bot_token),
            chat_id,
        })
    }

    /// Point at a different Bot API host
    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = base.into().trim_end_matches('/').to_string();
        self
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    fn status(&self) -> NotifierStatus {
        NotifierStatus {
            enabled: true,
            bot_token_set: true,
            chat_id_set: true,
        }
    }

    async fn send(&self, html: &str) -> bool {
        let url = format!(
            "{}/bot{}/sendMessage",
            self.api_base,
            self.bot_token.expose_secret()
        );
        let body = json!({
            "chat_id": self.chat_id,
            "text": html,
            "parse_mode": "HTML",
            "disable_web_page_preview": false,
        });
        match self.client.post(&url).json(&body).send().await {
            Ok(response) if response.status().is_success() => {
                debug!("Telegram notification sent");
                true
            }
            Ok(response) => {
                warn!("Telegram notification rejected: HTTP {}", response.status());
                false
            }
            Err(e) => {
                // reqwest errors include the URL, which carries the bot token
                warn!("Telegram notification failed: {}", e.without_url());
                false
            }
        }
    }
}

/// Telegram when both token and chat id are configured, else a no-op
pub fn from_config(config: &Config) -> Result<Box<dyn Notifier>> {
    match (config.telegram_bot_token(), config.telegram_chat_id()) {
        (Some(token), Some(chat_id)) => Ok(Box::new(TelegramNotifier::new(token, chat_id)?)),
        (token, chat_id) => {
            debug!(
                bot_token_set = token.is_some(),
                chat_id_set = chat_id.is_some(),
                "Telegram notifications disabled"
            );
            Ok(Box::new(PartialNotifier {
                bot_token_set: token.is_some(),
                chat_id_set: chat_id.is_some(),
            }))
        }
    }
}

/// Disabled notifier that still reports which half of the setup is missing
struct PartialNotifier {
    bot_token_set: bool,
    chat_id_set: bool,
}

#[async_trait]
impl Notifier for PartialNotifier {
    fn status(&self) -> NotifierStatus {
        NotifierStatus {
            enabled: false,
            bot_token_set: self.bot_token_set,
            chat_id_set: self.chat_id_set,
        }
    }

    async fn send(&self, _html: &str) -> bool {
        false
    }
}

/// Keeps every message; for tests
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<String>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    fn status(&self) -> NotifierStatus {
        NotifierStatus {
            enabled: true,
            bot_token_set: true,
            chat_id_set: true,
        }
    }

    async fn send(&self, html: &str) -> bool {
        self.sent.lock().unwrap().push(html.to_string());
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_error() {
        let long = "x".repeat(400);
        let cut = truncate_error(&long);
        assert_eq!(cut.chars().count(), MAX_ERROR_CHARS + 3);
        assert!(cut.ends_with("..."));
        assert_eq!(truncate_error("short"), "short");
    }

    #[test]
    fn test_success_message() {
        let msg = success_message("@daily", "carousel", Some("https://www.instagram.com/p/abc/"), "1789");
        assert!(msg.contains("<b>@daily</b>"));
        assert!(msg.contains("Carousel published successfully!"));
        assert!(msg.contains("href='https://www.instagram.com/p/abc/'"));
        assert!(msg.contains("<code>1789</code>"));
    }

    #[test]
    fn test_failure_message_escapes_html() {
        let msg = failure_message("A&B", "<html>502</html>");
        assert!(msg.contains("A&amp;B"));
        assert!(msg.contains("&lt;html&gt;502&lt;/html&gt;"));
    }

    #[test]
    fn test_expiring_message() {
        assert!(expiring_message("@daily", 3).contains("expires in 3 days"));
        assert!(expiring_message("@daily", 1).contains("expires in 1 day."));
        assert!(expiring_message("<b>", 0).contains("&lt;b&gt;"));
    }

    #[tokio::test]
    async fn test_recording_notifier() {
        let notifier = RecordingNotifier::new();
        assert!(notifier.publish_failed("@daily", "boom").await);
        assert_eq!(notifier.messages().len(), 1);
        assert!(notifier.messages()[0].contains("boom"));
    }

    #[tokio::test]
    async fn test_unreachable_telegram_is_swallowed() {
        let notifier = TelegramNotifier::new("123:abc".to_string(), "42".to_string())
            .unwrap()
            .with_api_base("http://127.0.0.1:9");
        assert!(!notifier.send("hello").await);
    }

    #[test]
    #[serial_test::serial]
    fn test_from_config_without_credentials_is_disabled() {
        std::env::remove_var("TELEGRAM_BOT_TOKEN");
        std::env::remove_var("TELEGRAM_CHAT_ID");
        let mut config = Config::default_config();
        config.telegram.bot_token = Some("123:abc".to_string());

        let notifier = from_config(&config).unwrap();
        let status = notifier.status();
        assert!(!status.enabled);
        assert!(status.bot_token_set);
        assert!(!status.chat_id_set);
    }
}
