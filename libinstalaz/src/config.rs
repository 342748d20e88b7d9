//! Configuration management for Instalaz

use chrono::FixedOffset;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{ConfigError, Result};

pub const DEFAULT_GRAPH_VERSION: &str = "v19.0";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub facebook: FacebookConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub publisher: PublisherConfig,
    #[serde(default)]
    pub tokens: TokensConfig,
    #[serde(default)]
    pub telegram: TelegramConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Externally reachable base URL, used to build the OAuth redirect URI
    #[serde(default = "default_public_url")]
    pub public_url: String,
    #[serde(default)]
    pub secret_key: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            public_url: default_public_url(),
            secret_key: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FacebookConfig {
    #[serde(default)]
    pub app_id: Option<String>,
    #[serde(default)]
    pub app_secret: Option<String>,
    #[serde(default = "default_graph_version")]
    pub graph_version: String,
}

impl Default for FacebookConfig {
    fn default() -> Self {
        Self {
            app_id: None,
            app_secret: None,
            graph_version: default_graph_version(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    #[serde(default = "default_settings_file")]
    pub settings_file: String,
    #[serde(default = "default_tick", with = "duration_str")]
    pub tick: Duration,
    /// Fixed offset such as "+05:30"; the host's local zone when absent
    #[serde(default)]
    pub utc_offset: Option<String>,
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            settings_file: default_settings_file(),
            tick: default_tick(),
            utc_offset: None,
            max_concurrency: default_max_concurrency(),
        }
    }
}

impl ScheduleConfig {
    pub fn offset(&self) -> Result<Option<FixedOffset>> {
        self.utc_offset.as_deref().map(parse_utc_offset).transpose()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublisherConfig {
    #[serde(default = "default_poll_attempts")]
    pub poll_attempts: u32,
    #[serde(default = "default_poll_interval", with = "duration_str")]
    pub poll_interval: Duration,
    #[serde(default = "default_http_timeout", with = "duration_str")]
    pub http_timeout: Duration,
    #[serde(default = "default_upload_timeout", with = "duration_str")]
    pub upload_timeout: Duration,
    #[serde(default = "default_true")]
    pub hide_likes: bool,
    #[serde(default = "default_first_comment")]
    pub first_comment: Option<String>,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            poll_attempts: default_poll_attempts(),
            poll_interval: default_poll_interval(),
            http_timeout: default_http_timeout(),
            upload_timeout: default_upload_timeout(),
            hide_likes: true,
            first_comment: default_first_comment(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokensConfig {
    #[serde(default = "default_expiry_warning_days")]
    pub expiry_warning_days: i64,
}

impl Default for TokensConfig {
    fn default() -> Self {
        Self {
            expiry_warning_days: default_expiry_warning_days(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TelegramConfig {
    #[serde(default)]
    pub bot_token: Option<String>,
    #[serde(default)]
    pub chat_id: Option<String>,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    5000
}

fn default_public_url() -> String {
    "http://localhost:5000".to_string()
}

fn default_graph_version() -> String {
    DEFAULT_GRAPH_VERSION.to_string()
}

fn default_settings_file() -> String {
    "~/.local/share/instalaz/schedule_settings.json".to_string()
}

fn default_tick() -> Duration {
    Duration::from_secs(30)
}

fn default_max_concurrency() -> usize {
    1
}

fn default_poll_attempts() -> u32 {
    60
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(2)
}

fn default_http_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_upload_timeout() -> Duration {
    Duration::from_secs(600)
}

fn default_true() -> bool {
    true
}

fn default_first_comment() -> Option<String> {
    Some("Follow for more daily content!".to_string())
}

fn default_expiry_warning_days() -> i64 {
    10
}

/// humantime strings ("30s", "2m") for duration fields
mod duration_str {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_duration(*value).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}

impl Config {
    /// Load configuration from the default location
    pub fn load() -> Result<Self> {
        let config_path = resolve_config_path()?;
        Self::load_from_path(&config_path)
    }

    /// Load configuration, falling back to defaults when no file exists
    pub fn load_or_default() -> Result<Self> {
        let config_path = resolve_config_path()?;
        if !config_path.exists() {
            tracing::debug!(
                "No config file at {}, using defaults",
                config_path.display()
            );
            return Ok(Self::default_config());
        }
        Self::load_from_path(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::ReadError)?;
        let config: Config = toml::from_str(&content).map_err(ConfigError::ParseError)?;
        config.schedule.offset()?;
        Ok(config)
    }

    /// Create a default configuration
    pub fn default_config() -> Self {
        Self {
            database: DatabaseConfig {
                path: "~/.local/share/instalaz/instalaz.db".to_string(),
            },
            server: ServerConfig::default(),
            facebook: FacebookConfig::default(),
            schedule: ScheduleConfig::default(),
            publisher: PublisherConfig::default(),
            tokens: TokensConfig::default(),
            telegram: TelegramConfig::default(),
        }
    }

    /// OAuth redirect URI registered with the Facebook app
    pub fn redirect_uri(&self) -> String {
        format!("{}/auth/callback", self.server.public_url.trim_end_matches('/'))
    }

    /// App ID from `FACEBOOK_APP_ID` or the config file
    pub fn facebook_app_id(&self) -> Option<String> {
        non_empty_env("FACEBOOK_APP_ID").or_else(|| self.facebook.app_id.clone())
    }

    /// App secret from `FACEBOOK_APP_SECRET` or the config file
    pub fn facebook_app_secret(&self) -> Option<String> {
        non_empty_env("FACEBOOK_APP_SECRET").or_else(|| self.facebook.app_secret.clone())
    }

    /// Session signing key: `INSTALAZ_SECRET_KEY`, then `FLASK_SECRET_KEY`, then the config file
    pub fn secret_key(&self) -> Option<String> {
        non_empty_env("INSTALAZ_SECRET_KEY")
            .or_else(|| non_empty_env("FLASK_SECRET_KEY"))
            .or_else(|| self.server.secret_key.clone())
    }

    pub fn telegram_bot_token(&self) -> Option<String> {
        non_empty_env("TELEGRAM_BOT_TOKEN").or_else(|| self.telegram.bot_token.clone())
    }

    pub fn telegram_chat_id(&self) -> Option<String> {
        non_empty_env("TELEGRAM_CHAT_ID").or_else(|| self.telegram.chat_id.clone())
    }

    pub fn schedule_settings_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.schedule.settings_file).to_string())
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Parse "+05:30", "-0800" or "Z" into a fixed offset
pub fn parse_utc_offset(raw: &str) -> Result<FixedOffset> {
    let invalid = || ConfigError::InvalidValue(format!("utc_offset '{}'", raw));
    let raw = raw.trim();
    if raw.eq_ignore_ascii_case("z") || raw.eq_ignore_ascii_case("utc") {
        return FixedOffset::east_opt(0).ok_or_else(|| invalid().into());
    }

    let (sign, rest) = match raw.chars().next() {
        Some('+') => (1, &raw[1..]),
        Some('-') => (-1, &raw[1..]),
        _ => return Err(invalid().into()),
    };
    let digits: String = rest.chars().filter(|c| *c != ':').collect();
    if digits.len() != 4 || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(invalid().into());
    }
    let hours: i32 = digits[..2].parse().map_err(|_| invalid())?;
    let minutes: i32 = digits[2..].parse().map_err(|_| invalid())?;
    if hours > 23 || minutes > 59 {
        return Err(invalid().into());
    }

    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60)).ok_or_else(|| invalid().into())
}

/// Resolve the configuration file path following XDG Base Directory spec
pub fn resolve_config_path() -> Result<PathBuf> {
    if let Ok(path) = std::env::var("INSTALAZ_CONFIG") {
        return Ok(PathBuf::from(shellexpand::tilde(&path).to_string()));
    }

    let config_dir = dirs::config_dir()
        .ok_or_else(|| ConfigError::MissingField("config directory".to_string()))?;

    Ok(config_dir.join("instalaz").join("config.toml"))
}

/// Resolve the data directory path following XDG Base Directory spec
pub fn resolve_data_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
        .ok_or_else(|| ConfigError::MissingField("data directory".to_string()))?;

    Ok(data_dir.join("instalaz"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    #[test]
    fn test_minimal_config_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
[database]
path = "/tmp/instalaz.db"
"#,
        )
        .unwrap();

        assert_eq!(config.server.port, 5000);
        assert_eq!(config.facebook.graph_version, "v19.0");
        assert_eq!(config.schedule.tick, Duration::from_secs(30));
        assert_eq!(config.schedule.max_concurrency, 1);
        assert_eq!(config.publisher.poll_attempts, 60);
        assert_eq!(config.publisher.poll_interval, Duration::from_secs(2));
        assert_eq!(config.tokens.expiry_warning_days, 10);
        assert!(config.publisher.hide_likes);
    }

    #[test]
    fn test_humantime_durations() {
        let config: Config = toml::from_str(
            r#"
[database]
path = "/tmp/instalaz.db"

[schedule]
tick = "1m"

[publisher]
poll_interval = "500ms"
upload_timeout = "10m"
"#,
        )
        .unwrap();

        assert_eq!(config.schedule.tick, Duration::from_secs(60));
        assert_eq!(config.publisher.poll_interval, Duration::from_millis(500));
        assert_eq!(config.publisher.upload_timeout, Duration::from_secs(600));
    }

    #[test]
    fn test_load_from_path_rejects_bad_offset() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[database]\npath = \"x.db\"\n\n[schedule]\nutc_offset = \"India\"\n",
        )
        .unwrap();

        let err = Config::load_from_path(&path).unwrap_err();
        assert!(err.to_string().contains("utc_offset"));
    }

    #[test]
    fn test_parse_utc_offset() {
        assert_eq!(parse_utc_offset("+05:30").unwrap().local_minus_utc(), 19800);
        assert_eq!(parse_utc_offset("-0800").unwrap().local_minus_utc(), -28800);
        assert_eq!(parse_utc_offset("Z").unwrap().local_minus_utc(), 0);
        assert!(parse_utc_offset("0530").is_err());
        assert!(parse_utc_offset("+25:00").is_err());
    }

    #[test]
    fn test_redirect_uri_trims_trailing_slash() {
        let mut config = Config::default_config();
        config.server.public_url = "https://insta.example.com/".to_string();
        assert_eq!(
            config.redirect_uri(),
            "https://insta.example.com/auth/callback"
        );
    }

    #[test]
    #[serial]
    fn test_secret_key_env_precedence() {
        let mut config = Config::default_config();
        config.server.secret_key = Some("from-file".to_string());

        std::env::remove_var("INSTALAZ_SECRET_KEY");
        std::env::set_var("FLASK_SECRET_KEY", "legacy");
        assert_eq!(config.secret_key().as_deref(), Some("legacy"));

        std::env::set_var("INSTALAZ_SECRET_KEY", "primary");
        assert_eq!(config.secret_key().as_deref(), Some("primary"));

        std::env::remove_var("INSTALAZ_SECRET_KEY");
        std::env::remove_var("FLASK_SECRET_KEY");
        assert_eq!(config.secret_key().as_deref(), Some("from-file"));
    }

    #[test]
    #[serial]
    fn test_telegram_env_override() {
        let config = Config::default_config();
        std::env::set_var("TELEGRAM_BOT_TOKEN", "123:abc");
        std::env::set_var("TELEGRAM_CHAT_ID", "  ");

        assert_eq!(config.telegram_bot_token().as_deref(), Some("123:abc"));
        assert_eq!(config.telegram_chat_id(), None);

        std::env::remove_var("TELEGRAM_BOT_TOKEN");
        std::env::remove_var("TELEGRAM_CHAT_ID");
    }

    #[test]
    #[serial]
    fn test_resolve_config_path_env() {
        std::env::set_var("INSTALAZ_CONFIG", "/etc/instalaz/config.toml");
        assert_eq!(
            resolve_config_path().unwrap(),
            PathBuf::from("/etc/instalaz/config.toml")
        );
        std::env::remove_var("INSTALAZ_CONFIG");
    }
}
