//! Facebook OAuth for Instagram Business accounts
//!
//! The flow is the standard authorization-code grant followed by Facebook's
//! token extension:
//!
//! 1. [`OAuthService::begin`] issues a signed `state` and returns the
//!    Facebook dialog URL.
//! 2. Facebook redirects back with `code` and `state`.
//! 3. [`OAuthService::complete`] consumes the state, trades the code for a
//!    short-lived token, extends it to a 60-day token, discovers the linked
//!    Instagram Business accounts and stores the token for each.
//!
//! A `state` looks like `{prefix}.{nonce}.{signature}`. The prefix names the
//! account being reconnected (or `new` during onboarding) so that several
//! browser tabs can run the flow at once without clobbering each other.

use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use hmac::{Hmac, Mac};
use rand::RngCore;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use sha2::Sha256;
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;
use zeroize::Zeroizing;

use crate::config::Config;
use crate::db::AccountProfile;
use crate::error::{AuthError, ConfigError, InstalazError, Result};
use crate::token_store::{TokenStore, LONG_LIVED_TOKEN_SECS};
use crate::types::{AccessToken, Account, AccountKind, ActivityStatus, NewAccount, RefreshType};

pub mod facebook;

// Available for all builds (not just tests) to support integration tests
pub mod mock;

/// Issued states are honored for this long
pub const STATE_TTL_SECS: i64 = 15 * 60;

/// State prefix used while onboarding accounts that do not exist yet
pub const ONBOARDING_PREFIX: &str = "new";

/// Permissions needed to discover Pages and publish to Instagram
pub const OAUTH_SCOPES: &[&str] = &[
    "instagram_basic",
    "instagram_content_publish",
    "instagram_manage_comments",
    "instagram_manage_insights",
    "pages_show_list",
    "pages_read_engagement",
    "business_management",
];

const DIALOG_HOST: &str = "https://www.facebook.com";

/// `app_settings` keys written by the onboarding form
pub const APP_ID_SETTING: &str = "FACEBOOK_APP_ID";
pub const APP_SECRET_SETTING: &str = "FACEBOOK_APP_SECRET";

type HmacSha256 = Hmac<Sha256>;

pub type AuthResult<T> = std::result::Result<T, AuthError>;

/// Facebook App credentials
#[derive(Clone)]
pub struct AppCredentials {
    pub app_id: String,
    pub app_secret: SecretString,
}

impl std::fmt::Debug for AppCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppCredentials")
            .field("app_id", &self.app_id)
            .field("app_secret", &"[REDACTED]")
            .finish()
    }
}

impl AppCredentials {
    pub fn new(app_id: impl Into<String>, app_secret: impl Into<String>) -> Self {
        Self {
            app_id: app_id.into(),
            app_secret: SecretString::from(app_secret.into()),
        }
    }
}

/// An access token as returned by a token exchange
#[derive(Debug, Clone)]
pub struct TokenGrant {
    pub token: AccessToken,
    pub expires_in: Option<i64>,
}

/// An Instagram Business account reachable through one of the user's Pages
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LinkedAccount {
    pub ig_user_id: String,
    pub username: String,
    pub profile_picture_url: Option<String>,
    pub page_id: String,
    pub page_name: String,
}

/// Result of `/debug_token`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TokenInfo {
    pub is_valid: bool,
    pub expires_at: Option<i64>,
    pub app_id: Option<String>,
    pub user_id: Option<String>,
}

/// The Facebook endpoints used by the OAuth flow
#[async_trait]
pub trait FacebookApi: Send + Sync {
    /// Trade an authorization code for a short-lived user token
    async fn exchange_code(
        &self,
        app: &AppCredentials,
        code: &str,
        redirect_uri: &str,
    ) -> AuthResult<TokenGrant>;

    /// Trade a short-lived token for a long-lived one
    async fn exchange_long_lived(
        &self,
        app: &AppCredentials,
        short_lived: &AccessToken,
    ) -> AuthResult<TokenGrant>;

    /// Instagram Business accounts linked to the user's Pages
    async fn instagram_accounts(&self, token: &AccessToken) -> AuthResult<Vec<LinkedAccount>>;

    async fn debug_token(&self, app: &AppCredentials, token: &AccessToken) -> AuthResult<TokenInfo>;
}

/// Build the Facebook login dialog URL
pub fn login_url(graph_version: &str, app_id: &str, redirect_uri: &str, state: &str) -> Result<String> {
    let dialog = format!("{}/{}/dialog/oauth", DIALOG_HOST, graph_version);
    let url = Url::parse_with_params(
        &dialog,
        &[
            ("client_id", app_id),
            ("redirect_uri", redirect_uri),
            ("scope", &OAUTH_SCOPES.join(",")),
            ("response_type", "code"),
            ("state", state),
        ],
    )
    .map_err(|e| ConfigError::InvalidValue(format!("Invalid OAuth dialog URL: {}", e)))?;
    Ok(url.to_string())
}

/// Signs and verifies OAuth `state` values
pub struct StateSigner {
    key: Zeroizing<Vec<u8>>,
}

impl StateSigner {
    pub fn new(secret: &[u8]) -> Self {
        Self {
            key: Zeroizing::new(secret.to_vec()),
        }
    }

    /// A signer with a random per-process key
    pub fn ephemeral() -> Self {
        let mut key = Zeroizing::new(vec![0u8; 32]);
        rand::thread_rng().fill_bytes(&mut key[..]);
        Self { key }
    }

    /// Key from the configured secret, or a random one with a warning
    pub fn from_config(config: &Config) -> Self {
        match config.secret_key() {
            Some(secret) => Self::new(secret.as_bytes()),
            None => {
                warn!("No INSTALAZ_SECRET_KEY set; OAuth states will not survive a restart");
                Self::ephemeral()
            }
        }
    }

    fn mac(&self, payload: &str) -> Option<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(&self.key).ok()?;
        mac.update(payload.as_bytes());
        Some(mac)
    }

    pub fn sign(&self, prefix: &str) -> Result<String> {
        let mut nonce = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut nonce);
        let payload = format!("{}.{}", prefix, URL_SAFE_NO_PAD.encode(nonce));
        let mac = self
            .mac(&payload)
            .ok_or_else(|| ConfigError::InvalidValue("secret key rejected by HMAC".to_string()))?;
        let signature = hex::encode(mac.finalize().into_bytes());
        Ok(format!("{}.{}", payload, signature))
    }

    /// The prefix of a correctly signed state
    pub fn verify<'a>(&self, state: &'a str) -> Option<&'a str> {
        let (payload, signature) = state.rsplit_once('.')?;
        let (prefix, nonce) = payload.split_once('.')?;
        if prefix.is_empty() || nonce.is_empty() {
            return None;
        }
        let signature = hex::decode(signature).ok()?;
        self.mac(payload)?.verify_slice(&signature).ok()?;
        Some(prefix)
    }
}

/// Outcome of a completed OAuth flow
#[derive(Debug, Clone, Serialize)]
pub struct Connected {
    pub accounts: Vec<Account>,
    pub reconnected: bool,
}

pub struct OAuthService {
    tokens: TokenStore,
    facebook: Arc<dyn FacebookApi>,
    signer: StateSigner,
    graph_version: String,
    fallback_app: Option<(String, String)>,
}

impl OAuthService {
    pub fn new(
        tokens: TokenStore,
        facebook: Arc<dyn FacebookApi>,
        signer: StateSigner,
        graph_version: impl Into<String>,
    ) -> Self {
        Self {
            tokens,
            facebook,
            signer,
            graph_version: graph_version.into(),
            fallback_app: None,
        }
    }

    /// App credentials from the config file or environment, used last
    pub fn with_fallback_app(mut self, app_id: Option<String>, app_secret: Option<String>) -> Self {
        self.fallback_app = app_id.zip(app_secret);
        self
    }

    /// Resolve App credentials: account override, then saved settings, then config
    pub async fn app_credentials(&self, account_id: Option<i64>) -> Result<AppCredentials> {
        let db = self.tokens.db();
        if let Some(account_id) = account_id {
            if let Some((id, secret)) = db.account_app_credentials(account_id).await? {
                return Ok(AppCredentials::new(id, secret));
            }
        }

        let saved_id = db.get_setting(APP_ID_SETTING).await?;
        let saved_secret = db.get_setting(APP_SECRET_SETTING).await?;
        if let (Some(id), Some(secret)) = (saved_id, saved_secret) {
            if !id.is_empty() && !secret.is_empty() {
                return Ok(AppCredentials::new(id, secret));
            }
        }

        match &self.fallback_app {
            Some((id, secret)) => Ok(AppCredentials::new(id.clone(), secret.clone())),
            None => Err(AuthError::AppNotConfigured.into()),
        }
    }

    /// Save App credentials entered during onboarding
    pub async fn save_app_credentials(&self, app_id: &str, app_secret: &str) -> Result<()> {
        let app_id = app_id.trim();
        let app_secret = app_secret.trim();
        if app_id.is_empty() || app_secret.is_empty() {
            return Err(InstalazError::InvalidInput(
                "Both App ID and App Secret are required".to_string(),
            ));
        }
        let now = self.tokens.clock().timestamp();
        let db = self.tokens.db();
        db.set_setting(APP_ID_SETTING, app_id, now).await?;
        db.set_setting(APP_SECRET_SETTING, app_secret, now).await?;
        Ok(())
    }

    pub async fn is_app_configured(&self) -> Result<bool> {
        match self.app_credentials(None).await {
            Ok(_) => Ok(true),
            Err(InstalazError::Auth(AuthError::AppNotConfigured)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Record a new signed state for `state_prefix`
    pub async fn issue_state(&self, state_prefix: &str, account_id: Option<i64>) -> Result<String> {
        let state = self.signer.sign(state_prefix)?;
        let now = self.tokens.clock().timestamp();
        let db = self.tokens.db();
        db.purge_oauth_states(now - STATE_TTL_SECS).await?;
        db.insert_oauth_state(&state, state_prefix, account_id, now)
            .await?;
        Ok(state)
    }

    /// Start a flow; `account_id` reconnects an existing account
    pub async fn begin(&self, account_id: Option<i64>, redirect_uri: &str) -> Result<String> {
        let app = self.app_credentials(account_id).await?;
        let prefix = match account_id {
            Some(id) => self.tokens.db().require_account(id).await?.state_prefix,
            None => ONBOARDING_PREFIX.to_string(),
        };
        let state = self.issue_state(&prefix, account_id).await?;
        login_url(&self.graph_version, &app.app_id, redirect_uri, &state)
    }

    /// Finish a flow started by [`begin`](Self::begin)
    pub async fn complete(&self, code: &str, state: &str, redirect_uri: &str) -> Result<Connected> {
        let now = self.tokens.clock().timestamp();
        let db = self.tokens.db();

        let signed_prefix = self
            .signer
            .verify(state)
            .ok_or_else(|| AuthError::StateMismatch("signature does not match".to_string()))?;
        let (stored_prefix, account_id, issued_at) = db
            .take_oauth_state(state)
            .await?
            .ok_or_else(|| AuthError::StateMismatch("unknown or already used".to_string()))?;
        if stored_prefix != signed_prefix {
            return Err(AuthError::StateMismatch("prefix does not match".to_string()).into());
        }
        if now - issued_at > STATE_TTL_SECS {
            return Err(AuthError::StateMismatch("login attempt expired".to_string()).into());
        }

        let app = self.app_credentials(account_id).await?;
        let short = self.facebook.exchange_code(&app, code, redirect_uri).await?;
        let long = self
            .facebook
            .exchange_long_lived(&app, &short.token)
            .await?;
        let expires_at = now + long.expires_in.unwrap_or(LONG_LIVED_TOKEN_SECS);

        let linked = self.facebook.instagram_accounts(&long.token).await?;
        if linked.is_empty() {
            return Err(AuthError::NoBusinessAccount.into());
        }

        match account_id {
            Some(account_id) => {
                let account = self
                    .reconnect(account_id, &linked, &long.token, expires_at)
                    .await?;
                Ok(Connected {
                    accounts: vec![account],
                    reconnected: true,
                })
            }
            None => {
                let mut accounts = Vec::with_capacity(linked.len());
                for link in &linked {
                    accounts.push(self.onboard(link, &long.token, expires_at).await?);
                }
                Ok(Connected {
                    accounts,
                    reconnected: false,
                })
            }
        }
    }

    async fn reconnect(
        &self,
        account_id: i64,
        linked: &[LinkedAccount],
        token: &AccessToken,
        expires_at: i64,
    ) -> Result<Account> {
        let db = self.tokens.db();
        let now = self.tokens.clock().timestamp();
        let account = db.require_account(account_id).await?;

        let link = match account.ig_user_id.as_deref() {
            Some(expected) => linked
                .iter()
                .find(|l| l.ig_user_id == expected)
                .ok_or_else(|| AuthError::AccountMismatch {
                    expected: expected.to_string(),
                    got: linked
                        .iter()
                        .map(|l| l.ig_user_id.as_str())
                        .collect::<Vec<_>>()
                        .join(", "),
                })?,
            None => {
                let mut free = None;
                for link in linked {
                    match db.find_account_by_ig_user(&link.ig_user_id).await? {
                        Some(owner) if owner.id != account_id => {
                            debug!(account_id, owner = owner.id, ig_user_id = %link.ig_user_id, "Instagram account already linked");
                        }
                        _ => {
                            free = Some(link);
                            break;
                        }
                    }
                }
                let link = free.ok_or_else(|| AuthError::AlreadyLinked(
                    linked
                        .iter()
                        .map(|l| l.ig_user_id.as_str())
                        .collect::<Vec<_>>()
                        .join(", "),
                ))?;
                db.link_ig_user(account_id, &link.ig_user_id, now).await?;
                link
            }
        };

        db.update_account_profile(account_id, &profile_of(link), now)
            .await?;
        self.tokens
            .record_token(account_id, token, expires_at, RefreshType::ShortToLong)
            .await?;
        db.insert_activity(
            Some(account_id),
            "account_reconnected",
            ActivityStatus::Success,
            &format!("Reconnected @{}", link.username),
            None,
            now,
        )
        .await?;
        info!(account_id, username = %link.username, "Account reconnected");
        db.require_account(account_id).await
    }

    async fn onboard(&self, link: &LinkedAccount, token: &AccessToken, expires_at: i64) -> Result<Account> {
        let mut new = NewAccount::new(format!("@{}", link.username), AccountKind::Carousel);
        new.ig_user_id = Some(link.ig_user_id.clone());
        new.page_id = Some(link.page_id.clone());
        new.page_name = Some(link.page_name.clone());
        new.instagram_username = Some(link.username.clone());
        new.profile_picture_url = link.profile_picture_url.clone();

        let account = self.tokens.upsert_account(&new).await?;
        self.tokens
            .record_token(account.id, token, expires_at, RefreshType::ShortToLong)
            .await?;

        let now = self.tokens.clock().timestamp();
        self.tokens
            .db()
            .insert_activity(
                Some(account.id),
                "account_connected",
                ActivityStatus::Success,
                &format!("Connected @{} via {}", link.username, link.page_name),
                None,
                now,
            )
            .await?;
        info!(account_id = account.id, username = %link.username, "Account connected");
        self.tokens.db().require_account(account.id).await
    }

    /// Trade the account's long-lived token for a fresh one
    ///
    /// Only a token that is still valid can be refreshed; an expired one
    /// needs the full login flow. Returns the new expiry.
    pub async fn refresh_token(&self, account_id: i64, refresh_type: RefreshType) -> Result<i64> {
        let token = self.tokens.get_valid_token(account_id).await?;
        let app = self.app_credentials(Some(account_id)).await?;
        let grant = self.facebook.exchange_long_lived(&app, &token).await?;
        let expires_at =
            self.tokens.clock().timestamp() + grant.expires_in.unwrap_or(LONG_LIVED_TOKEN_SECS);
        self.tokens
            .record_token(account_id, &grant.token, expires_at, refresh_type)
            .await?;
        info!(account_id, expires_at, refresh = refresh_type.as_str(), "Access token refreshed");
        Ok(expires_at)
    }

    pub fn tokens(&self) -> &TokenStore {
        &self.tokens
    }

    /// Ask Facebook whether the account's stored token is still valid
    pub async fn debug_token(&self, account_id: i64) -> Result<TokenInfo> {
        let token = self.tokens.get_valid_token(account_id).await?;
        let app = self.app_credentials(Some(account_id)).await?;
        Ok(self.facebook.debug_token(&app, &token).await?)
    }
}

fn profile_of(link: &LinkedAccount) -> AccountProfile {
    AccountProfile {
        page_id: Some(link.page_id.clone()),
        page_name: Some(link.page_name.clone()),
        instagram_username: Some(link.username.clone()),
        profile_picture_url: link.profile_picture_url.clone(),
    }
}

impl AppCredentials {
    /// `{app_id}|{app_secret}`, the app access token form
    pub fn app_token(&self) -> AccessToken {
        AccessToken::new(format!("{}|{}", self.app_id, self.app_secret.expose_secret()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use crate::db::Database;
    use crate::error::InstalazError;
    use crate::oauth::mock::MockFacebook;
    use crate::types::AccountStatus;
    use chrono::{TimeZone, Utc};
    use tempfile::TempDir;

    const REDIRECT: &str = "http://localhost:5000/auth/callback";

    struct Fixture {
        _dir: TempDir,
        clock: ManualClock,
        facebook: Arc<MockFacebook>,
        service: OAuthService,
    }

    async fn fixture(facebook: MockFacebook) -> Fixture {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.db");
        let db = Database::new(path.to_str().unwrap()).await.unwrap();
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap());
        let tokens = TokenStore::new(db, Arc::new(clock.clone()));
        let facebook = Arc::new(facebook);
        let service = OAuthService::new(
            tokens,
            facebook.clone(),
            StateSigner::new(b"test-secret"),
            "v19.0",
        )
        .with_fallback_app(Some("123".to_string()), Some("shh".to_string()));
        Fixture {
            _dir: dir,
            clock,
            facebook,
            service,
        }
    }

    fn state_of(login: &str) -> String {
        let url = Url::parse(login).unwrap();
        url.query_pairs()
            .find(|(k, _)| k == "state")
            .map(|(_, v)| v.into_owned())
            .unwrap()
    }

    #[test]
    fn test_state_signature_roundtrip() {
        let signer = StateSigner::new(b"k1");
        let state = signer.sign("ig_123456").unwrap();
        assert_eq!(signer.verify(&state), Some("ig_123456"));

        let other = StateSigner::new(b"k2");
        assert_eq!(other.verify(&state), None);

        let tampered = state.replacen("ig_123456", "ig_654321", 1);
        assert_eq!(signer.verify(&tampered), None);
        assert_eq!(signer.verify("garbage"), None);
    }

    #[test]
    fn test_login_url_contains_scopes_and_state() {
        let url = login_url("v19.0", "123", REDIRECT, "new.abc.def").unwrap();
        assert!(url.starts_with("https://www.facebook.com/v19.0/dialog/oauth?"));
        assert!(url.contains("instagram_content_publish"));
        assert!(url.contains("state=new.abc.def"));
        assert!(url.contains("redirect_uri=http%3A%2F%2Flocalhost%3A5000%2Fauth%2Fcallback"));
    }

    #[tokio::test]
    async fn test_onboarding_creates_accounts_with_long_lived_tokens() {
        let fx = fixture(MockFacebook::with_accounts(vec![MockFacebook::linked("17841400001234", "daily")])).await;

        let state = state_of(&fx.service.begin(None, REDIRECT).await.unwrap());
        assert!(state.starts_with("new."));

        let connected = fx.service.complete("good-code", &state, REDIRECT).await.unwrap();
        assert!(!connected.reconnected);
        let account = &connected.accounts[0];
        assert_eq!(account.name, "@daily");
        assert_eq!(account.state_prefix, "ig_001234");
        assert_eq!(account.status, AccountStatus::Active);
        assert!(account.has_token);
        assert_eq!(
            account.token_expires_at,
            Some(fx.clock.timestamp() + LONG_LIVED_TOKEN_SECS)
        );

        let token = fx.service.tokens.get_valid_token(account.id).await.unwrap();
        assert_eq!(token.expose(), "long-lived-token");
    }

    #[tokio::test]
    async fn test_state_is_single_use() {
        let fx = fixture(MockFacebook::with_accounts(vec![MockFacebook::linked("178", "daily")])).await;
        let state = state_of(&fx.service.begin(None, REDIRECT).await.unwrap());

        fx.service.complete("good-code", &state, REDIRECT).await.unwrap();
        let err = fx.service.complete("good-code", &state, REDIRECT).await.unwrap_err();
        assert!(matches!(err, InstalazError::Auth(AuthError::StateMismatch(_))));
    }

    #[tokio::test]
    async fn test_expired_state_rejected() {
        let fx = fixture(MockFacebook::with_accounts(vec![MockFacebook::linked("178", "daily")])).await;
        let state = state_of(&fx.service.begin(None, REDIRECT).await.unwrap());

        fx.clock.advance(chrono::Duration::minutes(16));
        let err = fx.service.complete("good-code", &state, REDIRECT).await.unwrap_err();
        assert!(matches!(err, InstalazError::Auth(AuthError::StateMismatch(_))));
        assert_eq!(fx.facebook.exchange_count(), 0);
    }

    #[tokio::test]
    async fn test_forged_state_rejected_before_exchange() {
        let fx = fixture(MockFacebook::with_accounts(vec![MockFacebook::linked("178", "daily")])).await;
        let forged = StateSigner::new(b"attacker").sign("new").unwrap();

        let err = fx.service.complete("good-code", &forged, REDIRECT).await.unwrap_err();
        assert!(matches!(err, InstalazError::Auth(AuthError::StateMismatch(_))));
        assert_eq!(fx.facebook.exchange_count(), 0);
    }

    #[tokio::test]
    async fn test_rejected_code() {
        let fx = fixture(MockFacebook::with_accounts(vec![MockFacebook::linked("178", "daily")])).await;
        let state = state_of(&fx.service.begin(None, REDIRECT).await.unwrap());

        let err = fx.service.complete("bad-code", &state, REDIRECT).await.unwrap_err();
        assert!(matches!(err, InstalazError::Auth(AuthError::CodeRejected(_))));
    }

    #[tokio::test]
    async fn test_no_business_account() {
        let fx = fixture(MockFacebook::with_accounts(Vec::new())).await;
        let state = state_of(&fx.service.begin(None, REDIRECT).await.unwrap());

        let err = fx.service.complete("good-code", &state, REDIRECT).await.unwrap_err();
        assert!(matches!(err, InstalazError::Auth(AuthError::NoBusinessAccount)));
    }

    #[tokio::test]
    async fn test_reconnect_overwrites_token_and_reactivates() {
        let fx = fixture(MockFacebook::with_accounts(vec![MockFacebook::linked("17841400001234", "daily")])).await;
        let state = state_of(&fx.service.begin(None, REDIRECT).await.unwrap());
        let account = fx.service.complete("good-code", &state, REDIRECT).await.unwrap().accounts[0].clone();

        // Let the token lapse
        fx.clock.advance(chrono::Duration::days(61));
        assert!(fx.service.tokens.get_valid_token(account.id).await.is_err());
        let expired = fx.service.tokens.db().require_account(account.id).await.unwrap();
        assert_eq!(expired.status, AccountStatus::Expired);

        let state = state_of(&fx.service.begin(Some(account.id), REDIRECT).await.unwrap());
        assert!(state.starts_with("ig_001234."));
        let connected = fx.service.complete("good-code", &state, REDIRECT).await.unwrap();

        assert!(connected.reconnected);
        assert_eq!(connected.accounts[0].id, account.id);
        assert_eq!(connected.accounts[0].status, AccountStatus::Active);
        assert!(fx.service.tokens.get_valid_token(account.id).await.is_ok());
        assert_eq!(fx.service.tokens.history_len(account.id).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_reconnect_with_wrong_instagram_account() {
        let fx = fixture(MockFacebook::with_accounts(vec![MockFacebook::linked("999", "someone_else")])).await;
        let mut new = NewAccount::new("@daily", AccountKind::Carousel);
        new.ig_user_id = Some("178".to_string());
        let account = fx.service.tokens.upsert_account(&new).await.unwrap();

        let state = state_of(&fx.service.begin(Some(account.id), REDIRECT).await.unwrap());
        let err = fx.service.complete("good-code", &state, REDIRECT).await.unwrap_err();
        assert!(matches!(
            err,
            InstalazError::Auth(AuthError::AccountMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn test_reconnect_skips_instagram_accounts_linked_elsewhere() {
        let fx = fixture(MockFacebook::with_accounts(vec![
            MockFacebook::linked("17841400001234", "daily"),
            MockFacebook::linked("17841400005678", "travel"),
        ]))
        .await;
        let mut taken = NewAccount::new("@daily", AccountKind::Carousel);
        taken.ig_user_id = Some("17841400001234".to_string());
        fx.service.tokens.upsert_account(&taken).await.unwrap();
        let manual = fx
            .service
            .tokens
            .upsert_account(&NewAccount::new("@manual", AccountKind::Carousel))
            .await
            .unwrap();

        let state = state_of(&fx.service.begin(Some(manual.id), REDIRECT).await.unwrap());
        let connected = fx.service.complete("good-code", &state, REDIRECT).await.unwrap();

        assert_eq!(connected.accounts[0].id, manual.id);
        assert_eq!(
            connected.accounts[0].ig_user_id.as_deref(),
            Some("17841400005678")
        );
    }

    #[tokio::test]
    async fn test_reconnect_when_every_instagram_account_is_linked_elsewhere() {
        let fx = fixture(MockFacebook::with_accounts(vec![MockFacebook::linked("17841400001234", "daily")])).await;
        let mut taken = NewAccount::new("@daily", AccountKind::Carousel);
        taken.ig_user_id = Some("17841400001234".to_string());
        fx.service.tokens.upsert_account(&taken).await.unwrap();
        let manual = fx
            .service
            .tokens
            .upsert_account(&NewAccount::new("@manual", AccountKind::Carousel))
            .await
            .unwrap();

        let state = state_of(&fx.service.begin(Some(manual.id), REDIRECT).await.unwrap());
        let err = fx.service.complete("good-code", &state, REDIRECT).await.unwrap_err();

        assert!(matches!(err, InstalazError::Auth(AuthError::AlreadyLinked(_))));
        let manual = fx.service.tokens.db().require_account(manual.id).await.unwrap();
        assert!(manual.ig_user_id.is_none());
        assert!(!manual.has_token);
    }

    #[tokio::test]
    async fn test_refresh_token_extends_expiry() {
        let mut facebook = MockFacebook::with_accounts(vec![MockFacebook::linked("17841400001234", "daily")]);
        facebook.refreshable = true;
        let fx = fixture(facebook).await;
        let state = state_of(&fx.service.begin(None, REDIRECT).await.unwrap());
        let account = fx.service.complete("good-code", &state, REDIRECT).await.unwrap().accounts[0].clone();

        fx.clock.advance(chrono::Duration::days(55));
        let expires_at = fx
            .service
            .refresh_token(account.id, RefreshType::ManualRefresh)
            .await
            .unwrap();

        assert_eq!(expires_at, fx.clock.timestamp() + LONG_LIVED_TOKEN_SECS);
        let token = fx.service.tokens.get_valid_token(account.id).await.unwrap();
        assert_eq!(token.expose(), "refreshed-token");
        assert_eq!(fx.service.tokens.history_len(account.id).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_expired_token_cannot_be_refreshed() {
        let mut facebook = MockFacebook::with_accounts(vec![MockFacebook::linked("17841400001234", "daily")]);
        facebook.refreshable = true;
        let fx = fixture(facebook).await;
        let state = state_of(&fx.service.begin(None, REDIRECT).await.unwrap());
        let account = fx.service.complete("good-code", &state, REDIRECT).await.unwrap().accounts[0].clone();

        fx.clock.advance(chrono::Duration::days(61));
        let err = fx
            .service
            .refresh_token(account.id, RefreshType::ManualRefresh)
            .await
            .unwrap_err();
        assert!(matches!(err, InstalazError::TokenExpired { .. }));
        assert_eq!(fx.service.tokens.history_len(account.id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_app_credentials_precedence() {
        let fx = fixture(MockFacebook::with_accounts(Vec::new())).await;
        assert_eq!(fx.service.app_credentials(None).await.unwrap().app_id, "123");

        fx.service.save_app_credentials("456", "saved").await.unwrap();
        assert_eq!(fx.service.app_credentials(None).await.unwrap().app_id, "456");

        let account = fx
            .service
            .tokens
            .upsert_account(&NewAccount::new("@own-app", AccountKind::Reel))
            .await
            .unwrap();
        let update = crate::types::AccountUpdate {
            app_id: Some("789".to_string()),
            app_secret: Some("own".to_string()),
            ..Default::default()
        };
        fx.service
            .tokens
            .db()
            .update_account(account.id, &update, 0)
            .await
            .unwrap();
        assert_eq!(
            fx.service.app_credentials(Some(account.id)).await.unwrap().app_id,
            "789"
        );
    }

    #[tokio::test]
    async fn test_unconfigured_app() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.db");
        let db = Database::new(path.to_str().unwrap()).await.unwrap();
        let tokens = TokenStore::new(db, Arc::new(crate::clock::SystemClock));
        let service = OAuthService::new(
            tokens,
            Arc::new(MockFacebook::with_accounts(Vec::new())),
            StateSigner::ephemeral(),
            "v19.0",
        );

        assert!(!service.is_app_configured().await.unwrap());
        let err = service.begin(None, REDIRECT).await.unwrap_err();
        assert!(matches!(err, InstalazError::Auth(AuthError::AppNotConfigured)));
    }
}
