//! Scriptable Facebook endpoints for tests

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};

use super::{AppCredentials, AuthResult, FacebookApi, LinkedAccount, TokenGrant, TokenInfo};
use crate::error::AuthError;
use crate::types::AccessToken;

/// Accepts the code `good-code`; every other code is rejected
#[derive(Debug, Default)]
pub struct MockFacebook {
    accounts: Vec<LinkedAccount>,
    /// `expires_in` reported for the long-lived token; `None` omits it
    pub long_lived_expires_in: Option<i64>,
    /// Whether an existing long-lived token can be traded for `refreshed-token`
    pub refreshable: bool,
    exchanges: AtomicUsize,
}

impl MockFacebook {
    pub fn with_accounts(accounts: Vec<LinkedAccount>) -> Self {
        Self {
            accounts,
            ..Default::default()
        }
    }

    pub fn linked(ig_user_id: &str, username: &str) -> LinkedAccount {
        LinkedAccount {
            ig_user_id: ig_user_id.to_string(),
            username: username.to_string(),
            profile_picture_url: None,
            page_id: format!("page-{}", ig_user_id),
            page_name: format!("{} page", username),
        }
    }

    /// Code exchanges attempted so far
    pub fn exchange_count(&self) -> usize {
        self.exchanges.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FacebookApi for MockFacebook {
    async fn exchange_code(
        &self,
        _app: &AppCredentials,
        code: &str,
        _redirect_uri: &str,
    ) -> AuthResult<TokenGrant> {
        self.exchanges.fetch_add(1, Ordering::SeqCst);
        if code != "good-code" {
            return Err(AuthError::CodeRejected(
                "This authorization code has been used".to_string(),
            ));
        }
        Ok(TokenGrant {
            token: AccessToken::new("short-lived-token"),
            expires_in: Some(7200),
        })
    }

    async fn exchange_long_lived(
        &self,
        _app: &AppCredentials,
        short_lived: &AccessToken,
    ) -> AuthResult<TokenGrant> {
        let token = match short_lived.expose() {
            "short-lived-token" => "long-lived-token",
            _ if self.refreshable => "refreshed-token",
            _ => return Err(AuthError::Upstream("Invalid OAuth access token".to_string())),
        };
        Ok(TokenGrant {
            token: AccessToken::new(token),
            expires_in: self.long_lived_expires_in,
        })
    }

    async fn instagram_accounts(&self, _token: &AccessToken) -> AuthResult<Vec<LinkedAccount>> {
        Ok(self.accounts.clone())
    }

    async fn debug_token(&self, app: &AppCredentials, token: &AccessToken) -> AuthResult<TokenInfo> {
        Ok(TokenInfo {
            is_valid: matches!(token.expose(), "long-lived-token" | "refreshed-token"),
            expires_at: None,
            app_id: Some(app.app_id.clone()),
            user_id: None,
        })
    }
}
