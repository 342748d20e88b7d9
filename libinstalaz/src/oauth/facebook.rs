//! Facebook Graph endpoints for the OAuth flow

use async_trait::async_trait;
use secrecy::ExposeSecret;
use serde::Deserialize;
use serde_json::Value;

use super::{AppCredentials, AuthResult, FacebookApi, LinkedAccount, TokenGrant, TokenInfo};
use crate::config::Config;
use crate::error::{AuthError, PublishError, Result};
use crate::graph::http::GraphClient;
use crate::types::AccessToken;

pub struct HttpFacebook {
    client: GraphClient,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    expires_in: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct PagesResponse {
    #[serde(default)]
    data: Vec<Page>,
}

#[derive(Debug, Deserialize)]
struct Page {
    id: String,
    #[serde(default)]
    name: String,
    instagram_business_account: Option<IdOnly>,
}

#[derive(Debug, Deserialize)]
struct IdOnly {
    id: String,
}

#[derive(Debug, Deserialize)]
struct InstagramProfile {
    id: String,
    username: Option<String>,
    profile_picture_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DebugEnvelope {
    data: DebugData,
}

#[derive(Debug, Deserialize)]
struct DebugData {
    #[serde(default)]
    is_valid: bool,
    expires_at: Option<i64>,
    data_access_expires_at: Option<i64>,
    app_id: Option<String>,
    user_id: Option<String>,
}

impl HttpFacebook {
    pub fn new(client: GraphClient) -> Self {
        Self { client }
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        let client = GraphClient::for_version(
            &config.facebook.graph_version,
            config.publisher.http_timeout,
        )?;
        Ok(Self::new(client))
    }

    async fn token_request(&self, params: &[(&str, &str)]) -> std::result::Result<TokenGrant, PublishError> {
        let value = self.client.get("oauth/access_token", params).await?;
        let response: TokenResponse = parse(value)?;
        let token = response
            .access_token
            .ok_or_else(|| PublishError::Rejected("no access_token in response".to_string()))?;
        Ok(TokenGrant {
            token: AccessToken::new(token),
            expires_in: response.expires_in,
        })
    }
}

fn parse<T: serde::de::DeserializeOwned>(value: Value) -> std::result::Result<T, PublishError> {
    serde_json::from_value(value)
        .map_err(|e| PublishError::Rejected(format!("Unexpected Facebook response: {}", e)))
}

fn upstream(e: PublishError) -> AuthError {
    AuthError::Upstream(e.to_string())
}

#[async_trait]
impl FacebookApi for HttpFacebook {
    async fn exchange_code(
        &self,
        app: &AppCredentials,
        code: &str,
        redirect_uri: &str,
    ) -> AuthResult<TokenGrant> {
        self.token_request(&[
            ("client_id", app.app_id.as_str()),
            ("client_secret", app.app_secret.expose_secret()),
            ("redirect_uri", redirect_uri),
            ("code", code),
        ])
        .await
        .map_err(|e| match e {
            PublishError::Network(_) => upstream(e),
            other => AuthError::CodeRejected(other.to_string()),
        })
    }

    async fn exchange_long_lived(
        &self,
        app: &AppCredentials,
        short_lived: &AccessToken,
    ) -> AuthResult<TokenGrant> {
        self.token_request(&[
            ("grant_type", "fb_exchange_token"),
            ("client_id", app.app_id.as_str()),
            ("client_secret", app.app_secret.expose_secret()),
            ("fb_exchange_token", short_lived.expose()),
        ])
        .await
        .map_err(upstream)
    }

    async fn instagram_accounts(&self, token: &AccessToken) -> AuthResult<Vec<LinkedAccount>> {
        let value = self
            .client
            .get(
                "me/accounts",
                &[
                    ("fields", "id,name,instagram_business_account"),
                    ("access_token", token.expose()),
                ],
            )
            .await
            .map_err(upstream)?;
        let pages: PagesResponse = parse(value).map_err(upstream)?;

        let mut linked = Vec::new();
        for page in pages.data {
            let Some(ig) = page.instagram_business_account else {
                continue;
            };
            let value = self
                .client
                .get(
                    &ig.id,
                    &[
                        ("fields", "id,username,profile_picture_url"),
                        ("access_token", token.expose()),
                    ],
                )
                .await
                .map_err(upstream)?;
            let profile: InstagramProfile = parse(value).map_err(upstream)?;
            linked.push(LinkedAccount {
                ig_user_id: profile.id,
                username: profile.username.unwrap_or_else(|| "unknown".to_string()),
                profile_picture_url: profile.profile_picture_url,
                page_id: page.id,
                page_name: page.name,
            });
        }
        Ok(linked)
    }

    async fn debug_token(&self, app: &AppCredentials, token: &AccessToken) -> AuthResult<TokenInfo> {
        let app_token = app.app_token();
        let value = self
            .client
            .get(
                "debug_token",
                &[
                    ("input_token", token.expose()),
                    ("access_token", app_token.expose()),
                ],
            )
            .await
            .map_err(upstream)?;
        let envelope: DebugEnvelope = parse(value).map_err(upstream)?;
        Ok(token_info(envelope.data))
    }
}

/// `expires_at` of 0 means the token never expires; fall back to the data access expiry
fn token_info(data: DebugData) -> TokenInfo {
    let expires_at = data
        .expires_at
        .filter(|t| *t > 0)
        .or(data.data_access_expires_at.filter(|t| *t > 0));
    TokenInfo {
        is_valid: data.is_valid,
        expires_at,
        app_id: data.app_id,
        user_id: data.user_id,
    }
}
