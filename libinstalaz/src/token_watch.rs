//! Daily handling of access tokens close to expiry
//!
//! Once per local day each active account whose token expires within the
//! warning window gets one refresh attempt. When the refresh fails the
//! account gets a `token_expiring` warning and a notification instead.

use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::activity::ActivityLogger;
use crate::error::Result;
use crate::notify::Notifier;
use crate::oauth::OAuthService;
use crate::types::RefreshType;

const SECS_PER_DAY: i64 = 86_400;

/// Settings key holding the last local date an account was checked
fn checked_key(account_id: i64) -> String {
    format!("token_checked.{}", account_id)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TokenCheck {
    Refreshed { account_id: i64, expires_at: i64 },
    Warned { account_id: i64, days_remaining: i64 },
}

pub struct TokenWatch {
    oauth: Arc<OAuthService>,
    notifier: Arc<dyn Notifier>,
    activity: ActivityLogger,
    warning_days: i64,
}

impl TokenWatch {
    pub fn new(oauth: Arc<OAuthService>, notifier: Arc<dyn Notifier>, warning_days: i64) -> Self {
        let tokens = oauth.tokens();
        let activity = ActivityLogger::new(tokens.db().clone(), tokens.clock().clone());
        Self {
            oauth,
            notifier,
            activity,
            warning_days,
        }
    }

    /// Check every expiring account not yet checked on `local_date`
    pub async fn check(&self, local_date: &str) -> Result<Vec<TokenCheck>> {
        let tokens = self.oauth.tokens();
        let db = tokens.db();
        let now = tokens.clock().timestamp();
        let mut checks = Vec::new();

        for account in tokens.expiring_accounts(self.warning_days).await? {
            // Lapsed tokens are flipped to expired on the next publish attempt
            let Some(expires_at) = account.token_expires_at.filter(|&exp| exp > now) else {
                continue;
            };
            let key = checked_key(account.id);
            if db.get_setting(&key).await?.as_deref() == Some(local_date) {
                debug!(account_id = account.id, local_date, "Token already checked today");
                continue;
            }
            db.set_setting(&key, local_date, now).await?;

            match self.oauth.refresh_token(account.id, RefreshType::AutoRefresh).await {
                Ok(new_expiry) => {
                    self.activity
                        .success(
                            Some(account.id),
                            "token_refreshed",
                            &format!("Access token for {} refreshed", account.name),
                            Some(json!({ "expires_at": new_expiry })),
                        )
                        .await?;
                    checks.push(TokenCheck::Refreshed {
                        account_id: account.id,
                        expires_at: new_expiry,
                    });
                }
                Err(e) => {
                    warn!(account_id = account.id, "Token refresh failed: {}", e);
                    let days_remaining = (expires_at - now).div_euclid(SECS_PER_DAY);
                    self.activity
                        .warning(
                            Some(account.id),
                            "token_expiring",
                            &format!(
                                "Access token for {} expires in {} days. Reconnect the account soon.",
                                account.name, days_remaining
                            ),
                        )
                        .await?;
                    self.notifier
                        .token_expiring(&account.name, days_remaining)
                        .await;
                    checks.push(TokenCheck::Warned {
                        account_id: account.id,
                        days_remaining,
                    });
                }
            }
        }
        Ok(checks)
    }
}
