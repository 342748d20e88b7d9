//! Per-account OAuth token storage and expiry enforcement
//!
//! `TokenStore::get_valid_token` is the only way publish code obtains a
//! token; an expired token fails here before any network call is made.

use sha2::{Digest, Sha256};
use sqlx::Row;
use std::sync::Arc;
use tracing::warn;

use crate::clock::Clock;
use crate::db::{AccountProfile, Database};
use crate::error::{DbError, InstalazError, Result};
use crate::types::{
    AccessToken, Account, AccountStatus, ActivityStatus, NewAccount, RefreshType, TokenState,
    TokenStatus,
};

/// Long-lived Instagram tokens are valid for 60 days
pub const LONG_LIVED_TOKEN_SECS: i64 = 60 * 24 * 3600;

/// Tokens closer than this to expiry are reported as expiring soon
pub const EXPIRING_SOON_DAYS: i64 = 7;

const SECS_PER_DAY: i64 = 86_400;

#[derive(Clone)]
pub struct TokenStore {
    db: Database,
    clock: Arc<dyn Clock>,
}

impl TokenStore {
    pub fn new(db: Database, clock: Arc<dyn Clock>) -> Self {
        Self { db, clock }
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Create the account, or refresh the profile of the one with the same IG user id
    pub async fn upsert_account(&self, account: &NewAccount) -> Result<Account> {
        let now = self.clock.timestamp();

        if let Some(ig_user_id) = account.ig_user_id.as_deref() {
            if let Some(existing) = self.db.find_account_by_ig_user(ig_user_id).await? {
                let profile = AccountProfile {
                    page_id: account.page_id.clone(),
                    page_name: account.page_name.clone(),
                    instagram_username: account.instagram_username.clone(),
                    profile_picture_url: account.profile_picture_url.clone(),
                };
                self.db
                    .update_account_profile(existing.id, &profile, now)
                    .await?;
                return self.db.require_account(existing.id).await;
            }
        }

        self.db.create_account(account, now).await
    }

    /// Return the account's token if it has not expired
    ///
    /// An expired token flips the account to `expired` and leaves a
    /// reconnect prompt in the activity log.
    pub async fn get_valid_token(&self, account_id: i64) -> Result<AccessToken> {
        let row = sqlx::query(
            "SELECT access_token, token_expires_at, status FROM accounts WHERE id = ?",
        )
        .bind(account_id)
        .fetch_optional(self.db.pool())
        .await
        .map_err(DbError::SqlxError)?
        .ok_or_else(|| InstalazError::NotFound(format!("account {}", account_id)))?;

        let token: Option<String> = row.get("access_token");
        let expires_at: Option<i64> = row.get("token_expires_at");
        let status = AccountStatus::from_db(row.get::<String, _>("status").as_str());
        let now = self.clock.timestamp();

        let (token, expires_at) = match (token, expires_at) {
            (Some(token), Some(expires_at)) if status != AccountStatus::Disconnected => {
                (token, expires_at)
            }
            (_, expires_at) => {
                return Err(InstalazError::TokenExpired {
                    account_id,
                    expired_at: expires_at.unwrap_or(0),
                })
            }
        };

        if expires_at <= now {
            if status == AccountStatus::Active {
                warn!(account_id, expires_at, "Access token expired");
                self.db
                    .set_account_status(account_id, AccountStatus::Expired, now)
                    .await?;
                self.db
                    .insert_activity(
                        Some(account_id),
                        "token_expired",
                        ActivityStatus::Warning,
                        "Your Instagram connection has expired. Please reconnect the account from the dashboard.",
                        None,
                        now,
                    )
                    .await?;
            }
            return Err(InstalazError::TokenExpired {
                account_id,
                expired_at: expires_at,
            });
        }

        Ok(AccessToken::new(token))
    }

    /// Store a new token, overwriting the previous one, and reactivate the account
    pub async fn record_token(
        &self,
        account_id: i64,
        token: &AccessToken,
        expires_at: i64,
        refresh_type: RefreshType,
    ) -> Result<()> {
        let now = self.clock.timestamp();
        let mut tx = self.db.pool().begin().await.map_err(DbError::SqlxError)?;

        let old: Option<(Option<String>,)> =
            sqlx::query_as("SELECT access_token FROM accounts WHERE id = ?")
                .bind(account_id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(DbError::SqlxError)?;
        let old_token = match old {
            Some((old_token,)) => old_token,
            None => return Err(InstalazError::NotFound(format!("account {}", account_id))),
        };

        sqlx::query(
            r#"
            UPDATE accounts
            SET access_token = ?, token_expires_at = ?, last_token_refresh = ?,
                status = 'active', updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(token.expose())
        .bind(expires_at)
        .bind(now)
        .bind(now)
        .bind(account_id)
        .execute(&mut *tx)
        .await
        .map_err(DbError::SqlxError)?;

        sqlx::query(
            r#"
            INSERT INTO token_history
                (account_id, old_fingerprint, new_fingerprint, refresh_type, expires_at, refreshed_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(account_id)
        .bind(old_token.as_deref().map(fingerprint))
        .bind(fingerprint(token.expose()))
        .bind(refresh_type.as_str())
        .bind(expires_at)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(DbError::SqlxError)?;

        tx.commit().await.map_err(DbError::SqlxError)?;
        Ok(())
    }

    /// Active accounts whose token expires within `within_days`
    pub async fn expiring_accounts(&self, within_days: i64) -> Result<Vec<Account>> {
        let cutoff = self.clock.timestamp() + within_days * SECS_PER_DAY;

        let accounts = self.db.list_accounts().await?;
        Ok(accounts
            .into_iter()
            .filter(|a| a.status == AccountStatus::Active)
            .filter(|a| matches!(a.token_expires_at, Some(exp) if exp <= cutoff))
            .collect())
    }

    pub async fn token_status(&self, account_id: i64) -> Result<TokenStatus> {
        let account = self.db.require_account(account_id).await?;
        let expires_at = if account.has_token {
            account.token_expires_at
        } else {
            None
        };
        Ok(token_status_at(expires_at, self.clock.timestamp()))
    }

    /// Number of token writes recorded for the account
    pub async fn history_len(&self, account_id: i64) -> Result<i64> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM token_history WHERE account_id = ?")
                .bind(account_id)
                .fetch_one(self.db.pool())
                .await
                .map_err(DbError::SqlxError)?;
        Ok(count)
    }
}

/// Classify a token expiry relative to `now`
pub fn token_status_at(expires_at: Option<i64>, now: i64) -> TokenStatus {
    let Some(expires_at) = expires_at else {
        return TokenStatus {
            status: TokenState::Unknown,
            expires_at: None,
            days_remaining: None,
        };
    };

    let days_remaining = (expires_at - now).div_euclid(SECS_PER_DAY);
    let status = if expires_at <= now {
        TokenState::Expired
    } else if days_remaining <= EXPIRING_SOON_DAYS {
        TokenState::ExpiringSoon
    } else {
        TokenState::Valid
    };

    TokenStatus {
        status,
        expires_at: Some(expires_at),
        days_remaining: Some(days_remaining),
    }
}

/// Short SHA-256 fingerprint; raw tokens never reach the history table
pub fn fingerprint(token: &str) -> String {
    let digest = Sha256::digest(token.as_bytes());
    hex::encode(&digest[..8])
}
