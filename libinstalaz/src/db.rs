//! Database operations for Instalaz

use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::Row;
use std::collections::HashSet;
use std::path::Path;

use crate::error::{DbError, InstalazError, Result};
use crate::types::{
    Account, AccountKind, AccountStatus, AccountUpdate, ActivityEntry, ActivityStatus,
    ContentItem, NewAccount, PostHistoryEntry, PostOutcome, RunStatus, Slot, SlotFlags,
};

const ACCOUNT_COLUMNS: &str = r#"
    id, name, kind, ig_user_id, page_id, page_name, instagram_username,
    profile_picture_url, access_token IS NOT NULL AS has_token, token_expires_at,
    last_token_refresh, status, caption_url, base_url, video_base_url, manifest_url,
    slides_per_post, max_items, caption_index, state_prefix, schedule_enabled,
    slot_morning, slot_afternoon, slot_evening, slot_night, app_id, busy_since,
    last_run_at, last_run_status, last_run_message, created_at, updated_at
"#;

/// Profile fields discovered through the Graph API at connect time
#[derive(Debug, Clone, Default)]
pub struct AccountProfile {
    pub page_id: Option<String>,
    pub page_name: Option<String>,
    pub instagram_username: Option<String>,
    pub profile_picture_url: Option<String>,
}

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Create a new database connection
    pub async fn new(db_path: &str) -> Result<Self> {
        // Expand path and create parent directories
        let expanded_path = shellexpand::tilde(db_path).to_string();
        let path = Path::new(&expanded_path);

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(DbError::IoError)?;
        }

        // Forward slashes work on both Windows and Unix; mode=rwc creates the file
        let db_url = format!("sqlite://{}?mode=rwc", expanded_path.replace('\\', "/"));

        let pool = SqlitePool::connect(&db_url)
            .await
            .map_err(DbError::SqlxError)?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(DbError::MigrationError)?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // ------------------------------------------------------------------
    // Accounts
    // ------------------------------------------------------------------

    /// Create an account, deriving a state prefix when none is given
    pub async fn create_account(&self, account: &NewAccount, now: i64) -> Result<Account> {
        account.validate()?;

        let state_prefix = match &account.state_prefix {
            Some(prefix) => prefix.clone(),
            None => derive_state_prefix(account.ig_user_id.as_deref()),
        };

        let result = sqlx::query(
            r#"
            INSERT INTO accounts (
                name, kind, ig_user_id, page_id, page_name, instagram_username,
                profile_picture_url, caption_url, base_url, video_base_url, manifest_url,
                slides_per_post, max_items, state_prefix, schedule_enabled,
                slot_morning, slot_afternoon, slot_evening, slot_night,
                created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&account.name)
        .bind(account.kind.as_str())
        .bind(&account.ig_user_id)
        .bind(&account.page_id)
        .bind(&account.page_name)
        .bind(&account.instagram_username)
        .bind(&account.profile_picture_url)
        .bind(&account.caption_url)
        .bind(&account.base_url)
        .bind(&account.video_base_url)
        .bind(&account.manifest_url)
        .bind(account.slides_per_post as i64)
        .bind(account.max_items as i64)
        .bind(&state_prefix)
        .bind(account.schedule_enabled)
        .bind(account.slots.morning)
        .bind(account.slots.afternoon)
        .bind(account.slots.evening)
        .bind(account.slots.night)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        self.require_account(result.last_insert_rowid()).await
    }

    pub async fn get_account(&self, id: i64) -> Result<Option<Account>> {
        let sql = format!("SELECT {} FROM accounts WHERE id = ?", ACCOUNT_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        Ok(row.as_ref().map(account_from_row))
    }

    /// Like `get_account`, but a missing account is an error
    pub async fn require_account(&self, id: i64) -> Result<Account> {
        self.get_account(id)
            .await?
            .ok_or_else(|| InstalazError::NotFound(format!("account {}", id)))
    }

    pub async fn find_account_by_ig_user(&self, ig_user_id: &str) -> Result<Option<Account>> {
        let sql = format!("SELECT {} FROM accounts WHERE ig_user_id = ?", ACCOUNT_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(ig_user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        Ok(row.as_ref().map(account_from_row))
    }

    pub async fn find_account_by_state_prefix(&self, prefix: &str) -> Result<Option<Account>> {
        let sql = format!("SELECT {} FROM accounts WHERE state_prefix = ?", ACCOUNT_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(prefix)
            .fetch_optional(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        Ok(row.as_ref().map(account_from_row))
    }

    pub async fn list_accounts(&self) -> Result<Vec<Account>> {
        let sql = format!("SELECT {} FROM accounts ORDER BY id", ACCOUNT_COLUMNS);
        let rows = sqlx::query(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        Ok(rows.iter().map(account_from_row).collect())
    }

    /// Apply a partial update; absent fields keep their value
    pub async fn update_account(&self, id: i64, update: &AccountUpdate, now: i64) -> Result<Account> {
        let current = self.require_account(id).await?;

        let name = update.name.clone().unwrap_or(current.name);
        if name.trim().is_empty() {
            return Err(InstalazError::InvalidInput(
                "Account name cannot be empty".to_string(),
            ));
        }
        let slides_per_post = update.slides_per_post.unwrap_or(current.slides_per_post);
        if !(1..=10).contains(&slides_per_post) {
            return Err(InstalazError::InvalidInput(format!(
                "slides_per_post must be between 1 and 10 (got {})",
                slides_per_post
            )));
        }
        let kind = update.kind.unwrap_or(current.kind);
        let slots = update.slots.unwrap_or(current.slots);

        sqlx::query(
            r#"
            UPDATE accounts SET
                name = ?, kind = ?,
                caption_url = COALESCE(?, caption_url),
                base_url = COALESCE(?, base_url),
                video_base_url = COALESCE(?, video_base_url),
                manifest_url = COALESCE(?, manifest_url),
                slides_per_post = ?,
                max_items = COALESCE(?, max_items),
                schedule_enabled = COALESCE(?, schedule_enabled),
                slot_morning = ?, slot_afternoon = ?, slot_evening = ?, slot_night = ?,
                app_id = COALESCE(?, app_id),
                app_secret = COALESCE(?, app_secret),
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&name)
        .bind(kind.as_str())
        .bind(&update.caption_url)
        .bind(&update.base_url)
        .bind(&update.video_base_url)
        .bind(&update.manifest_url)
        .bind(slides_per_post as i64)
        .bind(update.max_items.map(|v| v as i64))
        .bind(update.schedule_enabled)
        .bind(slots.morning)
        .bind(slots.afternoon)
        .bind(slots.evening)
        .bind(slots.night)
        .bind(&update.app_id)
        .bind(&update.app_secret)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        self.require_account(id).await
    }

    /// Refresh Graph-sourced profile fields after a (re)connect
    pub async fn update_account_profile(
        &self,
        id: i64,
        profile: &AccountProfile,
        now: i64,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE accounts SET
                page_id = COALESCE(?, page_id),
                page_name = COALESCE(?, page_name),
                instagram_username = COALESCE(?, instagram_username),
                profile_picture_url = COALESCE(?, profile_picture_url),
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&profile.page_id)
        .bind(&profile.page_name)
        .bind(&profile.instagram_username)
        .bind(&profile.profile_picture_url)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    /// Attach an Instagram user to an account created without one
    pub async fn link_ig_user(&self, id: i64, ig_user_id: &str, now: i64) -> Result<()> {
        sqlx::query("UPDATE accounts SET ig_user_id = ?, updated_at = ? WHERE id = ?")
            .bind(ig_user_id)
            .bind(now)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        Ok(())
    }

    pub async fn set_account_status(&self, id: i64, status: AccountStatus, now: i64) -> Result<()> {
        let result = sqlx::query("UPDATE accounts SET status = ?, updated_at = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(now)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        if result.rows_affected() == 0 {
            return Err(InstalazError::NotFound(format!("account {}", id)));
        }
        Ok(())
    }

    /// Delete an account and everything recorded for it
    pub async fn delete_account(&self, id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM accounts WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn advance_caption_index(&self, id: i64) -> Result<()> {
        sqlx::query("UPDATE accounts SET caption_index = caption_index + 1 WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        Ok(())
    }

    /// Per-account App ID/Secret override, if both are set
    pub async fn account_app_credentials(&self, id: i64) -> Result<Option<(String, String)>> {
        let row = sqlx::query_as::<_, (Option<String>, Option<String>)>(
            "SELECT app_id, app_secret FROM accounts WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(match row {
            Some((Some(app_id), Some(app_secret)))
                if !app_id.is_empty() && !app_secret.is_empty() =>
            {
                Some((app_id, app_secret))
            }
            _ => None,
        })
    }

    /// Take the per-account publish lock
    ///
    /// Succeeds when the account is idle or its lock is older than
    /// `stale_before`. Returns false when another publish holds it.
    pub async fn try_acquire_busy(&self, id: i64, now: i64, stale_before: i64) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE accounts SET busy_since = ?
            WHERE id = ? AND (busy_since IS NULL OR busy_since < ?)
            "#,
        )
        .bind(now)
        .bind(id)
        .bind(stale_before)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(result.rows_affected() == 1)
    }

    pub async fn release_busy(&self, id: i64) -> Result<()> {
        sqlx::query("UPDATE accounts SET busy_since = NULL WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        Ok(())
    }

    pub async fn record_run(&self, id: i64, now: i64, status: &str, message: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE accounts
            SET last_run_at = ?, last_run_status = ?, last_run_message = ?
            WHERE id = ?
            "#,
        )
        .bind(now)
        .bind(status)
        .bind(message)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    // ------------------------------------------------------------------
    // App settings
    // ------------------------------------------------------------------

    pub async fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let row = sqlx::query_as::<_, (String,)>("SELECT value FROM app_settings WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        Ok(row.map(|r| r.0))
    }

    pub async fn set_setting(&self, key: &str, value: &str, now: i64) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO app_settings (key, value, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    // ------------------------------------------------------------------
    // Activity log
    // ------------------------------------------------------------------

    pub async fn insert_activity(
        &self,
        account_id: Option<i64>,
        action: &str,
        status: ActivityStatus,
        message: &str,
        details: Option<&serde_json::Value>,
        now: i64,
    ) -> Result<i64> {
        let details = details.map(|d| d.to_string());

        let result = sqlx::query(
            r#"
            INSERT INTO activity_logs (account_id, action, status, message, details, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(account_id)
        .bind(action)
        .bind(status.as_str())
        .bind(message)
        .bind(details)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(result.last_insert_rowid())
    }

    /// Newest first
    pub async fn recent_activity(
        &self,
        account_id: Option<i64>,
        limit: usize,
    ) -> Result<Vec<ActivityEntry>> {
        let mut sql = String::from(
            r#"
            SELECT l.id, l.account_id, a.name AS account_name, l.action, l.status,
                   l.message, l.details, l.created_at
            FROM activity_logs l
            LEFT JOIN accounts a ON a.id = l.account_id
            "#,
        );
        if account_id.is_some() {
            sql.push_str(" WHERE l.account_id = ?");
        }
        sql.push_str(" ORDER BY l.created_at DESC, l.id DESC LIMIT ?");

        let mut query = sqlx::query(&sql);
        if let Some(account_id) = account_id {
            query = query.bind(account_id);
        }
        let rows = query
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        Ok(rows
            .iter()
            .map(|r| ActivityEntry {
                id: r.get("id"),
                account_id: r.get("account_id"),
                account_name: r.get("account_name"),
                action: r.get("action"),
                status: ActivityStatus::from_db(r.get::<String, _>("status").as_str()),
                message: r.get("message"),
                details: r
                    .get::<Option<String>, _>("details")
                    .and_then(|d| serde_json::from_str(&d).ok()),
                created_at: r.get("created_at"),
            })
            .collect())
    }

    // ------------------------------------------------------------------
    // Post history
    // ------------------------------------------------------------------

    /// Reserve items as `pending` for one publish attempt
    ///
    /// All-or-nothing: if any item is already pending or posted for the
    /// account, nothing is reserved.
    pub async fn reserve_items(
        &self,
        batch_id: &str,
        account_id: i64,
        items: &[ContentItem],
        slot: Option<Slot>,
        now: i64,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(DbError::SqlxError)?;

        for item in items {
            let result = sqlx::query(
                r#"
                INSERT INTO post_history
                    (batch_id, account_id, item_id, item_url, slot, outcome, created_at, updated_at)
                VALUES (?, ?, ?, ?, ?, 'pending', ?, ?)
                "#,
            )
            .bind(batch_id)
            .bind(account_id)
            .bind(&item.id)
            .bind(&item.url)
            .bind(slot.map(|s| s.as_str()))
            .bind(now)
            .bind(now)
            .execute(&mut *tx)
            .await;

            if let Err(e) = result {
                if is_unique_violation(&e) {
                    return Err(InstalazError::InvalidInput(format!(
                        "{} has already been posted",
                        item.id
                    )));
                }
                return Err(DbError::SqlxError(e).into());
            }
        }

        tx.commit().await.map_err(DbError::SqlxError)?;
        Ok(())
    }

    /// Settle every row of a publish attempt
    pub async fn finish_batch(
        &self,
        batch_id: &str,
        outcome: PostOutcome,
        media_id: Option<&str>,
        permalink: Option<&str>,
        error: Option<&str>,
        now: i64,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE post_history
            SET outcome = ?, media_id = ?, permalink = ?, error = ?, updated_at = ?
            WHERE batch_id = ?
            "#,
        )
        .bind(outcome.as_str())
        .bind(media_id)
        .bind(permalink)
        .bind(error)
        .bind(now)
        .bind(batch_id)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    /// Item ids that must never be selected again for this account
    pub async fn used_item_ids(&self, account_id: i64) -> Result<HashSet<String>> {
        let rows = sqlx::query_as::<_, (String,)>(
            r#"
            SELECT item_id FROM post_history
            WHERE account_id = ? AND outcome IN ('pending', 'posted')
            "#,
        )
        .bind(account_id)
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(rows.into_iter().map(|r| r.0).collect())
    }

    /// Newest first
    pub async fn post_history(
        &self,
        account_id: Option<i64>,
        limit: usize,
    ) -> Result<Vec<PostHistoryEntry>> {
        let mut sql = String::from(
            r#"
            SELECT id, batch_id, account_id, item_id, item_url, slot, outcome,
                   media_id, permalink, error, created_at, updated_at
            FROM post_history
            "#,
        );
        if account_id.is_some() {
            sql.push_str(" WHERE account_id = ?");
        }
        sql.push_str(" ORDER BY created_at DESC, id DESC LIMIT ?");

        let mut query = sqlx::query(&sql);
        if let Some(account_id) = account_id {
            query = query.bind(account_id);
        }
        let rows = query
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        Ok(rows.iter().map(post_history_from_row).collect())
    }

    // ------------------------------------------------------------------
    // Scheduler bookkeeping
    // ------------------------------------------------------------------

    /// Record that `slot` fired for the account on `local_date`
    ///
    /// Returns false when it already fired that day.
    pub async fn claim_slot_run(
        &self,
        account_id: i64,
        slot: Slot,
        local_date: &str,
        now: i64,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO slot_runs (account_id, slot, local_date, fired_at)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(account_id)
        .bind(slot.as_str())
        .bind(local_date)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(result.rows_affected() == 1)
    }

    // ------------------------------------------------------------------
    // OAuth states
    // ------------------------------------------------------------------

    pub async fn insert_oauth_state(
        &self,
        state: &str,
        state_prefix: &str,
        account_id: Option<i64>,
        now: i64,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO oauth_states (state, state_prefix, account_id, created_at)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(state)
        .bind(state_prefix)
        .bind(account_id)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    /// Remove and return an issued state: (prefix, account id, issued at)
    pub async fn take_oauth_state(&self, state: &str) -> Result<Option<(String, Option<i64>, i64)>> {
        let row = sqlx::query_as::<_, (String, Option<i64>, i64)>(
            r#"
            DELETE FROM oauth_states WHERE state = ?
            RETURNING state_prefix, account_id, created_at
            "#,
        )
        .bind(state)
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(row)
    }

    pub async fn purge_oauth_states(&self, issued_before: i64) -> Result<u64> {
        let result = sqlx::query("DELETE FROM oauth_states WHERE created_at < ?")
            .bind(issued_before)
            .execute(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        Ok(result.rows_affected())
    }
}

/// `ig_` plus the last six characters of the IG user id, or a random suffix
fn derive_state_prefix(ig_user_id: Option<&str>) -> String {
    match ig_user_id {
        Some(ig) if !ig.is_empty() => {
            let skip = ig.chars().count().saturating_sub(6);
            format!("ig_{}", ig.chars().skip(skip).collect::<String>())
        }
        _ => format!("acct_{}", &uuid::Uuid::new_v4().simple().to_string()[..8]),
    }
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    match e {
        sqlx::Error::Database(db_err) => db_err.is_unique_violation(),
        _ => false,
    }
}

fn account_from_row(r: &SqliteRow) -> Account {
    Account {
        id: r.get("id"),
        name: r.get("name"),
        kind: match r.get::<String, _>("kind").as_str() {
            "reel" => AccountKind::Reel,
            _ => AccountKind::Carousel,
        },
        ig_user_id: r.get("ig_user_id"),
        page_id: r.get("page_id"),
        page_name: r.get("page_name"),
        instagram_username: r.get("instagram_username"),
        profile_picture_url: r.get("profile_picture_url"),
        has_token: r.get::<i64, _>("has_token") != 0,
        token_expires_at: r.get("token_expires_at"),
        last_token_refresh: r.get("last_token_refresh"),
        status: AccountStatus::from_db(r.get::<String, _>("status").as_str()),
        caption_url: r.get("caption_url"),
        base_url: r.get("base_url"),
        video_base_url: r.get("video_base_url"),
        manifest_url: r.get("manifest_url"),
        slides_per_post: r.get::<i64, _>("slides_per_post") as u32,
        max_items: r.get::<i64, _>("max_items") as u32,
        caption_index: r.get("caption_index"),
        state_prefix: r.get("state_prefix"),
        schedule_enabled: r.get::<i64, _>("schedule_enabled") != 0,
        slots: SlotFlags {
            morning: r.get::<i64, _>("slot_morning") != 0,
            afternoon: r.get::<i64, _>("slot_afternoon") != 0,
            evening: r.get::<i64, _>("slot_evening") != 0,
            night: r.get::<i64, _>("slot_night") != 0,
        },
        app_id: r.get("app_id"),
        busy_since: r.get("busy_since"),
        last_run: RunStatus {
            at: r.get("last_run_at"),
            status: r.get("last_run_status"),
            message: r.get("last_run_message"),
        },
        created_at: r.get("created_at"),
        updated_at: r.get("updated_at"),
    }
}

fn post_history_from_row(r: &SqliteRow) -> PostHistoryEntry {
    PostHistoryEntry {
        id: r.get("id"),
        batch_id: r.get("batch_id"),
        account_id: r.get("account_id"),
        item_id: r.get("item_id"),
        item_url: r.get("item_url"),
        slot: r.get("slot"),
        outcome: PostOutcome::from_db(r.get::<String, _>("outcome").as_str()),
        media_id: r.get("media_id"),
        permalink: r.get("permalink"),
        error: r.get("error"),
        created_at: r.get("created_at"),
        updated_at: r.get("updated_at"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MediaKind;
    use tempfile::TempDir;

    async fn test_db() -> (TempDir, Database) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("instalaz.db");
        let db = Database::new(path.to_str().unwrap()).await.unwrap();
        (dir, db)
    }

    fn image(n: u32) -> ContentItem {
        ContentItem {
            id: format!("img ({}).jpg", n),
            url: format!("https://cdn.example.com/img%20({}).jpg", n),
            kind: MediaKind::Image,
        }
    }

    #[tokio::test]
    async fn test_create_and_get_account() {
        let (_dir, db) = test_db().await;

        let mut new = NewAccount::new("@sunsets", AccountKind::Carousel);
        new.ig_user_id = Some("17841400000123456".to_string());
        new.slides_per_post = 3;
        let account = db.create_account(&new, 1000).await.unwrap();

        assert_eq!(account.name, "@sunsets");
        assert_eq!(account.state_prefix, "ig_123456");
        assert_eq!(account.slides_per_post, 3);
        assert_eq!(account.status, AccountStatus::Active);
        assert!(!account.has_token);
        assert!(account.schedule_enabled);

        let by_ig = db
            .find_account_by_ig_user("17841400000123456")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(by_ig.id, account.id);

        let by_prefix = db.find_account_by_state_prefix("ig_123456").await.unwrap();
        assert_eq!(by_prefix.unwrap().id, account.id);
    }

    #[test]
    fn test_state_prefix_keeps_whole_characters() {
        assert_eq!(derive_state_prefix(Some("17841400000123456")), "ig_123456");
        assert_eq!(derive_state_prefix(Some("1é34567")), "ig_é34567");
        assert_eq!(derive_state_prefix(Some("78")), "ig_78");
    }

    #[tokio::test]
    async fn test_create_account_rejects_malformed_ig_user_id() {
        let (_dir, db) = test_db().await;
        let mut new = NewAccount::new("@daily", AccountKind::Carousel);
        new.ig_user_id = Some("1é34567".to_string());

        let err = db.create_account(&new, 1).await.unwrap_err();
        assert!(matches!(err, InstalazError::InvalidInput(_)));
        assert!(db.list_accounts().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_manual_accounts_get_random_prefix() {
        let (_dir, db) = test_db().await;

        let a = db
            .create_account(&NewAccount::new("one", AccountKind::Reel), 1)
            .await
            .unwrap();
        let b = db
            .create_account(&NewAccount::new("two", AccountKind::Reel), 1)
            .await
            .unwrap();

        assert!(a.state_prefix.starts_with("acct_"));
        assert_ne!(a.state_prefix, b.state_prefix);
        assert_eq!(db.list_accounts().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_require_missing_account_is_not_found() {
        let (_dir, db) = test_db().await;
        let err = db.require_account(42).await.unwrap_err();
        assert!(matches!(err, InstalazError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_update_account_partial() {
        let (_dir, db) = test_db().await;
        let mut new = NewAccount::new("@quotes", AccountKind::Carousel);
        new.base_url = Some("https://cdn.example.com/q".to_string());
        let account = db.create_account(&new, 1).await.unwrap();

        let update = AccountUpdate {
            caption_url: Some("https://cdn.example.com/captions.txt".to_string()),
            slots: Some(SlotFlags {
                night: false,
                ..SlotFlags::default()
            }),
            ..Default::default()
        };
        let updated = db.update_account(account.id, &update, 2).await.unwrap();

        assert_eq!(updated.base_url.as_deref(), Some("https://cdn.example.com/q"));
        assert_eq!(
            updated.caption_url.as_deref(),
            Some("https://cdn.example.com/captions.txt")
        );
        assert!(!updated.slots.night);
        assert!(updated.slots.morning);
        assert_eq!(updated.updated_at, 2);

        let bad = AccountUpdate {
            slides_per_post: Some(0),
            ..Default::default()
        };
        assert!(db.update_account(account.id, &bad, 3).await.is_err());
    }

    #[tokio::test]
    async fn test_busy_lock_is_exclusive_until_stale() {
        let (_dir, db) = test_db().await;
        let account = db
            .create_account(&NewAccount::new("a", AccountKind::Carousel), 0)
            .await
            .unwrap();

        assert!(db.try_acquire_busy(account.id, 100, 0).await.unwrap());
        assert!(!db.try_acquire_busy(account.id, 101, 0).await.unwrap());

        // Lock taken at 100 counts as stale for anyone using a later cutoff
        assert!(db.try_acquire_busy(account.id, 5000, 200).await.unwrap());

        db.release_busy(account.id).await.unwrap();
        assert!(db.try_acquire_busy(account.id, 5001, 0).await.unwrap());
    }

    #[tokio::test]
    async fn test_reserve_items_blocks_reuse() {
        let (_dir, db) = test_db().await;
        let account = db
            .create_account(&NewAccount::new("a", AccountKind::Carousel), 0)
            .await
            .unwrap();

        db.reserve_items("b1", account.id, &[image(1), image(2)], Some(Slot::Morning), 10)
            .await
            .unwrap();

        let used = db.used_item_ids(account.id).await.unwrap();
        assert!(used.contains("img (1).jpg"));
        assert!(used.contains("img (2).jpg"));

        // Overlapping reservation fails as a whole
        let err = db
            .reserve_items("b2", account.id, &[image(3), image(2)], None, 11)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("img (2).jpg"));
        assert!(!db.used_item_ids(account.id).await.unwrap().contains("img (3).jpg"));
    }

    #[tokio::test]
    async fn test_failed_items_can_be_retried() {
        let (_dir, db) = test_db().await;
        let account = db
            .create_account(&NewAccount::new("a", AccountKind::Carousel), 0)
            .await
            .unwrap();

        db.reserve_items("b1", account.id, &[image(1)], None, 10)
            .await
            .unwrap();
        db.finish_batch("b1", PostOutcome::Failed, None, None, Some("boom"), 11)
            .await
            .unwrap();
        assert!(db.used_item_ids(account.id).await.unwrap().is_empty());

        db.reserve_items("b2", account.id, &[image(1)], None, 12)
            .await
            .unwrap();
        db.finish_batch("b2", PostOutcome::Posted, Some("1789"), Some("https://instagram.com/p/x"), None, 13)
            .await
            .unwrap();

        let history = db.post_history(Some(account.id), 10).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].outcome, PostOutcome::Posted);
        assert_eq!(history[0].media_id.as_deref(), Some("1789"));
        assert_eq!(history[1].outcome, PostOutcome::Failed);
        assert_eq!(history[1].error.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn test_claim_slot_run_once_per_day() {
        let (_dir, db) = test_db().await;
        let account = db
            .create_account(&NewAccount::new("a", AccountKind::Carousel), 0)
            .await
            .unwrap();

        assert!(db.claim_slot_run(account.id, Slot::Morning, "2026-03-01", 1).await.unwrap());
        assert!(!db.claim_slot_run(account.id, Slot::Morning, "2026-03-01", 2).await.unwrap());
        assert!(db.claim_slot_run(account.id, Slot::Evening, "2026-03-01", 3).await.unwrap());
        assert!(db.claim_slot_run(account.id, Slot::Morning, "2026-03-02", 4).await.unwrap());
    }

    #[tokio::test]
    async fn test_activity_newest_first_with_filter() {
        let (_dir, db) = test_db().await;
        let account = db
            .create_account(&NewAccount::new("@a", AccountKind::Carousel), 0)
            .await
            .unwrap();

        db.insert_activity(None, "settings", ActivityStatus::Info, "Saved", None, 1)
            .await
            .unwrap();
        let details = serde_json::json!({"failure_kind": "network"});
        db.insert_activity(
            Some(account.id),
            "post",
            ActivityStatus::Error,
            "Network issue",
            Some(&details),
            2,
        )
        .await
        .unwrap();

        let all = db.recent_activity(None, 10).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].message, "Network issue");
        assert_eq!(all[0].account_name.as_deref(), Some("@a"));
        assert_eq!(all[0].details.as_ref().unwrap()["failure_kind"], "network");

        let scoped = db.recent_activity(Some(account.id), 10).await.unwrap();
        assert_eq!(scoped.len(), 1);
    }

    #[tokio::test]
    async fn test_oauth_state_taken_once() {
        let (_dir, db) = test_db().await;
        db.insert_oauth_state("new.abc.sig", "new", None, 50).await.unwrap();

        let taken = db.take_oauth_state("new.abc.sig").await.unwrap();
        assert_eq!(taken, Some(("new".to_string(), None, 50)));
        assert_eq!(db.take_oauth_state("new.abc.sig").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_settings_upsert() {
        let (_dir, db) = test_db().await;
        assert_eq!(db.get_setting("facebook_app_id").await.unwrap(), None);

        db.set_setting("facebook_app_id", "111", 1).await.unwrap();
        db.set_setting("facebook_app_id", "222", 2).await.unwrap();
        assert_eq!(
            db.get_setting("facebook_app_id").await.unwrap().as_deref(),
            Some("222")
        );
    }

    #[tokio::test]
    async fn test_delete_account_cascades_history() {
        let (_dir, db) = test_db().await;
        let account = db
            .create_account(&NewAccount::new("a", AccountKind::Carousel), 0)
            .await
            .unwrap();
        db.reserve_items("b1", account.id, &[image(1)], None, 1)
            .await
            .unwrap();

        assert!(db.delete_account(account.id).await.unwrap());
        assert!(db.post_history(None, 10).await.unwrap().is_empty());
        assert!(!db.delete_account(account.id).await.unwrap());
    }
}
