//! Activity log in plain English
//!
//! Every row written here is shown on the dashboard, so messages are
//! phrased for account owners rather than operators. The technical error
//! goes into the row's `details` and into the tracing output.

use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::clock::Clock;
use crate::db::Database;
use crate::error::{FailureKind, InstalazError, Result};
use crate::types::{ActivityEntry, ActivityStatus};

/// Dashboard wording for a failure category
pub fn friendly_message(kind: FailureKind) -> &'static str {
    match kind {
        FailureKind::AuthExpired => {
            "Your Instagram session has expired. Please reconnect your account to continue posting."
        }
        FailureKind::RateLimited => {
            "You've made too many requests to Instagram. Posting will resume at the next scheduled time."
        }
        FailureKind::InvalidMedia => {
            "Instagram couldn't use this image or video. Check the file format, size and dimensions."
        }
        FailureKind::Network => {
            "Unable to connect to Instagram. Posting will be retried at the next scheduled time."
        }
        FailureKind::NotReady => {
            "Instagram didn't finish processing the media in time. It will be retried at the next scheduled time."
        }
        FailureKind::ContentExhausted => {
            "All available content has been posted. Add new files to keep posting."
        }
        FailureKind::ContentUnavailable => {
            "The content or caption list couldn't be loaded. Check that the URLs are reachable."
        }
        FailureKind::Busy => "A post for this account is already in progress.",
        FailureKind::Other => "Something went wrong while publishing.",
    }
}

#[derive(Clone)]
pub struct ActivityLogger {
    db: Database,
    clock: Arc<dyn Clock>,
}

impl ActivityLogger {
    pub fn new(db: Database, clock: Arc<dyn Clock>) -> Self {
        Self { db, clock }
    }

    /// Append a row and mirror it to tracing
    pub async fn log(
        &self,
        account_id: Option<i64>,
        action: &str,
        status: ActivityStatus,
        message: &str,
        details: Option<Value>,
    ) -> Result<i64> {
        match status {
            ActivityStatus::Error => error!(?account_id, action, "{}", message),
            ActivityStatus::Warning => warn!(?account_id, action, "{}", message),
            _ => info!(?account_id, action, "{}", message),
        }
        self.db
            .insert_activity(
                account_id,
                action,
                status,
                message,
                details.as_ref(),
                self.clock.timestamp(),
            )
            .await
    }

    pub async fn success(&self, account_id: Option<i64>, action: &str, message: &str, details: Option<Value>) -> Result<i64> {
        self.log(account_id, action, ActivityStatus::Success, message, details).await
    }

    pub async fn info(&self, account_id: Option<i64>, action: &str, message: &str) -> Result<i64> {
        self.log(account_id, action, ActivityStatus::Info, message, None).await
    }

    pub async fn warning(&self, account_id: Option<i64>, action: &str, message: &str) -> Result<i64> {
        self.log(account_id, action, ActivityStatus::Warning, message, None).await
    }

    /// Log `err` with its friendly wording; returns the message written
    pub async fn failure(&self, account_id: Option<i64>, action: &str, err: &InstalazError) -> Result<String> {
        let kind = err.failure_kind();
        let message = match kind {
            FailureKind::Other => format!("{} {}", friendly_message(kind), err),
            _ => friendly_message(kind).to_string(),
        };
        let details = json!({
            "kind": kind,
            "error": err.to_string(),
        });
        self.log(account_id, action, ActivityStatus::Error, &message, Some(details))
            .await?;
        Ok(message)
    }

    pub async fn recent(&self, account_id: Option<i64>, limit: usize) -> Result<Vec<ActivityEntry>> {
        self.db.recent_activity(account_id, limit).await
    }
}
