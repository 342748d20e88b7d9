//! Posting service
//!
//! The single path by which anything gets published, shared by the scheduler
//! and the dashboard's "Run" and "Publish" actions.
//!
//! # Order of operations
//!
//! 1. Take the account's busy lock (a second concurrent attempt fails with
//!    [`InstalazError::AccountBusy`] before any network traffic).
//! 2. Fetch a valid token; an expired token fails here.
//! 3. Resolve content and the caption.
//! 4. Reserve the items as `pending` in post history.
//! 5. Run the two-phase publish.
//! 6. Mark the reservation `posted` or `failed`, advance the caption.
//! 7. Record run status and an activity row, notify, emit events.
//! 8. Release the lock.
//!
//! Because items are reserved before the first Graph call, a crash mid-publish
//! leaves them `pending` and they are never picked again.

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::events::{Event, EventBus};
use crate::activity::ActivityLogger;
use crate::clock::Clock;
use crate::config::PublisherConfig;
use crate::content::ContentResolver;
use crate::db::Database;
use crate::error::{InstalazError, PublishError, Result};
use crate::notify::Notifier;
use crate::publisher::{Media, PublishRequest, Published, Publisher};
use crate::token_store::TokenStore;
use crate::types::{Account, AccountKind, AccountStatus, ContentItem, PostOutcome, Slot};

/// A lock older than this is considered abandoned
pub const BUSY_TIMEOUT_SECS: i64 = 30 * 60;

/// Instagram's limit on carousel slides
pub const MAX_CAROUSEL_ITEMS: usize = 10;

/// What started a publish
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    Manual,
    Scheduled(Slot),
}

impl Trigger {
    pub fn label(&self) -> &'static str {
        match self {
            Trigger::Manual => "manual",
            Trigger::Scheduled(slot) => slot.as_str(),
        }
    }

    pub fn slot(&self) -> Option<Slot> {
        match self {
            Trigger::Manual => None,
            Trigger::Scheduled(slot) => Some(*slot),
        }
    }
}

/// Items picked on the dashboard for a one-off publish
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SelectedRequest {
    /// Image URLs in slide order (carousel accounts)
    #[serde(default)]
    pub images: Vec<String>,
    /// Video URL (reel accounts)
    #[serde(default)]
    pub video: Option<String>,
    /// Overrides the next caption from the caption list
    #[serde(default)]
    pub caption: Option<String>,
    #[serde(default)]
    pub hide_likes: Option<bool>,
    /// Overrides the configured first comment; empty disables it
    #[serde(default)]
    pub first_comment: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PostReport {
    pub account_id: i64,
    pub batch_id: String,
    pub media_id: String,
    pub permalink: Option<String>,
    pub items: Vec<String>,
    pub caption: String,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct PostingOptions {
    pub hide_likes: bool,
    pub first_comment: Option<String>,
    pub busy_timeout_secs: i64,
}

impl Default for PostingOptions {
    fn default() -> Self {
        Self::from(&PublisherConfig::default())
    }
}

impl From<&PublisherConfig> for PostingOptions {
    fn from(config: &PublisherConfig) -> Self {
        Self {
            hide_likes: config.hide_likes,
            first_comment: config.first_comment.clone(),
            busy_timeout_secs: BUSY_TIMEOUT_SECS,
        }
    }
}

/// Proof that the account's busy lock is held
///
/// Hand it to [`PostingService::run_next`] or
/// [`PostingService::run_selected`], which release the lock when done.
#[must_use = "the busy lock stays held until the lease is run"]
#[derive(Debug)]
pub struct Lease {
    account: Account,
}

impl Lease {
    pub fn account(&self) -> &Account {
        &self.account
    }
}

enum Job {
    Next(Trigger),
    Selected(SelectedRequest),
}

impl Job {
    fn label(&self) -> &'static str {
        match self {
            Job::Next(trigger) => trigger.label(),
            Job::Selected(_) => "manual",
        }
    }
}

struct Plan {
    items: Vec<ContentItem>,
    caption: String,
    caption_from_list: bool,
    hide_likes: bool,
    first_comment: Option<String>,
    slot: Option<Slot>,
}

#[derive(Clone)]
pub struct PostingService {
    db: Database,
    tokens: TokenStore,
    content: ContentResolver,
    publisher: Arc<Publisher>,
    notifier: Arc<dyn Notifier>,
    activity: ActivityLogger,
    events: EventBus,
    clock: Arc<dyn Clock>,
    options: PostingOptions,
}

impl PostingService {
    pub fn new(
        tokens: TokenStore,
        content: ContentResolver,
        publisher: Arc<Publisher>,
        notifier: Arc<dyn Notifier>,
        events: EventBus,
        options: PostingOptions,
    ) -> Self {
        let db = tokens.db().clone();
        let clock = tokens.clock().clone();
        Self {
            activity: ActivityLogger::new(db.clone(), clock.clone()),
            db,
            tokens,
            content,
            publisher,
            notifier,
            events,
            clock,
            options,
        }
    }

    /// Take the busy lock for `account_id`
    pub async fn acquire(&self, account_id: i64) -> Result<Lease> {
        let account = self.db.require_account(account_id).await?;
        let now = self.clock.timestamp();
        let stale_before = now - self.options.busy_timeout_secs;
        if !self.db.try_acquire_busy(account_id, now, stale_before).await? {
            debug!(account_id, "Account busy, not publishing");
            return Err(InstalazError::AccountBusy(account_id));
        }
        Ok(Lease { account })
    }

    /// Publish the next unposted content of the account
    pub async fn publish_next(&self, account_id: i64, trigger: Trigger) -> Result<PostReport> {
        let lease = self.acquire(account_id).await?;
        self.run_next(lease, trigger).await
    }

    /// Publish items chosen on the dashboard
    pub async fn publish_selected(&self, account_id: i64, request: SelectedRequest) -> Result<PostReport> {
        let lease = self.acquire(account_id).await?;
        self.run_selected(lease, request).await
    }

    pub async fn run_next(&self, lease: Lease, trigger: Trigger) -> Result<PostReport> {
        self.run(lease, Job::Next(trigger)).await
    }

    pub async fn run_selected(&self, lease: Lease, request: SelectedRequest) -> Result<PostReport> {
        self.run(lease, Job::Selected(request)).await
    }

    async fn run(&self, lease: Lease, job: Job) -> Result<PostReport> {
        let account = lease.account;
        let label = job.label();
        info!(account_id = account.id, account = %account.name, trigger = label, "Publish started");

        self.events.emit(Event::PublishStarted {
            account_id: account.id,
            account_name: account.name.clone(),
            trigger: label.to_string(),
        });
        self.set_run(&account, "running", &format!("Starting automation ({})...", label))
            .await;

        let result = self.attempt(&account, &job).await;
        match &result {
            Ok(report) => self.on_success(&account, label, report).await,
            Err(e) => self.on_failure(&account, e).await,
        }

        if let Err(e) = self.db.release_busy(account.id).await {
            warn!(account_id = account.id, "Failed to release busy lock: {}", e);
        }
        result
    }

    async fn attempt(&self, account: &Account, job: &Job) -> Result<PostReport> {
        let token = self.tokens.get_valid_token(account.id).await?;
        let ig_user_id = account.ig_user_id.clone().ok_or_else(|| {
            InstalazError::InvalidInput(format!(
                "Account '{}' is not connected to an Instagram user",
                account.name
            ))
        })?;

        let plan = self.plan(account, job).await?;
        let media = match account.kind {
            AccountKind::Carousel => Media::Carousel(plan.items.iter().map(|i| i.url.clone()).collect()),
            AccountKind::Reel => match plan.items.first() {
                Some(item) => Media::Reel(item.url.clone()),
                None => return Err(InstalazError::InvalidInput("No video selected".to_string())),
            },
        };
        let request = PublishRequest {
            media,
            caption: plan.caption.clone(),
            hide_likes: plan.hide_likes,
            first_comment: plan.first_comment.clone(),
        };

        let batch_id = Uuid::new_v4().to_string();
        self.db
            .reserve_items(&batch_id, account.id, &plan.items, plan.slot, self.clock.timestamp())
            .await?;

        let account_id = account.id;
        let progress = |status: &str| {
            debug!(account_id, "{}", status);
            self.events.emit(Event::PublishProgress {
                account_id,
                status: status.to_string(),
            });
        };

        match self.publisher.publish(&ig_user_id, &token, &request, &progress).await {
            Ok(published) => {
                self.settle(&batch_id, PostOutcome::Posted, Some(&published), None).await;
                if plan.caption_from_list {
                    if let Err(e) = self.db.advance_caption_index(account.id).await {
                        warn!(account_id, "Failed to advance caption index: {}", e);
                    }
                }
                Ok(PostReport {
                    account_id,
                    batch_id,
                    message: success_message(account.kind, &published),
                    media_id: published.media_id,
                    permalink: published.permalink,
                    items: plan.items.into_iter().map(|i| i.id).collect(),
                    caption: plan.caption,
                })
            }
            Err(e) => {
                // An unconfirmed publish may be live; pending rows keep the items out of reuse
                let outcome = match e {
                    PublishError::Unconfirmed(_) => PostOutcome::Pending,
                    _ => PostOutcome::Failed,
                };
                self.settle(&batch_id, outcome, None, Some(&e.to_string())).await;
                if matches!(e, PublishError::AuthExpired(_)) {
                    self.db
                        .set_account_status(account.id, AccountStatus::Expired, self.clock.timestamp())
                        .await?;
                }
                Err(e.into())
            }
        }
    }

    async fn plan(&self, account: &Account, job: &Job) -> Result<Plan> {
        match job {
            Job::Next(trigger) => {
                let count = match account.kind {
                    AccountKind::Carousel => account.slides_per_post.max(1) as usize,
                    AccountKind::Reel => 1,
                };
                let items = self.content.next_items(account, count).await?;
                let caption = self.content.peek_caption(account).await?;
                Ok(Plan {
                    items,
                    caption,
                    caption_from_list: true,
                    hide_likes: self.options.hide_likes,
                    first_comment: self.options.first_comment.clone(),
                    slot: trigger.slot(),
                })
            }
            Job::Selected(request) => {
                let urls = validate_selection(account, request)?;
                let items = self.content.resolve_selected(account, &urls).await?;
                let (caption, caption_from_list) = match request.caption.as_deref().map(str::trim) {
                    Some(caption) if !caption.is_empty() => (caption.to_string(), false),
                    _ => (self.content.peek_caption(account).await?, true),
                };
                let first_comment = match &request.first_comment {
                    Some(comment) if comment.trim().is_empty() => None,
                    Some(comment) => Some(comment.clone()),
                    None => self.options.first_comment.clone(),
                };
                Ok(Plan {
                    items,
                    caption,
                    caption_from_list,
                    hide_likes: request.hide_likes.unwrap_or(self.options.hide_likes),
                    first_comment,
                    slot: None,
                })
            }
        }
    }

    async fn settle(&self, batch_id: &str, outcome: PostOutcome, published: Option<&Published>, error: Option<&str>) {
        let result = self
            .db
            .finish_batch(
                batch_id,
                outcome,
                published.map(|p| p.media_id.as_str()),
                published.and_then(|p| p.permalink.as_deref()),
                error,
                self.clock.timestamp(),
            )
            .await;
        // The rows stay `pending`, which still keeps the items from being reused
        if let Err(e) = result {
            warn!(batch_id, "Failed to settle post history: {}", e);
        }
    }

    async fn on_success(&self, account: &Account, trigger: &str, report: &PostReport) {
        self.set_run(account, "success", &report.message).await;
        let details = json!({
            "media_id": report.media_id,
            "permalink": report.permalink,
            "items": report.items,
            "trigger": trigger,
        });
        if let Err(e) = self
            .activity
            .success(Some(account.id), "publish", &report.message, Some(details))
            .await
        {
            warn!(account_id = account.id, "Failed to write activity log: {}", e);
        }
        self.notifier
            .publish_succeeded(
                &account.name,
                account.kind.as_str(),
                report.permalink.as_deref(),
                &report.media_id,
            )
            .await;
        self.events.emit(Event::PublishCompleted {
            account_id: account.id,
            media_id: report.media_id.clone(),
            permalink: report.permalink.clone(),
        });
    }

    async fn on_failure(&self, account: &Account, err: &InstalazError) {
        let message = match self.activity.failure(Some(account.id), "publish", err).await {
            Ok(message) => message,
            Err(e) => {
                warn!(account_id = account.id, "Failed to write activity log: {}", e);
                err.to_string()
            }
        };
        self.set_run(account, "error", &message).await;
        self.notifier
            .publish_failed(&account.name, &err.to_string())
            .await;
        self.events.emit(Event::PublishFailed {
            account_id: account.id,
            kind: err.failure_kind().as_str().to_string(),
            error: err.to_string(),
        });
    }

    async fn set_run(&self, account: &Account, status: &str, message: &str) {
        let now = self.clock.timestamp();
        if let Err(e) = self.db.record_run(account.id, now, status, message).await {
            warn!(account_id = account.id, "Failed to record run status: {}", e);
        }
    }
}

/// Check a dashboard selection against the account kind; returns the URLs to publish
pub fn validate_selection(account: &Account, request: &SelectedRequest) -> Result<Vec<String>> {
    match account.kind {
        AccountKind::Carousel => {
            let images: Vec<String> = request
                .images
                .iter()
                .map(|u| u.trim().to_string())
                .filter(|u| !u.is_empty())
                .collect();
            if images.is_empty() {
                return Err(InstalazError::InvalidInput("No slides selected".to_string()));
            }
            if images.len() > MAX_CAROUSEL_ITEMS {
                return Err(InstalazError::InvalidInput(format!(
                    "A carousel holds at most {} slides, {} selected",
                    MAX_CAROUSEL_ITEMS,
                    images.len()
                )));
            }
            Ok(images)
        }
        AccountKind::Reel => match request.video.as_deref().map(str::trim) {
            Some(video) if !video.is_empty() => Ok(vec![video.to_string()]),
            _ => Err(InstalazError::InvalidInput("No video selected".to_string())),
        },
    }
}

fn success_message(kind: AccountKind, published: &Published) -> String {
    let label = match kind {
        AccountKind::Carousel => "Carousel",
        AccountKind::Reel => "Reel",
    };
    format!(
        "{} published ✅ Media ID: {} Permalink: {}",
        label,
        published.media_id,
        published.permalink.as_deref().unwrap_or("n/a")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::content::mock::StaticFetcher;
    use crate::graph::mock::{GraphCall, MockGraph, MockGraphConfig};
    use crate::notify::RecordingNotifier;
    use crate::publisher::PublishPolicy;
    use crate::types::{AccessToken, ActivityStatus, NewAccount, RefreshType};
    use chrono::{TimeZone, Utc};
    use std::time::Duration;
    use tempfile::TempDir;

    const CAPTIONS: &str = "https://cdn.example.com/captions.txt";

    struct Fixture {
        _dir: TempDir,
        db: Database,
        clock: ManualClock,
        graph: Arc<MockGraph>,
        notifier: Arc<RecordingNotifier>,
        events: EventBus,
        service: PostingService,
    }

    async fn fixture(graph: MockGraph) -> Fixture {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.db");
        let db = Database::new(path.to_str().unwrap()).await.unwrap();
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2026, 3, 1, 7, 30, 0).unwrap());
        let tokens = TokenStore::new(db.clone(), Arc::new(clock.clone()));
        let fetcher = StaticFetcher::new().with_text(CAPTIONS, "Rise and shine\nKeep going\n");
        let content = ContentResolver::new(Arc::new(fetcher), db.clone());
        let graph = Arc::new(graph);
        let publisher = Arc::new(Publisher::new(graph.clone(), PublishPolicy::immediate()));
        let notifier = Arc::new(RecordingNotifier::new());
        let events = EventBus::new(64);
        let service = PostingService::new(
            tokens,
            content,
            publisher,
            notifier.clone(),
            events.clone(),
            PostingOptions::default(),
        );
        Fixture {
            _dir: dir,
            db,
            clock,
            graph,
            notifier,
            events,
            service,
        }
    }

    async fn connected_account(fx: &Fixture, kind: AccountKind) -> Account {
        let mut new = NewAccount::new("@daily", kind);
        new.ig_user_id = Some("17841400001234".to_string());
        new.base_url = Some("https://cdn.example.com/img".to_string());
        new.video_base_url = Some("https://cdn.example.com/vid".to_string());
        new.caption_url = Some(CAPTIONS.to_string());
        new.slides_per_post = 2;
        new.max_items = 6;
        let account = fx.db.create_account(&new, fx.clock.timestamp()).await.unwrap();
        fx.service
            .tokens
            .record_token(
                account.id,
                &AccessToken::new("EAAB"),
                fx.clock.timestamp() + 86_400 * 30,
                RefreshType::ShortToLong,
            )
            .await
            .unwrap();
        account
    }

    #[tokio::test]
    async fn test_publish_next_records_everything() {
        let fx = fixture(MockGraph::success()).await;
        let account = connected_account(&fx, AccountKind::Carousel).await;
        let mut events = fx.events.subscribe();

        let report = fx
            .service
            .publish_next(account.id, Trigger::Scheduled(Slot::Morning))
            .await
            .unwrap();

        assert_eq!(report.items, vec!["img (1).jpg", "img (2).jpg"]);
        assert_eq!(report.caption, "Rise and shine");
        assert!(report.message.starts_with("Carousel published ✅ Media ID: "));

        let history = fx.db.post_history(Some(account.id), 10).await.unwrap();
        assert_eq!(history.len(), 2);
        assert!(history.iter().all(|h| h.outcome == PostOutcome::Posted));
        assert!(history.iter().all(|h| h.slot.as_deref() == Some("morning")));

        let account = fx.db.require_account(account.id).await.unwrap();
        assert_eq!(account.caption_index, 1);
        assert_eq!(account.last_run.status.as_deref(), Some("success"));
        assert!(account.busy_since.is_none());

        let activity = fx.db.recent_activity(Some(account.id), 10).await.unwrap();
        assert!(activity.iter().any(|a| a.status == ActivityStatus::Success && a.action == "publish"));
        assert_eq!(fx.notifier.messages().len(), 1);

        assert!(matches!(events.recv().await.unwrap(), Event::PublishStarted { .. }));
        let mut completed = false;
        while let Ok(event) = events.try_recv() {
            if matches!(event, Event::PublishCompleted { .. }) {
                completed = true;
            }
        }
        assert!(completed);

        // Next run moves on to fresh content and the next caption
        let report = fx.service.publish_next(account.id, Trigger::Manual).await.unwrap();
        assert_eq!(report.items, vec!["img (3).jpg", "img (4).jpg"]);
        assert_eq!(report.caption, "Keep going");
    }

    #[tokio::test]
    async fn test_expired_token_fails_before_network() {
        let fx = fixture(MockGraph::success()).await;
        let account = connected_account(&fx, AccountKind::Carousel).await;
        fx.clock.advance(chrono::Duration::days(31));

        let err = fx.service.publish_next(account.id, Trigger::Manual).await.unwrap_err();

        assert!(matches!(err, InstalazError::TokenExpired { .. }));
        assert!(fx.graph.calls().is_empty());
        assert!(fx.db.post_history(Some(account.id), 10).await.unwrap().is_empty());

        let account = fx.db.require_account(account.id).await.unwrap();
        assert_eq!(account.status, AccountStatus::Expired);
        assert_eq!(account.last_run.status.as_deref(), Some("error"));
        assert!(account.busy_since.is_none());
        assert!(fx.notifier.messages()[0].contains("Publish failed"));
    }

    #[tokio::test]
    async fn test_busy_account_rejected_without_network() {
        let fx = fixture(MockGraph::success()).await;
        let account = connected_account(&fx, AccountKind::Carousel).await;

        let lease = fx.service.acquire(account.id).await.unwrap();
        let err = fx.service.publish_next(account.id, Trigger::Manual).await.unwrap_err();
        assert!(matches!(err, InstalazError::AccountBusy(_)));
        assert!(fx.graph.calls().is_empty());

        fx.service.run_next(lease, Trigger::Manual).await.unwrap();
        assert!(fx.service.publish_next(account.id, Trigger::Manual).await.is_ok());
    }

    #[tokio::test]
    async fn test_stale_lock_is_taken_over() {
        let fx = fixture(MockGraph::success()).await;
        let account = connected_account(&fx, AccountKind::Carousel).await;

        let _abandoned = fx.service.acquire(account.id).await.unwrap();
        fx.clock.advance(chrono::Duration::seconds(BUSY_TIMEOUT_SECS + 1));

        assert!(fx.service.publish_next(account.id, Trigger::Manual).await.is_ok());
    }

    #[tokio::test]
    async fn test_publish_failure_marks_items_failed_and_reusable() {
        let fx = fixture(MockGraph::publish_failure(PublishError::InvalidMedia(
            "The aspect ratio is not supported (HTTP 400, code 36003)".to_string(),
        )))
        .await;
        let account = connected_account(&fx, AccountKind::Carousel).await;

        let err = fx.service.publish_next(account.id, Trigger::Manual).await.unwrap_err();
        assert!(matches!(err, InstalazError::Publish(PublishError::InvalidMedia(_))));

        let history = fx.db.post_history(Some(account.id), 10).await.unwrap();
        assert!(history.iter().all(|h| h.outcome == PostOutcome::Failed));
        assert!(history[0].error.as_deref().unwrap().contains("36003"));

        // Caption not consumed; failed items are eligible again
        let account = fx.db.require_account(account.id).await.unwrap();
        assert_eq!(account.caption_index, 0);
        assert!(fx.db.used_item_ids(account.id).await.unwrap().is_empty());

        let activity = fx.db.recent_activity(Some(account.id), 10).await.unwrap();
        let row = activity.iter().find(|a| a.status == ActivityStatus::Error).unwrap();
        assert!(row.message.contains("Instagram couldn't use"));
    }

    #[tokio::test]
    async fn test_unconfirmed_publish_keeps_items_reserved() {
        let fx = fixture(MockGraph::new(MockGraphConfig {
            lost_publish_responses: 1,
            ..Default::default()
        }))
        .await;
        let account = connected_account(&fx, AccountKind::Carousel).await;

        let err = fx.service.publish_next(account.id, Trigger::Manual).await.unwrap_err();
        assert!(matches!(err, InstalazError::Publish(PublishError::Unconfirmed(_))));
        assert_eq!(fx.graph.publish_count(), 1);

        let history = fx.db.post_history(Some(account.id), 10).await.unwrap();
        assert!(history.iter().all(|h| h.outcome == PostOutcome::Pending));
        assert!(history[0].error.is_some());
        assert_eq!(fx.db.used_item_ids(account.id).await.unwrap().len(), 2);

        let report = fx.service.publish_next(account.id, Trigger::Manual).await.unwrap();
        assert_eq!(report.items, vec!["img (3).jpg", "img (4).jpg"]);
    }

    #[tokio::test]
    async fn test_auth_rejection_expires_account() {
        let fx = fixture(MockGraph::publish_failure(PublishError::AuthExpired(
            "Error validating access token (HTTP 400, code 190)".to_string(),
        )))
        .await;
        let account = connected_account(&fx, AccountKind::Carousel).await;

        fx.service.publish_next(account.id, Trigger::Manual).await.unwrap_err();
        let account = fx.db.require_account(account.id).await.unwrap();
        assert_eq!(account.status, AccountStatus::Expired);
    }

    #[tokio::test]
    async fn test_reel_publish_next() {
        let fx = fixture(MockGraph::success()).await;
        let account = connected_account(&fx, AccountKind::Reel).await;

        let report = fx.service.publish_next(account.id, Trigger::Manual).await.unwrap();
        assert_eq!(report.items, vec!["vid.mp4"]);
        assert!(report.message.starts_with("Reel published"));
        assert!(matches!(
            &fx.graph.calls()[0],
            GraphCall::CreateReel { video_url, hide_likes: true, .. } if video_url == "https://cdn.example.com/vid/vid.mp4"
        ));
    }

    #[tokio::test]
    async fn test_publish_selected_with_custom_caption() {
        let fx = fixture(MockGraph::success()).await;
        let account = connected_account(&fx, AccountKind::Carousel).await;

        let request = SelectedRequest {
            images: vec![
                "https://cdn.example.com/img/img%20(5).jpg".to_string(),
                "https://cdn.example.com/img/img%20(3).jpg".to_string(),
            ],
            caption: Some("Handpicked".to_string()),
            hide_likes: Some(false),
            first_comment: Some(String::new()),
            ..Default::default()
        };
        let report = fx.service.publish_selected(account.id, request).await.unwrap();

        assert_eq!(report.items, vec!["img (5).jpg", "img (3).jpg"]);
        assert_eq!(report.caption, "Handpicked");
        let calls = fx.graph.calls();
        assert!(calls.iter().any(|c| matches!(
            c,
            GraphCall::CreateCarousel { caption, hide_likes: false, .. } if caption == "Handpicked"
        )));
        assert!(!calls.iter().any(|c| matches!(c, GraphCall::Comment { .. })));

        // Custom caption leaves the caption list where it was
        let account = fx.db.require_account(account.id).await.unwrap();
        assert_eq!(account.caption_index, 0);
    }

    #[tokio::test]
    async fn test_publish_selected_rejects_used_items() {
        let fx = fixture(MockGraph::success()).await;
        let account = connected_account(&fx, AccountKind::Carousel).await;
        fx.service.publish_next(account.id, Trigger::Manual).await.unwrap();
        let publishes = fx.graph.publish_count();

        let request = SelectedRequest {
            images: vec!["https://cdn.example.com/img/img%20(1).jpg".to_string()],
            ..Default::default()
        };
        let err = fx.service.publish_selected(account.id, request).await.unwrap_err();
        assert!(matches!(err, InstalazError::InvalidInput(_)));
        assert_eq!(fx.graph.publish_count(), publishes);
    }

    #[tokio::test]
    async fn test_publish_selected_validation() {
        let fx = fixture(MockGraph::success()).await;
        let account = connected_account(&fx, AccountKind::Carousel).await;

        let empty = fx
            .service
            .publish_selected(account.id, SelectedRequest::default())
            .await
            .unwrap_err();
        assert!(matches!(empty, InstalazError::InvalidInput(_)));

        let too_many = SelectedRequest {
            images: (1..=11).map(|i| format!("https://x/{}.jpg", i)).collect(),
            ..Default::default()
        };
        let err = fx.service.publish_selected(account.id, too_many).await.unwrap_err();
        assert!(matches!(err, InstalazError::InvalidInput(_)));
        assert!(fx.graph.calls().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_attempts_publish_once() {
        let fx = fixture(MockGraph::new(MockGraphConfig {
            delay: Duration::from_millis(20),
            ..Default::default()
        }))
        .await;
        let account = connected_account(&fx, AccountKind::Carousel).await;

        let (a, b) = tokio::join!(
            fx.service.publish_next(account.id, Trigger::Manual),
            fx.service.publish_next(account.id, Trigger::Manual),
        );

        let outcomes = [a, b];
        assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(outcomes
            .iter()
            .any(|r| matches!(r, Err(InstalazError::AccountBusy(_)))));
        assert_eq!(fx.graph.publish_count(), 1);
    }
}
