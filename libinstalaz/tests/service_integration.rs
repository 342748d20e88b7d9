//! Integration tests for InstalazService
//!
//! Drives the facade with in-process Graph, Facebook and content doubles.

use chrono::{TimeZone, Utc};
use libinstalaz::clock::{Clock, ManualClock};
use libinstalaz::content::mock::StaticFetcher;
use libinstalaz::graph::mock::{GraphCall, MockGraph, MockGraphConfig};
use libinstalaz::notify::RecordingNotifier;
use libinstalaz::oauth::mock::MockFacebook;
use libinstalaz::oauth::StateSigner;
use libinstalaz::publisher::PublishPolicy;
use libinstalaz::service::posting::Trigger;
use libinstalaz::service::{Backends, InstalazService};
use libinstalaz::types::{AccountUpdate, ActivityStatus, PostOutcome, TokenState};
use libinstalaz::{AccountKind, Config, Database, InstalazError};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

const REDIRECT_URI: &str = "http://localhost:5000/auth/callback";
const IMAGES: &str = "https://cdn.example.com/daily";

struct Harness {
    _dir: TempDir,
    service: InstalazService,
    graph: Arc<MockGraph>,
    notifier: Arc<RecordingNotifier>,
    clock: ManualClock,
}

async fn harness(graph: MockGraph) -> Harness {
    let dir = TempDir::new().unwrap();
    let mut config = Config::default_config();
    config.database.path = dir.path().join("test.db").to_string_lossy().into_owned();
    config.schedule.settings_file = dir
        .path()
        .join("schedule_settings.json")
        .to_string_lossy()
        .into_owned();
    config.schedule.utc_offset = Some("+00:00".to_string());

    let db = Database::new(&config.database.path).await.unwrap();
    let graph = Arc::new(graph);
    let notifier = Arc::new(RecordingNotifier::new());
    let clock = ManualClock::new(Utc.with_ymd_and_hms(2026, 3, 1, 7, 30, 0).unwrap());
    let facebook = MockFacebook::with_accounts(vec![MockFacebook::linked("17841400001234", "daily.quotes")]);

    let backends = Backends {
        graph: graph.clone(),
        fetcher: Arc::new(StaticFetcher::new()),
        facebook: Arc::new(facebook),
        notifier: notifier.clone(),
        clock: Arc::new(clock.clone()),
        signer: StateSigner::new(b"integration-secret"),
        policy: PublishPolicy::immediate(),
    };

    Harness {
        _dir: dir,
        service: InstalazService::with_backends(config, db, backends),
        graph,
        notifier,
        clock,
    }
}

fn state_param(login_url: &str) -> String {
    url::Url::parse(login_url)
        .unwrap()
        .query_pairs()
        .find(|(k, _)| k == "state")
        .map(|(_, v)| v.into_owned())
        .unwrap()
}

/// Run the onboarding flow and point the new account at the image host
async fn onboard(h: &Harness) -> i64 {
    let oauth = h.service.oauth();
    oauth.save_app_credentials("1234567890", "app-secret").await.unwrap();

    let login = oauth.begin(None, REDIRECT_URI).await.unwrap();
    let connected = oauth
        .complete("good-code", &state_param(&login), REDIRECT_URI)
        .await
        .unwrap();
    assert!(!connected.reconnected);
    let account = &connected.accounts[0];

    let update = AccountUpdate {
        base_url: Some(IMAGES.to_string()),
        max_items: Some(9),
        slides_per_post: Some(3),
        ..Default::default()
    };
    h.service
        .database()
        .update_account(account.id, &update, h.clock.now().timestamp())
        .await
        .unwrap();
    account.id
}

#[tokio::test]
async fn test_onboarding_to_first_publish() {
    let h = harness(MockGraph::success()).await;
    let id = onboard(&h).await;

    let account = h.service.database().require_account(id).await.unwrap();
    assert_eq!(account.name, "@daily.quotes");
    assert_eq!(account.kind, AccountKind::Carousel);
    assert_eq!(account.ig_user_id.as_deref(), Some("17841400001234"));

    let report = h.service.posting().publish_next(id, Trigger::Manual).await.unwrap();
    assert_eq!(report.items.len(), 3);

    let calls = h.graph.calls();
    let children = calls
        .iter()
        .filter(|c| matches!(c, GraphCall::CreateCarouselItem { .. }))
        .count();
    assert_eq!(children, 3);

    let activity = h.service.activity().recent(Some(id), 20).await.unwrap();
    let actions: Vec<&str> = activity.iter().map(|a| a.action.as_str()).collect();
    assert!(actions.contains(&"account_connected"));
    assert!(actions.contains(&"publish"));
    assert_eq!(h.notifier.messages().len(), 1);
}

#[tokio::test]
async fn test_posted_items_never_reselected() {
    let h = harness(MockGraph::success()).await;
    let id = onboard(&h).await;

    let mut seen = HashSet::new();
    for _ in 0..3 {
        let report = h.service.posting().publish_next(id, Trigger::Manual).await.unwrap();
        for item in report.items {
            assert!(seen.insert(item.clone()), "{} was published twice", item);
        }
    }
    assert_eq!(seen.len(), 9);

    // Resolver agrees there is nothing left
    let account = h.service.database().require_account(id).await.unwrap();
    let err = h.service.content().next_items(&account, 3).await.unwrap_err();
    assert!(matches!(err, InstalazError::ContentSource(_)));

    let err = h.service.posting().publish_next(id, Trigger::Manual).await.unwrap_err();
    assert_eq!(err.failure_kind().as_str(), "content_exhausted");
    assert_eq!(h.graph.publish_count(), 3);
}

#[tokio::test]
async fn test_expired_token_makes_no_network_calls() {
    let h = harness(MockGraph::success()).await;
    let id = onboard(&h).await;
    h.clock.advance(chrono::Duration::days(61));

    let err = h.service.posting().publish_next(id, Trigger::Manual).await.unwrap_err();
    assert!(matches!(err, InstalazError::TokenExpired { .. }));
    assert!(h.graph.calls().is_empty());

    let status = h.service.tokens().token_status(id).await.unwrap();
    assert_eq!(status.status, TokenState::Expired);
}

#[tokio::test]
async fn test_concurrent_attempts_exactly_one_succeeds() {
    let h = harness(MockGraph::new(MockGraphConfig {
        delay: Duration::from_millis(25),
        ..Default::default()
    }))
    .await;
    let id = onboard(&h).await;

    let posting = h.service.posting().clone();
    let tasks: Vec<_> = (0..4)
        .map(|_| {
            let posting = posting.clone();
            tokio::spawn(async move { posting.publish_next(id, Trigger::Manual).await })
        })
        .collect();

    let mut ok = 0;
    let mut busy = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => ok += 1,
            Err(InstalazError::AccountBusy(_)) => busy += 1,
            Err(e) => panic!("unexpected error: {}", e),
        }
    }
    assert_eq!(ok, 1);
    assert_eq!(busy, 3);
    assert_eq!(h.graph.publish_count(), 1);

    let history = h.service.database().post_history(Some(id), 50).await.unwrap();
    assert_eq!(history.len(), 3);
    assert!(history.iter().all(|row| row.outcome == PostOutcome::Posted));
}

#[tokio::test]
async fn test_failed_publish_reported_everywhere() {
    let h = harness(MockGraph::new(MockGraphConfig {
        container_error: Some("ERROR: unsupported image".to_string()),
        ..Default::default()
    }))
    .await;
    let id = onboard(&h).await;

    let err = h.service.posting().publish_next(id, Trigger::Manual).await.unwrap_err();
    assert_eq!(err.failure_kind().as_str(), "not_ready");
    assert_eq!(h.graph.publish_count(), 0);

    let account = h.service.database().require_account(id).await.unwrap();
    assert_eq!(account.last_run.status.as_deref(), Some("error"));

    let activity = h.service.activity().recent(Some(id), 20).await.unwrap();
    assert!(activity
        .iter()
        .any(|a| a.action == "publish" && a.status == ActivityStatus::Error));
    assert!(h.notifier.messages()[0].contains("Publish failed"));
}
