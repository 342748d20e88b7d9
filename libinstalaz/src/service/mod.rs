//! Service layer for Instalaz
//!
//! One facade, [`InstalazService`], wires the database, token store, content
//! resolver, publisher, OAuth flow and notifier together so the dashboard and
//! the scheduler share a single set of components.
//!
//! - `PostingService`: lock, resolve, publish, record
//! - `OAuthService`: Facebook login and token exchange
//! - `EventBus`: progress event distribution
//!
//! # Example
//!
//! ```no_run
//! use libinstalaz::service::InstalazService;
//! use libinstalaz::service::posting::Trigger;
//!
//! # async fn example() -> libinstalaz::Result<()> {
//! let service = InstalazService::new().await?;
//!
//! let report = service.posting().publish_next(1, Trigger::Manual).await?;
//! println!("Published {}", report.media_id);
//! # Ok(())
//! # }
//! ```

pub mod events;
pub mod posting;

use std::sync::Arc;

use self::events::{EventBus, EventReceiver};
use self::posting::{PostingOptions, PostingService};
use crate::activity::ActivityLogger;
use crate::clock::{Clock, SystemClock};
use crate::content::http::HttpFetcher;
use crate::content::{ContentFetcher, ContentResolver};
use crate::graph::http::HttpGraph;
use crate::graph::GraphApi;
use crate::notify::{self, Notifier};
use crate::oauth::facebook::HttpFacebook;
use crate::oauth::{FacebookApi, OAuthService, StateSigner};
use crate::publisher::{PublishPolicy, Publisher};
use crate::scheduler::{ScheduleZone, Scheduler};
use crate::token_store::TokenStore;
use crate::token_watch::TokenWatch;
use crate::{Config, Database, Result};

/// Outbound edges of the system, swappable for tests
pub struct Backends {
    pub graph: Arc<dyn GraphApi>,
    pub fetcher: Arc<dyn ContentFetcher>,
    pub facebook: Arc<dyn FacebookApi>,
    pub notifier: Arc<dyn Notifier>,
    pub clock: Arc<dyn Clock>,
    pub signer: StateSigner,
    pub policy: PublishPolicy,
}

impl Backends {
    /// Real HTTP clients built from configuration
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self {
            graph: Arc::new(HttpGraph::from_config(config)?),
            fetcher: Arc::new(HttpFetcher::from_config(config)?),
            facebook: Arc::new(HttpFacebook::from_config(config)?),
            notifier: Arc::from(notify::from_config(config)?),
            clock: Arc::new(SystemClock),
            signer: StateSigner::from_config(config),
            policy: PublishPolicy::from(&config.publisher),
        })
    }
}

/// Main service facade
///
/// Cheap to clone; every sub-service shares the same database pool and
/// event bus.
#[derive(Clone)]
pub struct InstalazService {
    config: Arc<Config>,
    db: Database,
    tokens: TokenStore,
    content: ContentResolver,
    posting: Arc<PostingService>,
    oauth: Arc<OAuthService>,
    activity: ActivityLogger,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    event_bus: EventBus,
}

impl InstalazService {
    /// Create a service from the default configuration file
    pub async fn new() -> Result<Self> {
        let config = Config::load_or_default()?;
        Self::from_config(config).await
    }

    /// Open the configured database and build real HTTP backends
    pub async fn from_config(config: Config) -> Result<Self> {
        let db = Database::new(&config.database.path).await?;
        let backends = Backends::from_config(&config)?;
        Ok(Self::with_backends(config, db, backends))
    }

    pub fn with_backends(config: Config, db: Database, backends: Backends) -> Self {
        let event_bus = EventBus::new(100);
        let tokens = TokenStore::new(db.clone(), backends.clock.clone());
        let content = ContentResolver::new(backends.fetcher, db.clone());
        let publisher = Arc::new(Publisher::new(backends.graph, backends.policy));

        let posting = PostingService::new(
            tokens.clone(),
            content.clone(),
            publisher,
            backends.notifier.clone(),
            event_bus.clone(),
            PostingOptions::from(&config.publisher),
        );
        let oauth = OAuthService::new(
            tokens.clone(),
            backends.facebook,
            backends.signer,
            config.facebook.graph_version.clone(),
        )
        .with_fallback_app(config.facebook_app_id(), config.facebook_app_secret());

        Self {
            activity: ActivityLogger::new(db.clone(), backends.clock.clone()),
            config: Arc::new(config),
            db,
            tokens,
            content,
            posting: Arc::new(posting),
            oauth: Arc::new(oauth),
            notifier: backends.notifier,
            clock: backends.clock,
            event_bus,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn tokens(&self) -> &TokenStore {
        &self.tokens
    }

    pub fn content(&self) -> &ContentResolver {
        &self.content
    }

    pub fn posting(&self) -> &Arc<PostingService> {
        &self.posting
    }

    pub fn oauth(&self) -> &OAuthService {
        &self.oauth
    }

    pub fn activity(&self) -> &ActivityLogger {
        &self.activity
    }

    pub fn notifier(&self) -> &Arc<dyn Notifier> {
        &self.notifier
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Build the slot scheduler over this service's posting path
    pub fn scheduler(&self) -> Result<Scheduler> {
        let zone = ScheduleZone::from_config(&self.config)?;
        let watch = TokenWatch::new(
            self.oauth.clone(),
            self.notifier.clone(),
            self.config.tokens.expiry_warning_days,
        );
        Ok(Scheduler::new(
            self.db.clone(),
            self.posting.clone(),
            self.clock.clone(),
            zone,
            self.config.schedule_settings_path(),
        )
        .with_tick(self.config.schedule.tick)
        .with_max_concurrency(self.config.schedule.max_concurrency)
        .with_token_watch(watch))
    }

    /// Subscribe to publish progress events
    pub fn subscribe(&self) -> EventReceiver {
        self.event_bus.subscribe()
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }
}
