//! Slot scheduler
//!
//! One loop wakes every `tick`, converts the clock to local wall time and
//! fires any slot whose `hour:minute` matches. Each `(account, slot, date)`
//! is claimed in `slot_runs` before publishing, so a slot fires at most once
//! per day per account even when the tick observes the same minute twice or
//! the process restarts within it.
//!
//! [`Scheduler::run`] only claims slots on the tick; the publishes themselves
//! run as spawned tasks, so a long upload never delays the next slot.

use chrono::{DateTime, FixedOffset, NaiveDateTime, Timelike, Utc};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::clock::Clock;
use crate::config::Config;
use crate::db::Database;
use crate::error::Result;
use crate::oauth::STATE_TTL_SECS;
use crate::schedule_settings::ScheduleSettings;
use crate::service::posting::{PostReport, PostingService, Trigger};
use crate::token_watch::{TokenCheck, TokenWatch};
use crate::types::{AccountStatus, Slot};

pub const DEFAULT_TICK: Duration = Duration::from_secs(30);

/// Timezone the slot times are written in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleZone {
    /// The host's local timezone
    Local,
    Fixed(FixedOffset),
}

impl ScheduleZone {
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(match config.schedule.offset()? {
            Some(offset) => ScheduleZone::Fixed(offset),
            None => ScheduleZone::Local,
        })
    }

    pub fn local_time(&self, now: DateTime<Utc>) -> NaiveDateTime {
        match self {
            ScheduleZone::Local => now.with_timezone(&chrono::Local).naive_local(),
            ScheduleZone::Fixed(offset) => now.with_timezone(offset).naive_local(),
        }
    }
}

/// Outcome of one scheduled or triggered publish
#[derive(Debug, Clone, Serialize)]
pub struct JobResult {
    pub account_id: i64,
    pub slot: Option<Slot>,
    pub media_id: Option<String>,
    pub error: Option<String>,
}

impl JobResult {
    fn from_outcome(account_id: i64, trigger: Trigger, outcome: Result<PostReport>) -> Self {
        match outcome {
            Ok(report) => Self {
                account_id,
                slot: trigger.slot(),
                media_id: Some(report.media_id),
                error: None,
            },
            Err(e) => Self {
                account_id,
                slot: trigger.slot(),
                media_id: None,
                error: Some(e.to_string()),
            },
        }
    }

    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TickReport {
    /// Wall time the tick was evaluated at, `YYYY-MM-DD HH:MM`
    pub local_time: String,
    pub due_slots: Vec<Slot>,
    pub results: Vec<JobResult>,
}

#[derive(Clone)]
pub struct Scheduler {
    db: Database,
    posting: Arc<PostingService>,
    clock: Arc<dyn Clock>,
    zone: ScheduleZone,
    settings_path: PathBuf,
    tick: Duration,
    max_concurrency: usize,
    token_watch: Option<Arc<TokenWatch>>,
}

impl Scheduler {
    pub fn new(
        db: Database,
        posting: Arc<PostingService>,
        clock: Arc<dyn Clock>,
        zone: ScheduleZone,
        settings_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            db,
            posting,
            clock,
            zone,
            settings_path: settings_path.into(),
            tick: DEFAULT_TICK,
            max_concurrency: 1,
            token_watch: None,
        }
    }

    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    /// Accounts published in parallel per tick; 1 means one after another
    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency.max(1);
        self
    }

    /// Check tokens close to expiry once per local day
    pub fn with_token_watch(mut self, watch: TokenWatch) -> Self {
        self.token_watch = Some(Arc::new(watch));
        self
    }

    pub fn settings_path(&self) -> &Path {
        &self.settings_path
    }

    /// Current settings, re-read from disk so dashboard edits apply on the next tick
    pub fn settings(&self) -> ScheduleSettings {
        ScheduleSettings::load(&self.settings_path)
    }

    /// Evaluate the schedule once at the current clock time and publish
    /// whatever is due before returning
    pub async fn tick(&self) -> Result<TickReport> {
        let (mut report, jobs) = self.claim_due().await?;
        report.results = self.run_jobs(jobs).await;
        Ok(report)
    }

    /// Claim every slot due at the current clock time without publishing
    async fn claim_due(&self) -> Result<(TickReport, Vec<(i64, Trigger)>)> {
        let now = self.clock.now();
        let local = self.zone.local_time(now);
        let due_slots = self.settings().due_slots(local.hour(), local.minute());

        let report = TickReport {
            local_time: local.format("%Y-%m-%d %H:%M").to_string(),
            due_slots: due_slots.clone(),
            results: Vec::new(),
        };
        let mut jobs = Vec::new();
        if due_slots.is_empty() {
            return Ok((report, jobs));
        }

        let local_date = local.format("%Y-%m-%d").to_string();
        for account in self.db.list_accounts().await? {
            for slot in &due_slots {
                if !account.wants_slot(*slot) {
                    continue;
                }
                if self
                    .db
                    .claim_slot_run(account.id, *slot, &local_date, now.timestamp())
                    .await?
                {
                    info!(account_id = account.id, account = %account.name, %slot, "Slot due");
                    jobs.push((account.id, Trigger::Scheduled(*slot)));
                } else {
                    debug!(account_id = account.id, %slot, %local_date, "Slot already fired today");
                }
            }
        }
        Ok((report, jobs))
    }

    /// Refresh or warn about tokens close to expiry, at most once per local day
    pub async fn check_tokens(&self) -> Result<Vec<TokenCheck>> {
        match &self.token_watch {
            Some(watch) => watch.check(&self.local_date()).await,
            None => Ok(Vec::new()),
        }
    }

    fn local_date(&self) -> String {
        self.zone
            .local_time(self.clock.now())
            .format("%Y-%m-%d")
            .to_string()
    }

    /// Fire every active, schedule-enabled account now, ignoring slot times
    pub async fn trigger_all(&self) -> Result<Vec<JobResult>> {
        let jobs: Vec<_> = self
            .db
            .list_accounts()
            .await?
            .into_iter()
            .filter(|a| a.status == AccountStatus::Active && a.schedule_enabled)
            .map(|a| (a.id, Trigger::Manual))
            .collect();
        info!(accounts = jobs.len(), "Triggering schedule for all accounts");
        Ok(self.run_jobs(jobs).await)
    }

    async fn run_jobs(&self, jobs: Vec<(i64, Trigger)>) -> Vec<JobResult> {
        stream::iter(jobs)
            .map(|(account_id, trigger)| async move {
                let outcome = self.posting.publish_next(account_id, trigger).await;
                JobResult::from_outcome(account_id, trigger, outcome)
            })
            .buffer_unordered(self.max_concurrency)
            .collect()
            .await
    }

    /// Tick until `shutdown` turns true
    ///
    /// Claimed slots publish in the background, at most `max_concurrency`
    /// at a time. Publishes still running at shutdown are awaited so their
    /// busy locks and post history are settled.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(tick = ?self.tick, settings = %self.settings_path.display(), "Scheduler started");
        let mut interval = tokio::time::interval(self.tick);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let permits = Arc::new(Semaphore::new(self.max_concurrency));
        let mut running: JoinSet<JobResult> = JoinSet::new();
        let mut token_checks: JoinSet<()> = JoinSet::new();
        let mut tokens_checked_on: Option<String> = None;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match self.claim_due().await {
                        Ok((_, jobs)) => {
                            for (account_id, trigger) in jobs {
                                self.spawn_job(&mut running, &permits, account_id, trigger);
                            }
                        }
                        Err(e) => error!("Scheduler tick failed: {}", e),
                    }
                    if token_checks.is_empty() {
                        self.spawn_token_check(&mut token_checks, &mut tokens_checked_on);
                    }
                    self.purge_oauth_states().await;
                }
                Some(joined) = running.join_next(), if !running.is_empty() => {
                    log_joined(joined);
                }
                Some(_) = token_checks.join_next(), if !token_checks.is_empty() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        if !running.is_empty() {
            info!(running = running.len(), "Waiting for scheduled publishes to finish");
            while let Some(joined) = running.join_next().await {
                log_joined(joined);
            }
        }
        while token_checks.join_next().await.is_some() {}
        info!("Scheduler stopped");
    }

    fn spawn_job(
        &self,
        running: &mut JoinSet<JobResult>,
        permits: &Arc<Semaphore>,
        account_id: i64,
        trigger: Trigger,
    ) {
        let posting = self.posting.clone();
        let permits = permits.clone();
        running.spawn(async move {
            let _permit = permits.acquire_owned().await;
            let outcome = posting.publish_next(account_id, trigger).await;
            JobResult::from_outcome(account_id, trigger, outcome)
        });
    }

    fn spawn_token_check(&self, token_checks: &mut JoinSet<()>, checked_on: &mut Option<String>) {
        let Some(watch) = self.token_watch.clone() else {
            return;
        };
        let today = self.local_date();
        if checked_on.as_deref() == Some(today.as_str()) {
            return;
        }
        *checked_on = Some(today.clone());
        token_checks.spawn(async move {
            match watch.check(&today).await {
                Ok(checks) if !checks.is_empty() => {
                    info!(accounts = checks.len(), "Handled tokens close to expiry")
                }
                Ok(_) => {}
                Err(e) => warn!("Token expiry check failed: {}", e),
            }
        });
    }

    async fn purge_oauth_states(&self) {
        let cutoff = self.clock.timestamp() - STATE_TTL_SECS;
        match self.db.purge_oauth_states(cutoff).await {
            Ok(0) => {}
            Ok(purged) => debug!(purged, "Purged expired OAuth states"),
            Err(e) => warn!("Failed to purge OAuth states: {}", e),
        }
    }
}

fn log_joined(joined: std::result::Result<JobResult, tokio::task::JoinError>) {
    match joined {
        Ok(result) if !result.succeeded() => warn!(
            account_id = result.account_id,
            slot = ?result.slot,
            "Scheduled publish failed: {}",
            result.error.as_deref().unwrap_or_default()
        ),
        Ok(result) => debug!(account_id = result.account_id, slot = ?result.slot, "Scheduled publish finished"),
        Err(e) => error!("Scheduled publish task failed: {}", e),
    }
}
