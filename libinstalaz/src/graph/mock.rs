//! Scriptable in-memory Graph API for tests
//!
//! Records every call in order so tests can assert on the exact protocol
//! sequence (children before parent, publish after ready).

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::sleep;

use super::{ContainerStatus, GraphApi, GraphResult};
use crate::error::PublishError;
use crate::types::AccessToken;

/// One recorded Graph API call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphCall {
    CreateCarouselItem { image_url: String },
    CreateCarousel { children: Vec<String>, caption: String, hide_likes: bool },
    CreateReel { video_url: String, caption: String, hide_likes: bool },
    ContainerStatus { container_id: String },
    Publish { creation_id: String },
    Permalink { media_id: String },
    Comment { media_id: String, message: String },
}

/// Configuration for mock Graph behavior
#[derive(Debug, Clone)]
pub struct MockGraphConfig {
    /// Status polls answered IN_PROGRESS before a container reports FINISHED
    pub polls_until_ready: u32,

    /// Report ERROR instead of FINISHED once polling completes
    pub container_error: Option<String>,

    /// Error returned by every child container creation
    pub create_error: Option<PublishError>,

    /// Number of leading `publish` calls that fail with a network error
    pub transient_publish_failures: u32,

    /// Number of leading `publish` calls that go through but answer with a
    /// network error, as when the response is lost after Instagram published
    pub lost_publish_responses: u32,

    /// Error returned by every `publish` call
    pub publish_error: Option<PublishError>,

    /// When set, each `publish` call waits for a permit before answering
    pub gate: Option<Arc<Semaphore>>,

    /// Error returned by every `comment` call
    pub comment_error: Option<PublishError>,

    /// Delay before completing each call (simulates latency)
    pub delay: Duration,

    /// Every call made, in order
    pub calls: Arc<Mutex<Vec<GraphCall>>>,
}

impl Default for MockGraphConfig {
    fn default() -> Self {
        Self {
            polls_until_ready: 0,
            container_error: None,
            create_error: None,
            transient_publish_failures: 0,
            lost_publish_responses: 0,
            publish_error: None,
            gate: None,
            comment_error: None,
            delay: Duration::from_millis(0),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

pub struct MockGraph {
    config: MockGraphConfig,
    next_id: Mutex<u64>,
    polls: Mutex<HashMap<String, u32>>,
    published: Mutex<HashSet<String>>,
    publish_attempts: Mutex<u32>,
}

impl MockGraph {
    pub fn new(config: MockGraphConfig) -> Self {
        Self {
            config,
            next_id: Mutex::new(0),
            polls: Mutex::new(HashMap::new()),
            published: Mutex::new(HashSet::new()),
            publish_attempts: Mutex::new(0),
        }
    }

    /// A Graph that accepts everything immediately
    pub fn success() -> Self {
        Self::new(MockGraphConfig::default())
    }

    /// Containers need `polls` status checks before they are ready
    pub fn slow(polls: u32) -> Self {
        Self::new(MockGraphConfig {
            polls_until_ready: polls,
            ..Default::default()
        })
    }

    /// Every publish fails with `error`
    pub fn publish_failure(error: PublishError) -> Self {
        Self::new(MockGraphConfig {
            publish_error: Some(error),
            ..Default::default()
        })
    }

    /// Publishes block until `gate` hands out a permit
    pub fn gated(gate: Arc<Semaphore>) -> Self {
        Self::new(MockGraphConfig {
            gate: Some(gate),
            ..Default::default()
        })
    }

    pub fn calls(&self) -> Vec<GraphCall> {
        self.config.calls.lock().unwrap().clone()
    }

    pub fn publish_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, GraphCall::Publish { .. }))
            .count()
    }

    fn record(&self, call: GraphCall) {
        self.config.calls.lock().unwrap().push(call);
    }

    fn mint(&self, prefix: &str) -> String {
        let mut next = self.next_id.lock().unwrap();
        *next += 1;
        format!("{}-{}", prefix, *next)
    }

    async fn pause(&self) {
        if !self.config.delay.is_zero() {
            sleep(self.config.delay).await;
        }
    }
}

#[async_trait]
impl GraphApi for MockGraph {
    async fn create_carousel_item(
        &self,
        _ig_user_id: &str,
        _token: &AccessToken,
        image_url: &str,
    ) -> GraphResult<String> {
        self.pause().await;
        self.record(GraphCall::CreateCarouselItem {
            image_url: image_url.to_string(),
        });
        if let Some(error) = &self.config.create_error {
            return Err(error.clone());
        }
        Ok(self.mint("child"))
    }

    async fn create_carousel(
        &self,
        _ig_user_id: &str,
        _token: &AccessToken,
        children: &[String],
        caption: &str,
        hide_likes: bool,
    ) -> GraphResult<String> {
        self.pause().await;
        self.record(GraphCall::CreateCarousel {
            children: children.to_vec(),
            caption: caption.to_string(),
            hide_likes,
        });
        Ok(self.mint("carousel"))
    }

    async fn create_reel(
        &self,
        _ig_user_id: &str,
        _token: &AccessToken,
        video_url: &str,
        caption: &str,
        hide_likes: bool,
    ) -> GraphResult<String> {
        self.pause().await;
        self.record(GraphCall::CreateReel {
            video_url: video_url.to_string(),
            caption: caption.to_string(),
            hide_likes,
        });
        if let Some(error) = &self.config.create_error {
            return Err(error.clone());
        }
        Ok(self.mint("reel"))
    }

    async fn container_status(
        &self,
        container_id: &str,
        _token: &AccessToken,
    ) -> GraphResult<ContainerStatus> {
        self.pause().await;
        self.record(GraphCall::ContainerStatus {
            container_id: container_id.to_string(),
        });
        if self.published.lock().unwrap().contains(container_id) {
            return Ok(ContainerStatus::Published);
        }

        let mut polls = self.polls.lock().unwrap();
        let seen = polls.entry(container_id.to_string()).or_insert(0);
        *seen += 1;
        if *seen <= self.config.polls_until_ready {
            return Ok(ContainerStatus::InProgress);
        }
        match &self.config.container_error {
            Some(message) => Ok(ContainerStatus::Error(message.clone())),
            None => Ok(ContainerStatus::Finished),
        }
    }

    async fn publish(
        &self,
        _ig_user_id: &str,
        _token: &AccessToken,
        creation_id: &str,
    ) -> GraphResult<String> {
        self.pause().await;
        self.record(GraphCall::Publish {
            creation_id: creation_id.to_string(),
        });
        if let Some(gate) = &self.config.gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }

        let attempt = {
            let mut attempts = self.publish_attempts.lock().unwrap();
            *attempts += 1;
            *attempts
        };
        if attempt <= self.config.transient_publish_failures {
            return Err(PublishError::Network("connection reset".to_string()));
        }
        if let Some(error) = &self.config.publish_error {
            return Err(error.clone());
        }
        self.published.lock().unwrap().insert(creation_id.to_string());
        let media_id = self.mint("media");
        if attempt <= self.config.transient_publish_failures + self.config.lost_publish_responses {
            return Err(PublishError::Network("operation timed out".to_string()));
        }
        Ok(media_id)
    }

    async fn permalink(&self, media_id: &str, _token: &AccessToken) -> GraphResult<Option<String>> {
        self.record(GraphCall::Permalink {
            media_id: media_id.to_string(),
        });
        Ok(Some(format!("https://www.instagram.com/p/{}/", media_id)))
    }

    async fn comment(
        &self,
        media_id: &str,
        _token: &AccessToken,
        message: &str,
    ) -> GraphResult<String> {
        self.record(GraphCall::Comment {
            media_id: media_id.to_string(),
            message: message.to_string(),
        });
        if let Some(error) = &self.config.comment_error {
            return Err(error.clone());
        }
        Ok(self.mint("comment"))
    }
}
