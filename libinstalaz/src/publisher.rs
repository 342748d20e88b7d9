//! Two-phase Instagram publishing
//!
//! The publisher drives a [`GraphApi`] through the container protocol:
//! create, wait until Instagram reports the container `FINISHED`, publish.
//! Transient failures of any single Graph call are retried with exponential
//! backoff before the error is surfaced to the caller. `media_publish` is the
//! exception: it is only retried once the container reports it is still
//! unpublished.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::config::PublisherConfig;
use crate::error::PublishError;
use crate::graph::{ContainerStatus, GraphApi, GraphResult};
use crate::types::AccessToken;

/// Progress callback; receives short human-readable status lines
pub type Progress<'a> = &'a (dyn Fn(&str) + Send + Sync);

/// Timing knobs for polling and retries
#[derive(Debug, Clone)]
pub struct PublishPolicy {
    pub poll_attempts: u32,
    pub poll_interval: Duration,
    pub max_attempts: u32,
    /// First retry delay; doubles on each further attempt
    pub backoff_base: Duration,
}

impl Default for PublishPolicy {
    fn default() -> Self {
        Self {
            poll_attempts: 60,
            poll_interval: Duration::from_secs(2),
            max_attempts: 3,
            backoff_base: Duration::from_secs(1),
        }
    }
}

impl From<&PublisherConfig> for PublishPolicy {
    fn from(config: &PublisherConfig) -> Self {
        Self {
            poll_attempts: config.poll_attempts.max(1),
            poll_interval: config.poll_interval,
            ..Default::default()
        }
    }
}

impl PublishPolicy {
    /// No waiting between polls or retries; for tests and dry runs
    pub fn immediate() -> Self {
        Self {
            poll_attempts: 60,
            poll_interval: Duration::ZERO,
            max_attempts: 3,
            backoff_base: Duration::ZERO,
        }
    }

    fn backoff(&self, attempt: u32) -> Duration {
        self.backoff_base * 2_u32.pow(attempt.saturating_sub(1))
    }
}

/// What to publish
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Media {
    /// Image URLs in slide order
    Carousel(Vec<String>),
    Reel(String),
}

impl Media {
    pub fn label(&self) -> &'static str {
        match self {
            Media::Carousel(_) => "carousel",
            Media::Reel(_) => "reel",
        }
    }
}

#[derive(Debug, Clone)]
pub struct PublishRequest {
    pub media: Media,
    pub caption: String,
    pub hide_likes: bool,
    pub first_comment: Option<String>,
}

/// Result of a successful publish
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Published {
    pub media_id: String,
    pub permalink: Option<String>,
    pub comment_id: Option<String>,
}

pub struct Publisher {
    graph: Arc<dyn GraphApi>,
    policy: PublishPolicy,
}

impl Publisher {
    pub fn new(graph: Arc<dyn GraphApi>, policy: PublishPolicy) -> Self {
        Self { graph, policy }
    }

    pub fn policy(&self) -> &PublishPolicy {
        &self.policy
    }

    /// Publish `request` to the Instagram user `ig_user_id`
    ///
    /// Nothing is published unless every container reached `FINISHED`. The
    /// first comment and the permalink lookup run after publishing and never
    /// turn a published post into an error.
    pub async fn publish(
        &self,
        ig_user_id: &str,
        token: &AccessToken,
        request: &PublishRequest,
        progress: Progress<'_>,
    ) -> GraphResult<Published> {
        let creation_id = match &request.media {
            Media::Carousel(images) => {
                self.prepare_carousel(ig_user_id, token, images, request, progress)
                    .await?
            }
            Media::Reel(video) => {
                self.prepare_reel(ig_user_id, token, video, request, progress)
                    .await?
            }
        };

        progress(&format!("Publishing {}...", request.media.label()));
        let media_id = self.publish_container(ig_user_id, token, &creation_id).await?;
        info!(%media_id, kind = request.media.label(), "Published to Instagram");

        let comment_id = match request.first_comment.as_deref() {
            Some(message) if !message.trim().is_empty() => {
                match self.graph.comment(&media_id, token, message).await {
                    Ok(id) => Some(id),
                    Err(e) => {
                        warn!(%media_id, "Failed to post first comment: {}", e);
                        None
                    }
                }
            }
            _ => None,
        };

        let permalink = match self.graph.permalink(&media_id, token).await {
            Ok(link) => link,
            Err(e) => {
                debug!(%media_id, "Permalink lookup failed: {}", e);
                None
            }
        };

        Ok(Published {
            media_id,
            permalink,
            comment_id,
        })
    }

    async fn prepare_carousel(
        &self,
        ig_user_id: &str,
        token: &AccessToken,
        images: &[String],
        request: &PublishRequest,
        progress: Progress<'_>,
    ) -> GraphResult<String> {
        if images.is_empty() {
            return Err(PublishError::InvalidMedia(
                "Carousel has no images".to_string(),
            ));
        }

        let total = images.len();
        let mut children = Vec::with_capacity(total);
        for (i, url) in images.iter().enumerate() {
            progress(&format!("Uploading image {}/{}...", i + 1, total));
            let child = self
                .with_retry("carousel item", || {
                    self.graph.create_carousel_item(ig_user_id, token, url)
                })
                .await?;

            progress(&format!("Verifying image {}/{}...", i + 1, total));
            self.wait_until_ready(&child, token).await?;
            children.push(child);
        }

        progress("Creating carousel...");
        let parent = self
            .with_retry("carousel container", || {
                self.graph.create_carousel(
                    ig_user_id,
                    token,
                    &children,
                    &request.caption,
                    request.hide_likes,
                )
            })
            .await?;
        self.wait_until_ready(&parent, token).await?;
        Ok(parent)
    }

    async fn prepare_reel(
        &self,
        ig_user_id: &str,
        token: &AccessToken,
        video: &str,
        request: &PublishRequest,
        progress: Progress<'_>,
    ) -> GraphResult<String> {
        progress("Uploading video...");
        let container = self
            .with_retry("reel container", || {
                self.graph.create_reel(
                    ig_user_id,
                    token,
                    video,
                    &request.caption,
                    request.hide_likes,
                )
            })
            .await?;

        progress("Processing video...");
        self.wait_until_ready(&container, token).await?;
        Ok(container)
    }

    /// `media_publish` with a retry only while the container is still unpublished
    async fn publish_container(
        &self,
        ig_user_id: &str,
        token: &AccessToken,
        creation_id: &str,
    ) -> GraphResult<String> {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            let err = match self.graph.publish(ig_user_id, token, creation_id).await {
                Ok(media_id) => {
                    if attempt > 1 {
                        info!("media_publish succeeded on attempt {}", attempt);
                    }
                    return Ok(media_id);
                }
                Err(e) if e.is_transient() => e,
                Err(e) => return Err(e),
            };

            let status = self
                .with_retry("container status", || {
                    self.graph.container_status(creation_id, token)
                })
                .await;
            match status {
                Ok(ContainerStatus::Finished) if attempt < max_attempts => {
                    let delay = self.policy.backoff(attempt);
                    warn!(
                        "Transient error during media_publish (attempt {}/{}): {}. Container {} still unpublished, retrying in {:?}...",
                        attempt, max_attempts, err, creation_id, delay
                    );
                    if !delay.is_zero() {
                        sleep(delay).await;
                    }
                    attempt += 1;
                }
                Ok(ContainerStatus::Finished) => {
                    warn!("media_publish failed after {} attempts: {}", max_attempts, err);
                    return Err(err);
                }
                Ok(ContainerStatus::Published) => {
                    warn!(creation_id, "Container was published but the media id was lost: {}", err);
                    return Err(PublishError::Unconfirmed(format!(
                        "container {} was published but Instagram returned: {}",
                        creation_id, err
                    )));
                }
                Ok(other) => {
                    return Err(PublishError::Unconfirmed(format!(
                        "container {} reports {:?} after: {}",
                        creation_id, other, err
                    )))
                }
                Err(status_err) => {
                    return Err(PublishError::Unconfirmed(format!(
                        "{}; container {} status unavailable: {}",
                        err, creation_id, status_err
                    )))
                }
            }
        }
    }

    /// Poll a container until it is `FINISHED`
    pub async fn wait_until_ready(&self, container_id: &str, token: &AccessToken) -> GraphResult<()> {
        for check in 1..=self.policy.poll_attempts {
            let status = self
                .with_retry("container status", || {
                    self.graph.container_status(container_id, token)
                })
                .await?;

            match status {
                ContainerStatus::Finished | ContainerStatus::Published => return Ok(()),
                ContainerStatus::Error(detail) => {
                    return Err(PublishError::NotReady(format!(
                        "Container {} failed processing: {}",
                        container_id, detail
                    )))
                }
                ContainerStatus::Expired => {
                    return Err(PublishError::NotReady(format!(
                        "Container {} expired before publishing",
                        container_id
                    )))
                }
                ContainerStatus::InProgress => {
                    debug!(container_id, check, "Container still processing");
                    if check < self.policy.poll_attempts && !self.policy.poll_interval.is_zero() {
                        sleep(self.policy.poll_interval).await;
                    }
                }
            }
        }

        Err(PublishError::NotReady(format!(
            "Container {} not ready after {} checks",
            container_id, self.policy.poll_attempts
        )))
    }

    async fn with_retry<T, F, Fut>(&self, what: &str, mut call: F) -> GraphResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = GraphResult<T>>,
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match call().await {
                Ok(value) => {
                    if attempt > 1 {
                        info!("{} succeeded on attempt {}", what, attempt);
                    }
                    return Ok(value);
                }
                Err(e) if e.is_transient() && attempt < max_attempts => {
                    let delay = self.policy.backoff(attempt);
                    warn!(
                        "Transient error during {} (attempt {}/{}): {}. Retrying in {:?}...",
                        what, attempt, max_attempts, e, delay
                    );
                    if !delay.is_zero() {
                        sleep(delay).await;
                    }
                    attempt += 1;
                }
                Err(e) => {
                    if attempt == max_attempts {
                        warn!("{} failed after {} attempts: {}", what, max_attempts, e);
                    }
                    return Err(e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::mock::{GraphCall, MockGraph, MockGraphConfig};
    use std::sync::Mutex;

    fn carousel(urls: &[&str]) -> PublishRequest {
        PublishRequest {
            media: Media::Carousel(urls.iter().map(|u| u.to_string()).collect()),
            caption: "Daily quote".to_string(),
            hide_likes: true,
            first_comment: None,
        }
    }

    fn quiet() -> impl Fn(&str) + Send + Sync {
        |_: &str| {}
    }

    #[test]
    fn test_backoff_doubles() {
        let policy = PublishPolicy::default();
        assert_eq!(policy.backoff(1), Duration::from_secs(1));
        assert_eq!(policy.backoff(2), Duration::from_secs(2));
        assert_eq!(policy.backoff(3), Duration::from_secs(4));
    }

    #[test]
    fn test_policy_from_config() {
        let config = PublisherConfig {
            poll_attempts: 5,
            poll_interval: Duration::from_millis(250),
            ..Default::default()
        };
        let policy = PublishPolicy::from(&config);
        assert_eq!(policy.poll_attempts, 5);
        assert_eq!(policy.poll_interval, Duration::from_millis(250));
        assert_eq!(policy.max_attempts, 3);
    }

    #[tokio::test]
    async fn test_carousel_children_ready_before_parent() {
        let graph = Arc::new(MockGraph::slow(1));
        let publisher = Publisher::new(graph.clone(), PublishPolicy::immediate());
        let token = AccessToken::new("t");

        let published = publisher
            .publish("ig-1", &token, &carousel(&["https://x/a.jpg", "https://x/b.jpg"]), &quiet())
            .await
            .unwrap();

        let calls = graph.calls();
        let parent_at = calls
            .iter()
            .position(|c| matches!(c, GraphCall::CreateCarousel { .. }))
            .unwrap();
        let publish_at = calls
            .iter()
            .position(|c| matches!(c, GraphCall::Publish { .. }))
            .unwrap();

        // Both children created and polled to FINISHED before the parent
        let children_created = calls[..parent_at]
            .iter()
            .filter(|c| matches!(c, GraphCall::CreateCarouselItem { .. }))
            .count();
        assert_eq!(children_created, 2);
        for child in ["child-1", "child-2"] {
            let polls = calls[..parent_at]
                .iter()
                .filter(|c| matches!(c, GraphCall::ContainerStatus { container_id } if container_id == child))
                .count();
            assert_eq!(polls, 2, "{} polled until ready", child);
        }

        // Parent polled to ready before publish
        let parent_polls = calls[parent_at..publish_at]
            .iter()
            .filter(|c| matches!(c, GraphCall::ContainerStatus { container_id } if container_id == "carousel-3"))
            .count();
        assert_eq!(parent_polls, 2);

        assert_eq!(
            calls[parent_at],
            GraphCall::CreateCarousel {
                children: vec!["child-1".to_string(), "child-2".to_string()],
                caption: "Daily quote".to_string(),
                hide_likes: true,
            }
        );
        assert_eq!(published.media_id, "media-4");
        assert_eq!(
            published.permalink.as_deref(),
            Some("https://www.instagram.com/p/media-4/")
        );
    }

    #[tokio::test]
    async fn test_reel_flow() {
        let graph = Arc::new(MockGraph::success());
        let publisher = Publisher::new(graph.clone(), PublishPolicy::immediate());
        let request = PublishRequest {
            media: Media::Reel("https://x/vid%20(1).mp4".to_string()),
            caption: "Watch".to_string(),
            hide_likes: false,
            first_comment: Some("Follow for more daily content!".to_string()),
        };

        let published = publisher
            .publish("ig-1", &AccessToken::new("t"), &request, &quiet())
            .await
            .unwrap();

        let calls = graph.calls();
        assert!(matches!(
            &calls[0],
            GraphCall::CreateReel { hide_likes: false, .. }
        ));
        assert!(matches!(&calls[1], GraphCall::ContainerStatus { .. }));
        assert!(matches!(&calls[2], GraphCall::Publish { creation_id } if creation_id == "reel-1"));
        assert!(calls.iter().any(|c| matches!(
            c,
            GraphCall::Comment { message, .. } if message == "Follow for more daily content!"
        )));
        assert!(published.comment_id.is_some());
    }

    #[tokio::test]
    async fn test_container_error_never_publishes() {
        let graph = Arc::new(MockGraph::new(MockGraphConfig {
            container_error: Some("Error: 2207026".to_string()),
            ..Default::default()
        }));
        let publisher = Publisher::new(graph.clone(), PublishPolicy::immediate());

        let err = publisher
            .publish("ig-1", &AccessToken::new("t"), &carousel(&["https://x/a.jpg"]), &quiet())
            .await
            .unwrap_err();

        assert!(matches!(err, PublishError::NotReady(_)));
        assert_eq!(graph.publish_count(), 0);
    }

    #[tokio::test]
    async fn test_poll_budget_exhausted() {
        let graph = Arc::new(MockGraph::slow(10));
        let policy = PublishPolicy {
            poll_attempts: 3,
            ..PublishPolicy::immediate()
        };
        let publisher = Publisher::new(graph.clone(), policy);

        let err = publisher
            .publish("ig-1", &AccessToken::new("t"), &carousel(&["https://x/a.jpg"]), &quiet())
            .await
            .unwrap_err();

        match err {
            PublishError::NotReady(msg) => assert!(msg.contains("after 3 checks")),
            other => panic!("Expected NotReady, got {:?}", other),
        }
        assert_eq!(graph.publish_count(), 0);
    }

    #[tokio::test]
    async fn test_transient_publish_error_is_retried_while_unpublished() {
        let graph = Arc::new(MockGraph::new(MockGraphConfig {
            transient_publish_failures: 2,
            ..Default::default()
        }));
        let publisher = Publisher::new(graph.clone(), PublishPolicy::immediate());

        let published = publisher
            .publish("ig-1", &AccessToken::new("t"), &carousel(&["https://x/a.jpg"]), &quiet())
            .await;

        assert!(published.is_ok());
        assert_eq!(graph.publish_count(), 3);

        // Every retry is preceded by a status check on the parent container
        let calls = graph.calls();
        let publishes: Vec<usize> = calls
            .iter()
            .enumerate()
            .filter(|(_, c)| matches!(c, GraphCall::Publish { .. }))
            .map(|(i, _)| i)
            .collect();
        for pair in publishes.windows(2) {
            assert!(calls[pair[0]..pair[1]].iter().any(|c| matches!(
                c,
                GraphCall::ContainerStatus { container_id } if container_id == "carousel-2"
            )));
        }
    }

    #[tokio::test]
    async fn test_lost_publish_response_is_not_retried() {
        let graph = Arc::new(MockGraph::new(MockGraphConfig {
            lost_publish_responses: 1,
            ..Default::default()
        }));
        let publisher = Publisher::new(graph.clone(), PublishPolicy::immediate());

        let err = publisher
            .publish("ig-1", &AccessToken::new("t"), &carousel(&["https://x/a.jpg"]), &quiet())
            .await
            .unwrap_err();

        assert!(matches!(err, PublishError::Unconfirmed(_)));
        assert!(!err.is_transient());
        assert_eq!(graph.publish_count(), 1);
    }

    #[tokio::test]
    async fn test_publish_retries_are_bounded() {
        let graph = Arc::new(MockGraph::new(MockGraphConfig {
            transient_publish_failures: 5,
            ..Default::default()
        }));
        let publisher = Publisher::new(graph.clone(), PublishPolicy::immediate());

        let err = publisher
            .publish("ig-1", &AccessToken::new("t"), &carousel(&["https://x/a.jpg"]), &quiet())
            .await
            .unwrap_err();

        assert!(matches!(err, PublishError::Network(_)));
        assert_eq!(graph.publish_count(), 3);
    }

    #[tokio::test]
    async fn test_permanent_error_is_not_retried() {
        let graph = Arc::new(MockGraph::publish_failure(PublishError::AuthExpired(
            "Error validating access token".to_string(),
        )));
        let publisher = Publisher::new(graph.clone(), PublishPolicy::immediate());

        let err = publisher
            .publish("ig-1", &AccessToken::new("t"), &carousel(&["https://x/a.jpg"]), &quiet())
            .await
            .unwrap_err();

        assert!(matches!(err, PublishError::AuthExpired(_)));
        assert_eq!(graph.publish_count(), 1);
    }

    #[tokio::test]
    async fn test_comment_failure_is_not_fatal() {
        let graph = Arc::new(MockGraph::new(MockGraphConfig {
            comment_error: Some(PublishError::Rejected("comments disabled".to_string())),
            ..Default::default()
        }));
        let publisher = Publisher::new(graph.clone(), PublishPolicy::immediate());
        let mut request = carousel(&["https://x/a.jpg", "https://x/b.jpg"]);
        request.first_comment = Some("hi".to_string());

        let published = publisher
            .publish("ig-1", &AccessToken::new("t"), &request, &quiet())
            .await
            .unwrap();

        assert!(published.comment_id.is_none());
        assert_eq!(graph.publish_count(), 1);
    }

    #[tokio::test]
    async fn test_empty_carousel_rejected() {
        let graph = Arc::new(MockGraph::success());
        let publisher = Publisher::new(graph.clone(), PublishPolicy::immediate());

        let err = publisher
            .publish("ig-1", &AccessToken::new("t"), &carousel(&[]), &quiet())
            .await
            .unwrap_err();

        assert!(matches!(err, PublishError::InvalidMedia(_)));
        assert!(graph.calls().is_empty());
    }

    #[tokio::test]
    async fn test_progress_messages() {
        let graph = Arc::new(MockGraph::success());
        let publisher = Publisher::new(graph, PublishPolicy::immediate());
        let seen = Mutex::new(Vec::new());
        let record = |line: &str| seen.lock().unwrap().push(line.to_string());

        publisher
            .publish("ig-1", &AccessToken::new("t"), &carousel(&["https://x/a.jpg", "https://x/b.jpg"]), &record)
            .await
            .unwrap();

        let seen = seen.into_inner().unwrap();
        assert_eq!(
            seen,
            vec![
                "Uploading image 1/2...",
                "Verifying image 1/2...",
                "Uploading image 2/2...",
                "Verifying image 2/2...",
                "Creating carousel...",
                "Publishing carousel...",
            ]
        );
    }
}
