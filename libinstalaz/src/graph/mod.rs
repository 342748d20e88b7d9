//! Instagram Graph API content publishing
//!
//! Publishing is a two-phase protocol: create a media container, wait for
//! Instagram to finish processing it, then publish the container. Carousels
//! add a level: each child image is its own container and the parent
//! container references the children by id.
//!
//! `GraphApi` covers exactly the calls the publisher needs, so tests can
//! drive the publisher with [`mock::MockGraph`] instead of the network.

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::PublishError;
use crate::types::AccessToken;

pub mod http;

// Available for all builds (not just tests) to support integration tests
pub mod mock;

pub type GraphResult<T> = std::result::Result<T, PublishError>;

/// Processing state of a media container (`status_code` field)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContainerStatus {
    InProgress,
    Finished,
    Published,
    Expired,
    Error(String),
}

impl ContainerStatus {
    pub fn parse(status_code: &str, status: Option<&str>) -> Self {
        match status_code {
            "FINISHED" => ContainerStatus::Finished,
            "PUBLISHED" => ContainerStatus::Published,
            "EXPIRED" => ContainerStatus::Expired,
            "ERROR" => ContainerStatus::Error(status.unwrap_or("ERROR").to_string()),
            _ => ContainerStatus::InProgress,
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, ContainerStatus::Finished)
    }
}

#[async_trait]
pub trait GraphApi: Send + Sync {
    /// Create a carousel child container for one image
    async fn create_carousel_item(
        &self,
        ig_user_id: &str,
        token: &AccessToken,
        image_url: &str,
    ) -> GraphResult<String>;

    /// Create the parent carousel container; children must already be ready
    async fn create_carousel(
        &self,
        ig_user_id: &str,
        token: &AccessToken,
        children: &[String],
        caption: &str,
        hide_likes: bool,
    ) -> GraphResult<String>;

    async fn create_reel(
        &self,
        ig_user_id: &str,
        token: &AccessToken,
        video_url: &str,
        caption: &str,
        hide_likes: bool,
    ) -> GraphResult<String>;

    async fn container_status(
        &self,
        container_id: &str,
        token: &AccessToken,
    ) -> GraphResult<ContainerStatus>;

    /// Publish a ready container, returning the media id
    async fn publish(
        &self,
        ig_user_id: &str,
        token: &AccessToken,
        creation_id: &str,
    ) -> GraphResult<String>;

    async fn permalink(&self, media_id: &str, token: &AccessToken) -> GraphResult<Option<String>>;

    async fn comment(
        &self,
        media_id: &str,
        token: &AccessToken,
        message: &str,
    ) -> GraphResult<String>;
}

#[derive(Debug, Deserialize)]
struct GraphErrorEnvelope {
    error: GraphErrorBody,
}

#[derive(Debug, Deserialize)]
struct GraphErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    code: Option<i64>,
    #[serde(default)]
    error_subcode: Option<i64>,
}

/// Map an unsuccessful Graph response to a publish error
pub fn classify_error(status: u16, body: &str) -> PublishError {
    let parsed = serde_json::from_str::<GraphErrorEnvelope>(body).ok();
    let (message, code, subcode) = match parsed {
        Some(envelope) => (
            envelope.error.message,
            envelope.error.code,
            envelope.error.error_subcode,
        ),
        None => (truncate(body, 200), None, None),
    };
    let detail = match code {
        Some(code) => format!("{} (HTTP {}, code {})", message, status, code),
        None => format!("{} (HTTP {})", message, status),
    };

    if status == 401 || matches!(code, Some(190) | Some(102)) {
        return PublishError::AuthExpired(detail);
    }
    if status == 429
        || matches!(code, Some(4) | Some(17) | Some(32) | Some(613))
        || subcode == Some(2207042)
    {
        return PublishError::RateLimited(detail);
    }
    if matches!(code, Some(36000..=36999) | Some(9004) | Some(352))
        || matches!(subcode, Some(2207000..=2207999))
    {
        return PublishError::InvalidMedia(detail);
    }
    if status >= 500 {
        return PublishError::Network(detail);
    }
    PublishError::Rejected(detail)
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max).collect();
        format!("{}...", cut)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(code: i64, subcode: Option<i64>) -> String {
        let mut error = serde_json::json!({
            "message": "Something happened",
            "type": "OAuthException",
            "code": code,
        });
        if let Some(subcode) = subcode {
            error["error_subcode"] = subcode.into();
        }
        serde_json::json!({ "error": error }).to_string()
    }

    #[test]
    fn test_expired_token_is_auth_error() {
        assert!(matches!(
            classify_error(400, &body(190, Some(463))),
            PublishError::AuthExpired(_)
        ));
        assert!(matches!(
            classify_error(401, "unauthorized"),
            PublishError::AuthExpired(_)
        ));
    }

    #[test]
    fn test_rate_limit_codes() {
        for code in [4, 17, 32, 613] {
            assert!(matches!(
                classify_error(400, &body(code, None)),
                PublishError::RateLimited(_)
            ));
        }
        assert!(matches!(
            classify_error(429, ""),
            PublishError::RateLimited(_)
        ));
    }

    #[test]
    fn test_media_errors() {
        assert!(matches!(
            classify_error(400, &body(36003, None)),
            PublishError::InvalidMedia(_)
        ));
        assert!(matches!(
            classify_error(400, &body(100, Some(2207026))),
            PublishError::InvalidMedia(_)
        ));
    }

    #[test]
    fn test_server_errors_are_transient() {
        let err = classify_error(503, "<html>Service Unavailable</html>");
        assert!(err.is_transient());
    }

    #[test]
    fn test_unknown_error_is_rejected_with_detail() {
        let err = classify_error(400, &body(100, None));
        match err {
            PublishError::Rejected(detail) => {
                assert!(detail.contains("Something happened"));
                assert!(detail.contains("code 100"));
            }
            other => panic!("Expected Rejected, got {:?}", other),
        }
    }

    #[test]
    fn test_container_status_parse() {
        assert!(ContainerStatus::parse("FINISHED", None).is_ready());
        assert_eq!(
            ContainerStatus::parse("IN_PROGRESS", None),
            ContainerStatus::InProgress
        );
        assert_eq!(
            ContainerStatus::parse("ERROR", Some("Error: 2207026")),
            ContainerStatus::Error("Error: 2207026".to_string())
        );
    }
}
