//! reqwest-backed Graph API client

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use super::{classify_error, ContainerStatus, GraphApi, GraphResult};
use crate::config::Config;
use crate::error::{ConfigError, PublishError, Result};
use crate::types::AccessToken;

pub const GRAPH_HOST: &str = "https://graph.facebook.com";

/// Thin JSON client over `graph.facebook.com/{version}`
#[derive(Clone)]
pub struct GraphClient {
    client: reqwest::Client,
    base_url: String,
}

impl GraphClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("instalaz/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(|e| ConfigError::InvalidValue(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn for_version(graph_version: &str, timeout: Duration) -> Result<Self> {
        Self::new(format!("{}/{}", GRAPH_HOST, graph_version), timeout)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn get(&self, path: &str, params: &[(&str, &str)]) -> GraphResult<Value> {
        let url = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
        debug!(%url, "Graph GET");
        let response = self
            .client
            .get(&url)
            .query(params)
            .send()
            .await
            .map_err(network_error)?;
        read_json(response).await
    }

    pub async fn post(
        &self,
        path: &str,
        params: &[(&str, &str)],
        timeout: Option<Duration>,
    ) -> GraphResult<Value> {
        let url = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
        debug!(%url, "Graph POST");
        let mut request = self.client.post(&url).form(params);
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }
        let response = request.send().await.map_err(network_error)?;
        read_json(response).await
    }
}

fn network_error(e: reqwest::Error) -> PublishError {
    if e.is_timeout() {
        PublishError::Network(format!("Request timed out: {}", e))
    } else {
        PublishError::Network(e.to_string())
    }
}

async fn read_json(response: reqwest::Response) -> GraphResult<Value> {
    let status = response.status();
    let text = response.text().await.map_err(network_error)?;
    if !status.is_success() {
        return Err(classify_error(status.as_u16(), &text));
    }
    serde_json::from_str(&text)
        .map_err(|e| PublishError::Rejected(format!("Unexpected Graph response: {}", e)))
}

pub(crate) fn id_field(value: &Value) -> GraphResult<String> {
    value
        .get("id")
        .and_then(|id| match id {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
        .ok_or_else(|| PublishError::Rejected(format!("Response has no id: {}", value)))
}

/// Publishing calls over HTTP
pub struct HttpGraph {
    client: GraphClient,
    upload_timeout: Duration,
}

impl HttpGraph {
    pub fn new(client: GraphClient, upload_timeout: Duration) -> Self {
        Self {
            client,
            upload_timeout,
        }
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        let client = GraphClient::for_version(
            &config.facebook.graph_version,
            config.publisher.http_timeout,
        )?;
        Ok(Self::new(client, config.publisher.upload_timeout))
    }

    async fn create_container(
        &self,
        ig_user_id: &str,
        params: &[(&str, &str)],
    ) -> GraphResult<String> {
        let path = format!("{}/media", ig_user_id);
        let value = self
            .client
            .post(&path, params, Some(self.upload_timeout))
            .await?;
        id_field(&value)
    }
}

#[async_trait]
impl GraphApi for HttpGraph {
    async fn create_carousel_item(
        &self,
        ig_user_id: &str,
        token: &AccessToken,
        image_url: &str,
    ) -> GraphResult<String> {
        self.create_container(
            ig_user_id,
            &[
                ("image_url", image_url),
                ("is_carousel_item", "true"),
                ("access_token", token.expose()),
            ],
        )
        .await
    }

    async fn create_carousel(
        &self,
        ig_user_id: &str,
        token: &AccessToken,
        children: &[String],
        caption: &str,
        hide_likes: bool,
    ) -> GraphResult<String> {
        let children = children.join(",");
        let mut params = vec![
            ("media_type", "CAROUSEL"),
            ("children", children.as_str()),
            ("caption", caption),
            ("access_token", token.expose()),
        ];
        if hide_likes {
            params.push(("like_and_view_counts_disabled", "true"));
        }
        self.create_container(ig_user_id, &params).await
    }

    async fn create_reel(
        &self,
        ig_user_id: &str,
        token: &AccessToken,
        video_url: &str,
        caption: &str,
        hide_likes: bool,
    ) -> GraphResult<String> {
        let mut params = vec![
            ("media_type", "REELS"),
            ("video_url", video_url),
            ("caption", caption),
            ("access_token", token.expose()),
        ];
        if hide_likes {
            params.push(("like_and_view_counts_disabled", "true"));
        }
        self.create_container(ig_user_id, &params).await
    }

    async fn container_status(
        &self,
        container_id: &str,
        token: &AccessToken,
    ) -> GraphResult<ContainerStatus> {
        let value = self
            .client
            .get(
                container_id,
                &[
                    ("fields", "status_code,status"),
                    ("access_token", token.expose()),
                ],
            )
            .await?;

        let code = value
            .get("status_code")
            .and_then(Value::as_str)
            .unwrap_or("IN_PROGRESS");
        let status = value.get("status").and_then(Value::as_str);
        Ok(ContainerStatus::parse(code, status))
    }

    async fn publish(
        &self,
        ig_user_id: &str,
        token: &AccessToken,
        creation_id: &str,
    ) -> GraphResult<String> {
        let path = format!("{}/media_publish", ig_user_id);
        let value = self
            .client
            .post(
                &path,
                &[("creation_id", creation_id), ("access_token", token.expose())],
                None,
            )
            .await?;
        id_field(&value)
    }

    async fn permalink(&self, media_id: &str, token: &AccessToken) -> GraphResult<Option<String>> {
        let value = self
            .client
            .get(
                media_id,
                &[("fields", "permalink"), ("access_token", token.expose())],
            )
            .await?;
        Ok(value
            .get("permalink")
            .and_then(Value::as_str)
            .map(str::to_string))
    }

    async fn comment(
        &self,
        media_id: &str,
        token: &AccessToken,
        message: &str,
    ) -> GraphResult<String> {
        let path = format!("{}/comments", media_id);
        let value = self
            .client
            .post(
                &path,
                &[("message", message), ("access_token", token.expose())],
                None,
            )
            .await?;
        id_field(&value)
    }
}
