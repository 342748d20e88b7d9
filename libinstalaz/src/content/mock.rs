//! In-memory content source for tests

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};

use super::{ContentFetcher, FetchResult};
use crate::error::ContentSourceError;

/// Serves fixed documents; every URL exists unless marked missing
#[derive(Debug, Default)]
pub struct StaticFetcher {
    texts: HashMap<String, String>,
    missing: HashSet<String>,
    nothing_exists: bool,
    heads: AtomicUsize,
}

impl StaticFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_text(mut self, url: impl Into<String>, body: impl Into<String>) -> Self {
        self.texts.insert(url.into(), body.into());
        self
    }

    pub fn missing(mut self, url: impl Into<String>) -> Self {
        self.missing.insert(url.into());
        self
    }

    /// Every HEAD check fails
    pub fn nothing_exists(mut self) -> Self {
        self.nothing_exists = true;
        self
    }

    pub fn head_count(&self) -> usize {
        self.heads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ContentFetcher for StaticFetcher {
    async fn fetch_text(&self, url: &str) -> FetchResult<String> {
        self.texts
            .get(url)
            .cloned()
            .ok_or_else(|| ContentSourceError::Unreachable(format!("{}: 404 Not Found", url)))
    }

    async fn exists(&self, url: &str) -> bool {
        self.heads.fetch_add(1, Ordering::SeqCst);
        !self.nothing_exists && !self.missing.contains(url)
    }
}
