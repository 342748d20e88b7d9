//! Content source resolution
//!
//! Media lives on an ordinary web server. An account either enumerates
//! files by naming convention (`img (1).jpg`, `img (2).jpg`, ... under
//! `base_url`; `vid.mp4`, `vid (1).mp4`, ... under `video_base_url`) or
//! points at a manifest listing one file name or URL per line. Captions are
//! the non-empty lines of `caption_url`, used round-robin.
//!
//! Post history is the only record of what has been used: an item with a
//! `pending` or `posted` row is never offered again.

use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};
use url::Url;

use crate::db::Database;
use crate::error::{ContentSourceError, Result};
use crate::types::{Account, AccountKind, ContentItem, MediaKind};

pub mod http;

// Available for all builds (not just tests) to support integration tests
pub mod mock;

/// Existence checks allowed per selection before giving up
pub const MAX_EXISTENCE_CHECKS: usize = 50;

/// Largest preview page the dashboard may request
pub const MAX_PAGE_SIZE: u32 = 100;

pub type FetchResult<T> = std::result::Result<T, ContentSourceError>;

/// Transport for caption lists, manifests and existence checks
#[async_trait]
pub trait ContentFetcher: Send + Sync {
    /// GET a text document
    async fn fetch_text(&self, url: &str) -> FetchResult<String>;

    /// True when a HEAD request answers 200
    async fn exists(&self, url: &str) -> bool;
}

/// One entry of a preview page
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Candidate {
    pub url: String,
    pub filename: String,
    pub used: bool,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CandidatePage {
    pub items: Vec<Candidate>,
    pub has_more: bool,
    pub total_items: usize,
    pub page: u32,
    pub page_size: u32,
}

#[derive(Clone)]
pub struct ContentResolver {
    fetcher: Arc<dyn ContentFetcher>,
    db: Database,
}

impl ContentResolver {
    pub fn new(fetcher: Arc<dyn ContentFetcher>, db: Database) -> Self {
        Self { fetcher, db }
    }

    /// Every item the account's source offers, in listing order
    pub async fn listing(&self, account: &Account) -> Result<Vec<ContentItem>> {
        let kind = media_kind(account.kind);
        if let Some(manifest) = non_blank(&account.manifest_url) {
            let text = self.fetcher.fetch_text(manifest).await?;
            let base = match kind {
                MediaKind::Image => non_blank(&account.base_url),
                MediaKind::Video => non_blank(&account.video_base_url),
            };
            return parse_manifest(&text, base, kind);
        }

        match account.kind {
            AccountKind::Carousel => {
                let base = non_blank(&account.base_url).ok_or_else(|| {
                    ContentSourceError::Misconfigured(format!(
                        "Account '{}' has no base_url for images",
                        account.name
                    ))
                })?;
                let names = (1..=account.max_items).map(|i| format!("img ({}).jpg", i));
                names
                    .map(|name| item_at(base, name, kind))
                    .collect::<FetchResult<Vec<_>>>()
                    .map_err(Into::into)
            }
            AccountKind::Reel => {
                let base = non_blank(&account.video_base_url).ok_or_else(|| {
                    ContentSourceError::Misconfigured(format!(
                        "Account '{}' has no video_base_url",
                        account.name
                    ))
                })?;
                let names = std::iter::once("vid.mp4".to_string())
                    .chain((1..=account.max_items).map(|i| format!("vid ({}).mp4", i)));
                names
                    .map(|name| item_at(base, name, kind))
                    .collect::<FetchResult<Vec<_>>>()
                    .map_err(Into::into)
            }
        }
    }

    /// Select up to `count` unused items that exist on the server
    ///
    /// Missing files are skipped. At most [`MAX_EXISTENCE_CHECKS`] HEAD
    /// requests are made.
    pub async fn next_items(&self, account: &Account, count: usize) -> Result<Vec<ContentItem>> {
        let used = self.db.used_item_ids(account.id).await?;
        let listing = self.listing(account).await?;
        let mut unused = listing.into_iter().filter(|item| !used.contains(&item.id)).peekable();

        if unused.peek().is_none() {
            return Err(ContentSourceError::Exhausted(format!(
                "All content for '{}' has been posted",
                account.name
            ))
            .into());
        }

        let mut selected = Vec::with_capacity(count);
        let mut checks = 0;
        for item in unused {
            if selected.len() >= count || checks >= MAX_EXISTENCE_CHECKS {
                break;
            }
            checks += 1;
            if self.fetcher.exists(&item.url).await {
                selected.push(item);
            } else {
                warn!(account = %account.name, item = %item.id, "Candidate not found, skipping");
            }
        }

        if selected.is_empty() {
            return Err(ContentSourceError::Unreachable(format!(
                "No reachable content for '{}' after {} checks",
                account.name, checks
            ))
            .into());
        }

        debug!(account = %account.name, selected = selected.len(), checks, "Content selected");
        Ok(selected)
    }

    /// A page of items for selective publishing; no existence checks
    pub async fn candidates(
        &self,
        account: &Account,
        page: u32,
        page_size: u32,
        include_used: bool,
    ) -> Result<CandidatePage> {
        let page = page.max(1);
        let page_size = page_size.clamp(1, MAX_PAGE_SIZE);
        let used = self.db.used_item_ids(account.id).await?;
        let listing = self.listing(account).await?;

        let ordered: Vec<Candidate> = listing
            .into_iter()
            .map(|item| Candidate {
                used: used.contains(&item.id),
                url: item.url,
                filename: item.id,
            })
            .filter(|candidate| include_used || !candidate.used)
            .collect();

        Ok(paginate(ordered, page, page_size))
    }

    /// Map URLs chosen on the dashboard back to content items
    pub async fn resolve_selected(&self, account: &Account, urls: &[String]) -> Result<Vec<ContentItem>> {
        let listing = self.listing(account).await?;
        let kind = media_kind(account.kind);
        Ok(urls
            .iter()
            .map(|url| {
                listing
                    .iter()
                    .find(|item| &item.url == url)
                    .cloned()
                    .unwrap_or_else(|| ContentItem {
                        id: file_name_of(url),
                        url: url.clone(),
                        kind,
                    })
            })
            .collect())
    }

    /// Ids among `items` that are already pending or posted
    pub async fn already_used(&self, account: &Account, items: &[ContentItem]) -> Result<Vec<String>> {
        let used: HashSet<String> = self.db.used_item_ids(account.id).await?;
        Ok(items
            .iter()
            .filter(|item| used.contains(&item.id))
            .map(|item| item.id.clone())
            .collect())
    }

    /// Caption lines of the account, blank lines dropped
    pub async fn caption_lines(&self, account: &Account) -> Result<Vec<String>> {
        let Some(url) = non_blank(&account.caption_url) else {
            return Ok(Vec::new());
        };
        let text = self.fetcher.fetch_text(url).await?;
        Ok(text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }

    /// The caption the next post will use, without advancing
    pub async fn peek_caption(&self, account: &Account) -> Result<String> {
        let lines = self.caption_lines(account).await?;
        Ok(caption_at(&lines, account.caption_index))
    }
}

/// `lines[index % len]`, or empty when there are no lines
pub fn caption_at(lines: &[String], index: i64) -> String {
    if lines.is_empty() {
        return String::new();
    }
    let len = lines.len() as i64;
    lines[index.rem_euclid(len) as usize].clone()
}

fn media_kind(kind: AccountKind) -> MediaKind {
    match kind {
        AccountKind::Carousel => MediaKind::Image,
        AccountKind::Reel => MediaKind::Video,
    }
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

/// Join a file name onto a base URL as one path segment
///
/// Spaces become `%20`; parentheses are kept.
pub fn join_file(base: &str, name: &str) -> FetchResult<String> {
    let mut url = Url::parse(base.trim_end_matches('/'))
        .map_err(|e| ContentSourceError::Misconfigured(format!("Invalid base URL '{}': {}", base, e)))?;
    url.path_segments_mut()
        .map_err(|_| ContentSourceError::Misconfigured(format!("Base URL '{}' cannot have a path", base)))?
        .pop_if_empty()
        .push(name);
    Ok(url.to_string())
}

fn item_at(base: &str, name: String, kind: MediaKind) -> FetchResult<ContentItem> {
    Ok(ContentItem {
        url: join_file(base, &name)?,
        id: name,
        kind,
    })
}

fn file_name_of(url: &str) -> String {
    url.trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(url)
        .to_string()
}

/// Manifest lines are absolute URLs or file names relative to `base`
fn parse_manifest(text: &str, base: Option<&str>, kind: MediaKind) -> Result<Vec<ContentItem>> {
    let mut seen = HashSet::new();
    let mut items = Vec::new();
    for line in text.lines().map(str::trim) {
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let item = if line.starts_with("http://") || line.starts_with("https://") {
            ContentItem {
                id: file_name_of(line),
                url: line.to_string(),
                kind,
            }
        } else {
            let base = base.ok_or_else(|| {
                ContentSourceError::Misconfigured(format!(
                    "Manifest entry '{}' is relative but no base URL is configured",
                    line
                ))
            })?;
            item_at(base, line.to_string(), kind)?
        };
        if seen.insert(item.id.clone()) {
            items.push(item);
        }
    }
    Ok(items)
}

fn paginate(ordered: Vec<Candidate>, page: u32, page_size: u32) -> CandidatePage {
    let total_items = ordered.len();
    let start = ((page - 1) as usize).saturating_mul(page_size as usize);
    let end = start.saturating_add(page_size as usize).min(total_items);
    let items = if start < total_items {
        ordered[start..end].to_vec()
    } else {
        Vec::new()
    };
    CandidatePage {
        items,
        has_more: end < total_items,
        total_items,
        page,
        page_size,
    }
}
