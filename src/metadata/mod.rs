use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub mod data_api;
pub mod scrape;

pub use data_api::DataApiClient;

use crate::evasion::EvasionSession;
use crate::identifier::VideoId;
use crate::{AcquireError, AcquireResult};

/// Structured description of one video
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    pub id: VideoId,
    pub title: String,
    pub description: String,
    pub channel_title: String,
    pub channel_id: Option<String>,
    pub published_at: DateTime<Utc>,
    pub duration_secs: Option<u64>,
    pub view_count: Option<u64>,
    pub like_count: Option<u64>,
    pub comment_count: Option<u64>,
    pub tags: Vec<String>,
    pub thumbnail_url: String,
    /// Set when scraped from the page rather than read from the API
    pub approximate: bool,
}

/// Failure of an authoritative lookup
#[derive(thiserror::Error, Debug)]
pub enum LookupError {
    /// The service answered but knows no such video
    #[error("no video found with id {0}")]
    NotFound(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Credentialed metadata service
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AuthoritativeSource: Send + Sync {
    async fn lookup(&self, id: &VideoId) -> Result<Metadata, LookupError>;
}

/// Resolves metadata through the authoritative service, falling back to page scraping
pub struct MetadataResolver {
    session: Arc<EvasionSession>,
    authoritative: Option<Arc<dyn AuthoritativeSource>>,
}

impl MetadataResolver {
    pub fn new(session: Arc<EvasionSession>, authoritative: Option<Arc<dyn AuthoritativeSource>>) -> Self {
        Self {
            session,
            authoritative,
        }
    }

    pub async fn resolve(&self, id: &VideoId) -> AcquireResult<Metadata> {
        self.session.next_identity();

        if let Some(source) = &self.authoritative {
            self.session.pace().await?;

            match source.lookup(id).await {
                Ok(metadata) => return Ok(metadata),
                Err(LookupError::NotFound(_)) => {
                    tracing::warn!("Authoritative lookup found no video {}", id);
                    return Err(AcquireError::NotFound(id.to_string()));
                }
                Err(LookupError::Other(e)) => {
                    tracing::warn!("API method failed, falling back to scraping: {:#}", e);
                }
            }
        }

        self.scrape(id).await
    }

    async fn scrape(&self, id: &VideoId) -> AcquireResult<Metadata> {
        let unavailable = |reason: String| AcquireError::MetadataUnavailable {
            id: id.to_string(),
            reason,
        };

        let browser = match self.session.acquire_browser().await {
            Ok(browser) => browser,
            Err(AcquireError::Cancelled) => return Err(AcquireError::Cancelled),
            Err(e) => return Err(unavailable(e.to_string())),
        };

        let scraped = self.scrape_with(&browser, id).await;
        browser.release().await;

        match scraped {
            Ok(metadata) => Ok(metadata),
            Err(AcquireError::Cancelled) => Err(AcquireError::Cancelled),
            Err(e) => {
                tracing::error!("Error scraping video info: {}", e);
                Err(unavailable(e.to_string()))
            }
        }
    }

    async fn scrape_with(
        &self,
        browser: &crate::evasion::ScopedBrowser,
        id: &VideoId,
    ) -> AcquireResult<Metadata> {
        let failed = |e: anyhow::Error| AcquireError::MetadataUnavailable {
            id: id.to_string(),
            reason: format!("{:#}", e),
        };

        self.session.pace().await?;
        browser.navigate(&id.watch_url()).await.map_err(failed)?;

        // Rendered pages keep loading long after navigation returns
        self.session.pace_scaled(2).await?;

        let title = browser.title().await.map_err(failed)?;
        let html = browser.page_source().await.map_err(failed)?;

        Ok(scrape::parse_watch_page(id, &title, &html))
    }
}
