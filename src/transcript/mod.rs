use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub mod captions;

pub use captions::PlayerCaptions;

use crate::evasion::EvasionSession;
use crate::identifier::VideoId;
use crate::{AcquireError, AcquireResult, Result};

/// Language every fallback path tries to end up in
pub const PREFERRED_LANGUAGE: &str = "en";

/// One timed caption line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    /// Offset from the start of the video, seconds
    pub start: f64,
    /// Seconds
    pub duration: f64,
    pub text: String,
}

/// A caption track advertised for a video
#[derive(Debug, Clone, PartialEq)]
pub struct CaptionTrack {
    pub language_code: String,
    pub name: String,
    /// Speech-recognition track rather than an uploaded one
    pub is_generated: bool,
    pub is_translatable: bool,
    pub base_url: String,
}

impl CaptionTrack {
    pub fn is_english(&self) -> bool {
        is_english(&self.language_code)
    }
}

/// `en` and regional variants such as `en-GB`
pub fn is_english(language_code: &str) -> bool {
    let code = language_code.to_ascii_lowercase();
    code == PREFERRED_LANGUAGE || code.starts_with("en-")
}

/// Caption query service
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CaptionService: Send + Sync {
    /// Captions in the service's default language choice
    async fn fetch_default(&self, id: &VideoId) -> Result<Vec<TranscriptEntry>>;

    async fn list_tracks(&self, id: &VideoId) -> Result<Vec<CaptionTrack>>;

    async fn fetch_track(&self, track: &CaptionTrack) -> Result<Vec<TranscriptEntry>>;

    /// Machine translation of `track` into `language`
    async fn translate(&self, track: &CaptionTrack, language: &str) -> Result<Vec<TranscriptEntry>>;
}

/// Resolves a transcript, preferring English and degrading to an empty result
pub struct TranscriptResolver {
    session: Arc<EvasionSession>,
    service: Arc<dyn CaptionService>,
}

impl TranscriptResolver {
    pub fn new(session: Arc<EvasionSession>, service: Arc<dyn CaptionService>) -> Self {
        Self { session, service }
    }

    /// Never fails for lack of captions; only cancellation is reported as an error
    pub async fn resolve(&self, id: &VideoId) -> AcquireResult<Vec<TranscriptEntry>> {
        self.session.next_identity();
        if self.session.is_cancelled() {
            return Err(AcquireError::Cancelled);
        }

        let entries = match self.service.fetch_default(id).await {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!("Error getting transcript with default language: {:#}", e);
                self.from_listing(id).await
            }
        };

        if self.session.is_cancelled() {
            return Err(AcquireError::Cancelled);
        }

        let entries = normalize(entries);
        if entries.is_empty() {
            tracing::warn!("No transcript available for video {}", id);
        } else {
            tracing::info!("Transcript for {}: {} entries", id, entries.len());
        }
        Ok(entries)
    }

    async fn from_listing(&self, id: &VideoId) -> Vec<TranscriptEntry> {
        let tracks = match self.service.list_tracks(id).await {
            Ok(tracks) => tracks,
            Err(e) => {
                tracing::warn!("Error listing available transcripts: {:#}", e);
                return Vec::new();
            }
        };

        let mut fallback: Option<&CaptionTrack> = None;

        for track in &tracks {
            if track.is_english() {
                match self.service.fetch_track(track).await {
                    Ok(entries) => return entries,
                    Err(e) => {
                        tracing::warn!("Error fetching {} transcript: {:#}", track.language_code, e);
                    }
                }
            } else {
                // Last candidate wins
                fallback = Some(track);
            }
        }

        let Some(track) = fallback else {
            tracing::error!("Could not get transcript for video {}", id);
            return Vec::new();
        };

        if track.is_translatable {
            match self.service.translate(track, PREFERRED_LANGUAGE).await {
                Ok(entries) => return entries,
                Err(e) => tracing::warn!("Error translating transcript: {:#}", e),
            }
        }

        match self.service.fetch_track(track).await {
            Ok(entries) => {
                tracing::info!("Using untranslated {} transcript", track.language_code);
                entries
            }
            Err(e) => {
                tracing::error!("Could not get transcript for video {}: {:#}", id, e);
                Vec::new()
            }
        }
    }
}

/// Drop blank lines and order by start offset
fn normalize(mut entries: Vec<TranscriptEntry>) -> Vec<TranscriptEntry> {
    entries.retain(|e| !e.text.trim().is_empty());
    entries.sort_by(|a, b| a.start.total_cmp(&b.start));
    entries
}
