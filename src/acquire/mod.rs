use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub mod hints;

use crate::config::Config;
use crate::evasion::{EvasionSession, FreeProxyProvider, PacingRange, ProxyEntry, ProxyPool, WebDriverLauncher};
use crate::identifier::VideoId;
use crate::innertube::PlayerClient;
use crate::media::{AcquiredMedia, MediaAcquirer, MediaKind};
use crate::metadata::{AuthoritativeSource, DataApiClient, Metadata, MetadataResolver};
use crate::output::ArtifactStore;
use crate::transcript::{PlayerCaptions, TranscriptEntry, TranscriptResolver};
use crate::{AcquireError, AcquireResult, Result};

/// Which artifacts to produce besides metadata
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcquisitionRequest {
    pub video: bool,
    pub audio: bool,
    pub transcript: bool,
}

impl AcquisitionRequest {
    pub fn all() -> Self {
        Self {
            video: true,
            audio: true,
            transcript: true,
        }
    }
}

impl Default for AcquisitionRequest {
    /// Metadata and transcript only
    fn default() -> Self {
        Self {
            video: false,
            audio: false,
            transcript: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Artifact {
    Metadata,
    Transcript,
    Video,
    Audio,
}

impl From<MediaKind> for Artifact {
    fn from(kind: MediaKind) -> Self {
        match kind {
            MediaKind::Video => Artifact::Video,
            MediaKind::Audio => Artifact::Audio,
        }
    }
}

impl fmt::Display for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Artifact::Metadata => "metadata",
            Artifact::Transcript => "transcript",
            Artifact::Video => "video",
            Artifact::Audio => "audio",
        };
        f.write_str(name)
    }
}

/// A sub-resolver failure that did not abort the request
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AcquisitionWarning {
    pub artifact: Artifact,
    pub message: String,
}

impl AcquisitionWarning {
    pub fn new(artifact: Artifact, message: impl Into<String>) -> Self {
        Self {
            artifact,
            message: message.into(),
        }
    }
}

impl fmt::Display for AcquisitionWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.artifact, self.message)
    }
}

/// Everything one request produced; referenced files belong to the caller
#[derive(Debug, Clone, Serialize)]
pub struct AcquisitionResult {
    pub id: VideoId,
    pub metadata: Option<Metadata>,
    pub transcript: Vec<TranscriptEntry>,
    pub video: Option<AcquiredMedia>,
    pub audio: Option<AcquiredMedia>,
    pub warnings: Vec<AcquisitionWarning>,
    pub metadata_path: Option<PathBuf>,
    pub transcript_path: Option<PathBuf>,
}

impl AcquisitionResult {
    pub fn is_complete(&self) -> bool {
        self.warnings.is_empty()
    }
}

/// Load the configured proxy list, topped up from the free provider
pub async fn load_proxy_pool(config: &Config) -> Vec<ProxyEntry> {
    let provider = Arc::new(FreeProxyProvider::new(config.evasion.proxy_provider_url.clone()));
    let pool = ProxyPool::new(
        config.evasion.proxy_list_path.clone(),
        config.evasion.proxy_rotation,
        provider,
    )
    .with_pacing(PacingRange::from_secs(
        config.evasion.delay_min_secs,
        config.evasion.delay_max_secs,
    ));
    pool.load().await
}

/// Composes the resolvers into one per-identifier request
pub struct AcquisitionOrchestrator {
    session: Arc<EvasionSession>,
    metadata: MetadataResolver,
    transcripts: TranscriptResolver,
    media: MediaAcquirer,
    store: ArtifactStore,
}

impl AcquisitionOrchestrator {
    pub fn new(
        session: Arc<EvasionSession>,
        metadata: MetadataResolver,
        transcripts: TranscriptResolver,
        media: MediaAcquirer,
        store: ArtifactStore,
    ) -> Self {
        Self {
            session,
            metadata,
            transcripts,
            media,
            store,
        }
    }

    /// Wire the shipped collaborators around a fresh session
    pub fn from_config(config: &Config, proxies: Arc<Vec<ProxyEntry>>, cancel: CancellationToken) -> Result<Self> {
        let launcher = Arc::new(WebDriverLauncher::new(&config.browser));
        let session = Arc::new(EvasionSession::new(config.evasion.clone(), proxies, launcher, cancel));

        let authoritative: Option<Arc<dyn AuthoritativeSource>> = match &config.api.youtube_api_key {
            Some(key) => Some(Arc::new(DataApiClient::new(key.clone())?)),
            None => {
                tracing::debug!("No API key configured; metadata will be scraped");
                None
            }
        };

        let captions = Arc::new(PlayerCaptions::new(PlayerClient::new(session.clone())));

        Ok(Self::new(
            session.clone(),
            MetadataResolver::new(session.clone(), authoritative),
            TranscriptResolver::new(session.clone(), captions),
            MediaAcquirer::from_config(config, session),
            ArtifactStore::new(config.storage.download_root.clone()),
        ))
    }

    pub fn session(&self) -> &EvasionSession {
        &self.session
    }

    /// Acquire the requested artifacts for `reference`.
    ///
    /// Fails only for an unparseable reference, on cancellation, or when
    /// nothing at all could be produced. Every other failure, including a
    /// video the authoritative service does not know, becomes a warning.
    pub async fn acquire(
        &self,
        reference: &str,
        request: &AcquisitionRequest,
    ) -> AcquireResult<AcquisitionResult> {
        let id = VideoId::parse(reference)?;
        tracing::info!("Starting acquisition for {}", id);

        let mut warnings = Vec::new();

        let metadata = match self.metadata.resolve(&id).await {
            Ok(metadata) => Some(metadata),
            Err(AcquireError::Cancelled) => return Err(AcquireError::Cancelled),
            Err(e) => {
                tracing::warn!("Continuing without metadata: {}", e);
                warnings.push(AcquisitionWarning::new(Artifact::Metadata, e.to_string()));
                None
            }
        };

        let transcript = if request.transcript {
            let entries = self.transcripts.resolve(&id).await?;
            if entries.is_empty() {
                warnings.push(AcquisitionWarning::new(Artifact::Transcript, "No transcript available"));
            }
            entries
        } else {
            Vec::new()
        };

        let video = if request.video {
            self.acquire_media(&id, MediaKind::Video, &mut warnings).await?
        } else {
            None
        };

        let audio = if request.audio {
            self.acquire_media(&id, MediaKind::Audio, &mut warnings).await?
        } else {
            None
        };

        if metadata.is_none() && transcript.is_empty() && video.is_none() && audio.is_none() {
            return Err(AcquireError::RequestExhausted {
                id: id.to_string(),
                warnings: warnings.iter().map(ToString::to_string).collect(),
            });
        }

        let metadata_path = match &metadata {
            Some(metadata) => persist(Artifact::Metadata, self.store.write_metadata(metadata), &mut warnings),
            None => None,
        };
        let transcript_path = if transcript.is_empty() {
            None
        } else {
            persist(
                Artifact::Transcript,
                self.store.write_transcript(&id, &transcript),
                &mut warnings,
            )
        };

        if warnings.is_empty() {
            tracing::info!("Acquisition for {} complete", id);
        } else {
            tracing::warn!("Acquisition for {} finished with {} warning(s)", id, warnings.len());
        }

        Ok(AcquisitionResult {
            id,
            metadata,
            transcript,
            video,
            audio,
            warnings,
            metadata_path,
            transcript_path,
        })
    }

    async fn acquire_media(
        &self,
        id: &VideoId,
        kind: MediaKind,
        warnings: &mut Vec<AcquisitionWarning>,
    ) -> AcquireResult<Option<AcquiredMedia>> {
        let failure = match self.media.acquire(id, kind).await {
            Ok(media) => return Ok(Some(media)),
            Err(AcquireError::Cancelled) => return Err(AcquireError::Cancelled),
            Err(AcquireError::AggregatedAcquisitionFailure {
                kind,
                attempts,
                hints: mut advisory,
            }) => {
                advisory.extend(hints::detect(&attempts));
                AcquireError::AggregatedAcquisitionFailure {
                    kind,
                    attempts,
                    hints: advisory,
                }
            }
            Err(other) => other,
        };

        tracing::error!("{} acquisition failed for {}: {}", kind, id, failure);
        warnings.push(AcquisitionWarning::new(kind.into(), failure.to_string()));
        Ok(None)
    }
}

fn persist(artifact: Artifact, written: Result<PathBuf>, warnings: &mut Vec<AcquisitionWarning>) -> Option<PathBuf> {
    match written {
        Ok(path) => Some(path),
        Err(e) => {
            tracing::warn!("Failed to write {} artifact: {:#}", artifact, e);
            warnings.push(AcquisitionWarning::new(artifact, format!("Failed to write {}: {:#}", artifact, e)));
            None
        }
    }
}
