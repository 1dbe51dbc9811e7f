use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

pub mod extractor;
pub mod legacy;
pub mod relay;
pub mod transcode;

pub use extractor::BulkExtractor;
pub use legacy::{LegacyStream, StreamResolver};
pub use relay::BrowserRelay;
pub use transcode::Transcoder;

use crate::config::Config;
use crate::evasion::{EvasionIdentity, EvasionSession};
use crate::identifier::VideoId;
use crate::innertube::PlayerClient;
use crate::{AcquireError, AcquireResult, Result};

/// Kind of media file a chain produces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Video,
    Audio,
}

impl MediaKind {
    /// Extension of the canonical output file
    pub fn extension(&self) -> &'static str {
        match self {
            MediaKind::Video => "mp4",
            MediaKind::Audio => "mp3",
        }
    }

    /// Subdirectory of the download root
    pub fn dir_name(&self) -> &'static str {
        match self {
            MediaKind::Video => "video",
            MediaKind::Audio => "audio",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AttemptOutcome {
    Success,
    Failure,
}

/// One entry of a chain's attempt log
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StrategyAttempt {
    pub strategy: String,
    pub outcome: AttemptOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl StrategyAttempt {
    fn success(strategy: &str, path: &Path) -> Self {
        Self {
            strategy: strategy.to_string(),
            outcome: AttemptOutcome::Success,
            detail: Some(path.display().to_string()),
        }
    }

    fn failure(strategy: &str, detail: String) -> Self {
        Self {
            strategy: strategy.to_string(),
            outcome: AttemptOutcome::Failure,
            detail: Some(detail),
        }
    }
}

/// Human-readable summary of an exhausted chain
pub fn describe_failure(kind: &MediaKind, attempts: &[StrategyAttempt], hints: &[String]) -> String {
    let mut message = format!("All {} download strategies failed", kind);

    if !attempts.is_empty() {
        let log: Vec<String> = attempts
            .iter()
            .map(|a| format!("{}: {}", a.strategy, a.detail.as_deref().unwrap_or("failed")))
            .collect();
        message.push_str(&format!(" ({})", log.join("; ")));
    }

    for hint in hints {
        message.push_str("\nHint: ");
        message.push_str(hint);
    }

    message
}

/// Everything a strategy needs to know about the current attempt
pub struct StrategyContext<'a> {
    pub id: &'a VideoId,
    pub kind: MediaKind,
    pub identity: Arc<EvasionIdentity>,
    /// Directory the produced file must land in
    pub output_dir: &'a Path,
    pub session: &'a EvasionSession,
}

impl StrategyContext<'_> {
    /// `<output_dir>/<id>.<ext>`
    pub fn canonical_path(&self) -> PathBuf {
        self.output_dir
            .join(format!("{}.{}", self.id, self.kind.extension()))
    }
}

/// One self-contained way of producing a media file
#[async_trait]
pub trait AcquisitionStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Produce a file for `ctx.id`; any error is a recoverable failure of this strategy
    async fn attempt(&self, ctx: &StrategyContext<'_>) -> Result<PathBuf>;
}

/// Output check applied to every file a strategy reports
pub type Validator = fn(&Path) -> Result<()>;

/// Verified success means the file exists and is not empty
pub fn verify_nonempty_file(path: &Path) -> Result<()> {
    let meta = std::fs::metadata(path)
        .map_err(|e| anyhow::anyhow!("{} not found: {}", path.display(), e))?;

    if !meta.is_file() {
        anyhow::bail!("{} is not a file", path.display());
    }
    if meta.len() == 0 {
        anyhow::bail!("{} is empty", path.display());
    }
    Ok(())
}

/// Run `strategies` in order until one produces a validated file
pub async fn run_chain(
    strategies: &[Arc<dyn AcquisitionStrategy>],
    ctx: &StrategyContext<'_>,
    validate: Validator,
) -> AcquireResult<(PathBuf, Vec<StrategyAttempt>)> {
    let mut attempts = Vec::with_capacity(strategies.len());

    for strategy in strategies {
        if ctx.session.is_cancelled() {
            return Err(AcquireError::Cancelled);
        }

        tracing::info!("Trying {} strategy for {} {}", strategy.name(), ctx.kind, ctx.id);

        let outcome = match strategy.attempt(ctx).await {
            Ok(path) => validate(&path).map(|_| path),
            Err(e) => Err(e),
        };

        match outcome {
            Ok(path) => {
                tracing::info!("{} succeeded: {}", strategy.name(), path.display());
                attempts.push(StrategyAttempt::success(strategy.name(), &path));
                return Ok((path, attempts));
            }
            Err(e) => {
                if ctx.session.is_cancelled() {
                    return Err(AcquireError::Cancelled);
                }
                tracing::warn!("{} failed for {}: {:#}", strategy.name(), ctx.id, e);
                attempts.push(StrategyAttempt::failure(strategy.name(), format!("{:#}", e)));
            }
        }
    }

    tracing::error!("All {} strategies failed for {}", ctx.kind, ctx.id);
    Err(AcquireError::AggregatedAcquisitionFailure {
        kind: ctx.kind,
        attempts,
        hints: Vec::new(),
    })
}

/// A produced media file with the log of how it was obtained
#[derive(Debug, Clone, Serialize)]
pub struct AcquiredMedia {
    pub path: PathBuf,
    pub kind: MediaKind,
    pub attempts: Vec<StrategyAttempt>,
}

/// Produces local video and audio files through ordered strategy chains
pub struct MediaAcquirer {
    session: Arc<EvasionSession>,
    download_root: PathBuf,
    video_chain: Vec<Arc<dyn AcquisitionStrategy>>,
    audio_chain: Vec<Arc<dyn AcquisitionStrategy>>,
}

impl MediaAcquirer {
    pub fn new(
        session: Arc<EvasionSession>,
        download_root: impl Into<PathBuf>,
        video_chain: Vec<Arc<dyn AcquisitionStrategy>>,
        audio_chain: Vec<Arc<dyn AcquisitionStrategy>>,
    ) -> Self {
        Self {
            session,
            download_root: download_root.into(),
            video_chain,
            audio_chain,
        }
    }

    /// Default chains: bulk extractor, browser relay, legacy stream for video;
    /// bulk extractor, legacy stream for audio
    pub fn from_config(config: &Config, session: Arc<EvasionSession>) -> Self {
        let timeout = Duration::from_secs(config.tools.command_timeout_secs);

        let extractor: Arc<dyn AcquisitionStrategy> = Arc::new(BulkExtractor::new(
            config.tools.yt_dlp_path.clone(),
            config.storage.cookie_file.clone(),
            timeout,
        ));
        let relay: Arc<dyn AcquisitionStrategy> = Arc::new(BrowserRelay::new(config.browser.relay.clone()));

        let transcoder = Transcoder::new(config.tools.ffmpeg_path.clone(), timeout);
        let legacy: Arc<dyn AcquisitionStrategy> = Arc::new(
            LegacyStream::new(Arc::new(PlayerClient::new(session.clone())), transcoder)
                .with_progress(config.app.show_progress),
        );

        Self::new(
            session,
            config.storage.download_root.clone(),
            vec![extractor.clone(), relay, legacy.clone()],
            vec![extractor, legacy],
        )
    }

    /// `<root>/<kind>/<id>`
    pub fn output_dir(&self, id: &VideoId, kind: MediaKind) -> PathBuf {
        self.download_root.join(kind.dir_name()).join(id.as_str())
    }

    fn chain(&self, kind: MediaKind) -> &[Arc<dyn AcquisitionStrategy>] {
        match kind {
            MediaKind::Video => &self.video_chain,
            MediaKind::Audio => &self.audio_chain,
        }
    }

    pub async fn acquire(&self, id: &VideoId, kind: MediaKind) -> AcquireResult<AcquiredMedia> {
        let identity = self.session.next_identity();
        self.session.pace().await?;

        let output_dir = self.output_dir(id, kind);
        if let Err(e) = fs_err::create_dir_all(&output_dir) {
            return Err(AcquireError::AggregatedAcquisitionFailure {
                kind,
                attempts: Vec::new(),
                hints: vec![format!("Output directory unavailable: {}", e)],
            });
        }

        let ctx = StrategyContext {
            id,
            kind,
            identity,
            output_dir: &output_dir,
            session: &self.session,
        };

        let (path, attempts) = run_chain(self.chain(kind), &ctx, verify_nonempty_file).await?;

        Ok(AcquiredMedia { path, kind, attempts })
    }
}
