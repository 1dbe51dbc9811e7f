// Legacy stream strategy: resolve a direct stream URL from the player API
// and download it without any external tool.

use anyhow::Context;
use async_trait::async_trait;
use futures_util::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::transcode::Transcoder;
use super::{AcquisitionStrategy, MediaKind, StrategyContext};
use crate::evasion::EvasionSession;
use crate::identifier::VideoId;
use crate::innertube::{PlayerClient, RawFormat, CLIENT_USER_AGENT};
use crate::Result;

/// A directly downloadable stream
#[derive(Debug, Clone, PartialEq)]
pub struct StreamCandidate {
    pub itag: u32,
    pub url: String,
    pub mime_type: String,
    /// Audio and video muxed together
    pub progressive: bool,
    pub height: Option<u32>,
    pub bitrate: u64,
    pub content_length: Option<u64>,
}

impl StreamCandidate {
    fn from_raw(raw: &RawFormat, progressive: bool) -> Option<Self> {
        Some(Self {
            itag: raw.itag,
            url: raw.url.clone()?,
            mime_type: raw.mime_type.clone(),
            progressive,
            height: raw.height,
            bitrate: raw.bitrate.unwrap_or(0),
            content_length: raw.content_length.as_deref().and_then(|l| l.parse().ok()),
        })
    }

    fn is_mp4_video(&self) -> bool {
        self.mime_type.starts_with("video/mp4")
    }

    fn is_audio(&self) -> bool {
        self.mime_type.starts_with("audio/")
    }

    /// File extension matching the container
    pub fn extension(&self) -> &'static str {
        let subtype = self
            .mime_type
            .split(';')
            .next()
            .and_then(|essence| essence.split('/').nth(1))
            .unwrap_or("")
            .trim();

        match (self.is_audio(), subtype) {
            (true, "mp4") => "m4a",
            (_, "webm") => "webm",
            (_, "3gpp") => "3gp",
            _ => "mp4",
        }
    }
}

/// Direct stream lookup
#[async_trait]
pub trait StreamResolver: Send + Sync {
    async fn streams(&self, id: &VideoId) -> Result<Vec<StreamCandidate>>;
}

#[async_trait]
impl StreamResolver for PlayerClient {
    async fn streams(&self, id: &VideoId) -> Result<Vec<StreamCandidate>> {
        let player = self.player(id).await?;

        if !player.is_playable() {
            anyhow::bail!("Video unavailable ({})", player.unplayable_reason());
        }

        let streaming = player
            .streaming_data
            .context("Player response carries no streaming data")?;

        let progressive = streaming
            .formats
            .iter()
            .filter_map(|f| StreamCandidate::from_raw(f, true));
        let adaptive = streaming
            .adaptive_formats
            .iter()
            .filter_map(|f| StreamCandidate::from_raw(f, false));

        Ok(progressive.chain(adaptive).collect())
    }
}

/// Highest-resolution progressive mp4, else the highest-resolution mp4 of any kind
pub fn select_video(streams: &[StreamCandidate]) -> Option<&StreamCandidate> {
    streams
        .iter()
        .filter(|s| s.progressive && s.is_mp4_video())
        .max_by_key(|s| s.height.unwrap_or(0))
        .or_else(|| {
            streams
                .iter()
                .filter(|s| s.is_mp4_video())
                .max_by_key(|s| (s.height.unwrap_or(0), s.bitrate))
        })
}

/// Highest-bitrate audio-only stream
pub fn select_audio(streams: &[StreamCandidate]) -> Option<&StreamCandidate> {
    streams.iter().filter(|s| s.is_audio()).max_by_key(|s| s.bitrate)
}

pub struct LegacyStream {
    resolver: Arc<dyn StreamResolver>,
    transcoder: Transcoder,
    show_progress: bool,
}

impl LegacyStream {
    pub fn new(resolver: Arc<dyn StreamResolver>, transcoder: Transcoder) -> Self {
        Self {
            resolver,
            transcoder,
            show_progress: true,
        }
    }

    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    fn progress_bar(&self, total: u64) -> Result<ProgressBar> {
        if !self.show_progress {
            return Ok(ProgressBar::hidden());
        }

        let progress = ProgressBar::new(total);
        progress.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg}")?,
        );
        Ok(progress)
    }

    /// Stream `stream` into `dest` through a temp file in the same directory
    async fn download(&self, stream: &StreamCandidate, dest: &Path, session: &EvasionSession) -> Result<()> {
        session.pace().await?;
        let client = session.http_client()?;

        let response = client
            .get(&stream.url)
            .header(reqwest::header::USER_AGENT, CLIENT_USER_AGENT)
            .send()
            .await
            .context("Stream request failed")?;

        if !response.status().is_success() {
            anyhow::bail!("Stream download returned HTTP {}", response.status());
        }

        let total = response.content_length().or(stream.content_length).unwrap_or(0);
        let progress = self.progress_bar(total)?;
        progress.set_message(format!("Downloading itag {}...", stream.itag));

        let dir = dest.parent().context("Destination has no parent directory")?;
        let mut partial = tempfile::NamedTempFile::new_in(dir)?;
        let mut body = response.bytes_stream();
        let mut downloaded = 0u64;

        loop {
            let next = tokio::select! {
                chunk = body.next() => chunk,
                _ = session.cancellation().cancelled() => {
                    progress.abandon_with_message("Download cancelled");
                    anyhow::bail!("Download cancelled");
                }
            };

            let Some(chunk) = next else { break };
            let chunk = chunk.context("Stream interrupted")?;
            partial.write_all(&chunk)?;
            downloaded += chunk.len() as u64;
            progress.set_position(downloaded);
        }

        progress.finish_with_message("Download complete");
        partial.persist(dest)?;

        tracing::debug!("Downloaded {} bytes to {}", downloaded, dest.display());
        Ok(())
    }
}

#[async_trait]
impl AcquisitionStrategy for LegacyStream {
    fn name(&self) -> &'static str {
        "legacy-stream"
    }

    async fn attempt(&self, ctx: &StrategyContext<'_>) -> Result<PathBuf> {
        ctx.session.pace().await?;
        let streams = self.resolver.streams(ctx.id).await?;

        let selected = match ctx.kind {
            MediaKind::Video => select_video(&streams),
            MediaKind::Audio => select_audio(&streams),
        }
        .with_context(|| format!("No suitable {} stream among {} candidates", ctx.kind, streams.len()))?;

        let downloaded = ctx
            .output_dir
            .join(format!("{}.{}", ctx.id, selected.extension()));
        self.download(selected, &downloaded, ctx.session).await?;

        if ctx.kind == MediaKind::Video {
            return Ok(downloaded);
        }

        // Keep the original container when transcoding is impossible
        match self
            .transcoder
            .to_mp3(&downloaded, &ctx.canonical_path(), ctx.session.cancellation())
            .await
        {
            Ok(mp3) => Ok(mp3),
            Err(e) => {
                tracing::warn!("Transcoding failed, keeping {}: {:#}", downloaded.display(), e);
                Ok(downloaded)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evasion::{EvasionIdentity, PacingRange};
    use crate::test_support::{paced_session, quiet_session, FakeLauncher, StaticServer};
    use std::time::{Duration, Instant};
    use tempfile::TempDir;

    fn candidate(itag: u32, mime: &str, progressive: bool, height: Option<u32>, bitrate: u64) -> StreamCandidate {
        StreamCandidate {
            itag,
            url: format!("https://stream/{}", itag),
            mime_type: mime.to_string(),
            progressive,
            height,
            bitrate,
            content_length: None,
        }
    }

    fn catalogue() -> Vec<StreamCandidate> {
        vec![
            candidate(18, "video/mp4; codecs=\"avc1.42001E, mp4a.40.2\"", true, Some(360), 500_000),
            candidate(22, "video/mp4; codecs=\"avc1.64001F, mp4a.40.2\"", true, Some(720), 1_500_000),
            candidate(137, "video/mp4; codecs=\"avc1.640028\"", false, Some(1080), 4_000_000),
            candidate(248, "video/webm; codecs=\"vp9\"", false, Some(1080), 3_000_000),
            candidate(140, "audio/mp4; codecs=\"mp4a.40.2\"", false, None, 130_000),
            candidate(251, "audio/webm; codecs=\"opus\"", false, None, 160_000),
        ]
    }

    #[test]
    fn test_video_prefers_progressive_mp4() {
        let streams = catalogue();
        assert_eq!(select_video(&streams).unwrap().itag, 22);
    }

    #[test]
    fn test_video_falls_back_to_any_mp4() {
        let streams: Vec<_> = catalogue().into_iter().filter(|s| !s.progressive).collect();
        assert_eq!(select_video(&streams).unwrap().itag, 137);

        let webm_only: Vec<_> = streams.into_iter().filter(|s| s.itag == 248).collect();
        assert!(select_video(&webm_only).is_none());
    }

    #[test]
    fn test_audio_prefers_bitrate() {
        let streams = catalogue();
        let audio = select_audio(&streams).unwrap();
        assert_eq!(audio.itag, 251);
        assert_eq!(audio.extension(), "webm");
    }

    #[test]
    fn test_extensions() {
        let streams = catalogue();
        assert_eq!(streams[0].extension(), "mp4");
        assert_eq!(streams[4].extension(), "m4a");
    }

    #[test]
    fn test_from_raw_requires_url() {
        let raw = RawFormat {
            itag: 18,
            url: None,
            mime_type: "video/mp4".to_string(),
            bitrate: Some(1),
            height: Some(360),
            content_length: Some("1234".to_string()),
        };
        assert!(StreamCandidate::from_raw(&raw, true).is_none());

        let with_url = RawFormat {
            url: Some("https://stream/18".to_string()),
            ..raw
        };
        let candidate = StreamCandidate::from_raw(&with_url, true).unwrap();
        assert_eq!(candidate.content_length, Some(1234));
    }

    struct Unplayable;

    #[async_trait]
    impl StreamResolver for Unplayable {
        async fn streams(&self, _id: &VideoId) -> Result<Vec<StreamCandidate>> {
            anyhow::bail!("Video unavailable (LOGIN_REQUIRED: Sign in to confirm your age)")
        }
    }

    struct AudioOnly;

    #[async_trait]
    impl StreamResolver for AudioOnly {
        async fn streams(&self, _id: &VideoId) -> Result<Vec<StreamCandidate>> {
            Ok(vec![candidate(140, "audio/mp4", false, None, 130_000)])
        }
    }

    /// Serves one m4a audio stream from a loopback server
    struct ServedAudio {
        url: String,
    }

    #[async_trait]
    impl StreamResolver for ServedAudio {
        async fn streams(&self, _id: &VideoId) -> Result<Vec<StreamCandidate>> {
            let mut stream = candidate(140, "audio/mp4; codecs=\"mp4a.40.2\"", false, None, 130_000);
            stream.url = self.url.clone();
            Ok(vec![stream])
        }
    }

    async fn attempt_in(
        session: &EvasionSession,
        dir: &Path,
        resolver: Arc<dyn StreamResolver>,
        kind: MediaKind,
        ffmpeg: &str,
    ) -> Result<PathBuf> {
        let id = VideoId::parse("abcdefghijk").unwrap();
        let ctx = StrategyContext {
            id: &id,
            kind,
            identity: Arc::new(EvasionIdentity {
                user_agent: "TestAgent/1.0".to_string(),
                proxy: None,
                pacing: PacingRange::from_secs(0.0, 0.0),
            }),
            output_dir: dir,
            session,
        };

        let strategy = LegacyStream::new(resolver, Transcoder::new(ffmpeg, Duration::from_secs(5)))
            .with_progress(false);
        strategy.attempt(&ctx).await
    }

    async fn attempt_with(resolver: Arc<dyn StreamResolver>, kind: MediaKind) -> Result<PathBuf> {
        let session = quiet_session(FakeLauncher::healthy());
        let dir = TempDir::new().unwrap();
        attempt_in(&session, dir.path(), resolver, kind, "ffmpeg").await
    }

    #[tokio::test]
    async fn test_unplayable_reason_is_surfaced() {
        let err = attempt_with(Arc::new(Unplayable), MediaKind::Video).await.unwrap_err();
        assert!(err.to_string().contains("confirm your age"));
    }

    #[tokio::test]
    async fn test_no_matching_stream() {
        let err = attempt_with(Arc::new(AudioOnly), MediaKind::Video).await.unwrap_err();
        assert!(err.to_string().contains("No suitable video stream"), "{}", err);
    }

    #[tokio::test]
    async fn test_audio_kept_in_original_container_without_ffmpeg() {
        let server = StaticServer::start(vec![7u8; 4096], "audio/mp4").await;
        let resolver = Arc::new(ServedAudio {
            url: server.url("/videoplayback?itag=140"),
        });
        let session = quiet_session(FakeLauncher::healthy());
        let dir = TempDir::new().unwrap();

        let path = attempt_in(&session, dir.path(), resolver, MediaKind::Audio, "no-such-ffmpeg-binary")
            .await
            .unwrap();

        assert_eq!(path, dir.path().join("abcdefghijk.m4a"));
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 4096);
        assert!(!dir.path().join("abcdefghijk.mp3").exists());
    }

    #[tokio::test]
    async fn test_lookup_and_download_are_paced() {
        let server = StaticServer::start(vec![7u8; 512], "audio/mp4").await;
        let resolver = Arc::new(ServedAudio {
            url: server.url("/videoplayback?itag=140"),
        });
        let session = paced_session(FakeLauncher::healthy(), 0.1);
        let dir = TempDir::new().unwrap();

        let started = Instant::now();
        attempt_in(&session, dir.path(), resolver, MediaKind::Audio, "no-such-ffmpeg-binary")
            .await
            .unwrap();

        assert_eq!(server.request_count(), 1);
        assert!(started.elapsed() >= Duration::from_millis(200));
    }
}
