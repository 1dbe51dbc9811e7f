// Bulk extractor strategy backed by the `yt-dlp` binary

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::{AcquisitionStrategy, MediaKind, StrategyContext};
use crate::utils::{files_with_extension, find_file_with_stem, run_command, stderr_tail};
use crate::Result;

pub struct BulkExtractor {
    program: String,
    cookie_file: Option<PathBuf>,
    timeout: Duration,
}

impl BulkExtractor {
    pub fn new(program: impl Into<String>, cookie_file: Option<PathBuf>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            cookie_file,
            timeout,
        }
    }

    /// Build command arguments
    fn build_args(&self, ctx: &StrategyContext<'_>) -> Vec<String> {
        let mut args: Vec<String> = match ctx.kind {
            MediaKind::Video => vec!["-f".into(), "best".into()],
            MediaKind::Audio => vec![
                "-f".into(),
                "bestaudio/best".into(),
                "--extract-audio".into(),
                "--audio-format".into(),
                "mp3".into(),
                "--audio-quality".into(),
                "192K".into(),
            ],
        };

        args.extend([
            "--no-playlist".to_string(),
            "--geo-bypass".to_string(),
            "--no-check-certificates".to_string(),
            "--no-progress".to_string(),
            "--user-agent".to_string(),
            ctx.identity.user_agent.clone(),
        ]);

        // Cookies
        if let Some(path) = &self.cookie_file {
            args.push("--cookies".to_string());
            args.push(path.display().to_string());
        }

        // Proxy
        if let Some(proxy) = ctx.identity.proxy_url() {
            args.push("--proxy".to_string());
            args.push(proxy);
        }

        args.push("-o".to_string());
        args.push(
            ctx.output_dir
                .join(format!("{}.%(ext)s", ctx.id))
                .display()
                .to_string(),
        );
        args.push("--print".to_string());
        args.push("after_move:filepath".to_string());
        args.push("--no-simulate".to_string());

        args.push(ctx.id.watch_url());
        args
    }
}

#[async_trait]
impl AcquisitionStrategy for BulkExtractor {
    fn name(&self) -> &'static str {
        "bulk-extractor"
    }

    async fn attempt(&self, ctx: &StrategyContext<'_>) -> Result<PathBuf> {
        let args = self.build_args(ctx);
        let output = run_command(&self.program, &args, self.timeout, ctx.session.cancellation()).await?;

        if !output.status.success() {
            anyhow::bail!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                stderr_tail(&output, 3)
            );
        }

        let reported = reported_path(&String::from_utf8_lossy(&output.stdout));
        locate_output(ctx, reported)
    }
}

/// Last printed line that looks like a path
fn reported_path(stdout: &str) -> Option<PathBuf> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('['))
        .last()
        .map(PathBuf::from)
}

/// Find the produced file: reported path, canonical name, `<id>.*`, then any
/// file of the target extension renamed to the canonical name
fn locate_output(ctx: &StrategyContext<'_>, reported: Option<PathBuf>) -> Result<PathBuf> {
    let canonical = ctx.canonical_path();

    if let Some(path) = reported.filter(|p| p.is_file()) {
        return Ok(path);
    }
    if canonical.is_file() {
        return Ok(canonical);
    }

    match ctx.kind {
        MediaKind::Video => find_file_with_stem(ctx.output_dir, ctx.id.as_str())
            .ok_or_else(|| anyhow::anyhow!("Downloaded file not found in {}", ctx.output_dir.display())),
        MediaKind::Audio => adopt_any(ctx.output_dir, ctx.kind.extension(), &canonical),
    }
}

fn adopt_any(dir: &Path, extension: &str, canonical: &Path) -> Result<PathBuf> {
    let (found, _) = files_with_extension(dir, extension)
        .into_iter()
        .next()
        .ok_or_else(|| anyhow::anyhow!("No .{} file produced in {}", extension, dir.display()))?;

    tracing::debug!("Renaming {} to {}", found.display(), canonical.display());
    fs_err::rename(&found, canonical)?;
    Ok(canonical.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evasion::{EvasionIdentity, PacingRange, ProxyEntry, ProxyProvenance};
    use crate::identifier::VideoId;
    use crate::test_support::{quiet_session, FakeLauncher};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn identity(proxy: Option<&str>) -> Arc<EvasionIdentity> {
        Arc::new(EvasionIdentity {
            user_agent: "TestAgent/1.0".to_string(),
            proxy: proxy.map(|p| ProxyEntry::new(p, ProxyProvenance::Configured)),
            pacing: PacingRange::from_secs(0.0, 0.0),
        })
    }

    fn extractor(cookies: Option<&str>) -> BulkExtractor {
        BulkExtractor::new("yt-dlp", cookies.map(PathBuf::from), Duration::from_secs(60))
    }

    #[test]
    fn test_video_args() {
        let session = quiet_session(FakeLauncher::healthy());
        let id = VideoId::parse("abcdefghijk").unwrap();
        let dir = PathBuf::from("/downloads/video/abcdefghijk");
        let ctx = StrategyContext {
            id: &id,
            kind: MediaKind::Video,
            identity: identity(Some("10.0.0.1:8080")),
            output_dir: &dir,
            session: &session,
        };

        let args = extractor(Some("/home/me/cookies.txt")).build_args(&ctx);
        let joined = args.join(" ");

        assert_eq!(args[0], "-f");
        assert_eq!(args[1], "best");
        assert!(joined.contains("--geo-bypass"));
        assert!(joined.contains("--cookies /home/me/cookies.txt"));
        assert!(joined.contains("--proxy http://10.0.0.1:8080"));
        assert!(joined.contains("--user-agent TestAgent/1.0"));
        assert!(joined.contains("-o /downloads/video/abcdefghijk/abcdefghijk.%(ext)s"));
        assert!(joined.contains("--print after_move:filepath --no-simulate"));
        assert_eq!(args.last().unwrap(), "https://www.youtube.com/watch?v=abcdefghijk");
        assert!(!joined.contains("--extract-audio"));
    }

    #[test]
    fn test_audio_args_without_proxy_or_cookies() {
        let session = quiet_session(FakeLauncher::healthy());
        let id = VideoId::parse("abcdefghijk").unwrap();
        let dir = PathBuf::from("/downloads/audio/abcdefghijk");
        let ctx = StrategyContext {
            id: &id,
            kind: MediaKind::Audio,
            identity: identity(None),
            output_dir: &dir,
            session: &session,
        };

        let joined = extractor(None).build_args(&ctx).join(" ");

        assert!(joined.starts_with("-f bestaudio/best --extract-audio --audio-format mp3 --audio-quality 192K"));
        assert!(!joined.contains("--proxy"));
        assert!(!joined.contains("--cookies"));
    }

    #[test]
    fn test_reported_path() {
        let stdout = "[youtube] Extracting URL\n/tmp/x/abcdefghijk.mp4\n\n";
        assert_eq!(reported_path(stdout), Some(PathBuf::from("/tmp/x/abcdefghijk.mp4")));
        assert_eq!(reported_path(""), None);
    }

    #[test]
    fn test_audio_fallback_renames_stray_mp3() {
        let session = quiet_session(FakeLauncher::healthy());
        let id = VideoId::parse("abcdefghijk").unwrap();
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("Some Title.mp3"), b"audio").unwrap();

        let ctx = StrategyContext {
            id: &id,
            kind: MediaKind::Audio,
            identity: identity(None),
            output_dir: dir.path(),
            session: &session,
        };

        let path = locate_output(&ctx, None).unwrap();
        assert_eq!(path, dir.path().join("abcdefghijk.mp3"));
        assert!(path.is_file());
        assert!(!dir.path().join("Some Title.mp3").exists());
    }

    #[test]
    fn test_video_fallback_finds_other_container() {
        let session = quiet_session(FakeLauncher::healthy());
        let id = VideoId::parse("abcdefghijk").unwrap();
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("abcdefghijk.webm"), b"video").unwrap();

        let ctx = StrategyContext {
            id: &id,
            kind: MediaKind::Video,
            identity: identity(None),
            output_dir: dir.path(),
            session: &session,
        };

        assert_eq!(
            locate_output(&ctx, Some(PathBuf::from("/nonexistent/file.mp4"))).unwrap(),
            dir.path().join("abcdefghijk.webm")
        );

        let empty = TempDir::new().unwrap();
        let ctx = StrategyContext { output_dir: empty.path(), ..ctx };
        assert!(locate_output(&ctx, None).is_err());
    }
}
