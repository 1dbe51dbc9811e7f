use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::utils::{file_is_nonempty, run_command, stderr_tail};
use crate::Result;

/// mp3 transcoding through `ffmpeg`
#[derive(Debug, Clone)]
pub struct Transcoder {
    program: String,
    timeout: Duration,
}

impl Transcoder {
    pub fn new(program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }

    fn mp3_args(input: &Path, output: &Path) -> Vec<String> {
        vec![
            "-y".to_string(),
            "-loglevel".to_string(),
            "error".to_string(),
            "-i".to_string(),
            input.display().to_string(),
            "-vn".to_string(),
            "-acodec".to_string(),
            "libmp3lame".to_string(),
            "-b:a".to_string(),
            "192k".to_string(),
            output.display().to_string(),
        ]
    }

    /// Transcode `input` into `output` and remove `input` once the mp3 exists
    pub async fn to_mp3(&self, input: &Path, output: &Path, cancel: &CancellationToken) -> Result<PathBuf> {
        tracing::info!("Transcoding {} to mp3", input.display());

        let args = Self::mp3_args(input, output);
        let result = run_command(&self.program, &args, self.timeout, cancel).await?;

        if !result.status.success() {
            anyhow::bail!("{} failed: {}", self.program, stderr_tail(&result, 3));
        }
        if !file_is_nonempty(output).await {
            anyhow::bail!("{} produced no output at {}", self.program, output.display());
        }

        if let Err(e) = fs_err::remove_file(input) {
            tracing::warn!("Could not remove transcoding source: {}", e);
        }

        Ok(output.to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_mp3_args() {
        let args = Transcoder::mp3_args(Path::new("/a/in.m4a"), Path::new("/a/out.mp3"));
        let joined = args.join(" ");

        assert!(joined.contains("-i /a/in.m4a"));
        assert!(joined.contains("-acodec libmp3lame -b:a 192k"));
        assert_eq!(args.last().unwrap(), "/a/out.mp3");
    }

    #[tokio::test]
    async fn test_missing_tool_keeps_source() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("in.m4a");
        std::fs::write(&input, b"audio").unwrap();

        let transcoder = Transcoder::new("definitely-not-ffmpeg-xyz", Duration::from_secs(5));
        let result = transcoder
            .to_mp3(&input, &dir.path().join("out.mp3"), &CancellationToken::new())
            .await;

        assert!(result.is_err());
        assert!(input.exists());
    }
}
