use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::config::Config;

/// Format file size in human-readable format
pub fn format_file_size(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    const THRESHOLD: f64 = 1024.0;

    if bytes == 0 {
        return "0 B".to_string();
    }

    let bytes_f = bytes as f64;
    let unit_index = (bytes_f.log10() / THRESHOLD.log10()).floor() as usize;
    let unit_index = unit_index.min(UNITS.len() - 1);

    let size = bytes_f / THRESHOLD.powi(unit_index as i32);

    if unit_index == 0 {
        format!("{} {}", bytes, UNITS[unit_index])
    } else {
        format!("{:.1} {}", size, UNITS[unit_index])
    }
}

/// Format duration in human-readable format
pub fn format_duration(seconds: f64) -> String {
    let total_seconds = seconds as u64;
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let secs = total_seconds % 60;

    if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, secs)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, secs)
    } else {
        format!("{}s", secs)
    }
}

/// True when `path` is a regular file with at least one byte
pub async fn file_is_nonempty(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|meta| meta.is_file() && meta.len() > 0)
        .unwrap_or(false)
}

/// Files in `dir` with the given extension, largest first
pub fn files_with_extension(dir: &Path, extension: &str) -> Vec<(PathBuf, u64)> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };

    let mut found: Vec<(PathBuf, u64)> = entries
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| {
            let path = entry.path();
            let matches = path
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| e.eq_ignore_ascii_case(extension))
                .unwrap_or(false);
            let meta = entry.metadata().ok()?;
            (matches && meta.is_file()).then(|| (path, meta.len()))
        })
        .collect();

    found.sort_by(|a, b| b.1.cmp(&a.1));
    found
}

/// First non-partial file in `dir` whose stem is `stem`
pub fn find_file_with_stem(dir: &Path, stem: &str) -> Option<PathBuf> {
    let entries = std::fs::read_dir(dir).ok()?;

    let mut candidates: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .filter(|path| path.file_stem().and_then(|s| s.to_str()) == Some(stem))
        .filter(|path| !is_partial_download(path))
        .collect();

    candidates.sort();
    candidates.into_iter().next()
}

/// Browser and extractor temp files that are still being written
pub fn is_partial_download(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("crdownload" | "part" | "tmp" | "ytdl")
    )
}

/// Run an external command, killing it on timeout or cancellation
pub async fn run_command(
    program: &str,
    args: &[String],
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<Output> {
    tracing::debug!("Running {} {}", program, args.join(" "));

    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .with_context(|| format!("Failed to start {}", program))?;

    let mut stdout_pipe = child.stdout.take().context("Failed to capture stdout")?;
    let mut stderr_pipe = child.stderr.take().context("Failed to capture stderr")?;

    let stdout_task = tokio::spawn(async move {
        let mut buf = Vec::new();
        stdout_pipe.read_to_end(&mut buf).await.map(|_| buf)
    });
    let stderr_task = tokio::spawn(async move {
        let mut buf = Vec::new();
        stderr_pipe.read_to_end(&mut buf).await.map(|_| buf)
    });

    let status = tokio::select! {
        waited = tokio::time::timeout(timeout, child.wait()) => match waited {
            Ok(status) => status.with_context(|| format!("Failed to wait for {}", program))?,
            Err(_) => {
                if let Err(e) = child.kill().await {
                    tracing::warn!("Error killing timed-out {}: {}", program, e);
                }
                stdout_task.abort();
                stderr_task.abort();
                anyhow::bail!("{} timed out after {}s", program, timeout.as_secs());
            }
        },
        _ = cancel.cancelled() => {
            if let Err(e) = child.kill().await {
                tracing::warn!("Error killing cancelled {}: {}", program, e);
            }
            stdout_task.abort();
            stderr_task.abort();
            anyhow::bail!("{} cancelled", program);
        }
    };

    let stdout = stdout_task.await.context("stdout reader failed")??;
    let stderr = stderr_task.await.context("stderr reader failed")??;

    Ok(Output { status, stdout, stderr })
}

/// Last non-empty stderr lines, for error messages
pub fn stderr_tail(output: &Output, lines: usize) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let tail: Vec<&str> = stderr
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();

    tail[tail.len().saturating_sub(lines)..].join(" | ")
}

/// Check if the current environment has the external tools the strategies use
pub async fn check_dependencies(config: &Config) -> Vec<String> {
    let mut missing = Vec::new();

    if !check_command_available(&config.tools.yt_dlp_path, "--version").await {
        missing.push(format!(
            "{} - required for the bulk extractor strategy",
            config.tools.yt_dlp_path
        ));
    }

    if !check_command_available(&config.tools.ffmpeg_path, "-version").await {
        missing.push(format!(
            "{} - recommended for mp3 transcoding",
            config.tools.ffmpeg_path
        ));
    }

    if !check_command_available(&config.browser.chromedriver_path, "--version").await {
        missing.push(format!(
            "{} - required for scraping and the browser relay",
            config.browser.chromedriver_path
        ));
    }

    missing
}

/// Check if a command is available in PATH
pub async fn check_command_available(command: &str, version_flag: &str) -> bool {
    Command::new(command)
        .arg(version_flag)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
        .map(|status| status.success())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_format_file_size() {
        assert_eq!(format_file_size(0), "0 B");
        assert_eq!(format_file_size(512), "512 B");
        assert_eq!(format_file_size(1024), "1.0 KB");
        assert_eq!(format_file_size(1536), "1.5 KB");
        assert_eq!(format_file_size(1048576), "1.0 MB");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(30.0), "30s");
        assert_eq!(format_duration(90.0), "1m 30s");
        assert_eq!(format_duration(3661.0), "1h 1m 1s");
    }

    #[tokio::test]
    async fn test_file_is_nonempty() {
        let dir = TempDir::new().unwrap();
        let empty = dir.path().join("empty.mp4");
        let full = dir.path().join("full.mp4");
        std::fs::write(&empty, b"").unwrap();
        std::fs::write(&full, b"data").unwrap();

        assert!(!file_is_nonempty(&empty).await);
        assert!(file_is_nonempty(&full).await);
        assert!(!file_is_nonempty(&dir.path().join("missing.mp4")).await);
        assert!(!file_is_nonempty(dir.path()).await);
    }

    #[test]
    fn test_files_with_extension_largest_first() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("small.mp3"), vec![0u8; 10]).unwrap();
        std::fs::write(dir.path().join("big.MP3"), vec![0u8; 100]).unwrap();
        std::fs::write(dir.path().join("other.m4a"), vec![0u8; 1000]).unwrap();

        let found = files_with_extension(dir.path(), "mp3");
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].1, 100);
        assert!(files_with_extension(&dir.path().join("nope"), "mp3").is_empty());
    }

    #[test]
    fn test_find_file_with_stem_skips_partials() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("abcdefghijk.mp4.part"), b"x").unwrap();
        std::fs::write(dir.path().join("abcdefghijk.crdownload"), b"x").unwrap();
        assert_eq!(find_file_with_stem(dir.path(), "abcdefghijk"), None);

        std::fs::write(dir.path().join("abcdefghijk.webm"), b"x").unwrap();
        assert_eq!(
            find_file_with_stem(dir.path(), "abcdefghijk"),
            Some(dir.path().join("abcdefghijk.webm"))
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_stderr_tail() {
        use std::os::unix::process::ExitStatusExt;

        let output = Output {
            status: std::process::ExitStatus::from_raw(256),
            stdout: Vec::new(),
            stderr: b"line one\n\nline two\nERROR: Sign in to confirm your age\n".to_vec(),
        };
        assert_eq!(stderr_tail(&output, 2), "line two | ERROR: Sign in to confirm your age");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_command_captures_output() {
        let output = run_command(
            "sh",
            &["-c".to_string(), "echo out; echo err >&2".to_string()],
            Duration::from_secs(10),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert!(output.status.success());
        assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "out");
        assert_eq!(String::from_utf8_lossy(&output.stderr).trim(), "err");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_command_timeout_and_cancel() {
        let sleep = ["5".to_string()];

        let timed_out = run_command("sleep", &sleep, Duration::from_millis(100), &CancellationToken::new()).await;
        assert!(timed_out.unwrap_err().to_string().contains("timed out"));

        let token = CancellationToken::new();
        token.cancel();
        let cancelled = run_command("sleep", &sleep, Duration::from_secs(30), &token).await;
        assert!(cancelled.unwrap_err().to_string().contains("cancelled"));
    }

    #[test]
    fn test_missing_program_is_error() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let result = rt.block_on(run_command(
            "definitely-not-a-real-binary-xyz",
            &[],
            Duration::from_secs(1),
            &CancellationToken::new(),
        ));
        assert!(result.is_err());
    }
}
