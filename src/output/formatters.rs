use anyhow::Result;
use console::style;
use std::path::Path;

use crate::acquire::AcquisitionResult;
use crate::media::AcquiredMedia;
use crate::utils::{format_duration, format_file_size};

/// Human-readable summary of one acquisition
pub fn format_as_text(result: &AcquisitionResult) -> String {
    let mut output = String::new();

    let marker = if result.warnings.is_empty() {
        style("✓").green()
    } else {
        style("!").yellow()
    };
    let title = result
        .metadata
        .as_ref()
        .map(|m| m.title.as_str())
        .unwrap_or("(metadata unavailable)");
    output.push_str(&format!("{} {}  {}\n", marker, style(&result.id).bold(), title));

    if let Some(metadata) = &result.metadata {
        output.push_str(&format!("  Channel:    {}\n", metadata.channel_title));
        if let Some(duration) = metadata.duration_secs {
            output.push_str(&format!("  Duration:   {}\n", format_duration(duration as f64)));
        }
        if let Some(views) = metadata.view_count {
            output.push_str(&format!("  Views:      {}\n", views));
        }
        if metadata.approximate {
            output.push_str(&format!("  {}\n", style("Metadata scraped from the watch page (approximate)").dim()));
        }
    }

    if let Some(path) = &result.metadata_path {
        output.push_str(&format!("  Metadata:   {}\n", path.display()));
    }
    if let Some(path) = &result.transcript_path {
        output.push_str(&format!(
            "  Transcript: {} ({} entries)\n",
            path.display(),
            result.transcript.len()
        ));
    }
    if let Some(video) = &result.video {
        output.push_str(&format!("  Video:      {}\n", describe_media(video)));
    }
    if let Some(audio) = &result.audio {
        output.push_str(&format!("  Audio:      {}\n", describe_media(audio)));
    }

    if !result.warnings.is_empty() {
        output.push_str(&format!("  {}\n", style("Warnings:").yellow()));
        for warning in &result.warnings {
            let mut lines = warning.message.lines();
            if let Some(first) = lines.next() {
                output.push_str(&format!("    • [{}] {}\n", warning.artifact, first));
            }
            for line in lines {
                output.push_str(&format!("      {}\n", line));
            }
        }
    }

    output
}

fn describe_media(media: &AcquiredMedia) -> String {
    let via = media
        .attempts
        .last()
        .map(|a| a.strategy.as_str())
        .unwrap_or("unknown");

    match file_size(&media.path) {
        Some(size) => format!("{} ({}, via {})", media.path.display(), format_file_size(size), via),
        None => format!("{} (via {})", media.path.display(), via),
    }
}

fn file_size(path: &Path) -> Option<u64> {
    std::fs::metadata(path).ok().map(|m| m.len())
}

/// Serialized results; a single result is printed as an object
pub fn format_as_json(results: &[AcquisitionResult]) -> Result<String> {
    let json = match results {
        [single] => serde_json::to_string_pretty(single)?,
        _ => serde_json::to_string_pretty(results)?,
    };
    Ok(json)
}
