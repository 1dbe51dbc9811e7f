use anyhow::{Context, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};

use crate::acquire::AcquisitionResult;
use crate::cli::OutputFormat;
use crate::identifier::VideoId;
use crate::metadata::Metadata;
use crate::transcript::TranscriptEntry;

pub mod formatters;

pub use formatters::*;

/// Writes JSON artifacts under fixed per-kind subdirectories of the download root
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `<root>/metadata/<id>.json`
    pub fn metadata_path(&self, id: &VideoId) -> PathBuf {
        self.root.join("metadata").join(format!("{}.json", id))
    }

    /// `<root>/transcripts/<id>.json`
    pub fn transcript_path(&self, id: &VideoId) -> PathBuf {
        self.root.join("transcripts").join(format!("{}.json", id))
    }

    pub fn write_metadata(&self, metadata: &Metadata) -> Result<PathBuf> {
        let path = self.metadata_path(&metadata.id);
        write_json(&path, metadata)?;
        Ok(path)
    }

    pub fn write_transcript(&self, id: &VideoId, entries: &[TranscriptEntry]) -> Result<PathBuf> {
        let path = self.transcript_path(id);
        write_json(&path, &entries)?;
        Ok(path)
    }
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs_err::create_dir_all(parent)?;
    }

    let content = serde_json::to_string_pretty(value).context("Failed to serialize artifact")?;
    fs_err::write(path, content)?;

    tracing::debug!("Wrote {}", path.display());
    Ok(())
}

/// Print acquisition results to stdout
pub fn print_to_console(results: &[AcquisitionResult], format: &OutputFormat) -> Result<()> {
    let content = match format {
        OutputFormat::Text => results
            .iter()
            .map(format_as_text)
            .collect::<Vec<_>>()
            .join("\n"),
        OutputFormat::Json => format_as_json(results)?,
    };

    println!("{}", content);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tempfile::TempDir;

    fn metadata(id: &VideoId) -> Metadata {
        Metadata {
            id: id.clone(),
            title: "Title".to_string(),
            description: String::new(),
            channel_title: "Channel".to_string(),
            channel_id: None,
            published_at: Utc::now(),
            duration_secs: None,
            view_count: Some(5),
            like_count: None,
            comment_count: None,
            tags: Vec::new(),
            thumbnail_url: id.thumbnail_url(),
            approximate: true,
        }
    }

    #[test]
    fn test_artifact_layout() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(dir.path());
        let id = VideoId::parse("abcdefghijk").unwrap();

        let metadata_path = store.write_metadata(&metadata(&id)).unwrap();
        let entries = vec![TranscriptEntry {
            start: 0.5,
            duration: 1.0,
            text: "hello".to_string(),
        }];
        let transcript_path = store.write_transcript(&id, &entries).unwrap();

        assert_eq!(metadata_path, dir.path().join("metadata/abcdefghijk.json"));
        assert_eq!(transcript_path, dir.path().join("transcripts/abcdefghijk.json"));

        let stored: Metadata = serde_json::from_str(&std::fs::read_to_string(&metadata_path).unwrap()).unwrap();
        assert_eq!(stored.title, "Title");
        assert!(stored.approximate);

        let stored: Vec<TranscriptEntry> =
            serde_json::from_str(&std::fs::read_to_string(&transcript_path).unwrap()).unwrap();
        assert_eq!(stored, entries);
    }

    #[test]
    fn test_unwritable_root_is_an_error() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, b"x").unwrap();

        let store = ArtifactStore::new(&blocker);
        let id = VideoId::parse("abcdefghijk").unwrap();
        assert!(store.write_transcript(&id, &[]).is_err());
    }
}
