use serde::{Deserialize, Serialize};
use std::fmt;
use url::Url;

use crate::{AcquireError, AcquireResult};

/// Length of a canonical video identifier
pub const ID_LEN: usize = 11;

/// Canonical 11-character video identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VideoId(String);

impl VideoId {
    /// Extract the canonical identifier from any supported reference shape:
    /// `watch?v=`, `/shorts/`, `/live/`, `/embed/`, `/v/`, `youtu.be/` or a bare token.
    pub fn parse(reference: &str) -> AcquireResult<Self> {
        let trimmed = reference.trim();

        if is_token(trimmed) {
            return Ok(Self(trimmed.to_string()));
        }

        extract_from_url(trimmed)
            .filter(|candidate| is_token(candidate))
            .map(Self)
            .ok_or_else(|| AcquireError::InvalidReference(reference.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Canonical watch page for this video
    pub fn watch_url(&self) -> String {
        format!("https://www.youtube.com/watch?v={}", self.0)
    }

    /// High quality thumbnail served for every public video
    pub fn thumbnail_url(&self) -> String {
        format!("https://i.ytimg.com/vi/{}/hqdefault.jpg", self.0)
    }
}

impl fmt::Display for VideoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for VideoId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

fn is_token(candidate: &str) -> bool {
    candidate.len() == ID_LEN
        && candidate
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

fn extract_from_url(reference: &str) -> Option<String> {
    // Scheme-less references such as "youtu.be/<id>" are common in pasted text
    let parsed = match Url::parse(reference) {
        Ok(url) => url,
        Err(_) if reference.contains("youtu") && !reference.contains("://") => {
            Url::parse(&format!("https://{}", reference)).ok()?
        }
        Err(_) => return None,
    };

    if !matches!(parsed.scheme(), "http" | "https") {
        return None;
    }

    let host = parsed.host_str()?.to_lowercase();
    let host = host.strip_prefix("www.").unwrap_or(&host);

    if host == "youtu.be" {
        return first_segment(&parsed);
    }

    if host != "youtube.com" && !host.ends_with(".youtube.com") && host != "youtube-nocookie.com" {
        return None;
    }

    let mut segments = parsed.path_segments()?.filter(|s| !s.is_empty());
    match segments.next()? {
        "watch" => parsed
            .query_pairs()
            .find(|(key, _)| key == "v")
            .map(|(_, value)| value.into_owned()),
        "shorts" | "live" | "embed" | "v" => segments.next().map(str::to_string),
        _ => None,
    }
}

fn first_segment(url: &Url) -> Option<String> {
    url.path_segments()?
        .find(|s| !s.is_empty())
        .map(str::to_string)
}
