use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

use super::{AuthoritativeSource, LookupError, Metadata};
use crate::identifier::VideoId;

const VIDEOS_ENDPOINT: &str = "https://www.googleapis.com/youtube/v3/videos";

lazy_static! {
    static ref ISO_DURATION: Regex =
        Regex::new(r"^P(?:(\d+)D)?(?:T(?:(\d+)H)?(?:(\d+)M)?(?:(\d+(?:\.\d+)?)S)?)?$").expect("valid regex");
}

/// YouTube Data API v3 client
pub struct DataApiClient {
    client: reqwest::Client,
    api_key: String,
    endpoint: String,
}

impl DataApiClient {
    pub fn new(api_key: impl Into<String>) -> crate::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            api_key: api_key.into(),
            endpoint: VIDEOS_ENDPOINT.to_string(),
        })
    }
}

#[async_trait]
impl AuthoritativeSource for DataApiClient {
    async fn lookup(&self, id: &VideoId) -> Result<Metadata, LookupError> {
        tracing::debug!("Querying Data API for {}", id);

        let response = self
            .client
            .get(&self.endpoint)
            .query(&[
                ("part", "snippet,contentDetails,statistics"),
                ("id", id.as_str()),
                ("key", self.api_key.as_str()),
            ])
            .send()
            .await
            .context("Data API request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LookupError::Other(anyhow::anyhow!(
                "Data API returned HTTP {}: {}",
                status,
                body.chars().take(200).collect::<String>()
            )));
        }

        let listing: VideoListResponse = response
            .json()
            .await
            .context("Failed to parse Data API response")?;

        parse_listing(id, listing)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct VideoListResponse {
    items: Vec<VideoResource>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct VideoResource {
    snippet: Snippet,
    content_details: ContentDetails,
    statistics: Statistics,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct Snippet {
    title: String,
    description: String,
    published_at: Option<DateTime<Utc>>,
    channel_id: Option<String>,
    channel_title: String,
    thumbnails: HashMap<String, Thumbnail>,
    tags: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Thumbnail {
    url: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ContentDetails {
    duration: Option<String>,
}

// Counts arrive as decimal strings
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct Statistics {
    view_count: Option<String>,
    like_count: Option<String>,
    comment_count: Option<String>,
}

fn parse_listing(id: &VideoId, listing: VideoListResponse) -> Result<Metadata, LookupError> {
    let video = listing
        .items
        .into_iter()
        .next()
        .ok_or_else(|| LookupError::NotFound(id.to_string()))?;

    let snippet = video.snippet;
    let thumbnail_url = ["high", "medium", "default"]
        .iter()
        .find_map(|size| snippet.thumbnails.get(*size))
        .map(|t| t.url.clone())
        .unwrap_or_else(|| id.thumbnail_url());

    let count = |value: &Option<String>| value.as_deref().and_then(|v| v.parse::<u64>().ok());

    Ok(Metadata {
        id: id.clone(),
        title: snippet.title,
        description: snippet.description,
        channel_title: snippet.channel_title,
        channel_id: snippet.channel_id,
        published_at: snippet.published_at.unwrap_or_else(Utc::now),
        duration_secs: video.content_details.duration.as_deref().and_then(parse_iso_duration),
        view_count: count(&video.statistics.view_count),
        like_count: count(&video.statistics.like_count),
        comment_count: count(&video.statistics.comment_count),
        tags: snippet.tags,
        thumbnail_url,
        approximate: false,
    })
}

/// Convert an ISO-8601 duration such as `PT1H2M3S` into whole seconds
pub fn parse_iso_duration(value: &str) -> Option<u64> {
    let caps = ISO_DURATION.captures(value.trim())?;

    let part = |index: usize| -> f64 {
        caps.get(index)
            .and_then(|m| m.as_str().parse::<f64>().ok())
            .unwrap_or(0.0)
    };

    let seconds = part(1) * 86_400.0 + part(2) * 3_600.0 + part(3) * 60.0 + part(4);
    Some(seconds.round() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id() -> VideoId {
        VideoId::parse("dQw4w9WgXcQ").unwrap()
    }

    #[test]
    fn test_iso_durations() {
        assert_eq!(parse_iso_duration("PT1H2M3S"), Some(3723));
        assert_eq!(parse_iso_duration("PT4M13S"), Some(253));
        assert_eq!(parse_iso_duration("PT45S"), Some(45));
        assert_eq!(parse_iso_duration("PT2H"), Some(7200));
        assert_eq!(parse_iso_duration("P1DT1S"), Some(86_401));
        assert_eq!(parse_iso_duration("P0D"), Some(0));
        assert_eq!(parse_iso_duration("4:13"), None);
        assert_eq!(parse_iso_duration(""), None);
    }

    #[test]
    fn test_full_listing() {
        let listing: VideoListResponse = serde_json::from_str(
            r#"{"items": [{
                "snippet": {
                    "title": "Never Gonna Give You Up",
                    "description": "The official video",
                    "publishedAt": "2009-10-25T06:57:33Z",
                    "channelId": "UCuAXFkgsw1L7xaCfnd5JJOw",
                    "channelTitle": "Rick Astley",
                    "thumbnails": {
                        "default": {"url": "https://i.ytimg.com/vi/dQw4w9WgXcQ/default.jpg"},
                        "medium": {"url": "https://i.ytimg.com/vi/dQw4w9WgXcQ/mqdefault.jpg"}
                    },
                    "tags": ["rick astley", "80s"]
                },
                "contentDetails": {"duration": "PT3M33S"},
                "statistics": {"viewCount": "1512345678", "likeCount": "17000000"}
            }]}"#,
        )
        .unwrap();

        let metadata = parse_listing(&id(), listing).unwrap();

        assert_eq!(metadata.title, "Never Gonna Give You Up");
        assert_eq!(metadata.channel_id.as_deref(), Some("UCuAXFkgsw1L7xaCfnd5JJOw"));
        assert_eq!(metadata.duration_secs, Some(213));
        assert_eq!(metadata.view_count, Some(1_512_345_678));
        assert_eq!(metadata.like_count, Some(17_000_000));
        assert_eq!(metadata.comment_count, None);
        assert_eq!(metadata.thumbnail_url, "https://i.ytimg.com/vi/dQw4w9WgXcQ/mqdefault.jpg");
        assert_eq!(metadata.published_at.to_rfc3339(), "2009-10-25T06:57:33+00:00");
        assert!(!metadata.approximate);
    }

    #[test]
    fn test_empty_listing_is_not_found() {
        let listing: VideoListResponse = serde_json::from_str(r#"{"kind": "youtube#videoListResponse", "items": []}"#).unwrap();
        assert!(matches!(parse_listing(&id(), listing), Err(LookupError::NotFound(_))));
    }
}
