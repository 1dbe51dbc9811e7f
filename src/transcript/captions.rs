use anyhow::Context;
use async_trait::async_trait;
use serde::Deserialize;
use url::Url;

use super::{CaptionService, CaptionTrack, TranscriptEntry};
use crate::identifier::VideoId;
use crate::innertube::{PlayerClient, RawCaptionTrack};
use crate::Result;

/// Caption tracks served alongside the player response, fetched as json3
pub struct PlayerCaptions {
    player: PlayerClient,
}

impl PlayerCaptions {
    pub fn new(player: PlayerClient) -> Self {
        Self { player }
    }

    async fn fetch_url(&self, url: &Url) -> Result<Vec<TranscriptEntry>> {
        let session = self.player.session();
        session.pace().await?;
        let client = session.http_client()?;

        let response = client
            .get(url.as_str())
            .send()
            .await
            .context("Caption request failed")?;

        if !response.status().is_success() {
            anyhow::bail!("Caption request returned HTTP {}", response.status());
        }

        let body = response.text().await.context("Failed to read caption body")?;
        parse_json3(&body)
    }
}

#[async_trait]
impl CaptionService for PlayerCaptions {
    async fn fetch_default(&self, id: &VideoId) -> Result<Vec<TranscriptEntry>> {
        let tracks = self.list_tracks(id).await?;
        let track = default_track(&tracks)
            .with_context(|| format!("No English captions advertised for {}", id))?;

        self.fetch_track(track).await
    }

    async fn list_tracks(&self, id: &VideoId) -> Result<Vec<CaptionTrack>> {
        self.player.session().pace().await?;
        let player = self.player.player(id).await?;

        let tracks: Vec<CaptionTrack> = player.caption_tracks().iter().map(CaptionTrack::from).collect();
        if tracks.is_empty() && !player.is_playable() {
            anyhow::bail!("Transcripts unavailable: {}", player.unplayable_reason());
        }

        tracing::debug!("{} caption tracks available for {}", tracks.len(), id);
        Ok(tracks)
    }

    async fn fetch_track(&self, track: &CaptionTrack) -> Result<Vec<TranscriptEntry>> {
        self.fetch_url(&caption_url(track, None)?).await
    }

    async fn translate(&self, track: &CaptionTrack, language: &str) -> Result<Vec<TranscriptEntry>> {
        if !track.is_translatable {
            anyhow::bail!("{} track is not translatable", track.language_code);
        }
        self.fetch_url(&caption_url(track, Some(language))?).await
    }
}

impl From<&RawCaptionTrack> for CaptionTrack {
    fn from(raw: &RawCaptionTrack) -> Self {
        Self {
            language_code: raw.language_code.clone(),
            name: raw.display_name(),
            is_generated: raw.kind.as_deref() == Some("asr"),
            is_translatable: raw.is_translatable,
            base_url: raw.base_url.clone(),
        }
    }
}

/// Uploaded English track first, speech-recognized English second
fn default_track(tracks: &[CaptionTrack]) -> Option<&CaptionTrack> {
    tracks
        .iter()
        .find(|t| t.is_english() && !t.is_generated)
        .or_else(|| tracks.iter().find(|t| t.is_english()))
}

/// Track URL forced to the json3 format, optionally translated
fn caption_url(track: &CaptionTrack, translate_to: Option<&str>) -> Result<Url> {
    let mut url = Url::parse(&track.base_url)
        .with_context(|| format!("Invalid caption URL: {}", track.base_url))?;

    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| key != "fmt" && key != "tlang")
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    {
        let mut query = url.query_pairs_mut();
        query.clear();
        for (key, value) in &kept {
            query.append_pair(key, value);
        }
        query.append_pair("fmt", "json3");
        if let Some(language) = translate_to {
            query.append_pair("tlang", language);
        }
    }

    Ok(url)
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Json3 {
    events: Vec<Json3Event>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct Json3Event {
    t_start_ms: u64,
    d_duration_ms: u64,
    segs: Option<Vec<Json3Segment>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Json3Segment {
    utf8: String,
}

/// Parse a json3 caption document into timed entries
pub fn parse_json3(body: &str) -> Result<Vec<TranscriptEntry>> {
    let document: Json3 = serde_json::from_str(body).context("Failed to parse json3 captions")?;

    Ok(document
        .events
        .into_iter()
        .filter_map(|event| {
            let text: String = event.segs?.into_iter().map(|s| s.utf8).collect();
            let text = text.replace('\n', " ").trim().to_string();
            (!text.is_empty()).then(|| TranscriptEntry {
                start: event.t_start_ms as f64 / 1000.0,
                duration: event.d_duration_ms as f64 / 1000.0,
                text,
            })
        })
        .collect())
}
