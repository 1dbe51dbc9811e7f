// Upstream player API
//
// One player request returns both the stream formats used by the legacy
// stream strategy and the caption tracks used by the transcript resolver.

use anyhow::Context;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use crate::evasion::EvasionSession;
use crate::identifier::VideoId;
use crate::Result;

const PLAYER_ENDPOINT: &str = "https://www.youtube.com/youtubei/v1/player?prettyPrint=false";
const CLIENT_NAME: &str = "ANDROID";
const CLIENT_VERSION: &str = "19.09.37";
pub(crate) const CLIENT_USER_AGENT: &str = "com.google.android.youtube/19.09.37 (Linux; U; Android 11) gzip";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PlayerResponse {
    pub playability_status: PlayabilityStatus,
    pub streaming_data: Option<StreamingData>,
    pub captions: Option<Captions>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PlayabilityStatus {
    pub status: String,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StreamingData {
    /// Progressive streams carrying audio and video together
    pub formats: Vec<RawFormat>,
    /// Separate audio-only and video-only streams
    pub adaptive_formats: Vec<RawFormat>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawFormat {
    pub itag: u32,
    pub url: Option<String>,
    pub mime_type: String,
    pub bitrate: Option<u64>,
    pub height: Option<u32>,
    pub content_length: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Captions {
    pub player_captions_tracklist_renderer: CaptionTracklist,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CaptionTracklist {
    pub caption_tracks: Vec<RawCaptionTrack>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawCaptionTrack {
    pub base_url: String,
    pub language_code: String,
    pub kind: Option<String>,
    pub is_translatable: bool,
    pub name: Option<serde_json::Value>,
}

impl RawCaptionTrack {
    /// Display name, which comes either as `simpleText` or as text runs
    pub fn display_name(&self) -> String {
        let Some(name) = &self.name else {
            return self.language_code.clone();
        };

        if let Some(text) = name["simpleText"].as_str() {
            return text.to_string();
        }

        name["runs"]
            .as_array()
            .map(|runs| runs.iter().filter_map(|r| r["text"].as_str()).collect::<String>())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| self.language_code.clone())
    }
}

impl PlayerResponse {
    pub fn is_playable(&self) -> bool {
        self.playability_status.status == "OK"
    }

    /// Upstream explanation of why the video cannot be played
    pub fn unplayable_reason(&self) -> String {
        format!(
            "{}: {}",
            self.playability_status.status,
            self.playability_status
                .reason
                .as_deref()
                .unwrap_or("no reason given")
        )
    }

    pub fn caption_tracks(&self) -> &[RawCaptionTrack] {
        self.captions
            .as_ref()
            .map(|c| c.player_captions_tracklist_renderer.caption_tracks.as_slice())
            .unwrap_or_default()
    }
}

/// Player API client bound to an evasion session
pub struct PlayerClient {
    session: Arc<EvasionSession>,
}

impl PlayerClient {
    pub fn new(session: Arc<EvasionSession>) -> Self {
        Self { session }
    }

    pub fn session(&self) -> &EvasionSession {
        &self.session
    }

    /// Fetch the player response for `id` through the session's current identity
    pub async fn player(&self, id: &VideoId) -> Result<PlayerResponse> {
        let client = self.session.http_client()?;

        let body = json!({
            "videoId": id.as_str(),
            "contentCheckOk": true,
            "racyCheckOk": true,
            "context": {
                "client": {
                    "clientName": CLIENT_NAME,
                    "clientVersion": CLIENT_VERSION,
                    "androidSdkVersion": 30,
                    "hl": "en",
                    "gl": "US"
                }
            }
        });

        tracing::debug!("Requesting player response for {}", id);

        let response = client
            .post(PLAYER_ENDPOINT)
            .header(reqwest::header::USER_AGENT, CLIENT_USER_AGENT)
            .json(&body)
            .send()
            .await
            .context("Player request failed")?;

        if !response.status().is_success() {
            anyhow::bail!("Player request returned HTTP {}", response.status());
        }

        let player: PlayerResponse = response
            .json()
            .await
            .context("Failed to parse player response")?;

        Ok(player)
    }
}
