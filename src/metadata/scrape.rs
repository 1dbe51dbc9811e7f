use chrono::{DateTime, NaiveDate, Utc};
use scraper::{Html, Selector};

use super::Metadata;
use crate::identifier::VideoId;

const TITLE_SUFFIX: &str = " - YouTube";
const UNKNOWN_CHANNEL: &str = "Unknown Channel";

/// Build approximate metadata from a rendered watch page
pub fn parse_watch_page(id: &VideoId, document_title: &str, html: &str) -> Metadata {
    let document = Html::parse_document(html);

    let title = Some(document_title.replace(TITLE_SUFFIX, "").trim().to_string())
        .filter(|t| !t.is_empty())
        .or_else(|| meta_content(&document, "meta[property='og:title']"))
        .unwrap_or_default();

    let description = first_text(&document, &["#description-inline-expander"])
        .or_else(|| meta_content(&document, "meta[name='description']"))
        .unwrap_or_default();

    let channel_title = first_text(&document, &["#text-container.ytd-channel-name"])
        .or_else(|| meta_content(&document, "link[itemprop='name']"))
        .unwrap_or_else(|| UNKNOWN_CHANNEL.to_string());

    let view_count = first_text(&document, &[".view-count"])
        .or_else(|| meta_content(&document, "meta[itemprop='interactionCount']"))
        .and_then(|text| digits(&text));

    let published_at = meta_content(&document, "meta[itemprop='datePublished']")
        .and_then(|date| parse_published(&date))
        .unwrap_or_else(Utc::now);

    Metadata {
        id: id.clone(),
        title,
        description,
        channel_title,
        channel_id: meta_content(&document, "meta[itemprop='channelId']"),
        published_at,
        duration_secs: None,
        view_count,
        like_count: None,
        comment_count: None,
        tags: keywords(&document),
        thumbnail_url: id.thumbnail_url(),
        approximate: true,
    }
}

fn selector(css: &str) -> Option<Selector> {
    Selector::parse(css).ok()
}

fn first_text(document: &Html, candidates: &[&str]) -> Option<String> {
    candidates.iter().find_map(|css| {
        let selector = selector(css)?;
        document
            .select(&selector)
            .map(|el| el.text().collect::<String>().trim().to_string())
            .find(|text| !text.is_empty())
    })
}

/// First non-empty `content` attribute among matching elements
fn meta_content(document: &Html, css: &str) -> Option<String> {
    let selector = selector(css)?;
    document
        .select(&selector)
        .filter_map(|el| el.value().attr("content"))
        .map(|c| c.trim().to_string())
        .find(|c| !c.is_empty())
}

fn keywords(document: &Html) -> Vec<String> {
    meta_content(document, "meta[name='keywords']")
        .map(|k| {
            k.split(',')
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

fn digits(text: &str) -> Option<u64> {
    let digits: String = text.chars().filter(char::is_ascii_digit).collect();
    digits.parse().ok()
}

fn parse_published(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Some(parsed.with_timezone(&Utc));
    }

    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}
