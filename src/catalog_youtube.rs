//! YouTube Data API catalog collaborator.
//!
//! Implements [`CatalogSearch`] over `search.list` / `videos.list`, and
//! [`TranscriptSource`] over caption availability plus an optional
//! transcript HTTP endpoint.
//!
//! # Quota mapping
//!
//! | Response | Error |
//! |----------|-------|
//! | 403 with `quotaExceeded` / `dailyLimitExceeded` / `rateLimitExceeded` | `QuotaExceeded` |
//! | 429 | `QuotaExceeded` |
//! | anything else non-2xx, network, decode | `Transient` |
//!
//! A `videos.list` call fetches duration and caption availability together;
//! the caption flag is cached so the assessor's later `has_captions` call
//! costs nothing. An entry is consumed by that read, and the cache is
//! cleared once it holds `CAPTION_CACHE_LIMIT` flags that were never read
//! (candidates rejected before the transcript step).

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::debug;

use crate::config::CatalogConfig;
use crate::error::{CollaboratorError, CollaboratorResult};
use crate::models::CandidateItem;
use crate::traits::{CatalogSearch, TranscriptSource};

const DEFAULT_BASE_URL: &str = "https://www.googleapis.com/youtube/v3";
const SERVICE: &str = "youtube";
const CAPTION_CACHE_LIMIT: usize = 1024;

pub struct YouTubeCatalog {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    transcript_endpoint: Option<String>,
    captions: Mutex<HashMap<String, bool>>,
}

impl YouTubeCatalog {
    /// Build from config, reading the API key from the configured env var.
    pub fn new(config: &CatalogConfig) -> anyhow::Result<Self> {
        let api_key = std::env::var(&config.api_key_env).map_err(|_| {
            anyhow::anyhow!("{} environment variable not set", config.api_key_env)
        })?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            api_key,
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            transcript_endpoint: config.transcript_endpoint.clone(),
            captions: Mutex::new(HashMap::new()),
        })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> CollaboratorResult<T> {
        let url = format!("{}/{}", self.base_url.trim_end_matches('/'), path);
        let resp = self
            .client
            .get(&url)
            .query(params)
            .query(&[("key", self.api_key.as_str())])
            .send()
            .await?;

        let status = resp.status();
        if status.is_success() {
            return Ok(resp.json::<T>().await?);
        }

        let body = resp.text().await.unwrap_or_default();
        Err(classify_http_error(status.as_u16(), &body))
    }

    async fn content_details(&self, external_id: &str) -> CollaboratorResult<ContentDetails> {
        let resp: VideoListResponse = self
            .get_json(
                "videos",
                &[
                    ("part", "contentDetails".to_string()),
                    ("id", external_id.to_string()),
                ],
            )
            .await?;
        let details = resp
            .items
            .into_iter()
            .next()
            .map(|v| v.content_details)
            .ok_or_else(|| {
                CollaboratorError::transient(format!("video not found: {}", external_id))
            })?;

        self.remember_captions(external_id, details.caption.as_deref() == Some("true"));
        Ok(details)
    }

    fn remember_captions(&self, external_id: &str, flag: bool) {
        if self.transcript_endpoint.is_none() {
            return;
        }
        if let Ok(mut cache) = self.captions.lock() {
            if cache.len() >= CAPTION_CACHE_LIMIT {
                debug!(entries = cache.len(), "clearing caption cache");
                cache.clear();
            }
            cache.insert(external_id.to_string(), flag);
        }
    }

    fn take_cached_captions(&self, external_id: &str) -> Option<bool> {
        self.captions
            .lock()
            .ok()
            .and_then(|mut cache| cache.remove(external_id))
    }
}

/// Map a non-2xx YouTube response to a collaborator error.
fn classify_http_error(status: u16, body: &str) -> CollaboratorError {
    if status == 429 {
        return CollaboratorError::quota(SERVICE, format!("HTTP 429: {}", body));
    }
    if status == 403 {
        let reason = serde_json::from_str::<ApiErrorEnvelope>(body)
            .ok()
            .and_then(|e| e.error.errors.into_iter().next())
            .map(|e| e.reason)
            .unwrap_or_default();
        if matches!(
            reason.as_str(),
            "quotaExceeded" | "dailyLimitExceeded" | "rateLimitExceeded"
        ) {
            return CollaboratorError::quota(SERVICE, reason);
        }
    }
    CollaboratorError::transient(format!("YouTube API error {}: {}", status, body))
}

/// Parse an ISO-8601 duration such as `PT1H2M3S` or `P1DT5M` into seconds.
pub fn parse_iso8601_duration(s: &str) -> Option<u32> {
    let rest = s.strip_prefix('P')?;
    let mut total: u64 = 0;
    let mut number = String::new();
    let mut in_time = false;
    let mut saw_unit = false;

    for c in rest.chars() {
        match c {
            'T' => {
                if !number.is_empty() || in_time {
                    return None;
                }
                in_time = true;
            }
            '0'..='9' => number.push(c),
            unit => {
                let n: u64 = number.parse().ok()?;
                number.clear();
                let factor = match (unit, in_time) {
                    ('W', false) => 7 * 86_400,
                    ('D', false) => 86_400,
                    ('H', true) => 3_600,
                    ('M', true) => 60,
                    ('S', true) => 1,
                    _ => return None,
                };
                total = total.checked_add(n.checked_mul(factor)?)?;
                saw_unit = true;
            }
        }
    }

    if !number.is_empty() || !saw_unit {
        return None;
    }
    u32::try_from(total).ok()
}

#[async_trait]
impl CatalogSearch for YouTubeCatalog {
    fn name(&self) -> &str {
        SERVICE
    }

    async fn search(
        &self,
        query: &str,
        max_results: u32,
    ) -> CollaboratorResult<Vec<CandidateItem>> {
        let resp: SearchResponse = self
            .get_json(
                "search",
                &[
                    ("part", "snippet".to_string()),
                    ("type", "video".to_string()),
                    ("q", query.to_string()),
                    ("maxResults", max_results.min(50).to_string()),
                ],
            )
            .await?;

        let items: Vec<CandidateItem> = resp
            .items
            .into_iter()
            .filter_map(|item| {
                let video_id = item.id.video_id?;
                let snippet = item.snippet;
                let thumbnail_url = snippet
                    .thumbnails
                    .as_ref()
                    .and_then(|t| t.high.as_ref().or(t.default.as_ref()))
                    .map(|t| t.url.clone());
                Some(CandidateItem {
                    external_id: video_id,
                    title: snippet.title,
                    description: snippet.description,
                    channel: snippet.channel_title,
                    published_at: snippet.published_at,
                    thumbnail_url,
                    duration_secs: None,
                })
            })
            .collect();

        debug!(query, results = items.len(), "youtube search");
        Ok(items)
    }

    async fn get_duration(&self, external_id: &str) -> CollaboratorResult<u32> {
        let details = self.content_details(external_id).await?;
        parse_iso8601_duration(&details.duration).ok_or_else(|| {
            CollaboratorError::transient(format!(
                "unparseable duration '{}' for {}",
                details.duration, external_id
            ))
        })
    }
}

#[async_trait]
impl TranscriptSource for YouTubeCatalog {
    async fn has_captions(&self, external_id: &str) -> CollaboratorResult<bool> {
        if self.transcript_endpoint.is_none() {
            return Ok(false);
        }
        if let Some(flag) = self.take_cached_captions(external_id) {
            return Ok(flag);
        }
        let details = self.content_details(external_id).await?;
        Ok(details.caption.as_deref() == Some("true"))
    }

    async fn fetch_transcript(&self, external_id: &str) -> CollaboratorResult<String> {
        let endpoint = self.transcript_endpoint.as_deref().ok_or_else(|| {
            CollaboratorError::transient("no transcript endpoint configured")
        })?;
        let url = format!("{}/{}", endpoint.trim_end_matches('/'), external_id);
        let resp = self.client.get(&url).send().await?;
        let status = resp.status();
        if status.as_u16() == 429 {
            return Err(CollaboratorError::quota(
                "transcripts",
                format!("HTTP 429 fetching transcript for {}", external_id),
            ));
        }
        if !status.is_success() {
            return Err(CollaboratorError::transient(format!(
                "transcript fetch for {} failed with {}",
                external_id, status
            )));
        }
        let body: TranscriptResponse = resp.json().await?;
        Ok(body.text)
    }
}

/// Catalog used when `catalog.provider = "disabled"`. Every call fails.
pub struct DisabledCatalog;

#[async_trait]
impl CatalogSearch for DisabledCatalog {
    fn name(&self) -> &str {
        "disabled"
    }

    async fn search(&self, _query: &str, _max: u32) -> CollaboratorResult<Vec<CandidateItem>> {
        Err(CollaboratorError::transient("catalog provider is disabled"))
    }

    async fn get_duration(&self, _external_id: &str) -> CollaboratorResult<u32> {
        Err(CollaboratorError::transient("catalog provider is disabled"))
    }
}

// ============ Wire types ============

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    items: Vec<SearchItem>,
}

#[derive(Deserialize)]
struct SearchItem {
    id: SearchItemId,
    snippet: Snippet,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchItemId {
    video_id: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Snippet {
    #[serde(default)]
    title: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    channel_title: String,
    published_at: Option<DateTime<Utc>>,
    thumbnails: Option<Thumbnails>,
}

#[derive(Deserialize)]
struct Thumbnails {
    default: Option<Thumbnail>,
    high: Option<Thumbnail>,
}

#[derive(Deserialize)]
struct Thumbnail {
    url: String,
}

#[derive(Deserialize)]
struct VideoListResponse {
    #[serde(default)]
    items: Vec<VideoItem>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct VideoItem {
    content_details: ContentDetails,
}

#[derive(Deserialize)]
struct ContentDetails {
    duration: String,
    caption: Option<String>,
}

#[derive(Deserialize)]
struct ApiErrorEnvelope {
    error: ApiErrorBody,
}

#[derive(Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    errors: Vec<ApiErrorReason>,
}

#[derive(Deserialize)]
struct ApiErrorReason {
    reason: String,
}

#[derive(Deserialize)]
struct TranscriptResponse {
    text: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog(transcript_endpoint: Option<&str>) -> YouTubeCatalog {
        YouTubeCatalog {
            client: reqwest::Client::new(),
            api_key: "test".to_string(),
            base_url: "http://127.0.0.1:9".to_string(),
            transcript_endpoint: transcript_endpoint.map(str::to_string),
            captions: Mutex::new(HashMap::new()),
        }
    }

    fn cached(catalog: &YouTubeCatalog) -> usize {
        catalog.captions.lock().unwrap().len()
    }

    #[tokio::test]
    async fn caption_flag_is_consumed_by_has_captions() {
        let yt = catalog(Some("http://127.0.0.1:9/transcripts"));
        yt.remember_captions("vid1", true);
        assert_eq!(cached(&yt), 1);

        assert!(yt.has_captions("vid1").await.unwrap());
        assert_eq!(cached(&yt), 0);
    }

    #[test]
    fn caption_cache_is_bounded() {
        let yt = catalog(Some("http://127.0.0.1:9/transcripts"));
        for i in 0..CAPTION_CACHE_LIMIT + 10 {
            yt.remember_captions(&format!("vid{}", i), false);
        }
        assert!(cached(&yt) <= CAPTION_CACHE_LIMIT);
    }

    #[tokio::test]
    async fn nothing_is_cached_without_transcript_endpoint() {
        let yt = catalog(None);
        yt.remember_captions("vid1", true);
        assert_eq!(cached(&yt), 0);
        assert!(!yt.has_captions("vid1").await.unwrap());
    }

    #[test]
    fn parses_common_durations() {
        assert_eq!(parse_iso8601_duration("PT4M13S"), Some(253));
        assert_eq!(parse_iso8601_duration("PT1H2M3S"), Some(3723));
        assert_eq!(parse_iso8601_duration("PT90S"), Some(90));
        assert_eq!(parse_iso8601_duration("P1DT1M"), Some(86_460));
        assert_eq!(parse_iso8601_duration("PT0S"), Some(0));
    }

    #[test]
    fn rejects_malformed_durations() {
        assert_eq!(parse_iso8601_duration(""), None);
        assert_eq!(parse_iso8601_duration("P"), None);
        assert_eq!(parse_iso8601_duration("PT"), None);
        assert_eq!(parse_iso8601_duration("4M13S"), None);
        assert_eq!(parse_iso8601_duration("PT5X"), None);
        assert_eq!(parse_iso8601_duration("PT12"), None);
        assert_eq!(parse_iso8601_duration("P5M"), None);
    }

    #[test]
    fn quota_reasons_map_to_quota_errors() {
        let body = r#"{"error":{"code":403,"errors":[{"reason":"quotaExceeded"}]}}"#;
        assert!(classify_http_error(403, body).is_quota());
        assert!(classify_http_error(429, "").is_quota());
    }

    #[test]
    fn other_failures_are_transient() {
        let body = r#"{"error":{"code":403,"errors":[{"reason":"forbidden"}]}}"#;
        assert!(!classify_http_error(403, body).is_quota());
        assert!(!classify_http_error(500, "oops").is_quota());
        assert!(!classify_http_error(404, "").is_quota());
    }
}
