//! Syndication feed fetching and parsing.
//!
//! The platform serves one RSS 2.0 document per blog. Only `channel/title`
//! and each `item`'s `title`, `link`, `pubDate` and `description` are read.

use crate::config::HarvestConfig;
use crate::error::HarvestError;
use crate::extract::normalize::decode_entities;
use crate::models::{BlogSource, FeedEntry};
use crate::retrieval::{FetchRequest, Fetcher};
use crate::retry::RetryFetch;
use crate::utils::truncate_for_log;
use chrono::{DateTime, NaiveDate, Utc};
use once_cell::sync::Lazy;
use quick_xml::Reader;
use quick_xml::events::Event;
use regex::Regex;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use url::Url;

/// Query parameters the feed appends to every link.
const TRACKING_PARAMS: &[&str] = &["fromRss", "trackingCode"];

static DOTTED_DATE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{4})\.\s*(\d{1,2})\.\s*(\d{1,2})\.?").unwrap());
static TITLE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)<title[^>]*>(.*?)</title>").unwrap());
static PLATFORM_SUFFIX_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:^|\s)[:|-]\s*네이버\s*블로그.*$").unwrap());
static TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]*>").unwrap());

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Feed {
    pub title: Option<String>,
    pub entries: Vec<FeedEntry>,
}

#[derive(Debug, Default)]
struct RawItem {
    title: String,
    link: String,
    pub_date: String,
    description: String,
}

impl RawItem {
    fn into_entry(self) -> FeedEntry {
        let summary = TAG_RE.replace_all(&self.description, " ");
        FeedEntry {
            title: self.title.trim().to_string(),
            post_url: strip_tracking(&self.link),
            published_at: parse_pub_date(&self.pub_date),
            summary: decode_entities(&summary)
                .split_whitespace()
                .collect::<Vec<_>>()
                .join(" "),
        }
    }
}

/// Parse an RSS 2.0 document.
pub fn parse_feed(xml: &str) -> Result<Feed, HarvestError> {
    let mut reader = Reader::from_str(xml);
    let mut path: Vec<String> = Vec::new();
    let mut text = String::new();
    let mut item: Option<RawItem> = None;
    let mut feed = Feed::default();
    let mut saw_channel = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                match name.as_str() {
                    "channel" => saw_channel = true,
                    "item" => item = Some(RawItem::default()),
                    _ => {}
                }
                path.push(name);
                text.clear();
            }
            Ok(Event::End(_)) => {
                let name = path.pop().unwrap_or_default();
                if name == "item" {
                    if let Some(raw) = item.take() {
                        feed.entries.push(raw.into_entry());
                    }
                    continue;
                }
                let parent = path.last().map(String::as_str);
                let value = std::mem::take(&mut text).trim().to_string();
                match (name.as_str(), parent, item.as_mut()) {
                    ("title", Some("item"), Some(raw)) => raw.title = value,
                    ("link", Some("item"), Some(raw)) => raw.link = value,
                    ("pubDate", Some("item"), Some(raw)) => raw.pub_date = value,
                    ("description", Some("item"), Some(raw)) => raw.description = value,
                    ("title", Some("channel"), _) if !value.is_empty() => feed.title = Some(value),
                    _ => {}
                }
            }
            Ok(Event::Text(t)) => text.push_str(&String::from_utf8_lossy(&t)),
            Ok(Event::CData(c)) => text.push_str(&String::from_utf8_lossy(&c)),
            Ok(Event::GeneralRef(r)) => {
                let entity = format!("&{};", String::from_utf8_lossy(&r));
                text.push_str(&decode_entities(&entity));
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(HarvestError::FeedParse(e.to_string())),
            _ => {}
        }
    }

    if !saw_channel {
        return Err(HarvestError::FeedParse("no <channel> element".into()));
    }
    Ok(feed)
}

/// UTC calendar date of a feed timestamp.
///
/// A post published at 08:00 KST belongs to the previous UTC day. Bare
/// dates are taken as they are.
///
/// Accepts RFC 2822 (`pubDate`), RFC 3339, `YYYY-MM-DD` and the platform's
/// `YYYY. M. D.` display form.
pub fn parse_pub_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(raw) {
        return Some(dt.with_timezone(&Utc).date_naive());
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc).date_naive());
    }
    if let Ok(d) = NaiveDate::parse_from_str(raw.get(..10).unwrap_or(raw), "%Y-%m-%d") {
        return Some(d);
    }
    let caps = DOTTED_DATE_RE.captures(raw)?;
    NaiveDate::from_ymd_opt(
        caps[1].parse().ok()?,
        caps[2].parse().ok()?,
        caps[3].parse().ok()?,
    )
}

/// Drop the feed's tracking parameters from a post link.
pub fn strip_tracking(link: &str) -> String {
    let link = link.trim();
    let Ok(mut url) = Url::parse(link) else {
        return link.to_string();
    };
    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| !TRACKING_PARAMS.contains(&k.as_ref()))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if kept.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(kept);
    }
    url.to_string()
}

/// Blog name from a page `<title>`, with the platform suffix removed.
pub fn page_title_name(html: &str) -> Option<String> {
    let caps = TITLE_RE.captures(html)?;
    let title = decode_entities(caps[1].trim());
    let name = PLATFORM_SUFFIX_RE.replace(&title, "").trim().to_string();
    Some(name).filter(|n| !n.is_empty())
}

/// Fetches feeds (with retries) and blog pages for display names.
#[derive(Debug, Clone)]
pub struct FeedReader<F> {
    fetcher: RetryFetch<F>,
    timeout: Duration,
}

impl<F: Fetcher> FeedReader<F> {
    pub fn new(fetcher: F, cfg: &HarvestConfig) -> Self {
        Self {
            fetcher: RetryFetch::new(fetcher, cfg.feed_retries, cfg.retry_base_delay()),
            timeout: cfg.feed_timeout(),
        }
    }

    /// Fetch and parse the source's feed.
    ///
    /// A 404/410 maps to [`HarvestError::FeedUnavailable`] so the caller can
    /// switch to degraded mode.
    #[instrument(level = "info", skip_all, fields(feed = %source.feed_url))]
    pub async fn fetch(
        &self,
        source: &BlogSource,
        cancel: &CancellationToken,
    ) -> Result<Feed, HarvestError> {
        let req = FetchRequest::feed(&source.feed_url)
            .referer(&source.canonical_url)
            .timeout(self.timeout);
        let resp = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(HarvestError::TransportAborted),
            res = self.fetcher.fetch(req) => res?,
        };

        match resp.status {
            404 | 410 => {
                warn!(status = resp.status, "Feed unavailable");
                Err(HarvestError::FeedUnavailable {
                    url: source.feed_url.clone(),
                    status: resp.status,
                })
            }
            s if !(200..300).contains(&s) => Err(HarvestError::UpstreamStatus {
                url: source.feed_url.clone(),
                status: s,
            }),
            _ => {
                let feed = parse_feed(&resp.body).inspect_err(|e| {
                    warn!(error = %e, body = %truncate_for_log(&resp.body, 200), "Feed did not parse");
                })?;
                info!(entries = feed.entries.len(), title = ?feed.title, "Parsed feed");
                Ok(feed)
            }
        }
    }

    /// The blog's name from its home page title, or the configured one.
    #[instrument(level = "info", skip_all, fields(url = %source.canonical_url))]
    pub async fn display_name(&self, source: &BlogSource, cancel: &CancellationToken) -> String {
        let req = FetchRequest::html(&source.canonical_url).timeout(self.timeout);
        let resp = tokio::select! {
            biased;
            _ = cancel.cancelled() => return source.display_name.clone(),
            res = self.fetcher.inner().fetch(req) => res,
        };
        match resp {
            Ok(resp) if resp.is_success() => page_title_name(&resp.body).unwrap_or_else(|| {
                debug!("No usable <title>; keeping configured name");
                source.display_name.clone()
            }),
            Ok(resp) => {
                debug!(status = resp.status, "Blog page not available for name lookup");
                source.display_name.clone()
            }
            Err(e) => {
                debug!(error = %e, "Name lookup failed");
                source.display_name.clone()
            }
        }
    }
}
