//! Data models for sources, feed entries and harvested posts.
//!
//! - [`BlogSource`]: a registered blog, validated on construction
//! - [`FeedEntry`]: one item parsed out of a source's syndication feed
//! - [`HarvestedPost`]: a feed entry plus its retrieved plain-text body
//! - [`KeywordFilter`] / [`DateLowerBound`]: entry filters applied before retrieval
//! - [`HarvestReport`]: the non-streaming harvest result
//!
//! Wire-facing structs serialize with camelCase field names to match the
//! progress stream's JSON payloads.

use crate::config::{Endpoints, SourceConfig};
use crate::error::HarvestError;
use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use url::Url;

static HANDLE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9_-]{1,64}$").unwrap());

/// A blog registered for harvesting.
///
/// Sources are immutable once built. Construction goes through
/// [`BlogSource::from_url`], which rejects anything that is not a blog on the
/// configured platform hosts before any network call is made.
///
/// # Fields
///
/// * `id` - Stable identifier, used as the prefix of harvested post ids
/// * `display_name` - Human-readable name, refreshed from the feed when available
/// * `canonical_url` - Desktop URL of the blog's home page
/// * `feed_url` - The blog's RSS feed
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BlogSource {
    pub id: String,
    pub display_name: String,
    pub canonical_url: String,
    pub feed_url: String,
}

impl BlogSource {
    /// Build a source from a blog URL in any of the platform's shapes.
    ///
    /// Accepts `https://blog.naver.com/<handle>`, the mobile host, and the
    /// parametrized form carrying `blogId=<handle>`. A bare host without a
    /// scheme is accepted as well.
    pub fn from_url(raw: &str, endpoints: &Endpoints) -> Result<Self, HarvestError> {
        let handle = blog_handle(raw, endpoints)?;
        Ok(Self {
            id: handle.clone(),
            display_name: handle.clone(),
            canonical_url: format!("{}/{}", endpoints.blog(), handle),
            feed_url: endpoints.feed_url(&handle),
        })
    }

    /// Build a source from a config entry, applying its optional overrides.
    pub fn from_config(cfg: &SourceConfig, endpoints: &Endpoints) -> Result<Self, HarvestError> {
        let mut source = Self::from_url(&cfg.url, endpoints)?;
        if let Some(id) = cfg.id.as_deref().filter(|s| !s.trim().is_empty()) {
            source.id = id.trim().to_string();
        }
        if let Some(name) = cfg.display_name.as_deref().filter(|s| !s.trim().is_empty()) {
            source.display_name = name.trim().to_string();
        }
        if let Some(feed) = cfg.feed_url.as_deref().filter(|s| !s.trim().is_empty()) {
            source.feed_url = feed.trim().to_string();
        }
        Ok(source)
    }
}

/// Derive the blog handle from a source URL, validating host and shape.
fn blog_handle(raw: &str, endpoints: &Endpoints) -> Result<String, HarvestError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(HarvestError::Validation("blog URL is empty".into()));
    }
    let with_scheme = if raw.contains("://") {
        raw.to_string()
    } else {
        format!("https://{raw}")
    };
    let url = Url::parse(&with_scheme)
        .map_err(|e| HarvestError::Validation(format!("{raw}: {e}")))?;

    let host = url.host_str().unwrap_or_default();
    if !endpoints.accepts_host(host) {
        return Err(HarvestError::Validation(format!(
            "{raw}: not a supported blog host"
        )));
    }

    let from_query = url
        .query_pairs()
        .find(|(k, _)| k == "blogId")
        .map(|(_, v)| v.into_owned());
    let from_path = url
        .path_segments()
        .and_then(|mut segs| segs.next())
        .filter(|seg| !seg.is_empty() && !seg.contains('.'))
        .map(str::to_string);

    match from_query.or(from_path) {
        Some(handle) if HANDLE_RE.is_match(&handle) => Ok(handle),
        Some(handle) => Err(HarvestError::Validation(format!(
            "{raw}: malformed blog handle {handle:?}"
        ))),
        None => Err(HarvestError::Validation(format!(
            "{raw}: no blog handle in URL"
        ))),
    }
}

/// One item of a syndication feed.
///
/// Ephemeral: lives only between feed parsing and post assembly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedEntry {
    pub title: String,
    /// Link to the post with feed tracking parameters removed.
    pub post_url: String,
    /// UTC calendar date; `None` when unparseable.
    pub published_at: Option<NaiveDate>,
    pub summary: String,
}

/// A feed entry together with its retrieved body.
///
/// `content` is either real text or a failure message embedding `post_url`.
/// Within one harvest session there is at most one post per `post_url`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HarvestedPost {
    pub id: String,
    pub source_id: String,
    pub title: String,
    pub post_url: String,
    /// Serialized as `date` (`YYYY-MM-DD`).
    #[serde(rename = "date")]
    pub published_at: Option<NaiveDate>,
    pub content: String,
}

/// Which entry fields a [`KeywordFilter`] looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchScope {
    /// Title only (streaming harvest).
    Title,
    /// Title or summary (non-streaming harvest).
    TitleAndSummary,
}

/// Case-insensitive keyword filter with OR semantics.
///
/// An empty filter admits every entry. Blank terms are ignored, so a list
/// of only blank terms admits everything too.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeywordFilter {
    terms: Vec<String>,
}

impl KeywordFilter {
    pub fn new<I, S>(terms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            terms: terms
                .into_iter()
                .map(|t| t.as_ref().trim().to_lowercase())
                .filter(|t| !t.is_empty())
                .collect(),
        }
    }

    pub fn terms(&self) -> &[String] {
        &self.terms
    }

    /// True if any term occurs in the scoped fields of `entry`.
    pub fn matches(&self, entry: &FeedEntry, scope: MatchScope) -> bool {
        if self.terms.is_empty() {
            return true;
        }
        let title = entry.title.to_lowercase();
        let summary = match scope {
            MatchScope::Title => None,
            MatchScope::TitleAndSummary => Some(entry.summary.to_lowercase()),
        };
        self.terms.iter().any(|term| {
            title.contains(term.as_str())
                || summary.as_deref().is_some_and(|s| s.contains(term.as_str()))
        })
    }
}

/// Inclusive lower bound on an entry's publish date.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateLowerBound(pub NaiveDate);

impl DateLowerBound {
    /// Parse an ISO-8601 calendar date (`YYYY-MM-DD`).
    pub fn parse(s: &str) -> Result<Self, HarvestError> {
        NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
            .map(Self)
            .map_err(|e| HarvestError::Validation(format!("start date {s:?}: {e}")))
    }

    /// Entries without a usable date are kept rather than silently dropped.
    pub fn admits(&self, date: Option<NaiveDate>) -> bool {
        date.is_none_or(|d| d >= self.0)
    }
}

/// Result of a non-streaming harvest.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HarvestReport {
    pub source_display_name: String,
    pub posts: Vec<HarvestedPost>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(title: &str, summary: &str) -> FeedEntry {
        FeedEntry {
            title: title.to_string(),
            post_url: format!("https://blog.naver.com/h/{}", title.len()),
            published_at: None,
            summary: summary.to_string(),
        }
    }

    #[test]
    fn test_source_from_desktop_url() {
        let src = BlogSource::from_url("https://blog.naver.com/my_blog", &Endpoints::default())
            .unwrap();
        assert_eq!(src.id, "my_blog");
        assert_eq!(src.canonical_url, "https://blog.naver.com/my_blog");
        assert_eq!(src.feed_url, "https://rss.blog.naver.com/my_blog");
    }

    #[test]
    fn test_source_from_other_shapes() {
        let endpoints = Endpoints::default();
        for raw in [
            "m.blog.naver.com/my_blog",
            "https://m.blog.naver.com/my_blog/223000000000",
            "https://blog.naver.com/PostList.naver?blogId=my_blog",
            "https://blog.naver.com/my_blog?fromRss=true",
        ] {
            let src = BlogSource::from_url(raw, &endpoints).unwrap();
            assert_eq!(src.id, "my_blog", "{raw}");
        }
    }

    #[test]
    fn test_source_rejects_foreign_or_malformed() {
        let endpoints = Endpoints::default();
        for raw in [
            "",
            "https://example.com/my_blog",
            "https://blog.naver.com/",
            "https://blog.naver.com/PostView.naver",
            "not a url at all",
        ] {
            let err = BlogSource::from_url(raw, &endpoints).unwrap_err();
            assert!(matches!(err, HarvestError::Validation(_)), "{raw}");
        }
    }

    #[test]
    fn test_source_config_overrides() {
        let cfg = SourceConfig {
            url: "https://blog.naver.com/abc".into(),
            id: Some("shop".into()),
            display_name: Some("Shop News".into()),
            feed_url: None,
        };
        let src = BlogSource::from_config(&cfg, &Endpoints::default()).unwrap();
        assert_eq!(src.id, "shop");
        assert_eq!(src.display_name, "Shop News");
        assert_eq!(src.feed_url, "https://rss.blog.naver.com/abc");
    }

    #[test]
    fn test_keyword_filter_is_or() {
        let filter = KeywordFilter::new(["sale", "launch"]);
        let titles = ["Big Sale Today", "Launch Event", "Random Post"];
        let kept: Vec<&str> = titles
            .iter()
            .copied()
            .filter(|t| filter.matches(&entry(t, ""), MatchScope::Title))
            .collect();
        assert_eq!(kept, vec!["Big Sale Today", "Launch Event"]);
    }

    #[test]
    fn test_keyword_filter_scope_and_blanks() {
        let filter = KeywordFilter::new(["  ", "Spring"]);
        assert_eq!(filter.terms(), &["spring".to_string()]);
        let e = entry("Weekly notes", "our spring collection");
        assert!(!filter.matches(&e, MatchScope::Title));
        assert!(filter.matches(&e, MatchScope::TitleAndSummary));
        assert!(KeywordFilter::new(Vec::<String>::new()).matches(&e, MatchScope::Title));
    }

    #[test]
    fn test_all_blank_keywords_admit_everything() {
        let filter = KeywordFilter::new(["  ", "", "\t"]);
        assert!(filter.terms().is_empty());
        for scope in [MatchScope::Title, MatchScope::TitleAndSummary] {
            assert!(filter.matches(&entry("Weekly notes", "nothing special"), scope));
            assert!(filter.matches(&entry("", ""), scope));
        }
    }

    #[test]
    fn test_date_bound_is_inclusive() {
        let bound = DateLowerBound::parse("2024-02-01").unwrap();
        assert!(bound.admits(NaiveDate::from_ymd_opt(2024, 2, 1)));
        assert!(!bound.admits(NaiveDate::from_ymd_opt(2024, 1, 31)));
        assert!(bound.admits(None));
        assert!(DateLowerBound::parse("02/01/2024").is_err());
    }

    #[test]
    fn test_post_serializes_date_field() {
        let post = HarvestedPost {
            id: "abc-1".into(),
            source_id: "abc".into(),
            title: "t".into(),
            post_url: "https://blog.naver.com/abc/1".into(),
            published_at: NaiveDate::from_ymd_opt(2024, 3, 1),
            content: "body".into(),
        };
        let v = serde_json::to_value(&post).unwrap();
        assert_eq!(v["date"], "2024-03-01");
        assert_eq!(v["postUrl"], "https://blog.naver.com/abc/1");
        assert_eq!(v["sourceId"], "abc");
    }
}
