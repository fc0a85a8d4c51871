//! Feed harvest orchestration.
//!
//! One session per source:
//!
//! 1. **FetchingFeed**: fetch and parse the RSS feed (degraded mode on 404/410)
//! 2. **Filtering**: keywords, then the date bound, then de-duplication by URL
//! 3. **PerItemFetch**: sequential retrieval through the strategy chain, paced
//! 4. **Complete**: terminal event carrying every harvested post
//!
//! Progress goes to a [`ProgressSink`]; the non-streaming variant uses a
//! detached sink and only returns the [`HarvestReport`].

use crate::config::{Config, Endpoints, HarvestConfig};
use crate::error::HarvestError;
use crate::feed::FeedReader;
use crate::models::{
    BlogSource, DateLowerBound, FeedEntry, HarvestReport, HarvestedPost, KeywordFilter, MatchScope,
};
use crate::progress::{ProgressEvent, ProgressSink};
use crate::retrieval::{
    Fetcher, PLACEHOLDER_MARKER, PostHandle, RetrievalChain, is_placeholder,
};
use chrono::{Days, Local};
use itertools::Itertools;
use std::time::Instant;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

pub const DEGRADED_WARNING: &str = "This blog's RSS feed is unavailable, so placeholder entries \
    were generated instead of real posts.";

/// Where a session currently is. Logged on every transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HarvestState {
    FetchingFeed,
    Filtering,
    PerItemFetch(usize),
    Complete,
    Aborted,
    Failed,
}

/// Filters applied to feed entries before any post is retrieved.
#[derive(Debug, Clone)]
pub struct HarvestQuery {
    pub keywords: KeywordFilter,
    pub since: Option<DateLowerBound>,
    pub scope: MatchScope,
}

impl HarvestQuery {
    pub fn new(keywords: KeywordFilter, since: Option<DateLowerBound>) -> Self {
        Self {
            keywords,
            since,
            scope: MatchScope::Title,
        }
    }

    pub fn with_scope(mut self, scope: MatchScope) -> Self {
        self.scope = scope;
        self
    }

    /// Keyword filter, then date filter, then first-wins de-duplication.
    pub fn apply(&self, entries: Vec<FeedEntry>) -> Vec<FeedEntry> {
        entries
            .into_iter()
            .filter(|e| self.keywords.matches(e, self.scope))
            .filter(|e| self.since.is_none_or(|b| b.admits(e.published_at)))
            .unique_by(|e| e.post_url.clone())
            .collect()
    }
}

struct Session<'a> {
    source: &'a BlogSource,
    state: HarvestState,
    started: Instant,
}

impl<'a> Session<'a> {
    fn new(source: &'a BlogSource) -> Self {
        Self {
            source,
            state: HarvestState::FetchingFeed,
            started: Instant::now(),
        }
    }

    fn advance(&mut self, next: HarvestState) {
        debug!(source = %self.source.id, from = ?self.state, to = ?next, "Harvest state");
        self.state = next;
    }

    async fn abort(mut self, sink: ProgressSink) -> HarvestError {
        self.advance(HarvestState::Aborted);
        info!(
            source = %self.source.id,
            elapsed_ms = self.started.elapsed().as_millis() as u64,
            "Harvest cancelled"
        );
        sink.finish(None).await;
        HarvestError::TransportAborted
    }
}

/// Runs harvest sessions against one platform.
#[derive(Debug, Clone)]
pub struct Harvester<F> {
    chain: RetrievalChain<F>,
    feeds: FeedReader<F>,
    endpoints: Endpoints,
    config: HarvestConfig,
}

impl<F: Fetcher + Clone> Harvester<F> {
    pub fn new(fetcher: F, config: &Config) -> Self {
        Self {
            chain: RetrievalChain::new(
                fetcher.clone(),
                config.endpoints.clone(),
                config.harvest.request_timeout(),
            ),
            feeds: FeedReader::new(fetcher, &config.harvest),
            endpoints: config.endpoints.clone(),
            config: config.harvest.clone(),
        }
    }

    pub fn chain(&self) -> &RetrievalChain<F> {
        &self.chain
    }

    pub fn feeds(&self) -> &FeedReader<F> {
        &self.feeds
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    /// Harvest without a progress stream. Keywords match title or summary.
    pub async fn collect(
        &self,
        source: &BlogSource,
        keywords: KeywordFilter,
        since: Option<DateLowerBound>,
        cancel: CancellationToken,
    ) -> Result<HarvestReport, HarvestError> {
        let query = HarvestQuery::new(keywords, since).with_scope(MatchScope::TitleAndSummary);
        self.harvest_stream(source, &query, ProgressSink::detached(cancel))
            .await
    }

    /// Run one session, reporting to `sink`.
    ///
    /// Returns the report that was sent with `Complete`. A feed failure emits
    /// `Error` and returns the error; cancellation closes the sink without a
    /// terminal event and returns [`HarvestError::TransportAborted`].
    #[instrument(level = "info", skip_all, fields(source = %source.id))]
    pub async fn harvest_stream(
        &self,
        source: &BlogSource,
        query: &HarvestQuery,
        mut sink: ProgressSink,
    ) -> Result<HarvestReport, HarvestError> {
        let cancel = sink.cancel_token().clone();
        let mut session = Session::new(source);
        info!(
            keywords = ?query.keywords.terms(),
            since = ?query.since.map(|b| b.0),
            "Harvest starting"
        );

        sink.emit(ProgressEvent::Start {
            message: format!("Fetching the RSS feed of {}", source.display_name),
        })
        .await;

        let (display_name, entries, warning) = match self.feeds.fetch(source, &cancel).await {
            Ok(feed) => {
                let name = feed
                    .title
                    .clone()
                    .unwrap_or_else(|| source.display_name.clone());
                (name, feed.entries, None)
            }
            Err(HarvestError::TransportAborted) => return Err(session.abort(sink).await),
            Err(HarvestError::FeedUnavailable { status, .. }) => {
                warn!(status, "Feed unavailable; generating placeholder entries");
                let name = self.feeds.display_name(source, &cancel).await;
                let entries = self.placeholder_entries(source, &name);
                (
                    name,
                    entries,
                    Some(DEGRADED_WARNING.to_string()),
                )
            }
            Err(e) => {
                session.advance(HarvestState::Failed);
                error!(error = %e, "Feed fetch failed");
                sink.finish(Some(ProgressEvent::Error {
                    message: "Failed to fetch the blog's RSS feed".to_string(),
                    error: e.to_string(),
                }))
                .await;
                return Err(e);
            }
        };
        if cancel.is_cancelled() {
            return Err(session.abort(sink).await);
        }

        sink.emit(ProgressEvent::FeedMetadata {
            source_display_name: display_name.clone(),
        })
        .await;

        session.advance(HarvestState::Filtering);
        let fetched = entries.len();
        let entries = query.apply(entries);
        let total = entries.len();
        info!(fetched, kept = total, "Feed entries filtered");
        sink.emit(ProgressEvent::Count {
            total,
            message: format!("Found {total} posts to fetch"),
        })
        .await;

        let mut posts: Vec<HarvestedPost> = Vec::with_capacity(total);
        for (i, entry) in entries.into_iter().enumerate() {
            let ordinal = i + 1;
            session.advance(HarvestState::PerItemFetch(ordinal));

            if i > 0 && !is_placeholder(&entry.post_url) {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(session.abort(sink).await),
                    _ = sleep(self.config.pacing()) => {}
                }
            }
            if cancel.is_cancelled() {
                return Err(session.abort(sink).await);
            }

            sink.emit(ProgressEvent::item_progress(ordinal, total, &entry.title))
                .await;

            let content = self.chain.fetch_post_body(&entry.post_url, &cancel).await;
            // An aborted fetch yields a failure message; drop it with the session.
            if cancel.is_cancelled() {
                return Err(session.abort(sink).await);
            }

            let post = HarvestedPost {
                id: post_id(&source.id, &entry.post_url, ordinal),
                source_id: source.id.clone(),
                title: entry.title,
                post_url: entry.post_url,
                published_at: entry.published_at,
                content,
            };
            sink.emit(ProgressEvent::ItemResult(post.clone())).await;
            posts.push(post);
        }

        session.advance(HarvestState::Complete);
        info!(
            posts = posts.len(),
            elapsed_ms = session.started.elapsed().as_millis() as u64,
            "Harvest complete"
        );
        let report = HarvestReport {
            source_display_name: display_name,
            posts,
            warning,
        };
        sink.finish(Some(ProgressEvent::Complete {
            source_display_name: report.source_display_name.clone(),
            posts: report.posts.clone(),
            message: Some(format!("Fetched {} posts", report.posts.len())),
            warning: report.warning.clone(),
        }))
        .await;
        Ok(report)
    }

    /// One entry per day going back from today, pointing at the blog itself.
    fn placeholder_entries(&self, source: &BlogSource, display_name: &str) -> Vec<FeedEntry> {
        let today = Local::now().date_naive();
        (0..self.config.placeholder_count)
            .map(|i| FeedEntry {
                title: format!("{display_name} post {}", i + 1),
                post_url: format!("{}{}{}", source.canonical_url, PLACEHOLDER_MARKER, i),
                published_at: today.checked_sub_days(Days::new(i as u64)),
                summary: String::new(),
            })
            .collect()
    }
}

fn post_id(source_id: &str, post_url: &str, ordinal: usize) -> String {
    match PostHandle::parse(post_url) {
        Some(handle) => format!("{source_id}-{}", handle.log_no),
        None => format!("{source_id}-{ordinal}"),
    }
}
