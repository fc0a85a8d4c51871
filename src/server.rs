//! HTTP front end.
//!
//! | Route | Method | Response |
//! |-------|--------|----------|
//! | `/api/scrape/stream` | GET | `text/event-stream` of progress events |
//! | `/api/scrape` | POST | [`HarvestReport`] JSON |
//! | `/api/content` | POST | `{content, error?}` for one post |
//! | `/api/blog-info` | GET | `{blogName, url}` |
//! | `/health` | GET | `{status: "ok"}` |
//!
//! Closing the event stream cancels the harvest behind it.

use crate::config::Config;
use crate::error::HarvestError;
use crate::harvest::{HarvestQuery, Harvester};
use crate::models::{BlogSource, DateLowerBound, HarvestReport, KeywordFilter};
use crate::progress::{ProgressEvent, ProgressSink};
use crate::retrieval::{HttpFetcher, failure_message};
use axum::{
    Router,
    extract::{Json, Query, State},
    http::StatusCode,
    response::{
        IntoResponse, Response, Sse,
        sse::{Event, KeepAlive},
    },
    routing::{get, post},
};
use futures::stream::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::convert::Infallible;
use std::sync::Arc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, info, instrument, warn};

#[derive(Clone)]
pub struct AppState {
    harvester: Arc<Harvester<HttpFetcher>>,
    channel_capacity: usize,
}

impl AppState {
    pub fn new(config: &Config) -> Result<Self, HarvestError> {
        let fetcher = HttpFetcher::new(config.harvest.request_timeout())?;
        Ok(Self {
            harvester: Arc::new(Harvester::new(fetcher, config)),
            channel_capacity: config.harvest.channel_capacity,
        })
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/scrape/stream", get(stream_handler))
        .route("/api/scrape", post(scrape_handler))
        .route("/api/content", post(content_handler))
        .route("/api/blog-info", get(blog_info_handler))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

pub async fn serve(config: &Config) -> Result<(), HarvestError> {
    let app = router(AppState::new(config)?);
    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    info!(addr = %listener.local_addr()?, "HTTP server listening");
    axum::serve(listener, app).await?;
    Ok(())
}

struct ApiErrorResponse(HarvestError);

impl From<HarvestError> for ApiErrorResponse {
    fn from(e: HarvestError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiErrorResponse {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            HarvestError::Validation(_) => StatusCode::BAD_REQUEST,
            HarvestError::FeedUnavailable { .. }
            | HarvestError::UpstreamStatus { .. }
            | HarvestError::FeedParse(_)
            | HarvestError::Http(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

/// Validated inputs shared by both harvest routes.
fn parse_harvest_input(
    state: &AppState,
    url: Option<&str>,
    keywords: Vec<String>,
    start_date: Option<&str>,
) -> Result<(BlogSource, KeywordFilter, Option<DateLowerBound>), HarvestError> {
    let url = url.ok_or_else(|| HarvestError::Validation("url is required".into()))?;
    let source = BlogSource::from_url(url, state.harvester.endpoints())?;
    let since = start_date
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(DateLowerBound::parse)
        .transpose()?;
    Ok((source, KeywordFilter::new(keywords), since))
}

async fn health_handler() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StreamParams {
    url: Option<String>,
    /// JSON array of strings.
    keywords: Option<String>,
    start_date: Option<String>,
}

fn parse_keyword_param(raw: Option<&str>) -> Result<Vec<String>, HarvestError> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        None => Ok(Vec::new()),
        Some(raw) => serde_json::from_str(raw)
            .map_err(|e| HarvestError::Validation(format!("keywords must be a JSON array: {e}"))),
    }
}

fn to_sse(event: &ProgressEvent) -> Event {
    Event::default()
        .event(event.name())
        .json_data(event)
        .unwrap_or_else(|e| {
            warn!(event = event.name(), error = %e, "Could not encode progress event");
            Event::default().event("error").data(
                json!({ "message": "event encoding failed", "error": e.to_string() }).to_string(),
            )
        })
}

#[instrument(level = "info", skip_all, fields(url = ?params.url))]
async fn stream_handler(
    State(state): State<AppState>,
    Query(params): Query<StreamParams>,
) -> Result<Response, ApiErrorResponse> {
    let keywords = parse_keyword_param(params.keywords.as_deref())?;
    let (source, keywords, since) = parse_harvest_input(
        &state,
        params.url.as_deref(),
        keywords,
        params.start_date.as_deref(),
    )?;

    let cancel = CancellationToken::new();
    let (sink, rx) = ProgressSink::channel(state.channel_capacity, cancel.clone());
    let harvester = state.harvester.clone();
    tokio::spawn(async move {
        let query = HarvestQuery::new(keywords, since);
        if let Err(e) = harvester.harvest_stream(&source, &query, sink).await {
            debug!(source = %source.id, error = %e, "Streaming harvest ended early");
        }
    });

    let guard = cancel.drop_guard();
    let frames = ReceiverStream::new(rx).map(move |event| {
        let _guard = &guard;
        Ok::<_, Infallible>(to_sse(&event))
    });
    Ok(Sse::new(frames)
        .keep_alive(KeepAlive::default())
        .into_response())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ScrapeRequest {
    url: String,
    #[serde(default)]
    keywords: Vec<String>,
    #[serde(default)]
    start_date: Option<String>,
}

#[instrument(level = "info", skip_all, fields(url = %request.url))]
async fn scrape_handler(
    State(state): State<AppState>,
    Json(request): Json<ScrapeRequest>,
) -> Result<Json<HarvestReport>, ApiErrorResponse> {
    let (source, keywords, since) = parse_harvest_input(
        &state,
        Some(request.url.as_str()),
        request.keywords,
        request.start_date.as_deref(),
    )?;
    let cancel = CancellationToken::new();
    let _guard = cancel.clone().drop_guard();
    let report = state
        .harvester
        .collect(&source, keywords, since, cancel)
        .await?;
    Ok(Json(report))
}

#[derive(Debug, Deserialize)]
struct ContentRequest {
    url: String,
}

#[derive(Debug, Serialize)]
struct ContentResponse {
    content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[instrument(level = "info", skip_all, fields(url = %request.url))]
async fn content_handler(
    State(state): State<AppState>,
    Json(request): Json<ContentRequest>,
) -> Result<Json<ContentResponse>, ApiErrorResponse> {
    let url = request.url.trim();
    if url.is_empty() {
        return Err(HarvestError::Validation("url is required".into()).into());
    }
    let cancel = CancellationToken::new();
    let _guard = cancel.clone().drop_guard();
    let response = match state.harvester.chain().retrieve(url, &cancel).await {
        Ok(content) => ContentResponse {
            content,
            error: None,
        },
        Err(e) => ContentResponse {
            content: failure_message(url),
            error: Some(e.to_string()),
        },
    };
    Ok(Json(response))
}

#[derive(Debug, Deserialize)]
struct BlogInfoParams {
    url: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BlogInfo {
    blog_name: String,
    url: String,
}

async fn blog_info_handler(
    State(state): State<AppState>,
    Query(params): Query<BlogInfoParams>,
) -> Result<Json<BlogInfo>, ApiErrorResponse> {
    let url = params
        .url
        .ok_or_else(|| HarvestError::Validation("url is required".into()))?;
    let source = BlogSource::from_url(&url, state.harvester.endpoints())?;
    let blog_name = state
        .harvester
        .feeds()
        .display_name(&source, &CancellationToken::new())
        .await;
    Ok(Json(BlogInfo {
        blog_name,
        url: source.canonical_url,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    const PAGE_TEXT: &str =
        "The corner shop reopens on Monday with a brand new layout and a larger reading corner.";

    async fn spawn_app(config: Config) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = router(AppState::new(&config).unwrap());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn config_for(upstream: &str) -> Config {
        let mut cfg = Config::default();
        cfg.endpoints.blog_base = upstream.to_string();
        cfg.endpoints.mobile_base = upstream.to_string();
        cfg.endpoints.feed_base = format!("{upstream}/rss");
        cfg.endpoints.proxy_relay = None;
        cfg.harvest.pacing_ms = 0;
        cfg.harvest.feed_retries = 0;
        cfg
    }

    #[tokio::test]
    async fn test_health() {
        let base = spawn_app(Config::default()).await;
        let body: serde_json::Value = reqwest::get(format!("{base}/health"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_stream_rejects_bad_input_before_io() {
        let base = spawn_app(Config::default()).await;
        for query in [
            "url=https://example.com/abc",
            "url=https://blog.naver.com/abc&startDate=yesterday",
            "url=https://blog.naver.com/abc&keywords=sale",
            "",
        ] {
            let resp = reqwest::get(format!("{base}/api/scrape/stream?{query}"))
                .await
                .unwrap();
            assert_eq!(resp.status(), 400, "{query}");
            let body: serde_json::Value = resp.json().await.unwrap();
            assert!(body["error"].is_string());
        }
    }

    #[tokio::test]
    async fn test_stream_end_to_end() {
        let mut upstream = mockito::Server::new_async().await;
        let base_url = upstream.url();
        let feed = format!(
            r#"<rss version="2.0"><channel><title>Corner Shop</title>
            <item><title>Big Sale Today</title><link>{base_url}/corner_shop/223000000001</link>
            <pubDate>Mon, 01 Jan 2024 09:00:00 +0900</pubDate></item>
            <item><title>Random Post</title><link>{base_url}/corner_shop/223000000002</link>
            <pubDate>Mon, 01 Jan 2024 09:00:00 +0900</pubDate></item>
            </channel></rss>"#
        );
        upstream
            .mock("GET", "/rss/corner_shop")
            .with_status(200)
            .with_body(feed)
            .create_async()
            .await;
        let post = upstream
            .mock("GET", "/PostView.naver")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(format!(
                r#"<html><body>{}<div class="se-main-container"><p class="se-text-paragraph">{PAGE_TEXT}</p></div></body></html>"#,
                " ".repeat(1200)
            ))
            .expect(1)
            .create_async()
            .await;

        let base = spawn_app(config_for(&base_url)).await;
        let keywords = urlencoding::encode(r#"["sale"]"#);
        let blog = urlencoding::encode(&format!("{base_url}/corner_shop")).into_owned();
        let body = reqwest::get(format!(
            "{base}/api/scrape/stream?url={blog}&keywords={keywords}"
        ))
        .await
        .unwrap()
        .text()
        .await
        .unwrap();

        post.assert_async().await;
        let order: Vec<&str> = body
            .lines()
            .filter_map(|l| l.strip_prefix("event: "))
            .collect();
        assert_eq!(
            order,
            vec!["start", "blog", "count", "progress", "post", "complete"]
        );
        assert!(body.contains(PAGE_TEXT));
    }

    #[tokio::test]
    async fn test_scrape_reports_feed_failure() {
        let mut upstream = mockito::Server::new_async().await;
        upstream
            .mock("GET", "/rss/corner_shop")
            .with_status(500)
            .create_async()
            .await;
        let base = spawn_app(config_for(&upstream.url())).await;

        let resp = reqwest::Client::new()
            .post(format!("{base}/api/scrape"))
            .json(&json!({ "url": format!("{}/corner_shop", upstream.url()) }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 502);
    }

    #[tokio::test]
    async fn test_content_for_placeholder() {
        let base = spawn_app(Config::default()).await;
        let body: serde_json::Value = reqwest::Client::new()
            .post(format!("{base}/api/content"))
            .json(&json!({ "url": "https://blog.naver.com/abc#dummy-0" }))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["content"], crate::retrieval::PLACEHOLDER_CONTENT);
        assert!(body.get("error").is_none());
    }
}
