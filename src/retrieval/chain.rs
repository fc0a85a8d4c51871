//! The ordered retrieval strategy chain.
//!
//! Each [`Strategy`] is one endpoint shape the platform has used to serve a
//! post body. They are tried strictly in [`Strategy::ORDER`]; the first one
//! that yields a long enough response *and* extractable text wins.
//!
//! | # | Strategy | Endpoint | Min bytes |
//! |---|----------|----------|-----------|
//! | 1 | `FrameView` | `PostView.naver?…&iframe=postView` | 500 |
//! | 2 | `NoFrameView` | `PostViewNoFrame.naver?…` | 1000 |
//! | 3 | `RedirectAwareView` | `PostView.naver?…`, re-issued on redirect script | 1000 |
//! | 4 | `ContentApi` | `api/blogs/<id>/posts/<no>` (JSON) | 500 |
//! | 5 | `DesktopPage` | `<id>/<no>?from=postView`, then its `mainFrame` | 500 |
//! | 6 | `LegacyDesktop` | `PostView.nhn?…`, `<id>?Redirect=Log&logNo=…` | 500 |
//! | 7 | `Mobile` | `m.…/PostView.naver?…`, then `&navType=tl` | 500 |
//! | 8 | `AsyncView` | `PostViewAsync.naver?…&viewType=pc` | 500 |
//! | 9 | `PrimedRetry` | blog home, then the view with cookies | 500 |
//! | 10 | `ProxyRelay` | `<relay>/<desktop post url>` | 1000 |

use super::client::{FetchRequest, FetchResponse, Fetcher};
use super::{PLACEHOLDER_CONTENT, PostHandle, failure_message, is_placeholder};
use crate::config::Endpoints;
use crate::error::HarvestError;
use crate::extract::{self, NOT_FOUND};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use url::Url;

static REDIRECT_SCRIPT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"location\.(?:replace\s*\(|href\s*=)").unwrap());
static BLOCK_ELEMENT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)<(?:div|p)[\s>]").unwrap());

/// Keys of the async view payload known to hold the body, as dotted paths.
const ASYNC_KEYS: &[&[&str]] = &[
    &["html"],
    &["innerHtml"],
    &["result", "contentHtml"],
    &["contents"],
    &["result", "contents"],
];

/// Minimum length for a heuristically discovered HTML string in a JSON payload.
const MIN_HEURISTIC_HTML: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Strategy {
    FrameView,
    NoFrameView,
    RedirectAwareView,
    ContentApi,
    DesktopPage,
    LegacyDesktop,
    Mobile,
    AsyncView,
    PrimedRetry,
    ProxyRelay,
}

impl Strategy {
    pub const ORDER: [Strategy; 10] = [
        Strategy::FrameView,
        Strategy::NoFrameView,
        Strategy::RedirectAwareView,
        Strategy::ContentApi,
        Strategy::DesktopPage,
        Strategy::LegacyDesktop,
        Strategy::Mobile,
        Strategy::AsyncView,
        Strategy::PrimedRetry,
        Strategy::ProxyRelay,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Strategy::FrameView => "frame_view",
            Strategy::NoFrameView => "no_frame_view",
            Strategy::RedirectAwareView => "redirect_aware_view",
            Strategy::ContentApi => "content_api",
            Strategy::DesktopPage => "desktop_page",
            Strategy::LegacyDesktop => "legacy_desktop",
            Strategy::Mobile => "mobile",
            Strategy::AsyncView => "async_view",
            Strategy::PrimedRetry => "primed_retry",
            Strategy::ProxyRelay => "proxy_relay",
        }
    }

    /// Response body length the step must exceed.
    pub fn min_body(self) -> usize {
        match self {
            Strategy::NoFrameView | Strategy::RedirectAwareView | Strategy::ProxyRelay => 1000,
            _ => 500,
        }
    }
}

/// Why a single step did not produce a body. Never escapes the chain.
#[derive(Debug, Error)]
enum StepFailure {
    #[error("status {0}")]
    Status(u16),
    #[error("body too short ({0} bytes)")]
    ShortBody(usize),
    #[error("only a redirect script")]
    RedirectOnly,
    #[error("no content extracted")]
    NothingExtracted,
    #[error("unusable payload: {0}")]
    Payload(String),
    #[error("disabled")]
    Disabled,
    #[error(transparent)]
    Fetch(#[from] HarvestError),
}

type StepResult = Result<String, StepFailure>;

/// Runs [`Strategy::ORDER`] against one post.
#[derive(Debug, Clone)]
pub struct RetrievalChain<F> {
    fetcher: F,
    endpoints: Endpoints,
    request_timeout: Duration,
}

impl<F: Fetcher + Clone> RetrievalChain<F> {
    pub fn new(fetcher: F, endpoints: Endpoints, request_timeout: Duration) -> Self {
        Self {
            fetcher,
            endpoints,
            request_timeout,
        }
    }

    /// Post body text, or a failure message embedding `post_url`. Never errors.
    pub async fn fetch_post_body(&self, post_url: &str, cancel: &CancellationToken) -> String {
        match self.retrieve(post_url, cancel).await {
            Ok(text) => text,
            Err(_) => failure_message(post_url),
        }
    }

    /// Like [`fetch_post_body`](Self::fetch_post_body) but reports why it failed.
    ///
    /// `TransportAborted` when `cancel` fired, `RetrievalExhausted` when every
    /// step failed or the URL has no derivable handle.
    #[instrument(level = "info", skip_all, fields(url = %post_url))]
    pub async fn retrieve(
        &self,
        post_url: &str,
        cancel: &CancellationToken,
    ) -> Result<String, HarvestError> {
        if is_placeholder(post_url) {
            return Ok(PLACEHOLDER_CONTENT.to_string());
        }
        let Some(handle) = PostHandle::parse(post_url) else {
            warn!("No blog/post handle in URL; skipping retrieval");
            return Err(HarvestError::RetrievalExhausted(post_url.to_string()));
        };

        for step in Strategy::ORDER {
            if cancel.is_cancelled() {
                return Err(HarvestError::TransportAborted);
            }
            match self.run(step, &handle, cancel).await {
                Ok(text) => {
                    info!(
                        step = step.name(),
                        chars = text.chars().count(),
                        "Post body retrieved"
                    );
                    return Ok(text);
                }
                Err(StepFailure::Fetch(HarvestError::TransportAborted)) => {
                    return Err(HarvestError::TransportAborted);
                }
                Err(e) => debug!(step = step.name(), reason = %e, "Retrieval step failed"),
            }
        }

        warn!("All retrieval strategies exhausted");
        Err(HarvestError::RetrievalExhausted(post_url.to_string()))
    }

    async fn run(&self, step: Strategy, h: &PostHandle, cancel: &CancellationToken) -> StepResult {
        let min = step.min_body();
        match step {
            Strategy::FrameView => {
                let req = FetchRequest::html(self.view_url(h, "PostView.naver", "&iframe=postView"))
                    .referer(self.post_page(h));
                self.html_step(req, min, cancel).await
            }
            Strategy::NoFrameView => {
                let req = FetchRequest::html(self.view_url(h, "PostViewNoFrame.naver", ""))
                    .referer(self.home(h));
                let resp = self.get(req, cancel).await?;
                if resp.is_success() && is_redirect_only(&resp.body) {
                    return Err(StepFailure::RedirectOnly);
                }
                accept_html(&resp, min, extract::extract_post_body)
            }
            Strategy::RedirectAwareView => {
                let req = FetchRequest::html(self.view_url(h, "PostView.naver", ""))
                    .referer(self.home(h));
                let resp = self.get(req, cancel).await?;
                if resp.is_success() && is_redirect_only(&resp.body) {
                    debug!("Redirect script detected; re-issuing with alternate parameters");
                    let req = FetchRequest::html(self.alternate_view_url(h)).referer(self.home(h));
                    let resp = self.get(req, cancel).await?;
                    return accept_html(&resp, min, extract::extract_post_body);
                }
                accept_html(&resp, min, extract::extract_post_body)
            }
            Strategy::ContentApi => {
                let url = format!(
                    "{}/api/blogs/{}/posts/{}",
                    self.endpoints.blog(),
                    h.blog_id,
                    h.log_no
                );
                let req = FetchRequest::json(url).referer(self.post_page(h));
                let resp = self.get(req, cancel).await?;
                check_response(&resp, min)?;
                let payload: Value = serde_json::from_str(&resp.body)
                    .map_err(|e| StepFailure::Payload(e.to_string()))?;
                let html = [&["result", "contentHtml"][..], &["result", "contents"][..]]
                    .iter()
                    .find_map(|path| string_at(&payload, path))
                    .ok_or_else(|| StepFailure::Payload("no content field".into()))?;
                non_sentinel(extract::extract_fragment(html))
            }
            Strategy::DesktopPage => {
                let page = format!("{}?from=postView", self.post_page(h));
                let req = FetchRequest::html(page.clone()).referer(self.home(h));
                let resp = self.get(req, cancel).await?;
                check_response(&resp, min)?;
                let text = extract::extract_post_body(&resp.body);
                if text != NOT_FOUND {
                    return Ok(text);
                }
                let Some(frame) = extract::find_embedded_frame(&resp.body) else {
                    return Err(StepFailure::NothingExtracted);
                };
                let frame_url = Url::parse(&page)
                    .and_then(|base| base.join(&frame))
                    .map_err(|e| StepFailure::Payload(format!("frame src {frame:?}: {e}")))?;
                debug!(frame = %frame_url, "Following embedded frame");
                let req = FetchRequest::html(frame_url.as_str()).referer(page);
                self.html_step(req, min, cancel).await
            }
            Strategy::LegacyDesktop => {
                let legacy = FetchRequest::html(self.view_url(h, "PostView.nhn", ""))
                    .referer(self.home(h));
                match self.html_step(legacy, min, cancel).await {
                    Ok(text) => Ok(text),
                    Err(StepFailure::Fetch(HarvestError::TransportAborted)) => {
                        Err(HarvestError::TransportAborted.into())
                    }
                    Err(e) => {
                        debug!(reason = %e, "Legacy view failed; trying redirect path");
                        let url = format!(
                            "{}/{}?Redirect=Log&logNo={}",
                            self.endpoints.blog(),
                            h.blog_id,
                            h.log_no
                        );
                        let req = FetchRequest::html(url).referer(self.home(h));
                        self.html_step(req, min, cancel).await
                    }
                }
            }
            Strategy::Mobile => {
                let base = format!(
                    "{}/PostView.naver?blogId={}&logNo={}",
                    self.endpoints.mobile(),
                    h.blog_id,
                    h.log_no
                );
                let referer = format!("{}/{}", self.endpoints.mobile(), h.blog_id);
                for url in [base.clone(), format!("{base}&navType=tl")] {
                    let req = FetchRequest::html(url).mobile().referer(referer.clone());
                    let resp = match self.get(req, cancel).await {
                        Ok(resp) => resp,
                        Err(HarvestError::TransportAborted) => {
                            return Err(HarvestError::TransportAborted.into());
                        }
                        Err(e) => {
                            debug!(reason = %e, "Mobile variant failed");
                            continue;
                        }
                    };
                    match accept_html(&resp, min, extract::extract_mobile_body) {
                        Ok(text) => return Ok(text),
                        Err(e) => debug!(reason = %e, "Mobile variant failed"),
                    }
                }
                Err(StepFailure::NothingExtracted)
            }
            Strategy::AsyncView => {
                let req = FetchRequest::json(self.view_url(h, "PostViewAsync.naver", "&viewType=pc"))
                    .referer(self.post_page(h));
                let resp = self.get(req, cancel).await?;
                check_response(&resp, min)?;
                match serde_json::from_str::<Value>(&resp.body) {
                    Ok(payload) => {
                        let html = async_view_html(&payload)
                            .ok_or_else(|| StepFailure::Payload("no HTML-like value".into()))?;
                        non_sentinel(extract::extract_fragment(html))
                    }
                    Err(_) => non_sentinel(extract::extract_post_body(&resp.body)),
                }
            }
            Strategy::PrimedRetry => {
                let home = self.home(h);
                let prime = FetchRequest::html(home.clone()).with_credentials();
                match self.get(prime, cancel).await {
                    Ok(resp) => debug!(status = resp.status, "Primed session from blog home"),
                    Err(HarvestError::TransportAborted) => {
                        return Err(HarvestError::TransportAborted.into());
                    }
                    Err(e) => debug!(error = %e, "Priming request failed; retrying anyway"),
                }
                let req = FetchRequest::html(self.alternate_view_url(h))
                    .referer(home)
                    .with_credentials();
                self.html_step(req, min, cancel).await
            }
            Strategy::ProxyRelay => {
                let Some(relay) = self.endpoints.proxy_relay.as_deref() else {
                    return Err(StepFailure::Disabled);
                };
                let url = format!("{}/{}", relay.trim_end_matches('/'), self.post_page(h));
                let req = FetchRequest::html(url).referer(self.endpoints.blog().to_string());
                self.html_step(req, min, cancel).await
            }
        }
    }

    /// Fetch, racing the cancellation token.
    async fn get(
        &self,
        req: FetchRequest,
        cancel: &CancellationToken,
    ) -> Result<FetchResponse, HarvestError> {
        let req = match req.timeout {
            Some(_) => req,
            None => req.timeout(self.request_timeout),
        };
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(HarvestError::TransportAborted),
            res = self.fetcher.fetch(req) => res,
        }
    }

    async fn html_step(&self, req: FetchRequest, min: usize, cancel: &CancellationToken) -> StepResult {
        let resp = self.get(req, cancel).await?;
        accept_html(&resp, min, extract::extract_post_body)
    }

    fn view_url(&self, h: &PostHandle, page: &str, extra: &str) -> String {
        format!(
            "{}/{}?blogId={}&logNo={}{}",
            self.endpoints.blog(),
            page,
            h.blog_id,
            h.log_no,
            extra
        )
    }

    fn alternate_view_url(&self, h: &PostHandle) -> String {
        self.view_url(
            h,
            "PostView.naver",
            "&redirect=Dlog&widgetTypeCall=true&directAccess=false",
        )
    }

    fn home(&self, h: &PostHandle) -> String {
        format!("{}/{}", self.endpoints.blog(), h.blog_id)
    }

    fn post_page(&self, h: &PostHandle) -> String {
        format!("{}/{}/{}", self.endpoints.blog(), h.blog_id, h.log_no)
    }
}

fn check_response(resp: &FetchResponse, min: usize) -> Result<(), StepFailure> {
    if !resp.is_success() {
        return Err(StepFailure::Status(resp.status));
    }
    if resp.body.len() <= min {
        return Err(StepFailure::ShortBody(resp.body.len()));
    }
    Ok(())
}

fn accept_html(resp: &FetchResponse, min: usize, extractor: fn(&str) -> String) -> StepResult {
    check_response(resp, min)?;
    non_sentinel(extractor(&resp.body))
}

fn non_sentinel(text: String) -> StepResult {
    if text == NOT_FOUND {
        Err(StepFailure::NothingExtracted)
    } else {
        Ok(text)
    }
}

fn is_redirect_only(body: &str) -> bool {
    REDIRECT_SCRIPT_RE.is_match(body) && !body.contains(extract::MAIN_CONTAINER)
}

fn string_at<'a>(value: &'a Value, path: &[&str]) -> Option<&'a str> {
    path.iter()
        .try_fold(value, |v, key| v.get(*key))?
        .as_str()
        .filter(|s| !s.trim().is_empty())
}

fn looks_like_html(s: &str) -> bool {
    s.len() > MIN_HEURISTIC_HTML && BLOCK_ELEMENT_RE.is_match(s)
}

/// Body HTML from an async view payload: known keys first, then any
/// HTML-looking string at the top level or one object below it.
fn async_view_html(payload: &Value) -> Option<&str> {
    if let Some(html) = ASYNC_KEYS.iter().find_map(|path| string_at(payload, path)) {
        return Some(html);
    }
    let top = payload.as_object()?;
    top.values()
        .filter_map(Value::as_str)
        .find(|s| looks_like_html(s))
        .or_else(|| {
            top.values()
                .filter_map(Value::as_object)
                .flat_map(|nested| nested.values())
                .filter_map(Value::as_str)
                .find(|s| looks_like_html(s))
        })
}
