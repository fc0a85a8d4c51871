//! The HTTP seam used by the retrieval chain and the feed reader.
//!
//! [`Fetcher`] is the only thing that touches the network. [`HttpFetcher`]
//! is the reqwest-backed implementation; tests swap in a scripted one.

use crate::error::HarvestError;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, HeaderMap, HeaderValue, REFERER, USER_AGENT};
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::{debug, instrument};

pub const DESKTOP_UA: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
    (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";
pub const MOBILE_UA: &str = "Mozilla/5.0 (iPhone; CPU iPhone OS 13_2_3 like Mac OS X) \
    AppleWebKit/605.1.15 (KHTML, like Gecko) Version/13.0.3 Mobile/15E148 Safari/604.1";
const ACCEPT_HTML: &str =
    "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8";
const ACCEPT_JSON: &str = "application/json, text/plain, */*";
const ACCEPT_FEED: &str = "application/rss+xml, application/xml;q=0.9, text/xml;q=0.8, */*;q=0.5";
const LANGUAGE: &str = "ko-KR,ko;q=0.9,en-US;q=0.8,en;q=0.7";

/// Browser identity presented on a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Profile {
    Desktop,
    Mobile,
}

/// What the request asks the server for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Accept {
    Html,
    Json,
    Feed,
}

#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub url: String,
    pub profile: Profile,
    pub accept: Accept,
    pub referer: Option<String>,
    /// Keep and forward cookies across requests that set this.
    pub with_credentials: bool,
    pub timeout: Option<Duration>,
}

impl FetchRequest {
    pub fn html(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            profile: Profile::Desktop,
            accept: Accept::Html,
            referer: None,
            with_credentials: false,
            timeout: None,
        }
    }

    pub fn json(url: impl Into<String>) -> Self {
        Self {
            accept: Accept::Json,
            ..Self::html(url)
        }
    }

    pub fn feed(url: impl Into<String>) -> Self {
        Self {
            accept: Accept::Feed,
            ..Self::html(url)
        }
    }

    pub fn referer(mut self, referer: impl Into<String>) -> Self {
        self.referer = Some(referer.into());
        self
    }

    pub fn mobile(mut self) -> Self {
        self.profile = Profile::Mobile;
        self
    }

    pub fn with_credentials(mut self) -> Self {
        self.with_credentials = true;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResponse {
    pub status: u16,
    pub body: String,
}

impl FetchResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// A source of HTTP GET responses.
///
/// Non-2xx statuses are returned as responses, not errors; only transport
/// failures are `Err`.
pub trait Fetcher: Send + Sync {
    fn fetch(
        &self,
        request: FetchRequest,
    ) -> impl Future<Output = Result<FetchResponse, HarvestError>> + Send;
}

/// reqwest-backed [`Fetcher`].
///
/// Holds two clients: a plain one, and a cookie-keeping one for requests that
/// forward credentials. Both are cheap to clone.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    plain: reqwest::Client,
    session: reqwest::Client,
    default_timeout: Duration,
}

impl HttpFetcher {
    pub fn new(default_timeout: Duration) -> Result<Self, HarvestError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static(LANGUAGE));
        let plain = reqwest::Client::builder()
            .default_headers(headers.clone())
            .build()?;
        let session = reqwest::Client::builder()
            .default_headers(headers)
            .cookie_store(true)
            .build()?;
        Ok(Self {
            plain,
            session,
            default_timeout,
        })
    }
}

impl Fetcher for HttpFetcher {
    #[instrument(level = "debug", skip_all, fields(url = %request.url))]
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, HarvestError> {
        let client = if request.with_credentials {
            &self.session
        } else {
            &self.plain
        };
        let ua = match request.profile {
            Profile::Desktop => DESKTOP_UA,
            Profile::Mobile => MOBILE_UA,
        };
        let accept = match request.accept {
            Accept::Html => ACCEPT_HTML,
            Accept::Json => ACCEPT_JSON,
            Accept::Feed => ACCEPT_FEED,
        };

        let mut builder = client
            .get(&request.url)
            .header(USER_AGENT, ua)
            .header(ACCEPT, accept)
            .timeout(request.timeout.unwrap_or(self.default_timeout));
        if let Some(referer) = &request.referer {
            builder = builder.header(REFERER, referer);
        }

        let t0 = Instant::now();
        let resp = builder.send().await?;
        let status = resp.status().as_u16();
        let body = resp.text().await?;
        debug!(
            status,
            bytes = body.len(),
            elapsed_ms = t0.elapsed().as_millis() as u64,
            "Fetched"
        );
        Ok(FetchResponse { status, body })
    }
}
