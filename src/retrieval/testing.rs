//! In-memory [`Fetcher`] for tests.

use super::client::{FetchRequest, FetchResponse, Fetcher};
use crate::error::HarvestError;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone)]
struct Route {
    needle: String,
    status: u16,
    body: String,
    fails: bool,
}

/// Answers from a list of `(url substring, status, body)` routes.
///
/// The first route whose needle occurs in the URL wins; anything unmatched is
/// a 404. Every requested URL is recorded in order.
#[derive(Debug, Clone, Default)]
pub struct ScriptedFetcher {
    routes: Arc<Vec<Route>>,
    log: Arc<Mutex<Vec<String>>>,
    delay: Duration,
}

impl ScriptedFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(mut self, needle: &str, status: u16, body: impl Into<String>) -> Self {
        Arc::make_mut(&mut self.routes).push(Route {
            needle: needle.to_string(),
            status,
            body: body.into(),
            fails: false,
        });
        self
    }

    /// Fail requests matching `needle` at the transport level.
    pub fn fail(mut self, needle: &str) -> Self {
        Arc::make_mut(&mut self.routes).push(Route {
            needle: needle.to_string(),
            status: 0,
            body: String::new(),
            fails: true,
        });
        self
    }

    /// Delay every response, simulating a slow upstream.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn requested(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    pub fn requested_matching(&self, needle: &str) -> usize {
        self.requested().iter().filter(|u| u.contains(needle)).count()
    }
}

impl Fetcher for ScriptedFetcher {
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, HarvestError> {
        self.log.lock().unwrap().push(request.url.clone());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let Some(route) = self.routes.iter().find(|r| request.url.contains(&r.needle)) else {
            return Ok(FetchResponse {
                status: 404,
                body: String::new(),
            });
        };
        if route.fails {
            return Err(HarvestError::UpstreamStatus {
                url: request.url,
                status: 0,
            });
        }
        Ok(FetchResponse {
            status: route.status,
            body: route.body.clone(),
        })
    }
}
