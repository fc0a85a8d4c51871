//! Error taxonomy for the harvest pipeline.
//!
//! Only a few of these ever reach a caller. Per-item retrieval failures are
//! folded into sentinel content, and cancellation ends a session silently.
//! The rest surface from feed fetching, configuration loading and the
//! output writers.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum HarvestError {
    /// Rejected user input, caught before any network call.
    #[error("invalid input: {0}")]
    Validation(String),

    /// The feed endpoint answered with a "gone" class status.
    #[error("feed unavailable at {url} (status {status})")]
    FeedUnavailable { url: String, status: u16 },

    #[error("all retrieval strategies failed for {0}")]
    RetrievalExhausted(String),

    #[error("harvest cancelled")]
    TransportAborted,

    #[error("unexpected status {status} from {url}")]
    UpstreamStatus { url: String, status: u16 },

    #[error("feed could not be parsed: {0}")]
    FeedParse(String),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("config: {0}")]
    Config(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl HarvestError {
    /// Whether repeating the same request could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            HarvestError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            HarvestError::UpstreamStatus { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_statuses() {
        let busy = HarvestError::UpstreamStatus {
            url: "https://rss.blog.naver.com/x".into(),
            status: 503,
        };
        let throttled = HarvestError::UpstreamStatus {
            url: "https://rss.blog.naver.com/x".into(),
            status: 429,
        };
        let forbidden = HarvestError::UpstreamStatus {
            url: "https://rss.blog.naver.com/x".into(),
            status: 403,
        };
        assert!(busy.is_retryable());
        assert!(throttled.is_retryable());
        assert!(!forbidden.is_retryable());
        assert!(!HarvestError::TransportAborted.is_retryable());
    }

    #[test]
    fn test_feed_unavailable_message() {
        let e = HarvestError::FeedUnavailable {
            url: "https://rss.blog.naver.com/x".into(),
            status: 404,
        };
        assert_eq!(
            e.to_string(),
            "feed unavailable at https://rss.blog.naver.com/x (status 404)"
        );
    }
}
