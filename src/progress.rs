//! Progress events and the cancellable sink a harvest session writes them to.
//!
//! A session emits, in order:
//!
//! ```text
//! start → blog → count → (progress, post)* → complete | error
//! ```
//!
//! After the terminal event the sink is consumed and the channel closes. Once
//! the session's [`CancellationToken`] fires, every further write is a silent
//! no-op and no terminal event is sent.

use crate::error::HarvestError;
use crate::models::HarvestedPost;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged, rename_all_fields = "camelCase")]
pub enum ProgressEvent {
    Start {
        message: String,
    },
    FeedMetadata {
        source_display_name: String,
    },
    Count {
        total: usize,
        message: String,
    },
    ItemProgress {
        current: usize,
        total: usize,
        percent: u8,
        title: String,
    },
    ItemResult(HarvestedPost),
    Complete {
        source_display_name: String,
        posts: Vec<HarvestedPost>,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        warning: Option<String>,
    },
    Error {
        message: String,
        error: String,
    },
}

impl ProgressEvent {
    /// The SSE `event:` name.
    pub fn name(&self) -> &'static str {
        match self {
            ProgressEvent::Start { .. } => "start",
            ProgressEvent::FeedMetadata { .. } => "blog",
            ProgressEvent::Count { .. } => "count",
            ProgressEvent::ItemProgress { .. } => "progress",
            ProgressEvent::ItemResult(_) => "post",
            ProgressEvent::Complete { .. } => "complete",
            ProgressEvent::Error { .. } => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ProgressEvent::Complete { .. } | ProgressEvent::Error { .. })
    }

    /// Progress for item `current` (1-based) of `total`, percent rounded to
    /// the nearest integer.
    pub fn item_progress(current: usize, total: usize, title: &str) -> Self {
        let percent = if total == 0 {
            100
        } else {
            ((current * 100 + total / 2) / total).min(100) as u8
        };
        ProgressEvent::ItemProgress {
            current,
            total,
            percent,
            title: title.to_string(),
        }
    }

    /// One `text/event-stream` frame.
    pub fn sse_frame(&self) -> Result<String, HarvestError> {
        let data = serde_json::to_string(self)?;
        Ok(format!("event: {}\ndata: {}\n\n", self.name(), data))
    }
}

/// Write side of a session's progress channel.
///
/// Not `Clone`: a session owns exactly one sink and releases it through
/// [`finish`](Self::finish).
#[derive(Debug)]
pub struct ProgressSink {
    tx: Option<mpsc::Sender<ProgressEvent>>,
    cancel: CancellationToken,
}

impl ProgressSink {
    pub fn new(tx: mpsc::Sender<ProgressEvent>, cancel: CancellationToken) -> Self {
        Self {
            tx: Some(tx),
            cancel,
        }
    }

    /// A bounded channel and the sink feeding it.
    pub fn channel(
        capacity: usize,
        cancel: CancellationToken,
    ) -> (Self, mpsc::Receiver<ProgressEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::new(tx, cancel), rx)
    }

    /// A sink with no receiver, for non-streaming harvests.
    pub fn detached(cancel: CancellationToken) -> Self {
        Self { tx: None, cancel }
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Send `event` unless the session is cancelled.
    ///
    /// A closed receiver cancels the session; later writes are dropped.
    pub async fn emit(&mut self, event: ProgressEvent) {
        if self.cancel.is_cancelled() {
            return;
        }
        let Some(tx) = self.tx.as_ref() else {
            return;
        };
        let name = event.name();
        let sent = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return,
            res = tx.send(event) => res,
        };
        if sent.is_err() {
            warn!(event = name, "Progress receiver dropped; cancelling session");
            self.tx = None;
            self.cancel.cancel();
        }
    }

    /// Emit the terminal event (if any) and close the channel.
    pub async fn finish(mut self, terminal: Option<ProgressEvent>) {
        if let Some(event) = terminal {
            debug_assert!(event.is_terminal());
            debug!(event = event.name(), "Closing progress channel");
            self.emit(event).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn post() -> HarvestedPost {
        HarvestedPost {
            id: "shop-223000000001".into(),
            source_id: "shop".into(),
            title: "Big Sale Today".into(),
            post_url: "https://blog.naver.com/shop/223000000001".into(),
            published_at: NaiveDate::from_ymd_opt(2024, 1, 1),
            content: "body".into(),
        }
    }

    #[test]
    fn test_wire_names_and_payloads() {
        let ev = ProgressEvent::item_progress(2, 4, "Launch Event");
        assert_eq!(ev.name(), "progress");
        let v = serde_json::to_value(&ev).unwrap();
        assert_eq!(v["current"], 2);
        assert_eq!(v["percent"], 50);
        assert_eq!(v["title"], "Launch Event");

        let blog = ProgressEvent::FeedMetadata {
            source_display_name: "Shop".into(),
        };
        assert_eq!(serde_json::to_value(&blog).unwrap()["sourceDisplayName"], "Shop");

        let v = serde_json::to_value(ProgressEvent::ItemResult(post())).unwrap();
        assert_eq!(v["postUrl"], "https://blog.naver.com/shop/223000000001");
        assert_eq!(v["date"], "2024-01-01");
    }

    #[test]
    fn test_item_percent_rounds_to_nearest() {
        let percent = |current, total| match ProgressEvent::item_progress(current, total, "t") {
            ProgressEvent::ItemProgress { percent, .. } => percent,
            _ => unreachable!(),
        };
        assert_eq!(percent(1, 3), 33);
        assert_eq!(percent(2, 3), 67);
        assert_eq!(percent(1, 8), 13);
        assert_eq!(percent(3, 3), 100);
        assert_eq!(percent(0, 0), 100);
    }

    #[test]
    fn test_complete_omits_missing_fields() {
        let ev = ProgressEvent::Complete {
            source_display_name: "Shop".into(),
            posts: vec![],
            message: None,
            warning: Some("feed missing".into()),
        };
        let v = serde_json::to_value(&ev).unwrap();
        assert!(v.get("message").is_none());
        assert_eq!(v["warning"], "feed missing");
        assert!(ev.is_terminal());
    }

    #[test]
    fn test_sse_frame_layout() {
        let frame = ProgressEvent::Start {
            message: "go".into(),
        }
        .sse_frame()
        .unwrap();
        assert_eq!(frame, "event: start\ndata: {\"message\":\"go\"}\n\n");
    }

    #[tokio::test]
    async fn test_emit_is_silent_after_cancel() {
        let cancel = CancellationToken::new();
        let (mut sink, mut rx) = ProgressSink::channel(4, cancel.clone());
        sink.emit(ProgressEvent::Start { message: "a".into() }).await;
        cancel.cancel();
        sink.emit(ProgressEvent::Start { message: "b".into() }).await;
        sink.finish(Some(ProgressEvent::Error {
            message: "x".into(),
            error: "y".into(),
        }))
        .await;

        assert_eq!(rx.recv().await.map(|e| e.name()), Some("start"));
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_dropped_receiver_cancels_session() {
        let cancel = CancellationToken::new();
        let (mut sink, rx) = ProgressSink::channel(4, cancel.clone());
        drop(rx);
        sink.emit(ProgressEvent::Start { message: "a".into() }).await;
        assert!(cancel.is_cancelled());
    }
}
