//! Locating a single post's body on the platform.
//!
//! - [`client`]: the [`Fetcher`](client::Fetcher) seam and its reqwest implementation
//! - [`chain`]: the ordered strategy chain that tries each endpoint shape in turn
//!
//! A post is identified by its [`PostHandle`], which every accepted URL shape
//! (desktop path, mobile path, `blogId`/`logNo` query) maps onto.

pub mod chain;
pub mod client;
#[cfg(test)]
pub mod testing;

pub use chain::RetrievalChain;
pub use client::{FetchRequest, FetchResponse, Fetcher, HttpFetcher};

use url::Url;

/// Marker carried by placeholder entry URLs synthesized in degraded mode.
pub const PLACEHOLDER_MARKER: &str = "#dummy-";

/// Body used for placeholder entries; never fetched.
pub const PLACEHOLDER_CONTENT: &str = "This blog does not publish an RSS feed, so this entry is a \
    placeholder rather than a real post. Visit the blog to read its posts, or enable the RSS feed \
    in the blog settings to make harvesting possible.";

/// The `(blogId, logNo)` pair naming one post.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostHandle {
    pub blog_id: String,
    pub log_no: String,
}

impl PostHandle {
    /// Derive the handle from any supported post URL shape.
    ///
    /// Query parameters win over the path. Feed tracking parameters and
    /// fragments are ignored.
    pub fn parse(post_url: &str) -> Option<Self> {
        let url = Url::parse(post_url.trim()).ok()?;
        let query = |key: &str| {
            url.query_pairs()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        if let (Some(blog_id), Some(log_no)) = (query("blogId"), query("logNo")) {
            return Some(Self { blog_id, log_no });
        }

        let segments: Vec<&str> = url.path_segments()?.filter(|s| !s.is_empty()).collect();
        match segments.as_slice() {
            [blog, no, ..] if !blog.contains('.') && no.chars().all(|c| c.is_ascii_digit()) => {
                Some(Self {
                    blog_id: blog.to_string(),
                    log_no: no.to_string(),
                })
            }
            _ => None,
        }
    }
}

pub fn is_placeholder(post_url: &str) -> bool {
    post_url.contains(PLACEHOLDER_MARKER)
}

/// Message stored as content when every strategy failed.
pub fn failure_message(post_url: &str) -> String {
    format!(
        "The post body could not be retrieved from any known endpoint. \
         Open the original post to read it: {post_url}"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(blog: &str, no: &str) -> Option<PostHandle> {
        Some(PostHandle {
            blog_id: blog.into(),
            log_no: no.into(),
        })
    }

    #[test]
    fn test_handle_from_all_shapes() {
        let expected = handle("shop_blog", "223456789012");
        for url in [
            "https://blog.naver.com/shop_blog/223456789012",
            "https://blog.naver.com/shop_blog/223456789012?fromRss=true&trackingCode=rss",
            "https://m.blog.naver.com/shop_blog/223456789012",
            "https://blog.naver.com/PostView.naver?blogId=shop_blog&logNo=223456789012",
            "https://m.blog.naver.com/PostView.naver?blogId=shop_blog&logNo=223456789012&navType=tl",
        ] {
            assert_eq!(PostHandle::parse(url), expected, "{url}");
        }
    }

    #[test]
    fn test_handle_rejects_non_posts() {
        for url in [
            "https://blog.naver.com/shop_blog",
            "https://blog.naver.com/PostView.naver?blogId=shop_blog",
            "https://blog.naver.com/shop_blog/about",
            "not a url",
        ] {
            assert_eq!(PostHandle::parse(url), None, "{url}");
        }
    }

    #[test]
    fn test_placeholder_and_failure_text() {
        assert!(is_placeholder("https://blog.naver.com/abc#dummy-3"));
        assert!(!is_placeholder("https://blog.naver.com/abc/1"));
        assert!(failure_message("https://blog.naver.com/abc/1").ends_with("https://blog.naver.com/abc/1"));
    }
}
