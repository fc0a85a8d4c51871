//! Small helpers for logging and file output.

use crate::error::HarvestError;
use std::fs as stdfs;
use tokio::fs;
use tracing::{info, instrument};

/// Truncate a string for logging purposes.
///
/// Cuts on a character boundary, so multi-byte text (Korean post bodies) is
/// safe to pass in.
///
/// ```ignore
/// assert_eq!(truncate_for_log("short", 100), "short");
/// assert_eq!(truncate_for_log(&"a".repeat(500), 10), "aaaaaaaaaa…(+490 bytes)");
/// ```
pub fn truncate_for_log(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let cut = s
        .char_indices()
        .map(|(i, _)| i)
        .take_while(|&i| i <= max)
        .last()
        .unwrap_or(0);
    format!("{}…(+{} bytes)", &s[..cut], s.len() - cut)
}

/// File name stem for a source id: lowercase, ASCII alphanumerics, `-` and `_`.
pub fn file_stem(id: &str) -> String {
    let stem: String = id
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '-'
            }
        })
        .collect();
    if stem.is_empty() {
        "source".to_string()
    } else {
        stem
    }
}

/// Ensure a directory exists and is writable.
///
/// Creates the directory if needed, then writes and removes a scratch file.
#[instrument(level = "info", skip_all, fields(path = %path))]
pub async fn ensure_writable_dir(path: &str) -> Result<(), HarvestError> {
    fs::create_dir_all(path).await?;
    let scratch_path = format!("{}/..__write_check__", path.trim_end_matches('/'));
    stdfs::File::create(&scratch_path)?;
    let _ = stdfs::remove_file(&scratch_path);
    info!("Output directory is writable");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_for_log_short_string() {
        assert_eq!(truncate_for_log("Hello, world!", 100), "Hello, world!");
    }

    #[test]
    fn test_truncate_for_log_long_string() {
        let s = "a".repeat(500);
        let result = truncate_for_log(&s, 100);
        assert!(result.starts_with(&"a".repeat(100)));
        assert!(result.contains("…(+400 bytes)"));
    }

    #[test]
    fn test_truncate_for_log_multibyte() {
        // Each syllable is three bytes; a cut at 4 must back off to 3.
        let result = truncate_for_log("네이버블로그", 4);
        assert_eq!(result, "네…(+15 bytes)");
    }

    #[test]
    fn test_file_stem() {
        assert_eq!(file_stem("Corner_Shop"), "corner_shop");
        assert_eq!(file_stem("shop news/2024"), "shop-news-2024");
        assert_eq!(file_stem("  "), "source");
    }

    #[tokio::test]
    async fn test_ensure_writable_dir_creates_path() {
        let dir = std::env::temp_dir().join(format!("blog_harvester_writable_{}", std::process::id()));
        let path = dir.join("nested");
        ensure_writable_dir(path.to_str().unwrap()).await.unwrap();
        assert!(path.is_dir());
        let _ = std::fs::remove_dir_all(&dir);
    }
}
