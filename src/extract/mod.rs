//! Turning fetched markup into plain post text.
//!
//! Blog posts are rendered by at least two generations of the platform's
//! editor, so there is no single reliable selector. Extraction is layered:
//!
//! | Layer | Module | Used when |
//! |-------|--------|-----------|
//! | Structural | [`structural`] | Always tried first on a main content container |
//! | Pattern | [`pattern`] | Structural result under [`MIN_MAIN_CONTENT`] chars |
//! | Legacy containers | this module | No usable main container |
//! | Script variables | [`pattern`] | Body only present inside inline JS |
//! | Broad fallback | this module | `article` / `main` / `body` |
//!
//! Every path ends in [`normalize::normalize`], so callers only ever see clean
//! text or the [`normalize::NOT_FOUND`] sentinel.

pub mod normalize;
pub mod pattern;
pub mod structural;

pub use normalize::{NOT_FOUND, normalize};

use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};
use tracing::debug;

/// Class marking the editor's main content container.
pub const MAIN_CONTAINER: &str = "se-main-container";
pub const TEXT_PARAGRAPH: &str = "se-text-paragraph";
pub const QUOTATION_MODULE: &str = "se-module-quotation";
pub const CODE_MODULE: &str = "se-module-code";
pub const TABLE_MODULE: &str = "se-module-table";
pub const RULE_MODULE: &str = "se-module-horizontalLine";
pub const MODULE: &str = "se-module";
pub const IMAGE_MODULE: &str = "se-module-image";

/// Below this many characters the collected text escalates to the next source.
pub const MIN_MAIN_CONTENT: usize = 100;
/// Modules shorter than this are ignored during escalation.
pub const MIN_MODULE_TEXT: usize = 10;
/// Inner markup a legacy container must exceed to be trusted.
pub const MIN_LEGACY_MARKUP: usize = 200;
/// Inner markup a broad `article`/`main`/`body` fallback must exceed.
pub const MIN_FALLBACK_MARKUP: usize = 500;

pub const RULE_SEPARATOR: &str = "----------";

/// Desktop-era containers, tried in order after the main container.
const LEGACY_CONTAINERS: &[&str] = &[
    "#postViewArea",
    "div.se_component_wrap",
    "div.post_ct",
    "#viewTypeSelector",
    "#contentArea",
    "div.post-view",
    "div.post_body",
    "div.post-content",
    "div.postContent",
    "div.se_view",
    "div.article_body",
    "div.se_component_htmlCode",
    "div.__se_module_data",
    "div.se3-txtrow",
    "#postListBody",
];

const MOBILE_CONTAINERS: &[&str] = &[
    "div.se_component_wrap",
    "div.viewer_mainMobile",
    "#viewTypeSelector",
    "div.post_ct",
    "div.post_content",
    "div.post_body",
];

const FALLBACK_REGIONS: &[&str] = &["article", "main", "body"];

static LEGACY_SELECTORS: Lazy<Vec<Selector>> = Lazy::new(|| compile(LEGACY_CONTAINERS));
static MOBILE_SELECTORS: Lazy<Vec<Selector>> = Lazy::new(|| compile(MOBILE_CONTAINERS));
static FALLBACK_SELECTORS: Lazy<Vec<Selector>> = Lazy::new(|| compile(FALLBACK_REGIONS));
static MAIN_FRAME: Lazy<Selector> =
    Lazy::new(|| Selector::parse("iframe#mainFrame, frame#mainFrame").unwrap());
static CHROME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)<(header|nav|footer|script|style)\b[^>]*>.*?</(header|nav|footer|script|style)>")
        .unwrap()
});

fn compile(selectors: &[&str]) -> Vec<Selector> {
    selectors
        .iter()
        .filter_map(|s| Selector::parse(s).ok())
        .collect()
}

pub(crate) fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Accumulates collected module text in the layout both engines share.
#[derive(Debug, Default)]
pub(crate) struct Collector {
    text: String,
}

impl Collector {
    /// Paragraph texts, trimmed and joined by blank lines.
    pub fn paragraphs<I: IntoIterator<Item = String>>(&mut self, texts: I) {
        let joined = texts
            .into_iter()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join("\n\n");
        self.text.push_str(&joined);
    }

    /// A standalone block wrapped in blank lines.
    pub fn block(&mut self, text: &str) {
        let text = text.trim();
        if !text.is_empty() {
            self.text.push_str("\n\n");
            self.text.push_str(text);
            self.text.push_str("\n\n");
        }
    }

    pub fn rule(&mut self) {
        self.text.push_str("\n\n");
        self.text.push_str(RULE_SEPARATOR);
        self.text.push_str("\n\n");
    }

    pub fn is_short(&self) -> bool {
        char_len(&self.text) < MIN_MAIN_CONTENT
    }

    /// Last-resort replacement with the container's flattened text.
    pub fn replace_if_longer(&mut self, text: String) {
        if char_len(&text) > char_len(&self.text) {
            self.text = text;
        }
    }

    pub fn finish(self) -> String {
        self.text.trim().to_string()
    }
}

/// Main-container text: structural engine first, pattern engine when that
/// comes back short. Empty when neither engine finds a container.
pub fn extract_main_content(html: &str) -> String {
    let structural = structural::extract_main_content(html);
    if char_len(&structural) >= MIN_MAIN_CONTENT {
        return structural;
    }
    let scanned = pattern::extract_main_content(html);
    debug!(
        structural = char_len(&structural),
        pattern = char_len(&scanned),
        "Structural extraction short; compared with pattern engine"
    );
    if char_len(&scanned) > char_len(&structural) {
        scanned
    } else {
        structural
    }
}

fn main_content_normalized(html: &str) -> Option<String> {
    if !html.contains(MAIN_CONTAINER) {
        return None;
    }
    let text = extract_main_content(html);
    if text.is_empty() {
        return None;
    }
    Some(normalize(&text)).filter(|t| t != NOT_FOUND)
}

fn first_container(html: &str, selectors: &[Selector], min_markup: usize) -> Option<String> {
    let doc = Html::parse_document(html);
    selectors.iter().find_map(|sel| {
        doc.select(sel)
            .map(|el| el.inner_html())
            .find(|inner| inner.len() > min_markup)
            .map(|inner| normalize(&inner))
            .filter(|t| t != NOT_FOUND)
    })
}

/// Extraction for a body fragment delivered outside a full page, such as a
/// JSON field or a script variable.
pub fn extract_fragment(html: &str) -> String {
    main_content_normalized(html).unwrap_or_else(|| normalize(html))
}

fn from_script_variables(html: &str) -> Option<String> {
    let raw = pattern::script_content(html)?;
    let decoded = normalize::decode_entities(&pattern::unescape_js(&raw));
    Some(extract_fragment(&decoded)).filter(|t| t != NOT_FOUND)
}

fn from_broad_regions(html: &str) -> Option<String> {
    let doc = Html::parse_document(html);
    FALLBACK_SELECTORS.iter().find_map(|sel| {
        let inner = doc.select(sel).next()?.inner_html();
        if inner.len() <= MIN_FALLBACK_MARKUP {
            return None;
        }
        let cleaned = CHROME_RE.replace_all(&inner, "");
        Some(extract_fragment(&cleaned)).filter(|t| t != NOT_FOUND)
    })
}

/// Full document-level extraction used by the retrieval chain.
///
/// Returns normalized text or [`NOT_FOUND`].
pub fn extract_post_body(html: &str) -> String {
    if let Some(text) = main_content_normalized(html) {
        debug!("Body found in main container");
        return text;
    }
    if let Some(text) = first_container(html, &LEGACY_SELECTORS, MIN_LEGACY_MARKUP) {
        debug!("Body found in legacy container");
        return text;
    }
    if let Some(text) = from_script_variables(html) {
        debug!("Body found in inline script variable");
        return text;
    }
    if let Some(text) = from_broad_regions(html) {
        debug!("Body found in broad page region");
        return text;
    }
    NOT_FOUND.to_string()
}

/// Extraction tuned for the mobile page layout.
pub fn extract_mobile_body(html: &str) -> String {
    if let Some(text) = main_content_normalized(html) {
        return text;
    }
    if let Some(raw) = pattern::script_variable(html, "htmlContent") {
        let text = extract_fragment(&normalize::decode_entities(&pattern::unescape_js(&raw)));
        if text != NOT_FOUND {
            return text;
        }
    }
    if let Some(text) = first_container(html, &MOBILE_SELECTORS, MIN_MAIN_CONTENT) {
        return text;
    }
    extract_post_body(html)
}

/// `src` of the desktop page's `mainFrame` iframe, if the page is a frameset shell.
pub fn find_embedded_frame(html: &str) -> Option<String> {
    let doc = Html::parse_document(html);
    doc.select(&MAIN_FRAME)
        .filter_map(|el| el.value().attr("src"))
        .map(|src| src.trim().to_string())
        .find(|src| !src.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    const LONG: &str = "The spring collection arrives next week with new colours, \
        lighter fabrics and a handful of pieces designed with our readers.";

    #[test]
    fn test_post_body_from_main_container() {
        let html = format!(
            r#"<html><body><div class="se-main-container">
            <div class="se-module se-module-text"><p class="se-text-paragraph"><span class="se-fs-fs16">{LONG}</span></p></div>
            </div></body></html>"#
        );
        assert_eq!(extract_post_body(&html), LONG);
    }

    #[test]
    fn test_post_body_from_legacy_container() {
        let html = format!(
            r#"<html><body><div id="postViewArea"><p>{LONG}</p><p>{LONG}</p></div></body></html>"#
        );
        let text = extract_post_body(&html);
        assert!(text.starts_with("The spring collection"));
        assert_ne!(text, NOT_FOUND);
    }

    #[test]
    fn test_post_body_from_script_variable() {
        let inner = format!(
            r#"<div class=\"se-main-container\"><p class=\"se-text-paragraph\">{LONG} It&#39;s here.</p></div>"#
        );
        let html = format!(
            "<html><head><script>var postContent = \"{inner}\";</script></head><body></body></html>"
        );
        let text = extract_post_body(&html);
        assert!(text.contains("It's here."), "{text}");
        assert!(!text.contains("se-main-container"));
    }

    #[test]
    fn test_post_body_from_article_region() {
        let html = format!(
            "<html><body><header>Site menu</header><article><p>{LONG}</p><p>{LONG}</p><p>{LONG}</p><p>{LONG}</p></article></body></html>"
        );
        let text = extract_post_body(&html);
        assert!(text.starts_with("The spring collection"));
        assert!(!text.contains("Site menu"));
    }

    #[test]
    fn test_post_body_not_found_for_empty_page() {
        assert_eq!(
            extract_post_body("<html><body><p>hi</p></body></html>"),
            NOT_FOUND
        );
    }

    #[test]
    fn test_mobile_body_from_viewer_container() {
        let html = format!(
            r#"<html><body><div class="viewer_mainMobile"><p>{LONG}</p></div></body></html>"#
        );
        assert_eq!(extract_mobile_body(&html), LONG);
    }

    #[test]
    fn test_find_embedded_frame() {
        let html = r#"<html><body><iframe id="mainFrame" src="/PostView.naver?blogId=a&amp;logNo=1"></iframe></body></html>"#;
        assert_eq!(
            find_embedded_frame(html).as_deref(),
            Some("/PostView.naver?blogId=a&logNo=1")
        );
        assert!(find_embedded_frame("<html></html>").is_none());
    }

    #[test]
    fn test_collector_layout() {
        let mut c = Collector::default();
        c.paragraphs(vec!["  one ".to_string(), "".to_string(), "two".to_string()]);
        c.block("quote");
        c.rule();
        assert_eq!(c.finish(), "one\n\ntwo\n\nquote\n\n\n\n----------");
    }
}
