//! Markup fragment to plain text.
//!
//! Pure and deterministic: the output depends only on the input string.

use super::pattern::{find_elements, has_any_class, remove_elements};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};

/// Returned instead of text too short to be a real post body.
pub const NOT_FOUND: &str =
    "Post content could not be found. Please open the original post to read it.";

/// Trimmed text shorter than this is treated as a failed extraction.
pub const MIN_TEXT: usize = 50;

const IMAGE_CONTAINERS: &[&str] = &["se-module-image", "se-image", "embedded-image"];

static BLOCK_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)<(script|style|iframe)\b[^>]*>.*?</(script|style|iframe)\s*>").unwrap()
});
static IMG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)<img\b[^>]*>").unwrap());
static STYLED_SPAN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?is)<span\b[^>]*\bclass\s*=\s*["']se-fs-[^"']*["'][^>]*>(.*?)</span>"#).unwrap()
});
static PARAGRAPH_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?is)<p\b[^>]*\bclass\s*=\s*["'][^"']*se-text-paragraph[^"']*["'][^>]*>(.*?)</p>"#)
        .unwrap()
});
static BREAK_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)<br\s*/?>|</p\s*>|</div\s*>").unwrap());
static TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]*>").unwrap());
static ENTITY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"&(#[0-9]{1,7}|#[xX][0-9a-fA-F]{1,6}|[a-zA-Z]{2,8});").unwrap());
static HSPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\S\n]{2,}").unwrap());
static LINE_EDGE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\S\n]*\n[^\S\n]*").unwrap());
static NEWLINES_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());

/// Clean an HTML fragment down to readable text.
///
/// Images, frames, scripts and image modules are dropped. Editor paragraphs
/// become blank-line separated blocks, every other tag is stripped, entities
/// are decoded last and whitespace is collapsed. Anything shorter than
/// [`MIN_TEXT`] characters comes back as [`NOT_FOUND`].
///
/// Line breaks are kept as paragraph separators: runs of two or more spaces,
/// tabs or other non-newline whitespace become one space, while newline runs
/// are only capped at a single blank line.
pub fn normalize(fragment: &str) -> String {
    let html = fragment.replace("\r\n", "\n");
    let html = BLOCK_RE.replace_all(&html, "");

    let images = find_elements(&html, |name, attrs| {
        name == "div" && has_any_class(attrs, IMAGE_CONTAINERS)
    });
    let html = remove_elements(&html, &images);

    let html = IMG_RE.replace_all(&html, "");
    let html = STYLED_SPAN_RE.replace_all(&html, "$1");
    let html = PARAGRAPH_RE.replace_all(&html, "$1\n\n");
    let html = BREAK_RE.replace_all(&html, "\n");
    let text = TAG_RE.replace_all(&html, "");
    let text = decode_entities(&text);

    let text = HSPACE_RE.replace_all(&text, " ");
    let text = LINE_EDGE_RE.replace_all(&text, "\n");
    let text = NEWLINES_RE.replace_all(&text, "\n\n");
    let text = text.trim();

    if text.chars().count() < MIN_TEXT {
        NOT_FOUND.to_string()
    } else {
        text.to_string()
    }
}

/// Decode the standard named entities and numeric character references.
///
/// Single pass, so `&amp;lt;` becomes `&lt;` rather than `<`. Unknown named
/// entities are left untouched.
pub fn decode_entities(s: &str) -> String {
    ENTITY_RE
        .replace_all(s, |caps: &Captures| {
            let body = &caps[1];
            let decoded = if let Some(hex) = body.strip_prefix("#x").or(body.strip_prefix("#X")) {
                u32::from_str_radix(hex, 16).ok().and_then(char::from_u32)
            } else if let Some(dec) = body.strip_prefix('#') {
                dec.parse::<u32>().ok().and_then(char::from_u32)
            } else {
                named_entity(body)
            };
            decoded
                .map(String::from)
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

fn named_entity(name: &str) -> Option<char> {
    match name {
        "amp" => Some('&'),
        "lt" => Some('<'),
        "gt" => Some('>'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        "nbsp" => Some(' '),
        _ => None,
    }
}
