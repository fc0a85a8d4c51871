//! Markup-scanning extractor.
//!
//! Works on raw markup without building a tree. Element extents are found by
//! counting nested open/close tags of the same name, so an element here spans
//! exactly what the tree engine would see, not the first closing tag after it.

use super::normalize::decode_entities;
use super::{
    CODE_MODULE, Collector, IMAGE_MODULE, MAIN_CONTAINER, MIN_MODULE_TEXT, MODULE,
    QUOTATION_MODULE, RULE_MODULE, TABLE_MODULE, TEXT_PARAGRAPH, char_len,
};
use once_cell::sync::Lazy;
use regex::Regex;

static TAG_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<(/?)([A-Za-z][A-Za-z0-9]*)([^>]*)>").unwrap());
static CLASS_ATTR_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)(?:^|\s)class\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'>]+))"#).unwrap()
});
static STRIP_TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]*>").unwrap());
static SCRIPT_STYLE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<(script|style)\b[^>]*>.*?</(script|style)\s*>").unwrap());

/// JS string literal in either quote style, escapes allowed.
const JS_STRING: &str = r#"(?:'((?:\\.|[^'\\])*)'|"((?:\\.|[^"\\])*)")"#;

/// Inline script assignments known to carry the post body, in lookup order.
static SCRIPT_VARIABLES: Lazy<Vec<(&'static str, Regex)>> = Lazy::new(|| {
    [
        ("postContent", format!(r"(?s)var\s+postContent\s*=\s*{JS_STRING}")),
        ("htmlContent", format!(r"(?s)var\s+htmlContent\s*=\s*{JS_STRING}")),
        ("bloggermain", format!(r"(?s)var\s+bloggermain\s*=\s*{JS_STRING}")),
        ("g_PostViewBody", format!(r"(?s)g_PostViewBody\s*=\s*{JS_STRING}")),
        ("se_publishContent", format!(r"(?s)const\s+se_publishContent\s*=\s*{JS_STRING}")),
        ("htContentBody", format!(r"(?s)'htContentBody'\s*:\s*{JS_STRING}")),
    ]
    .into_iter()
    .filter_map(|(name, re)| Regex::new(&re).ok().map(|re| (name, re)))
    .collect()
});

/// Byte offsets of one element inside the scanned markup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Element {
    pub start: usize,
    pub inner_start: usize,
    pub inner_end: usize,
    pub end: usize,
}

impl Element {
    pub fn inner<'a>(&self, html: &'a str) -> &'a str {
        &html[self.inner_start..self.inner_end]
    }

    pub fn contains(&self, other: &Element) -> bool {
        self.start < other.start && other.end <= self.end
    }
}

/// Every element whose opening tag satisfies `pred(name, attrs)`, in document order.
///
/// `name` is lowercased. Nested matches are all returned.
pub(crate) fn find_elements<F>(html: &str, pred: F) -> Vec<Element>
where
    F: Fn(&str, &str) -> bool,
{
    let mut found = Vec::new();
    for caps in TAG_RE.captures_iter(html) {
        let Some(open) = caps.get(0) else { continue };
        if !caps[1].is_empty() {
            continue;
        }
        let name = caps[2].to_ascii_lowercase();
        let attrs = &caps[3];
        if !pred(&name, attrs) {
            continue;
        }
        if attrs.trim_end().ends_with('/') {
            found.push(Element {
                start: open.start(),
                inner_start: open.end(),
                inner_end: open.end(),
                end: open.end(),
            });
            continue;
        }
        found.push(close_element(html, &name, open.start(), open.end()));
    }
    found
}

fn close_element(html: &str, name: &str, start: usize, open_end: usize) -> Element {
    let rest = &html[open_end..];
    let mut depth = 1usize;
    for caps in TAG_RE.captures_iter(rest) {
        if !caps[2].eq_ignore_ascii_case(name) {
            continue;
        }
        let Some(tag) = caps.get(0) else { continue };
        if caps[1].is_empty() {
            if !caps[3].trim_end().ends_with('/') {
                depth += 1;
            }
            continue;
        }
        depth -= 1;
        if depth == 0 {
            return Element {
                start,
                inner_start: open_end,
                inner_end: open_end + tag.start(),
                end: open_end + tag.end(),
            };
        }
    }
    // Unclosed: runs to the end of the input, as a lenient parser would.
    Element {
        start,
        inner_start: open_end,
        inner_end: html.len(),
        end: html.len(),
    }
}

/// Cut the outermost of `elements` out of `html`.
pub(crate) fn remove_elements(html: &str, elements: &[Element]) -> String {
    let mut out = String::with_capacity(html.len());
    let mut cursor = 0;
    for el in elements {
        if el.start < cursor {
            continue;
        }
        out.push_str(&html[cursor..el.start]);
        cursor = el.end;
    }
    out.push_str(&html[cursor..]);
    out
}

fn class_value(attrs: &str) -> Option<&str> {
    let caps = CLASS_ATTR_RE.captures(attrs)?;
    caps.get(1)
        .or_else(|| caps.get(2))
        .or_else(|| caps.get(3))
        .map(|m| m.as_str())
}

pub(crate) fn has_class(attrs: &str, class: &str) -> bool {
    class_value(attrs).is_some_and(|v| v.split_whitespace().any(|c| c == class))
}

pub(crate) fn has_any_class(attrs: &str, classes: &[&str]) -> bool {
    class_value(attrs).is_some_and(|v| v.split_whitespace().any(|c| classes.contains(&c)))
}

fn text_of(fragment: &str) -> String {
    decode_entities(&STRIP_TAG_RE.replace_all(fragment, ""))
        .trim()
        .to_string()
}

fn by_class(html: &str, class: &str) -> Vec<Element> {
    find_elements(html, |_, attrs| has_class(attrs, class))
}

fn table_text(html: &str, table: &Element) -> String {
    let inner = table.inner(html);
    find_elements(inner, |name, _| name == "td" || name == "th")
        .iter()
        .map(|cell| text_of(cell.inner(inner)))
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Main-container text by markup scanning. Empty when there is no container.
pub fn extract_main_content(html: &str) -> String {
    let html = SCRIPT_STYLE_RE.replace_all(html, "");
    let Some(container) = by_class(&html, MAIN_CONTAINER).into_iter().next() else {
        return String::new();
    };
    let body = container.inner(&html);

    let quotes = by_class(body, QUOTATION_MODULE);
    let codes = by_class(body, CODE_MODULE);
    let tables = by_class(body, TABLE_MODULE);
    let rules = by_class(body, RULE_MODULE);
    let in_block_module =
        |el: &Element| quotes.iter().chain(&codes).chain(&tables).any(|m| m.contains(el));

    let paragraphs: Vec<Element> = by_class(body, TEXT_PARAGRAPH)
        .into_iter()
        .filter(|p| !in_block_module(p))
        .collect();

    let mut out = Collector::default();
    out.paragraphs(paragraphs.iter().map(|p| text_of(p.inner(body))));
    for quote in &quotes {
        out.block(&text_of(quote.inner(body)));
    }
    for code in &codes {
        out.block(&text_of(code.inner(body)));
    }
    for table in &tables {
        out.block(&table_text(body, table));
    }
    for _ in &rules {
        out.rule();
    }

    if out.is_short() {
        let collected: Vec<&Element> = paragraphs
            .iter()
            .chain(&quotes)
            .chain(&codes)
            .chain(&tables)
            .chain(&rules)
            .collect();
        let already_collected =
            |m: &Element| collected.iter().any(|c| c.start == m.start || m.contains(c));
        let modules: Vec<Element> = find_elements(body, |_, attrs| {
            has_class(attrs, MODULE) && !has_class(attrs, IMAGE_MODULE)
        });
        for (i, module) in modules.iter().enumerate() {
            if already_collected(module)
                || modules[..i].iter().any(|outer| outer.contains(module))
            {
                continue;
            }
            let text = text_of(module.inner(body));
            if char_len(&text) > MIN_MODULE_TEXT {
                out.block(&text);
            }
        }
    }

    if out.is_short() {
        let flat = text_of(body).split_whitespace().collect::<Vec<_>>().join(" ");
        out.replace_if_longer(flat);
    }

    out.finish()
}

/// Raw (still escaped) value of a named inline script variable.
pub fn script_variable(html: &str, name: &str) -> Option<String> {
    SCRIPT_VARIABLES
        .iter()
        .find(|(n, _)| *n == name)
        .and_then(|(_, re)| capture_js_string(re, html))
}

/// First known script variable carrying a non-empty value.
pub fn script_content(html: &str) -> Option<String> {
    SCRIPT_VARIABLES
        .iter()
        .find_map(|(_, re)| capture_js_string(re, html))
}

fn capture_js_string(re: &Regex, html: &str) -> Option<String> {
    let caps = re.captures(html)?;
    caps.get(1)
        .or_else(|| caps.get(2))
        .map(|m| m.as_str().to_string())
        .filter(|s| !s.trim().is_empty())
}

/// Undo JS string escaping: quotes, backslashes, `\n`, `\t`, `\/` and `\uXXXX`.
pub fn unescape_js(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => {}
            Some('u') => {
                let hex: String = chars.by_ref().take(4).collect();
                match u32::from_str_radix(&hex, 16).ok().and_then(char::from_u32) {
                    Some(decoded) => out.push(decoded),
                    None => {
                        out.push_str("\\u");
                        out.push_str(&hex);
                    }
                }
            }
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}
