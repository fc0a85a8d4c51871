//! Tree-query extractor built on `scraper`.

use super::{
    CODE_MODULE, Collector, IMAGE_MODULE, MAIN_CONTAINER, MIN_MODULE_TEXT, MODULE,
    QUOTATION_MODULE, RULE_MODULE, TABLE_MODULE, TEXT_PARAGRAPH, char_len,
};
use once_cell::sync::Lazy;
use scraper::{ElementRef, Html, Selector};

fn class_selector(class: &str) -> Selector {
    Selector::parse(&format!(".{class}")).unwrap()
}

static CONTAINER: Lazy<Selector> = Lazy::new(|| class_selector(MAIN_CONTAINER));
static PARAGRAPH: Lazy<Selector> = Lazy::new(|| class_selector(TEXT_PARAGRAPH));
static QUOTATION: Lazy<Selector> = Lazy::new(|| class_selector(QUOTATION_MODULE));
static CODE: Lazy<Selector> = Lazy::new(|| class_selector(CODE_MODULE));
static TABLE: Lazy<Selector> = Lazy::new(|| class_selector(TABLE_MODULE));
static RULE: Lazy<Selector> = Lazy::new(|| class_selector(RULE_MODULE));
static ANY_MODULE: Lazy<Selector> = Lazy::new(|| class_selector(MODULE));
static CELL: Lazy<Selector> = Lazy::new(|| Selector::parse("td, th").unwrap());

const BLOCK_MODULES: &[&str] = &[QUOTATION_MODULE, CODE_MODULE, TABLE_MODULE];

fn has_class(el: &ElementRef<'_>, class: &str) -> bool {
    el.value().classes().any(|c| c == class)
}

fn text(el: &ElementRef<'_>) -> String {
    el.text().collect::<String>().trim().to_string()
}

fn inside_block_module(el: &ElementRef<'_>) -> bool {
    el.ancestors()
        .filter_map(ElementRef::wrap)
        .any(|a| BLOCK_MODULES.iter().any(|m| has_class(&a, m)))
}

/// Main-container text via tree queries. Empty when there is no container.
pub fn extract_main_content(html: &str) -> String {
    let doc = Html::parse_document(html);
    let Some(container) = doc.select(&CONTAINER).next() else {
        return String::new();
    };

    let paragraphs: Vec<ElementRef<'_>> = container
        .select(&PARAGRAPH)
        .filter(|p| !inside_block_module(p))
        .collect();
    // Nodes whose text is already in the output; escalation must not repeat them.
    let mut collected: Vec<_> = paragraphs.iter().map(|p| p.id()).collect();

    let mut out = Collector::default();
    out.paragraphs(paragraphs.iter().map(text));
    for quote in container.select(&QUOTATION) {
        collected.push(quote.id());
        out.block(&text(&quote));
    }
    for code in container.select(&CODE) {
        collected.push(code.id());
        out.block(&text(&code));
    }
    for table in container.select(&TABLE) {
        collected.push(table.id());
        let cells = table
            .select(&CELL)
            .map(|cell| text(&cell))
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        out.block(&cells);
    }
    for rule in container.select(&RULE) {
        collected.push(rule.id());
        out.rule();
    }

    if out.is_short() {
        let modules: Vec<ElementRef<'_>> = container
            .select(&ANY_MODULE)
            .filter(|m| !has_class(m, IMAGE_MODULE))
            .filter(|m| !m.descendants().any(|n| collected.contains(&n.id())))
            .collect();
        for module in &modules {
            let nested = module
                .ancestors()
                .filter_map(ElementRef::wrap)
                .any(|a| modules.iter().any(|m| m.id() == a.id()));
            if nested {
                continue;
            }
            let t = text(module);
            if char_len(&t) > MIN_MODULE_TEXT {
                out.block(&t);
            }
        }
    }

    if out.is_short() {
        let flat = container
            .text()
            .collect::<String>()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ");
        out.replace_if_longer(flat);
    }

    out.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quotation_only_container() {
        let html = r#"<html><body><div class="se-main-container">
            <div class="se-component se-quotation"><div class="se-module se-module-quotation">
              <blockquote><p class="se-text-paragraph">A quiet morning is the best start.</p></blockquote>
            </div></div></div></body></html>"#;
        assert_eq!(
            extract_main_content(html),
            "A quiet morning is the best start."
        );
    }

    #[test]
    fn test_paragraphs_joined_by_blank_lines() {
        let html = r#"<div class="se-main-container">
            <p class="se-text-paragraph"><span>First paragraph of the post, long enough to matter.</span></p>
            <p class="se-text-paragraph"><span>   </span></p>
            <p class="se-text-paragraph"><span>Second paragraph continues the story for the reader.</span></p>
            <div class="se-module se-module-image"><img src="a.jpg"></div>
            </div>"#;
        assert_eq!(
            extract_main_content(html),
            "First paragraph of the post, long enough to matter.\n\n\
             Second paragraph continues the story for the reader."
        );
    }

    #[test]
    fn test_escalates_to_other_modules() {
        let html = r#"<div class="se-main-container">
            <div class="se-module se-module-oglink"><a>Link preview title for a shop</a></div>
            <div class="se-module se-module-sticker">hi</div>
            </div>"#;
        assert_eq!(
            extract_main_content(html),
            "Link preview title for a shop"
        );
    }

    #[test]
    fn test_short_text_module_not_repeated() {
        let html = r#"<div class="se-main-container">
            <div class="se-component se-text"><div class="se-module se-module-text">
              <p class="se-text-paragraph"><span>A short note about the new opening hours.</span></p>
            </div></div></div>"#;
        assert_eq!(
            extract_main_content(html),
            "A short note about the new opening hours."
        );
    }

    #[test]
    fn test_falls_back_to_container_text() {
        let html = r#"<div class="se-main-container"><div><b>Loose</b>   text
            without any modules at all</div></div>"#;
        assert_eq!(
            extract_main_content(html),
            "Loose text without any modules at all"
        );
    }

    #[test]
    fn test_agrees_with_pattern_engine() {
        let html = r#"<div class="se-main-container">
            <p class="se-text-paragraph">Opening line.</p>
            <div class="se-module se-module-quotation"><blockquote><p class="se-text-paragraph">Quoted words.</p></blockquote></div>
            <div class="se-module se-module-table"><table><tr><td>A</td><td>B</td></tr></table></div>
            <div class="se-module se-module-horizontalLine"><hr></div>
            </div>"#;
        assert_eq!(
            extract_main_content(html),
            super::super::pattern::extract_main_content(html)
        );
    }

    #[test]
    fn test_missing_container_is_empty() {
        assert_eq!(extract_main_content("<p class=\"se-text-paragraph\">x</p>"), "");
    }
}
