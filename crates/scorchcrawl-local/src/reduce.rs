//! HTML reduction: metadata, main-content selection, and filtered
//! serialization of the target markup.

use ego_tree::NodeRef;
use scraper::{ElementRef, Html, Node, Selector};
use std::collections::HashSet;

/// Elements that are structural noise when the caller asks for main
/// content only.
const NOISE_TAGS: [&str; 4] = ["nav", "header", "footer", "aside"];
const NOISE_ROLES: [&str; 3] = ["banner", "navigation", "complementary"];
/// Class/id tokens of boilerplate containers. Matched as whole tokens so
/// e.g. "badge" does not trip the "ad" entry.
const NOISE_TOKENS: [&str; 9] = [
    "sidebar",
    "menu",
    "cookie-banner",
    "cookie-consent",
    "ad",
    "ads",
    "advertisement",
    "promo",
    "popup",
];

/// Candidate containers for the main content, in preference order.
const MAIN_CANDIDATES: [&str; 7] = [
    "main",
    "article",
    "[role=\"main\"]",
    ".main-content",
    ".content",
    "#content",
    "#main",
];

/// Minimum inner-HTML size for a main-content candidate to be trusted.
const MIN_CANDIDATE_HTML_LEN: usize = 100;

const VOID_TAGS: [&str; 13] = [
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source", "track",
    "wbr",
];

#[derive(Debug, Default)]
pub struct PageMetadata {
    pub title: Option<String>,
    pub description: Option<String>,
    pub language: Option<String>,
}

fn collapse(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn first_text(doc: &Html, selector: &str) -> Option<String> {
    let sel = Selector::parse(selector).ok()?;
    doc.select(&sel)
        .map(|el| collapse(&el.text().collect::<Vec<_>>().join(" ")))
        .find(|t| !t.is_empty())
}

fn first_attr(doc: &Html, selector: &str, attr: &str) -> Option<String> {
    let sel = Selector::parse(selector).ok()?;
    doc.select(&sel)
        .filter_map(|el| el.value().attr(attr))
        .map(|v| v.trim().to_string())
        .find(|v| !v.is_empty())
}

/// Title, description and language, with OpenGraph fallbacks.
pub fn extract_metadata(doc: &Html) -> PageMetadata {
    PageMetadata {
        title: first_text(doc, "title")
            .or_else(|| first_attr(doc, r#"meta[property="og:title"]"#, "content")),
        description: first_attr(doc, r#"meta[name="description"]"#, "content")
            .or_else(|| first_attr(doc, r#"meta[property="og:description"]"#, "content")),
        language: first_attr(doc, "html", "lang"),
    }
}

fn has_noise_token(value: &str) -> bool {
    value
        .split_whitespace()
        .any(|token| NOISE_TOKENS.contains(&token.to_ascii_lowercase().as_str()))
}

fn is_noise_element(el: &scraper::node::Element) -> bool {
    if NOISE_TAGS.contains(&el.name()) {
        return true;
    }
    if let Some(role) = el.attr("role") {
        if NOISE_ROLES.contains(&role.trim().to_ascii_lowercase().as_str()) {
            return true;
        }
    }
    if let Some(class) = el.attr("class") {
        if has_noise_token(class) {
            return true;
        }
    }
    if let Some(id) = el.attr("id") {
        if has_noise_token(id) {
            return true;
        }
    }
    false
}

/// Filter applied while serializing: which subtrees are dropped.
pub struct DomFilter {
    drop_noise: bool,
    excluded: HashSet<ego_tree::NodeId>,
}

impl DomFilter {
    /// Build the filter for a parsed document. Invalid `exclude_tags`
    /// selectors are ignored rather than failing the scrape.
    pub fn new(doc: &Html, only_main_content: bool, exclude_tags: &[String]) -> Self {
        let mut excluded = HashSet::new();
        for raw in exclude_tags {
            let Ok(sel) = Selector::parse(raw) else {
                continue;
            };
            for el in doc.select(&sel) {
                excluded.insert(el.id());
            }
        }
        Self {
            drop_noise: only_main_content,
            excluded,
        }
    }

    fn drops(&self, node: NodeRef<'_, Node>) -> bool {
        if self.excluded.contains(&node.id()) {
            return true;
        }
        if self.drop_noise {
            if let Node::Element(el) = node.value() {
                return is_noise_element(&el);
            }
        }
        false
    }
}

fn escape_text(s: &str, out: &mut String) {
    for ch in s.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(ch),
        }
    }
}

fn escape_attr(s: &str, out: &mut String) {
    for ch in s.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(ch),
        }
    }
}

fn serialize_node(node: NodeRef<'_, Node>, filter: &DomFilter, out: &mut String) {
    if filter.drops(node) {
        return;
    }
    match node.value() {
        Node::Text(t) => escape_text(&t, out),
        Node::Element(el) => {
            let tag = el.name();
            out.push('<');
            out.push_str(tag);
            for (name, value) in el.attrs() {
                out.push(' ');
                out.push_str(name);
                out.push_str("=\"");
                escape_attr(value, out);
                out.push('"');
            }
            out.push('>');
            if VOID_TAGS.contains(&tag) {
                return;
            }
            for child in node.children() {
                serialize_node(child, filter, out);
            }
            out.push_str("</");
            out.push_str(tag);
            out.push('>');
        }
        _ => {}
    }
}

/// Inner HTML of `el` with the filter applied.
pub fn inner_html_filtered(el: ElementRef<'_>, filter: &DomFilter) -> String {
    let mut out = String::new();
    for child in el.children() {
        serialize_node(child, filter, &mut out);
    }
    out
}

/// Pick the markup the outputs are derived from.
///
/// - `include_tags` wins: the filtered inner HTML of every match of each
///   selector, concatenated in selector order.
/// - Otherwise with `only_main_content`, the first main-content
///   candidate with enough substance, falling back to `<body>`.
/// - Otherwise `<body>`, or the whole document when there is none.
pub fn select_target_html(
    doc: &Html,
    raw: &str,
    include_tags: &[String],
    only_main_content: bool,
    filter: &DomFilter,
) -> String {
    if !include_tags.is_empty() {
        let mut out = String::new();
        for raw_sel in include_tags {
            let Ok(sel) = Selector::parse(raw_sel) else {
                continue;
            };
            for el in doc.select(&sel) {
                out.push_str(&inner_html_filtered(el, filter));
            }
        }
        return out;
    }

    if only_main_content {
        for candidate in MAIN_CANDIDATES {
            let Ok(sel) = Selector::parse(candidate) else {
                continue;
            };
            if let Some(el) = doc.select(&sel).next() {
                let inner = inner_html_filtered(el, filter);
                if inner.chars().count() > MIN_CANDIDATE_HTML_LEN {
                    return inner;
                }
            }
        }
    }

    let body = Selector::parse("body").ok();
    match body.as_ref().and_then(|sel| doc.select(sel).next()) {
        Some(el) => inner_html_filtered(el, filter),
        None => raw.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_prefers_title_tag_then_og() {
        let doc = Html::parse_document(
            r#"<html lang="en"><head><title>Real Title</title>
            <meta property="og:title" content="OG Title">
            <meta name="description" content="A page.">
            </head><body></body></html>"#,
        );
        let meta = extract_metadata(&doc);
        assert_eq!(meta.title.as_deref(), Some("Real Title"));
        assert_eq!(meta.description.as_deref(), Some("A page."));
        assert_eq!(meta.language.as_deref(), Some("en"));

        let doc = Html::parse_document(
            r#"<html><head><title></title>
            <meta property="og:title" content="OG Only">
            <meta property="og:description" content="og desc">
            </head><body></body></html>"#,
        );
        let meta = extract_metadata(&doc);
        assert_eq!(meta.title.as_deref(), Some("OG Only"));
        assert_eq!(meta.description.as_deref(), Some("og desc"));
        assert_eq!(meta.language, None);
    }

    #[test]
    fn main_content_drops_nav_and_boilerplate() {
        let html = r#"<html><body>
            <nav>site nav</nav>
            <div class="sidebar">widgets</div>
            <main><p>The article body with more than one hundred characters of real
            content so the candidate is considered substantial enough to use.</p></main>
            <footer>footer text</footer>
        </body></html>"#;
        let doc = Html::parse_document(html);
        let filter = DomFilter::new(&doc, true, &[]);
        let target = select_target_html(&doc, html, &[], true, &filter);
        assert!(target.contains("article body"));
        assert!(!target.contains("site nav"));
        assert!(!target.contains("widgets"));
        assert!(!target.contains("footer text"));
    }

    #[test]
    fn thin_main_candidate_falls_back_to_body() {
        let html = r#"<html><body>
            <main>tiny</main>
            <p>Everything else lives outside the main container.</p>
        </body></html>"#;
        let doc = Html::parse_document(html);
        let filter = DomFilter::new(&doc, true, &[]);
        let target = select_target_html(&doc, html, &[], true, &filter);
        assert!(target.contains("Everything else"));
    }

    #[test]
    fn include_tags_concatenate_matches() {
        let html = r#"<html><body>
            <div class="a"><p>first</p></div>
            <div class="b"><p>second</p></div>
            <div class="c">ignored</div>
        </body></html>"#;
        let doc = Html::parse_document(html);
        let filter = DomFilter::new(&doc, false, &[]);
        let target = select_target_html(
            &doc,
            html,
            &[".a".to_string(), ".b".to_string()],
            false,
            &filter,
        );
        assert!(target.contains("first"));
        assert!(target.contains("second"));
        assert!(!target.contains("ignored"));
    }

    #[test]
    fn exclude_tags_drop_their_subtrees() {
        let html = r#"<html><body>
            <p>keep me</p>
            <div class="related"><p>drop me</p></div>
        </body></html>"#;
        let doc = Html::parse_document(html);
        let filter = DomFilter::new(&doc, false, &[".related".to_string()]);
        let target = select_target_html(&doc, html, &[], false, &filter);
        assert!(target.contains("keep me"));
        assert!(!target.contains("drop me"));
    }

    #[test]
    fn invalid_exclude_selector_is_ignored() {
        let html = "<html><body><p>still here</p></body></html>";
        let doc = Html::parse_document(html);
        let filter = DomFilter::new(&doc, false, &["[[[".to_string()]);
        let target = select_target_html(&doc, html, &[], false, &filter);
        assert!(target.contains("still here"));
    }

    #[test]
    fn noise_tokens_match_whole_words_only() {
        let html = r#"<html><body>
            <main><p>Content long enough to pass the candidate threshold, padded with
            several extra words to clear one hundred characters comfortably.</p>
            <span class="badge">not an ad container</span>
            <div class="ad">actual advertisement</div></main>
        </body></html>"#;
        let doc = Html::parse_document(html);
        let filter = DomFilter::new(&doc, true, &[]);
        let target = select_target_html(&doc, html, &[], true, &filter);
        assert!(target.contains("not an ad container"));
        assert!(!target.contains("actual advertisement"));
    }
}
