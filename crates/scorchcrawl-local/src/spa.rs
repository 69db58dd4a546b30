//! Single-page-application shell detection.
//!
//! The local fetcher cannot execute JavaScript, so a fetch that comes
//! back as an un-hydrated app shell is worse than useless: it looks like
//! a success but carries no content. This module decides whether the
//! fetched bytes need the browser-backed engine instead.

use scraper::{ElementRef, Html, Selector};

/// Case-insensitive substrings that mark a placeholder / loading page.
const SPA_LOADING_PATTERNS: [&str; 13] = [
    "loading...",
    "loading\u{2026}",
    "please wait",
    "just a moment",
    "checking your browser",
    "one moment please",
    "redirecting",
    "enable javascript",
    "javascript is required",
    "javascript must be enabled",
    "this app requires javascript",
    "you need to enable javascript",
    "noscript",
];

/// Mount points of the common SPA frameworks.
const SPA_ROOT_SELECTORS: [&str; 8] = [
    "#root",
    "#app",
    "#__next",
    "#__nuxt",
    "#svelte",
    "app-root",
    "#___gatsby",
    "#main-app",
];

const MIN_MEANINGFUL_TEXT_LENGTH: usize = 200;
const SCRIPT_HEAVY_RATIO: f64 = 0.65;

fn collapse(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn element_text_collapsed(el: ElementRef<'_>) -> String {
    collapse(&el.text().collect::<Vec<_>>().join(" "))
}

/// Body text with `script`/`style`/`noscript` content removed and
/// whitespace collapsed to single spaces.
pub fn visible_text(doc: &Html) -> String {
    fn walk(node: ego_tree::NodeRef<'_, scraper::Node>, out: &mut String) {
        match node.value() {
            scraper::Node::Text(t) => {
                out.push_str(&t);
                out.push(' ');
            }
            scraper::Node::Element(el) => {
                if matches!(el.name(), "script" | "style" | "noscript") {
                    return;
                }
                for child in node.children() {
                    walk(child, out);
                }
            }
            _ => {}
        }
    }

    let mut raw = String::new();
    let body = Selector::parse("body").ok();
    let root = body
        .as_ref()
        .and_then(|sel| doc.select(sel).next())
        .unwrap_or_else(|| doc.root_element());
    for child in root.children() {
        walk(child, &mut raw);
    }
    collapse(&raw)
}

fn script_content_len(doc: &Html) -> usize {
    let Ok(sel) = Selector::parse("script") else {
        return 0;
    };
    doc.select(&sel)
        .map(|el| el.text().map(|t| t.chars().count()).sum::<usize>())
        .sum()
}

/// Decide whether `raw` looks like an un-hydrated SPA shell.
///
/// Returns a short human-readable reason, or `None` when the page has
/// real content. Real articles that merely mention "loading" and short
/// error pages without SPA markers must not trip this.
pub fn detect(raw: &str, doc: &Html) -> Option<String> {
    let text = visible_text(doc);
    let text_len = text.chars().count();
    let lower = text.to_lowercase();

    if text_len < MIN_MEANINGFUL_TEXT_LENGTH {
        for sel_str in SPA_ROOT_SELECTORS {
            let Ok(sel) = Selector::parse(sel_str) else {
                continue;
            };
            for el in doc.select(&sel) {
                let inner_len = element_text_collapsed(el).chars().count();
                if inner_len < MIN_MEANINGFUL_TEXT_LENGTH {
                    return Some(format!(
                        "SPA root container \"{sel_str}\" with minimal content ({inner_len} chars)"
                    ));
                }
            }
        }
        for pattern in SPA_LOADING_PATTERNS {
            if lower.contains(pattern) {
                return Some(format!("Loading indicator detected: \"{pattern}\""));
            }
        }
        if text_len < 50 {
            return Some(format!("Near-empty body text ({text_len} chars)"));
        }
    } else if text_len < 500 {
        for pattern in SPA_LOADING_PATTERNS {
            if lower.contains(pattern) {
                return Some(format!("Short page with loading indicator: \"{pattern}\""));
            }
        }
    }

    let raw_len = raw.chars().count();
    if raw_len > 1000 {
        let script_len = script_content_len(doc);
        let ratio = script_len as f64 / raw_len as f64;
        if ratio > SCRIPT_HEAVY_RATIO && text_len < MIN_MEANINGFUL_TEXT_LENGTH {
            return Some(format!(
                "Script-heavy page ({}% scripts, {text_len} chars text)",
                (ratio * 100.0).round() as u64
            ));
        }
    }

    None
}
