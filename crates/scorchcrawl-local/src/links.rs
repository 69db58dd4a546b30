//! Link extraction from fetched documents.

use scraper::{Html, Selector};

/// Collect deduplicated absolute URLs from `<a href>` elements.
///
/// - Fragment-only (`#…`) and `javascript:` hrefs are skipped.
/// - Relative hrefs resolve against `base_url` (the fetch's final URL).
/// - First-seen order is preserved.
pub fn extract_links(doc: &Html, base_url: &str) -> Vec<String> {
    let base = url::Url::parse(base_url).ok();
    let Ok(sel) = Selector::parse("a[href]") else {
        return Vec::new();
    };

    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for el in doc.select(&sel) {
        let href = match el.value().attr("href") {
            Some(h) => h.trim(),
            None => continue,
        };
        if href.is_empty() || href.starts_with('#') {
            continue;
        }
        if href.to_ascii_lowercase().starts_with("javascript:") {
            continue;
        }

        let abs = if let Ok(u) = url::Url::parse(href) {
            u
        } else if let Some(b) = &base {
            match b.join(href) {
                Ok(u) => u,
                Err(_) => continue,
            }
        } else {
            continue;
        };

        let link = abs.to_string();
        if seen.insert(link.clone()) {
            out.push(link);
        }
    }
    out
}
