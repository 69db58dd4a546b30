//! Scrape output formats.
//!
//! The wire accepts either a bare string (`"markdown"`) or a typed
//! object (`{"type": "json", "schema": …}`), so the format parameter is
//! a sum type rather than a string.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum ScrapeFormat {
    Name(String),
    Typed(TypedFormat),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TypedFormat {
    Json {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        prompt: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        schema: Option<serde_json::Value>,
    },
    Screenshot {
        #[serde(rename = "fullPage", default, skip_serializing_if = "Option::is_none")]
        full_page: Option<bool>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        quality: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        viewport: Option<Viewport>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl ScrapeFormat {
    /// Canonical name of the format ("markdown", "json", …).
    pub fn key(&self) -> &str {
        match self {
            Self::Name(n) => n.as_str(),
            Self::Typed(TypedFormat::Json { .. }) => "json",
            Self::Typed(TypedFormat::Screenshot { .. }) => "screenshot",
        }
    }

    /// Whether the local fetch path can produce this format at all.
    /// Anything else must go to the browser-backed engine.
    pub fn local_capable(&self) -> bool {
        matches!(self.key(), "markdown" | "html" | "rawHtml" | "links")
    }
}

/// True when every requested format can be produced by the local fetch
/// path. An empty list defaults to `markdown`, which is local-capable.
pub fn all_local_capable(formats: &[ScrapeFormat]) -> bool {
    formats.iter().all(ScrapeFormat::local_capable)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_strings_and_typed_objects() {
        let fs: Vec<ScrapeFormat> = serde_json::from_str(
            r#"["markdown", {"type": "json", "schema": {"type": "object"}}, {"type": "screenshot", "fullPage": true}]"#,
        )
        .unwrap();
        assert_eq!(fs[0], ScrapeFormat::Name("markdown".to_string()));
        assert_eq!(fs[1].key(), "json");
        assert_eq!(fs[2].key(), "screenshot");
        match &fs[2] {
            ScrapeFormat::Typed(TypedFormat::Screenshot { full_page, .. }) => {
                assert_eq!(*full_page, Some(true));
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn local_capability_split() {
        let local: Vec<ScrapeFormat> =
            serde_json::from_str(r#"["markdown", "html", "rawHtml", "links"]"#).unwrap();
        assert!(all_local_capable(&local));

        let server: Vec<ScrapeFormat> =
            serde_json::from_str(r#"["markdown", "screenshot"]"#).unwrap();
        assert!(!all_local_capable(&server));

        let typed: Vec<ScrapeFormat> = serde_json::from_str(r#"[{"type": "json"}]"#).unwrap();
        assert!(!all_local_capable(&typed));
    }
}
