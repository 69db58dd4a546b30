//! Tool parameter structs.
//!
//! Everything is optional at the serde level; required-ness is enforced
//! in the handlers so missing parameters produce a structured
//! `invalid_params` payload instead of a framing-level failure. The
//! structs also serialize back to their wire form, which is how engine
//! requests are built (empty leaves are stripped before forwarding).

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Serialize, Deserialize, JsonSchema, Default)]
pub struct ScrapeArgs {
    /// URL to scrape (required).
    pub url: Option<String>,
    /// Output formats: strings ("markdown", "html", "rawHtml", "links",
    /// "summary", "branding") or typed objects for "json"/"screenshot".
    pub formats: Option<Vec<serde_json::Value>>,
    #[serde(rename = "onlyMainContent")]
    pub only_main_content: Option<bool>,
    #[serde(rename = "includeTags")]
    pub include_tags: Option<Vec<String>>,
    #[serde(rename = "excludeTags")]
    pub exclude_tags: Option<Vec<String>>,
    /// Milliseconds to wait for dynamic content before capture.
    #[serde(rename = "waitFor")]
    pub wait_for: Option<u64>,
    /// Request timeout in milliseconds (default 30000).
    pub timeout: Option<u64>,
    #[serde(rename = "skipTlsVerification")]
    pub skip_tls_verification: Option<bool>,
    pub headers: Option<BTreeMap<String, String>>,
    pub location: Option<serde_json::Value>,
    pub proxy: Option<String>,
    /// Serve engine-cached content not older than this (milliseconds).
    #[serde(rename = "maxAge")]
    pub max_age: Option<u64>,
    pub parsers: Option<Vec<String>>,
    /// Browser actions to run before capture. Not available in safe mode.
    pub actions: Option<Vec<serde_json::Value>>,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema, Default)]
pub struct MapArgs {
    /// Site URL to map (required).
    pub url: Option<String>,
    pub search: Option<String>,
    /// One of: include, skip, only.
    pub sitemap: Option<String>,
    #[serde(rename = "includeSubdomains")]
    pub include_subdomains: Option<bool>,
    pub limit: Option<u64>,
    #[serde(rename = "ignoreQueryParameters")]
    pub ignore_query_parameters: Option<bool>,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema, Default)]
pub struct SearchArgs {
    /// Search query (required).
    pub query: Option<String>,
    pub limit: Option<u64>,
    pub location: Option<String>,
    /// Result sources: web, images, news.
    pub sources: Option<Vec<serde_json::Value>>,
    #[serde(rename = "scrapeOptions")]
    pub scrape_options: Option<serde_json::Value>,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema, Default)]
pub struct CrawlArgs {
    /// Root URL to crawl (required).
    pub url: Option<String>,
    #[serde(rename = "includePaths")]
    pub include_paths: Option<Vec<String>>,
    #[serde(rename = "excludePaths")]
    pub exclude_paths: Option<Vec<String>>,
    #[serde(rename = "maxDiscoveryDepth")]
    pub max_discovery_depth: Option<u64>,
    pub limit: Option<u64>,
    #[serde(rename = "allowExternalLinks")]
    pub allow_external_links: Option<bool>,
    #[serde(rename = "deduplicateSimilarURLs")]
    pub deduplicate_similar_urls: Option<bool>,
    #[serde(rename = "scrapeOptions")]
    pub scrape_options: Option<serde_json::Value>,
    /// Completion webhook. Not available in safe mode.
    pub webhook: Option<serde_json::Value>,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema, Default)]
pub struct CrawlStatusArgs {
    /// Crawl job id (required).
    pub id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema, Default)]
pub struct ExtractArgs {
    /// URLs to extract from (required).
    pub urls: Option<Vec<String>>,
    pub prompt: Option<String>,
    pub schema: Option<serde_json::Value>,
    #[serde(rename = "allowExternalLinks")]
    pub allow_external_links: Option<bool>,
    #[serde(rename = "enableWebSearch")]
    pub enable_web_search: Option<bool>,
    #[serde(rename = "includeSubdomains")]
    pub include_subdomains: Option<bool>,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema, Default)]
pub struct AgentArgs {
    /// Research prompt (required, at most 10000 characters).
    pub prompt: Option<String>,
    /// URLs the agent should focus on.
    pub urls: Option<Vec<String>>,
    /// JSON schema for structured output.
    pub schema: Option<serde_json::Value>,
    /// Model to use; must be in the allowed list (see scorch_agent_models).
    pub model: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema, Default)]
pub struct AgentStatusArgs {
    /// Agent job id (required).
    pub id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema, Default)]
pub struct EmptyArgs {}
