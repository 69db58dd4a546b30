//! Local-fetch fallback scraper.
//!
//! When local-proxy mode is on, single-URL scrapes run as a plain HTTP
//! GET inside this process so traffic exits the caller's network, and
//! the response is reduced to the requested representations. No
//! JavaScript runs here; the SPA-shell detector decides when a fetch
//! must be redirected to the browser-backed engine instead.

use scorchcrawl_core::format::ScrapeFormat;
use scraper::Html;
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;

pub mod links;
pub mod markdown;
pub mod reduce;
pub mod spa;

const DEFAULT_TIMEOUT_MS: u64 = 30_000;

/// A believable desktop browser profile. Some origins refuse obviously
/// programmatic user agents outright.
const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
    AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";
const DEFAULT_ACCEPT: &str =
    "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8";
const DEFAULT_ACCEPT_LANGUAGE: &str = "en-US,en;q=0.9";

#[derive(Debug, Clone, Default)]
pub struct ScrapeOptions {
    /// Requested output formats; empty means `markdown`.
    pub formats: Vec<ScrapeFormat>,
    pub only_main_content: bool,
    pub include_tags: Vec<String>,
    pub exclude_tags: Vec<String>,
    /// Accepted for wire compatibility and ignored: no JS executes here.
    pub wait_for_ms: Option<u64>,
    pub timeout_ms: Option<u64>,
    pub skip_tls_verification: bool,
    pub headers: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(rename = "sourceURL")]
    pub source_url: String,
    pub url: String,
    pub status_code: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
}

/// The reduced document, shaped like an engine scrape result so callers
/// can treat both paths uniformly.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScrapeDocument {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub markdown: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub html: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_html: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub links: Option<Vec<String>>,
    pub metadata: DocumentMetadata,
}

#[derive(Debug)]
pub enum LocalScrapeFailure {
    /// A requested format needs the browser-backed engine.
    FormatNeedsServer,
    /// The fetch returned an un-hydrated SPA shell; the partial document
    /// is attached for debugging.
    SpaShellDetected {
        reason: String,
        partial: Box<ScrapeDocument>,
    },
    /// Network / TLS / timeout failure.
    Fetch(String),
}

impl LocalScrapeFailure {
    /// Stable machine-readable code for the tool layer.
    pub fn code(&self) -> &'static str {
        match self {
            Self::FormatNeedsServer => "FORMAT_NEEDS_SERVER",
            Self::SpaShellDetected { .. } => "SPA_SKELETON_DETECTED",
            Self::Fetch(_) => "LOCAL_FETCH_FAILED",
        }
    }
}

impl std::fmt::Display for LocalScrapeFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::FormatNeedsServer => write!(f, "requested format is not supported locally"),
            Self::SpaShellDetected { reason, .. } => write!(f, "SPA shell detected: {reason}"),
            Self::Fetch(e) => write!(f, "local fetch failed: {e}"),
        }
    }
}

pub type LocalScrapeResult = std::result::Result<ScrapeDocument, LocalScrapeFailure>;

#[derive(Debug, Clone)]
pub struct LocalScraper {
    client: reqwest::Client,
    /// Separate client with certificate verification off. TLS-skip is a
    /// per-request choice, so it must not leak into other fetches.
    insecure: reqwest::Client,
}

impl LocalScraper {
    pub fn new() -> scorchcrawl_core::Result<Self> {
        Ok(Self {
            client: Self::build_client(false)?,
            insecure: Self::build_client(true)?,
        })
    }

    fn build_client(skip_tls: bool) -> scorchcrawl_core::Result<reqwest::Client> {
        let mut builder = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::limited(10))
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_millis(DEFAULT_TIMEOUT_MS));
        if skip_tls {
            builder = builder.danger_accept_invalid_certs(true);
        }
        builder
            .build()
            .map_err(|e| scorchcrawl_core::Error::Fetch(e.to_string()))
    }

    fn default_headers() -> reqwest::header::HeaderMap {
        use reqwest::header::HeaderValue;
        let mut h = reqwest::header::HeaderMap::new();
        h.insert(
            reqwest::header::USER_AGENT,
            HeaderValue::from_static(DEFAULT_USER_AGENT),
        );
        h.insert(reqwest::header::ACCEPT, HeaderValue::from_static(DEFAULT_ACCEPT));
        h.insert(
            reqwest::header::ACCEPT_LANGUAGE,
            HeaderValue::from_static(DEFAULT_ACCEPT_LANGUAGE),
        );
        // Accept-Encoding is added by reqwest itself (gzip feature);
        // setting it manually would disable transparent decompression.
        h.insert(
            reqwest::header::CACHE_CONTROL,
            HeaderValue::from_static("no-cache"),
        );
        h
    }

    /// Fetch `url` and reduce it to the requested representations.
    pub async fn scrape(&self, url: &str, opts: &ScrapeOptions) -> LocalScrapeResult {
        if opts.formats.iter().any(|f| !f.local_capable()) {
            return Err(LocalScrapeFailure::FormatNeedsServer);
        }

        let client = if opts.skip_tls_verification {
            &self.insecure
        } else {
            &self.client
        };

        let mut rb = client
            .get(url)
            .headers(Self::default_headers())
            .timeout(Duration::from_millis(opts.timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS)));
        for (k, v) in &opts.headers {
            if let (Ok(name), Ok(value)) = (
                reqwest::header::HeaderName::from_bytes(k.as_bytes()),
                reqwest::header::HeaderValue::from_str(v),
            ) {
                rb = rb.header(name, value);
            }
        }

        let resp = rb
            .send()
            .await
            .map_err(|e| LocalScrapeFailure::Fetch(e.to_string()))?;
        let final_url = resp.url().to_string();
        let status_code = resp.status().as_u16();
        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let raw = resp
            .text()
            .await
            .map_err(|e| LocalScrapeFailure::Fetch(e.to_string()))?;

        let metadata_base = DocumentMetadata {
            title: None,
            description: None,
            language: None,
            source_url: url.to_string(),
            url: final_url.clone(),
            status_code,
            content_type,
        };

        // All DOM work happens synchronously here: the parsed tree is not
        // Send and must not be held across an await point.
        reduce_document(&raw, &final_url, opts, metadata_base)
    }
}

fn reduce_document(
    raw: &str,
    final_url: &str,
    opts: &ScrapeOptions,
    mut metadata: DocumentMetadata,
) -> LocalScrapeResult {
    let doc = Html::parse_document(raw);

    let page = reduce::extract_metadata(&doc);
    metadata.title = page.title;
    metadata.description = page.description;
    metadata.language = page.language;

    let filter = reduce::DomFilter::new(&doc, opts.only_main_content, &opts.exclude_tags);
    let target_html = reduce::select_target_html(
        &doc,
        raw,
        &opts.include_tags,
        opts.only_main_content,
        &filter,
    );

    let wants = |key: &str| -> bool {
        if opts.formats.is_empty() {
            key == "markdown"
        } else {
            opts.formats.iter().any(|f| f.key() == key)
        }
    };

    let document = ScrapeDocument {
        markdown: wants("markdown").then(|| markdown::html_to_markdown(&target_html)),
        html: wants("html").then(|| target_html.clone()),
        raw_html: wants("rawHtml").then(|| raw.to_string()),
        links: wants("links").then(|| links::extract_links(&doc, final_url)),
        metadata,
    };

    if let Some(reason) = spa::detect(raw, &doc) {
        return Err(LocalScrapeFailure::SpaShellDetected {
            reason,
            partial: Box::new(document),
        });
    }

    Ok(document)
}
