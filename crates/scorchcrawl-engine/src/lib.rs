//! Client for the downstream scraping engine.
//!
//! Only the request/response shape of the engine's v1 endpoints matters
//! here; the engine's browser pool and queues are somebody else's
//! problem. Responses pass through as JSON; the tool layer decides how
//! much of them to surface.

use scorchcrawl_core::{config::ServerConfig, json::strip_empty_leaves, Error, Result};
use serde_json::Value;
use std::time::Duration;

/// Provenance label attached to every forwarded engine call.
pub const ORIGIN: &str = "mcp-scorchcrawl";

#[derive(Debug, Clone)]
pub struct EngineClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl EngineClient {
    pub fn new(base_url: &str, api_key: Option<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent("scorchcrawl-mcp/0.1")
            // Engine calls can legitimately take a while (headless browser
            // behind them), but never forever.
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| Error::Engine(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    pub fn from_config(cfg: &ServerConfig) -> Result<Self> {
        Self::new(&cfg.engine_url, cfg.engine_api_key.clone())
    }

    /// Same client, different credential. Used in cloud mode where each
    /// request may carry its own scraping-API key.
    pub fn with_api_key(&self, api_key: Option<String>) -> Self {
        Self {
            client: self.client.clone(),
            base_url: self.base_url.clone(),
            api_key: api_key.or_else(|| self.api_key.clone()),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn authorize(&self, rb: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => rb.header(reqwest::header::AUTHORIZATION, format!("Bearer {key}")),
            None => rb,
        }
    }

    async fn decode(resp: reqwest::Response) -> Result<Value> {
        let status = resp.status();
        let body = resp.text().await.map_err(|e| Error::Engine(e.to_string()))?;
        if !status.is_success() {
            let (snippet, _, _) = scorchcrawl_core::truncate_to_chars(&body, 200);
            return Err(Error::Engine(format!("engine HTTP {status}: {snippet}")));
        }
        serde_json::from_str(&body).map_err(|e| Error::Engine(format!("bad engine response: {e}")))
    }

    async fn post_json(&self, path: &str, mut body: Value) -> Result<Value> {
        body = strip_empty_leaves(&body);
        body["origin"] = Value::String(ORIGIN.to_string());
        let resp = self
            .authorize(self.client.post(self.endpoint(path)))
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Engine(e.to_string()))?;
        Self::decode(resp).await
    }

    async fn get_json(&self, path: &str) -> Result<Value> {
        let resp = self
            .authorize(self.client.get(self.endpoint(path)))
            .send()
            .await
            .map_err(|e| Error::Engine(e.to_string()))?;
        Self::decode(resp).await
    }

    pub async fn scrape(&self, params: Value) -> Result<Value> {
        self.post_json("/v1/scrape", params).await
    }

    pub async fn map(&self, params: Value) -> Result<Value> {
        self.post_json("/v1/map", params).await
    }

    pub async fn search(&self, params: Value) -> Result<Value> {
        self.post_json("/v1/search", params).await
    }

    pub async fn crawl(&self, params: Value) -> Result<Value> {
        self.post_json("/v1/crawl", params).await
    }

    pub async fn crawl_status(&self, id: &str) -> Result<Value> {
        self.get_json(&format!("/v1/crawl/{id}")).await
    }

    pub async fn extract(&self, params: Value) -> Result<Value> {
        self.post_json("/v1/extract", params).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{extract::Path, http::StatusCode, routing::get, routing::post, Json, Router};
    use serde_json::json;
    use std::net::SocketAddr;

    async fn spawn(router: Router) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        addr
    }

    #[tokio::test]
    async fn scrape_attaches_origin_and_strips_empty_params() {
        let app = Router::new().route(
            "/v1/scrape",
            post(|Json(body): Json<serde_json::Value>| async move {
                assert_eq!(body["origin"].as_str(), Some(ORIGIN));
                assert_eq!(body["url"].as_str(), Some("https://example.com"));
                // Empty leaves must not reach the engine.
                assert!(body.get("search").is_none());
                assert!(body.get("scrapeOptions").is_none());
                Json(json!({"success": true, "data": {"markdown": "# hi"}}))
            }),
        );
        let addr = spawn(app).await;

        let client = EngineClient::new(&format!("http://{addr}"), None).unwrap();
        let out = client
            .scrape(json!({
                "url": "https://example.com",
                "search": "",
                "scrapeOptions": {"formats": []}
            }))
            .await
            .unwrap();
        assert_eq!(out["success"].as_bool(), Some(true));
    }

    #[tokio::test]
    async fn bearer_auth_sent_when_key_configured() {
        let app = Router::new().route(
            "/v1/search",
            post(|headers: axum::http::HeaderMap| async move {
                let auth = headers
                    .get(axum::http::header::AUTHORIZATION)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("");
                assert_eq!(auth, "Bearer sc-test");
                Json(json!({"success": true, "data": []}))
            }),
        );
        let addr = spawn(app).await;

        let client =
            EngineClient::new(&format!("http://{addr}"), Some("sc-test".to_string())).unwrap();
        client.search(json!({"query": "rust"})).await.unwrap();
    }

    #[tokio::test]
    async fn crawl_status_hits_the_id_path() {
        let app = Router::new().route(
            "/v1/crawl/{id}",
            get(|Path(id): Path<String>| async move {
                Json(json!({"success": true, "status": "scraping", "id": id}))
            }),
        );
        let addr = spawn(app).await;

        let client = EngineClient::new(&format!("http://{addr}"), None).unwrap();
        let out = client.crawl_status("abc-123").await.unwrap();
        assert_eq!(out["id"].as_str(), Some("abc-123"));
    }

    #[tokio::test]
    async fn non_2xx_maps_to_engine_error_with_snippet() {
        let app = Router::new().route(
            "/v1/map",
            post(|| async { (StatusCode::PAYMENT_REQUIRED, "insufficient credits") }),
        );
        let addr = spawn(app).await;

        let client = EngineClient::new(&format!("http://{addr}"), None).unwrap();
        let err = client
            .map(json!({"url": "https://example.com"}))
            .await
            .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("402"), "unexpected error: {msg}");
        assert!(msg.contains("insufficient credits"), "unexpected error: {msg}");
    }

    #[tokio::test]
    async fn with_api_key_overrides_per_request() {
        let app = Router::new().route(
            "/v1/extract",
            post(|headers: axum::http::HeaderMap| async move {
                let auth = headers
                    .get(axum::http::header::AUTHORIZATION)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("");
                assert_eq!(auth, "Bearer per-request");
                Json(json!({"success": true}))
            }),
        );
        let addr = spawn(app).await;

        let base =
            EngineClient::new(&format!("http://{addr}"), Some("server-key".to_string())).unwrap();
        base.with_api_key(Some("per-request".to_string()))
            .extract(json!({"urls": ["https://example.com"]}))
            .await
            .unwrap();
    }
}
