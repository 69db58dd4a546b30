//! MCP tool surface and transports.
//!
//! Ten tools: seven scraping/proxy operations and three agent
//! operations. Scrape calls route through the local fetcher when
//! local-proxy mode is on and the requested formats allow it, falling
//! back to the engine transparently; everything else forwards to the
//! engine or the agent job engine.

use crate::envelope::{add_envelope_fields, error_obj, ErrorCode};
use crate::params::*;
use crate::runtime;
use rmcp::{
    handler::server::router::tool::ToolRouter,
    handler::server::wrapper::Parameters,
    model::{CallToolResult, Content, ServerCapabilities, ServerInfo},
    service::RequestContext,
    tool, tool_handler, tool_router,
    RoleServer, ServiceExt,
};
use scorchcrawl_agent::{AgentEngineConfig, AgentJobEngine, JobStatus, StartRequest};
use scorchcrawl_core::config::ServerConfig;
use scorchcrawl_core::format::{all_local_capable, ScrapeFormat};
use scorchcrawl_core::identity;
use scorchcrawl_engine::EngineClient;
use scorchcrawl_local::{LocalScrapeFailure, LocalScraper, ScrapeOptions};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Instant;

type McpError = rmcp::ErrorData;

fn tool_result(payload: Value) -> CallToolResult {
    // Structured content for machine consumers plus a text fallback for
    // clients that only read `content[0].text`.
    let mut r = CallToolResult::structured(payload.clone());
    r.content = vec![Content::text(payload.to_string())];
    r
}

/// Per-request HTTP headers, when the transport provides them. The
/// streamable-HTTP transport stores the request parts in the context
/// extensions; stdio has none.
fn header_map(ctx: &RequestContext<RoleServer>) -> Option<http::HeaderMap> {
    ctx.extensions
        .get::<http::request::Parts>()
        .map(|parts| parts.headers.clone())
}

fn header_str<'a>(headers: Option<&'a http::HeaderMap>, name: &str) -> Option<&'a str> {
    headers?.get(name)?.to_str().ok()
}

#[derive(Clone)]
pub struct ScorchMcp {
    tool_router: ToolRouter<Self>,
    config: ServerConfig,
    engine: Arc<EngineClient>,
    local: Arc<LocalScraper>,
    agent: Arc<AgentJobEngine>,
}

#[tool_router]
impl ScorchMcp {
    pub fn new(config: ServerConfig) -> Result<Self, McpError> {
        let engine = Arc::new(
            EngineClient::from_config(&config)
                .map_err(|e| McpError::internal_error(e.to_string(), None))?,
        );
        let local = Arc::new(
            LocalScraper::new().map_err(|e| McpError::internal_error(e.to_string(), None))?,
        );
        let agent = AgentJobEngine::new(
            AgentEngineConfig::from_server(&config),
            config.rate_limits.clone(),
            engine.clone(),
            runtime::client_factory(&config),
        );
        Ok(Self {
            tool_router: Self::tool_router(),
            config,
            engine,
            local,
            agent,
        })
    }

    /// Engine client for this request. In cloud mode callers may supply
    /// their own scraping-API key per request.
    fn engine_for(&self, headers: Option<&http::HeaderMap>) -> EngineClient {
        if !self.config.cloud_service {
            return (*self.engine).clone();
        }
        let key = identity::api_key(
            header_str(headers, "authorization"),
            header_str(headers, "x-scorchcrawl-api-key"),
            header_str(headers, "x-api-key"),
        );
        self.engine.with_api_key(key)
    }

    /// Per-request LLM-runtime token from the identity headers.
    fn request_token(headers: Option<&http::HeaderMap>) -> Option<String> {
        identity::request_token(
            header_str(headers, "x-copilot-token"),
            header_str(headers, "x-github-token"),
        )
    }

    fn invalid_params(kind: &str, message: &str, hint: &str, t0: Instant) -> Value {
        let mut payload = json!({
            "ok": false,
            "error": error_obj(ErrorCode::InvalidParams, message, hint),
        });
        add_envelope_fields(&mut payload, kind, t0.elapsed().as_millis());
        payload
    }

    fn upstream_failure(kind: &str, err: impl ToString, t0: Instant) -> Value {
        let mut payload = json!({
            "ok": false,
            "error": error_obj(
                ErrorCode::UpstreamFailure,
                err,
                "The scraping engine rejected or failed the request. Retry later or reduce scope."
            ),
        });
        add_envelope_fields(&mut payload, kind, t0.elapsed().as_millis());
        payload
    }

    async fn do_scrape(&self, args: ScrapeArgs, headers: Option<http::HeaderMap>) -> Value {
        let t0 = Instant::now();
        let kind = "scorch_scrape";

        let Some(url) = args.url.clone().filter(|u| !u.trim().is_empty()) else {
            return Self::invalid_params(
                kind,
                "url must be non-empty",
                "Pass an absolute URL like https://example.com.",
                t0,
            );
        };
        if self.config.safe_mode && args.actions.is_some() {
            return Self::invalid_params(
                kind,
                "actions are not available in safe mode",
                "Drop the actions parameter, or run the server without safe mode.",
                t0,
            );
        }

        let formats: Vec<ScrapeFormat> = match &args.formats {
            Some(raw) => match serde_json::from_value(Value::Array(raw.clone())) {
                Ok(f) => f,
                Err(e) => {
                    return Self::invalid_params(
                        kind,
                        &format!("unrecognized formats entry: {e}"),
                        "Formats are strings, or typed objects for json/screenshot.",
                        t0,
                    )
                }
            },
            None => Vec::new(),
        };

        if self.config.local_proxy && all_local_capable(&formats) {
            let opts = ScrapeOptions {
                formats: formats.clone(),
                only_main_content: args.only_main_content.unwrap_or(true),
                include_tags: args.include_tags.clone().unwrap_or_default(),
                exclude_tags: args.exclude_tags.clone().unwrap_or_default(),
                wait_for_ms: args.wait_for,
                timeout_ms: args.timeout,
                skip_tls_verification: args.skip_tls_verification.unwrap_or(false),
                headers: args.headers.clone().unwrap_or_default(),
            };
            match self.local.scrape(&url, &opts).await {
                Ok(doc) => {
                    let mut payload = json!({"ok": true, "source": "local_fetch", "data": doc});
                    add_envelope_fields(&mut payload, kind, t0.elapsed().as_millis());
                    return payload;
                }
                Err(LocalScrapeFailure::Fetch(e)) => {
                    let mut payload = json!({
                        "ok": false,
                        "source": "local_fetch",
                        "error": error_obj(
                            ErrorCode::LocalFetchFailed,
                            e,
                            "The in-process fetch failed. Retry, raise the timeout, or disable local-proxy mode."
                        ),
                    });
                    add_envelope_fields(&mut payload, kind, t0.elapsed().as_millis());
                    return payload;
                }
                Err(failure) => {
                    // FORMAT_NEEDS_SERVER or an un-hydrated SPA shell:
                    // fall back to the engine without surfacing it.
                    tracing::debug!(url = %url, code = failure.code(), "local scrape fell back to engine");
                }
            }
        }

        let wire = match serde_json::to_value(&args) {
            Ok(v) => v,
            Err(e) => return Self::invalid_params(kind, &e.to_string(), "Check parameter types.", t0),
        };
        match self.engine_for(headers.as_ref()).scrape(wire).await {
            Ok(v) => {
                let mut payload = json!({"ok": true, "source": "engine", "response": v});
                add_envelope_fields(&mut payload, kind, t0.elapsed().as_millis());
                payload
            }
            Err(e) => Self::upstream_failure(kind, e, t0),
        }
    }

    async fn do_map(&self, args: MapArgs, headers: Option<http::HeaderMap>) -> Value {
        let t0 = Instant::now();
        let kind = "scorch_map";
        if args.url.as_deref().map(str::trim).unwrap_or("").is_empty() {
            return Self::invalid_params(kind, "url must be non-empty", "Pass the site root URL.", t0);
        }
        if let Some(sitemap) = args.sitemap.as_deref() {
            if !matches!(sitemap, "include" | "skip" | "only") {
                return Self::invalid_params(
                    kind,
                    &format!("unknown sitemap mode \"{sitemap}\""),
                    "Allowed sitemap modes: include, skip, only.",
                    t0,
                );
            }
        }
        let wire = serde_json::to_value(&args).unwrap_or_default();
        match self.engine_for(headers.as_ref()).map(wire).await {
            Ok(v) => {
                let mut payload = json!({"ok": true, "response": v});
                add_envelope_fields(&mut payload, kind, t0.elapsed().as_millis());
                payload
            }
            Err(e) => Self::upstream_failure(kind, e, t0),
        }
    }

    async fn do_search(&self, args: SearchArgs, headers: Option<http::HeaderMap>) -> Value {
        let t0 = Instant::now();
        let kind = "scorch_search";
        if args.query.as_deref().map(str::trim).unwrap_or("").is_empty() {
            return Self::invalid_params(kind, "query must be non-empty", "Pass a search query.", t0);
        }
        let wire = serde_json::to_value(&args).unwrap_or_default();
        match self.engine_for(headers.as_ref()).search(wire).await {
            Ok(v) => {
                let mut payload = json!({"ok": true, "response": v});
                add_envelope_fields(&mut payload, kind, t0.elapsed().as_millis());
                payload
            }
            Err(e) => Self::upstream_failure(kind, e, t0),
        }
    }

    async fn do_crawl(&self, args: CrawlArgs, headers: Option<http::HeaderMap>) -> Value {
        let t0 = Instant::now();
        let kind = "scorch_crawl";
        if args.url.as_deref().map(str::trim).unwrap_or("").is_empty() {
            return Self::invalid_params(kind, "url must be non-empty", "Pass the crawl root URL.", t0);
        }
        if self.config.safe_mode && args.webhook.is_some() {
            return Self::invalid_params(
                kind,
                "webhook is not available in safe mode",
                "Poll scorch_check_crawl_status instead of using a webhook.",
                t0,
            );
        }
        let wire = serde_json::to_value(&args).unwrap_or_default();
        match self.engine_for(headers.as_ref()).crawl(wire).await {
            Ok(v) => {
                let mut payload = json!({"ok": true, "response": v});
                add_envelope_fields(&mut payload, kind, t0.elapsed().as_millis());
                payload
            }
            Err(e) => Self::upstream_failure(kind, e, t0),
        }
    }

    async fn do_check_crawl_status(
        &self,
        args: CrawlStatusArgs,
        headers: Option<http::HeaderMap>,
    ) -> Value {
        let t0 = Instant::now();
        let kind = "scorch_check_crawl_status";
        let Some(id) = args.id.filter(|i| !i.trim().is_empty()) else {
            return Self::invalid_params(kind, "id must be non-empty", "Pass the crawl job id.", t0);
        };
        match self.engine_for(headers.as_ref()).crawl_status(&id).await {
            Ok(v) => {
                let mut payload = json!({"ok": true, "response": v});
                add_envelope_fields(&mut payload, kind, t0.elapsed().as_millis());
                payload
            }
            Err(e) => Self::upstream_failure(kind, e, t0),
        }
    }

    async fn do_extract(&self, args: ExtractArgs, headers: Option<http::HeaderMap>) -> Value {
        let t0 = Instant::now();
        let kind = "scorch_extract";
        if args.urls.as_deref().unwrap_or(&[]).is_empty() {
            return Self::invalid_params(
                kind,
                "urls must be a non-empty array",
                "Pass at least one URL to extract from.",
                t0,
            );
        }
        let wire = serde_json::to_value(&args).unwrap_or_default();
        match self.engine_for(headers.as_ref()).extract(wire).await {
            Ok(v) => {
                let mut payload = json!({"ok": true, "response": v});
                add_envelope_fields(&mut payload, kind, t0.elapsed().as_millis());
                payload
            }
            Err(e) => Self::upstream_failure(kind, e, t0),
        }
    }

    async fn do_agent(&self, args: AgentArgs, headers: Option<http::HeaderMap>) -> Value {
        let t0 = Instant::now();
        let kind = "scorch_agent";
        let Some(prompt) = args.prompt.filter(|p| !p.trim().is_empty()) else {
            return Self::invalid_params(kind, "prompt must be non-empty", "Describe the research task.", t0);
        };
        if prompt.chars().count() > scorchcrawl_agent::engine::MAX_PROMPT_CHARS {
            return Self::invalid_params(
                kind,
                "prompt exceeds 10000 characters",
                "Shorten the prompt; put bulk context behind the urls parameter instead.",
                t0,
            );
        }

        let request = StartRequest {
            prompt,
            urls: args.urls.unwrap_or_default(),
            schema: args.schema,
            model: args.model,
        };
        let token = Self::request_token(headers.as_ref());
        let resp = self.agent.start(request, token).await;

        let mut payload = match resp.status {
            JobStatus::Processing => {
                json!({"ok": true, "id": resp.id, "status": "processing"})
            }
            JobStatus::RateLimited => json!({
                "ok": false,
                "id": resp.id,
                "status": "rate_limited",
                "rate_limited": true,
                "retry_after_s": resp.retry_after_s,
                "error": error_obj(
                    ErrorCode::RateLimited,
                    resp.error.unwrap_or_else(|| "rate limited".to_string()),
                    "Wait retry_after_s seconds; poll scorch_agent_rate_limit_status for capacity."
                ),
            }),
            _ => {
                let message = resp.error.unwrap_or_else(|| "agent start failed".to_string());
                let code = if message.contains("not in the allowed list") {
                    ErrorCode::ModelNotAllowed
                } else {
                    ErrorCode::AgentError
                };
                json!({
                    "ok": false,
                    "id": resp.id,
                    "status": "failed",
                    "error": error_obj(code, message, "See scorch_agent_models for the allowed models."),
                })
            }
        };
        add_envelope_fields(&mut payload, kind, t0.elapsed().as_millis());
        payload
    }

    fn do_agent_status(&self, args: AgentStatusArgs) -> Value {
        let t0 = Instant::now();
        let kind = "scorch_agent_status";
        let Some(id) = args.id.filter(|i| !i.trim().is_empty()) else {
            return Self::invalid_params(kind, "id must be non-empty", "Pass the agent job id.", t0);
        };

        let mut payload = match self.agent.status(&id) {
            None => json!({
                "ok": false,
                "success": false,
                "error": error_obj(
                    ErrorCode::JobNotFound,
                    format!("no agent job with id {id}"),
                    "Job ids expire after completion retention; start a new job."
                ),
            }),
            Some(job) => {
                let mut p = json!({
                    "ok": job.status != JobStatus::Failed,
                    "success": job.status == JobStatus::Completed,
                    "status": job.status,
                });
                if let Some(progress) = &job.progress {
                    p["progress"] = json!(progress);
                }
                if let Some(result) = &job.result {
                    p["data"] = result.clone();
                }
                if let Some(error) = &job.error {
                    p["error"] = json!(error);
                }
                if let Some(done) = job.completed_at_ms {
                    p["duration"] = json!((done.saturating_sub(job.created_at_ms)) as f64 / 1000.0);
                }
                p
            }
        };
        add_envelope_fields(&mut payload, kind, t0.elapsed().as_millis());
        payload
    }

    fn do_agent_models(&self) -> Value {
        let t0 = Instant::now();
        let mut payload = json!({
            "ok": true,
            "allowed_models": self.agent.allowed_models(),
            "default_model": self.agent.default_model(),
        });
        add_envelope_fields(&mut payload, "scorch_agent_models", t0.elapsed().as_millis());
        payload
    }

    fn do_agent_rate_limit_status(&self) -> Value {
        let t0 = Instant::now();
        let stats = self.agent.rate_limit_status();
        let mut payload = json!({"ok": true, "rate_limits": stats});
        add_envelope_fields(
            &mut payload,
            "scorch_agent_rate_limit_status",
            t0.elapsed().as_millis(),
        );
        payload
    }

    #[tool(description = "Scrape a single URL (local fetch in local-proxy mode, engine otherwise)")]
    async fn scorch_scrape(
        &self,
        params: Parameters<Option<ScrapeArgs>>,
        ctx: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        let headers = header_map(&ctx);
        Ok(tool_result(
            self.do_scrape(params.0.unwrap_or_default(), headers).await,
        ))
    }

    #[tool(description = "Discover the URLs of a site")]
    async fn scorch_map(
        &self,
        params: Parameters<Option<MapArgs>>,
        ctx: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        let headers = header_map(&ctx);
        Ok(tool_result(
            self.do_map(params.0.unwrap_or_default(), headers).await,
        ))
    }

    #[tool(description = "Search the web, optionally scraping the results")]
    async fn scorch_search(
        &self,
        params: Parameters<Option<SearchArgs>>,
        ctx: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        let headers = header_map(&ctx);
        Ok(tool_result(
            self.do_search(params.0.unwrap_or_default(), headers).await,
        ))
    }

    #[tool(description = "Start an asynchronous crawl; returns a crawl job id")]
    async fn scorch_crawl(
        &self,
        params: Parameters<Option<CrawlArgs>>,
        ctx: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        let headers = header_map(&ctx);
        Ok(tool_result(
            self.do_crawl(params.0.unwrap_or_default(), headers).await,
        ))
    }

    #[tool(description = "Check the status of an asynchronous crawl")]
    async fn scorch_check_crawl_status(
        &self,
        params: Parameters<Option<CrawlStatusArgs>>,
        ctx: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        let headers = header_map(&ctx);
        Ok(tool_result(
            self.do_check_crawl_status(params.0.unwrap_or_default(), headers)
                .await,
        ))
    }

    #[tool(description = "Extract structured data from URLs")]
    async fn scorch_extract(
        &self,
        params: Parameters<Option<ExtractArgs>>,
        ctx: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        let headers = header_map(&ctx);
        Ok(tool_result(
            self.do_extract(params.0.unwrap_or_default(), headers).await,
        ))
    }

    #[tool(description = "Start an autonomous research agent job; returns a job id immediately")]
    async fn scorch_agent(
        &self,
        params: Parameters<Option<AgentArgs>>,
        ctx: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        let headers = header_map(&ctx);
        Ok(tool_result(
            self.do_agent(params.0.unwrap_or_default(), headers).await,
        ))
    }

    #[tool(description = "Poll an agent job: status, progress, result")]
    async fn scorch_agent_status(
        &self,
        params: Parameters<Option<AgentStatusArgs>>,
    ) -> Result<CallToolResult, McpError> {
        Ok(tool_result(self.do_agent_status(params.0.unwrap_or_default())))
    }

    #[tool(description = "List the models allowed for agent jobs")]
    async fn scorch_agent_models(
        &self,
        _params: Parameters<Option<EmptyArgs>>,
    ) -> Result<CallToolResult, McpError> {
        Ok(tool_result(self.do_agent_models()))
    }

    #[tool(description = "Current agent concurrency snapshot and rate-limit configuration")]
    async fn scorch_agent_rate_limit_status(
        &self,
        _params: Parameters<Option<EmptyArgs>>,
    ) -> Result<CallToolResult, McpError> {
        Ok(tool_result(self.do_agent_rate_limit_status()))
    }
}

#[tool_handler]
impl rmcp::ServerHandler for ScorchMcp {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some(
                "Web scraping and autonomous research tools backed by the ScorchCrawl engine. \
                 Agent jobs are asynchronous: start with scorch_agent, poll with scorch_agent_status."
                    .to_string(),
            ),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }
}

pub async fn serve_stdio(config: ServerConfig) -> Result<(), McpError> {
    let svc = ScorchMcp::new(config)?;
    let running = svc
        .serve(rmcp::transport::stdio())
        .await
        .map_err(|e| McpError::internal_error(e.to_string(), None))?;
    // Keep the stdio server alive until the client closes.
    running
        .waiting()
        .await
        .map_err(|e| McpError::internal_error(e.to_string(), None))?;
    Ok(())
}

pub async fn serve_http(config: ServerConfig, host: &str, port: u16) -> anyhow::Result<()> {
    use rmcp::transport::streamable_http_server::{
        session::local::LocalSessionManager, StreamableHttpServerConfig, StreamableHttpService,
    };
    use tokio_util::sync::CancellationToken;

    let ct = CancellationToken::new();
    let service: StreamableHttpService<ScorchMcp, LocalSessionManager> =
        StreamableHttpService::new(
            move || ScorchMcp::new(config.clone()).map_err(std::io::Error::other),
            Arc::new(LocalSessionManager::default()),
            StreamableHttpServerConfig {
                ..Default::default()
            },
        );

    let router = axum::Router::new().nest_service("/mcp", service);
    let bind_addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(addr = %bind_addr, "MCP HTTP server listening on http://{bind_addr}/mcp");

    axum::serve(listener, router)
        .with_graceful_shutdown(async move { ct.cancelled().await })
        .await?;
    Ok(())
}
