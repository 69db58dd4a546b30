//! Asynchronous agent job engine.
//!
//! `start` admits a research request, returns a job id immediately, and
//! runs the LLM session in a background task with the scraping tools as
//! callbacks. Results are only observable through status polling.
//!
//! The slot discipline: an admitted job releases its concurrency slot
//! exactly once, whichever of the session task or the reaper finalizes
//! it first. A task that dies without finalizing leaves the job in
//! `processing`; the reaper fails it after the stale timeout and does
//! the release then.

use crate::cache::SessionClientCache;
use crate::hook;
use crate::jobs::{AgentJob, AgentJobStore, JobStatus};
use crate::limits::{GuardStats, RateLimitGuard};
use crate::reaper;
use crate::session::{SessionClient, SessionReply, SessionSpec};
use crate::tools::scraping_tools;
use scorchcrawl_core::config::{ByokProvider, RateLimitConfig};
use scorchcrawl_core::{identity, now_epoch_ms, Result};
use scorchcrawl_engine::EngineClient;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Hard cap on research prompts.
pub const MAX_PROMPT_CHARS: usize = 10_000;

#[derive(Debug, Clone, Default)]
pub struct StartRequest {
    pub prompt: String,
    pub urls: Vec<String>,
    pub schema: Option<Value>,
    pub model: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StartResponse {
    pub id: String,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub rate_limited: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_s: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Builds an LLM-runtime client for a given token (request token when
/// present, process-wide token otherwise).
pub type ClientFactory =
    Arc<dyn Fn(Option<String>) -> Result<Arc<dyn SessionClient>> + Send + Sync>;

#[derive(Clone)]
pub struct AgentEngineConfig {
    pub allowed_models: Vec<String>,
    pub default_model: String,
    pub byok: Option<ByokProvider>,
    /// Process-wide LLM-runtime token fallback.
    pub server_token: Option<String>,
}

impl AgentEngineConfig {
    pub fn from_server(cfg: &scorchcrawl_core::config::ServerConfig) -> Self {
        Self {
            allowed_models: cfg.allowed_models.clone(),
            default_model: cfg.default_model.clone(),
            byok: cfg.byok.clone(),
            server_token: cfg.copilot_token.clone(),
        }
    }
}

pub struct AgentJobEngine {
    guard: Arc<RateLimitGuard>,
    store: Arc<AgentJobStore>,
    clients: Arc<SessionClientCache>,
    scraper: Arc<EngineClient>,
    factory: ClientFactory,
    config: AgentEngineConfig,
    /// Serializes check → validate → acquire so two concurrent
    /// admissions cannot both observe the last free slot.
    admission: tokio::sync::Mutex<()>,
    cancel: CancellationToken,
}

impl AgentJobEngine {
    pub fn new(
        config: AgentEngineConfig,
        rate_limits: RateLimitConfig,
        scraper: Arc<EngineClient>,
        factory: ClientFactory,
    ) -> Arc<Self> {
        let guard = RateLimitGuard::new(rate_limits.clone());
        let store = Arc::new(AgentJobStore::default());
        let clients = Arc::new(SessionClientCache::default());
        let cancel = CancellationToken::new();

        reaper::spawn(store.clone(), guard.clone(), rate_limits.clone(), cancel.child_token());
        Self::spawn_cache_gc(clients.clone(), rate_limits.gc_interval_ms, cancel.child_token());

        Arc::new(Self {
            guard,
            store,
            clients,
            scraper,
            factory,
            config,
            admission: tokio::sync::Mutex::new(()),
            cancel,
        })
    }

    fn spawn_cache_gc(clients: Arc<SessionClientCache>, interval_ms: u64, cancel: CancellationToken) {
        tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval(std::time::Duration::from_millis(interval_ms.max(1)));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = ticker.tick() => {
                        clients.evict_idle(now_epoch_ms()).await;
                    }
                }
            }
        });
    }

    pub fn guard(&self) -> &RateLimitGuard {
        &self.guard
    }

    pub fn allowed_models(&self) -> &[String] {
        &self.config.allowed_models
    }

    pub fn default_model(&self) -> &str {
        &self.config.default_model
    }

    /// Admit and launch a research job. Returns immediately; the session
    /// runs in a background task and is observable only via `status`.
    pub async fn start(
        self: &Arc<Self>,
        req: StartRequest,
        identity_token: Option<String>,
    ) -> StartResponse {
        let id = uuid::Uuid::new_v4().to_string();

        if req.prompt.chars().count() > MAX_PROMPT_CHARS {
            return StartResponse {
                id,
                status: JobStatus::Failed,
                rate_limited: false,
                retry_after_s: None,
                error: Some(format!("Prompt exceeds {MAX_PROMPT_CHARS} characters.")),
            };
        }

        let identity =
            identity::derive(identity_token.as_deref(), self.config.server_token.as_deref());

        let model = req
            .model
            .clone()
            .map(|m| m.trim().to_string())
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| self.config.default_model.clone());

        {
            let _admission = self.admission.lock().await;

            let decision = self.guard.check(&identity);
            if !decision.allowed {
                return StartResponse {
                    id,
                    status: JobStatus::RateLimited,
                    rate_limited: true,
                    retry_after_s: decision.retry_after_s,
                    error: decision.reason,
                };
            }

            if !self.config.allowed_models.iter().any(|m| m == &model) {
                // No slot was taken; nothing to release.
                return StartResponse {
                    id,
                    status: JobStatus::Failed,
                    rate_limited: false,
                    retry_after_s: None,
                    error: Some(format!(
                        "Model \"{model}\" is not in the allowed list: {}",
                        self.config.allowed_models.join(", ")
                    )),
                };
            }

            self.guard.acquire(&identity);
        }

        self.store
            .insert(AgentJob::new(id.clone(), req.prompt.clone(), identity.clone()));

        let engine = self.clone();
        let job_id = id.clone();
        tokio::spawn(async move {
            let outcome = engine
                .run_session(&job_id, &identity, identity_token, model, req)
                .await;
            let finalized = match outcome {
                Ok(reply) => engine.store.finalize(
                    &job_id,
                    JobStatus::Completed,
                    Some(json!({
                        "success": true,
                        "data": reply
                            .content
                            .unwrap_or_else(|| "No response generated".to_string()),
                        "model": reply.model,
                    })),
                    None,
                ),
                Err(e) => engine.store.finalize(
                    &job_id,
                    JobStatus::Failed,
                    None,
                    Some(format!("Agent error: {e}")),
                ),
            };
            // The reaper may have finalized first; only the winner releases.
            if finalized {
                engine.guard.release(&identity);
            }
        });

        StartResponse {
            id,
            status: JobStatus::Processing,
            rate_limited: false,
            retry_after_s: None,
            error: None,
        }
    }

    async fn run_session(
        &self,
        job_id: &str,
        identity: &str,
        identity_token: Option<String>,
        model: String,
        req: StartRequest,
    ) -> Result<SessionReply> {
        let token_pref = identity_token.or_else(|| self.config.server_token.clone());
        let client = self
            .clients
            .get_or_create(identity, || (self.factory)(token_pref))?;

        self.store.set_progress(job_id, "opening agent session");
        let session = client
            .open(SessionSpec {
                model,
                system_prompt: build_system_prompt(&req),
                tools: scraping_tools(self.scraper.clone()),
                byok: self.config.byok.clone(),
            })
            .await?;

        let hook_job_id = job_id.to_string();
        session.set_error_hook(Arc::new(move |occ| hook::on_session_error(&hook_job_id, occ)));

        let guard = self.guard.clone();
        let sink_identity = identity.to_string();
        session.set_usage_sink(Arc::new(move |snap| {
            guard.update_quota(&sink_identity, &snap);
        }));

        self.store.set_progress(job_id, "running research session");
        let reply = session.send_and_wait(&build_user_prompt(&req)).await;
        let _ = session.destroy().await;
        reply
    }

    pub fn status(&self, id: &str) -> Option<AgentJob> {
        self.store.get(id)
    }

    pub fn rate_limit_status(&self) -> GuardStats {
        self.guard.stats()
    }

    /// Cancel the GC/reaper tasks and stop every cached runtime client.
    /// Jobs still `processing` are abandoned; there is no persistence.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        self.guard.shutdown();
        self.clients.shutdown_all().await;
    }
}

fn build_system_prompt(req: &StartRequest) -> String {
    let mut prompt = String::from(
        "You are an autonomous research agent with access to web scraping tools \
         (web_scrape, web_search, web_map, web_extract). Gather the information the \
         user asks for, cross-check it across sources, and answer concisely. \
         When a tool fails, try an alternative approach instead of giving up.",
    );
    if req.schema.is_some() {
        prompt.push_str(
            " The user expects structured output; respond with JSON matching the \
             provided schema and nothing else.",
        );
    }
    prompt
}

fn build_user_prompt(req: &StartRequest) -> String {
    let mut prompt = req.prompt.clone();
    if !req.urls.is_empty() {
        prompt.push_str("\n\nFocus on these URLs:\n");
        for url in &req.urls {
            prompt.push_str("- ");
            prompt.push_str(url);
            prompt.push('\n');
        }
    }
    if let Some(schema) = &req.schema {
        prompt.push_str("\n\nReturn the result as JSON matching this schema:\n");
        prompt.push_str(&schema.to_string());
    }
    prompt
}
