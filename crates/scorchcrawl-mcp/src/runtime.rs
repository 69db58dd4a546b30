//! LLM-runtime client.
//!
//! Speaks an OpenAI-compatible chat-completions API, which covers both a
//! custom Copilot runtime endpoint and the BYOK providers. Sessions run
//! a bounded tool loop: the model's tool calls are dispatched to the
//! registered scraping callbacks and their outcomes fed back until the
//! model produces a final answer.

use scorchcrawl_agent::limits::QuotaSnapshot;
use scorchcrawl_agent::session::{
    AgentSession, ErrorContext, ErrorHook, ErrorOccurrence, HookDecision, SessionClient,
    SessionReply, SessionSpec, SessionTool, UsageSink,
};
use scorchcrawl_agent::ClientFactory;
use scorchcrawl_core::config::ServerConfig;
use scorchcrawl_core::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Upper bound on tool-call rounds within one session.
const MAX_TOOL_ROUNDS: usize = 8;
const CHAT_TIMEOUT: Duration = Duration::from_secs(300);

/// Build the session-client factory from server configuration.
///
/// Preference: BYOK provider endpoint, then the custom runtime URL. With
/// neither configured the factory fails `NotConfigured`, which surfaces
/// on the job record as an agent error.
pub fn client_factory(config: &ServerConfig) -> ClientFactory {
    let byok = config.byok.clone();
    let runtime_url = config.runtime_url.clone();
    Arc::new(move |token: Option<String>| {
        let (base_url, api_key) = match (&byok, &runtime_url) {
            (Some(byok), _) => (byok.base_url.clone(), byok.api_key.clone().or(token)),
            (None, Some(url)) => (url.clone(), token),
            (None, None) => {
                return Err(Error::NotConfigured(
                    "no agent runtime configured; set SCORCHCRAWL_COPILOT_RUNTIME_URL or a BYOK provider"
                        .to_string(),
                ))
            }
        };
        Ok(Arc::new(ChatRuntimeClient::new(base_url, api_key)?) as Arc<dyn SessionClient>)
    })
}

pub struct ChatRuntimeClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl ChatRuntimeClient {
    pub fn new(base_url: String, api_key: Option<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent("scorchcrawl-mcp/0.1")
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| Error::Agent(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }
}

#[async_trait::async_trait]
impl SessionClient for ChatRuntimeClient {
    async fn open(&self, spec: SessionSpec) -> Result<Box<dyn AgentSession>> {
        Ok(Box::new(ChatSession {
            client: self.client.clone(),
            endpoint: format!("{}/v1/chat/completions", self.base_url),
            api_key: self.api_key.clone(),
            spec,
            error_hook: Mutex::new(None),
            usage_sink: Mutex::new(None),
        }))
    }

    async fn shutdown(&self) -> Result<()> {
        // Plain HTTP client; nothing to tear down.
        Ok(())
    }
}

struct ChatSession {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    spec: SessionSpec,
    error_hook: Mutex<Option<ErrorHook>>,
    usage_sink: Mutex<Option<UsageSink>>,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Clone, Deserialize)]
struct Choice {
    message: AssistantMessage,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct AssistantMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<ToolCall>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ToolCall {
    id: String,
    function: FunctionCall,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct FunctionCall {
    name: String,
    /// JSON-encoded arguments, per the chat-completions convention.
    arguments: String,
}

impl ChatSession {
    fn tool_declarations(&self) -> Vec<Value> {
        self.spec
            .tools
            .iter()
            .map(|t| {
                json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.input_schema,
                    }
                })
            })
            .collect()
    }

    fn find_tool(&self, name: &str) -> Option<&SessionTool> {
        self.spec.tools.iter().find(|t| t.name == name)
    }

    fn emit_usage(&self, headers: &reqwest::header::HeaderMap) {
        let get_f64 = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<f64>().ok())
        };
        let get_u64 = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
        };

        let snapshot = QuotaSnapshot {
            remaining_percent: get_f64("x-quota-remaining-percent"),
            used_requests: get_u64("x-quota-used-requests"),
            entitlement_requests: headers
                .get("x-quota-entitlement-requests")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<i64>().ok()),
            is_unlimited: headers
                .get("x-quota-unlimited")
                .and_then(|v| v.to_str().ok())
                .map(|v| matches!(v.trim(), "1" | "true")),
            reset_date: headers
                .get("x-quota-reset-date")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string),
        };
        let has_any = snapshot.remaining_percent.is_some()
            || snapshot.used_requests.is_some()
            || snapshot.entitlement_requests.is_some()
            || snapshot.is_unlimited.is_some()
            || snapshot.reset_date.is_some();
        if !has_any {
            return;
        }
        let sink = self.usage_sink.lock().unwrap_or_else(|e| e.into_inner()).clone();
        if let Some(sink) = sink {
            sink(snapshot);
        }
    }

    fn hook_decision(&self, occ: &ErrorOccurrence) -> HookDecision {
        let hook = self.error_hook.lock().unwrap_or_else(|e| e.into_inner()).clone();
        match hook {
            Some(hook) => hook(occ),
            None => HookDecision::Abort { user_note: None },
        }
    }

    /// One chat call. Transport errors and 5xx are marked recoverable so
    /// the error hook can ask for a retry.
    async fn chat_once(&self, messages: &[Value]) -> std::result::Result<AssistantMessage, ErrorOccurrence> {
        let body = json!({
            "model": self.spec.model,
            "messages": messages,
            "tools": self.tool_declarations(),
            "stream": false,
        });

        let mut rb = self
            .client
            .post(&self.endpoint)
            .timeout(CHAT_TIMEOUT)
            .header(reqwest::header::CONTENT_TYPE, "application/json");
        if let Some(key) = &self.api_key {
            rb = rb.header(reqwest::header::AUTHORIZATION, format!("Bearer {key}"));
        }

        let resp = rb.json(&body).send().await.map_err(|e| ErrorOccurrence {
            error_text: e.to_string(),
            context: ErrorContext::ModelCall,
            recoverable: true,
        })?;

        self.emit_usage(resp.headers());

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            let (snippet, _, _) = scorchcrawl_core::truncate_to_chars(&body, 200);
            return Err(ErrorOccurrence {
                error_text: format!("chat completion HTTP {status}: {snippet}"),
                context: ErrorContext::ModelCall,
                recoverable: status.is_server_error(),
            });
        }

        let parsed: ChatResponse = resp.json().await.map_err(|e| ErrorOccurrence {
            error_text: format!("bad chat completion response: {e}"),
            context: ErrorContext::ModelCall,
            recoverable: false,
        })?;
        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message)
            .ok_or_else(|| ErrorOccurrence {
                error_text: "chat completion returned no choices".to_string(),
                context: ErrorContext::ModelCall,
                recoverable: false,
            })
    }

    async fn chat_with_hook(&self, messages: &[Value]) -> Result<AssistantMessage> {
        let mut attempts_left = 0u32;
        loop {
            match self.chat_once(messages).await {
                Ok(msg) => return Ok(msg),
                Err(occ) => {
                    if attempts_left == 0 {
                        match self.hook_decision(&occ) {
                            HookDecision::Retry { retry_count } if retry_count > 0 => {
                                attempts_left = retry_count;
                            }
                            HookDecision::Abort { user_note } => {
                                let mut text = occ.error_text;
                                if let Some(note) = user_note {
                                    text.push_str(&format!(" ({note})"));
                                }
                                return Err(Error::Agent(text));
                            }
                            _ => return Err(Error::Agent(occ.error_text)),
                        }
                    } else {
                        attempts_left -= 1;
                        if attempts_left == 0 {
                            return Err(Error::Agent(occ.error_text));
                        }
                    }
                }
            }
        }
    }
}

#[async_trait::async_trait]
impl AgentSession for ChatSession {
    fn set_error_hook(&self, hook: ErrorHook) {
        *self.error_hook.lock().unwrap_or_else(|e| e.into_inner()) = Some(hook);
    }

    fn set_usage_sink(&self, sink: UsageSink) {
        *self.usage_sink.lock().unwrap_or_else(|e| e.into_inner()) = Some(sink);
    }

    async fn send_and_wait(&self, prompt: &str) -> Result<SessionReply> {
        let mut messages = vec![
            json!({"role": "system", "content": self.spec.system_prompt}),
            json!({"role": "user", "content": prompt}),
        ];

        for _round in 0..MAX_TOOL_ROUNDS {
            let msg = self.chat_with_hook(&messages).await?;

            if msg.tool_calls.is_empty() {
                return Ok(SessionReply {
                    content: msg.content,
                    model: self.spec.model.clone(),
                });
            }

            let mut assistant = serde_json::to_value(&msg)
                .map_err(|e| Error::Agent(format!("assistant message re-encode: {e}")))?;
            assistant["role"] = json!("assistant");
            messages.push(assistant);

            for call in &msg.tool_calls {
                let outcome = match self.find_tool(&call.function.name) {
                    Some(tool) => {
                        let args: Value = serde_json::from_str(&call.function.arguments)
                            .unwrap_or(Value::Null);
                        (tool.handler)(args).await
                    }
                    None => scorchcrawl_agent::session::ToolOutcome::failure(
                        &call.function.name,
                        "unknown tool",
                    ),
                };
                messages.push(json!({
                    "role": "tool",
                    "tool_call_id": call.id,
                    "content": outcome.text_for_llm,
                }));
            }
        }

        Err(Error::Agent(format!(
            "session exceeded {MAX_TOOL_ROUNDS} tool rounds without a final answer"
        )))
    }

    async fn destroy(&self) -> Result<()> {
        // Stateless HTTP sessions have nothing server-side to destroy.
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{routing::post, Json, Router};
    use scorchcrawl_agent::session::{ToolHandler, ToolOutcome};
    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn echo_tool(calls: Arc<Mutex<Vec<Value>>>) -> SessionTool {
        let handler: ToolHandler = Arc::new(move |args: Value| {
            let calls = calls.clone();
            Box::pin(async move {
                calls.lock().unwrap().push(args);
                ToolOutcome::success("tool says: 42".to_string())
            })
        });
        SessionTool {
            name: "web_search",
            description: "search",
            input_schema: json!({"type": "object"}),
            handler,
        }
    }

    fn spec(tools: Vec<SessionTool>) -> SessionSpec {
        SessionSpec {
            model: "gpt-4.1".to_string(),
            system_prompt: "be useful".to_string(),
            tools,
            byok: None,
        }
    }

    async fn serve(router: Router) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        addr
    }

    #[tokio::test]
    async fn tool_loop_runs_calls_and_returns_final_answer() {
        let hits = Arc::new(AtomicUsize::new(0));
        let hits2 = hits.clone();
        let app = Router::new().route(
            "/v1/chat/completions",
            post(move |Json(body): Json<Value>| {
                let hits = hits2.clone();
                async move {
                    assert_eq!(body["model"].as_str(), Some("gpt-4.1"));
                    let n = hits.fetch_add(1, Ordering::SeqCst);
                    if n == 0 {
                        // First round: ask for a tool call.
                        Json(json!({"choices": [{"message": {
                            "content": null,
                            "tool_calls": [{"id": "c1", "type": "function",
                                "function": {"name": "web_search", "arguments": "{\"query\":\"rust\"}"}}]
                        }}]}))
                    } else {
                        // The tool result must have come back as a tool message.
                        let msgs = body["messages"].as_array().unwrap();
                        let tool_msg = msgs.iter().find(|m| m["role"] == "tool").unwrap();
                        assert_eq!(tool_msg["tool_call_id"].as_str(), Some("c1"));
                        assert!(tool_msg["content"].as_str().unwrap().contains("42"));
                        Json(json!({"choices": [{"message": {"content": "final answer"}}]}))
                    }
                }
            }),
        );
        let addr = serve(app).await;

        let calls = Arc::new(Mutex::new(Vec::new()));
        let client = ChatRuntimeClient::new(format!("http://{addr}"), None).unwrap();
        let session = client.open(spec(vec![echo_tool(calls.clone())])).await.unwrap();

        let reply = session.send_and_wait("find rust news").await.unwrap();
        assert_eq!(reply.content.as_deref(), Some("final answer"));
        assert_eq!(reply.model, "gpt-4.1");

        let recorded = calls.lock().unwrap();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0]["query"].as_str(), Some("rust"));
    }

    #[tokio::test]
    async fn usage_headers_reach_the_sink() {
        let app = Router::new().route(
            "/v1/chat/completions",
            post(|| async {
                (
                    [
                        ("x-quota-remaining-percent", "42.5"),
                        ("x-quota-used-requests", "10"),
                    ],
                    Json(json!({"choices": [{"message": {"content": "ok"}}]})),
                )
            }),
        );
        let addr = serve(app).await;

        let client = ChatRuntimeClient::new(format!("http://{addr}"), None).unwrap();
        let session = client.open(spec(vec![])).await.unwrap();

        let seen: Arc<Mutex<Vec<QuotaSnapshot>>> = Arc::new(Mutex::new(Vec::new()));
        let seen2 = seen.clone();
        session.set_usage_sink(Arc::new(move |snap| {
            seen2.lock().unwrap().push(snap);
        }));

        session.send_and_wait("hi").await.unwrap();
        let snaps = seen.lock().unwrap();
        assert_eq!(snaps.len(), 1);
        assert_eq!(snaps[0].remaining_percent, Some(42.5));
        assert_eq!(snaps[0].used_requests, Some(10));
    }

    #[tokio::test]
    async fn hook_retry_recovers_from_a_transient_5xx() {
        let hits = Arc::new(AtomicUsize::new(0));
        let hits2 = hits.clone();
        let app = Router::new().route(
            "/v1/chat/completions",
            post(move || {
                let hits = hits2.clone();
                async move {
                    if hits.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err((axum::http::StatusCode::SERVICE_UNAVAILABLE, "busy"))
                    } else {
                        Ok(Json(json!({"choices": [{"message": {"content": "recovered"}}]})))
                    }
                }
            }),
        );
        let addr = serve(app).await;

        let client = ChatRuntimeClient::new(format!("http://{addr}"), None).unwrap();
        let session = client.open(spec(vec![])).await.unwrap();
        session.set_error_hook(Arc::new(scorchcrawl_agent::hook::classify_session_error));

        let reply = session.send_and_wait("hi").await.unwrap();
        assert_eq!(reply.content.as_deref(), Some("recovered"));
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn quota_errors_abort_without_retrying() {
        let hits = Arc::new(AtomicUsize::new(0));
        let hits2 = hits.clone();
        let app = Router::new().route(
            "/v1/chat/completions",
            post(move || {
                let hits = hits2.clone();
                async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    (axum::http::StatusCode::PAYMENT_REQUIRED, "quota exhausted")
                }
            }),
        );
        let addr = serve(app).await;

        let client = ChatRuntimeClient::new(format!("http://{addr}"), None).unwrap();
        let session = client.open(spec(vec![])).await.unwrap();
        session.set_error_hook(Arc::new(scorchcrawl_agent::hook::classify_session_error));

        let err = session.send_and_wait("hi").await.unwrap_err();
        assert!(err.to_string().contains("402"), "{err}");
        assert_eq!(hits.load(Ordering::SeqCst), 1, "no retry on quota errors");
    }

    #[test]
    fn factory_without_runtime_is_not_configured() {
        let mut config = base_config();
        config.byok = None;
        config.runtime_url = None;
        let factory = client_factory(&config);
        let err = match factory(Some("tok".to_string())) {
            Err(e) => e,
            Ok(_) => panic!("expected error"),
        };
        assert!(matches!(err, Error::NotConfigured(_)), "{err}");
    }

    #[test]
    fn factory_prefers_byok_over_runtime_url() {
        let mut config = base_config();
        config.byok = Some(scorchcrawl_core::config::ByokProvider {
            kind: scorchcrawl_core::config::ByokKind::OpenAi,
            base_url: "https://byok.example/v1".to_string(),
            api_key: Some("byok-key".to_string()),
        });
        config.runtime_url = Some("https://runtime.example".to_string());
        let factory = client_factory(&config);
        assert!(factory(None).is_ok());
    }

    fn base_config() -> ServerConfig {
        ServerConfig {
            engine_url: "http://127.0.0.1:9".to_string(),
            engine_api_key: None,
            copilot_token: None,
            runtime_url: None,
            allowed_models: vec!["gpt-4.1".to_string()],
            default_model: "gpt-4.1".to_string(),
            local_proxy: false,
            cloud_service: false,
            safe_mode: false,
            byok: None,
            rate_limits: Default::default(),
        }
    }
}
