//! Contract with the LLM agent runtime.
//!
//! Only the session lifecycle matters here: open, register an error
//! hook, subscribe to usage events, send-and-wait, destroy. The engine
//! is written against these traits; production wires in a real runtime
//! client, tests wire in fakes.

use crate::limits::QuotaSnapshot;
use scorchcrawl_core::config::ByokProvider;
use scorchcrawl_core::Result;
use std::sync::Arc;

/// Where inside the session an error surfaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorContext {
    ModelCall,
    ToolExecution,
    System,
    UserInput,
}

#[derive(Debug, Clone)]
pub struct ErrorOccurrence {
    pub error_text: String,
    pub context: ErrorContext,
    pub recoverable: bool,
}

/// What the runtime should do with a session error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookDecision {
    Abort {
        /// Extra note surfaced to the user, when there is something
        /// actionable to say.
        user_note: Option<String>,
    },
    Retry {
        retry_count: u32,
    },
    Skip,
}

pub type ErrorHook = Arc<dyn Fn(&ErrorOccurrence) -> HookDecision + Send + Sync>;
pub type UsageSink = Arc<dyn Fn(QuotaSnapshot) + Send + Sync>;

/// Whether a tool callback succeeded, as reported to the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolResultType {
    Success,
    Failure,
}

/// What a scraping tool hands back into the session loop.
#[derive(Debug, Clone)]
pub struct ToolOutcome {
    pub text_for_llm: String,
    pub result_type: ToolResultType,
    pub error: Option<String>,
}

impl ToolOutcome {
    pub fn success(text_for_llm: String) -> Self {
        Self {
            text_for_llm,
            result_type: ToolResultType::Success,
            error: None,
        }
    }

    /// Failures stay inside the session: the diagnostic goes to the LLM
    /// so it can plan an alternative step.
    pub fn failure(tool: &str, error: impl std::fmt::Display) -> Self {
        Self {
            text_for_llm: format!("{tool} failed: {error}"),
            result_type: ToolResultType::Failure,
            error: Some(error.to_string()),
        }
    }
}

pub type ToolHandler = Arc<
    dyn Fn(serde_json::Value) -> futures_util::future::BoxFuture<'static, ToolOutcome>
        + Send
        + Sync,
>;

/// A callable exposed to the runtime for the duration of one session.
#[derive(Clone)]
pub struct SessionTool {
    pub name: &'static str,
    pub description: &'static str,
    pub input_schema: serde_json::Value,
    pub handler: ToolHandler,
}

/// Everything needed to open a session.
pub struct SessionSpec {
    pub model: String,
    pub system_prompt: String,
    pub tools: Vec<SessionTool>,
    pub byok: Option<ByokProvider>,
}

#[derive(Debug, Clone)]
pub struct SessionReply {
    pub content: Option<String>,
    pub model: String,
}

#[async_trait::async_trait]
pub trait AgentSession: Send + Sync {
    /// Register the error hook. Replaces any previous hook.
    fn set_error_hook(&self, hook: ErrorHook);
    /// Subscribe to usage events. Replaces any previous sink.
    fn set_usage_sink(&self, sink: UsageSink);
    /// Send the user prompt and wait for the final response.
    async fn send_and_wait(&self, prompt: &str) -> Result<SessionReply>;
    /// Tear the session down. Callers ignore errors here.
    async fn destroy(&self) -> Result<()>;
}

#[async_trait::async_trait]
pub trait SessionClient: Send + Sync {
    async fn open(&self, spec: SessionSpec) -> Result<Box<dyn AgentSession>>;
    /// Stop the client; called on cache eviction and process shutdown.
    async fn shutdown(&self) -> Result<()>;
}
