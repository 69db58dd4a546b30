//! Stable payload envelope for tool results.
//!
//! Every tool returns a JSON object with `schema_version`, `kind` and
//! `elapsed_ms`; failures carry an `error` object with a machine code, a
//! message, a hint, and a retryability flag so clients never have to
//! parse prose.

pub(crate) const SCHEMA_VERSION: u64 = 1;

#[derive(Clone, Copy, Debug)]
pub(crate) enum ErrorCode {
    InvalidParams,
    RateLimited,
    ModelNotAllowed,
    JobNotFound,
    UpstreamFailure,
    AgentError,
    LocalFetchFailed,
    NotConfigured,
}

impl ErrorCode {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::InvalidParams => "invalid_params",
            Self::RateLimited => "rate_limited",
            Self::ModelNotAllowed => "model_not_allowed",
            Self::JobNotFound => "job_not_found",
            Self::UpstreamFailure => "upstream_failure",
            Self::AgentError => "agent_error",
            Self::LocalFetchFailed => "local_fetch_failed",
            Self::NotConfigured => "not_configured",
        }
    }

    pub(crate) fn retryable(self) -> bool {
        match self {
            Self::RateLimited | Self::UpstreamFailure | Self::LocalFetchFailed => true,
            Self::InvalidParams
            | Self::ModelNotAllowed
            | Self::JobNotFound
            | Self::AgentError
            | Self::NotConfigured => false,
        }
    }
}

pub(crate) fn error_obj(
    code: ErrorCode,
    message: impl ToString,
    hint: impl ToString,
) -> serde_json::Value {
    serde_json::json!({
        "code": code.as_str(),
        "message": message.to_string(),
        "hint": hint.to_string(),
        "retryable": code.retryable(),
    })
}

pub(crate) fn add_envelope_fields(payload: &mut serde_json::Value, kind: &str, elapsed_ms: u128) {
    payload["schema_version"] = serde_json::json!(SCHEMA_VERSION);
    payload["kind"] = serde_json::json!(kind);
    payload["elapsed_ms"] = serde_json::json!(elapsed_ms);
}
