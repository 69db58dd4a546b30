//! Session error classification.

use crate::session::{ErrorContext, ErrorOccurrence, HookDecision};

/// Decide what the runtime should do with a session error.
///
/// Billing/entitlement failures abort immediately: retrying them burns
/// quota for nothing. Recoverable model-call errors get a bounded retry;
/// a failed tool is skipped so the agent can plan around it.
pub fn classify_session_error(occ: &ErrorOccurrence) -> HookDecision {
    let lower = occ.error_text.to_lowercase();

    if lower.contains("quota")
        || lower.contains("402")
        || lower.contains("not licensed")
        || lower.contains("authentication")
    {
        return HookDecision::Abort { user_note: None };
    }
    if lower.contains("rate limit") || lower.contains("429") {
        return HookDecision::Abort {
            user_note: Some("Copilot rate limit reached, retry later.".to_string()),
        };
    }
    if occ.context == ErrorContext::ModelCall && occ.recoverable {
        return HookDecision::Retry { retry_count: 2 };
    }
    if occ.context == ErrorContext::ToolExecution {
        return HookDecision::Skip;
    }
    HookDecision::Abort { user_note: None }
}

/// Classify and log. The warn line carries the job id, where the error
/// surfaced, and a bounded slice of the message.
pub fn on_session_error(job_id: &str, occ: &ErrorOccurrence) -> HookDecision {
    let (snippet, _, _) = scorchcrawl_core::truncate_to_chars(&occ.error_text, 200);
    tracing::warn!(
        job_id,
        context = ?occ.context,
        recoverable = occ.recoverable,
        error = %snippet,
        "agent session error"
    );
    classify_session_error(occ)
}
