//! Identity keys for the admission core.
//!
//! The identity is an opaque accounting key: two requests with the same
//! key share concurrency/rate budgets, nothing more. Derivation prefers
//! the per-request Copilot token, then the per-request GitHub token,
//! then the process-wide token, and finally the `__server__` sentinel.

/// Accounting key used when no caller token is available.
pub const SERVER_IDENTITY: &str = "__server__";

/// Header names consulted for the per-request LLM-runtime token, in
/// preference order.
pub const TOKEN_HEADERS: [&str; 2] = ["x-copilot-token", "x-github-token"];

/// Header names consulted for the scraping-API key in cloud mode, in
/// preference order. `authorization` carries a `Bearer `-prefixed value.
pub const API_KEY_HEADERS: [&str; 3] = ["authorization", "x-scorchcrawl-api-key", "x-api-key"];

fn non_empty(v: Option<&str>) -> Option<&str> {
    v.map(str::trim).filter(|s| !s.is_empty())
}

/// Pick the per-request LLM-runtime token from header values already
/// looked up by the transport layer.
pub fn request_token(copilot: Option<&str>, github: Option<&str>) -> Option<String> {
    non_empty(copilot)
        .or_else(|| non_empty(github))
        .map(str::to_string)
}

/// Derive the accounting identity for a request.
pub fn derive(request_token: Option<&str>, server_token: Option<&str>) -> String {
    non_empty(request_token)
        .or_else(|| non_empty(server_token))
        .unwrap_or(SERVER_IDENTITY)
        .to_string()
}

/// Extract the scraping-API key from header values, stripping the
/// `Bearer ` prefix off an `authorization` value.
pub fn api_key(authorization: Option<&str>, scorch_key: Option<&str>, x_api_key: Option<&str>) -> Option<String> {
    if let Some(auth) = non_empty(authorization) {
        let lower = auth.to_ascii_lowercase();
        if let Some(rest) = lower.strip_prefix("bearer ") {
            let start = auth.len() - rest.len();
            let token = auth[start..].trim();
            if !token.is_empty() {
                return Some(token.to_string());
            }
        }
    }
    non_empty(scorch_key)
        .or_else(|| non_empty(x_api_key))
        .map(str::to_string)
}
