//! Environment-driven configuration.
//!
//! Everything is read once at startup and kept immutable afterwards.
//! Numeric variables that fail to parse fall back to their defaults, and
//! empty strings are treated as unset throughout.

use serde::Serialize;

fn env_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_bool(key: &str) -> bool {
    matches!(
        std::env::var(key)
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase()
            .as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn env_u64(key: &str, default: u64) -> u64 {
    env_string(key)
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    env_string(key)
        .and_then(|v| v.parse::<u32>().ok())
        .unwrap_or(default)
}

/// Numeric thresholds for the admission core. Built once; never mutated.
#[derive(Debug, Clone, Serialize)]
pub struct RateLimitConfig {
    /// Concurrent agent jobs across all identities.
    pub max_concurrent_jobs: u32,
    /// Concurrent agent jobs per identity.
    pub max_concurrent_jobs_per_user: u32,
    /// Sliding-window size in milliseconds.
    pub window_ms: u64,
    /// Admissions allowed per window across all identities.
    pub max_requests_per_window: u32,
    /// Admissions allowed per window per identity.
    pub max_requests_per_window_per_user: u32,
    /// Reject new work when remaining quota is at or below this percent.
    pub quota_reject_threshold_percent: f64,
    /// Jobs stuck in `processing` longer than this are failed by the reaper.
    pub stale_job_timeout_ms: u64,
    /// Period of the GC / reaper tick.
    pub gc_interval_ms: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 10,
            max_concurrent_jobs_per_user: 2,
            window_ms: 60_000,
            max_requests_per_window: 100,
            max_requests_per_window_per_user: 20,
            quota_reject_threshold_percent: 10.0,
            stale_job_timeout_ms: 600_000,
            gc_interval_ms: 60_000,
        }
    }
}

impl RateLimitConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        let mut cfg = Self {
            max_concurrent_jobs: env_u32("SCORCHCRAWL_MAX_CONCURRENT_JOBS", d.max_concurrent_jobs),
            max_concurrent_jobs_per_user: env_u32(
                "SCORCHCRAWL_MAX_CONCURRENT_JOBS_PER_USER",
                d.max_concurrent_jobs_per_user,
            ),
            window_ms: env_u64("SCORCHCRAWL_RATE_WINDOW_MS", d.window_ms),
            max_requests_per_window: env_u32(
                "SCORCHCRAWL_MAX_REQUESTS_PER_WINDOW",
                d.max_requests_per_window,
            ),
            max_requests_per_window_per_user: env_u32(
                "SCORCHCRAWL_MAX_REQUESTS_PER_WINDOW_PER_USER",
                d.max_requests_per_window_per_user,
            ),
            quota_reject_threshold_percent: env_string(
                "SCORCHCRAWL_QUOTA_REJECT_THRESHOLD_PERCENT",
            )
            .and_then(|v| v.parse::<f64>().ok())
            .unwrap_or(d.quota_reject_threshold_percent),
            stale_job_timeout_ms: env_u64("SCORCHCRAWL_STALE_JOB_TIMEOUT_MS", d.stale_job_timeout_ms),
            gc_interval_ms: env_u64("SCORCHCRAWL_GC_INTERVAL_MS", d.gc_interval_ms),
        };
        // A zero window or zero cap is not a supported configuration;
        // substitute the defaults rather than admitting nothing (or everything).
        if cfg.window_ms == 0 {
            cfg.window_ms = d.window_ms;
        }
        if cfg.max_requests_per_window == 0 {
            cfg.max_requests_per_window = d.max_requests_per_window;
        }
        if cfg.max_requests_per_window_per_user == 0 {
            cfg.max_requests_per_window_per_user = d.max_requests_per_window_per_user;
        }
        if cfg.max_concurrent_jobs == 0 {
            cfg.max_concurrent_jobs = d.max_concurrent_jobs;
        }
        if cfg.max_concurrent_jobs_per_user == 0 {
            cfg.max_concurrent_jobs_per_user = d.max_concurrent_jobs_per_user;
        }
        cfg
    }
}

/// "Bring your own key" provider kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ByokKind {
    OpenAi,
    Azure,
    Anthropic,
}

#[derive(Debug, Clone, Serialize)]
pub struct ByokProvider {
    pub kind: ByokKind,
    pub base_url: String,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
}

impl ByokProvider {
    /// BYOK is enabled only when both a provider kind and a base URL are set.
    fn from_env() -> Option<Self> {
        let kind = match env_string("SCORCHCRAWL_BYOK_PROVIDER")?
            .to_ascii_lowercase()
            .as_str()
        {
            "openai" => ByokKind::OpenAi,
            "azure" => ByokKind::Azure,
            "anthropic" => ByokKind::Anthropic,
            _ => return None,
        };
        let base_url = env_string("SCORCHCRAWL_BYOK_BASE_URL")?;
        Some(Self {
            kind,
            base_url,
            api_key: env_string("SCORCHCRAWL_BYOK_API_KEY"),
        })
    }
}

/// Strip a `localProxy=true|1` query parameter off an engine URL.
///
/// Returns the cleaned URL and whether the flag was present and truthy.
/// The downstream client must never see the flag.
pub fn split_local_proxy(raw: &str) -> (String, bool) {
    let Ok(mut u) = url::Url::parse(raw) else {
        return (raw.to_string(), false);
    };
    let mut local_proxy = false;
    let kept: Vec<(String, String)> = u
        .query_pairs()
        .filter(|(k, v)| {
            if k == "localProxy" {
                if matches!(v.to_ascii_lowercase().as_str(), "true" | "1") {
                    local_proxy = true;
                }
                false
            } else {
                true
            }
        })
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if kept.is_empty() {
        u.set_query(None);
    } else {
        u.query_pairs_mut().clear().extend_pairs(kept);
    }
    (u.to_string(), local_proxy)
}

/// Parse a comma-separated model list: whitespace trimmed, empties dropped.
pub fn parse_model_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

pub const DEFAULT_ALLOWED_MODELS: [&str; 3] = ["gpt-4.1", "gpt-4o", "o4-mini"];
pub const DEFAULT_MODEL: &str = "gpt-4.1";
pub const DEFAULT_ENGINE_URL: &str = "https://api.scorchcrawl.dev";

/// Full server configuration snapshot.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Scraping-engine base URL, already stripped of `localProxy`.
    pub engine_url: String,
    pub engine_api_key: Option<String>,
    /// Process-wide LLM-runtime token fallback.
    pub copilot_token: Option<String>,
    /// Custom LLM-runtime endpoint; when unset, agent jobs cannot run
    /// unless a BYOK provider is configured.
    pub runtime_url: Option<String>,
    pub allowed_models: Vec<String>,
    pub default_model: String,
    pub local_proxy: bool,
    pub cloud_service: bool,
    pub safe_mode: bool,
    pub byok: Option<ByokProvider>,
    pub rate_limits: RateLimitConfig,
}

impl ServerConfig {
    pub fn from_env() -> Self {
        let raw_url = env_string("SCORCHCRAWL_API_URL")
            .unwrap_or_else(|| DEFAULT_ENGINE_URL.to_string());
        let (engine_url, url_local_proxy) = split_local_proxy(&raw_url);
        let local_proxy = env_bool("SCORCHCRAWL_LOCAL_PROXY") || url_local_proxy;
        let cloud_service = env_bool("SCORCHCRAWL_CLOUD_SERVICE");
        // Cloud service always runs in safe mode.
        let safe_mode = cloud_service || env_bool("SCORCHCRAWL_SAFE_MODE");

        let allowed_models = env_string("SCORCHCRAWL_ALLOWED_MODELS")
            .map(|v| parse_model_list(&v))
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_ALLOWED_MODELS.iter().map(|s| s.to_string()).collect());
        let default_model =
            env_string("SCORCHCRAWL_DEFAULT_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string());

        Self {
            engine_url,
            engine_api_key: env_string("SCORCHCRAWL_API_KEY"),
            copilot_token: env_string("COPILOT_TOKEN"),
            runtime_url: env_string("SCORCHCRAWL_COPILOT_RUNTIME_URL"),
            allowed_models,
            default_model,
            local_proxy,
            cloud_service,
            safe_mode,
            byok: ByokProvider::from_env(),
            rate_limits: RateLimitConfig::from_env(),
        }
    }
}
