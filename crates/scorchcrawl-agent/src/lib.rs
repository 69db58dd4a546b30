//! Admission core and asynchronous agent job engine.
//!
//! The guard decides whether a research request may run at all
//! (concurrency, request rate, upstream quota); the engine runs admitted
//! requests as background LLM sessions with scraping tools as callbacks
//! and exposes them through status polling.

pub mod cache;
pub mod engine;
pub mod hook;
pub mod jobs;
pub mod limits;
pub mod reaper;
pub mod session;
pub mod tools;

pub use engine::{AgentEngineConfig, AgentJobEngine, ClientFactory, StartRequest, StartResponse};
pub use jobs::{AgentJob, JobStatus};
pub use limits::{Decision, GuardStats, QuotaSnapshot, RateLimitGuard};
