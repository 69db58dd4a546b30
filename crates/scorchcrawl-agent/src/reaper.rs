//! Stale-job reaper.
//!
//! A session task that hangs (or dies without finalizing) would pin its
//! concurrency slot forever; the reaper is the backstop. It also applies
//! the finished-job retention so the store does not grow without bound.

use crate::jobs::{find_stale_jobs, AgentJobStore, JobStatus, FINISHED_JOB_RETENTION_MS};
use crate::limits::RateLimitGuard;
use scorchcrawl_core::config::RateLimitConfig;
use scorchcrawl_core::now_epoch_ms;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// One reaper pass: fail jobs stuck past the timeout (releasing their
/// slot iff this pass won the transition) and evict old finished jobs.
pub fn reap_once(store: &AgentJobStore, guard: &RateLimitGuard, config: &RateLimitConfig) {
    let now = now_epoch_ms();
    let jobs = store.snapshot();
    for id in find_stale_jobs(&jobs, now, config.stale_job_timeout_ms) {
        let Some(job) = jobs.iter().find(|j| j.id == id) else {
            continue;
        };
        let error = format!(
            "Job timed out after {}s without completing.",
            config.stale_job_timeout_ms / 1000
        );
        // The session task may be finalizing concurrently; only the
        // winner of the transition releases the slot.
        if store.finalize(&id, JobStatus::Failed, None, Some(error)) {
            guard.release(&job.identity);
            tracing::warn!(job_id = %id, "reaped stale agent job");
        }
    }

    let evicted = store.evict_finished_before(now.saturating_sub(FINISHED_JOB_RETENTION_MS));
    if evicted > 0 {
        tracing::debug!(evicted, "evicted finished agent jobs past retention");
    }
}

pub fn spawn(
    store: Arc<AgentJobStore>,
    guard: Arc<RateLimitGuard>,
    config: RateLimitConfig,
    cancel: CancellationToken,
) {
    tokio::spawn(async move {
        let mut ticker =
            tokio::time::interval(std::time::Duration::from_millis(config.gc_interval_ms.max(1)));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = ticker.tick() => reap_once(&store, &guard, &config),
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::AgentJob;

    fn config(timeout_ms: u64) -> RateLimitConfig {
        RateLimitConfig {
            stale_job_timeout_ms: timeout_ms,
            ..RateLimitConfig::default()
        }
    }

    #[tokio::test]
    async fn reaper_fails_stale_jobs_and_releases_their_slot() {
        let store = AgentJobStore::default();
        let guard = RateLimitGuard::new(config(5_000));

        guard.acquire("u");
        let mut job = AgentJob::new("old".to_string(), "p".to_string(), "u".to_string());
        job.created_at_ms = now_epoch_ms() - 10_000;
        store.insert(job);
        store.insert(AgentJob::new("new".to_string(), "p".to_string(), "u".to_string()));

        reap_once(&store, &guard, guard.config());

        let reaped = store.get("old").unwrap();
        assert_eq!(reaped.status, JobStatus::Failed);
        assert!(reaped.error.as_deref().unwrap().contains("timed out after 5s"));
        assert_eq!(store.get("new").unwrap().status, JobStatus::Processing);
        assert_eq!(guard.stats().concurrency.global_active, 0);

        // A second pass must not release again.
        guard.acquire("v");
        reap_once(&store, &guard, guard.config());
        assert_eq!(guard.stats().concurrency.global_active, 1);
        guard.shutdown();
    }

    #[tokio::test]
    async fn reaper_skips_jobs_already_finalized_by_the_session_task() {
        let store = AgentJobStore::default();
        let guard = RateLimitGuard::new(config(5_000));

        guard.acquire("u");
        let mut job = AgentJob::new("done".to_string(), "p".to_string(), "u".to_string());
        job.created_at_ms = now_epoch_ms() - 10_000;
        store.insert(job);
        // Session task wins the race and releases.
        assert!(store.finalize("done", JobStatus::Completed, None, None));
        guard.release("u");

        reap_once(&store, &guard, guard.config());
        assert_eq!(store.get("done").unwrap().status, JobStatus::Completed);
        assert_eq!(guard.stats().concurrency.global_active, 0);
        guard.shutdown();
    }
}
