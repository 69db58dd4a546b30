//! Agent job records and the store that status polling reads.

use scorchcrawl_core::now_epoch_ms;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;

/// Finished jobs are kept this long for status polling, then evicted.
pub const FINISHED_JOB_RETENTION_MS: u64 = 60 * 60_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Processing,
    Completed,
    Failed,
    RateLimited,
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Processing => write!(f, "processing"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::RateLimited => write!(f, "rate_limited"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AgentJob {
    pub id: String,
    pub status: JobStatus,
    pub prompt: String,
    pub created_at_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<String>,
    /// Accounting key; never serialized into status responses.
    #[serde(skip_serializing)]
    pub identity: String,
}

impl AgentJob {
    pub fn new(id: String, prompt: String, identity: String) -> Self {
        Self {
            id,
            status: JobStatus::Processing,
            prompt,
            created_at_ms: now_epoch_ms(),
            completed_at_ms: None,
            result: None,
            error: None,
            progress: None,
            identity,
        }
    }
}

/// Jobs stuck in `processing` past the timeout, by id.
pub fn find_stale_jobs(jobs: &[AgentJob], now_ms: u64, timeout_ms: u64) -> Vec<String> {
    jobs.iter()
        .filter(|j| {
            j.status == JobStatus::Processing && now_ms.saturating_sub(j.created_at_ms) > timeout_ms
        })
        .map(|j| j.id.clone())
        .collect()
}

/// Source of truth for status polling.
///
/// `finalize` is the only way out of `processing`, and it reports
/// whether the caller performed the transition; whoever wins (session
/// task or reaper) owns the concurrency-slot release.
#[derive(Debug, Default)]
pub struct AgentJobStore {
    jobs: Mutex<HashMap<String, AgentJob>>,
}

impl AgentJobStore {
    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, AgentJob>> {
        self.jobs.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn insert(&self, job: AgentJob) {
        self.lock().insert(job.id.clone(), job);
    }

    pub fn get(&self, id: &str) -> Option<AgentJob> {
        self.lock().get(id).cloned()
    }

    pub fn set_progress(&self, id: &str, phase: &str) {
        if let Some(job) = self.lock().get_mut(id) {
            if job.status == JobStatus::Processing {
                job.progress = Some(phase.to_string());
            }
        }
    }

    /// Move a job out of `processing`. Returns `true` iff this call made
    /// the transition; a second finalizer (e.g. the reaper racing the
    /// session task) gets `false` and must not release the slot again.
    pub fn finalize(
        &self,
        id: &str,
        status: JobStatus,
        result: Option<serde_json::Value>,
        error: Option<String>,
    ) -> bool {
        let mut jobs = self.lock();
        let Some(job) = jobs.get_mut(id) else {
            return false;
        };
        if job.status != JobStatus::Processing {
            return false;
        }
        job.status = status;
        job.result = result;
        job.error = error;
        job.progress = None;
        job.completed_at_ms = Some(now_epoch_ms());
        true
    }

    pub fn snapshot(&self) -> Vec<AgentJob> {
        self.lock().values().cloned().collect()
    }

    /// Drop finished jobs older than the retention cutoff. Returns how
    /// many were evicted.
    pub fn evict_finished_before(&self, cutoff_ms: u64) -> usize {
        let mut jobs = self.lock();
        let before = jobs.len();
        jobs.retain(|_, j| match j.status {
            JobStatus::Processing => true,
            _ => j.completed_at_ms.map(|t| t >= cutoff_ms).unwrap_or(true),
        });
        before - jobs.len()
    }
}
