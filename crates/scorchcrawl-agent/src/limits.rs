//! Admission and protection core.
//!
//! Three trackers (concurrency, sliding-window rate, quota) composed
//! behind one guard. All shared state sits behind a single mutex so a
//! `check` followed by `acquire` can be serialized against other
//! admissions; none of the trackers lock on their own.

use scorchcrawl_core::config::RateLimitConfig;
use scorchcrawl_core::now_epoch_ms;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

/// Quota records older than this are treated as stale and do not block
/// admissions: usage snapshots are asynchronous and not every upstream
/// emits them, so blocking forever on old numbers would deny service
/// after a quiet period.
const QUOTA_STALE_AFTER_MS: u64 = 5 * 60_000;
/// Quota records older than this are dropped entirely by GC.
const QUOTA_RECORD_TTL_MS: u64 = 30 * 60_000;

/// Outcome of an admission check.
#[derive(Debug, Clone, Serialize)]
pub struct Decision {
    pub allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_s: Option<u64>,
}

impl Decision {
    pub fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
            retry_after_s: None,
        }
    }

    pub fn reject(reason: impl Into<String>, retry_after_s: Option<u64>) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.into()),
            retry_after_s,
        }
    }
}

/// In-flight agent jobs, globally and per identity.
///
/// Invariant: the per-identity counts sum to `global_active`, and an
/// identity's entry is removed when its count reaches zero. `release` is
/// saturating: an unmatched release is absorbed, never underflows.
#[derive(Debug, Default)]
pub struct ConcurrencyTracker {
    global_active: u32,
    per_identity: HashMap<String, u32>,
}

impl ConcurrencyTracker {
    pub fn can_acquire(&self, identity: &str, cfg: &RateLimitConfig) -> Decision {
        if self.global_active >= cfg.max_concurrent_jobs {
            return Decision::reject(
                format!(
                    "Server is at maximum capacity ({} concurrent agent jobs). Retry in ~10s.",
                    cfg.max_concurrent_jobs
                ),
                Some(10),
            );
        }
        let held = self.per_identity.get(identity).copied().unwrap_or(0);
        if held >= cfg.max_concurrent_jobs_per_user {
            return Decision::reject(
                format!(
                    "You already hold {held} concurrent agent jobs (max {}). Retry in ~15s.",
                    cfg.max_concurrent_jobs_per_user
                ),
                Some(15),
            );
        }
        Decision::allow()
    }

    pub fn acquire(&mut self, identity: &str) {
        self.global_active = self.global_active.saturating_add(1);
        *self.per_identity.entry(identity.to_string()).or_insert(0) += 1;
    }

    pub fn release(&mut self, identity: &str) {
        self.global_active = self.global_active.saturating_sub(1);
        if let Some(count) = self.per_identity.get_mut(identity) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                self.per_identity.remove(identity);
            }
        }
    }

    pub fn snapshot(&self) -> ConcurrencySnapshot {
        ConcurrencySnapshot {
            global_active: self.global_active,
            per_identity: self.per_identity.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ConcurrencySnapshot {
    pub global_active: u32,
    /// Slots held per identity key; entries disappear at zero.
    pub per_identity: HashMap<String, u32>,
}

/// Admission timestamps per identity plus one global sequence, pruned
/// against `now - window_ms` before every decision.
#[derive(Debug, Default)]
pub struct SlidingWindowRateLimiter {
    global: VecDeque<u64>,
    per_identity: HashMap<String, VecDeque<u64>>,
}

impl SlidingWindowRateLimiter {
    fn prune(seq: &mut VecDeque<u64>, cutoff: u64) {
        while seq.front().is_some_and(|&t| t <= cutoff) {
            seq.pop_front();
        }
    }

    fn retry_hint(seq: &VecDeque<u64>, now_ms: u64, window_ms: u64) -> u64 {
        let oldest = seq.front().copied().unwrap_or(now_ms);
        let wait_ms = (oldest + window_ms).saturating_sub(now_ms);
        wait_ms.div_ceil(1000).max(1)
    }

    pub fn check(&mut self, identity: &str, now_ms: u64, cfg: &RateLimitConfig) -> Decision {
        let cutoff = now_ms.saturating_sub(cfg.window_ms);
        Self::prune(&mut self.global, cutoff);
        if let Some(seq) = self.per_identity.get_mut(identity) {
            Self::prune(seq, cutoff);
        }

        if self.global.len() >= cfg.max_requests_per_window as usize {
            let retry = Self::retry_hint(&self.global, now_ms, cfg.window_ms);
            return Decision::reject(
                format!(
                    "Request rate limit reached ({} requests per {}s across all callers). Retry in ~{retry}s.",
                    cfg.max_requests_per_window,
                    cfg.window_ms / 1000
                ),
                Some(retry),
            );
        }

        if let Some(seq) = self.per_identity.get(identity) {
            if seq.len() >= cfg.max_requests_per_window_per_user as usize {
                let retry = Self::retry_hint(seq, now_ms, cfg.window_ms);
                return Decision::reject(
                    format!(
                        "Your request rate limit reached ({} requests per {}s). Retry in ~{retry}s.",
                        cfg.max_requests_per_window_per_user,
                        cfg.window_ms / 1000
                    ),
                    Some(retry),
                );
            }
        }

        Decision::allow()
    }

    pub fn record(&mut self, identity: &str, now_ms: u64) {
        self.global.push_back(now_ms);
        self.per_identity
            .entry(identity.to_string())
            .or_default()
            .push_back(now_ms);
    }

    pub fn gc(&mut self, now_ms: u64, cfg: &RateLimitConfig) {
        let cutoff = now_ms.saturating_sub(cfg.window_ms);
        Self::prune(&mut self.global, cutoff);
        self.per_identity.retain(|_, seq| {
            Self::prune(seq, cutoff);
            !seq.is_empty()
        });
    }
}

/// A partial usage snapshot from the upstream LLM runtime. Fields left
/// `None` keep their previously stored value.
#[derive(Debug, Clone, Default)]
pub struct QuotaSnapshot {
    pub remaining_percent: Option<f64>,
    pub used_requests: Option<u64>,
    pub entitlement_requests: Option<i64>,
    pub is_unlimited: Option<bool>,
    pub reset_date: Option<String>,
}

#[derive(Debug, Clone)]
struct QuotaRecord {
    remaining_percent: f64,
    used_requests: u64,
    entitlement_requests: i64,
    is_unlimited: bool,
    reset_date: Option<String>,
    last_updated_ms: u64,
}

impl Default for QuotaRecord {
    fn default() -> Self {
        Self {
            remaining_percent: 100.0,
            used_requests: 0,
            entitlement_requests: -1,
            is_unlimited: false,
            reset_date: None,
            last_updated_ms: 0,
        }
    }
}

/// Most recent upstream quota snapshot per identity.
#[derive(Debug, Default)]
pub struct QuotaMonitor {
    records: HashMap<String, QuotaRecord>,
}

impl QuotaMonitor {
    pub fn update(&mut self, identity: &str, snap: &QuotaSnapshot, now_ms: u64) {
        let rec = self.records.entry(identity.to_string()).or_default();
        if let Some(p) = snap.remaining_percent {
            rec.remaining_percent = p.clamp(0.0, 100.0);
        }
        if let Some(u) = snap.used_requests {
            rec.used_requests = u;
        }
        if let Some(e) = snap.entitlement_requests {
            rec.entitlement_requests = e;
        }
        if let Some(unlimited) = snap.is_unlimited {
            rec.is_unlimited = unlimited;
        }
        if let Some(reset) = &snap.reset_date {
            rec.reset_date = Some(reset.clone());
        }
        rec.last_updated_ms = now_ms;
    }

    pub fn check(&self, identity: &str, now_ms: u64, threshold_percent: f64) -> Decision {
        let Some(rec) = self.records.get(identity) else {
            return Decision::allow();
        };
        if rec.is_unlimited {
            return Decision::allow();
        }
        if now_ms.saturating_sub(rec.last_updated_ms) > QUOTA_STALE_AFTER_MS {
            return Decision::allow();
        }
        if rec.remaining_percent > threshold_percent {
            return Decision::allow();
        }
        let mut reason = format!(
            "Copilot quota nearly exhausted: {:.0}% remaining ({} of {} requests used).",
            rec.remaining_percent, rec.used_requests, rec.entitlement_requests
        );
        if let Some(reset) = &rec.reset_date {
            reason.push_str(&format!(" Quota resets on {reset}."));
        }
        Decision::reject(reason, None)
    }

    pub fn gc(&mut self, now_ms: u64) {
        self.records
            .retain(|_, rec| now_ms.saturating_sub(rec.last_updated_ms) < QUOTA_RECORD_TTL_MS);
    }
}

#[derive(Debug, Default)]
struct GuardState {
    concurrency: ConcurrencyTracker,
    window: SlidingWindowRateLimiter,
    quota: QuotaMonitor,
}

#[derive(Debug, Clone, Serialize)]
pub struct GuardStats {
    pub concurrency: ConcurrencySnapshot,
    pub config: RateLimitConfig,
}

/// Facade over the three trackers: `check → acquire → release`.
///
/// Owns the periodic GC task; `shutdown` cancels it.
pub struct RateLimitGuard {
    config: RateLimitConfig,
    state: Mutex<GuardState>,
    gc_cancel: CancellationToken,
}

impl RateLimitGuard {
    pub fn new(config: RateLimitConfig) -> Arc<Self> {
        let guard = Arc::new(Self {
            config,
            state: Mutex::new(GuardState::default()),
            gc_cancel: CancellationToken::new(),
        });
        guard.clone().spawn_gc();
        guard
    }

    fn spawn_gc(self: Arc<Self>) {
        let cancel = self.gc_cancel.clone();
        let interval_ms = self.config.gc_interval_ms.max(1);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(std::time::Duration::from_millis(interval_ms));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = ticker.tick() => self.gc(),
                }
            }
        });
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, GuardState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Evaluate concurrency, then rate window, then quota: cheapest
    /// first, most informative last. Read-only; never mutates counters
    /// beyond window pruning.
    pub fn check(&self, identity: &str) -> Decision {
        let now = now_epoch_ms();
        let mut state = self.lock();
        let decision = state.concurrency.can_acquire(identity, &self.config);
        if !decision.allowed {
            return decision;
        }
        let decision = state.window.check(identity, now, &self.config);
        if !decision.allowed {
            return decision;
        }
        state
            .quota
            .check(identity, now, self.config.quota_reject_threshold_percent)
    }

    /// Take one concurrency slot and stamp the rate window, together
    /// under the state lock. Callers must have passed `check`.
    pub fn acquire(&self, identity: &str) {
        let now = now_epoch_ms();
        let mut state = self.lock();
        state.concurrency.acquire(identity);
        state.window.record(identity, now);
    }

    /// Release the concurrency slot only; window timestamps age out on
    /// their own.
    pub fn release(&self, identity: &str) {
        self.lock().concurrency.release(identity);
    }

    pub fn update_quota(&self, identity: &str, snap: &QuotaSnapshot) {
        let now = now_epoch_ms();
        self.lock().quota.update(identity, snap, now);
    }

    pub fn stats(&self) -> GuardStats {
        GuardStats {
            concurrency: self.lock().concurrency.snapshot(),
            config: self.config.clone(),
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    fn gc(&self) {
        let now = now_epoch_ms();
        let mut state = self.lock();
        state.window.gc(now, &self.config);
        state.quota.gc(now);
    }

    pub fn shutdown(&self) {
        self.gc_cancel.cancel();
    }
}

impl Drop for RateLimitGuard {
    fn drop(&mut self) {
        self.gc_cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> RateLimitConfig {
        RateLimitConfig {
            max_concurrent_jobs: 3,
            max_concurrent_jobs_per_user: 2,
            window_ms: 500,
            max_requests_per_window: 100,
            max_requests_per_window_per_user: 3,
            quota_reject_threshold_percent: 10.0,
            stale_job_timeout_ms: 5_000,
            gc_interval_ms: 60_000,
        }
    }

    #[test]
    fn concurrency_per_user_then_global_limits() {
        let cfg = cfg();
        let mut t = ConcurrencyTracker::default();

        t.acquire("a");
        t.acquire("a");
        let d = t.can_acquire("a", &cfg);
        assert!(!d.allowed);
        assert!(d.reason.as_deref().unwrap().contains("concurrent agent jobs"));
        assert_eq!(d.retry_after_s, Some(15));

        assert!(t.can_acquire("b", &cfg).allowed);
        t.acquire("b");
        let d = t.can_acquire("d", &cfg);
        assert!(!d.allowed);
        assert!(d.reason.as_deref().unwrap().contains("maximum capacity"));
        assert_eq!(d.retry_after_s, Some(10));
    }

    #[test]
    fn rejected_checks_do_not_mutate_state() {
        let cfg = cfg();
        let mut t = ConcurrencyTracker::default();
        t.acquire("a");
        t.acquire("a");
        for _ in 0..5 {
            assert!(!t.can_acquire("a", &cfg).allowed);
        }
        assert_eq!(t.snapshot().global_active, 2);
    }

    #[test]
    fn release_is_saturating_and_drops_empty_entries() {
        let mut t = ConcurrencyTracker::default();
        t.acquire("a");
        t.release("a");
        t.release("a");
        t.release("ghost");
        let snap = t.snapshot();
        assert_eq!(snap.global_active, 0);
        assert!(snap.per_identity.is_empty());
    }

    #[test]
    fn concurrency_global_matches_outstanding_acquires() {
        let cfg = RateLimitConfig {
            max_concurrent_jobs: 1000,
            max_concurrent_jobs_per_user: 1000,
            ..cfg()
        };
        let mut t = ConcurrencyTracker::default();
        let mut outstanding = 0i64;
        for i in 0..200u32 {
            let id = format!("id-{}", i % 7);
            if i % 3 == 0 && outstanding > 0 {
                t.release(&id);
                outstanding -= 1;
            } else {
                assert!(t.can_acquire(&id, &cfg).allowed);
                t.acquire(&id);
                outstanding += 1;
            }
        }
        let snap = t.snapshot();
        assert_eq!(snap.global_active as i64, outstanding);
        // The per-identity counts always sum to the global count.
        assert_eq!(snap.per_identity.values().sum::<u32>(), snap.global_active);
    }

    #[test]
    fn window_rejects_then_recovers_after_the_window() {
        let cfg = cfg();
        let mut w = SlidingWindowRateLimiter::default();
        let t0 = 1_000_000;

        for i in 0..3 {
            assert!(w.check("u", t0 + i, &cfg).allowed);
            w.record("u", t0 + i);
        }
        let d = w.check("u", t0 + 10, &cfg);
        assert!(!d.allowed);
        assert!(d.retry_after_s.unwrap() >= 1);

        // 550ms later the whole burst has aged out.
        assert!(w.check("u", t0 + 550, &cfg).allowed);
    }

    #[test]
    fn window_retry_hint_reflects_oldest_timestamp() {
        let cfg = RateLimitConfig {
            window_ms: 10_000,
            max_requests_per_window_per_user: 1,
            ..cfg()
        };
        let mut w = SlidingWindowRateLimiter::default();
        w.record("u", 1_000);
        let d = w.check("u", 2_000, &cfg);
        assert!(!d.allowed);
        // oldest=1000, window=10000, now=2000 -> 9000ms -> 9s
        assert_eq!(d.retry_after_s, Some(9));
    }

    #[test]
    fn window_gc_prunes_and_drops_empty_identities() {
        let cfg = cfg();
        let mut w = SlidingWindowRateLimiter::default();
        w.record("u", 1_000);
        w.record("v", 1_000);
        w.record("v", 10_000);
        w.gc(10_000, &cfg);
        assert!(!w.per_identity.contains_key("u"));
        assert_eq!(w.per_identity.get("v").map(|s| s.len()), Some(1));
        assert_eq!(w.global.len(), 1);
    }

    #[test]
    fn quota_below_threshold_rejects_with_details() {
        let mut q = QuotaMonitor::default();
        q.update(
            "u",
            &QuotaSnapshot {
                remaining_percent: Some(5.0),
                used_requests: Some(95),
                entitlement_requests: Some(100),
                is_unlimited: Some(false),
                reset_date: Some("2026-09-01".to_string()),
            },
            1_000,
        );
        let d = q.check("u", 2_000, 10.0);
        assert!(!d.allowed);
        let reason = d.reason.unwrap();
        assert!(reason.contains("quota nearly exhausted"), "{reason}");
        assert!(reason.contains("95 of 100"), "{reason}");
        assert!(reason.contains("2026-09-01"), "{reason}");
    }

    #[test]
    fn quota_unlimited_never_rejects() {
        let mut q = QuotaMonitor::default();
        q.update(
            "u",
            &QuotaSnapshot {
                remaining_percent: Some(0.0),
                is_unlimited: Some(true),
                ..Default::default()
            },
            1_000,
        );
        assert!(q.check("u", 2_000, 10.0).allowed);
    }

    #[test]
    fn quota_stale_records_and_unknown_identities_are_allowed() {
        let mut q = QuotaMonitor::default();
        assert!(q.check("unknown", 1_000, 10.0).allowed);

        q.update(
            "u",
            &QuotaSnapshot {
                remaining_percent: Some(1.0),
                ..Default::default()
            },
            1_000,
        );
        assert!(!q.check("u", 2_000, 10.0).allowed);
        // Five minutes on, the record is stale and no longer blocks.
        assert!(q.check("u", 1_000 + QUOTA_STALE_AFTER_MS + 1, 10.0).allowed);
    }

    #[test]
    fn quota_partial_update_keeps_prior_fields() {
        let mut q = QuotaMonitor::default();
        q.update(
            "u",
            &QuotaSnapshot {
                remaining_percent: Some(50.0),
                used_requests: Some(10),
                entitlement_requests: Some(20),
                ..Default::default()
            },
            1_000,
        );
        // Fresh record above the threshold never rejects.
        assert!(q.check("u", 1_500, 10.0).allowed);
        q.update(
            "u",
            &QuotaSnapshot {
                remaining_percent: Some(4.0),
                ..Default::default()
            },
            2_000,
        );
        let d = q.check("u", 3_000, 10.0);
        assert!(!d.allowed);
        assert!(d.reason.unwrap().contains("10 of 20"));
    }

    #[test]
    fn quota_gc_drops_old_records() {
        let mut q = QuotaMonitor::default();
        q.update("u", &QuotaSnapshot::default(), 1_000);
        q.gc(1_000 + QUOTA_RECORD_TTL_MS + 1);
        assert!(q.records.is_empty());
    }

    #[tokio::test]
    async fn guard_runs_the_full_check_acquire_release_protocol() {
        let guard = RateLimitGuard::new(cfg());
        assert!(guard.check("u").allowed);
        guard.acquire("u");
        guard.acquire("u");
        assert!(!guard.check("u").allowed);

        guard.release("u");
        assert!(guard.check("u").allowed);

        let stats = guard.stats();
        assert_eq!(stats.concurrency.global_active, 1);
        guard.shutdown();
    }

    #[tokio::test]
    async fn guard_quota_rejection_flows_through_check() {
        let guard = RateLimitGuard::new(cfg());
        guard.update_quota(
            "u",
            &QuotaSnapshot {
                remaining_percent: Some(2.0),
                ..Default::default()
            },
        );
        let d = guard.check("u");
        assert!(!d.allowed);
        assert!(d.reason.unwrap().contains("quota"));
        guard.shutdown();
    }

    #[tokio::test]
    async fn counters_stay_consistent_under_concurrent_admissions() {
        let guard = RateLimitGuard::new(RateLimitConfig {
            max_concurrent_jobs: 100,
            max_concurrent_jobs_per_user: 5,
            max_requests_per_window: 1000,
            max_requests_per_window_per_user: 1000,
            ..cfg()
        });

        let mut handles = Vec::new();
        for _ in 0..50 {
            let g = guard.clone();
            handles.push(tokio::spawn(async move {
                // check+acquire under the engine's admission discipline is
                // modelled here as a single locked section.
                let d = g.check("u");
                if d.allowed {
                    g.acquire("u");
                    true
                } else {
                    false
                }
            }));
        }
        let mut admitted = 0;
        for h in handles {
            if h.await.unwrap() {
                admitted += 1;
            }
        }
        // Without external serialization admissions may race; the guard
        // itself never goes below zero or loses counts.
        assert!(admitted >= 5);
        assert_eq!(guard.stats().concurrency.global_active, admitted);
        guard.shutdown();
    }
}
