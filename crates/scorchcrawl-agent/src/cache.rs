//! Identity-keyed cache of LLM-runtime client handles.

use crate::session::SessionClient;
use scorchcrawl_core::{now_epoch_ms, Result};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Idle clients older than this are evicted and shut down.
pub const CLIENT_IDLE_TTL_MS: u64 = 30 * 60_000;

struct Entry {
    client: Arc<dyn SessionClient>,
    last_used_ms: u64,
}

#[derive(Default)]
pub struct SessionClientCache {
    entries: Mutex<HashMap<String, Entry>>,
}

impl SessionClientCache {
    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Entry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Return the cached client for `identity`, creating one with `make`
    /// on a miss. Refreshes the idle clock either way.
    pub fn get_or_create(
        &self,
        identity: &str,
        make: impl FnOnce() -> Result<Arc<dyn SessionClient>>,
    ) -> Result<Arc<dyn SessionClient>> {
        let mut entries = self.lock();
        if let Some(entry) = entries.get_mut(identity) {
            entry.last_used_ms = now_epoch_ms();
            return Ok(entry.client.clone());
        }
        let client = make()?;
        entries.insert(
            identity.to_string(),
            Entry {
                client: client.clone(),
                last_used_ms: now_epoch_ms(),
            },
        );
        Ok(client)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Evict entries idle past the TTL, asking each evicted client to
    /// shut down (errors ignored). Returns how many were evicted.
    pub async fn evict_idle(&self, now_ms: u64) -> usize {
        let evicted: Vec<Arc<dyn SessionClient>> = {
            let mut entries = self.lock();
            let stale: Vec<String> = entries
                .iter()
                .filter(|(_, e)| now_ms.saturating_sub(e.last_used_ms) > CLIENT_IDLE_TTL_MS)
                .map(|(k, _)| k.clone())
                .collect();
            stale
                .into_iter()
                .filter_map(|k| entries.remove(&k))
                .map(|e| e.client)
                .collect()
        };
        let n = evicted.len();
        for client in evicted {
            let _ = client.shutdown().await;
        }
        n
    }

    /// Shut everything down and clear the cache.
    pub async fn shutdown_all(&self) {
        let clients: Vec<Arc<dyn SessionClient>> =
            self.lock().drain().map(|(_, e)| e.client).collect();
        for client in clients {
            let _ = client.shutdown().await;
        }
    }
}
