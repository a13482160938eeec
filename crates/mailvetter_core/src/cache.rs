//! Process-wide TTL cache for per-domain probe results
//!
//! A single store holds both `DomainInfra` and `SmtpHostBehavior` entries as
//! tagged variants. Reads take the read lock and are O(1); expired entries
//! are reaped by a background sweeper rather than inline on the hot path.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tracing::{debug, info};

use crate::models::{DomainInfra, SmtpHostBehavior};

/// TTL for per-domain infrastructure facts
pub const INFRA_TTL: Duration = Duration::from_secs(15 * 60);
/// TTL for observed MX host behavior
pub const SMTP_HOST_TTL: Duration = Duration::from_secs(30 * 60);
/// Sweeper wake interval, kept shorter than the shortest TTL so expired
/// entries are reaped promptly without hammering the write lock
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Cached value, tagged by kind
#[derive(Debug, Clone)]
pub enum CacheValue {
    Infra(DomainInfra),
    SmtpHost(SmtpHostBehavior),
}

#[derive(Debug, Clone)]
struct Entry {
    value: CacheValue,
    expires_at: Instant,
}

/// Thread-safe in-memory cache keyed by domain-derived strings
#[derive(Default)]
pub struct DomainCache {
    entries: RwLock<HashMap<String, Entry>>,
}

/// Cache key for a domain's infrastructure bundle
pub fn infra_key(domain: &str) -> String {
    format!("infra:{domain}")
}

/// Cache key for a primary MX host's observed behavior
pub fn smtp_host_key(primary_mx: &str, domain: &str) -> String {
    format!("smtp_host:{primary_mx}|{domain}")
}

impl DomainCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a value with the given TTL
    pub fn set(&self, key: impl Into<String>, value: CacheValue, ttl: Duration) {
        let mut entries = self.entries.write().expect("cache lock poisoned");
        entries.insert(
            key.into(),
            Entry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
    }

    /// Retrieve a value. Returns `None` on a miss or if the entry has
    /// expired; expired entries are left for the sweeper to delete.
    pub fn get(&self, key: &str) -> Option<CacheValue> {
        let entries = self.entries.read().expect("cache lock poisoned");
        let entry = entries.get(key)?;
        if Instant::now() > entry.expires_at {
            return None;
        }
        Some(entry.value.clone())
    }

    /// Number of stored entries, including expired ones not yet swept
    pub fn len(&self) -> usize {
        self.entries.read().expect("cache lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Delete all expired entries, returning how many were removed.
    ///
    /// Holds the write lock for the duration of the sweep; call only from
    /// the background sweeper, not inline on the verification path.
    pub fn sweep(&self) -> usize {
        let mut entries = self.entries.write().expect("cache lock poisoned");
        let now = Instant::now();
        let before = entries.len();
        entries.retain(|_, entry| now <= entry.expires_at);
        before - entries.len()
    }
}

/// Background sweep loop. Wakes every [`SWEEP_INTERVAL`], reaps expired
/// entries, and exits when the shutdown channel flips.
pub async fn run_sweeper(cache: Arc<DomainCache>, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
    ticker.tick().await; // the first tick fires immediately

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let removed = cache.sweep();
                if removed > 0 {
                    info!(removed, remaining = cache.len(), "swept expired cache entries");
                } else {
                    debug!(remaining = cache.len(), "cache sweep found nothing to reap");
                }
            }
            _ = shutdown.changed() => {
                debug!("cache sweeper exiting");
                return;
            }
        }
    }
}
