//! Outbound egress identity pool
//!
//! Holds the configured proxy URLs, hands them out round-robin, and bounds
//! the number of in-flight proxied calls with a counting semaphore. Proxy
//! hostnames are resolved to IPv4 once at init so high probe fan-out does
//! not contend on the DNS resolver.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info};
use url::Url;

/// Minimum slot count applied when the configured concurrency is absent
const MIN_CONCURRENCY: usize = 10;

/// Round-robin pool of egress proxies with a global in-flight cap
pub struct ProxyPool {
    proxies: Vec<Url>,
    cursor: AtomicUsize,
    permits: Arc<Semaphore>,
    capacity: usize,
    smtp_proxy_enabled: bool,
}

impl ProxyPool {
    /// Parse and pre-resolve the configured proxy URLs.
    ///
    /// `concurrency` of 0 selects the default: the number of proxies,
    /// with a floor of [`MIN_CONCURRENCY`].
    pub async fn new(
        proxy_urls: &[String],
        concurrency: usize,
        smtp_proxy_enabled: bool,
    ) -> Result<Self> {
        let mut proxies = Vec::with_capacity(proxy_urls.len());
        for raw in proxy_urls {
            let raw = raw.trim();
            if raw.is_empty() {
                continue;
            }
            let mut url: Url = raw
                .parse()
                .with_context(|| format!("invalid proxy URL {raw:?}"))?;
            preresolve_host(&mut url).await;
            proxies.push(url);
        }

        let capacity = if concurrency > 0 {
            concurrency
        } else {
            proxies.len().max(MIN_CONCURRENCY)
        };

        info!(
            proxies = proxies.len(),
            capacity, smtp_proxy_enabled, "proxy pool initialized"
        );

        Ok(Self {
            proxies,
            cursor: AtomicUsize::new(0),
            permits: Arc::new(Semaphore::new(capacity)),
            capacity,
            smtp_proxy_enabled,
        })
    }

    /// An empty pool: every connection goes out direct.
    pub fn disabled() -> Self {
        Self {
            proxies: Vec::new(),
            cursor: AtomicUsize::new(0),
            permits: Arc::new(Semaphore::new(MIN_CONCURRENCY)),
            capacity: MIN_CONCURRENCY,
            smtp_proxy_enabled: false,
        }
    }

    pub fn enabled(&self) -> bool {
        !self.proxies.is_empty()
    }

    /// Whether port-25 traffic should be tunnelled through the pool.
    /// Without proxies configured this is always false (hybrid mode).
    pub fn smtp_proxy_enabled(&self) -> bool {
        self.smtp_proxy_enabled && self.enabled()
    }

    /// Atomic round-robin selection of the next egress identity
    pub fn next(&self) -> Option<&Url> {
        if self.proxies.is_empty() {
            return None;
        }
        let n = self.cursor.fetch_add(1, Ordering::Relaxed);
        Some(&self.proxies[n % self.proxies.len()])
    }

    pub fn proxies(&self) -> &[Url] {
        &self.proxies
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Acquire an in-flight slot, giving up when the deadline fires.
    ///
    /// The returned permit is the release guard: dropping it returns the
    /// slot exactly once, so holding it next to a proxied connection makes
    /// close-time release idempotent.
    pub async fn acquire_slot(
        &self,
        deadline: tokio::time::Instant,
    ) -> Option<OwnedSemaphorePermit> {
        match tokio::time::timeout_at(deadline, self.permits.clone().acquire_owned()).await {
            Ok(Ok(permit)) => Some(permit),
            Ok(Err(_)) => None,
            Err(_) => {
                debug!("timed out waiting for a proxy slot");
                None
            }
        }
    }
}

/// Replace a proxy URL's hostname with its IPv4 address when possible.
/// Failures leave the URL untouched; the dial will resolve it lazily.
async fn preresolve_host(url: &mut Url) {
    let Some(host) = url.host_str().map(str::to_owned) else {
        return;
    };
    if host.parse::<std::net::IpAddr>().is_ok() {
        return;
    }
    let port = url.port_or_known_default().unwrap_or(1080);
    let Ok(addrs) = tokio::net::lookup_host((host.as_str(), port)).await else {
        debug!("could not pre-resolve proxy host {host}");
        return;
    };
    let addrs: Vec<_> = addrs.collect();
    let chosen = addrs
        .iter()
        .find(|a| a.is_ipv4())
        .or_else(|| addrs.first());
    if let Some(addr) = chosen {
        if url.set_ip_host(addr.ip()).is_ok() {
            debug!("pre-resolved proxy {host} to {}", addr.ip());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    async fn pool_of(urls: &[&str]) -> ProxyPool {
        let urls: Vec<String> = urls.iter().map(|s| s.to_string()).collect();
        ProxyPool::new(&urls, 0, false).await.unwrap()
    }

    #[tokio::test]
    async fn round_robin_visits_every_proxy_fairly() {
        let pool = pool_of(&[
            "socks5://10.0.0.1:1080",
            "socks5://10.0.0.2:1080",
            "socks5://10.0.0.3:1080",
        ])
        .await;

        let rounds = 4;
        let mut seen: HashMap<String, usize> = HashMap::new();
        for _ in 0..(rounds * 3) {
            let url = pool.next().unwrap().to_string();
            *seen.entry(url).or_default() += 1;
        }

        assert_eq!(seen.len(), 3);
        for count in seen.values() {
            assert!(*count >= rounds);
        }
    }

    #[tokio::test]
    async fn empty_pool_is_disabled() {
        let pool = ProxyPool::disabled();
        assert!(!pool.enabled());
        assert!(!pool.smtp_proxy_enabled());
        assert!(pool.next().is_none());
    }

    #[tokio::test]
    async fn default_capacity_has_a_floor() {
        let pool = pool_of(&["http://10.0.0.1:8080"]).await;
        assert_eq!(pool.capacity(), 10);

        let urls: Vec<String> = vec!["http://10.0.0.1:8080".into()];
        let pool = ProxyPool::new(&urls, 3, false).await.unwrap();
        assert_eq!(pool.capacity(), 3);
    }

    #[tokio::test]
    async fn smtp_proxying_requires_a_populated_pool() {
        let urls: Vec<String> = vec!["socks5://10.0.0.1:1080".into()];
        let pool = ProxyPool::new(&urls, 0, true).await.unwrap();
        assert!(pool.smtp_proxy_enabled());

        let pool = ProxyPool::new(&[], 0, true).await.unwrap();
        assert!(!pool.smtp_proxy_enabled());
    }

    #[tokio::test]
    async fn permit_release_frees_the_slot() {
        let urls: Vec<String> = vec!["socks5://10.0.0.1:1080".into()];
        let pool = ProxyPool::new(&urls, 1, false).await.unwrap();
        let deadline = tokio::time::Instant::now() + std::time::Duration::from_millis(50);

        let permit = pool.acquire_slot(deadline).await;
        assert!(permit.is_some());

        // second acquisition blocks until the first permit drops
        let deadline2 = tokio::time::Instant::now() + std::time::Duration::from_millis(50);
        assert!(pool.acquire_slot(deadline2).await.is_none());

        drop(permit);
        let deadline3 = tokio::time::Instant::now() + std::time::Duration::from_millis(50);
        assert!(pool.acquire_slot(deadline3).await.is_some());
    }
}
