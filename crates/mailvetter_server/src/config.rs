//! Configuration loaded from the environment via figment
//!
//! Every knob is a plain environment variable (no prefix), matching how
//! the service is deployed: `REDIS_ADDR`, `DB_URL`, `PROXY_LIST`,
//! `PROXY_CONCURRENCY`, `SMTP_PROXY_ENABLED`, `WORKER_CONCURRENCY`,
//! `API_SECRET_KEY`, `HIBP_API_KEY`, `HTTP_LISTEN`.

use anyhow::Context;
use figment::{
    providers::{Env, Serialized},
    Figment,
};
use serde::{Deserialize, Serialize};

/// Application configuration shared by the API and the worker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Redis endpoint backing the task queue
    pub redis_addr: String,
    /// Postgres connection string (required)
    pub db_url: String,
    /// Comma-separated SOCKS5/HTTP proxy URLs; empty disables proxying
    pub proxy_list: String,
    /// HTTP proxy slot cap; 0 selects the pool default
    pub proxy_concurrency: usize,
    /// `true`/`1` routes port-25 traffic through the proxies
    pub smtp_proxy_enabled: String,
    /// Manual override of the worker pool size; 0 auto-tunes
    pub worker_concurrency: usize,
    /// Static bearer token for the HTTP API; empty locks the API down
    pub api_secret_key: String,
    /// HaveIBeenPwned API key; empty disables the breach probe
    pub hibp_api_key: String,
    /// HTTP listen address for the API binary
    pub http_listen: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            redis_addr: "localhost:6379".to_string(),
            db_url: String::new(),
            proxy_list: String::new(),
            proxy_concurrency: 0,
            smtp_proxy_enabled: String::new(),
            worker_concurrency: 0,
            api_secret_key: String::new(),
            hibp_api_key: String::new(),
            http_listen: "0.0.0.0:8080".to_string(),
        }
    }
}

impl AppConfig {
    /// Load defaults, then overlay environment variables
    pub fn load() -> anyhow::Result<Self> {
        Figment::from(Serialized::defaults(AppConfig::default()))
            .merge(Env::raw().only(&[
                "REDIS_ADDR",
                "DB_URL",
                "PROXY_LIST",
                "PROXY_CONCURRENCY",
                "SMTP_PROXY_ENABLED",
                "WORKER_CONCURRENCY",
                "API_SECRET_KEY",
                "HIBP_API_KEY",
                "HTTP_LISTEN",
            ]))
            .extract()
            .context("loading configuration from environment")
    }

    /// Fail fast on settings the process cannot run without
    pub fn require_db(&self) -> anyhow::Result<()> {
        if self.db_url.is_empty() {
            anyhow::bail!("DB_URL environment variable is required");
        }
        Ok(())
    }

    /// The configured proxy URLs, trimmed and de-blanked
    pub fn proxies(&self) -> Vec<String> {
        self.proxy_list
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// Whether port-25 traffic should traverse the proxies
    pub fn smtp_proxy(&self) -> bool {
        matches!(
            self.smtp_proxy_enabled.to_ascii_lowercase().as_str(),
            "true" | "1"
        )
    }

    /// The HIBP key, or `None` when unset
    pub fn hibp_key(&self) -> Option<String> {
        if self.hibp_api_key.is_empty() {
            None
        } else {
            Some(self.hibp_api_key.clone())
        }
    }

    /// Worker pool size: the manual override, or an auto-tuned default.
    ///
    /// With SMTP traffic tunnelled through proxies the pool tracks the
    /// proxy slot cap (twice the cap, floor 10); direct SMTP mode runs a
    /// flat 50.
    pub fn worker_pool_size(&self, proxy_capacity: usize) -> usize {
        if self.worker_concurrency > 0 {
            return self.worker_concurrency;
        }
        if !self.proxies().is_empty() && self.smtp_proxy() {
            (proxy_capacity * 2).max(10)
        } else {
            50
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = AppConfig::default();
        assert_eq!(config.redis_addr, "localhost:6379");
        assert!(config.proxies().is_empty());
        assert!(!config.smtp_proxy());
        assert!(config.hibp_key().is_none());
        assert!(config.require_db().is_err());
    }

    #[test]
    fn proxy_list_is_split_and_trimmed() {
        let config = AppConfig {
            proxy_list: "socks5://a:1080, socks5://b:1080,,".to_string(),
            ..AppConfig::default()
        };
        assert_eq!(config.proxies(), vec!["socks5://a:1080", "socks5://b:1080"]);
    }

    #[test]
    fn smtp_proxy_accepts_true_and_one() {
        for value in ["true", "TRUE", "1"] {
            let config = AppConfig {
                smtp_proxy_enabled: value.to_string(),
                ..AppConfig::default()
            };
            assert!(config.smtp_proxy(), "{value}");
        }
        for value in ["", "false", "0", "yes"] {
            let config = AppConfig {
                smtp_proxy_enabled: value.to_string(),
                ..AppConfig::default()
            };
            assert!(!config.smtp_proxy(), "{value:?}");
        }
    }

    #[test]
    fn worker_pool_auto_tunes_to_proxy_capacity() {
        let config = AppConfig {
            proxy_list: "socks5://a:1080".to_string(),
            smtp_proxy_enabled: "true".to_string(),
            ..AppConfig::default()
        };
        assert_eq!(config.worker_pool_size(12), 24);
        assert_eq!(config.worker_pool_size(3), 10);

        // direct SMTP mode
        let config = AppConfig::default();
        assert_eq!(config.worker_pool_size(0), 50);

        // explicit override wins
        let config = AppConfig {
            worker_concurrency: 7,
            ..AppConfig::default()
        };
        assert_eq!(config.worker_pool_size(100), 7);
    }
}
