//! # mailvetter_core
//!
//! Deliverability-and-identity verification engine for email addresses.
//! Given an address, the engine emits a 0–99 confidence score together with
//! a categorical status and a reachability band, fused from DNS, SMTP,
//! HTTP-identity, and historical signals.
//!
//! ## Features
//!
//! - **Parallel signal acquisition** — infra, SMTP, and identity collectors
//!   run concurrently with per-signal timeouts and a shared domain cache
//! - **Provider-aware SMTP probing** with adaptive pacing for strict
//!   enterprise gateways and a ghost-probe timing comparison
//! - **HTTP identity probes** against Microsoft, Google, Gravatar, GitHub,
//!   Adobe, and HaveIBeenPwned
//! - **Deterministic scoring** with Office 365 zombie correction and
//!   catch-all disambiguation
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use mailvetter_core::{EngineConfig, ProxyPool, Verifier};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let pool = Arc::new(ProxyPool::disabled());
//!     let verifier = Verifier::new(EngineConfig::default(), pool)?;
//!
//!     let result = verifier.verify("ada@example.com").await;
//!     println!("{} scored {} ({:?})", result.email, result.score, result.status);
//!
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod disposable;
pub mod dns;
pub mod heuristics;
pub mod identity;
pub mod infra;
pub mod models;
pub mod pipeline;
pub mod proxy;
pub mod scoring;
pub mod smtp;

use std::time::Duration;

/// Configuration for the verification engine
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Hostname announced in SMTP HELO commands
    pub helo_host: String,
    /// Overall deadline for a single verification
    pub verification_timeout: Duration,
    /// Global cap on concurrent SMTP conversations
    pub smtp_max_conversations: usize,
    /// HaveIBeenPwned API key; `None` disables the breach probe
    pub hibp_api_key: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            helo_host: "mta1.mailvetter.com".to_string(),
            verification_timeout: Duration::from_secs(300),
            smtp_max_conversations: 15,
            hibp_api_key: None,
        }
    }
}

// Re-export main types
pub use models::{
    Provider, Reachability, RiskAnalysis, ScoreBreakdown, ValidationResult, VerificationStatus,
};
pub use pipeline::Verifier;
pub use proxy::ProxyPool;
