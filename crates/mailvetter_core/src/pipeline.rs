//! Verification pipeline
//!
//! Orchestrates a single verification: pre-filters that need no I/O, then
//! three parallel collectors (infrastructure, SMTP, identity) writing into
//! a shared analysis record, then the scoring engine. The caller's
//! deadline bounds everything; on expiry the partial record is returned
//! with an `unknown` status instead of an error.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use rand::Rng;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, instrument, warn};
use url::Url;

use crate::cache::{self, CacheValue, DomainCache};
use crate::disposable;
use crate::dns::DnsResolver;
use crate::heuristics;
use crate::identity::HttpProber;
use crate::infra;
use crate::models::{
    DomainInfra, Reachability, RiskAnalysis, ScoreBreakdown, SmtpHostBehavior, ValidationResult,
    VerificationStatus,
};
use crate::proxy::ProxyPool;
use crate::scoring;
use crate::smtp::{is_no_such_user, ProbeOutcome, SmtpProber};
use crate::EngineConfig;

/// Error string reported when the verification deadline expires
pub const TIMEOUT_ERROR: &str = "validation timed out";

/// Settle pause between SMTP conversations against the same host
const SETTLE_PAUSE: Duration = Duration::from_millis(500);
/// Pause before a damping re-probe of the ghost pair
const ANTI_JITTER_PAUSE: Duration = Duration::from_millis(250);
/// Back-off before retrying a transiently-failed SMTP probe
const TRANSIENT_RETRY_BACKOFF: Duration = Duration::from_secs(2);

/// Catch-all deltas inside this window are ambiguous enough to re-measure
const JITTER_WINDOW_MS: (u64, u64) = (100, 400);
/// Deltas above this get a minimum-of-two defense against one-off proxy lag
const SUSPICIOUS_DELTA_MS: u64 = 1500;

/// The verification engine: owns the resolver, the caches, and the probes
pub struct Verifier {
    config: EngineConfig,
    resolver: Arc<DnsResolver>,
    cache: Arc<DomainCache>,
    proxies: Arc<ProxyPool>,
    smtp: Arc<SmtpProber>,
    http: Arc<HttpProber>,
}

impl Verifier {
    pub fn new(config: EngineConfig, proxies: Arc<ProxyPool>) -> anyhow::Result<Self> {
        let resolver = Arc::new(DnsResolver::new()?);
        let smtp = Arc::new(SmtpProber::new(
            proxies.clone(),
            config.helo_host.clone(),
            config.smtp_max_conversations,
        ));
        let http = Arc::new(HttpProber::new(proxies.clone(), config.hibp_api_key.clone())?);

        Ok(Self {
            config,
            resolver,
            cache: Arc::new(DomainCache::new()),
            proxies,
            smtp,
            http,
        })
    }

    /// Handle to the process-wide cache, for wiring up the sweeper
    pub fn cache(&self) -> Arc<DomainCache> {
        self.cache.clone()
    }

    /// Verify an address under the engine's default deadline
    pub async fn verify(&self, email: &str) -> ValidationResult {
        let deadline = Instant::now() + self.config.verification_timeout;
        self.verify_with_deadline(email, deadline).await
    }

    /// Verify an address, finishing (possibly partially) by `deadline`
    #[instrument(skip(self, deadline), fields(email = %email))]
    pub async fn verify_with_deadline(&self, email: &str, deadline: Instant) -> ValidationResult {
        let started = std::time::Instant::now();

        let Some((local, domain)) = heuristics::split_address(email) else {
            return ValidationResult {
                email: email.to_string(),
                score: 0,
                score_breakdown: ScoreBreakdown::new(),
                status: VerificationStatus::Invalid,
                reachability: Reachability::Bad,
                analysis: RiskAnalysis::default(),
                duration_ms: started.elapsed().as_millis() as u64,
                error: Some("malformed email address".to_string()),
            };
        };
        let local = local.to_string();
        let domain = domain.to_string();

        // burner domains are rejected before any probe runs
        if disposable::is_disposable_domain(&domain) {
            debug!("disposable domain, short-circuiting");
            return ValidationResult {
                email: email.to_string(),
                score: 0,
                score_breakdown: ScoreBreakdown::new(),
                status: VerificationStatus::Invalid,
                reachability: Reachability::Bad,
                analysis: RiskAnalysis::default(),
                duration_ms: started.elapsed().as_millis() as u64,
                error: None,
            };
        }

        let analysis = Arc::new(Mutex::new(RiskAnalysis::default()));
        {
            let mut a = analysis.lock().expect("analysis lock poisoned");
            a.is_role_account = heuristics::is_role_account(email);
            a.entropy_score = heuristics::entropy_score(&local);
        }

        // one egress identity per verification: every HTTP probe for this
        // address shares the same proxy so per-target rate limits see a
        // coherent fingerprint
        let pinned: Option<Url> = self.proxies.next().cloned();

        let mut collectors = JoinSet::new();
        collectors.spawn(collect_infra(
            self.resolver.clone(),
            self.cache.clone(),
            self.http.clone(),
            analysis.clone(),
            domain.clone(),
            pinned.clone(),
            deadline,
        ));
        collectors.spawn(collect_smtp(
            self.resolver.clone(),
            self.cache.clone(),
            self.smtp.clone(),
            analysis.clone(),
            email.to_string(),
            domain.clone(),
            pinned.clone(),
            deadline,
        ));
        collectors.spawn(collect_identity(
            self.resolver.clone(),
            self.http.clone(),
            analysis.clone(),
            email.to_string(),
            domain,
            pinned,
            deadline,
        ));

        let all_joined = tokio::time::timeout_at(deadline, async {
            while collectors.join_next().await.is_some() {}
        })
        .await;

        if all_joined.is_err() {
            warn!("verification deadline expired, returning partial analysis");
            collectors.abort_all();
            let partial = analysis.lock().expect("analysis lock poisoned").clone();
            return ValidationResult {
                email: email.to_string(),
                score: 0,
                score_breakdown: ScoreBreakdown::new(),
                status: VerificationStatus::Unknown,
                reachability: Reachability::Bad,
                analysis: partial,
                duration_ms: started.elapsed().as_millis() as u64,
                error: Some(TIMEOUT_ERROR.to_string()),
            };
        }

        let collected = analysis.lock().expect("analysis lock poisoned").clone();
        let verdict = scoring::score(&collected);
        let error = (verdict.score == 0 && verdict.status == VerificationStatus::Unknown)
            .then(|| "connection failed or no signals found".to_string());

        ValidationResult {
            email: email.to_string(),
            score: verdict.score,
            score_breakdown: verdict.breakdown,
            status: verdict.status,
            reachability: verdict.reachability,
            analysis: collected,
            duration_ms: started.elapsed().as_millis() as u64,
            error,
        }
    }
}

/// Collector A: provider classification, SPF/DMARC/SaaS tokens, RDAP age.
/// The whole bundle caches for 15 minutes per domain.
async fn collect_infra(
    resolver: Arc<DnsResolver>,
    cache: Arc<DomainCache>,
    http: Arc<HttpProber>,
    analysis: Arc<Mutex<RiskAnalysis>>,
    domain: String,
    pinned: Option<Url>,
    deadline: Instant,
) {
    let key = cache::infra_key(&domain);
    if let Some(CacheValue::Infra(bundle)) = cache.get(&key) {
        debug!("infra cache hit for {domain}");
        apply_infra(&analysis, &bundle);
        return;
    }

    let mx = resolver.lookup_mx(&domain).await.unwrap_or_default();
    let provider = infra::classify_provider(&mx);

    let (has_spf, has_dmarc, has_saas_tokens, domain_age_days) = tokio::join!(
        infra::check_spf(&resolver, &domain),
        infra::check_dmarc(&resolver, &domain),
        infra::check_saas_tokens(&resolver, &domain),
        infra::check_domain_age(&http, &domain, pinned.as_ref(), deadline),
    );

    let bundle = DomainInfra {
        provider,
        has_spf,
        has_dmarc,
        has_saas_tokens,
        domain_age_days,
    };
    cache.set(key, CacheValue::Infra(bundle.clone()), cache::INFRA_TTL);
    apply_infra(&analysis, &bundle);
}

fn apply_infra(analysis: &Mutex<RiskAnalysis>, bundle: &DomainInfra) {
    let mut a = analysis.lock().expect("analysis lock poisoned");
    a.provider = bundle.provider;
    a.has_spf = bundle.has_spf;
    a.has_dmarc = bundle.has_dmarc;
    a.has_saas_tokens = bundle.has_saas_tokens;
    a.domain_age_days = bundle.domain_age_days;
}

/// Collector B: MX resolution, the optional VRFY shortcut, the postmaster
/// probe, and the ghost-probe pair with timing-delta damping.
async fn collect_smtp(
    resolver: Arc<DnsResolver>,
    cache: Arc<DomainCache>,
    smtp: Arc<SmtpProber>,
    analysis: Arc<Mutex<RiskAnalysis>>,
    email: String,
    domain: String,
    pinned: Option<Url>,
    deadline: Instant,
) {
    let mx = match resolver.lookup_mx(&domain).await {
        Ok(records) if !records.is_empty() => records,
        _ => {
            debug!("no MX for {domain}, SMTP outcome unknown");
            analysis.lock().expect("analysis lock poisoned").smtp_status = 0;
            return;
        }
    };
    let primary = mx[0].host.clone();

    if smtp.probe_vrfy(&primary, &email, pinned.as_ref(), deadline).await {
        let mut a = analysis.lock().expect("analysis lock poisoned");
        a.has_vrfy = true;
        a.smtp_status = 250;
        return;
    }

    let host_key = cache::smtp_host_key(&primary, &domain);
    let cached = match cache.get(&host_key) {
        Some(CacheValue::SmtpHost(behavior)) => Some(behavior),
        _ => None,
    };

    let is_postmaster_broken = match cached {
        Some(behavior) => behavior.is_postmaster_broken,
        None => {
            let works = smtp
                .probe_postmaster(&primary, &domain, pinned.as_ref(), deadline)
                .await;
            // settle so strict hosts never see back-to-back conversations
            pause(SETTLE_PAUSE, deadline).await;
            !works
        }
    };

    let (mut status, mut delta, is_catch_all) =
        run_ghost_pair(&smtp, &email, &domain, &primary, pinned.as_ref(), deadline).await;

    if is_catch_all && delta > JITTER_WINDOW_MS.0 && delta < JITTER_WINDOW_MS.1 {
        // a small non-zero delta on a catch-all is usually proxy jitter:
        // average with a second measurement
        if pause(ANTI_JITTER_PAUSE, deadline).await {
            let (status2, delta2, _) =
                run_ghost_pair(&smtp, &email, &domain, &primary, pinned.as_ref(), deadline).await;
            delta = (delta + delta2) / 2;
            status = status2;
        }
    } else if delta > SUSPICIOUS_DELTA_MS {
        // one huge delta can be one-off proxy lag masquerading as a
        // tarpit: keep the minimum of two measurements
        if pause(ANTI_JITTER_PAUSE, deadline).await {
            let (_, delta2, _) =
                run_ghost_pair(&smtp, &email, &domain, &primary, pinned.as_ref(), deadline).await;
            if delta2 > 0 {
                delta = delta.min(delta2);
            }
        }
    }

    if cached.is_none() {
        cache.set(
            host_key,
            CacheValue::SmtpHost(SmtpHostBehavior {
                is_catch_all,
                is_postmaster_broken,
            }),
            cache::SMTP_HOST_TTL,
        );
    }

    let mut a = analysis.lock().expect("analysis lock poisoned");
    a.is_postmaster_broken = is_postmaster_broken;
    // always the live probe result, never the cached one: catch-all status
    // must reflect the server as it is right now
    a.is_catch_all = is_catch_all;
    a.smtp_status = status;
    a.timing_delta_ms = delta;
}

/// Probe the target and a random ghost at the same MX, classify the pair.
/// Returns `(smtp_status, timing_delta_ms, is_catch_all)`.
async fn run_ghost_pair(
    smtp: &SmtpProber,
    email: &str,
    domain: &str,
    primary_mx: &str,
    pinned: Option<&Url>,
    deadline: Instant,
) -> (u16, u64, bool) {
    let target = probe_with_retry(smtp, primary_mx, email, pinned, deadline).await;
    let target_transient = !target.accepted
        && target
            .error
            .as_ref()
            .is_some_and(|e| !is_no_such_user(e));
    if target_transient {
        debug!("target probe for {email} failed transiently after retry");
        return (0, 0, false);
    }
    if !target.accepted {
        return (550, 0, false);
    }

    if !pause(SETTLE_PAUSE, deadline).await {
        return (0, 0, false);
    }

    let ghost_addr = format!("{}@{domain}", ghost_local_part());
    let ghost = probe_with_retry(smtp, primary_mx, &ghost_addr, pinned, deadline).await;
    fuse_pair(&target, &ghost)
}

/// Classification table for an accepted target vs. its ghost
fn fuse_pair(target: &ProbeOutcome, ghost: &ProbeOutcome) -> (u16, u64, bool) {
    let delta = if target.elapsed > Duration::ZERO && ghost.elapsed > Duration::ZERO {
        (target.elapsed.as_millis() as u64).abs_diff(ghost.elapsed.as_millis() as u64)
    } else {
        0
    };

    if ghost.accepted {
        // the server takes mail for anyone
        return (0, delta, true);
    }
    let ghost_bounced = ghost.error.as_ref().is_some_and(is_no_such_user);
    if ghost_bounced {
        // the server distinguishes users, so the target's 250 is real
        return (250, delta, false);
    }
    // ghost failed transiently: the target acceptance still stands
    (250, delta, false)
}

/// One bounded retry for transient failures (connection errors that are
/// not a definitive no-such-user reply), with a 2 s back-off.
async fn probe_with_retry(
    smtp: &SmtpProber,
    mx_host: &str,
    target: &str,
    pinned: Option<&Url>,
    deadline: Instant,
) -> ProbeOutcome {
    let first = smtp.probe_rcpt(mx_host, target, pinned, deadline).await;
    let transient = !first.accepted
        && first
            .error
            .as_ref()
            .is_some_and(|e| !is_no_such_user(e));
    if !transient {
        return first;
    }
    if !pause(TRANSIENT_RETRY_BACKOFF, deadline).await {
        return first;
    }
    smtp.probe_rcpt(mx_host, target, pinned, deadline).await
}

/// A realistic-looking random local-part for the ghost probe. Plain hex
/// strings trip bot filters on some gateways; `first.last.xx` does not.
fn ghost_local_part() -> String {
    const FIRST: [&str; 10] = [
        "alex", "michael", "sarah", "david", "emma", "chris", "jessica", "matthew", "amanda",
        "daniel",
    ];
    const LAST: [&str; 10] = [
        "smith", "jones", "taylor", "brown", "williams", "wilson", "johnson", "davis", "miller",
        "martin",
    ];

    let mut rng = rand::thread_rng();
    format!(
        "{}.{}.{:02x}",
        FIRST[rng.gen_range(0..FIRST.len())],
        LAST[rng.gen_range(0..LAST.len())],
        rng.gen::<u8>(),
    )
}

/// Collector C: fan out every identity probe, applying each signal as it
/// lands so a deadline expiry still keeps everything collected so far.
async fn collect_identity(
    resolver: Arc<DnsResolver>,
    http: Arc<HttpProber>,
    analysis: Arc<Mutex<RiskAnalysis>>,
    email: String,
    domain: String,
    pinned: Option<Url>,
    deadline: Instant,
) {
    enum Signal {
        Teams(bool),
        SharePoint(bool),
        Calendar(bool),
        Gravatar(bool),
        GitHub(bool),
        Adobe(bool),
        Breaches(u32),
    }

    let mut probes: JoinSet<Signal> = JoinSet::new();
    {
        let http = http.clone();
        let email = email.clone();
        let pinned = pinned.clone();
        probes.spawn(async move {
            Signal::Teams(http.check_autodiscover(&email, pinned.as_ref(), deadline).await)
        });
    }
    {
        let http = http.clone();
        let email = email.clone();
        let pinned = pinned.clone();
        probes.spawn(async move {
            Signal::SharePoint(http.check_sharepoint(&email, pinned.as_ref(), deadline).await)
        });
    }
    {
        let http = http.clone();
        let email = email.clone();
        let pinned = pinned.clone();
        probes.spawn(async move {
            Signal::Calendar(
                http.check_google_calendar(&resolver, &email, &domain, pinned.as_ref(), deadline)
                    .await,
            )
        });
    }
    {
        let http = http.clone();
        let email = email.clone();
        let pinned = pinned.clone();
        probes.spawn(async move {
            Signal::Gravatar(http.check_gravatar(&email, pinned.as_ref(), deadline).await)
        });
    }
    {
        let http = http.clone();
        let email = email.clone();
        let pinned = pinned.clone();
        probes.spawn(async move {
            Signal::GitHub(http.check_github(&email, pinned.as_ref(), deadline).await)
        });
    }
    {
        let http = http.clone();
        let email = email.clone();
        let pinned = pinned.clone();
        probes.spawn(async move {
            Signal::Adobe(http.check_adobe(&email, pinned.as_ref(), deadline).await)
        });
    }
    if http.hibp_enabled() {
        let http = http.clone();
        let email = email.clone();
        let pinned = pinned.clone();
        probes.spawn(async move {
            Signal::Breaches(http.check_breaches(&email, pinned.as_ref(), deadline).await)
        });
    }

    loop {
        match tokio::time::timeout_at(deadline, probes.join_next()).await {
            Err(_) => {
                debug!("identity fan-out cut off by deadline");
                probes.abort_all();
                return;
            }
            Ok(None) => return,
            Ok(Some(Err(_))) => continue,
            Ok(Some(Ok(signal))) => {
                let mut a = analysis.lock().expect("analysis lock poisoned");
                match signal {
                    Signal::Teams(v) => a.has_teams_presence = v,
                    Signal::SharePoint(v) => a.has_sharepoint = v,
                    Signal::Calendar(v) => a.has_google_calendar = v,
                    Signal::Gravatar(v) => a.has_gravatar = v,
                    Signal::GitHub(v) => a.has_github = v,
                    Signal::Adobe(v) => a.has_adobe = v,
                    Signal::Breaches(count) => a.breach_count = count,
                }
            }
        }
    }
}

/// Deadline-aware sleep; false when the deadline fired first
async fn pause(duration: Duration, deadline: Instant) -> bool {
    tokio::time::timeout_at(deadline, tokio::time::sleep(duration))
        .await
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::smtp::SmtpError;

    fn verifier() -> Verifier {
        Verifier::new(EngineConfig::default(), Arc::new(ProxyPool::disabled())).unwrap()
    }

    fn accepted(ms: u64) -> ProbeOutcome {
        ProbeOutcome {
            accepted: true,
            elapsed: Duration::from_millis(ms),
            error: None,
        }
    }

    fn rejected(ms: u64, code: u16, message: &str) -> ProbeOutcome {
        ProbeOutcome {
            accepted: false,
            elapsed: Duration::from_millis(ms),
            error: Some(SmtpError::Reject {
                code,
                message: message.to_string(),
            }),
        }
    }

    #[tokio::test]
    async fn disposable_domain_short_circuits_without_probes() {
        let v = verifier();
        let result = v.verify("anyone@mailinator.com").await;
        assert_eq!(result.score, 0);
        assert_eq!(result.status, VerificationStatus::Invalid);
        assert_eq!(result.reachability, Reachability::Bad);
        assert!(result.error.is_none());
        // well under any network timeout: nothing was probed
        assert!(result.duration_ms < 1_000);
    }

    #[tokio::test]
    async fn malformed_address_is_invalid() {
        let v = verifier();
        for email in ["not-an-email", "@nouser.com", "trailing@", "a@b@c.com"] {
            let result = v.verify(email).await;
            assert_eq!(result.status, VerificationStatus::Invalid, "{email}");
            assert!(result.error.is_some(), "{email}");
        }
    }

    #[test]
    fn ghost_local_part_looks_human() {
        let local = ghost_local_part();
        let segments: Vec<&str> = local.split('.').collect();
        assert_eq!(segments.len(), 3);
        assert!(segments[2].chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn ghost_accepted_means_catch_all() {
        let (status, delta, catch_all) = fuse_pair(&accepted(120), &accepted(140));
        assert_eq!(status, 0);
        assert_eq!(delta, 20);
        assert!(catch_all);
    }

    #[test]
    fn ghost_bounce_confirms_the_target() {
        let (status, delta, catch_all) =
            fuse_pair(&accepted(300), &rejected(80, 550, "user unknown"));
        assert_eq!(status, 250);
        assert_eq!(delta, 220);
        assert!(!catch_all);
    }

    #[test]
    fn transient_ghost_keeps_the_acceptance() {
        let ghost = ProbeOutcome {
            accepted: false,
            elapsed: Duration::ZERO,
            error: Some(SmtpError::Timeout),
        };
        let (status, delta, catch_all) = fuse_pair(&accepted(300), &ghost);
        assert_eq!(status, 250);
        // one-sided timing measures nothing
        assert_eq!(delta, 0);
        assert!(!catch_all);
    }
}
