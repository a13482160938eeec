//! HTTP identity probes
//!
//! Each probe asks a public service whether it knows the address: Microsoft
//! Autodiscover, SharePoint personal sites, Google Calendar CalDAV,
//! Gravatar, GitHub, Adobe, and HaveIBeenPwned. All probes share one
//! connection-pool configuration, rotate User-Agents, and make two
//! attempts with the second attempt always unproxied — that rescues probes
//! when the pinned proxy is transiently blocked by the target.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use rand::Rng;
use serde::Deserialize;
use tokio::time::Instant;
use tracing::{debug, trace};
use url::Url;

use crate::dns::DnsResolver;
use crate::infra::classify_provider;
use crate::models::Provider;
use crate::proxy::ProxyPool;

/// Backstop timeout applied by every probe client
const PROBE_TIMEOUT: Duration = Duration::from_secs(20);
/// Pause before the second (unproxied) attempt
const RETRY_PAUSE: Duration = Duration::from_millis(500);
/// Back-off demanded by a HIBP 429
const HIBP_RATE_LIMIT_PAUSE: Duration = Duration::from_millis(1600);

const HIBP_ENDPOINT: &str = "https://haveibeenpwned.com/api/v3/breachedaccount/";

const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64; rv:127.0) Gecko/20100101 Firefox/127.0",
];

/// Path-segment escape set that leaves `@` intact.
///
/// The HIBP API takes the address as a URL *path* segment: `+` and `%` are
/// legal in a local-part but not in a path, while `@` must be kept as-is —
/// query-escaping it to `%40` is rejected by some gateways.
const PATH_SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'+')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

fn random_user_agent() -> &'static str {
    let idx = rand::thread_rng().gen_range(0..USER_AGENTS.len());
    USER_AGENTS[idx]
}

fn escape_email_path(email: &str) -> String {
    utf8_percent_encode(email, PATH_SEGMENT).to_string()
}

#[derive(Clone, Copy, PartialEq)]
enum Redirects {
    Follow,
    NoFollow,
}

/// Shared HTTP prober: clients, proxy routing, and the per-probe logic
pub struct HttpProber {
    pool: Arc<ProxyPool>,
    direct: reqwest::Client,
    direct_no_redirect: reqwest::Client,
    proxied: HashMap<String, reqwest::Client>,
    proxied_no_redirect: HashMap<String, reqwest::Client>,
    hibp_api_key: Option<String>,
}

fn client_builder(redirects: Redirects) -> reqwest::ClientBuilder {
    let builder = reqwest::Client::builder()
        .pool_max_idle_per_host(10)
        .pool_idle_timeout(Duration::from_secs(90))
        .timeout(PROBE_TIMEOUT);
    match redirects {
        Redirects::Follow => builder,
        Redirects::NoFollow => builder.redirect(reqwest::redirect::Policy::none()),
    }
}

impl HttpProber {
    pub fn new(pool: Arc<ProxyPool>, hibp_api_key: Option<String>) -> Result<Self> {
        let direct = client_builder(Redirects::Follow)
            .build()
            .context("building direct HTTP client")?;
        let direct_no_redirect = client_builder(Redirects::NoFollow)
            .build()
            .context("building direct no-redirect HTTP client")?;

        let mut proxied = HashMap::new();
        let mut proxied_no_redirect = HashMap::new();
        for proxy_url in pool.proxies() {
            let key = proxy_url.to_string();
            let proxy = reqwest::Proxy::all(key.clone())
                .with_context(|| format!("invalid proxy {key}"))?;
            proxied.insert(
                key.clone(),
                client_builder(Redirects::Follow)
                    .proxy(proxy.clone())
                    .build()
                    .context("building proxied HTTP client")?,
            );
            proxied_no_redirect.insert(
                key,
                client_builder(Redirects::NoFollow)
                    .proxy(proxy)
                    .build()
                    .context("building proxied no-redirect HTTP client")?,
            );
        }

        Ok(Self {
            pool,
            direct,
            direct_no_redirect,
            proxied,
            proxied_no_redirect,
            hibp_api_key,
        })
    }

    pub fn hibp_enabled(&self) -> bool {
        self.hibp_api_key.is_some()
    }

    fn client_for(&self, pinned: Option<&Url>, attempt: u32, redirects: Redirects) -> &reqwest::Client {
        let proxied = match redirects {
            Redirects::Follow => &self.proxied,
            Redirects::NoFollow => &self.proxied_no_redirect,
        };
        // attempt 2 is always direct
        if attempt == 1 {
            if let Some(url) = pinned {
                if let Some(client) = proxied.get(&url.to_string()) {
                    return client;
                }
            }
        }
        match redirects {
            Redirects::Follow => &self.direct,
            Redirects::NoFollow => &self.direct_no_redirect,
        }
    }

    /// Two-attempt dispatch: attempt 1 through the pinned proxy (holding a
    /// pool slot), a 500 ms pause, then attempt 2 direct. Non-2xx statuses
    /// are results, not errors — only transport failures trigger the retry.
    async fn dispatch<F>(
        &self,
        pinned: Option<&Url>,
        deadline: Instant,
        redirects: Redirects,
        build: F,
    ) -> Option<reqwest::Response>
    where
        F: Fn(&reqwest::Client) -> reqwest::RequestBuilder,
    {
        for attempt in 1..=2u32 {
            let using_proxy = attempt == 1 && pinned.is_some() && self.pool.enabled();
            let _slot = if using_proxy {
                match self.pool.acquire_slot(deadline).await {
                    Some(permit) => Some(permit),
                    None => return None,
                }
            } else {
                None
            };

            let client = self.client_for(pinned, attempt, redirects);
            let request = build(client).header(reqwest::header::USER_AGENT, random_user_agent());

            match tokio::time::timeout_at(deadline, request.send()).await {
                Ok(Ok(response)) => return Some(response),
                Ok(Err(e)) => {
                    trace!("probe attempt {attempt} failed: {e}");
                    if attempt == 1
                        && tokio::time::timeout_at(deadline, tokio::time::sleep(RETRY_PAUSE))
                            .await
                            .is_err()
                    {
                        return None;
                    }
                }
                Err(_) => return None,
            }
        }
        None
    }

    /// Microsoft Autodiscover lookup. A 302 means the tenant redirected the
    /// lookup elsewhere and is not a positive, so redirects are not
    /// followed; only a final 200 counts.
    pub async fn check_autodiscover(
        &self,
        email: &str,
        pinned: Option<&Url>,
        deadline: Instant,
    ) -> bool {
        let response = self
            .dispatch(pinned, deadline, Redirects::NoFollow, |client| {
                client
                    .get("https://outlook.office365.com/autodiscover/autodiscover.json")
                    .query(&[("Email", email), ("Protocol", "Autodiscoverv1")])
            })
            .await;
        matches!(response, Some(r) if r.status() == reqwest::StatusCode::OK)
    }

    /// SharePoint personal-site probe. The personal-site URL exists only
    /// for licensed users; 401/403/302 all mean "the site is there".
    pub async fn check_sharepoint(
        &self,
        email: &str,
        pinned: Option<&Url>,
        deadline: Instant,
    ) -> bool {
        let Some((local, domain)) = crate::heuristics::split_address(email) else {
            return false;
        };
        if !domain.contains('.') {
            return false;
        }
        let tenant = domain.split('.').next().unwrap_or_default();
        let user = local.replace(['.', '-'], "_");
        let domain_part = domain.replace('.', "_");
        let target =
            format!("https://{tenant}-my.sharepoint.com/personal/{user}_{domain_part}");

        let response = self
            .dispatch(pinned, deadline, Redirects::NoFollow, |client| {
                client.get(&target)
            })
            .await;
        matches!(
            response,
            Some(r) if matches!(r.status().as_u16(), 200 | 401 | 403 | 302)
        )
    }

    /// Google Calendar CalDAV probe, only meaningful for Google-hosted
    /// domains — everywhere else the endpoint 404s regardless of the user.
    /// Google answers 401 to every unauthenticated request, so 200 is the
    /// only positive.
    pub async fn check_google_calendar(
        &self,
        resolver: &DnsResolver,
        email: &str,
        domain: &str,
        pinned: Option<&Url>,
        deadline: Instant,
    ) -> bool {
        let mx = resolver.lookup_mx(domain).await.unwrap_or_default();
        if classify_provider(&mx) != Provider::Google {
            debug!("skipping calendar probe for non-Google domain {domain}");
            return false;
        }

        let target = format!("https://calendar.google.com/calendar/dav/{email}/events");
        let response = self
            .dispatch(pinned, deadline, Redirects::Follow, |client| {
                client.get(&target)
            })
            .await;
        matches!(response, Some(r) if r.status() == reqwest::StatusCode::OK)
    }

    /// Gravatar avatar lookup by MD5 of the normalized address
    pub async fn check_gravatar(&self, email: &str, pinned: Option<&Url>, deadline: Instant) -> bool {
        let digest = md5::compute(email.trim().to_lowercase().as_bytes());
        let target = format!("https://www.gravatar.com/avatar/{digest:x}?d=404");

        let response = self
            .dispatch(pinned, deadline, Redirects::Follow, |client| {
                client.get(&target)
            })
            .await;
        matches!(response, Some(r) if r.status() == reqwest::StatusCode::OK)
    }

    /// GitHub user search by email
    pub async fn check_github(&self, email: &str, pinned: Option<&Url>, deadline: Instant) -> bool {
        #[derive(Deserialize)]
        struct SearchReply {
            total_count: i64,
        }

        let escaped: String = url::form_urlencoded::byte_serialize(email.as_bytes()).collect();
        let target = format!("https://api.github.com/search/users?q={escaped}+in:email");

        let Some(response) = self
            .dispatch(pinned, deadline, Redirects::Follow, |client| {
                client.get(&target)
            })
            .await
        else {
            return false;
        };
        if response.status() != reqwest::StatusCode::OK {
            return false;
        }
        match response.json::<SearchReply>().await {
            Ok(reply) => reply.total_count > 0,
            Err(_) => false,
        }
    }

    /// Adobe account lookup. A known account comes back as a JSON body
    /// describing the account type; anything else is short or empty.
    pub async fn check_adobe(&self, email: &str, pinned: Option<&Url>, deadline: Instant) -> bool {
        let payload = serde_json::json!({ "username": email });

        let Some(response) = self
            .dispatch(pinned, deadline, Redirects::Follow, |client| {
                client
                    .post("https://auth.services.adobe.com/signin/v2/users/accounts")
                    .header("X-IMS-ClientId", "AdobeID_v2_1")
                    .json(&payload)
            })
            .await
        else {
            return false;
        };
        if response.status() != reqwest::StatusCode::OK {
            return false;
        }
        match response.text().await {
            Ok(body) => body.len() > 50 && body.contains("accountType"),
            Err(_) => false,
        }
    }

    /// Plain GET with the RDAP media type, used by the domain-age probe.
    /// Shares the two-attempt dispatch with the identity probes.
    pub(crate) async fn dispatch_get_rdap(
        &self,
        target: &str,
        pinned: Option<&Url>,
        deadline: Instant,
    ) -> Option<reqwest::Response> {
        self.dispatch(pinned, deadline, Redirects::Follow, |client| {
            client
                .get(target)
                .header(reqwest::header::ACCEPT, "application/rdap+json")
        })
        .await
    }

    /// HaveIBeenPwned breach count for the address. 404 means clean; a 429
    /// gets one retry after the documented back-off. Every failure path
    /// reports zero breaches.
    pub async fn check_breaches(&self, email: &str, pinned: Option<&Url>, deadline: Instant) -> u32 {
        let Some(api_key) = self.hibp_api_key.as_deref() else {
            return 0;
        };

        let target = format!("{HIBP_ENDPOINT}{}?truncateResponse=true", escape_email_path(email));

        for attempt in 1..=2u32 {
            let using_proxy = attempt == 1 && pinned.is_some() && self.pool.enabled();
            let _slot = if using_proxy {
                match self.pool.acquire_slot(deadline).await {
                    Some(permit) => Some(permit),
                    None => return 0,
                }
            } else {
                None
            };

            let client = self.client_for(pinned, attempt, Redirects::Follow);
            let request = client
                .get(&target)
                .header("hibp-api-key", api_key)
                .header(reqwest::header::USER_AGENT, "Mailvetter-Verifier");

            let response = match tokio::time::timeout_at(deadline, request.send()).await {
                Ok(Ok(response)) => response,
                Ok(Err(e)) => {
                    trace!("HIBP attempt {attempt} failed: {e}");
                    if attempt == 1 && pause(RETRY_PAUSE, deadline).await {
                        continue;
                    }
                    return 0;
                }
                Err(_) => return 0,
            };

            match response.status().as_u16() {
                200 => {
                    #[derive(Deserialize)]
                    struct Breach {
                        #[serde(rename = "Name")]
                        _name: String,
                    }
                    return match response.json::<Vec<Breach>>().await {
                        Ok(breaches) => breaches.len() as u32,
                        Err(_) => 0,
                    };
                }
                // 404 means the address exists but has no recorded breaches
                404 => return 0,
                429 => {
                    debug!("HIBP rate limit hit for {email}");
                    if attempt == 1 && pause(HIBP_RATE_LIMIT_PAUSE, deadline).await {
                        continue;
                    }
                    return 0;
                }
                _ => {
                    if attempt == 1 && pause(RETRY_PAUSE, deadline).await {
                        continue;
                    }
                    return 0;
                }
            }
        }
        0
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

    #[test]
    fn path_escape_preserves_the_at_sign() {
        let escaped = escape_email_path("user+tag@example.com");
        assert_eq!(escaped, "user%2Btag@example.com");
        assert_eq!(escaped.matches('@').count(), 1);
    }

    #[test]
    fn path_escape_encodes_percent_and_space() {
        assert_eq!(escape_email_path("a%b c@d.com"), "a%25b%20c@d.com");
    }

    #[test]
    fn hibp_url_contains_exactly_one_at_sign() {
        let target = format!(
            "{HIBP_ENDPOINT}{}?truncateResponse=true",
            escape_email_path("first.last+crm@corp.example.co.uk")
        );
        assert_eq!(target.matches('@').count(), 1);
        assert!(target.contains("first.last%2Bcrm@corp.example.co.uk"));
    }

    #[test]
    fn user_agents_rotate_within_the_fixed_set() {
        for _ in 0..32 {
            assert!(USER_AGENTS.contains(&random_user_agent()));
        }
    }

    #[tokio::test]
    async fn prober_builds_without_proxies() {
        let pool = Arc::new(ProxyPool::disabled());
        let prober = HttpProber::new(pool, None).unwrap();
        assert!(!prober.hibp_enabled());
    }

    #[tokio::test]
    async fn sharepoint_rejects_dotless_domains() {
        let pool = Arc::new(ProxyPool::disabled());
        let prober = HttpProber::new(pool, None).unwrap();
        let deadline = Instant::now() + Duration::from_millis(10);
        assert!(!prober.check_sharepoint("user@localhost", None, deadline).await);
        assert!(!prober.check_sharepoint("not-an-email", None, deadline).await);
    }
}
