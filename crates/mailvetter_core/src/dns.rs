//! DNS resolution using hickory-resolver
//!
//! MX lookups go through the system resolver first with a public-DNS
//! fallback; both resolvers are configured with UDP transport plus TCP
//! retry so truncated responses are handled the same way on either path.

use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use anyhow::Result;
use hickory_resolver::{
    config::{NameServerConfigGroup, ResolverConfig, ResolverOpts},
    error::ResolveError,
    TokioAsyncResolver,
};
use tracing::{debug, warn};

use crate::models::MxRecord;

/// Per-query timeout for MX and TXT lookups
const LOOKUP_TIMEOUT: Duration = Duration::from_secs(3);

/// Fallback name server used when the primary resolver fails
const FALLBACK_DNS: IpAddr = IpAddr::V4(Ipv4Addr::new(8, 8, 8, 8));

/// DNS resolver wrapper with a public-DNS fallback path
pub struct DnsResolver {
    primary: TokioAsyncResolver,
    fallback: TokioAsyncResolver,
}

fn resolver_opts() -> ResolverOpts {
    let mut opts = ResolverOpts::default();
    opts.timeout = LOOKUP_TIMEOUT;
    opts.attempts = 2;
    opts.cache_size = 4_096;
    opts.positive_min_ttl = Some(Duration::from_secs(60));
    opts.negative_min_ttl = Some(Duration::from_secs(30));
    opts
}

impl DnsResolver {
    /// Create a resolver pair: system configuration (or Cloudflare when the
    /// system configuration is unreadable) plus the 8.8.8.8 fallback.
    pub fn new() -> Result<Self> {
        let (config, _) = hickory_resolver::system_conf::read_system_conf()
            .unwrap_or_else(|e| {
                warn!("failed to read system resolver config, using Cloudflare: {e}");
                (ResolverConfig::cloudflare(), ResolverOpts::default())
            });

        let primary = TokioAsyncResolver::tokio(config, resolver_opts());

        let fallback_config = ResolverConfig::from_parts(
            None,
            Vec::new(),
            NameServerConfigGroup::from_ips_clear(&[FALLBACK_DNS], 53, true),
        );
        let fallback = TokioAsyncResolver::tokio(fallback_config, resolver_opts());

        Ok(Self { primary, fallback })
    }

    /// Look up MX records for a domain, sorted ascending by preference.
    ///
    /// Returns a value-typed list so cached resolver records are never
    /// mutated; hosts are stripped of their trailing dot. An empty list
    /// means the domain publishes no MX records.
    pub async fn lookup_mx(&self, domain: &str) -> Result<Vec<MxRecord>, ResolveError> {
        let lookup = match self.primary.mx_lookup(domain).await {
            Ok(lookup) => lookup,
            Err(e) => {
                debug!("primary MX lookup failed for {domain}, trying fallback: {e}");
                self.fallback.mx_lookup(domain).await?
            }
        };

        let mut records: Vec<MxRecord> = lookup
            .iter()
            .map(|mx| MxRecord {
                host: mx.exchange().to_utf8().trim_end_matches('.').to_string(),
                preference: mx.preference(),
            })
            .collect();
        records.sort_by_key(|r| r.preference);

        debug!("domain {domain} has {} MX record(s)", records.len());
        Ok(records)
    }

    /// Fetch TXT records for a name. Lookup failures yield an empty list —
    /// TXT probes fail closed rather than surfacing resolver errors.
    pub async fn txt_records(&self, name: &str) -> Vec<String> {
        let lookup = match self.primary.txt_lookup(name).await {
            Ok(lookup) => lookup,
            Err(e) => {
                debug!("primary TXT lookup failed for {name}, trying fallback: {e}");
                match self.fallback.txt_lookup(name).await {
                    Ok(lookup) => lookup,
                    Err(e) => {
                        debug!("TXT lookup failed for {name}: {e}");
                        return Vec::new();
                    }
                }
            }
        };

        lookup
            .iter()
            .map(|txt| {
                txt.txt_data()
                    .iter()
                    .map(|part| String::from_utf8_lossy(part).into_owned())
                    .collect::<String>()
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolver_creation_succeeds() {
        assert!(DnsResolver::new().is_ok());
    }

    #[test]
    fn opts_carry_the_lookup_timeout() {
        let opts = resolver_opts();
        assert_eq!(opts.timeout, Duration::from_secs(3));
        assert_eq!(opts.attempts, 2);
    }
}
