//! Domain infrastructure probes
//!
//! Provider classification from MX hostnames, SPF/DMARC/SaaS-token TXT
//! checks, and RDAP-based domain age. Everything here fails closed: a
//! lookup that cannot be completed reports the neutral value.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio::time::Instant;
use tracing::debug;
use url::Url;

use crate::dns::DnsResolver;
use crate::identity::HttpProber;
use crate::models::{MxRecord, Provider};

/// TXT fragments proving B2B SaaS adoption.
///
/// `google-site-verification` is deliberately absent: nearly every
/// Workspace domain carries it, so it signals hosting, not tooling.
const SAAS_TXT_INDICATORS: &[&str] = &[
    "salesforce",
    "zendesk",
    "atlassian",
    "docusign",
    "stripe",
    "facebook-domain-verification",
    "apple-domain-verification",
];

/// Classify the email infrastructure from MX hostnames.
///
/// Enterprise gateways are matched before the major hosted providers so
/// a Proofpoint-fronted Office 365 tenant classifies as `proofpoint`.
/// The fallback is `generic` — this function never reports an unknown.
pub fn classify_provider(mx_records: &[MxRecord]) -> Provider {
    for mx in mx_records {
        let host = mx.host.to_ascii_lowercase();

        if host.contains("pphosted.com") {
            return Provider::Proofpoint;
        }
        if host.contains("mimecast.com") {
            return Provider::Mimecast;
        }
        if host.contains("barracudanetworks.com") {
            return Provider::Barracuda;
        }
        if host.contains("iphmx.com") {
            return Provider::Ironport;
        }

        if host.contains("google.com") || host.contains("googlemail.com") {
            return Provider::Google;
        }
        if host.contains("outlook.com") || host.contains("protection.outlook.com") {
            return Provider::Office365;
        }
    }
    Provider::Generic
}

/// Whether the apex domain publishes an SPF policy
pub async fn check_spf(resolver: &DnsResolver, domain: &str) -> bool {
    resolver
        .txt_records(domain)
        .await
        .iter()
        .any(|txt| txt.trim_start().starts_with("v=spf1"))
}

/// Whether the domain publishes a DMARC policy.
/// Presence of DMARC implies active IT management of the domain.
pub async fn check_dmarc(resolver: &DnsResolver, domain: &str) -> bool {
    resolver
        .txt_records(&format!("_dmarc.{domain}"))
        .await
        .iter()
        .any(|txt| txt.trim_start().starts_with("v=DMARC1"))
}

/// Scan apex TXT records for proof of B2B SaaS tool usage.
/// Verification tokens for tools like Salesforce or Zendesk prove the
/// domain runs real business operations, not just parked DNS.
pub async fn check_saas_tokens(resolver: &DnsResolver, domain: &str) -> bool {
    let records = resolver.txt_records(domain).await;
    records.iter().any(|txt| {
        let lower = txt.to_ascii_lowercase();
        SAAS_TXT_INDICATORS.iter().any(|ind| lower.contains(ind))
    })
}

#[derive(Deserialize)]
struct RdapEvent {
    #[serde(rename = "eventAction")]
    action: String,
    #[serde(rename = "eventDate")]
    date: String,
}

#[derive(Deserialize)]
struct RdapDomain {
    #[serde(default)]
    events: Vec<RdapEvent>,
}

/// Domain age in days via the public RDAP aggregator.
///
/// Registries occasionally list several registration events (transfers,
/// registry migrations); the oldest one is the true creation date. Any
/// failure yields 0 — note that 0 means "no answer", not "brand new".
pub async fn check_domain_age(
    http: &HttpProber,
    domain: &str,
    pinned: Option<&Url>,
    deadline: Instant,
) -> i64 {
    let target = format!("https://rdap.org/domain/{domain}");

    let Some(response) = http
        .dispatch_get_rdap(&target, pinned, deadline)
        .await
    else {
        return 0;
    };
    if response.status() != reqwest::StatusCode::OK {
        return 0;
    }

    let rdap: RdapDomain = match response.json().await {
        Ok(doc) => doc,
        Err(e) => {
            debug!("unparsable RDAP document for {domain}: {e}");
            return 0;
        }
    };

    domain_age_days(&rdap, Utc::now())
}

fn domain_age_days(rdap: &RdapDomain, now: DateTime<Utc>) -> i64 {
    let mut created: Option<DateTime<Utc>> = None;
    for event in &rdap.events {
        if event.action != "registration" && event.action != "creation" {
            continue;
        }
        let Ok(parsed) = DateTime::parse_from_rfc3339(&event.date) else {
            continue;
        };
        let parsed = parsed.with_timezone(&Utc);
        if created.map_or(true, |current| parsed < current) {
            created = Some(parsed);
        }
    }

    match created {
        Some(created) => (now - created).num_days().max(0),
        None => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mx(host: &str) -> MxRecord {
        MxRecord {
            host: host.to_string(),
            preference: 10,
        }
    }

    #[test]
    fn enterprise_gateways_classify_before_major_hosts() {
        // Proofpoint fronting Office 365: the gateway wins
        let records = vec![
            mx("mxa-0001.gslb.pphosted.com"),
            mx("corp-com.mail.protection.outlook.com"),
        ];
        assert_eq!(classify_provider(&records), Provider::Proofpoint);
    }

    #[test]
    fn major_hosts_classify_by_substring() {
        assert_eq!(
            classify_provider(&[mx("aspmx.l.google.com")]),
            Provider::Google
        );
        assert_eq!(
            classify_provider(&[mx("corp.mail.protection.outlook.com")]),
            Provider::Office365
        );
        assert_eq!(
            classify_provider(&[mx("d123.mx.barracudanetworks.com")]),
            Provider::Barracuda
        );
        assert_eq!(classify_provider(&[mx("esa.iphmx.com")]), Provider::Ironport);
    }

    #[test]
    fn classification_never_reports_unknown() {
        assert_eq!(classify_provider(&[]), Provider::Generic);
        assert_eq!(
            classify_provider(&[mx("mail.self-hosted.example")]),
            Provider::Generic
        );
    }

    #[test]
    fn oldest_registration_event_wins() {
        let rdap = RdapDomain {
            events: vec![
                RdapEvent {
                    action: "registration".into(),
                    date: "2020-06-01T00:00:00Z".into(),
                },
                RdapEvent {
                    action: "registration".into(),
                    date: "1998-03-15T00:00:00Z".into(),
                },
                RdapEvent {
                    action: "expiration".into(),
                    date: "2030-01-01T00:00:00Z".into(),
                },
            ],
        };
        let now = DateTime::parse_from_rfc3339("1998-03-25T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(domain_age_days(&rdap, now), 10);
    }

    #[test]
    fn missing_or_malformed_events_yield_zero() {
        let empty = RdapDomain { events: vec![] };
        assert_eq!(domain_age_days(&empty, Utc::now()), 0);

        let malformed = RdapDomain {
            events: vec![RdapEvent {
                action: "creation".into(),
                date: "last tuesday".into(),
            }],
        };
        assert_eq!(domain_age_days(&malformed, Utc::now()), 0);
    }
}
