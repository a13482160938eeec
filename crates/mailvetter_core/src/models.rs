//! Core data model shared by the pipeline, the probes, and the scorer

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Terminal verdict category for a verified address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    Valid,
    Invalid,
    Risky,
    CatchAll,
    Unknown,
}

/// Reachability band derived from the final score
///
/// `safe` iff score ≥ 90, `risky` iff 60 ≤ score < 90, `bad` otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Reachability {
    Safe,
    Risky,
    Bad,
}

/// Email infrastructure provider, classified from MX hostnames.
///
/// This is a closed set: classification always yields one of these seven
/// variants, never an "unknown".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Proofpoint,
    Mimecast,
    Barracuda,
    Ironport,
    Google,
    Office365,
    Generic,
}

impl Default for Provider {
    fn default() -> Self {
        Provider::Generic
    }
}

impl Provider {
    /// Whether the provider is an inbound mail security appliance.
    ///
    /// Domains fronted by one of these gateways are exempt from the
    /// empty-catch-all penalty: the appliance itself is evidence of an
    /// actively managed mail estate.
    pub fn is_enterprise_gateway(self) -> bool {
        matches!(
            self,
            Provider::Proofpoint | Provider::Mimecast | Provider::Barracuda | Provider::Ironport
        )
    }
}

/// A single MX record, host stripped of any trailing dot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MxRecord {
    pub host: String,
    pub preference: u16,
}

/// Per-domain infrastructure facts, cached for 15 minutes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainInfra {
    pub provider: Provider,
    pub has_spf: bool,
    pub has_dmarc: bool,
    pub has_saas_tokens: bool,
    /// Days since registration; 0 when RDAP gave no answer
    pub domain_age_days: i64,
}

/// Observed behavior of a primary MX host, cached for 30 minutes
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SmtpHostBehavior {
    pub is_catch_all: bool,
    pub is_postmaster_broken: bool,
}

/// All signals collected for one address during a verification.
///
/// Collectors write each field at most once; the scorer reads the record
/// only after every collector has joined (or the deadline fired).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RiskAnalysis {
    /// SMTP outcome: 0 unknown, 250 accepted, 550 rejected
    pub smtp_status: u16,
    pub has_teams_presence: bool,
    pub has_google_calendar: bool,
    pub has_sharepoint: bool,

    pub has_vrfy: bool,

    pub is_catch_all: bool,
    #[serde(default)]
    pub provider: Provider,
    pub has_saas_tokens: bool,

    pub has_adobe: bool,
    pub has_github: bool,
    pub has_gravatar: bool,
    pub breach_count: u32,

    pub is_role_account: bool,
    /// Ratio of digits to total length of the local-part
    pub entropy_score: f64,
    pub is_postmaster_broken: bool,

    /// |target RCPT latency − ghost RCPT latency| in milliseconds
    pub timing_delta_ms: u64,
    pub has_dmarc: bool,
    pub has_spf: bool,

    pub domain_age_days: i64,
}

/// Per-signal contributions to the final score, keyed by ledger name
pub type ScoreBreakdown = BTreeMap<String, f64>;

/// The record returned to callers for a single verification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationResult {
    pub email: String,
    pub score: u8,
    pub score_breakdown: ScoreBreakdown,
    pub status: VerificationStatus,
    pub reachability: Reachability,
    pub analysis: RiskAnalysis,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&VerificationStatus::CatchAll).unwrap(),
            "\"catch_all\""
        );
        assert_eq!(
            serde_json::to_string(&VerificationStatus::Valid).unwrap(),
            "\"valid\""
        );
    }

    #[test]
    fn provider_is_a_closed_lowercase_set() {
        assert_eq!(
            serde_json::to_string(&Provider::Office365).unwrap(),
            "\"office365\""
        );
        assert_eq!(serde_json::to_string(&Provider::Generic).unwrap(), "\"generic\"");
        assert_eq!(Provider::default(), Provider::Generic);
    }

    #[test]
    fn enterprise_gateway_set_includes_ironport_but_not_google() {
        assert!(Provider::Proofpoint.is_enterprise_gateway());
        assert!(Provider::Ironport.is_enterprise_gateway());
        assert!(!Provider::Google.is_enterprise_gateway());
        assert!(!Provider::Office365.is_enterprise_gateway());
    }

    #[test]
    fn analysis_default_is_all_zero() {
        let a = RiskAnalysis::default();
        assert_eq!(a.smtp_status, 0);
        assert!(!a.is_catch_all);
        assert_eq!(a.breach_count, 0);
        assert_eq!(a.entropy_score, 0.0);
    }
}
