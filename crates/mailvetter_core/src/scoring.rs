//! Deterministic scoring engine
//!
//! A pure function from a populated [`RiskAnalysis`] to the final
//! `(score, breakdown, status, reachability)` verdict. Runs in fixed
//! ordered phases: base, VRFY short-circuit, Office 365 zombie
//! correction, additive signal weights, proof tiers, shielded penalties,
//! catch-all and unknown resolution, then clamp and band.

use crate::models::{Provider, Reachability, RiskAnalysis, ScoreBreakdown, VerificationStatus};

const WEIGHT_TEAMS: f64 = 15.0;
const WEIGHT_SHAREPOINT: f64 = 60.0;
const WEIGHT_CALENDAR: f64 = 42.5;
const WEIGHT_ADOBE: f64 = 18.5;
const WEIGHT_GITHUB: f64 = 12.0;
const WEIGHT_GRAVATAR: f64 = 10.0;
const WEIGHT_BREACH: f64 = 45.0;
const WEIGHT_BREACH_DEEP: f64 = 10.0;
const WEIGHT_ENTERPRISE_SEC: f64 = 15.0;
const WEIGHT_SAAS: f64 = 10.0;
const WEIGHT_SPF: f64 = 3.5;
const WEIGHT_DMARC: f64 = 4.5;
const WEIGHT_TIMING_STRONG: f64 = 50.0;
const WEIGHT_TIMING_WEAK: f64 = 25.0;
const WEIGHT_AGE_VETTED: f64 = 15.0;
const WEIGHT_AGE_ESTABLISHED: f64 = 10.0;

const CORRECTION_O365_FALSE_POSITIVE: f64 = -60.0;
const PENALTY_O365_UNLICENSED: f64 = -20.0;
const PENALTY_O365_GHOST: f64 = -30.0;
const PENALTY_HIGH_ENTROPY: f64 = -20.0;
const PENALTY_ROLE_ACCOUNT: f64 = -10.0;
const PENALTY_NEW_DOMAIN: f64 = -50.0;
const PENALTY_CATCHALL_EMPTY: f64 = -20.0;
const RESOLUTION_STRONG: f64 = 50.0;
const RESOLUTION_MEDIUM: f64 = 25.0;

/// Timing deltas above this are proof of per-user processing
const TIMING_STRONG_MS: u64 = 3000;
const TIMING_WEAK_MS: u64 = 1500;
/// Five years of registration history
const DOMAIN_AGE_VETTED_DAYS: i64 = 1825;
const DOMAIN_AGE_ESTABLISHED_DAYS: i64 = 365;
const DOMAIN_AGE_NEW_DAYS: i64 = 30;

/// The scorer's output
#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    pub score: u8,
    pub breakdown: ScoreBreakdown,
    pub status: VerificationStatus,
    pub reachability: Reachability,
}

fn band(score: u8) -> Reachability {
    if score >= 90 {
        Reachability::Safe
    } else if score >= 60 {
        Reachability::Risky
    } else {
        Reachability::Bad
    }
}

/// Fuse the collected signals into the final verdict.
///
/// Pure and deterministic: equal inputs always produce equal outputs.
pub fn score(a: &RiskAnalysis) -> Verdict {
    let mut breakdown = ScoreBreakdown::new();

    // 1. base
    if a.smtp_status == 550 {
        // hard bounce: nothing can rescue the address
        breakdown.insert("base_hard_bounce".into(), 0.0);
        return Verdict {
            score: 0,
            breakdown,
            status: VerificationStatus::Invalid,
            reachability: Reachability::Bad,
        };
    }

    let mut total: f64;
    let mut status: VerificationStatus;
    if a.smtp_status == 250 {
        total = 90.0;
        breakdown.insert("base_smtp_valid".into(), 90.0);
        status = VerificationStatus::Valid;
    } else if a.is_catch_all {
        total = 30.0;
        breakdown.insert("base_catch_all".into(), 30.0);
        status = VerificationStatus::CatchAll;
    } else {
        total = 20.0;
        breakdown.insert("base_unknown".into(), 20.0);
        status = VerificationStatus::Unknown;
    }
    let started_unknown = status == VerificationStatus::Unknown;

    // 2. VRFY is server-side confirmation, nothing else matters
    if a.has_vrfy {
        let mut breakdown = ScoreBreakdown::new();
        breakdown.insert("p0_vrfy_verified".into(), 99.0);
        return Verdict {
            score: 99,
            breakdown,
            status: VerificationStatus::Valid,
            reachability: Reachability::Safe,
        };
    }

    // 3. O365 zombie correction: a 250 from Office 365 without a SharePoint
    // footprint is an Entra identity whose mailbox license is gone. The
    // dishonest base is revoked and the latch blocks later upgrades.
    let mut o365_zombie_corrected = false;
    if a.provider == Provider::Office365 && a.smtp_status == 250 && !a.has_sharepoint {
        total += CORRECTION_O365_FALSE_POSITIVE;
        breakdown.insert(
            "correction_o365_false_positive".into(),
            CORRECTION_O365_FALSE_POSITIVE,
        );
        if a.has_teams_presence {
            total += PENALTY_O365_UNLICENSED;
            breakdown.insert("penalty_o365_unlicensed".into(), PENALTY_O365_UNLICENSED);
        } else {
            total += PENALTY_O365_GHOST;
            breakdown.insert("penalty_o365_ghost".into(), PENALTY_O365_GHOST);
        }
        status = VerificationStatus::CatchAll;
        o365_zombie_corrected = true;
    }

    // 4. additive signal weights
    if a.has_teams_presence {
        total += WEIGHT_TEAMS;
        breakdown.insert("p0_teams_identity".into(), WEIGHT_TEAMS);
    }
    if a.has_sharepoint {
        total += WEIGHT_SHAREPOINT;
        breakdown.insert("p0_sharepoint_license".into(), WEIGHT_SHAREPOINT);
    }
    if a.has_google_calendar {
        total += WEIGHT_CALENDAR;
        breakdown.insert("p0_calendar".into(), WEIGHT_CALENDAR);
    }
    if a.has_adobe {
        total += WEIGHT_ADOBE;
        breakdown.insert("p2_adobe".into(), WEIGHT_ADOBE);
    }
    if a.has_github {
        total += WEIGHT_GITHUB;
        breakdown.insert("p2_github".into(), WEIGHT_GITHUB);
    }
    if a.has_gravatar {
        total += WEIGHT_GRAVATAR;
        breakdown.insert("p2_gravatar".into(), WEIGHT_GRAVATAR);
    }
    if a.breach_count > 0 {
        let mut boost = WEIGHT_BREACH;
        if a.breach_count > 5 {
            boost += WEIGHT_BREACH_DEEP;
        }
        total += boost;
        breakdown.insert("p1_historical_breach".into(), boost);
        if status == VerificationStatus::CatchAll && !o365_zombie_corrected {
            status = VerificationStatus::Valid;
        }
    }
    if matches!(
        a.provider,
        Provider::Proofpoint | Provider::Mimecast | Provider::Barracuda
    ) {
        total += WEIGHT_ENTERPRISE_SEC;
        breakdown.insert("p1_enterprise_sec".into(), WEIGHT_ENTERPRISE_SEC);
    }
    if a.has_saas_tokens {
        total += WEIGHT_SAAS;
        breakdown.insert("p1_saas_usage".into(), WEIGHT_SAAS);
    }
    if a.has_spf {
        total += WEIGHT_SPF;
        breakdown.insert("p2_spf".into(), WEIGHT_SPF);
    }
    if a.has_dmarc {
        total += WEIGHT_DMARC;
        breakdown.insert("p2_dmarc".into(), WEIGHT_DMARC);
    }
    if a.timing_delta_ms > TIMING_STRONG_MS {
        total += WEIGHT_TIMING_STRONG;
        breakdown.insert("p2_timing_strong".into(), WEIGHT_TIMING_STRONG);
    } else if a.timing_delta_ms > TIMING_WEAK_MS {
        total += WEIGHT_TIMING_WEAK;
        breakdown.insert("p2_timing_weak".into(), WEIGHT_TIMING_WEAK);
    }
    if a.domain_age_days >= DOMAIN_AGE_VETTED_DAYS {
        total += WEIGHT_AGE_VETTED;
        breakdown.insert("p2_domain_age_vetted".into(), WEIGHT_AGE_VETTED);
    } else if a.domain_age_days >= DOMAIN_AGE_ESTABLISHED_DAYS {
        total += WEIGHT_AGE_ESTABLISHED;
        breakdown.insert("p2_domain_age_established".into(), WEIGHT_AGE_ESTABLISHED);
    }

    // 5. proof tiers
    let absolute_proof = a.has_vrfy
        || a.breach_count > 0
        || a.has_google_calendar
        || a.timing_delta_ms > TIMING_STRONG_MS
        || a.has_teams_presence
        || a.has_sharepoint;
    let soft_proof = a.has_github || a.has_adobe || a.has_gravatar;

    // 6. heuristic penalties, shielded by any proof of existence
    if !absolute_proof && !soft_proof {
        if a.entropy_score > 0.5 {
            total += PENALTY_HIGH_ENTROPY;
            breakdown.insert("penalty_high_entropy".into(), PENALTY_HIGH_ENTROPY);
        }
        if a.is_role_account {
            total += PENALTY_ROLE_ACCOUNT;
            breakdown.insert("penalty_role_account".into(), PENALTY_ROLE_ACCOUNT);
        }
        if a.domain_age_days > 0 && a.domain_age_days < DOMAIN_AGE_NEW_DAYS {
            total += PENALTY_NEW_DOMAIN;
            breakdown.insert("penalty_new_domain".into(), PENALTY_NEW_DOMAIN);
        }
    }

    // 7. catch-all resolution
    if a.is_catch_all {
        if absolute_proof {
            total += RESOLUTION_STRONG;
            breakdown.insert("resolution_catchall_strong".into(), RESOLUTION_STRONG);
            if !o365_zombie_corrected {
                status = VerificationStatus::Valid;
            }
        } else if soft_proof {
            total += RESOLUTION_MEDIUM;
            breakdown.insert("resolution_catchall_medium".into(), RESOLUTION_MEDIUM);
        } else if a.provider == Provider::Office365 {
            if !o365_zombie_corrected {
                total += PENALTY_O365_GHOST;
                breakdown.insert("penalty_o365_ghost".into(), PENALTY_O365_GHOST);
            }
        } else if !(a.provider.is_enterprise_gateway()
            || a.domain_age_days >= DOMAIN_AGE_ESTABLISHED_DAYS)
        {
            // an old domain or an enterprise gateway waives the empty penalty
            total += PENALTY_CATCHALL_EMPTY;
            breakdown.insert("resolution_catchall_empty".into(), PENALTY_CATCHALL_EMPTY);
        }
    }

    // 8. unknown resolution
    if started_unknown {
        if absolute_proof {
            total += RESOLUTION_STRONG;
            breakdown.insert("resolution_unknown_strong".into(), RESOLUTION_STRONG);
            status = VerificationStatus::Valid;
        } else if soft_proof {
            total += RESOLUTION_MEDIUM;
            breakdown.insert("resolution_unknown_medium".into(), RESOLUTION_MEDIUM);
        }
    }

    // 9. clamp & band
    let final_score = total.round().clamp(0.0, 99.0) as u8;
    let reachability = band(final_score);

    if o365_zombie_corrected {
        // latched zombies never upgrade: the mailbox cannot receive mail
        status = VerificationStatus::Invalid;
    } else if status == VerificationStatus::CatchAll && final_score >= 60 {
        status = VerificationStatus::Risky;
    }

    Verdict {
        score: final_score,
        breakdown,
        status,
        reachability,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> RiskAnalysis {
        RiskAnalysis::default()
    }

    #[test]
    fn scoring_is_pure_and_deterministic() {
        let a = RiskAnalysis {
            smtp_status: 250,
            has_spf: true,
            breach_count: 3,
            timing_delta_ms: 2000,
            ..base()
        };
        assert_eq!(score(&a), score(&a));
    }

    #[test]
    fn hard_bounce_short_circuits() {
        let a = RiskAnalysis {
            smtp_status: 550,
            is_postmaster_broken: true,
            has_spf: true,
            has_dmarc: true,
            ..base()
        };
        let v = score(&a);
        assert_eq!(v.score, 0);
        assert_eq!(v.status, VerificationStatus::Invalid);
        assert_eq!(v.reachability, Reachability::Bad);
        assert!(v.breakdown.contains_key("base_hard_bounce"));
    }

    #[test]
    fn vrfy_short_circuits_to_99() {
        let a = RiskAnalysis {
            smtp_status: 250,
            has_vrfy: true,
            entropy_score: 0.9,
            is_role_account: true,
            ..base()
        };
        let v = score(&a);
        assert_eq!(v.score, 99);
        assert_eq!(v.status, VerificationStatus::Valid);
        assert_eq!(v.reachability, Reachability::Safe);
        assert_eq!(v.breakdown.get("p0_vrfy_verified"), Some(&99.0));
    }

    #[test]
    fn accepted_with_auth_records_is_safe() {
        // scenario: 250 + SPF + DMARC → 98
        let a = RiskAnalysis {
            smtp_status: 250,
            has_spf: true,
            has_dmarc: true,
            ..base()
        };
        let v = score(&a);
        assert_eq!(v.score, 98);
        assert_eq!(v.status, VerificationStatus::Valid);
        assert_eq!(v.reachability, Reachability::Safe);
    }

    #[test]
    fn high_entropy_drags_an_accepted_address_to_risky() {
        // scenario: 250 with a random-looking local-part → 70
        let a = RiskAnalysis {
            smtp_status: 250,
            entropy_score: 0.85,
            ..base()
        };
        let v = score(&a);
        assert_eq!(v.score, 70);
        assert_eq!(v.status, VerificationStatus::Valid);
        assert_eq!(v.reachability, Reachability::Risky);
    }

    #[test]
    fn empty_google_catch_all_lands_bad() {
        // scenario: catch-all, no proof, young-unknown domain age → 10
        let a = RiskAnalysis {
            is_catch_all: true,
            provider: crate::models::Provider::Google,
            timing_delta_ms: 50,
            ..base()
        };
        let v = score(&a);
        assert_eq!(v.score, 10);
        assert_eq!(v.status, VerificationStatus::CatchAll);
        assert_eq!(v.reachability, Reachability::Bad);
    }

    #[test]
    fn o365_catch_all_with_teams_presence_upgrades_to_valid() {
        // scenario: catch-all + Teams identity → 95 via the strong-proof upgrade
        let a = RiskAnalysis {
            is_catch_all: true,
            provider: crate::models::Provider::Office365,
            has_teams_presence: true,
            ..base()
        };
        let v = score(&a);
        assert_eq!(v.score, 95);
        assert_eq!(v.status, VerificationStatus::Valid);
        assert_eq!(v.reachability, Reachability::Safe);
    }

    #[test]
    fn o365_zombie_is_corrected_and_latched() {
        // scenario: 250 from O365, Teams identity but no SharePoint license
        let a = RiskAnalysis {
            smtp_status: 250,
            provider: crate::models::Provider::Office365,
            has_teams_presence: true,
            has_sharepoint: false,
            ..base()
        };
        let v = score(&a);
        assert_eq!(v.score, 25);
        assert_eq!(v.status, VerificationStatus::Invalid);
        assert_eq!(v.reachability, Reachability::Bad);
        assert_eq!(v.breakdown.get("correction_o365_false_positive"), Some(&-60.0));
        assert_eq!(v.breakdown.get("penalty_o365_unlicensed"), Some(&-20.0));
    }

    #[test]
    fn o365_zombie_without_any_footprint_is_a_ghost() {
        let a = RiskAnalysis {
            smtp_status: 250,
            provider: crate::models::Provider::Office365,
            ..base()
        };
        let v = score(&a);
        // 90 - 60 - 30 = 0
        assert_eq!(v.score, 0);
        assert_eq!(v.status, VerificationStatus::Invalid);
        assert_eq!(v.breakdown.get("penalty_o365_ghost"), Some(&-30.0));
    }

    #[test]
    fn breach_cannot_upgrade_a_latched_zombie() {
        let a = RiskAnalysis {
            smtp_status: 250,
            provider: crate::models::Provider::Office365,
            has_teams_presence: true,
            breach_count: 2,
            ..base()
        };
        let v = score(&a);
        assert_ne!(v.status, VerificationStatus::Valid);
    }

    #[test]
    fn enterprise_catch_all_with_hygiene_is_risky() {
        // scenario: Barracuda catch-all with SPF/DMARC/SaaS tokens → 63
        let a = RiskAnalysis {
            is_catch_all: true,
            provider: crate::models::Provider::Barracuda,
            has_spf: true,
            has_dmarc: true,
            has_saas_tokens: true,
            ..base()
        };
        let v = score(&a);
        assert_eq!(v.score, 63);
        assert_eq!(v.status, VerificationStatus::Risky);
        assert_eq!(v.reachability, Reachability::Risky);
    }

    #[test]
    fn calendar_proof_rescues_an_unknown_smtp_outcome() {
        // scenario: SMTP inconclusive but CalDAV confirms the account → 99
        let a = RiskAnalysis {
            smtp_status: 0,
            has_google_calendar: true,
            ..base()
        };
        let v = score(&a);
        assert!(v.score >= 90);
        assert_eq!(v.status, VerificationStatus::Valid);
        assert_eq!(v.reachability, Reachability::Safe);
    }

    #[test]
    fn breach_upgrades_plain_catch_all_to_valid() {
        let a = RiskAnalysis {
            is_catch_all: true,
            breach_count: 1,
            domain_age_days: 400,
            ..base()
        };
        let v = score(&a);
        assert_eq!(v.status, VerificationStatus::Valid);
        assert!(v.breakdown.contains_key("p1_historical_breach"));
        assert!(v.breakdown.contains_key("resolution_catchall_strong"));
    }

    #[test]
    fn proof_shields_penalties() {
        let shielded = RiskAnalysis {
            smtp_status: 250,
            entropy_score: 0.9,
            is_role_account: true,
            has_gravatar: true,
            ..base()
        };
        let v = score(&shielded);
        assert!(!v.breakdown.contains_key("penalty_high_entropy"));
        assert!(!v.breakdown.contains_key("penalty_role_account"));

        let unshielded = RiskAnalysis {
            smtp_status: 250,
            entropy_score: 0.9,
            is_role_account: true,
            ..base()
        };
        let v = score(&unshielded);
        assert!(v.breakdown.contains_key("penalty_high_entropy"));
        assert!(v.breakdown.contains_key("penalty_role_account"));
    }

    #[test]
    fn entropy_threshold_is_strictly_greater_than_half() {
        let at_threshold = RiskAnalysis {
            smtp_status: 250,
            entropy_score: 0.5,
            ..base()
        };
        assert!(!score(&at_threshold).breakdown.contains_key("penalty_high_entropy"));

        let above = RiskAnalysis {
            smtp_status: 250,
            entropy_score: 0.51,
            ..base()
        };
        assert!(score(&above).breakdown.contains_key("penalty_high_entropy"));
    }

    #[test]
    fn domain_age_boundaries() {
        let established = RiskAnalysis {
            smtp_status: 250,
            domain_age_days: 365,
            ..base()
        };
        let v = score(&established);
        assert!(v.breakdown.contains_key("p2_domain_age_established"));
        assert!(!v.breakdown.contains_key("p2_domain_age_vetted"));

        let vetted = RiskAnalysis {
            smtp_status: 250,
            domain_age_days: 1825,
            ..base()
        };
        let v = score(&vetted);
        assert!(v.breakdown.contains_key("p2_domain_age_vetted"));
        assert!(!v.breakdown.contains_key("p2_domain_age_established"));
    }

    #[test]
    fn timing_boundaries_are_strict() {
        let at_3000 = RiskAnalysis {
            smtp_status: 250,
            timing_delta_ms: 3000,
            ..base()
        };
        let v = score(&at_3000);
        assert!(!v.breakdown.contains_key("p2_timing_strong"));
        assert!(v.breakdown.contains_key("p2_timing_weak"));

        let at_3001 = RiskAnalysis {
            smtp_status: 250,
            timing_delta_ms: 3001,
            ..base()
        };
        assert!(score(&at_3001).breakdown.contains_key("p2_timing_strong"));

        let at_1500 = RiskAnalysis {
            smtp_status: 250,
            timing_delta_ms: 1500,
            ..base()
        };
        let v = score(&at_1500);
        assert!(!v.breakdown.contains_key("p2_timing_weak"));
        assert!(!v.breakdown.contains_key("p2_timing_strong"));
    }

    #[test]
    fn new_domain_penalty_needs_a_real_rdap_answer() {
        // age 0 means "RDAP gave no answer", not "brand new"
        let no_answer = RiskAnalysis {
            smtp_status: 250,
            domain_age_days: 0,
            ..base()
        };
        assert!(!score(&no_answer).breakdown.contains_key("penalty_new_domain"));

        let brand_new = RiskAnalysis {
            smtp_status: 250,
            domain_age_days: 5,
            ..base()
        };
        assert!(score(&brand_new).breakdown.contains_key("penalty_new_domain"));
    }

    #[test]
    fn score_is_always_clamped() {
        let maxed = RiskAnalysis {
            smtp_status: 250,
            has_sharepoint: true,
            has_teams_presence: true,
            has_google_calendar: true,
            breach_count: 10,
            timing_delta_ms: 5000,
            domain_age_days: 4000,
            ..base()
        };
        let v = score(&maxed);
        assert_eq!(v.score, 99);
        assert_eq!(v.reachability, Reachability::Safe);

        let floored = RiskAnalysis {
            is_catch_all: true,
            entropy_score: 0.9,
            is_role_account: true,
            domain_age_days: 3,
            ..base()
        };
        let v = score(&floored);
        assert_eq!(v.score, 0);
        assert_eq!(v.reachability, Reachability::Bad);
    }

    #[test]
    fn reachability_bands_follow_the_score() {
        assert_eq!(band(99), Reachability::Safe);
        assert_eq!(band(90), Reachability::Safe);
        assert_eq!(band(89), Reachability::Risky);
        assert_eq!(band(60), Reachability::Risky);
        assert_eq!(band(59), Reachability::Bad);
        assert_eq!(band(0), Reachability::Bad);
    }
}
