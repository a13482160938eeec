//! Address hygiene heuristics requiring no I/O
//!
//! Role-account detection and local-part entropy run before any collector
//! is spawned; both feed penalty signals in the scorer.

use std::collections::HashSet;
use std::sync::LazyLock;

static ROLE_ACCOUNTS: LazyLock<HashSet<&'static str>> = LazyLock::new(|| {
    HashSet::from([
        "admin",
        "support",
        "info",
        "sales",
        "contact",
        "help",
        "office",
        "marketing",
        "jobs",
        "billing",
        "abuse",
        "postmaster",
        "noreply",
        "no-reply",
        "webmaster",
        "hostmaster",
        "hr",
    ])
});

/// Split an address into `(local-part, domain)`.
///
/// Returns `None` unless the address contains exactly one `@` with
/// non-empty text on both sides.
pub fn split_address(email: &str) -> Option<(&str, &str)> {
    let (local, domain) = email.split_once('@')?;
    if local.is_empty() || domain.is_empty() || domain.contains('@') {
        return None;
    }
    Some((local, domain))
}

/// Whether the local-part is a generic function/role mailbox
pub fn is_role_account(email: &str) -> bool {
    match split_address(email) {
        Some((local, _)) => ROLE_ACCOUNTS.contains(local.to_ascii_lowercase().as_str()),
        None => false,
    }
}

/// Ratio of digits to total length of the local-part.
///
/// High values (e.g. `x9f2k1`) indicate machine-generated addresses;
/// the scorer penalizes ratios strictly above 0.5.
pub fn entropy_score(local: &str) -> f64 {
    if local.is_empty() {
        return 0.0;
    }
    let total = local.chars().count() as f64;
    let digits = local.chars().filter(char::is_ascii_digit).count() as f64;
    digits / total
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_requires_exactly_one_at_sign() {
        assert_eq!(split_address("a@b.com"), Some(("a", "b.com")));
        assert_eq!(split_address("a@b@c.com"), None);
        assert_eq!(split_address("@b.com"), None);
        assert_eq!(split_address("a@"), None);
        assert_eq!(split_address("nodomain"), None);
    }

    #[test]
    fn role_accounts_match_exact_local_part() {
        assert!(is_role_account("admin@example.com"));
        assert!(is_role_account("No-Reply@example.com"));
        assert!(!is_role_account("administrator@example.com"));
        assert!(!is_role_account("ada@example.com"));
    }

    #[test]
    fn entropy_is_digit_ratio() {
        // exactly at the scorer's threshold, which is strictly greater-than
        assert_eq!(entropy_score("a1b2c3"), 0.5);
        assert_eq!(entropy_score("ada"), 0.0);
        assert_eq!(entropy_score("1234"), 1.0);
        assert_eq!(entropy_score(""), 0.0);
    }
}
