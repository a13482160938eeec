//! Disposable domain detection
//!
//! Addresses at known burner providers are rejected before any network
//! traffic is generated.

use std::collections::HashSet;
use std::sync::LazyLock;

static DISPOSABLE_DOMAINS: LazyLock<HashSet<&'static str>> = LazyLock::new(|| {
    HashSet::from([
        "temp-mail.org",
        "10minutemail.com",
        "guerrillamail.com",
        "mailinator.com",
        "yopmail.com",
        "throwawaymail.com",
        "tempmail.net",
        "sharklasers.com",
        "dispostable.com",
    ])
});

/// Whether the domain belongs to a known disposable-email provider
pub fn is_disposable_domain(domain: &str) -> bool {
    DISPOSABLE_DOMAINS.contains(domain.to_ascii_lowercase().as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_burners_are_flagged() {
        assert!(is_disposable_domain("mailinator.com"));
        assert!(is_disposable_domain("YOPMAIL.COM"));
    }

    #[test]
    fn regular_domains_pass() {
        assert!(!is_disposable_domain("gmail.com"));
        assert!(!is_disposable_domain("example.com"));
    }
}
