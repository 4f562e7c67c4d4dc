//! Turns a raw principal from a request line into a `(user, domain)` pair.
//!
//! Accepted forms:
//!
//! ```text
//! jdoe                    -> user "jdoe", default domain (if any)
//! jdoe@corp.example.com   -> user "jdoe", domain "CORP.EXAMPLE.COM"
//! CORP\jdoe  CORP%5Cjdoe  -> user "jdoe", domain from the netbios map
//! ```
//!
//! Realms are conventionally upper case, so a domain taken from `user@domain`
//! is upper-cased.  Domains from the netbios map or the default domain are
//! used exactly as configured.

use crate::domain::rules::{lookup_netbios, NetbiosRule};

/// Reserved principal that asks the helper to shut down.
const SHUTDOWN_SENTINEL: &str = "QQ";

/// Netbios separators in the order they are tried.
const NETBIOS_SEPARATORS: [&str; 3] = ["\\", "%5C", "%5c"];

/// A user name with its (possibly unknown) Kerberos domain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub user: String,
    pub domain: Option<String>,
}

impl Principal {
    /// `QQ@QQ` is sent by the supervising process to stop the helper.
    pub fn is_shutdown_sentinel(&self) -> bool {
        self.user == SHUTDOWN_SENTINEL && self.domain.as_deref() == Some(SHUTDOWN_SENTINEL)
    }
}

/// Resolves raw principals against the netbios map and default domain.
#[derive(Debug, Clone, Copy)]
pub struct DomainResolver<'a> {
    netbios: &'a [NetbiosRule],
    default_domain: Option<&'a str>,
}

impl<'a> DomainResolver<'a> {
    pub fn new(netbios: &'a [NetbiosRule], default_domain: Option<&'a str>) -> Self {
        Self {
            netbios,
            default_domain: default_domain.filter(|d| !d.is_empty()),
        }
    }

    /// Splits `raw` into user and domain.  Never fails; an unknown domain is
    /// reported as `None`.
    pub fn resolve(&self, raw: &str) -> Principal {
        let (user, domain) = match split_netbios(raw) {
            Some((netbios, user)) => (user, lookup_netbios(self.netbios, netbios).map(str::to_string)),
            None => match raw.rsplit_once('@') {
                Some((user, realm)) if !realm.is_empty() => (user, Some(realm.to_uppercase())),
                Some((user, _)) => (user, None),
                None => (raw, None),
            },
        };

        Principal {
            user: user.to_string(),
            domain: domain.or_else(|| self.default_domain.map(str::to_string)),
        }
    }
}

fn split_netbios(raw: &str) -> Option<(&str, &str)> {
    NETBIOS_SEPARATORS.iter().find_map(|sep| {
        raw.find(sep)
            .map(|idx| (&raw[..idx], &raw[idx + sep.len()..]))
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn corp_rules() -> Vec<NetbiosRule> {
        vec![NetbiosRule {
            netbios: "CORP".to_string(),
            domain: "corp.example.com".to_string(),
        }]
    }

    #[test]
    fn test_bare_user_gets_default_domain() {
        // Arrange
        let resolver = DomainResolver::new(&[], Some("EXAMPLE.COM"));

        // Act
        let principal = resolver.resolve("jdoe");

        // Assert
        assert_eq!(
            principal,
            Principal {
                user: "jdoe".to_string(),
                domain: Some("EXAMPLE.COM".to_string()),
            }
        );
    }

    #[test]
    fn test_bare_user_without_default_has_no_domain() {
        let principal = DomainResolver::new(&[], None).resolve("jdoe");

        assert_eq!(principal.domain, None);
    }

    #[test]
    fn test_netbios_backslash_uses_mapped_domain_verbatim() {
        // Arrange
        let rules = corp_rules();
        let resolver = DomainResolver::new(&rules, None);

        // Act
        let principal = resolver.resolve("CORP\\jdoe");

        // Assert
        assert_eq!(principal.user, "jdoe");
        assert_eq!(principal.domain.as_deref(), Some("corp.example.com"));
    }

    #[test]
    fn test_netbios_percent_encoded_separators() {
        let rules = corp_rules();
        let resolver = DomainResolver::new(&rules, None);

        for raw in ["corp%5Cjdoe", "CORP%5cjdoe"] {
            let principal = resolver.resolve(raw);
            assert_eq!(principal.user, "jdoe", "raw = {raw}");
            assert_eq!(principal.domain.as_deref(), Some("corp.example.com"), "raw = {raw}");
        }
    }

    #[test]
    fn test_unknown_netbios_falls_back_to_default_domain() {
        let rules = corp_rules();
        let resolver = DomainResolver::new(&rules, Some("EXAMPLE.COM"));

        let principal = resolver.resolve("LAB\\jdoe");

        assert_eq!(principal.user, "jdoe");
        assert_eq!(principal.domain.as_deref(), Some("EXAMPLE.COM"));
    }

    #[test]
    fn test_realm_is_split_on_last_at_and_upper_cased() {
        let resolver = DomainResolver::new(&[], Some("IGNORED.COM"));

        let principal = resolver.resolve("j@doe@corp.example.com");

        assert_eq!(principal.user, "j@doe");
        assert_eq!(principal.domain.as_deref(), Some("CORP.EXAMPLE.COM"));
    }

    #[test]
    fn test_empty_realm_is_treated_as_missing() {
        let resolver = DomainResolver::new(&[], Some("EXAMPLE.COM"));

        let principal = resolver.resolve("jdoe@");

        assert_eq!(principal.user, "jdoe");
        assert_eq!(principal.domain.as_deref(), Some("EXAMPLE.COM"));
    }

    #[test]
    fn test_shutdown_sentinel_detection() {
        let resolver = DomainResolver::new(&[], None);

        assert!(resolver.resolve("QQ@QQ").is_shutdown_sentinel());
        assert!(resolver.resolve("QQ@qq").is_shutdown_sentinel());
        assert!(!resolver.resolve("QQ").is_shutdown_sentinel());
        assert!(!resolver.resolve("qq@QQ").is_shutdown_sentinel());
    }
}
