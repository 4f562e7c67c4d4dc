//! Runtime settings shared by the use cases.
//!
//! Assembled once in `main` from the command line and the optional settings
//! file, then borrowed read-only for every request.

use std::fmt;
use std::time::Duration;

/// Default bound on the nested AD group walk.
pub const DEFAULT_MAX_DEPTH: u32 = 5;
/// Default wall-clock limit for one directory search.
pub const DEFAULT_SEARCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Static LDAP server used when Kerberos is unavailable or no domain is known.
#[derive(Clone, PartialEq, Eq)]
pub struct SimpleBindSettings {
    /// `ldap://host[:port]` or `ldaps://host[:port]`.
    pub url: String,
    pub user: Option<String>,
    pub password: Option<String>,
}

impl SimpleBindSettings {
    /// The Kerberos-failure fallback needs URL, user and password.
    pub fn has_credentials(&self) -> bool {
        self.user.is_some() && self.password.is_some()
    }
}

impl fmt::Debug for SimpleBindSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimpleBindSettings")
            .field("url", &self.url)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "********"))
            .finish()
    }
}

/// Settings consumed by the application layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HelperSettings {
    /// Domain applied to principals that carry none.
    pub default_domain: Option<String>,
    /// Keytab principal to use instead of searching by realm.
    pub keytab_principal: Option<String>,
    /// Request TLS towards discovered servers (and the `_ldaps._tcp` SRV name).
    pub use_tls: bool,
    pub simple_bind: Option<SimpleBindSettings>,
    /// Search base for simple-bind sessions.
    pub bind_path: Option<String>,
    pub max_depth: u32,
    pub search_timeout: Duration,
}

impl Default for HelperSettings {
    fn default() -> Self {
        Self {
            default_domain: None,
            keytab_principal: None,
            use_tls: false,
            simple_bind: None,
            bind_path: None,
            max_depth: DEFAULT_MAX_DEPTH,
            search_timeout: DEFAULT_SEARCH_TIMEOUT,
        }
    }
}
