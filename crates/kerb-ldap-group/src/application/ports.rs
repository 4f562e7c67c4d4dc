//! Collaborator contracts used by the application layer.
//!
//! The use cases never touch sockets, LDAP libraries or Kerberos tools
//! directly.  They talk to three traits:
//!
//! ```text
//! NameService          SRV queries (raw wire bytes) and host address lookup
//! DirectoryClient      open -> DirectoryConnection: bind / search / unbind
//! CredentialProvider   Kerberos credential context for one domain
//! ```
//!
//! Production implementations live in `crate::infrastructure`; the same
//! module also provides in-memory doubles for tests.

use std::fmt;

use async_trait::async_trait;
use thiserror::Error;

// ── Name service ──────────────────────────────────────────────────────────────

/// Errors from DNS queries and address resolution.
#[derive(Debug, Error)]
pub enum LookupError {
    /// No nameserver answered within the DNS timeout.
    #[error("no nameserver answered the query for {name}")]
    Timeout { name: String },

    /// A nameserver answered with an error code (NXDOMAIN, SERVFAIL, ...).
    #[error("lookup of {name} failed with response code {code}")]
    Rejected { name: String, code: u8 },

    /// The query could not be sent or the answer could not be read.
    #[error("lookup of {name} failed: {source}")]
    Io {
        name: String,
        #[source]
        source: std::io::Error,
    },

    /// The query itself could not be built.
    #[error("cannot query {name}: {reason}")]
    InvalidName { name: String, reason: String },
}

/// DNS access for service discovery.
#[async_trait]
pub trait NameService: Send + Sync {
    /// Sends an SRV query for `name` and returns the raw response message.
    async fn query_srv(&self, name: &str) -> Result<Vec<u8>, LookupError>;

    /// Resolves `host` to its addresses, rendered as strings, in resolver
    /// order without duplicates.
    async fn resolve_host(&self, host: &str) -> Result<Vec<String>, LookupError>;
}

// ── Directory ─────────────────────────────────────────────────────────────────

/// How a connection authenticates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BindMode {
    Kerberos,
    Simple,
}

impl fmt::Display for BindMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Kerberos => f.write_str("SASL/GSSAPI"),
            Self::Simple => f.write_str("simple"),
        }
    }
}

/// Credentials carried by a [`BindDirective`].
#[derive(Clone, PartialEq, Eq)]
pub enum BindCredentials {
    /// Use the Kerberos ticket cache named by `KRB5CCNAME` for `server`.
    Gssapi { server: String },
    /// Simple bind; an empty user and password is an anonymous bind.
    Password { user: String, password: String },
}

/// Everything the directory client needs to authenticate one connection.
/// Built per attempt and dropped with it.
#[derive(Clone, PartialEq, Eq)]
pub struct BindDirective {
    pub bind_base: String,
    pub credentials: BindCredentials,
}

impl BindDirective {
    pub fn kerberos(server: impl Into<String>, bind_base: impl Into<String>) -> Self {
        Self {
            bind_base: bind_base.into(),
            credentials: BindCredentials::Gssapi {
                server: server.into(),
            },
        }
    }

    pub fn simple(
        user: impl Into<String>,
        password: impl Into<String>,
        bind_base: impl Into<String>,
    ) -> Self {
        Self {
            bind_base: bind_base.into(),
            credentials: BindCredentials::Password {
                user: user.into(),
                password: password.into(),
            },
        }
    }

    pub fn mode(&self) -> BindMode {
        match self.credentials {
            BindCredentials::Gssapi { .. } => BindMode::Kerberos,
            BindCredentials::Password { .. } => BindMode::Simple,
        }
    }
}

// Keeps the password out of logs.
impl fmt::Debug for BindDirective {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("BindDirective");
        s.field("mode", &self.mode()).field("bind_base", &self.bind_base);
        match &self.credentials {
            BindCredentials::Gssapi { server } => s.field("server", server),
            BindCredentials::Password { user, .. } => s.field("user", user),
        };
        s.finish()
    }
}

/// Search scope of a directory query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchScope {
    Base,
    Subtree,
}

/// Errors reported by a directory client.
#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("cannot connect to {url}: {reason}")]
    Connect { url: String, reason: String },

    #[error("{mode} bind failed: {reason}")]
    Bind { mode: BindMode, reason: String },

    #[error("search {filter} under `{base}` failed: {reason}")]
    Search {
        base: String,
        filter: String,
        reason: String,
    },

    #[error("search {filter} timed out")]
    Timeout { filter: String },

    #[error("{0} is not supported by this build")]
    Unsupported(&'static str),
}

/// An open directory connection.
#[async_trait]
pub trait DirectoryConnection: Send {
    async fn bind(&mut self, directive: &BindDirective) -> Result<(), DirectoryError>;

    /// Returns every value of `attribute` across all entries matching
    /// `filter`.  Zero matches is `Ok(vec![])`, not an error.
    async fn search(
        &mut self,
        base: &str,
        scope: SearchScope,
        filter: &str,
        attribute: &str,
    ) -> Result<Vec<String>, DirectoryError>;

    /// Ends the session.  Errors are logged by the implementation.
    async fn unbind(&mut self);
}

/// Opens directory connections.
#[async_trait]
pub trait DirectoryClient: Send + Sync {
    async fn open(
        &self,
        host: &str,
        port: u16,
        use_tls: bool,
    ) -> Result<Box<dyn DirectoryConnection>, DirectoryError>;
}

// ── Kerberos ──────────────────────────────────────────────────────────────────

/// Errors from the Kerberos credential provider.
#[derive(Debug, Error)]
pub enum CredentialError {
    /// No keytab principal can obtain credentials for the domain.
    #[error("no usable keytab principal for domain {domain}")]
    NoPrincipal { domain: String },

    /// The keytab could not be read.
    #[error("cannot read keytab: {0}")]
    Keytab(String),

    /// A Kerberos tool could not be run or failed.
    #[error("{tool} failed: {reason}")]
    Tool { tool: &'static str, reason: String },
}

/// A usable Kerberos identity for one authorization decision.
///
/// The release action supplied by the provider (destroying the ticket cache)
/// runs exactly once, when the context is dropped.
pub struct CredentialContext {
    principal: String,
    cache_name: String,
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl CredentialContext {
    pub fn new(
        principal: impl Into<String>,
        cache_name: impl Into<String>,
        release: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            principal: principal.into(),
            cache_name: cache_name.into(),
            release: Some(Box::new(release)),
        }
    }

    pub fn principal(&self) -> &str {
        &self.principal
    }

    pub fn cache_name(&self) -> &str {
        &self.cache_name
    }
}

impl fmt::Debug for CredentialContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialContext")
            .field("principal", &self.principal)
            .field("cache_name", &self.cache_name)
            .finish()
    }
}

impl Drop for CredentialContext {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

/// Obtains Kerberos credentials from the host keytab.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Acquires credentials usable against `domain`, preferring `principal`
    /// when one is configured.
    async fn acquire(
        &self,
        domain: &str,
        principal: Option<&str>,
    ) -> Result<CredentialContext, CredentialError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_credential_context_releases_once_on_drop() {
        // Arrange
        let released = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&released);
        let context = CredentialContext::new("HTTP/proxy@CORP", "FILE:/tmp/cc", move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        // Act
        assert_eq!(context.cache_name(), "FILE:/tmp/cc");
        drop(context);

        // Assert
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_bind_directive_debug_hides_password() {
        let directive = BindDirective::simple("cn=proxy", "s3cret", "dc=corp");

        let rendered = format!("{directive:?}");

        assert!(rendered.contains("cn=proxy"));
        assert!(!rendered.contains("s3cret"));
        assert_eq!(directive.mode(), BindMode::Simple);
    }

    #[test]
    fn test_kerberos_directive_mode() {
        let directive = BindDirective::kerberos("dc1.corp.example.com", "dc=corp");

        assert_eq!(directive.mode(), BindMode::Kerberos);
        assert_eq!(directive.bind_base, "dc=corp");
    }
}
