//! Use case: obtain a bound directory session for one membership check.
//!
//! ```text
//! domain known ─► Kerberos credentials? ─yes─► discovered hosts, SASL bind
//!      │                 │                        │ all refused
//!      │                 no (and no full           ▼
//!      │                 fallback) ─► fail     static URL hosts, simple bind
//!      ▼                                          │
//! no domain ─────────────────────────────────────►┘
//! ```
//!
//! The first host that opens and binds wins.  A Kerberos session keeps its
//! [`CredentialContext`] alive until the session is dropped, which destroys
//! the ticket cache on every exit path.

use kerb_ldap_core::{bind_path_from_domain, HostCandidate, ServerRule, DEFAULT_LDAP_PORT};
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use crate::application::discover_servers::DiscoverServersUseCase;
use crate::application::ports::{
    BindDirective, CredentialContext, CredentialProvider, DirectoryClient, DirectoryConnection,
    NameService,
};
use crate::application::settings::{HelperSettings, SimpleBindSettings};

#[derive(Debug, Error)]
pub enum SessionError {
    /// Neither Kerberos nor a static LDAP URL can be used.
    #[error("no directory access strategy available for {0}")]
    NoStrategy(String),

    /// Every host of every strategy refused the connection or the bind.
    #[error("no directory server accepted a bind for {0}")]
    BindFailed(String),
}

/// One way of reaching a directory, in the order they are attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// SASL/GSSAPI against the servers discovered for the domain.
    Kerberos,
    /// Simple bind against the hosts of the static LDAP URL.
    Simple,
}

/// Decides which strategies apply.
///
/// With a domain, Kerberos comes first when credentials were obtained.  If
/// credentials could not be obtained, the static URL is only used when user
/// and password are configured too.  Without a domain the static URL is the
/// only option.
pub fn plan_strategies(
    domain: Option<&str>,
    kerberos_ready: bool,
    simple: Option<&SimpleBindSettings>,
) -> Vec<Strategy> {
    let mut plan = Vec::new();
    match (domain, kerberos_ready) {
        (Some(_), true) => {
            plan.push(Strategy::Kerberos);
            if simple.is_some() {
                plan.push(Strategy::Simple);
            }
        }
        (Some(_), false) => {
            if simple.is_some_and(SimpleBindSettings::has_credentials) {
                plan.push(Strategy::Simple);
            }
        }
        (None, _) => {
            if simple.is_some() {
                plan.push(Strategy::Simple);
            }
        }
    }
    plan
}

/// Host, port and TLS flag taken from a static `ldap://` or `ldaps://` URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LdapUrl {
    pub host: String,
    pub port: u16,
    pub secure: bool,
}

impl LdapUrl {
    /// Parses `ldap[s]://host[:port]`; the port defaults to 389 for both
    /// schemes.  Returns `None` for anything else.
    pub fn parse(raw: &str) -> Option<Self> {
        let url = Url::parse(raw).ok()?;
        let secure = match url.scheme() {
            "ldap" => false,
            "ldaps" => true,
            _ => return None,
        };
        let host = url.host_str().filter(|h| !h.is_empty())?;
        Some(Self {
            host: host.trim_start_matches('[').trim_end_matches(']').to_string(),
            port: url.port().unwrap_or(DEFAULT_LDAP_PORT),
            secure,
        })
    }
}

/// A bound connection plus what the searches need to know about it.
pub struct BoundSession {
    connection: Box<dyn DirectoryConnection>,
    bind_base: String,
    host: String,
    // Dropped after `connection`: the ticket cache outlives the LDAP session.
    _credentials: Option<CredentialContext>,
}

impl BoundSession {
    pub fn connection(&mut self) -> &mut dyn DirectoryConnection {
        self.connection.as_mut()
    }

    pub fn bind_base(&self) -> &str {
        &self.bind_base
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// Unbinds; the credential context is released when `self` drops.
    pub async fn close(mut self) {
        self.connection.unbind().await;
    }
}

pub struct SelectStrategyUseCase<'a> {
    settings: &'a HelperSettings,
    discovery: DiscoverServersUseCase<'a>,
    directory: &'a dyn DirectoryClient,
    credentials: &'a dyn CredentialProvider,
}

impl<'a> SelectStrategyUseCase<'a> {
    pub fn new(
        settings: &'a HelperSettings,
        servers: &'a [ServerRule],
        names: &'a dyn NameService,
        directory: &'a dyn DirectoryClient,
        credentials: &'a dyn CredentialProvider,
    ) -> Self {
        Self {
            settings,
            discovery: DiscoverServersUseCase::new(servers, names),
            directory,
            credentials,
        }
    }

    /// Opens and binds a session for a principal in `domain`.
    ///
    /// # Errors
    ///
    /// [`SessionError::NoStrategy`] if nothing is configured that could
    /// work, [`SessionError::BindFailed`] if every attempt was refused.
    pub async fn establish(&self, domain: Option<&str>) -> Result<BoundSession, SessionError> {
        let label = domain.unwrap_or("<no domain>").to_string();

        let mut credentials = match domain {
            Some(domain) => match self
                .credentials
                .acquire(domain, self.settings.keytab_principal.as_deref())
                .await
            {
                Ok(context) => {
                    debug!("using Kerberos principal {}", context.principal());
                    Some(context)
                }
                Err(e) => {
                    warn!("Kerberos credentials unavailable for {domain}: {e}");
                    None
                }
            },
            None => None,
        };

        let simple = self.settings.simple_bind.as_ref();
        let plan = plan_strategies(domain, credentials.is_some(), simple);
        if plan.is_empty() {
            return Err(SessionError::NoStrategy(label));
        }

        for strategy in plan {
            let attempt = match (strategy, domain, simple) {
                (Strategy::Kerberos, Some(domain), _) => self.kerberos_session(domain).await,
                (Strategy::Simple, _, Some(simple)) => self.simple_session(domain, simple).await,
                _ => None,
            };
            if let Some(mut session) = attempt {
                info!("bound to {} ({strategy:?})", session.host);
                if strategy == Strategy::Kerberos {
                    session._credentials = credentials.take();
                }
                return Ok(session);
            }
        }

        Err(SessionError::BindFailed(label))
    }

    async fn kerberos_session(&self, domain: &str) -> Option<BoundSession> {
        let use_tls = self.settings.use_tls;
        let candidates = self.discovery.discover(domain, use_tls).await;
        let bind_base = bind_path_from_domain(domain);

        for candidate in &candidates {
            let directive = BindDirective::kerberos(candidate.host.clone(), bind_base.clone());
            if let Some(session) = self.try_candidate(candidate, use_tls, &directive).await {
                return Some(session);
            }
        }
        debug!("no discovered server for {domain} accepted a SASL bind");
        None
    }

    async fn simple_session(
        &self,
        domain: Option<&str>,
        simple: &SimpleBindSettings,
    ) -> Option<BoundSession> {
        let Some(url) = LdapUrl::parse(&simple.url) else {
            warn!("ignoring malformed LDAP URL {}", simple.url);
            return None;
        };

        let bind_base = self
            .settings
            .bind_path
            .clone()
            .or_else(|| domain.map(bind_path_from_domain))
            .unwrap_or_default();
        let directive = BindDirective::simple(
            simple.user.clone().unwrap_or_default(),
            simple.password.clone().unwrap_or_default(),
            bind_base,
        );

        for address in self.discovery.address_candidates(&url.host).await {
            let candidate = HostCandidate {
                port: Some(url.port),
                ..address
            };
            if let Some(session) = self.try_candidate(&candidate, url.secure, &directive).await {
                return Some(session);
            }
        }
        debug!("no host of {} accepted a simple bind", simple.url);
        None
    }

    async fn try_candidate(
        &self,
        candidate: &HostCandidate,
        use_tls: bool,
        directive: &BindDirective,
    ) -> Option<BoundSession> {
        let port = candidate.port_or_default();
        let mut connection = match self.directory.open(&candidate.host, port, use_tls).await {
            Ok(connection) => connection,
            Err(e) => {
                debug!("open {}:{port} failed: {e}", candidate.host);
                return None;
            }
        };

        if let Err(e) = connection.bind(directive).await {
            debug!("{e} on {}:{port}", candidate.host);
            connection.unbind().await;
            return None;
        }

        Some(BoundSession {
            connection,
            bind_base: directive.bind_base.clone(),
            host: candidate.host.clone(),
            _credentials: None,
        })
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::{BindCredentials, BindMode};
    use crate::infrastructure::directory::mock::{InMemoryDirectory, OpenRecord};
    use crate::infrastructure::dns::mock::StaticNameService;
    use crate::infrastructure::kerberos::mock::StaticCredentialProvider;

    fn simple_settings(user: Option<&str>, password: Option<&str>) -> SimpleBindSettings {
        SimpleBindSettings {
            url: "ldaps://ldap.example.com:636".to_string(),
            user: user.map(str::to_string),
            password: password.map(str::to_string),
        }
    }

    #[test]
    fn test_plan_with_domain_and_credentials() {
        let simple = simple_settings(None, None);

        assert_eq!(plan_strategies(Some("CORP"), true, None), vec![Strategy::Kerberos]);
        assert_eq!(
            plan_strategies(Some("CORP"), true, Some(&simple)),
            vec![Strategy::Kerberos, Strategy::Simple]
        );
    }

    #[test]
    fn test_plan_without_credentials_needs_full_fallback() {
        let partial = simple_settings(Some("cn=proxy"), None);
        let full = simple_settings(Some("cn=proxy"), Some("secret"));

        assert!(plan_strategies(Some("CORP"), false, Some(&partial)).is_empty());
        assert_eq!(plan_strategies(Some("CORP"), false, Some(&full)), vec![Strategy::Simple]);
    }

    #[test]
    fn test_plan_without_domain_uses_url_only() {
        let anonymous = simple_settings(None, None);

        assert_eq!(plan_strategies(None, false, Some(&anonymous)), vec![Strategy::Simple]);
        assert!(plan_strategies(None, false, None).is_empty());
    }

    #[test]
    fn test_ldap_url_parsing() {
        assert_eq!(
            LdapUrl::parse("ldaps://ldap.example.com:636"),
            Some(LdapUrl {
                host: "ldap.example.com".to_string(),
                port: 636,
                secure: true,
            })
        );
        assert_eq!(LdapUrl::parse("ldap://dc1").map(|u| (u.port, u.secure)), Some((389, false)));
        assert_eq!(LdapUrl::parse("ldap://[::1]:10389").map(|u| u.host), Some("::1".to_string()));
        assert_eq!(LdapUrl::parse("dc1.example.com"), None);
        assert_eq!(LdapUrl::parse("http://dc1"), None);
    }

    #[tokio::test]
    async fn test_kerberos_session_binds_first_reachable_candidate() {
        // Arrange
        let settings = HelperSettings::default();
        let servers = vec![
            ServerRule { server: "dc1.corp".to_string(), domain: "CORP".to_string() },
            ServerRule { server: "dc2.corp".to_string(), domain: "CORP".to_string() },
        ];
        let names = StaticNameService::new();
        let directory = InMemoryDirectory::active_directory().unreachable("dc1.corp");
        let credentials = StaticCredentialProvider::granting("HTTP/proxy.corp@CORP");
        let selector = SelectStrategyUseCase::new(&settings, &servers, &names, &directory, &credentials);

        // Act
        let session = selector.establish(Some("CORP")).await.unwrap();

        // Assert
        assert_eq!(session.host(), "dc2.corp");
        assert_eq!(session.bind_base(), "dc=CORP");
        assert_eq!(directory.binds()[0], BindDirective::kerberos("dc2.corp", "dc=CORP"));
        assert_eq!(credentials.live_contexts(), 1, "ticket cache lives with the session");

        session.close().await;
        assert_eq!(credentials.live_contexts(), 0);
        assert_eq!(directory.unbind_count(), 1);
    }

    #[tokio::test]
    async fn test_refused_sasl_falls_back_to_static_url() {
        // Arrange
        let settings = HelperSettings {
            simple_bind: Some(simple_settings(Some("cn=proxy"), Some("secret"))),
            bind_path: Some("ou=people,dc=example".to_string()),
            ..HelperSettings::default()
        };
        let servers = vec![ServerRule { server: "dc1.corp".to_string(), domain: "CORP".to_string() }];
        let names = StaticNameService::new().with_addresses("ldap.example.com", &["192.0.2.5"]);
        let directory = InMemoryDirectory::posix().rejecting(BindMode::Kerberos);
        let credentials = StaticCredentialProvider::granting("HTTP/proxy.corp@CORP");
        let selector = SelectStrategyUseCase::new(&settings, &servers, &names, &directory, &credentials);

        // Act
        let session = selector.establish(Some("CORP")).await.unwrap();

        // Assert
        assert_eq!(session.host(), "192.0.2.5");
        assert_eq!(session.bind_base(), "ou=people,dc=example");
        assert_eq!(
            directory.opened().last(),
            Some(&OpenRecord { host: "192.0.2.5".to_string(), port: 636, use_tls: true })
        );
        assert!(matches!(
            directory.binds().last().map(|d| d.credentials.clone()),
            Some(BindCredentials::Password { ref user, .. }) if user == "cn=proxy"
        ));
        assert_eq!(credentials.live_contexts(), 0, "unused ticket cache is released");
    }

    #[tokio::test]
    async fn test_missing_credentials_without_fallback_is_no_strategy() {
        let settings = HelperSettings::default();
        let names = StaticNameService::new();
        let directory = InMemoryDirectory::active_directory();
        let credentials = StaticCredentialProvider::refusing();
        let selector = SelectStrategyUseCase::new(&settings, &[], &names, &directory, &credentials);

        let result = selector.establish(Some("CORP")).await;

        assert!(matches!(result, Err(SessionError::NoStrategy(_))));
        assert!(directory.opened().is_empty());
    }

    #[tokio::test]
    async fn test_no_domain_binds_anonymously_with_empty_base() {
        // Arrange – anonymous bind against the static URL
        let settings = HelperSettings {
            simple_bind: Some(SimpleBindSettings {
                url: "ldap://ldap.example.com".to_string(),
                user: None,
                password: None,
            }),
            ..HelperSettings::default()
        };
        let names = StaticNameService::new().with_addresses("ldap.example.com", &["192.0.2.5"]);
        let directory = InMemoryDirectory::posix();
        let credentials = StaticCredentialProvider::granting("HTTP/proxy@CORP");
        let selector = SelectStrategyUseCase::new(&settings, &[], &names, &directory, &credentials);

        // Act
        let session = selector.establish(None).await.unwrap();

        // Assert
        assert_eq!(session.bind_base(), "");
        assert_eq!(credentials.acquired(), 0, "no domain means no Kerberos attempt");
        assert_eq!(directory.binds()[0], BindDirective::simple("", "", ""));
    }

    #[tokio::test]
    async fn test_every_host_refusing_is_bind_failed() {
        let settings = HelperSettings::default();
        let names = StaticNameService::new();
        let directory = InMemoryDirectory::active_directory().rejecting(BindMode::Kerberos);
        let credentials = StaticCredentialProvider::granting("HTTP/proxy@CORP");
        let selector = SelectStrategyUseCase::new(&settings, &[], &names, &directory, &credentials);

        let result = selector.establish(Some("CORP")).await;

        assert!(matches!(result, Err(SessionError::BindFailed(_))));
        assert_eq!(credentials.live_contexts(), 0);
        assert_eq!(directory.unbind_count(), directory.binds().len());
    }
}
