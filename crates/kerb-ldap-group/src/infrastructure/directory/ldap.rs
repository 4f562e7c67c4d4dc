//! [`DirectoryClient`] backed by the `ldap3` crate.
//!
//! With TLS requested, a plain `ldap://` connection is upgraded with StartTLS
//! first; if that fails the client retries with `ldaps://` on the same port.
//! Certificate verification follows the system trust store (`SSL_CERT_FILE`
//! is honoured) unless invalid certificates are explicitly allowed.

use std::time::Duration;

use async_trait::async_trait;
use ldap3::{Ldap, LdapConnAsync, LdapConnSettings, Scope, SearchEntry};
use tracing::{debug, warn};

use crate::application::ports::{
    BindCredentials, BindDirective, DirectoryClient, DirectoryConnection, DirectoryError,
    SearchScope,
};

/// Connect timeout used when none is configured.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
pub struct LdapDirectoryClient {
    connect_timeout: Duration,
    allow_invalid_certs: bool,
}

impl LdapDirectoryClient {
    pub fn new(connect_timeout: Duration, allow_invalid_certs: bool) -> Self {
        Self {
            connect_timeout,
            allow_invalid_certs,
        }
    }

    async fn connect(&self, url: &str, starttls: bool) -> Result<Ldap, DirectoryError> {
        let settings = LdapConnSettings::new()
            .set_conn_timeout(self.connect_timeout)
            .set_starttls(starttls)
            .set_no_tls_verify(self.allow_invalid_certs);

        let (conn, ldap) = LdapConnAsync::with_settings(settings, url)
            .await
            .map_err(|e| DirectoryError::Connect {
                url: url.to_string(),
                reason: e.to_string(),
            })?;

        tokio::spawn(async move {
            if let Err(e) = conn.drive().await {
                debug!("LDAP connection driver ended: {e}");
            }
        });
        Ok(ldap)
    }
}

impl Default for LdapDirectoryClient {
    fn default() -> Self {
        Self::new(DEFAULT_CONNECT_TIMEOUT, false)
    }
}

#[async_trait]
impl DirectoryClient for LdapDirectoryClient {
    async fn open(
        &self,
        host: &str,
        port: u16,
        use_tls: bool,
    ) -> Result<Box<dyn DirectoryConnection>, DirectoryError> {
        let host = if host.contains(':') {
            format!("[{host}]")
        } else {
            host.to_string()
        };
        let plain_url = format!("ldap://{host}:{port}");
        debug!("connecting to {plain_url} (tls: {use_tls})");

        let ldap = match self.connect(&plain_url, use_tls).await {
            Ok(ldap) => ldap,
            Err(e) if use_tls => {
                warn!("StartTLS on {plain_url} failed ({e}), retrying with ldaps");
                self.connect(&format!("ldaps://{host}:{port}"), false).await?
            }
            Err(e) => return Err(e),
        };

        Ok(Box::new(LdapConnection { ldap, url: plain_url }))
    }
}

/// A live ldap3 session.
pub struct LdapConnection {
    ldap: Ldap,
    url: String,
}

#[async_trait]
impl DirectoryConnection for LdapConnection {
    async fn bind(&mut self, directive: &BindDirective) -> Result<(), DirectoryError> {
        let mode = directive.mode();
        match &directive.credentials {
            BindCredentials::Password { user, password } => {
                self.ldap
                    .simple_bind(user, password)
                    .await
                    .and_then(|result| result.success())
                    .map_err(|e| DirectoryError::Bind {
                        mode,
                        reason: e.to_string(),
                    })?;
            }
            BindCredentials::Gssapi { server } => sasl_bind(&mut self.ldap, server).await?,
        }
        debug!("{mode} bind to {} succeeded", self.url);
        Ok(())
    }

    async fn search(
        &mut self,
        base: &str,
        scope: SearchScope,
        filter: &str,
        attribute: &str,
    ) -> Result<Vec<String>, DirectoryError> {
        let scope = match scope {
            SearchScope::Base => Scope::Base,
            SearchScope::Subtree => Scope::Subtree,
        };
        let search_error = |reason: String| DirectoryError::Search {
            base: base.to_string(),
            filter: filter.to_string(),
            reason,
        };

        let (entries, _) = self
            .ldap
            .search(base, scope, filter, vec![attribute])
            .await
            .and_then(|result| result.success())
            .map_err(|e| search_error(e.to_string()))?;

        let mut values = Vec::new();
        for entry in entries.into_iter().map(SearchEntry::construct) {
            values.extend(attribute_values(&entry, attribute));
        }
        Ok(values)
    }

    async fn unbind(&mut self) {
        if let Err(e) = self.ldap.unbind().await {
            debug!("unbind from {} failed: {e}", self.url);
        }
    }
}

/// Values of `attribute` in `entry`, matched case-insensitively.  Binary
/// values are decoded lossily.
fn attribute_values(entry: &SearchEntry, attribute: &str) -> Vec<String> {
    let text = entry
        .attrs
        .iter()
        .filter(|(name, _)| name.eq_ignore_ascii_case(attribute))
        .flat_map(|(_, values)| values.iter().cloned());
    let binary = entry
        .bin_attrs
        .iter()
        .filter(|(name, _)| name.eq_ignore_ascii_case(attribute))
        .flat_map(|(_, values)| values.iter().map(|v| String::from_utf8_lossy(v).into_owned()));
    text.chain(binary).collect()
}

#[cfg(feature = "gssapi")]
async fn sasl_bind(ldap: &mut Ldap, server: &str) -> Result<(), DirectoryError> {
    ldap.sasl_gssapi_bind(server)
        .await
        .and_then(|result| result.success())
        .map(|_| ())
        .map_err(|e| DirectoryError::Bind {
            mode: crate::application::ports::BindMode::Kerberos,
            reason: e.to_string(),
        })
}

#[cfg(not(feature = "gssapi"))]
async fn sasl_bind(_ldap: &mut Ldap, server: &str) -> Result<(), DirectoryError> {
    debug!("cannot bind to {server}: built without gssapi");
    Err(DirectoryError::Unsupported("SASL/GSSAPI"))
}
