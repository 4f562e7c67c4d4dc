//! Keytab-backed [`CredentialProvider`].
//!
//! # Principal selection
//!
//! ```text
//! -P given                 -> that principal, if the keytab holds it
//! realm == domain          -> first such keytab principal
//! otherwise                -> each keytab principal in turn, accepted if a
//!                             cross-realm ticket krbtgt/DOMAIN@REALM can be
//!                             obtained (trusted domain)
//! ```
//!
//! Tickets go to a fresh `FILE:` cache per request.  Its name is exported
//! as `KRB5CCNAME` for the GSSAPI layer while the [`CredentialContext`]
//! lives; dropping the context deletes the cache and clears the variable.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::application::ports::{CredentialContext, CredentialError, CredentialProvider};

/// Keytab used when `KRB5_KTNAME` is not set.
pub const DEFAULT_KEYTAB: &str = "/etc/krb5.keytab";

const CCACHE_ENV: &str = "KRB5CCNAME";
const TOOL_TIMEOUT: Duration = Duration::from_secs(10);

pub struct KeytabCredentialProvider {
    keytab: String,
    cache_dir: PathBuf,
}

impl KeytabCredentialProvider {
    pub fn new(keytab: impl Into<String>, cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            keytab: keytab.into(),
            cache_dir: cache_dir.into(),
        }
    }

    /// Keytab from `KRB5_KTNAME` (falling back to [`DEFAULT_KEYTAB`]), caches
    /// in the system temporary directory.
    pub fn from_env() -> Self {
        let keytab = std::env::var("KRB5_KTNAME").unwrap_or_else(|_| DEFAULT_KEYTAB.to_string());
        Self::new(keytab, std::env::temp_dir())
    }

    async fn keytab_principals(&self) -> Result<Vec<String>, CredentialError> {
        let listing = run_tool("klist", &["-k", &self.keytab], None)
            .await
            .map_err(|e| CredentialError::Keytab(e.to_string()))?;
        let principals = parse_keytab_listing(&listing);
        debug!("keytab {} holds {} principal(s)", self.keytab, principals.len());
        Ok(principals)
    }

    async fn kinit(&self, principal: &str, cache: &TicketCache) -> Result<(), CredentialError> {
        run_tool(
            "kinit",
            &["-k", "-t", &self.keytab, "-c", cache.name(), principal],
            Some(cache),
        )
        .await
        .map(|_| ())
    }

    /// Tries each keytab principal until one obtains `krbtgt/DOMAIN@REALM`.
    async fn trusted_principal(
        &self,
        principals: &[String],
        domain: &str,
        cache: &TicketCache,
    ) -> Option<String> {
        info!("no keytab principal for {domain}, trying trusted realms");
        for principal in principals {
            let Some(realm) = realm_of(principal) else {
                continue;
            };
            if let Err(e) = self.kinit(principal, cache).await {
                debug!("{e}");
                continue;
            }
            let service = format!("krbtgt/{domain}@{realm}");
            match run_tool("kvno", &[&service], Some(cache)).await {
                Ok(_) => {
                    info!("found trusted principal {principal}");
                    return Some(principal.clone());
                }
                Err(e) => debug!("{e}"),
            }
        }
        None
    }
}

#[async_trait]
impl CredentialProvider for KeytabCredentialProvider {
    async fn acquire(
        &self,
        domain: &str,
        principal: Option<&str>,
    ) -> Result<CredentialContext, CredentialError> {
        let principals = self.keytab_principals().await?;
        let no_principal = || CredentialError::NoPrincipal {
            domain: domain.to_string(),
        };

        let cache = TicketCache::create(&self.cache_dir);
        let chosen = match principal {
            Some(wanted) => {
                let found = principals.iter().find(|p| p.as_str() == wanted).cloned();
                if found.is_none() {
                    warn!("principal {wanted} not found in keytab {}", self.keytab);
                }
                found
            }
            None => select_principal(&principals, domain).map(str::to_string),
        };

        let principal = match chosen {
            Some(principal) => {
                self.kinit(&principal, &cache).await?;
                principal
            }
            None if principal.is_none() => self
                .trusted_principal(&principals, domain, &cache)
                .await
                .ok_or_else(no_principal)?,
            None => return Err(no_principal()),
        };

        debug!("credential cache {} for {principal}", cache.name());
        std::env::set_var(CCACHE_ENV, cache.name());
        let name = cache.name().to_string();
        Ok(CredentialContext::new(principal, name, move || drop(cache)))
    }
}

/// A per-request `FILE:` credential cache, removed on drop.
struct TicketCache {
    name: String,
    path: PathBuf,
}

impl TicketCache {
    fn create(dir: &Path) -> Self {
        let path = dir.join(format!(
            "kerb_ldap_group_{}_{}",
            std::process::id(),
            Uuid::new_v4().simple()
        ));
        Self {
            name: format!("FILE:{}", path.display()),
            path,
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for TicketCache {
    fn drop(&mut self) {
        if std::env::var(CCACHE_ENV).ok().as_deref() == Some(self.name.as_str()) {
            std::env::remove_var(CCACHE_ENV);
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!("removed credential cache {}", self.name),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("cannot remove credential cache {}: {e}", self.name),
        }
    }
}

async fn run_tool(
    tool: &'static str,
    args: &[&str],
    cache: Option<&TicketCache>,
) -> Result<String, CredentialError> {
    let mut command = Command::new(tool);
    command.args(args).kill_on_drop(true);
    if let Some(cache) = cache {
        command.env(CCACHE_ENV, cache.name());
    }

    let output = tokio::time::timeout(TOOL_TIMEOUT, command.output())
        .await
        .map_err(|_| CredentialError::Tool {
            tool,
            reason: "timed out".to_string(),
        })?
        .map_err(|e| CredentialError::Tool {
            tool,
            reason: e.to_string(),
        })?;

    if !output.status.success() {
        return Err(CredentialError::Tool {
            tool,
            reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Extracts principals from `klist -k` output (MIT or Heimdal layout).
///
/// Entries follow a `----` separator line; the principal is the first
/// field containing `@`.  Duplicates (one per key version/enctype) are
/// collapsed, keeping keytab order.
pub fn parse_keytab_listing(listing: &str) -> Vec<String> {
    let mut principals: Vec<String> = Vec::new();
    let mut in_entries = false;
    for line in listing.lines() {
        if line.trim_start().starts_with("----") {
            in_entries = true;
            continue;
        }
        if !in_entries {
            continue;
        }
        if let Some(principal) = line.split_whitespace().find(|field| field.contains('@')) {
            if !principals.iter().any(|p| p == principal) {
                principals.push(principal.to_string());
            }
        }
    }
    principals
}

/// First principal whose realm equals `domain`, ignoring case.
pub fn select_principal<'p>(principals: &'p [String], domain: &str) -> Option<&'p str> {
    principals
        .iter()
        .map(String::as_str)
        .find(|p| realm_of(p).is_some_and(|realm| realm.eq_ignore_ascii_case(domain)))
}

fn realm_of(principal: &str) -> Option<&str> {
    principal
        .rsplit_once('@')
        .map(|(_, realm)| realm)
        .filter(|realm| !realm.is_empty())
}
