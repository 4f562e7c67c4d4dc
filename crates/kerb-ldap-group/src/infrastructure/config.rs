//! Optional TOML settings file.
//!
//! Every key mirrors a command-line option; values given on the command line
//! win over the file, and the file wins over built-in defaults.  All
//! sections and keys are optional:
//!
//! ```toml
//! [policy]
//! groups = "Staff@CORP.EXAMPLE.COM:Web@"
//! group_encoding = "plain"          # or "hex-groups", "hex-all"
//! default_domain = "CORP.EXAMPLE.COM"
//! netbios = "CORP@CORP.EXAMPLE.COM"
//! servers = "dc1.corp.example.com@CORP.EXAMPLE.COM"
//!
//! [kerberos]
//! principal = "HTTP/proxy.corp.example.com@CORP.EXAMPLE.COM"
//!
//! [ldap]
//! url = "ldaps://ldap.example.com"
//! user = "cn=proxy,dc=example,dc=com"
//! password = "secret"
//! bind_path = "dc=example,dc=com"
//! use_tls = true
//! allow_invalid_certs = false
//! max_depth = 5
//!
//! [timeouts]
//! connect_secs = 2
//! search_secs = 30
//! dns_secs = 5
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use kerb_ldap_core::GroupListEncoding;
use serde::Deserialize;
use thiserror::Error;

use crate::application::settings::DEFAULT_MAX_DEPTH;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error reading config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Contents of the settings file.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub policy: PolicyConfig,
    pub kerberos: KerberosConfig,
    pub ldap: LdapConfig,
    pub timeouts: TimeoutConfig,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct PolicyConfig {
    pub groups: Option<String>,
    pub group_encoding: GroupEncoding,
    pub default_domain: Option<String>,
    pub netbios: Option<String>,
    pub servers: Option<String>,
}

/// How the `groups` list is written.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum GroupEncoding {
    #[default]
    Plain,
    HexGroups,
    HexAll,
}

impl From<GroupEncoding> for GroupListEncoding {
    fn from(encoding: GroupEncoding) -> Self {
        match encoding {
            GroupEncoding::Plain => GroupListEncoding::Plain,
            GroupEncoding::HexGroups => GroupListEncoding::HexGroupNames,
            GroupEncoding::HexAll => GroupListEncoding::HexAll,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct KerberosConfig {
    /// Keytab principal to use instead of the realm-matched one.
    pub principal: Option<String>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct LdapConfig {
    pub url: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub bind_path: Option<String>,
    pub use_tls: bool,
    pub allow_invalid_certs: bool,
    #[serde(default = "default_max_depth")]
    pub max_depth: u32,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct TimeoutConfig {
    #[serde(default = "default_connect_secs")]
    pub connect_secs: u64,
    #[serde(default = "default_search_secs")]
    pub search_secs: u64,
    #[serde(default = "default_dns_secs")]
    pub dns_secs: u64,
}

impl TimeoutConfig {
    pub fn connect(&self) -> Duration {
        Duration::from_secs(self.connect_secs)
    }

    pub fn search(&self) -> Duration {
        Duration::from_secs(self.search_secs)
    }

    pub fn dns(&self) -> Duration {
        Duration::from_secs(self.dns_secs)
    }
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_max_depth() -> u32 {
    DEFAULT_MAX_DEPTH
}
fn default_connect_secs() -> u64 {
    2
}
fn default_search_secs() -> u64 {
    30
}
fn default_dns_secs() -> u64 {
    5
}

impl Default for LdapConfig {
    fn default() -> Self {
        Self {
            url: None,
            user: None,
            password: None,
            bind_path: None,
            use_tls: false,
            allow_invalid_certs: false,
            max_depth: default_max_depth(),
        }
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: default_connect_secs(),
            search_secs: default_search_secs(),
            dns_secs: default_dns_secs(),
        }
    }
}

/// Loads the settings file at `path`.
///
/// # Errors
///
/// [`ConfigError::Io`] if the file cannot be read (a named file that does
/// not exist is an error), [`ConfigError::Parse`] for malformed TOML or
/// unknown keys.
pub fn load_config(path: &Path) -> Result<FileConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(toml::from_str(&content)?)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
