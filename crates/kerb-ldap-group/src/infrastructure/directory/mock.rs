//! In-memory directory for tests.
//!
//! Answers searches from a table keyed by the exact filter string, built
//! with the same filter helpers the resolver uses, and records opens, binds,
//! searches and unbinds for assertions.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use kerb_ldap_core::domain::directory::{
    group_by_gid_filter, parent_groups_filter, primary_gid_filter, AD_SCHEMA_FILTER,
    SCHEMA_PROBE_FILTER,
};
use kerb_ldap_core::ServerKind;

use crate::application::ports::{
    BindDirective, BindMode, DirectoryClient, DirectoryConnection, DirectoryError, SearchScope,
};

/// One call to [`DirectoryClient::open`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenRecord {
    pub host: String,
    pub port: u16,
    pub use_tls: bool,
}

#[derive(Default)]
struct DirectoryData {
    kind: Option<ServerKind>,
    results: HashMap<String, Vec<String>>,
    failing_filters: HashSet<String>,
    unreachable_hosts: HashSet<String>,
    rejected_modes: HashSet<BindMode>,
    opened: Vec<OpenRecord>,
    binds: Vec<BindDirective>,
    searches: Vec<String>,
    unbinds: usize,
}

/// Shared, cloneable fake directory.  Every connection it hands out sees the
/// same data and writes to the same call log.
#[derive(Clone, Default)]
pub struct InMemoryDirectory {
    data: Arc<Mutex<DirectoryData>>,
}

impl InMemoryDirectory {
    /// A directory that answers the Active Directory schema probes.
    pub fn active_directory() -> Self {
        let directory = Self::default();
        {
            let mut data = directory.lock();
            data.kind = Some(ServerKind::ActiveDirectory);
            data.results.insert(
                SCHEMA_PROBE_FILTER.to_string(),
                vec!["CN=Schema,CN=Configuration,DC=corp,DC=example,DC=com".to_string()],
            );
            data.results
                .insert(AD_SCHEMA_FILTER.to_string(), vec!["sAMAccountName".to_string()]);
        }
        directory
    }

    /// A directory without a schema naming context.
    pub fn posix() -> Self {
        let directory = Self::default();
        directory.lock().kind = Some(ServerKind::Posix);
        directory
    }

    /// Direct memberships: DNs for AD, group names for POSIX.
    pub fn with_user_groups(self, user: &str, groups: &[&str]) -> Self {
        let kind = self.lock().kind.unwrap_or(ServerKind::Posix);
        self.with_result(&kind.membership_filter(user), groups)
    }

    /// Groups that contain `group_dn` (AD nesting).
    pub fn with_parent_groups(self, group_dn: &str, parents: &[&str]) -> Self {
        self.with_result(&parent_groups_filter(group_dn), parents)
    }

    /// POSIX primary group of `user`.
    pub fn with_primary_group(self, user: &str, gid: &str, group: &str) -> Self {
        self.with_result(&primary_gid_filter(user), &[gid])
            .with_result(&group_by_gid_filter(gid), &[group])
    }

    pub fn with_result(self, filter: &str, values: &[&str]) -> Self {
        self.lock().results.insert(
            filter.to_string(),
            values.iter().map(|v| v.to_string()).collect(),
        );
        self
    }

    /// Searches with exactly this filter fail.
    pub fn failing_filter(self, filter: &str) -> Self {
        self.lock().failing_filters.insert(filter.to_string());
        self
    }

    /// Connections to `host` are refused.
    pub fn unreachable(self, host: &str) -> Self {
        self.lock().unreachable_hosts.insert(host.to_string());
        self
    }

    /// Binds of this kind are rejected.
    pub fn rejecting(self, mode: BindMode) -> Self {
        self.lock().rejected_modes.insert(mode);
        self
    }

    /// A connection that skips `open`, for resolver tests.
    pub fn connection(&self) -> InMemoryConnection {
        InMemoryConnection {
            data: Arc::clone(&self.data),
        }
    }

    pub fn opened(&self) -> Vec<OpenRecord> {
        self.lock().opened.clone()
    }

    pub fn binds(&self) -> Vec<BindDirective> {
        self.lock().binds.clone()
    }

    pub fn searched_filters(&self) -> Vec<String> {
        self.lock().searches.clone()
    }

    pub fn unbind_count(&self) -> usize {
        self.lock().unbinds
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, DirectoryData> {
        self.data.lock().expect("lock poisoned")
    }
}

#[async_trait]
impl DirectoryClient for InMemoryDirectory {
    async fn open(
        &self,
        host: &str,
        port: u16,
        use_tls: bool,
    ) -> Result<Box<dyn DirectoryConnection>, DirectoryError> {
        let mut data = self.lock();
        data.opened.push(OpenRecord {
            host: host.to_string(),
            port,
            use_tls,
        });
        if data.unreachable_hosts.contains(host) {
            return Err(DirectoryError::Connect {
                url: format!("ldap://{host}:{port}"),
                reason: "connection refused".to_string(),
            });
        }
        drop(data);
        Ok(Box::new(self.connection()))
    }
}

/// A connection handed out by [`InMemoryDirectory`].
pub struct InMemoryConnection {
    data: Arc<Mutex<DirectoryData>>,
}

#[async_trait]
impl DirectoryConnection for InMemoryConnection {
    async fn bind(&mut self, directive: &BindDirective) -> Result<(), DirectoryError> {
        let mut data = self.data.lock().expect("lock poisoned");
        data.binds.push(directive.clone());
        if data.rejected_modes.contains(&directive.mode()) {
            return Err(DirectoryError::Bind {
                mode: directive.mode(),
                reason: "invalid credentials".to_string(),
            });
        }
        Ok(())
    }

    async fn search(
        &mut self,
        base: &str,
        _scope: SearchScope,
        filter: &str,
        _attribute: &str,
    ) -> Result<Vec<String>, DirectoryError> {
        let mut data = self.data.lock().expect("lock poisoned");
        data.searches.push(filter.to_string());
        if data.failing_filters.contains(filter) {
            return Err(DirectoryError::Search {
                base: base.to_string(),
                filter: filter.to_string(),
                reason: "operations error".to_string(),
            });
        }
        Ok(data.results.get(filter).cloned().unwrap_or_default())
    }

    async fn unbind(&mut self) {
        self.data.lock().expect("lock poisoned").unbinds += 1;
    }
}
