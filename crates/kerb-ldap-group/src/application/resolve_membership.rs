//! Use case: decide whether a user belongs to a group on a bound connection.
//!
//! # How group membership is found (for beginners)
//!
//! First the server is classified.  Active Directory publishes a schema
//! partition that defines the `sAMAccountName` attribute; a POSIX (RFC 2307)
//! directory does not.
//!
//! ```text
//! AD:     (samaccountname=jdoe) -> memberOf values (group DNs)
//!           CN of a value == target?                    -> member
//!           else, per value, walk parents depth-first:
//!             (&(member=<dn>)(objectclass=group))        depth 1, 2, ...
//!             stops at the first match or max depth
//!
//! POSIX:  (memberuid=jdoe)      -> cn values (group names)
//!           name == target?                             -> member
//!           else primary group: (uid=jdoe) -> gidNumber
//!                 (&(gidNumber=N)(objectclass=posixgroup)) -> cn
//! ```
//!
//! A failed top-level search aborts the check; a failed nested search only
//! abandons that branch.  Every search is bounded by the search timeout.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use kerb_ldap_core::domain::directory::{
    group_by_gid_filter, group_name_from_value, hex_utf8, parent_groups_filter, primary_gid_filter,
    AD_SCHEMA_ATTRIBUTE, AD_SCHEMA_FILTER, GROUP_DN_ATTRIBUTE, POSIX_GROUP_NAME_ATTRIBUTE,
    PRIMARY_GID_ATTRIBUTE, SCHEMA_PROBE_ATTRIBUTE, SCHEMA_PROBE_FILTER,
};
use kerb_ldap_core::ServerKind;
use thiserror::Error;
use tracing::{debug, warn};

use crate::application::ports::{DirectoryConnection, DirectoryError, SearchScope};

#[derive(Debug, Error)]
pub enum MembershipError {
    #[error("directory type detection failed: {0}")]
    Detect(#[source] DirectoryError),

    #[error("membership search failed: {0}")]
    Search(#[source] DirectoryError),
}

type BranchFuture<'f> = Pin<Box<dyn Future<Output = bool> + Send + 'f>>;

/// Runs membership searches with a depth bound and a per-search timeout.
#[derive(Debug, Clone)]
pub struct MembershipResolver {
    max_depth: u32,
    search_timeout: Duration,
}

impl MembershipResolver {
    pub fn new(max_depth: u32, search_timeout: Duration) -> Self {
        Self {
            max_depth,
            search_timeout,
        }
    }

    /// Classifies the server behind `conn`.
    ///
    /// # Errors
    ///
    /// [`MembershipError::Detect`] if the root DSE cannot be read.  A failing
    /// second probe only means "not Active Directory".
    pub async fn detect_server_kind(
        &self,
        conn: &mut dyn DirectoryConnection,
    ) -> Result<ServerKind, MembershipError> {
        let contexts = self
            .search(conn, "", SearchScope::Base, SCHEMA_PROBE_FILTER, SCHEMA_PROBE_ATTRIBUTE)
            .await
            .map_err(MembershipError::Detect)?;

        if let [schema] = contexts.as_slice() {
            debug!("schema naming context: {schema}");
            match self
                .search(conn, schema, SearchScope::Subtree, AD_SCHEMA_FILTER, AD_SCHEMA_ATTRIBUTE)
                .await
            {
                Ok(values) if !values.is_empty() => return Ok(ServerKind::ActiveDirectory),
                Ok(_) => {}
                Err(e) => debug!("AD schema probe failed: {e}"),
            }
        }
        Ok(ServerKind::Posix)
    }

    /// Returns whether `user` is a member of `group` under `base`.
    ///
    /// # Errors
    ///
    /// [`MembershipError::Search`] if the initial membership search fails.
    pub async fn is_member(
        &self,
        conn: &mut dyn DirectoryConnection,
        base: &str,
        user: &str,
        group: &str,
        kind: ServerKind,
    ) -> Result<bool, MembershipError> {
        let filter = kind.membership_filter(user);
        debug!("searching {base} with {filter} for {}", kind.membership_attribute());
        let values = self
            .search(conn, base, SearchScope::Subtree, &filter, kind.membership_attribute())
            .await
            .map_err(MembershipError::Search)?;

        if values.iter().any(|value| group_matches(value, group)) {
            return Ok(true);
        }

        match kind {
            ServerKind::ActiveDirectory => {
                for value in values {
                    if self.search_parents(conn, base, value, group, 1).await {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            ServerKind::Posix => Ok(self.primary_group_matches(conn, base, user, group).await),
        }
    }

    /// Depth-first walk from `group_dn` to the groups containing it.
    fn search_parents<'f>(
        &'f self,
        conn: &'f mut dyn DirectoryConnection,
        base: &'f str,
        group_dn: String,
        target: &'f str,
        depth: u32,
    ) -> BranchFuture<'f> {
        Box::pin(async move {
            if depth > self.max_depth {
                debug!("max depth {} reached below {group_dn}", self.max_depth);
                return false;
            }

            let filter = parent_groups_filter(&group_dn);
            let parents = match self
                .search(conn, base, SearchScope::Subtree, &filter, GROUP_DN_ATTRIBUTE)
                .await
            {
                Ok(parents) => parents,
                Err(e) => {
                    warn!("nested group search at depth {depth} failed: {e}");
                    return false;
                }
            };

            for parent in parents {
                if group_matches(&parent, target) {
                    debug!("found {target} at depth {depth}");
                    return true;
                }
                if self
                    .search_parents(&mut *conn, base, parent, target, depth + 1)
                    .await
                {
                    return true;
                }
            }
            false
        })
    }

    async fn primary_group_matches(
        &self,
        conn: &mut dyn DirectoryConnection,
        base: &str,
        user: &str,
        group: &str,
    ) -> bool {
        let gids = match self
            .search(conn, base, SearchScope::Subtree, &primary_gid_filter(user), PRIMARY_GID_ATTRIBUTE)
            .await
        {
            Ok(gids) => gids,
            Err(e) => {
                warn!("primary group lookup failed: {e}");
                return false;
            }
        };
        let [gid] = gids.as_slice() else {
            debug!("expected one {PRIMARY_GID_ATTRIBUTE} for {user}, got {}", gids.len());
            return false;
        };

        let names = match self
            .search(
                conn,
                base,
                SearchScope::Subtree,
                &group_by_gid_filter(gid),
                POSIX_GROUP_NAME_ATTRIBUTE,
            )
            .await
        {
            Ok(names) => names,
            Err(e) => {
                warn!("group lookup for gid {gid} failed: {e}");
                return false;
            }
        };
        match names.as_slice() {
            [name] => group_matches(name, group),
            _ => {
                debug!("expected one group for gid {gid}, got {}", names.len());
                false
            }
        }
    }

    async fn search(
        &self,
        conn: &mut dyn DirectoryConnection,
        base: &str,
        scope: SearchScope,
        filter: &str,
        attribute: &str,
    ) -> Result<Vec<String>, DirectoryError> {
        match tokio::time::timeout(self.search_timeout, conn.search(base, scope, filter, attribute)).await {
            Ok(result) => result,
            Err(_) => Err(DirectoryError::Timeout {
                filter: filter.to_string(),
            }),
        }
    }
}

fn group_matches(value: &str, target: &str) -> bool {
    let name = group_name_from_value(value);
    debug!(
        "comparing {name} (hex UTF-8 {}) with {target}",
        hex_utf8(name)
    );
    name.eq_ignore_ascii_case(target)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::directory::mock::InMemoryDirectory;

    const BASE: &str = "dc=corp,dc=example,dc=com";

    fn resolver(max_depth: u32) -> MembershipResolver {
        MembershipResolver::new(max_depth, Duration::from_secs(5))
    }

    /// jdoe ∈ A, A ∈ B, B ∈ C.
    fn nested_ad() -> InMemoryDirectory {
        InMemoryDirectory::active_directory()
            .with_user_groups("jdoe", &["CN=A,OU=Groups,DC=corp"])
            .with_parent_groups("CN=A,OU=Groups,DC=corp", &["CN=B,OU=Groups,DC=corp"])
            .with_parent_groups("CN=B,OU=Groups,DC=corp", &["CN=C,OU=Groups,DC=corp"])
    }

    #[tokio::test]
    async fn test_detects_active_directory() {
        // Arrange
        let mut conn = InMemoryDirectory::active_directory().connection();

        // Act
        let kind = resolver(5).detect_server_kind(&mut conn).await.unwrap();

        // Assert
        assert_eq!(kind, ServerKind::ActiveDirectory);
    }

    #[tokio::test]
    async fn test_detects_posix_without_schema_context() {
        let mut conn = InMemoryDirectory::posix().connection();

        let kind = resolver(5).detect_server_kind(&mut conn).await.unwrap();

        assert_eq!(kind, ServerKind::Posix);
    }

    #[tokio::test]
    async fn test_detection_fails_when_root_dse_search_fails() {
        let mut conn = InMemoryDirectory::active_directory()
            .failing_filter(SCHEMA_PROBE_FILTER)
            .connection();

        let result = resolver(5).detect_server_kind(&mut conn).await;

        assert!(matches!(result, Err(MembershipError::Detect(_))));
    }

    #[tokio::test]
    async fn test_direct_ad_membership_uses_cn() {
        let mut conn = nested_ad().connection();

        let member = resolver(5)
            .is_member(&mut conn, BASE, "jdoe", "a", ServerKind::ActiveDirectory)
            .await
            .unwrap();

        assert!(member);
    }

    #[tokio::test]
    async fn test_nested_ad_membership_found_at_depth_two() {
        // Arrange
        let mut conn = nested_ad().connection();

        // Act
        let member = resolver(5)
            .is_member(&mut conn, BASE, "jdoe", "C", ServerKind::ActiveDirectory)
            .await
            .unwrap();

        // Assert
        assert!(member);
    }

    #[tokio::test]
    async fn test_nested_ad_membership_beyond_max_depth_is_no_match() {
        let mut conn = nested_ad().connection();

        let depth_one = resolver(1);
        assert!(depth_one
            .is_member(&mut conn, BASE, "jdoe", "B", ServerKind::ActiveDirectory)
            .await
            .unwrap());
        assert!(!depth_one
            .is_member(&mut conn, BASE, "jdoe", "C", ServerKind::ActiveDirectory)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_failed_branch_does_not_stop_sibling_branches() {
        // Arrange – the walk above X fails, the walk above Y finds the target
        let directory = InMemoryDirectory::active_directory()
            .with_user_groups("jdoe", &["CN=X,DC=corp", "CN=Y,DC=corp"])
            .with_parent_groups("CN=Y,DC=corp", &["CN=Target,DC=corp"])
            .failing_filter(&parent_groups_filter("CN=X,DC=corp"));
        let mut conn = directory.connection();

        // Act
        let member = resolver(5)
            .is_member(&mut conn, BASE, "jdoe", "target", ServerKind::ActiveDirectory)
            .await
            .unwrap();

        // Assert
        assert!(member);
    }

    #[tokio::test]
    async fn test_cyclic_groups_terminate_at_max_depth() {
        let directory = InMemoryDirectory::active_directory()
            .with_user_groups("jdoe", &["CN=P,DC=corp"])
            .with_parent_groups("CN=P,DC=corp", &["CN=Q,DC=corp"])
            .with_parent_groups("CN=Q,DC=corp", &["CN=P,DC=corp"]);
        let mut conn = directory.connection();

        let member = resolver(5)
            .is_member(&mut conn, BASE, "jdoe", "elsewhere", ServerKind::ActiveDirectory)
            .await
            .unwrap();

        assert!(!member);
    }

    #[tokio::test]
    async fn test_ad_user_without_groups_is_not_member() {
        let mut conn = InMemoryDirectory::active_directory().connection();

        let member = resolver(5)
            .is_member(&mut conn, BASE, "ghost", "admins", ServerKind::ActiveDirectory)
            .await
            .unwrap();

        assert!(!member);
    }

    #[tokio::test]
    async fn test_top_level_search_failure_is_an_error() {
        let mut conn = nested_ad()
            .failing_filter("(samaccountname=jdoe)")
            .connection();

        let result = resolver(5)
            .is_member(&mut conn, BASE, "jdoe", "A", ServerKind::ActiveDirectory)
            .await;

        assert!(matches!(result, Err(MembershipError::Search(_))));
    }

    #[tokio::test]
    async fn test_posix_flat_membership() {
        let mut conn = InMemoryDirectory::posix()
            .with_user_groups("jdoe", &["developers", "staff"])
            .connection();

        let member = resolver(5)
            .is_member(&mut conn, BASE, "jdoe", "Staff", ServerKind::Posix)
            .await
            .unwrap();

        assert!(member);
    }

    #[tokio::test]
    async fn test_posix_primary_group_fallback() {
        // Arrange
        let mut conn = InMemoryDirectory::posix()
            .with_user_groups("jdoe", &["developers"])
            .with_primary_group("jdoe", "100", "users")
            .connection();

        // Act
        let member = resolver(5)
            .is_member(&mut conn, BASE, "jdoe", "users", ServerKind::Posix)
            .await
            .unwrap();

        // Assert
        assert!(member);
        assert!(!resolver(5)
            .is_member(&mut conn, BASE, "jdoe", "wheel", ServerKind::Posix)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_user_input_is_escaped_in_filters() {
        // Arrange
        let directory = InMemoryDirectory::posix();
        let mut conn = directory.connection();

        // Act
        let member = resolver(5)
            .is_member(&mut conn, BASE, "*)(uid=*", "users", ServerKind::Posix)
            .await
            .unwrap();

        // Assert
        assert!(!member);
        assert_eq!(
            directory.searched_filters()[0],
            "(memberuid=\\2a\\29\\28uid=\\2a)"
        );
    }
}
