//! Use case: decide whether a principal passes the configured group policy.
//!
//! Group rules are consulted in three tiers, each stopping at its first
//! successful membership check:
//!
//! ```text
//! 1. group@DOMAIN   rules whose domain equals the principal's domain
//! 2. group@         rules that apply to whatever domain was resolved
//! 3. group          rules without a domain, for every principal
//! ```
//!
//! Tiers 1 and 2 are skipped when the principal has no domain.  The
//! principal is authorized as soon as any tier succeeds.

use async_trait::async_trait;
use kerb_ldap_core::{GroupRule, Principal, RuleScope, ServerRule};
use tracing::{debug, info, warn};

use crate::application::ports::{CredentialProvider, DirectoryClient, NameService};
use crate::application::resolve_membership::MembershipResolver;
use crate::application::select_strategy::SelectStrategyUseCase;
use crate::application::settings::HelperSettings;

/// A single "is this principal in that group" question.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MembershipCheck: Send + Sync {
    /// Any failure along the way counts as "not a member".
    async fn is_member(&self, principal: &Principal, group: &str) -> bool;
}

pub struct AuthorizeUseCase<'a, M> {
    rules: &'a [GroupRule],
    membership: M,
}

impl<'a, M: MembershipCheck> AuthorizeUseCase<'a, M> {
    pub fn new(rules: &'a [GroupRule], membership: M) -> Self {
        Self { rules, membership }
    }

    pub async fn authorize(&self, principal: &Principal) -> bool {
        if let Some(domain) = principal.domain.as_deref() {
            let domain_rules = self.rules.iter().filter(|rule| {
                matches!(rule.scope(), RuleScope::Domain(d) if d.eq_ignore_ascii_case(domain))
            });
            if self.any_member(principal, domain_rules, "domain").await {
                return true;
            }

            let default_rules = self
                .rules
                .iter()
                .filter(|rule| rule.scope() == RuleScope::DefaultDomain);
            if self.any_member(principal, default_rules, "default domain").await {
                return true;
            }
        }

        let global_rules = self
            .rules
            .iter()
            .filter(|rule| rule.scope() == RuleScope::Global);
        self.any_member(principal, global_rules, "global").await
    }

    async fn any_member<'r>(
        &self,
        principal: &Principal,
        rules: impl Iterator<Item = &'r GroupRule>,
        tier: &str,
    ) -> bool {
        for rule in rules {
            debug!("checking {tier} group {} for {}", rule.group, principal.user);
            if self.membership.is_member(principal, &rule.group).await {
                info!("user {} is member of {tier} group {}", principal.user, rule.group);
                return true;
            }
        }
        false
    }
}

/// [`MembershipCheck`] against a live directory: one bound session per
/// question, closed before the answer is returned.
pub struct DirectoryMembership<'a> {
    settings: &'a HelperSettings,
    servers: &'a [ServerRule],
    names: &'a dyn NameService,
    directory: &'a dyn DirectoryClient,
    credentials: &'a dyn CredentialProvider,
    resolver: MembershipResolver,
}

impl<'a> DirectoryMembership<'a> {
    pub fn new(
        settings: &'a HelperSettings,
        servers: &'a [ServerRule],
        names: &'a dyn NameService,
        directory: &'a dyn DirectoryClient,
        credentials: &'a dyn CredentialProvider,
    ) -> Self {
        Self {
            settings,
            servers,
            names,
            directory,
            credentials,
            resolver: MembershipResolver::new(settings.max_depth, settings.search_timeout),
        }
    }
}

#[async_trait]
impl MembershipCheck for DirectoryMembership<'_> {
    async fn is_member(&self, principal: &Principal, group: &str) -> bool {
        let selector = SelectStrategyUseCase::new(
            self.settings,
            self.servers,
            self.names,
            self.directory,
            self.credentials,
        );
        let mut session = match selector.establish(principal.domain.as_deref()).await {
            Ok(session) => session,
            Err(e) => {
                warn!("{e}");
                return false;
            }
        };

        let base = session.bind_base().to_string();
        let outcome = match self.resolver.detect_server_kind(session.connection()).await {
            Ok(kind) => {
                debug!("{} is {}", session.host(), kind.label());
                self.resolver
                    .is_member(session.connection(), &base, &principal.user, group, kind)
                    .await
            }
            Err(e) => Err(e),
        };
        session.close().await;

        match outcome {
            Ok(found) => found,
            Err(e) => {
                warn!("{e}");
                false
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
