//! Use case: turn one request line into a verdict.

use kerb_ldap_core::DomainResolver;
use tracing::{debug, info};

use crate::application::authorize::{AuthorizeUseCase, MembershipCheck};

/// Outcome of one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Allow,
    Deny,
    /// The shutdown sentinel was received; nothing is written back.
    Shutdown,
}

impl Verdict {
    /// The response line for this verdict, without the newline.
    pub fn response_line(self) -> Option<&'static str> {
        match self {
            Self::Allow => Some("OK"),
            Self::Deny => Some("ERR"),
            Self::Shutdown => None,
        }
    }
}

pub struct HandleRequestUseCase<'a, M> {
    resolver: DomainResolver<'a>,
    authorize: AuthorizeUseCase<'a, M>,
}

impl<'a, M: MembershipCheck> HandleRequestUseCase<'a, M> {
    pub fn new(resolver: DomainResolver<'a>, authorize: AuthorizeUseCase<'a, M>) -> Self {
        Self { resolver, authorize }
    }

    /// Handles one request line; `line` carries no line terminator.
    pub async fn handle(&self, line: &str) -> Verdict {
        let principal = self.resolver.resolve(line);
        if principal.is_shutdown_sentinel() {
            info!("shutdown requested");
            return Verdict::Shutdown;
        }

        debug!(
            "got user {} domain {}",
            principal.user,
            principal.domain.as_deref().unwrap_or("<none>")
        );
        if self.authorize.authorize(&principal).await {
            Verdict::Allow
        } else {
            Verdict::Deny
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
