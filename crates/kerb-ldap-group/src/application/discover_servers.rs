//! Use case: find the LDAP servers that serve a Kerberos domain.
//!
//! ```text
//! server map has entries for the domain?  -> those hosts, nothing else
//! otherwise:
//!   SRV _ldaps._tcp.<domain> (TLS only) / _ldap._tcp.<domain>
//!   + addresses of <domain>
//!   + <domain> itself
//!   -> deduplicated and ranked
//! ```
//!
//! Every DNS failure is logged and tolerated; the domain name itself is
//! always a candidate once DNS has been consulted.

use kerb_ldap_core::protocol::dns::{decode_srv_response, service_name};
use kerb_ldap_core::{rank_candidates, HostCandidate, ServerRule};
use tracing::{debug, info, warn};

use crate::application::ports::NameService;

pub struct DiscoverServersUseCase<'a> {
    servers: &'a [ServerRule],
    names: &'a dyn NameService,
}

impl<'a> DiscoverServersUseCase<'a> {
    pub fn new(servers: &'a [ServerRule], names: &'a dyn NameService) -> Self {
        Self { servers, names }
    }

    /// Returns the candidates for `domain` in the order they should be tried.
    pub async fn discover(&self, domain: &str, want_tls: bool) -> Vec<HostCandidate> {
        let configured: Vec<HostCandidate> = self
            .servers
            .iter()
            .filter(|rule| rule.applies_to(domain))
            .map(|rule| HostCandidate::fixed(rule.server.clone()))
            .collect();
        if !configured.is_empty() {
            debug!("using {} configured server(s) for {domain}", configured.len());
            return configured;
        }

        let mut candidates = self.service_candidates(domain, want_tls).await;
        candidates.extend(self.address_candidates(domain).await);
        candidates.push(HostCandidate::fixed(domain));

        let ranked = rank_candidates(candidates);
        for candidate in &ranked {
            debug!(
                host = %candidate.host,
                port = candidate.port_or_default(),
                priority = candidate.priority.as_i32(),
                weight = candidate.weight,
                "candidate for {domain}"
            );
        }
        ranked
    }

    /// Resolves `host` to plain (lowest precedence) candidates.  Resolution
    /// failures yield an empty list.
    pub async fn address_candidates(&self, host: &str) -> Vec<HostCandidate> {
        match self.names.resolve_host(host).await {
            Ok(addresses) => addresses.into_iter().map(HostCandidate::plain).collect(),
            Err(e) => {
                info!("address lookup failed: {e}");
                Vec::new()
            }
        }
    }

    async fn service_candidates(&self, domain: &str, want_tls: bool) -> Vec<HostCandidate> {
        let mut names = vec![service_name(domain, want_tls)];
        if want_tls {
            names.push(service_name(domain, false));
        }

        for name in names {
            let response = match self.names.query_srv(&name).await {
                Ok(response) => response,
                Err(e) => {
                    info!("SRV lookup failed: {e}");
                    continue;
                }
            };
            return match decode_srv_response(&response) {
                Ok(records) => {
                    debug!("{} SRV record(s) for {name}", records.len());
                    records
                        .into_iter()
                        .map(|r| HostCandidate::service(r.target, r.port, r.priority, r.weight))
                        .collect()
                }
                Err(e) => {
                    warn!("discarding SRV response for {name}: {e}");
                    Vec::new()
                }
            };
        }
        Vec::new()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
