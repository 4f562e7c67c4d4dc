//! Directory host candidates and the order in which they are tried.
//!
//! Candidates come from three sources, each with its own priority regime:
//!
//! ```text
//! Static      server map entries and the domain name itself   (tried first)
//! Service(p)  SRV records, lower p preferred, higher weight first on ties
//! Plain       addresses of the domain name                    (tried last)
//! ```
//!
//! [`rank_candidates`] removes duplicates and sorts the list with a stable
//! sort, so plain candidates keep their resolution order.

use std::cmp::Ordering;

/// Port used when a candidate does not carry one.
pub const DEFAULT_LDAP_PORT: u16 = 389;

/// Where a candidate came from, which decides its precedence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidatePriority {
    /// Administrator-configured host or the bare domain name.
    Static,
    /// SRV record priority as published in DNS.
    Service(u16),
    /// Address-only resolution result.
    Plain,
}

impl CandidatePriority {
    /// Numeric form used in logs: `-2` static, `-1` plain, else the SRV value.
    pub fn as_i32(self) -> i32 {
        match self {
            Self::Static => -2,
            Self::Plain => -1,
            Self::Service(p) => i32::from(p),
        }
    }
}

/// A directory host that may be tried for one domain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostCandidate {
    pub host: String,
    /// `None` means "no preference": [`DEFAULT_LDAP_PORT`] is used.
    pub port: Option<u16>,
    pub priority: CandidatePriority,
    /// Only meaningful for [`CandidatePriority::Service`].
    pub weight: u16,
}

impl HostCandidate {
    pub fn fixed(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: None,
            priority: CandidatePriority::Static,
            weight: 0,
        }
    }

    pub fn service(host: impl Into<String>, port: u16, priority: u16, weight: u16) -> Self {
        Self {
            host: host.into(),
            port: Some(port),
            priority: CandidatePriority::Service(priority),
            weight,
        }
    }

    pub fn plain(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: None,
            priority: CandidatePriority::Plain,
            weight: 0,
        }
    }

    pub fn port_or_default(&self) -> u16 {
        self.port.unwrap_or(DEFAULT_LDAP_PORT)
    }

    /// Two candidates point at the same server when the host names match
    /// case-insensitively and the ports are equal, treating "no preference"
    /// as the default port.
    pub fn same_endpoint(&self, other: &HostCandidate) -> bool {
        if !self.host.eq_ignore_ascii_case(&other.host) {
            return false;
        }
        match (self.port, other.port) {
            (a, b) if a == b => true,
            (None, Some(p)) | (Some(p), None) => p == DEFAULT_LDAP_PORT,
            _ => false,
        }
    }
}

/// Orders two candidates: static and SRV candidates by ascending priority
/// then descending weight, plain candidates after everything else.
pub fn compare_candidates(a: &HostCandidate, b: &HostCandidate) -> Ordering {
    use CandidatePriority::Plain;

    match (a.priority, b.priority) {
        (Plain, Plain) => Ordering::Equal,
        (Plain, _) => Ordering::Greater,
        (_, Plain) => Ordering::Less,
        (pa, pb) => pa
            .as_i32()
            .cmp(&pb.as_i32())
            .then_with(|| b.weight.cmp(&a.weight)),
    }
}

/// Drops every candidate that duplicates an earlier one (see
/// [`HostCandidate::same_endpoint`]).  The earliest entry is kept.
pub fn dedup_candidates(candidates: &mut Vec<HostCandidate>) {
    let mut kept: Vec<HostCandidate> = Vec::with_capacity(candidates.len());
    for candidate in candidates.drain(..) {
        if !kept.iter().any(|k| k.same_endpoint(&candidate)) {
            kept.push(candidate);
        }
    }
    *candidates = kept;
}

/// Deduplicates and sorts `candidates` into the order they should be tried.
///
/// # Examples
///
/// ```rust
/// use kerb_ldap_core::{rank_candidates, HostCandidate};
///
/// let ranked = rank_candidates(vec![
///     HostCandidate::plain("10.0.0.1"),
///     HostCandidate::service("dc2", 389, 5, 0),
///     HostCandidate::service("dc1", 389, 3, 0),
///     HostCandidate::fixed("corp.example.com"),
/// ]);
/// let hosts: Vec<&str> = ranked.iter().map(|c| c.host.as_str()).collect();
/// assert_eq!(hosts, ["corp.example.com", "dc1", "dc2", "10.0.0.1"]);
/// ```
pub fn rank_candidates(mut candidates: Vec<HostCandidate>) -> Vec<HostCandidate> {
    dedup_candidates(&mut candidates);
    candidates.sort_by(compare_candidates);
    candidates
}

// ── Tests ─────────────────────────────────────────────────────────────────────
