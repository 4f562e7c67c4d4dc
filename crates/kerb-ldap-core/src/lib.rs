//! # kerb-ldap-core
//!
//! Pure building blocks for the `kerb-ldap-group` authorization helper: the
//! rule tables parsed from configuration, principal resolution, directory
//! host candidates and their ranking, LDAP filter construction, and the DNS
//! service-location (SRV) wire codec.
//!
//! This crate performs no I/O.  Sockets, LDAP sessions and Kerberos tickets
//! live in the `kerb-ldap-group` crate, which drives these types.
//!
//! # Architecture overview (for beginners)
//!
//! A proxy such as Squid asks the helper one question per line: "is
//! `jdoe@CORP.EXAMPLE.COM` a member of one of my configured groups?".  To
//! answer, the helper has to:
//!
//! - **`domain::principal`** – split the raw principal into a user and a
//!   Kerberos domain (netbios prefixes and a default domain are supported).
//!
//! - **`protocol::dns`** – find the LDAP servers of that domain by asking DNS
//!   for `_ldap._tcp.<domain>` SRV records and parsing the raw answer.
//!
//! - **`domain::candidate`** – merge static servers, SRV answers and plain
//!   address lookups into one deduplicated, ranked list.
//!
//! - **`domain::directory`** – build the escaped search filters used to walk
//!   group membership on Active Directory or POSIX-style servers.
//!
//! - **`domain::rules`** – the group, netbios and server tables the decision
//!   is made against.

pub mod domain;
pub mod protocol;

pub use domain::candidate::{rank_candidates, CandidatePriority, HostCandidate, DEFAULT_LDAP_PORT};
pub use domain::directory::{bind_path_from_domain, escape_filter_value, ServerKind};
pub use domain::principal::{DomainResolver, Principal};
pub use domain::rules::{
    parse_group_list, GroupListEncoding, GroupRule, NetbiosRule, RuleError, RuleScope, RuleTables,
    ServerRule,
};
pub use protocol::dns::{decode_srv_response, encode_srv_query, DnsError, SrvRecord};
