//! Application layer: the use cases behind one authorization decision.
//!
//! Use cases depend only on the traits in [`ports`]; concrete DNS, LDAP and
//! Kerberos adapters are injected from `infrastructure`.

pub mod authorize;
pub mod discover_servers;
pub mod handle_request;
pub mod ports;
pub mod resolve_membership;
pub mod select_strategy;
pub mod settings;
