//! Directory adapters: the ldap3-backed client and an in-memory double.

pub mod ldap;
pub mod mock;

pub use ldap::LdapDirectoryClient;
