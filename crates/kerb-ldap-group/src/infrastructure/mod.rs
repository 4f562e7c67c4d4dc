//! Infrastructure layer: adapters for DNS, LDAP, Kerberos, the settings file
//! and the stdin/stdout line protocol.

pub mod config;
pub mod directory;
pub mod dns;
pub mod kerberos;
pub mod stdio;
