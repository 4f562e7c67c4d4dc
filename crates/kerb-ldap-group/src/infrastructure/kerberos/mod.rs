//! Kerberos credential providers.
//!
//! The production provider drives the system Kerberos tools (`klist`,
//! `kinit`, `kvno`) against the host keytab; `mock` hands out contexts
//! without touching the system.

pub mod keytab;
pub mod mock;

pub use keytab::KeytabCredentialProvider;
