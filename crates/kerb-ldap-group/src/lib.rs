//! # kerb-ldap-group
//!
//! Library half of the `kerb-ldap-group` helper.  The binary in `main.rs`
//! only parses options and runs the request loop; everything it drives lives
//! here so integration tests can assemble the same pipeline with in-memory
//! collaborators.
//!
//! ```text
//! stdin line
//!  └─ handle_request      principal -> (user, domain)
//!      └─ authorize       three policy tiers over the group rules
//!          └─ DirectoryMembership
//!              ├─ select_strategy    Kerberos/SASL or simple bind session
//!              │    └─ discover_servers   static, SRV and address candidates
//!              └─ resolve_membership  AD nested walk or POSIX lookup
//! stdout: OK / ERR
//! ```

pub mod application;
pub mod infrastructure;
