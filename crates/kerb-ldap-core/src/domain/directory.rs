//! LDAP search filters, value escaping and attribute post-processing.
//!
//! Two kinds of directory are understood:
//!
//! - **Active Directory** – accounts are found by `sAMAccountName`, and
//!   `memberOf` lists the distinguished names of the groups the account is a
//!   direct member of.  Groups can nest, so parents are searched recursively.
//! - **POSIX** (RFC 2307) – groups list their members by `memberUid`, and an
//!   account's primary group is only referenced through `gidNumber`.
//!
//! Every value taken from a request is passed through
//! [`escape_filter_value`] before it is interpolated into a filter.

/// Directory flavour detected on a bound connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerKind {
    ActiveDirectory,
    Posix,
}

impl ServerKind {
    /// Filter selecting the entries whose `attribute` lists the user's groups.
    pub fn membership_filter(self, user: &str) -> String {
        let user = escape_filter_value(user);
        match self {
            Self::ActiveDirectory => format!("(samaccountname={user})"),
            Self::Posix => format!("(memberuid={user})"),
        }
    }

    /// Attribute holding the group names (POSIX) or group DNs (AD).
    pub fn membership_attribute(self) -> &'static str {
        match self {
            Self::ActiveDirectory => "memberof",
            Self::Posix => "cn",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::ActiveDirectory => "Active Directory",
            Self::Posix => "POSIX",
        }
    }
}

/// Base-scope probe on the root DSE used to find the schema partition.
pub const SCHEMA_PROBE_FILTER: &str = "(objectclass=*)";
pub const SCHEMA_PROBE_ATTRIBUTE: &str = "schemaNamingContext";

/// Subtree probe inside the schema partition; only AD defines this attribute.
pub const AD_SCHEMA_FILTER: &str = "(ldapdisplayname=samaccountname)";
pub const AD_SCHEMA_ATTRIBUTE: &str = "ldapdisplayname";

/// Attribute read from parent groups during the nested AD walk.
pub const GROUP_DN_ATTRIBUTE: &str = "distinguishedName";

pub const PRIMARY_GID_ATTRIBUTE: &str = "gidNumber";
pub const POSIX_GROUP_NAME_ATTRIBUTE: &str = "cn";

/// Groups that list `group_dn` as a member.
pub fn parent_groups_filter(group_dn: &str) -> String {
    format!("(&(member={})(objectclass=group))", escape_filter_value(group_dn))
}

/// The POSIX account of `user`, read for its `gidNumber`.
pub fn primary_gid_filter(user: &str) -> String {
    format!("(uid={})", escape_filter_value(user))
}

/// The POSIX group owning `gid`.
pub fn group_by_gid_filter(gid: &str) -> String {
    format!("(&(gidNumber={})(objectclass=posixgroup))", escape_filter_value(gid))
}

/// Escapes the four filter metacharacters as `\XX` hex escapes (RFC 4515).
///
/// # Examples
///
/// ```rust
/// use kerb_ldap_core::escape_filter_value;
///
/// assert_eq!(escape_filter_value("*)("), r"\2a\29\28");
/// ```
pub fn escape_filter_value(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '*' => escaped.push_str("\\2a"),
            '(' => escaped.push_str("\\28"),
            ')' => escaped.push_str("\\29"),
            '\\' => escaped.push_str("\\5c"),
            other => escaped.push(other),
        }
    }
    escaped
}

/// Derives a search base from a DNS domain:
/// `corp.example.com` becomes `dc=corp,dc=example,dc=com`.
pub fn bind_path_from_domain(domain: &str) -> String {
    format!("dc={}", domain.replace('.', ",dc="))
}

/// Returns the group name carried by a membership value.
///
/// AD values are DNs like `CN=Admins,OU=Groups,DC=corp`; the leading CN
/// component is the name.  Values without a leading `CN=` are names already.
pub fn group_name_from_value(value: &str) -> &str {
    match value.get(..3) {
        Some(prefix) if prefix.eq_ignore_ascii_case("cn=") => {
            let rest = &value[3..];
            rest.split(',').next().unwrap_or(rest)
        }
        _ => value,
    }
}

/// Lower-case hex of the UTF-8 bytes of `value`, used in debug logs so that
/// non-ASCII group names can be compared with `-t`/`-T` configuration.
pub fn hex_utf8(value: &str) -> String {
    hex::encode(value.as_bytes())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
