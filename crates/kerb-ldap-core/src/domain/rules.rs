//! Rule tables built once from configuration and read-only afterwards.
//!
//! Three colon-separated lists configure the helper:
//!
//! ```text
//! groups : group[@domain][:group[@domain]]*
//! netbios: NETBIOS@domain[:NETBIOS@domain]*
//! servers: server@domain[:server@domain]*
//! ```
//!
//! For groups, omitting `@` entirely makes a *global* rule, `group@` (empty
//! domain) makes a *default-domain* rule and `group@domain` scopes the rule to
//! a single Kerberos domain.  Netbios and server entries always need a
//! non-empty domain; a server entry may use [`ANY_DOMAIN`] to apply to every
//! domain.
//!
//! Carriage returns and line feeds inside a list are ignored so that lists
//! pasted from files keep working.

use thiserror::Error;

/// Server-rule domain that matches every domain.
pub const ANY_DOMAIN: &str = "*";

/// Errors raised while parsing configuration lists.  Any of these is fatal
/// at startup.
#[derive(Debug, Error, PartialEq)]
pub enum RuleError {
    /// A group list entry has no group name (`":admins"`, `"@corp"`).
    #[error("empty group name in entry {position} of the group list")]
    EmptyGroup { position: usize },

    /// A netbios map entry has no netbios name.
    #[error("empty netbios name in entry {position} of the netbios map")]
    EmptyNetbios { position: usize },

    /// A server map entry has no server name.
    #[error("empty server name in entry {position} of the server map")]
    EmptyServer { position: usize },

    /// A netbios or server entry lacks the mandatory `@domain` part.
    #[error("entry `{entry}` is missing its domain")]
    MissingDomain { entry: String },

    /// A hex-encoded group list entry is not valid hex UTF-8.
    #[error("entry `{entry}` is not valid hex encoded UTF-8: {reason}")]
    InvalidHex { entry: String, reason: String },
}

/// How group names in a group list are written on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GroupListEncoding {
    /// Names and domains as plain text.
    #[default]
    Plain,
    /// Group names as hex UTF-8, domains as plain text.
    HexGroupNames,
    /// Group names and domains as hex UTF-8; only `@` and `:` stay literal.
    HexAll,
}

/// Which policy tier a [`GroupRule`] belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleScope<'a> {
    /// `group@domain` – only consulted for that domain.
    Domain(&'a str),
    /// `group@` – consulted for any resolved domain.
    DefaultDomain,
    /// `group` – consulted for every principal.
    Global,
}

/// One entry of the group list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupRule {
    pub group: String,
    /// `None` for global rules, `Some("")` for default-domain rules.
    pub domain: Option<String>,
}

impl GroupRule {
    pub fn scope(&self) -> RuleScope<'_> {
        match self.domain.as_deref() {
            None => RuleScope::Global,
            Some("") => RuleScope::DefaultDomain,
            Some(domain) => RuleScope::Domain(domain),
        }
    }
}

/// Maps a netbios (short) domain name to its Kerberos domain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetbiosRule {
    pub netbios: String,
    pub domain: String,
}

/// A statically configured LDAP server for a domain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerRule {
    pub server: String,
    pub domain: String,
}

impl ServerRule {
    /// Returns `true` if this rule serves `domain` (case-insensitive) or is a
    /// wildcard rule.
    pub fn applies_to(&self, domain: &str) -> bool {
        self.domain == ANY_DOMAIN || self.domain.eq_ignore_ascii_case(domain)
    }
}

/// All configured rule lists, owned together for the lifetime of the process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleTables {
    pub groups: Vec<GroupRule>,
    pub netbios: Vec<NetbiosRule>,
    pub servers: Vec<ServerRule>,
}

impl RuleTables {
    /// Parses every list that was configured.  Absent lists yield empty tables.
    ///
    /// # Errors
    ///
    /// Returns the first [`RuleError`] found in any of the lists.
    pub fn from_lists(
        groups: Option<&str>,
        encoding: GroupListEncoding,
        netbios: Option<&str>,
        servers: Option<&str>,
    ) -> Result<Self, RuleError> {
        Ok(Self {
            groups: groups
                .map(|list| parse_group_list(list, encoding))
                .transpose()?
                .unwrap_or_default(),
            netbios: netbios.map(parse_netbios_list).transpose()?.unwrap_or_default(),
            servers: servers.map(parse_server_list).transpose()?.unwrap_or_default(),
        })
    }

    /// Looks up the Kerberos domain for a netbios name (case-insensitive).
    /// The first matching entry in configuration order wins.
    pub fn netbios_domain(&self, netbios: &str) -> Option<&str> {
        lookup_netbios(&self.netbios, netbios)
    }

    /// Iterates the static servers configured for `domain`.
    pub fn servers_for<'a>(&'a self, domain: &'a str) -> impl Iterator<Item = &'a ServerRule> + 'a {
        self.servers.iter().filter(move |rule| rule.applies_to(domain))
    }
}

pub(crate) fn lookup_netbios<'a>(rules: &'a [NetbiosRule], netbios: &str) -> Option<&'a str> {
    rules
        .iter()
        .find(|rule| rule.netbios.eq_ignore_ascii_case(netbios))
        .map(|rule| rule.domain.as_str())
}

// ── Parsers ───────────────────────────────────────────────────────────────────

/// Parses a group list such as `"admins@CORP.EXAMPLE.COM:staff@:everyone"`.
///
/// # Errors
///
/// [`RuleError::EmptyGroup`] for an entry without a group name and
/// [`RuleError::InvalidHex`] when a hex encoding was requested but an entry
/// does not decode.
pub fn parse_group_list(list: &str, encoding: GroupListEncoding) -> Result<Vec<GroupRule>, RuleError> {
    let cleaned = strip_line_breaks(list);
    let mut rules = Vec::new();

    for (position, entry) in cleaned.split(':').enumerate() {
        let (group, domain) = match entry.split_once('@') {
            Some((group, domain)) => (group, Some(domain)),
            None => (entry, None),
        };
        if group.is_empty() {
            return Err(RuleError::EmptyGroup { position });
        }

        let (group, domain) = match encoding {
            GroupListEncoding::Plain => (group.to_string(), domain.map(str::to_string)),
            GroupListEncoding::HexGroupNames => {
                (decode_hex_utf8(entry, group)?, domain.map(str::to_string))
            }
            GroupListEncoding::HexAll => (
                decode_hex_utf8(entry, group)?,
                domain.map(|d| decode_hex_utf8(entry, d)).transpose()?,
            ),
        };
        if group.is_empty() {
            return Err(RuleError::EmptyGroup { position });
        }
        rules.push(GroupRule { group, domain });
    }

    Ok(rules)
}

/// Parses a netbios map such as `"CORP@corp.example.com:LAB@lab.example.com"`.
///
/// # Errors
///
/// [`RuleError::EmptyNetbios`] or [`RuleError::MissingDomain`].
pub fn parse_netbios_list(list: &str) -> Result<Vec<NetbiosRule>, RuleError> {
    parse_domain_pairs(list, |position| RuleError::EmptyNetbios { position })
        .map(|pairs| {
            pairs
                .into_iter()
                .map(|(netbios, domain)| NetbiosRule { netbios, domain })
                .collect()
        })
}

/// Parses a server map such as `"dc1.corp.example.com@corp.example.com"`.
///
/// # Errors
///
/// [`RuleError::EmptyServer`] or [`RuleError::MissingDomain`].
pub fn parse_server_list(list: &str) -> Result<Vec<ServerRule>, RuleError> {
    parse_domain_pairs(list, |position| RuleError::EmptyServer { position })
        .map(|pairs| {
            pairs
                .into_iter()
                .map(|(server, domain)| ServerRule { server, domain })
                .collect()
        })
}

fn parse_domain_pairs(
    list: &str,
    empty_name: impl Fn(usize) -> RuleError,
) -> Result<Vec<(String, String)>, RuleError> {
    let cleaned = strip_line_breaks(list);
    let mut pairs = Vec::new();

    for (position, entry) in cleaned.split(':').enumerate() {
        let Some((name, domain)) = entry.split_once('@') else {
            if entry.is_empty() {
                return Err(empty_name(position));
            }
            return Err(RuleError::MissingDomain { entry: entry.to_string() });
        };
        if name.is_empty() {
            return Err(empty_name(position));
        }
        if domain.is_empty() {
            return Err(RuleError::MissingDomain { entry: entry.to_string() });
        }
        pairs.push((name.to_string(), domain.to_string()));
    }

    Ok(pairs)
}

fn strip_line_breaks(list: &str) -> String {
    list.chars().filter(|c| *c != '\r' && *c != '\n').collect()
}

fn decode_hex_utf8(entry: &str, field: &str) -> Result<String, RuleError> {
    let invalid = |reason: String| RuleError::InvalidHex {
        entry: entry.to_string(),
        reason,
    };
    let bytes = hex::decode(field).map_err(|e| invalid(e.to_string()))?;
    String::from_utf8(bytes).map_err(|e| invalid(e.to_string()))
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_list_assigns_all_three_scopes() {
        // Arrange
        let list = "admins@CORP.EXAMPLE.COM:staff@:everyone";

        // Act
        let rules = parse_group_list(list, GroupListEncoding::Plain).unwrap();

        // Assert
        assert_eq!(rules.len(), 3);
        assert_eq!(rules[0].scope(), RuleScope::Domain("CORP.EXAMPLE.COM"));
        assert_eq!(rules[1].scope(), RuleScope::DefaultDomain);
        assert_eq!(rules[2].scope(), RuleScope::Global);
        assert_eq!(rules[2].group, "everyone");
    }

    #[test]
    fn test_group_list_ignores_line_breaks() {
        let rules = parse_group_list("admins\r\n:staff\n", GroupListEncoding::Plain).unwrap();

        assert_eq!(
            rules.iter().map(|r| r.group.as_str()).collect::<Vec<_>>(),
            vec!["admins", "staff"]
        );
    }

    #[test]
    fn test_group_list_rejects_empty_group_name() {
        assert_eq!(
            parse_group_list("admins::staff", GroupListEncoding::Plain),
            Err(RuleError::EmptyGroup { position: 1 })
        );
        assert_eq!(
            parse_group_list("@CORP", GroupListEncoding::Plain),
            Err(RuleError::EmptyGroup { position: 0 })
        );
    }

    #[test]
    fn test_hex_group_names_decode_utf8_but_keep_domain_plain() {
        // Arrange – "Grüne" in hex UTF-8
        let list = "4772c3bc6e65@CORP.EXAMPLE.COM";

        // Act
        let rules = parse_group_list(list, GroupListEncoding::HexGroupNames).unwrap();

        // Assert
        assert_eq!(rules[0].group, "Grüne");
        assert_eq!(rules[0].domain.as_deref(), Some("CORP.EXAMPLE.COM"));
    }

    #[test]
    fn test_hex_all_decodes_group_and_domain() {
        // "admins" @ "CORP"
        let rules = parse_group_list("61646d696e73@434f5250", GroupListEncoding::HexAll).unwrap();

        assert_eq!(rules[0].group, "admins");
        assert_eq!(rules[0].domain.as_deref(), Some("CORP"));
    }

    #[test]
    fn test_hex_list_rejects_invalid_hex() {
        let result = parse_group_list("zz", GroupListEncoding::HexGroupNames);

        assert!(matches!(result, Err(RuleError::InvalidHex { .. })));
    }

    #[test]
    fn test_hex_list_rejects_invalid_utf8() {
        let result = parse_group_list("ff", GroupListEncoding::HexGroupNames);

        assert!(matches!(result, Err(RuleError::InvalidHex { .. })));
    }

    #[test]
    fn test_netbios_list_requires_domain() {
        assert_eq!(
            parse_netbios_list("CORP"),
            Err(RuleError::MissingDomain { entry: "CORP".to_string() })
        );
        assert_eq!(
            parse_netbios_list("CORP@"),
            Err(RuleError::MissingDomain { entry: "CORP@".to_string() })
        );
        assert_eq!(
            parse_netbios_list("@corp.example.com"),
            Err(RuleError::EmptyNetbios { position: 0 })
        );
    }

    #[test]
    fn test_server_list_requires_domain() {
        assert!(matches!(
            parse_server_list("dc1.example.com"),
            Err(RuleError::MissingDomain { .. })
        ));
        assert_eq!(
            parse_server_list("dc1@corp:@corp"),
            Err(RuleError::EmptyServer { position: 1 })
        );
    }

    #[test]
    fn test_netbios_lookup_is_case_insensitive_and_first_wins() {
        // Arrange
        let tables = RuleTables::from_lists(
            None,
            GroupListEncoding::Plain,
            Some("CORP@corp.example.com:corp@other.example.com"),
            None,
        )
        .unwrap();

        // Act / Assert
        assert_eq!(tables.netbios_domain("Corp"), Some("corp.example.com"));
        assert_eq!(tables.netbios_domain("LAB"), None);
    }

    #[test]
    fn test_servers_for_matches_domain_and_wildcard() {
        // Arrange
        let tables = RuleTables::from_lists(
            None,
            GroupListEncoding::Plain,
            None,
            Some("dc1@CORP.EXAMPLE.COM:dc2@lab.example.com:gc@*"),
        )
        .unwrap();

        // Act
        let servers: Vec<&str> = tables
            .servers_for("corp.example.com")
            .map(|r| r.server.as_str())
            .collect();

        // Assert
        assert_eq!(servers, vec!["dc1", "gc"]);
    }

    #[test]
    fn test_from_lists_with_nothing_configured_is_empty() {
        let tables = RuleTables::from_lists(None, GroupListEncoding::Plain, None, None).unwrap();

        assert_eq!(tables, RuleTables::default());
    }
}
