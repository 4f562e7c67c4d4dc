//! kerb-ldap-group: external ACL helper entry point.
//!
//! Reads one principal per line on stdin and answers `OK` when it belongs to
//! one of the configured groups, `ERR` otherwise.  Diagnostics go to stderr
//! only; stdout carries nothing but decisions.
//!
//! # Usage
//!
//! ```text
//! kerb-ldap-group -g 'Staff@CORP.EXAMPLE.COM:Web@:Everyone' [OPTIONS]
//!
//!   -g <LIST>   group list            group | group@ | group@DOMAIN, ':'-separated
//!   -t <LIST>   group list, group names in hex UTF-8
//!   -T <LIST>   group list, names and domains in hex UTF-8
//!   -D <DOMAIN> default domain
//!   -N <MAP>    netbios map           NETBIOS@DOMAIN, ':'-separated
//!   -S <MAP>    ldap server map       server@DOMAIN | server@*, ':'-separated
//!   -P <NAME>   keytab principal to authenticate with
//!   -u -p -l -b simple-bind user, password, ldap[s]:// URL and bind path
//!   -s          TLS towards discovered servers
//!   -a          accept TLS without certificate verification
//!   -m <N>      maximum nested group depth [default: 5]
//!   -d / -i     debug / informational logging
//!   --config    optional TOML settings file
//! ```
//!
//! # Exit status
//!
//! | Status | Meaning                                           |
//! |--------|---------------------------------------------------|
//! | 0      | end of input                                      |
//! | 1      | configuration error, or stdin could not be read   |
//! | 255    | the `QQ@QQ` shutdown request was received         |

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use anyhow::Context;
use clap::{ArgGroup, Parser};
use tokio::io::BufReader;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use kerb_ldap_core::{DomainResolver, GroupListEncoding, RuleTables};
use kerb_ldap_group::application::authorize::{AuthorizeUseCase, DirectoryMembership};
use kerb_ldap_group::application::handle_request::HandleRequestUseCase;
use kerb_ldap_group::application::settings::{HelperSettings, SimpleBindSettings};
use kerb_ldap_group::infrastructure::config::{load_config, FileConfig};
use kerb_ldap_group::infrastructure::directory::LdapDirectoryClient;
use kerb_ldap_group::infrastructure::dns::resolv_conf::RESOLV_CONF_PATH;
use kerb_ldap_group::infrastructure::dns::SystemNameService;
use kerb_ldap_group::infrastructure::kerberos::KeytabCredentialProvider;
use kerb_ldap_group::infrastructure::stdio::{
    run_request_loop, LoopExit, RequestReader, ResponseWriter,
};

/// CA bundle used when `TLS_CACERTFILE` is not set.
const DEFAULT_CA_FILE: &str = "/etc/ssl/certs/cert.pem";

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Authorizes Kerberos principals by LDAP group membership.
///
/// The ldap url, user and password are only used when Kerberos access fails
/// (for example for an unknown domain) or when the user name carries no
/// domain and no default domain is configured.
#[derive(Debug, Parser)]
#[command(name = "kerb-ldap-group", version)]
#[command(group(ArgGroup::new("group_list").args(["groups", "groups_hex", "groups_hex_all"])))]
struct Cli {
    /// Group list: group, group@ or group@DOMAIN, separated by ':'.
    #[arg(short = 'g', value_name = "LIST")]
    groups: Option<String>,

    /// Group list with group names in hex UTF-8.
    #[arg(short = 't', value_name = "LIST")]
    groups_hex: Option<String>,

    /// Group list with group names and domains in hex UTF-8.
    #[arg(short = 'T', value_name = "LIST")]
    groups_hex_all: Option<String>,

    /// Domain for user names without one.
    #[arg(short = 'D', value_name = "DOMAIN")]
    default_domain: Option<String>,

    /// Netbios to DNS domain map: NETBIOS@DOMAIN separated by ':'.
    #[arg(short = 'N', value_name = "MAP")]
    netbios: Option<String>,

    /// LDAP server to DNS domain map: server@DOMAIN separated by ':'.
    #[arg(short = 'S', value_name = "MAP")]
    servers: Option<String>,

    /// Keytab principal to authenticate with.
    #[arg(short = 'P', value_name = "PRINCIPAL")]
    principal: Option<String>,

    /// LDAP user for simple binds.
    #[arg(short = 'u', value_name = "USER", env = "KERB_LDAP_USER")]
    ldap_user: Option<String>,

    /// LDAP password for simple binds.
    #[arg(short = 'p', value_name = "PASSWORD", env = "KERB_LDAP_PASSWORD", hide_env_values = true)]
    ldap_password: Option<String>,

    /// LDAP URL (ldap://host[:port] or ldaps://host[:port]) for simple binds.
    #[arg(short = 'l', value_name = "URL", env = "KERB_LDAP_URL")]
    ldap_url: Option<String>,

    /// Search base for simple-bind sessions.
    #[arg(short = 'b', value_name = "DN")]
    bind_path: Option<String>,

    /// Use TLS towards Kerberos-authenticated servers.
    #[arg(short = 's')]
    use_tls: bool,

    /// Allow TLS without certificate verification.
    #[arg(short = 'a')]
    allow_invalid_certs: bool,

    /// Maximum depth of nested group searches.
    #[arg(short = 'm', value_name = "DEPTH")]
    max_depth: Option<u32>,

    /// Full debug output.
    #[arg(short = 'd')]
    debug: bool,

    /// Informational messages.
    #[arg(short = 'i')]
    info: bool,

    /// Optional TOML settings file.
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
}

/// Everything `main` needs, merged from the command line and the file.
#[derive(Debug)]
struct Options {
    groups: String,
    encoding: GroupListEncoding,
    netbios: Option<String>,
    servers: Option<String>,
    settings: HelperSettings,
    allow_invalid_certs: bool,
    connect_timeout: Duration,
    dns_timeout: Duration,
}

impl Cli {
    /// Applies command-line values over `file`.
    ///
    /// # Errors
    ///
    /// Fails when no group list is configured anywhere.
    fn into_options(self, file: FileConfig) -> anyhow::Result<Options> {
        let (groups, encoding) = match (self.groups, self.groups_hex, self.groups_hex_all) {
            (Some(list), _, _) => (list, GroupListEncoding::Plain),
            (_, Some(list), _) => (list, GroupListEncoding::HexGroupNames),
            (_, _, Some(list)) => (list, GroupListEncoding::HexAll),
            _ => (
                file.policy.groups.context("no group list configured")?,
                file.policy.group_encoding.into(),
            ),
        };

        let ldap = file.ldap;
        let simple_bind = self.ldap_url.or(ldap.url).map(|url| SimpleBindSettings {
            url,
            user: self.ldap_user.or(ldap.user),
            password: self.ldap_password.or(ldap.password),
        });

        Ok(Options {
            groups,
            encoding,
            netbios: self.netbios.or(file.policy.netbios),
            servers: self.servers.or(file.policy.servers),
            settings: HelperSettings {
                default_domain: self.default_domain.or(file.policy.default_domain),
                keytab_principal: self.principal.or(file.kerberos.principal),
                use_tls: self.use_tls || ldap.use_tls,
                simple_bind,
                bind_path: self.bind_path.or(ldap.bind_path),
                max_depth: self.max_depth.unwrap_or(ldap.max_depth),
                search_timeout: file.timeouts.search(),
            },
            allow_invalid_certs: self.allow_invalid_certs || ldap.allow_invalid_certs,
            connect_timeout: file.timeouts.connect(),
            dns_timeout: file.timeouts.dns(),
        })
    }

    fn log_filter(&self) -> EnvFilter {
        let level = if self.debug {
            "debug"
        } else if self.info {
            "info"
        } else {
            "warn"
        };
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
    }
}

/// Points the TLS stack at the configured CA bundle.
fn export_trust_anchor(allow_invalid_certs: bool) {
    if allow_invalid_certs {
        debug!("certificate verification disabled");
        return;
    }
    let ca_file = std::env::var("TLS_CACERTFILE").unwrap_or_else(|_| DEFAULT_CA_FILE.to_string());
    if Path::new(&ca_file).exists() {
        debug!("using CA bundle {ca_file} (set TLS_CACERTFILE to change)");
        std::env::set_var("SSL_CERT_FILE", &ca_file);
    } else {
        debug!("CA bundle {ca_file} not found, using the system trust store");
    }
}

/// Parses the options and rule lists.  Any error here is answered with a
/// single `ERR` before exiting.
fn configure(cli: Cli) -> anyhow::Result<(Options, RuleTables)> {
    let file = match &cli.config {
        Some(path) => load_config(path)
            .with_context(|| format!("cannot load settings from {}", path.display()))?,
        None => FileConfig::default(),
    };
    let options = cli.into_options(file)?;
    let tables = RuleTables::from_lists(
        Some(&options.groups),
        options.encoding,
        options.netbios.as_deref(),
        options.servers.as_deref(),
    )
    .context("invalid rule list")?;
    Ok((options, tables))
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(cli.log_filter())
        .init();

    info!("kerb-ldap-group {} starting", env!("CARGO_PKG_VERSION"));

    let mut writer = ResponseWriter::new(tokio::io::stdout());

    let (options, tables) = match configure(cli) {
        Ok(configured) => configured,
        Err(e) => {
            error!("{e:#}");
            writer.write_line("ERR").await?;
            return Ok(ExitCode::from(1));
        }
    };
    debug!("settings: {:?}", options.settings);
    export_trust_anchor(options.allow_invalid_certs);

    let names = SystemNameService::from_resolv_conf(Path::new(RESOLV_CONF_PATH), options.dns_timeout);
    let directory = LdapDirectoryClient::new(options.connect_timeout, options.allow_invalid_certs);
    let credentials = KeytabCredentialProvider::from_env();

    let membership = DirectoryMembership::new(
        &options.settings,
        &tables.servers,
        &names,
        &directory,
        &credentials,
    );
    let handler = HandleRequestUseCase::new(
        DomainResolver::new(&tables.netbios, options.settings.default_domain.as_deref()),
        AuthorizeUseCase::new(&tables.groups, membership),
    );

    let mut reader = RequestReader::new(BufReader::new(tokio::io::stdin()));
    let exit = run_request_loop(&mut reader, &mut writer, &handler)
        .await
        .context("writing response failed")?;

    Ok(match exit {
        LoopExit::EndOfInput => {
            info!("end of input");
            ExitCode::SUCCESS
        }
        LoopExit::ReadFailed(e) => {
            error!("stdin failed: {e}");
            ExitCode::from(1)
        }
        LoopExit::Shutdown => ExitCode::from(255),
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("kerb-ldap-group").chain(args.iter().copied()))
            .expect("arguments must parse")
    }

    #[test]
    fn test_cli_parses_original_option_set() {
        // Arrange / Act
        let cli = parse(&[
            "-g", "Staff@CORP", "-D", "CORP", "-N", "C@CORP", "-S", "dc1@CORP", "-P", "HTTP/p@CORP",
            "-u", "cn=proxy", "-p", "secret", "-l", "ldap://ldap", "-b", "dc=corp", "-s", "-a", "-m",
            "3", "-d", "-i",
        ]);

        // Assert
        assert_eq!(cli.groups.as_deref(), Some("Staff@CORP"));
        assert_eq!(cli.max_depth, Some(3));
        assert!(cli.use_tls && cli.allow_invalid_certs && cli.debug && cli.info);
    }

    #[test]
    fn test_group_list_options_are_exclusive() {
        let result = Cli::try_parse_from(["kerb-ldap-group", "-g", "a", "-t", "62"]);

        assert!(result.is_err());
    }

    #[test]
    fn test_cli_values_override_file_values() {
        // Arrange
        let mut file = FileConfig::default();
        file.policy.groups = Some("FileGroup".to_string());
        file.policy.default_domain = Some("FILE.ORG".to_string());
        file.ldap.url = Some("ldap://file-ldap".to_string());
        file.ldap.max_depth = 8;
        let cli = parse(&["-t", "537461666640", "-D", "CORP", "-u", "cn=proxy"]);

        // Act
        let options = cli.into_options(file).unwrap();

        // Assert
        assert_eq!(options.groups, "537461666640");
        assert_eq!(options.encoding, GroupListEncoding::HexGroupNames);
        assert_eq!(options.settings.default_domain.as_deref(), Some("CORP"));
        assert_eq!(options.settings.max_depth, 8);
        let simple = options.settings.simple_bind.unwrap();
        assert_eq!(simple.url, "ldap://file-ldap");
        assert_eq!(simple.user.as_deref(), Some("cn=proxy"));
    }

    #[test]
    fn test_missing_group_list_is_an_error() {
        let cli = parse(&["-D", "CORP"]);

        assert!(cli.into_options(FileConfig::default()).is_err());
    }

    #[test]
    fn test_file_group_list_keeps_its_encoding() {
        let mut file = FileConfig::default();
        file.policy.groups = Some("Staff".to_string());

        let options = parse(&[]).into_options(file).unwrap();

        assert_eq!(options.groups, "Staff");
        assert_eq!(options.encoding, GroupListEncoding::Plain);
        assert_eq!(options.settings.search_timeout, Duration::from_secs(30));
        assert!(options.settings.simple_bind.is_none());
    }
}
