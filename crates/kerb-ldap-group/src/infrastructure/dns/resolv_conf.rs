//! Nameserver list from `/etc/resolv.conf`.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

pub const RESOLV_CONF_PATH: &str = "/etc/resolv.conf";

/// The stub resolver honours at most this many `nameserver` lines.
const MAX_NAMESERVERS: usize = 3;
const DNS_PORT: u16 = 53;

/// Extracts the nameserver addresses from resolv.conf text.
///
/// Lines that do not parse (including IPv6 addresses with a zone suffix) are
/// skipped.  An empty result falls back to the local resolver on 127.0.0.1.
pub fn parse_nameservers(contents: &str) -> Vec<SocketAddr> {
    let mut servers: Vec<SocketAddr> = contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.starts_with('#') && !line.starts_with(';'))
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            match (fields.next(), fields.next()) {
                (Some("nameserver"), Some(addr)) => addr.parse::<IpAddr>().ok(),
                _ => None,
            }
        })
        .map(|ip| SocketAddr::new(ip, DNS_PORT))
        .take(MAX_NAMESERVERS)
        .collect();

    if servers.is_empty() {
        servers.push(SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), DNS_PORT));
    }
    servers
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_nameservers_reads_up_to_three() {
        // Arrange
        let contents = "\
# generated by NetworkManager
search corp.example.com
nameserver 10.0.0.53
nameserver 2001:db8::53
; nameserver 10.9.9.9
nameserver fe80::1%eth0
nameserver 10.0.1.53
nameserver 10.0.2.53
";

        // Act
        let servers = parse_nameservers(contents);

        // Assert
        assert_eq!(
            servers,
            vec![
                "10.0.0.53:53".parse::<SocketAddr>().unwrap(),
                "[2001:db8::53]:53".parse().unwrap(),
                "10.0.1.53:53".parse().unwrap(),
            ]
        );
    }

    #[test]
    fn test_parse_nameservers_falls_back_to_localhost() {
        let servers = parse_nameservers("search example.com\n");

        assert_eq!(servers, vec!["127.0.0.1:53".parse::<SocketAddr>().unwrap()]);
    }
}
