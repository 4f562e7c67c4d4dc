//! DNS transport for service discovery.
//!
//! SRV queries are encoded by `kerb_ldap_core::protocol::dns` and sent to
//! the nameservers listed in `/etc/resolv.conf`:
//!
//! ```text
//! for each nameserver (in order):
//!   UDP query ──► answer with matching id? ──► TC flag set? ──► retry over TCP
//!                 timeout / I/O error      ──► next nameserver
//! ```
//!
//! Host addresses are resolved through the system resolver (`getaddrinfo`)
//! via Tokio.

pub mod mock;
pub mod resolv_conf;

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use kerb_ldap_core::protocol::dns::{encode_srv_query, is_truncated, response_code, response_id};
use kerb_ldap_core::protocol::QueryIdSequence;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::application::ports::{LookupError, NameService};

/// Largest UDP answer accepted; EDNS is not requested, so 512 would do, but
/// some resolvers answer larger anyway.
const MAX_UDP_RESPONSE: usize = 4096;

/// [`NameService`] backed by the system's configured nameservers.
#[derive(Debug)]
pub struct SystemNameService {
    nameservers: Vec<SocketAddr>,
    timeout: Duration,
    ids: QueryIdSequence,
}

impl SystemNameService {
    pub fn new(nameservers: Vec<SocketAddr>, timeout: Duration) -> Self {
        Self {
            nameservers,
            timeout,
            ids: QueryIdSequence::starting_at(initial_query_id()),
        }
    }

    /// Reads nameservers from `path`; an unreadable file means the local
    /// resolver on 127.0.0.1 is used.
    pub fn from_resolv_conf(path: &Path, timeout: Duration) -> Self {
        let contents = std::fs::read_to_string(path).unwrap_or_else(|e| {
            warn!("cannot read {}: {e}", path.display());
            String::new()
        });
        Self::new(resolv_conf::parse_nameservers(&contents), timeout)
    }

    async fn exchange(&self, server: SocketAddr, query: &[u8], id: u16) -> std::io::Result<Vec<u8>> {
        let response = exchange_udp(server, query, id).await?;
        if !is_truncated(&response) {
            return Ok(response);
        }
        debug!("truncated UDP answer from {server}, retrying over TCP");
        exchange_tcp(server, query, id).await
    }
}

#[async_trait]
impl NameService for SystemNameService {
    async fn query_srv(&self, name: &str) -> Result<Vec<u8>, LookupError> {
        let id = self.ids.next();
        let query = encode_srv_query(id, name).map_err(|e| LookupError::InvalidName {
            name: name.to_string(),
            reason: e.to_string(),
        })?;

        let mut last_error = None;
        for server in &self.nameservers {
            match timeout(self.timeout, self.exchange(*server, &query, id)).await {
                Ok(Ok(response)) => {
                    return match response_code(&response) {
                        Some(0) => Ok(response),
                        code => Err(LookupError::Rejected {
                            name: name.to_string(),
                            code: code.unwrap_or(u8::MAX),
                        }),
                    };
                }
                Ok(Err(e)) => {
                    debug!("nameserver {server} failed for {name}: {e}");
                    last_error = Some(e);
                }
                Err(_) => debug!("nameserver {server} timed out for {name}"),
            }
        }

        Err(match last_error {
            Some(source) => LookupError::Io {
                name: name.to_string(),
                source,
            },
            None => LookupError::Timeout {
                name: name.to_string(),
            },
        })
    }

    async fn resolve_host(&self, host: &str) -> Result<Vec<String>, LookupError> {
        let lookup = tokio::net::lookup_host((host, 0));
        let addrs = match timeout(self.timeout, lookup).await {
            Ok(Ok(addrs)) => addrs,
            Ok(Err(source)) => {
                return Err(LookupError::Io {
                    name: host.to_string(),
                    source,
                })
            }
            Err(_) => {
                return Err(LookupError::Timeout {
                    name: host.to_string(),
                })
            }
        };

        let mut seen: Vec<String> = Vec::new();
        for addr in addrs {
            let ip = addr.ip().to_string();
            if !seen.contains(&ip) {
                seen.push(ip);
            }
        }
        Ok(seen)
    }
}

// ── Transport helpers ─────────────────────────────────────────────────────────

async fn exchange_udp(server: SocketAddr, query: &[u8], id: u16) -> std::io::Result<Vec<u8>> {
    let local: SocketAddr = if server.is_ipv4() {
        (Ipv4Addr::UNSPECIFIED, 0).into()
    } else {
        (Ipv6Addr::UNSPECIFIED, 0).into()
    };
    let socket = UdpSocket::bind(local).await?;
    socket.connect(server).await?;
    socket.send(query).await?;

    let mut buf = vec![0u8; MAX_UDP_RESPONSE];
    loop {
        let len = socket.recv(&mut buf).await?;
        if response_id(&buf[..len]) == Some(id) {
            buf.truncate(len);
            return Ok(buf);
        }
        debug!("ignoring DNS answer with unexpected id from {server}");
    }
}

async fn exchange_tcp(server: SocketAddr, query: &[u8], id: u16) -> std::io::Result<Vec<u8>> {
    let mut stream = TcpStream::connect(server).await?;

    let mut framed = Vec::with_capacity(query.len() + 2);
    framed.extend_from_slice(&(query.len() as u16).to_be_bytes());
    framed.extend_from_slice(query);
    stream.write_all(&framed).await?;

    let len = stream.read_u16().await? as usize;
    let mut response = vec![0u8; len];
    stream.read_exact(&mut response).await?;

    if response_id(&response) != Some(id) {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "TCP answer carries an unexpected id",
        ));
    }
    Ok(response)
}

/// Seeds the id sequence from the clock and pid so that concurrently started
/// helpers do not share a sequence.
fn initial_query_id() -> u16 {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    (nanos ^ std::process::id()) as u16
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use kerb_ldap_core::protocol::dns::decode_srv_response;

    /// Answers one UDP query with an SRV record for `dc1.corp`, copying the id.
    async fn spawn_udp_responder(rcode: u8, truncated: bool) -> SocketAddr {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        tokio::spawn(async move {
            let mut buf = [0u8; 512];
            let (len, peer) = socket.recv_from(&mut buf).await.unwrap();
            let response = mock::srv_response(&buf[..len], &[(0, 10, 389, "dc1.corp")], rcode, truncated);
            socket.send_to(&response, peer).await.unwrap();
        });
        addr
    }

    #[tokio::test]
    async fn test_query_srv_over_udp() {
        // Arrange
        let server = spawn_udp_responder(0, false).await;
        let service = SystemNameService::new(vec![server], Duration::from_secs(2));

        // Act
        let response = service.query_srv("_ldap._tcp.corp").await.unwrap();

        // Assert
        let records = decode_srv_response(&response).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].target, "dc1.corp");
        assert_eq!(records[0].weight, 10);
    }

    #[tokio::test]
    async fn test_truncated_udp_answer_is_retried_over_tcp() {
        // Arrange – UDP answers with TC set, TCP on the same port answers fully
        let server = spawn_udp_responder(0, true).await;
        let listener = tokio::net::TcpListener::bind(server).await.unwrap();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let len = stream.read_u16().await.unwrap() as usize;
            let mut query = vec![0u8; len];
            stream.read_exact(&mut query).await.unwrap();
            let response = mock::srv_response(
                &query,
                &[(0, 10, 389, "dc1.corp"), (1, 0, 389, "dc2.corp")],
                0,
                false,
            );
            stream.write_u16(response.len() as u16).await.unwrap();
            stream.write_all(&response).await.unwrap();
        });
        let service = SystemNameService::new(vec![server], Duration::from_secs(2));

        // Act
        let response = service.query_srv("_ldap._tcp.corp").await.unwrap();

        // Assert
        assert!(!is_truncated(&response));
        assert_eq!(decode_srv_response(&response).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_query_srv_reports_name_error() {
        // Arrange
        let server = spawn_udp_responder(3, false).await;
        let service = SystemNameService::new(vec![server], Duration::from_secs(2));

        // Act
        let result = service.query_srv("_ldap._tcp.nowhere").await;

        // Assert
        assert!(matches!(result, Err(LookupError::Rejected { code: 3, .. })));
    }

    #[tokio::test]
    async fn test_query_srv_times_out_when_nobody_answers() {
        // Arrange – a bound socket that never replies
        let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let service = SystemNameService::new(
            vec![silent.local_addr().unwrap()],
            Duration::from_millis(100),
        );

        // Act
        let result = service.query_srv("_ldap._tcp.corp").await;

        // Assert
        assert!(matches!(result, Err(LookupError::Timeout { .. })));
    }

    #[tokio::test]
    async fn test_query_srv_rejects_unencodable_name() {
        let service = SystemNameService::new(vec![], Duration::from_millis(100));

        let result = service.query_srv("bad..name").await;

        assert!(matches!(result, Err(LookupError::InvalidName { .. })));
    }

    #[tokio::test]
    async fn test_resolve_host_returns_unique_addresses() {
        let service = SystemNameService::new(vec![], Duration::from_secs(2));

        let addrs = service.resolve_host("127.0.0.1").await.unwrap();

        assert_eq!(addrs, vec!["127.0.0.1".to_string()]);
    }
}
