//! In-memory name service for tests.
//!
//! Serves canned SRV responses (real wire-format messages) and address
//! lists, and records every lookup so tests can assert which queries were
//! made.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use kerb_ldap_core::protocol::dns::{encode_srv_query, CLASS_IN, RCODE_NAME_ERROR, TYPE_SRV};

use crate::application::ports::{LookupError, NameService};

/// Builds a response to `query` carrying `records` as
/// `(priority, weight, port, target)`.
///
/// With a non-zero `rcode` no answers are included.
pub fn srv_response(query: &[u8], records: &[(u16, u16, u16, &str)], rcode: u8, truncated: bool) -> Vec<u8> {
    let mut buf = query.to_vec();
    buf[2] = 0x81 | if truncated { 0x02 } else { 0x00 }; // QR, RD (+TC)
    buf[3] = 0x80 | (rcode & 0x0F); // RA + RCODE
    if rcode != 0 {
        return buf;
    }
    buf[6..8].copy_from_slice(&(records.len() as u16).to_be_bytes());

    for (priority, weight, port, target) in records {
        let mut target_name = Vec::new();
        for label in target.split('.').filter(|l| !l.is_empty()) {
            target_name.push(label.len() as u8);
            target_name.extend_from_slice(label.as_bytes());
        }
        target_name.push(0);

        buf.extend_from_slice(&[0xC0, 0x0C]); // owner = question name
        buf.extend_from_slice(&TYPE_SRV.to_be_bytes());
        buf.extend_from_slice(&CLASS_IN.to_be_bytes());
        buf.extend_from_slice(&300u32.to_be_bytes());
        buf.extend_from_slice(&((6 + target_name.len()) as u16).to_be_bytes());
        buf.extend_from_slice(&priority.to_be_bytes());
        buf.extend_from_slice(&weight.to_be_bytes());
        buf.extend_from_slice(&port.to_be_bytes());
        buf.extend_from_slice(&target_name);
    }
    buf
}

/// A [`NameService`] answering from fixed tables.  Names are matched
/// case-insensitively; unknown names fail like NXDOMAIN.
#[derive(Default)]
pub struct StaticNameService {
    srv: HashMap<String, Vec<u8>>,
    addresses: HashMap<String, Vec<String>>,
    queries: Mutex<Vec<String>>,
    address_lookups: Mutex<Vec<String>>,
}

impl StaticNameService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serves SRV `records` for the service name `name`.
    pub fn with_srv_records(mut self, name: &str, records: &[(u16, u16, u16, &str)]) -> Self {
        let query = encode_srv_query(0, name).expect("test service name must be encodable");
        self.srv
            .insert(name.to_ascii_lowercase(), srv_response(&query, records, 0, false));
        self
    }

    /// Cuts the last `bytes` bytes off the response served for `name`.
    pub fn truncate_srv(mut self, name: &str, bytes: usize) -> Self {
        if let Some(response) = self.srv.get_mut(&name.to_ascii_lowercase()) {
            let keep = response.len().saturating_sub(bytes);
            response.truncate(keep);
        }
        self
    }

    pub fn with_addresses(mut self, host: &str, addresses: &[&str]) -> Self {
        self.addresses.insert(
            host.to_ascii_lowercase(),
            addresses.iter().map(|a| a.to_string()).collect(),
        );
        self
    }

    /// SRV names queried so far, in order.
    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().expect("lock poisoned").clone()
    }

    /// Hosts passed to `resolve_host` so far, in order.
    pub fn address_lookups(&self) -> Vec<String> {
        self.address_lookups.lock().expect("lock poisoned").clone()
    }
}

#[async_trait]
impl NameService for StaticNameService {
    async fn query_srv(&self, name: &str) -> Result<Vec<u8>, LookupError> {
        self.queries.lock().expect("lock poisoned").push(name.to_string());
        self.srv
            .get(&name.to_ascii_lowercase())
            .cloned()
            .ok_or_else(|| LookupError::Rejected {
                name: name.to_string(),
                code: RCODE_NAME_ERROR,
            })
    }

    async fn resolve_host(&self, host: &str) -> Result<Vec<String>, LookupError> {
        self.address_lookups.lock().expect("lock poisoned").push(host.to_string());
        self.addresses
            .get(&host.to_ascii_lowercase())
            .cloned()
            .ok_or_else(|| LookupError::Rejected {
                name: host.to_string(),
                code: RCODE_NAME_ERROR,
            })
    }
}
