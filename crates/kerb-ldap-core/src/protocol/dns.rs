//! DNS wire codec for service-location (SRV, RFC 2782) lookups.
//!
//! Only what SRV discovery needs is implemented: encoding a single-question
//! query and walking a response to collect its SRV records.
//!
//! Message layout (RFC 1035 §4.1):
//! ```text
//! [id:2][flags:2][qdcount:2][ancount:2][nscount:2][arcount:2]   header, 12 bytes
//! question*: [name][type:2][class:2]
//! record*:   [name][type:2][class:2][ttl:4][rdlength:2][rdata:rdlength]
//! SRV rdata: [priority:2][weight:2][port:2][target name]
//! ```
//! All integers are big-endian.  Names are sequences of length-prefixed
//! labels ending in a zero byte, and may end in a 2-byte compression pointer
//! (`11xxxxxx xxxxxxxx`) to a name earlier in the message.
//!
//! Every read is bounds-checked against the buffer; a malformed or truncated
//! message yields a [`DnsError`], never a panic.

use thiserror::Error;

/// Size of the fixed DNS header.
pub const HEADER_SIZE: usize = 12;
/// Resource record type for SRV.
pub const TYPE_SRV: u16 = 33;
/// The Internet class.
pub const CLASS_IN: u16 = 1;
/// RCODE for "no such domain".
pub const RCODE_NAME_ERROR: u8 = 3;

const FLAG_RESPONSE: u16 = 0x8000;
const FLAG_TRUNCATED: u16 = 0x0200;
const FLAG_RECURSION_DESIRED: u16 = 0x0100;
const RCODE_MASK: u16 = 0x000F;

const MAX_LABEL_LEN: usize = 63;
const MAX_NAME_LEN: usize = 255;
/// Upper bound on compression pointers followed while reading one name.
const MAX_POINTER_HOPS: usize = 64;

/// Errors that can occur while encoding a query or decoding a response.
#[derive(Debug, Error, PartialEq)]
pub enum DnsError {
    /// A field would extend past the end of the message.
    #[error("message truncated: need at least {needed} bytes, got {available}")]
    InsufficientData { needed: usize, available: usize },

    /// A label length byte uses the reserved `01`/`10` prefixes.
    #[error("invalid label type 0x{byte:02X} at offset {offset}")]
    InvalidLabel { offset: usize, byte: u8 },

    /// Compression pointers did not terminate.
    #[error("compression pointer loop at offset {offset}")]
    PointerLoop { offset: usize },

    /// An expanded name exceeds 255 bytes.
    #[error("name starting at offset {offset} exceeds 255 bytes")]
    NameTooLong { offset: usize },

    /// An SRV record whose data does not hold its fixed fields and target.
    #[error("SRV record at offset {offset} has inconsistent length {rdlength}")]
    RecordTooShort { offset: usize, rdlength: usize },

    /// The message is a query, not a response.
    #[error("message is not a response")]
    NotAResponse,

    /// The server answered with a non-zero RCODE.
    #[error("server returned response code {0}")]
    ResponseCode(u8),

    /// The name to query cannot be encoded.
    #[error("cannot encode query name `{0}`")]
    InvalidQueryName(String),
}

/// One decoded SRV record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SrvRecord {
    pub priority: u16,
    pub weight: u16,
    pub port: u16,
    /// Target host without the trailing dot.
    pub target: String,
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Returns the SRV owner name for LDAP in `domain`.
///
/// ```rust
/// use kerb_ldap_core::protocol::dns::service_name;
///
/// assert_eq!(service_name("corp.example.com", false), "_ldap._tcp.corp.example.com");
/// assert_eq!(service_name("corp.example.com", true), "_ldaps._tcp.corp.example.com");
/// ```
pub fn service_name(domain: &str, secure: bool) -> String {
    if secure {
        format!("_ldaps._tcp.{domain}")
    } else {
        format!("_ldap._tcp.{domain}")
    }
}

/// Encodes a recursive query for the SRV records of `name`.
///
/// # Errors
///
/// Returns [`DnsError::InvalidQueryName`] for empty labels, labels longer than
/// 63 bytes or names longer than 255 bytes.
pub fn encode_srv_query(id: u16, name: &str) -> Result<Vec<u8>, DnsError> {
    let trimmed = name.strip_suffix('.').unwrap_or(name);
    let invalid = || DnsError::InvalidQueryName(name.to_string());

    let mut qname = Vec::with_capacity(trimmed.len() + 2);
    for label in trimmed.split('.') {
        if label.is_empty() || label.len() > MAX_LABEL_LEN {
            return Err(invalid());
        }
        qname.push(label.len() as u8);
        qname.extend_from_slice(label.as_bytes());
    }
    qname.push(0);
    if qname.len() > MAX_NAME_LEN {
        return Err(invalid());
    }

    let mut buf = Vec::with_capacity(HEADER_SIZE + qname.len() + 4);
    buf.extend_from_slice(&id.to_be_bytes());
    buf.extend_from_slice(&FLAG_RECURSION_DESIRED.to_be_bytes());
    buf.extend_from_slice(&1u16.to_be_bytes()); // qdcount
    buf.extend_from_slice(&[0; 6]); // ancount, nscount, arcount
    buf.extend_from_slice(&qname);
    buf.extend_from_slice(&TYPE_SRV.to_be_bytes());
    buf.extend_from_slice(&CLASS_IN.to_be_bytes());
    Ok(buf)
}

/// Returns the transaction id of a message, if it has a header.
pub fn response_id(buf: &[u8]) -> Option<u16> {
    read_u16(buf, 0).ok()
}

/// Returns the RCODE of a message, if it has a header.
pub fn response_code(buf: &[u8]) -> Option<u8> {
    read_u16(buf, 2).ok().map(|flags| (flags & RCODE_MASK) as u8)
}

/// Returns `true` if the server set the TC (truncated) flag.
pub fn is_truncated(buf: &[u8]) -> bool {
    read_u16(buf, 2).map(|flags| flags & FLAG_TRUNCATED != 0).unwrap_or(false)
}

/// Decodes every SRV record in a response.
///
/// The question section is skipped, then all remaining resource records are
/// walked to the end of the buffer.  Records of other types are skipped by
/// their `rdlength`.  SRV records whose target is the root name (`.`, "service
/// not available") are omitted.
///
/// # Errors
///
/// Returns [`DnsError`] if the message is not a successful response or any
/// field lies outside the buffer.
pub fn decode_srv_response(buf: &[u8]) -> Result<Vec<SrvRecord>, DnsError> {
    require_len(buf, 0, HEADER_SIZE)?;
    let flags = read_u16(buf, 2)?;
    if flags & FLAG_RESPONSE == 0 {
        return Err(DnsError::NotAResponse);
    }
    let rcode = (flags & RCODE_MASK) as u8;
    if rcode != 0 {
        return Err(DnsError::ResponseCode(rcode));
    }

    let question_count = read_u16(buf, 4)?;
    let mut offset = HEADER_SIZE;
    for _ in 0..question_count {
        let (_, next) = read_name(buf, offset)?;
        require_len(buf, next, 4)?; // type + class
        offset = next + 4;
    }

    let mut records = Vec::new();
    while offset < buf.len() {
        let (_, next) = read_name(buf, offset)?;
        let record_type = read_u16(buf, next)?;
        require_len(buf, next + 2, 6)?; // class + ttl
        let rdlength = read_u16(buf, next + 8)? as usize;
        let rdata = next + 10;
        require_len(buf, rdata, rdlength)?;

        if record_type == TYPE_SRV {
            if let Some(record) = decode_srv_rdata(buf, rdata, rdlength)? {
                records.push(record);
            }
        }
        offset = rdata + rdlength;
    }

    Ok(records)
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn decode_srv_rdata(buf: &[u8], offset: usize, rdlength: usize) -> Result<Option<SrvRecord>, DnsError> {
    let too_short = || DnsError::RecordTooShort { offset, rdlength };
    if rdlength < 7 {
        return Err(too_short());
    }

    let priority = read_u16(buf, offset)?;
    let weight = read_u16(buf, offset + 2)?;
    let port = read_u16(buf, offset + 4)?;
    let (target, name_end) = read_name(buf, offset + 6)?;
    if name_end > offset + rdlength {
        return Err(too_short());
    }

    if target.is_empty() {
        return Ok(None);
    }
    Ok(Some(SrvRecord {
        priority,
        weight,
        port,
        target,
    }))
}

/// Expands the (possibly compressed) name at `start`.
///
/// Returns the dotted name and the offset just past the name *at its original
/// position*, i.e. after the first compression pointer if one was followed.
fn read_name(buf: &[u8], start: usize) -> Result<(String, usize), DnsError> {
    let mut labels: Vec<String> = Vec::new();
    let mut pos = start;
    let mut end_of_name: Option<usize> = None;
    let mut hops = 0;
    let mut expanded_len = 0;

    loop {
        require_len(buf, pos, 1)?;
        let len_byte = buf[pos];
        match len_byte & 0xC0 {
            0x00 if len_byte == 0 => {
                pos += 1;
                break;
            }
            0x00 => {
                let len = len_byte as usize;
                require_len(buf, pos + 1, len)?;
                expanded_len += len + 1;
                if expanded_len > MAX_NAME_LEN {
                    return Err(DnsError::NameTooLong { offset: start });
                }
                labels.push(String::from_utf8_lossy(&buf[pos + 1..pos + 1 + len]).into_owned());
                pos += 1 + len;
            }
            0xC0 => {
                let pointer = read_u16(buf, pos)? & 0x3FFF;
                end_of_name.get_or_insert(pos + 2);
                hops += 1;
                if hops > MAX_POINTER_HOPS {
                    return Err(DnsError::PointerLoop { offset: pos });
                }
                pos = pointer as usize;
            }
            _ => {
                return Err(DnsError::InvalidLabel {
                    offset: pos,
                    byte: len_byte,
                })
            }
        }
    }

    Ok((labels.join("."), end_of_name.unwrap_or(pos)))
}

fn require_len(buf: &[u8], offset: usize, needed: usize) -> Result<(), DnsError> {
    let end = offset.saturating_add(needed);
    if end > buf.len() {
        Err(DnsError::InsufficientData {
            needed: end,
            available: buf.len(),
        })
    } else {
        Ok(())
    }
}

fn read_u16(buf: &[u8], offset: usize) -> Result<u16, DnsError> {
    require_len(buf, offset, 2)?;
    Ok(u16::from_be_bytes([buf[offset], buf[offset + 1]]))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
