//! DNS wire codec for SRV discovery and the transaction-id sequence.

pub mod dns;
pub mod query_id;

pub use dns::{decode_srv_response, encode_srv_query, DnsError, SrvRecord};
pub use query_id::QueryIdSequence;
