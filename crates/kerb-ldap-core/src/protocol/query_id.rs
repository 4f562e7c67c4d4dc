//! Transaction ids for outgoing DNS queries.
//!
//! # Why DNS queries carry an id (for beginners)
//!
//! DNS over UDP has no connection.  A resolver sends a datagram and waits for
//! *a* datagram to come back, which may be a late answer to an earlier query
//! or a spoofed packet.  Each query therefore carries a 16-bit transaction id
//! that the server copies into its response; answers whose id does not match
//! the outstanding query are discarded.
//!
//! Ids are drawn from a counter that starts at a caller-supplied seed (for
//! example derived from the clock and process id), so two helper processes
//! started together do not walk the same sequence.

use std::sync::atomic::{AtomicU16, Ordering};

/// A thread-safe, wrapping source of DNS transaction ids.
///
/// # Examples
///
/// ```rust
/// use kerb_ldap_core::protocol::QueryIdSequence;
///
/// let ids = QueryIdSequence::starting_at(u16::MAX);
/// assert_eq!(ids.next(), u16::MAX);
/// assert_eq!(ids.next(), 0);
/// ```
#[derive(Debug)]
pub struct QueryIdSequence {
    inner: AtomicU16,
}

impl QueryIdSequence {
    pub fn starting_at(seed: u16) -> Self {
        Self {
            inner: AtomicU16::new(seed),
        }
    }

    /// Returns the next id.  Wraps from `u16::MAX` to 0.
    pub fn next(&self) -> u16 {
        // `fetch_add` wraps on overflow for atomics.
        self.inner.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for QueryIdSequence {
    fn default() -> Self {
        Self::starting_at(0)
    }
}
