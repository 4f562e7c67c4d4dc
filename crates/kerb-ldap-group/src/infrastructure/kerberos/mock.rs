//! Credential provider double that never touches the system Kerberos tools.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use crate::application::ports::{CredentialContext, CredentialError, CredentialProvider};

/// Grants (or refuses) credentials and counts contexts still alive, so tests
/// can check that every ticket cache is released.
pub struct StaticCredentialProvider {
    principal: Option<String>,
    acquired: AtomicUsize,
    live: Arc<AtomicUsize>,
}

impl StaticCredentialProvider {
    pub fn granting(principal: &str) -> Self {
        Self {
            principal: Some(principal.to_string()),
            acquired: AtomicUsize::new(0),
            live: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn refusing() -> Self {
        Self {
            principal: None,
            acquired: AtomicUsize::new(0),
            live: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Number of `acquire` calls, successful or not.
    pub fn acquired(&self) -> usize {
        self.acquired.load(Ordering::SeqCst)
    }

    /// Contexts handed out and not yet dropped.
    pub fn live_contexts(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CredentialProvider for StaticCredentialProvider {
    async fn acquire(
        &self,
        domain: &str,
        _principal: Option<&str>,
    ) -> Result<CredentialContext, CredentialError> {
        let n = self.acquired.fetch_add(1, Ordering::SeqCst);
        let Some(principal) = &self.principal else {
            return Err(CredentialError::NoPrincipal {
                domain: domain.to_string(),
            });
        };

        self.live.fetch_add(1, Ordering::SeqCst);
        let live = Arc::clone(&self.live);
        Ok(CredentialContext::new(
            principal.clone(),
            format!("MEMORY:test_{n}"),
            move || {
                live.fetch_sub(1, Ordering::SeqCst);
            },
        ))
    }
}
