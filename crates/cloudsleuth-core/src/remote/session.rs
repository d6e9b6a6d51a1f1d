//! Authenticated session over a [`RemoteStore`] with one-shot token refresh.

use std::sync::Arc;

use tracing::{debug, warn};

use super::RemoteStore;
use crate::error::RemoteError;

/// Obtains a fresh access token for the store.
///
/// Credential exchange lives outside the crate; implementations typically
/// re-run an OAuth refresh and swap the token inside the store.
pub trait TokenRefresher: Send + Sync {
    fn refresh(&self) -> Result<(), RemoteError>;
}

/// Refresher for stores whose credentials never expire.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopRefresher;

impl TokenRefresher for NoopRefresher {
    fn refresh(&self) -> Result<(), RemoteError> {
        Ok(())
    }
}

/// Shared handle used by the crawler and the inspection workers.
#[derive(Clone)]
pub struct Session {
    store: Arc<dyn RemoteStore>,
    refresher: Arc<dyn TokenRefresher>,
}

impl Session {
    pub fn new(store: Arc<dyn RemoteStore>, refresher: Arc<dyn TokenRefresher>) -> Self {
        Self { store, refresher }
    }

    /// Session whose credentials are never refreshed.
    pub fn without_refresh(store: Arc<dyn RemoteStore>) -> Self {
        Self::new(store, Arc::new(NoopRefresher))
    }

    /// Run `op` against the store. On [`RemoteError::AuthExpired`] the token
    /// is refreshed and `op` is retried exactly once.
    pub fn call<T>(
        &self,
        what: &str,
        mut op: impl FnMut(&dyn RemoteStore) -> Result<T, RemoteError>,
    ) -> Result<T, RemoteError> {
        match op(self.store.as_ref()) {
            Err(RemoteError::AuthExpired) => {
                warn!("Authorization expired during {what}; refreshing token");
                self.refresher.refresh()?;
                debug!("Token refreshed; retrying {what}");
                op(self.store.as_ref())
            }
            other => other,
        }
    }

    pub fn store(&self) -> &dyn RemoteStore {
        self.store.as_ref()
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session").finish_non_exhaustive()
    }
}
