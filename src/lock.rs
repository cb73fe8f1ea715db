//! Process-wide lock between launches and cache maintenance
//!
//! Launch selection and update commits take the shared side and may run
//! together. The retention sweep takes the exclusive side so it never deletes
//! a file a selector is about to verify. Every acquisition is bounded.

use crate::error::{BundleCacheError, BundleCacheResult};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};
use tracing::debug;

/// Cloneable handle to the shared cache lock
#[derive(Debug, Clone, Default)]
pub struct CacheLock {
    inner: Arc<RwLock<()>>,
}

impl CacheLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the shared side, used by selection and commits
    pub async fn shared(
        &self,
        purpose: &'static str,
        timeout: Duration,
    ) -> BundleCacheResult<OwnedRwLockReadGuard<()>> {
        let guard = tokio::time::timeout(timeout, self.inner.clone().read_owned())
            .await
            .map_err(|_| timed_out(purpose, timeout))?;
        debug!("Acquired shared cache lock for {}", purpose);
        Ok(guard)
    }

    /// Acquire the exclusive side, used by the sweep
    pub async fn exclusive(
        &self,
        purpose: &'static str,
        timeout: Duration,
    ) -> BundleCacheResult<OwnedRwLockWriteGuard<()>> {
        let guard = tokio::time::timeout(timeout, self.inner.clone().write_owned())
            .await
            .map_err(|_| timed_out(purpose, timeout))?;
        debug!("Acquired exclusive cache lock for {}", purpose);
        Ok(guard)
    }
}

fn timed_out(purpose: &'static str, timeout: Duration) -> BundleCacheError {
    BundleCacheError::LockTimeout {
        purpose,
        waited_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
    }
}
