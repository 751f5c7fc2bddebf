use std::sync::Arc;

use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};

/// Token shared by the downloader and everything that must not run during a
/// synchronization pass (feed edits, shutdown).
///
/// The downloader holds the read side for a whole run; editors take the
/// write side.
#[derive(Debug, Clone, Default)]
pub struct UpdateLock {
    inner: Arc<RwLock<()>>,
}

impl UpdateLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) async fn lock_for_update(&self) -> OwnedRwLockReadGuard<()> {
        self.inner.clone().read_owned().await
    }

    /// Waits until no run is active.
    pub async fn lock_for_edit(&self) -> OwnedRwLockWriteGuard<()> {
        self.inner.clone().write_owned().await
    }

    /// `None` while a run is active.
    pub fn try_lock_for_edit(&self) -> Option<OwnedRwLockWriteGuard<()>> {
        self.inner.clone().try_write_owned().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_edit_waits_for_update() {
        let lock = UpdateLock::new();
        let guard = lock.lock_for_update().await;

        assert!(lock.try_lock_for_edit().is_none());
        drop(guard);
        assert!(lock.try_lock_for_edit().is_some());
    }
}
