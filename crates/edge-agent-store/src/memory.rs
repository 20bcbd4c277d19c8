//! In-memory identity store for tests.

use parking_lot::Mutex;

use edge_agent_core::NodeIdentity;

use crate::error::{Result, StoreError};
use crate::IdentityStore;

/// An identity store that keeps the identity in memory.
///
/// Individual operations can be made to fail to exercise the callers'
/// best-effort paths.
#[derive(Debug, Default)]
pub struct MemoryIdentityStore {
    identity: Mutex<Option<NodeIdentity>>,
    fail_load: Mutex<bool>,
    fail_save: Mutex<bool>,
    saves: Mutex<u32>,
    clears: Mutex<u32>,
}

impl MemoryIdentityStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store holding `identity`.
    #[must_use]
    pub fn with_identity(identity: NodeIdentity) -> Self {
        let store = Self::default();
        *store.identity.lock() = Some(identity);
        store
    }

    /// The currently stored identity.
    #[must_use]
    pub fn current(&self) -> Option<NodeIdentity> {
        self.identity.lock().clone()
    }

    /// Make subsequent loads fail.
    pub fn set_fail_load(&self, fail: bool) {
        *self.fail_load.lock() = fail;
    }

    /// Make subsequent saves fail.
    pub fn set_fail_save(&self, fail: bool) {
        *self.fail_save.lock() = fail;
    }

    /// Number of successful saves.
    #[must_use]
    pub fn save_count(&self) -> u32 {
        *self.saves.lock()
    }

    /// Number of clears.
    #[must_use]
    pub fn clear_count(&self) -> u32 {
        *self.clears.lock()
    }
}

fn injected(op: &'static str) -> StoreError {
    StoreError::Io {
        op,
        path: "memory".into(),
        source: std::io::Error::other("injected failure"),
    }
}

impl IdentityStore for MemoryIdentityStore {
    fn load(&self) -> Result<Option<NodeIdentity>> {
        if *self.fail_load.lock() {
            return Err(injected("read"));
        }
        Ok(self.identity.lock().clone())
    }

    fn save(&self, identity: &NodeIdentity) -> Result<()> {
        if *self.fail_save.lock() {
            return Err(injected("write"));
        }
        *self.identity.lock() = Some(identity.clone());
        *self.saves.lock() += 1;
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        *self.identity.lock() = None;
        *self.clears.lock() += 1;
        Ok(())
    }
}
