//! Proxy runtime boundary.
//!
//! The proxy engine that terminates and forwards traffic is external to the
//! agent. The agent needs two things from it: a way to add and remove users
//! on one inbound, and access to per-user counters. User management is an
//! explicit capability: [`ProxyRuntime::user_manager`] returns `None` for an
//! inbound that cannot manage users, which the agent reports at startup.
//!
//! [`MemoryProxyRuntime`] is a complete in-process implementation used by the
//! tests and by the binary's standalone mode.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use thiserror::Error;

use edge_agent_core::{CounterKind, UserIdentity};

/// Errors returned by the proxy runtime.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuntimeError {
    /// A user with this identity is already present.
    #[error("user already exists: {0}")]
    UserExists(String),

    /// No user with this identity is present.
    #[error("user not found: {0}")]
    UserNotFound(String),

    /// The runtime refused the operation.
    #[error("rejected: {0}")]
    Rejected(String),
}

/// A user as handed to the proxy runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyUser {
    /// Identity used to address the user and its counters.
    pub identity: UserIdentity,
    /// Credential the client authenticates with.
    pub credential: String,
}

/// An inbound that supports adding and removing users at runtime.
///
/// Implementations must be safe to call concurrently.
pub trait UserManagedProxy: Send + Sync {
    /// Authorize a user.
    ///
    /// # Errors
    ///
    /// Returns an error if the user cannot be added.
    fn add_user(&self, user: ProxyUser) -> Result<(), RuntimeError>;

    /// Revoke a user.
    ///
    /// # Errors
    ///
    /// Returns an error if the user cannot be removed.
    fn remove_user(&self, identity: &UserIdentity) -> Result<(), RuntimeError>;
}

/// Named counters kept by the proxy runtime.
pub trait CounterStore: Send + Sync {
    /// Current value of a counter, `None` if it does not exist.
    fn get_counter(&self, name: &str) -> Option<u64>;

    /// Set a counter back to zero.
    fn reset_counter(&self, name: &str);

    /// Read a counter and reset it if it was non-zero.
    ///
    /// Implementations with atomic counters should override this so traffic
    /// recorded between the read and the reset is not lost.
    fn take_counter(&self, name: &str) -> Option<u64> {
        let value = self.get_counter(name)?;
        if value != 0 {
            self.reset_counter(name);
        }
        Some(value)
    }
}

/// The proxy engine as seen by the agent.
pub trait ProxyRuntime: Send + Sync {
    /// The user-management capability of the inbound with `tag`, if the
    /// inbound exists and supports it.
    fn user_manager(&self, tag: &str) -> Option<Arc<dyn UserManagedProxy>>;

    /// The runtime's counter store.
    fn counters(&self) -> Arc<dyn CounterStore>;
}

/// An inbound of [`MemoryProxyRuntime`].
#[derive(Debug, Default)]
pub struct MemoryInbound {
    users: RwLock<HashMap<UserIdentity, String>>,
    rejected: RwLock<Vec<UserIdentity>>,
}

impl MemoryInbound {
    /// Whether a user with this identity is authorized.
    #[must_use]
    pub fn contains(&self, identity: &UserIdentity) -> bool {
        self.users.read().contains_key(identity)
    }

    /// Credential of an authorized user.
    #[must_use]
    pub fn credential(&self, identity: &UserIdentity) -> Option<String> {
        self.users.read().get(identity).cloned()
    }

    /// Number of authorized users.
    #[must_use]
    pub fn user_count(&self) -> usize {
        self.users.read().len()
    }

    /// All authorized identities, sorted.
    #[must_use]
    pub fn identities(&self) -> Vec<UserIdentity> {
        let mut ids: Vec<_> = self.users.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Make every add or remove of `identity` fail.
    pub fn reject(&self, identity: UserIdentity) {
        self.rejected.write().push(identity);
    }

    fn check_rejected(&self, identity: &UserIdentity) -> Result<(), RuntimeError> {
        if self.rejected.read().contains(identity) {
            return Err(RuntimeError::Rejected(identity.to_string()));
        }
        Ok(())
    }
}

impl UserManagedProxy for MemoryInbound {
    fn add_user(&self, user: ProxyUser) -> Result<(), RuntimeError> {
        self.check_rejected(&user.identity)?;
        let mut users = self.users.write();
        if users.contains_key(&user.identity) {
            return Err(RuntimeError::UserExists(user.identity.to_string()));
        }
        users.insert(user.identity, user.credential);
        Ok(())
    }

    fn remove_user(&self, identity: &UserIdentity) -> Result<(), RuntimeError> {
        self.check_rejected(identity)?;
        self.users
            .write()
            .remove(identity)
            .map(|_| ())
            .ok_or_else(|| RuntimeError::UserNotFound(identity.to_string()))
    }
}

/// Atomic counters of [`MemoryProxyRuntime`].
#[derive(Debug, Default)]
pub struct MemoryCounters {
    counters: RwLock<HashMap<String, AtomicU64>>,
}

impl MemoryCounters {
    /// Add `delta` to a counter, creating it if needed.
    pub fn add(&self, name: &str, delta: u64) {
        if let Some(counter) = self.counters.read().get(name) {
            counter.fetch_add(delta, Ordering::Relaxed);
            return;
        }
        self.counters
            .write()
            .entry(name.to_string())
            .or_default()
            .fetch_add(delta, Ordering::Relaxed);
    }
}

impl CounterStore for MemoryCounters {
    fn get_counter(&self, name: &str) -> Option<u64> {
        self.counters
            .read()
            .get(name)
            .map(|c| c.load(Ordering::Relaxed))
    }

    fn reset_counter(&self, name: &str) {
        if let Some(counter) = self.counters.read().get(name) {
            counter.store(0, Ordering::Relaxed);
        }
    }

    fn take_counter(&self, name: &str) -> Option<u64> {
        self.counters
            .read()
            .get(name)
            .map(|c| c.swap(0, Ordering::Relaxed))
    }
}

/// An in-process proxy runtime holding users and counters in memory.
#[derive(Default)]
pub struct MemoryProxyRuntime {
    inbounds: RwLock<HashMap<String, Option<Arc<MemoryInbound>>>>,
    counters: Arc<MemoryCounters>,
}

impl MemoryProxyRuntime {
    /// Create a runtime with no inbounds.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an inbound that supports user management and return it.
    pub fn add_inbound(&self, tag: impl Into<String>) -> Arc<MemoryInbound> {
        let inbound = Arc::new(MemoryInbound::default());
        self.inbounds
            .write()
            .insert(tag.into(), Some(Arc::clone(&inbound)));
        inbound
    }

    /// Add an inbound without user management.
    pub fn add_static_inbound(&self, tag: impl Into<String>) {
        self.inbounds.write().insert(tag.into(), None);
    }

    /// The inbound with `tag`, if it supports user management.
    #[must_use]
    pub fn inbound(&self, tag: &str) -> Option<Arc<MemoryInbound>> {
        self.inbounds.read().get(tag).cloned().flatten()
    }

    /// The runtime's counters.
    #[must_use]
    pub fn memory_counters(&self) -> &MemoryCounters {
        &self.counters
    }

    /// Record usage for a user.
    pub fn record_traffic(
        &self,
        identity: &UserIdentity,
        upload: u64,
        download: u64,
        requests: u64,
    ) {
        let values = [upload, download, requests];
        for (kind, value) in CounterKind::ALL.into_iter().zip(values) {
            if value > 0 {
                self.counters.add(&identity.counter_name(kind), value);
            }
        }
    }
}

impl ProxyRuntime for MemoryProxyRuntime {
    fn user_manager(&self, tag: &str) -> Option<Arc<dyn UserManagedProxy>> {
        self.inbound(tag)
            .map(|inbound| inbound as Arc<dyn UserManagedProxy>)
    }

    fn counters(&self) -> Arc<dyn CounterStore> {
        Arc::clone(&self.counters) as Arc<dyn CounterStore>
    }
}
