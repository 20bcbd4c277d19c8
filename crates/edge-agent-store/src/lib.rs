//! Crash-safe persistence of the edge node identity.
//!
//! The node identity (register ID, node ID, hostname) survives restarts so a
//! simple process restart can re-verify and reuse its registration instead of
//! registering again.
//!
//! # Example
//!
//! ```no_run
//! use edge_agent_store::{FileIdentityStore, IdentityStore};
//!
//! let store = FileIdentityStore::new("/var/lib/edge-agent");
//! match store.load().unwrap() {
//!     Some(identity) => println!("registered as {}", identity.register_id),
//!     None => println!("no identity yet"),
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod file;
#[cfg(any(test, feature = "test-utils"))]
pub mod memory;

pub use error::{Result, StoreError};
pub use file::{FileIdentityStore, DEFAULT_DATA_DIR, STATE_FILE_NAME};
#[cfg(any(test, feature = "test-utils"))]
pub use memory::MemoryIdentityStore;

use edge_agent_core::NodeIdentity;

/// Storage for the single active node identity.
///
/// Failures are reported to the caller, which decides the policy: a failed
/// load is usually treated as "no identity", a failed save is logged and
/// startup proceeds.
pub trait IdentityStore: Send + Sync {
    /// Load the persisted identity.
    ///
    /// Returns `Ok(None)` when no identity has been saved.
    ///
    /// # Errors
    ///
    /// Returns an error if the identity exists but cannot be read or decoded.
    fn load(&self) -> Result<Option<NodeIdentity>>;

    /// Persist `identity`, replacing any previous one.
    ///
    /// A crash during the save leaves either the old or the new identity in
    /// place, never a partial one.
    ///
    /// # Errors
    ///
    /// Returns an error if the identity cannot be written.
    fn save(&self, identity: &NodeIdentity) -> Result<()>;

    /// Remove the persisted identity. Clearing an absent identity succeeds.
    ///
    /// # Errors
    ///
    /// Returns an error if the identity exists but cannot be removed.
    fn clear(&self) -> Result<()>;
}
