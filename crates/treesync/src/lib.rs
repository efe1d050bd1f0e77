//! treesync — a state-replication substrate.
//!
//! A tree of typed fields that synchronizes between a host and its peers:
//! dirty-tracking with tick-scheduled interpolation of received values,
//! vector-clock conflict resolution, and both incremental (delta) and
//! full-snapshot serialization. Entities attach their fields to the tree
//! and get network sync for free; the transport that carries the bytes is
//! the caller's concern.
//!
//! The core pieces, leaf-first:
//!
//! - [`clock`]: per-peer-slot tick counters with join/merge and priority
//!   comparison, and the clock that owns them.
//! - [`tree`]: dirty-tick and tick-need propagation over the node arena,
//!   plus attach/detach wiring.
//! - [`field`]: a typed leaf value with previous/target blending and
//!   version-gated delta acceptance.
//! - [`container`]: a named composite node with bitmask delta sync.
//! - [`collection`] and [`set`]: the two replicated container types.
//! - [`codec`]: the four-method serialize contract (delta and full
//!   read/write).

pub mod clock;
pub mod codec;
pub mod collection;
pub mod container;
pub mod error;
pub mod events;
pub mod field;
pub mod set;
pub mod tree;

pub use clock::{PeerSlot, ReplicaClock, VersionVector};
pub use collection::Guid;
pub use error::SyncError;
pub use events::SyncEvent;
pub use field::{FieldConfig, FieldValue};
pub use set::SetValue;
pub use tree::{NodeId, SyncTree, TreeConfig, CLEAN};

/// Returns the crate version at compile time.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
