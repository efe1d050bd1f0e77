//! Change notifications.
//!
//! Observers are an explicit list registered on the tree and are invoked
//! synchronously, inside the mutating call, once its internal borrows are
//! released. Field events fire at three points: a local set, a change of
//! the interpolation target, and the moment a received value becomes fully
//! visible.

use crate::collection::Guid;
use crate::field::FieldValue;
use crate::set::SetValue;
use crate::tree::NodeId;

/// A single replication-visible change.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// A field was written locally.
    LocalSet { node: NodeId, value: FieldValue },
    /// A field accepted a remote value as its new interpolation target.
    TargetChanged { node: NodeId, value: FieldValue },
    /// A received value finished blending and is now fully rendered.
    Visible { node: NodeId, value: FieldValue },
    /// A value entered a replicated set.
    SetAdded { node: NodeId, value: SetValue },
    /// A value left a replicated set.
    SetRemoved { node: NodeId, value: SetValue },
    /// An entry appeared in an ordered collection.
    ItemAdded { node: NodeId, guid: Guid, value: FieldValue },
    /// An entry left an ordered collection.
    ItemRemoved { node: NodeId, guid: Guid, value: FieldValue },
    /// An existing collection entry's value changed.
    ItemUpdated { node: NodeId, guid: Guid, value: FieldValue },
}

/// Observer callback type.
pub type Observer = Box<dyn FnMut(&SyncEvent)>;
