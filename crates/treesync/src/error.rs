//! Error types for the replication tree.

use thiserror::Error;
use treesync_buffers::BufferError;

/// Errors raised by tree mutation and wire (de)serialization.
///
/// A [`SyncError::Child`] wraps any failure that happened inside a named
/// child during a container read/write. The wrapper is added at every
/// container level, so the chain spells out the full path to the failing
/// field. Read errors are fatal to the session: the wire format is
/// positional and skipping a child would desync every following byte.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Buffer(#[from] BufferError),

    /// The sender's container has a different number of children than ours.
    #[error("delta frame carries {received} children, local container has {local}")]
    ChildCountMismatch { received: usize, local: usize },

    /// A value's variant does not match the field's wire type. Raised on a
    /// local write; accepting it would silently change what every mirror
    /// tree decodes at this position.
    #[error("invalid {kind} payload for this field's wire type")]
    InvalidPayload { kind: &'static str },

    /// Unknown type tag in a set or dictionary frame.
    #[error("unknown wire tag {0:#04x}")]
    UnknownTag(u8),

    /// The node is already parented into another subtree.
    #[error("field '{label}' is already part of another tree")]
    AlreadyAttached { label: String },

    /// Attach/serialize was asked to operate on a node id the tree does
    /// not contain, or on the wrong node kind.
    #[error("node is not a {expected}")]
    WrongKind { expected: &'static str },

    /// A child's parent pointer disagrees with its container. Raised only
    /// when link validation is enabled; indicates internal corruption.
    #[error("tree integrity violation at '{label}': {detail}")]
    Integrity { label: String, detail: String },

    /// Failure inside a named child, annotated and rethrown.
    #[error("in child '{name}': {source}")]
    Child {
        name: String,
        #[source]
        source: Box<SyncError>,
    },
}

impl SyncError {
    /// Wraps an error with the diagnostic name of the child it occurred in.
    pub fn in_child(self, name: &str) -> SyncError {
        SyncError::Child {
            name: name.to_string(),
            source: Box::new(self),
        }
    }
}
