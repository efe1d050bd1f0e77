//! Named field container.
//!
//! A container is a composite tree node holding an ordered list of child
//! nodes. Its delta frame is a child count, one dirty bit per child, then
//! each dirty child's payload in list order. The protocol carries no child
//! identifiers — correspondence is purely positional, so both sides must
//! attach fields in the same order.

use treesync_buffers::{Reader, Writer};

use crate::error::SyncError;
use crate::tree::NodeId;

/// Ordered children of a composite node.
#[derive(Debug, Clone, Default)]
pub struct Container {
    children: Vec<NodeId>,
    /// Diagnostic owner label, reported in warnings.
    owner: Option<String>,
}

impl Container {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    pub fn owner(&self) -> Option<&str> {
        self.owner.as_deref()
    }

    pub fn set_owner(&mut self, owner: &str) {
        self.owner = Some(owner.to_string());
    }

    pub fn contains(&self, child: NodeId) -> bool {
        self.children.contains(&child)
    }

    pub(crate) fn push_child(&mut self, child: NodeId) {
        self.children.push(child);
    }

    pub(crate) fn remove_child(&mut self, child: NodeId) -> bool {
        match self.children.iter().position(|&c| c == child) {
            Some(idx) => {
                self.children.remove(idx);
                true
            }
            None => false,
        }
    }
}

// ── Dirty bitmask ──────────────────────────────────────────────────────────

/// Writes the delta-frame preamble: child count then one bit per child,
/// bit `i` covering child `i` in list order.
pub(crate) fn write_mask(w: &mut Writer, bits: &[bool]) {
    w.vu57(bits.len() as u64);
    let mut byte = 0u8;
    for (i, &bit) in bits.iter().enumerate() {
        if bit {
            byte |= 1 << (i % 8);
        }
        if i % 8 == 7 {
            w.u8(byte);
            byte = 0;
        }
    }
    if bits.len() % 8 != 0 {
        w.u8(byte);
    }
}

/// Reads the preamble back, validating the frame's child count against the
/// local child count. A mismatch means the trees were built differently
/// and every following byte would be misinterpreted.
pub(crate) fn read_mask(r: &mut Reader<'_>, local: usize) -> Result<Vec<bool>, SyncError> {
    let received = r.vu57()? as usize;
    if received != local {
        return Err(SyncError::ChildCountMismatch { received, local });
    }
    let mut bits = vec![false; received];
    for chunk in 0..received.div_ceil(8) {
        let byte = r.u8()?;
        for bit in 0..8 {
            let i = chunk * 8 + bit;
            if i < received {
                bits[i] = byte & (1 << bit) != 0;
            }
        }
    }
    Ok(bits)
}
