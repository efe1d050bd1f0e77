//! Delayed-apply replicated set.
//!
//! Local mutations hit the set immediately and queue an outgoing change
//! record; the delta write flushes the whole pending list (no re-diff) and
//! the list clears once the node goes clean. Received changes are stamped
//! with an apply-tick and only take effect once that tick has passed, so
//! set membership becomes visible in step with interpolated fields.

use std::collections::VecDeque;

use indexmap::IndexSet;
use treesync_buffers::{Reader, Writer};

use crate::error::SyncError;

// ── SetValue ───────────────────────────────────────────────────────────────

const TAG_BOOL: u8 = 0;
const TAG_INT: u8 = 1;
const TAG_STR: u8 = 2;
const TAG_ENUM: u8 = 3;

/// Hashable scalar payloads a replicated set can hold.
///
/// Wire form is a 1-byte tag followed by the scalar payload.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SetValue {
    Bool(bool),
    Int(i32),
    Str(String),
    Enum(u32),
}

impl SetValue {
    pub fn encode(&self, w: &mut Writer) {
        match self {
            SetValue::Bool(v) => {
                w.u8(TAG_BOOL);
                w.u8(u8::from(*v));
            }
            SetValue::Int(v) => {
                w.u8(TAG_INT);
                w.i32(*v);
            }
            SetValue::Str(s) => {
                w.u8(TAG_STR);
                w.vu57(s.len() as u64);
                w.utf8(s);
            }
            SetValue::Enum(v) => {
                w.u8(TAG_ENUM);
                w.u32(*v);
            }
        }
    }

    pub fn decode(r: &mut Reader<'_>) -> Result<SetValue, SyncError> {
        Ok(match r.u8()? {
            TAG_BOOL => SetValue::Bool(r.u8()? != 0),
            TAG_INT => SetValue::Int(r.i32()?),
            TAG_STR => {
                let len = r.vu57()? as usize;
                SetValue::Str(r.utf8(len)?.to_string())
            }
            TAG_ENUM => SetValue::Enum(r.u32()?),
            other => return Err(SyncError::UnknownTag(other)),
        })
    }
}

impl From<&str> for SetValue {
    fn from(s: &str) -> Self {
        SetValue::Str(s.to_string())
    }
}

impl From<i32> for SetValue {
    fn from(v: i32) -> Self {
        SetValue::Int(v)
    }
}

// ── ReplicaSet ─────────────────────────────────────────────────────────────

/// One queued mutation: an insertion or a removal of a value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetChange {
    pub removal: bool,
    pub value: SetValue,
}

/// A set change applied on the set itself, reported to the tree so it can
/// fire the matching add/remove event.
pub type AppliedChange = SetChange;

/// A replicated set with instant local mutation and tick-delayed remote
/// application.
#[derive(Debug, Clone, Default)]
pub struct ReplicaSet {
    items: IndexSet<SetValue>,
    outgoing: Vec<SetChange>,
    incoming: VecDeque<(u64, SetChange)>,
    /// Delay incoming changes by the interpolation window.
    pub wait: bool,
    /// Tick window used as the delay when `wait` is set.
    pub window: u32,
}

impl ReplicaSet {
    pub fn new(wait: bool, window: u32) -> Self {
        Self {
            wait,
            window,
            ..Self::default()
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn contains(&self, value: &SetValue) -> bool {
        self.items.contains(value)
    }

    pub fn iter(&self) -> impl Iterator<Item = &SetValue> {
        self.items.iter()
    }

    /// Pending outgoing change records (cleared when the node goes clean).
    pub fn outgoing(&self) -> &[SetChange] {
        &self.outgoing
    }

    /// Whether remote changes are still queued for application.
    pub fn has_pending_incoming(&self) -> bool {
        !self.incoming.is_empty()
    }

    /// Local insert. Returns `true` (and queues a change) if the value was
    /// not already present.
    pub fn insert(&mut self, value: SetValue) -> bool {
        if !self.items.insert(value.clone()) {
            return false;
        }
        self.outgoing.push(SetChange {
            removal: false,
            value,
        });
        true
    }

    /// Local removal. Returns `true` (and queues a change) if present.
    pub fn remove(&mut self, value: &SetValue) -> bool {
        if !self.items.shift_remove(value) {
            return false;
        }
        self.outgoing.push(SetChange {
            removal: true,
            value: value.clone(),
        });
        true
    }

    /// Drops queued outgoing changes. Called when the node goes clean.
    pub fn clear_outgoing(&mut self) {
        self.outgoing.clear();
    }

    /// Drops all replication queues and keeps only the membership. Used on
    /// attach/detach so no stale queue survives a re-wiring.
    pub fn reset_replication_state(&mut self) {
        self.outgoing.clear();
        self.incoming.clear();
    }

    /// Applies every queued incoming change whose apply-tick has arrived,
    /// in arrival order. Returns the changes that actually mutated the set
    /// and whether any remain queued.
    pub fn step(&mut self, now: u64) -> (Vec<AppliedChange>, bool) {
        let mut applied = Vec::new();
        while self.incoming.front().is_some_and(|(due, _)| *due <= now) {
            let Some((_, change)) = self.incoming.pop_front() else {
                break;
            };
            let mutated = if change.removal {
                self.items.shift_remove(&change.value)
            } else {
                self.items.insert(change.value.clone())
            };
            if mutated {
                applied.push(change);
            }
        }
        (applied, !self.incoming.is_empty())
    }

    // ── Serialize contract ─────────────────────────────────────────────────

    /// Delta frame: `[count: vu57] {removal: u8, value}×count`. Flushes the
    /// whole pending list; the caller clears it via the clean path.
    pub fn write_delta(&self, w: &mut Writer) {
        w.vu57(self.outgoing.len() as u64);
        for change in &self.outgoing {
            w.u8(u8::from(change.removal));
            change.value.encode(w);
        }
    }

    /// Reads a delta frame, stamping every change with its apply-tick.
    /// Returns whether anything was queued (the node then needs ticking).
    pub fn read_delta(&mut self, r: &mut Reader<'_>, now: u64) -> Result<bool, SyncError> {
        let count = r.vu57()?;
        let due = now + if self.wait { self.window as u64 } else { 0 };
        for _ in 0..count {
            let removal = r.u8()? != 0;
            let value = SetValue::decode(r)?;
            self.incoming.push_back((due, SetChange { removal, value }));
        }
        Ok(count > 0)
    }

    /// Full frame: `[count: u32] {value}×count`. Plain enumeration.
    pub fn write_full(&self, w: &mut Writer) {
        w.u32(self.items.len() as u32);
        for value in &self.items {
            value.encode(w);
        }
    }

    /// Recreates membership from a full frame, no delay, both queues
    /// dropped. Pending local change records would otherwise flush against
    /// membership the snapshot replaced.
    pub fn read_full(&mut self, r: &mut Reader<'_>) -> Result<(), SyncError> {
        let count = r.u32()?;
        self.items.clear();
        self.incoming.clear();
        self.outgoing.clear();
        for _ in 0..count {
            self.items.insert(SetValue::decode(r)?);
        }
        Ok(())
    }
}
