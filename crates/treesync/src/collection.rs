//! GUID-keyed ordered collection.
//!
//! The collection keeps parallel `guids`/`values` arrays whose order
//! reflects local insertion. The arrays are maintained purely by the
//! add/remove/update notifications of the backing keyed dictionary, so
//! two replicas converge on membership even though their orders may
//! differ. Wire I/O delegates to the dictionary's change-list format.

use std::fmt;

use indexmap::IndexMap;
use rand::Rng;
use treesync_buffers::{Reader, Writer};

use crate::error::SyncError;
use crate::field::FieldValue;

// ── Guid ───────────────────────────────────────────────────────────────────

/// A random 128-bit key identifying one collection entry across peers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Guid(pub u128);

impl Guid {
    pub fn random() -> Self {
        Self(rand::thread_rng().gen())
    }
}

impl fmt::Display for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

// ── Dictionary change records ──────────────────────────────────────────────

const OP_SET: u8 = 0;
const OP_REMOVE: u8 = 1;

/// One queued dictionary mutation.
#[derive(Debug, Clone, PartialEq)]
pub struct DictChange {
    pub guid: Guid,
    /// `Some` sets/updates the entry, `None` removes it.
    pub value: Option<FieldValue>,
}

/// Notification produced while applying a mutation; drives both the
/// parallel arrays and the tree's item events.
#[derive(Debug, Clone, PartialEq)]
pub enum DictEvent {
    Added(Guid, FieldValue),
    Removed(Guid, FieldValue),
    Updated(Guid, FieldValue),
}

// ── GuidCollection ─────────────────────────────────────────────────────────

/// An ordered collection of values keyed by auto-generated GUIDs.
#[derive(Debug, Clone, Default)]
pub struct GuidCollection {
    dict: IndexMap<Guid, FieldValue>,
    guids: Vec<Guid>,
    values: Vec<FieldValue>,
    outgoing: Vec<DictChange>,
}

impl GuidCollection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Entry values in local insertion order.
    pub fn values(&self) -> &[FieldValue] {
        &self.values
    }

    /// Entry keys, parallel to [`GuidCollection::values`].
    pub fn guids(&self) -> &[Guid] {
        &self.guids
    }

    pub fn get(&self, guid: Guid) -> Option<&FieldValue> {
        self.dict.get(&guid)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Guid, &FieldValue)> {
        self.guids.iter().copied().zip(self.values.iter())
    }

    /// Pending outgoing change records (cleared when the node goes clean).
    pub fn outgoing(&self) -> &[DictChange] {
        &self.outgoing
    }

    pub fn clear_outgoing(&mut self) {
        self.outgoing.clear();
    }

    pub fn reset_replication_state(&mut self) {
        self.outgoing.clear();
    }

    /// Routes one dictionary event into the parallel arrays.
    fn on_dict_event(&mut self, event: &DictEvent) {
        match event {
            DictEvent::Added(guid, value) => {
                self.guids.push(*guid);
                self.values.push(value.clone());
            }
            DictEvent::Removed(guid, _) => {
                if let Some(idx) = self.guids.iter().position(|g| g == guid) {
                    self.guids.remove(idx);
                    self.values.remove(idx);
                }
            }
            DictEvent::Updated(guid, value) => {
                if let Some(idx) = self.guids.iter().position(|g| g == guid) {
                    self.values[idx] = value.clone();
                }
            }
        }
    }

    /// Mutates the backing dictionary and reports the resulting event.
    fn apply_to_dict(&mut self, change: &DictChange) -> Option<DictEvent> {
        let event = match &change.value {
            Some(value) => match self.dict.insert(change.guid, value.clone()) {
                None => DictEvent::Added(change.guid, value.clone()),
                Some(_) => DictEvent::Updated(change.guid, value.clone()),
            },
            None => {
                let old = self.dict.shift_remove(&change.guid)?;
                DictEvent::Removed(change.guid, old)
            }
        };
        self.on_dict_event(&event);
        Some(event)
    }

    /// Inserts a value under a freshly generated GUID.
    pub fn add(&mut self, value: FieldValue) -> (Guid, DictEvent) {
        let guid = Guid::random();
        self.dict.insert(guid, value.clone());
        let event = DictEvent::Added(guid, value.clone());
        self.on_dict_event(&event);
        self.outgoing.push(DictChange {
            guid,
            value: Some(value),
        });
        (guid, event)
    }

    /// Updates the value stored under an existing GUID.
    pub fn update(&mut self, guid: Guid, value: FieldValue) -> Option<DictEvent> {
        if !self.dict.contains_key(&guid) {
            return None;
        }
        let change = DictChange {
            guid,
            value: Some(value),
        };
        let event = self.apply_to_dict(&change);
        self.outgoing.push(change);
        event
    }

    /// Removes the first entry equal to `value`. Linear scan; collections
    /// are expected to stay small.
    pub fn remove(&mut self, value: &FieldValue) -> Option<DictEvent> {
        let idx = self.values.iter().position(|v| v == value)?;
        self.remove_guid(self.guids[idx])
    }

    /// Removes the entry under `guid`.
    pub fn remove_guid(&mut self, guid: Guid) -> Option<DictEvent> {
        let change = DictChange { guid, value: None };
        let event = self.apply_to_dict(&change)?;
        self.outgoing.push(change);
        Some(event)
    }

    /// Removes every entry matching the predicate, walking indices in
    /// reverse so removals cannot shift entries still to be visited.
    pub fn remove_where<F>(&mut self, mut pred: F) -> Vec<DictEvent>
    where
        F: FnMut(&FieldValue) -> bool,
    {
        let mut events = Vec::new();
        for idx in (0..self.values.len()).rev() {
            if pred(&self.values[idx]) {
                if let Some(event) = self.remove_guid(self.guids[idx]) {
                    events.push(event);
                }
            }
        }
        events
    }

    // ── Serialize contract (delegated to the backing dictionary) ───────────

    /// Delta frame: `[count: vu57] {op: u8, guid: 16 bytes, value if set}`.
    pub fn write_delta(&self, w: &mut Writer) {
        w.vu57(self.outgoing.len() as u64);
        for change in &self.outgoing {
            match &change.value {
                Some(value) => {
                    w.u8(OP_SET);
                    w.u128(change.guid.0);
                    value.encode_tagged(w);
                }
                None => {
                    w.u8(OP_REMOVE);
                    w.u128(change.guid.0);
                }
            }
        }
    }

    /// Applies a delta frame directly; collection changes are not delayed.
    pub fn read_delta(&mut self, r: &mut Reader<'_>) -> Result<Vec<DictEvent>, SyncError> {
        let count = r.vu57()?;
        let mut events = Vec::new();
        for _ in 0..count {
            let op = r.u8()?;
            let guid = Guid(r.u128()?);
            let change = match op {
                OP_SET => DictChange {
                    guid,
                    value: Some(FieldValue::decode_tagged(r)?),
                },
                OP_REMOVE => DictChange { guid, value: None },
                other => return Err(SyncError::UnknownTag(other)),
            };
            if let Some(event) = self.apply_to_dict(&change) {
                events.push(event);
            }
        }
        Ok(events)
    }

    /// Full frame: `[count: u32] {guid, value}×count`.
    pub fn write_full(&self, w: &mut Writer) {
        w.u32(self.dict.len() as u32);
        for (guid, value) in &self.dict {
            w.u128(guid.0);
            value.encode_tagged(w);
        }
    }

    /// Recreates the dictionary and arrays from a full frame. Pending
    /// outgoing change records are dropped along with the entries they
    /// referred to.
    pub fn read_full(&mut self, r: &mut Reader<'_>) -> Result<(), SyncError> {
        let count = r.u32()?;
        self.dict.clear();
        self.guids.clear();
        self.values.clear();
        self.outgoing.clear();
        for _ in 0..count {
            let guid = Guid(r.u128()?);
            let value = FieldValue::decode_tagged(r)?;
            self.apply_to_dict(&DictChange {
                guid,
                value: Some(value),
            });
        }
        Ok(())
    }
}
