//! Vector clock and replication clock.
//!
//! Every peer connection is assigned a small-integer [`PeerSlot`]; the
//! [`VersionVector`] holds one tick counter per slot. Stamps are never
//! transmitted — each side derives them from its own clock at receive time
//! and uses them only for local priority comparison.

use std::fmt;

/// A stable small-integer index assigned per connection.
///
/// Slots are recycled through a free list and the backing vector never
/// shrinks, so a live slot's index stays valid for the whole connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerSlot(pub u32);

impl fmt::Display for PeerSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// ── VersionVector ──────────────────────────────────────────────────────────

/// A growable array of per-slot tick counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VersionVector {
    counters: Vec<u64>,
}

impl VersionVector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of slots the vector has grown to.
    pub fn len(&self) -> usize {
        self.counters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }

    /// Counter for `slot`; slots past the end read as zero.
    pub fn get(&self, slot: PeerSlot) -> u64 {
        self.counters.get(slot.0 as usize).copied().unwrap_or(0)
    }

    /// Sets the counter for `slot`, growing the vector as needed.
    pub fn set(&mut self, slot: PeerSlot, tick: u64) {
        let idx = slot.0 as usize;
        if idx >= self.counters.len() {
            self.counters.resize(idx + 1, 0);
        }
        self.counters[idx] = tick;
    }

    /// Increments the counter for `slot` and returns the new value.
    pub fn increment(&mut self, slot: PeerSlot) -> u64 {
        let next = self.get(slot) + 1;
        self.set(slot, next);
        next
    }

    /// The vector-clock join: elementwise maximum.
    ///
    /// Idempotent and commutative; the result dominates both inputs.
    pub fn merge(&mut self, other: &VersionVector) {
        if other.counters.len() > self.counters.len() {
            self.counters.resize(other.counters.len(), 0);
        }
        for (mine, theirs) in self.counters.iter_mut().zip(&other.counters) {
            *mine = (*mine).max(*theirs);
        }
    }

    /// Returns `true` when `self` is strictly ahead of `other` on at least
    /// one slot.
    ///
    /// This is the receive-side tie break: an incoming stamp is applied only
    /// if it is priority over the locally recorded stamp, which rejects a
    /// field's own echoed update and out-of-order duplicates.
    pub fn is_priority_over(&self, other: &VersionVector) -> bool {
        let n = self.counters.len().max(other.counters.len());
        for i in 0..n {
            let slot = PeerSlot(i as u32);
            if self.get(slot) > other.get(slot) {
                return true;
            }
        }
        false
    }
}

impl fmt::Display for VersionVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, c) in self.counters.iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{}", c)?;
        }
        write!(f, "]")
    }
}

// ── ReplicaClock ───────────────────────────────────────────────────────────

/// Owns the local version vector and the peer-slot allocator.
///
/// The local slot's counter advances exactly once per simulation step via
/// [`ReplicaClock::tick`]. Remote counters only move through
/// [`ReplicaClock::observe`].
#[derive(Debug, Clone)]
pub struct ReplicaClock {
    vector: VersionVector,
    local: PeerSlot,
    free: Vec<PeerSlot>,
    next: u32,
}

impl ReplicaClock {
    /// Creates a clock whose local counter lives in slot 0.
    pub fn new() -> Self {
        let mut vector = VersionVector::new();
        let local = PeerSlot(0);
        vector.set(local, 0);
        Self {
            vector,
            local,
            free: Vec::new(),
            next: 1,
        }
    }

    pub fn local_slot(&self) -> PeerSlot {
        self.local
    }

    /// Current tick of the local slot.
    pub fn local_tick(&self) -> u64 {
        self.vector.get(self.local)
    }

    /// Advances the local counter. Call once per simulation step.
    pub fn tick(&mut self) -> u64 {
        self.vector.increment(self.local)
    }

    /// Allocates a slot for a new peer, reusing a freed slot if any.
    pub fn add_peer(&mut self) -> PeerSlot {
        if let Some(slot) = self.free.pop() {
            self.vector.set(slot, 0);
            return slot;
        }
        let slot = PeerSlot(self.next);
        self.next += 1;
        self.vector.set(slot, 0);
        slot
    }

    /// Blanks a peer's slot and queues it for reuse.
    ///
    /// The vector never shrinks, so every other slot's index stays stable.
    pub fn remove_peer(&mut self, slot: PeerSlot) {
        if slot == self.local {
            return;
        }
        self.vector.set(slot, 0);
        self.free.push(slot);
    }

    /// Merges a peer's counters into the local vector.
    pub fn observe(&mut self, other: &VersionVector) {
        self.vector.merge(other);
    }

    pub fn vector(&self) -> &VersionVector {
        &self.vector
    }

    /// Snapshot of the current vector, used to stamp received values.
    pub fn fork(&self) -> VersionVector {
        self.vector.clone()
    }
}

impl Default for ReplicaClock {
    fn default() -> Self {
        Self::new()
    }
}
