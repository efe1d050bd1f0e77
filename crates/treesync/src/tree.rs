//! The replication tree: dirty-tick and tick-need propagation over a
//! parent-linked tree of typed nodes.
//!
//! Nodes live in a central index owned by the tree and are addressed by
//! [`NodeId`] handles; parent links are plain ids used for navigation only,
//! so the tree owns its nodes top-down and no reference cycles exist.
//!
//! Dirty tracking: a node's `dirty_tick` records the simulation tick at
//! which an unsent change became eligible to send, with `CLEAN`
//! (`u64::MAX`) as the sentinel for "nothing pending". Lowering a node's
//! dirty tick lowers every ancestor's, so a parent is dirty exactly when
//! at least one descendant is. Raising propagates to descendants, which is
//! how a whole subtree is force-cleaned after a send.

use std::fmt;
use std::mem;

use tracing::warn;

use crate::clock::{PeerSlot, ReplicaClock, VersionVector};
use crate::collection::{DictEvent, GuidCollection};
use crate::container::Container;
use crate::error::SyncError;
use crate::events::{Observer, SyncEvent};
use crate::field::{Field, FieldConfig, FieldValue};
use crate::set::{ReplicaSet, SetValue};

/// Sentinel dirty tick meaning "clean".
pub const CLEAN: u64 = u64::MAX;

/// Handle to a node in a [`SyncTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub(crate) u32);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// Tree-wide configuration, passed at construction instead of living in a
/// process-global flag.
#[derive(Debug, Clone, Copy)]
pub struct TreeConfig {
    /// Check parent/child link integrity on attach and before serialization.
    pub validate: bool,
    /// Default minimum tick spacing between two sends of the same node.
    pub default_rate_limit: u64,
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            validate: false,
            default_rate_limit: 0,
        }
    }
}

// ── Node ───────────────────────────────────────────────────────────────────

/// Replication bookkeeping common to every node kind.
#[derive(Debug, Clone)]
pub(crate) struct NodeState {
    pub label: String,
    pub parent: Option<NodeId>,
    /// Wired to the tree root (and therefore to the clock).
    pub attached: bool,
    pub dirty_tick: u64,
    /// Rate limiter: the earliest tick at which the node may go dirty again.
    pub min_next_dirty_time: u64,
    pub rate_limit: u64,
    /// Clock snapshot taken when the node last went dirty.
    pub change_version: Option<VersionVector>,
    pub needs_tick: bool,
    pub child_needs_tick: bool,
}

impl NodeState {
    fn new(rate_limit: u64) -> Self {
        Self {
            label: String::new(),
            parent: None,
            attached: false,
            dirty_tick: CLEAN,
            min_next_dirty_time: 0,
            rate_limit,
            change_version: None,
            needs_tick: false,
            child_needs_tick: false,
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) enum NodeKind {
    Container(Container),
    Field(Field),
    Collection(GuidCollection),
    Set(ReplicaSet),
}

#[derive(Debug, Clone)]
pub(crate) struct Node {
    pub state: NodeState,
    pub kind: NodeKind,
}

/// Discriminant used by the codec to dispatch without borrowing the node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum NodeTag {
    Container,
    Field,
    Set,
    Collection,
}

// ── SyncTree ───────────────────────────────────────────────────────────────

/// A tree of replicated fields sharing one clock.
///
/// Single-threaded and step-driven: one [`SyncTree::step`] per simulation
/// tick, from one thread. No internal locking.
pub struct SyncTree {
    nodes: Vec<Node>,
    root: NodeId,
    clock: ReplicaClock,
    config: TreeConfig,
    observers: Vec<Observer>,
    pending: Vec<SyncEvent>,
}

impl SyncTree {
    /// Creates a tree whose root is an empty container.
    pub fn new(config: TreeConfig) -> Self {
        let mut root_state = NodeState::new(config.default_rate_limit);
        root_state.attached = true;
        root_state.label = "root".to_string();
        Self {
            nodes: vec![Node {
                state: root_state,
                kind: NodeKind::Container(Container::new()),
            }],
            root: NodeId(0),
            clock: ReplicaClock::new(),
            config,
            observers: Vec::new(),
            pending: Vec::new(),
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn config(&self) -> TreeConfig {
        self.config
    }

    pub fn clock(&self) -> &ReplicaClock {
        &self.clock
    }

    /// Allocates a clock slot for a newly connected peer.
    pub fn add_peer(&mut self) -> PeerSlot {
        self.clock.add_peer()
    }

    /// Releases a disconnected peer's clock slot for reuse.
    pub fn remove_peer(&mut self, slot: PeerSlot) {
        self.clock.remove_peer(slot);
    }

    /// Merges a peer's counters into the local clock; typically called by
    /// the session layer when a frame arrives, before reading it.
    pub fn observe_clock(&mut self, remote: &VersionVector) {
        self.clock.observe(remote);
    }

    /// Registers a change observer.
    pub fn observe(&mut self, observer: impl FnMut(&SyncEvent) + 'static) {
        self.observers.push(Box::new(observer));
    }

    // ── Node construction (detached and clean) ─────────────────────────────

    fn alloc(&mut self, kind: NodeKind) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(Node {
            state: NodeState::new(self.config.default_rate_limit),
            kind,
        });
        id
    }

    /// Creates a detached container.
    pub fn container(&mut self) -> NodeId {
        self.alloc(NodeKind::Container(Container::new()))
    }

    /// Creates a detached interpolating field holding `initial`.
    pub fn field(&mut self, initial: FieldValue, config: FieldConfig) -> NodeId {
        self.alloc(NodeKind::Field(Field::new(initial, config)))
    }

    /// Creates a detached GUID-keyed collection.
    pub fn collection(&mut self) -> NodeId {
        self.alloc(NodeKind::Collection(GuidCollection::new()))
    }

    /// Creates a detached replicated set. `window > 0` delays incoming
    /// changes by that many ticks.
    pub fn replica_set(&mut self, window: u32) -> NodeId {
        self.alloc(NodeKind::Set(ReplicaSet::new(window > 0, window)))
    }

    // ── Access helpers ─────────────────────────────────────────────────────

    pub(crate) fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0 as usize]
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.0 as usize]
    }

    pub(crate) fn tag(&self, id: NodeId) -> NodeTag {
        match &self.node(id).kind {
            NodeKind::Container(_) => NodeTag::Container,
            NodeKind::Field(_) => NodeTag::Field,
            NodeKind::Set(_) => NodeTag::Set,
            NodeKind::Collection(_) => NodeTag::Collection,
        }
    }

    pub(crate) fn container_ref(&self, id: NodeId) -> Result<&Container, SyncError> {
        match &self.node(id).kind {
            NodeKind::Container(c) => Ok(c),
            _ => Err(SyncError::WrongKind {
                expected: "container",
            }),
        }
    }

    pub(crate) fn container_mut(&mut self, id: NodeId) -> Result<&mut Container, SyncError> {
        match &mut self.node_mut(id).kind {
            NodeKind::Container(c) => Ok(c),
            _ => Err(SyncError::WrongKind {
                expected: "container",
            }),
        }
    }

    pub(crate) fn field_ref(&self, id: NodeId) -> Result<&Field, SyncError> {
        match &self.node(id).kind {
            NodeKind::Field(f) => Ok(f),
            _ => Err(SyncError::WrongKind { expected: "field" }),
        }
    }

    pub(crate) fn field_mut(&mut self, id: NodeId) -> Result<&mut Field, SyncError> {
        match &mut self.node_mut(id).kind {
            NodeKind::Field(f) => Ok(f),
            _ => Err(SyncError::WrongKind { expected: "field" }),
        }
    }

    pub(crate) fn set_ref(&self, id: NodeId) -> Result<&ReplicaSet, SyncError> {
        match &self.node(id).kind {
            NodeKind::Set(s) => Ok(s),
            _ => Err(SyncError::WrongKind { expected: "set" }),
        }
    }

    pub(crate) fn set_mut(&mut self, id: NodeId) -> Result<&mut ReplicaSet, SyncError> {
        match &mut self.node_mut(id).kind {
            NodeKind::Set(s) => Ok(s),
            _ => Err(SyncError::WrongKind { expected: "set" }),
        }
    }

    pub(crate) fn collection_ref(&self, id: NodeId) -> Result<&GuidCollection, SyncError> {
        match &self.node(id).kind {
            NodeKind::Collection(c) => Ok(c),
            _ => Err(SyncError::WrongKind {
                expected: "collection",
            }),
        }
    }

    pub(crate) fn collection_mut(&mut self, id: NodeId) -> Result<&mut GuidCollection, SyncError> {
        match &mut self.node_mut(id).kind {
            NodeKind::Collection(c) => Ok(c),
            _ => Err(SyncError::WrongKind {
                expected: "collection",
            }),
        }
    }

    pub(crate) fn children_of(&self, id: NodeId) -> Vec<NodeId> {
        match &self.node(id).kind {
            NodeKind::Container(c) => c.children().to_vec(),
            _ => Vec::new(),
        }
    }

    pub fn label(&self, id: NodeId) -> &str {
        &self.node(id).state.label
    }

    pub fn is_attached(&self, id: NodeId) -> bool {
        self.node(id).state.attached
    }

    pub fn is_dirty(&self, id: NodeId) -> bool {
        self.node(id).state.dirty_tick != CLEAN
    }

    /// Whether the node's pending change is eligible to send at `now`.
    pub(crate) fn is_send_eligible(&self, id: NodeId, now: u64) -> bool {
        self.node(id).state.dirty_tick <= now
    }

    /// Overrides the per-node send rate limit.
    pub fn set_rate_limit(&mut self, id: NodeId, ticks: u64) {
        self.node_mut(id).state.rate_limit = ticks;
    }

    // ── Attach / detach ────────────────────────────────────────────────────

    /// Labels a container with its owning entity for diagnostics.
    pub fn set_owner(&mut self, id: NodeId, owner: &str) -> Result<(), SyncError> {
        self.container_mut(id)?.set_owner(owner);
        Ok(())
    }

    /// Attaches `child` under `parent` with a diagnostic label.
    ///
    /// Fails fast, mutating neither tree side, if the child already belongs
    /// to another parent. Attaching force-cleans the child subtree: no
    /// dirty state, versions, or replication queues carry across a
    /// re-wiring.
    pub fn add_field(&mut self, parent: NodeId, child: NodeId, label: &str) -> Result<(), SyncError> {
        if self.node(child).state.parent.is_some() {
            return Err(SyncError::AlreadyAttached {
                label: label.to_string(),
            });
        }
        {
            let container = self.container_ref(parent)?;
            if container.owner().is_none() {
                warn!(label, "container owner not set before fields were added");
            }
        }
        if self
            .children_of(parent)
            .iter()
            .any(|&c| self.node(c).state.label == label)
        {
            warn!(label, "duplicate field label in container");
        }

        let parent_attached = self.node(parent).state.attached;
        self.container_mut(parent)?.push_child(child);
        {
            let state = &mut self.node_mut(child).state;
            state.parent = Some(parent);
            state.label = label.to_string();
        }
        self.wire(child, parent_attached);
        if self.config.validate {
            self.validate_links(parent)?;
        }
        Ok(())
    }

    /// Detaches `child` from its parent, force-cleaning its subtree.
    pub fn detach(&mut self, child: NodeId) -> Result<(), SyncError> {
        let Some(parent) = self.node(child).state.parent else {
            return Ok(());
        };
        self.container_mut(parent)?.remove_child(child);
        self.node_mut(child).state.parent = None;
        self.wire(child, false);
        // A dirty subtree that left the tree no longer counts against its
        // former ancestors.
        self.refresh_ancestors(Some(parent));
        Ok(())
    }

    /// Rewires the attached flag transitively and resets replication state.
    fn wire(&mut self, id: NodeId, attached: bool) {
        {
            let node = self.node_mut(id);
            node.state.attached = attached;
            node.state.dirty_tick = CLEAN;
            node.state.min_next_dirty_time = 0;
            node.state.change_version = None;
            node.state.needs_tick = false;
            node.state.child_needs_tick = false;
            match &mut node.kind {
                NodeKind::Field(f) => f.reset_replication_state(),
                NodeKind::Set(s) => s.reset_replication_state(),
                NodeKind::Collection(c) => c.reset_replication_state(),
                NodeKind::Container(_) => {}
            }
        }
        for child in self.children_of(id) {
            self.wire(child, attached);
        }
    }

    /// Checks that every child's parent pointer agrees with its container.
    /// A failure is a fatal integrity error when validation is enabled.
    pub fn validate_links(&self, id: NodeId) -> Result<(), SyncError> {
        if !self.config.validate {
            return Ok(());
        }
        for child in self.children_of(id) {
            if self.node(child).state.parent != Some(id) {
                return Err(SyncError::Integrity {
                    label: self.node(child).state.label.clone(),
                    detail: "child parent pointer does not match container".to_string(),
                });
            }
            self.validate_links(child)?;
        }
        Ok(())
    }

    // ── Dirty propagation ──────────────────────────────────────────────────

    /// Stamps the node dirty at the current local tick (0 when detached).
    pub fn mark_dirty(&mut self, id: NodeId) {
        let tick = if self.node(id).state.attached {
            self.clock.local_tick()
        } else {
            0
        };
        self.set_dirty_sooner(id, tick);
    }

    /// Lowers the node's dirty tick toward `tick`, clamped by the rate
    /// limiter, and pushes the lowering up the ancestor chain.
    pub fn set_dirty_sooner(&mut self, id: NodeId, tick: u64) {
        let stamp = if self.node(id).state.attached {
            Some(self.clock.fork())
        } else {
            None
        };
        let (lowered, parent) = {
            let state = &mut self.node_mut(id).state;
            let clamped = tick.max(state.min_next_dirty_time);
            if clamped < state.dirty_tick {
                state.dirty_tick = clamped;
                state.change_version = stamp;
                (Some(clamped), state.parent)
            } else {
                (None, None)
            }
        };
        if let (Some(t), Some(p)) = (lowered, parent) {
            self.set_dirty_sooner(p, t);
        }
    }

    /// Raises the node's dirty tick to `tick` and forward-propagates the
    /// raise to every descendant. Raising to [`CLEAN`] resets the rate
    /// limiter and drops pending outgoing queues.
    pub fn set_dirty_later(&mut self, id: NodeId, tick: u64) {
        let raised = {
            let node = self.node_mut(id);
            if tick > node.state.dirty_tick {
                node.state.dirty_tick = tick;
                if tick == CLEAN {
                    node.state.min_next_dirty_time = 0;
                    match &mut node.kind {
                        NodeKind::Set(s) => s.clear_outgoing(),
                        NodeKind::Collection(c) => c.clear_outgoing(),
                        _ => {}
                    }
                }
                true
            } else {
                false
            }
        };
        if raised {
            for child in self.children_of(id) {
                self.set_dirty_later(child, tick);
            }
        }
    }

    /// Force-cleans the node and its whole subtree, then recomputes each
    /// ancestor so a parent whose last dirty child was cleaned reports
    /// clean again.
    pub fn mark_clean(&mut self, id: NodeId) {
        self.set_dirty_later(id, CLEAN);
        self.refresh_ancestors(self.node(id).state.parent);
    }

    /// Recomputes dirty ticks up the chain starting at `from`.
    fn refresh_ancestors(&mut self, from: Option<NodeId>) {
        let mut cursor = from;
        while let Some(p) = cursor {
            self.refresh_dirty_from_children(p);
            cursor = self.node(p).state.parent;
        }
    }

    /// Raises the written child's earliest next dirty time; called on the
    /// send path after a delta flush.
    pub(crate) fn apply_rate_limit(&mut self, id: NodeId, now: u64) {
        let state = &mut self.node_mut(id).state;
        if state.rate_limit > 0 {
            state.min_next_dirty_time = now + state.rate_limit;
        }
    }

    /// Recomputes a container's dirty tick as the minimum of its children's
    /// after a partial flush.
    pub(crate) fn refresh_dirty_from_children(&mut self, id: NodeId) {
        let min = self
            .children_of(id)
            .iter()
            .map(|&c| self.node(c).state.dirty_tick)
            .min()
            .unwrap_or(CLEAN);
        let state = &mut self.node_mut(id).state;
        state.dirty_tick = min;
        if min == CLEAN {
            state.min_next_dirty_time = 0;
        }
    }

    // ── Tick scheduling ────────────────────────────────────────────────────

    /// Flags the node as needing per-step work and walks `child_needs_tick`
    /// up the ancestor chain.
    pub(crate) fn request_tick(&mut self, id: NodeId) {
        self.node_mut(id).state.needs_tick = true;
        let mut cursor = self.node(id).state.parent;
        while let Some(p) = cursor {
            let state = &mut self.node_mut(p).state;
            if state.child_needs_tick {
                break;
            }
            state.child_needs_tick = true;
            cursor = state.parent;
        }
    }

    /// Runs one tick over the subtree rooted at `id`.
    ///
    /// Returns whether further ticking is required; a fully quiescent
    /// subtree stops being visited.
    pub fn tick(&mut self, id: NodeId) -> bool {
        let mut more = false;
        if self.node(id).state.needs_tick {
            let still = self.step_node(id);
            self.node_mut(id).state.needs_tick = still;
            more |= still;
        }
        if self.node(id).state.child_needs_tick {
            self.node_mut(id).state.child_needs_tick = false;
            let mut child_more = false;
            for child in self.children_of(id) {
                let state = &self.node(child).state;
                if state.needs_tick || state.child_needs_tick {
                    child_more |= self.tick(child);
                }
            }
            self.node_mut(id).state.child_needs_tick = child_more;
            more |= child_more;
        }
        more
    }

    /// One simulation step: advances the clock once, ticks the whole tree,
    /// dispatches events. Returns whether more ticking is pending.
    pub fn step(&mut self) -> bool {
        self.clock.tick();
        let more = self.tick(self.root);
        self.dispatch();
        more
    }

    /// Kind-specific per-step work. Returns whether the node still needs
    /// ticking.
    fn step_node(&mut self, id: NodeId) -> bool {
        let now = self.clock.local_tick();
        match self.tag(id) {
            NodeTag::Field => {
                let Ok(field) = self.field_mut(id) else {
                    return false;
                };
                let (still, visible) = field.step(now);
                if let Some(value) = visible {
                    self.pending.push(SyncEvent::Visible { node: id, value });
                }
                still
            }
            NodeTag::Set => {
                let Ok(set) = self.set_mut(id) else {
                    return false;
                };
                let (applied, more) = set.step(now);
                for change in applied {
                    self.pending.push(if change.removal {
                        SyncEvent::SetRemoved {
                            node: id,
                            value: change.value,
                        }
                    } else {
                        SyncEvent::SetAdded {
                            node: id,
                            value: change.value,
                        }
                    });
                }
                more
            }
            NodeTag::Container | NodeTag::Collection => false,
        }
    }

    // ── Field operations ───────────────────────────────────────────────────

    /// Current rendered value of a field.
    pub fn value(&self, id: NodeId) -> Result<&FieldValue, SyncError> {
        Ok(self.field_ref(id)?.value())
    }

    /// Current interpolation target of a field.
    pub fn target(&self, id: NodeId) -> Result<&FieldValue, SyncError> {
        Ok(self.field_ref(id)?.target())
    }

    /// Local write.
    ///
    /// The value's variant must match the field's wire type; a mismatch is
    /// rejected with nothing written, since the positional protocol would
    /// otherwise mangle every mirror tree. When the field is already dirty
    /// and nobody observes the tree, this is a raw overwrite; otherwise a
    /// clean set that fires the local-set event and marks the field dirty.
    pub fn set_value(&mut self, id: NodeId, value: FieldValue) -> Result<(), SyncError> {
        {
            let field = self.field_ref(id)?;
            if value.kind() != field.value().kind() {
                return Err(SyncError::InvalidPayload { kind: value.kind() });
            }
        }
        let already_dirty = self.is_dirty(id);
        let observed = !self.observers.is_empty();
        let stamp = self.clock.fork();
        if already_dirty && !observed {
            let field = self.field_mut(id)?;
            field.raw_set(value);
            field.merge_version(&stamp);
            return Ok(());
        }
        let field = self.field_mut(id)?;
        let value = field.local_set(value)?;
        field.merge_version(&stamp);
        self.pending.push(SyncEvent::LocalSet { node: id, value });
        self.mark_dirty(id);
        self.dispatch();
        Ok(())
    }

    /// Cancels a field's in-flight interpolation, snapping to its target.
    pub fn cancel_interpolation(&mut self, id: NodeId) -> Result<(), SyncError> {
        self.field_mut(id)?.cancel_interpolation();
        self.node_mut(id).state.needs_tick = false;
        Ok(())
    }

    /// Applies a remotely received field value.
    ///
    /// The stamp is derived from the local clock with the local slot
    /// zeroed: only counters learned from peers (via
    /// [`SyncTree::observe_clock`]) can grant an incoming value priority,
    /// so echoes and duplicates that carry nothing new are rejected.
    pub(crate) fn apply_remote_value(
        &mut self,
        id: NodeId,
        value: FieldValue,
        now: u64,
    ) -> Result<(), SyncError> {
        let mut stamp = self.clock.fork();
        stamp.set(self.clock.local_slot(), 0);
        let outcome = self.field_mut(id)?.remote_set(value, &stamp, now);
        match outcome {
            crate::field::RemoteWrite::Rejected => {}
            crate::field::RemoteWrite::Snapped(value) => {
                self.pending.push(SyncEvent::TargetChanged {
                    node: id,
                    value: value.clone(),
                });
                self.pending.push(SyncEvent::Visible { node: id, value });
            }
            crate::field::RemoteWrite::Blending(value) => {
                self.pending.push(SyncEvent::TargetChanged { node: id, value });
                self.request_tick(id);
            }
        }
        Ok(())
    }

    /// Applies a full-snapshot value: no blending, version merged
    /// wholesale, any in-flight interpolation cancelled.
    pub(crate) fn apply_snapshot_value(
        &mut self,
        id: NodeId,
        value: FieldValue,
    ) -> Result<(), SyncError> {
        let stamp = self.clock.fork();
        let value = self.field_mut(id)?.snapshot_set(value, &stamp);
        self.node_mut(id).state.needs_tick = false;
        self.pending.push(SyncEvent::Visible { node: id, value });
        Ok(())
    }

    // ── Set operations ─────────────────────────────────────────────────────

    /// Inserts into a replicated set: local membership changes immediately,
    /// a change record is queued, the node goes dirty.
    pub fn set_insert(&mut self, id: NodeId, value: SetValue) -> Result<bool, SyncError> {
        let inserted = self.set_mut(id)?.insert(value.clone());
        if inserted {
            self.pending.push(SyncEvent::SetAdded { node: id, value });
            self.mark_dirty(id);
            self.dispatch();
        }
        Ok(inserted)
    }

    /// Removes from a replicated set.
    pub fn set_remove(&mut self, id: NodeId, value: &SetValue) -> Result<bool, SyncError> {
        let removed = self.set_mut(id)?.remove(value);
        if removed {
            self.pending.push(SyncEvent::SetRemoved {
                node: id,
                value: value.clone(),
            });
            self.mark_dirty(id);
            self.dispatch();
        }
        Ok(removed)
    }

    pub fn set_contains(&self, id: NodeId, value: &SetValue) -> Result<bool, SyncError> {
        Ok(self.set_ref(id)?.contains(value))
    }

    pub fn set_len(&self, id: NodeId) -> Result<usize, SyncError> {
        Ok(self.set_ref(id)?.len())
    }

    // ── Collection operations ──────────────────────────────────────────────

    /// Adds a value under a fresh GUID.
    pub fn collection_add(
        &mut self,
        id: NodeId,
        value: FieldValue,
    ) -> Result<crate::collection::Guid, SyncError> {
        let (guid, event) = self.collection_mut(id)?.add(value);
        self.push_dict_event(id, event);
        self.mark_dirty(id);
        self.dispatch();
        Ok(guid)
    }

    /// Updates the value under an existing GUID.
    pub fn collection_update(
        &mut self,
        id: NodeId,
        guid: crate::collection::Guid,
        value: FieldValue,
    ) -> Result<bool, SyncError> {
        match self.collection_mut(id)?.update(guid, value) {
            Some(event) => {
                self.push_dict_event(id, event);
                self.mark_dirty(id);
                self.dispatch();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Removes the first entry equal to `value`.
    pub fn collection_remove(&mut self, id: NodeId, value: &FieldValue) -> Result<bool, SyncError> {
        match self.collection_mut(id)?.remove(value) {
            Some(event) => {
                self.push_dict_event(id, event);
                self.mark_dirty(id);
                self.dispatch();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Removes every entry matching the predicate.
    pub fn collection_remove_where(
        &mut self,
        id: NodeId,
        pred: impl FnMut(&FieldValue) -> bool,
    ) -> Result<usize, SyncError> {
        let events = self.collection_mut(id)?.remove_where(pred);
        let count = events.len();
        for event in events {
            self.push_dict_event(id, event);
        }
        if count > 0 {
            self.mark_dirty(id);
            self.dispatch();
        }
        Ok(count)
    }

    pub fn collection_len(&self, id: NodeId) -> Result<usize, SyncError> {
        Ok(self.collection_ref(id)?.len())
    }

    /// Entry values of a collection, in local insertion order.
    pub fn collection_values(&self, id: NodeId) -> Result<&[FieldValue], SyncError> {
        Ok(self.collection_ref(id)?.values())
    }

    pub fn collection_get(
        &self,
        id: NodeId,
        guid: crate::collection::Guid,
    ) -> Result<Option<&FieldValue>, SyncError> {
        Ok(self.collection_ref(id)?.get(guid))
    }

    pub(crate) fn push_dict_event(&mut self, id: NodeId, event: DictEvent) {
        self.pending.push(match event {
            DictEvent::Added(guid, value) => SyncEvent::ItemAdded {
                node: id,
                guid,
                value,
            },
            DictEvent::Removed(guid, value) => SyncEvent::ItemRemoved {
                node: id,
                guid,
                value,
            },
            DictEvent::Updated(guid, value) => SyncEvent::ItemUpdated {
                node: id,
                guid,
                value,
            },
        });
    }

    // ── Event dispatch ─────────────────────────────────────────────────────

    /// Invokes every observer for every staged event, in order, inside the
    /// mutating call that produced them.
    pub(crate) fn dispatch(&mut self) {
        if self.pending.is_empty() || self.observers.is_empty() {
            self.pending.clear();
            return;
        }
        let events = mem::take(&mut self.pending);
        let mut observers = mem::take(&mut self.observers);
        for event in &events {
            for observer in observers.iter_mut() {
                observer(event);
            }
        }
        // New observers registered from inside a callback are kept.
        observers.append(&mut self.observers);
        self.observers = observers;
    }
}
