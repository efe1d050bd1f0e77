//! The four-method serialize contract: delta read/write and full
//! read/write over a subtree.
//!
//! Delta frames carry only dirty children behind a positional bitmask;
//! full frames carry every child unconditionally and are used for
//! snapshots and late joiners. Any failure inside a child is annotated
//! with that child's diagnostic name and rethrown — skipping a child would
//! permanently desync the positional wire format, so errors are always
//! fatal to the frame.

use treesync_buffers::{Reader, Writer};

use crate::container::{read_mask, write_mask};
use crate::error::SyncError;
use crate::tree::{NodeId, NodeTag, SyncTree};

impl SyncTree {
    // ── Delta ──────────────────────────────────────────────────────────────

    /// Writes a delta frame for the subtree at `id` and force-cleans what
    /// was written. Children whose rate limiter defers them stay dirty for
    /// a later flush.
    pub fn write_delta(&mut self, id: NodeId, w: &mut Writer) -> Result<(), SyncError> {
        self.validate_links(id)?;
        let now = self.clock().local_tick();
        self.write_delta_inner(id, w, now)?;
        if self.tag(id) != NodeTag::Container {
            self.finish_child_flush(id, now);
        }
        Ok(())
    }

    fn write_delta_inner(&mut self, id: NodeId, w: &mut Writer, now: u64) -> Result<(), SyncError> {
        match self.tag(id) {
            NodeTag::Container => {
                let children = self.children_of(id);
                let bits: Vec<bool> = children
                    .iter()
                    .map(|&c| self.is_send_eligible(c, now))
                    .collect();
                write_mask(w, &bits);
                for (&child, &dirty) in children.iter().zip(&bits) {
                    if !dirty {
                        continue;
                    }
                    self.write_delta_inner(child, w, now)
                        .map_err(|e| e.in_child(self.label(child)))?;
                    // Nested containers refresh themselves from their own
                    // children; force-cleaning them here would wipe the
                    // pending state of rate-limit-deferred descendants.
                    if self.tag(child) != NodeTag::Container {
                        self.finish_child_flush(child, now);
                    }
                }
                self.refresh_dirty_from_children(id);
            }
            NodeTag::Field => self.field_ref(id)?.write_value(w),
            NodeTag::Set => self.set_ref(id)?.write_delta(w),
            NodeTag::Collection => self.collection_ref(id)?.write_delta(w),
        }
        Ok(())
    }

    /// Marks a flushed node clean and arms its rate limiter.
    fn finish_child_flush(&mut self, id: NodeId, now: u64) {
        self.mark_clean(id);
        self.apply_rate_limit(id, now);
    }

    /// Reads a delta frame into the subtree at `id`.
    ///
    /// Received field values are stamped from the local clock and accepted
    /// only when the stamp takes priority over the field's recorded
    /// version. Set changes are queued for tick-delayed application.
    ///
    /// The session layer must merge the sender's counters via
    /// [`SyncTree::observe_clock`] before reading a frame; field values in
    /// a frame that carries nothing newer are rejected by the priority
    /// gate.
    pub fn read_delta(&mut self, id: NodeId, r: &mut Reader<'_>) -> Result<(), SyncError> {
        let now = self.clock().local_tick();
        let result = self.read_delta_inner(id, r, now);
        self.dispatch();
        result
    }

    fn read_delta_inner(
        &mut self,
        id: NodeId,
        r: &mut Reader<'_>,
        now: u64,
    ) -> Result<(), SyncError> {
        match self.tag(id) {
            NodeTag::Container => {
                let children = self.children_of(id);
                let bits = read_mask(r, children.len())?;
                for (&child, &dirty) in children.iter().zip(&bits) {
                    if !dirty {
                        continue;
                    }
                    self.read_delta_inner(child, r, now)
                        .map_err(|e| e.in_child(self.label(child)))?;
                }
            }
            NodeTag::Field => {
                let value = self.field_ref(id)?.read_value(r)?;
                self.apply_remote_value(id, value, now)?;
            }
            NodeTag::Set => {
                let needs_tick = self.set_mut(id)?.read_delta(r, now)?;
                if needs_tick {
                    self.request_tick(id);
                }
            }
            NodeTag::Collection => {
                let events = self.collection_mut(id)?.read_delta(r)?;
                for event in events {
                    self.push_dict_event(id, event);
                }
            }
        }
        Ok(())
    }

    // ── Full ───────────────────────────────────────────────────────────────

    /// Writes every child in list order, no bitmask, regardless of dirty
    /// state. Does not change dirty state.
    pub fn write_full(&self, id: NodeId, w: &mut Writer) -> Result<(), SyncError> {
        match self.tag(id) {
            NodeTag::Container => {
                for child in self.children_of(id) {
                    self.write_full(child, w)
                        .map_err(|e| e.in_child(self.label(child)))?;
                }
            }
            NodeTag::Field => self.field_ref(id)?.write_value(w),
            NodeTag::Set => self.set_ref(id)?.write_full(w),
            NodeTag::Collection => self.collection_ref(id)?.write_full(w),
        }
        Ok(())
    }

    /// Reads a full frame: every field snaps to its received value with any
    /// in-flight interpolation cancelled, sets and collections recreate
    /// their membership without delay.
    pub fn read_full(&mut self, id: NodeId, r: &mut Reader<'_>) -> Result<(), SyncError> {
        let result = self.read_full_inner(id, r);
        self.dispatch();
        result
    }

    fn read_full_inner(&mut self, id: NodeId, r: &mut Reader<'_>) -> Result<(), SyncError> {
        match self.tag(id) {
            NodeTag::Container => {
                for child in self.children_of(id) {
                    self.read_full_inner(child, r)
                        .map_err(|e| e.in_child(self.label(child)))?;
                }
            }
            NodeTag::Field => {
                let value = self.field_ref(id)?.read_value(r)?;
                self.apply_snapshot_value(id, value)?;
            }
            NodeTag::Set => self.set_mut(id)?.read_full(r)?,
            NodeTag::Collection => self.collection_mut(id)?.read_full(r)?,
        }
        Ok(())
    }

    // ── Copy ───────────────────────────────────────────────────────────────

    /// Deep-copies `src` (in `src_tree`) into `dst` by round-tripping the
    /// source through an in-memory full frame, then marks `dst` clean. The
    /// two subtrees must have identical shapes.
    pub fn copy_from(
        &mut self,
        dst: NodeId,
        src_tree: &SyncTree,
        src: NodeId,
    ) -> Result<(), SyncError> {
        let mut w = Writer::new();
        src_tree.write_full(src, &mut w)?;
        let bytes = w.flush();
        let mut r = Reader::new(&bytes);
        self.read_full(dst, &mut r)?;
        self.mark_clean(dst);
        Ok(())
    }
}
